//! Utility modules
//!
//! Provides shared helpers used across the service:
//! - [`email`]: Email address validation and splitting (RFC 5321)

pub mod email;

pub use email::{split_address, validate_domain_name, validate_email};
