//! DNS lookups and challenge verification
//!
//! - [`resolver`]: TXT lookup seam with a system-resolver implementation
//! - [`verifier`]: expected-vs-found checks used by domain provisioning

pub mod resolver;
pub mod verifier;

pub use resolver::{SystemTxtResolver, TxtResolver};
pub use verifier::{DnsVerification, DnsVerifier, TxtRecordCheck};
