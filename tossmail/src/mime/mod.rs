//! MIME message parsing and handling
//!
//! This module provides functionality to parse incoming messages into
//! the fields the service stores: sender, subject, bodies, snippet and
//! decoded attachments.

pub mod parser;
pub mod types;

pub use parser::MimeParser;
pub use types::{EmailAttachment, MimePart, ParsedEmail};
