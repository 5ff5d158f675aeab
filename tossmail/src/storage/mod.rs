//! Persistence for mailboxes, messages and attachment content
//!
//! - [`mail_store`]: SQLite store for mailboxes, messages and attachment rows
//! - [`file_store`]: attachment content storage with path-safety checks
//! - [`types`]: row types shared with the API layer

pub mod file_store;
pub mod mail_store;
pub mod types;

pub use file_store::{FileStore, LocalFileStore};
pub use mail_store::MailStore;
pub use types::{Attachment, Mailbox, Message, NewAttachment, NewMessage};

use crate::error::{Result, TossmailError};
use chrono::{DateTime, Utc};

/// Timestamps are stored as RFC 3339 text
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TossmailError::Storage(format!("Invalid timestamp {}: {}", value, e)))
}
