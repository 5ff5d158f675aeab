use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A receiving address under a provisioned domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: i64,
    pub local_part: String,
    pub domain_id: i64,
    /// Lowercased `local@domain`, unique
    pub full_address: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A stored message (bodies included, attachment content lives in the file store)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub mailbox_id: i64,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub snippet: String,
    pub body_text: String,
    pub body_html: String,
    pub is_read: bool,
    pub received_at: DateTime<Utc>,
}

/// Fields for inserting a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub mailbox_id: i64,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub snippet: String,
    pub body_text: String,
    pub body_html: String,
}

/// Attachment metadata; the bytes live in the file store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content_type: String,
    /// Opaque handle returned by the file store
    pub storage_path: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting an attachment row
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub storage_path: String,
    pub size_bytes: i64,
}
