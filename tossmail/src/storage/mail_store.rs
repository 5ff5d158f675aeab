use crate::error::{Result, TossmailError};
use crate::storage::types::{Attachment, Mailbox, Message, NewAttachment, NewMessage};
use crate::storage::{format_timestamp, parse_timestamp};
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

/// SQLite-backed store for mailboxes, messages and attachment metadata
#[derive(Clone)]
pub struct MailStore {
    pool: SqlitePool,
}

impl MailStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mailboxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                local_part TEXT NOT NULL,
                domain_id INTEGER NOT NULL,
                full_address TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mailbox_id INTEGER NOT NULL,
                sender_email TEXT NOT NULL DEFAULT '',
                sender_name TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                body_text TEXT NOT NULL DEFAULT '',
                body_html TEXT NOT NULL DEFAULT '',
                is_read INTEGER NOT NULL DEFAULT 0,
                received_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_mailbox ON messages(mailbox_id, received_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a mailbox by address, creating it when absent.
    ///
    /// Returns the mailbox and whether it was just created. Concurrent
    /// deliveries to a new address race on the unique index; the loser
    /// re-reads the winner's row.
    pub async fn get_or_create_mailbox(
        &self,
        local_part: &str,
        domain_id: i64,
        full_address: &str,
    ) -> Result<(Mailbox, bool)> {
        if let Some(existing) = self.find_mailbox_by_address(full_address).await? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO mailboxes (local_part, domain_id, full_address, created_at, last_accessed_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(local_part)
        .bind(domain_id)
        .bind(full_address)
        .bind(format_timestamp(&now))
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok((
                Mailbox {
                    id: done.last_insert_rowid(),
                    local_part: local_part.to_string(),
                    domain_id,
                    full_address: full_address.to_string(),
                    created_at: now,
                    last_accessed_at: now,
                },
                true,
            )),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Lost the insert race, the row exists now
                let mailbox = self
                    .find_mailbox_by_address(full_address)
                    .await?
                    .ok_or_else(|| {
                        TossmailError::Storage(format!(
                            "Mailbox {} vanished after insert conflict",
                            full_address
                        ))
                    })?;
                Ok((mailbox, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_mailbox_by_address(&self, full_address: &str) -> Result<Option<Mailbox>> {
        let row = sqlx::query("SELECT * FROM mailboxes WHERE full_address = ?")
            .bind(full_address)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_mailbox(&r)).transpose()
    }

    pub async fn mailbox_exists(&self, full_address: &str) -> Result<bool> {
        Ok(self.find_mailbox_by_address(full_address).await?.is_some())
    }

    pub async fn get_mailbox(&self, id: i64) -> Result<Mailbox> {
        let row = sqlx::query("SELECT * FROM mailboxes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::row_to_mailbox(&r),
            None => Err(TossmailError::NotFound(format!("mailbox {}", id))),
        }
    }

    pub async fn list_mailboxes(
        &self,
        domain_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Mailbox>> {
        let rows = match domain_id {
            Some(domain_id) => {
                sqlx::query(
                    "SELECT * FROM mailboxes WHERE domain_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
                )
                .bind(domain_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM mailboxes ORDER BY id DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_mailbox).collect()
    }

    /// Record that the mailbox was read via the API
    pub async fn touch_mailbox(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET last_accessed_at = ? WHERE id = ?")
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a message and its attachment rows in one transaction.
    ///
    /// Either the message and every attachment row land together or
    /// nothing does.
    pub async fn create_message_with_attachments(
        &self,
        message: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<Message> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let done = sqlx::query(
            "INSERT INTO messages (mailbox_id, sender_email, sender_name, subject, snippet, body_text, body_html, is_read, received_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(message.mailbox_id)
        .bind(&message.sender_email)
        .bind(&message.sender_name)
        .bind(&message.subject)
        .bind(&message.snippet)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(format_timestamp(&now))
        .execute(&mut *tx)
        .await?;

        let message_id = done.last_insert_rowid();

        for att in &attachments {
            sqlx::query(
                "INSERT INTO attachments (message_id, filename, content_type, storage_path, size_bytes, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id)
            .bind(&att.filename)
            .bind(&att.content_type)
            .bind(&att.storage_path)
            .bind(att.size_bytes)
            .bind(format_timestamp(&now))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            "Stored message {} for mailbox {} ({} attachments)",
            message_id,
            message.mailbox_id,
            attachments.len()
        );

        Ok(Message {
            id: message_id,
            mailbox_id: message.mailbox_id,
            sender_email: message.sender_email,
            sender_name: message.sender_name,
            subject: message.subject,
            snippet: message.snippet,
            body_text: message.body_text,
            body_html: message.body_html,
            is_read: false,
            received_at: now,
        })
    }

    pub async fn list_messages(
        &self,
        mailbox_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE mailbox_id = ? ORDER BY received_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(mailbox_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_message).collect()
    }

    pub async fn count_messages(&self, mailbox_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE mailbox_id = ?")
            .bind(mailbox_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn get_message(&self, id: i64) -> Result<Message> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::row_to_message(&r),
            None => Err(TossmailError::NotFound(format!("message {}", id))),
        }
    }

    pub async fn mark_read(&self, id: i64) -> Result<()> {
        let done = sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(TossmailError::NotFound(format!("message {}", id)));
        }
        Ok(())
    }

    /// Delete a message and its attachment rows, returning the removed
    /// attachment metadata so the caller can clean up stored files.
    pub async fn delete_message(&self, id: i64) -> Result<Vec<Attachment>> {
        let attachments = self.attachments_for_message(id).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attachments WHERE message_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let done = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if done.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(TossmailError::NotFound(format!("message {}", id)));
        }

        tx.commit().await?;
        Ok(attachments)
    }

    pub async fn attachments_for_message(&self, message_id: i64) -> Result<Vec<Attachment>> {
        let rows = sqlx::query("SELECT * FROM attachments WHERE message_id = ? ORDER BY id")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_attachment).collect()
    }

    pub async fn get_attachment(&self, id: i64) -> Result<Attachment> {
        let row = sqlx::query("SELECT * FROM attachments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::row_to_attachment(&r),
            None => Err(TossmailError::NotFound(format!("attachment {}", id))),
        }
    }

    fn row_to_mailbox(row: &SqliteRow) -> Result<Mailbox> {
        Ok(Mailbox {
            id: row.try_get("id")?,
            local_part: row.try_get("local_part")?,
            domain_id: row.try_get("domain_id")?,
            full_address: row.try_get("full_address")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            last_accessed_at: parse_timestamp(&row.try_get::<String, _>("last_accessed_at")?)?,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message> {
        Ok(Message {
            id: row.try_get("id")?,
            mailbox_id: row.try_get("mailbox_id")?,
            sender_email: row.try_get("sender_email")?,
            sender_name: row.try_get("sender_name")?,
            subject: row.try_get("subject")?,
            snippet: row.try_get("snippet")?,
            body_text: row.try_get("body_text")?,
            body_html: row.try_get("body_html")?,
            is_read: row.try_get::<i64, _>("is_read")? != 0,
            received_at: parse_timestamp(&row.try_get::<String, _>("received_at")?)?,
        })
    }

    fn row_to_attachment(row: &SqliteRow) -> Result<Attachment> {
        Ok(Attachment {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            filename: row.try_get("filename")?,
            content_type: row.try_get("content_type")?,
            storage_path: row.try_get("storage_path")?,
            size_bytes: row.try_get("size_bytes")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }
}
