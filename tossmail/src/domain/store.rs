use crate::domain::types::{Domain, DomainStatus};
use crate::error::{Result, TossmailError};
use crate::storage::{format_timestamp, parse_timestamp};
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// SQLite-backed store for domains.
///
/// Status changes go through guarded UPDATE statements that check the
/// current status in the same statement, so concurrent operations on
/// one domain cannot interleave into an impossible state.
#[derive(Clone)]
pub struct DomainStore {
    pool: SqlitePool,
}

impl DomainStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 0,
                dns_challenge TEXT NOT NULL DEFAULT '',
                acme_challenge_token TEXT NOT NULL DEFAULT '',
                acme_challenge_value TEXT NOT NULL DEFAULT '',
                error_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, name: &str, dns_challenge: &str) -> Result<Domain> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO domains (name, status, is_active, dns_challenge, created_at, updated_at) \
             VALUES (?, ?, 0, ?, ?, ?)",
        )
        .bind(name)
        .bind(DomainStatus::PendingDns.as_str())
        .bind(dns_challenge)
        .bind(format_timestamp(&now))
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(Domain {
                id: done.last_insert_rowid(),
                name: name.to_string(),
                status: DomainStatus::PendingDns,
                is_active: false,
                dns_challenge: dns_challenge.to_string(),
                acme_challenge_token: String::new(),
                acme_challenge_value: String::new(),
                error_message: String::new(),
                created_at: now,
                updated_at: now,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                TossmailError::Duplicate(format!("Domain {} already exists", name)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Domain> {
        let row = sqlx::query("SELECT * FROM domains WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Self::row_to_domain(&r),
            None => Err(TossmailError::NotFound(format!("domain {}", id))),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let row = sqlx::query("SELECT * FROM domains WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_domain(&r)).transpose()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Domain>> {
        let rows = sqlx::query("SELECT * FROM domains ORDER BY id DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_domain).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM domains")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Move a domain from one of `from` to `to`, clearing any error.
    ///
    /// Returns false when the row was not in an accepted status, in
    /// which case nothing changed.
    pub async fn transition_status(
        &self,
        id: i64,
        from: &[DomainStatus],
        to: DomainStatus,
    ) -> Result<bool> {
        let placeholders = from.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE domains SET status = ?, error_message = '', updated_at = ? \
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(format_timestamp(&Utc::now()))
            .bind(id);
        for status in from {
            query = query.bind(status.as_str());
        }

        Ok(query.execute(&self.pool).await?.rows_affected() > 0)
    }

    /// Store a fresh ACME challenge and advance to acme_challenge_ready
    pub async fn begin_acme_challenge(&self, id: i64, token: &str, value: &str) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE domains SET status = ?, acme_challenge_token = ?, acme_challenge_value = ?, \
             error_message = '', updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DomainStatus::AcmeChallengeReady.as_str())
        .bind(token)
        .bind(value)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .bind(DomainStatus::DnsVerified.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Mark issuance complete; the consumed challenge is cleared
    pub async fn finish_certificate(&self, id: i64) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE domains SET status = ?, acme_challenge_token = '', acme_challenge_value = '', \
             error_message = '', updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DomainStatus::CertificateIssued.as_str())
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .bind(DomainStatus::PendingCertificate.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    pub async fn activate(&self, id: i64) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE domains SET status = ?, is_active = 1, error_message = '', updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(DomainStatus::Active.as_str())
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .bind(DomainStatus::CertificateIssued.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    pub async fn set_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE domains SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(DomainStatus::Failed.as_str())
        .bind(error)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_error_message(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE domains SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Operator override. The activation flag follows the status.
    pub async fn set_status(&self, id: i64, status: DomainStatus, error: &str) -> Result<()> {
        let is_active = status == DomainStatus::Active;
        let done = sqlx::query(
            "UPDATE domains SET status = ?, is_active = ?, error_message = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(is_active as i64)
        .bind(error)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(TossmailError::NotFound(format!("domain {}", id)));
        }
        Ok(())
    }

    pub async fn set_dns_challenge(&self, id: i64, challenge: &str) -> Result<()> {
        sqlx::query("UPDATE domains SET dns_challenge = ?, updated_at = ? WHERE id = ?")
            .bind(challenge)
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record challenge material without a status change; the
    /// single-step issuance path runs outside acme_challenge_ready
    pub async fn set_acme_challenge(&self, id: i64, token: &str, value: &str) -> Result<()> {
        sqlx::query(
            "UPDATE domains SET acme_challenge_token = ?, acme_challenge_value = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(token)
        .bind(value)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let done = sqlx::query("DELETE FROM domains WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(TossmailError::NotFound(format!("domain {}", id)));
        }
        Ok(())
    }

    fn row_to_domain(row: &SqliteRow) -> Result<Domain> {
        Ok(Domain {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: DomainStatus::parse(&row.try_get::<String, _>("status")?)?,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
            dns_challenge: row.try_get("dns_challenge")?,
            acme_challenge_token: row.try_get("acme_challenge_token")?,
            acme_challenge_value: row.try_get("acme_challenge_value")?,
            error_message: row.try_get("error_message")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}
