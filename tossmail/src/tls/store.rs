//! Per-domain certificate storage and SNI resolution
//!
//! Issued certificates live on rows in the `certificates` table and
//! are mirrored into an in-memory map the TLS stack resolves against
//! during STARTTLS handshakes. Domains without a certificate fall back
//! to a self-signed default so the listener can still negotiate TLS.

use crate::error::{Result, TossmailError};
use crate::storage::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::{any_supported_type, CertifiedKey};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::io::{BufReader, Cursor};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A persisted certificate row
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub id: i64,
    pub domain_id: i64,
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Certificate store with a live SNI map.
///
/// `resolve` runs inside TLS handshakes on runtime threads, so the map
/// sits behind a std RwLock rather than an async one.
pub struct CertificateStore {
    pool: SqlitePool,
    certs: RwLock<HashMap<String, Arc<CertifiedKey>>>,
    default_cert: RwLock<Option<Arc<CertifiedKey>>>,
}

impl CertificateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            certs: RwLock::new(HashMap::new()),
            default_cert: RwLock::new(None),
        }
    }

    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL,
                domain TEXT NOT NULL UNIQUE,
                cert_pem TEXT NOT NULL,
                key_pem TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                not_after TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace the certificate for a domain in one statement
    pub async fn upsert(
        &self,
        domain_id: i64,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        issued_at: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<StoredCertificate> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO certificates (domain_id, domain, cert_pem, key_pem, issued_at, not_after, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET
                domain_id = excluded.domain_id,
                cert_pem = excluded.cert_pem,
                key_pem = excluded.key_pem,
                issued_at = excluded.issued_at,
                not_after = excluded.not_after,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(domain_id)
        .bind(domain)
        .bind(cert_pem)
        .bind(key_pem)
        .bind(format_timestamp(&issued_at))
        .bind(format_timestamp(&not_after))
        .bind(format_timestamp(&now))
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await?;

        self.find_by_domain(domain).await?.ok_or_else(|| {
            TossmailError::Storage(format!("Certificate for {} missing after upsert", domain))
        })
    }

    pub async fn find_by_domain(&self, domain: &str) -> Result<Option<StoredCertificate>> {
        let row = sqlx::query("SELECT * FROM certificates WHERE domain = ?")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_certificate(&r)).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<StoredCertificate>> {
        let rows = sqlx::query("SELECT * FROM certificates ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_certificate).collect()
    }

    /// Drop the row and live entry for a domain
    pub async fn remove_domain(&self, domain: &str) -> Result<()> {
        sqlx::query("DELETE FROM certificates WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await?;

        self.certs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(domain);
        Ok(())
    }

    /// Rebuild the whole SNI map from the table.
    ///
    /// Rows that no longer parse are skipped with a warning rather
    /// than taking down every other domain.
    pub async fn reload_all(&self) -> Result<usize> {
        let stored = self.list_all().await?;

        let mut map = HashMap::with_capacity(stored.len());
        for cert in &stored {
            match Self::certified_key_from_pem(&cert.cert_pem, &cert.key_pem) {
                Ok(key) => {
                    map.insert(cert.domain.clone(), Arc::new(key));
                }
                Err(e) => {
                    warn!("Skipping unusable certificate for {}: {}", cert.domain, e);
                }
            }
        }

        let count = map.len();
        *self.certs.write().unwrap_or_else(PoisonError::into_inner) = map;

        info!("Loaded {} domain certificates", count);
        Ok(count)
    }

    /// Refresh the live entry for one domain after issuance
    pub async fn reload_domain(&self, domain: &str) -> Result<bool> {
        match self.find_by_domain(domain).await? {
            Some(cert) => {
                let key = Self::certified_key_from_pem(&cert.cert_pem, &cert.key_pem)?;
                self.certs
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(domain.to_string(), Arc::new(key));
                info!("Certificate for {} loaded into the TLS config", domain);
                Ok(true)
            }
            None => {
                self.certs
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(domain);
                Ok(false)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CertifiedKey>> {
        self.certs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Whether any certificate (including the default) is available
    pub fn has_any(&self) -> bool {
        !self
            .certs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
            || self
                .default_cert
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    /// Generate and install the fallback certificate used for names
    /// without an issued certificate
    pub fn install_default_self_signed(&self, hostname: &str) -> Result<()> {
        let cert = rcgen::generate_simple_self_signed(vec![hostname.to_string()])
            .map_err(|e| TossmailError::Tls(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = cert
            .serialize_der()
            .map_err(|e| TossmailError::Tls(format!("Failed to serialize certificate: {}", e)))?;
        let key_der = cert.serialize_private_key_der();

        let signing_key = any_supported_type(&rustls::PrivateKey(key_der))
            .map_err(|e| TossmailError::Tls(format!("Unusable private key: {}", e)))?;
        let certified = CertifiedKey::new(vec![rustls::Certificate(cert_der)], signing_key);

        *self
            .default_cert
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(certified));

        info!("Installed self-signed fallback certificate for {}", hostname);
        Ok(())
    }

    fn certified_key_from_pem(cert_pem: &str, key_pem: &str) -> Result<CertifiedKey> {
        let mut cert_reader = BufReader::new(Cursor::new(cert_pem.as_bytes()));
        let certs_der = certs(&mut cert_reader)
            .map_err(|e| TossmailError::Tls(format!("Failed to read certificates: {}", e)))?;

        if certs_der.is_empty() {
            return Err(TossmailError::Tls("No certificates found in PEM".to_string()));
        }

        // Try PKCS8 first, then RSA
        let mut key_reader = BufReader::new(Cursor::new(key_pem.as_bytes()));
        let keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|e| TossmailError::Tls(format!("Failed to read PKCS8 keys: {}", e)))?;

        let key_der = if !keys.is_empty() {
            keys[0].clone()
        } else {
            let mut key_reader = BufReader::new(Cursor::new(key_pem.as_bytes()));
            let rsa_keys = rsa_private_keys(&mut key_reader)
                .map_err(|e| TossmailError::Tls(format!("Failed to read RSA keys: {}", e)))?;

            if rsa_keys.is_empty() {
                return Err(TossmailError::Tls("No private key found in PEM".to_string()));
            }
            rsa_keys[0].clone()
        };

        let signing_key = any_supported_type(&rustls::PrivateKey(key_der))
            .map_err(|e| TossmailError::Tls(format!("Unusable private key: {}", e)))?;

        let certs = certs_der.into_iter().map(rustls::Certificate).collect();
        Ok(CertifiedKey::new(certs, signing_key))
    }

    fn row_to_certificate(row: &SqliteRow) -> Result<StoredCertificate> {
        Ok(StoredCertificate {
            id: row.try_get("id")?,
            domain_id: row.try_get("domain_id")?,
            domain: row.try_get("domain")?,
            cert_pem: row.try_get("cert_pem")?,
            key_pem: row.try_get("key_pem")?,
            issued_at: parse_timestamp(&row.try_get::<String, _>("issued_at")?)?,
            not_after: parse_timestamp(&row.try_get::<String, _>("not_after")?)?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

impl ResolvesServerCert for CertificateStore {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        if let Some(name) = client_hello.server_name() {
            if let Some(key) = self.lookup(name) {
                return Some(key);
            }
            debug!("No certificate for SNI name {}", name);
        }

        self.default_cert
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
