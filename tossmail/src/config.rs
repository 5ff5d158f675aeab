use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub dns: DnsConfig,
    pub acme: AcmeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub hostname: String,
    /// Create mailboxes on first delivery instead of requiring them to exist
    pub auto_provision: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub enable_starttls: bool,
    /// Permit AUTH on unencrypted connections
    pub allow_insecure_auth: bool,
    pub max_message_size: usize,
    pub max_recipients: usize,
    pub max_line_length: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub attachment_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    pub lookup_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeConfig {
    pub directory_url: String,
    pub contact_email: String,
    /// Directory holding ACME account credentials
    pub storage_dir: String,
    pub poll_attempts: u32,
    pub poll_initial_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::TossmailError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::TossmailError::Config(e.to_string()))
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                hostname: "mx.tossmail.localhost".to_string(),
                auto_provision: true,
            },
            smtp: SmtpConfig {
                listen_addr: "0.0.0.0:2525".to_string(),
                enable_starttls: true,
                allow_insecure_auth: false,
                max_message_size: 25 * 1024 * 1024, // 25MB
                max_recipients: 100,
                max_line_length: 2000,
                read_timeout_secs: 60,
                write_timeout_secs: 60,
            },
            http: HttpConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
            },
            storage: StorageConfig {
                database_url: "sqlite://tossmail.db?mode=rwc".to_string(),
                attachment_path: "data/attachments".to_string(),
            },
            dns: DnsConfig {
                lookup_timeout_secs: 5,
            },
            acme: AcmeConfig {
                directory_url: "https://acme-staging-v02.api.letsencrypt.org/directory".to_string(),
                contact_email: "admin@tossmail.localhost".to_string(),
                storage_dir: "data/acme".to_string(),
                poll_attempts: 10,
                poll_initial_delay_ms: 500,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
