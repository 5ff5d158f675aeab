//! tossmail: disposable-email service core
//!
//! Receives mail over SMTP for domains an operator provisions at
//! runtime: prove DNS ownership with a TXT record, obtain a TLS
//! certificate through a dns-01 ACME challenge, then activate the
//! domain for delivery. Mailboxes are created on first delivery and
//! messages are parsed into displayable form with their attachments.
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with defaults
//! - [`error`]: Error types, including provisioning diagnostics
//! - [`smtp`]: SMTP server, per-connection sessions, STARTTLS
//! - [`mime`]: Message parsing (headers, bodies, snippet, attachments)
//! - [`domain`]: Domain rows and the provisioning state machine
//! - [`dns`]: TXT record verification
//! - [`acme`]: Certificate issuance via dns-01 challenges
//! - [`tls`]: Certificate persistence and SNI resolution
//! - [`storage`]: Mailbox/message/attachment persistence
//! - [`notify`]: New-message broadcast hub
//! - [`api`]: Operator HTTP API and WebSocket notifications
//! - [`utils`]: Address validation helpers

pub mod acme;
pub mod api;
pub mod config;
pub mod dns;
pub mod domain;
pub mod error;
pub mod mime;
pub mod notify;
pub mod smtp;
pub mod storage;
pub mod tls;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, TossmailError};
