//! Domain records and the provisioning state machine
//!
//! - [`types`]: domain row, status enum, DNS setup guide
//! - [`store`]: SQLite persistence with guarded status transitions
//! - [`manager`]: orchestration of verification, issuance and activation

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{DnsVerifyOutcome, DomainManager};
pub use store::DomainStore;
pub use types::{DnsGuide, DnsRecord, Domain, DomainStatus};
