//! ACME dns-01 certificate issuance

mod authority;
mod client;
mod manager;

pub use authority::{AcmeAuthority, DnsChallenge, IssuedCertificate};
pub use client::AcmeClient;
pub use manager::{certificate_validity, CertificateManager};
