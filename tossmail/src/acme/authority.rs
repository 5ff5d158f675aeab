use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A dns-01 challenge the operator has to publish before submitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsChallenge {
    /// Token assigned by the authority
    pub token: String,
    /// TXT record name, `_acme-challenge.<domain>`
    pub txt_record_name: String,
    /// Exact TXT value the authority expects to find
    pub expected_value: String,
}

/// Certificate material returned on successful issuance
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Full PEM chain, leaf first
    pub cert_pem: String,
    /// PKCS#8 private key PEM
    pub key_pem: String,
}

/// Certificate authority seam.
///
/// The real implementation speaks ACME; tests substitute one that
/// issues self-signed certificates or fails on demand.
#[async_trait]
pub trait AcmeAuthority: Send + Sync {
    /// Open an order for `domain` and return its dns-01 challenge
    async fn request_dns_challenge(&self, domain: &str) -> Result<DnsChallenge>;

    /// Tell the authority to validate the published record, then poll
    /// the order to completion and download the certificate
    async fn complete_dns_challenge(&self, domain: &str) -> Result<IssuedCertificate>;
}
