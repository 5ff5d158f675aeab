//! Issuance orchestration
//!
//! Bridges the ACME authority and the certificate store: on successful
//! completion the certificate is persisted and loaded into the live
//! TLS config so the next handshake can serve it.

use crate::acme::authority::{AcmeAuthority, DnsChallenge};
use crate::error::{Result, TossmailError};
use crate::tls::{CertificateStore, StoredCertificate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Extract the validity window from a PEM certificate chain (leaf first)
pub fn certificate_validity(cert_pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| TossmailError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| TossmailError::Tls(format!("Failed to parse certificate: {}", e)))?;

    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| TossmailError::Tls("Certificate notBefore out of range".to_string()))?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| TossmailError::Tls("Certificate notAfter out of range".to_string()))?;

    Ok((not_before, not_after))
}

pub struct CertificateManager {
    authority: Arc<dyn AcmeAuthority>,
    certs: Arc<CertificateStore>,
}

impl CertificateManager {
    pub fn new(authority: Arc<dyn AcmeAuthority>, certs: Arc<CertificateStore>) -> Self {
        Self { authority, certs }
    }

    /// Open an order for the domain and return the dns-01 challenge the
    /// operator has to publish
    pub async fn request_challenge(&self, domain: &str) -> Result<DnsChallenge> {
        self.authority.request_dns_challenge(domain).await
    }

    /// Drive the outstanding order to completion and make the resulting
    /// certificate servable.
    ///
    /// A certificate that cannot be stored or loaded is treated as a
    /// failed issuance; the caller decides whether to mark the domain
    /// failed.
    pub async fn issue_certificate(
        &self,
        domain_id: i64,
        domain: &str,
    ) -> Result<StoredCertificate> {
        let issued = self.authority.complete_dns_challenge(domain).await?;
        let (issued_at, not_after) = certificate_validity(&issued.cert_pem)?;

        let stored = self
            .certs
            .upsert(
                domain_id,
                domain,
                &issued.cert_pem,
                &issued.key_pem,
                issued_at,
                not_after,
            )
            .await?;

        self.certs.reload_domain(domain).await?;

        info!("Certificate for {} valid until {}", domain, not_after);
        Ok(stored)
    }

    pub fn certificate_store(&self) -> &Arc<CertificateStore> {
        &self.certs
    }
}
