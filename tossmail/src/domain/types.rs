use crate::error::{Result, TossmailError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning lifecycle of a receiving domain.
///
/// Rows written before status tracking existed carry an empty status
/// string; those map to [`DomainStatus::LegacyActive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    PendingDns,
    DnsVerified,
    AcmeChallengeReady,
    /// Certificate order submitted, waiting on the authority
    PendingCertificate,
    CertificateIssued,
    Active,
    Failed,
    LegacyActive,
}

impl DomainStatus {
    /// Database representation; legacy rows store the empty string
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::PendingDns => "pending_dns",
            DomainStatus::DnsVerified => "dns_verified",
            DomainStatus::AcmeChallengeReady => "acme_challenge_ready",
            DomainStatus::PendingCertificate => "pending_certificate",
            DomainStatus::CertificateIssued => "certificate_issued",
            DomainStatus::Active => "active",
            DomainStatus::Failed => "failed",
            DomainStatus::LegacyActive => "",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending_dns" => Ok(DomainStatus::PendingDns),
            "dns_verified" => Ok(DomainStatus::DnsVerified),
            "acme_challenge_ready" => Ok(DomainStatus::AcmeChallengeReady),
            "pending_certificate" => Ok(DomainStatus::PendingCertificate),
            "certificate_issued" => Ok(DomainStatus::CertificateIssued),
            "active" => Ok(DomainStatus::Active),
            "failed" => Ok(DomainStatus::Failed),
            "" | "legacy_active" => Ok(DomainStatus::LegacyActive),
            other => Err(TossmailError::InvalidInput(format!(
                "Unknown domain status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A receiving domain and its provisioning state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    /// Lowercased domain name, unique
    pub name: String,
    pub status: DomainStatus,
    pub is_active: bool,
    /// Ownership TXT value the operator publishes at the apex
    pub dns_challenge: String,
    pub acme_challenge_token: String,
    /// Expected TXT value at `_acme-challenge.<name>`
    pub acme_challenge_value: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Domain {
    /// Whether SMTP accepts mail for this domain.
    ///
    /// Gated on the activation flag alone so legacy rows keep
    /// receiving even though their status never advanced.
    pub fn receives_mail(&self) -> bool {
        self.is_active
    }

    pub fn acme_record_name(&self) -> String {
        format!("_acme-challenge.{}", self.name)
    }
}

/// One DNS record the operator has to publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub record_type: String,
    pub name: String,
    pub value: String,
    pub purpose: String,
}

/// Setup instructions returned by the DNS guide endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsGuide {
    pub domain: String,
    pub records: Vec<DnsRecord>,
}
