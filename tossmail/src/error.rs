use thiserror::Error;

#[derive(Error, Debug)]
pub enum TossmailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Domain not active: {0}")]
    DomainNotActive(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

pub type Result<T> = std::result::Result<T, TossmailError>;

/// Provisioning failures surfaced to operators.
///
/// Each variant maps to a stable machine-readable code and carries the
/// diagnostic payload the retry flow depends on (expected vs. found TXT
/// values, remediation hint).
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    #[error("domain is in status '{status}', cannot {operation}")]
    InvalidStatus { operation: String, status: String },

    #[error("DNS verification failed for TXT record {record}")]
    DnsVerificationFailed {
        record: String,
        expected: String,
        found: Vec<String>,
    },

    #[error("ACME challenge request failed: {detail}")]
    AcmeChallengeFailed { detail: String },

    #[error("ACME challenge expired: {detail}")]
    AcmeChallengeExpired { detail: String },

    #[error("ACME validation failed: {detail}")]
    AcmeValidationFailed {
        detail: String,
        expected: Option<String>,
        found: Vec<String>,
    },

    #[error("no pending ACME challenge for domain {domain}")]
    NoChallengeFound { domain: String },

    #[error("provisioning error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::InvalidStatus { .. } => "invalid-domain-status",
            ProvisionError::DnsVerificationFailed { .. } => "dns-verification-failed",
            ProvisionError::AcmeChallengeFailed { .. } => "acme-challenge-failed",
            ProvisionError::AcmeChallengeExpired { .. } => "acme-challenge-expired",
            ProvisionError::AcmeValidationFailed { .. } => "acme-validation-failed",
            ProvisionError::NoChallengeFound { .. } => "no-challenge-found",
            ProvisionError::Internal(_) => "internal",
        }
    }

    /// Human remediation hint for the operator-facing retry loop.
    pub fn suggested_action(&self) -> String {
        match self {
            ProvisionError::InvalidStatus { operation, status } => format!(
                "Complete the preceding provisioning steps before '{}' (current status: '{}')",
                operation, status
            ),
            ProvisionError::DnsVerificationFailed { record, expected, .. } => format!(
                "Publish a TXT record at '{}' with value '{}' and verify again once DNS has propagated",
                record, expected
            ),
            ProvisionError::AcmeChallengeFailed { .. } => {
                "Verify DNS ownership, then request a new ACME challenge".to_string()
            }
            ProvisionError::AcmeChallengeExpired { .. } => {
                "Request a new ACME challenge; the previous one is no longer valid".to_string()
            }
            ProvisionError::AcmeValidationFailed { expected, .. } => match expected {
                Some(value) => format!(
                    "Ensure the _acme-challenge TXT record contains '{}' before submitting again",
                    value
                ),
                None => "Check the _acme-challenge TXT record and submit again".to_string(),
            },
            ProvisionError::NoChallengeFound { .. } => {
                "Request an ACME challenge before verifying or submitting it".to_string()
            }
            ProvisionError::Internal(_) => "Retry the operation; contact support if it persists".to_string(),
        }
    }

    /// Expected TXT value, when the failure is a DNS/ACME comparison.
    pub fn expected_value(&self) -> Option<&str> {
        match self {
            ProvisionError::DnsVerificationFailed { expected, .. } => Some(expected),
            ProvisionError::AcmeValidationFailed { expected, .. } => expected.as_deref(),
            _ => None,
        }
    }

    /// TXT values actually observed, when the failure is a DNS/ACME comparison.
    pub fn found_values(&self) -> Option<&[String]> {
        match self {
            ProvisionError::DnsVerificationFailed { found, .. } => Some(found),
            ProvisionError::AcmeValidationFailed { found, .. } => Some(found),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_error_codes() {
        let err = ProvisionError::InvalidStatus {
            operation: "activate".to_string(),
            status: "pending_dns".to_string(),
        };
        assert_eq!(err.code(), "invalid-domain-status");

        let err = ProvisionError::NoChallengeFound {
            domain: "example.com".to_string(),
        };
        assert_eq!(err.code(), "no-challenge-found");
    }

    #[test]
    fn test_dns_verification_diagnostics() {
        let err = ProvisionError::DnsVerificationFailed {
            record: "_acme-challenge.example.com".to_string(),
            expected: "abc123".to_string(),
            found: vec!["other".to_string()],
        };

        assert_eq!(err.code(), "dns-verification-failed");
        assert_eq!(err.expected_value(), Some("abc123"));
        assert_eq!(err.found_values(), Some(&["other".to_string()][..]));
        assert!(err.suggested_action().contains("abc123"));
    }

    #[test]
    fn test_non_diagnostic_variants_have_no_payload() {
        let err = ProvisionError::Internal("boom".to_string());
        assert!(err.expected_value().is_none());
        assert!(err.found_values().is_none());
    }
}
