use crate::dns::resolver::TxtResolver;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Outcome of checking one TXT record against an expected value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxtRecordCheck {
    /// Record name that was queried
    pub record: String,
    pub expected: String,
    /// Every TXT value found at the name
    pub found: Vec<String>,
    pub verified: bool,
}

/// Combined result over all records required for a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsVerification {
    pub checks: Vec<TxtRecordCheck>,
    pub all_verified: bool,
}

impl DnsVerification {
    pub fn new(checks: Vec<TxtRecordCheck>) -> Self {
        let all_verified = !checks.is_empty() && checks.iter().all(|c| c.verified);
        Self {
            checks,
            all_verified,
        }
    }
}

/// Checks published TXT records against expected challenge values
#[derive(Clone)]
pub struct DnsVerifier {
    resolver: Arc<dyn TxtResolver>,
}

impl DnsVerifier {
    pub fn new(resolver: Arc<dyn TxtResolver>) -> Self {
        Self { resolver }
    }

    /// Check that `record` publishes `expected` among its TXT values.
    ///
    /// Unrelated TXT records at the same name (SPF and friends) do not
    /// affect the result; membership in the set is enough.
    pub async fn check_txt(&self, record: &str, expected: &str) -> Result<TxtRecordCheck> {
        let found = self.resolver.lookup_txt(record).await?;
        let verified = found.iter().any(|value| value == expected);

        info!(
            "TXT check for {}: {} ({} values found)",
            record,
            if verified { "match" } else { "no match" },
            found.len()
        );

        Ok(TxtRecordCheck {
            record: record.to_string(),
            expected: expected.to_string(),
            found,
            verified,
        })
    }

    /// Run every (record, expected) pair and combine the results
    pub async fn verify_all(&self, pairs: &[(String, String)]) -> Result<DnsVerification> {
        let mut checks = Vec::with_capacity(pairs.len());
        for (record, expected) in pairs {
            checks.push(self.check_txt(record, expected).await?);
        }
        Ok(DnsVerification::new(checks))
    }
}
