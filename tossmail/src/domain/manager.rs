//! Provisioning orchestration
//!
//! Drives a domain from creation through DNS ownership verification,
//! ACME dns-01 issuance and activation. Every status change goes
//! through the store's guarded transitions, so two operators (or a
//! retry racing a slow submit) cannot push one domain into an
//! impossible state. Failures are persisted on the row itself, which
//! is what the retry flow reads after a restart.

use crate::acme::CertificateManager;
use crate::dns::{DnsVerification, DnsVerifier, TxtRecordCheck};
use crate::domain::store::DomainStore;
use crate::domain::types::{DnsGuide, DnsRecord, Domain, DomainStatus};
use crate::error::{ProvisionError, Result, TossmailError};
use crate::tls::StoredCertificate;
use crate::utils::validate_domain_name;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

/// Result of a VerifyDNS call.
///
/// `checked` is false when the domain had no ownership challenge yet;
/// in that case one was generated and the operator has to publish the
/// records in `guide` before verifying again.
#[derive(Debug, Clone, Serialize)]
pub struct DnsVerifyOutcome {
    pub checked: bool,
    pub all_verified: bool,
    pub checks: Vec<TxtRecordCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide: Option<DnsGuide>,
    pub domain: Domain,
}

pub struct DomainManager {
    domains: DomainStore,
    verifier: DnsVerifier,
    certs: CertificateManager,
    /// Service hostname, published as the MX target
    hostname: String,
}

impl DomainManager {
    pub fn new(
        domains: DomainStore,
        verifier: DnsVerifier,
        certs: CertificateManager,
        hostname: String,
    ) -> Self {
        Self {
            domains,
            verifier,
            certs,
            hostname,
        }
    }

    pub fn domain_store(&self) -> &DomainStore {
        &self.domains
    }

    /// Register a domain and hand out its ownership challenge
    pub async fn create_domain(&self, name: &str) -> Result<Domain> {
        let name = name.trim().to_lowercase();
        validate_domain_name(&name)?;

        let challenge = generate_challenge_token();
        let domain = self.domains.create(&name, &challenge).await?;

        info!("Domain {} created, awaiting DNS setup", domain.name);
        Ok(domain)
    }

    /// The records the operator has to publish for the domain's
    /// current provisioning step
    pub async fn dns_guide(&self, id: i64) -> Result<DnsGuide> {
        let domain = self.domains.get(id).await?;
        Ok(self.build_guide(&domain))
    }

    fn build_guide(&self, domain: &Domain) -> DnsGuide {
        let mut records = Vec::new();

        if !domain.dns_challenge.is_empty() {
            records.push(DnsRecord {
                record_type: "TXT".to_string(),
                name: domain.name.clone(),
                value: domain.dns_challenge.clone(),
                purpose: "Proves you control this domain".to_string(),
            });
        }

        records.push(DnsRecord {
            record_type: "MX".to_string(),
            name: domain.name.clone(),
            value: format!("10 {}", self.hostname),
            purpose: "Routes inbound mail to this service".to_string(),
        });

        if !domain.acme_challenge_value.is_empty() {
            records.push(DnsRecord {
                record_type: "TXT".to_string(),
                name: domain.acme_record_name(),
                value: domain.acme_challenge_value.clone(),
                purpose: "Completes the pending certificate challenge".to_string(),
            });
        }

        DnsGuide {
            domain: domain.name.clone(),
            records,
        }
    }

    /// Check the published TXT records against what the domain expects.
    ///
    /// Safe to call repeatedly: a passing check advances pending or
    /// failed domains to dns_verified and leaves any later status
    /// alone, so re-verifying an already verified domain just returns
    /// the same result. Domains imported without an ownership
    /// challenge get one generated here instead of a hard failure.
    pub async fn verify_dns(&self, id: i64) -> Result<DnsVerifyOutcome> {
        let domain = self.domains.get(id).await?;

        if domain.dns_challenge.is_empty() {
            let challenge = generate_challenge_token();
            self.domains.set_dns_challenge(id, &challenge).await?;
            let refreshed = self.domains.get(id).await?;

            info!(
                "Domain {} had no DNS challenge; generated one for first-time setup",
                refreshed.name
            );
            return Ok(DnsVerifyOutcome {
                checked: false,
                all_verified: false,
                checks: Vec::new(),
                message: Some(
                    "DNS challenge generated. Publish the listed records, then verify again."
                        .to_string(),
                ),
                guide: Some(self.build_guide(&refreshed)),
                domain: refreshed,
            });
        }

        let mut pairs = vec![(domain.name.clone(), domain.dns_challenge.clone())];
        if !domain.acme_challenge_value.is_empty() {
            pairs.push((domain.acme_record_name(), domain.acme_challenge_value.clone()));
        }

        let verification = self.verifier.verify_all(&pairs).await?;

        if verification.all_verified {
            let moved = self
                .domains
                .transition_status(
                    id,
                    &[
                        DomainStatus::PendingDns,
                        DomainStatus::Failed,
                        DomainStatus::LegacyActive,
                    ],
                    DomainStatus::DnsVerified,
                )
                .await?;
            if moved {
                info!("Domain {} passed DNS verification", domain.name);
            }
        } else {
            self.domains
                .set_error_message(id, &describe_dns_failure(&verification))
                .await?;
        }

        let refreshed = self.domains.get(id).await?;
        Ok(DnsVerifyOutcome {
            checked: true,
            all_verified: verification.all_verified,
            checks: verification.checks,
            message: None,
            guide: None,
            domain: refreshed,
        })
    }

    /// Open an ACME order and store its dns-01 challenge on the row
    pub async fn request_acme_challenge(&self, id: i64) -> Result<Domain> {
        let domain = self.domains.get(id).await?;
        if domain.status != DomainStatus::DnsVerified {
            return Err(invalid_status("request an ACME challenge", &domain));
        }

        let challenge = match self.certs.request_challenge(&domain.name).await {
            Ok(challenge) => challenge,
            Err(e) => {
                self.domains.set_failed(id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let moved = self
            .domains
            .begin_acme_challenge(id, &challenge.token, &challenge.expected_value)
            .await?;
        if !moved {
            let fresh = self.domains.get(id).await?;
            return Err(invalid_status("request an ACME challenge", &fresh));
        }

        info!(
            "ACME challenge for {} ready; publish TXT {} = {}",
            domain.name, challenge.txt_record_name, challenge.expected_value
        );
        self.domains.get(id).await
    }

    /// Check whether the pending ACME TXT record is visible yet.
    ///
    /// Purely a preflight; the status never changes here.
    pub async fn verify_acme_dns(&self, id: i64) -> Result<TxtRecordCheck> {
        let domain = self.domains.get(id).await?;
        if domain.status != DomainStatus::AcmeChallengeReady {
            return Err(invalid_status("verify the ACME challenge record", &domain));
        }
        if domain.acme_challenge_value.is_empty() {
            return Err(ProvisionError::NoChallengeFound {
                domain: domain.name,
            }
            .into());
        }

        self.verifier
            .check_txt(&domain.acme_record_name(), &domain.acme_challenge_value)
            .await
    }

    /// Ask the authority to validate the published challenge and issue
    /// the certificate.
    ///
    /// The domain sits in pending_certificate while the order is in
    /// flight; failure lands it in failed with the diagnostic attached.
    pub async fn submit_acme_challenge(&self, id: i64) -> Result<StoredCertificate> {
        let domain = self.domains.get(id).await?;
        if domain.acme_challenge_value.is_empty() {
            return Err(ProvisionError::NoChallengeFound {
                domain: domain.name,
            }
            .into());
        }

        let moved = self
            .domains
            .transition_status(
                id,
                &[DomainStatus::AcmeChallengeReady],
                DomainStatus::PendingCertificate,
            )
            .await?;
        if !moved {
            let fresh = self.domains.get(id).await?;
            return Err(invalid_status("submit the ACME challenge", &fresh));
        }

        self.issue_and_record(&domain).await
    }

    /// Single-step issuance kept for pre-challenge-flow clients:
    /// request (or reuse) a challenge and drive the order to
    /// completion in one call.
    ///
    /// Succeeds without operator interaction when the authority still
    /// holds a valid authorization or the TXT record from a previous
    /// attempt is still published; otherwise fails with the expected
    /// record value so the operator can publish it and retry.
    pub async fn generate_certificate(&self, id: i64) -> Result<StoredCertificate> {
        let domain = self.domains.get(id).await?;
        match domain.status {
            DomainStatus::DnsVerified | DomainStatus::CertificateIssued => {}
            _ => return Err(invalid_status("generate a certificate", &domain)),
        }

        let challenge = match self.certs.request_challenge(&domain.name).await {
            Ok(challenge) => challenge,
            Err(e) => {
                self.domains.set_failed(id, &e.to_string()).await?;
                return Err(e);
            }
        };
        self.domains
            .set_acme_challenge(id, &challenge.token, &challenge.expected_value)
            .await?;

        let moved = self
            .domains
            .transition_status(
                id,
                &[DomainStatus::DnsVerified, DomainStatus::CertificateIssued],
                DomainStatus::PendingCertificate,
            )
            .await?;
        if !moved {
            let fresh = self.domains.get(id).await?;
            return Err(invalid_status("generate a certificate", &fresh));
        }

        let domain = self.domains.get(id).await?;
        self.issue_and_record(&domain).await
    }

    /// Shared tail of both issuance paths; expects the domain to be in
    /// pending_certificate already
    async fn issue_and_record(&self, domain: &Domain) -> Result<StoredCertificate> {
        match self.certs.issue_certificate(domain.id, &domain.name).await {
            Ok(stored) => {
                let finished = self.domains.finish_certificate(domain.id).await?;
                if !finished {
                    warn!(
                        "Domain {} left pending_certificate while its order was in flight",
                        domain.name
                    );
                }
                info!("Certificate issued for {}", domain.name);
                Ok(stored)
            }
            Err(e) => {
                let enriched = self.enrich_validation_failure(domain, e).await;
                self.domains
                    .set_failed(domain.id, &enriched.to_string())
                    .await?;
                Err(enriched)
            }
        }
    }

    /// Attach the TXT values actually published to a bare validation
    /// failure, so the operator sees expected vs. found
    async fn enrich_validation_failure(
        &self,
        domain: &Domain,
        err: TossmailError,
    ) -> TossmailError {
        if let TossmailError::Provision(ProvisionError::AcmeValidationFailed {
            detail,
            expected,
            found,
        }) = &err
        {
            if found.is_empty() {
                let expected_value = expected
                    .clone()
                    .unwrap_or_else(|| domain.acme_challenge_value.clone());
                if let Ok(check) = self
                    .verifier
                    .check_txt(&domain.acme_record_name(), &expected_value)
                    .await
                {
                    return ProvisionError::AcmeValidationFailed {
                        detail: detail.clone(),
                        expected: Some(expected_value),
                        found: check.found,
                    }
                    .into();
                }
            }
        }
        err
    }

    /// Open the domain for mail once its certificate is in place
    pub async fn activate_domain(&self, id: i64) -> Result<Domain> {
        let moved = self.domains.activate(id).await?;
        if !moved {
            let domain = self.domains.get(id).await?;
            return Err(invalid_status("activate", &domain));
        }

        let domain = self.domains.get(id).await?;
        info!("Domain {} is now active and receiving mail", domain.name);
        Ok(domain)
    }

    /// Operator override for stuck rows; use the provisioning
    /// operations for normal flow
    pub async fn update_status(
        &self,
        id: i64,
        status: DomainStatus,
        error_message: &str,
    ) -> Result<Domain> {
        self.domains.set_status(id, status, error_message).await?;
        let domain = self.domains.get(id).await?;
        info!(
            "Domain {} status forced to '{}' by operator",
            domain.name,
            status.as_str()
        );
        Ok(domain)
    }

    /// Reset a failed domain so provisioning can resume.
    ///
    /// Without an explicit target the step to redo is inferred from
    /// the stored error text: certificate-stage wording keeps the DNS
    /// verification, anything else starts over.
    pub async fn retry(&self, id: i64, target: Option<DomainStatus>) -> Result<Domain> {
        let domain = self.domains.get(id).await?;
        if domain.status != DomainStatus::Failed {
            return Err(invalid_status("retry", &domain));
        }

        let target = match target {
            Some(DomainStatus::PendingDns) => DomainStatus::PendingDns,
            Some(DomainStatus::DnsVerified) => DomainStatus::DnsVerified,
            Some(other) => {
                return Err(TossmailError::InvalidInput(format!(
                    "Retry target must be pending_dns or dns_verified, got '{}'",
                    other.as_str()
                )))
            }
            None => infer_retry_target(&domain.error_message),
        };

        let moved = self
            .domains
            .transition_status(id, &[DomainStatus::Failed], target)
            .await?;
        if !moved {
            let fresh = self.domains.get(id).await?;
            return Err(invalid_status("retry", &fresh));
        }

        info!(
            "Domain {} reset to {} for retry (was: {})",
            domain.name,
            target.as_str(),
            domain.error_message
        );
        self.domains.get(id).await
    }

    /// Give a pre-provisioning domain an ownership challenge so it can
    /// enter the verification flow. Harmless on domains that already
    /// have one.
    pub async fn generate_challenge_for_legacy_domain(&self, id: i64) -> Result<Domain> {
        let domain = self.domains.get(id).await?;
        if !domain.dns_challenge.is_empty() {
            return Ok(domain);
        }

        let challenge = generate_challenge_token();
        self.domains.set_dns_challenge(id, &challenge).await?;

        info!("Generated DNS challenge for legacy domain {}", domain.name);
        self.domains.get(id).await
    }
}

fn invalid_status(operation: &str, domain: &Domain) -> TossmailError {
    ProvisionError::InvalidStatus {
        operation: operation.to_string(),
        status: domain.status.as_str().to_string(),
    }
    .into()
}

fn generate_challenge_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn describe_dns_failure(verification: &DnsVerification) -> String {
    let failed: Vec<&str> = verification
        .checks
        .iter()
        .filter(|c| !c.verified)
        .map(|c| c.record.as_str())
        .collect();
    format!("DNS TXT verification failed for: {}", failed.join(", "))
}

/// Best-effort routing for retries without an explicit target.
///
/// Certificate-stage failures keep their DNS verification and resume
/// at dns_verified; everything else redoes the DNS step.
fn infer_retry_target(error_message: &str) -> DomainStatus {
    let lower = error_message.to_lowercase();
    if lower.contains("acme") || lower.contains("certificate") || lower.contains("_acme-challenge")
    {
        DomainStatus::DnsVerified
    } else {
        DomainStatus::PendingDns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeAuthority, DnsChallenge, IssuedCertificate};
    use crate::dns::TxtResolver;
    use crate::tls::CertificateStore;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory zone the tests publish records into
    #[derive(Clone, Default)]
    struct MockResolver {
        zone: Arc<Mutex<HashMap<String, Vec<String>>>>,
    }

    impl MockResolver {
        fn publish(&self, name: &str, value: &str) {
            self.zone
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    #[async_trait]
    impl TxtResolver for MockResolver {
        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
            Ok(self
                .zone
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct MockAuthority {
        fail_completion: bool,
    }

    #[async_trait]
    impl AcmeAuthority for MockAuthority {
        async fn request_dns_challenge(&self, domain: &str) -> Result<DnsChallenge> {
            Ok(DnsChallenge {
                token: format!("token-{}", domain),
                txt_record_name: format!("_acme-challenge.{}", domain),
                expected_value: format!("value-{}", domain),
            })
        }

        async fn complete_dns_challenge(&self, domain: &str) -> Result<IssuedCertificate> {
            if self.fail_completion {
                return Err(ProvisionError::AcmeValidationFailed {
                    detail: "authority saw no matching record".to_string(),
                    expected: Some(format!("value-{}", domain)),
                    found: vec![],
                }
                .into());
            }

            let cert = rcgen::generate_simple_self_signed(vec![domain.to_string()]).unwrap();
            Ok(IssuedCertificate {
                cert_pem: cert.serialize_pem().unwrap(),
                key_pem: cert.serialize_private_key_pem(),
            })
        }
    }

    struct Setup {
        manager: DomainManager,
        resolver: MockResolver,
        cert_store: Arc<CertificateStore>,
    }

    async fn setup(fail_completion: bool) -> Setup {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let domains = DomainStore::new(pool.clone());
        domains.init_db().await.unwrap();

        let cert_store = Arc::new(CertificateStore::new(pool));
        cert_store.init_db().await.unwrap();

        let resolver = MockResolver::default();
        let verifier = DnsVerifier::new(Arc::new(resolver.clone()));
        let certs = CertificateManager::new(
            Arc::new(MockAuthority { fail_completion }),
            cert_store.clone(),
        );

        Setup {
            manager: DomainManager::new(
                domains,
                verifier,
                certs,
                "mx.test.local".to_string(),
            ),
            resolver,
            cert_store,
        }
    }

    /// Publish the ownership record and verify, landing in dns_verified
    async fn verified_domain(setup: &Setup, name: &str) -> Domain {
        let domain = setup.manager.create_domain(name).await.unwrap();
        setup.resolver.publish(&domain.name, &domain.dns_challenge);
        let outcome = setup.manager.verify_dns(domain.id).await.unwrap();
        assert!(outcome.all_verified);
        outcome.domain
    }

    #[test]
    fn test_infer_retry_target() {
        assert_eq!(
            infer_retry_target("ACME validation failed: timeout"),
            DomainStatus::DnsVerified
        );
        assert_eq!(
            infer_retry_target("could not issue certificate"),
            DomainStatus::DnsVerified
        );
        assert_eq!(
            infer_retry_target("TXT _acme-challenge.example.com missing"),
            DomainStatus::DnsVerified
        );
        assert_eq!(
            infer_retry_target("DNS TXT verification failed for: example.com"),
            DomainStatus::PendingDns
        );
        assert_eq!(infer_retry_target(""), DomainStatus::PendingDns);
    }

    #[tokio::test]
    async fn test_create_domain() {
        let setup = setup(false).await;

        let domain = setup.manager.create_domain("  Example.COM ").await.unwrap();
        assert_eq!(domain.name, "example.com");
        assert_eq!(domain.status, DomainStatus::PendingDns);
        assert_eq!(domain.dns_challenge.len(), 32);
        assert!(!domain.is_active);

        let err = setup.manager.create_domain("example.com").await.unwrap_err();
        assert!(matches!(err, TossmailError::Duplicate(_)));

        assert!(setup.manager.create_domain("not-a-domain").await.is_err());
    }

    #[tokio::test]
    async fn test_dns_guide_lists_required_records() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();

        let guide = setup.manager.dns_guide(domain.id).await.unwrap();
        assert_eq!(guide.domain, "example.com");

        let types: Vec<&str> = guide.records.iter().map(|r| r.record_type.as_str()).collect();
        assert_eq!(types, vec!["TXT", "MX"]);
        assert_eq!(guide.records[0].value, domain.dns_challenge);
        assert!(guide.records[1].value.ends_with("mx.test.local"));
    }

    #[tokio::test]
    async fn test_verify_dns_mismatch_keeps_status() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();
        setup.resolver.publish("example.com", "some-other-value");

        let outcome = setup.manager.verify_dns(domain.id).await.unwrap();
        assert!(outcome.checked);
        assert!(!outcome.all_verified);
        assert_eq!(outcome.checks.len(), 1);
        assert_eq!(outcome.checks[0].found, vec!["some-other-value"]);

        // Status untouched, error recorded
        assert_eq!(outcome.domain.status, DomainStatus::PendingDns);
        assert!(outcome.domain.error_message.contains("example.com"));
    }

    #[tokio::test]
    async fn test_verify_dns_advances_and_is_idempotent() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();
        setup.resolver.publish("example.com", &domain.dns_challenge);
        // Unrelated records at the apex do not interfere
        setup.resolver.publish("example.com", "v=spf1 -all");

        let first = setup.manager.verify_dns(domain.id).await.unwrap();
        assert!(first.all_verified);
        assert_eq!(first.domain.status, DomainStatus::DnsVerified);

        let second = setup.manager.verify_dns(domain.id).await.unwrap();
        assert!(second.all_verified);
        assert_eq!(second.domain.status, DomainStatus::DnsVerified);
    }

    #[tokio::test]
    async fn test_verify_dns_generates_challenge_for_legacy_domain() {
        let setup = setup(false).await;
        let store = setup.manager.domain_store();
        let created = store.create("legacy.com", "").await.unwrap();
        store
            .set_status(created.id, DomainStatus::LegacyActive, "")
            .await
            .unwrap();

        let outcome = setup.manager.verify_dns(created.id).await.unwrap();
        assert!(!outcome.checked);
        assert!(!outcome.all_verified);
        assert!(!outcome.domain.dns_challenge.is_empty());
        assert!(outcome.guide.is_some());

        // Same call again after publishing completes the verification
        setup
            .resolver
            .publish("legacy.com", &outcome.domain.dns_challenge);
        let verified = setup.manager.verify_dns(created.id).await.unwrap();
        assert!(verified.checked);
        assert!(verified.all_verified);
        assert_eq!(verified.domain.status, DomainStatus::DnsVerified);
    }

    #[tokio::test]
    async fn test_request_acme_challenge_requires_dns_verified() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();

        let err = setup
            .manager
            .request_acme_challenge(domain.id)
            .await
            .unwrap_err();
        match err {
            TossmailError::Provision(ProvisionError::InvalidStatus { status, .. }) => {
                assert_eq!(status, "pending_dns")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // The rejected call must not have touched the row
        let unchanged = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(unchanged.status, DomainStatus::PendingDns);
    }

    #[tokio::test]
    async fn test_acme_challenge_flow() {
        let setup = setup(false).await;
        let domain = verified_domain(&setup, "example.com").await;

        let ready = setup
            .manager
            .request_acme_challenge(domain.id)
            .await
            .unwrap();
        assert_eq!(ready.status, DomainStatus::AcmeChallengeReady);
        assert_eq!(ready.acme_challenge_token, "token-example.com");
        assert_eq!(ready.acme_challenge_value, "value-example.com");

        // Record not published yet
        let check = setup.manager.verify_acme_dns(domain.id).await.unwrap();
        assert!(!check.verified);
        assert!(check.found.is_empty());

        setup
            .resolver
            .publish("_acme-challenge.example.com", "value-example.com");
        let check = setup.manager.verify_acme_dns(domain.id).await.unwrap();
        assert!(check.verified);

        // Preflights never move the status
        let fresh = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(fresh.status, DomainStatus::AcmeChallengeReady);
    }

    #[tokio::test]
    async fn test_submit_acme_challenge_issues_and_clears() {
        let setup = setup(false).await;
        let domain = verified_domain(&setup, "example.com").await;
        setup
            .manager
            .request_acme_challenge(domain.id)
            .await
            .unwrap();

        let stored = setup
            .manager
            .submit_acme_challenge(domain.id)
            .await
            .unwrap();
        assert_eq!(stored.domain, "example.com");

        let issued = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(issued.status, DomainStatus::CertificateIssued);
        assert!(issued.acme_challenge_token.is_empty());
        assert!(issued.acme_challenge_value.is_empty());

        // Loaded into the live TLS config as part of issuance
        assert!(setup.cert_store.lookup("example.com").is_some());
    }

    #[tokio::test]
    async fn test_submit_failure_lands_in_failed_with_diagnostics() {
        let setup = setup(true).await;
        let domain = verified_domain(&setup, "example.com").await;
        setup
            .manager
            .request_acme_challenge(domain.id)
            .await
            .unwrap();
        setup
            .resolver
            .publish("_acme-challenge.example.com", "stale-value");

        let err = setup
            .manager
            .submit_acme_challenge(domain.id)
            .await
            .unwrap_err();
        match err {
            TossmailError::Provision(ProvisionError::AcmeValidationFailed {
                expected, found, ..
            }) => {
                assert_eq!(expected.as_deref(), Some("value-example.com"));
                // Found values filled in from a live lookup
                assert_eq!(found, vec!["stale-value"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let failed = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(failed.status, DomainStatus::Failed);
        assert!(failed.error_message.to_lowercase().contains("acme"));

        // Keyword inference routes the retry past the DNS step
        let retried = setup.manager.retry(domain.id, None).await.unwrap();
        assert_eq!(retried.status, DomainStatus::DnsVerified);
        assert!(retried.error_message.is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_challenge() {
        let setup = setup(false).await;
        let domain = verified_domain(&setup, "example.com").await;

        let err = setup
            .manager
            .submit_acme_challenge(domain.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TossmailError::Provision(ProvisionError::NoChallengeFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_generate_certificate_single_step() {
        let setup = setup(false).await;
        let domain = verified_domain(&setup, "example.com").await;

        let stored = setup.manager.generate_certificate(domain.id).await.unwrap();
        assert_eq!(stored.domain, "example.com");

        let issued = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(issued.status, DomainStatus::CertificateIssued);

        // Renewal from certificate_issued runs the same path
        setup.manager.generate_certificate(domain.id).await.unwrap();
        let renewed = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(renewed.status, DomainStatus::CertificateIssued);
    }

    #[tokio::test]
    async fn test_activate_requires_issued_certificate() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();

        let err = setup.manager.activate_domain(domain.id).await.unwrap_err();
        assert!(matches!(
            err,
            TossmailError::Provision(ProvisionError::InvalidStatus { .. })
        ));
        let unchanged = setup.manager.domain_store().get(domain.id).await.unwrap();
        assert_eq!(unchanged.status, DomainStatus::PendingDns);
        assert!(!unchanged.is_active);
    }

    #[tokio::test]
    async fn test_full_provisioning_to_active() {
        let setup = setup(false).await;
        let domain = verified_domain(&setup, "example.com").await;
        setup
            .manager
            .request_acme_challenge(domain.id)
            .await
            .unwrap();
        setup
            .manager
            .submit_acme_challenge(domain.id)
            .await
            .unwrap();

        let active = setup.manager.activate_domain(domain.id).await.unwrap();
        assert_eq!(active.status, DomainStatus::Active);
        assert!(active.is_active);
        assert!(active.receives_mail());
    }

    #[tokio::test]
    async fn test_retry_explicit_target() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();
        setup
            .manager
            .domain_store()
            .set_failed(domain.id, "ACME validation failed")
            .await
            .unwrap();

        // Explicit target overrides the inference
        let retried = setup
            .manager
            .retry(domain.id, Some(DomainStatus::PendingDns))
            .await
            .unwrap();
        assert_eq!(retried.status, DomainStatus::PendingDns);

        // Only the two reset states are acceptable targets
        setup
            .manager
            .domain_store()
            .set_failed(domain.id, "boom")
            .await
            .unwrap();
        let err = setup
            .manager
            .retry(domain.id, Some(DomainStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, TossmailError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_retry_requires_failed_status() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();

        let err = setup.manager.retry(domain.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            TossmailError::Provision(ProvisionError::InvalidStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_override() {
        let setup = setup(false).await;
        let domain = setup.manager.create_domain("example.com").await.unwrap();

        let updated = setup
            .manager
            .update_status(domain.id, DomainStatus::Active, "")
            .await
            .unwrap();
        assert_eq!(updated.status, DomainStatus::Active);
        assert!(updated.is_active);

        let downgraded = setup
            .manager
            .update_status(domain.id, DomainStatus::PendingDns, "")
            .await
            .unwrap();
        assert!(!downgraded.is_active);
    }

    #[tokio::test]
    async fn test_generate_challenge_for_legacy_domain_idempotent() {
        let setup = setup(false).await;
        let store = setup.manager.domain_store();
        let created = store.create("legacy.com", "").await.unwrap();

        let first = setup
            .manager
            .generate_challenge_for_legacy_domain(created.id)
            .await
            .unwrap();
        assert_eq!(first.dns_challenge.len(), 32);

        let second = setup
            .manager
            .generate_challenge_for_legacy_domain(created.id)
            .await
            .unwrap();
        assert_eq!(second.dns_challenge, first.dns_challenge);

        // Domains created through the normal path keep their token too
        let normal = setup.manager.create_domain("example.com").await.unwrap();
        let kept = setup
            .manager
            .generate_challenge_for_legacy_domain(normal.id)
            .await
            .unwrap();
        assert_eq!(kept.dns_challenge, normal.dns_challenge);
    }
}
