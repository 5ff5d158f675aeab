//! ACME (Let's Encrypt) client for dns-01 issuance
//!
//! Orders are held in memory between challenge creation and
//! submission; a restart loses them and the operator requests a fresh
//! challenge. Account credentials persist under the storage directory
//! so the service keeps one ACME account across restarts.

use crate::acme::authority::{AcmeAuthority, DnsChallenge, IssuedCertificate};
use crate::config::AcmeConfig;
use crate::error::{ProvisionError, Result, TossmailError};
use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{Certificate, CertificateParams, DistinguishedName};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Orders older than this are refused at submission
const CHALLENGE_TTL: Duration = Duration::from_secs(60 * 60);

/// Poll delay doubles up to this cap
const MAX_POLL_DELAY: Duration = Duration::from_secs(8);

struct PendingOrder {
    order: Order,
    challenge_url: String,
    expected_value: String,
    /// set_challenge_ready already sent, do not repeat it
    submitted: bool,
    /// Private key once the order was finalized
    key_pem: Option<String>,
    created_at: Instant,
}

pub struct AcmeClient {
    directory_url: String,
    contact_email: String,
    storage_dir: PathBuf,
    poll_attempts: u32,
    poll_initial_delay: Duration,
    account: Mutex<Option<Account>>,
    pending: Mutex<HashMap<String, PendingOrder>>,
}

impl AcmeClient {
    pub fn new(
        directory_url: String,
        contact_email: String,
        storage_dir: PathBuf,
        poll_attempts: u32,
        poll_initial_delay: Duration,
    ) -> Self {
        Self {
            directory_url,
            contact_email,
            storage_dir,
            poll_attempts,
            poll_initial_delay,
            account: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AcmeConfig) -> Self {
        Self::new(
            config.directory_url.clone(),
            config.contact_email.clone(),
            PathBuf::from(&config.storage_dir),
            config.poll_attempts,
            Duration::from_millis(config.poll_initial_delay_ms),
        )
    }

    /// Create for Let's Encrypt production
    pub fn lets_encrypt_production(email: String, storage_dir: PathBuf) -> Self {
        Self::new(
            "https://acme-v02.api.letsencrypt.org/directory".to_string(),
            email,
            storage_dir,
            10,
            Duration::from_millis(500),
        )
    }

    /// Create for Let's Encrypt staging (testing)
    pub fn lets_encrypt_staging(email: String, storage_dir: PathBuf) -> Self {
        Self::new(
            "https://acme-staging-v02.api.letsencrypt.org/directory".to_string(),
            email,
            storage_dir,
            10,
            Duration::from_millis(500),
        )
    }

    /// Load or register the ACME account, caching it for the process
    async fn account(&self) -> Result<Account> {
        let mut guard = self.account.lock().await;
        if let Some(account) = guard.as_ref() {
            return Ok(account.clone());
        }

        let credentials_path = self.storage_dir.join("account.json");

        let account = if credentials_path.exists() {
            let data = tokio::fs::read(&credentials_path).await?;
            let credentials: AccountCredentials = serde_json::from_slice(&data)?;
            Account::from_credentials(credentials).await.map_err(|e| {
                ProvisionError::Internal(format!("failed to load ACME account: {}", e))
            })?
        } else {
            let contact = format!("mailto:{}", self.contact_email);
            let (account, credentials) = Account::create(
                &NewAccount {
                    contact: &[contact.as_str()],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                &self.directory_url,
                None,
            )
            .await
            .map_err(|e| {
                ProvisionError::Internal(format!("failed to register ACME account: {}", e))
            })?;

            tokio::fs::create_dir_all(&self.storage_dir).await?;
            tokio::fs::write(&credentials_path, serde_json::to_vec_pretty(&credentials)?).await?;
            info!("ACME account registered with {}", self.directory_url);
            account
        };

        *guard = Some(account.clone());
        Ok(account)
    }

    /// Whether the pending order survives this failure for another try
    fn order_is_reusable(err: &TossmailError) -> bool {
        !matches!(
            err,
            TossmailError::Provision(ProvisionError::AcmeValidationFailed { .. })
                | TossmailError::Provision(ProvisionError::AcmeChallengeExpired { .. })
        )
    }

    async fn drive_order(&self, domain: &str, entry: &mut PendingOrder) -> Result<IssuedCertificate> {
        if !entry.submitted {
            entry
                .order
                .set_challenge_ready(&entry.challenge_url)
                .await
                .map_err(|e| ProvisionError::AcmeChallengeFailed {
                    detail: format!("failed to submit challenge for {}: {}", domain, e),
                })?;
            entry.submitted = true;
        }

        // Poll until the authority settles the order
        let mut delay = self.poll_initial_delay;
        let mut attempts = 0u32;
        let status = loop {
            tokio::time::sleep(delay).await;

            let state = entry.order.refresh().await.map_err(|e| {
                ProvisionError::AcmeChallengeFailed {
                    detail: format!("failed to poll order for {}: {}", domain, e),
                }
            })?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid | OrderStatus::Invalid => {
                    break state.status;
                }
                _ => {}
            }

            attempts += 1;
            if attempts >= self.poll_attempts {
                return Err(ProvisionError::AcmeChallengeFailed {
                    detail: format!(
                        "order for {} still processing after {} polls, submit again to keep waiting",
                        domain, attempts
                    ),
                }
                .into());
            }
            delay = std::cmp::min(delay * 2, MAX_POLL_DELAY);
        };

        if status == OrderStatus::Invalid {
            return Err(ProvisionError::AcmeValidationFailed {
                detail: format!("authority rejected the dns-01 challenge for {}", domain),
                expected: Some(entry.expected_value.clone()),
                found: Vec::new(),
            }
            .into());
        }

        // Finalize with a fresh key unless a previous pass already did
        if entry.key_pem.is_none() {
            let mut params = CertificateParams::new(vec![domain.to_string()]);
            params.distinguished_name = DistinguishedName::new();
            let cert = Certificate::from_params(params).map_err(|e| {
                ProvisionError::Internal(format!("failed to generate key pair: {}", e))
            })?;
            let csr = cert.serialize_request_der().map_err(|e| {
                ProvisionError::Internal(format!("failed to build CSR: {}", e))
            })?;

            entry.order.finalize(&csr).await.map_err(|e| {
                ProvisionError::AcmeChallengeFailed {
                    detail: format!("failed to finalize order for {}: {}", domain, e),
                }
            })?;
            entry.key_pem = Some(cert.serialize_private_key_pem());
        }

        // The signed chain can lag finalization briefly
        let mut waits = 0u32;
        let cert_pem = loop {
            let maybe_cert = entry.order.certificate().await.map_err(|e| {
                ProvisionError::AcmeChallengeFailed {
                    detail: format!("failed to download certificate for {}: {}", domain, e),
                }
            })?;

            match maybe_cert {
                Some(pem) => break pem,
                None => {
                    waits += 1;
                    if waits >= self.poll_attempts {
                        return Err(ProvisionError::AcmeChallengeFailed {
                            detail: format!(
                                "certificate for {} not ready after {} polls",
                                domain, waits
                            ),
                        }
                        .into());
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        let key_pem = entry.key_pem.clone().ok_or_else(|| {
            ProvisionError::Internal(format!("no private key recorded for {}", domain))
        })?;

        info!("Certificate issued for {}", domain);

        Ok(IssuedCertificate { cert_pem, key_pem })
    }
}

#[async_trait]
impl AcmeAuthority for AcmeClient {
    async fn request_dns_challenge(&self, domain: &str) -> Result<DnsChallenge> {
        let account = self.account().await?;

        let identifiers = vec![Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| ProvisionError::AcmeChallengeFailed {
                detail: format!("failed to create order for {}: {}", domain, e),
            })?;

        let authorizations =
            order
                .authorizations()
                .await
                .map_err(|e| ProvisionError::AcmeChallengeFailed {
                    detail: format!("failed to fetch authorizations for {}: {}", domain, e),
                })?;

        let authz = authorizations
            .iter()
            .find(|a| {
                matches!(
                    a.status,
                    AuthorizationStatus::Pending | AuthorizationStatus::Valid
                )
            })
            .ok_or_else(|| ProvisionError::AcmeChallengeFailed {
                detail: format!("no usable authorization for {}", domain),
            })?;

        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Dns01)
            .ok_or_else(|| ProvisionError::AcmeChallengeFailed {
                detail: format!("authority offered no dns-01 challenge for {}", domain),
            })?;

        let expected_value = order.key_authorization(challenge).dns_value();
        let token = challenge.token.clone();
        let challenge_url = challenge.url.clone();

        // One outstanding order per domain; a new request replaces it
        let mut pending = self.pending.lock().await;
        if pending
            .insert(
                domain.to_string(),
                PendingOrder {
                    order,
                    challenge_url,
                    expected_value: expected_value.clone(),
                    submitted: false,
                    key_pem: None,
                    created_at: Instant::now(),
                },
            )
            .is_some()
        {
            warn!("Replacing outstanding ACME order for {}", domain);
        }

        info!("ACME dns-01 challenge created for {}", domain);

        Ok(DnsChallenge {
            token,
            txt_record_name: format!("_acme-challenge.{}", domain),
            expected_value,
        })
    }

    async fn complete_dns_challenge(&self, domain: &str) -> Result<IssuedCertificate> {
        let mut entry = {
            let mut pending = self.pending.lock().await;
            pending
                .remove(domain)
                .ok_or_else(|| ProvisionError::NoChallengeFound {
                    domain: domain.to_string(),
                })?
        };

        if entry.created_at.elapsed() > CHALLENGE_TTL {
            return Err(ProvisionError::AcmeChallengeExpired {
                detail: format!(
                    "challenge for {} is older than {} minutes",
                    domain,
                    CHALLENGE_TTL.as_secs() / 60
                ),
            }
            .into());
        }

        match self.drive_order(domain, &mut entry).await {
            Ok(issued) => Ok(issued),
            Err(e) => {
                if Self::order_is_reusable(&e) {
                    self.pending.lock().await.insert(domain.to_string(), entry);
                }
                Err(e)
            }
        }
    }
}
