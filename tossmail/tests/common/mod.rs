//! Shared harness: a full in-process service on ephemeral ports with
//! the DNS and ACME seams replaced by controllable test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tossmail::acme::{AcmeAuthority, CertificateManager, DnsChallenge, IssuedCertificate};
use tossmail::api::{ApiServer, AppState};
use tossmail::config::Config;
use tossmail::dns::{DnsVerifier, TxtResolver};
use tossmail::domain::{DomainManager, DomainStatus, DomainStore};
use tossmail::error::{ProvisionError, Result, TossmailError};
use tossmail::notify::BroadcastHub;
use tossmail::smtp::{SmtpContext, SmtpServer};
use tossmail::storage::{LocalFileStore, MailStore};
use tossmail::tls::CertificateStore;

/// TXT zone the tests publish records into
#[derive(Default)]
pub struct MockTxtResolver {
    zone: Mutex<HashMap<String, Vec<String>>>,
}

impl MockTxtResolver {
    pub fn publish(&self, name: &str, value: &str) {
        self.zone
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn clear(&self, name: &str) {
        self.zone.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl TxtResolver for MockTxtResolver {
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

/// Authority that hands out deterministic challenges and self-signed
/// certificates; completion can be toggled to fail
pub struct MockAcmeAuthority {
    fail_completion: AtomicBool,
}

impl MockAcmeAuthority {
    pub fn new() -> Self {
        Self {
            fail_completion: AtomicBool::new(false),
        }
    }

    pub fn set_fail_completion(&self, fail: bool) {
        self.fail_completion.store(fail, Ordering::SeqCst);
    }

    pub fn challenge_value(domain: &str) -> String {
        format!("value-{}", domain)
    }
}

#[async_trait]
impl AcmeAuthority for MockAcmeAuthority {
    async fn request_dns_challenge(&self, domain: &str) -> Result<DnsChallenge> {
        Ok(DnsChallenge {
            token: format!("token-{}", domain),
            txt_record_name: format!("_acme-challenge.{}", domain),
            expected_value: Self::challenge_value(domain),
        })
    }

    async fn complete_dns_challenge(&self, domain: &str) -> Result<IssuedCertificate> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(ProvisionError::AcmeValidationFailed {
                detail: format!("certificate validation failed for {}", domain),
                expected: Some(Self::challenge_value(domain)),
                found: vec![],
            }
            .into());
        }

        let cert = rcgen::generate_simple_self_signed(vec![domain.to_string()])
            .map_err(|e| TossmailError::Tls(e.to_string()))?;
        Ok(IssuedCertificate {
            cert_pem: cert
                .serialize_pem()
                .map_err(|e| TossmailError::Tls(e.to_string()))?,
            key_pem: cert.serialize_private_key_pem(),
        })
    }
}

/// Full service running in-process: SMTP and HTTP on ephemeral ports,
/// all stores on one in-memory database
pub struct TestService {
    pub smtp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub hostname: String,
    pub resolver: Arc<MockTxtResolver>,
    pub authority: Arc<MockAcmeAuthority>,
    pub domains: DomainStore,
    pub mail: MailStore,
    pub hub: Arc<BroadcastHub>,
    pub certs: Arc<CertificateStore>,
    _attachments: TempDir,
}

impl TestService {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with test-specific configuration tweaks (limits, flags)
    pub async fn spawn_with(customize: impl FnOnce(&mut Config)) -> Self {
        // Memory databases exist per connection, so the pool must not
        // open a second one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect memory db");

        let domains = DomainStore::new(pool.clone());
        domains.init_db().await.expect("init domains");
        let mail = MailStore::new(pool.clone());
        mail.init_db().await.expect("init mail");
        let certs = Arc::new(CertificateStore::new(pool));
        certs.init_db().await.expect("init certs");

        let attachments = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(LocalFileStore::new(attachments.path()));
        let hub = Arc::new(BroadcastHub::new(64));

        let resolver = Arc::new(MockTxtResolver::default());
        let authority = Arc::new(MockAcmeAuthority::new());
        let cert_manager = CertificateManager::new(authority.clone(), certs.clone());

        let hostname = "mx.test.local".to_string();
        let verifier = DnsVerifier::new(resolver.clone());
        let domain_manager = Arc::new(DomainManager::new(
            domains.clone(),
            verifier,
            cert_manager,
            hostname.clone(),
        ));

        let mut config = Config::default();
        config.server.hostname = hostname.clone();
        config.server.auto_provision = true;
        config.smtp.enable_starttls = false;
        config.smtp.read_timeout_secs = 5;
        config.smtp.write_timeout_secs = 5;
        customize(&mut config);

        // SMTP on an ephemeral port
        let smtp_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind smtp");
        let smtp_addr = smtp_listener.local_addr().expect("smtp addr");
        let ctx = SmtpContext {
            domains: domains.clone(),
            mail: mail.clone(),
            files: files.clone(),
            hub: hub.clone(),
        };
        let smtp_server = SmtpServer::new(config.clone(), ctx, certs.clone());
        tokio::spawn(async move {
            let _ = smtp_server.serve(smtp_listener).await;
        });

        // HTTP API on an ephemeral port
        let http_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
        let http_addr = http_listener.local_addr().expect("http addr");
        let state = Arc::new(AppState {
            domain_manager,
            mail: mail.clone(),
            files,
            hub: hub.clone(),
            certs: certs.clone(),
        });
        let api_server = ApiServer::new(config, state);
        tokio::spawn(async move {
            let _ = api_server.serve(http_listener).await;
        });

        Self {
            smtp_addr,
            http_addr,
            hostname,
            resolver,
            authority,
            domains,
            mail,
            hub,
            certs,
            _attachments: attachments,
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }

    pub fn ws_url(&self, mailbox_id: i64) -> String {
        format!("ws://{}/ws?mailbox_id={}", self.http_addr, mailbox_id)
    }

    /// Shortcut for SMTP-focused tests: a domain that accepts mail,
    /// bypassing the provisioning pipeline
    pub async fn add_active_domain(&self, name: &str) -> i64 {
        let domain = self
            .domains
            .create(name, "ownership-token")
            .await
            .expect("create domain");
        self.domains
            .set_status(domain.id, DomainStatus::Active, "")
            .await
            .expect("activate domain");
        domain.id
    }

    /// Publish the TXT records a domain needs to pass ownership
    /// verification
    pub async fn publish_ownership_record(&self, domain_id: i64) {
        let domain = self.domains.get(domain_id).await.expect("get domain");
        self.resolver.publish(&domain.name, &domain.dns_challenge);
    }

    /// Publish the _acme-challenge record the mock authority expects
    pub async fn publish_acme_record(&self, domain_id: i64) {
        let domain = self.domains.get(domain_id).await.expect("get domain");
        self.resolver.publish(
            &domain.acme_record_name(),
            &MockAcmeAuthority::challenge_value(&domain.name),
        );
    }
}

/// Minimal SMTP client driving the server over a raw TCP stream
pub struct SmtpTestClient {
    stream: BufReader<TcpStream>,
}

impl SmtpTestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut client = Self {
            stream: BufReader::new(stream),
        };

        let greeting = client.read_response().await?;
        if !greeting.starts_with("220") {
            return Err(TossmailError::SmtpProtocol(format!(
                "Unexpected greeting: {}",
                greeting
            )));
        }

        Ok(client)
    }

    /// Send one command line and read the full reply
    pub async fn command(&mut self, line: &str) -> Result<String> {
        self.send_line(line).await?;
        self.read_response().await
    }

    pub async fn ehlo(&mut self, hostname: &str) -> Result<String> {
        self.command(&format!("EHLO {}", hostname)).await
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<String> {
        self.command(&format!("MAIL FROM:<{}>", from)).await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<String> {
        self.command(&format!("RCPT TO:<{}>", to)).await
    }

    /// Send DATA and the message content, return the final reply
    pub async fn data(&mut self, content: &str) -> Result<String> {
        let response = self.command("DATA").await?;
        if !response.starts_with("354") {
            return Err(TossmailError::SmtpProtocol(format!(
                "DATA command failed: {}",
                response
            )));
        }

        self.send_line(content).await?;
        self.command(".").await
    }

    pub async fn quit(mut self) -> Result<String> {
        self.command("QUIT").await
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let framed = format!("{}\r\n", line);
        self.stream.get_mut().write_all(framed.as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    /// Read a reply, following multi-line continuations ("250-...")
    async fn read_response(&mut self) -> Result<String> {
        let mut full_response = String::new();
        let mut line = String::new();

        loop {
            line.clear();
            let n = self.stream.read_line(&mut line).await?;
            if n == 0 {
                break;
            }

            full_response.push_str(&line);

            if line.len() >= 4 && line.chars().nth(3) == Some(' ') {
                break;
            }
        }

        Ok(full_response.trim().to_string())
    }

    /// Convenience: full transaction for a single recipient
    pub async fn send_email(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String> {
        self.ehlo("test-client").await?;
        self.mail_from(from).await?;
        let rcpt = self.rcpt_to(to).await?;
        if !rcpt.starts_with("250") {
            return Err(TossmailError::SmtpProtocol(format!(
                "Recipient rejected: {}",
                rcpt
            )));
        }

        let content = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            from, to, subject, body
        );
        self.data(&content).await
    }
}
