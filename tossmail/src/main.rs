use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tossmail::acme::{AcmeClient, CertificateManager};
use tossmail::api::{ApiServer, AppState};
use tossmail::config::Config;
use tossmail::dns::{DnsVerifier, SystemTxtResolver};
use tossmail::domain::{DomainManager, DomainStore};
use tossmail::notify::BroadcastHub;
use tossmail::smtp::{SmtpContext, SmtpServer};
use tossmail::storage::{LocalFileStore, MailStore};
use tossmail::tls::CertificateStore;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so [logging] applies
    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };

    init_tracing(&config)?;

    info!("Starting tossmail");
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  HTTP listening on: {}", config.http.listen_addr);
    info!("  Hostname: {}", config.server.hostname);
    info!("  Database: {}", config.storage.database_url);

    // Storage
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.storage.database_url)
        .await?;

    let domains = DomainStore::new(pool.clone());
    domains.init_db().await?;
    let mail = MailStore::new(pool.clone());
    mail.init_db().await?;
    let certs = Arc::new(CertificateStore::new(pool));
    certs.init_db().await?;

    let files = Arc::new(LocalFileStore::new(config.storage.attachment_path.clone()));
    let hub = Arc::new(BroadcastHub::new(256));

    // TLS: preload issued certificates, self-signed fallback for the
    // service hostname so STARTTLS works before the first issuance
    match certs.reload_all().await {
        Ok(count) => info!("Loaded {} certificates for SNI", count),
        Err(e) => warn!("Certificate preload failed: {}", e),
    }
    if config.smtp.enable_starttls {
        certs.install_default_self_signed(&config.server.hostname)?;
    }

    // Provisioning
    let resolver = Arc::new(SystemTxtResolver::new(Duration::from_secs(
        config.dns.lookup_timeout_secs,
    )));
    let verifier = DnsVerifier::new(resolver);
    let authority = Arc::new(AcmeClient::from_config(&config.acme));
    let cert_manager = CertificateManager::new(authority, certs.clone());
    let domain_manager = Arc::new(DomainManager::new(
        domains.clone(),
        verifier,
        cert_manager,
        config.server.hostname.clone(),
    ));

    // SMTP server
    let ctx = SmtpContext {
        domains,
        mail: mail.clone(),
        files: files.clone(),
        hub: hub.clone(),
    };
    let smtp_server = SmtpServer::new(config.clone(), ctx, certs.clone());
    let smtp_handle = tokio::spawn(async move {
        info!("Starting SMTP server...");
        smtp_server.run().await
    });

    // HTTP API
    let state = Arc::new(AppState {
        domain_manager,
        mail,
        files,
        hub,
        certs,
    });
    let api_server = ApiServer::new(config, state);
    let api_handle = tokio::spawn(async move {
        info!("Starting HTTP API...");
        api_server.run().await
    });

    // Wait for either server to exit (or error)
    tokio::select! {
        result = smtp_handle => {
            match result {
                Ok(Ok(())) => info!("SMTP server exited"),
                Ok(Err(e)) => error!("SMTP server error: {}", e),
                Err(e) => error!("SMTP task panic: {}", e),
            }
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => info!("HTTP API exited"),
                Ok(Err(e)) => error!("HTTP API error: {}", e),
                Err(e) => error!("HTTP API task panic: {}", e),
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let level = config
        .logging
        .level
        .parse::<Level>()
        .unwrap_or(Level::INFO);

    if config.logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
