use crate::config::Config;
use crate::error::Result;
use crate::smtp::session::{SmtpContext, SmtpSession};
use crate::tls::CertificateStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

pub struct SmtpServer {
    config: Config,
    ctx: SmtpContext,
    tls: Option<TlsAcceptor>,
}

impl SmtpServer {
    /// Certificates resolve per-SNI at handshake time, so newly issued
    /// certificates become visible without restarting the listener.
    pub fn new(config: Config, ctx: SmtpContext, certs: Arc<CertificateStore>) -> Self {
        let tls = if config.smtp.enable_starttls {
            let tls_config = ServerConfig::builder()
                .with_safe_defaults()
                .with_no_client_auth()
                .with_cert_resolver(certs);
            Some(TlsAcceptor::from(Arc::new(tls_config)))
        } else {
            None
        };

        Self { config, ctx, tls }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.smtp.listen_addr).await?;
        info!("SMTP server listening on {}", self.config.smtp.listen_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let session = SmtpSession::new(
                        self.config.server.hostname.clone(),
                        self.ctx.clone(),
                        self.config.smtp.clone(),
                        self.config.server.auto_provision,
                        self.tls.clone(),
                    );

                    tokio::spawn(async move {
                        if let Err(e) = session.handle(socket).await {
                            error!("Session error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
