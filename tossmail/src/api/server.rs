use crate::api::handlers::{self, AppState};
use crate::api::ws;
use crate::config::Config;
use crate::error::Result;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: Config,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route(
                "/api/domains",
                post(handlers::create_domain).get(handlers::list_domains),
            )
            .route(
                "/api/domains/:id",
                get(handlers::get_domain).delete(handlers::delete_domain),
            )
            .route("/api/domains/:id/dns-guide", get(handlers::dns_guide))
            .route("/api/domains/:id/verify-dns", post(handlers::verify_dns))
            .route(
                "/api/domains/:id/acme/challenge",
                post(handlers::request_acme_challenge),
            )
            .route(
                "/api/domains/:id/acme/verify-dns",
                post(handlers::verify_acme_dns),
            )
            .route(
                "/api/domains/:id/acme/submit",
                post(handlers::submit_acme_challenge),
            )
            .route(
                "/api/domains/:id/certificate",
                post(handlers::generate_certificate),
            )
            .route("/api/domains/:id/activate", post(handlers::activate_domain))
            .route("/api/domains/:id/retry", post(handlers::retry_domain))
            .route(
                "/api/domains/:id/status",
                put(handlers::update_domain_status),
            )
            .route(
                "/api/domains/:id/challenge",
                post(handlers::generate_legacy_challenge),
            )
            .route(
                "/api/mailboxes",
                post(handlers::create_mailbox).get(handlers::list_mailboxes),
            )
            .route("/api/mailboxes/:id", get(handlers::get_mailbox))
            .route(
                "/api/mailboxes/:id/messages",
                get(handlers::list_mailbox_messages),
            )
            .route(
                "/api/messages/:id",
                get(handlers::get_message).delete(handlers::delete_message),
            )
            .route("/api/messages/:id/read", post(handlers::mark_message_read))
            .route(
                "/api/messages/:id/attachments",
                get(handlers::list_message_attachments),
            )
            .route(
                "/api/attachments/:id/download",
                get(handlers::download_attachment),
            )
            .route("/ws", get(ws::ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.http.listen_addr).await?;
        info!("HTTP API listening on {}", self.config.http.listen_addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
