use crate::domain::{DnsGuide, DnsVerifyOutcome, Domain, DomainManager, DomainStatus};
use crate::error::{ProvisionError, TossmailError};
use crate::notify::BroadcastHub;
use crate::storage::{Attachment, FileStore, Mailbox, MailStore, Message};
use crate::tls::CertificateStore;
use crate::utils::split_address;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// Shared state for the operator API
pub struct AppState {
    pub domain_manager: Arc<DomainManager>,
    pub mail: MailStore,
    pub files: Arc<dyn FileStore>,
    pub hub: Arc<BroadcastHub>,
    pub certs: Arc<CertificateStore>,
}

/// API error envelope.
///
/// Every failure carries a stable `code` and a remediation hint;
/// DNS and ACME comparison failures additionally carry the expected
/// and observed TXT values so the operator UI can show a diff.
pub struct ApiFailure {
    status: StatusCode,
    body: FailureBody,
}

#[derive(Debug, Serialize)]
struct FailureBody {
    code: String,
    message: String,
    suggested_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    found_values: Option<Vec<String>>,
}

impl ApiFailure {
    fn simple(status: StatusCode, code: &str, message: String, action: &str) -> Self {
        Self {
            status,
            body: FailureBody {
                code: code.to_string(),
                message,
                suggested_action: action.to_string(),
                expected_value: None,
                found_values: None,
            },
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<TossmailError> for ApiFailure {
    fn from(err: TossmailError) -> Self {
        match err {
            TossmailError::Provision(e) => {
                let status = match &e {
                    ProvisionError::InvalidStatus { .. }
                    | ProvisionError::NoChallengeFound { .. } => StatusCode::CONFLICT,
                    ProvisionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                ApiFailure {
                    status,
                    body: FailureBody {
                        code: e.code().to_string(),
                        message: e.to_string(),
                        suggested_action: e.suggested_action(),
                        expected_value: e.expected_value().map(str::to_string),
                        found_values: e.found_values().map(<[String]>::to_vec),
                    },
                }
            }
            TossmailError::NotFound(_) => ApiFailure::simple(
                StatusCode::NOT_FOUND,
                "not-found",
                err.to_string(),
                "Check the identifier and try again",
            ),
            TossmailError::Duplicate(_) => ApiFailure::simple(
                StatusCode::CONFLICT,
                "duplicate",
                err.to_string(),
                "Use the existing resource or pick a different name",
            ),
            TossmailError::InvalidInput(_) => ApiFailure::simple(
                StatusCode::BAD_REQUEST,
                "invalid-input",
                err.to_string(),
                "Correct the request and try again",
            ),
            TossmailError::InvalidEmail(_) => ApiFailure::simple(
                StatusCode::BAD_REQUEST,
                "invalid-email",
                err.to_string(),
                "Provide a well-formed address (local@domain.tld)",
            ),
            TossmailError::DomainNotActive(_) => ApiFailure::simple(
                StatusCode::CONFLICT,
                "domain-not-active",
                err.to_string(),
                "Finish provisioning and activate the domain first",
            ),
            other => {
                error!("Internal API error: {}", other);
                ApiFailure::simple(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    other.to_string(),
                    "Retry the operation; contact support if it persists",
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DomainCreated {
    pub domain: Domain,
    pub guide: DnsGuide,
}

#[derive(Debug, Serialize)]
pub struct DomainList {
    pub domains: Vec<Domain>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub error_message: Option<String>,
}

/// Certificate issuance result; the key material itself never leaves
/// the service.
#[derive(Debug, Serialize)]
pub struct CertificateIssued {
    pub domain: Domain,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMailboxRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct MailboxQuery {
    pub domain_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MailboxList {
    pub mailboxes: Vec<Mailbox>,
}

#[derive(Debug, Serialize)]
pub struct MessageList {
    pub messages: Vec<Message>,
    pub total: i64,
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tossmail",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn create_domain(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDomainRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let domain = state.domain_manager.create_domain(&payload.name).await?;
    let guide = state.domain_manager.dns_guide(domain.id).await?;
    Ok((StatusCode::CREATED, Json(DomainCreated { domain, guide })))
}

pub async fn list_domains(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<DomainList>, ApiFailure> {
    let store = state.domain_manager.domain_store();
    let domains = store.list(query.limit(), query.offset()).await?;
    let total = store.count().await?;
    Ok(Json(DomainList { domains, total }))
}

pub async fn get_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Domain>, ApiFailure> {
    let domain = state.domain_manager.domain_store().get(id).await?;
    Ok(Json(domain))
}

/// Remove a domain together with its stored certificate and SNI entry
pub async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiFailure> {
    let store = state.domain_manager.domain_store();
    let domain = store.get(id).await?;
    store.delete(id).await?;
    state.certs.remove_domain(&domain.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dns_guide(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DnsGuide>, ApiFailure> {
    let guide = state.domain_manager.dns_guide(id).await?;
    Ok(Json(guide))
}

pub async fn verify_dns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DnsVerifyOutcome>, ApiFailure> {
    let outcome = state.domain_manager.verify_dns(id).await?;
    Ok(Json(outcome))
}

pub async fn request_acme_challenge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Domain>, ApiFailure> {
    let domain = state.domain_manager.request_acme_challenge(id).await?;
    Ok(Json(domain))
}

pub async fn verify_acme_dns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiFailure> {
    let check = state.domain_manager.verify_acme_dns(id).await?;
    Ok(Json(check))
}

pub async fn submit_acme_challenge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CertificateIssued>, ApiFailure> {
    let cert = state.domain_manager.submit_acme_challenge(id).await?;
    let domain = state.domain_manager.domain_store().get(id).await?;
    Ok(Json(CertificateIssued {
        domain,
        issued_at: cert.issued_at,
        not_after: cert.not_after,
    }))
}

pub async fn generate_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CertificateIssued>, ApiFailure> {
    let cert = state.domain_manager.generate_certificate(id).await?;
    let domain = state.domain_manager.domain_store().get(id).await?;
    Ok(Json(CertificateIssued {
        domain,
        issued_at: cert.issued_at,
        not_after: cert.not_after,
    }))
}

pub async fn activate_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Domain>, ApiFailure> {
    let domain = state.domain_manager.activate_domain(id).await?;
    Ok(Json(domain))
}

pub async fn retry_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Option<Json<RetryRequest>>,
) -> Result<Json<Domain>, ApiFailure> {
    let target = match payload.and_then(|Json(req)| req.target) {
        Some(raw) => Some(DomainStatus::parse(&raw)?),
        None => None,
    };
    let domain = state.domain_manager.retry(id, target).await?;
    Ok(Json(domain))
}

pub async fn update_domain_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Domain>, ApiFailure> {
    let status = DomainStatus::parse(&payload.status)?;
    let error_message = payload.error_message.unwrap_or_default();
    let domain = state
        .domain_manager
        .update_status(id, status, &error_message)
        .await?;
    Ok(Json(domain))
}

pub async fn generate_legacy_challenge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Domain>, ApiFailure> {
    let domain = state
        .domain_manager
        .generate_challenge_for_legacy_domain(id)
        .await?;
    Ok(Json(domain))
}

/// Create a mailbox explicitly; delivery creates them on demand, this
/// exists so a client can reserve an address up front
pub async fn create_mailbox(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateMailboxRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let (local_part, domain_name) = split_address(&payload.address)?;

    let domain = state
        .domain_manager
        .domain_store()
        .find_by_name(&domain_name)
        .await?
        .ok_or_else(|| TossmailError::NotFound(format!("domain {}", domain_name)))?;
    if !domain.receives_mail() {
        return Err(TossmailError::DomainNotActive(domain_name).into());
    }

    let full_address = format!("{}@{}", local_part, domain_name);
    let (mailbox, created) = state
        .mail
        .get_or_create_mailbox(&local_part, domain.id, &full_address)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(mailbox)))
}

pub async fn list_mailboxes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MailboxQuery>,
) -> Result<Json<MailboxList>, ApiFailure> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let mailboxes = state
        .mail
        .list_mailboxes(query.domain_id, limit, offset)
        .await?;
    Ok(Json(MailboxList { mailboxes }))
}

pub async fn get_mailbox(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Mailbox>, ApiFailure> {
    let mailbox = state.mail.get_mailbox(id).await?;
    Ok(Json(mailbox))
}

pub async fn list_mailbox_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessageList>, ApiFailure> {
    let mailbox = state.mail.get_mailbox(id).await?;
    let messages = state
        .mail
        .list_messages(mailbox.id, query.limit(), query.offset())
        .await?;
    let total = state.mail.count_messages(mailbox.id).await?;
    state.mail.touch_mailbox(mailbox.id).await?;
    Ok(Json(MessageList { messages, total }))
}

pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Message>, ApiFailure> {
    let message = state.mail.get_message(id).await?;
    Ok(Json(message))
}

pub async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiFailure> {
    state.mail.get_message(id).await?;
    state.mail.mark_read(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_message_attachments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Attachment>>, ApiFailure> {
    state.mail.get_message(id).await?;
    let attachments = state.mail.attachments_for_message(id).await?;
    Ok(Json(attachments))
}

/// Delete a message and its attachment files; a file that fails to
/// delete is logged and orphaned rather than resurrecting the row
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiFailure> {
    let attachments = state.mail.delete_message(id).await?;
    for attachment in attachments {
        if let Err(e) = state.files.delete(&attachment.storage_path).await {
            warn!(
                "Failed to delete attachment file {}: {}",
                attachment.storage_path, e
            );
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiFailure> {
    let attachment = state.mail.get_attachment(id).await?;
    let data = state.files.get(&attachment.storage_path).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        attachment.filename.replace(['"', '\\'], "_")
    );
    let headers = [
        (header::CONTENT_TYPE, attachment.content_type),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, data))
}
