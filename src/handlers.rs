use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::cms::{CmsClient, CmsHealth, HealthStatus};
use crate::cms_models::CmsContent;
use crate::config::Config;
use crate::errors::AppError;
use crate::lead_capture::{ClientContext, LeadCaptureService};
use crate::models::*;
use crate::rate_limit::client_identifier;
use crate::validation::validate_update_status;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub leads: LeadCaptureService,
    pub cms: Arc<CmsClient>,
    /// Present when leads live in Postgres; used by the health probe.
    pub db: Option<PgPool>,
    /// Names of the integrations wired at startup.
    pub integrations: Integrations,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Integrations {
    pub lead_store: String,
    pub identity_store: String,
    pub email_provider: String,
    pub cms_provider: String,
    pub cache_backend: String,
}

/// Lead and CMS endpoints, before state is attached.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads/capture", post(capture_lead))
        .route("/api/leads/check-email", get(check_email))
        .route("/api/leads/link-profile", post(link_profile))
        .route("/api/leads/analytics", get(lead_analytics))
        .route("/api/leads/status", post(update_lead_status))
        .route("/api/email/test", post(send_test_email))
        .route("/api/cms/content", get(get_cms_content).post(cms_content_action))
        .route("/api/cms/health", get(cms_health))
}

/// Every route without transport-level middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

fn client_context(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> ClientContext {
    ClientContext {
        identifier: client_identifier(headers, peer.map(|ConnectInfo(addr)| addr.ip())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Bearer `ADMIN_API_KEY`, or any request in development.
fn authorize_admin(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    if config.is_development() {
        return Ok(());
    }

    let expected = config
        .admin_api_key
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("ADMIN_API_KEY not configured".to_string()))?;
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid admin token".to_string()))
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Service health and the integrations in use.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Serviço no ar"),
        (status = 503, description = "Banco de dados indisponível")
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db {
        Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
        None => true,
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "landing-leads-api",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.app_env,
            "database": database,
            "integrations": state.integrations,
        })),
    )
}

/// POST /api/leads/capture
#[utoipa::path(
    post,
    path = "/api/leads/capture",
    tag = "Leads",
    request_body = LeadCaptureRequest,
    responses(
        (status = 200, description = "Lead capturado", body = LeadCaptureResponse),
        (status = 400, description = "Dados inválidos"),
        (status = 409, description = "Email já cadastrado (EMAIL_EXISTS)"),
        (status = 429, description = "Muitas tentativas"),
        (status = 500, description = "Erro interno")
    )
)]
pub async fn capture_lead(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LeadCaptureResponse>, AppError> {
    let client = client_context(&headers, peer);
    Ok(Json(state.leads.capture(&client, &body).await?))
}

/// GET /api/leads/check-email
#[utoipa::path(
    get,
    path = "/api/leads/check-email",
    tag = "Leads",
    params(CheckEmailQuery),
    responses(
        (status = 200, description = "Disponibilidade do email", body = CheckEmailResponse),
        (status = 400, description = "Email ausente ou inválido"),
        (status = 429, description = "Muitas verificações")
    )
)]
pub async fn check_email(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<CheckEmailQuery>,
) -> Result<Json<CheckEmailResponse>, AppError> {
    let client = client_context(&headers, peer);
    Ok(Json(
        state
            .leads
            .check_email(&client, params.email.as_deref())
            .await?,
    ))
}

/// POST /api/leads/link-profile
#[utoipa::path(
    post,
    path = "/api/leads/link-profile",
    tag = "Leads",
    request_body = LinkProfileRequest,
    responses(
        (status = 200, description = "Lead vinculado", body = LinkProfileResponse),
        (status = 404, description = "Lead não encontrado (LEAD_NOT_FOUND)"),
        (status = 409, description = "Lead já processado (LEAD_ALREADY_PROCESSED)"),
        (status = 429, description = "Muitas tentativas")
    )
)]
pub async fn link_profile(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LinkProfileResponse>, AppError> {
    let client = client_context(&headers, peer);
    Ok(Json(state.leads.link_profile(&client, &body).await?))
}

/// GET /api/leads/analytics
#[utoipa::path(
    get,
    path = "/api/leads/analytics",
    tag = "Admin",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Estatísticas ou leads por status"),
        (status = 400, description = "Parâmetros inválidos"),
        (status = 401, description = "Não autorizado")
    ),
    security(("admin_key" = []))
)]
pub async fn lead_analytics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    authorize_admin(&state.config, &headers)?;
    let repository = state.leads.repository();

    match (params.kind.as_deref().unwrap_or("stats"), params.status.as_deref()) {
        ("stats", _) => {
            let stats = repository.get_lead_stats().await?;
            Ok(Json(json!({
                "ok": true,
                "data": stats,
                "timestamp": now_iso(),
            })))
        }
        ("leads", Some(raw_status)) => {
            let status: LeadStatus = raw_status
                .parse()
                .map_err(|_| AppError::BadRequest(format!("Status inválido: {}", raw_status)))?;
            let leads = repository.get_leads_by_status(status).await?;
            Ok(Json(json!({
                "ok": true,
                "count": leads.len(),
                "data": leads,
                "status": status,
                "timestamp": now_iso(),
            })))
        }
        _ => Err(AppError::BadRequest(
            "Parâmetros inválidos. Use type=stats ou type=leads&status=pending|email_validated|whatsapp_validated|converted"
                .to_string(),
        )),
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub email: Option<String>,
    pub status: Option<String>,
    /// RFC 3339; defaults to now.
    pub timestamp: Option<String>,
}

/// POST /api/leads/status
#[utoipa::path(
    post,
    path = "/api/leads/status",
    tag = "Admin",
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status atualizado", body = LeadCapture),
        (status = 400, description = "Dados inválidos"),
        (status = 401, description = "Não autorizado"),
        (status = 404, description = "Lead não encontrado"),
        (status = 409, description = "Transição não permitida")
    ),
    security(("admin_key" = []))
)]
pub async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LeadCapture>, AppError> {
    authorize_admin(&state.config, &headers)?;
    let request: UpdateStatusRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Corpo da requisição inválido: {}", e)))?;

    let input = validate_update_status(
        &crate::security::sanitize_email(request.email.as_deref().unwrap_or_default()),
        request.status.as_deref().unwrap_or_default(),
        request.timestamp.as_deref(),
    )?;
    let lead = state
        .leads
        .repository()
        .update_lead_status(&input.email, input.status, input.timestamp)
        .await?;

    Ok(Json(lead))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TestEmailRequest {
    /// Falls back to `TEST_EMAIL`.
    pub to: Option<String>,
    pub name: Option<String>,
    pub origin: Option<String>,
}

/// POST /api/email/test
#[utoipa::path(
    post,
    path = "/api/email/test",
    tag = "Admin",
    request_body = TestEmailRequest,
    responses(
        (status = 200, description = "Email de teste enviado"),
        (status = 400, description = "Destinatário ausente ou inválido"),
        (status = 401, description = "Não autorizado"),
        (status = 500, description = "Falha no provedor de email")
    ),
    security(("admin_key" = []))
)]
pub async fn send_test_email(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    authorize_admin(&state.config, &headers)?;
    let request: TestEmailRequest = if body.is_empty() {
        TestEmailRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Corpo da requisição inválido: {}", e)))?
    };

    let to = request
        .to
        .filter(|to| !to.trim().is_empty())
        .or_else(|| state.config.test_email.clone())
        .ok_or_else(|| {
            AppError::BadRequest(
                "Informe um email destino em { to } ou defina TEST_EMAIL".to_string(),
            )
        })?;

    let result = state
        .leads
        .send_test_email(
            &to,
            request.name.as_deref().unwrap_or("Teste"),
            request.origin.as_deref().unwrap_or("test_manual"),
        )
        .await?;
    if !result.success {
        return Err(AppError::ExternalApiError(
            result.error.unwrap_or_else(|| "Email not sent".to_string()),
        ));
    }

    Ok(Json(json!({
        "ok": true,
        "messageId": result.message_id,
    })))
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CmsContentQuery {
    /// `true` bypasses the cache.
    pub refresh: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CmsContentResponse {
    pub ok: bool,
    #[schema(value_type = Object)]
    pub data: Option<CmsContent>,
    pub timestamp: String,
    pub cached: bool,
}

fn content_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "ok": false,
            "error": "Conteúdo não encontrado no CMS",
            "code": "CMS_CONTENT_NOT_FOUND",
        })),
    )
        .into_response()
}

/// GET /api/cms/content
#[utoipa::path(
    get,
    path = "/api/cms/content",
    tag = "CMS",
    params(CmsContentQuery),
    responses(
        (status = 200, description = "Conteúdo da landing page", body = CmsContentResponse),
        (status = 404, description = "Conteúdo indisponível (CMS_CONTENT_NOT_FOUND)")
    )
)]
pub async fn get_cms_content(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CmsContentQuery>,
) -> Response {
    let refresh = params.refresh.unwrap_or(false);
    match state.cms.get_all_content(!refresh).await {
        Some(content) => Json(CmsContentResponse {
            ok: true,
            data: Some(content),
            timestamp: now_iso(),
            cached: !refresh,
        })
        .into_response(),
        None => content_not_found(),
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CmsActionRequest {
    /// `clear_cache` or `refresh_content`.
    pub action: Option<String>,
}

/// POST /api/cms/content
#[utoipa::path(
    post,
    path = "/api/cms/content",
    tag = "CMS",
    request_body = CmsActionRequest,
    responses(
        (status = 200, description = "Ação executada"),
        (status = 400, description = "Ação não suportada (INVALID_ACTION)")
    )
)]
pub async fn cms_content_action(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let request: CmsActionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Corpo da requisição inválido: {}", e)))?;

    match request.action.as_deref() {
        Some("clear_cache") => {
            state.cms.clear_cache().await;
            Ok(Json(json!({
                "ok": true,
                "message": "Cache do CMS limpo com sucesso",
                "timestamp": now_iso(),
            })))
        }
        Some("refresh_content") => {
            let content = state.cms.refresh_content().await;
            Ok(Json(json!({
                "ok": true,
                "data": content,
                "message": "Conteúdo do CMS atualizado",
                "timestamp": now_iso(),
            })))
        }
        _ => Err(AppError::BadRequest("Ação não suportada".to_string())),
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CmsHealthResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub health: CmsHealth,
    pub timestamp: String,
    pub cache_backend: String,
}

/// GET /api/cms/health
#[utoipa::path(
    get,
    path = "/api/cms/health",
    tag = "CMS",
    responses(
        (status = 200, description = "Provedor acessível", body = CmsHealthResponse),
        (status = 503, description = "Provedor indisponível", body = CmsHealthResponse)
    )
)]
pub async fn cms_health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<CmsHealthResponse>) {
    let health = state.cms.health_check().await;
    let ok = health.status == HealthStatus::Ok;
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(CmsHealthResponse {
            ok,
            health,
            timestamp: now_iso(),
            cache_backend: state.cms.cache_backend().to_string(),
        }),
    )
}
