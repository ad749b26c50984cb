use super::*;
use axum::routing::get;

use crate::persistence::audit as audit_store;

const DEFAULT_AUDIT_LIMIT: u32 = 100;
const MAX_AUDIT_LIMIT: u32 = 500;

pub fn router(state: AppState) -> Router<AppState> {
    let operator = Router::<AppState>::new()
        .route("/api/v1/audit-logs", get(list_audit_logs))
        .route("/api/v1/openapi.json", get(openapi_json))
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth));

    Router::<AppState>::new()
        .route("/health", get(health))
        .merge(operator)
}

/// Served on the dedicated metrics listener.
pub fn metrics_router() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<audit_store::AuditLogRecord> for AuditLogEntry {
    fn from(record: audit_store::AuditLogRecord) -> Self {
        Self {
            id: record.id,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            status: record.status,
            actor_token_hash: record.actor_token_hash,
            request_id: record.request_id,
            payload: record.payload,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct AuditLogParams {
    /// Newest entries first. Defaults to 100, at most 500.
    pub limit: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database reachable", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if db_ok { "ok" } else { "degraded" }.to_string(),
            version: crate::version::VERSION.to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus exposition", body = String, content_type = "text/plain")),
    tag = "system"
)]
pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))],
        body,
    )
}

#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    responses((status = 200, description = "OpenAPI document")),
    security(("operatorBearer" = [])),
    tag = "system"
)]
pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    params(AuditLogParams),
    responses((status = 200, description = "Operator audit trail, newest first", body = [AuditLogEntry])),
    security(("operatorBearer" = [])),
    tag = "system"
)]
pub(crate) async fn list_audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditLogParams>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    if limit == 0 || limit > MAX_AUDIT_LIMIT {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {MAX_AUDIT_LIMIT}"
        )));
    }
    let records = audit_store::list_audit_logs(&state.db, limit).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}
