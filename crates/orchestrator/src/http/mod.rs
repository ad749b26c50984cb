use crate::{
    app_state::AppState,
    audit::{AuditContext, AuditStatus},
    auth::{require_operator_auth, OperatorIdentity},
    error::{ApiResult, AppError},
    metrics::track_http_metrics,
    services,
    telemetry::{record_audit_log, request_id_from_extension},
};
use axum::{
    extract::{Extension, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    Json, Router,
};
use chrono::{DateTime, Utc};
use common::api::{
    self, ConnectionControlRequest, ConnectionDetail, ConnectionLogEntry, ConnectionSummary,
    ControlAccepted, DeploymentJobView, DeviceView, HealthResponse, OnboardingResult, Page,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use uuid::Uuid;

mod connections;
mod devices;
mod error_mapper;
mod fleet;
mod jobs;
mod system;

const DEFAULT_PAGE_LIMIT: u32 = 50;
const MAX_PAGE_LIMIT: u32 = 100;
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub(crate) struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Per-field messages, present on `validation_failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Query)]
pub(crate) struct ListParams {
    /// Page size, 1..=100. Defaults to 50.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn parse_limit_offset(limit: Option<u32>, offset: Option<u32>) -> ApiResult<(u32, u32)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    Ok((limit, offset.unwrap_or(0)))
}

pub fn build_router(state: AppState) -> Router<AppState> {
    let header_name = axum::http::HeaderName::from_static(REQUEST_ID_HEADER);
    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(header_name))
        .layer(middleware::from_fn(track_http_metrics));

    Router::<AppState>::new()
        .merge(system::router(state.clone()))
        .merge(connections::router(state.clone()))
        .merge(devices::router(state.clone()))
        .merge(jobs::router(state.clone()))
        .merge(fleet::router(state))
        .layer(middleware_stack)
}

pub fn build_metrics_router() -> Router<AppState> {
    system::metrics_router()
}

#[derive(OpenApi)]
#[openapi(
    paths(
        system::health,
        system::metrics,
        system::openapi_json,
        system::list_audit_logs,
        connections::submit_control,
        connections::list_connections,
        connections::get_connection,
        connections::list_connection_jobs,
        connections::list_connection_logs,
        devices::list_devices,
        devices::get_device,
        devices::onboard_device,
        devices::delete_device,
        jobs::get_job,
        jobs::retry_job,
        fleet::ingest_fleet_message,
    ),
    components(schemas(
        ErrorResponse,
        HealthResponse,
        system::AuditLogEntry,
        api::Protocol,
        api::ConnectionControl,
        api::ConnectionState,
        api::JobStatus,
        api::DeviceStatus,
        api::OpcDaDefinition,
        api::OpcUaDefinition,
        api::DestinationFlags,
        api::ConnectionDefinition,
        api::ConnectionControlRequest,
        api::ControlAccepted,
        api::FleetCommand,
        api::AckStatus,
        api::CommandAck,
        api::HealthReport,
        api::InfoMessage,
        api::ErrorReport,
        api::ConnectionSummary,
        api::ConnectionDetail,
        api::DeploymentJobView,
        api::DeviceView,
        api::OnboardingResult,
        api::LogLevel,
        api::ConnectionLogEntry,
    )),
    tags(
        (name = "system", description = "Health, metrics and audit"),
        (name = "connections", description = "Connection lifecycle control"),
        (name = "devices", description = "Gateway device onboarding"),
        (name = "jobs", description = "Deployment job tracking"),
        (name = "fleet", description = "Gateway message ingest"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = "Edge Fleet Orchestrator API".to_string();
        openapi.info.version = crate::version::FULL_VERSION.to_string();

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "operatorBearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("Opaque")
                    .build(),
            ),
        );
    }
}
