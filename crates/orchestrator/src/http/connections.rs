use super::*;
use axum::extract::rejection::JsonRejection;

const DEFAULT_LOG_LIMIT: u32 = 100;
const MAX_LOG_LIMIT: u32 = 1000;

pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route(
            "/api/v1/connections",
            axum::routing::get(list_connections).post(submit_control),
        )
        .route(
            "/api/v1/connections/{connection_name}",
            axum::routing::get(get_connection),
        )
        .route(
            "/api/v1/connections/{connection_name}/jobs",
            axum::routing::get(list_connection_jobs),
        )
        .route(
            "/api/v1/connections/{connection_name}/logs",
            axum::routing::get(list_connection_logs),
        )
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth))
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct ConnectionListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Only connections in this state.
    pub state: Option<api::ConnectionState>,
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct LogParams {
    /// Only entries at or after this instant (RFC 3339).
    pub since: Option<DateTime<Utc>>,
    /// Maximum entries, newest first. Defaults to 100, at most 1000.
    pub limit: Option<u32>,
}

#[utoipa::path(
    post,
    path = "/api/v1/connections",
    request_body = ConnectionControlRequest,
    responses(
        (status = 202, description = "Control accepted and dispatched", body = ControlAccepted),
        (status = 400, description = "Definition failed validation", body = ErrorResponse),
        (status = 409, description = "Concurrent update won", body = ErrorResponse),
        (status = 412, description = "Control not allowed in the current state", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "connections"
)]
pub(crate) async fn submit_control(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorIdentity>,
    request_id: Option<Extension<RequestId>>,
    request: Result<Json<ConnectionControlRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ControlAccepted>)> {
    let Json(request) = request?;
    let request_id = request_id_from_extension(request_id);
    let audit_actor = operator.to_audit_actor();
    let action = format!("connection.{}", request.control);
    let connection_name = request.definition.connection_name.trim().to_string();

    info!(
        connection = %connection_name,
        control = %request.control,
        request_id = request_id.as_deref().unwrap_or("-"),
        "control submitted"
    );

    let result: ApiResult<_> = async {
        let accepted = services::connections::submit_control(&state, request).await?;
        Ok((StatusCode::ACCEPTED, Json(accepted)))
    }
    .await;

    match &result {
        Ok((_status, Json(accepted))) => {
            record_audit_log(
                &state,
                &action,
                "connection",
                AuditStatus::Success,
                AuditContext {
                    resource_id: Some(&accepted.connection_name),
                    actor: Some(&audit_actor),
                    request_id: request_id.as_deref(),
                    payload: Some(format!(
                        "{} -> {} (job {})",
                        accepted.previous_state, accepted.state, accepted.job_id
                    )),
                },
            )
            .await;
        }
        Err(err) => {
            record_audit_log(
                &state,
                &action,
                "connection",
                AuditStatus::Failure,
                AuditContext {
                    resource_id: Some(&connection_name),
                    actor: Some(&audit_actor),
                    request_id: request_id.as_deref(),
                    payload: Some(failure_payload(err)),
                },
            )
            .await;
        }
    }

    result
}

fn failure_payload(err: &AppError) -> String {
    match &err.fields {
        Some(fields) if !fields.is_empty() => {
            let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
            format!("{}: {}", err.message, keys.join(", "))
        }
        _ => err.message.clone(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/connections",
    params(ConnectionListParams),
    responses((status = 200, description = "Connections", body = Page<ConnectionSummary>)),
    security(("operatorBearer" = [])),
    tag = "connections"
)]
pub(crate) async fn list_connections(
    State(state): State<AppState>,
    Query(params): Query<ConnectionListParams>,
) -> ApiResult<Json<Page<ConnectionSummary>>> {
    let (limit, offset) = parse_limit_offset(params.limit, params.offset)?;
    let page = services::connections::list_connections(&state, params.state, limit, offset).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/connections/{connection_name}",
    params(("connection_name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Connection with its stored definition", body = ConnectionDetail),
        (status = 404, description = "Unknown connection", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "connections"
)]
pub(crate) async fn get_connection(
    State(state): State<AppState>,
    Path(connection_name): Path<String>,
) -> ApiResult<Json<ConnectionDetail>> {
    Ok(Json(
        services::connections::get_connection(&state, &connection_name).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/connections/{connection_name}/jobs",
    params(
        ("connection_name" = String, Path, description = "Connection name"),
        ListParams
    ),
    responses((status = 200, description = "Deployment jobs, newest first", body = Page<DeploymentJobView>)),
    security(("operatorBearer" = [])),
    tag = "connections"
)]
pub(crate) async fn list_connection_jobs(
    State(state): State<AppState>,
    Path(connection_name): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Page<DeploymentJobView>>> {
    let (limit, offset) = parse_limit_offset(params.limit, params.offset)?;
    let page =
        services::connections::list_jobs(&state, &connection_name, limit, offset).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/connections/{connection_name}/logs",
    params(
        ("connection_name" = String, Path, description = "Connection name"),
        LogParams
    ),
    responses((status = 200, description = "Connection log entries", body = [ConnectionLogEntry])),
    security(("operatorBearer" = [])),
    tag = "connections"
)]
pub(crate) async fn list_connection_logs(
    State(state): State<AppState>,
    Path(connection_name): Path<String>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<Vec<ConnectionLogEntry>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if limit == 0 || limit > MAX_LOG_LIMIT {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}"
        )));
    }
    let entries =
        services::connections::list_logs(&state, &connection_name, params.since, limit).await?;
    Ok(Json(entries))
}
