use super::*;

pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/v1/devices", axum::routing::get(list_devices))
        .route(
            "/api/v1/devices/{device_name}",
            axum::routing::get(get_device).delete(delete_device),
        )
        .route(
            "/api/v1/devices/{device_name}/onboard",
            axum::routing::post(onboard_device),
        )
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth))
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct DeviceListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub status: Option<api::DeviceStatus>,
}

#[utoipa::path(
    get,
    path = "/api/v1/devices",
    params(DeviceListParams),
    responses((status = 200, description = "Registered gateways", body = Page<DeviceView>)),
    security(("operatorBearer" = [])),
    tag = "devices"
)]
pub(crate) async fn list_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceListParams>,
) -> ApiResult<Json<Page<DeviceView>>> {
    let (limit, offset) = parse_limit_offset(params.limit, params.offset)?;
    let page = services::devices::list_devices(&state, params.status, limit, offset).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/devices/{device_name}",
    params(("device_name" = String, Path, description = "Gateway name")),
    responses(
        (status = 200, description = "Gateway", body = DeviceView),
        (status = 404, description = "Unknown gateway", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "devices"
)]
pub(crate) async fn get_device(
    State(state): State<AppState>,
    Path(device_name): Path<String>,
) -> ApiResult<Json<DeviceView>> {
    Ok(Json(services::devices::get_device(&state, &device_name).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/devices/{device_name}/onboard",
    params(("device_name" = String, Path, description = "Gateway name")),
    responses(
        (status = 200, description = "Gateway provisioned (or already was)", body = OnboardingResult),
        (status = 400, description = "Invalid gateway name", body = ErrorResponse),
        (status = 502, description = "A provisioning step failed", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "devices"
)]
pub(crate) async fn onboard_device(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorIdentity>,
    request_id: Option<Extension<RequestId>>,
    Path(device_name): Path<String>,
) -> ApiResult<Json<OnboardingResult>> {
    let request_id = request_id_from_extension(request_id);
    let audit_actor = operator.to_audit_actor();

    let result = services::devices::onboard_device(&state, &device_name)
        .await
        .map(Json);

    let (status, payload) = match &result {
        Ok(Json(onboarded)) if onboarded.already_provisioned => {
            (AuditStatus::Success, Some("already provisioned".to_string()))
        }
        Ok(_) => (AuditStatus::Success, None),
        Err(err) => (AuditStatus::Failure, Some(err.message.clone())),
    };
    record_audit_log(
        &state,
        "device.onboard",
        "device",
        status,
        AuditContext {
            resource_id: Some(&device_name),
            actor: Some(&audit_actor),
            request_id: request_id.as_deref(),
            payload,
        },
    )
    .await;

    result
}

#[utoipa::path(
    delete,
    path = "/api/v1/devices/{device_name}",
    params(("device_name" = String, Path, description = "Gateway name")),
    responses(
        (status = 204, description = "Gateway removed"),
        (status = 404, description = "Unknown gateway", body = ErrorResponse),
        (status = 412, description = "Gateway still hosts live connections", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "devices"
)]
pub(crate) async fn delete_device(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorIdentity>,
    request_id: Option<Extension<RequestId>>,
    Path(device_name): Path<String>,
) -> ApiResult<StatusCode> {
    let request_id = request_id_from_extension(request_id);
    let audit_actor = operator.to_audit_actor();

    let result = services::devices::delete_device(&state, &device_name)
        .await
        .map(|()| StatusCode::NO_CONTENT);

    let (status, payload) = match &result {
        Ok(_) => (AuditStatus::Success, None),
        Err(err) => (AuditStatus::Failure, Some(err.message.clone())),
    };
    record_audit_log(
        &state,
        "device.delete",
        "device",
        status,
        AuditContext {
            resource_id: Some(&device_name),
            actor: Some(&audit_actor),
            request_id: request_id.as_deref(),
            payload,
        },
    )
    .await;

    result
}
