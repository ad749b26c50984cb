use super::*;
use axum::body::Bytes;
use common::topics::{Channel, FleetTopic};

use crate::fleet::TransportError;

const MAX_FLEET_PAYLOAD_BYTES: usize = 256 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route(
            "/api/v1/fleet/{channel}/{connection_name}",
            axum::routing::post(ingest_fleet_message),
        )
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth))
}

/// Broker bridge entrypoint: forwards a gateway message onto the fleet bus,
/// where the router ingest loop picks it up.
#[utoipa::path(
    post,
    path = "/api/v1/fleet/{channel}/{connection_name}",
    params(
        ("channel" = String, Path, description = "`info`, `error` or `data`"),
        ("connection_name" = String, Path, description = "Connection the message belongs to")
    ),
    request_body(content = String, description = "Raw gateway payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Message queued on the fleet bus"),
        (status = 400, description = "Unknown or cloud-only channel", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "fleet"
)]
pub(crate) async fn ingest_fleet_message(
    State(state): State<AppState>,
    Path((channel, connection_name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let channel = Channel::parse(&channel)
        .ok_or_else(|| AppError::bad_request(format!("unknown fleet channel `{channel}`")))?;
    if !channel.is_device_originated() {
        return Err(AppError::bad_request(format!(
            "channel `{channel}` is reserved for orchestrator commands"
        )));
    }
    if body.len() > MAX_FLEET_PAYLOAD_BYTES {
        return Err(AppError::bad_request(format!(
            "fleet payload exceeds {MAX_FLEET_PAYLOAD_BYTES} bytes"
        )));
    }

    let topic = FleetTopic::new(channel, connection_name).to_string();
    match state.fleet.transport().publish(&topic, body.to_vec()).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TransportError::InvalidTopic(topic)) => Err(AppError::bad_request(format!(
            "invalid fleet topic `{topic}`"
        ))),
        Err(err) => Err(AppError::service_unavailable(err.to_string())),
    }
}
