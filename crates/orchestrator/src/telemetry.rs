use axum::{extract::Extension, http::Request};
use tower_http::request_id::RequestId;
use tracing::warn;

use crate::app_state::AppState;
use crate::audit::{AuditContext, AuditStatus};

/// Request id assigned by `SetRequestIdLayer`, if it is printable.
pub(crate) fn request_id_from_extension(
    request_id: Option<Extension<RequestId>>,
) -> Option<String> {
    let Extension(id) = request_id?;
    printable(&id)
}

pub(crate) fn request_id_from_request<B>(req: &Request<B>) -> Option<String> {
    req.extensions().get::<RequestId>().and_then(printable)
}

fn printable(id: &RequestId) -> Option<String> {
    id.header_value().to_str().map(str::to_owned).ok()
}

/// Writes an audit row. A failed write is logged and otherwise ignored so
/// the request it describes still completes.
pub async fn record_audit_log(
    state: &AppState,
    action: &str,
    resource_type: &str,
    status: AuditStatus,
    context: AuditContext<'_>,
) {
    let result = crate::audit::record(&state.db, action, resource_type, status, context).await;
    if let Err(err) = result {
        warn!(?err, action, resource_type, "audit write failed");
    }
}
