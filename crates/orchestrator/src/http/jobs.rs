use super::*;
use std::time::Duration;

use crate::services::jobs::MAX_WAIT_SECS;

pub fn router(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/v1/jobs/{job_id}", axum::routing::get(get_job))
        .route("/api/v1/jobs/{job_id}/retry", axum::routing::post(retry_job))
        .route_layer(middleware::from_fn_with_state(state, require_operator_auth))
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct JobWaitParams {
    /// Block up to this many seconds (max 30) for the job to leave PENDING.
    pub wait_secs: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier"),
        JobWaitParams
    ),
    responses(
        (status = 200, description = "Job", body = DeploymentJobView),
        (status = 404, description = "Unknown job", body = ErrorResponse),
        (status = 504, description = "Job timed out while waited on", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "jobs"
)]
pub(crate) async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<JobWaitParams>,
) -> ApiResult<Json<DeploymentJobView>> {
    let wait = match params.wait_secs {
        None | Some(0) => None,
        Some(secs) if secs > MAX_WAIT_SECS => {
            return Err(AppError::bad_request(format!(
                "wait_secs must be at most {MAX_WAIT_SECS}"
            )));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
    };
    Ok(Json(services::jobs::get_job(&state, job_id, wait).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{job_id}/retry",
    params(("job_id" = Uuid, Path, description = "Job identifier")),
    responses(
        (status = 202, description = "Command re-dispatched as a new attempt", body = ControlAccepted),
        (status = 404, description = "Unknown job", body = ErrorResponse),
        (status = 409, description = "Another retry of the job won", body = ErrorResponse),
        (status = 412, description = "Job cannot be retried", body = ErrorResponse)
    ),
    security(("operatorBearer" = [])),
    tag = "jobs"
)]
pub(crate) async fn retry_job(
    State(state): State<AppState>,
    Extension(operator): Extension<OperatorIdentity>,
    request_id: Option<Extension<RequestId>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ControlAccepted>)> {
    let request_id = request_id_from_extension(request_id);
    let audit_actor = operator.to_audit_actor();
    let resource_id = job_id.to_string();

    let result: ApiResult<_> = async {
        let accepted = services::jobs::retry_job(&state, job_id).await?;
        Ok((StatusCode::ACCEPTED, Json(accepted)))
    }
    .await;

    let (status, payload) = match &result {
        Ok((_, Json(accepted))) => (
            AuditStatus::Success,
            Some(format!("retried as job {}", accepted.job_id)),
        ),
        Err(err) => (AuditStatus::Failure, Some(err.message.clone())),
    };
    record_audit_log(
        &state,
        "job.retry",
        "job",
        status,
        AuditContext {
            resource_id: Some(&resource_id),
            actor: Some(&audit_actor),
            request_id: request_id.as_deref(),
            payload,
        },
    )
    .await;

    result
}
