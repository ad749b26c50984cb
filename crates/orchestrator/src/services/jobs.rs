use std::time::Duration;

use common::api::{self, ControlAccepted, DeploymentJobView, FleetCommand};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{
    self as db, connections, jobs, DeploymentJobRecord, JobStatus, NewDeploymentJob,
};
use crate::services::connections::dispatch_recorded;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_WAIT_SECS: u64 = 30;

/// Returns the job, optionally polling until it leaves PENDING or `wait`
/// elapses. A job that timed out while waited on is a dispatch timeout.
pub async fn get_job(
    state: &AppState,
    job_id: Uuid,
    wait: Option<Duration>,
) -> ApiResult<DeploymentJobView> {
    let mut job = load_job(state, job_id).await?;
    let Some(wait) = wait else {
        return Ok(job.into());
    };

    let deadline = Instant::now() + wait;
    while job.status == JobStatus::Pending && Instant::now() < deadline {
        tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
            .await;
        job = load_job(state, job_id).await?;
    }

    if job.status == JobStatus::TimedOut {
        return Err(AppError::dispatch_timeout(format!(
            "job {job_id} was not acknowledged before its deadline"
        )));
    }
    Ok(job.into())
}

/// Re-dispatches a TIMED_OUT or FAILED job as a new attempt with a fresh
/// `dispatchedAt`. Only the latest accepted control of a connection can be
/// retried.
pub async fn retry_job(state: &AppState, job_id: Uuid) -> ApiResult<ControlAccepted> {
    let job = load_job(state, job_id).await?;
    if !matches!(job.status, JobStatus::TimedOut | JobStatus::Failed) {
        return Err(AppError::precondition_failed(format!(
            "job {job_id} is {} and cannot be retried",
            api::JobStatus::from(job.status).as_str()
        )));
    }
    if let Some(replacement) = job.retried_by {
        return Err(AppError::precondition_failed(format!(
            "job {job_id} was already retried as {replacement}"
        )));
    }

    let next_attempt = job.attempt + 1;
    if next_attempt > i64::from(state.fleet_config.max_dispatch_attempts) {
        return Err(AppError::precondition_failed(format!(
            "job {job_id} reached the limit of {} dispatch attempts",
            state.fleet_config.max_dispatch_attempts
        )));
    }

    let connection = connections::get_connection(&state.db, &job.connection_name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("connection {} not found", job.connection_name)))?;
    if connection.last_control != Some(job.control) {
        return Err(AppError::precondition_failed(format!(
            "a newer control was accepted for connection {}",
            job.connection_name
        )));
    }

    // The ack key must differ from the attempt being replaced.
    let now = db::now().max(job.dispatched_at + chrono::Duration::milliseconds(1));
    let new_id = Uuid::new_v4();
    let command = FleetCommand {
        job_id: new_id,
        dispatched_at: now,
        attempt: u32::try_from(next_attempt).unwrap_or(u32::MAX),
        ..job.command.0.clone()
    };

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if !jobs::claim_retry(&mut tx, job_id, new_id).await? {
        return Err(AppError::concurrency_conflict(format!(
            "job {job_id} was retried concurrently"
        )));
    }
    jobs::supersede_pending(&mut tx, &job.connection_name, Some(job.control), now).await?;
    jobs::insert_job(
        &mut tx,
        &NewDeploymentJob {
            id: new_id,
            connection_name: job.connection_name.clone(),
            control: job.control,
            dispatched_at: now,
            attempt: next_attempt,
            restart_session: job.restart_session,
            command: command.clone(),
        },
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    let job_status = dispatch_recorded(state, &command).await?;
    info!(
        connection = %job.connection_name,
        previous_job = %job_id,
        job_id = %new_id,
        attempt = next_attempt,
        "job retried"
    );

    let current = api::ConnectionState::from(connection.state);
    Ok(ControlAccepted {
        connection_name: job.connection_name,
        control: job.control.into(),
        previous_state: current,
        state: current,
        version: connection.version,
        job_id: new_id,
        dispatched_at: now,
        job_status,
        redispatch: true,
    })
}

async fn load_job(state: &AppState, job_id: Uuid) -> ApiResult<DeploymentJobRecord> {
    jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connections::submit_control;
    use crate::services::test_support::{provision_device, setup_state};
    use crate::tasks::ack_timeout::sweep_ack_timeouts;
    use axum::http::StatusCode;
    use common::api::{
        ConnectionControl, ConnectionControlRequest, ConnectionDefinition, DestinationFlags,
        NumericField, OpcUaDefinition, Protocol,
    };

    fn deploy_request() -> ConnectionControlRequest {
        ConnectionControlRequest {
            control: ConnectionControl::Deploy,
            definition: ConnectionDefinition {
                connection_name: "press-01".into(),
                protocol: Some(Protocol::OpcUa),
                greengrass_core_device_name: Some("gw-01".into()),
                site_name: Some("plant-7".into()),
                area: Some("stamping".into()),
                process: Some("press".into()),
                machine_name: Some("press_01".into()),
                opc_ua: Some(OpcUaDefinition {
                    machine_ip: "10.0.0.5".into(),
                    server_name: "srv".into(),
                    port: Some(NumericField::from(4840)),
                }),
                destinations: DestinationFlags {
                    timestream: Some(true),
                    ..DestinationFlags::default()
                },
                ..ConnectionDefinition::default()
            },
        }
    }

    async fn timed_out_deploy(state: &AppState) -> Uuid {
        provision_device(state, "gw-01").await;
        let accepted = submit_control(state, deploy_request()).await.expect("deploy");
        let swept = sweep_ack_timeouts(
            &state.db,
            &state.fleet_config,
            db::now() + chrono::Duration::seconds(3600),
        )
        .await
        .expect("sweep");
        assert_eq!(swept, 1);
        accepted.job_id
    }

    #[tokio::test]
    async fn retry_creates_next_attempt_with_fresh_key() {
        let state = setup_state().await;
        let job_id = timed_out_deploy(&state).await;
        let original = jobs::get_job(&state.db, job_id).await.expect("get").expect("job");

        let retried = retry_job(&state, job_id).await.expect("retry");
        assert!(retried.redispatch);
        assert_ne!(retried.job_id, job_id);
        assert!(retried.dispatched_at > original.dispatched_at);

        let next = jobs::get_job(&state.db, retried.job_id)
            .await
            .expect("get")
            .expect("job");
        assert_eq!(next.attempt, 2);
        assert_eq!(next.command.0.attempt, 2);
        assert_eq!(next.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn a_job_is_replaced_at_most_once() {
        let state = setup_state().await;
        let job_id = timed_out_deploy(&state).await;
        let mut rx = state.fleet.transport().subscribe();

        let attempts = (0..4).map(|_| {
            let state = state.clone();
            tokio::spawn(async move { retry_job(&state, job_id).await })
        });
        let mut replaced = Vec::new();
        for attempt in attempts.collect::<Vec<_>>() {
            match attempt.await.expect("join") {
                Ok(accepted) => replaced.push(accepted.job_id),
                Err(err) => assert!(
                    matches!(
                        err.status,
                        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED
                    ),
                    "unexpected {}",
                    err.status
                ),
            }
        }
        assert_eq!(replaced.len(), 1);

        let original = jobs::get_job(&state.db, job_id).await.expect("get").expect("job");
        assert_eq!(original.retried_by, Some(replaced[0]));
        let second_attempts = jobs::list_jobs_for_connection(&state.db, "press-01", 10, 0)
            .await
            .expect("jobs")
            .into_iter()
            .filter(|job| job.attempt == 2)
            .count();
        assert_eq!(second_attempts, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        let err = retry_job(&state, job_id).await.expect_err("already retried");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn pending_jobs_cannot_be_retried() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        let accepted = submit_control(&state, deploy_request()).await.expect("deploy");
        let err = retry_job(&state, accepted.job_id).await.expect_err("pending");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut state = setup_state().await;
        state.fleet_config.max_dispatch_attempts = 1;
        let job_id = timed_out_deploy(&state).await;
        let err = retry_job(&state, job_id).await.expect_err("limit");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
        assert!(err.message.contains("limit"));
    }

    #[tokio::test]
    async fn waiting_on_a_timed_out_job_is_a_dispatch_timeout() {
        let state = setup_state().await;
        let job_id = timed_out_deploy(&state).await;

        let plain = get_job(&state, job_id, None).await.expect("plain read");
        assert_eq!(plain.status, api::JobStatus::TimedOut);

        let err = get_job(&state, job_id, Some(Duration::from_millis(10)))
            .await
            .expect_err("timed out");
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn wait_returns_once_the_job_is_pending_past_the_window() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        let accepted = submit_control(&state, deploy_request()).await.expect("deploy");
        let job = get_job(&state, accepted.job_id, Some(Duration::from_millis(150)))
            .await
            .expect("still pending");
        assert_eq!(job.status, api::JobStatus::Pending);
    }
}
