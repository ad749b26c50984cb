use std::time::Duration;

use chrono::{DateTime, Utc};
use common::api::{
    self, ConnectionControl, ConnectionControlRequest, ConnectionDefinition, ConnectionDetail,
    ConnectionLogEntry, ConnectionSummary, ControlAccepted, DeploymentJobView, FleetCommand, Page,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::backoff::backoff_with_jitter;
use crate::builder;
use crate::error::{self, ApiResult, AppError};
use crate::persistence::{
    self as db, connections, devices, jobs, logs, ConnectionRecord, ConnectionWrite,
    DeviceStatus, NewConnection, NewDeploymentJob,
};
use crate::state_machine::{self, Transition, TransitionError, TransitionKind};
use crate::metrics::record_control_outcome;
use crate::validation;

/// Outcome of one optimistic attempt at applying a control.
enum ApplyError {
    /// Another writer changed the connection first; retry from a fresh read.
    Conflict,
    Rejected(AppError),
}

impl From<AppError> for ApplyError {
    fn from(err: AppError) -> Self {
        ApplyError::Rejected(err)
    }
}

impl From<TransitionError> for ApplyError {
    fn from(err: TransitionError) -> Self {
        ApplyError::Rejected(err.into())
    }
}

impl From<anyhow::Error> for ApplyError {
    fn from(err: anyhow::Error) -> Self {
        if error::is_unique_violation(&err) {
            ApplyError::Conflict
        } else {
            ApplyError::Rejected(err.into())
        }
    }
}

impl From<sqlx::Error> for ApplyError {
    fn from(err: sqlx::Error) -> Self {
        anyhow::Error::from(err).into()
    }
}

struct Applied {
    transition: Transition,
    record: ConnectionRecord,
    command: FleetCommand,
}

/// Canonicalizes, validates and applies a control verb, then dispatches the
/// resulting command. The job row is committed before the command leaves.
pub async fn submit_control(
    state: &AppState,
    request: ConnectionControlRequest,
) -> ApiResult<ControlAccepted> {
    let control = request.control;
    let definition = builder::build(request.definition);

    let errors = validation::validate(&definition, control);
    if !errors.is_empty() {
        record_control_outcome(control, "invalid");
        debug!(
            connection = %definition.connection_name,
            %control,
            fields = ?errors.keys().collect::<Vec<_>>(),
            "control rejected by validation"
        );
        return Err(AppError::validation(errors));
    }

    let device_name = definition
        .greengrass_core_device_name
        .clone()
        .unwrap_or_default();
    if let Err(err) = ensure_device_provisioned(state, &device_name).await {
        record_control_outcome(control, "rejected");
        return Err(err);
    }

    let cfg = &state.fleet_config;
    let mut attempt: u32 = 0;
    let applied = loop {
        attempt += 1;
        match try_apply(state, control, &definition, &device_name).await {
            Ok(applied) => break applied,
            Err(ApplyError::Conflict) if attempt <= cfg.conflict_retries => {
                let delay = backoff_with_jitter(
                    Duration::from_millis(cfg.conflict_backoff_ms),
                    Duration::from_millis(cfg.conflict_backoff_max_ms),
                    attempt,
                );
                debug!(
                    connection = %definition.connection_name,
                    %control,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "lost optimistic write, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(ApplyError::Conflict) => {
                record_control_outcome(control, "conflict");
                return Err(AppError::concurrency_conflict(format!(
                    "connection {} was modified concurrently",
                    definition.connection_name
                )));
            }
            Err(ApplyError::Rejected(err)) => {
                record_control_outcome(control, "rejected");
                return Err(err);
            }
        }
    };

    let job_status = dispatch_recorded(state, &applied.command).await?;
    record_control_outcome(control, "accepted");
    info!(
        connection = %applied.record.connection_name,
        %control,
        from = %applied.transition.from,
        to = %applied.transition.to,
        version = applied.record.version,
        job_id = %applied.command.job_id,
        "control accepted"
    );

    Ok(ControlAccepted {
        connection_name: applied.record.connection_name,
        control,
        previous_state: applied.transition.from,
        state: applied.transition.to,
        version: applied.record.version,
        job_id: applied.command.job_id,
        dispatched_at: applied.command.dispatched_at,
        job_status,
        redispatch: applied.transition.kind == TransitionKind::Redispatch,
    })
}

async fn ensure_device_provisioned(state: &AppState, device_name: &str) -> ApiResult<()> {
    match devices::get_device(&state.db, device_name).await? {
        Some(device) if device.status == DeviceStatus::Provisioned => Ok(()),
        _ => Err(AppError::precondition_failed(format!(
            "device {device_name} is not onboarded"
        ))),
    }
}

async fn try_apply(
    state: &AppState,
    control: ConnectionControl,
    definition: &ConnectionDefinition,
    device_name: &str,
) -> Result<Applied, ApplyError> {
    let name = definition.connection_name.as_str();
    let current = connections::get_connection(&state.db, name).await?;

    if let Some(record) = &current {
        if record.device_name != device_name {
            return Err(AppError::precondition_failed(format!(
                "connection {name} is bound to device {}",
                record.device_name
            ))
            .into());
        }
    }

    let from = current
        .as_ref()
        .map(|record| record.state.into())
        .unwrap_or(api::ConnectionState::Undeployed);
    let transition = state_machine::transition(from, control)?;
    let target = db::ConnectionState::from_api(transition.to)
        .ok_or_else(|| AppError::internal("transition targets an unstorable state"))?;
    let now = db::now();

    let mut tx = state.db.begin().await?;
    let record = match current {
        None => {
            connections::insert_connection(
                &mut tx,
                &NewConnection {
                    connection_name: name.to_string(),
                    state: target,
                    device_name: device_name.to_string(),
                    definition: definition.clone(),
                    last_control: control.into(),
                    created_at: now,
                },
            )
            .await?
        }
        Some(existing) => {
            let write = ConnectionWrite {
                state: target,
                definition: transition
                    .replaces_definition()
                    .then(|| definition.clone()),
                last_control: control.into(),
                bump_version: transition.kind == TransitionKind::Advance,
                updated_at: now,
            };
            connections::compare_and_write(&mut tx, name, existing.version, &write)
                .await?
                .ok_or(ApplyError::Conflict)?
        }
    };

    match transition.kind {
        TransitionKind::Advance => {
            jobs::supersede_pending(&mut tx, name, None, now).await?;
        }
        TransitionKind::Redispatch => {
            jobs::supersede_pending(&mut tx, name, Some(control.into()), now).await?;
        }
        TransitionKind::Probe => {}
    }

    let job_id = Uuid::new_v4();
    let command = FleetCommand {
        control,
        job_id,
        dispatched_at: now,
        attempt: 1,
        restart_session: transition.restart_session,
        definition: record.definition.0.clone(),
    };
    jobs::insert_job(
        &mut tx,
        &NewDeploymentJob {
            id: job_id,
            connection_name: name.to_string(),
            control: control.into(),
            dispatched_at: now,
            attempt: 1,
            restart_session: transition.restart_session,
            command: command.clone(),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(Applied {
        transition,
        record,
        command,
    })
}

/// Publishes a command whose job row is already committed. A transport
/// failure marks the job FAILED instead of failing the request.
pub(crate) async fn dispatch_recorded(
    state: &AppState,
    command: &FleetCommand,
) -> ApiResult<api::JobStatus> {
    match state.fleet.dispatch(command).await {
        Ok(()) => Ok(api::JobStatus::Pending),
        Err(err) => {
            warn!(
                connection = %command.definition.connection_name,
                job_id = %command.job_id,
                error = %err,
                "command dispatch failed"
            );
            jobs::fail_pending_job(&state.db, command.job_id, &err.to_string(), db::now())
                .await?;
            Ok(api::JobStatus::Failed)
        }
    }
}

pub async fn list_connections(
    state: &AppState,
    filter: Option<api::ConnectionState>,
    limit: u32,
    offset: u32,
) -> ApiResult<Page<ConnectionSummary>> {
    let items = match filter {
        // Undeployed connections have no row.
        Some(api::ConnectionState::Undeployed) => Vec::new(),
        other => {
            connections::list_connections(
                &state.db,
                other.and_then(db::ConnectionState::from_api),
                limit,
                offset,
            )
            .await?
        }
    };

    Ok(Page {
        limit,
        offset,
        items: items.into_iter().map(Into::into).collect(),
    })
}

pub async fn get_connection(state: &AppState, name: &str) -> ApiResult<ConnectionDetail> {
    Ok(load_connection(state, name).await?.into())
}

pub async fn list_jobs(
    state: &AppState,
    name: &str,
    limit: u32,
    offset: u32,
) -> ApiResult<Page<DeploymentJobView>> {
    load_connection(state, name).await?;
    let items = jobs::list_jobs_for_connection(&state.db, name, limit, offset).await?;
    Ok(Page {
        limit,
        offset,
        items: items.into_iter().map(Into::into).collect(),
    })
}

pub async fn list_logs(
    state: &AppState,
    name: &str,
    since: Option<DateTime<Utc>>,
    limit: u32,
) -> ApiResult<Vec<ConnectionLogEntry>> {
    load_connection(state, name).await?;
    let entries = logs::list_logs(&state.db, name, since, limit).await?;
    Ok(entries.into_iter().map(Into::into).collect())
}

async fn load_connection(state: &AppState, name: &str) -> ApiResult<ConnectionRecord> {
    connections::get_connection(&state.db, name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("connection {name} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::JobStatus;
    use crate::services::test_support::{provision_device, setup_state};
    use axum::http::StatusCode;
    use common::api::{
        ConnectionState, DestinationFlags, NumericField, OpcUaDefinition, Protocol,
    };

    fn opc_ua_request(control: ConnectionControl, port: &str) -> ConnectionControlRequest {
        ConnectionControlRequest {
            control,
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
                    port: Some(NumericField::from(port)),
                }),
                destinations: DestinationFlags {
                    iot_topic: Some(true),
                    ..DestinationFlags::default()
                },
                ..ConnectionDefinition::default()
            },
        }
    }

    fn minimal_request(control: ConnectionControl) -> ConnectionControlRequest {
        ConnectionControlRequest {
            control,
            definition: ConnectionDefinition {
                connection_name: "press-01".into(),
                greengrass_core_device_name: Some("gw-01".into()),
                ..ConnectionDefinition::default()
            },
        }
    }

    #[tokio::test]
    async fn deploy_then_start_dispatches_one_command_each() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        let mut rx = state.fleet.transport().subscribe();

        let deployed = submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");
        assert_eq!(deployed.previous_state, ConnectionState::Undeployed);
        assert_eq!(deployed.state, ConnectionState::Deployed);
        assert_eq!(deployed.version, 1);
        rx.recv().await.expect("deploy published");

        let started = submit_control(&state, opc_ua_request(ConnectionControl::Start, "4840"))
            .await
            .expect("start");
        assert_eq!(started.state, ConnectionState::Running);
        assert_eq!(started.version, 2);
        assert_eq!(started.job_status, api::JobStatus::Pending);

        let message = rx.recv().await.expect("start published");
        assert_eq!(message.topic, "fleet/job/press-01");
        assert!(rx.try_recv().is_err());

        let deploy_job = jobs::get_job(&state.db, deployed.job_id)
            .await
            .expect("get")
            .expect("job");
        assert_eq!(deploy_job.status, JobStatus::Superseded);
    }

    #[tokio::test]
    async fn invalid_port_changes_nothing() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");
        let mut rx = state.fleet.transport().subscribe();

        let err = submit_control(&state, opc_ua_request(ConnectionControl::Start, "99999"))
            .await
            .expect_err("port out of range");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.fields.as_ref().expect("fields").contains_key("port"));

        let stored = connections::get_connection(&state.db, "press-01")
            .await
            .expect("get")
            .expect("connection");
        assert_eq!(stored.state, db::ConnectionState::Deployed);
        assert_eq!(stored.version, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_needs_only_identity() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");
        submit_control(&state, opc_ua_request(ConnectionControl::Start, "4840"))
            .await
            .expect("start");

        let deleted = submit_control(&state, minimal_request(ConnectionControl::Delete))
            .await
            .expect("delete");
        assert_eq!(deleted.previous_state, ConnectionState::Running);
        assert_eq!(deleted.state, ConnectionState::Deleted);

        let err = submit_control(&state, opc_ua_request(ConnectionControl::Start, "4840"))
            .await
            .expect_err("deleted is terminal");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);

        let mut rx = state.fleet.transport().subscribe();
        let err = submit_control(&state, minimal_request(ConnectionControl::Delete))
            .await
            .expect_err("second delete");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
        assert!(rx.try_recv().is_err());
        let jobs = list_jobs(&state, "press-01", 10, 0).await.expect("jobs");
        assert_eq!(jobs.items.len(), 3);
    }

    #[tokio::test]
    async fn redispatch_keeps_version_and_definition() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");
        let started = submit_control(&state, opc_ua_request(ConnectionControl::Start, "4840"))
            .await
            .expect("start");

        let again = submit_control(&state, opc_ua_request(ConnectionControl::Start, "4841"))
            .await
            .expect("start again");
        assert!(again.redispatch);
        assert_eq!(again.version, started.version);
        assert_ne!(again.job_id, started.job_id);

        let stored = connections::get_connection(&state.db, "press-01")
            .await
            .expect("get")
            .expect("connection");
        let port = stored
            .definition
            .0
            .opc_ua
            .and_then(|ua| ua.port)
            .and_then(|p| p.as_integer());
        assert_eq!(port, Some(4840));
    }

    #[tokio::test]
    async fn unprovisioned_device_blocks_deploy() {
        let state = setup_state().await;
        let err = submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect_err("device not onboarded");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
        assert!(connections::get_connection(&state.db, "press-01")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn connection_stays_bound_to_its_device() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        provision_device(&state, "gw-02").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");

        let mut request = opc_ua_request(ConnectionControl::Update, "4840");
        request.definition.greengrass_core_device_name = Some("gw-02".into());
        let err = submit_control(&state, request)
            .await
            .expect_err("device switch");
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn concurrent_controls_on_one_connection_serialize() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");

        let updates = (0..3).map(|i| {
            let state = state.clone();
            tokio::spawn(async move {
                let port = format!("{}", 4840 + i);
                submit_control(&state, opc_ua_request(ConnectionControl::Update, &port)).await
            })
        });
        let mut accepted = Vec::new();
        for update in updates.collect::<Vec<_>>() {
            match update.await.expect("join") {
                Ok(result) => accepted.push(result.version),
                Err(err) => assert_eq!(err.status, StatusCode::CONFLICT),
            }
        }
        assert!(!accepted.is_empty());
        accepted.sort_unstable();
        accepted.dedup();

        let stored = connections::get_connection(&state.db, "press-01")
            .await
            .expect("get")
            .expect("connection");
        assert_eq!(stored.version, 1 + accepted.len() as i64);
        assert_eq!(accepted.last().copied(), Some(stored.version));
    }

    #[tokio::test]
    async fn queries_page_and_filter() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        submit_control(&state, opc_ua_request(ConnectionControl::Deploy, "4840"))
            .await
            .expect("deploy");

        let running = list_connections(&state, Some(ConnectionState::Running), 50, 0)
            .await
            .expect("list");
        assert!(running.items.is_empty());
        let deployed = list_connections(&state, Some(ConnectionState::Deployed), 50, 0)
            .await
            .expect("list");
        assert_eq!(deployed.items.len(), 1);
        assert_eq!(deployed.items[0].protocol, Some(Protocol::OpcUa));

        let jobs = list_jobs(&state, "press-01", 10, 0).await.expect("jobs");
        assert_eq!(jobs.items.len(), 1);

        let missing = get_connection(&state, "nope").await.expect_err("missing");
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
