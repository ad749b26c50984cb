use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use crate::config::FleetConfig;
use crate::metrics;
use crate::persistence::{self as db, jobs, logs, LogLevel, NewConnectionLog};
use crate::Result;

pub async fn ack_timeout_loop(db: db::Db, fleet: FleetConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(fleet.sweep_interval_secs.max(1)));

    loop {
        interval.tick().await;
        match sweep_ack_timeouts(&db, &fleet, db::now()).await {
            Ok(0) => {}
            Ok(timed_out) => warn!(timed_out, "jobs timed out waiting for acknowledgement"),
            Err(err) => warn!(?err, "ack timeout sweep failed"),
        }
    }
}

/// Marks jobs still PENDING `ack_timeout` after dispatch as TIMED_OUT and
/// notes each one in the connection log.
pub async fn sweep_ack_timeouts(
    db: &db::Db,
    fleet: &FleetConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    let cutoff = db::seconds_before(now, fleet.ack_timeout_secs);
    let overdue = jobs::time_out_pending(db, cutoff, now).await?;

    for job in &overdue {
        metrics::record_job_resolved(common::api::JobStatus::TimedOut);
        logs::append_log(
            db,
            &NewConnectionLog {
                connection_name: job.connection_name.clone(),
                timestamp: now,
                level: LogLevel::Warn,
                source: "dispatch".into(),
                message: format!(
                    "{} was not acknowledged within {}s",
                    common::api::ConnectionControl::from(job.control),
                    fleet.ack_timeout_secs
                ),
                payload: Some(json!({
                    "jobId": job.id,
                    "attempt": job.attempt,
                    "dispatchedAt": job.dispatched_at,
                })),
            },
        )
        .await?;
    }

    Ok(overdue.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::persistence::{migrations, JobStatus};
    use crate::services::connections::submit_control;
    use crate::services::test_support::{provision_device, setup_state};
    use common::api::{ConnectionControl, ConnectionControlRequest, ConnectionDefinition};

    #[tokio::test]
    async fn overdue_jobs_time_out_and_are_logged() {
        let state = setup_state().await;
        provision_device(&state, "gw-01").await;
        let mut definition = ConnectionDefinition {
            connection_name: "press-01".into(),
            greengrass_core_device_name: Some("gw-01".into()),
            protocol: Some(common::api::Protocol::OpcUa),
            site_name: Some("plant-7".into()),
            area: Some("stamping".into()),
            process: Some("press".into()),
            machine_name: Some("press_01".into()),
            opc_ua: Some(common::api::OpcUaDefinition {
                machine_ip: "10.0.0.5".into(),
                server_name: "srv".into(),
                port: None,
            }),
            ..ConnectionDefinition::default()
        };
        definition.destinations.iot_sitewise = Some(true);
        let accepted = submit_control(
            &state,
            ConnectionControlRequest {
                control: ConnectionControl::Deploy,
                definition,
            },
        )
        .await
        .expect("deploy");

        let fresh = sweep_ack_timeouts(&state.db, &state.fleet_config, db::now())
            .await
            .expect("sweep");
        assert_eq!(fresh, 0);

        let later = db::now() + ChronoDuration::seconds(state.fleet_config.ack_timeout_secs as i64 + 1);
        let swept = sweep_ack_timeouts(&state.db, &state.fleet_config, later)
            .await
            .expect("sweep");
        assert_eq!(swept, 1);

        let job = jobs::get_job(&state.db, accepted.job_id)
            .await
            .expect("get")
            .expect("job");
        assert_eq!(job.status, JobStatus::TimedOut);
        let entries = logs::list_logs(&state.db, "press-01", None, 10).await.expect("logs");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn empty_database_sweeps_nothing() {
        let pool = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&pool).await.expect("migrations");
        let swept = sweep_ack_timeouts(&pool, &FleetConfig::default(), db::now())
            .await
            .expect("sweep");
        assert_eq!(swept, 0);
    }

    #[tokio::test]
    async fn unbounded_timeout_sweeps_nothing() {
        let pool = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&pool).await.expect("migrations");
        let fleet = FleetConfig {
            ack_timeout_secs: u64::MAX,
            ..FleetConfig::default()
        };
        let swept = sweep_ack_timeouts(&pool, &fleet, db::now()).await.expect("sweep");
        assert_eq!(swept, 0);
    }
}
