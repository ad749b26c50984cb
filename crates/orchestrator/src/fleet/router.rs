use std::sync::Arc;

use common::api::{AckStatus, CommandAck, ErrorReport, FleetCommand, HealthReport, InfoMessage};
use common::topics::{job_topic, Channel, FleetTopic};
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};

use super::transport::{FleetMessage, FleetTransport, TransportError};
use crate::metrics;
use crate::persistence::{
    self, connections, jobs, logs, Control, Db, JobStatus, LogLevel, NewConnectionLog,
};

/// Why an acknowledgement did not resolve a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredAck {
    /// The job was already acknowledged or failed.
    Duplicate,
    /// The job was superseded or timed out before the ack arrived.
    Stale,
    /// No job carries this `(connection, control, dispatchedAt)` key.
    Unknown,
}

impl IgnoredAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoredAck::Duplicate => "duplicate",
            IgnoredAck::Stale => "stale",
            IgnoredAck::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Resolved(JobStatus),
    IgnoredAck(IgnoredAck),
    HealthRecorded,
    ErrorLogged,
    /// Payload could not be decoded; a warning was logged.
    Malformed,
    /// Topic outside the channels the orchestrator consumes.
    Skipped,
}

/// Publishes commands on `fleet/job/*` and consumes `fleet/info/*` and
/// `fleet/error/*`.
#[derive(Clone)]
pub struct FleetMessageRouter {
    db: Db,
    transport: Arc<dyn FleetTransport>,
}

impl FleetMessageRouter {
    pub fn new(db: Db, transport: Arc<dyn FleetTransport>) -> Self {
        Self { db, transport }
    }

    pub fn transport(&self) -> &Arc<dyn FleetTransport> {
        &self.transport
    }

    /// Sends a recorded command to its gateway. The job row must already
    /// exist; callers mark it FAILED when this returns an error.
    pub async fn dispatch(&self, command: &FleetCommand) -> Result<(), TransportError> {
        let topic = job_topic(&command.definition.connection_name);
        let payload = serde_json::to_vec(command)?;
        self.transport.publish(&topic, payload).await?;
        metrics::record_job_dispatched(command.control);
        info!(
            connection = %command.definition.connection_name,
            job_id = %command.job_id,
            control = %command.control,
            attempt = command.attempt,
            "command dispatched"
        );
        Ok(())
    }

    pub async fn handle_message(&self, message: &FleetMessage) -> crate::Result<IngestOutcome> {
        let Some(topic) = FleetTopic::parse(&message.topic) else {
            warn!(topic = %message.topic, "ignoring message on malformed topic");
            return Ok(IngestOutcome::Skipped);
        };

        match topic.channel {
            Channel::Info => match serde_json::from_slice::<InfoMessage>(&message.payload) {
                Ok(InfoMessage::Ack(ack)) => self.handle_ack(&topic.connection_name, &ack).await,
                Ok(InfoMessage::Health(report)) => {
                    self.handle_health(&topic.connection_name, &report).await
                }
                Err(err) => Ok(malformed(&topic, &err)),
            },
            Channel::Error => match serde_json::from_slice::<ErrorReport>(&message.payload) {
                Ok(report) => self.handle_error(&topic.connection_name, report).await,
                Err(err) => Ok(malformed(&topic, &err)),
            },
            Channel::Job | Channel::Data => Ok(IngestOutcome::Skipped),
        }
    }

    async fn handle_ack(
        &self,
        connection_name: &str,
        ack: &CommandAck,
    ) -> crate::Result<IngestOutcome> {
        let control = Control::from(ack.control);
        let (status, last_error) = match ack.status {
            AckStatus::Success => (JobStatus::Acked, None),
            AckStatus::Failure => (
                JobStatus::Failed,
                Some(
                    ack.message
                        .clone()
                        .unwrap_or_else(|| "gateway reported failure".to_string()),
                ),
            ),
        };

        let resolved = jobs::resolve_by_ack_key(
            &self.db,
            connection_name,
            control,
            ack.dispatched_at,
            status,
            last_error.as_deref(),
            persistence::now(),
        )
        .await?;

        if !resolved {
            let reason = match jobs::find_by_ack_key(
                &self.db,
                connection_name,
                control,
                ack.dispatched_at,
            )
            .await?
            {
                None => IgnoredAck::Unknown,
                Some(job) if matches!(job.status, JobStatus::Superseded | JobStatus::TimedOut) => {
                    IgnoredAck::Stale
                }
                Some(_) => IgnoredAck::Duplicate,
            };
            metrics::record_ack_ignored(reason.as_str());
            debug!(
                connection = connection_name,
                control = %ack.control,
                dispatched_at = %ack.dispatched_at,
                reason = reason.as_str(),
                "acknowledgement ignored"
            );
            return Ok(IngestOutcome::IgnoredAck(reason));
        }

        metrics::record_job_resolved(status.into());

        let (level, message) = match &last_error {
            None => (LogLevel::Info, format!("{} acknowledged", ack.control)),
            Some(reason) => (LogLevel::Error, format!("{} failed: {reason}", ack.control)),
        };
        if level == LogLevel::Error {
            warn!(connection = connection_name, control = %ack.control, %message, "command failed on gateway");
        } else {
            info!(connection = connection_name, control = %ack.control, "command acknowledged");
        }
        logs::append_log(
            &self.db,
            &NewConnectionLog {
                connection_name: connection_name.to_string(),
                timestamp: persistence::now(),
                level,
                source: "ack".into(),
                message,
                payload: Some(json!({
                    "control": ack.control,
                    "dispatchedAt": ack.dispatched_at,
                })),
            },
        )
        .await?;

        Ok(IngestOutcome::Resolved(status))
    }

    async fn handle_health(
        &self,
        connection_name: &str,
        report: &HealthReport,
    ) -> crate::Result<IngestOutcome> {
        let at = report.reported_at.unwrap_or_else(persistence::now);
        let known = connections::record_health(&self.db, connection_name, at).await?;
        if !known {
            debug!(connection = connection_name, "health report for unknown or deleted connection");
        }
        logs::append_log(
            &self.db,
            &NewConnectionLog {
                connection_name: connection_name.to_string(),
                timestamp: at,
                level: LogLevel::Info,
                source: "health".into(),
                message: report
                    .message
                    .clone()
                    .unwrap_or_else(|| "health report".to_string()),
                payload: None,
            },
        )
        .await?;
        Ok(IngestOutcome::HealthRecorded)
    }

    async fn handle_error(
        &self,
        connection_name: &str,
        report: ErrorReport,
    ) -> crate::Result<IngestOutcome> {
        warn!(connection = connection_name, message = %report.message, "gateway reported error");
        logs::append_log(
            &self.db,
            &NewConnectionLog {
                connection_name: connection_name.to_string(),
                timestamp: report.reported_at.unwrap_or_else(persistence::now),
                level: LogLevel::Error,
                source: "device".into(),
                message: report.message,
                payload: report.details,
            },
        )
        .await?;
        Ok(IngestOutcome::ErrorLogged)
    }

    /// Consumes gateway traffic until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.transport.subscribe();
        info!("fleet ingest started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => match received {
                    Ok(message) => {
                        if let Err(err) = self.handle_message(&message).await {
                            warn!(?err, topic = %message.topic, "failed to process fleet message");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "fleet ingest lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("fleet ingest stopped");
    }
}

fn malformed(topic: &FleetTopic, err: &serde_json::Error) -> IngestOutcome {
    metrics::record_ack_ignored("malformed");
    warn!(topic = %topic, error = %err, "undecodable fleet message");
    IngestOutcome::Malformed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::LocalFleetBus;
    use crate::persistence::{migrations, ConnectionState, NewConnection, NewDeploymentJob};
    use chrono::{DateTime, Utc};
    use common::api::{ConnectionControl, ConnectionDefinition};
    use uuid::Uuid;

    async fn setup() -> (FleetMessageRouter, Db) {
        let db = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&db).await.expect("migrations");
        let mut tx = db.begin().await.expect("tx");
        connections::insert_connection(
            &mut tx,
            &NewConnection {
                connection_name: "press-01".into(),
                state: ConnectionState::Running,
                device_name: "gw-01".into(),
                definition: ConnectionDefinition {
                    connection_name: "press-01".into(),
                    ..Default::default()
                },
                last_control: Control::Start,
                created_at: persistence::now(),
            },
        )
        .await
        .expect("connection");
        tx.commit().await.expect("commit");
        let router = FleetMessageRouter::new(db.clone(), Arc::new(LocalFleetBus::new()));
        (router, db)
    }

    async fn pending_job(db: &Db, control: Control, dispatched_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let mut tx = db.begin().await.expect("tx");
        jobs::insert_job(
            &mut tx,
            &NewDeploymentJob {
                id,
                connection_name: "press-01".into(),
                control,
                dispatched_at,
                attempt: 1,
                restart_session: false,
                command: FleetCommand {
                    control: control.into(),
                    job_id: id,
                    dispatched_at,
                    attempt: 1,
                    restart_session: false,
                    definition: ConnectionDefinition {
                        connection_name: "press-01".into(),
                        ..Default::default()
                    },
                },
            },
        )
        .await
        .expect("job");
        tx.commit().await.expect("commit");
        id
    }

    fn info_message(body: serde_json::Value) -> FleetMessage {
        FleetMessage {
            topic: "fleet/info/press-01".into(),
            payload: serde_json::to_vec(&body).expect("encode"),
        }
    }

    #[tokio::test]
    async fn replayed_ack_resolves_the_job_once() {
        let (router, db) = setup().await;
        let dispatched_at = persistence::now();
        let id = pending_job(&db, Control::Start, dispatched_at).await;
        let ack = info_message(json!({
            "type": "ack",
            "control": "start",
            "dispatchedAt": dispatched_at,
            "status": "success"
        }));

        let first = router.handle_message(&ack).await.expect("first");
        assert_eq!(first, IngestOutcome::Resolved(JobStatus::Acked));
        let replay = router.handle_message(&ack).await.expect("replay");
        assert_eq!(replay, IngestOutcome::IgnoredAck(IgnoredAck::Duplicate));

        let job = jobs::get_job(&db, id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Acked);
        let entries = logs::list_logs(&db, "press-01", None, 10).await.expect("logs");
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn failure_ack_marks_job_failed_and_logs_error() {
        let (router, db) = setup().await;
        let dispatched_at = persistence::now();
        let id = pending_job(&db, Control::Update, dispatched_at).await;
        let ack = info_message(json!({
            "type": "ack",
            "control": "update",
            "dispatchedAt": dispatched_at,
            "status": "failure",
            "message": "component rejected"
        }));

        let outcome = router.handle_message(&ack).await.expect("ack");
        assert_eq!(outcome, IngestOutcome::Resolved(JobStatus::Failed));
        let job = jobs::get_job(&db, id).await.expect("get").expect("job");
        assert_eq!(job.last_error.as_deref(), Some("component rejected"));
        let entries = logs::list_logs(&db, "press-01", None, 10).await.expect("logs");
        assert_eq!(entries[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn acks_for_superseded_or_unknown_jobs_are_ignored() {
        let (router, db) = setup().await;
        let dispatched_at = persistence::now();
        pending_job(&db, Control::Start, dispatched_at).await;
        let mut tx = db.begin().await.expect("tx");
        jobs::supersede_pending(&mut tx, "press-01", None, persistence::now())
            .await
            .expect("supersede");
        tx.commit().await.expect("commit");

        let stale = info_message(json!({
            "type": "ack",
            "control": "start",
            "dispatchedAt": dispatched_at,
            "status": "success"
        }));
        assert_eq!(
            router.handle_message(&stale).await.expect("stale"),
            IngestOutcome::IgnoredAck(IgnoredAck::Stale)
        );

        let unknown = info_message(json!({
            "type": "ack",
            "control": "stop",
            "dispatchedAt": dispatched_at,
            "status": "success"
        }));
        assert_eq!(
            router.handle_message(&unknown).await.expect("unknown"),
            IngestOutcome::IgnoredAck(IgnoredAck::Unknown)
        );
    }

    #[tokio::test]
    async fn health_and_error_reports_are_recorded() {
        let (router, db) = setup().await;
        let health = info_message(json!({"type": "health", "message": "collecting"}));
        assert_eq!(
            router.handle_message(&health).await.expect("health"),
            IngestOutcome::HealthRecorded
        );
        let stored = connections::get_connection(&db, "press-01")
            .await
            .expect("get")
            .expect("connection");
        assert!(stored.last_health_at.is_some());

        let error = FleetMessage {
            topic: "fleet/error/press-01".into(),
            payload: br#"{"message":"OPC server unreachable","details":{"code":5}}"#.to_vec(),
        };
        assert_eq!(
            router.handle_message(&error).await.expect("error"),
            IngestOutcome::ErrorLogged
        );
        let entries = logs::list_logs(&db, "press-01", None, 10).await.expect("logs");
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message == "OPC server unreachable"));
    }

    #[tokio::test]
    async fn malformed_and_foreign_messages_do_not_fail_ingest() {
        let (router, _db) = setup().await;
        let garbage = FleetMessage {
            topic: "fleet/info/press-01".into(),
            payload: b"not json".to_vec(),
        };
        assert_eq!(
            router.handle_message(&garbage).await.expect("garbage"),
            IngestOutcome::Malformed
        );
        let telemetry = FleetMessage {
            topic: "fleet/data/press-01".into(),
            payload: b"{}".to_vec(),
        };
        assert_eq!(
            router.handle_message(&telemetry).await.expect("data"),
            IngestOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn dispatch_publishes_on_the_job_topic() {
        let (router, _db) = setup().await;
        let mut rx = router.transport().subscribe();
        let dispatched_at = persistence::now();
        let command = FleetCommand {
            control: ConnectionControl::Pull,
            job_id: Uuid::new_v4(),
            dispatched_at,
            attempt: 1,
            restart_session: false,
            definition: ConnectionDefinition {
                connection_name: "press-01".into(),
                ..Default::default()
            },
        };
        router.dispatch(&command).await.expect("dispatch");
        let message = rx.recv().await.expect("published");
        assert_eq!(message.topic, "fleet/job/press-01");
        let decoded: FleetCommand = serde_json::from_slice(&message.payload).expect("decode");
        assert_eq!(decoded.dispatched_at, dispatched_at);
        assert_eq!(decoded.control, ConnectionControl::Pull);
    }
}
