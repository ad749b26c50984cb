use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use common::api;
use sqlx::SqlitePool;

pub mod audit;
pub mod connections;
pub mod devices;
pub mod jobs;
pub mod logs;
pub mod migrations;
pub mod provisioning;

pub type Db = SqlitePool;

pub use connections::{ConnectionRecord, ConnectionState, ConnectionWrite, NewConnection};
pub use devices::{DeviceRecord, DeviceStatus, ProvisionedDevice};
pub use jobs::{Control, DeploymentJobRecord, JobStatus, NewDeploymentJob};
pub use logs::{ConnectionLogRecord, LogLevel, NewConnectionLog};
pub use migrations::{MigrationLabel, MigrationRunOutcome, MigrationSnapshot};

/// Current time truncated to milliseconds so stored timestamps survive a
/// JSON round trip unchanged (acknowledgements echo `dispatchedAt`).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// `secs` before `at`, saturating at the earliest representable instant.
pub fn seconds_before(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|window| at.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl From<api::ConnectionControl> for Control {
    fn from(control: api::ConnectionControl) -> Self {
        match control {
            api::ConnectionControl::Deploy => Control::Deploy,
            api::ConnectionControl::Start => Control::Start,
            api::ConnectionControl::Stop => Control::Stop,
            api::ConnectionControl::Update => Control::Update,
            api::ConnectionControl::Push => Control::Push,
            api::ConnectionControl::Pull => Control::Pull,
            api::ConnectionControl::Delete => Control::Delete,
        }
    }
}

impl From<Control> for api::ConnectionControl {
    fn from(control: Control) -> Self {
        match control {
            Control::Deploy => api::ConnectionControl::Deploy,
            Control::Start => api::ConnectionControl::Start,
            Control::Stop => api::ConnectionControl::Stop,
            Control::Update => api::ConnectionControl::Update,
            Control::Push => api::ConnectionControl::Push,
            Control::Pull => api::ConnectionControl::Pull,
            Control::Delete => api::ConnectionControl::Delete,
        }
    }
}

impl From<ConnectionState> for api::ConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Deployed => api::ConnectionState::Deployed,
            ConnectionState::Running => api::ConnectionState::Running,
            ConnectionState::Stopped => api::ConnectionState::Stopped,
            ConnectionState::Deleted => api::ConnectionState::Deleted,
        }
    }
}

impl ConnectionState {
    /// Persisted form of a lifecycle state. `Undeployed` is never stored; it
    /// is the absence of a row.
    pub fn from_api(state: api::ConnectionState) -> Option<Self> {
        match state {
            api::ConnectionState::Undeployed => None,
            api::ConnectionState::Deployed => Some(ConnectionState::Deployed),
            api::ConnectionState::Running => Some(ConnectionState::Running),
            api::ConnectionState::Stopped => Some(ConnectionState::Stopped),
            api::ConnectionState::Deleted => Some(ConnectionState::Deleted),
        }
    }
}

impl From<JobStatus> for api::JobStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => api::JobStatus::Pending,
            JobStatus::Acked => api::JobStatus::Acked,
            JobStatus::Failed => api::JobStatus::Failed,
            JobStatus::TimedOut => api::JobStatus::TimedOut,
            JobStatus::Superseded => api::JobStatus::Superseded,
        }
    }
}

impl From<DeviceStatus> for api::DeviceStatus {
    fn from(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Unprovisioned => api::DeviceStatus::Unprovisioned,
            DeviceStatus::Provisioned => api::DeviceStatus::Provisioned,
            DeviceStatus::Failed => api::DeviceStatus::Failed,
        }
    }
}

impl From<LogLevel> for api::LogLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info => api::LogLevel::Info,
            LogLevel::Warn => api::LogLevel::Warn,
            LogLevel::Error => api::LogLevel::Error,
        }
    }
}

impl From<ConnectionRecord> for api::ConnectionSummary {
    fn from(record: ConnectionRecord) -> Self {
        api::ConnectionSummary {
            protocol: record.protocol(),
            connection_name: record.connection_name,
            state: record.state.into(),
            version: record.version,
            device_name: record.device_name,
            last_control: record.last_control.map(Into::into),
            last_health_at: record.last_health_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<ConnectionRecord> for api::ConnectionDetail {
    fn from(record: ConnectionRecord) -> Self {
        let definition = record.definition.0.clone();
        api::ConnectionDetail {
            summary: record.into(),
            definition,
        }
    }
}

impl From<DeploymentJobRecord> for api::DeploymentJobView {
    fn from(record: DeploymentJobRecord) -> Self {
        api::DeploymentJobView {
            id: record.id,
            connection_name: record.connection_name,
            control: record.control.into(),
            dispatched_at: record.dispatched_at,
            status: record.status.into(),
            attempt: u32::try_from(record.attempt).unwrap_or(u32::MAX),
            last_error: record.last_error,
            resolved_at: record.resolved_at,
        }
    }
}

impl From<DeviceRecord> for api::DeviceView {
    fn from(record: DeviceRecord) -> Self {
        api::DeviceView {
            device_name: record.device_name,
            status: record.status.into(),
            certificate_arn: record.certificate_arn,
            thing_name: record.thing_name,
            role_alias: record.role_alias,
            resource_bucket: record.resource_bucket,
            last_failed_step: record.last_failed_step,
            last_error: record.last_error,
            provisioned_at: record.provisioned_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<ConnectionLogRecord> for api::ConnectionLogEntry {
    fn from(record: ConnectionLogRecord) -> Self {
        api::ConnectionLogEntry {
            connection_name: record.connection_name,
            timestamp: record.timestamp,
            level: record.level.into(),
            source: record.source,
            message: record.message,
            payload: record.payload.map(|json| json.0),
        }
    }
}
