//! Connection, device and deployment-job DTOs shared by the orchestrator and
//! edge gateways.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Industrial protocol spoken by a connection.
///
/// The wire form is asymmetric for historical compatibility: OPC DA travels
/// as `opcda` while OPC UA keeps its upper-case `OPC_UA` spelling. The table
/// lives in [`Protocol::WIRE_FORMS`]; decoding accepts either spelling for
/// both protocols.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, ToSchema)]
pub enum Protocol {
    /// OPC Data Access (classic COM/DCOM servers).
    #[serde(rename = "opcda")]
    OpcDa,
    /// OPC Unified Architecture.
    #[serde(rename = "OPC_UA")]
    OpcUa,
}

impl Protocol {
    /// Serialization table from protocol to its on-the-wire spelling.
    pub const WIRE_FORMS: [(Protocol, &'static str); 2] =
        [(Protocol::OpcDa, "opcda"), (Protocol::OpcUa, "OPC_UA")];

    /// Returns the wire spelling for this protocol.
    pub fn wire_form(&self) -> &'static str {
        match self {
            Protocol::OpcDa => Self::WIRE_FORMS[0].1,
            Protocol::OpcUa => Self::WIRE_FORMS[1].1,
        }
    }

    /// Returns the canonical (upper-case) protocol name.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Protocol::OpcDa => "OPC_DA",
            Protocol::OpcUa => "OPC_UA",
        }
    }

    /// Decodes any tolerated spelling (`opcda`, `OPC_DA`, `opcua`, `OPC_UA`, ...).
    pub fn from_wire(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "OPCDA" => Some(Protocol::OpcDa),
            "OPCUA" => Some(Protocol::OpcUa),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Protocol::from_wire(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown protocol `{raw}`")))
    }
}

/// Operator verb applied to a connection.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionControl {
    /// Install the connection component on its gateway.
    Deploy,
    /// Start collecting from the machine.
    Start,
    /// Stop collecting.
    Stop,
    /// Replace the connection definition in place.
    Update,
    /// Ask the gateway to push its current configuration back.
    Push,
    /// Ask the gateway to report its runtime status.
    Pull,
    /// Remove the connection from its gateway.
    Delete,
}

impl ConnectionControl {
    /// All verbs in declaration order.
    pub const ALL: [ConnectionControl; 7] = [
        ConnectionControl::Deploy,
        ConnectionControl::Start,
        ConnectionControl::Stop,
        ConnectionControl::Update,
        ConnectionControl::Push,
        ConnectionControl::Pull,
        ConnectionControl::Delete,
    ];

    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionControl::Deploy => "deploy",
            ConnectionControl::Start => "start",
            ConnectionControl::Stop => "stop",
            ConnectionControl::Update => "update",
            ConnectionControl::Push => "push",
            ConnectionControl::Pull => "pull",
            ConnectionControl::Delete => "delete",
        }
    }

    /// Verbs that only need the connection identity and target device.
    pub fn requires_full_definition(&self) -> bool {
        !matches!(
            self,
            ConnectionControl::Delete | ConnectionControl::Stop | ConnectionControl::Pull
        )
    }
}

impl fmt::Display for ConnectionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a control verb cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownControl(pub String);

impl fmt::Display for UnknownControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown connection control `{}`", self.0)
    }
}

impl std::error::Error for UnknownControl {}

impl FromStr for ConnectionControl {
    type Err = UnknownControl;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        ConnectionControl::ALL
            .into_iter()
            .find(|control| control.as_str() == lowered)
            .ok_or_else(|| UnknownControl(raw.to_string()))
    }
}

impl<'de> Deserialize<'de> for ConnectionControl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    /// No record exists yet (or nothing was ever deployed).
    Undeployed,
    /// Component installed on the gateway, not collecting.
    Deployed,
    /// Collecting.
    Running,
    /// Installed but stopped.
    Stopped,
    /// Removed; terminal.
    Deleted,
}

impl ConnectionState {
    /// Returns the canonical upper-case representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Undeployed => "UNDEPLOYED",
            ConnectionState::Deployed => "DEPLOYED",
            ConnectionState::Running => "RUNNING",
            ConnectionState::Stopped => "STOPPED",
            ConnectionState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution status of a dispatched command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Published, waiting for the gateway to acknowledge.
    Pending,
    /// Gateway acknowledged success.
    Acked,
    /// Gateway reported failure, or publishing failed.
    Failed,
    /// No acknowledgement arrived in time.
    TimedOut,
    /// A later accepted transition replaced this command.
    Superseded,
}

impl JobStatus {
    /// Returns the canonical wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Acked => "ACKED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Superseded => "SUPERSEDED",
        }
    }

    /// Whether the job reached a final status.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Provisioning status of an edge gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    /// Known, not yet provisioned.
    Unprovisioned,
    /// All onboarding steps completed.
    Provisioned,
    /// The last onboarding attempt failed.
    Failed,
}

impl DeviceStatus {
    /// Returns the canonical upper-case representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unprovisioned => "UNPROVISIONED",
            DeviceStatus::Provisioned => "PROVISIONED",
            DeviceStatus::Failed => "FAILED",
        }
    }
}

/// A numeric field that may arrive as a JSON number or as text.
///
/// Text that does not parse is kept verbatim so validation can report it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumericField {
    /// Parsed number; integers keep their integer encoding.
    Number(serde_json::Number),
    /// Unparsed text.
    Text(String),
}

impl NumericField {
    /// Returns the value as `f64` when it is (or parses to) a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NumericField::Number(n) => n.as_f64(),
            NumericField::Text(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite()),
        }
    }

    /// Returns the value as an integer when it has no fractional part.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            NumericField::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|value| value.fract() == 0.0 && value.abs() < i64::MAX as f64)
                    .map(|value| value as i64)
            }),
            NumericField::Text(raw) => {
                let trimmed = raw.trim();
                trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|value| value.is_finite() && value.fract() == 0.0)
                        .map(|value| value as i64)
                })
            }
        }
    }

    /// Whether the field is empty text.
    pub fn is_blank(&self) -> bool {
        matches!(self, NumericField::Text(raw) if raw.trim().is_empty())
    }
}

impl From<i64> for NumericField {
    fn from(value: i64) -> Self {
        NumericField::Number(value.into())
    }
}

impl From<&str> for NumericField {
    fn from(value: &str) -> Self {
        NumericField::Text(value.to_string())
    }
}

/// OPC DA connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpcDaDefinition {
    /// IPv4 address of the machine hosting the OPC DA server.
    #[serde(default)]
    #[schema(example = "10.0.0.5")]
    pub machine_ip: String,
    /// ProgID of the OPC DA server.
    #[serde(default)]
    #[schema(example = "Matrikon.OPC.Simulation.1")]
    pub server_name: String,
    /// Seconds between reads (0.5 to 30).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>, example = 1)]
    pub interval: Option<NumericField>,
    /// Reads per publish (integer, 1 to 30).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<i64>, example = 20)]
    pub iterations: Option<NumericField>,
    /// Wildcard tag patterns to browse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_tags: Option<Vec<String>>,
    /// Explicit tag names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// OPC UA connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpcUaDefinition {
    /// IPv4 address of the OPC UA server.
    #[serde(default)]
    #[schema(example = "10.0.0.5")]
    pub machine_ip: String,
    /// Application name of the OPC UA server.
    #[serde(default)]
    pub server_name: String,
    /// Server port; absent means the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<i64>, example = 4840)]
    pub port: Option<NumericField>,
}

/// Destinations the gateway forwards collected data to.
///
/// Only flags present in the input are emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
pub struct DestinationFlags {
    /// Forward to the site-asset telemetry service.
    #[serde(
        rename = "sendDataToIoTSiteWise",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub iot_sitewise: Option<bool>,
    /// Forward to a message-broker topic.
    #[serde(
        rename = "sendDataToIoTTopic",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub iot_topic: Option<bool>,
    /// Forward to the tenant data stream.
    #[serde(
        rename = "sendDataToKinesisDataStreams",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kinesis_data_streams: Option<bool>,
    /// Forward to the time-series database.
    #[serde(
        rename = "sendDataToTimestream",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestream: Option<bool>,
}

impl DestinationFlags {
    /// Whether at least one destination is enabled.
    pub fn any_enabled(&self) -> bool {
        [
            self.iot_sitewise,
            self.iot_topic,
            self.kinesis_data_streams,
            self.timestream,
        ]
        .into_iter()
        .any(|flag| flag == Some(true))
    }
}

/// Definition of one machine/process/site connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDefinition {
    /// Unique, immutable connection identifier.
    #[serde(default)]
    #[schema(example = "press-01")]
    pub connection_name: String,
    /// Protocol; decides which payload is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Gateway that runs the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "gw-01")]
    pub greengrass_core_device_name: Option<String>,
    /// Site label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    /// Area label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    /// Process label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Machine label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    /// OPC DA parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_da: Option<OpcDaDefinition>,
    /// OPC UA parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_ua: Option<OpcUaDefinition>,
    /// Destination flags (flattened `sendDataTo*` keys).
    #[serde(flatten)]
    pub destinations: DestinationFlags,
}

/// Operator request applying a control verb to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionControlRequest {
    /// Verb to apply.
    pub control: ConnectionControl,
    /// Connection definition (flattened alongside `control`).
    #[serde(flatten)]
    pub definition: ConnectionDefinition,
}

/// Accepted transition returned to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlAccepted {
    /// Connection the verb was applied to.
    pub connection_name: String,
    /// Applied verb.
    pub control: ConnectionControl,
    /// State before the verb.
    pub previous_state: ConnectionState,
    /// State after the verb.
    pub state: ConnectionState,
    /// Record version after the verb.
    pub version: i64,
    /// Deployment job tracking the outbound command.
    pub job_id: Uuid,
    /// Dispatch timestamp (part of the acknowledgement key).
    pub dispatched_at: DateTime<Utc>,
    /// Job status right after publishing.
    pub job_status: JobStatus,
    /// True when the verb re-dispatched without changing persisted state.
    pub redispatch: bool,
}

/// Command published on `fleet/job/{connectionName}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FleetCommand {
    /// Verb the gateway must execute.
    pub control: ConnectionControl,
    /// Deployment job id.
    pub job_id: Uuid,
    /// Dispatch timestamp; echoed back in the acknowledgement.
    pub dispatched_at: DateTime<Utc>,
    /// Dispatch attempt, starting at 1.
    pub attempt: u32,
    /// Ask the gateway to restart a running collection session.
    #[serde(default, skip_serializing_if = "is_false")]
    pub restart_session: bool,
    /// Definition the verb applies to.
    #[serde(flatten)]
    pub definition: ConnectionDefinition,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Result reported by a gateway for a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Command executed.
    Success,
    /// Command failed on the gateway.
    Failure,
}

/// Acknowledgement for one command, keyed by `(connectionName, control, dispatchedAt)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    /// Acknowledged verb.
    pub control: ConnectionControl,
    /// Dispatch timestamp copied from the command.
    pub dispatched_at: DateTime<Utc>,
    /// Outcome.
    pub status: AckStatus,
    /// Optional detail from the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Periodic health report from a running connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// When the gateway produced the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    /// Free-form status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Message published by a gateway on `fleet/info/{connectionName}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InfoMessage {
    /// Command acknowledgement.
    Ack(CommandAck),
    /// Health report.
    Health(HealthReport),
}

/// Failure report published on `fleet/error/{connectionName}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Human-readable failure description.
    pub message: String,
    /// When the failure happened on the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// Connection summary returned by list/get endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    /// Connection identifier.
    pub connection_name: String,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Optimistic-concurrency version.
    pub version: i64,
    /// Target gateway.
    pub device_name: String,
    /// Protocol of the stored definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Last accepted verb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_control: Option<ConnectionControl>,
    /// Last health report received from the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Connection summary plus its stored definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    /// Summary fields.
    #[serde(flatten)]
    pub summary: ConnectionSummary,
    /// Stored canonical definition.
    pub definition: ConnectionDefinition,
}

/// Paged list response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Page<T> {
    /// Maximum number of items returned.
    pub limit: u32,
    /// Offset into the result set.
    pub offset: u32,
    /// Returned items.
    pub items: Vec<T>,
}

/// Deployment job as exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJobView {
    /// Job identifier.
    pub id: Uuid,
    /// Connection the command targets.
    pub connection_name: String,
    /// Dispatched verb.
    pub control: ConnectionControl,
    /// Dispatch timestamp.
    pub dispatched_at: DateTime<Utc>,
    /// Current status.
    pub status: JobStatus,
    /// Dispatch attempt, starting at 1.
    pub attempt: u32,
    /// Failure detail, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the job left PENDING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Gateway registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    /// Gateway name.
    pub device_name: String,
    /// Provisioning status.
    pub status: DeviceStatus,
    /// Identifier of the issued device certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    /// Thing the certificate is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing_name: Option<String>,
    /// Role alias the gateway assumes for cloud credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_alias: Option<String>,
    /// Per-fleet resource bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_bucket: Option<String>,
    /// Step that failed during the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_step: Option<String>,
    /// Error from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the device reached PROVISIONED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Result of an onboarding call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResult {
    /// Registry entry after onboarding.
    pub device: DeviceView,
    /// True when the device was already provisioned and nothing ran.
    pub already_provisioned: bool,
    /// PEM certificate for the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pem: Option<String>,
    /// PKCS#8 PEM private key for `certificate_pem`. Returned once, by the
    /// call that issued the certificate; the orchestrator keeps no copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,
}

/// Severity of a connection log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Log entry recorded for a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionLogEntry {
    /// Connection the entry belongs to.
    pub connection_name: String,
    /// Entry timestamp.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Where the entry came from: `ack`, `health`, `device` or `dispatch`.
    pub source: String,
    /// Message text.
    pub message: String,
    /// Raw payload, when the entry came from a fleet message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
}

/// Health response for `/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct HealthResponse {
    /// Overall status (`ok`).
    pub status: String,
    /// Service version.
    pub version: String,
}
