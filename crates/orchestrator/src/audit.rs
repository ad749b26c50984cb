//! Operator audit trail, stored in the `audit_logs` table.

use crate::persistence::{self, audit::NewAuditLog, Db};

const MAX_PAYLOAD_LEN: usize = 2048;

#[derive(Debug, Clone)]
pub struct AuditActor {
    pub token_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditContext<'a> {
    /// Connection name, device name or job id.
    pub resource_id: Option<&'a str>,
    pub actor: Option<&'a AuditActor>,
    pub request_id: Option<&'a str>,
    pub payload: Option<String>,
}

pub async fn record(
    db: &Db,
    action: &str,
    resource_type: &str,
    status: AuditStatus,
    context: AuditContext<'_>,
) -> crate::Result<()> {
    let payload = context.payload.as_deref().map(truncate_payload);
    persistence::audit::insert_audit_log(
        db,
        &NewAuditLog {
            action,
            resource_type,
            resource_id: context.resource_id,
            status: status.as_str(),
            actor_token_hash: context.actor.and_then(|a| a.token_hash.as_deref()),
            request_id: context.request_id,
            payload: payload.as_deref(),
            created_at: persistence::now(),
        },
    )
    .await
}

pub fn truncate_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    match trimmed.char_indices().nth(MAX_PAYLOAD_LEN) {
        Some((cut, _)) => format!("{}...<truncated>", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
