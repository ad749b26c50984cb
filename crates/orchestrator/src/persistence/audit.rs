use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRecord {
    pub id: i64,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub status: String,
    pub actor_token_hash: Option<String>,
    pub request_id: Option<String>,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog<'a> {
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub status: &'a str,
    pub actor_token_hash: Option<&'a str>,
    pub request_id: Option<&'a str>,
    pub payload: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_audit_log(pool: &Db, entry: &NewAuditLog<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            action,
            resource_type,
            resource_id,
            status,
            actor_token_hash,
            request_id,
            payload,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(entry.action)
    .bind(entry.resource_type)
    .bind(entry.resource_id)
    .bind(entry.status)
    .bind(entry.actor_token_hash)
    .bind(entry.request_id)
    .bind(entry.payload)
    .bind(entry.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_audit_logs(pool: &Db, limit: u32) -> Result<Vec<AuditLogRecord>> {
    let records = sqlx::query_as::<_, AuditLogRecord>(
        r#"
        SELECT id, action, resource_type, resource_id, status, actor_token_hash,
               request_id, payload, created_at
        FROM audit_logs
        ORDER BY id DESC
        LIMIT ?1
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(records)
}
