use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConnectionLogRecord {
    pub id: i64,
    pub connection_name: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[sqlx(rename = "payload_json")]
    pub payload: Option<Json<serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub struct NewConnectionLog {
    pub connection_name: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

pub async fn append_log(pool: &Db, entry: &NewConnectionLog) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO connection_logs (
            connection_name,
            timestamp,
            level,
            source,
            message,
            payload_json
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&entry.connection_name)
    .bind(entry.timestamp)
    .bind(entry.level)
    .bind(&entry.source)
    .bind(&entry.message)
    .bind(entry.payload.as_ref().map(Json))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent entries first.
pub async fn list_logs(
    pool: &Db,
    connection_name: &str,
    since: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<ConnectionLogRecord>> {
    let records = sqlx::query_as::<_, ConnectionLogRecord>(
        r#"
        SELECT id, connection_name, timestamp, level, source, message, payload_json
        FROM connection_logs
        WHERE connection_name = ?1
          AND (?2 IS NULL OR timestamp >= ?2)
        ORDER BY timestamp DESC, id DESC
        LIMIT ?3
        "#,
    )
    .bind(connection_name)
    .bind(since)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn prune_logs_before(pool: &Db, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM connection_logs WHERE timestamp < ?1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
