use chrono::{DateTime, Utc};
use common::api::{ConnectionDefinition, Protocol};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, Transaction};

use super::{Control, Db};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ConnectionState {
    Deployed,
    Running,
    Stopped,
    Deleted,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRecord {
    pub connection_name: String,
    pub state: ConnectionState,
    pub version: i64,
    pub device_name: String,
    #[sqlx(rename = "protocol")]
    pub protocol_name: Option<String>,
    #[sqlx(rename = "definition_json")]
    pub definition: Json<ConnectionDefinition>,
    pub last_control: Option<Control>,
    pub last_health_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol_name.as_deref().and_then(Protocol::from_wire)
    }
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub connection_name: String,
    pub state: ConnectionState,
    pub device_name: String,
    pub definition: ConnectionDefinition,
    pub last_control: Control,
    pub created_at: DateTime<Utc>,
}

/// Conditional write applied to an existing row.
#[derive(Debug, Clone)]
pub struct ConnectionWrite {
    pub state: ConnectionState,
    /// Replacement definition; `None` keeps the stored one.
    pub definition: Option<ConnectionDefinition>,
    pub last_control: Control,
    /// Advance `version`. Re-dispatches and probes leave it untouched.
    pub bump_version: bool,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        connection_name,
        state,
        version,
        device_name,
        protocol,
        definition_json,
        last_control,
        last_health_at,
        created_at,
        updated_at
    FROM connections
"#;

pub async fn get_connection(pool: &Db, connection_name: &str) -> Result<Option<ConnectionRecord>> {
    let record = sqlx::query_as::<_, ConnectionRecord>(&format!(
        "{SELECT_COLUMNS} WHERE connection_name = ?1"
    ))
    .bind(connection_name)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

async fn get_connection_tx(
    tx: &mut Transaction<'_, Sqlite>,
    connection_name: &str,
) -> Result<Option<ConnectionRecord>> {
    let record = sqlx::query_as::<_, ConnectionRecord>(&format!(
        "{SELECT_COLUMNS} WHERE connection_name = ?1"
    ))
    .bind(connection_name)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(record)
}

/// Inserts the first row for a connection. A concurrent insert of the same
/// name fails with a unique violation.
pub async fn insert_connection(
    tx: &mut Transaction<'_, Sqlite>,
    new: &NewConnection,
) -> Result<ConnectionRecord> {
    sqlx::query(
        r#"
        INSERT INTO connections (
            connection_name,
            state,
            version,
            device_name,
            protocol,
            definition_json,
            last_control,
            created_at,
            updated_at
        )
        VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&new.connection_name)
    .bind(new.state)
    .bind(&new.device_name)
    .bind(new.definition.protocol.map(|p| p.canonical_name()))
    .bind(Json(&new.definition))
    .bind(new.last_control)
    .bind(new.created_at)
    .execute(&mut **tx)
    .await?;

    get_connection_tx(tx, &new.connection_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("connection insert did not return row"))
}

/// Applies `write` only if the stored version still equals
/// `expected_version`. Returns `None` when another writer got there first.
pub async fn compare_and_write(
    tx: &mut Transaction<'_, Sqlite>,
    connection_name: &str,
    expected_version: i64,
    write: &ConnectionWrite,
) -> Result<Option<ConnectionRecord>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE connections SET state = ");
    builder.push_bind(write.state);
    builder.push(", last_control = ");
    builder.push_bind(write.last_control);
    builder.push(", updated_at = ");
    builder.push_bind(write.updated_at);
    if let Some(definition) = &write.definition {
        builder.push(", definition_json = ");
        builder.push_bind(Json(definition.clone()));
        builder.push(", protocol = ");
        builder.push_bind(definition.protocol.map(|p| p.canonical_name()));
    }
    if write.bump_version {
        builder.push(", version = version + 1");
    }
    builder.push(" WHERE connection_name = ");
    builder.push_bind(connection_name);
    builder.push(" AND version = ");
    builder.push_bind(expected_version);

    let result = builder.build().execute(&mut **tx).await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    get_connection_tx(tx, connection_name).await
}

pub async fn list_connections(
    pool: &Db,
    state: Option<ConnectionState>,
    limit: u32,
    offset: u32,
) -> Result<Vec<ConnectionRecord>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
    if let Some(state) = state {
        builder.push(" WHERE state = ");
        builder.push_bind(state);
    }
    builder.push(" ORDER BY connection_name ASC LIMIT ");
    builder.push_bind(i64::from(limit));
    builder.push(" OFFSET ");
    builder.push_bind(i64::from(offset));

    let records = builder
        .build_query_as::<ConnectionRecord>()
        .fetch_all(pool)
        .await?;
    Ok(records)
}

pub async fn record_health(pool: &Db, connection_name: &str, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE connections
        SET last_health_at = ?2
        WHERE connection_name = ?1 AND state != 'deleted'
        "#,
    )
    .bind(connection_name)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Connections still bound to a device (anything not deleted).
pub async fn count_live_for_device(pool: &Db, device_name: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM connections
        WHERE device_name = ?1 AND state != 'deleted'
        "#,
    )
    .bind(device_name)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
