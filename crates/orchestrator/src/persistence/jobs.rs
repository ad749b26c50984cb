use chrono::{DateTime, Utc};
use common::api::FleetCommand;
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Control {
    Deploy,
    Start,
    Stop,
    Update,
    Push,
    Pull,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Acked,
    Failed,
    TimedOut,
    Superseded,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeploymentJobRecord {
    pub id: Uuid,
    pub connection_name: String,
    pub control: Control,
    pub dispatched_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempt: i64,
    pub restart_session: bool,
    #[sqlx(rename = "command_json")]
    pub command: Json<FleetCommand>,
    pub last_error: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Attempt that replaced this job, once it has been retried.
    pub retried_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewDeploymentJob {
    pub id: Uuid,
    pub connection_name: String,
    pub control: Control,
    pub dispatched_at: DateTime<Utc>,
    pub attempt: i64,
    pub restart_session: bool,
    pub command: FleetCommand,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        connection_name,
        control,
        dispatched_at,
        status,
        attempt,
        restart_session,
        command_json,
        last_error,
        resolved_at,
        created_at,
        retried_by
    FROM deployment_jobs
"#;

pub async fn insert_job(
    tx: &mut Transaction<'_, Sqlite>,
    job: &NewDeploymentJob,
) -> Result<DeploymentJobRecord> {
    sqlx::query(
        r#"
        INSERT INTO deployment_jobs (
            id,
            connection_name,
            control,
            dispatched_at,
            status,
            attempt,
            restart_session,
            command_json,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?4)
        "#,
    )
    .bind(job.id)
    .bind(&job.connection_name)
    .bind(job.control)
    .bind(job.dispatched_at)
    .bind(job.attempt)
    .bind(job.restart_session)
    .bind(Json(&job.command))
    .execute(&mut **tx)
    .await?;

    let record = sqlx::query_as::<_, DeploymentJobRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(job.id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(record)
}

/// Records `retried_by` as the replacement of a TIMED_OUT or FAILED job.
/// Returns false when the job was already retried or is not retryable, so
/// only one of several concurrent retries gets through.
pub async fn claim_retry(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: Uuid,
    retried_by: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE deployment_jobs
        SET retried_by = ?2
        WHERE id = ?1
          AND retried_by IS NULL
          AND status IN ('timed_out', 'failed')
        "#,
    )
    .bind(job_id)
    .bind(retried_by)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Marks older pending jobs of a connection as superseded so their late
/// acknowledgements are ignored. `control` narrows it to one verb.
pub async fn supersede_pending(
    tx: &mut Transaction<'_, Sqlite>,
    connection_name: &str,
    control: Option<Control>,
    at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE deployment_jobs
        SET status = 'superseded', resolved_at = ?3
        WHERE connection_name = ?1
          AND status = 'pending'
          AND (?2 IS NULL OR control = ?2)
        "#,
    )
    .bind(connection_name)
    .bind(control)
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_job(pool: &Db, id: Uuid) -> Result<Option<DeploymentJobRecord>> {
    let record = sqlx::query_as::<_, DeploymentJobRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

pub async fn find_by_ack_key(
    pool: &Db,
    connection_name: &str,
    control: Control,
    dispatched_at: DateTime<Utc>,
) -> Result<Option<DeploymentJobRecord>> {
    let record = sqlx::query_as::<_, DeploymentJobRecord>(&format!(
        "{SELECT_COLUMNS} WHERE connection_name = ?1 AND control = ?2 AND dispatched_at = ?3"
    ))
    .bind(connection_name)
    .bind(control)
    .bind(dispatched_at)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Resolves the pending job matching the acknowledgement key. Returns false
/// when no pending job matched (duplicate, stale or unknown ack).
pub async fn resolve_by_ack_key(
    pool: &Db,
    connection_name: &str,
    control: Control,
    dispatched_at: DateTime<Utc>,
    status: JobStatus,
    last_error: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE deployment_jobs
        SET status = ?4, last_error = ?5, resolved_at = ?6
        WHERE connection_name = ?1
          AND control = ?2
          AND dispatched_at = ?3
          AND status = 'pending'
        "#,
    )
    .bind(connection_name)
    .bind(control)
    .bind(dispatched_at)
    .bind(status)
    .bind(last_error)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Marks a pending job failed (publishing did not go through).
pub async fn fail_pending_job(
    pool: &Db,
    id: Uuid,
    last_error: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE deployment_jobs
        SET status = 'failed', last_error = ?2, resolved_at = ?3
        WHERE id = ?1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(last_error)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Times out every pending job dispatched before `cutoff`.
pub async fn time_out_pending(
    pool: &Db,
    cutoff: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Result<Vec<DeploymentJobRecord>> {
    let mut tx = pool.begin().await?;
    let overdue = sqlx::query_as::<_, DeploymentJobRecord>(&format!(
        "{SELECT_COLUMNS} WHERE status = 'pending' AND dispatched_at < ?1 ORDER BY dispatched_at"
    ))
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE deployment_jobs
        SET status = 'timed_out', last_error = 'no acknowledgement before deadline', resolved_at = ?2
        WHERE status = 'pending' AND dispatched_at < ?1
        "#,
    )
    .bind(cutoff)
    .bind(at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(overdue)
}

pub async fn list_jobs_for_connection(
    pool: &Db,
    connection_name: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<DeploymentJobRecord>> {
    let records = sqlx::query_as::<_, DeploymentJobRecord>(&format!(
        "{SELECT_COLUMNS} WHERE connection_name = ?1 ORDER BY dispatched_at DESC, attempt DESC LIMIT ?2 OFFSET ?3"
    ))
    .bind(connection_name)
    .bind(i64::from(limit))
    .bind(i64::from(offset))
    .fetch_all(pool)
    .await?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        connections::{self, ConnectionState, NewConnection},
        migrations, now,
    };
    use common::api::{ConnectionControl, ConnectionDefinition};

    async fn setup() -> Db {
        let pool = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&pool).await.expect("migrations");
        let mut tx = pool.begin().await.expect("tx");
        connections::insert_connection(
            &mut tx,
            &NewConnection {
                connection_name: "press-01".into(),
                state: ConnectionState::Deployed,
                device_name: "gw-01".into(),
                definition: ConnectionDefinition {
                    connection_name: "press-01".into(),
                    ..Default::default()
                },
                last_control: Control::Deploy,
                created_at: now(),
            },
        )
        .await
        .expect("connection");
        tx.commit().await.expect("commit");
        pool
    }

    fn job(control: Control, dispatched_at: DateTime<Utc>) -> NewDeploymentJob {
        let id = Uuid::new_v4();
        NewDeploymentJob {
            id,
            connection_name: "press-01".into(),
            control,
            dispatched_at,
            attempt: 1,
            restart_session: false,
            command: FleetCommand {
                control: ConnectionControl::from(control),
                job_id: id,
                dispatched_at,
                attempt: 1,
                restart_session: false,
                definition: ConnectionDefinition {
                    connection_name: "press-01".into(),
                    ..Default::default()
                },
            },
        }
    }

    async fn insert(pool: &Db, new: &NewDeploymentJob) -> DeploymentJobRecord {
        let mut tx = pool.begin().await.expect("tx");
        let record = insert_job(&mut tx, new).await.expect("insert job");
        tx.commit().await.expect("commit");
        record
    }

    #[tokio::test]
    async fn ack_key_resolves_only_once() {
        let pool = setup().await;
        let dispatched_at = now();
        let created = insert(&pool, &job(Control::Start, dispatched_at)).await;
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.dispatched_at, dispatched_at);

        let first = resolve_by_ack_key(
            &pool,
            "press-01",
            Control::Start,
            dispatched_at,
            JobStatus::Acked,
            None,
            now(),
        )
        .await
        .expect("resolve");
        assert!(first);

        let replay = resolve_by_ack_key(
            &pool,
            "press-01",
            Control::Start,
            dispatched_at,
            JobStatus::Failed,
            Some("late"),
            now(),
        )
        .await
        .expect("resolve");
        assert!(!replay);

        let stored = get_job(&pool, created.id)
            .await
            .expect("get")
            .expect("job");
        assert_eq!(stored.status, JobStatus::Acked);
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn supersede_can_target_one_control() {
        let pool = setup().await;
        let base = now();
        let start = insert(&pool, &job(Control::Start, base)).await;
        let push = insert(
            &pool,
            &job(Control::Push, base + chrono::Duration::milliseconds(5)),
        )
        .await;

        let mut tx = pool.begin().await.expect("tx");
        let superseded = supersede_pending(&mut tx, "press-01", Some(Control::Start), now())
            .await
            .expect("supersede");
        tx.commit().await.expect("commit");
        assert_eq!(superseded, 1);

        let start = get_job(&pool, start.id).await.expect("get").expect("job");
        let push = get_job(&pool, push.id).await.expect("get").expect("job");
        assert_eq!(start.status, JobStatus::Superseded);
        assert_eq!(push.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn time_out_pending_only_touches_overdue_jobs() {
        let pool = setup().await;
        let old = now() - chrono::Duration::seconds(120);
        let fresh = now();
        let overdue = insert(&pool, &job(Control::Start, old)).await;
        let recent = insert(&pool, &job(Control::Stop, fresh)).await;

        let timed_out = time_out_pending(&pool, now() - chrono::Duration::seconds(60), now())
            .await
            .expect("sweep");
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].id, overdue.id);

        let recent = get_job(&pool, recent.id).await.expect("get").expect("job");
        assert_eq!(recent.status, JobStatus::Pending);
        let overdue = get_job(&pool, overdue.id).await.expect("get").expect("job");
        assert_eq!(overdue.status, JobStatus::TimedOut);
    }
}
