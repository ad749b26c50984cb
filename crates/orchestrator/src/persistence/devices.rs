use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum DeviceStatus {
    Unprovisioned,
    Provisioned,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeviceRecord {
    pub device_name: String,
    pub status: DeviceStatus,
    pub certificate_arn: Option<String>,
    pub thing_name: Option<String>,
    pub role_alias: Option<String>,
    pub resource_bucket: Option<String>,
    pub last_failed_step: Option<String>,
    pub last_error: Option<String>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// References recorded once every onboarding step succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    pub certificate_arn: String,
    pub thing_name: String,
    pub role_alias: String,
    pub resource_bucket: String,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        device_name,
        status,
        certificate_arn,
        thing_name,
        role_alias,
        resource_bucket,
        last_failed_step,
        last_error,
        provisioned_at,
        created_at,
        updated_at
    FROM devices
"#;

pub async fn get_device(pool: &Db, device_name: &str) -> Result<Option<DeviceRecord>> {
    let record =
        sqlx::query_as::<_, DeviceRecord>(&format!("{SELECT_COLUMNS} WHERE device_name = ?1"))
            .bind(device_name)
            .fetch_optional(pool)
            .await?;
    Ok(record)
}

/// Creates the registry entry as UNPROVISIONED unless it already exists.
pub async fn ensure_device(pool: &Db, device_name: &str, at: DateTime<Utc>) -> Result<DeviceRecord> {
    sqlx::query(
        r#"
        INSERT INTO devices (device_name, status, created_at, updated_at)
        VALUES (?1, 'unprovisioned', ?2, ?2)
        ON CONFLICT(device_name) DO NOTHING
        "#,
    )
    .bind(device_name)
    .bind(at)
    .execute(pool)
    .await?;

    get_device(pool, device_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("device {device_name} missing after insert"))
}

pub async fn mark_provisioned(
    pool: &Db,
    device_name: &str,
    provisioned: &ProvisionedDevice,
    at: DateTime<Utc>,
) -> Result<DeviceRecord> {
    sqlx::query(
        r#"
        UPDATE devices
        SET status = 'provisioned',
            certificate_arn = ?2,
            thing_name = ?3,
            role_alias = ?4,
            resource_bucket = ?5,
            last_failed_step = NULL,
            last_error = NULL,
            provisioned_at = COALESCE(provisioned_at, ?6),
            updated_at = ?6
        WHERE device_name = ?1
        "#,
    )
    .bind(device_name)
    .bind(&provisioned.certificate_arn)
    .bind(&provisioned.thing_name)
    .bind(&provisioned.role_alias)
    .bind(&provisioned.resource_bucket)
    .bind(at)
    .execute(pool)
    .await?;

    get_device(pool, device_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("device {device_name} vanished while provisioning"))
}

/// Records a failed attempt. A device that another attempt already
/// provisioned is left alone.
pub async fn mark_failed(
    pool: &Db,
    device_name: &str,
    step: &str,
    error: &str,
    at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE devices
        SET status = 'failed', last_failed_step = ?2, last_error = ?3, updated_at = ?4
        WHERE device_name = ?1 AND status != 'provisioned'
        "#,
    )
    .bind(device_name)
    .bind(step)
    .bind(error)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_devices(
    pool: &Db,
    status: Option<DeviceStatus>,
    limit: u32,
    offset: u32,
) -> Result<Vec<DeviceRecord>> {
    let records = sqlx::query_as::<_, DeviceRecord>(&format!(
        "{SELECT_COLUMNS} WHERE (?1 IS NULL OR status = ?1) ORDER BY device_name ASC LIMIT ?2 OFFSET ?3"
    ))
    .bind(status)
    .bind(i64::from(limit))
    .bind(i64::from(offset))
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn delete_device(pool: &Db, device_name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM devices WHERE device_name = ?1")
        .bind(device_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{migrations, now};

    #[tokio::test]
    async fn failure_never_downgrades_a_provisioned_device() {
        let pool = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&pool).await.expect("migrations");

        let created = ensure_device(&pool, "gw-01", now()).await.expect("ensure");
        assert_eq!(created.status, DeviceStatus::Unprovisioned);
        let again = ensure_device(&pool, "gw-01", now()).await.expect("ensure");
        assert_eq!(again.created_at, created.created_at);

        mark_provisioned(
            &pool,
            "gw-01",
            &ProvisionedDevice {
                certificate_arn: "arn:cert".into(),
                thing_name: "gw-01".into(),
                role_alias: "alias".into(),
                resource_bucket: "bucket".into(),
            },
            now(),
        )
        .await
        .expect("provision");

        let touched = mark_failed(&pool, "gw-01", "policy", "boom", now())
            .await
            .expect("mark failed");
        assert_eq!(touched, 0);
        let stored = get_device(&pool, "gw-01").await.expect("get").expect("device");
        assert_eq!(stored.status, DeviceStatus::Provisioned);
        assert!(stored.provisioned_at.is_some());
    }
}
