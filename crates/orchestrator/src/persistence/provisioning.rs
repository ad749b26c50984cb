//! Tables backing the local provisioning backend. Every helper inserts with
//! `ON CONFLICT DO NOTHING` and reads the row back, so the first writer wins
//! and concurrent callers converge on the same resource.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct CertificateRecord {
    pub certificate_id: String,
    pub device_name: String,
    pub certificate_arn: String,
    pub certificate_pem: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PolicyRecord {
    pub policy_name: String,
    #[sqlx(rename = "document_json")]
    pub document: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RoleAliasRecord {
    pub alias: String,
    pub role_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BucketRecord {
    pub bucket_name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

pub async fn ensure_certificate(
    pool: &Db,
    candidate: &CertificateRecord,
) -> Result<CertificateRecord> {
    sqlx::query(
        r#"
        INSERT INTO device_certificates (
            certificate_id,
            device_name,
            certificate_arn,
            certificate_pem,
            created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&candidate.certificate_id)
    .bind(&candidate.device_name)
    .bind(&candidate.certificate_arn)
    .bind(&candidate.certificate_pem)
    .bind(candidate.created_at)
    .execute(pool)
    .await?;

    find_certificate(pool, &candidate.device_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("certificate for {} missing", candidate.device_name))
}

pub async fn find_certificate(pool: &Db, device_name: &str) -> Result<Option<CertificateRecord>> {
    let record = sqlx::query_as::<_, CertificateRecord>(
        r#"
        SELECT certificate_id, device_name, certificate_arn, certificate_pem, created_at
        FROM device_certificates
        WHERE device_name = ?1
        "#,
    )
    .bind(device_name)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Removes a certificate and its policy attachments. Returns false when the
/// certificate was already gone.
pub async fn discard_certificate(
    pool: &Db,
    certificate_id: &str,
    certificate_arn: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM policy_attachments WHERE certificate_arn = ?1")
        .bind(certificate_arn)
        .execute(&mut *tx)
        .await?;
    let removed = sqlx::query("DELETE FROM device_certificates WHERE certificate_id = ?1")
        .bind(certificate_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(removed > 0)
}

pub async fn count_certificates(pool: &Db, device_name: &str) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM device_certificates WHERE device_name = ?1",
    )
    .bind(device_name)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn ensure_policy(
    pool: &Db,
    policy_name: &str,
    document: &serde_json::Value,
    at: DateTime<Utc>,
) -> Result<PolicyRecord> {
    sqlx::query(
        r#"
        INSERT INTO iot_policies (policy_name, document_json, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(policy_name) DO NOTHING
        "#,
    )
    .bind(policy_name)
    .bind(Json(document))
    .bind(at)
    .execute(pool)
    .await?;

    let record = sqlx::query_as::<_, PolicyRecord>(
        "SELECT policy_name, document_json, created_at FROM iot_policies WHERE policy_name = ?1",
    )
    .bind(policy_name)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

/// Attaches a policy to a certificate/thing pair. Returns true on the first
/// attachment.
pub async fn attach_policy(
    pool: &Db,
    policy_name: &str,
    certificate_arn: &str,
    thing_name: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO policy_attachments (policy_name, certificate_arn, thing_name, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(policy_name, certificate_arn) DO NOTHING
        "#,
    )
    .bind(policy_name)
    .bind(certificate_arn)
    .bind(thing_name)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn ensure_credentials_role(
    pool: &Db,
    role_name: &str,
    permissions: &serde_json::Value,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO credential_roles (role_name, permissions_json, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(role_name) DO NOTHING
        "#,
    )
    .bind(role_name)
    .bind(Json(permissions))
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn ensure_role_alias(
    pool: &Db,
    alias: &str,
    role_name: &str,
    at: DateTime<Utc>,
) -> Result<RoleAliasRecord> {
    sqlx::query(
        r#"
        INSERT INTO role_aliases (alias, role_name, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(alias) DO NOTHING
        "#,
    )
    .bind(alias)
    .bind(role_name)
    .bind(at)
    .execute(pool)
    .await?;

    let record = sqlx::query_as::<_, RoleAliasRecord>(
        "SELECT alias, role_name, created_at FROM role_aliases WHERE alias = ?1",
    )
    .bind(alias)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub async fn ensure_bucket(
    pool: &Db,
    bucket_name: &str,
    location: &str,
    at: DateTime<Utc>,
) -> Result<BucketRecord> {
    sqlx::query(
        r#"
        INSERT INTO resource_buckets (bucket_name, location, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(bucket_name) DO NOTHING
        "#,
    )
    .bind(bucket_name)
    .bind(location)
    .bind(at)
    .execute(pool)
    .await?;

    let record = sqlx::query_as::<_, BucketRecord>(
        "SELECT bucket_name, location, created_at FROM resource_buckets WHERE bucket_name = ?1",
    )
    .bind(bucket_name)
    .fetch_one(pool)
    .await?;
    Ok(record)
}
