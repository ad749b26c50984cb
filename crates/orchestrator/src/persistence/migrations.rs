use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::migrate::{AppliedMigration, Migrate, Migration, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use uuid::Uuid;

use super::Db;
use crate::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const FILE_POOL_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub const fn migrator() -> &'static Migrator {
    &MIGRATOR
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MigrationLabel {
    pub version: i64,
    pub description: String,
}

impl From<&Migration> for MigrationLabel {
    fn from(migration: &Migration) -> Self {
        Self {
            version: migration.version,
            description: migration.description.to_string(),
        }
    }
}

/// Which embedded migrations the database has, and which it still needs.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MigrationSnapshot {
    pub latest_applied: Option<i64>,
    pub latest_available: Option<i64>,
    pub applied: Vec<MigrationLabel>,
    pub pending: Vec<MigrationLabel>,
}

#[derive(Debug, Clone)]
pub struct MigrationRunOutcome {
    pub snapshot: MigrationSnapshot,
    /// Migrations this run applied, oldest first.
    pub applied: Vec<MigrationLabel>,
}

/// Opens the SQLite pool. File databases run in WAL mode.
///
/// `sqlite::memory:` becomes a throwaway file behind a single connection, so
/// every query of a test sees the same data.
pub async fn init_pool(database_url: &str) -> Result<Db> {
    let in_memory = database_url.starts_with("sqlite::memory");
    let url = if in_memory {
        let scratch =
            std::env::temp_dir().join(format!("edge-orchestrator-{}.sqlite", Uuid::new_v4()));
        format!("sqlite://{}", scratch.display())
    } else {
        database_url.to_string()
    };
    ensure_db_dir(&url)?;

    let base = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);
    let (options, connections) = if in_memory {
        (base.shared_cache(true), 1)
    } else {
        (base.journal_mode(SqliteJournalMode::Wal), FILE_POOL_CONNECTIONS)
    };

    SqlitePoolOptions::new()
        .max_connections(connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .with_context(|| format!("connect to {database_url}"))
}

fn ensure_db_dir(url: &str) -> Result<()> {
    let parent = url
        .strip_prefix("sqlite://")
        .and_then(|path| Path::new(path).parent())
        .filter(|parent| !parent.as_os_str().is_empty());
    if let Some(dir) = parent {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create database directory {}", dir.display()))?;
    }
    Ok(())
}

pub fn latest_migration_version() -> Option<i64> {
    migrator().iter().map(|m| m.version).max()
}

pub async fn migration_snapshot(pool: &Db) -> Result<MigrationSnapshot> {
    let applied = fetch_applied_migrations(pool).await?;
    Ok(snapshot_of(&applied))
}

fn snapshot_of(applied: &[AppliedMigration]) -> MigrationSnapshot {
    let known: BTreeMap<i64, &Migration> = migrator().iter().map(|m| (m.version, m)).collect();
    let done: HashSet<i64> = applied.iter().map(|m| m.version).collect();

    MigrationSnapshot {
        latest_applied: done.iter().copied().max(),
        latest_available: known.keys().next_back().copied(),
        applied: applied
            .iter()
            .map(|m| match known.get(&m.version) {
                Some(migration) => MigrationLabel::from(*migration),
                None => MigrationLabel {
                    version: m.version,
                    description: "unknown".to_string(),
                },
            })
            .collect(),
        pending: known
            .values()
            .filter(|m| !done.contains(&m.version))
            .map(|m| MigrationLabel::from(*m))
            .collect(),
    }
}

/// Fails when the database carries a migration this binary does not ship, or
/// when a checksum drifted.
pub async fn validate_migrations(pool: &Db) -> Result<()> {
    let applied = fetch_applied_migrations(pool).await?;
    check_applied(&applied)
}

fn check_applied(applied: &[AppliedMigration]) -> Result<()> {
    for record in applied {
        let shipped = migrator().iter().find(|m| m.version == record.version);
        match shipped {
            None => anyhow::bail!("database has unknown migration version {}", record.version),
            Some(migration) if migration.checksum != record.checksum => anyhow::bail!(
                "migration {} checksum mismatch between database and binary",
                record.version
            ),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validates the live schema, then replays every migration on a scratch
/// database. `pool` is only read.
pub async fn dry_run_migrations(pool: &Db) -> Result<MigrationSnapshot> {
    let snapshot = migration_snapshot(pool).await?;
    validate_migrations(pool).await?;

    let scratch = init_pool("sqlite::memory:").await?;
    migrator()
        .run(&scratch)
        .await
        .context("dry-run execution of migrations failed")?;
    scratch.close().await;

    Ok(snapshot)
}

pub async fn run_migrations(pool: &Db) -> Result<MigrationRunOutcome> {
    let before = migration_snapshot(pool).await?;
    validate_migrations(pool).await?;
    if before.pending.is_empty() {
        return Ok(MigrationRunOutcome {
            snapshot: before,
            applied: Vec::new(),
        });
    }

    migrator()
        .run(pool)
        .await
        .context("applying database migrations failed")?;

    let snapshot = migration_snapshot(pool).await?;
    let now_applied: HashSet<i64> = snapshot.applied.iter().map(|m| m.version).collect();
    let applied = before
        .pending
        .into_iter()
        .filter(|m| now_applied.contains(&m.version))
        .collect();
    Ok(MigrationRunOutcome { snapshot, applied })
}

async fn fetch_applied_migrations(pool: &Db) -> Result<Vec<AppliedMigration>> {
    let mut conn = pool.acquire().await?;
    conn.ensure_migrations_table()
        .await
        .context("ensure migrations table exists")?;
    if let Some(version) = conn.dirty_version().await? {
        anyhow::bail!("database is in a dirty migration state at version {version}");
    }
    conn.list_applied_migrations()
        .await
        .context("list applied migrations")
}
