use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::persistence::{self as db, logs};
use crate::Result;

pub async fn log_retention_loop(db: db::Db, retention: RetentionConfig) {
    let sweep_interval = retention.cleanup_interval_secs.max(60);
    let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));

    loop {
        interval.tick().await;

        if retention.logs_secs == 0 {
            continue;
        }

        match run_log_retention_sweep(&db, &retention, Utc::now()).await {
            Ok(0) => {}
            Ok(pruned) => {
                info!(pruned, "log retention sweep removed entries");
            }
            Err(err) => warn!(?err, "log retention sweep failed"),
        }
    }
}

/// A zero window keeps logs forever.
pub(crate) async fn run_log_retention_sweep(
    db: &db::Db,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<u64> {
    if retention.logs_secs == 0 {
        return Ok(0);
    }

    let cutoff = db::seconds_before(now, retention.logs_secs);
    logs::prune_logs_before(db, cutoff).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::persistence::{migrations, LogLevel, NewConnectionLog};

    fn retention_cfg(logs_secs: u64) -> RetentionConfig {
        RetentionConfig {
            logs_secs,
            cleanup_interval_secs: 60,
        }
    }

    async fn seed(db: &db::Db, timestamp: DateTime<Utc>, message: &str) {
        logs::append_log(
            db,
            &NewConnectionLog {
                connection_name: "press-01".into(),
                timestamp,
                level: LogLevel::Info,
                source: "health".into(),
                message: message.into(),
                payload: None,
            },
        )
        .await
        .expect("append");
    }

    #[tokio::test]
    async fn prunes_entries_outside_window() {
        let db = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&db).await.expect("migrations");
        let now = db::now();
        seed(&db, now - ChronoDuration::hours(3), "old").await;
        seed(&db, now - ChronoDuration::minutes(5), "recent").await;

        let pruned = run_log_retention_sweep(&db, &retention_cfg(3600), now)
            .await
            .expect("sweep");
        assert_eq!(pruned, 1);

        let remaining = logs::list_logs(&db, "press-01", None, 10).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "recent");
    }

    #[tokio::test]
    async fn skips_when_window_disabled() {
        let db = migrations::init_pool("sqlite::memory:").await.expect("pool");
        migrations::run_migrations(&db).await.expect("migrations");
        seed(&db, db::now() - ChronoDuration::days(30), "ancient").await;

        let pruned = run_log_retention_sweep(&db, &retention_cfg(0), db::now())
            .await
            .expect("sweep");
        assert_eq!(pruned, 0);
    }
}
