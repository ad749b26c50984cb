//! Prometheus recorder and the counters the orchestrator exports.

use std::{sync::OnceLock, time::Instant};

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use common::api::{ConnectionControl, JobStatus};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::Error as SqlxError;

use crate::persistence::MigrationSnapshot;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder on first use; later calls share its handle.
pub fn init_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .add_global_label("app_version", crate::version::VERSION)
                .install_recorder()
                .expect("metrics recorder already installed")
        })
        .clone()
}

pub fn record_build_info(snapshot: &MigrationSnapshot) {
    let schema_version = match snapshot.latest_applied {
        Some(version) => version.to_string(),
        None => "none".to_string(),
    };
    gauge!(
        "orchestrator_build_info",
        "version" => crate::version::VERSION,
        "git_sha" => crate::version::GIT_SHA,
        "schema_version" => schema_version
    )
    .set(1.0);
    gauge!("orchestrator_migrations_pending").set(snapshot.pending.len() as f64);
}

/// Axum middleware counting requests and timing them by route template,
/// so connection names never become label values.
pub async fn track_http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |matched| matched.as_str().to_owned());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    histogram!(
        "orchestrator_http_request_duration_seconds",
        "method" => method.clone(),
        "path" => path.clone()
    )
    .record(started.elapsed().as_secs_f64());
    counter!(
        "orchestrator_http_requests_total",
        "method" => method,
        "path" => path,
        "status" => status
    )
    .increment(1);
    response
}

pub(crate) fn record_control_outcome(control: ConnectionControl, outcome: &'static str) {
    counter!(
        "orchestrator_control_requests_total",
        "control" => control.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_job_dispatched(control: ConnectionControl) {
    counter!("orchestrator_jobs_dispatched_total", "control" => control.as_str()).increment(1);
}

pub(crate) fn record_job_resolved(status: JobStatus) {
    counter!("orchestrator_jobs_resolved_total", "status" => status.as_str()).increment(1);
}

pub(crate) fn record_ack_ignored(reason: &'static str) {
    counter!("orchestrator_acks_ignored_total", "reason" => reason).increment(1);
}

pub(crate) fn record_onboarding(outcome: &'static str) {
    counter!("orchestrator_onboarding_total", "outcome" => outcome).increment(1);
}

/// Counts an unexpected failure, plus its database error class when a sqlx
/// error sits anywhere in the chain.
pub(crate) fn record_internal_error(err: &anyhow::Error) {
    counter!("orchestrator_internal_errors_total").increment(1);
    let Some(db_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())
    else {
        return;
    };
    let kind = match db_err {
        SqlxError::RowNotFound => "row_not_found",
        SqlxError::PoolTimedOut => "pool_timeout",
        SqlxError::Io(_) => "io",
        SqlxError::Database(_) => crate::error::db_error_kind(err)
            .map(|kind| kind.as_str())
            .unwrap_or("database"),
        _ => "other",
    };
    counter!("orchestrator_db_errors_total", "kind" => kind).increment(1);
}
