pub mod app_state;
pub mod audit;
pub mod auth;
pub mod backoff;
pub mod builder;
pub mod config;
pub mod error;
pub mod fleet;
pub mod http;
pub mod metrics;
pub mod onboarding;
pub mod persistence;
pub mod routes;
pub mod services;
pub mod state_machine;
pub mod tasks;
pub mod telemetry;
pub mod validation;
pub mod version;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app_state::{AppState, OperatorAuth};
use crate::audit::{AuditContext, AuditStatus};
use crate::config::{AppConfig, ServerConfig};
use crate::fleet::{FleetMessageRouter, LocalFleetBus};
use crate::metrics::{init_metrics_recorder, record_build_info};
use crate::onboarding::{DeviceOnboardingCoordinator, LocalProvisioningBackend};
use crate::persistence::{Db, MigrationLabel, MigrationRunOutcome, MigrationSnapshot};

const USAGE: &str = "Usage: orchestrator [migrate --dry-run]\n\
                     Run without arguments to start the server.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    Serve,
    MigrationsDryRun,
    Help,
}

/// Reads the command mode from the process arguments.
pub fn parse_command() -> Result<CommandMode> {
    parse_args(std::env::args().skip(1))
}

pub fn parse_args<I>(args: I) -> Result<CommandMode>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => Ok(CommandMode::Serve),
        ["migrate", "--dry-run" | "dry-run"] | ["--migrations-dry-run"] => {
            Ok(CommandMode::MigrationsDryRun)
        }
        ["migrate", ..] => anyhow::bail!("unknown migrate option; use --dry-run"),
        ["--help" | "-h", ..] => Ok(CommandMode::Help),
        [other, ..] => anyhow::bail!("unknown argument: {other}"),
    }
}

/// Boot the orchestrator using the provided command mode.
pub async fn run(mode: CommandMode) -> Result<()> {
    run_with_shutdown(mode, shutdown_signal()).await
}

pub async fn run_with_shutdown<S>(mode: CommandMode, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if mode == CommandMode::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let app_config = config::load()?;
    let metrics_handle = init_metrics_recorder();
    let operator_auth = OperatorAuth::from_config(&app_config.operator)?;

    let db = persistence::migrations::init_pool(&app_config.database.url).await?;
    let dry_run = mode == CommandMode::MigrationsDryRun;
    if dry_run || app_config.features.migrations_dry_run_on_start {
        let snapshot = persistence::migrations::dry_run_migrations(&db).await?;
        log_pending_migrations(&snapshot, dry_run);
        if dry_run {
            return Ok(());
        }
    }

    let migrations = persistence::migrations::run_migrations(&db).await?;
    log_applied_migrations(&migrations);
    record_build_info(&migrations.snapshot);

    let state = assemble_state(&app_config, db, operator_auth, metrics_handle, &migrations);
    audit_applied_migrations(&state, &migrations.applied).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_background_tasks(&state, shutdown_rx.clone());

    let api_listener = bind(&app_config.server, "api").await?;
    let metrics_listener = bind(&app_config.metrics, "metrics").await?;

    let api = routes::build_router(state.clone()).with_state(state.clone());
    let metrics = routes::build_metrics_router().with_state(state);
    let mut api_task = serve(api_listener, api, shutdown_rx.clone());
    let mut metrics_task = serve(metrics_listener, metrics, shutdown_rx);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown.await;
        let _ = signal_tx.send(true);
    });

    // Whichever server stops first takes the other one down with it.
    let first = tokio::select! {
        res = &mut api_task => ("api", res),
        res = &mut metrics_task => ("metrics", res),
    };
    let _ = shutdown_tx.send(true);
    let remaining = if first.0 == "api" {
        ("metrics", metrics_task.await)
    } else {
        ("api", api_task.await)
    };

    for (name, res) in [first, remaining] {
        res.with_context(|| format!("{name} server task panicked"))?
            .with_context(|| format!("{name} server failed"))?;
    }
    Ok(())
}

fn assemble_state(
    app_config: &AppConfig,
    db: Db,
    operator_auth: OperatorAuth,
    metrics_handle: PrometheusHandle,
    migrations: &MigrationRunOutcome,
) -> AppState {
    let onboarding_config = app_config.onboarding.clone();
    let backend = LocalProvisioningBackend::new(
        db.clone(),
        onboarding_config.fleet_name.clone(),
        onboarding_config.resource_root.clone(),
    );
    info!(
        fleet = %onboarding_config.fleet_name,
        resource_root = %onboarding_config.resource_root,
        ack_timeout_secs = app_config.fleet.ack_timeout_secs,
        "fleet orchestration configured"
    );

    AppState {
        fleet: FleetMessageRouter::new(db.clone(), Arc::new(LocalFleetBus::new())),
        onboarding: DeviceOnboardingCoordinator::new(
            db.clone(),
            Arc::new(backend),
            onboarding_config,
        ),
        db,
        operator_auth,
        fleet_config: app_config.fleet.clone(),
        retention: app_config.retention.clone(),
        metrics_handle,
        schema: migrations.snapshot.clone(),
    }
}

fn log_pending_migrations(snapshot: &MigrationSnapshot, dry_run: bool) {
    info!(
        current_version = snapshot.latest_applied,
        target_version = snapshot.latest_available,
        pending = snapshot.pending.len(),
        before_startup = !dry_run,
        "migration dry-run completed"
    );
}

fn log_applied_migrations(outcome: &MigrationRunOutcome) {
    if outcome.applied.is_empty() {
        info!(
            current_version = outcome.snapshot.latest_applied,
            "database schema is up to date"
        );
    }
    for migration in &outcome.applied {
        info!(
            version = migration.version,
            description = %migration.description,
            "applied database migration"
        );
    }
}

async fn audit_applied_migrations(state: &AppState, applied: &[MigrationLabel]) {
    for migration in applied {
        let payload = json!({
            "version": migration.version,
            "description": migration.description,
        });
        telemetry::record_audit_log(
            state,
            "migration.applied",
            "database",
            AuditStatus::Success,
            AuditContext {
                payload: Some(payload.to_string()),
                ..AuditContext::default()
            },
        )
        .await;
    }
}

fn spawn_background_tasks(state: &AppState, shutdown: watch::Receiver<bool>) {
    tokio::spawn(state.fleet.clone().run(shutdown));
    tokio::spawn(routes::ack_timeout_loop(
        state.db.clone(),
        state.fleet_config.clone(),
    ));
    tokio::spawn(routes::log_retention_loop(
        state.db.clone(),
        state.retention.clone(),
    ));
}

async fn bind(server: &ServerConfig, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .with_context(|| format!("invalid {name} listen address"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr}"))?;
    info!(%addr, listener = name, "orchestrator listening");
    Ok(listener)
}

fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<std::io::Result<()>> {
    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    // Let in-flight responses drain before the listeners close.
    tokio::time::sleep(Duration::from_millis(100)).await;
}
