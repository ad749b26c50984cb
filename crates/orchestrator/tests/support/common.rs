#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, Request as HttpRequest, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use orchestrator::{
    app_state::{AppState, OperatorAuth},
    config::{FleetConfig, OnboardingConfig, RetentionConfig},
    fleet::{FleetMessage, FleetMessageRouter, LocalFleetBus},
    metrics::{init_metrics_recorder, record_build_info},
    onboarding::{DeviceOnboardingCoordinator, LocalProvisioningBackend},
    persistence::migrations,
    routes::{build_metrics_router, build_router},
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use tower::ServiceExt;

pub const TEST_OPERATOR_TOKEN: &str = "test-operator-token";
pub const DEVICE: &str = "gw-01";
pub const CONNECTION: &str = "press-01";

/// Router, state and the temp directory backing the local resource buckets.
pub struct TestApp {
    pub app: Router,
    pub metrics_app: Router,
    pub state: AppState,
    pub resource_root: TempDir,
}

pub async fn setup_app() -> TestApp {
    setup_app_with_fleet(FleetConfig {
        conflict_backoff_ms: 1,
        conflict_backoff_max_ms: 5,
        ..FleetConfig::default()
    })
    .await
}

pub async fn setup_app_with_fleet(fleet_config: FleetConfig) -> TestApp {
    let db = migrations::init_pool("sqlite::memory:")
        .await
        .expect("db init");
    let migration_outcome = migrations::run_migrations(&db).await.expect("migrations");
    let metrics_handle = init_metrics_recorder();
    record_build_info(&migration_outcome.snapshot);

    let resource_root = tempfile::tempdir().expect("temp resource root");
    let onboarding = OnboardingConfig {
        resource_root: resource_root.path().display().to_string(),
        ..OnboardingConfig::default()
    };
    let backend = LocalProvisioningBackend::new(
        db.clone(),
        onboarding.fleet_name.clone(),
        resource_root.path(),
    );

    let state = AppState {
        db: db.clone(),
        fleet: FleetMessageRouter::new(db.clone(), Arc::new(LocalFleetBus::new())),
        onboarding: DeviceOnboardingCoordinator::new(db.clone(), Arc::new(backend), onboarding),
        operator_auth: OperatorAuth {
            tokens: vec![TEST_OPERATOR_TOKEN.into()],
            header_name: HeaderName::from_static("authorization"),
        },
        fleet_config,
        retention: RetentionConfig::default(),
        metrics_handle,
        schema: migration_outcome.snapshot,
    };

    TestApp {
        app: build_router(state.clone()).with_state(state.clone()),
        metrics_app: build_metrics_router().with_state(state.clone()),
        state,
        resource_root,
    }
}

/// Starts the fleet ingest loop and lets it subscribe before returning.
/// Dropping the sender stops it.
pub async fn spawn_fleet_ingest(state: &AppState) -> watch::Sender<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(state.fleet.clone().run(rx));
    tokio::task::yield_now().await;
    tx
}

/// Subscribes like a gateway would, before any command is published.
pub fn gateway_subscription(state: &AppState) -> broadcast::Receiver<FleetMessage> {
    state.fleet.transport().subscribe()
}

/// Drains everything published so far on `fleet/job/*`.
pub fn drain_job_messages(rx: &mut broadcast::Receiver<FleetMessage>) -> Vec<FleetMessage> {
    let mut jobs = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if message.topic.starts_with("fleet/job/") {
            jobs.push(message);
        }
    }
    jobs
}

pub fn operator_request(method: &str, uri: &str, body: Option<Value>) -> HttpRequest<Body> {
    let builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_OPERATOR_TOKEN}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: HttpRequest<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn onboard(app: &Router, device: &str) {
    let response = send(
        app,
        operator_request("POST", &format!("/api/v1/devices/{device}/onboard"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

pub async fn submit(app: &Router, body: Value) -> Response {
    send(app, operator_request("POST", "/api/v1/connections", Some(body))).await
}

/// The OPC UA START example used throughout the API tests.
pub fn start_payload(port: &str) -> Value {
    json!({
        "control": "start",
        "connectionName": CONNECTION,
        "protocol": "OPC_UA",
        "greengrassCoreDeviceName": DEVICE,
        "siteName": "plant-a",
        "area": "stamping",
        "process": "press",
        "machineName": "press-line-1",
        "opcUa": {"machineIp": "10.0.0.5", "serverName": "Kepware.KEPServerEX.V6", "port": port},
        "sendDataToIoTSiteWise": true
    })
}

pub fn with_control(mut payload: Value, control: &str) -> Value {
    payload["control"] = Value::String(control.to_string());
    payload
}
