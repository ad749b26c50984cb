use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use axum::http::HeaderName;
use tempfile::TempDir;

use crate::app_state::{AppState, OperatorAuth};
use crate::config::{FleetConfig, OnboardingConfig, RetentionConfig};
use crate::fleet::{FleetMessageRouter, LocalFleetBus};
use crate::onboarding::{DeviceOnboardingCoordinator, LocalProvisioningBackend};

/// Application state plus the scratch directory its buckets live in. The
/// directory is removed when this is dropped.
pub(crate) struct TestState {
    state: AppState,
    _resource_root: TempDir,
}

impl Deref for TestState {
    type Target = AppState;

    fn deref(&self) -> &AppState {
        &self.state
    }
}

impl DerefMut for TestState {
    fn deref_mut(&mut self) -> &mut AppState {
        &mut self.state
    }
}

pub(crate) async fn setup_state() -> TestState {
    let db = crate::persistence::migrations::init_pool("sqlite::memory:")
        .await
        .expect("pool");
    let migration_outcome = crate::persistence::migrations::run_migrations(&db)
        .await
        .expect("migrations");
    let metrics_handle = crate::metrics::init_metrics_recorder();
    crate::metrics::record_build_info(&migration_outcome.snapshot);

    let resource_root = tempfile::tempdir().expect("bucket root");
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
            tokens: vec!["op-token".into()],
            header_name: HeaderName::from_static("authorization"),
        },
        fleet_config: FleetConfig {
            conflict_backoff_ms: 1,
            conflict_backoff_max_ms: 5,
            ..FleetConfig::default()
        },
        retention: RetentionConfig::default(),
        metrics_handle,
        schema: migration_outcome.snapshot,
    };
    TestState {
        state,
        _resource_root: resource_root,
    }
}

/// Onboards `device_name` so connections may target it.
pub(crate) async fn provision_device(state: &AppState, device_name: &str) {
    state
        .onboarding
        .onboard(device_name)
        .await
        .expect("onboard device");
}
