#[path = "support/common.rs"]
mod common;

use ::common::api::{DeviceStatus, DeviceView, OnboardingResult};
use axum::http::StatusCode;
use common::{operator_request, read_json, send, setup_app};
use futures_util::future::join_all;
use orchestrator::config::OnboardingConfig;
use orchestrator::persistence::provisioning;
use serde_json::Value;

#[tokio::test]
async fn concurrent_onboarding_over_http_issues_one_certificate() {
    let test = setup_app().await;

    let responses = join_all((0..6).map(|_| {
        send(
            &test.app,
            operator_request("POST", "/api/v1/devices/gw-concurrent/onboard", None),
        )
    }))
    .await;

    let mut arns = Vec::new();
    let mut keys = Vec::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let result: OnboardingResult = read_json(response).await;
        assert_eq!(result.device.status, DeviceStatus::Provisioned);
        arns.push(result.device.certificate_arn.expect("certificate arn"));
        keys.extend(result.private_key_pem);
    }
    arns.dedup();
    assert_eq!(arns.len(), 1);
    assert_eq!(keys.len(), 1, "the key is handed out exactly once");

    assert_eq!(
        provisioning::count_certificates(&test.state.db, "gw-concurrent")
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn failed_bucket_step_is_reported_and_retry_completes() {
    let test = setup_app().await;
    let blocker = test
        .resource_root
        .path()
        .join(OnboardingConfig::default().resource_bucket);
    std::fs::write(&blocker, b"not a bucket").expect("write blocker");

    let failed = send(
        &test.app,
        operator_request("POST", "/api/v1/devices/gw-09/onboard", None),
    )
    .await;
    assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
    let body: Value = read_json(failed).await;
    assert_eq!(body["code"], "onboarding_failed");
    assert!(body["error"].as_str().unwrap().contains("resource_bucket"));

    let device: DeviceView = read_json(
        send(
            &test.app,
            operator_request("GET", "/api/v1/devices/gw-09", None),
        )
        .await,
    )
    .await;
    assert_eq!(device.status, DeviceStatus::Failed);
    assert_eq!(device.last_failed_step.as_deref(), Some("resource_bucket"));

    std::fs::remove_file(&blocker).expect("remove blocker");
    let retried = send(
        &test.app,
        operator_request("POST", "/api/v1/devices/gw-09/onboard", None),
    )
    .await;
    assert_eq!(retried.status(), StatusCode::OK);
    let retried: OnboardingResult = read_json(retried).await;
    assert_eq!(retried.device.status, DeviceStatus::Provisioned);
    assert!(test
        .resource_root
        .path()
        .join(OnboardingConfig::default().resource_bucket)
        .is_dir());
}

#[tokio::test]
async fn onboarding_failure_is_audited() {
    let test = setup_app().await;
    let response = send(
        &test.app,
        operator_request("POST", "/api/v1/devices/bad%20name/onboard", None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = read_json(response).await;
    assert_eq!(body["code"], "validation_failed");
    assert!(body["fields"]["deviceName"].is_string());

    let entries: Vec<Value> = read_json(
        send(
            &test.app,
            operator_request("GET", "/api/v1/audit-logs", None),
        )
        .await,
    )
    .await;
    assert!(entries
        .iter()
        .any(|entry| entry["action"] == "device.onboard" && entry["status"] == "failure"));
}
