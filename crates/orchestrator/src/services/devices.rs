use common::api::{self, DeviceView, OnboardingResult, Page};
use tracing::info;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{connections, devices, DeviceStatus};

pub async fn list_devices(
    state: &AppState,
    status: Option<api::DeviceStatus>,
    limit: u32,
    offset: u32,
) -> ApiResult<Page<DeviceView>> {
    let status = status.map(|status| match status {
        api::DeviceStatus::Unprovisioned => DeviceStatus::Unprovisioned,
        api::DeviceStatus::Provisioned => DeviceStatus::Provisioned,
        api::DeviceStatus::Failed => DeviceStatus::Failed,
    });
    let records = devices::list_devices(&state.db, status, limit, offset).await?;
    Ok(Page {
        limit,
        offset,
        items: records.into_iter().map(Into::into).collect(),
    })
}

pub async fn get_device(state: &AppState, device_name: &str) -> ApiResult<DeviceView> {
    devices::get_device(&state.db, device_name)
        .await?
        .map(Into::into)
        .ok_or_else(|| AppError::not_found(format!("device {device_name} not found")))
}

pub async fn onboard_device(state: &AppState, device_name: &str) -> ApiResult<OnboardingResult> {
    Ok(state.onboarding.onboard(device_name).await?)
}

/// Explicit administrative removal. Refused while a connection that is not
/// DELETED still targets the device.
pub async fn delete_device(state: &AppState, device_name: &str) -> ApiResult<()> {
    if devices::get_device(&state.db, device_name).await?.is_none() {
        return Err(AppError::not_found(format!("device {device_name} not found")));
    }

    let live = connections::count_live_for_device(&state.db, device_name).await?;
    if live > 0 {
        return Err(AppError::precondition_failed(format!(
            "device {device_name} still has {live} active connection(s)"
        )));
    }

    devices::delete_device(&state.db, device_name).await?;
    info!(device = device_name, "device removed");
    Ok(())
}
