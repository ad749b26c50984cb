//! One-time provisioning of a gateway's identity and permissions.
//!
//! Onboarding is a sequence of create-or-fetch steps rather than a
//! transaction: a failed attempt leaves whatever it created behind, and the
//! next attempt picks those resources up again. The device row only becomes
//! PROVISIONED once every step has succeeded.

pub mod backend;
pub mod policy;

use std::{fmt, sync::Arc};

use common::api::OnboardingResult;
use tracing::{info, warn};

pub use backend::{
    DeviceCertificate, LocalProvisioningBackend, ProvisioningBackend, ProvisioningError,
};

use crate::config::OnboardingConfig;
use crate::error::AppError;
use crate::metrics;
use crate::persistence::{self, devices, provisioning, Db, DeviceStatus, ProvisionedDevice};
use crate::validation::{self, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    Certificate,
    Policy,
    RoleAlias,
    ResourceBucket,
}

impl OnboardingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStep::Certificate => "certificate",
            OnboardingStep::Policy => "policy",
            OnboardingStep::RoleAlias => "role_alias",
            OnboardingStep::ResourceBucket => "resource_bucket",
        }
    }
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("device name is invalid")]
    InvalidDeviceName(FieldErrors),
    #[error("onboarding step {step} failed: {source}")]
    StepFailed {
        step: OnboardingStep,
        #[source]
        source: ProvisioningError,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<OnboardingError> for AppError {
    fn from(err: OnboardingError) -> Self {
        match err {
            OnboardingError::InvalidDeviceName(fields) => {
                let mut mapped = AppError::validation(fields);
                mapped.message = "device name is invalid".into();
                mapped
            }
            err @ OnboardingError::StepFailed { .. } => AppError::onboarding_failed(err.to_string()),
            OnboardingError::Store(err) => AppError::from(err),
        }
    }
}

#[derive(Clone)]
pub struct DeviceOnboardingCoordinator {
    db: Db,
    backend: Arc<dyn ProvisioningBackend>,
    config: OnboardingConfig,
}

impl DeviceOnboardingCoordinator {
    pub fn new(db: Db, backend: Arc<dyn ProvisioningBackend>, config: OnboardingConfig) -> Self {
        Self {
            db,
            backend,
            config,
        }
    }

    /// Provisions `device_name`, or returns the existing identity when the
    /// device is already PROVISIONED.
    pub async fn onboard(&self, device_name: &str) -> Result<OnboardingResult, OnboardingError> {
        let errors = validation::validate_device_name(device_name);
        if !errors.is_empty() {
            return Err(OnboardingError::InvalidDeviceName(errors));
        }

        let device = devices::ensure_device(&self.db, device_name, persistence::now()).await?;
        if device.status == DeviceStatus::Provisioned {
            metrics::record_onboarding("already_provisioned");
            let certificate = provisioning::find_certificate(&self.db, device_name).await?;
            return Ok(OnboardingResult {
                device: device.into(),
                already_provisioned: true,
                certificate_pem: certificate.map(|c| c.certificate_pem),
                private_key_pem: None,
            });
        }

        match self.run_steps(device_name).await {
            Ok((provisioned, certificate)) => {
                let record = devices::mark_provisioned(
                    &self.db,
                    device_name,
                    &provisioned,
                    persistence::now(),
                )
                .await?;
                metrics::record_onboarding("provisioned");
                info!(
                    device = device_name,
                    certificate_arn = %provisioned.certificate_arn,
                    "device provisioned"
                );
                Ok(OnboardingResult {
                    device: record.into(),
                    already_provisioned: false,
                    certificate_pem: Some(certificate.certificate_pem),
                    private_key_pem: certificate.private_key_pem,
                })
            }
            Err((step, source)) => {
                devices::mark_failed(
                    &self.db,
                    device_name,
                    step.as_str(),
                    &source.to_string(),
                    persistence::now(),
                )
                .await?;
                metrics::record_onboarding("failed");
                warn!(device = device_name, step = step.as_str(), error = %source, "onboarding failed");
                Err(OnboardingError::StepFailed { step, source })
            }
        }
    }

    async fn run_steps(
        &self,
        device_name: &str,
    ) -> Result<(ProvisionedDevice, DeviceCertificate), (OnboardingStep, ProvisioningError)> {
        let certificate = self
            .backend
            .ensure_certificate(device_name, self.config.certificate_validity_days)
            .await
            .map_err(|err| (OnboardingStep::Certificate, err))?;

        match self.grant_access(device_name, &certificate).await {
            Ok(provisioned) => Ok((provisioned, certificate)),
            Err(failure) => {
                // The key of a fresh certificate is only ever handed out by a
                // successful attempt, so a retry needs a new pair.
                if certificate.is_fresh() {
                    if let Err(err) = self.backend.discard_certificate(&certificate).await {
                        warn!(device = device_name, error = %err, "undelivered certificate kept");
                    }
                }
                Err(failure)
            }
        }
    }

    async fn grant_access(
        &self,
        device_name: &str,
        certificate: &DeviceCertificate,
    ) -> Result<ProvisionedDevice, (OnboardingStep, ProvisioningError)> {
        let cfg = &self.config;

        let policy = policy::fleet_policy_document(&cfg.role_alias);
        self.backend
            .ensure_policy_attached(
                &cfg.policy_name,
                &policy,
                &certificate.certificate_arn,
                device_name,
            )
            .await
            .map_err(|err| (OnboardingStep::Policy, err))?;

        let permissions = policy::credentials_role_permissions(&cfg.fleet_name, &cfg.tenant_stream);
        let role_alias = self
            .backend
            .ensure_role_alias(&cfg.credentials_role, &permissions, &cfg.role_alias)
            .await
            .map_err(|err| (OnboardingStep::RoleAlias, err))?;

        self.backend
            .ensure_bucket(&cfg.resource_bucket)
            .await
            .map_err(|err| (OnboardingStep::ResourceBucket, err))?;

        Ok(ProvisionedDevice {
            certificate_arn: certificate.certificate_arn.clone(),
            thing_name: device_name.to_string(),
            role_alias,
            resource_bucket: cfg.resource_bucket.clone(),
        })
    }
}
