use anyhow::Context;
use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use subtle::ConstantTimeEq;

use crate::{
    config::{FleetConfig, OperatorAuthConfig, RetentionConfig},
    fleet::FleetMessageRouter,
    onboarding::DeviceOnboardingCoordinator,
    persistence::{Db, MigrationSnapshot},
};

/// Handles shared by every request handler and background loop.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub fleet: FleetMessageRouter,
    pub onboarding: DeviceOnboardingCoordinator,
    pub operator_auth: OperatorAuth,
    pub fleet_config: FleetConfig,
    pub retention: RetentionConfig,
    pub metrics_handle: PrometheusHandle,
    /// Schema state at boot, reported by `/health`.
    pub schema: MigrationSnapshot,
}

/// Accepted operator tokens and the header they arrive in.
#[derive(Clone)]
pub struct OperatorAuth {
    pub tokens: Vec<String>,
    pub header_name: HeaderName,
}

impl OperatorAuth {
    /// Drops blank tokens; at least one must remain.
    pub fn from_config(config: &OperatorAuthConfig) -> crate::Result<Self> {
        let tokens: Vec<String> = config
            .tokens
            .iter()
            .map(|token| token.trim())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            anyhow::bail!("EDGE_ORCH__OPERATOR__TOKENS cannot be empty");
        }
        let header_name = config
            .header_name
            .parse::<HeaderName>()
            .context("invalid operator header name")?;
        Ok(Self {
            tokens,
            header_name,
        })
    }

    pub fn is_token(&self, candidate: &str) -> bool {
        let candidate = candidate.as_bytes();
        self.tokens
            .iter()
            .map(String::as_bytes)
            .filter(|token| token.len() == candidate.len())
            .any(|token| bool::from(token.ct_eq(candidate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tokens: &[&str], header_name: &str) -> OperatorAuthConfig {
        OperatorAuthConfig {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            header_name: header_name.into(),
        }
    }

    #[test]
    fn token_match_requires_exact_value() {
        let auth = OperatorAuth::from_config(&config(&["op-token", " second "], "authorization"))
            .expect("auth");
        assert!(auth.is_token("op-token"));
        assert!(auth.is_token("second"));
        assert!(!auth.is_token("op-toke"));
        assert!(!auth.is_token("op-token2"));
        assert!(!auth.is_token(""));
    }

    #[test]
    fn blank_token_lists_and_bad_headers_are_rejected() {
        let err = OperatorAuth::from_config(&config(&["", "  "], "authorization"))
            .err()
            .expect("blank tokens");
        assert!(err.to_string().contains("cannot be empty"));

        assert!(OperatorAuth::from_config(&config(&["op"], "bad header")).is_err());
    }
}
