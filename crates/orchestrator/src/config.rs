use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "EDGE_ORCH";

const DAY_SECS: u64 = 24 * 60 * 60;
pub const MAX_ACK_TIMEOUT_SECS: u64 = 7 * DAY_SECS;
pub const MAX_SWEEP_INTERVAL_SECS: u64 = DAY_SECS;
pub const MAX_CONFLICT_BACKOFF_MS: u64 = 60_000;
pub const MAX_CERTIFICATE_VALIDITY_DAYS: u32 = 20 * 365;
pub const MAX_LOG_RETENTION_SECS: u64 = 10 * 365 * DAY_SECS;

fn check_range(key: &str, value: u64, max: u64) -> anyhow::Result<()> {
    if value == 0 || value > max {
        anyhow::bail!("{key} must be between 1 and {max}, got {value}");
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub metrics: ServerConfig,
    pub database: DatabaseConfig,
    pub operator: OperatorAuthConfig,
    pub fleet: FleetConfig,
    pub onboarding: OnboardingConfig,
    pub retention: RetentionConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorAuthConfig {
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub tokens: Vec<String>,
    pub header_name: String,
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(value) => Ok(value.split(',').map(|s| s.to_string()).collect()),
        StringOrVec::Vec(values) => Ok(values),
    }
}

/// Command dispatch and acknowledgement tracking.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Pending jobs older than this are marked TIMED_OUT.
    pub ack_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Extra attempts after a lost compare-and-set before answering 409.
    pub conflict_retries: u32,
    pub conflict_backoff_ms: u64,
    pub conflict_backoff_max_ms: u64,
    /// Upper bound for manual job retries.
    pub max_dispatch_attempts: u32,
}

impl FleetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_range("fleet.ack_timeout_secs", self.ack_timeout_secs, MAX_ACK_TIMEOUT_SECS)?;
        check_range(
            "fleet.sweep_interval_secs",
            self.sweep_interval_secs,
            MAX_SWEEP_INTERVAL_SECS,
        )?;
        check_range(
            "fleet.conflict_backoff_max_ms",
            self.conflict_backoff_max_ms,
            MAX_CONFLICT_BACKOFF_MS,
        )?;
        if self.conflict_backoff_ms == 0 {
            anyhow::bail!("fleet.conflict_backoff_ms must be > 0");
        }
        if self.conflict_backoff_max_ms < self.conflict_backoff_ms {
            anyhow::bail!("fleet.conflict_backoff_max_ms must be >= fleet.conflict_backoff_ms");
        }
        if self.max_dispatch_attempts == 0 {
            anyhow::bail!("fleet.max_dispatch_attempts must be > 0");
        }
        Ok(())
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 60,
            sweep_interval_secs: 15,
            conflict_retries: 3,
            conflict_backoff_ms: 50,
            conflict_backoff_max_ms: 1000,
            max_dispatch_attempts: 5,
        }
    }
}

/// Names of the per-fleet resources created while onboarding a gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingConfig {
    pub fleet_name: String,
    pub policy_name: String,
    pub role_alias: String,
    pub credentials_role: String,
    pub resource_bucket: String,
    /// Directory the local backend creates buckets under.
    pub resource_root: String,
    /// The single telemetry stream gateways may write to.
    pub tenant_stream: String,
    pub certificate_validity_days: u32,
}

impl OnboardingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("onboarding.fleet_name", &self.fleet_name),
            ("onboarding.policy_name", &self.policy_name),
            ("onboarding.role_alias", &self.role_alias),
            ("onboarding.credentials_role", &self.credentials_role),
            ("onboarding.resource_bucket", &self.resource_bucket),
            ("onboarding.resource_root", &self.resource_root),
            ("onboarding.tenant_stream", &self.tenant_stream),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("{key} cannot be empty");
            }
        }
        check_range(
            "onboarding.certificate_validity_days",
            u64::from(self.certificate_validity_days),
            u64::from(MAX_CERTIFICATE_VALIDITY_DAYS),
        )?;
        Ok(())
    }
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            fleet_name: "edge-fleet".into(),
            policy_name: "edge-fleet-gateway-policy".into(),
            role_alias: "edge-fleet-token-exchange".into(),
            credentials_role: "edge-fleet-gateway-role".into(),
            resource_bucket: "edge-fleet-resources".into(),
            resource_root: "data/buckets".into(),
            tenant_stream: "edge-fleet-telemetry".into(),
            certificate_validity_days: 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    pub logs_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl RetentionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_range(
            "retention.cleanup_interval_secs",
            self.cleanup_interval_secs,
            MAX_SWEEP_INTERVAL_SECS,
        )?;
        if self.logs_secs > MAX_LOG_RETENTION_SECS {
            anyhow::bail!("retention.logs_secs must be at most {MAX_LOG_RETENTION_SECS}");
        }
        Ok(())
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            logs_secs: 7 * 24 * 60 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub migrations_dry_run_on_start: bool,
}

pub fn load() -> anyhow::Result<AppConfig> {
    let fleet = FleetConfig::default();
    let onboarding = OnboardingConfig::default();
    let retention = RetentionConfig::default();

    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings are not coerced.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(env)
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("metrics.host", "0.0.0.0")?
        .set_default("metrics.port", 9090)?
        .set_default("database.url", "sqlite://data/orchestrator.db")?
        .set_default("operator.tokens", vec!["dev-operator-token"])?
        .set_default("operator.header_name", "authorization")?
        .set_default("fleet.ack_timeout_secs", fleet.ack_timeout_secs)?
        .set_default("fleet.sweep_interval_secs", fleet.sweep_interval_secs)?
        .set_default("fleet.conflict_retries", fleet.conflict_retries)?
        .set_default("fleet.conflict_backoff_ms", fleet.conflict_backoff_ms)?
        .set_default("fleet.conflict_backoff_max_ms", fleet.conflict_backoff_max_ms)?
        .set_default("fleet.max_dispatch_attempts", fleet.max_dispatch_attempts)?
        .set_default("onboarding.fleet_name", onboarding.fleet_name)?
        .set_default("onboarding.policy_name", onboarding.policy_name)?
        .set_default("onboarding.role_alias", onboarding.role_alias)?
        .set_default("onboarding.credentials_role", onboarding.credentials_role)?
        .set_default("onboarding.resource_bucket", onboarding.resource_bucket)?
        .set_default("onboarding.resource_root", onboarding.resource_root)?
        .set_default("onboarding.tenant_stream", onboarding.tenant_stream)?
        .set_default(
            "onboarding.certificate_validity_days",
            onboarding.certificate_validity_days,
        )?
        .set_default("retention.logs_secs", retention.logs_secs)?
        .set_default(
            "retention.cleanup_interval_secs",
            retention.cleanup_interval_secs,
        )?
        .set_default("features.migrations_dry_run_on_start", false)?;

    let cfg = builder.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    app.operator.header_name = app.operator.header_name.trim().to_string();
    app.fleet.validate()?;
    app.onboarding.validate()?;
    app.retention.validate()?;
    Ok(app)
}
