//! Gateway configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate, either
//! from a catalog file or from environment variables with `__`
//! separators. Every tunable carries a serde default so deployments
//! only state what they change.

use crate::budget::BudgetLimits;
use crate::circuit::CircuitBreakerConfig;
use crate::registry::{Catalog, CatalogError};
use crate::retry::RetryPolicy;
use brightpath_provider::ProviderDescriptor;
use serde::Deserialize;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// The provider catalog.
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,

    /// Circuit-breaker tuning.
    #[serde(default)]
    pub circuit: CircuitSettings,

    /// Retry/backoff tuning.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Daily budget ceilings.
    #[serde(default)]
    pub budget: BudgetSettings,

    /// Idempotency de-dup window in seconds.
    #[serde(default = "default_dedup_ttl_seconds")]
    pub dedup_ttl_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            circuit: CircuitSettings::default(),
            retry: RetrySettings::default(),
            budget: BudgetSettings::default(),
            dedup_ttl_seconds: default_dedup_ttl_seconds(),
        }
    }
}

/// Circuit-breaker configuration surface.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive failures that trip a breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures further apart than this do not count as consecutive.
    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: u64,

    /// Cooldown after the first trip, in milliseconds.
    #[serde(default = "default_base_cooldown_ms")]
    pub base_cooldown_ms: u64,

    /// Cap on the doubling cooldown, in milliseconds.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window_seconds() -> u64 {
    60
}

fn default_base_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_seconds: default_failure_window_seconds(),
            base_cooldown_ms: default_base_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl CircuitSettings {
    /// Converts to the runtime breaker config.
    #[must_use]
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_seconds),
            base_cooldown: Duration::from_millis(self.base_cooldown_ms),
            max_cooldown: Duration::from_millis(self.max_cooldown_ms),
        }
    }
}

/// Retry/backoff configuration surface.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Attempts per candidate, including the first.
    #[serde(default = "default_max_attempts_per_provider")]
    pub max_attempts_per_provider: u32,

    /// Backoff before the second attempt, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Cap on the exponential backoff, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Jitter fraction applied to each backoff.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts_per_provider() -> u32 {
    2
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts_per_provider: default_max_attempts_per_provider(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    /// Converts to the runtime retry policy.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_provider: self.max_attempts_per_provider,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }
}

/// Budget configuration surface.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// Per-user daily ceiling in USD.
    #[serde(default = "default_per_user_daily_usd")]
    pub per_user_daily_usd: f64,

    /// System-wide daily ceiling in USD.
    #[serde(default = "default_system_daily_usd")]
    pub system_daily_usd: f64,
}

fn default_per_user_daily_usd() -> f64 {
    5.0
}

fn default_system_daily_usd() -> f64 {
    500.0
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            per_user_daily_usd: default_per_user_daily_usd(),
            system_daily_usd: default_system_daily_usd(),
        }
    }
}

impl BudgetSettings {
    /// Converts to the runtime limits.
    #[must_use]
    pub fn to_limits(&self) -> BudgetLimits {
        BudgetLimits {
            per_user_daily_usd: self.per_user_daily_usd,
            system_daily_usd: self.system_daily_usd,
        }
    }
}

fn default_dedup_ttl_seconds() -> u64 {
    300
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Builds the validated provider catalog, consuming the entries.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] for duplicate or invalid descriptors.
    pub fn into_catalog(self) -> Result<Catalog, CatalogError> {
        Catalog::new(self.providers)
    }

    /// The de-dup window as a [`Duration`].
    #[must_use]
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brightpath_provider::{Capability, WireShape};
    use std::io::Write;

    #[test]
    fn defaults_cover_every_tunable() {
        let config = GatewayConfig::default();
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.retry.max_attempts_per_provider, 2);
        assert!((config.budget.per_user_daily_usd - 5.0).abs() < 1e-9);
        assert_eq!(config.dedup_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn loads_catalog_file_with_partial_overrides() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp config");
        write!(
            file,
            r#"
dedup_ttl_seconds = 120

[circuit]
failure_threshold = 3

[budget]
per_user_daily_usd = 2.5

[[providers]]
id = "anthropic-sonnet"
model = "claude-sonnet-4-20250514"
wire = "anthropic_messages"
base_url = "https://api.anthropic.com"
api_key_env = "ANTHROPIC_API_KEY"
priority = 10
capabilities = ["text", "structured_json"]

[providers.cost]
input_per_1k_usd = 0.003
output_per_1k_usd = 0.015

[[providers]]
id = "openai-gpt4o-mini"
model = "gpt-4o-mini"
wire = "open_ai_chat"
base_url = "https://api.openai.com"
api_key_env = "OPENAI_API_KEY"
"#
        )
        .expect("write temp config");

        let config =
            GatewayConfig::from_file(file.path().to_str().expect("utf-8 path")).expect("load");

        assert_eq!(config.dedup_ttl_seconds, 120);
        assert_eq!(config.circuit.failure_threshold, 3);
        // Unstated circuit fields keep their defaults.
        assert_eq!(config.circuit.base_cooldown_ms, 30_000);
        assert!((config.budget.per_user_daily_usd - 2.5).abs() < 1e-9);

        assert_eq!(config.providers.len(), 2);
        let sonnet = &config.providers[0];
        assert_eq!(sonnet.wire, WireShape::AnthropicMessages);
        assert_eq!(sonnet.priority, 10);
        assert!(sonnet.capabilities.contains(&Capability::StructuredJson));
        assert!((sonnet.cost.output_per_1k_usd - 0.015).abs() < 1e-9);

        // The second entry relies on descriptor defaults.
        let mini = &config.providers[1];
        assert_eq!(mini.priority, 100);
        assert_eq!(mini.attempt_timeout_ms, 30_000);
        assert!(mini.capabilities.contains(&Capability::Text));

        let catalog = config.into_catalog().expect("valid catalog");
        assert_eq!(catalog.providers().len(), 2);
    }

    #[test]
    fn settings_convert_to_runtime_types() {
        let circuit = CircuitSettings {
            failure_threshold: 4,
            failure_window_seconds: 30,
            base_cooldown_ms: 1_000,
            max_cooldown_ms: 8_000,
        }
        .to_config();
        assert_eq!(circuit.failure_threshold, 4);
        assert_eq!(circuit.base_cooldown, Duration::from_secs(1));

        let retry = RetrySettings::default().to_policy();
        assert_eq!(retry.max_attempts_per_provider, 2);
        assert_eq!(retry.base_backoff, Duration::from_millis(200));
    }
}
