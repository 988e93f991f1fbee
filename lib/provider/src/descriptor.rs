//! Provider catalog entries.
//!
//! A [`ProviderDescriptor`] describes one provider/model pairing: what it
//! can do, what it costs, how hard it may be driven, and which wire shape
//! its API speaks. Descriptors are immutable after load and replaced
//! wholesale when the catalog is reloaded.

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Unique identifier for a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Creates a provider ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The wire shape a provider's native API speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireShape {
    /// OpenAI-compatible chat completions (`/v1/chat/completions`).
    OpenAiChat,
    /// Anthropic messages (`/v1/messages`).
    AnthropicMessages,
}

impl WireShape {
    /// Returns the request path appended to the provider's base URL.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::OpenAiChat => "/v1/chat/completions",
            Self::AnthropicMessages => "/v1/messages",
        }
    }
}

/// Cost per 1k tokens, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRate {
    /// USD per 1k input tokens.
    pub input_per_1k_usd: f64,
    /// USD per 1k output tokens.
    pub output_per_1k_usd: f64,
}

impl CostRate {
    /// Creates a cost rate.
    #[must_use]
    pub const fn new(input_per_1k_usd: f64, output_per_1k_usd: f64) -> Self {
        Self {
            input_per_1k_usd,
            output_per_1k_usd,
        }
    }

    /// Projected cost for an estimated token count.
    ///
    /// Estimates do not distinguish input from output, so the blended
    /// rate is applied to the whole estimate.
    #[must_use]
    pub fn projected_usd(&self, estimated_tokens: u32) -> f64 {
        f64::from(estimated_tokens) / 1000.0 * self.blended_per_1k_usd()
    }

    /// Actual cost for a measured input/output token split.
    #[must_use]
    pub fn actual_usd(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1000.0 * self.input_per_1k_usd
            + f64::from(output_tokens) / 1000.0 * self.output_per_1k_usd
    }

    /// Average of the two directional rates, used for projection and
    /// cost-based ordering.
    #[must_use]
    pub fn blended_per_1k_usd(&self) -> f64 {
        (self.input_per_1k_usd + self.output_per_1k_usd) / 2.0
    }
}

impl Default for CostRate {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Admission limits for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Maximum requests per minute.
    pub requests_per_minute: u32,
    /// Maximum estimated tokens per minute.
    pub tokens_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 60_000,
        }
    }
}

/// Catalog entry describing one provider/model pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider ID.
    pub id: ProviderId,
    /// Model identifier sent on the wire.
    pub model: String,
    /// Which wire shape this provider's API speaks.
    pub wire: WireShape,
    /// Base URL for the API (scheme and host, no path).
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Capability tags this provider advertises.
    #[serde(default = "default_capabilities")]
    pub capabilities: BTreeSet<Capability>,
    /// Priority rank; lower ranks are tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Cost per 1k tokens.
    #[serde(default)]
    pub cost: CostRate,
    /// Admission limits.
    #[serde(default)]
    pub limits: RateLimits,
    /// Per-attempt network timeout in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_capabilities() -> BTreeSet<Capability> {
    [Capability::Text].into_iter().collect()
}

fn default_priority() -> u32 {
    100
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

impl ProviderDescriptor {
    /// Creates a descriptor with default priority, cost, and limits.
    #[must_use]
    pub fn new(
        id: impl Into<ProviderId>,
        model: impl Into<String>,
        wire: WireShape,
        base_url: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            wire,
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            capabilities: default_capabilities(),
            priority: default_priority(),
            cost: CostRate::default(),
            limits: RateLimits::default(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }

    /// Sets the capability tags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// Sets the priority rank (lower is tried first).
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cost rate.
    #[must_use]
    pub fn with_cost(mut self, cost: CostRate) -> Self {
        self.cost = cost;
        self
    }

    /// Sets the admission limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, attempt_timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = attempt_timeout_ms;
        self
    }

    /// Per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Returns true when this provider advertises every required capability.
    #[must_use]
    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        self.capabilities.is_superset(required)
    }

    /// Full endpoint URL for this provider's wire shape.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.wire.path())
    }
}
