//! Terminal dispatch errors.
//!
//! Callers never see a raw provider-level error: every dispatch resolves
//! to a [`ResponseEnvelope`](crate::envelope::ResponseEnvelope) or one of
//! these typed kinds, annotated with provider id and attempt count where
//! meaningful. Whether a kind maps to "try again later" or "feature
//! unavailable" is the calling feature service's decision.

use brightpath_provider::{Capability, ProviderId};
use std::collections::BTreeSet;
use std::fmt;

/// The terminal error outcome of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// No registered provider advertises every required capability.
    NoCapableProvider {
        required: BTreeSet<Capability>,
    },
    /// Every eligible candidate was rate-exhausted within the budget.
    RateLimited {
        candidates: usize,
    },
    /// Every eligible candidate's circuit was open.
    CircuitOpen {
        candidates: usize,
    },
    /// The chain was exhausted; the last attempted candidate could not
    /// be reached at all.
    ProviderUnavailable {
        provider: ProviderId,
        attempts: u32,
        reason: String,
    },
    /// The chain was exhausted; the last attempted candidate kept
    /// failing transiently.
    Transient {
        provider: ProviderId,
        attempts: u32,
        reason: String,
    },
    /// The chain was exhausted; the last attempted candidate kept
    /// producing output that failed validation, including after the
    /// corrective re-prompt.
    InvalidResponse {
        provider: ProviderId,
        attempts: u32,
        reason: String,
    },
    /// The request itself was rejected; no further candidates were tried.
    Permanent {
        provider: ProviderId,
        reason: String,
    },
    /// The projected cost would breach a spending ceiling; no network
    /// call was made for the breaching candidate.
    BudgetExceeded {
        projected_usd: f64,
        remaining_usd: f64,
    },
    /// The overall latency budget elapsed.
    Timeout {
        attempts: u32,
        elapsed_ms: u64,
    },
}

impl DispatchError {
    /// Stable string form used in telemetry and logs.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::NoCapableProvider { .. } => "no_capable_provider",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::Transient { .. } => "transient",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Permanent { .. } => "permanent",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCapableProvider { required } => {
                let tags: Vec<String> = required.iter().map(ToString::to_string).collect();
                write!(f, "no provider supports [{}]", tags.join(", "))
            }
            Self::RateLimited { candidates } => {
                write!(f, "all {candidates} candidate providers rate-exhausted")
            }
            Self::CircuitOpen { candidates } => {
                write!(f, "all {candidates} candidate providers have open circuits")
            }
            Self::ProviderUnavailable {
                provider,
                attempts,
                reason,
            } => {
                write!(
                    f,
                    "chain exhausted after {attempts} attempts, '{provider}' unreachable: {reason}"
                )
            }
            Self::Transient {
                provider,
                attempts,
                reason,
            } => {
                write!(
                    f,
                    "chain exhausted after {attempts} attempts, '{provider}' failing: {reason}"
                )
            }
            Self::InvalidResponse {
                provider,
                attempts,
                reason,
            } => {
                write!(
                    f,
                    "invalid output from '{provider}' after {attempts} attempts: {reason}"
                )
            }
            Self::Permanent { provider, reason } => {
                write!(f, "request rejected by '{provider}': {reason}")
            }
            Self::BudgetExceeded {
                projected_usd,
                remaining_usd,
            } => {
                write!(
                    f,
                    "projected cost ${projected_usd:.4} exceeds remaining budget ${remaining_usd:.4}"
                )
            }
            Self::Timeout {
                attempts,
                elapsed_ms,
            } => {
                write!(f, "latency budget exhausted after {attempts} attempts ({elapsed_ms}ms)")
            }
        }
    }
}

impl std::error::Error for DispatchError {}
