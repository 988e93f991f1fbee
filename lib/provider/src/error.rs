//! Per-attempt error classification.
//!
//! Wire adapters map every provider-specific failure onto [`CallError`]
//! so the gateway's retry/fallback logic never has to understand
//! provider-specific semantics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a single failed provider attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Retriable in place: timeout, provider-side 5xx, or 429.
    Transient { reason: String },
    /// Transport failure; the provider could not be reached at all.
    ProviderUnavailable { reason: String },
    /// The reply did not satisfy the demanded structure.
    InvalidResponse { reason: String },
    /// The request itself was rejected; no provider will accept it.
    Permanent { reason: String },
}

impl CallError {
    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> CallErrorKind {
        match self {
            Self::Transient { .. } => CallErrorKind::Transient,
            Self::ProviderUnavailable { .. } => CallErrorKind::ProviderUnavailable,
            Self::InvalidResponse { .. } => CallErrorKind::InvalidResponse,
            Self::Permanent { .. } => CallErrorKind::Permanent,
        }
    }

    /// Returns the underlying reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason }
            | Self::ProviderUnavailable { reason }
            | Self::InvalidResponse { reason }
            | Self::Permanent { reason } => reason,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient { reason } => write!(f, "transient provider failure: {reason}"),
            Self::ProviderUnavailable { reason } => {
                write!(f, "provider unavailable: {reason}")
            }
            Self::InvalidResponse { reason } => {
                write!(f, "invalid provider response: {reason}")
            }
            Self::Permanent { reason } => write!(f, "request rejected: {reason}"),
        }
    }
}

impl std::error::Error for CallError {}

/// The kind of a [`CallError`], for telemetry and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    /// Retriable in place.
    Transient,
    /// Escalate to the next candidate.
    ProviderUnavailable,
    /// One corrective re-prompt, then escalate.
    InvalidResponse,
    /// Abort the whole chain.
    Permanent,
}

impl CallErrorKind {
    /// Stable string form used in telemetry events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::InvalidResponse => "invalid_response",
            Self::Permanent => "permanent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_kind_and_reason() {
        let err = CallError::Transient {
            reason: "status 503".to_string(),
        };
        assert_eq!(err.kind(), CallErrorKind::Transient);
        assert_eq!(err.reason(), "status 503");
    }

    #[test]
    fn call_error_display() {
        let err = CallError::ProviderUnavailable {
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("provider unavailable"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn kind_string_form() {
        assert_eq!(CallErrorKind::InvalidResponse.as_str(), "invalid_response");
        assert_eq!(CallErrorKind::Permanent.as_str(), "permanent");
    }
}
