//! Per-attempt telemetry events.
//!
//! The gateway emits exactly one [`AttemptEvent`] per provider attempt
//! to an external observability collaborator behind the
//! [`TelemetrySink`] seam. Aggregation and alerting happen elsewhere.

use brightpath_core::RequestId;
use brightpath_provider::{CallErrorKind, ProviderId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt produced a usable response.
    Success,
    /// The attempt failed; `error_kind` carries the classification.
    Failure,
}

/// One structured event per provider attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEvent {
    /// The dispatch this attempt belongs to.
    pub request_id: RequestId,
    /// Provider attempted.
    pub provider: ProviderId,
    /// 1-based attempt number within the dispatch.
    pub attempt_number: u32,
    /// Outcome of the attempt.
    pub outcome: AttemptOutcome,
    /// Attempt latency in milliseconds.
    pub latency_ms: u64,
    /// Tokens reported by the provider (0 on failure).
    pub tokens_used: u32,
    /// Cost incurred by the attempt (0 on failure).
    pub cost_usd: f64,
    /// Failure classification, when the attempt failed.
    pub error_kind: Option<CallErrorKind>,
}

/// Sink for attempt events.
pub trait TelemetrySink: Send + Sync {
    /// Records one attempt event.
    fn record(&self, event: AttemptEvent);
}

/// Sink that discards every event.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _event: AttemptEvent) {}
}

/// Sink that retains events in memory, for tests and local debugging.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<AttemptEvent> {
        self.events.lock().expect("telemetry lock poisoned").clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: AttemptEvent) {
        self.events.lock().expect("telemetry lock poisoned").push(event);
    }
}
