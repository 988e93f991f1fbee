//! Per-provider circuit breakers.
//!
//! Isolating failures per provider keeps one degraded provider from
//! starving requests that could succeed elsewhere, and stops the
//! gateway from paying latency and cost to hammer a provider that is
//! down.
//!
//! State machine per provider:
//! - CLOSED -> OPEN after `failure_threshold` consecutive failures
//!   within the failure window.
//! - OPEN -> HALF_OPEN once the cooldown elapses; exactly one probe is
//!   admitted.
//! - HALF_OPEN -> CLOSED on probe success; -> OPEN with an extended
//!   (doubling, capped) cooldown on probe failure.

use brightpath_provider::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Breaker tuning shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Failures further apart than this do not count as consecutive.
    pub failure_window: Duration,
    /// Cooldown after the first trip.
    pub base_cooldown: Duration,
    /// Upper bound on the doubling cooldown.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// The observable state of one provider's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are blocked until the cooldown elapses.
    Open,
    /// One probe request is permitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{name}")
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// The call may proceed.
    Admitted,
    /// The circuit is open (or a probe is already in flight).
    Denied { retry_in: Duration },
}

impl CircuitDecision {
    /// Returns true if the call may proceed.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Point-in-time view of one provider's circuit, for operational
/// visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failure count.
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct CircuitCore {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    open_until: Option<Instant>,
    /// Consecutive trips without an intervening success; drives the
    /// doubling cooldown.
    open_count: u32,
    probe_in_flight: bool,
}

impl CircuitCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            open_until: None,
            open_count: 0,
            probe_in_flight: false,
        }
    }
}

/// Registry of circuit breakers, keyed by provider ID.
///
/// Constructed explicitly at gateway startup; state lives for the
/// process lifetime and survives catalog reloads.
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    state: RwLock<HashMap<ProviderId, Arc<Mutex<CircuitCore>>>>,
}

impl CircuitRegistry {
    /// Creates a registry with the given tuning.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Checks whether a call to the provider may proceed.
    pub fn allow(&self, provider: &ProviderId) -> CircuitDecision {
        self.allow_at(provider, Instant::now())
    }

    /// Admission check at an explicit instant.
    ///
    /// Materializes the OPEN -> HALF_OPEN transition when the cooldown
    /// has elapsed; the admitted call is the probe, and a second check
    /// is denied until the probe resolves.
    pub fn allow_at(&self, provider: &ProviderId, now: Instant) -> CircuitDecision {
        let core = self.core_for(provider);
        let mut core = core.lock().expect("circuit lock poisoned");

        match core.state {
            CircuitState::Closed => CircuitDecision::Admitted,
            CircuitState::Open => {
                let until = core.open_until.unwrap_or(now);
                if now >= until {
                    core.state = CircuitState::HalfOpen;
                    core.probe_in_flight = true;
                    CircuitDecision::Admitted
                } else {
                    CircuitDecision::Denied {
                        retry_in: until.saturating_duration_since(now),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if core.probe_in_flight {
                    CircuitDecision::Denied {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    core.probe_in_flight = true;
                    CircuitDecision::Admitted
                }
            }
        }
    }

    /// Records a successful call: the circuit closes and all failure
    /// bookkeeping resets.
    pub fn record_success(&self, provider: &ProviderId) {
        let core = self.core_for(provider);
        let mut core = core.lock().expect("circuit lock poisoned");
        core.state = CircuitState::Closed;
        core.consecutive_failures = 0;
        core.last_failure_at = None;
        core.open_until = None;
        core.open_count = 0;
        core.probe_in_flight = false;
    }

    /// Releases an admitted probe without recording an outcome for the
    /// provider.
    ///
    /// Used when the probe attempt failed through no fault of the
    /// provider (the request itself was rejected): the circuit returns
    /// to open and the next caller may probe again.
    pub fn release_probe(&self, provider: &ProviderId) {
        let core = self.core_for(provider);
        let mut core = core.lock().expect("circuit lock poisoned");
        if core.state == CircuitState::HalfOpen && core.probe_in_flight {
            core.probe_in_flight = false;
            core.state = CircuitState::Open;
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, provider: &ProviderId) {
        self.record_failure_at(provider, Instant::now());
    }

    /// Records a failed call at an explicit instant.
    pub fn record_failure_at(&self, provider: &ProviderId, now: Instant) {
        let core = self.core_for(provider);
        let mut core = core.lock().expect("circuit lock poisoned");

        match core.state {
            CircuitState::HalfOpen => {
                // Probe failure: reopen with an extended cooldown.
                core.consecutive_failures += 1;
                core.last_failure_at = Some(now);
                core.open_count += 1;
                core.state = CircuitState::Open;
                core.open_until = Some(now + self.cooldown_for(core.open_count));
                core.probe_in_flight = false;
            }
            CircuitState::Closed => {
                if let Some(last) = core.last_failure_at {
                    if now.saturating_duration_since(last) > self.config.failure_window {
                        core.consecutive_failures = 0;
                    }
                }
                core.consecutive_failures += 1;
                core.last_failure_at = Some(now);
                if core.consecutive_failures >= self.config.failure_threshold {
                    core.open_count += 1;
                    core.state = CircuitState::Open;
                    core.open_until = Some(now + self.cooldown_for(core.open_count));
                }
            }
            CircuitState::Open => {
                core.consecutive_failures += 1;
                core.last_failure_at = Some(now);
            }
        }
    }

    /// Point-in-time view of a provider's circuit.
    #[must_use]
    pub fn snapshot(&self, provider: &ProviderId) -> CircuitSnapshot {
        let Some(core) = self
            .state
            .read()
            .expect("circuit registry lock poisoned")
            .get(provider)
            .cloned()
        else {
            return CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            };
        };
        let core = core.lock().expect("circuit lock poisoned");
        CircuitSnapshot {
            state: core.state,
            consecutive_failures: core.consecutive_failures,
        }
    }

    fn cooldown_for(&self, open_count: u32) -> Duration {
        let base_ms = u64::try_from(self.config.base_cooldown.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.config.max_cooldown.as_millis()).unwrap_or(u64::MAX);
        let doublings = open_count.saturating_sub(1).min(16);
        Duration::from_millis(base_ms.saturating_mul(1 << doublings).min(max_ms))
    }

    fn core_for(&self, provider: &ProviderId) -> Arc<Mutex<CircuitCore>> {
        if let Some(core) = self
            .state
            .read()
            .expect("circuit registry lock poisoned")
            .get(provider)
        {
            return Arc::clone(core);
        }

        let mut state = self.state.write().expect("circuit registry lock poisoned");
        Arc::clone(
            state
                .entry(provider.clone())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitCore::new()))),
        )
    }
}
