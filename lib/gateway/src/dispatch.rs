//! The orchestrator façade.
//!
//! [`Gateway::dispatch`] drives one request to exactly one terminal
//! outcome: registry chain selection, then per candidate the budget
//! pre-flight, rate-limit admission, circuit admission, and the bounded
//! attempt loop, all under the request's latency budget. Candidates are
//! attempted strictly sequentially in chain order; attempts are never
//! raced in parallel, keeping cost and generation side effects bounded.
//!
//! Dropping the returned future cancels the dispatch: every await point
//! is cancel-safe because shared state is only mutated synchronously
//! after an await completes.

use crate::budget::{BudgetError, BudgetLedger, BudgetLimits, CostTracker, LedgerError};
use crate::circuit::{CircuitBreakerConfig, CircuitDecision, CircuitRegistry, CircuitState};
use crate::config::GatewayConfig;
use crate::dedup::DedupCache;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::DispatchError;
use crate::rate_limit::{AcquireResult, RateLimiter};
use crate::registry::{Catalog, CatalogError, ProviderRegistry};
use crate::retry::RetryPolicy;
use crate::telemetry::{AttemptEvent, AttemptOutcome, TelemetrySink};
use brightpath_core::UserId;
use brightpath_provider::{
    BackendInitError, CallError, CallErrorKind, HttpBackend, ProviderBackend, ProviderId,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Runtime tuning assembled from [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Circuit-breaker tuning.
    pub circuit: CircuitBreakerConfig,
    /// Retry/backoff tuning.
    pub retry: RetryPolicy,
    /// Daily budget ceilings.
    pub budget: BudgetLimits,
    /// Idempotency de-dup window.
    pub dedup_ttl: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            circuit: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            budget: BudgetLimits::default(),
            dedup_ttl: Duration::from_secs(300),
        }
    }
}

impl GatewaySettings {
    /// Extracts runtime tuning from a configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            circuit: config.circuit.to_config(),
            retry: config.retry.to_policy(),
            budget: config.budget.to_limits(),
            dedup_ttl: config.dedup_ttl(),
        }
    }
}

/// Errors constructing a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayInitError {
    /// The provider catalog failed validation.
    Catalog(CatalogError),
    /// A backend could not be constructed.
    Backend(BackendInitError),
}

impl fmt::Display for GatewayInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(e) => write!(f, "catalog error: {e}"),
            Self::Backend(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for GatewayInitError {}

/// The AI gateway: single entry point for every provider call made by
/// the platform's feature services.
pub struct Gateway {
    registry: ProviderRegistry,
    backends: RwLock<Arc<HashMap<ProviderId, Arc<dyn ProviderBackend>>>>,
    limiter: RateLimiter,
    circuits: CircuitRegistry,
    cost: CostTracker,
    dedup: DedupCache,
    retry: RetryPolicy,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Gateway {
    /// Creates a gateway over a catalog and matching backends.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        backends: Vec<Arc<dyn ProviderBackend>>,
        ledger: Arc<dyn BudgetLedger>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: GatewaySettings,
    ) -> Self {
        let backends: HashMap<ProviderId, Arc<dyn ProviderBackend>> = backends
            .into_iter()
            .map(|backend| (backend.provider().clone(), backend))
            .collect();

        Self {
            registry: ProviderRegistry::new(catalog),
            backends: RwLock::new(Arc::new(backends)),
            limiter: RateLimiter::new(),
            circuits: CircuitRegistry::new(settings.circuit),
            cost: CostTracker::new(ledger, settings.budget),
            dedup: DedupCache::new(settings.dedup_ttl),
            retry: settings.retry,
            telemetry,
        }
    }

    /// Creates a gateway from configuration, building an [`HttpBackend`]
    /// per cataloged provider with API keys read from the environment.
    ///
    /// # Errors
    ///
    /// Returns a report over [`GatewayInitError`] for an invalid catalog
    /// or a missing API key.
    pub fn from_config(
        config: GatewayConfig,
        ledger: Arc<dyn BudgetLedger>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> brightpath_core::Result<Self, GatewayInitError> {
        let settings = GatewaySettings::from_config(&config);
        let catalog = config
            .into_catalog()
            .map_err(GatewayInitError::Catalog)?;

        let mut backends: Vec<Arc<dyn ProviderBackend>> = Vec::new();
        for descriptor in catalog.providers() {
            let backend = HttpBackend::from_env(Arc::clone(descriptor))
                .map_err(GatewayInitError::Backend)?;
            backends.push(Arc::new(backend));
        }

        Ok(Self::new(catalog, backends, ledger, telemetry, settings))
    }

    /// Atomically replaces the catalog and backends.
    ///
    /// In-flight dispatches keep the snapshots they started with.
    /// Circuit and rate-bucket state persists for provider IDs that
    /// survive the reload.
    pub fn reload(&self, catalog: Catalog, backends: Vec<Arc<dyn ProviderBackend>>) {
        let backends: HashMap<ProviderId, Arc<dyn ProviderBackend>> = backends
            .into_iter()
            .map(|backend| (backend.provider().clone(), backend))
            .collect();
        self.registry.reload(catalog);
        *self.backends.write().expect("backend map lock poisoned") = Arc::new(backends);
    }

    /// Remaining budget for a user today, for feature-service
    /// pre-flight checks.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] when the ledger cannot answer.
    pub async fn remaining_budget(&self, user: UserId) -> Result<f64, LedgerError> {
        self.cost.remaining_budget(user).await
    }

    /// Circuit state per cataloged provider, for operational visibility.
    #[must_use]
    pub fn provider_health(&self) -> HashMap<ProviderId, CircuitState> {
        self.registry
            .snapshot()
            .providers()
            .iter()
            .map(|d| (d.id.clone(), self.circuits.snapshot(&d.id).state))
            .collect()
    }

    /// Dispatches one request across the provider chain.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when no provider produces a usable
    /// response within the request's budgets.
    pub async fn dispatch(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<ResponseEnvelope, DispatchError> {
        let started = Instant::now();
        let deadline = started + envelope.latency_budget;

        if let Some(key) = &envelope.idempotency_key {
            if let Some(cached) = self.dedup.get(key) {
                tracing::debug!(request_id = %envelope.request_id, key, "idempotency cache hit");
                return Ok(cached);
            }
        }

        let chain = self.registry.select_chain(&envelope.required_capabilities)?;
        let backends = Arc::clone(&self.backends.read().expect("backend map lock poisoned"));
        let estimated_tokens = envelope.estimate_tokens();

        let mut attempts_total: u32 = 0;
        let mut rate_limited_skip = false;
        let mut circuit_open_skip = false;
        let mut ceiling_skip: Option<f64> = None;
        let mut last_failure: Option<(ProviderId, CallError)> = None;

        'candidates: for descriptor in &chain {
            let provider = &descriptor.id;

            let Some(backend) = backends.get(provider).map(Arc::clone) else {
                tracing::warn!(%provider, "cataloged provider has no backend");
                last_failure = Some((
                    provider.clone(),
                    CallError::ProviderUnavailable {
                        reason: "no backend registered".to_string(),
                    },
                ));
                continue;
            };

            // A candidate whose projected cost exceeds the request's own
            // ceiling is not budget-eligible; cheaper candidates further
            // down the chain may still be.
            let projected_usd = descriptor.cost.projected_usd(estimated_tokens);
            if let Some(ceiling) = envelope.cost_ceiling_usd {
                if projected_usd > ceiling {
                    ceiling_skip =
                        Some(ceiling_skip.map_or(projected_usd, |p| p.min(projected_usd)));
                    continue;
                }
            }

            // A breach of the per-user or system ceiling aborts the
            // whole chain: every candidate draws on the same ledger.
            match self.cost.check(envelope.user_id, projected_usd).await {
                Ok(()) => {}
                Err(BudgetError::Exceeded {
                    projected_usd,
                    remaining_usd,
                }) => {
                    return Err(DispatchError::BudgetExceeded {
                        projected_usd,
                        remaining_usd,
                    });
                }
                Err(BudgetError::Ledger(e)) => {
                    // Fail closed: spend that cannot be accounted is not
                    // admitted.
                    tracing::warn!(error = %e, "budget ledger unavailable, failing closed");
                    return Err(DispatchError::BudgetExceeded {
                        projected_usd,
                        remaining_usd: 0.0,
                    });
                }
            }

            let mut request = envelope.request.clone();
            let mut candidate_attempts: u32 = 0;
            let mut corrective_used = false;

            loop {
                // Single deadline guard per iteration.
                let Some(remaining) = remaining_until(deadline) else {
                    return Err(DispatchError::Timeout {
                        attempts: attempts_total,
                        elapsed_ms: elapsed_ms(started),
                    });
                };

                match self.limiter.try_acquire(descriptor, estimated_tokens) {
                    AcquireResult::Granted => {}
                    AcquireResult::WaitUntil(wait) => {
                        if wait < remaining {
                            tracing::debug!(
                                %provider,
                                wait_ms = wait.as_millis() as u64,
                                "waiting for rate capacity"
                            );
                            tokio::time::sleep(wait).await;
                            continue;
                        }
                        rate_limited_skip = true;
                        continue 'candidates;
                    }
                }

                match self.circuits.allow(provider) {
                    CircuitDecision::Admitted => {}
                    CircuitDecision::Denied { .. } => {
                        circuit_open_skip = true;
                        continue 'candidates;
                    }
                }

                // Once admitted the attempt always resolves the circuit
                // below (record_success, record_failure, or
                // release_probe), so a half-open probe can never be
                // leaked.
                candidate_attempts += 1;
                attempts_total += 1;
                let attempt_started = Instant::now();
                let attempt_timeout = descriptor
                    .attempt_timeout()
                    .min(remaining_until(deadline).unwrap_or(Duration::ZERO));

                let outcome =
                    tokio::time::timeout(attempt_timeout, backend.call(&request)).await;
                let attempt_latency_ms = elapsed_ms(attempt_started);

                match outcome {
                    Ok(Ok(response)) => {
                        self.circuits.record_success(provider);
                        let cost_usd = descriptor
                            .cost
                            .actual_usd(response.usage.input_tokens, response.usage.output_tokens);
                        if let Err(e) = self.cost.record(envelope.user_id, cost_usd).await {
                            tracing::warn!(error = %e, "failed to record spend");
                        }
                        self.telemetry.record(AttemptEvent {
                            request_id: envelope.request_id,
                            provider: provider.clone(),
                            attempt_number: attempts_total,
                            outcome: AttemptOutcome::Success,
                            latency_ms: attempt_latency_ms,
                            tokens_used: response.usage.total(),
                            cost_usd,
                            error_kind: None,
                        });
                        tracing::info!(
                            request_id = %envelope.request_id,
                            task = envelope.task.as_str(),
                            %provider,
                            attempts = attempts_total,
                            latency_ms = elapsed_ms(started),
                            "dispatch succeeded"
                        );

                        let response_envelope = ResponseEnvelope {
                            request_id: envelope.request_id,
                            provider: provider.clone(),
                            model: response.model,
                            content: response.content,
                            structured_output: response.structured_output,
                            usage: response.usage,
                            cost_usd,
                            latency_ms: elapsed_ms(started),
                            attempts: attempts_total,
                        };
                        if let Some(key) = &envelope.idempotency_key {
                            self.dedup.insert(key.clone(), response_envelope.clone());
                        }
                        return Ok(response_envelope);
                    }
                    Ok(Err(error)) => {
                        let kind = error.kind();
                        self.telemetry.record(AttemptEvent {
                            request_id: envelope.request_id,
                            provider: provider.clone(),
                            attempt_number: attempts_total,
                            outcome: AttemptOutcome::Failure,
                            latency_ms: attempt_latency_ms,
                            tokens_used: 0,
                            cost_usd: 0.0,
                            error_kind: Some(kind),
                        });
                        tracing::debug!(
                            request_id = %envelope.request_id,
                            %provider,
                            error = %error,
                            "attempt failed"
                        );

                        match kind {
                            CallErrorKind::Permanent => {
                                // The request, not the provider, is at
                                // fault; a probe this attempt may hold
                                // must be freed for the next caller.
                                self.circuits.release_probe(provider);
                                return Err(DispatchError::Permanent {
                                    provider: provider.clone(),
                                    reason: error.reason().to_string(),
                                });
                            }
                            CallErrorKind::Transient => {
                                self.circuits.record_failure(provider);
                                if self.retry.retries_in_place(kind, candidate_attempts) {
                                    let backoff = self.retry.backoff_after(candidate_attempts);
                                    if remaining_until(deadline).is_some_and(|r| backoff < r) {
                                        tokio::time::sleep(backoff).await;
                                        last_failure = Some((provider.clone(), error));
                                        continue;
                                    }
                                }
                                last_failure = Some((provider.clone(), error));
                                continue 'candidates;
                            }
                            CallErrorKind::ProviderUnavailable => {
                                self.circuits.record_failure(provider);
                                last_failure = Some((provider.clone(), error));
                                continue 'candidates;
                            }
                            CallErrorKind::InvalidResponse => {
                                self.circuits.record_failure(provider);
                                if !corrective_used {
                                    corrective_used = true;
                                    request = envelope.request.clone().corrective(error.reason());
                                    last_failure = Some((provider.clone(), error));
                                    continue;
                                }
                                last_failure = Some((provider.clone(), error));
                                continue 'candidates;
                            }
                        }
                    }
                    Err(_elapsed) => {
                        self.circuits.record_failure(provider);
                        self.telemetry.record(AttemptEvent {
                            request_id: envelope.request_id,
                            provider: provider.clone(),
                            attempt_number: attempts_total,
                            outcome: AttemptOutcome::Failure,
                            latency_ms: attempt_latency_ms,
                            tokens_used: 0,
                            cost_usd: 0.0,
                            error_kind: Some(CallErrorKind::Transient),
                        });

                        if remaining_until(deadline).is_none() {
                            // The attempt was truncated by the overall
                            // latency budget, not the provider's own
                            // timeout.
                            return Err(DispatchError::Timeout {
                                attempts: attempts_total,
                                elapsed_ms: elapsed_ms(started),
                            });
                        }

                        let error = CallError::Transient {
                            reason: format!(
                                "attempt timed out after {}ms",
                                attempt_timeout.as_millis()
                            ),
                        };
                        if self
                            .retry
                            .retries_in_place(CallErrorKind::Transient, candidate_attempts)
                        {
                            let backoff = self.retry.backoff_after(candidate_attempts);
                            if remaining_until(deadline).is_some_and(|r| backoff < r) {
                                tokio::time::sleep(backoff).await;
                                last_failure = Some((provider.clone(), error));
                                continue;
                            }
                        }
                        last_failure = Some((provider.clone(), error));
                        continue 'candidates;
                    }
                }
            }
        }

        // Chain exhausted. Attempted candidates dominate the terminal
        // classification; skip-only dispatches report why nothing ran.
        if let Some((provider, error)) = last_failure {
            return Err(match error {
                CallError::Transient { reason } => DispatchError::Transient {
                    provider,
                    attempts: attempts_total,
                    reason,
                },
                CallError::ProviderUnavailable { reason } => DispatchError::ProviderUnavailable {
                    provider,
                    attempts: attempts_total,
                    reason,
                },
                CallError::InvalidResponse { reason } => DispatchError::InvalidResponse {
                    provider,
                    attempts: attempts_total,
                    reason,
                },
                CallError::Permanent { reason } => DispatchError::Permanent { provider, reason },
            });
        }
        if rate_limited_skip {
            return Err(DispatchError::RateLimited {
                candidates: chain.len(),
            });
        }
        if circuit_open_skip {
            return Err(DispatchError::CircuitOpen {
                candidates: chain.len(),
            });
        }
        if let Some(projected_usd) = ceiling_skip {
            return Err(DispatchError::BudgetExceeded {
                projected_usd,
                remaining_usd: envelope.cost_ceiling_usd.unwrap_or(0.0),
            });
        }

        Err(DispatchError::ProviderUnavailable {
            provider: chain[0].id.clone(),
            attempts: attempts_total,
            reason: "no candidate could be attempted".to_string(),
        })
    }
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
