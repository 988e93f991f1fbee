//! AI provider resilience and orchestration layer for the brightpath
//! platform.
//!
//! Every generative-AI call made by a feature service goes through
//! [`Gateway::dispatch`], which composes:
//!
//! - **Provider Registry**: capability-filtered, priority-ordered chain
//!   selection over a hot-reloadable catalog
//! - **Rate Limiter**: per-provider token buckets for request and token
//!   throughput
//! - **Circuit Breaker**: per-provider fault isolation with doubling
//!   cooldowns
//! - **Cost Tracker**: pre-flight budget checks and post-success spend
//!   recording through the external ledger
//! - **Retry & Fallback**: bounded per-candidate retries and chain
//!   escalation under the request's latency budget
//! - **Telemetry**: one structured event per provider attempt

pub mod budget;
pub mod circuit;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod telemetry;

pub use budget::{BudgetLedger, BudgetLimits, CostTracker, InMemoryLedger, LedgerError};
pub use circuit::{CircuitBreakerConfig, CircuitRegistry, CircuitSnapshot, CircuitState};
pub use config::GatewayConfig;
pub use dispatch::{Gateway, GatewayInitError, GatewaySettings};
pub use envelope::{RequestEnvelope, ResponseEnvelope, TaskKind};
pub use error::DispatchError;
pub use rate_limit::{AcquireResult, RateLimiter};
pub use registry::{Catalog, CatalogError, ProviderRegistry};
pub use retry::RetryPolicy;
pub use telemetry::{AttemptEvent, AttemptOutcome, NullSink, RecordingSink, TelemetrySink};
