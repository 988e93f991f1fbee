//! Cost tracking and budget enforcement.
//!
//! Before any network call the projected cost is checked against the
//! caller's remaining per-user ceiling and the system's per-day ceiling;
//! a breach rejects the dispatch outright. After a successful response
//! the actual usage is recorded through the [`BudgetLedger`] seam, whose
//! implementations are owned by the persistence collaborator and must
//! increment atomically per (user, day).

use async_trait::async_trait;
use brightpath_core::UserId;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger store could not be reached.
    Unavailable { reason: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "budget ledger unavailable: {reason}"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Trait for the external spend ledger.
///
/// Implementations must make `record` an atomic increment: concurrent
/// dispatches for the same user must never lose an update.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Amount a user has spent on the given day.
    async fn user_spent(&self, user: UserId, date: NaiveDate) -> Result<f64, LedgerError>;

    /// Amount the whole system has spent on the given day.
    async fn system_spent(&self, date: NaiveDate) -> Result<f64, LedgerError>;

    /// Atomically adds to the user's (and system's) spend for the day.
    async fn record(&self, user: UserId, date: NaiveDate, amount_usd: f64)
        -> Result<(), LedgerError>;
}

/// Daily spending ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    /// Per-user daily ceiling in USD.
    pub per_user_daily_usd: f64,
    /// System-wide daily ceiling in USD.
    pub system_daily_usd: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            per_user_daily_usd: 5.0,
            system_daily_usd: 500.0,
        }
    }
}

/// Outcome of a failed budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// The projected cost would breach a ceiling.
    Exceeded {
        projected_usd: f64,
        remaining_usd: f64,
    },
    /// The ledger could not answer.
    Ledger(LedgerError),
}

impl fmt::Display for BudgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exceeded {
                projected_usd,
                remaining_usd,
            } => write!(
                f,
                "projected ${projected_usd:.4} exceeds remaining ${remaining_usd:.4}"
            ),
            Self::Ledger(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BudgetError {}

impl From<LedgerError> for BudgetError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

/// Pre-flight budget checks and post-success recording.
pub struct CostTracker {
    ledger: Arc<dyn BudgetLedger>,
    limits: BudgetLimits,
}

impl CostTracker {
    /// Creates a tracker over a ledger.
    #[must_use]
    pub fn new(ledger: Arc<dyn BudgetLedger>, limits: BudgetLimits) -> Self {
        Self { ledger, limits }
    }

    /// Checks whether a projected spend fits both ceilings today.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::Exceeded`] on a breach, or
    /// [`BudgetError::Ledger`] when the ledger cannot answer.
    pub async fn check(&self, user: UserId, projected_usd: f64) -> Result<(), BudgetError> {
        let remaining = self.remaining_budget(user).await?;
        if projected_usd > remaining {
            return Err(BudgetError::Exceeded {
                projected_usd,
                remaining_usd: remaining,
            });
        }
        Ok(())
    }

    /// Records actual spend for today.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] when the increment cannot be issued.
    pub async fn record(&self, user: UserId, amount_usd: f64) -> Result<(), LedgerError> {
        self.ledger.record(user, today(), amount_usd).await
    }

    /// Remaining budget for a user today: the smaller of the user's and
    /// the system's remaining headroom.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] when the ledger cannot answer.
    pub async fn remaining_budget(&self, user: UserId) -> Result<f64, LedgerError> {
        let date = today();
        let user_spent = self.ledger.user_spent(user, date).await?;
        let system_spent = self.ledger.system_spent(date).await?;

        let user_remaining = (self.limits.per_user_daily_usd - user_spent).max(0.0);
        let system_remaining = (self.limits.system_daily_usd - system_spent).max(0.0);
        Ok(user_remaining.min(system_remaining))
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Default)]
struct LedgerInner {
    user: HashMap<(UserId, NaiveDate), f64>,
    system: HashMap<NaiveDate, f64>,
}

/// In-memory ledger for tests and local development.
///
/// Production deployments implement [`BudgetLedger`] against the
/// platform's persistence layer.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetLedger for InMemoryLedger {
    async fn user_spent(&self, user: UserId, date: NaiveDate) -> Result<f64, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.user.get(&(user, date)).copied().unwrap_or(0.0))
    }

    async fn system_spent(&self, date: NaiveDate) -> Result<f64, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.system.get(&date).copied().unwrap_or(0.0))
    }

    async fn record(
        &self,
        user: UserId,
        date: NaiveDate,
        amount_usd: f64,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        *inner.user.entry((user, date)).or_insert(0.0) += amount_usd;
        *inner.system.entry(date).or_insert(0.0) += amount_usd;
        Ok(())
    }
}
