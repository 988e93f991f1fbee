//! Provider registry and chain selection.
//!
//! The catalog is immutable once built; the registry swaps whole
//! catalogs atomically on reload, so an in-flight dispatch keeps the
//! snapshot it started with while new dispatches see the new catalog.

use crate::error::DispatchError;
use brightpath_provider::{Capability, ProviderDescriptor, ProviderId};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Errors building a catalog from descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two descriptors share a provider ID.
    DuplicateProvider { id: ProviderId },
    /// A descriptor fails validation.
    InvalidProvider { id: ProviderId, reason: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateProvider { id } => {
                write!(f, "duplicate provider id: {id}")
            }
            Self::InvalidProvider { id, reason } => {
                write!(f, "invalid provider '{id}': {reason}")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

/// A validated, immutable provider catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    providers: Vec<Arc<ProviderDescriptor>>,
}

impl Catalog {
    /// Builds a catalog, validating descriptors.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] on duplicate IDs or limits the rate
    /// limiter cannot enforce.
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.id.clone()) {
                return Err(CatalogError::DuplicateProvider {
                    id: descriptor.id.clone(),
                });
            }
            if descriptor.limits.requests_per_minute == 0 {
                return Err(CatalogError::InvalidProvider {
                    id: descriptor.id.clone(),
                    reason: "requests_per_minute must be positive".to_string(),
                });
            }
            if descriptor.limits.tokens_per_minute == 0 {
                return Err(CatalogError::InvalidProvider {
                    id: descriptor.id.clone(),
                    reason: "tokens_per_minute must be positive".to_string(),
                });
            }
            if descriptor.attempt_timeout_ms == 0 {
                return Err(CatalogError::InvalidProvider {
                    id: descriptor.id.clone(),
                    reason: "attempt_timeout_ms must be positive".to_string(),
                });
            }
        }

        Ok(Self {
            providers: descriptors.into_iter().map(Arc::new).collect(),
        })
    }

    /// All descriptors in the catalog.
    #[must_use]
    pub fn providers(&self) -> &[Arc<ProviderDescriptor>] {
        &self.providers
    }

    /// Looks up a descriptor by ID.
    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<&Arc<ProviderDescriptor>> {
        self.providers.iter().find(|d| &d.id == id)
    }
}

/// The provider registry.
///
/// Holds the current catalog and answers chain-selection queries against
/// an atomic snapshot.
pub struct ProviderRegistry {
    catalog: RwLock<Arc<Catalog>>,
}

impl ProviderRegistry {
    /// Creates a registry over an initial catalog.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Returns the current catalog snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().expect("catalog lock poisoned"))
    }

    /// Replaces the whole catalog.
    ///
    /// In-flight dispatches keep the snapshot they selected against.
    pub fn reload(&self, catalog: Catalog) {
        *self.catalog.write().expect("catalog lock poisoned") = Arc::new(catalog);
    }

    /// Selects the attempt chain for a set of required capabilities.
    ///
    /// Capability-matching providers, ordered by priority rank then
    /// ascending blended cost.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoCapableProvider`] when no provider
    /// matches.
    pub fn select_chain(
        &self,
        required: &BTreeSet<Capability>,
    ) -> Result<Vec<Arc<ProviderDescriptor>>, DispatchError> {
        let snapshot = self.snapshot();
        let mut chain: Vec<Arc<ProviderDescriptor>> = snapshot
            .providers()
            .iter()
            .filter(|d| d.supports(required))
            .cloned()
            .collect();

        chain.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| {
                a.cost
                    .blended_per_1k_usd()
                    .partial_cmp(&b.cost.blended_per_1k_usd())
                    .unwrap_or(Ordering::Equal)
            })
        });

        if chain.is_empty() {
            return Err(DispatchError::NoCapableProvider {
                required: required.clone(),
            });
        }
        Ok(chain)
    }
}
