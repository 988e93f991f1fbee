//! Short-lived idempotency de-duplication cache.
//!
//! A prior success for an idempotency key within the window is returned
//! as-is, with no network attempt. The cache is process-local; durable
//! cross-process de-duplication belongs to the persistence collaborator.

use crate::envelope::ResponseEnvelope;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache of recent successful responses, keyed by idempotency key.
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (ResponseEnvelope, Instant)>>,
}

impl DedupCache {
    /// Creates a cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up an unexpired entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ResponseEnvelope> {
        self.get_at(key, Instant::now())
    }

    /// Lookup at an explicit instant.
    #[must_use]
    pub fn get_at(&self, key: &str, now: Instant) -> Option<ResponseEnvelope> {
        let mut entries = self.entries.lock().expect("dedup lock poisoned");
        match entries.get(key) {
            Some((envelope, stored_at))
                if now.saturating_duration_since(*stored_at) < self.ttl =>
            {
                Some(envelope.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a successful response.
    pub fn insert(&self, key: impl Into<String>, envelope: ResponseEnvelope) {
        self.insert_at(key, envelope, Instant::now());
    }

    /// Store at an explicit instant. Expired entries are swept on every
    /// insert, bounding the map to the live working set.
    pub fn insert_at(&self, key: impl Into<String>, envelope: ResponseEnvelope, now: Instant) {
        let mut entries = self.entries.lock().expect("dedup lock poisoned");
        entries.retain(|_, (_, stored_at)| now.saturating_duration_since(*stored_at) < self.ttl);
        entries.insert(key.into(), (envelope, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brightpath_core::RequestId;
    use brightpath_provider::{ProviderId, TokenUsage};

    fn envelope() -> ResponseEnvelope {
        ResponseEnvelope {
            request_id: RequestId::new(),
            provider: ProviderId::new("p"),
            model: "test-model".to_string(),
            content: "answer".to_string(),
            structured_output: None,
            usage: TokenUsage::default(),
            cost_usd: 0.01,
            latency_ms: 120,
            attempts: 1,
        }
    }

    #[test]
    fn hit_within_window() {
        let cache = DedupCache::new(Duration::from_secs(300));
        let now = Instant::now();
        let stored = envelope();

        cache.insert_at("quiz-retry-1", stored.clone(), now);
        let hit = cache.get_at("quiz-retry-1", now + Duration::from_secs(10));
        assert_eq!(hit, Some(stored));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache = DedupCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.insert_at("quiz-retry-1", envelope(), now);
        assert!(cache
            .get_at("quiz-retry-1", now + Duration::from_secs(301))
            .is_none());
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let cache = DedupCache::new(Duration::from_secs(300));
        let now = Instant::now();

        cache.insert_at("old", envelope(), now);
        cache.insert_at("new", envelope(), now + Duration::from_secs(400));

        let entries = cache.entries.lock().unwrap();
        assert!(!entries.contains_key("old"));
        assert!(entries.contains_key("new"));
    }
}
