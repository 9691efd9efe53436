use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use famdomain_core::SearchResponse;

use crate::Clock;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: SearchResponse,
    inserted_at: DateTime<Utc>,
}

/// Short-lived cache of search responses keyed by sanitized base name.
///
/// Entries are immutable snapshots; concurrent writers for one key simply
/// replace each other. Expired entries are dropped on read.
#[derive(Clone)]
pub struct AvailabilityCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: ChronoDuration,
    clock: Clock,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(Utc::now))
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::minutes(5)),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<SearchResponse> {
        let now = (self.clock)();
        let expired = match self.entries.get(key) {
            Some(entry) if now - entry.inserted_at < self.ttl => {
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| now - entry.inserted_at >= self.ttl);
        }
        None
    }

    pub fn set(&self, key: impl Into<String>, payload: SearchResponse) {
        let entry = CacheEntry {
            payload,
            inserted_at: (self.clock)(),
        };
        self.entries.insert(key.into(), entry);
    }

    pub fn evict(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
