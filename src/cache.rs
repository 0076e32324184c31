//! TTL cache for enrichment results.
//!
//! Research and report lookups are memoised per caller + normalised
//! description so an identical resubmission within the TTL is served
//! without a second round of collaborator calls.  The map is safe for
//! concurrent read/write from in-flight requests; expiry is the only
//! eviction policy (a bounded LRU would be a documented extension).

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use ahash::AHasher;
use dashmap::DashMap;

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

pub struct ResearchCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResearchCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Returns the stored value only if present and unexpired.  An expired
    /// entry behaves as absent and is purged on the read that observes it.
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Stores `value` under `key` with the configured default TTL,
    /// overwriting any prior entry.
    pub fn put(&self, key: String, value: String) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: String, value: String, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derive the cache key from caller identity plus the normalised
/// description.  Normalisation (trim, lowercase, collapse whitespace)
/// makes cosmetic resubmission differences collide; the requested output
/// format never participates, so rendering cannot alter the key.
pub fn cache_key(caller: &str, description: &str) -> String {
    let normalized = description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = AHasher::default();
    normalized.hash(&mut hasher);
    format!("{}:{:016x}", caller, hasher.finish())
}
