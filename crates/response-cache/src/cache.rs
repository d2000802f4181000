//! TTL + capacity bounded cache over detection and validation results

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use visionflow_core_types::{ElementCandidate, ValidationResult};

use crate::fingerprint::Fingerprint;

/// A cached inference outcome; the two levels of the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CachedOutcome {
    Candidates(Vec<ElementCandidate>),
    Validation(ValidationResult),
}

struct CacheEntry {
    value: CachedOutcome,
    expires_at: SystemTime,
}

/// Process-wide cache from fingerprints to prior inference results
///
/// Safe under concurrent reads and writes from multiple runs. Writes
/// for the same key are idempotent, so insert races are benign.
pub struct ResponseCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    order: Mutex<VecDeque<Fingerprint>>,
    default_ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            default_ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        }
    }

    /// Look up cached detection candidates
    ///
    /// An expired entry is removed and counts as a miss; an entry of the
    /// wrong level under a detection key is corruption, logged and
    /// treated as a miss.
    pub fn get_candidates(&self, key: &Fingerprint) -> Option<Vec<ElementCandidate>> {
        match self.get_live(key)? {
            CachedOutcome::Candidates(candidates) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(candidates)
            }
            CachedOutcome::Validation(_) => {
                self.record_corruption(key, "validation entry under detection key");
                None
            }
        }
    }

    /// Look up a cached validation verdict
    pub fn get_validation(&self, key: &Fingerprint) -> Option<ValidationResult> {
        match self.get_live(key)? {
            CachedOutcome::Validation(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            CachedOutcome::Candidates(_) => {
                self.record_corruption(key, "detection entry under validation key");
                None
            }
        }
    }

    pub fn put_candidates(&self, key: Fingerprint, candidates: Vec<ElementCandidate>) {
        self.put(key, CachedOutcome::Candidates(candidates), None);
    }

    pub fn put_validation(&self, key: Fingerprint, result: ValidationResult) {
        self.put(key, CachedOutcome::Validation(result), None);
    }

    /// Insert with an explicit TTL override
    pub fn put(&self, key: Fingerprint, value: CachedOutcome, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: SystemTime::now() + ttl.unwrap_or(self.default_ttl),
        };
        let fresh = self.entries.insert(key.clone(), entry).is_none();
        if fresh {
            self.order.lock().push_back(key);
            self.enforce_capacity();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
        }
    }

    fn get_live(&self, key: &Fingerprint) -> Option<CachedOutcome> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > SystemTime::now() {
                return Some(entry.value.clone());
            }
            // Expired, remove it
            drop(entry);
            self.entries.remove(key);
            debug!(key = %key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn record_corruption(&self, key: &Fingerprint, detail: &str) {
        // Corruption is never fatal: evict and report a miss
        self.corruptions.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.entries.remove(key);
        warn!(key = %key, detail, "corrupt cache entry evicted");
    }

    fn enforce_capacity(&self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let now = SystemTime::now();
        // Expired entries go first, then oldest by insertion
        self.entries.retain(|_, entry| entry.expires_at > now);
        let mut order = self.order.lock();
        order.retain(|key| self.entries.contains_key(key));
        while self.entries.len() > self.capacity {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruptions: u64,
}
