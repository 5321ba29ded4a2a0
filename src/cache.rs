use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capacity and TTL ceiling for one cache tier.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub capacity: usize,
    pub max_ttl: Duration,
}

/// Hit/miss counters across the three tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hot_hits: u64,
    pub session_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    last_used: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// One level of the cache: bounded map with TTL expiry and LRU eviction.
#[derive(Debug)]
struct Tier {
    capacity: usize,
    max_ttl: Duration,
    entries: HashMap<String, CacheEntry>,
    hits: u64,
}

impl Tier {
    fn new(config: TierConfig) -> Self {
        Self {
            capacity: config.capacity,
            max_ttl: config.max_ttl,
            entries: HashMap::new(),
            hits: 0,
        }
    }

    /// Live lookup: expired entries are dropped on the way out.
    fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_used = now;
                self.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with the requested TTL clamped to this tier's ceiling.
    /// Expired entries are swept first; if the tier is still full, the
    /// least-recently-used entry is evicted.
    fn insert(&mut self, key: &str, value: Value, ttl: Duration, now: Instant) {
        let ttl = ttl.min(self.max_ttl);
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.entries.retain(|_, entry| !entry.is_expired(now));
        }
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            let lru = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru {
                self.entries.remove(&lru_key);
            }
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                last_used: now,
            },
        );
    }

    fn remove_matching(&mut self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        before - self.entries.len()
    }
}

/// Three-tier key-value cache shared by all pipeline stages.
///
/// Reads check hot → session → persistent and promote entries upward on a
/// hit; writes land in all three tiers at once. Each tier clamps the TTL to
/// its own ceiling, so the hot tier forgets quickly while the persistent
/// tier carries values across cycles. Concurrent access is serialized per
/// tier; last writer wins on a racing `set`.
#[derive(Debug)]
pub struct CacheManager {
    hot: Mutex<Tier>,
    session: Mutex<Tier>,
    persistent: Mutex<Tier>,
    misses: Mutex<u64>,
}

impl CacheManager {
    pub fn new(hot: TierConfig, session: TierConfig, persistent: TierConfig) -> Self {
        Self {
            hot: Mutex::new(Tier::new(hot)),
            session: Mutex::new(Tier::new(session)),
            persistent: Mutex::new(Tier::new(persistent)),
            misses: Mutex::new(0),
        }
    }

    /// Look up a key, promoting it into the faster tiers on a hit.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();

        let hot_hit = self.hot.lock().unwrap().get(key, now);
        if let Some(value) = hot_hit {
            return Some(value);
        }

        let session_hit = self.session.lock().unwrap().get(key, now);
        if let Some(value) = session_hit {
            let ttl = self.session_ttl();
            self.hot.lock().unwrap().insert(key, value.clone(), ttl, now);
            return Some(value);
        }

        let persistent_hit = self.persistent.lock().unwrap().get(key, now);
        if let Some(value) = persistent_hit {
            let ttl = self.persistent_ttl();
            self.session.lock().unwrap().insert(key, value.clone(), ttl, now);
            self.hot.lock().unwrap().insert(key, value.clone(), ttl, now);
            return Some(value);
        }

        *self.misses.lock().unwrap() += 1;
        None
    }

    /// Write a value into all three tiers with tier-clamped TTLs.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        self.hot.lock().unwrap().insert(key, value.clone(), ttl, now);
        self.session
            .lock()
            .unwrap()
            .insert(key, value.clone(), ttl, now);
        self.persistent.lock().unwrap().insert(key, value, ttl, now);
    }

    /// Remove every key containing `pattern` from all tiers.
    /// Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.hot.lock().unwrap().remove_matching(pattern)
            + self.session.lock().unwrap().remove_matching(pattern)
            + self.persistent.lock().unwrap().remove_matching(pattern)
    }

    /// Empty the cycle-scoped tier. Called between cycles.
    pub fn clear_session(&self) {
        self.session.lock().unwrap().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hot_hits: self.hot.lock().unwrap().hits,
            session_hits: self.session.lock().unwrap().hits,
            persistent_hits: self.persistent.lock().unwrap().hits,
            misses: *self.misses.lock().unwrap(),
        }
    }

    fn session_ttl(&self) -> Duration {
        self.session.lock().unwrap().max_ttl
    }

    fn persistent_ttl(&self) -> Duration {
        self.persistent.lock().unwrap().max_ttl
    }
}

impl Default for CacheManager {
    /// Defaults sized for one review cycle: a small short-lived hot tier,
    /// a cycle-scoped session tier, a large long-lived persistent tier.
    fn default() -> Self {
        Self::new(
            TierConfig {
                capacity: 64,
                max_ttl: Duration::from_secs(60),
            },
            TierConfig {
                capacity: 512,
                max_ttl: Duration::from_secs(30 * 60),
            },
            TierConfig {
                capacity: 4096,
                max_ttl: Duration::from_secs(24 * 60 * 60),
            },
        )
    }
}
