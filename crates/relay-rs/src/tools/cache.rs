//! Per-tool result caching with time-to-live expiry.
//!
//! Each [`ManagedTool`](super::core::ManagedTool) owns one
//! [`ToolResultCache`]. Entries are keyed by the tool name plus the
//! canonical (key-sorted) JSON of the arguments, so two calls that differ
//! only in argument order share an entry. An entry is valid while
//! `now - stored_at < ttl`. Expired entries are swept lazily: every 20th
//! miss, once the cache holds more than 10 entries.
//!
//! Time comes from a [`Clock`] so tests can drive expiry with a
//! [`ManualClock`] instead of sleeping.

use super::result::ToolResult;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Default time-to-live for cached tool results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A sweep of expired entries runs on every Nth miss...
const SWEEP_EVERY_N_MISSES: u64 = 20;
/// ...but only when the cache holds more than this many entries.
const SWEEP_MIN_ENTRIES: usize = 10;

// ── Clock ──────────────────────────────────────────────────────────

/// Source of the current time for cache expiry and usage timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move forward by `by`, stopping at the latest representable time.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Cache ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    result: ToolResult,
}

/// TTL cache of successful tool results with hit/miss counters.
#[derive(Debug)]
pub struct ToolResultCache {
    entries: HashMap<String, CacheEntry>,
    ttl: TimeDelta,
    hits: u64,
    misses: u64,
}

impl ToolResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a valid entry. Counts a hit or a miss, and on every 20th
    /// miss with more than 10 entries sweeps the expired ones.
    pub fn lookup(&mut self, key: &str, now: DateTime<Utc>) -> Option<ToolResult> {
        let ttl = self.ttl;
        if let Some(entry) = self.entries.get_mut(key)
            && now.signed_duration_since(entry.stored_at) < ttl
        {
            self.hits += 1;
            entry.last_accessed_at = now;
            return Some(entry.result.clone());
        }

        self.misses += 1;
        if self.misses % SWEEP_EVERY_N_MISSES == 0 && self.entries.len() > SWEEP_MIN_ENTRIES {
            let evicted = self.sweep_expired(now);
            debug!(
                "Cache sweep after {} misses evicted {evicted} entries",
                self.misses
            );
        }
        None
    }

    /// Store (or overwrite) a result.
    pub fn store(&mut self, key: String, result: ToolResult, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CacheEntry {
                stored_at: now,
                last_accessed_at: now,
                result,
            },
        );
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.stored_at) < ttl);
        before - self.entries.len()
    }

    /// Drop all entries and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// When the entry for `key` was last served or stored.
    pub fn last_accessed(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.last_accessed_at)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl Default for ToolResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

/// Cache key: tool name plus the arguments serialized with keys sorted at
/// every nesting level.
pub fn cache_key(tool_name: &str, arguments: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(arguments.clone()));
    format!("{tool_name}:{canonical}")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn key_ignores_argument_order() {
        let a = args(json!({"location": "Paris", "units": "metric"}));
        let mut b = Map::new();
        b.insert("units".into(), json!("metric"));
        b.insert("location".into(), json!("Paris"));
        assert_eq!(cache_key("weather", &a), cache_key("weather", &b));
    }

    #[test]
    fn key_distinguishes_tools_and_values() {
        let a = args(json!({"q": "x"}));
        let b = args(json!({"q": "y"}));
        assert_ne!(cache_key("search", &a), cache_key("search", &b));
        assert_ne!(cache_key("search", &a), cache_key("lookup", &a));
    }

    #[test]
    fn store_then_lookup_hits() {
        let clock = ManualClock::default();
        let mut cache = ToolResultCache::new(Duration::from_secs(60));
        cache.store("k".into(), ToolResult::success_result("v"), clock.now());

        let hit = cache.lookup("k", clock.now());
        assert_eq!(hit, Some(ToolResult::success_result("v")));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn lookup_miss_counts() {
        let mut cache = ToolResultCache::default();
        assert!(cache.lookup("absent", Utc::now()).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn entry_expires_at_ttl() {
        let clock = ManualClock::default();
        let mut cache = ToolResultCache::new(Duration::from_secs(10));
        cache.store("k".into(), ToolResult::success_result(1), clock.now());

        clock.advance(Duration::from_secs(9));
        assert!(cache.lookup("k", clock.now()).is_some());

        // Valid only while age < ttl.
        clock.advance(Duration::from_secs(1));
        assert!(cache.lookup("k", clock.now()).is_none());
    }

    #[test]
    fn manual_clock_saturates_on_huge_advance() {
        let clock = ManualClock::default();
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn hit_refreshes_last_accessed() {
        let clock = ManualClock::default();
        let mut cache = ToolResultCache::new(Duration::from_secs(60));
        let stored = clock.now();
        cache.store("k".into(), ToolResult::success_result(1), stored);

        clock.advance(Duration::from_secs(5));
        cache.lookup("k", clock.now());
        assert_eq!(cache.last_accessed("k"), Some(clock.now()));
        assert_ne!(cache.last_accessed("k"), Some(stored));
    }

    #[test]
    fn sweep_runs_on_twentieth_miss_when_large() {
        let clock = ManualClock::default();
        let mut cache = ToolResultCache::new(Duration::from_secs(10));
        for i in 0..12 {
            cache.store(format!("k{i}"), ToolResult::success_result(i), clock.now());
        }
        clock.advance(Duration::from_secs(30));

        for i in 0..19 {
            cache.lookup(&format!("miss{i}"), clock.now());
        }
        assert_eq!(cache.len(), 12, "no sweep before the 20th miss");

        cache.lookup("miss19", clock.now());
        assert_eq!(cache.misses(), 20);
        assert!(cache.is_empty(), "expired entries swept on the 20th miss");
    }

    #[test]
    fn no_sweep_when_small() {
        let clock = ManualClock::default();
        let mut cache = ToolResultCache::new(Duration::from_secs(1));
        for i in 0..5 {
            cache.store(format!("k{i}"), ToolResult::success_result(i), clock.now());
        }
        clock.advance(Duration::from_secs(5));
        for i in 0..20 {
            cache.lookup(&format!("miss{i}"), clock.now());
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn clear_resets_counters() {
        let mut cache = ToolResultCache::default();
        let now = Utc::now();
        cache.store("k".into(), ToolResult::success_result(1), now);
        cache.lookup("k", now);
        cache.lookup("other", now);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn hit_rate_computation() {
        let mut cache = ToolResultCache::default();
        let now = Utc::now();
        cache.store("a".into(), ToolResult::success_result(1), now);
        cache.lookup("a", now);
        cache.lookup("b", now);
        assert!((cache.hit_rate() - 0.5).abs() < 0.01);
    }
}
