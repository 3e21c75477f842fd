//! TTL key-value cache fronting the rate-limited upstream API.
//!
//! Values are opaque JSON-serialized payloads with a per-entry expiry.
//! Expiry is lazy — entries are dropped when a read finds them stale;
//! there is no background sweep.
//!
//! Every operation degrades instead of erroring: `get` returns absent and
//! `set` returns a success flag. Callers must treat the cache as a pure
//! optimization, never a correctness dependency.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A cached value with its absolute expiry.
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache with glob-pattern invalidation.
pub struct CacheStore {
    inner: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Get a value from the cache.
    ///
    /// Never returns an entry whose TTL has elapsed — stale entries are
    /// treated as absent and removed. Deserialization failures and store
    /// unavailability also read as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "Cache unavailable, treating as miss");
                return None;
            }
        };

        let serialized = match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => entry.value.clone(),
            Some(_) => {
                // Lazy expiry
                map.remove(key);
                return None;
            }
            None => return None,
        };

        match serde_json::from_str(&serialized) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached payload failed to deserialize");
                map.remove(key);
                None
            }
        }
    }

    /// Store a value with the given TTL. Returns false if the value could
    /// not be stored (serialization failure or store unavailability).
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache value");
                return false;
            }
        };

        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "Cache unavailable, skipping set");
                return false;
            }
        };

        map.insert(
            key.to_string(),
            CacheEntry {
                value: serialized,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    /// Delete a single key. Returns true if the key was present.
    pub fn delete(&self, key: &str) -> bool {
        match self.inner.lock() {
            Ok(mut map) => map.remove(key).is_some(),
            Err(_) => false,
        }
    }

    /// Delete all keys matching a glob pattern (`*` matches any run of
    /// characters, `?` matches a single character). Returns the count of
    /// deleted entries.
    pub fn clear_matching(&self, pattern: &str) -> usize {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return 0,
        };

        let matching: Vec<String> = map
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in &matching {
            map.remove(key);
        }
        matching.len()
    }

    /// Number of entries currently held, including any not yet lazily
    /// expired.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Match `text` against a glob `pattern` supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(p: &[char], t: &[char]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                // '*' consumes zero characters, or one and stays
                matches(&p[1..], t) || (!t.is_empty() && matches(p, &t[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    matches(&p, &t)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = CacheStore::new();
        assert!(cache.set("quote:SPY", &512.34f64, Duration::from_secs(5)));
        let value: Option<f64> = cache.get("quote:SPY");
        assert_eq!(value, Some(512.34));
    }

    #[test]
    fn test_get_missing() {
        let cache = CacheStore::new();
        let value: Option<String> = cache.get("nope");
        assert!(value.is_none());
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = CacheStore::new();
        assert!(cache.set("quote:SPY", &1.0f64, Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(40));
        let value: Option<f64> = cache.get("quote:SPY");
        assert!(value.is_none());
        // Lazy expiry removed the entry
        assert!(cache.is_empty());
    }

    #[test]
    fn test_read_before_ttl_returns_value() {
        let cache = CacheStore::new();
        assert!(cache.set("bars:SPY:1:Daily:20:", &vec![1.0, 2.0], Duration::from_secs(60)));
        let value: Option<Vec<f64>> = cache.get("bars:SPY:1:Daily:20:");
        assert_eq!(value, Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_overwrite_refreshes_ttl() {
        let cache = CacheStore::new();
        cache.set("k", &"old", Duration::from_millis(10));
        cache.set("k", &"new", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        let value: Option<String> = cache.get("k");
        assert_eq!(value.as_deref(), Some("new"));
    }

    #[test]
    fn test_delete() {
        let cache = CacheStore::new();
        cache.set("k", &1u32, Duration::from_secs(60));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        let value: Option<u32> = cache.get("k");
        assert!(value.is_none());
    }

    #[test]
    fn test_clear_matching_counts() {
        let cache = CacheStore::new();
        cache.set("quote:SPY", &1u32, Duration::from_secs(60));
        cache.set("quote:QQQ", &2u32, Duration::from_secs(60));
        cache.set("chain:SPY:2026-09-18", &3u32, Duration::from_secs(60));

        assert_eq!(cache.clear_matching("quote:*"), 2);
        assert_eq!(cache.len(), 1);
        let chain: Option<u32> = cache.get("chain:SPY:2026-09-18");
        assert_eq!(chain, Some(3));
    }

    #[test]
    fn test_clear_matching_star() {
        let cache = CacheStore::new();
        cache.set("a", &1u32, Duration::from_secs(60));
        cache.set("b", &2u32, Duration::from_secs(60));
        assert_eq!(cache.clear_matching("*"), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_matching_no_match() {
        let cache = CacheStore::new();
        cache.set("quote:SPY", &1u32, Duration::from_secs(60));
        assert_eq!(cache.clear_matching("bars:*"), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            symbol: String,
            last: f64,
        }
        let cache = CacheStore::new();
        let payload = Payload {
            symbol: "SPY".into(),
            last: 510.25,
        };
        cache.set("quote:SPY", &payload, Duration::from_secs(5));
        let read: Option<Payload> = cache.get("quote:SPY");
        assert_eq!(read, Some(payload));
    }

    // -- glob matcher --

    #[test]
    fn test_glob_exact() {
        assert!(glob_match("quote:SPY", "quote:SPY"));
        assert!(!glob_match("quote:SPY", "quote:QQQ"));
    }

    #[test]
    fn test_glob_star() {
        assert!(glob_match("quote:*", "quote:SPY"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*SPY*", "chain:SPY:2026-09-18"));
        assert!(!glob_match("bars:*", "quote:SPY"));
    }

    #[test]
    fn test_glob_question_mark() {
        assert!(glob_match("quote:???", "quote:SPY"));
        assert!(!glob_match("quote:???", "quote:AAPL"));
    }

    #[test]
    fn test_glob_empty() {
        assert!(glob_match("", ""));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }
}
