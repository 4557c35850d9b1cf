//! Sticky-routing cache.
//!
//! # Responsibilities
//! - Remember which pool index served a destination, for a bounded time
//! - Bound memory with least-recently-used eviction
//! - Drop expired entries on an explicit sweep
//!
//! # Design Decisions
//! - Expiry is measured from the visit time, lookups do not extend it
//! - Lookups do refresh LRU order
//! - Not internally synchronized; the engine wraps one instance per port
//!   in its own lock

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Distinct destinations remembered per port.
pub const DEFAULT_CAPACITY: usize = 180;

/// Default "keep visit time".
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

/// One sticky decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityEntry {
    /// Pool index chosen for the destination.
    pub index: usize,
    /// Id of the server at `index` when recorded, to detect pool changes.
    pub server_id: String,
    pub visited_at: Instant,
}

#[derive(Debug)]
struct Slot {
    entry: AffinityEntry,
    /// Position in the recency order.
    tick: u64,
}

/// Bounded LRU map from destination key to [`AffinityEntry`] with a TTL.
#[derive(Debug)]
pub struct AffinityCache {
    entries: HashMap<String, Slot>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    capacity: usize,
    ttl: Duration,
}

impl AffinityCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            recency: BTreeMap::new(),
            next_tick: 0,
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Change the TTL; existing entries are judged against the new value.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &AffinityEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.visited_at) >= self.ttl
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<&AffinityEntry> {
        let expired = self.is_expired(&self.entries.get(key)?.entry, now);
        if expired {
            return None;
        }
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(&slot.entry)
    }

    /// Insert or replace the entry for `key`, evicting the least recently
    /// used entry when over capacity.
    pub fn set(&mut self, key: &str, index: usize, server_id: &str, now: Instant) {
        let tick = self.bump();
        let entry = AffinityEntry {
            index,
            server_id: server_id.to_string(),
            visited_at: now,
        };
        if let Some(old) = self.entries.insert(key.to_string(), Slot { entry, tick }) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, key.to_string());

        while self.entries.len() > self.capacity {
            match self.recency.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Remove the entry for `key`, expired or not.
    pub fn del(&mut self, key: &str) -> Option<AffinityEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    /// Remove and return a live entry in one step, if `valid` accepts it.
    ///
    /// An entry rejected by `valid` is left in place to expire.
    pub fn take_if<F>(&mut self, key: &str, now: Instant, valid: F) -> Option<AffinityEntry>
    where
        F: FnOnce(&AffinityEntry) -> bool,
    {
        let slot = self.entries.get(key)?;
        if self.is_expired(&slot.entry, now) || !valid(&slot.entry) {
            return None;
        }
        self.del(key)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let expired: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.entry.visited_at) >= ttl)
            .map(|(key, slot)| (key.clone(), slot.tick))
            .collect();
        for (key, tick) in &expired {
            self.entries.remove(key);
            self.recency.remove(tick);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl Default for AffinityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_get_respects_ttl() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(4, TTL);
        cache.set("example.com", 2, "s2", t0);

        let hit = cache.get("example.com", t0 + Duration::from_secs(9)).cloned();
        assert_eq!(hit.map(|e| e.index), Some(2));
        assert!(cache.get("example.com", t0 + TTL).is_none());
        assert!(cache.get("other.com", t0).is_none());
    }

    #[test]
    fn test_lookup_does_not_extend_ttl() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(4, TTL);
        cache.set("k", 0, "s0", t0);
        assert!(cache.get("k", t0 + Duration::from_secs(8)).is_some());
        assert!(cache.get("k", t0 + Duration::from_secs(11)).is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(2, TTL);
        cache.set("a", 0, "s0", t0);
        cache.set("b", 1, "s1", t0);
        // Touch "a" so "b" becomes the oldest
        assert!(cache.get("a", t0).is_some());
        cache.set("c", 2, "s2", t0);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key("a"));
        assert!(!cache.contains_key("b"));
        assert!(cache.contains_key("c"));
    }

    #[test]
    fn test_set_replaces_single_entry_per_key() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(4, TTL);
        cache.set("a", 0, "s0", t0);
        cache.set("a", 3, "s3", t0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a", t0).unwrap().index, 3);
        assert_eq!(cache.recency.len(), 1);
    }

    #[test]
    fn test_sweep_drops_only_expired() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(8, TTL);
        cache.set("old", 0, "s0", t0);
        cache.set("new", 1, "s1", t0 + Duration::from_secs(5));

        assert_eq!(cache.sweep(t0 + Duration::from_secs(12)), 1);
        assert!(!cache.contains_key("old"));
        assert!(cache.contains_key("new"));
        assert_eq!(cache.recency.len(), 1);
    }

    #[test]
    fn test_take_if_consumes_once() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::new(8, TTL);
        cache.set("a", 1, "s1", t0);

        assert!(cache.take_if("a", t0, |e| e.server_id == "other").is_none());
        assert!(cache.contains_key("a"));

        let taken = cache.take_if("a", t0, |e| e.server_id == "s1");
        assert_eq!(taken.map(|e| e.index), Some(1));
        assert!(cache.take_if("a", t0, |_| true).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_del_and_clear() {
        let t0 = Instant::now();
        let mut cache = AffinityCache::default();
        assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
        cache.set("a", 0, "s0", t0);
        cache.set("b", 0, "s0", t0);
        assert!(cache.del("a").is_some());
        assert!(cache.del("a").is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
