//! One bounded cache tier.
//!
//! Not synchronised; [`TieredStore`](super::TieredStore) wraps each tier
//! in its own mutex and performs every check-then-act under that lock.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::CacheEntry;
use crate::CacheKey;

/// Result of looking a key up in one tier.
pub(crate) enum Lookup {
    Hit(CacheEntry),
    /// Present but past its TTL; already removed.
    Expired,
    Absent,
}

/// Returned when a tier is still full after two eviction passes.
#[derive(Debug)]
pub(crate) struct Full;

struct Slot {
    entry: CacheEntry,
    seq: u64,
}

/// Key → entry map that remembers insertion order for oldest-first eviction.
pub(crate) struct TierMap {
    capacity: usize,
    entries: HashMap<CacheKey, Slot>,
    /// Insertion sequence → key, oldest first.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

impl TierMap {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Read a key, removing it if it has expired.
    pub(crate) fn lookup(&mut self, key: &CacheKey, now: Instant) -> Lookup {
        match self.entries.get(key) {
            None => Lookup::Absent,
            Some(slot) if slot.entry.is_expired_at(now) => {
                self.remove(key);
                Lookup::Expired
            }
            Some(slot) => Lookup::Hit(slot.entry.clone()),
        }
    }

    /// Read a key without touching it, expired or not.
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.entry)
    }

    /// Insert or replace `key`, evicting the `batch` oldest entries first
    /// when the tier is full.
    ///
    /// Returns how many entries were evicted to make room. A replacement
    /// never evicts, since it does not grow the tier. The new entry counts
    /// as the newest either way.
    pub(crate) fn insert(
        &mut self,
        key: CacheKey,
        entry: CacheEntry,
        batch: usize,
    ) -> Result<usize, Full> {
        let mut evicted = 0;
        if self.remove(&key).is_none() && self.entries.len() >= self.capacity {
            evicted += self.evict_oldest(batch);
            if self.entries.len() >= self.capacity {
                evicted += self.evict_oldest(batch);
            }
            if self.entries.len() >= self.capacity {
                return Err(Full);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, Slot { entry, seq });
        Ok(evicted)
    }

    /// Remove up to `n` entries in insertion order.
    pub(crate) fn evict_oldest(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Remove every entry expired at `now`.
    pub(crate) fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Remove every key whose string form contains `pattern`.
    pub(crate) fn remove_matching(&mut self, pattern: &str) -> Vec<CacheKey> {
        let matched: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|key| key.as_str().contains(pattern))
            .cloned()
            .collect();
        for key in &matched {
            self.remove(key);
        }
        matched
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::KeyDeriver;
    use crate::store::Tier;

    fn key(i: usize) -> CacheKey {
        KeyDeriver::new()
            .derive_value("t", &serde_json::json!({ "i": i }), None)
            .unwrap()
    }

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry {
            value: b"v".to_vec().into(),
            created_at: Instant::now(),
            ttl,
            tier_origin: Tier::Tier0,
        }
    }

    #[test]
    fn insert_evicts_batch_when_full() {
        let mut tier = TierMap::new(4);
        for i in 0..4 {
            assert_eq!(tier.insert(key(i), entry(Duration::from_secs(60)), 2).unwrap(), 0);
        }
        assert_eq!(tier.insert(key(4), entry(Duration::from_secs(60)), 2).unwrap(), 2);
        assert_eq!(tier.len(), 3);
        assert!(tier.peek(&key(0)).is_none());
        assert!(tier.peek(&key(1)).is_none());
        assert!(tier.peek(&key(2)).is_some());
    }

    #[test]
    fn replace_does_not_evict_and_becomes_newest() {
        let mut tier = TierMap::new(2);
        tier.insert(key(0), entry(Duration::from_secs(60)), 1).unwrap();
        tier.insert(key(1), entry(Duration::from_secs(60)), 1).unwrap();
        assert_eq!(tier.insert(key(0), entry(Duration::from_secs(60)), 1).unwrap(), 0);
        assert_eq!(tier.len(), 2);

        // key(1) is now the oldest
        tier.insert(key(2), entry(Duration::from_secs(60)), 1).unwrap();
        assert!(tier.peek(&key(1)).is_none());
        assert!(tier.peek(&key(0)).is_some());
    }

    #[test]
    fn zero_batch_still_cannot_overfill() {
        let mut tier = TierMap::new(1);
        tier.insert(key(0), entry(Duration::from_secs(60)), 0).unwrap();
        assert!(tier.insert(key(1), entry(Duration::from_secs(60)), 0).is_err());
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn lookup_removes_expired() {
        let mut tier = TierMap::new(4);
        tier.insert(key(0), entry(Duration::from_millis(1)), 1).unwrap();
        let later = Instant::now() + Duration::from_millis(5);
        assert!(matches!(tier.lookup(&key(0), later), Lookup::Expired));
        assert_eq!(tier.len(), 0);
        assert!(matches!(tier.lookup(&key(0), later), Lookup::Absent));
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let mut tier = TierMap::new(4);
        tier.insert(key(0), entry(Duration::from_millis(1)), 1).unwrap();
        tier.insert(key(1), entry(Duration::from_secs(60)), 1).unwrap();
        assert_eq!(tier.sweep(Instant::now() + Duration::from_millis(5)), 1);
        assert!(tier.peek(&key(1)).is_some());
    }
}
