//! Two-tier, bounded, TTL-aware response store.
//!
//! # Tiers
//!
//! [`Tier::Tier0`] is small and checked first; [`Tier::Tier1`] is larger
//! and checked on a tier0 miss. Both live in this process: tier1 is a
//! second in-memory map, not a network cache. A tier1 hit is copied into
//! tier0 (promotion) before it is returned.
//!
//! # Writes
//!
//! [`TieredStore::set`] writes every tier. A full tier first drops the
//! oldest `ceil(capacity * eviction_fraction)` entries in one pass rather
//! than one entry per insert. If a second pass still leaves no room the
//! write to that tier is dropped and logged.
//!
//! # Expiry
//!
//! Expired entries are removed lazily by the lookup that finds them, and
//! eagerly by [`TieredStore::sweep_expired`], which the router runs on a
//! fixed interval so cold keys do not linger.
//!
//! # Locking
//!
//! One mutex per tier. Locks are always taken in tier order (tier0, then
//! tier1); a lookup that falls through to tier1 keeps tier0 locked so the
//! promotion lands atomically with the check. Removals that span tiers
//! (`invalidate`, zero-TTL writes, corrupt entries) hold both locks, so a
//! concurrent promotion cannot resurrect a key between the two passes.
//!
//! Every tier mutation leaves the map consistent, so a lock poisoned by a
//! panicking holder is recovered and logged rather than disabling the tier.

mod stats;
mod tier;

pub use stats::{UsageSnapshot, UsageStats};

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::{CacheKey, HuginnError, Result};
use tier::{Full, Lookup, TierMap};

/// Opaque cached payload. Cloning is a reference-count bump.
pub type Payload = Arc<[u8]>;

/// Cache level. Lower index = smaller and faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier0,
    Tier1,
}

impl Tier {
    /// All tiers in lookup (and lock) order.
    pub const ALL: [Tier; 2] = [Tier::Tier0, Tier::Tier1];

    pub fn index(self) -> usize {
        match self {
            Tier::Tier0 => 0,
            Tier::Tier1 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier0 => "tier0",
            Tier::Tier1 => "tier1",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored value. Immutable; a `set` on the same key replaces it whole.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Payload,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Tier holding this copy (and serving it, for entries returned by `get`).
    pub tier_origin: Tier,
}

impl CacheEntry {
    /// Whether the entry is expired at `now` (`now >= created_at + ttl`).
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.created_at.checked_add(self.ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Whether the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Bounded two-tier key → entry store.
pub struct TieredStore {
    tiers: [Mutex<TierMap>; 2],
    eviction_fraction: f64,
    default_ttl: Duration,
    stats: UsageStats,
}

impl TieredStore {
    /// Create an empty store. Expects a validated config.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            tiers: [
                Mutex::new(TierMap::new(config.tier0_capacity)),
                Mutex::new(TierMap::new(config.tier1_capacity)),
            ],
            eviction_fraction: config.eviction_fraction,
            default_ttl: config.default_ttl,
            stats: UsageStats::new(),
        }
    }

    /// Look up a key: tier0, then tier1 with promotion on a hit.
    ///
    /// Counts exactly one of tier0 hit, tier1 hit or miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let found = self.fetch(key);
        match &found {
            Some(entry) => self.stats.record_hit(entry.tier_origin),
            None => self.stats.record_miss(),
        }
        found
    }

    /// Look up a key and decode its payload as JSON.
    ///
    /// A payload that does not decode is treated as corrupt: it is removed
    /// from every tier, logged, and the lookup counts as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let Some(entry) = self.fetch(key) else {
            self.stats.record_miss();
            return None;
        };
        match serde_json::from_slice(&entry.value) {
            Ok(value) => {
                self.stats.record_hit(entry.tier_origin);
                Some(value)
            }
            Err(e) => {
                let err = HuginnError::EntryCorrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "evicting unreadable entry");
                self.remove_everywhere(key, "corrupt");
                self.stats.record_miss();
                None
            }
        }
    }

    /// Write `value` to every tier with the given TTL.
    ///
    /// Errors are informational; the store stays consistent either way:
    /// - [`HuginnError::InvalidTtl`] for a zero TTL. Nothing is stored and
    ///   any previous value for the key is removed, since the replacement
    ///   would already be expired.
    /// - [`HuginnError::StoreCapacityExceeded`] if a tier had no room after
    ///   two eviction passes. Other tiers still got the write.
    pub fn set(&self, key: &CacheKey, value: impl Into<Payload>, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            warn!(key = %key, "non-positive TTL, entry treated as already expired");
            self.remove_everywhere(key, "expired");
            return Err(HuginnError::InvalidTtl {
                key: key.to_string(),
            });
        }

        let value: Payload = value.into();
        let created_at = Instant::now();
        let mut dropped = None;

        for tier in Tier::ALL {
            let mut map = self.lock(tier);
            let batch = self.batch_size(map.capacity());
            let entry = CacheEntry {
                value: Arc::clone(&value),
                created_at,
                ttl,
                tier_origin: tier,
            };
            match map.insert(key.clone(), entry, batch) {
                Ok(0) => {}
                Ok(evicted) => {
                    debug!(%tier, evicted, "batch eviction");
                    self.stats.record_evictions(tier, "capacity", evicted);
                }
                Err(Full) => {
                    warn!(key = %key, %tier, "tier still full after eviction, write dropped");
                    dropped.get_or_insert(tier);
                }
            }
        }

        self.stats.record_set();
        match dropped {
            Some(tier) => Err(HuginnError::StoreCapacityExceeded { tier }),
            None => Ok(()),
        }
    }

    /// [`set`](Self::set) with the configured default TTL.
    pub fn set_default(&self, key: &CacheKey, value: impl Into<Payload>) -> Result<()> {
        self.set(key, value, self.default_ttl)
    }

    /// Serialize `value` as JSON and [`set`](Self::set) it.
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl)
    }

    /// Remove every key containing `pattern` from every tier.
    ///
    /// Returns the number of distinct keys removed. An empty pattern
    /// removes nothing; use [`clear`](Self::clear) to drop everything.
    pub fn invalidate(&self, pattern: &str) -> usize {
        if pattern.is_empty() {
            warn!("ignoring invalidate with empty pattern");
            return 0;
        }
        let mut removed = HashSet::new();
        let mut tiers = self.lock_all();
        for (tier, map) in Tier::ALL.into_iter().zip(tiers.iter_mut()) {
            let keys = map.remove_matching(pattern);
            self.stats.record_evictions(tier, "invalidated", keys.len());
            removed.extend(keys);
        }
        drop(tiers);
        debug!(pattern, removed = removed.len(), "invalidated keys");
        removed.len()
    }

    /// Remove every expired entry from every tier. Returns the count.
    ///
    /// Holds one tier lock at a time.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut total = 0;
        for tier in Tier::ALL {
            let n = self.lock(tier).sweep(now);
            self.stats.record_expirations(tier, n);
            total += n;
        }
        total
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut tiers = self.lock_all();
        for (tier, map) in Tier::ALL.into_iter().zip(tiers.iter_mut()) {
            let n = map.clear();
            self.stats.record_evictions(tier, "invalidated", n);
        }
    }

    /// Entries currently held by `tier`, expired ones included until
    /// they are swept or looked up.
    pub fn len(&self, tier: Tier) -> usize {
        self.lock(tier).len()
    }

    /// Whether every tier is empty.
    pub fn is_empty(&self) -> bool {
        Tier::ALL.iter().all(|&tier| self.len(tier) == 0)
    }

    /// Configured capacity of `tier`.
    pub fn capacity(&self, tier: Tier) -> usize {
        self.lock(tier).capacity()
    }

    /// Inspect one tier without counting, promoting or expiring anything.
    pub fn peek(&self, tier: Tier, key: &CacheKey) -> Option<CacheEntry> {
        self.lock(tier).peek(key).cloned()
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> UsageSnapshot {
        self.stats.snapshot()
    }

    /// The live usage counters (e.g. to [`reset`](UsageStats::reset) them).
    pub fn usage(&self) -> &UsageStats {
        &self.stats
    }

    /// Lookup without accounting. Expired entries found on the way are
    /// removed under the lock that found them.
    fn fetch(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut tier0 = self.lock(Tier::Tier0);
        match tier0.lookup(key, now) {
            Lookup::Hit(entry) => return Some(entry),
            Lookup::Expired => self.stats.record_expirations(Tier::Tier0, 1),
            Lookup::Absent => {}
        }

        let mut tier1 = self.lock(Tier::Tier1);
        match tier1.lookup(key, now) {
            Lookup::Hit(entry) => {
                let copy = CacheEntry {
                    tier_origin: Tier::Tier0,
                    ..entry.clone()
                };
                let batch = self.batch_size(tier0.capacity());
                match tier0.insert(key.clone(), copy, batch) {
                    Ok(evicted) => {
                        self.stats.record_evictions(Tier::Tier0, "capacity", evicted);
                        self.stats.record_promotion();
                        debug!(key = %key, "promoted to tier0");
                    }
                    Err(Full) => warn!(key = %key, "promotion dropped, tier0 full"),
                }
                Some(entry)
            }
            Lookup::Expired => {
                self.stats.record_expirations(Tier::Tier1, 1);
                None
            }
            Lookup::Absent => None,
        }
    }

    fn remove_everywhere(&self, key: &CacheKey, reason: &'static str) {
        let mut tiers = self.lock_all();
        for (tier, map) in Tier::ALL.into_iter().zip(tiers.iter_mut()) {
            if map.remove(key).is_some() {
                self.stats.record_evictions(tier, reason, 1);
            }
        }
    }

    fn batch_size(&self, capacity: usize) -> usize {
        ((capacity as f64 * self.eviction_fraction).ceil() as usize).max(1)
    }

    fn lock(&self, tier: Tier) -> MutexGuard<'_, TierMap> {
        self.tiers[tier.index()].lock().unwrap_or_else(|poisoned| {
            warn!(%tier, "tier lock poisoned by a panicked holder, recovering");
            self.tiers[tier.index()].clear_poison();
            PoisonError::into_inner(poisoned)
        })
    }

    /// Both tier guards, taken in tier order.
    fn lock_all(&self) -> [MutexGuard<'_, TierMap>; 2] {
        let tier0 = self.lock(Tier::Tier0);
        let tier1 = self.lock(Tier::Tier1);
        [tier0, tier1]
    }
}

impl fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredStore")
            .field("tier0_len", &self.len(Tier::Tier0))
            .field("tier1_len", &self.len(Tier::Tier1))
            .field("eviction_fraction", &self.eviction_fraction)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
