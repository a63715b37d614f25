//! Hit/miss accounting for the tiered store.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::Tier;
use crate::telemetry;

/// Monotonic usage counters, shared by every caller of the store.
///
/// Each counter is a single atomic, so a reader never sees a partial
/// increment. A snapshot loads the counters one after another; under
/// concurrent traffic it can be a few operations behind on some fields,
/// which is fine for rates. Every `record_*` call also emits the matching
/// `metrics` counter.
#[derive(Debug, Default)]
pub struct UsageStats {
    tier0_hits: AtomicU64,
    tier1_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl UsageStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Tier0 => &self.tier0_hits,
            Tier::Tier1 => &self.tier1_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => tier.as_str()).increment(1);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }

    pub(crate) fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_PROMOTIONS_TOTAL).increment(1);
    }

    /// Entries removed for capacity, invalidation or corruption.
    pub(crate) fn record_evictions(&self, tier: Tier, reason: &'static str, n: usize) {
        if n == 0 {
            return;
        }
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        metrics::counter!(
            telemetry::CACHE_EVICTIONS_TOTAL,
            "tier" => tier.as_str(),
            "reason" => reason
        )
        .increment(n as u64);
    }

    /// Entries removed because their TTL ran out.
    pub(crate) fn record_expirations(&self, tier: Tier, n: usize) {
        if n == 0 {
            return;
        }
        self.expirations.fetch_add(n as u64, Ordering::Relaxed);
        metrics::counter!(
            telemetry::CACHE_EVICTIONS_TOTAL,
            "tier" => tier.as_str(),
            "reason" => "expired"
        )
        .increment(n as u64);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            tier0_hits: self.tier0_hits.load(Ordering::Relaxed),
            tier1_hits: self.tier1_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. The only way counters ever go down.
    pub fn reset(&self) {
        for counter in [
            &self.tier0_hits,
            &self.tier1_hits,
            &self.misses,
            &self.sets,
            &self.promotions,
            &self.evictions,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`UsageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub tier0_hits: u64,
    pub tier1_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl UsageSnapshot {
    /// Hits from any tier.
    pub fn hits(&self) -> u64 {
        self.tier0_hits + self.tier1_hits
    }

    /// Total `get` calls counted.
    pub fn lookups(&self) -> u64 {
        self.hits() + self.misses
    }

    /// Overall hit rate, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.lookups())
    }

    /// Hit rate of one tier over the lookups that reached it.
    ///
    /// Every lookup reaches tier0; only tier0 misses reach tier1.
    pub fn tier_hit_rate(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Tier0 => ratio(self.tier0_hits, self.lookups()),
            Tier::Tier1 => ratio(self.tier1_hits, self.tier1_hits + self.misses),
        }
    }

    /// Counter growth since an earlier snapshot.
    ///
    /// Saturates at zero when a reset happened in between.
    pub fn since(&self, earlier: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            tier0_hits: self.tier0_hits.saturating_sub(earlier.tier0_hits),
            tier1_hits: self.tier1_hits.saturating_sub(earlier.tier1_hits),
            misses: self.misses.saturating_sub(earlier.misses),
            sets: self.sets.saturating_sub(earlier.sets),
            promotions: self.promotions.saturating_sub(earlier.promotions),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            expirations: self.expirations.saturating_sub(earlier.expirations),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let s = UsageStats::new().snapshot();
        assert_eq!(s.hit_rate(), 0.0);
        assert_eq!(s.tier_hit_rate(Tier::Tier0), 0.0);
        assert_eq!(s.tier_hit_rate(Tier::Tier1), 0.0);
    }

    #[test]
    fn per_tier_rates() {
        let stats = UsageStats::new();
        stats.record_hit(Tier::Tier0);
        stats.record_hit(Tier::Tier0);
        stats.record_hit(Tier::Tier1);
        stats.record_miss();

        let s = stats.snapshot();
        assert_eq!(s.lookups(), 4);
        assert_eq!(s.hit_rate(), 0.75);
        assert_eq!(s.tier_hit_rate(Tier::Tier0), 0.5);
        assert_eq!(s.tier_hit_rate(Tier::Tier1), 0.5);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = UsageStats::new();
        stats.record_hit(Tier::Tier1);
        stats.record_set();
        stats.record_evictions(Tier::Tier0, "capacity", 3);
        stats.reset();
        assert_eq!(stats.snapshot(), UsageSnapshot::default());
    }

    #[test]
    fn since_saturates_after_reset() {
        let stats = UsageStats::new();
        stats.record_miss();
        stats.record_miss();
        let before = stats.snapshot();
        stats.reset();
        stats.record_hit(Tier::Tier0);
        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.misses, 0);
        assert_eq!(delta.tier0_hits, 1);
    }
}
