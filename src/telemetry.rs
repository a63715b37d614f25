//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `tier`: "tier0" or "tier1"
//! - `reason`: why an entry left the store, one of "capacity", "expired",
//!   "invalidated" or "corrupt"
//! - `mode`: the routing decision, "cached_replay", "fast_adapt" or
//!   "full_synthesize"

/// Total cache hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total cache misses (absent from every tier).
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total entries copied from tier1 into tier0 on access.
pub const CACHE_PROMOTIONS_TOTAL: &str = "huginn_cache_promotions_total";

/// Total entries removed from a tier.
///
/// Labels: `tier`, `reason`.
pub const CACHE_EVICTIONS_TOTAL: &str = "huginn_cache_evictions_total";

/// Total routing decisions.
///
/// Labels: `mode`.
pub const ROUTE_DECISIONS_TOTAL: &str = "huginn_route_decisions_total";

/// Generation latency reported back by callers, in seconds.
pub const GENERATION_LATENCY_SECONDS: &str = "huginn_generation_latency_seconds";
