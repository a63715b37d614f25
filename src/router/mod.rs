//! Request routing: replay, adapt, or synthesize.
//!
//! [`Router`] owns every component and is the one object the request
//! layer talks to. For each request it decides:
//!
//! 1. **CachedReplay**: the exact request (namespace, parameters, user
//!    scope) has a live cache entry; replay its payload.
//! 2. **FastAdapt**: no exact hit, but the user recently ran a request
//!    with a near-identical token set in the same namespace, and this one
//!    is not complex. The prior run's parameters, overlaid with this
//!    request's fields, are handed back for a cheap adaptation.
//! 3. **FullSynthesize**: everything else, with missing fields filled
//!    from the user's learned preferences.
//!
//! The caller runs the generation and reports back through
//! [`Router::record_outcome`], which stores the result, extends the
//! user's history and preferences, and feeds the latency trend.
//!
//! Routing is fail-open. A request that cannot be keyed goes straight to
//! FullSynthesize and is never cached; store faults read as misses.
//!
//! ```rust
//! # use huginn::{GenerationRequest, Outcome, RouteMode, Router, RouterConfig};
//! # use serde_json::json;
//! # use std::time::Duration;
//! let router = Router::new(RouterConfig::default())?;
//! let request = GenerationRequest::new("video", json!({"prompt": "sunset over mountains"}));
//!
//! let first = router.route(&request, "u1");
//! assert_eq!(first.mode, RouteMode::FullSynthesize);
//! router.record_outcome("u1", &first, Outcome::new(b"clip".to_vec()), Duration::from_millis(840));
//!
//! let second = router.route(&request, "u1");
//! assert_eq!(second.mode, RouteMode::CachedReplay);
//! assert_eq!(&*second.payload.unwrap(), b"clip");
//! # Ok::<(), huginn::HuginnError>(())
//! ```

mod maintenance;

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::RouterConfig;
use crate::preference::PreferenceLearner;
use crate::profile::{ComplexityAnalyzer, ComplexityBand, RequestProfile};
use crate::similarity::{HistoryEntry, SimilarityMatcher};
use crate::store::{CacheEntry, Payload, Tier, TieredStore, UsageSnapshot};
use crate::trend::{self, Trend, TrendAnalyzer, TrendReading};
use crate::{CacheKey, HuginnError, KeyDeriver, Result, telemetry};
use maintenance::Maintenance;

/// An inbound generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub namespace: String,
    /// Parameter payload. Must be a JSON object to be cacheable.
    pub parameters: Value,
    /// Optional scope folded into the cache key (e.g. a tenant or user id
    /// when results must not be shared).
    pub user_scope: Option<String>,
}

impl GenerationRequest {
    pub fn new(namespace: impl Into<String>, parameters: Value) -> Self {
        Self {
            namespace: namespace.into(),
            parameters,
            user_scope: None,
        }
    }

    /// Build a request from any serializable parameter type.
    pub fn from_serializable<P: Serialize + ?Sized>(
        namespace: impl Into<String>,
        parameters: &P,
    ) -> Result<Self> {
        let parameters = serde_json::to_value(parameters).map_err(|e| {
            HuginnError::InvalidRequest(format!("parameters are not serializable: {e}"))
        })?;
        Ok(Self::new(namespace, parameters))
    }

    /// Scope the cache key.
    pub fn user_scope(mut self, scope: impl Into<String>) -> Self {
        self.user_scope = Some(scope.into());
        self
    }
}

/// How a request should be fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    CachedReplay,
    FastAdapt,
    FullSynthesize,
}

impl RouteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMode::CachedReplay => "cached_replay",
            RouteMode::FastAdapt => "fast_adapt",
            RouteMode::FullSynthesize => "full_synthesize",
        }
    }
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a decision was based on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionSource {
    /// Exact cache hit.
    Cache { key: CacheKey, tier: Tier },
    /// Near-duplicate from the user's history.
    History {
        key: Option<CacheKey>,
        similarity: f64,
    },
    /// Request parameters plus learned preferences.
    Preferences,
}

/// The router's answer for one request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub mode: RouteMode,
    /// Parameters the generation should run with.
    pub parameters: Value,
    pub source: DecisionSource,
    pub namespace: String,
    /// Cache key of the request; `None` when the request is not cacheable.
    pub key: Option<CacheKey>,
    /// Token profile, computed for every cacheable miss.
    pub profile: Option<RequestProfile>,
    /// Payload to replay, set for [`RouteMode::CachedReplay`].
    pub payload: Option<Payload>,
}

/// Result of a generation the caller ran for a decision.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub payload: Payload,
    /// Final parameters; defaults to the decision's parameters.
    pub parameters: Option<Value>,
    /// Cache TTL; defaults to the configured default TTL.
    pub ttl: Option<Duration>,
}

impl Outcome {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            parameters: None,
            ttl: None,
        }
    }

    /// Override the parameters recorded for this outcome.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Override the cache TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Response cache plus adaptive routing, behind one handle.
///
/// Construct once with [`Router::new`], share via `Arc`, call
/// [`Router::start`] inside a tokio runtime to run the background sweep
/// and trend sampler, and [`Router::close`] on shutdown.
pub struct Router {
    config: RouterConfig,
    keys: KeyDeriver,
    store: TieredStore,
    analyzer: ComplexityAnalyzer,
    matcher: SimilarityMatcher,
    preferences: PreferenceLearner,
    trends: TrendAnalyzer,
    maintenance: Maintenance,
}

impl Router {
    /// Validate `config` and build every component. Spawns nothing.
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys: KeyDeriver::new(),
            store: TieredStore::new(&config.store),
            analyzer: ComplexityAnalyzer::new(&config.complexity),
            matcher: SimilarityMatcher::new(&config.similarity),
            preferences: PreferenceLearner::new(&config.similarity),
            trends: TrendAnalyzer::with_builtin_series(config.trends.series_capacity),
            maintenance: Maintenance::new(),
            config,
        })
    }

    /// Decide how `request` from `user_id` should be fulfilled.
    ///
    /// Never fails: faults degrade to [`RouteMode::FullSynthesize`].
    #[instrument(skip(self, request), fields(namespace = %request.namespace))]
    pub fn route(&self, request: &GenerationRequest, user_id: &str) -> RoutingDecision {
        let key = match self.derive_key(request) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "request not cacheable, routing uncached");
                return self.uncached(&request.namespace, &request.parameters, user_id);
            }
        };

        if let Some(entry) = self.store.get(&key) {
            return self.decided(RoutingDecision {
                mode: RouteMode::CachedReplay,
                parameters: request.parameters.clone(),
                source: DecisionSource::Cache {
                    key: key.clone(),
                    tier: entry.tier_origin,
                },
                namespace: request.namespace.clone(),
                key: Some(key),
                profile: None,
                payload: Some(entry.value),
            });
        }

        let profile = self.analyzer.profile(&request.parameters);
        if profile.band != ComplexityBand::Complex
            && let Some(found) = self.matcher.find(user_id, &request.namespace, &profile)
        {
            return self.decided(RoutingDecision {
                mode: RouteMode::FastAdapt,
                parameters: overlay(&found.entry.outcome, &request.parameters),
                source: DecisionSource::History {
                    key: found.entry.key,
                    similarity: found.similarity,
                },
                namespace: request.namespace.clone(),
                key: Some(key),
                profile: Some(profile),
                payload: None,
            });
        }

        self.decided(RoutingDecision {
            mode: RouteMode::FullSynthesize,
            parameters: self.preferences.fill_defaults(&request.parameters, user_id),
            source: DecisionSource::Preferences,
            namespace: request.namespace.clone(),
            key: Some(key),
            profile: Some(profile),
            payload: None,
        })
    }

    /// [`route`](Self::route) for a typed parameter payload.
    ///
    /// A payload that does not serialize cannot be cached or profiled; it
    /// routes to an uncached [`RouteMode::FullSynthesize`] with `null`
    /// parameters, leaving the caller to run it with its own typed value.
    pub fn route_serializable<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        parameters: &P,
        user_id: &str,
    ) -> RoutingDecision {
        match GenerationRequest::from_serializable(namespace, parameters) {
            Ok(request) => self.route(&request, user_id),
            Err(e) => {
                warn!(namespace, error = %e, "request not cacheable, routing uncached");
                self.uncached(namespace, &Value::Null, user_id)
            }
        }
    }

    /// Report the result of a generation run for `decision`.
    ///
    /// Stores the payload under the decision's key (if any), appends the
    /// request to the user's history, reinforces preferences and records
    /// the latency. Replays carry no new information and are ignored.
    pub fn record_outcome(
        &self,
        user_id: &str,
        decision: &RoutingDecision,
        outcome: Outcome,
        latency: Duration,
    ) {
        if decision.mode == RouteMode::CachedReplay {
            debug!("outcome for a replay ignored");
            return;
        }

        let parameters = outcome
            .parameters
            .unwrap_or_else(|| decision.parameters.clone());

        if let Some(key) = &decision.key {
            let ttl = outcome.ttl.unwrap_or(self.config.store.default_ttl);
            if let Err(e) = self.store.set(key, outcome.payload, ttl) {
                warn!(error = %e, "result not fully cached");
            }
        }

        if let Some(profile) = &decision.profile {
            self.matcher.record(
                user_id,
                HistoryEntry {
                    namespace: decision.namespace.clone(),
                    profile: profile.clone(),
                    outcome: parameters.clone(),
                    key: decision.key.clone(),
                    recorded_at: Instant::now(),
                },
            );
        }

        self.preferences.record(user_id, &parameters);

        metrics::histogram!(telemetry::GENERATION_LATENCY_SECONDS).record(latency.as_secs_f64());
        self.trends
            .record(trend::GENERATION_LATENCY_MS, latency.as_secs_f64() * 1000.0);
    }

    /// Cache key for a request.
    pub fn derive_key(&self, request: &GenerationRequest) -> Result<CacheKey> {
        self.keys.derive_value(
            &request.namespace,
            &request.parameters,
            request.user_scope.as_deref(),
        )
    }

    /// Direct store lookup. See [`TieredStore::get`].
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.store.get(key)
    }

    /// Direct store write. See [`TieredStore::set`].
    pub fn set(&self, key: &CacheKey, value: impl Into<Payload>, ttl: Duration) -> Result<()> {
        self.store.set(key, value, ttl)
    }

    /// Remove every cached key containing `pattern`. Administrative.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.store.invalidate(pattern)
    }

    /// Cache usage counters.
    pub fn stats(&self) -> UsageSnapshot {
        self.store.stats()
    }

    /// Current classification of every metric series.
    pub fn trends(&self) -> Vec<TrendReading> {
        self.trends.snapshot()
    }

    /// Current classification of one metric series.
    pub fn trend(&self, name: &str) -> Option<Trend> {
        self.trends.classify(name)
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    pub fn preferences(&self) -> &PreferenceLearner {
        &self.preferences
    }

    pub fn trend_analyzer(&self) -> &TrendAnalyzer {
        &self.trends
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn uncached(&self, namespace: &str, parameters: &Value, user_id: &str) -> RoutingDecision {
        self.decided(RoutingDecision {
            mode: RouteMode::FullSynthesize,
            parameters: self.preferences.fill_defaults(parameters, user_id),
            source: DecisionSource::Preferences,
            namespace: namespace.to_string(),
            key: None,
            profile: None,
            payload: None,
        })
    }

    fn decided(&self, decision: RoutingDecision) -> RoutingDecision {
        metrics::counter!(telemetry::ROUTE_DECISIONS_TOTAL, "mode" => decision.mode.as_str())
            .increment(1);
        debug!(mode = %decision.mode, "routed");
        decision
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("store", &self.store)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// `base` with every field of `overrides` written over it.
fn overlay(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (name, value) in overrides {
                merged.insert(name.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}
