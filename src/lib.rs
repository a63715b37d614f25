//! Huginn - tiered response cache and adaptive router for generation backends
//!
//! Generation backends (image, video, text) are slow and expensive. Huginn
//! sits in front of one and decides, per request, whether to replay a
//! cached result, adapt a near-identical prior request, or run a full
//! generation. It learns from every outcome the caller reports back.
//!
//! Everything is in-process: the cache tiers, per-user history and
//! preferences, and the trend series all live in memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use huginn::{GenerationRequest, Outcome, RouteMode, Router, RouterConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let router = Arc::new(Router::new(RouterConfig::default())?);
//!     router.start()?;
//!
//!     let request = GenerationRequest::new("image", json!({"prompt": "sunset over mountains"}));
//!     let decision = router.route(&request, "user-42");
//!     match decision.mode {
//!         RouteMode::CachedReplay => { /* serve decision.payload */ }
//!         RouteMode::FastAdapt | RouteMode::FullSynthesize => {
//!             let started = Instant::now();
//!             let payload = b"...".to_vec(); // run the backend with decision.parameters
//!             router.record_outcome("user-42", &decision, Outcome::new(payload), started.elapsed());
//!         }
//!     }
//!
//!     router.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod preference;
pub mod profile;
pub mod router;
pub mod similarity;
pub mod store;
pub mod telemetry;
pub mod trend;

pub use config::{ComplexityConfig, RouterConfig, SimilarityConfig, StoreConfig, TrendConfig};
pub use error::{HuginnError, Result};
pub use key::{CacheKey, KeyDeriver};
pub use preference::PreferenceLearner;
pub use profile::{ComplexityAnalyzer, ComplexityBand, RequestProfile};
pub use router::{
    DecisionSource, GenerationRequest, Outcome, RouteMode, Router, RoutingDecision,
};
pub use similarity::{HistoryEntry, SimilarMatch, SimilarityMatcher};
pub use store::{CacheEntry, Payload, Tier, TieredStore, UsageSnapshot, UsageStats};
pub use trend::{Direction, MetricSeries, Trend, TrendAnalyzer, TrendReading};
