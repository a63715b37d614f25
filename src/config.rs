//! Router configuration.
//!
//! All tunables are supplied once, at construction, as a [`RouterConfig`].
//! Each section can be built in code:
//!
//! ```rust
//! # use huginn::{RouterConfig, StoreConfig};
//! # use std::time::Duration;
//! let config = RouterConfig::new().store(
//!     StoreConfig::new()
//!         .tier0_capacity(500)
//!         .default_ttl(Duration::from_secs(600)),
//! );
//! assert!(config.validate().is_ok());
//! ```
//!
//! or read from TOML (feature `config-file`), where durations are given in
//! seconds and may be fractional:
//!
//! ```toml
//! [store]
//! tier0_capacity = 500
//! default_ttl = 600
//! sweep_interval = 300
//!
//! [similarity]
//! threshold = 0.75
//! ```
//!
//! File resolution order for [`RouterConfig::load`]:
//! 1. explicit path (must exist)
//! 2. `~/.huginn/config.toml`
//! 3. `/etc/huginn/config.toml`
//! 4. built-in defaults

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trend::MIN_SAMPLES;
use crate::{HuginnError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub complexity: ComplexityConfig,
    #[serde(default)]
    pub trends: TrendConfig,
}

impl RouterConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the store section.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Replace the similarity section.
    pub fn similarity(mut self, similarity: SimilarityConfig) -> Self {
        self.similarity = similarity;
        self
    }

    /// Replace the complexity section.
    pub fn complexity(mut self, complexity: ComplexityConfig) -> Self {
        self.complexity = complexity;
        self
    }

    /// Replace the trends section.
    pub fn trends(mut self, trends: TrendConfig) -> Self {
        self.trends = trends;
        self
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.store;
        if s.tier0_capacity == 0 || s.tier1_capacity == 0 {
            return Err(invalid("tier capacities must be at least 1"));
        }
        if !(s.eviction_fraction > 0.0 && s.eviction_fraction <= 1.0) {
            return Err(invalid("store.eviction_fraction must be in (0, 1]"));
        }
        if s.sweep_interval.is_zero() {
            return Err(invalid("store.sweep_interval must be positive"));
        }

        let m = &self.similarity;
        if !(0.0..=1.0).contains(&m.threshold) {
            return Err(invalid("similarity.threshold must be in [0, 1]"));
        }
        if m.history_window == 0 || m.max_users == 0 {
            return Err(invalid(
                "similarity.history_window and similarity.max_users must be at least 1",
            ));
        }

        let c = &self.complexity;
        if !(c.normalization > 0.0 && c.normalization.is_finite()) {
            return Err(invalid("complexity.normalization must be positive"));
        }
        if c.low_threshold > c.high_threshold {
            return Err(invalid(
                "complexity.low_threshold must not exceed complexity.high_threshold",
            ));
        }

        let t = &self.trends;
        if t.series_capacity < MIN_SAMPLES {
            return Err(HuginnError::Configuration(format!(
                "trends.series_capacity must be at least {MIN_SAMPLES}"
            )));
        }
        if t.sample_interval.is_zero() {
            return Err(invalid("trends.sample_interval must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> HuginnError {
    HuginnError::Configuration(msg.to_string())
}

/// Tiered store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Tier0 (fast, small) capacity. Default: 1,000.
    #[serde(default = "default_tier0_capacity")]
    pub tier0_capacity: usize,
    /// Tier1 (larger, same process) capacity. Default: 10,000.
    #[serde(default = "default_tier1_capacity")]
    pub tier1_capacity: usize,
    /// Share of a full tier removed per eviction pass. Default: 0.1.
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
    /// TTL used when the caller does not supply one. Default: 1 hour.
    #[serde(default = "default_ttl", with = "secs")]
    pub default_ttl: Duration,
    /// Period of the background expiry sweep. Default: 5 minutes.
    #[serde(default = "default_sweep_interval", with = "secs")]
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tier0_capacity: default_tier0_capacity(),
            tier1_capacity: default_tier1_capacity(),
            eviction_fraction: default_eviction_fraction(),
            default_ttl: default_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tier0 capacity.
    pub fn tier0_capacity(mut self, n: usize) -> Self {
        self.tier0_capacity = n;
        self
    }

    /// Set the tier1 capacity.
    pub fn tier1_capacity(mut self, n: usize) -> Self {
        self.tier1_capacity = n;
        self
    }

    /// Set the eviction batch fraction.
    pub fn eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction;
        self
    }

    /// Set the default TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

fn default_tier0_capacity() -> usize {
    1_000
}

fn default_tier1_capacity() -> usize {
    10_000
}

fn default_eviction_fraction() -> f64 {
    0.1
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

/// Near-duplicate matching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Minimum Jaccard similarity for a match, inclusive. Default: 0.7.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// History entries kept per user. Default: 50.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Users tracked at once, shared with preference learning. Default: 10,000.
    #[serde(default = "default_max_users")]
    pub max_users: u64,
    /// Idle time after which a user's history and preferences are dropped.
    /// Default: 24 hours.
    #[serde(default = "default_user_idle", with = "secs")]
    pub user_idle: Duration,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            history_window: default_history_window(),
            max_users: default_max_users(),
            user_idle: default_user_idle(),
        }
    }
}

impl SimilarityConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the match threshold.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the per-user history window.
    pub fn history_window(mut self, n: usize) -> Self {
        self.history_window = n;
        self
    }

    /// Set the number of users tracked at once.
    pub fn max_users(mut self, n: u64) -> Self {
        self.max_users = n;
        self
    }

    /// Set the per-user idle expiry.
    pub fn user_idle(mut self, idle: Duration) -> Self {
        self.user_idle = idle;
        self
    }
}

fn default_threshold() -> f64 {
    0.7
}

fn default_history_window() -> usize {
    50
}

fn default_max_users() -> u64 {
    10_000
}

fn default_user_idle() -> Duration {
    Duration::from_secs(24 * 3600)
}

/// Complexity scoring constants. These are fixed, never learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityConfig {
    /// Divisor applied to the raw richness score. Default: 10.0.
    #[serde(default = "default_normalization")]
    pub normalization: f64,
    /// Scores below this are `simple`. Default: 0.5.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    /// Scores at or above this are `complex`. Default: 1.5.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            normalization: default_normalization(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

impl ComplexityConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the normalization constant.
    pub fn normalization(mut self, n: f64) -> Self {
        self.normalization = n;
        self
    }

    /// Set both band thresholds.
    pub fn thresholds(mut self, low: f64, high: f64) -> Self {
        self.low_threshold = low;
        self.high_threshold = high;
        self
    }
}

fn default_normalization() -> f64 {
    10.0
}

fn default_low_threshold() -> f64 {
    0.5
}

fn default_high_threshold() -> f64 {
    1.5
}

/// Metric trend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Samples kept per series. Default: 100.
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,
    /// Period of the hit-rate sampler and trend classification. Default: 60s.
    #[serde(default = "default_sample_interval", with = "secs")]
    pub sample_interval: Duration,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            series_capacity: default_series_capacity(),
            sample_interval: default_sample_interval(),
        }
    }
}

impl TrendConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-series sample capacity.
    pub fn series_capacity(mut self, n: usize) -> Self {
        self.series_capacity = n;
        self
    }

    /// Set the sampling period.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }
}

fn default_series_capacity() -> usize {
    100
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(60)
}

/// Durations as (fractional) seconds.
mod secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(feature = "config-file")]
mod file {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tracing::info;

    use super::RouterConfig;
    use crate::{HuginnError, Result};

    impl RouterConfig {
        /// Load and validate configuration from the standard locations.
        ///
        /// Falls back to defaults when no file exists anywhere; an explicit
        /// path that does not exist is an error.
        pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
            let Some(path) = Self::resolve_config_path(explicit_path)? else {
                info!("no config file found, using defaults");
                return Ok(Self::default());
            };
            let config = Self::from_file(&path)?;
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }

        /// Load and validate configuration from one file.
        pub fn from_file(path: &Path) -> Result<Self> {
            let content = fs::read_to_string(path).map_err(|e| {
                HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
            })?;
            let config = Self::from_toml(&content).map_err(|e| match e {
                HuginnError::Configuration(msg) => {
                    HuginnError::Configuration(format!("{path:?}: {msg}"))
                }
                other => other,
            })?;
            Ok(config)
        }

        /// Parse and validate configuration from a TOML string.
        pub fn from_toml(content: &str) -> Result<Self> {
            let config: Self = toml::from_str(content).map_err(|e| {
                HuginnError::Configuration(format!("Failed to parse config: {e}"))
            })?;
            config.validate()?;
            Ok(config)
        }

        /// Render as TOML.
        pub fn to_toml(&self) -> Result<String> {
            toml::to_string_pretty(self)
                .map_err(|e| HuginnError::Configuration(format!("Failed to render config: {e}")))
        }

        fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
            if let Some(path) = explicit {
                if path.exists() {
                    return Ok(Some(path.to_path_buf()));
                }
                return Err(HuginnError::Configuration(format!(
                    "Config file not found: {path:?}"
                )));
            }

            if let Some(home) = dirs::home_dir() {
                let user_config = home.join(".huginn").join("config.toml");
                if user_config.exists() {
                    return Ok(Some(user_config));
                }
            }

            let system_config = PathBuf::from("/etc/huginn/config.toml");
            if system_config.exists() {
                return Ok(Some(system_config));
            }

            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.tier0_capacity, 1_000);
        assert_eq!(config.store.tier1_capacity, 10_000);
        assert_eq!(config.store.eviction_fraction, 0.1);
        assert_eq!(config.store.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.similarity.threshold, 0.7);
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = RouterConfig::new().store(StoreConfig::new().tier0_capacity(0));
        assert!(matches!(
            config.validate(),
            Err(HuginnError::Configuration(_))
        ));
    }

    #[test]
    fn eviction_fraction_bounds() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = RouterConfig::new().store(StoreConfig::new().eviction_fraction(bad));
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
        let config = RouterConfig::new().store(StoreConfig::new().eviction_fraction(1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn series_too_short_to_classify_rejected() {
        let config = RouterConfig::new().trends(TrendConfig::new().series_capacity(19));
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_complexity_thresholds_rejected() {
        let config =
            RouterConfig::new().complexity(ComplexityConfig::new().thresholds(2.0, 1.0));
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let config = RouterConfig::from_toml(
            r#"
            [store]
            tier0_capacity = 64
            sweep_interval = 0.5

            [similarity]
            threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.store.tier0_capacity, 64);
        assert_eq!(config.store.sweep_interval, Duration::from_millis(500));
        assert_eq!(config.store.tier1_capacity, 10_000);
        assert_eq!(config.similarity.threshold, 0.8);
        assert_eq!(config.similarity.history_window, 50);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_rejects_invalid_values() {
        let err = RouterConfig::from_toml("[similarity]\nthreshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parse_rejects_negative_duration() {
        assert!(RouterConfig::from_toml("[store]\ndefault_ttl = -1\n").is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_round_trip_preserves_config() {
        let config = RouterConfig::new().store(StoreConfig::new().tier0_capacity(7));
        let rendered = config.to_toml().unwrap();
        assert_eq!(RouterConfig::from_toml(&rendered).unwrap(), config);
    }
}
