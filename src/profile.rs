//! Request token profiles and complexity banding.
//!
//! A request's tokens are the lowercased alphanumeric runs of every string
//! value in its parameters, at any depth. Field names, numbers and
//! booleans do not contribute.
//!
//! ```rust
//! # use huginn::{ComplexityAnalyzer, ComplexityBand, ComplexityConfig};
//! # use serde_json::json;
//! let analyzer = ComplexityAnalyzer::new(&ComplexityConfig::default());
//! let profile = analyzer.profile(&json!({"prompt": "Sunset over mountains"}));
//! assert_eq!(profile.token_count, 3);
//! assert_eq!(profile.band, ComplexityBand::Simple);
//! ```

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::config::ComplexityConfig;

/// Complexity band derived from a request's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Simple,
    Moderate,
    Complex,
}

/// Token profile of one request, computed once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestProfile {
    /// Distinct normalized tokens.
    pub tokens: BTreeSet<String>,
    /// All tokens, duplicates included.
    pub token_count: usize,
    /// Distinct tokens.
    pub unique_token_count: usize,
    pub score: f64,
    pub band: ComplexityBand,
}

impl RequestProfile {
    /// Jaccard similarity `|A ∩ B| / |A ∪ B|` of the two token sets.
    ///
    /// Two empty sets are treated as dissimilar (`0.0`): an empty request
    /// carries no evidence that it repeats anything.
    pub fn jaccard(&self, other: &RequestProfile) -> f64 {
        let intersection = self.tokens.intersection(&other.tokens).count();
        let union = self.tokens.len() + other.tokens.len() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

/// Scores requests into [`ComplexityBand`]s with fixed thresholds.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    normalization: f64,
    low_threshold: f64,
    high_threshold: f64,
}

impl ComplexityAnalyzer {
    pub fn new(config: &ComplexityConfig) -> Self {
        Self {
            normalization: config.normalization,
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
        }
    }

    /// Build the profile of a parameter payload.
    pub fn profile(&self, parameters: &Value) -> RequestProfile {
        let mut all = Vec::new();
        collect_tokens(parameters, &mut all);
        let token_count = all.len();
        let tokens: BTreeSet<String> = all.into_iter().collect();
        let unique_token_count = tokens.len();
        let score = self.score(token_count, unique_token_count);
        RequestProfile {
            tokens,
            token_count,
            unique_token_count,
            score,
            band: self.band(score),
        }
    }

    /// Length-weighted vocabulary richness:
    /// `token_count * (unique / token_count) / normalization`.
    pub fn score(&self, token_count: usize, unique_token_count: usize) -> f64 {
        if token_count == 0 {
            return 0.0;
        }
        let richness = unique_token_count as f64 / token_count as f64;
        token_count as f64 * richness / self.normalization
    }

    pub fn band(&self, score: f64) -> ComplexityBand {
        if score < self.low_threshold {
            ComplexityBand::Simple
        } else if score < self.high_threshold {
            ComplexityBand::Moderate
        } else {
            ComplexityBand::Complex
        }
    }
}

/// Split text into lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn collect_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
