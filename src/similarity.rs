//! Near-duplicate detection over per-user request history.
//!
//! Each user owns a FIFO window of their last N completed requests. A new
//! request is compared (Jaccard over token sets) against the entries of
//! that window recorded for the same namespace, so the cost is
//! O(window size) regardless of total traffic.
//!
//! The set of tracked users is itself bounded: windows live in a moka
//! cache capped at `max_users` and dropped after `user_idle` without
//! activity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use moka::sync::Cache;
use serde_json::Value;
use tracing::warn;

use crate::CacheKey;
use crate::config::SimilarityConfig;
use crate::profile::RequestProfile;

/// One completed request in a user's history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub namespace: String,
    pub profile: RequestProfile,
    /// Final parameters the generation ran with.
    pub outcome: Value,
    /// Cache key the result was stored under, if the request was cacheable.
    pub key: Option<CacheKey>,
    pub recorded_at: Instant,
}

/// Best history match for a request.
#[derive(Debug, Clone)]
pub struct SimilarMatch {
    pub entry: HistoryEntry,
    pub similarity: f64,
}

type Window = Arc<Mutex<VecDeque<HistoryEntry>>>;

/// Per-user history windows and the similarity search over them.
pub struct SimilarityMatcher {
    windows: Cache<String, Window>,
    window_size: usize,
    threshold: f64,
}

impl SimilarityMatcher {
    pub fn new(config: &SimilarityConfig) -> Self {
        let windows = Cache::builder()
            .max_capacity(config.max_users)
            .time_to_idle(config.user_idle)
            .build();
        Self {
            windows,
            window_size: config.history_window,
            threshold: config.threshold,
        }
    }

    /// Inclusive match threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Append to a user's window, dropping the oldest entry when full.
    pub fn record(&self, user_id: &str, entry: HistoryEntry) {
        let window = self
            .windows
            .get_with(user_id.to_string(), || Arc::new(Mutex::new(VecDeque::new())));
        let Ok(mut window) = window.lock() else {
            warn!(user_id, "history window lock poisoned, entry dropped");
            return;
        };
        while window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(entry);
    }

    /// Find the most similar prior request of `user_id` in `namespace`.
    ///
    /// Candidates must reach the threshold (inclusive). Among equally
    /// similar candidates the most recently recorded wins. Returns `None`
    /// for an unknown user, an empty window, or no candidate at the
    /// threshold.
    pub fn find(
        &self,
        user_id: &str,
        namespace: &str,
        profile: &RequestProfile,
    ) -> Option<SimilarMatch> {
        let window = self.windows.get(user_id)?;
        let Ok(window) = window.lock() else {
            warn!(user_id, "history window lock poisoned, skipping similarity search");
            return None;
        };

        let mut best: Option<(f64, &HistoryEntry)> = None;
        // Oldest to newest, so `>=` lets a later entry win a tie.
        for entry in window.iter().filter(|e| e.namespace == namespace) {
            let similarity = profile.jaccard(&entry.profile);
            if similarity < self.threshold {
                continue;
            }
            if best.is_none_or(|(s, _)| similarity >= s) {
                best = Some((similarity, entry));
            }
        }

        best.map(|(similarity, entry)| SimilarMatch {
            entry: entry.clone(),
            similarity,
        })
    }

    /// Copy of a user's window, oldest first.
    pub fn history(&self, user_id: &str) -> Vec<HistoryEntry> {
        self.windows
            .get(user_id)
            .and_then(|w| w.lock().ok().map(|w| w.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Drop a user's history.
    pub fn forget(&self, user_id: &str) {
        self.windows.invalidate(user_id);
    }
}

impl std::fmt::Debug for SimilarityMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityMatcher")
            .field("window_size", &self.window_size)
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplexityConfig;
    use crate::profile::ComplexityAnalyzer;
    use serde_json::json;

    fn profile(text: &str) -> RequestProfile {
        ComplexityAnalyzer::new(&ComplexityConfig::default()).profile(&json!({ "prompt": text }))
    }

    fn entry(ns: &str, text: &str, tag: &str) -> HistoryEntry {
        HistoryEntry {
            namespace: ns.into(),
            profile: profile(text),
            outcome: json!({ "prompt": text, "tag": tag }),
            key: None,
            recorded_at: Instant::now(),
        }
    }

    #[test]
    fn window_is_fifo_bounded() {
        let m = SimilarityMatcher::new(&SimilarityConfig::new().history_window(2));
        m.record("u", entry("ns", "one", "1"));
        m.record("u", entry("ns", "two", "2"));
        m.record("u", entry("ns", "three", "3"));
        let h = m.history("u");
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].outcome["tag"], "2");
        assert_eq!(h[1].outcome["tag"], "3");
    }

    #[test]
    fn tie_goes_to_most_recent() {
        let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.5));
        m.record("u", entry("ns", "red fox", "old"));
        m.record("u", entry("ns", "red fox", "new"));
        let found = m.find("u", "ns", &profile("red fox")).unwrap();
        assert_eq!(found.similarity, 1.0);
        assert_eq!(found.entry.outcome["tag"], "new");
    }

    #[test]
    fn higher_similarity_beats_recency() {
        let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.5));
        m.record("u", entry("ns", "red fox jumps", "exact"));
        m.record("u", entry("ns", "red fox sleeps", "newer"));
        let found = m.find("u", "ns", &profile("red fox jumps")).unwrap();
        assert_eq!(found.entry.outcome["tag"], "exact");
    }

    #[test]
    fn other_namespace_is_ignored() {
        let m = SimilarityMatcher::new(&SimilarityConfig::default());
        m.record("u", entry("image", "red fox", "img"));
        assert!(m.find("u", "video", &profile("red fox")).is_none());
    }

    #[test]
    fn forget_clears_history() {
        let m = SimilarityMatcher::new(&SimilarityConfig::default());
        m.record("u", entry("ns", "red fox", "a"));
        m.forget("u");
        assert!(m.history("u").is_empty());
        assert!(m.find("u", "ns", &profile("red fox")).is_none());
    }
}
