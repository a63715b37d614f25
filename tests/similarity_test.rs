//! Tests for near-duplicate matching and preference learning.

use std::time::Instant;

use huginn::{
    ComplexityAnalyzer, ComplexityBand, ComplexityConfig, HistoryEntry, PreferenceLearner,
    RequestProfile, SimilarityConfig, SimilarityMatcher,
};
use serde_json::{Value, json};

fn profile(prompt: &str) -> RequestProfile {
    ComplexityAnalyzer::new(&ComplexityConfig::default()).profile(&json!({ "prompt": prompt }))
}

fn entry(prompt: &str, outcome: Value) -> HistoryEntry {
    HistoryEntry {
        namespace: "video".into(),
        profile: profile(prompt),
        outcome,
        key: None,
        recorded_at: Instant::now(),
    }
}

// =========================================================================
// Threshold boundary
// =========================================================================

#[test]
fn similarity_exactly_at_threshold_matches() {
    let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.75));
    m.record("u1", entry("red fox jumps", json!({"tag": "prior"})));

    let found = m
        .find("u1", "video", &profile("red fox jumps high"))
        .expect("3/4 overlap meets a 0.75 threshold");
    assert_eq!(found.similarity, 0.75);
    assert_eq!(found.entry.outcome["tag"], "prior");
}

#[test]
fn similarity_just_below_threshold_does_not_match() {
    let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.76));
    m.record("u1", entry("red fox jumps", json!({})));
    assert!(m.find("u1", "video", &profile("red fox jumps high")).is_none());

    let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.75));
    m.record("u1", entry("red fox jumps", json!({})));
    // 3/5 = 0.6
    assert!(
        m.find("u1", "video", &profile("red fox jumps very high"))
            .is_none()
    );
}

#[test]
fn history_is_per_user() {
    let m = SimilarityMatcher::new(&SimilarityConfig::default());
    m.record("alice", entry("red fox", json!({})));
    assert!(m.find("bob", "video", &profile("red fox")).is_none());
    assert!(m.find("alice", "video", &profile("red fox")).is_some());
}

#[test]
fn empty_profiles_never_match() {
    let empty = ComplexityAnalyzer::new(&ComplexityConfig::default()).profile(&json!({"n": 1}));
    assert!(empty.tokens.is_empty());
    assert_eq!(empty.jaccard(&empty), 0.0);

    let m = SimilarityMatcher::new(&SimilarityConfig::new().threshold(0.1));
    m.record(
        "u",
        HistoryEntry {
            namespace: "video".into(),
            profile: empty.clone(),
            outcome: json!({}),
            key: None,
            recorded_at: Instant::now(),
        },
    );
    m.record("u", entry("red fox", json!({})));
    assert!(m.find("u", "video", &empty).is_none());
}

// =========================================================================
// Complexity banding
// =========================================================================

#[test]
fn bands_are_half_open() {
    let a = ComplexityAnalyzer::new(&ComplexityConfig::new().thresholds(0.5, 1.5));
    assert_eq!(a.band(0.49), ComplexityBand::Simple);
    assert_eq!(a.band(0.5), ComplexityBand::Moderate);
    assert_eq!(a.band(1.49), ComplexityBand::Moderate);
    assert_eq!(a.band(1.5), ComplexityBand::Complex);
}

#[test]
fn repeated_words_lower_the_score() {
    let a = ComplexityAnalyzer::new(&ComplexityConfig::default());
    let varied = a.profile(&json!({"prompt": "one two three four five six"}));
    let repeated = a.profile(&json!({"prompt": "one one one one one one"}));
    assert_eq!(varied.token_count, repeated.token_count);
    assert!(varied.score > repeated.score);
    assert_eq!(repeated.unique_token_count, 1);
}

#[test]
fn tokens_come_from_nested_strings_only() {
    let a = ComplexityAnalyzer::new(&ComplexityConfig::default());
    let p = a.profile(&json!({
        "prompt": "Sunset, OVER mountains!",
        "style": {"mood": ["dramatic"]},
        "seed": 42,
        "hd": true
    }));
    let tokens: Vec<&str> = p.tokens.iter().map(String::as_str).collect();
    assert_eq!(tokens, ["dramatic", "mountains", "over", "sunset"]);
}

// =========================================================================
// Preferences
// =========================================================================

#[test]
fn preferences_fill_missing_fields_only() {
    let p = PreferenceLearner::new(&SimilarityConfig::default());
    p.record("u1", &json!({"style": "noir", "fps": 24}));
    p.record("u1", &json!({"fps": 30}));

    let filled = p.fill_defaults(&json!({"prompt": "fox", "style": "pastel"}), "u1");
    assert_eq!(filled, json!({"prompt": "fox", "style": "pastel", "fps": 30}));
}

#[test]
fn forgetting_a_user_drops_preferences() {
    let p = PreferenceLearner::new(&SimilarityConfig::default());
    p.record("u1", &json!({"style": "noir"}));
    p.forget("u1");
    assert!(p.profile("u1").is_empty());
}
