//! Tests for [`TrendAnalyzer`]: named metric series and their trends.

use huginn::{Direction, Trend, TrendAnalyzer, trend};

fn feed(analyzer: &TrendAnalyzer, name: &str, prior: f64, recent: f64) {
    for _ in 0..trend::WINDOW {
        analyzer.record(name, prior);
    }
    for _ in 0..trend::WINDOW {
        analyzer.record(name, recent);
    }
}

#[test]
fn builtin_series_are_registered() {
    let a = TrendAnalyzer::with_builtin_series(100);
    let names: Vec<String> = a.snapshot().into_iter().map(|r| r.name).collect();
    assert_eq!(names, [trend::CACHE_HIT_RATE, trend::GENERATION_LATENCY_MS]);
    assert_eq!(
        a.classify(trend::CACHE_HIT_RATE),
        Some(Trend::InsufficientData)
    );
}

#[test]
fn custom_series_classifies_by_direction() {
    let a = TrendAnalyzer::new(100);
    assert!(a.register("quality_score", Direction::HigherIsBetter));
    assert!(a.register("queue_depth", Direction::LowerIsBetter));

    feed(&a, "quality_score", 0.6, 0.9);
    feed(&a, "queue_depth", 4.0, 12.0);

    assert_eq!(a.classify("quality_score"), Some(Trend::Improving));
    assert_eq!(a.classify("queue_depth"), Some(Trend::Declining));
}

#[test]
fn flat_series_is_stable() {
    let a = TrendAnalyzer::new(100);
    a.register("latency", Direction::LowerIsBetter);
    feed(&a, "latency", 250.0, 250.0);
    assert_eq!(a.classify("latency"), Some(Trend::Stable));
}

#[test]
fn snapshot_reports_latest_sample() {
    let a = TrendAnalyzer::new(30);
    a.register("m", Direction::HigherIsBetter);
    for i in 0..50 {
        a.record("m", i as f64);
    }
    let reading = a.snapshot().pop().unwrap();
    assert_eq!(reading.samples, 30);
    assert_eq!(reading.latest, Some(49.0));
    assert_eq!(reading.trend, Trend::Improving);
}
