//! Per-user parameter preferences.
//!
//! Every completed request reinforces the user's preferred value for each
//! parameter it ran with. The scheme is last-write-wins: the most recent
//! value for a parameter name replaces the previous one, with no decay or
//! frequency weighting.
//!
//! Profiles share the matcher's user bounds (`max_users`, `user_idle`).

use std::sync::{Arc, Mutex};

use moka::sync::Cache;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::SimilarityConfig;

type Profile = Arc<Mutex<Map<String, Value>>>;

/// Learns and applies per-user parameter defaults.
pub struct PreferenceLearner {
    profiles: Cache<String, Profile>,
}

impl PreferenceLearner {
    pub fn new(config: &SimilarityConfig) -> Self {
        let profiles = Cache::builder()
            .max_capacity(config.max_users)
            .time_to_idle(config.user_idle)
            .build();
        Self { profiles }
    }

    /// Record every top-level field of `parameters` as the user's current
    /// preference. Non-object payloads carry no named fields and are
    /// ignored.
    pub fn record(&self, user_id: &str, parameters: &Value) {
        let Value::Object(fields) = parameters else {
            return;
        };
        if fields.is_empty() {
            return;
        }
        let profile = self
            .profiles
            .get_with(user_id.to_string(), || Arc::new(Mutex::new(Map::new())));
        let Ok(mut profile) = profile.lock() else {
            warn!(user_id, "preference lock poisoned, update dropped");
            return;
        };
        for (name, value) in fields {
            profile.insert(name.clone(), value.clone());
        }
    }

    /// Overlay stored preferences onto `partial` without overwriting any
    /// field it already has. A non-object `partial` is returned unchanged.
    pub fn fill_defaults(&self, partial: &Value, user_id: &str) -> Value {
        let Value::Object(given) = partial else {
            return partial.clone();
        };
        let mut filled = given.clone();
        if let Some(stored) = self.profiles.get(user_id)
            && let Ok(prefs) = stored.lock()
        {
            for (name, value) in prefs.iter() {
                if !filled.contains_key(name) {
                    filled.insert(name.clone(), value.clone());
                }
            }
        }
        Value::Object(filled)
    }

    /// Copy of a user's preference profile.
    pub fn profile(&self, user_id: &str) -> Map<String, Value> {
        self.profiles
            .get(user_id)
            .and_then(|p| p.lock().ok().map(|p| p.clone()))
            .unwrap_or_default()
    }

    /// Drop a user's preferences.
    pub fn forget(&self, user_id: &str) {
        self.profiles.invalidate(user_id);
    }
}

impl std::fmt::Debug for PreferenceLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceLearner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn learner() -> PreferenceLearner {
        PreferenceLearner::new(&SimilarityConfig::default())
    }

    #[test]
    fn last_write_wins() {
        let p = learner();
        p.record("u", &json!({"style": "noir", "length": 10}));
        p.record("u", &json!({"style": "pastel"}));
        let profile = p.profile("u");
        assert_eq!(profile["style"], "pastel");
        assert_eq!(profile["length"], 10);
    }

    #[test]
    fn explicit_fields_are_kept() {
        let p = learner();
        p.record("u", &json!({"style": "noir", "length": 10}));
        let filled = p.fill_defaults(&json!({"style": "vivid", "prompt": "x"}), "u");
        assert_eq!(filled, json!({"style": "vivid", "prompt": "x", "length": 10}));
    }

    #[test]
    fn users_are_isolated() {
        let p = learner();
        p.record("alice", &json!({"style": "noir"}));
        assert_eq!(p.fill_defaults(&json!({}), "bob"), json!({}));
    }

    #[test]
    fn non_object_payload_passes_through() {
        let p = learner();
        p.record("u", &json!({"style": "noir"}));
        assert_eq!(p.fill_defaults(&json!("raw"), "u"), json!("raw"));
        p.record("u", &json!([1, 2]));
        assert_eq!(p.profile("u").len(), 1);
    }
}
