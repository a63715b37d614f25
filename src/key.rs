//! Cache key derivation.
//!
//! A [`CacheKey`] is `"{namespace}:{digest}"`, where the digest is the
//! hex SHA-256 of the namespace, the optional user scope and the
//! canonicalized parameter object. Canonical form sorts object fields at
//! every depth, so two payloads that differ only in field order produce
//! the same key. Array order is significant and is kept.
//!
//! Unlike `DefaultHasher`, SHA-256 is stable across processes and builds,
//! so keys can be logged, compared between runs and used for
//! [`invalidate`](crate::TieredStore::invalidate) patterns.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{HuginnError, Result};

/// Deepest object/array nesting accepted before a payload is rejected.
///
/// `serde_json::Value` cannot hold a cycle, so runaway nesting is the
/// closest thing to a circular payload this layer can see.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Hex length of the digest part of every key.
pub const DIGEST_LEN: usize = 64;

/// Deterministic fingerprint of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace prefix.
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once(':').map(|(ns, _)| ns).unwrap_or("")
    }

    /// The fixed-length hex digest.
    pub fn digest(&self) -> &str {
        self.0.rsplit_once(':').map(|(_, d)| d).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Turns `(namespace, parameters, user scope)` into a [`CacheKey`].
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    max_depth: usize,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDeriver {
    /// Create a deriver with the default nesting limit.
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set the nesting limit.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Derive a key from any serializable parameter payload.
    ///
    /// Fails with [`HuginnError::InvalidRequest`] when the payload cannot
    /// be serialized (e.g. a map with non-string keys), is not an object,
    /// or nests deeper than the configured limit. Callers should skip
    /// caching for that request and let it proceed uncached.
    pub fn derive<P: Serialize + ?Sized>(
        &self,
        namespace: &str,
        parameters: &P,
        user_scope: Option<&str>,
    ) -> Result<CacheKey> {
        let value = serde_json::to_value(parameters).map_err(|e| {
            HuginnError::InvalidRequest(format!("parameters are not serializable: {e}"))
        })?;
        self.derive_value(namespace, &value, user_scope)
    }

    /// Derive a key from an already-built JSON payload.
    pub fn derive_value(
        &self,
        namespace: &str,
        parameters: &Value,
        user_scope: Option<&str>,
    ) -> Result<CacheKey> {
        if namespace.is_empty() {
            return Err(HuginnError::InvalidRequest("empty namespace".into()));
        }
        if !parameters.is_object() {
            return Err(HuginnError::InvalidRequest(
                "parameters must be a JSON object".into(),
            ));
        }
        let canonical = canonicalize(parameters, 0, self.max_depth)?;
        let body = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        update_framed(&mut hasher, namespace.as_bytes());
        match user_scope {
            Some(scope) => {
                hasher.update([1u8]);
                update_framed(&mut hasher, scope.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        update_framed(&mut hasher, &body);

        Ok(CacheKey(format!(
            "{namespace}:{}",
            hex::encode(hasher.finalize())
        )))
    }
}

/// Length-prefix each field so `("ab", "c")` and `("a", "bc")` differ.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Rebuild `value` with object fields inserted in sorted order.
///
/// Sorting explicitly keeps keys stable even if another crate in the
/// build turns on `serde_json/preserve_order`.
fn canonicalize(value: &Value, depth: usize, max_depth: usize) -> Result<Value> {
    if depth > max_depth {
        return Err(HuginnError::InvalidRequest(format!(
            "parameters nest deeper than {max_depth} levels"
        )));
    }
    Ok(match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(fields.len());
            for (k, v) in fields {
                sorted.insert(k.clone(), canonicalize(v, depth + 1, max_depth)?);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| canonicalize(v, depth + 1, max_depth))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_deterministic() {
        let d = KeyDeriver::new();
        let p = json!({"prompt": "sunset", "style": "noir"});
        let k1 = d.derive_value("video", &p, None).unwrap();
        let k2 = d.derive_value("video", &p, None).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn key_has_namespace_and_fixed_digest() {
        let key = KeyDeriver::new()
            .derive_value("video", &json!({"a": 1}), None)
            .unwrap();
        assert_eq!(key.namespace(), "video");
        assert_eq!(key.digest().len(), DIGEST_LEN);
        assert!(key.as_str().starts_with("video:"));
    }

    #[test]
    fn nested_field_order_is_ignored() {
        let d = KeyDeriver::new();
        let a = json!({"outer": {"x": 1, "y": [1, {"b": 2, "a": 1}]}, "z": true});
        let b = json!({"z": true, "outer": {"y": [1, {"a": 1, "b": 2}], "x": 1}});
        assert_eq!(
            d.derive_value("ns", &a, None).unwrap(),
            d.derive_value("ns", &b, None).unwrap()
        );
    }

    #[test]
    fn array_order_matters() {
        let d = KeyDeriver::new();
        let a = d.derive_value("ns", &json!({"tags": [1, 2]}), None).unwrap();
        let b = d.derive_value("ns", &json!({"tags": [2, 1]}), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn scope_none_differs_from_empty_scope() {
        let d = KeyDeriver::new();
        let p = json!({"a": 1});
        assert_ne!(
            d.derive_value("ns", &p, None).unwrap(),
            d.derive_value("ns", &p, Some("")).unwrap()
        );
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let d = KeyDeriver::new().max_depth(2);
        // the innermost scalar sits at depth 2 in `ok`, depth 3 in `too_deep`
        let ok = json!({"a": {"b": 1}});
        let too_deep = json!({"a": {"b": {"c": 1}}});
        assert!(d.derive_value("ns", &ok, None).is_ok());
        assert!(matches!(
            d.derive_value("ns", &too_deep, None),
            Err(HuginnError::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_namespace_rejected() {
        let err = KeyDeriver::new()
            .derive_value("", &json!({}), None)
            .unwrap_err();
        assert!(matches!(err, HuginnError::InvalidRequest(_)));
    }
}
