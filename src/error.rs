//! Huginn error types

use crate::store::Tier;

/// Huginn error types
///
/// Everything past `InvalidRequest` describes a fault the cache recovers
/// from on its own. The router never hands these to its caller; they are
/// surfaced by the lower-level store API so operators can see them.
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Request errors
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Store errors (recovered)
    #[error("non-positive TTL for key {key}, treated as expired")]
    InvalidTtl { key: String },

    #[error("{tier} over capacity after eviction, write dropped")]
    StoreCapacityExceeded { tier: Tier },

    #[error("store busy: {0}")]
    StoreBusy(&'static str),

    #[error("corrupt entry for key {key}: {reason}")]
    EntryCorrupt { key: String, reason: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HuginnError {
    /// Whether the fault is one the cache absorbs (log, treat as miss or
    /// dropped write) rather than one the caller must act on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HuginnError::InvalidTtl { .. }
                | HuginnError::StoreCapacityExceeded { .. }
                | HuginnError::StoreBusy(_)
                | HuginnError::EntryCorrupt { .. }
        )
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
