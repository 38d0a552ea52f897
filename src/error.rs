//! Error types for the frame cache core.
//!
//! Only failures that are meaningful to a caller of the public API live here.
//! `get`'s propagation policy is deliberately stricter than ordinary Rust
//! `Result` plumbing: a loader failure, a blown deadline, or a call arriving
//! after shutdown all collapse into [`crate::agent::GetOutcome::Miss`] rather
//! than an `Err` — the only observable outcomes of `get` are a frame or a
//! miss within the deadline. Those conditions are logged and counted (see
//! `agent.rs`) instead of appearing in this enum. Memory pressure overshoot
//! never escapes the crate either — it only drives internal forced eviction
//! and is reported through [`crate::events::Event::MemoryWarning`].
//!
//! What remains here are the failures of operations that *do* return a
//! `Result` to their caller: `FrameStore::put` and `CacheConfig::validate`
//! (and therefore `CacheAgent::new`).

use thiserror::Error;

/// Errors returned by the frame cache's public operations.
#[derive(Debug, Error)]
pub enum FrameCacheError {
    /// The payload is larger than the configured byte limit. Rejected at
    /// `put`, never partially applied.
    #[error("payload of {size} bytes exceeds byte limit of {limit} bytes")]
    OversizedFrame {
        /// Size of the rejected payload, in bytes.
        size: u64,
        /// Configured byte ceiling.
        limit: u64,
    },

    /// The payload was empty.
    #[error("payload is empty")]
    InvalidPayload,

    /// The supplied configuration is internally inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type FrameCacheResult<T> = Result<T, FrameCacheError>;
