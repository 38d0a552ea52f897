//! Cache configuration.
//!
//! A plain struct with a hand-written `Default`, `serde`-(de)serializable so
//! embedding applications can load it from whatever format they prefer. The
//! crate never reads configuration from disk itself.

use serde::{Deserialize, Serialize};

use crate::error::{FrameCacheError, FrameCacheResult};

/// Tunable parameters for a [`crate::agent::CacheAgent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of resident entries. Exceeding this triggers eviction.
    pub max_entries: usize,
    /// Byte ceiling for the store. See the pressure ladder in
    /// [`crate::memory_monitor::PressureLevel`].
    pub byte_limit: u64,
    /// Baseline preload radius used by the pattern analyzer.
    pub preload_radius_base: usize,
    /// Number of preloader worker threads.
    pub preload_workers: usize,
    /// Bound on the preloader's pending-task queue.
    pub preload_queue_capacity: usize,
    /// Memory monitor sampling interval.
    pub monitor_interval_ms: u64,
    /// Optimizer periodic pass interval.
    pub optimizer_interval_ms: u64,
    /// Hard latency budget for `get`.
    pub get_deadline_ms: u64,
    /// Reactive-optimization trigger threshold.
    pub warn_latency_ms: u64,
    /// Capacity of the bounded access log ring.
    pub access_log_capacity: usize,
    /// Window size (sample count) used for memory trend regression.
    pub trend_window: usize,
    /// Heuristic seconds-per-frame-of-distance used to estimate a preload
    /// task's expected access time. A tunable, not a guaranteed contract.
    pub preload_eta_factor_secs: f64,
    /// TTL for a cached pattern verdict before it is recomputed.
    pub pattern_verdict_ttl_ms: u64,
    /// Window (in accesses) the pattern analyzer scores over.
    pub pattern_window: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            byte_limit: 20 * 1024 * 1024 * 1024,
            preload_radius_base: 25,
            preload_workers: 3,
            preload_queue_capacity: 1024,
            monitor_interval_ms: 1000,
            optimizer_interval_ms: 30_000,
            get_deadline_ms: 50,
            warn_latency_ms: 45,
            access_log_capacity: 1000,
            trend_window: 60,
            preload_eta_factor_secs: 0.1,
            pattern_verdict_ttl_ms: 10_000,
            pattern_window: 30,
        }
    }
}

impl CacheConfig {
    /// Validate internal consistency. Called by [`crate::agent::CacheAgent::new`].
    pub fn validate(&self) -> FrameCacheResult<()> {
        if self.max_entries == 0 {
            return Err(FrameCacheError::InvalidConfig(
                "max_entries must be greater than zero".into(),
            ));
        }
        if self.byte_limit == 0 {
            return Err(FrameCacheError::InvalidConfig(
                "byte_limit must be greater than zero".into(),
            ));
        }
        if self.preload_workers == 0 {
            return Err(FrameCacheError::InvalidConfig(
                "preload_workers must be greater than zero".into(),
            ));
        }
        if self.warn_latency_ms >= self.get_deadline_ms {
            return Err(FrameCacheError::InvalidConfig(
                "warn_latency_ms must be less than get_deadline_ms".into(),
            ));
        }
        Ok(())
    }
}
