//! Memory-bounded, latency-critical frame cache core.
//!
//! Built around five collaborating components: a byte- and count-bounded
//! LRU [`store`], a background [`memory_monitor`] that classifies pressure
//! and forces eviction under load, a [`pattern_analyzer`] that classifies
//! recent access behavior, a worker-pooled [`preloader`], and a
//! self-tuning [`optimizer`]. [`agent::CacheAgent`] wires all five behind a
//! single, synchronous `get`/`preload`/`stats` facade with a hard latency
//! budget on the hot path.
//!
//! No part of this crate reaches for process-global state: every
//! collaborator is constructed explicitly and owned by the agent that
//! wires it together, so multiple independent agents can coexist in one
//! process without contending on anything.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod memory_monitor;
pub mod optimizer;
pub mod pattern_analyzer;
pub mod preloader;
pub mod store;

pub use agent::{create_cache_agent, CacheAgent, CacheStatistics, GetOutcome};
pub use config::CacheConfig;
pub use error::{FrameCacheError, FrameCacheResult};
pub use events::{ChannelEventPublisher, Event, EventPublisher, NullEventPublisher};
pub use loader::{FrameBuffer, FrameLoader, SimulatedLoader};
pub use memory_monitor::{MemoryMonitor, MemorySnapshot, PressureLevel, TrendPrediction};
pub use optimizer::{OptimizationRecord, OptimizationStrategy, Optimizer, PerformanceSample};
pub use pattern_analyzer::{PatternAnalyzer, PatternKind, PatternVerdict};
pub use preloader::{PreloadPriority, Preloader, PreloaderStats};
pub use store::{FrameStore, PerfSample, SampleOutcome};
