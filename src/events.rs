//! Observable state transitions published by the cache.
//!
//! Events are best-effort: the agent never waits on delivery for
//! correctness, and a full channel simply drops the event rather than
//! blocking the hot path.

use crate::memory_monitor::PressureLevel;

/// A single observable event emitted by the cache's collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A `get` resolved against the store without invoking the loader.
    CacheHit {
        /// Frame identifier that was hit.
        frame_id: String,
        /// Time spent servicing the hit, in milliseconds.
        access_ms: f64,
    },
    /// A `get` missed the store and fell through to the external loader.
    CacheMiss {
        /// Frame identifier that missed.
        frame_id: String,
        /// Time spent loading the frame, in milliseconds.
        load_ms: f64,
    },
    /// The current frame changed.
    FrameChanged {
        /// Newly current frame identifier.
        current_id: String,
        /// Previously current frame identifier.
        previous_id: String,
        /// Time spent switching, in milliseconds.
        switch_ms: f64,
    },
    /// The memory monitor's pressure level changed.
    MemoryWarning {
        /// Bytes currently resident in the store.
        used_bytes: u64,
        /// Configured byte ceiling.
        limit_bytes: u64,
        /// Newly entered pressure level.
        level: PressureLevel,
    },
    /// A reactive or periodic latency regression was observed.
    PerformanceWarning {
        /// Name of the metric that triggered the warning.
        metric: String,
        /// Observed value.
        value: f64,
        /// Configured threshold that was exceeded.
        threshold: f64,
    },
}

/// Outbound capability for publishing cache events. Implementations must be
/// non-blocking, or provide best-effort delivery with a ≤1ms ceiling — the
/// agent never waits on delivery for correctness.
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Must not block the caller meaningfully.
    fn publish(&self, event: Event);
}

/// Discards every event. Useful for tests and benchmarks where telemetry is
/// not observed.
#[derive(Debug, Default)]
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
    fn publish(&self, _event: Event) {}
}

/// Publishes events onto a bounded channel using `try_send`, so a full
/// channel drops the event instead of blocking the publisher.
pub struct ChannelEventPublisher {
    sender: crossbeam::channel::Sender<Event>,
}

impl ChannelEventPublisher {
    /// Create a new publisher and its paired receiver, bounded at `capacity`.
    pub fn new(capacity: usize) -> (Self, crossbeam::channel::Receiver<Event>) {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: Event) {
        // Best-effort: a full queue means a slow consumer, and we never let
        // that back-pressure the cache's hot path.
        let _ = self.sender.try_send(event);
    }
}
