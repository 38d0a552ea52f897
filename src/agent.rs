//! Public facade wiring the store, monitor, analyzer, preloader, and
//! optimizer into a single cache.
//!
//! [`CacheAgent`] is the only type most callers need. It owns no global
//! state: every collaborator is constructed and wired explicitly here, and
//! two agents in the same process never share so much as a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::config::CacheConfig;
use crate::error::FrameCacheResult;
use crate::events::{Event, EventPublisher, NullEventPublisher};
use crate::loader::{FrameBuffer, FrameLoader};
use crate::memory_monitor::{MemoryMonitor, PressureLevel};
use crate::optimizer::{OptimizationRecord, Optimizer};
use crate::pattern_analyzer::{leading_numeric_run, with_numeric_run, PatternAnalyzer, PatternKind};
use crate::preloader::Preloader;
use crate::store::FrameStore;
use parking_lot::Mutex;

/// Outcome of a single [`CacheAgent::get`] call.
///
/// `get` never propagates an error: a loader failure, a blown deadline, or a
/// call made after shutdown all collapse into `Miss` here rather than
/// surfacing as `Err`. Those conditions are still logged and counted
/// internally (see [`CacheAgent::get`]); from the caller's perspective the
/// only observable outcomes are "frame" (`Hit`/`Loaded`) or "miss within the
/// deadline" (`Miss`).
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    /// Resolved from the store without invoking the loader.
    Hit(FrameBuffer),
    /// The store missed, but the loader resolved it within the deadline.
    Loaded(FrameBuffer),
    /// No frame was obtained: the store missed and the loader failed,
    /// exceeded its deadline, or the agent had already begun shutdown.
    Miss,
}

impl GetOutcome {
    /// The resolved frame, if any.
    pub fn into_frame(self) -> Option<FrameBuffer> {
        match self {
            GetOutcome::Hit(f) | GetOutcome::Loaded(f) => Some(f),
            GetOutcome::Miss => None,
        }
    }

    /// Whether this outcome carries a frame.
    pub fn is_frame(&self) -> bool {
        !matches!(self, GetOutcome::Miss)
    }
}

/// Aggregated statistics across every component, for dashboards and tests.
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    /// Resident entry count.
    pub entries: usize,
    /// Resident byte count.
    pub bytes_used: u64,
    /// Configured byte ceiling.
    pub byte_limit: u64,
    /// `hits / (hits + misses)`.
    pub hit_rate: f64,
    /// Current memory pressure level.
    pub pressure_level: PressureLevel,
    /// Currently recommended preload radius.
    pub preload_radius: usize,
    /// Preloader queue/worker counters.
    pub preloader: crate::preloader::PreloaderStats,
    /// Number of optimization passes retained in history.
    pub optimization_passes: usize,
}

struct Collaborators {
    store: Arc<FrameStore>,
    monitor: Arc<MemoryMonitor>,
    analyzer: Arc<PatternAnalyzer>,
    preloader: Arc<Preloader>,
    optimizer: Arc<Optimizer>,
    loader: Arc<dyn FrameLoader>,
    publisher: Arc<dyn EventPublisher>,
}

/// The frame cache's public entry point.
///
/// Scoped shutdown: dropping a `CacheAgent` stops every background thread.
/// Call [`CacheAgent::shutdown`] explicitly if you want to stop it before
/// the value goes out of scope (e.g. to flush metrics first); `shutdown` is
/// idempotent and `Drop` calls it again harmlessly.
///
/// Lock ordering, should a future change ever need to hold two of these at
/// once: `Store` → `Preloader` → `Monitor` → `Optimizer`.
pub struct CacheAgent {
    inner: Collaborators,
    config: CacheConfig,
    current_frame: Mutex<Option<String>>,
    shutdown: AtomicBool,
}

impl CacheAgent {
    /// Build a cache agent with the given configuration and frame loader.
    /// Events are discarded; use [`Self::with_event_publisher`] to observe
    /// them.
    pub fn new(config: CacheConfig, loader: Arc<dyn FrameLoader>) -> FrameCacheResult<Self> {
        Self::with_event_publisher(config, loader, Arc::new(NullEventPublisher))
    }

    /// Build a cache agent publishing events through `publisher`.
    pub fn with_event_publisher(
        config: CacheConfig,
        loader: Arc<dyn FrameLoader>,
        publisher: Arc<dyn EventPublisher>,
    ) -> FrameCacheResult<Self> {
        config.validate()?;

        let store = Arc::new(FrameStore::new(config.max_entries, config.byte_limit));

        let monitor_history_capacity = (3_600_000 / config.monitor_interval_ms.max(1))
            .clamp(2, 10_000) as usize;
        let monitor = MemoryMonitor::new(
            Arc::clone(&store),
            Duration::from_millis(config.monitor_interval_ms),
            monitor_history_capacity,
            config.trend_window,
        );

        let analyzer = Arc::new(PatternAnalyzer::new(
            config.access_log_capacity,
            config.pattern_window,
            config.preload_radius_base,
            Duration::from_millis(config.pattern_verdict_ttl_ms),
        ));

        let preloader = Arc::new(Preloader::with_eta_factor(
            config.preload_workers,
            config.preload_queue_capacity,
            Arc::clone(&loader),
            Arc::clone(&store),
            config.preload_eta_factor_secs,
        ));

        let optimizer = Optimizer::new(
            Arc::clone(&store),
            Arc::clone(&monitor),
            Arc::clone(&analyzer),
            Arc::clone(&publisher),
            Duration::from_millis(config.warn_latency_ms),
            Duration::from_millis(config.optimizer_interval_ms),
            config.preload_radius_base,
        );

        for level in [
            PressureLevel::Normal,
            PressureLevel::Caution,
            PressureLevel::Warning,
            PressureLevel::Critical,
            PressureLevel::Emergency,
        ] {
            let store_for_callback = Arc::clone(&store);
            let publisher_for_callback = Arc::clone(&publisher);
            store.register_pressure_callback(
                level,
                Arc::new(move || {
                    publisher_for_callback.publish(Event::MemoryWarning {
                        used_bytes: store_for_callback.bytes_used(),
                        limit_bytes: store_for_callback.byte_limit(),
                        level,
                    });
                }),
            );
        }

        monitor.start();
        optimizer.start();

        Ok(Self {
            inner: Collaborators {
                store,
                monitor,
                analyzer,
                preloader,
                optimizer,
                loader,
                publisher,
            },
            config,
            current_frame: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Fetch a frame, hitting the store if resident or falling through to
    /// the configured loader within the `get_deadline_ms` budget.
    ///
    /// This never returns an error: a loader failure, a blown deadline, or a
    /// call made after shutdown all collapse into [`GetOutcome::Miss`].
    /// Those conditions are logged and counted, and surface to other
    /// observers only as telemetry (events, `stats()`).
    ///
    /// A loader invocation that does not complete within the deadline is
    /// abandoned: its helper thread keeps running to completion, but its
    /// result, whenever it arrives, is discarded rather than cached.
    pub fn get(&self, frame_id: &str) -> GetOutcome {
        if self.shutdown.load(Ordering::SeqCst) {
            warn!(frame_id, "get called after shutdown began");
            return GetOutcome::Miss;
        }

        let start = Instant::now();
        self.inner.analyzer.record_access(frame_id);

        if let Some(frame) = self.inner.store.get(frame_id) {
            self.inner.preloader.record_access(frame_id);
            let access_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.inner.publisher.publish(Event::CacheHit {
                frame_id: frame_id.to_string(),
                access_ms,
            });
            self.record_frame_switch(frame_id, start);
            self.trigger_preload(frame_id);
            return GetOutcome::Hit(frame);
        }

        let deadline = Duration::from_millis(self.config.get_deadline_ms);
        let remaining = deadline.saturating_sub(start.elapsed());

        let (tx, rx) = crossbeam::channel::bounded(1);
        let loader = Arc::clone(&self.inner.loader);
        let key = frame_id.to_string();
        std::thread::spawn(move || {
            let result = loader.load(&key);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(remaining) {
            Ok(Ok(frame)) => {
                if let Err(source) = self.inner.store.put(frame_id, frame.clone()) {
                    warn!(frame_id, %source, "loaded frame could not be inserted");
                    return GetOutcome::Miss;
                }
                let load_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.inner.publisher.publish(Event::CacheMiss {
                    frame_id: frame_id.to_string(),
                    load_ms,
                });
                self.record_frame_switch(frame_id, start);
                self.trigger_preload(frame_id);
                GetOutcome::Loaded(frame)
            }
            Ok(Err(source)) => {
                warn!(frame_id, %source, "loader failed, surfacing as miss");
                // A direct load failure likely means a preload in flight for
                // the same frame id will fail too; drop it rather than let
                // it retry the same doomed fetch.
                self.inner.preloader.cancel_obsolete(|pending_id| pending_id != frame_id);
                GetOutcome::Miss
            }
            Err(_timeout) => {
                error!(frame_id, budget_ms = self.config.get_deadline_ms, "get deadline exceeded, surfacing as miss");
                GetOutcome::Miss
            }
        }
    }

    fn record_frame_switch(&self, frame_id: &str, start: Instant) {
        let switch_ms = start.elapsed().as_secs_f64() * 1000.0;
        let previous = {
            let mut current = self.current_frame.lock();
            let previous = current.clone();
            *current = Some(frame_id.to_string());
            previous
        };
        if let Some(previous) = previous {
            if previous != frame_id {
                self.inner.publisher.publish(Event::FrameChanged {
                    current_id: frame_id.to_string(),
                    previous_id: previous,
                    switch_ms,
                });
            }
        }
        self.inner.optimizer.record_frame_switch_time(switch_ms);
    }

    /// Ask the preloader to warm frames around `frame_id` according to the
    /// current access pattern verdict and optimizer-tuned radius. Also
    /// cancels any outstanding preload tasks that have fallen outside the
    /// new radius.
    fn trigger_preload(&self, frame_id: &str) {
        let verdict = self.inner.analyzer.analyze();
        if verdict.kind == PatternKind::Insufficient {
            return;
        }
        let Some(center) = leading_numeric_run(frame_id) else {
            return;
        };
        let radius = self.inner.optimizer.current_radius().max(verdict.preload_radius).max(1);

        self.inner.preloader.cancel_obsolete(|pending_id| {
            leading_numeric_run(pending_id)
                .map(|value| (value - center).unsigned_abs() as usize <= radius)
                .unwrap_or(false)
        });

        let directions: &[i64] = match verdict.direction {
            1 => &[1],
            -1 => &[-1],
            _ => &[1, -1],
        };

        for &direction in directions {
            for step in 1..=radius {
                let value = center + direction * step as i64;
                if value < 0 {
                    continue;
                }
                if let Some(target_id) = with_numeric_run(frame_id, value) {
                    if target_id == frame_id {
                        continue;
                    }
                    let priority = 1.0 / (1.0 + step as f64);
                    self.inner
                        .preloader
                        .submit_with_distance(&target_id, priority, step as i64);
                }
            }
        }
    }

    /// Explicitly request preloading of specific frame ids at normal
    /// priority, bypassing pattern-based target derivation.
    pub fn preload(&self, frame_ids: impl IntoIterator<Item = impl Into<String>>) {
        for frame_id in frame_ids {
            let frame_id = frame_id.into();
            self.inner
                .preloader
                .submit(&frame_id, crate::preloader::PreloadPriority::Normal);
        }
    }

    /// Aggregated statistics across every component.
    pub fn stats(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.inner.store.size(),
            bytes_used: self.inner.store.bytes_used(),
            byte_limit: self.inner.store.byte_limit(),
            hit_rate: self.inner.store.hit_rate(),
            pressure_level: self.inner.monitor.current_level(),
            preload_radius: self.inner.optimizer.current_radius(),
            preloader: self.inner.preloader.stats(),
            optimization_passes: self.inner.optimizer.history().len(),
        }
    }

    /// Run an optimization pass immediately, rather than waiting for the
    /// next periodic tick.
    pub fn optimize(&self) -> OptimizationRecord {
        self.inner.optimizer.run_pass(false)
    }

    /// Plain-language optimization recommendations based on current state.
    pub fn recommendations(&self) -> Vec<String> {
        self.inner.optimizer.recommendations()
    }

    /// Memory usage trend, if enough samples have been collected.
    pub fn predict_memory_trend(&self) -> Option<crate::memory_monitor::TrendPrediction> {
        self.inner.monitor.predict_trend()
    }

    /// Empty the store and reset the current-frame tracker. Background
    /// threads keep running.
    pub fn clear(&self) {
        self.inner.store.clear();
        *self.current_frame.lock() = None;
    }

    /// Stop every background thread. Idempotent; safe to call more than
    /// once and safe to never call explicitly (`Drop` calls it too).
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.preloader.shutdown();
        self.inner.optimizer.stop();
        self.inner.monitor.stop();
    }
}

impl Drop for CacheAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Convenience factory mirroring the embedding application's typical
/// construction call.
pub fn create_cache_agent(
    config: CacheConfig,
    loader: Arc<dyn FrameLoader>,
) -> FrameCacheResult<CacheAgent> {
    CacheAgent::new(config, loader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SimulatedLoader;
    use std::time::Duration;

    fn agent_with(latency_ms: u64, deadline_ms: u64) -> CacheAgent {
        let mut config = CacheConfig::default();
        config.get_deadline_ms = deadline_ms;
        config.warn_latency_ms = deadline_ms.saturating_sub(1).max(1);
        config.max_entries = 50;
        config.byte_limit = 10 * 1024 * 1024;
        config.monitor_interval_ms = 50;
        config.optimizer_interval_ms = 10_000;
        let loader = Arc::new(SimulatedLoader::new(Duration::from_millis(latency_ms), 4096));
        CacheAgent::new(config, loader).unwrap()
    }

    #[test]
    fn miss_then_hit_round_trip() {
        let agent = agent_with(1, 50);
        let first = agent.get("000001");
        assert!(matches!(first, GetOutcome::Loaded(_)));
        let second = agent.get("000001");
        assert!(matches!(second, GetOutcome::Hit(_)));
    }

    #[test]
    fn slow_loader_trips_the_deadline_and_surfaces_as_miss() {
        let agent = agent_with(200, 20);
        let outcome = agent.get("000001");
        assert_eq!(outcome, GetOutcome::Miss);
    }

    #[test]
    fn failing_loader_surfaces_as_miss() {
        let mut config = CacheConfig::default();
        config.max_entries = 10;
        config.byte_limit = 1024 * 1024;
        let loader = Arc::new(SimulatedLoader::new(Duration::from_millis(1), 16).failing_every(1));
        let agent = CacheAgent::new(config, loader).unwrap();
        let outcome = agent.get("000001");
        assert_eq!(outcome, GetOutcome::Miss);
    }

    #[test]
    fn shutdown_then_get_is_a_miss_not_an_error() {
        let agent = agent_with(1, 50);
        agent.shutdown();
        let outcome = agent.get("000001");
        assert_eq!(outcome, GetOutcome::Miss);
    }

    #[test]
    fn sequential_access_triggers_preload() {
        let agent = agent_with(1, 50);
        for i in 1..=10u32 {
            agent.get(&format!("{:06}", i));
        }
        std::thread::sleep(Duration::from_millis(200));
        let stats = agent.stats();
        assert!(stats.preloader.completed > 0 || stats.preloader.active > 0 || stats.preloader.queued > 0);
    }

    #[test]
    fn explicit_preload_populates_store_eventually() {
        let agent = agent_with(1, 50);
        agent.preload(["000050", "000051"]);
        for _ in 0..200 {
            if agent.stats().entries >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(agent.stats().entries >= 2);
    }

    #[test]
    fn clear_empties_the_store() {
        let agent = agent_with(1, 50);
        agent.get("000001");
        agent.clear();
        assert_eq!(agent.stats().entries, 0);
    }
}
