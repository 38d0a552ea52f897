//! Self-optimizing controller.
//!
//! Runs a periodic pass on a timer thread and a reactive pass triggered
//! whenever a frame switch blows past the configured latency budget.
//! Actions escalate from a cheap radius adjustment up through forced
//! eviction and, in the worst case, an emergency cleanup that also shrinks
//! the store's entry ceiling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::events::{Event, EventPublisher};
use crate::memory_monitor::{MemoryMonitor, PressureLevel};
use crate::pattern_analyzer::{PatternAnalyzer, PatternKind};
use crate::store::FrameStore;

const HISTORY_CAPACITY: usize = 100;
/// Entry count above which an emergency pass also shrinks the ceiling.
const EMERGENCY_SHRINK_THRESHOLD: usize = 80;
/// Fraction of the current entry count an emergency shrink targets.
const EMERGENCY_SHRINK_RATIO: f64 = 0.70;
/// Byte target (as a fraction of the byte limit) an emergency pass aims for.
const EMERGENCY_BYTE_TARGET_RATIO: f64 = 0.60;

/// Action taken by a single optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStrategy {
    /// No intervention was necessary.
    NoAction,
    /// Widened the preload radius because the access pattern is confidently
    /// sequential and hit rate has room to improve.
    IncreasePreloadRadius,
    /// Narrowed the preload radius because the pattern is random/hotspot and
    /// wide preloading is wasted work.
    DecreasePreloadRadius,
    /// Forced eviction down to a byte target without touching the entry
    /// ceiling.
    ForceEviction,
    /// Full emergency pass: forced eviction plus a lowered entry ceiling.
    EmergencyCleanup,
}

/// A sample of cache health taken immediately before or after a pass.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSample {
    /// Average `get` latency over the rolling performance ring.
    pub avg_get: Duration,
    /// Maximum `get` latency over the same window.
    pub max_get: Duration,
    /// Store hit rate at sample time.
    pub hit_rate: f64,
    /// Bytes resident at sample time.
    pub bytes_used: u64,
    /// Pressure level at sample time.
    pub level: PressureLevel,
}

/// One completed optimization pass, retained in a bounded history.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationRecord {
    /// When the pass ran.
    pub timestamp: Instant,
    /// Action taken.
    pub strategy: OptimizationStrategy,
    /// State immediately before the action.
    pub before: PerformanceSample,
    /// State immediately after the action.
    pub after: PerformanceSample,
    /// Whether this pass was triggered reactively rather than on schedule.
    pub reactive: bool,
}

/// Periodic + reactive optimization controller.
pub struct Optimizer {
    store: Arc<FrameStore>,
    monitor: Arc<MemoryMonitor>,
    analyzer: Arc<PatternAnalyzer>,
    publisher: Arc<dyn EventPublisher>,
    warn_latency: Duration,
    interval: Duration,
    current_radius: AtomicUsize,
    radius_base: usize,
    history: Mutex<VecDeque<OptimizationRecord>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Optimizer {
    /// Build an optimizer over the given collaborators. `radius_base` seeds
    /// the adjustable preload radius returned by [`Self::current_radius`].
    pub fn new(
        store: Arc<FrameStore>,
        monitor: Arc<MemoryMonitor>,
        analyzer: Arc<PatternAnalyzer>,
        publisher: Arc<dyn EventPublisher>,
        warn_latency: Duration,
        interval: Duration,
        radius_base: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            monitor,
            analyzer,
            publisher,
            warn_latency,
            interval,
            current_radius: AtomicUsize::new(radius_base),
            radius_base,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Start the periodic pass thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let optimizer = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(optimizer.interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                optimizer.run_pass(false);
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the periodic pass thread and block until it exits.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Record a frame switch's observed latency. If it exceeds the
    /// configured warning threshold, publishes a [`Event::PerformanceWarning`]
    /// and runs an emergency pass synchronously on the calling thread — this
    /// is only ever called after a frame has already been returned to the
    /// caller, so it never sits on `get`'s hot path.
    pub fn record_frame_switch_time(&self, switch_ms: f64) {
        if switch_ms > self.warn_latency.as_secs_f64() * 1000.0 {
            self.publisher.publish(Event::PerformanceWarning {
                metric: "frame_switch_time_ms".into(),
                value: switch_ms,
                threshold: self.warn_latency.as_secs_f64() * 1000.0,
            });
            self.run_pass(true);
        }
    }

    /// Currently recommended preload radius, adjustable by optimization
    /// passes and read by whatever builds preload target lists.
    pub fn current_radius(&self) -> usize {
        self.current_radius.load(Ordering::Relaxed)
    }

    fn sample(&self) -> PerformanceSample {
        let (avg_get, max_get, _) = self.store.perf_summary();
        PerformanceSample {
            avg_get,
            max_get,
            hit_rate: self.store.hit_rate(),
            bytes_used: self.store.bytes_used(),
            level: self.monitor.current_level(),
        }
    }

    /// Run one optimization pass, reactive or periodic.
    pub fn run_pass(&self, reactive: bool) -> OptimizationRecord {
        let before = self.sample();

        let strategy = if matches!(before.level, PressureLevel::Critical | PressureLevel::Emergency) {
            self.emergency_cleanup()
        } else if before.bytes_used as f64
            > self.store.byte_limit() as f64 * EMERGENCY_BYTE_TARGET_RATIO
            && reactive
        {
            self.force_eviction()
        } else {
            self.adjust_radius()
        };

        let after = self.sample();
        let record = OptimizationRecord {
            timestamp: Instant::now(),
            strategy,
            before,
            after,
            reactive,
        };

        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);

        info!(?strategy, reactive, "optimization pass complete");
        record
    }

    fn adjust_radius(&self) -> OptimizationStrategy {
        let verdict = self.analyzer.analyze();
        match verdict.kind {
            PatternKind::Sequential if verdict.confidence >= 0.8 => {
                let widened = (self.current_radius() as f64 * 1.2).ceil() as usize;
                self.current_radius.store(widened.max(self.radius_base), Ordering::Relaxed);
                OptimizationStrategy::IncreasePreloadRadius
            }
            PatternKind::Random | PatternKind::Hotspot => {
                let narrowed = (self.current_radius() as f64 * 0.7).floor() as usize;
                self.current_radius.store(narrowed.max(1), Ordering::Relaxed);
                OptimizationStrategy::DecreasePreloadRadius
            }
            _ => OptimizationStrategy::NoAction,
        }
    }

    fn force_eviction(&self) -> OptimizationStrategy {
        let target = (self.store.byte_limit() as f64 * EMERGENCY_BYTE_TARGET_RATIO) as u64;
        self.store.evict_until(target);
        OptimizationStrategy::ForceEviction
    }

    fn emergency_cleanup(&self) -> OptimizationStrategy {
        warn!("running emergency cache cleanup");
        let byte_target = (self.store.byte_limit() as f64 * EMERGENCY_BYTE_TARGET_RATIO) as u64;
        self.monitor.force_cleanup(byte_target);

        let current_entries = self.store.size();
        if current_entries > EMERGENCY_SHRINK_THRESHOLD {
            let new_max = ((current_entries as f64) * EMERGENCY_SHRINK_RATIO) as usize;
            self.store.set_max_entries(new_max.max(1));
        }
        OptimizationStrategy::EmergencyCleanup
    }

    /// Snapshot of the retained pass history, oldest first.
    pub fn history(&self) -> Vec<OptimizationRecord> {
        self.history.lock().iter().copied().collect()
    }

    /// Plain-language recommendations derived from the most recent pass and
    /// current store/monitor state. Supplementary to the numeric history —
    /// meant for surfacing in diagnostics output.
    pub fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        let level = self.monitor.current_level();
        if matches!(level, PressureLevel::Warning | PressureLevel::Critical | PressureLevel::Emergency) {
            out.push(format!("memory pressure is {level:?}; consider raising byte_limit or lowering max_entries"));
        }
        let hit_rate = self.store.hit_rate();
        if hit_rate < 0.5 {
            out.push(format!("hit rate is {:.1}%; preload radius may be too narrow for the current access pattern", hit_rate * 100.0));
        }
        let (avg_get, _, samples) = self.store.perf_summary();
        if samples > 0 && avg_get > self.warn_latency {
            out.push(format!("average get latency {avg_get:?} exceeds the {:?} warning threshold", self.warn_latency));
        }
        if out.is_empty() {
            out.push("no optimization recommendations at this time".into());
        }
        out
    }
}

impl Drop for Optimizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventPublisher;

    fn optimizer() -> (Arc<Optimizer>, Arc<FrameStore>) {
        let store = Arc::new(FrameStore::new(100, 20 * 1024 * 1024));
        let monitor = MemoryMonitor::new(Arc::clone(&store), Duration::from_millis(10), 10, 5);
        let analyzer = Arc::new(PatternAnalyzer::new(1000, 30, 25, Duration::from_millis(10_000)));
        let publisher: Arc<dyn EventPublisher> = Arc::new(NullEventPublisher);
        let optimizer = Optimizer::new(
            store.clone(),
            monitor,
            analyzer,
            publisher,
            Duration::from_millis(45),
            Duration::from_secs(30),
            25,
        );
        (optimizer, store)
    }

    #[test]
    fn no_action_when_healthy() {
        let (optimizer, _store) = optimizer();
        let record = optimizer.run_pass(false);
        assert_eq!(record.strategy, OptimizationStrategy::NoAction);
    }

    #[test]
    fn sequential_pattern_widens_radius() {
        let (optimizer, _store) = optimizer();
        for i in 1..=10 {
            optimizer.analyzer.record_access(&format!("{:06}", i));
        }
        let before_radius = optimizer.current_radius();
        let record = optimizer.run_pass(false);
        assert_eq!(record.strategy, OptimizationStrategy::IncreasePreloadRadius);
        assert!(optimizer.current_radius() > before_radius);
    }

    #[test]
    fn critical_pressure_triggers_emergency_cleanup() {
        let (optimizer, store) = optimizer();
        for i in 0..100 {
            store.put(&format!("f{i}"), crate::loader::FrameBuffer::new(vec![0u8; 200 * 1024])).unwrap();
        }
        optimizer.monitor.sample_once();
        let record = optimizer.run_pass(false);
        assert_eq!(record.strategy, OptimizationStrategy::EmergencyCleanup);
    }

    #[test]
    fn reactive_switch_time_runs_a_pass_and_publishes_warning() {
        let (optimizer, _store) = optimizer();
        optimizer.record_frame_switch_time(60.0);
        assert_eq!(optimizer.history().len(), 1);
        assert!(optimizer.history()[0].reactive);
    }

    #[test]
    fn history_is_bounded() {
        let (optimizer, _store) = optimizer();
        for _ in 0..(HISTORY_CAPACITY + 20) {
            optimizer.run_pass(false);
        }
        assert_eq!(optimizer.history().len(), HISTORY_CAPACITY);
    }

    #[test]
    fn recommendations_never_empty() {
        let (optimizer, _store) = optimizer();
        assert!(!optimizer.recommendations().is_empty());
    }
}
