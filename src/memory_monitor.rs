//! Background memory pressure monitoring.
//!
//! Samples the store's byte usage on a timer thread, classifies it against a
//! five-level pressure ladder, fires registered callbacks exactly once per
//! transition, and forces eviction once pressure crosses into `Critical`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::store::FrameStore;

/// Fraction of `byte_limit` at which each level begins.
const CAUTION_RATIO: f64 = 0.75;
const WARNING_RATIO: f64 = 0.90;
const CRITICAL_RATIO: f64 = 0.95;
const EMERGENCY_RATIO: f64 = 1.0;

/// Target occupancy (as a fraction of `byte_limit`) forced eviction aims for
/// once pressure crosses into `Critical` or `Emergency`.
const CRITICAL_EVICTION_TARGET_RATIO: f64 = 0.85;
const EMERGENCY_EVICTION_TARGET_RATIO: f64 = 0.75;

/// Memory pressure ladder, a pure function of `bytes_used / byte_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureLevel {
    /// Below 75% of the byte limit.
    Normal,
    /// 75% up to 90%.
    Caution,
    /// 90% up to 95%.
    Warning,
    /// 95% up to 100%.
    Critical,
    /// At or above the byte limit.
    Emergency,
}

impl PressureLevel {
    /// Classify a usage ratio against the pressure ladder.
    pub fn from_usage(bytes_used: u64, byte_limit: u64) -> Self {
        if byte_limit == 0 {
            return PressureLevel::Emergency;
        }
        let ratio = bytes_used as f64 / byte_limit as f64;
        if ratio >= EMERGENCY_RATIO {
            PressureLevel::Emergency
        } else if ratio >= CRITICAL_RATIO {
            PressureLevel::Critical
        } else if ratio >= WARNING_RATIO {
            PressureLevel::Warning
        } else if ratio >= CAUTION_RATIO {
            PressureLevel::Caution
        } else {
            PressureLevel::Normal
        }
    }
}

/// A single point-in-time reading of store occupancy.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    /// When the sample was taken.
    pub timestamp: Instant,
    /// Bytes resident in the store at sample time.
    pub bytes_used: u64,
    /// Pressure level implied by that usage.
    pub level: PressureLevel,
}

/// Linear-regression projection of future memory usage.
#[derive(Debug, Clone, Copy)]
pub struct TrendPrediction {
    /// Estimated rate of change, in bytes per second. Positive means usage
    /// is growing.
    pub bytes_per_second: f64,
    /// Confidence in `[0, 1]`, scaled by how many samples fed the fit
    /// relative to the configured trend window.
    pub confidence: f64,
}

struct MonitorState {
    history: VecDeque<MemorySnapshot>,
    current_level: PressureLevel,
}

/// Background thread that samples [`FrameStore`] occupancy and reacts to
/// pressure transitions.
pub struct MemoryMonitor {
    store: Arc<FrameStore>,
    state: Mutex<MonitorState>,
    interval: Duration,
    history_capacity: usize,
    trend_window: usize,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMonitor {
    /// Build a monitor over `store`. `history_capacity` bounds the retained
    /// snapshot history (roughly an hour's worth at the configured
    /// interval); `trend_window` is the sample count `predict_trend` uses to
    /// scale its confidence.
    pub fn new(
        store: Arc<FrameStore>,
        interval: Duration,
        history_capacity: usize,
        trend_window: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            state: Mutex::new(MonitorState {
                history: VecDeque::with_capacity(history_capacity),
                current_level: PressureLevel::Normal,
            }),
            interval,
            history_capacity,
            trend_window,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Start the background sampling thread. Idempotent: calling `start`
    /// while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                monitor.sample_once();
                std::thread::sleep(monitor.interval);
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the background thread and block until it exits.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Take one sample immediately, update history, and act on any pressure
    /// transition. Exposed so the optimizer can force a synchronous check.
    pub fn sample_once(&self) {
        let bytes_used = self.store.bytes_used();
        let byte_limit = self.store.byte_limit();
        let level = PressureLevel::from_usage(bytes_used, byte_limit);

        let transitioned = {
            let mut state = self.state.lock();
            if state.history.len() == self.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(MemorySnapshot {
                timestamp: Instant::now(),
                bytes_used,
                level,
            });
            let transitioned = level != state.current_level;
            state.current_level = level;
            transitioned
        };

        if transitioned {
            debug!(?level, bytes_used, byte_limit, "memory pressure transition");
            self.store.fire_pressure_callbacks(level);
        }

        match level {
            PressureLevel::Critical => {
                warn!(bytes_used, byte_limit, "critical memory pressure, forcing eviction");
                let target = (byte_limit as f64 * CRITICAL_EVICTION_TARGET_RATIO) as u64;
                self.store.evict_until(target);
            }
            PressureLevel::Emergency => {
                warn!(bytes_used, byte_limit, "emergency memory pressure, forcing eviction");
                let target = (byte_limit as f64 * EMERGENCY_EVICTION_TARGET_RATIO) as u64;
                self.store.evict_until(target);
            }
            _ => {}
        }
    }

    /// Current pressure level as of the last sample.
    pub fn current_level(&self) -> PressureLevel {
        self.state.lock().current_level
    }

    /// Snapshot of the retained sampling history, oldest first.
    pub fn history(&self) -> Vec<MemorySnapshot> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Force an immediate eviction pass down to `target_bytes`, regardless
    /// of current pressure level. Used by the optimizer's emergency path.
    pub fn force_cleanup(&self, target_bytes: u64) {
        info!(target_bytes, "forced memory cleanup requested");
        self.store.evict_until(target_bytes);
        self.sample_once();
    }

    /// Fit a line over the most recent `trend_window` (or fewer, if history
    /// is shorter) samples and project the rate of change. Returns `None`
    /// with fewer than two samples.
    pub fn predict_trend(&self) -> Option<TrendPrediction> {
        let state = self.state.lock();
        let window: Vec<&MemorySnapshot> = state
            .history
            .iter()
            .rev()
            .take(self.trend_window)
            .collect();
        if window.len() < 2 {
            return None;
        }
        let first_ts = window.last().unwrap().timestamp;
        let points: Vec<(f64, f64)> = window
            .iter()
            .rev()
            .map(|s| {
                (
                    s.timestamp.duration_since(first_ts).as_secs_f64(),
                    s.bytes_used as f64,
                )
            })
            .collect();

        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (x, y) in &points {
            numerator += (x - mean_x) * (y - mean_y);
            denominator += (x - mean_x) * (x - mean_x);
        }
        let slope = if denominator.abs() < f64::EPSILON {
            0.0
        } else {
            numerator / denominator
        };
        let confidence = (points.len() as f64 / self.trend_window as f64).min(1.0);

        Some(TrendPrediction {
            bytes_per_second: slope,
            confidence,
        })
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
