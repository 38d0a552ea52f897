//! Priority-queued, worker-pooled frame preloading.
//!
//! A fixed pool of `std::thread` workers drains a bounded priority queue,
//! invoking the external loader and writing results directly into the
//! store. Submission is deduplicated (at most one outstanding task per
//! frame id across the queue and the active set) and every in-flight or
//! queued task can be cancelled without ever writing a stale frame back
//! into the store.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::loader::FrameLoader;
use crate::store::FrameStore;

/// Discrete priority levels a caller can request without hand-picking a
/// numeric score. Higher variants are serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreloadPriority {
    /// Background, opportunistic preload.
    Low,
    /// Typical sequential-playback preload.
    Normal,
    /// The pattern analyzer is confident this frame is imminent.
    High,
    /// The current frame itself, being re-primed after eviction.
    Critical,
}

impl PreloadPriority {
    /// Numeric score used internally by the priority queue.
    pub fn score(self) -> f64 {
        match self {
            PreloadPriority::Low => 1.0,
            PreloadPriority::Normal => 2.0,
            PreloadPriority::High => 3.0,
            PreloadPriority::Critical => 4.0,
        }
    }
}

struct QueuedTask {
    frame_id: String,
    priority: f64,
    enqueued_at: Instant,
    /// When this frame is predicted to actually be needed, per the
    /// `now + distance * eta_factor` heuristic (spec.md §9 Open Question,
    /// kept as a tunable rather than a contract). Breaks ties within the
    /// same priority: the queue drains in (priority desc, expected access
    /// time asc) order, per spec.md §4.4.
    expected_access_at: Instant,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.frame_id == other.frame_id && self.priority == other.priority
    }
}
impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| self.expected_access_at.cmp(&other.expected_access_at).reverse())
    }
}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Counters exposed by [`Preloader::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloaderStats {
    /// Tasks that completed and were written into the store.
    pub completed: u64,
    /// Tasks whose loader call returned an error.
    pub failed: u64,
    /// Tasks dropped on submission because the queue was full and they
    /// lost the backpressure comparison.
    pub dropped: u64,
    /// Tasks discarded after completion because they had been cancelled.
    pub cancelled: u64,
    /// Tasks currently queued.
    pub queued: usize,
    /// Tasks currently being executed by a worker.
    pub active: usize,
    /// Completed preloads that were subsequently hit before eviction —
    /// the preloader's effectiveness metric.
    pub hit_contributions: u64,
}

/// Bound on how many completed-but-not-yet-credited frame ids are
/// remembered for contribution attribution. Older completions age out
/// uncredited rather than grow this set unbounded.
const COMPLETED_CREDIT_WINDOW: usize = 256;

struct Shared {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    not_empty: Condvar,
    capacity: usize,
    pending: DashSet<String>,
    active: DashSet<String>,
    cancelled: DashSet<String>,
    completed_ids: DashSet<String>,
    completed_order: Mutex<VecDeque<String>>,
    running: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    cancelled_count: AtomicU64,
    hit_contributions: AtomicU64,
    loader: Arc<dyn FrameLoader>,
    store: Arc<FrameStore>,
    eta_factor_secs: f64,
}

impl Shared {
    /// Remember `frame_id` as eligible for a contribution credit the next
    /// time it's accessed, evicting the oldest remembered id once the
    /// window is full.
    fn note_completed(&self, frame_id: &str) {
        let mut order = self.completed_order.lock();
        if order.len() == COMPLETED_CREDIT_WINDOW {
            if let Some(oldest) = order.pop_front() {
                self.completed_ids.remove(&oldest);
            }
        }
        order.push_back(frame_id.to_string());
        self.completed_ids.insert(frame_id.to_string());
    }
}

impl Shared {
    fn push_with_backpressure(&self, task: QueuedTask) -> bool {
        let mut heap = self.queue.lock();
        if heap.len() < self.capacity {
            heap.push(task);
            return true;
        }
        let mut as_vec: Vec<QueuedTask> = std::mem::take(&mut *heap).into_vec();
        let min_idx = as_vec
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.priority.total_cmp(&b.1.priority))
            .map(|(i, _)| i);
        let inserted = match min_idx {
            Some(idx) if task.priority > as_vec[idx].priority => {
                as_vec[idx] = task;
                true
            }
            Some(_) => false,
            None => {
                as_vec.push(task);
                true
            }
        };
        *heap = BinaryHeap::from(as_vec);
        inserted
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut heap = shared.queue.lock();
            while heap.is_empty() && shared.running.load(AtomicOrdering::SeqCst) {
                shared.not_empty.wait(&mut heap);
            }
            if heap.is_empty() && !shared.running.load(AtomicOrdering::SeqCst) {
                return;
            }
            heap.pop()
        };

        let Some(task) = task else { continue };

        if shared.cancelled.remove(&task.frame_id).is_some() {
            shared.pending.remove(&task.frame_id);
            shared.cancelled_count.fetch_add(1, AtomicOrdering::Relaxed);
            continue;
        }

        shared.active.insert(task.frame_id.clone());
        trace!(
            frame_id = %task.frame_id,
            queue_wait_ms = task.enqueued_at.elapsed().as_secs_f64() * 1000.0,
            "preload worker picked up task"
        );
        let result = shared.loader.load(&task.frame_id);
        shared.active.remove(&task.frame_id);

        if shared.cancelled.remove(&task.frame_id).is_some() {
            shared.pending.remove(&task.frame_id);
            shared.cancelled_count.fetch_add(1, AtomicOrdering::Relaxed);
            trace!(frame_id = %task.frame_id, "discarding cancelled preload result");
            continue;
        }

        match result {
            Ok(frame) => {
                if shared.store.put(&task.frame_id, frame).is_ok() {
                    shared.completed.fetch_add(1, AtomicOrdering::Relaxed);
                    shared.note_completed(&task.frame_id);
                } else {
                    shared.failed.fetch_add(1, AtomicOrdering::Relaxed);
                }
            }
            Err(err) => {
                debug!(frame_id = %task.frame_id, error = %err, "preload failed");
                shared.failed.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        shared.pending.remove(&task.frame_id);
    }
}

/// Background preload engine backed by a fixed worker pool.
pub struct Preloader {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Preloader {
    /// Build a preloader with `worker_count` threads, a queue bounded at
    /// `queue_capacity`, writing results into `store` via `loader`. Workers
    /// are started immediately. Equivalent to
    /// [`Self::with_eta_factor`] with the spec's default `0.1` seconds of
    /// expected-access delay per unit of predicted distance.
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        loader: Arc<dyn FrameLoader>,
        store: Arc<FrameStore>,
    ) -> Self {
        Self::with_eta_factor(worker_count, queue_capacity, loader, store, 0.1)
    }

    /// Build a preloader whose expected-access-time heuristic scales
    /// `distance * eta_factor_secs` (see [`Self::submit_with_distance`]).
    pub fn with_eta_factor(
        worker_count: usize,
        queue_capacity: usize,
        loader: Arc<dyn FrameLoader>,
        store: Arc<FrameStore>,
        eta_factor_secs: f64,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            capacity: queue_capacity,
            pending: DashSet::new(),
            active: DashSet::new(),
            cancelled: DashSet::new(),
            completed_ids: DashSet::new(),
            completed_order: Mutex::new(VecDeque::with_capacity(COMPLETED_CREDIT_WINDOW)),
            running: AtomicBool::new(true),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            cancelled_count: AtomicU64::new(0),
            hit_contributions: AtomicU64::new(0),
            loader,
            store,
            eta_factor_secs,
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a single frame for preloading at the given priority, with no
    /// particular predicted distance (expected access time defaults to now).
    /// Deduplicated: a frame id already queued or in flight is a no-op.
    pub fn submit(&self, frame_id: &str, priority: PreloadPriority) {
        self.submit_scored(frame_id, priority.score());
    }

    /// Submit with a raw numeric priority (higher services sooner), for
    /// callers computing a continuous score rather than a discrete level.
    pub fn submit_scored(&self, frame_id: &str, priority: f64) {
        self.submit_with_distance(frame_id, priority, 0);
    }

    /// Submit with a raw numeric priority and a predicted distance (in
    /// frames) from the current position. The expected-access time used to
    /// break ties between same-priority tasks is `now + distance *
    /// eta_factor_secs` — an heuristic the spec documents as a tunable, not
    /// a contract (spec.md §9).
    pub fn submit_with_distance(&self, frame_id: &str, priority: f64, distance: i64) {
        if !self.shared.pending.insert(frame_id.to_string()) {
            return; // already queued or active (invariant: at most one task per id)
        }
        let now = Instant::now();
        let delay = Duration::from_secs_f64((distance.unsigned_abs() as f64 * self.shared.eta_factor_secs).max(0.0));
        let task = QueuedTask {
            frame_id: frame_id.to_string(),
            priority,
            enqueued_at: now,
            expected_access_at: now + delay,
        };
        if !self.shared.push_with_backpressure(task) {
            self.shared.pending.remove(frame_id);
            self.shared.dropped.fetch_add(1, AtomicOrdering::Relaxed);
            return;
        }
        self.shared.not_empty.notify_one();
    }

    /// Submit a batch of `(frame_id, priority, distance)` targets in one call.
    pub fn submit_batch(&self, targets: impl IntoIterator<Item = (String, f64, i64)>) {
        for (frame_id, priority, distance) in targets {
            self.submit_with_distance(&frame_id, priority, distance);
        }
    }

    /// Mark every pending or in-flight task whose frame id does not satisfy
    /// `keep` as cancelled. Cancelled tasks are never written into the
    /// store, whether they are still queued or already mid-load.
    pub fn cancel_obsolete(&self, keep: impl Fn(&str) -> bool) {
        for entry in self.shared.pending.iter() {
            if !keep(entry.key()) {
                self.shared.cancelled.insert(entry.key().clone());
            }
        }
    }

    /// Credit a "contribution" if `frame_id` was completed by a preload
    /// worker and hasn't been credited yet — i.e. the caller's access was
    /// served (or is about to be served) by speculative work this preloader
    /// already did. Call this on every store hit, not just misses; a miss
    /// can't have been contributed to, so nothing is credited for it.
    pub fn record_access(&self, frame_id: &str) {
        if self.shared.completed_ids.remove(frame_id).is_some() {
            self.shared.hit_contributions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Current counters and queue/active depth.
    pub fn stats(&self) -> PreloaderStats {
        PreloaderStats {
            completed: self.shared.completed.load(AtomicOrdering::Relaxed),
            failed: self.shared.failed.load(AtomicOrdering::Relaxed),
            dropped: self.shared.dropped.load(AtomicOrdering::Relaxed),
            cancelled: self.shared.cancelled_count.load(AtomicOrdering::Relaxed),
            hit_contributions: self.shared.hit_contributions.load(AtomicOrdering::Relaxed),
            queued: self.shared.queue.lock().len(),
            active: self.shared.active.len(),
        }
    }

    /// Whether `frame_id` is currently queued or being executed.
    pub fn is_pending(&self, frame_id: &str) -> bool {
        self.shared.pending.contains(frame_id)
    }

    /// Stop all workers and block until they exit. Any still-queued tasks
    /// are abandoned without being executed.
    pub fn shutdown(&self) {
        self.shared.running.store(false, AtomicOrdering::SeqCst);
        self.shared.not_empty.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
