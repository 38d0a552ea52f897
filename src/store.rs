//! Fixed-capacity, byte-bounded LRU frame store.
//!
//! Backed by an arena (`Vec<Option<Node>>` plus a free list) and an intrusive
//! doubly-linked recency list over arena indices — no raw pointers, no
//! `unsafe`. A `HashMap<String, usize>` gives O(1) expected key lookup.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{FrameCacheError, FrameCacheResult};
use crate::loader::FrameBuffer;
use crate::memory_monitor::PressureLevel;

const PERF_RING_CAPACITY: usize = 1000;

struct Node {
    key: String,
    frame: FrameBuffer,
    size: u64,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Outcome bucket for a single `get` timing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The key was resident.
    Hit,
    /// The key was not resident.
    Miss,
}

/// One timed `get`, kept in a bounded ring for rolling statistics.
#[derive(Debug, Clone)]
pub struct PerfSample {
    /// Time the operation took.
    pub elapsed: Duration,
    /// Whether it was a hit or a miss.
    pub outcome: SampleOutcome,
    /// Frame identifier involved.
    pub frame_id: String,
}

struct StoreInner {
    nodes: Vec<Option<Node>>,
    free_list: Vec<usize>,
    map: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    bytes_used: u64,
    hits: u64,
    misses: u64,
    perf_ring: VecDeque<PerfSample>,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            map: HashMap::new(),
            head: None,
            tail: None,
            bytes_used: 0,
            hits: 0,
            misses: 0,
            perf_ring: VecDeque::with_capacity(PERF_RING_CAPACITY),
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        let node = self.nodes[idx].as_mut().unwrap();
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.nodes[idx].as_mut().unwrap();
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            self.nodes.push(None);
            self.nodes.len() - 1
        }
    }

    /// Remove the least-recently-used entry, if any. Returns its key and size.
    fn evict_one(&mut self) -> Option<(String, u64)> {
        let idx = self.tail?;
        self.detach(idx);
        let node = self.nodes[idx].take().unwrap();
        self.map.remove(&node.key);
        self.bytes_used -= node.size;
        self.free_list.push(idx);
        Some((node.key, node.size))
    }

    fn record(&mut self, elapsed: Duration, outcome: SampleOutcome, frame_id: String) {
        if self.perf_ring.len() == PERF_RING_CAPACITY {
            self.perf_ring.pop_front();
        }
        self.perf_ring.push_back(PerfSample {
            elapsed,
            outcome,
            frame_id,
        });
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A fixed-capacity, byte-bounded LRU store for decoded frames.
///
/// All mutation goes through a single lock. It is never re-entered: no
/// method here calls another locking method while the lock is held.
pub struct FrameStore {
    inner: Mutex<StoreInner>,
    byte_limit: u64,
    max_entries: AtomicUsize,
    pressure_callbacks: DashMap<PressureLevel, Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl FrameStore {
    /// Create an empty store bounded by `max_entries` and `byte_limit`.
    pub fn new(max_entries: usize, byte_limit: u64) -> Self {
        Self {
            inner: Mutex::new(StoreInner::new()),
            byte_limit,
            max_entries: AtomicUsize::new(max_entries),
            pressure_callbacks: DashMap::new(),
        }
    }

    /// Look up `key`. On hit, promotes the entry to most-recent and stamps
    /// its access time; on miss, only the miss counter changes.
    pub fn get(&self, key: &str) -> Option<FrameBuffer> {
        let start = Instant::now();
        let mut inner = self.inner.lock();
        let result = match inner.map.get(key).copied() {
            Some(idx) => {
                inner.promote(idx);
                let node = inner.nodes[idx].as_mut().unwrap();
                node.last_access = Instant::now();
                let frame = node.frame.clone();
                inner.hits += 1;
                Some(frame)
            }
            None => {
                inner.misses += 1;
                None
            }
        };
        let outcome = if result.is_some() {
            SampleOutcome::Hit
        } else {
            SampleOutcome::Miss
        };
        inner.record(start.elapsed(), outcome, key.to_string());
        result
    }

    /// Insert or replace `key`. Evicts least-recently-used entries until the
    /// new entry fits within both the count and byte ceilings. Rejects a
    /// payload that alone exceeds the byte limit, or an empty payload,
    /// without mutating any state.
    pub fn put(&self, key: &str, frame: FrameBuffer) -> FrameCacheResult<()> {
        if frame.is_empty() {
            return Err(FrameCacheError::InvalidPayload);
        }
        let size = frame.len();
        if size > self.byte_limit {
            return Err(FrameCacheError::OversizedFrame {
                size,
                limit: self.byte_limit,
            });
        }

        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.map.get(key) {
            // Replace-in-place never evicts if the new size doesn't grow
            // the total past the ceiling.
            let old_size = inner.nodes[idx].as_ref().unwrap().size;
            if size > old_size {
                while inner.bytes_used - old_size + size > self.byte_limit && inner.tail != Some(idx) {
                    if inner.evict_one().is_none() {
                        break;
                    }
                }
            }
            let node = inner.nodes[idx].as_mut().unwrap();
            inner.bytes_used = inner.bytes_used - node.size + size;
            node.frame = frame;
            node.size = size;
            node.last_access = Instant::now();
            inner.promote(idx);
            return Ok(());
        }

        let max_entries = self.max_entries.load(Ordering::Relaxed);
        while inner.bytes_used + size > self.byte_limit && inner.len() > 0 {
            inner.evict_one();
        }
        while inner.len() >= max_entries && inner.len() > 0 {
            inner.evict_one();
        }

        let idx = inner.alloc_slot();
        inner.nodes[idx] = Some(Node {
            key: key.to_string(),
            frame,
            size,
            last_access: Instant::now(),
            prev: None,
            next: None,
        });
        inner.map.insert(key.to_string(), idx);
        inner.push_front(idx);
        inner.bytes_used += size;

        Ok(())
    }

    /// Evict the single least-recently-used entry, if any.
    pub fn evict_lru(&self) -> Option<(String, u64)> {
        self.inner.lock().evict_one()
    }

    /// Evict least-recently-used entries until `bytes_used <= target_bytes`
    /// or the store is empty. Used by the memory monitor under pressure.
    pub fn evict_until(&self, target_bytes: u64) {
        let mut inner = self.inner.lock();
        while inner.bytes_used > target_bytes && inner.len() > 0 {
            inner.evict_one();
        }
    }

    /// Number of resident entries.
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    /// Total bytes currently resident.
    pub fn bytes_used(&self) -> u64 {
        self.inner.lock().bytes_used
    }

    /// Configured byte ceiling.
    pub fn byte_limit(&self) -> u64 {
        self.byte_limit
    }

    /// Configured entry-count ceiling.
    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    /// Lower the entry-count ceiling at runtime (used by the optimizer's
    /// emergency pass) and immediately evict down to the new ceiling.
    /// Raising the ceiling back up never evicts.
    pub fn set_max_entries(&self, new_max: usize) {
        self.max_entries.store(new_max.max(1), Ordering::Relaxed);
        let mut inner = self.inner.lock();
        while inner.len() > new_max.max(1) {
            inner.evict_one();
        }
    }

    /// `hits / (hits + misses)`, or `0.0` when there have been no accesses.
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        }
    }

    /// Total hit and miss counts.
    pub fn hit_miss_counts(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }

    /// Average and maximum elapsed time across the rolling performance ring.
    pub fn perf_summary(&self) -> (Duration, Duration, usize) {
        let inner = self.inner.lock();
        if inner.perf_ring.is_empty() {
            return (Duration::ZERO, Duration::ZERO, 0);
        }
        let total: Duration = inner.perf_ring.iter().map(|s| s.elapsed).sum();
        let max = inner
            .perf_ring
            .iter()
            .map(|s| s.elapsed)
            .max()
            .unwrap_or(Duration::ZERO);
        (total / inner.perf_ring.len() as u32, max, inner.perf_ring.len())
    }

    /// Empty the store and reset all counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = StoreInner::new();
    }

    /// Register a callback to be fired (by the memory monitor, never by the
    /// store itself) on transition into `level`.
    pub fn register_pressure_callback(
        &self,
        level: PressureLevel,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) {
        self.pressure_callbacks.entry(level).or_default().push(callback);
    }

    /// Fire every callback registered for `level`. Invoked by the memory
    /// monitor exactly once per transition into that level.
    pub fn fire_pressure_callbacks(&self, level: PressureLevel) {
        if let Some(callbacks) = self.pressure_callbacks.get(&level) {
            for callback in callbacks.iter() {
                callback();
            }
        }
    }
}
