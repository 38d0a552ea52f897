//! The external frame loader capability.
//!
//! The loader is out of scope for this crate (it decodes pixels from
//! disk/video) but its contract — `load(key) -> frame | error`, no internal
//! retry, typical latency 20-45ms — is pinned here so the rest of the crate
//! can depend on a trait rather than a concrete decoder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Opaque, reference-counted frame payload. Cloning is O(1) — the read path
/// shares the underlying bytes rather than copying them.
#[derive(Clone)]
pub struct FrameBuffer {
    bytes: Arc<[u8]>,
}

impl FrameBuffer {
    /// Wrap a byte buffer as a frame payload.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the raw bytes. The core never interprets pixels.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl PartialEq for FrameBuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes) || self.bytes == other.bytes
    }
}

/// External collaborator that resolves a frame identifier to pixel bytes.
///
/// Implementations must not retry internally; the agent treats any error as
/// a miss and never waits past its own deadline for a slow loader.
pub trait FrameLoader: Send + Sync {
    /// Load the frame identified by `key`.
    fn load(&self, key: &str) -> anyhow::Result<FrameBuffer>;
}

/// A [`FrameLoader`] test double with configurable latency and optional
/// deterministic failure injection. Grounded in the original
/// implementation's `MockInfrastructureLoader`/`mock_frame_loader`.
pub struct SimulatedLoader {
    latency: Duration,
    jitter: Duration,
    frame_bytes: usize,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl SimulatedLoader {
    /// A loader that sleeps for `latency` then returns `frame_bytes` of
    /// arbitrary content.
    pub fn new(latency: Duration, frame_bytes: usize) -> Self {
        Self {
            latency,
            jitter: Duration::ZERO,
            frame_bytes,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Add up to `jitter` of additional random sleep on every call, on top
    /// of the base `latency` — models a loader whose cost varies call to
    /// call rather than one with perfectly uniform latency.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Make every `n`th call fail instead of succeeding.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    /// Number of times `load` has been invoked so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FrameLoader for SimulatedLoader {
    fn load(&self, key: &str) -> anyhow::Result<FrameBuffer> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let sleep = if self.jitter.is_zero() {
            self.latency
        } else {
            self.latency + rand::thread_rng().gen_range(Duration::ZERO..=self.jitter)
        };
        std::thread::sleep(sleep);
        if let Some(n) = self.fail_every {
            if n > 0 && call % n == 0 {
                anyhow::bail!("simulated loader failure for {key}");
            }
        }
        Ok(FrameBuffer::new(vec![0u8; self.frame_bytes]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_loader_returns_requested_size() {
        let loader = SimulatedLoader::new(Duration::from_millis(1), 1024);
        let frame = loader.load("000001").unwrap();
        assert_eq!(frame.len(), 1024);
    }

    #[test]
    fn simulated_loader_fails_on_schedule() {
        let loader = SimulatedLoader::new(Duration::from_millis(0), 16).failing_every(2);
        assert!(loader.load("a").is_ok());
        assert!(loader.load("b").is_err());
        assert!(loader.load("c").is_ok());
    }

    #[test]
    fn frame_buffer_clone_shares_bytes() {
        let frame = FrameBuffer::new(vec![1, 2, 3]);
        let clone = frame.clone();
        assert_eq!(frame.as_bytes(), clone.as_bytes());
    }

    #[test]
    fn jitter_never_sleeps_less_than_the_base_latency() {
        let loader = SimulatedLoader::new(Duration::from_millis(5), 16)
            .with_jitter(Duration::from_millis(20));
        for _ in 0..10 {
            let start = std::time::Instant::now();
            loader.load("000001").unwrap();
            assert!(start.elapsed() >= Duration::from_millis(5));
        }
    }
}
