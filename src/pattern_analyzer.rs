//! Access pattern classification.
//!
//! Consumes a bounded ring of recent frame accesses and classifies the
//! caller's navigation style so the preloader can choose a sensible radius
//! and direction. Verdicts are cached for a short TTL since classification
//! is read far more often than the access pattern actually changes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How a run of consecutive digits is extracted from a frame identifier.
///
/// Takes the first maximal run of ASCII digits found anywhere in the
/// string, which degrades gracefully across `"000123"`, `"frame_000123"`,
/// and `"cam2_shot04_000123.raw"` alike, rather than assuming a fixed
/// delimiter position.
pub fn leading_numeric_run(key: &str) -> Option<i64> {
    let mut digits = String::new();
    let mut started = false;
    for ch in key.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            started = true;
        } else if started {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Rebuild a frame identifier with its first numeric run replaced by
/// `new_value`, zero-padded to the same width as the original run. Used by
/// the preloader to derive neighbor identifiers (`"frame_000123"` with
/// `new_value = 124` becomes `"frame_000124"`). Returns `None` if `key`
/// contains no digits or `new_value` is negative.
pub fn with_numeric_run(key: &str, new_value: i64) -> Option<String> {
    if new_value < 0 {
        return None;
    }
    let chars: Vec<char> = key.chars().collect();
    let mut start = None;
    let mut end = None;
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
            }
            end = Some(i + 1);
        } else if start.is_some() {
            break;
        }
    }
    let (start, end) = (start?, end?);
    let width = end - start;
    let mut result: String = chars[..start].iter().collect();
    result.push_str(&format!("{new_value:0width$}"));
    result.push_str(&chars[end..].iter().collect::<String>());
    Some(result)
}

/// Classification of the caller's recent navigation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Monotonic, unit-stride traversal (forward or backward playback).
    Sequential,
    /// Regular, larger-than-one stride (scrubbing by a fixed step).
    Jump,
    /// Repeated revisits to a small set of identifiers.
    Hotspot,
    /// No discernible structure.
    Random,
    /// Too few accesses logged to classify confidently.
    Insufficient,
}

/// The analyzer's current read on access behavior.
#[derive(Debug, Clone, Copy)]
pub struct PatternVerdict {
    /// Classified pattern.
    pub kind: PatternKind,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Recommended preload radius for this pattern.
    pub preload_radius: usize,
    /// Recommended preload direction: `1` forward, `-1` backward, `0` both.
    pub direction: i32,
}

struct AccessRecord {
    frame_id: String,
    numeric: Option<i64>,
    timestamp: Instant,
}

struct AnalyzerState {
    log: VecDeque<AccessRecord>,
    cached_verdict: Option<(Instant, PatternVerdict)>,
}

/// Classifies recent frame access history into a navigation pattern.
pub struct PatternAnalyzer {
    state: Mutex<AnalyzerState>,
    log_capacity: usize,
    window: usize,
    radius_base: usize,
    verdict_ttl: Duration,
}

impl PatternAnalyzer {
    /// Build an analyzer retaining up to `log_capacity` accesses, scoring
    /// over the most recent `window` of them, recommending preload radii
    /// scaled from `radius_base`, and caching verdicts for `verdict_ttl`.
    pub fn new(log_capacity: usize, window: usize, radius_base: usize, verdict_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(AnalyzerState {
                log: VecDeque::with_capacity(log_capacity),
                cached_verdict: None,
            }),
            log_capacity,
            window,
            radius_base,
            verdict_ttl,
        }
    }

    /// Record a single access. Call this on every `get`, hit or miss.
    pub fn record_access(&self, frame_id: &str) {
        let mut state = self.state.lock();
        if state.log.len() == self.log_capacity {
            state.log.pop_front();
        }
        state.log.push_back(AccessRecord {
            frame_id: frame_id.to_string(),
            numeric: leading_numeric_run(frame_id),
            timestamp: Instant::now(),
        });
        state.cached_verdict = None;
    }

    /// Number of accesses currently retained.
    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Classify the current access pattern, reusing a cached verdict if one
    /// was computed within the TTL.
    pub fn analyze(&self) -> PatternVerdict {
        let mut state = self.state.lock();
        if let Some((computed_at, verdict)) = state.cached_verdict {
            if computed_at.elapsed() < self.verdict_ttl {
                return verdict;
            }
        }

        let verdict = self.classify(&state.log);
        state.cached_verdict = Some((Instant::now(), verdict));
        verdict
    }

    fn classify(&self, log: &VecDeque<AccessRecord>) -> PatternVerdict {
        // Below this many accesses none of the three scores are statistically
        // meaningful, so we report no opinion rather than an overconfident guess.
        const MIN_SAMPLES: usize = 10;
        const RANDOM_CUTOFF: f64 = 0.3;

        let recent: Vec<&AccessRecord> = log.iter().rev().take(self.window).collect();
        if recent.len() < MIN_SAMPLES {
            return PatternVerdict {
                kind: PatternKind::Insufficient,
                confidence: 0.0,
                preload_radius: self.radius_base,
                direction: 0,
            };
        }

        // Oldest-to-newest order for stride analysis.
        let ordered: Vec<&AccessRecord> = recent.into_iter().rev().collect();

        let sequential_score = self.sequential_score(&ordered);
        let jump_score = self.jump_score(&ordered);
        let hotspot_score = self.hotspot_score(&ordered);

        // Ties break toward sequential, then jump, then hotspot, mirroring
        // the order the three scores are computed in.
        let mut kind = PatternKind::Sequential;
        let mut score = sequential_score;
        if jump_score > score {
            kind = PatternKind::Jump;
            score = jump_score;
        }
        if hotspot_score > score {
            kind = PatternKind::Hotspot;
            score = hotspot_score;
        }

        let direction = self.direction(&ordered);

        if score < RANDOM_CUTOFF {
            return PatternVerdict {
                kind: PatternKind::Random,
                confidence: score,
                preload_radius: (self.radius_base as f64 * 1.2).round() as usize,
                direction: 0,
            };
        }

        let preload_radius = match kind {
            PatternKind::Sequential => (self.radius_base as f64 * 1.5).round() as usize,
            PatternKind::Jump => self.radius_base,
            PatternKind::Hotspot => (self.radius_base as f64 * 0.8).round().max(1.0) as usize,
            PatternKind::Random | PatternKind::Insufficient => self.radius_base,
        };
        let direction = if matches!(kind, PatternKind::Hotspot) { 0 } else { direction };

        PatternVerdict {
            kind,
            confidence: score,
            preload_radius,
            direction,
        }
    }

    /// Fraction of consecutive pairs whose numeric runs are exactly one apart.
    fn sequential_score(&self, ordered: &[&AccessRecord]) -> f64 {
        if ordered.len() < 2 {
            return 0.0;
        }
        let total = ordered.len() - 1;
        let matches = ordered
            .windows(2)
            .filter(|w| matches!((w[0].numeric, w[1].numeric), (Some(a), Some(b)) if (b - a).abs() == 1))
            .count();
        matches as f64 / total as f64
    }

    /// Fraction of consecutive triples whose two gaps are equal and greater
    /// than one, i.e. a regular non-unit stride ("scrubbing by N").
    fn jump_score(&self, ordered: &[&AccessRecord]) -> f64 {
        if ordered.len() < 3 {
            return 0.0;
        }
        let total = ordered.len() - 2;
        let matches = ordered
            .windows(3)
            .filter(|w| match (w[0].numeric, w[1].numeric, w[2].numeric) {
                (Some(a), Some(b), Some(c)) => {
                    let gap1 = (b - a).abs();
                    let gap2 = (c - b).abs();
                    gap1 == gap2 && gap1 > 1
                }
                _ => false,
            })
            .count();
        matches as f64 / total as f64
    }

    /// Share of accesses landing on the most-frequently-revisited 20% of
    /// distinct frame identifiers in the window.
    fn hotspot_score(&self, ordered: &[&AccessRecord]) -> f64 {
        if ordered.len() < 5 {
            return 0.0;
        }
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for r in ordered {
            *counts.entry(r.frame_id.as_str()).or_insert(0) += 1;
        }
        if counts.len() <= 1 {
            return 1.0;
        }
        let mut tallies: Vec<usize> = counts.into_values().collect();
        tallies.sort_unstable_by(|a, b| b.cmp(a));
        let top_n = ((tallies.len() as f64 * 0.2).ceil() as usize).max(1);
        let top_sum: usize = tallies.iter().take(top_n).sum();
        (top_sum as f64 / ordered.len() as f64).min(1.0)
    }

    /// Majority sign of numeric travel across the window: `1` forward, `-1`
    /// backward, `0` for no majority (or no numeric identifiers at all).
    fn direction(&self, ordered: &[&AccessRecord]) -> i32 {
        let (mut forward, mut backward) = (0i32, 0i32);
        for w in ordered.windows(2) {
            if let (Some(a), Some(b)) = (w[0].numeric, w[1].numeric) {
                match b.cmp(&a) {
                    std::cmp::Ordering::Greater => forward += 1,
                    std::cmp::Ordering::Less => backward += 1,
                    std::cmp::Ordering::Equal => {}
                }
            }
        }
        match forward.cmp(&backward) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::new(1000, 30, 25, Duration::from_millis(10_000))
    }

    #[test]
    fn numeric_extraction_handles_various_formats() {
        assert_eq!(leading_numeric_run("000123"), Some(123));
        assert_eq!(leading_numeric_run("frame_000123"), Some(123));
        assert_eq!(leading_numeric_run("cam2_shot04_000123.raw"), Some(2));
        assert_eq!(leading_numeric_run("no_digits_here"), None);
    }

    #[test]
    fn insufficient_with_too_few_samples() {
        let a = analyzer();
        a.record_access("000001");
        a.record_access("000002");
        let verdict = a.analyze();
        assert_eq!(verdict.kind, PatternKind::Insufficient);
    }

    #[test]
    fn detects_forward_sequential_playback() {
        let a = analyzer();
        for i in 1..=10 {
            a.record_access(&format!("{:06}", i));
        }
        let verdict = a.analyze();
        assert_eq!(verdict.kind, PatternKind::Sequential);
        assert_eq!(verdict.direction, 1);
    }

    #[test]
    fn detects_backward_sequential_playback() {
        let a = analyzer();
        for i in (1..=10).rev() {
            a.record_access(&format!("{:06}", i));
        }
        let verdict = a.analyze();
        assert_eq!(verdict.kind, PatternKind::Sequential);
        assert_eq!(verdict.direction, -1);
    }

    #[test]
    fn detects_fixed_stride_jump() {
        let a = analyzer();
        for i in 0..10 {
            a.record_access(&format!("{:06}", i * 10));
        }
        let verdict = a.analyze();
        assert_eq!(verdict.kind, PatternKind::Jump);
    }

    #[test]
    fn detects_hotspot_revisits() {
        let a = analyzer();
        let ids = [
            "000001", "000001", "000001", "000077", "000001", "000001", "000001", "000088",
            "000001", "000001",
        ];
        for id in ids {
            a.record_access(id);
        }
        let verdict = a.analyze();
        assert_eq!(verdict.kind, PatternKind::Hotspot);
    }

    #[test]
    fn verdict_is_cached_within_ttl() {
        let a = PatternAnalyzer::new(1000, 30, 25, Duration::from_millis(10_000));
        for i in 1..=10 {
            a.record_access(&format!("{:06}", i));
        }
        let first = a.analyze();
        // Mutate the underlying log directly without going through
        // record_access's cache invalidation, to prove analyze() is
        // actually serving from cache rather than recomputing.
        {
            let mut state = a.state.lock();
            state.log.clear();
        }
        let second = a.analyze();
        assert_eq!(first.kind, second.kind);
    }

    #[test]
    fn with_numeric_run_preserves_width_and_surrounding_text() {
        assert_eq!(with_numeric_run("000123", 124), Some("000124".into()));
        assert_eq!(
            with_numeric_run("frame_000123.raw", 999),
            Some("frame_000999.raw".into())
        );
        assert_eq!(with_numeric_run("no_digits", 1), None);
        assert_eq!(with_numeric_run("000123", -1), None);
    }

    #[test]
    fn log_respects_capacity() {
        let a = PatternAnalyzer::new(5, 5, 25, Duration::from_millis(10_000));
        for i in 0..20 {
            a.record_access(&format!("{:06}", i));
        }
        assert_eq!(a.log_len(), 5);
    }
}
