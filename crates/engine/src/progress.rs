//! Transfer speed and cross-session progress aggregation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ferry_protocol::types::AggregateSnapshot;

use crate::session::TransferSession;

struct SpeedSample {
    bytes: i64,
    at: Instant,
}

/// Instantaneous transfer speed over a short sliding window.
///
/// Deliberately not a cumulative average: only samples inside the window
/// count, so the reading reflects current conditions and recovers quickly
/// after a stall or a resume.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: VecDeque<SpeedSample>,
    window: Duration,
    max_samples: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    /// Creates a calculator with the given window and sample cap.
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: VecDeque::new(),
                window,
                max_samples,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: i64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push_back(SpeedSample { bytes, at: now });

        let cutoff = now - s.window;
        while s.samples.front().is_some_and(|sample| sample.at < cutoff) {
            s.samples.pop_front();
        }
        while s.samples.len() > s.max_samples {
            s.samples.pop_front();
        }
    }

    /// Current speed in bytes/second; 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }
        let first = s.samples.front().unwrap();
        let last = s.samples.back().unwrap();
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: i64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`; `None` while speed is 0.
    pub fn eta(&self, remaining_bytes: i64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 || remaining_bytes < 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Drops all samples (used when a session pauses, so stale samples
    /// don't distort the post-resume reading).
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

/// Folds the live session set into a cross-session summary.
///
/// Pure: holds no state of its own and cannot drift from the sessions.
/// `active_count` counts non-terminal sessions; terminal sessions remain
/// in the fold (and its byte totals) until the caller acknowledges them.
/// `average_speed` is the combined instantaneous throughput of active
/// sessions.
pub fn aggregate<'a, I>(sessions: I) -> AggregateSnapshot
where
    I: IntoIterator<Item = &'a TransferSession>,
{
    use ferry_protocol::types::SessionStatus;

    let mut agg = AggregateSnapshot::default();
    for session in sessions {
        let status = session.status();
        match status {
            SessionStatus::Completed => agg.completed_count += 1,
            SessionStatus::Failed => agg.failed_count += 1,
            SessionStatus::Cancelled => {}
            _ => agg.active_count += 1,
        }
        agg.total_bytes += session.total_size();
        agg.transferred_bytes += session.transferred_bytes();
        if !status.is_terminal() {
            agg.average_speed += session.bytes_per_second();
        }
    }
    agg
}
