use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point-in-time view of transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSample {
    pub loaded: u64,
    pub total: u64,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_per_sec: Option<f64>,
}

impl ProgressSample {
    /// Builds a sample, clamping `loaded` to `total`. The percentage is
    /// rounded to a whole number.
    pub fn new(loaded: u64, total: u64) -> Self {
        let loaded = loaded.min(total);
        let percentage = if total == 0 {
            0.0
        } else {
            (loaded as f64 / total as f64 * 100.0).round()
        };
        Self {
            loaded,
            total,
            percentage,
            bytes_per_sec: None,
        }
    }

    pub fn with_speed(mut self, bytes_per_sec: f64) -> Self {
        self.bytes_per_sec = (bytes_per_sec > 0.0).then_some(bytes_per_sec);
        self
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.loaded == self.total
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    at: Instant,
}

/// Transfer rate over a sliding window of recorded byte counts.
///
/// Samples live in a ring; recording evicts anything older than the window
/// or beyond the retention cap, and a running total keeps rate queries O(1).
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    ring: VecDeque<SpeedSample>,
    window_total: u64,
    max_samples: usize,
    window: Duration,
}

impl SpeedInner {
    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.ring.front() {
            let expired = now.duration_since(front.at) > self.window;
            if expired || self.ring.len() > self.max_samples {
                self.window_total -= front.bytes;
                self.ring.pop_front();
            } else {
                break;
            }
        }
    }
}

impl SpeedCalculator {
    /// 5-second window, at most 100 retained samples.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(5), 100)
    }

    pub fn with_window(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                ring: VecDeque::new(),
                window_total: 0,
                max_samples,
                window,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn record(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.ring.push_back(SpeedSample { bytes, at: now });
        inner.window_total += bytes;
        inner.evict(now);
    }

    /// Average rate in bytes/second across the retained window.
    ///
    /// Zero until two samples span a measurable interval.
    pub fn bytes_per_second(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (inner.ring.front(), inner.ring.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        inner.window_total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    /// Discards all recorded samples.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ring.clear();
        inner.window_total = 0;
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_percentage() {
        let s = ProgressSample::new(500, 1000);
        assert!((s.percentage - 50.0).abs() < f64::EPSILON);
        assert!(!s.is_done());
    }

    #[test]
    fn sample_percentage_is_whole() {
        assert_eq!(ProgressSample::new(1, 3).percentage, 33.0);
        assert_eq!(ProgressSample::new(2, 3).percentage, 67.0);

        // Rounding may show 100 a hair early; done-ness stays byte-exact.
        let nearly = ProgressSample::new(995, 1000);
        assert_eq!(nearly.percentage, 100.0);
        assert!(!nearly.is_done());
    }

    #[test]
    fn sample_clamps_loaded_to_total() {
        let s = ProgressSample::new(2000, 1000);
        assert_eq!(s.loaded, 1000);
        assert!((s.percentage - 100.0).abs() < f64::EPSILON);
        assert!(s.is_done());
    }

    #[test]
    fn sample_zero_total() {
        let s = ProgressSample::new(0, 0);
        assert_eq!(s.percentage, 0.0);
        assert!(!s.is_done());
    }

    #[test]
    fn sample_speed_omitted_when_zero() {
        let s = ProgressSample::new(10, 100).with_speed(0.0);
        assert!(s.bytes_per_sec.is_none());
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("bytesPerSec"));

        let s = ProgressSample::new(10, 100).with_speed(1024.0);
        assert_eq!(s.bytes_per_sec, Some(1024.0));
    }

    #[test]
    fn idle_calculator_reports_zero() {
        let calc = SpeedCalculator::new();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn one_sample_is_not_a_rate() {
        let calc = SpeedCalculator::new();
        calc.record(4096);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn spaced_samples_yield_positive_rate() {
        let calc = SpeedCalculator::with_window(Duration::from_secs(10), 100);
        calc.record(500);
        std::thread::sleep(Duration::from_millis(20));
        calc.record(500);

        // Exact timing varies; only the sign is stable.
        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn eta_scales_with_remaining_bytes() {
        let calc = SpeedCalculator::with_window(Duration::from_secs(10), 100);
        calc.record(500);
        std::thread::sleep(Duration::from_millis(20));
        calc.record(500);

        let near = calc.eta(1_000).unwrap().as_secs_f64();
        let far = calc.eta(2_000).unwrap().as_secs_f64();
        assert!(far > near);
        assert!((far / near - 2.0).abs() < 0.01);
    }

    #[test]
    fn reset_discards_history() {
        let calc = SpeedCalculator::new();
        calc.record(100);
        calc.record(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(50).is_none());
    }

    #[test]
    fn ring_respects_retention_cap() {
        let calc = SpeedCalculator::with_window(Duration::from_secs(60), 4);
        for _ in 0..12 {
            calc.record(10);
        }
        let inner = calc.inner.lock().unwrap();
        assert!(inner.ring.len() <= 4);
        let retained: u64 = inner.ring.iter().map(|s| s.bytes).sum();
        assert_eq!(inner.window_total, retained);
    }

    #[test]
    fn stale_samples_fall_out_of_the_window() {
        let calc = SpeedCalculator::with_window(Duration::from_millis(25), 100);
        calc.record(1_000);
        std::thread::sleep(Duration::from_millis(60));
        calc.record(1_000);

        // Only the fresh sample survives, so no interval exists to rate.
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn recording_is_thread_safe() {
        use std::sync::Arc;
        use std::thread;

        let calc = Arc::new(SpeedCalculator::with_window(Duration::from_secs(5), 16));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let calc = Arc::clone(&calc);
                thread::spawn(move || {
                    for _ in 0..50 {
                        calc.record(8);
                        let _ = calc.eta(1_000);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let inner = calc.inner.lock().unwrap();
        assert!(inner.ring.len() <= 16);
    }
}
