use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Which end of the data channel a progress report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Snapshot of one file's transfer progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub direction: Direction,
    pub file_name: String,
    pub file_index: usize,
    pub total_files: usize,
    pub bytes: u64,
    pub total: u64,
    /// 0..=99 while in flight; 100 only once the file is complete.
    pub percent: u8,
    pub bytes_per_second: f64,
}

/// Callback invoked with transfer progress.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Percentage of `done` over `total`, never reaching 100.
///
/// Completion is signalled separately; a racing last chunk must not make a
/// transfer look finished.
pub fn capped_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 99.0) as u8
}

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

const SPEED_WINDOW: Duration = Duration::from_secs(5);
const MAX_SPEED_SAMPLES: usize = 100;

/// Sliding-window throughput estimate.
///
/// Each sample is the number of bytes moved since the previous one. The
/// oldest sample in the window only marks where the window starts.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    in_window: u64,
    window: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(SPEED_WINDOW)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SPEED_SAMPLES),
            in_window: 0,
            window,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    pub fn record_at(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        self.in_window += bytes;
        while let Some(&(at, _)) = self.samples.front() {
            let stale = now.saturating_duration_since(at) > self.window;
            if !stale && self.samples.len() <= MAX_SPEED_SAMPLES {
                break;
            }
            self.pop_oldest();
        }
    }

    /// Bytes per second across the window; 0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(start, first)), Some(&(end, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let span = end.saturating_duration_since(start);
        if span.is_zero() {
            return 0.0;
        }
        (self.in_window - first) as f64 / span.as_secs_f64()
    }

    /// Time left for `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.in_window = 0;
    }

    fn pop_oldest(&mut self) {
        if let Some((_, bytes)) = self.samples.pop_front() {
            self.in_window -= bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped_below_100() {
        assert_eq!(capped_percent(0, 100), 0);
        assert_eq!(capped_percent(40, 100), 40);
        assert_eq!(capped_percent(999, 1000), 99);
        assert_eq!(capped_percent(100, 100), 99);
        assert_eq!(capped_percent(0, 0), 0);
    }

    #[test]
    fn speed_needs_two_samples() {
        let mut calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.record(1000);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_over_window() {
        let mut calc = SpeedCalculator::default();
        let t0 = Instant::now();
        calc.record_at(0, t0);
        calc.record_at(1000, t0 + Duration::from_millis(500));
        calc.record_at(1000, t0 + Duration::from_secs(1));
        let bps = calc.bytes_per_second();
        assert!((bps - 2000.0).abs() < 1.0, "got {bps}");
    }

    #[test]
    fn old_samples_fall_out_of_window() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(1));
        let t0 = Instant::now();
        calc.record_at(1_000_000, t0);
        calc.record_at(100, t0 + Duration::from_secs(5));
        calc.record_at(100, t0 + Duration::from_millis(5500));
        let bps = calc.bytes_per_second();
        assert!((bps - 200.0).abs() < 1.0, "got {bps}");
    }

    #[test]
    fn sample_count_is_bounded() {
        let mut calc = SpeedCalculator::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        for i in 0..(MAX_SPEED_SAMPLES as u64 + 20) {
            calc.record_at(10, t0 + Duration::from_millis(i * 10));
        }
        assert_eq!(calc.samples.len(), MAX_SPEED_SAMPLES);
        assert_eq!(calc.in_window, 10 * MAX_SPEED_SAMPLES as u64);
    }

    #[test]
    fn eta_and_reset() {
        let mut calc = SpeedCalculator::default();
        let t0 = Instant::now();
        calc.record_at(0, t0);
        calc.record_at(1000, t0 + Duration::from_secs(1));
        assert_eq!(calc.eta(5000).map(|d| d.as_secs()), Some(5));
        calc.reset();
        assert!(calc.eta(5000).is_none());
    }
}
