//! Adaptive chunk sizing driven by buffered-amount feedback.

use std::time::Duration;

use tokio::time::Instant;

use quickshare_protocol::constants::{
    BUFFER_LOW_THRESHOLD, DEFAULT_CHUNK_SIZE, HIGH_THROUGHPUT, MAX_BUFFER_SIZE, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE, OPTIMAL_BUFFER_SIZE, RAMP_DOWN_FACTOR, RAMP_UP_FACTOR, RETUNE_INTERVAL,
};

/// Knobs for the sender engine. Defaults match the protocol constants.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTuning {
    pub min_chunk: usize,
    pub default_chunk: usize,
    pub max_chunk: usize,
    pub optimal_buffer: usize,
    pub max_buffer: usize,
    pub low_threshold: usize,
    pub ramp_up: f64,
    pub ramp_down: f64,
    /// Bytes per second above which a drained channel ramps up at full speed.
    pub high_throughput: f64,
    pub retune_interval: Duration,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            min_chunk: MIN_CHUNK_SIZE,
            default_chunk: DEFAULT_CHUNK_SIZE,
            max_chunk: MAX_CHUNK_SIZE,
            optimal_buffer: OPTIMAL_BUFFER_SIZE,
            max_buffer: MAX_BUFFER_SIZE,
            low_threshold: BUFFER_LOW_THRESHOLD,
            ramp_up: RAMP_UP_FACTOR,
            ramp_down: RAMP_DOWN_FACTOR,
            high_throughput: HIGH_THROUGHPUT,
            retune_interval: RETUNE_INTERVAL,
        }
    }
}

/// Tracks the current chunk size and the congestion signals that move it.
#[derive(Debug)]
pub struct ChunkSizer {
    tuning: TransferTuning,
    current: usize,
    consecutive_slow_sends: u32,
    window_start: Instant,
    window_bytes: u64,
    measured_bandwidth: f64,
    high_water_mark: usize,
}

impl ChunkSizer {
    pub fn new(tuning: TransferTuning) -> Self {
        Self::starting_at(tuning, Instant::now())
    }

    pub fn starting_at(tuning: TransferTuning, now: Instant) -> Self {
        let current = tuning.default_chunk.clamp(tuning.min_chunk, tuning.max_chunk);
        Self {
            tuning,
            current,
            consecutive_slow_sends: 0,
            window_start: now,
            window_bytes: 0,
            measured_bandwidth: 0.0,
            high_water_mark: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn tuning(&self) -> &TransferTuning {
        &self.tuning
    }

    pub fn consecutive_slow_sends(&self) -> u32 {
        self.consecutive_slow_sends
    }

    /// Throughput measured over the last completed window (bytes/s).
    pub fn measured_bandwidth(&self) -> f64 {
        self.measured_bandwidth
    }

    /// Largest buffered amount seen at a retune.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Accounts bytes handed to the channel in the current window.
    pub fn record_sent(&mut self, bytes: usize) {
        self.window_bytes += bytes as u64;
    }

    /// Retunes the chunk size once the measurement window is long enough.
    ///
    /// Returns `true` if a retune happened.
    pub fn maybe_retune(&mut self, buffered: usize, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= self.tuning.retune_interval || self.window_bytes == 0 {
            return false;
        }

        let throughput = self.window_bytes as f64 / elapsed.as_secs_f64();
        self.measured_bandwidth = throughput;
        self.retune(buffered, throughput);

        self.window_bytes = 0;
        self.window_start = now;
        true
    }

    /// Applies one sizing step for the observed buffer level and throughput.
    pub fn retune(&mut self, buffered: usize, throughput: f64) {
        let t = &self.tuning;
        let ratio = buffered as f64 / t.max_buffer as f64;
        let size = self.current as f64;

        let next = if buffered < t.low_threshold && self.consecutive_slow_sends == 0 {
            if throughput > t.high_throughput {
                size * t.ramp_up
            } else {
                size * 1.1
            }
        } else if buffered > t.optimal_buffer {
            self.consecutive_slow_sends += 1;
            size * t.ramp_down
        } else if ratio > 0.6 {
            size * 0.95
        } else {
            self.consecutive_slow_sends = self.consecutive_slow_sends.saturating_sub(1);
            size * 1.05
        };

        self.high_water_mark = self.high_water_mark.max(buffered);
        self.current = (next.floor() as usize).clamp(t.min_chunk, t.max_chunk);
    }

    /// Reacts to a critically full buffer: halves the chunk and returns the
    /// back-off to wait before looking again.
    pub fn on_critical(&mut self) -> Duration {
        self.current = (self.current / 2).max(self.tuning.min_chunk);
        self.consecutive_slow_sends += 1;
        let ms = (20 * u64::from(self.consecutive_slow_sends)).min(100);
        Duration::from_millis(ms)
    }

    /// Records a buffered-amount observation for the peak statistic.
    pub fn observe(&mut self, buffered: usize) {
        self.high_water_mark = self.high_water_mark.max(buffered);
    }
}
