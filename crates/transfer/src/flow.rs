//! Backpressure gate evaluated before every chunk.

use std::time::Duration;

use crate::adaptive::ChunkSizer;

/// What the sender should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecision {
    /// Buffer is low: send now.
    Send,
    /// Buffer is filling: look again after this delay.
    Wait(Duration),
}

/// Decides whether the next chunk may go out given `buffered` bytes.
///
/// With several receivers `buffered` is the maximum across channels, so the
/// slowest one sets the pace.
pub fn decide(buffered: usize, sizer: &mut ChunkSizer) -> FlowDecision {
    let t = sizer.tuning();
    let max_buffer = t.max_buffer;
    let optimal = t.optimal_buffer;
    let low = t.low_threshold;

    if buffered as f64 > max_buffer as f64 * 0.9 {
        return FlowDecision::Wait(sizer.on_critical());
    }
    if buffered > optimal {
        let ratio = buffered as f64 / max_buffer as f64;
        let ms = (ratio * 20.0).ceil() as u64;
        return FlowDecision::Wait(Duration::from_millis(ms));
    }
    if buffered > low {
        return FlowDecision::Wait(Duration::from_millis(5));
    }
    FlowDecision::Send
}
