//! Per-frame timing recorder and cumulative telemetry counters — §3.

use crate::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTiming {
    pub tx_queue_ms: Option<Instant>,
    pub tx_start_ms: Option<Instant>,
    pub tx_end_ms: Option<Instant>,
    pub ack_rx_ms: Option<Instant>,
    pub data_rx_ms: Option<Instant>,
    pub ack_tx_start_ms: Option<Instant>,
}

impl FrameTiming {
    /// `rtt = (ack_rx - tx_start) - ack_delay_from_peer`.
    pub fn rtt(&self, ack_delay: Duration) -> Option<Duration> {
        let start = self.tx_start_ms?;
        let ack = self.ack_rx_ms?;
        let raw = ack.saturating_duration_since(start);
        Some(Duration::from_millis(raw.as_millis().saturating_sub(ack_delay.as_millis())))
    }

    pub fn ack_delay(&self) -> Option<Duration> {
        let rx = self.data_rx_ms?;
        let tx = self.ack_tx_start_ms?;
        Some(tx.saturating_duration_since(rx))
    }
}

/// Cumulative counters surfaced as structured telemetry (log lines / the
/// `SN`, `BITRATE`, `BUFFER` TCP status lines — §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct Telemetry {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub retries_total: u64,
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub last_rtt: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct TimingRecorder {
    pub current: FrameTiming,
    pub telemetry: Telemetry,
}

impl TimingRecorder {
    pub fn new() -> TimingRecorder {
        TimingRecorder::default()
    }

    pub fn reset(&mut self) {
        *self = TimingRecorder::default();
    }

    pub fn record_tx_start(&mut self, at: Instant) {
        self.current.tx_start_ms = Some(at);
    }

    pub fn record_tx_end(&mut self, at: Instant, frame_bytes: u64) {
        self.current.tx_end_ms = Some(at);
        self.telemetry.frames_tx += 1;
        self.telemetry.tx_bytes += frame_bytes;
    }

    pub fn record_retry(&mut self) {
        self.telemetry.retries_total += 1;
    }

    pub fn record_ack_rx(&mut self, at: Instant, ack_delay: Duration) {
        self.current.ack_rx_ms = Some(at);
        if let Some(rtt) = self.current.rtt(ack_delay) {
            self.telemetry.last_rtt = Some(rtt);
        }
    }

    pub fn record_data_rx(&mut self, at: Instant, frame_bytes: u64) {
        self.current.data_rx_ms = Some(at);
        self.telemetry.frames_rx += 1;
        self.telemetry.rx_bytes += frame_bytes;
    }

    pub fn record_ack_tx_start(&mut self, at: Instant) {
        self.current.ack_tx_start_ms = Some(at);
    }

    pub fn begin_frame(&mut self) {
        self.current = FrameTiming::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_subtracts_peer_ack_delay() {
        let mut rec = TimingRecorder::new();
        rec.record_tx_start(Instant::from_millis(1000));
        rec.record_ack_rx(Instant::from_millis(1500), Duration::from_millis(50));
        assert_eq!(rec.telemetry.last_rtt, Some(Duration::from_millis(450)));
    }

    #[test]
    fn cumulative_counters_accumulate_across_frames() {
        let mut rec = TimingRecorder::new();
        rec.record_tx_end(Instant::ZERO, 54);
        rec.begin_frame();
        rec.record_tx_end(Instant::ZERO, 54);
        assert_eq!(rec.telemetry.frames_tx, 2);
        assert_eq!(rec.telemetry.tx_bytes, 108);
    }
}
