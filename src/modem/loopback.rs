//! A deterministic in-memory `AudioBackend` for tests — no audio device, no
//! FEC, no timing. `transmit` classifies the frame by its own packet type
//! (matching the modem's real control/payload split) and appends it
//! straight to the peer's matching decoder queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::ModemError;
use crate::mode::ModeId;
use crate::modem::{AudioBackend, DecodedFrame};
use crate::wire;

#[derive(Default)]
struct Queues {
    control: VecDeque<DecodedFrame>,
    payload: VecDeque<DecodedFrame>,
}

/// One endpoint of a loopback pair. Frames `transmit`ted on one endpoint
/// land on the other's decoder queues; `snr_raw` is fixed since there's no
/// channel to estimate it from.
pub struct Loopback {
    peer: Arc<Mutex<Queues>>,
    own: Arc<Mutex<Queues>>,
    snr_raw: u8,
}

impl Loopback {
    /// Build a connected pair: whatever endpoint A transmits, endpoint B
    /// decodes, and vice versa.
    pub fn pair() -> (Loopback, Loopback) {
        let a = Arc::new(Mutex::new(Queues::default()));
        let b = Arc::new(Mutex::new(Queues::default()));
        (
            Loopback {
                peer: b.clone(),
                own: a.clone(),
                snr_raw: wire::encode_snr(10.0),
            },
            Loopback {
                peer: a,
                own: b,
                snr_raw: wire::encode_snr(10.0),
            },
        )
    }

    pub fn set_snr(&mut self, db: f32) {
        self.snr_raw = wire::encode_snr(db);
    }

    /// Drop every frame this endpoint would otherwise decode — models a
    /// dead channel (the frame was transmitted but never arrived).
    pub fn drain(&self) {
        let mut q = self.own.lock().unwrap();
        q.control.clear();
        q.payload.clear();
    }
}

impl AudioBackend for Loopback {
    fn transmit(&mut self, mode: ModeId, frame: &[u8]) -> Result<(), ModemError> {
        let decoded = DecodedFrame {
            bytes: frame.to_vec(),
            snr_raw: self.snr_raw,
        };
        let mut q = self.peer.lock().unwrap();
        if mode == ModeId::Datac13 {
            q.control.push_back(decoded);
        } else {
            q.payload.push_back(decoded);
        }
        Ok(())
    }

    fn poll_control(&mut self) -> Option<DecodedFrame> {
        self.own.lock().unwrap().control.pop_front()
    }

    fn poll_payload(&mut self, _mode: ModeId) -> Option<DecodedFrame> {
        self.own.lock().unwrap().payload.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_crosses_from_a_to_b() {
        let (mut a, mut b) = Loopback::pair();
        let frame = wire::build_call(5, "PU2UIT", "PU2GNU");
        a.transmit(ModeId::Datac13, &frame).unwrap();
        let got = b.poll_control().expect("frame should have arrived");
        assert_eq!(got.bytes, frame);
        assert!(a.poll_control().is_none());
    }

    #[test]
    fn payload_frame_crosses_on_the_payload_queue() {
        let (mut a, mut b) = Loopback::pair();
        a.transmit(ModeId::Datac4, &[1, 2, 3]).unwrap();
        assert!(b.poll_control().is_none());
        let got = b.poll_payload(ModeId::Datac4).expect("frame should arrive on payload queue");
        assert_eq!(got.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn drain_discards_pending_frames() {
        let (mut a, mut b) = Loopback::pair();
        a.transmit(ModeId::Datac13, &[9]).unwrap();
        b.drain();
        assert!(b.poll_control().is_none());
    }
}
