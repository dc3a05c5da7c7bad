//! Modem interface boundary — §4.7.
//!
//! The soft-modem codec itself (FEC-OFDM modulate/demodulate, sync
//! estimate, SNR, the four on-air modes) is an external collaborator —
//! only its interface matters here, never its internals. `AudioBackend` is
//! that boundary. Everything else in this module is in-scope scheduling
//! logic built on top of it: PTT bracketing (`worker`), the dual
//! persistent decoder instances, and the CRC-6 framing classification that
//! tells a CONNECT frame from a normal ARQ control header.

mod loopback;
pub mod worker;

pub use loopback::Loopback;

use std::sync::Mutex;

use crate::error::ModemError;
use crate::mode::ModeId;
use crate::wire::{self, ConnectFrame, Header};

/// One frame handed back by the external codec after a successful decode —
/// already past its own internal FEC/sync gate, carrying the codec's own
/// SNR estimate for this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub bytes: Vec<u8>,
    pub snr_raw: u8,
}

/// The external soft-modem codec plus audio device I/O, reduced to the
/// handful of calls the scheduler needs.
pub trait AudioBackend: Send {
    /// Modulate `frame` at `mode` and play it out, asserting PTT for the
    /// duration and holding the post-PTT channel guard. Blocks until the
    /// frame has fully played out. A `Result::Err` here is fatal to the
    /// worker (§7): the caller does not retry.
    fn transmit(&mut self, mode: ModeId, frame: &[u8]) -> Result<(), ModemError>;

    /// Non-blocking poll of the persistent DATAC13 control-mode decoder.
    /// Only CALL/ACCEPT ever arrive on this decoder (§4.7).
    fn poll_control(&mut self) -> Option<DecodedFrame>;

    /// Non-blocking poll of the persistent payload-mode decoder, currently
    /// tuned to `mode`. Everything other than CALL/ACCEPT arrives here,
    /// multiplexed by the frame's own packet type/subtype.
    fn poll_payload(&mut self, mode: ModeId) -> Option<DecodedFrame>;
}

/// A frame decoded off the control channel, disambiguated between the two
/// framings that can appear there.
pub enum ControlFrame {
    Header(Header),
    Connect(ConnectFrame),
}

/// Classify a frame decoded off the control channel as a CONNECT frame
/// (CALL/ACCEPT, CRC-6 over bytes 1..14) or a normal ARQ control header
/// (CRC-6 over bytes 1..8) — §4.7. The two framings compute CRC-6 over
/// disjoint byte ranges, so trying the header decode first and falling
/// back to the CONNECT decode on CRC/subtype rejection disambiguates them,
/// with a false classification bounded by the 6-bit CRC's 1/64 collision
/// rate.
pub fn classify_control(buf: &[u8]) -> Option<ControlFrame> {
    if let Ok(hdr) = wire::decode_header(buf) {
        return Some(ControlFrame::Header(hdr));
    }
    wire::parse_call(buf).ok().map(ControlFrame::Connect)
}

/// The payload mode the RX dual decoder is currently tuned to. Written by
/// the event-loop thread whenever a MODE_REQ/MODE_ACK exchange lands;
/// read by the RX worker, which honors `consts::DECODER_MODE_COOLDOWN`
/// before actually retuning so it never tears a frame mid-decode — §4.7
/// "decoders re-read the active mode after re-acquiring it."
pub struct ModeState(Mutex<ModeId>);

impl ModeState {
    pub fn new(initial: ModeId) -> ModeState {
        ModeState(Mutex::new(initial))
    }

    pub fn get(&self) -> ModeId {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, mode: ModeId) {
        *self.0.lock().unwrap() = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connect_frame() {
        let frame = wire::build_call(0x12, "PU2UIT", "PU2GNU");
        match classify_control(&frame) {
            Some(ControlFrame::Connect(c)) => {
                assert_eq!(c.session_id, 0x12);
                assert!(!c.is_accept);
            }
            _ => panic!("expected a CONNECT frame"),
        }
    }

    #[test]
    fn classifies_control_header() {
        let frame = wire::build_disconnect(0x12, wire::SNR_UNKNOWN);
        match classify_control(&frame) {
            Some(ControlFrame::Header(h)) => assert_eq!(h.session_id, 0x12),
            _ => panic!("expected a header frame"),
        }
    }

    #[test]
    fn mode_state_round_trips() {
        let s = ModeState::new(ModeId::Datac4);
        assert_eq!(s.get(), ModeId::Datac4);
        s.set(ModeId::Datac1);
        assert_eq!(s.get(), ModeId::Datac1);
    }
}
