//! TX/RX modem workers — §4.7.
//!
//! The TX worker dequeues actions, brackets the send with PTT_ON/PTT_OFF
//! and TX_STARTED/TX_COMPLETE events, and treats a failed `transmit` as
//! fatal (no TX_COMPLETE follows — the ACK-timeout retry logic on the
//! event-loop side converts that silence into a standard teardown). The RX
//! worker polls the two persistent decoders — control (fixed DATAC13) and
//! payload (the currently negotiated mode) — translating whatever they
//! decode into FSM events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use crate::action::{Action, ActionQueue};
use crate::event::{Callsign, Event, EventQueue};
use crate::mode::{consts, ModeId};
use crate::modem::{classify_control, AudioBackend, ControlFrame, DecodedFrame, ModeState};
use crate::time::Instant;
use crate::wire::{self, PacketType, Subtype};

/// Poll interval for both workers when there's nothing to do. Short enough
/// that `shutdown` is noticed promptly without busy-spinning.
const IDLE_POLL: StdDuration = StdDuration::from_millis(10);

pub fn tx_worker<B: AudioBackend>(
    mut backend: B,
    action_queue: Arc<ActionQueue>,
    event_queue: Arc<EventQueue>,
    mode_state: Arc<ModeState>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let Some(action) = action_queue.pop_with_timeout(StdDuration::from_millis(100)) else {
            continue;
        };
        let (mode, frame) = match action {
            Action::ModeSwitch { mode } => {
                mode_state.set(mode);
                continue;
            }
            Action::TxControl { mode, frame } => (mode, frame),
            Action::TxPayload { mode, frame } => (mode, frame),
        };

        event_queue.push(Event::PttOn { mode });
        event_queue.push(Event::TxStarted { mode });
        match backend.transmit(mode, &frame) {
            Ok(()) => {
                event_queue.push(Event::PttOff { mode });
                event_queue.push(Event::TxComplete { mode });
            }
            Err(e) => {
                log::error!("modem transmit failed, worker exiting: {e}");
                return;
            }
        }
    }
}

pub fn rx_worker<B: AudioBackend>(
    mut backend: B,
    event_queue: Arc<EventQueue>,
    mode_state: Arc<ModeState>,
    shutdown: Arc<AtomicBool>,
    mut now_fn: impl FnMut() -> Instant,
) {
    let mut tuned_mode = mode_state.get();
    let mut tuned_since = now_fn();
    while !shutdown.load(Ordering::Relaxed) {
        let mut did_work = false;
        if let Some(frame) = backend.poll_control() {
            did_work = true;
            dispatch_control_frame(&frame, &event_queue);
        }

        let now = now_fn();
        let wanted = mode_state.get();
        if wanted != tuned_mode && now.saturating_duration_since(tuned_since) >= consts::DECODER_MODE_COOLDOWN {
            tuned_mode = wanted;
            tuned_since = now;
        }
        if let Some(frame) = backend.poll_payload(tuned_mode) {
            did_work = true;
            dispatch_payload_frame(&frame, &event_queue);
        }

        if !did_work {
            thread::sleep(IDLE_POLL);
        }
    }
}

fn to_callsign(s: &str) -> Option<Callsign> {
    Callsign::try_from(s).ok()
}

fn dispatch_control_frame(frame: &DecodedFrame, event_queue: &EventQueue) {
    let Some(parsed) = classify_control(&frame.bytes) else {
        return;
    };
    event_queue.push(Event::RxSnrSample { snr_raw: frame.snr_raw });
    match parsed {
        ControlFrame::Connect(c) => {
            let (Some(src), Some(dst)) = (to_callsign(&c.src), to_callsign(&c.dst)) else {
                return;
            };
            if c.is_accept {
                event_queue.push(Event::RxAccept {
                    session_id: c.session_id,
                    remote: src,
                });
            } else {
                event_queue.push(Event::RxCall {
                    session_id: c.session_id,
                    remote: src,
                    local: dst,
                });
            }
        }
        ControlFrame::Header(h) => {
            let ev = match h.subtype {
                Subtype::Ack => Event::RxAck {
                    session_id: h.session_id,
                    ack_seq: h.rx_ack_seq,
                    flags: h.flags,
                    snr_raw: h.snr_raw,
                    ack_delay_raw: h.ack_delay_raw,
                },
                Subtype::Disconnect => Event::RxDisconnect { session_id: h.session_id },
                Subtype::Keepalive => Event::RxKeepalive { session_id: h.session_id },
                Subtype::KeepaliveAck => Event::RxKeepaliveAck { session_id: h.session_id },
                Subtype::TurnReq => Event::RxTurnReq { session_id: h.session_id },
                Subtype::TurnAck => Event::RxTurnAck { session_id: h.session_id },
                Subtype::ModeReq | Subtype::ModeAck => {
                    let Some(&mode_byte) = frame.bytes.get(wire::HEADER_SIZE) else {
                        return;
                    };
                    let Some(mode) = crate::core::mode_from_byte(mode_byte) else {
                        return;
                    };
                    if h.subtype == Subtype::ModeReq {
                        Event::RxModeReq { session_id: h.session_id, mode }
                    } else {
                        Event::RxModeAck { session_id: h.session_id, mode }
                    }
                }
                // DATA never arrives on the control decoder (it's only ever
                // transmitted at the current payload mode); a spurious one
                // is dropped rather than mis-delivered.
                Subtype::Data => return,
            };
            event_queue.push(ev);
        }
    }
}

fn dispatch_payload_frame(frame: &DecodedFrame, event_queue: &EventQueue) {
    let Ok(hdr) = wire::decode_header(&frame.bytes) else {
        return;
    };
    if hdr.packet_type != PacketType::ArqData || hdr.subtype != Subtype::Data {
        return;
    }
    event_queue.push(Event::RxSnrSample { snr_raw: frame.snr_raw });
    event_queue.push(Event::RxData {
        session_id: hdr.session_id,
        seq: hdr.tx_seq,
        flags: hdr.flags,
        snr_raw: hdr.snr_raw,
        payload: frame.bytes[wire::HEADER_SIZE..].to_vec(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::Loopback;

    fn queues() -> (Arc<ActionQueue>, Arc<EventQueue>) {
        (Arc::new(ActionQueue::new(16)), Arc::new(EventQueue::new(16)))
    }

    #[test]
    fn tx_worker_brackets_send_with_ptt_and_tx_events() {
        let (action_queue, event_queue) = queues();
        let (backend, _peer) = Loopback::pair();
        let shutdown = Arc::new(AtomicBool::new(false));

        action_queue.push(Action::TxControl {
            mode: ModeId::Datac13,
            frame: wire::build_disconnect(1, wire::SNR_UNKNOWN).to_vec(),
        });
        let sd = shutdown.clone();
        let eq = event_queue.clone();
        let ms = Arc::new(ModeState::new(ModeId::Datac13));
        let handle = thread::spawn(move || tx_worker(backend, action_queue, eq, ms, sd));

        thread::sleep(StdDuration::from_millis(50));
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let drained = event_queue.drain_wait(StdDuration::from_millis(10));
        assert_eq!(
            drained,
            vec![
                Event::PttOn { mode: ModeId::Datac13 },
                Event::TxStarted { mode: ModeId::Datac13 },
                Event::PttOff { mode: ModeId::Datac13 },
                Event::TxComplete { mode: ModeId::Datac13 },
            ]
        );
    }

    #[test]
    fn dispatch_control_frame_recognizes_call() {
        let (_action_queue, event_queue) = queues();
        let frame = DecodedFrame {
            bytes: wire::build_call(9, "PU2UIT", "PU2GNU").to_vec(),
            snr_raw: wire::encode_snr(3.0),
        };
        dispatch_control_frame(&frame, &event_queue);
        let drained = event_queue.drain_wait(StdDuration::from_millis(10));
        assert!(matches!(drained[0], Event::RxSnrSample { .. }));
        match &drained[1] {
            Event::RxCall { session_id, remote, local } => {
                assert_eq!(*session_id, 9);
                assert_eq!(remote.as_str(), "PU2UIT");
                assert_eq!(local.as_str(), "PU2GNU");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn dispatch_payload_frame_recognizes_data() {
        let (_action_queue, event_queue) = queues();
        let mut buf = vec![0u8; wire::HEADER_SIZE + 3];
        wire::build_data(&mut buf, 9, 2, 1, 0, wire::SNR_UNKNOWN, &[1, 2, 3]).unwrap();
        let frame = DecodedFrame { bytes: buf, snr_raw: wire::SNR_UNKNOWN };
        dispatch_payload_frame(&frame, &event_queue);
        let drained = event_queue.drain_wait(StdDuration::from_millis(10));
        match &drained[1] {
            Event::RxData { session_id, seq, payload, .. } => {
                assert_eq!(*session_id, 9);
                assert_eq!(*seq, 2);
                assert_eq!(payload, &vec![1, 2, 3]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn mode_req_payload_byte_is_decoded_into_the_event() {
        let (_action_queue, event_queue) = queues();
        let frame = DecodedFrame {
            bytes: wire::build_mode_req(4, wire::SNR_UNKNOWN, crate::core::mode_to_byte(ModeId::Datac1)).to_vec(),
            snr_raw: wire::SNR_UNKNOWN,
        };
        dispatch_control_frame(&frame, &event_queue);
        let drained = event_queue.drain_wait(StdDuration::from_millis(10));
        match &drained[1] {
            Event::RxModeReq { session_id, mode } => {
                assert_eq!(*session_id, 4);
                assert_eq!(*mode, ModeId::Datac1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
