//! Event variants and the bounded event queue — §4.3, §3.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration as StdDuration;

use crate::mode::ModeId;
use crate::wire::CALLSIGN_MAX_LEN;

pub type Callsign = heapless::String<CALLSIGN_MAX_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // --- App events ---
    AppListen,
    AppStopListen,
    AppConnect { remote_call: Callsign },
    AppDisconnect,
    AppDataReady,

    // --- TCP control-bridge events (§4.8) ---
    /// `MYCALL <call>` — mutates `Core::local_call` directly; no FSM
    /// transition of its own, same early-return treatment as `PttOn`/`Off`.
    CtlSetCallsign(Callsign),
    /// `PUBLIC ON|OFF`.
    CtlSetPublic(bool),
    /// `BW <n>` — recorded with no behavioural effect (Open Question 2).
    CtlSetBandwidth(u32),

    // --- RX events ---
    RxCall { session_id: u8, remote: Callsign, local: Callsign },
    RxAccept { session_id: u8, remote: Callsign },
    RxAck { session_id: u8, ack_seq: u8, flags: u8, snr_raw: u8, ack_delay_raw: u8 },
    RxData { session_id: u8, seq: u8, flags: u8, snr_raw: u8, payload: Vec<u8> },
    RxDisconnect { session_id: u8 },
    RxTurnReq { session_id: u8 },
    RxTurnAck { session_id: u8 },
    RxModeReq { session_id: u8, mode: ModeId },
    RxModeAck { session_id: u8, mode: ModeId },
    RxKeepalive { session_id: u8 },
    RxKeepaliveAck { session_id: u8 },

    // --- Timer events ---
    TimerRetry,
    TimerTimeout,
    TimerAck,
    TimerPeerBacklog,
    TimerKeepalive,

    // --- Modem events ---
    TxStarted { mode: ModeId },
    TxComplete { mode: ModeId },
    PttOn { mode: ModeId },
    PttOff { mode: ModeId },
    /// The codec's own measured receive SNR for the frame about to be
    /// dispatched — pushed by the RX worker immediately ahead of the
    /// decoded event so `local_snr_x10` is current before any mode-ladder
    /// evaluation or outgoing-header encoding sees it.
    RxSnrSample { snr_raw: u8 },
}

/// Bounded FIFO, capacity 64-128 per §3. Producers never block: on overflow
/// the newest event is dropped and a counter incremented (§4.6, §7).
pub struct EventQueue {
    inner: Mutex<EventQueueInner>,
    not_empty: Condvar,
    capacity: usize,
}

struct EventQueueInner {
    items: VecDeque<Event>,
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> EventQueue {
        EventQueue {
            inner: Mutex::new(EventQueueInner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push an event; drops the newest event and counts it if full. Never blocks.
    pub fn push(&self, ev: Event) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= self.capacity {
            inner.dropped += 1;
            log::warn!("event queue full ({} cap); dropping newest event", self.capacity);
            return;
        }
        inner.items.push_back(ev);
        self.not_empty.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Drain up to `self.capacity` pending events, blocking up to `timeout`
    /// if the queue is currently empty. Returns an empty vec on timeout.
    pub fn drain_wait(&self, timeout: StdDuration) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _timed_out) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |i| i.items.is_empty())
            .unwrap();
        inner.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_preserves_arrival_order() {
        let q = EventQueue::new(4);
        q.push(Event::AppListen);
        q.push(Event::AppStopListen);
        let drained = q.drain_wait(StdDuration::from_millis(10));
        assert_eq!(drained, vec![Event::AppListen, Event::AppStopListen]);
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let q = EventQueue::new(1);
        q.push(Event::AppListen);
        q.push(Event::AppStopListen);
        assert_eq!(q.dropped_count(), 1);
        let drained = q.drain_wait(StdDuration::from_millis(10));
        assert_eq!(drained, vec![Event::AppListen]);
    }

    #[test]
    fn drain_on_empty_queue_times_out_with_nothing() {
        let q = EventQueue::new(4);
        let drained = q.drain_wait(StdDuration::from_millis(5));
        assert!(drained.is_empty());
    }
}
