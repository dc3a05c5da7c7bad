//! The single `Core` record owned by the event-loop thread — §9.
//!
//! Collapses what the source kept as cross-referenced globals
//! (`shutdown_`, `status_ctl`, `status_data`, per-session ad-hoc timers)
//! into one struct with a single writer. TCP and modem workers only ever
//! see channel endpoints (`Arc<EventQueue>` / `Arc<ActionQueue>`), never a
//! reference to `Core` itself.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use rand::Rng;

use crate::action::ActionQueue;
use crate::event::{Callsign, Event, EventQueue};
use crate::mode::ModeId;
use crate::session::{ConnState, DeadlineKind, Role, Session};
use crate::storage::ByteRing;
use crate::time::Instant;
use crate::timing::TimingRecorder;
use crate::wire;

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_RX_DELIVER_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 128;
pub const DEFAULT_ACTION_QUEUE_CAPACITY: usize = 256;

/// Notifications the FSM wants surfaced to the TCP control client —
/// §4.8. The bridge drains these and formats the wire lines; the FSM
/// never builds ASCII itself (§9, "never let raw strings leak into the FSM").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected { local: String, remote: String },
    Disconnected,
    BufferChanged(usize),
    BitrateChanged { level: usize, bps: u32 },
    Ptt(bool),
}

pub struct Core {
    pub local_call: Callsign,
    pub listening: bool,
    pub public: bool,
    pub bw_hint: u32,
    pub session: Session,

    pub outbound: ByteRing,
    pub rx_deliver: ByteRing,
    pub timing: TimingRecorder,

    pub action_queue: Arc<ActionQueue>,
    pub event_queue: Arc<EventQueue>,
    pub notices: Vec<Notice>,

    /// Non-zero 7-bit session ids for new CALLs.
    rng: rand::rngs::ThreadRng,
}

impl Core {
    pub fn new(action_queue: Arc<ActionQueue>, event_queue: Arc<EventQueue>) -> Core {
        Core {
            local_call: Callsign::new(),
            listening: false,
            public: false,
            bw_hint: 0,
            session: Session::idle("", Instant::ZERO),
            outbound: ByteRing::with_capacity(DEFAULT_OUTBOUND_CAPACITY),
            rx_deliver: ByteRing::with_capacity(DEFAULT_RX_DELIVER_CAPACITY),
            timing: TimingRecorder::new(),
            action_queue,
            event_queue,
            notices: Vec::new(),
            rng: rand::thread_rng(),
        }
    }

    pub fn random_session_id(&mut self) -> u8 {
        loop {
            let v: u8 = self.rng.gen_range(1..=127);
            if v != 0 {
                return v;
            }
        }
    }

    pub fn teardown_session(&mut self, now: Instant) {
        use crate::storage::Resettable;
        self.session = Session::idle(self.local_call.as_str(), now);
        self.outbound.reset();
        self.rx_deliver.reset();
        self.timing.reset();
    }

    pub fn local_snr_byte(&self) -> u8 {
        if self.session.role == Role::Unset {
            wire::SNR_UNKNOWN
        } else {
            wire::encode_snr(self.session.local_snr_x10 as f32 / 10.0)
        }
    }

    pub fn new_session(&mut self, role: Role, session_id: u8, now: Instant) {
        let mut s = Session::new(role, session_id, self.local_call.as_str(), now);
        s.bw_hint = self.bw_hint;
        self.session = s;
    }
}

/// Compute `mode` from its wire byte form used by MODE_REQ/MODE_ACK payloads.
pub fn mode_from_byte(b: u8) -> Option<ModeId> {
    match b {
        0 => Some(ModeId::Datac13),
        1 => Some(ModeId::Datac4),
        2 => Some(ModeId::Datac3),
        3 => Some(ModeId::Datac1),
        _ => None,
    }
}

pub fn mode_to_byte(m: ModeId) -> u8 {
    match m {
        ModeId::Datac13 => 0,
        ModeId::Datac4 => 1,
        ModeId::Datac3 => 2,
        ModeId::Datac1 => 3,
    }
}

pub(crate) fn bitrate_bps(mode: ModeId) -> u32 {
    let t = mode.timing();
    ((t.payload_bytes as f64 * 8.0) / (t.frame_duration.as_millis() as f64 / 1000.0)) as u32
}

/// Lock-free, copy-on-read snapshot of the fields the TCP control bridge
/// needs to answer `BUFFER`/`SN`/`BITRATE` queries — §5: "Read-only
/// snapshots ... are exposed through atomics ... callers never lock."
/// Published once per event-loop iteration by [`run`]; read from the
/// bridge thread without ever touching `Session`.
#[derive(Default)]
pub struct CoreSnapshot {
    connected: AtomicBool,
    backlog_bytes: AtomicUsize,
    snr_x10: AtomicI32,
    bitrate_level: AtomicUsize,
    bitrate_bps: AtomicU32,
}

impl CoreSnapshot {
    pub fn new() -> Arc<CoreSnapshot> {
        Arc::new(CoreSnapshot::default())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn backlog_bytes(&self) -> usize {
        self.backlog_bytes.load(Ordering::Relaxed)
    }

    pub fn snr_db(&self) -> f32 {
        self.snr_x10.load(Ordering::Relaxed) as f32 / 10.0
    }

    /// `(speed_level, bits_per_second)` for the `BITRATE` status line.
    pub fn bitrate(&self) -> (usize, u32) {
        (
            self.bitrate_level.load(Ordering::Relaxed),
            self.bitrate_bps.load(Ordering::Relaxed),
        )
    }

    fn publish(&self, core: &Core) {
        self.connected.store(core.session.conn_state == ConnState::Connected, Ordering::Relaxed);
        self.backlog_bytes.store(core.outbound.len(), Ordering::Relaxed);
        self.snr_x10.store(core.session.local_snr_x10, Ordering::Relaxed);
        self.bitrate_level.store(core.session.payload_mode.ladder_index().unwrap_or(0), Ordering::Relaxed);
        self.bitrate_bps.store(bitrate_bps(core.session.payload_mode), Ordering::Relaxed);
    }
}

fn deadline_event(kind: DeadlineKind) -> Event {
    match kind {
        DeadlineKind::Retry => Event::TimerRetry,
        DeadlineKind::Timeout => Event::TimerTimeout,
        DeadlineKind::Ack => Event::TimerAck,
        DeadlineKind::PeerBacklog => Event::TimerPeerBacklog,
        DeadlineKind::Keepalive => Event::TimerKeepalive,
    }
}

/// The event loop's own poll ceiling — §4.6 step 1: `min(next deadline,
/// 500ms)`. Bounds how long a `shutdown` request can take to notice.
const LOOP_MAX_WAIT: StdDuration = StdDuration::from_millis(500);

/// Run the single-threaded event loop to completion (until `shutdown` is
/// set) — §4.6. `tcp_ingress` carries raw bytes the TCP data bridge read
/// from its client socket; `rx_egress` carries bytes this loop has
/// delivered to `core.rx_deliver` back out to that same bridge for writing
/// to the client. Both directions cross the bridge boundary as plain byte
/// vectors rather than giving the bridge thread a reference into `Core` —
/// the event-loop thread remains the sole writer of session state (§5, §9).
pub fn run(
    mut core: Core,
    shutdown: Arc<AtomicBool>,
    tcp_ingress: Receiver<Vec<u8>>,
    rx_egress: SyncSender<Vec<u8>>,
    snapshot: Arc<CoreSnapshot>,
    mut now_fn: impl FnMut() -> Instant,
    mut on_notices: impl FnMut(&[Notice]),
) -> Core {
    while !shutdown.load(Ordering::Relaxed) {
        // Step 0 (not in §4.6's numbered list, but how ingress bytes ever
        // reach `outbound`): drain whatever the TCP data bridge queued
        // since the last iteration. A full buffer means "short write" on
        // the bridge side (§7); this loop just logs and drops the chunk
        // rather than block, since the bridge already throttles its own
        // socket reads off `CoreSnapshot::backlog_bytes`.
        while let Ok(chunk) = tcp_ingress.try_recv() {
            let n = chunk.len();
            if core.outbound.push_slice(&chunk).is_ok() {
                core.event_queue.push(Event::AppDataReady);
            } else {
                log::warn!("outbound buffer full; dropping {n} ingress bytes");
            }
        }

        // Step 1+2: wait for the next event, no longer than the session's
        // armed deadline (clamped to 500ms).
        let now = now_fn();
        let wait = crate::fsm::timeout_ms(&core, now)
            .map(StdDuration::from_millis)
            .unwrap_or(LOOP_MAX_WAIT)
            .min(LOOP_MAX_WAIT);
        let events = core.event_queue.drain_wait(wait);

        // Step 3: dispatch every event drained, in arrival order.
        let now = now_fn();
        for ev in events {
            crate::fsm::dispatch(&mut core, ev, now);
        }

        // Step 4: if the armed deadline has passed, synthesize its event.
        let now = now_fn();
        if let Some(deadline) = core.session.deadline {
            if now >= deadline.at {
                crate::fsm::dispatch(&mut core, deadline_event(deadline.kind), now);
            }
        }

        // RX delivery: forward whatever's been handed to `rx_deliver`
        // out to the TCP data bridge. Left in the ring (not dropped) if
        // the bridge's channel is momentarily full.
        if !core.rx_deliver.is_empty() {
            let bytes = core.rx_deliver.peek(core.rx_deliver.len());
            let n = bytes.len();
            if rx_egress.try_send(bytes).is_ok() {
                let _ = core.rx_deliver.drop_front(n);
            }
        }

        snapshot.publish(&core);

        if !core.notices.is_empty() {
            on_notices(&core.notices);
            core.notices.clear();
        }
    }
    core
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn deadline_event_maps_each_kind() {
        assert_eq!(deadline_event(DeadlineKind::Retry), Event::TimerRetry);
        assert_eq!(deadline_event(DeadlineKind::Ack), Event::TimerAck);
        assert_eq!(deadline_event(DeadlineKind::Keepalive), Event::TimerKeepalive);
        assert_eq!(deadline_event(DeadlineKind::Timeout), Event::TimerTimeout);
        assert_eq!(deadline_event(DeadlineKind::PeerBacklog), Event::TimerPeerBacklog);
    }

    #[test]
    fn snapshot_reflects_session_state_after_publish() {
        let mut c = Core::new(Arc::new(ActionQueue::new(4)), Arc::new(EventQueue::new(4)));
        c.new_session(Role::Caller, 3, Instant::ZERO);
        c.session.enter_conn_state(ConnState::Connected, Instant::ZERO);
        c.outbound.push_slice(b"hello").unwrap();
        let snap = CoreSnapshot::new();
        snap.publish(&c);
        assert!(snap.is_connected());
        assert_eq!(snap.backlog_bytes(), 5);
    }

    #[test]
    fn run_drains_ingress_and_delivers_rx_bytes_to_egress() {
        let action_queue = Arc::new(ActionQueue::new(16));
        let event_queue = Arc::new(EventQueue::new(16));
        let mut core = Core::new(action_queue, event_queue.clone());
        let _ = core.local_call.push_str("PU2UIT");
        core.new_session(Role::Caller, 1, Instant::ZERO);
        core.session.enter_conn_state(ConnState::Connected, Instant::ZERO);
        core.rx_deliver.push_slice(b"already delivered").unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ingress_tx, ingress_rx) = mpsc::channel::<Vec<u8>>();
        let (egress_tx, egress_rx) = mpsc::sync_channel::<Vec<u8>>(4);
        let snapshot = CoreSnapshot::new();

        ingress_tx.send(b"abc".to_vec()).unwrap();

        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || {
            run(
                core,
                shutdown_clone,
                ingress_rx,
                egress_tx,
                snapshot,
                || Instant::ZERO,
                |_| {},
            )
        });

        let egressed = egress_rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
        assert_eq!(egressed, b"already delivered");

        shutdown.store(true, Ordering::Relaxed);
        let core = handle.join().unwrap();
        assert_eq!(core.outbound.peek(3), b"abc");
    }
}
