//! Session model — §3.
//!
//! One `Session` exists per connection lifetime: its fields are reset to a
//! fresh state when the connection FSM leaves `Disconnected`, and reset
//! again on return to it. `Core` owns a single, reused `Session` rather
//! than an `Option<Session>` that's allocated/dropped per connection — the
//! same "persists for the process lifetime, cleared at each session
//! teardown" treatment §3 already specifies for the outbound buffer, action
//! queue, and event queue.

use crate::mode::ModeId;
use crate::time::Instant;
use crate::wire::CALLSIGN_MAX_LEN;

/// Level 1 — connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Listening,
    Calling,
    Accepting,
    Connected,
    Disconnecting,
}

/// Level 2 — data-flow state, only meaningful while `ConnState::Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DflowState {
    IdleIss,
    DataTx,
    WaitAck,
    IdleIrs,
    DataRx,
    AckTx,
    TurnReqTx,
    TurnReqWait,
    TurnAckTx,
    ModeReqTx,
    ModeReqWait,
    ModeAckTx,
    KeepaliveTx,
    KeepaliveWait,
}

/// Caller/callee role, fixed for the session's lifetime. Who is ISS/IRS is
/// tracked separately (`Session::is_iss`) since it changes via TURN exchange
/// without the role itself changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No CALL/ACCEPT has been exchanged yet — the session slot is idle,
    /// `conn_state` is `Disconnected`. Lets `Core` hold a plain `Session`
    /// instead of `Option<Session>` (see module doc).
    Unset,
    Caller,
    Callee,
}

/// The tagged deadline armed on `Session::deadline_ms`. The event loop uses
/// this to know which timer event to synthesize when the deadline expires —
/// replaces the source's scattered `connect_deadline`/`ack_deadline`/
/// `keepalive_deadline` fields (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    Retry,
    Timeout,
    Ack,
    PeerBacklog,
    Keepalive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedDeadline {
    pub at: Instant,
    pub kind: DeadlineKind,
}

pub struct Session {
    pub conn_state: ConnState,
    pub dflow_state: DflowState,
    pub role: Role,
    /// True while this endpoint is the information-sending station.
    pub is_iss: bool,

    pub session_id: u8,
    pub local_call: heapless::String<CALLSIGN_MAX_LEN>,
    pub remote_call: heapless::String<CALLSIGN_MAX_LEN>,

    pub tx_seq: u8,
    pub rx_expected: u8,

    pub payload_mode: ModeId,
    pub control_mode: ModeId,
    pub speed_level: usize,
    pub mode_upgrade_count: u32,
    pub mode_downgrade_streak: u32,

    pub tx_retries_left: u32,
    pub deadline: Option<ArmedDeadline>,
    pub state_enter: Instant,
    pub startup_deadline: Instant,
    pub startup_acks_seen: u32,

    pub peer_has_data: bool,
    pub peer_snr_x10: i32,
    pub local_snr_x10: i32,

    pub tx_backlog_bytes: usize,

    pub disconnect_to_no_client: bool,
    pub listen_after_disconnect: bool,

    pub keepalive_miss_count: u32,
    pub last_rx: Instant,

    /// §6 `BW <n>`: recorded with no behavioural effect (Open Question 2).
    pub bw_hint: u32,

    /// The mode most recently requested via MODE_REQ, awaiting MODE_ACK.
    pub pending_mode_req: Option<ModeId>,
    /// Outstanding DATA frame seq for the current WAIT_ACK cycle.
    pub outstanding_seq: u8,
    /// Payload byte length of the outstanding DATA frame — dropped from
    /// `outbound` once its ACK lands.
    pub outstanding_len: usize,
    pub tx_start: Instant,

    /// Ladder candidate the last evaluation settled on; tracked across
    /// evaluations so `mode_upgrade_count` counts *consecutive* agreement
    /// with the same candidate rather than any upgrade-eligible evaluation.
    pub pending_upgrade_candidate: Option<ModeId>,
    /// Earliest time a fresh TURN_REQ may be issued after taking over as
    /// ISS, so a handover doesn't immediately bounce back.
    pub peer_busy_until: Instant,
}

impl Session {
    pub fn new(role: Role, session_id: u8, local_call: &str, now: Instant) -> Session {
        debug_assert!(session_id & 0x80 == 0, "session_id must be 7-bit");
        Session {
            conn_state: ConnState::Disconnected,
            dflow_state: DflowState::IdleIss,
            role,
            is_iss: role == Role::Caller,
            session_id,
            local_call: {
                let mut s = heapless::String::new();
                let _ = s.push_str(local_call);
                s
            },
            remote_call: heapless::String::new(),
            tx_seq: 0,
            rx_expected: 0,
            payload_mode: ModeId::Datac4,
            control_mode: ModeId::Datac13,
            speed_level: 0,
            mode_upgrade_count: 0,
            mode_downgrade_streak: 0,
            tx_retries_left: 0,
            deadline: None,
            state_enter: now,
            startup_deadline: now,
            startup_acks_seen: 0,
            peer_has_data: false,
            peer_snr_x10: 0,
            local_snr_x10: 0,
            tx_backlog_bytes: 0,
            disconnect_to_no_client: false,
            listen_after_disconnect: false,
            keepalive_miss_count: 0,
            last_rx: now,
            bw_hint: 0,
            pending_mode_req: None,
            outstanding_seq: 0,
            outstanding_len: 0,
            tx_start: now,
            pending_upgrade_candidate: None,
            peer_busy_until: now,
        }
    }

    pub fn arm(&mut self, at: Instant, kind: DeadlineKind) {
        self.deadline = Some(ArmedDeadline { at, kind });
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn enter_conn_state(&mut self, state: ConnState, now: Instant) {
        self.conn_state = state;
        self.state_enter = now;
    }

    pub fn enter_dflow_state(&mut self, state: DflowState) {
        self.dflow_state = state;
    }

    /// An idle, reusable slot — the state `Core` holds between connections.
    pub fn idle(local_call: &str, now: Instant) -> Session {
        Session::new(Role::Unset, 0, local_call, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_disconnected_with_empty_remote() {
        let s = Session::new(Role::Caller, 0x12, "PU2UIT", Instant::ZERO);
        assert_eq!(s.conn_state, ConnState::Disconnected);
        assert!(s.remote_call.is_empty());
        assert_eq!(s.payload_mode, ModeId::Datac4);
        assert!(s.is_iss);
    }

    #[test]
    fn callee_starts_as_irs() {
        let s = Session::new(Role::Callee, 0x12, "PU2GNU", Instant::ZERO);
        assert!(!s.is_iss);
    }

    #[test]
    fn idle_slot_has_unset_role_and_is_not_iss() {
        let s = Session::idle("PU2UIT", Instant::ZERO);
        assert_eq!(s.role, Role::Unset);
        assert!(!s.is_iss);
    }
}
