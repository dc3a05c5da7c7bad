//! Level 2 — data-flow FSM — §4.5. Active only while `ConnState::Connected`.
//!
//! `DflowState::DataRx` is never dispatched to directly: receiving a DATA
//! frame and deciding whether/how to ACK it happens in one step from
//! `IdleIrs`, so the state that represents "processing a just-arrived
//! frame" never needs its own event-handler — it would never see an event
//! before `idle_irs` already resolved it.

use crate::core::{mode_to_byte, Core};
use crate::event::Event;
use crate::mode::{consts, mode_timing, ModeId};
use crate::session::{DeadlineKind, DflowState, Session};
use crate::time::{Duration, Instant};
use crate::wire;

use super::connection::enter_disconnecting;
use super::{push_control, push_mode_switch, push_payload};

pub fn step(core: &mut Core, ev: &Event, now: Instant) {
    use DflowState::*;
    match core.session.dflow_state {
        IdleIss => idle_iss(core, ev, now),
        DataTx => data_tx(core, ev, now),
        WaitAck => wait_ack(core, ev, now),
        IdleIrs => idle_irs(core, ev, now),
        DataRx => {}
        AckTx => ack_tx(core, ev, now),
        TurnReqTx => turn_req_tx(core, ev, now),
        TurnReqWait => turn_req_wait(core, ev, now),
        TurnAckTx => turn_ack_tx(core, ev, now),
        ModeReqTx => mode_req_tx(core, ev, now),
        ModeReqWait => mode_req_wait(core, ev, now),
        ModeAckTx => mode_ack_tx(core, ev, now),
        KeepaliveTx => keepalive_tx(core, ev, now),
        KeepaliveWait => keepalive_wait(core, ev, now),
    }
}

fn sid(core: &Core) -> u8 {
    core.session.session_id
}

fn in_startup_gate(core: &Core, now: Instant) -> bool {
    now < core.session.startup_deadline && core.session.startup_acks_seen < consts::STARTUP_ACKS_REQUIRED
}

// --- ISS side ---

fn idle_iss(core: &mut Core, ev: &Event, now: Instant) {
    if core.outbound.is_empty() && core.session.peer_has_data && now >= core.session.peer_busy_until {
        begin_turn_handover(core, now);
        return;
    }
    match ev {
        Event::AppDataReady => {
            core.session.tx_backlog_bytes = core.outbound.len();
            if !core.outbound.is_empty() && !in_startup_gate(core, now) {
                send_data_frame(core, now);
            }
        }
        Event::TimerKeepalive => send_keepalive(core, now),
        Event::RxKeepalive { session_id } if *session_id == sid(core) => {
            core.session.last_rx = now;
            let frame = wire::build_keepalive_ack(sid(core), core.local_snr_byte());
            push_control(core, core.session.control_mode, frame.to_vec());
        }
        _ => {}
    }
}

fn send_data_frame(core: &mut Core, now: Instant) {
    let mode = core.session.payload_mode;
    let cap = mode_timing(mode).payload_bytes;
    let chunk = core.outbound.peek(cap);
    core.session.outstanding_len = chunk.len();
    core.session.outstanding_seq = core.session.tx_seq;

    let mut flags = 0u8;
    if core.outbound.len() > chunk.len() {
        flags |= wire::FLAG_HAS_DATA;
    }
    let mut buf = vec![0u8; wire::HEADER_SIZE + chunk.len()];
    wire::build_data(
        &mut buf,
        sid(core),
        core.session.tx_seq,
        core.session.rx_expected.wrapping_sub(1),
        flags,
        core.local_snr_byte(),
        &chunk,
    )
    .expect("buffer sized for the chunk just peeked");
    core.session.tx_retries_left = consts::DATA_RETRIES;
    push_payload(core, mode, buf);
    core.session.enter_dflow_state(DflowState::DataTx);
}

fn data_tx(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::TxStarted { mode } if *mode == core.session.payload_mode => {
            core.timing.record_tx_start(now);
        }
        Event::TxComplete { mode } if *mode == core.session.payload_mode => {
            core.timing
                .record_tx_end(now, (wire::HEADER_SIZE + core.session.outstanding_len) as u64);
            let deadline = now + mode_timing(core.session.payload_mode).ack_timeout;
            core.session.arm(deadline, DeadlineKind::Ack);
            core.session.enter_dflow_state(DflowState::WaitAck);
        }
        _ => {}
    }
}

fn wait_ack(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxAck { session_id, ack_seq, flags, snr_raw, ack_delay_raw }
            if *session_id == sid(core) && *ack_seq == core.session.outstanding_seq =>
        {
            core.session.tx_seq = core.session.tx_seq.wrapping_add(1);
            let _ = core.outbound.drop_front(core.session.outstanding_len);
            core.session.tx_backlog_bytes = core.outbound.len();
            core.session.peer_has_data = *flags & wire::FLAG_HAS_DATA != 0;
            core.session.peer_snr_x10 = (wire::decode_snr(*snr_raw) * 10.0) as i32;
            core.session.mode_downgrade_streak = 0;
            core.session.last_rx = now;
            core.session.keepalive_miss_count = 0;
            if core.session.startup_acks_seen < consts::STARTUP_ACKS_REQUIRED {
                core.session.startup_acks_seen += 1;
            }
            let ack_delay = Duration::from_millis(wire::decode_ack_delay(*ack_delay_raw) as u64);
            core.timing.record_ack_rx(now, ack_delay);
            core.session.disarm();
            core.session.enter_dflow_state(DflowState::IdleIss);
            if !tick_mode_ladder(core, now) && !core.outbound.is_empty() {
                core.event_queue.push(Event::AppDataReady);
            }
        }
        Event::RxData { session_id, seq, flags, snr_raw, payload } if *session_id == sid(core) => {
            core.session.peer_has_data = *flags & wire::FLAG_HAS_DATA != 0;
            core.session.peer_snr_x10 = (wire::decode_snr(*snr_raw) * 10.0) as i32;
            let is_retransmit = *seq == core.session.rx_expected.wrapping_sub(1);
            if *seq == core.session.rx_expected {
                let _ = core.rx_deliver.push_slice(payload);
                core.session.rx_expected = core.session.rx_expected.wrapping_add(1);
                core.timing.record_data_rx(now, payload.len() as u64);
            } else if !is_retransmit {
                // Out-of-order: dropped without ack; we stay in WAIT_ACK for
                // our own outstanding frame and let the peer time out.
            }
        }
        Event::TimerAck => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                core.timing.record_retry();
                core.session.mode_downgrade_streak += 1;
                resend_data_frame(core, now);
            } else {
                enter_disconnecting(core, now);
            }
        }
        _ => {}
    }
}

fn resend_data_frame(core: &mut Core, now: Instant) {
    let mode = core.session.payload_mode;
    let chunk = core.outbound.peek(core.session.outstanding_len);
    let mut flags = 0u8;
    if core.outbound.len() > chunk.len() {
        flags |= wire::FLAG_HAS_DATA;
    }
    let mut buf = vec![0u8; wire::HEADER_SIZE + chunk.len()];
    wire::build_data(
        &mut buf,
        sid(core),
        core.session.outstanding_seq,
        core.session.rx_expected.wrapping_sub(1),
        flags,
        core.local_snr_byte(),
        &chunk,
    )
    .expect("buffer sized for the chunk just peeked");
    push_payload(core, mode, buf);
    core.session.enter_dflow_state(DflowState::DataTx);
}

// --- IRS side ---

fn idle_irs(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxData { session_id, seq, flags, snr_raw, payload } if *session_id == sid(core) => {
            handle_rx_data(core, *seq, *flags, *snr_raw, payload, now);
        }
        Event::RxTurnReq { session_id } if *session_id == sid(core) => {
            let frame = wire::build_turn_ack(sid(core), core.local_snr_byte());
            push_control(core, core.session.control_mode, frame.to_vec());
            core.session.enter_dflow_state(DflowState::TurnAckTx);
        }
        Event::RxModeReq { session_id, mode } if *session_id == sid(core) => {
            handle_rx_mode_req(core, *mode);
        }
        Event::TimerKeepalive => send_keepalive(core, now),
        Event::RxKeepalive { session_id } if *session_id == sid(core) => {
            core.session.last_rx = now;
            let frame = wire::build_keepalive_ack(sid(core), core.local_snr_byte());
            push_control(core, core.session.control_mode, frame.to_vec());
        }
        _ => {}
    }
}

fn handle_rx_data(core: &mut Core, seq: u8, flags: u8, snr_raw: u8, payload: &[u8], now: Instant) {
    core.session.last_rx = now;
    core.session.keepalive_miss_count = 0;
    core.session.peer_has_data = flags & wire::FLAG_HAS_DATA != 0;
    core.session.peer_snr_x10 = (wire::decode_snr(snr_raw) * 10.0) as i32;

    let is_retransmit = seq == core.session.rx_expected.wrapping_sub(1);
    if seq == core.session.rx_expected {
        let _ = core.rx_deliver.push_slice(payload);
        core.session.rx_expected = core.session.rx_expected.wrapping_add(1);
        core.timing.record_data_rx(now, payload.len() as u64);
        send_ack(core, now);
    } else if is_retransmit {
        // Re-ACK the already-delivered frame without redelivering it.
        send_ack(core, now);
    }
    // Any other out-of-order seq is dropped silently, no ACK — §4.5.
}

fn send_ack(core: &mut Core, now: Instant) {
    core.timing.record_ack_tx_start(now);
    let ack_delay_ms = core.timing.current.ack_delay().map(|d| d.as_millis()).unwrap_or(0) as u32;
    let mut flags = 0u8;
    if !core.outbound.is_empty() {
        flags |= wire::FLAG_HAS_DATA;
    }
    let frame = wire::build_ack(
        sid(core),
        core.session.rx_expected.wrapping_sub(1),
        flags,
        core.local_snr_byte(),
        wire::encode_ack_delay(ack_delay_ms),
    );
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.enter_dflow_state(DflowState::AckTx);
}

fn ack_tx(core: &mut Core, ev: &Event, _now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            core.session.enter_dflow_state(DflowState::IdleIrs);
        }
    }
}

// --- Turn handover ---

fn begin_turn_handover(core: &mut Core, _now: Instant) {
    let frame = wire::build_turn_req(sid(core), core.session.rx_expected.wrapping_sub(1), core.local_snr_byte());
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.tx_retries_left = consts::TURN_REQ_RETRIES;
    core.session.enter_dflow_state(DflowState::TurnReqTx);
}

fn resend_turn_req(core: &mut Core) {
    let frame = wire::build_turn_req(sid(core), core.session.rx_expected.wrapping_sub(1), core.local_snr_byte());
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.enter_dflow_state(DflowState::TurnReqTx);
}

fn turn_req_tx(core: &mut Core, ev: &Event, now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            let deadline = now + mode_timing(core.session.control_mode).ack_timeout;
            core.session.arm(deadline, DeadlineKind::Ack);
            core.session.enter_dflow_state(DflowState::TurnReqWait);
        }
    }
}

fn turn_req_wait(core: &mut Core, ev: &Event, _now: Instant) {
    match ev {
        Event::RxTurnAck { session_id } if *session_id == sid(core) => {
            core.session.is_iss = false;
            core.session.peer_has_data = false;
            core.session.disarm();
            core.session.enter_dflow_state(DflowState::IdleIrs);
        }
        Event::TimerAck => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                resend_turn_req(core);
            } else {
                core.session.disarm();
                core.session.enter_dflow_state(DflowState::IdleIss);
            }
        }
        _ => {}
    }
}

fn turn_ack_tx(core: &mut Core, ev: &Event, now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            core.session.is_iss = true;
            core.session.peer_has_data = false;
            core.session.peer_busy_until = now + consts::PEER_PAYLOAD_HOLD;
            core.session.tx_backlog_bytes = core.outbound.len();
            core.session.enter_dflow_state(DflowState::IdleIss);
            core.event_queue.push(Event::AppDataReady);
        }
    }
}

// --- Mode ladder ---

fn compute_candidate(s: &Session) -> Option<ModeId> {
    let snr = s.local_snr_x10 as f32 / 10.0;
    let idx = s.payload_mode.ladder_index().unwrap_or(0);

    if idx > 0 {
        let entry_threshold = if idx == 1 {
            consts::SNR_UPGRADE_DATAC3_DB
        } else {
            consts::SNR_UPGRADE_DATAC1_DB
        };
        if s.mode_downgrade_streak >= consts::DOWNGRADE_TIMEOUT_STREAK || snr < entry_threshold - consts::DOWNGRADE_HYST_DB {
            return Some(ModeId::PAYLOAD_LADDER[idx - 1]);
        }
    }

    if idx + 1 < ModeId::PAYLOAD_LADDER.len() {
        let (next_threshold, mut backlog_min) = if idx == 0 {
            (consts::SNR_UPGRADE_DATAC3_DB, consts::BACKLOG_MIN_DATAC3)
        } else {
            (consts::SNR_UPGRADE_DATAC1_DB, consts::BACKLOG_MIN_DATAC1)
        };
        if s.peer_has_data {
            backlog_min = backlog_min.min(consts::BACKLOG_MIN_BIDIR_UPGRADE);
        }
        if snr >= next_threshold + consts::SNR_HYST_DB && s.tx_backlog_bytes >= backlog_min {
            return Some(ModeId::PAYLOAD_LADDER[idx + 1]);
        }
    }
    None
}

/// Evaluate the ladder and, if hysteresis has settled on a new mode, start a
/// MODE_REQ exchange. Returns `true` if it did (so the caller shouldn't also
/// re-enter plain `IdleIss`).
fn tick_mode_ladder(core: &mut Core, now: Instant) -> bool {
    let candidate = compute_candidate(&core.session);
    if candidate == core.session.pending_upgrade_candidate {
        if candidate.is_some() {
            core.session.mode_upgrade_count += 1;
        }
    } else {
        core.session.pending_upgrade_candidate = candidate;
        core.session.mode_upgrade_count = u32::from(candidate.is_some());
    }

    match candidate {
        Some(c) if c != core.session.payload_mode && core.session.mode_upgrade_count >= consts::MODE_SWITCH_HYST_COUNT => {
            request_mode_switch(core, c, now);
            true
        }
        _ => false,
    }
}

fn request_mode_switch(core: &mut Core, mode: ModeId, _now: Instant) {
    core.session.pending_mode_req = Some(mode);
    let frame = wire::build_mode_req(sid(core), core.local_snr_byte(), mode_to_byte(mode));
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.tx_retries_left = consts::MODE_REQ_RETRIES;
    core.session.enter_dflow_state(DflowState::ModeReqTx);
}

fn mode_req_tx(core: &mut Core, ev: &Event, now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            let deadline = now + mode_timing(core.session.control_mode).ack_timeout;
            core.session.arm(deadline, DeadlineKind::Ack);
            core.session.enter_dflow_state(DflowState::ModeReqWait);
        }
    }
}

fn mode_req_wait(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxModeAck { session_id, mode } if *session_id == sid(core) && Some(*mode) == core.session.pending_mode_req => {
            apply_mode_switch(core, *mode);
            core.session.disarm();
            core.session.enter_dflow_state(DflowState::IdleIss);
        }
        Event::TimerAck => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                if let Some(mode) = core.session.pending_mode_req {
                    let frame = wire::build_mode_req(sid(core), core.local_snr_byte(), mode_to_byte(mode));
                    push_control(core, core.session.control_mode, frame.to_vec());
                    core.session.enter_dflow_state(DflowState::ModeReqTx);
                }
            } else {
                core.session.pending_mode_req = None;
                core.session.disarm();
                core.session.enter_dflow_state(DflowState::IdleIss);
            }
        }
        _ => {
            let _ = now;
        }
    }
}

fn handle_rx_mode_req(core: &mut Core, mode: ModeId) {
    let frame = wire::build_mode_ack(sid(core), core.local_snr_byte(), mode_to_byte(mode));
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.pending_mode_req = Some(mode);
    core.session.enter_dflow_state(DflowState::ModeAckTx);
}

fn mode_ack_tx(core: &mut Core, ev: &Event, _now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            if let Some(m) = core.session.pending_mode_req {
                apply_mode_switch(core, m);
            }
            core.session.enter_dflow_state(DflowState::IdleIrs);
        }
    }
}

fn apply_mode_switch(core: &mut Core, mode: ModeId) {
    core.session.payload_mode = mode;
    core.session.speed_level = mode.ladder_index().unwrap_or(0);
    core.session.pending_mode_req = None;
    core.session.pending_upgrade_candidate = None;
    core.session.mode_upgrade_count = 0;
    core.notices.push(crate::core::Notice::BitrateChanged {
        level: core.session.speed_level,
        bps: crate::core::bitrate_bps(mode),
    });
    push_mode_switch(core, mode);
}

// --- Keepalive ---

/// Arm the keepalive deadline whenever nothing else has a timer pending —
/// §4.5: "after KEEPALIVE_INTERVAL_S with no RX, emit KEEPALIVE". Called
/// after every dispatched event while connected, so entering any idle
/// state (fresh connection, post-ACK, post-turnover) always leaves a
/// keepalive timer armed rather than relying on each transition site to
/// remember to arm one itself.
pub(super) fn ensure_keepalive_armed(core: &mut Core, now: Instant) {
    if core.session.deadline.is_none() {
        let at = core.session.last_rx + consts::KEEPALIVE_INTERVAL;
        core.session.arm(at, DeadlineKind::Keepalive);
        let _ = now;
    }
}

fn send_keepalive(core: &mut Core, now: Instant) {
    if now.saturating_duration_since(core.session.last_rx) < consts::KEEPALIVE_INTERVAL {
        core.session.arm(core.session.last_rx + consts::KEEPALIVE_INTERVAL, DeadlineKind::Keepalive);
        return;
    }
    let frame = wire::build_keepalive(sid(core), core.local_snr_byte());
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.enter_dflow_state(DflowState::KeepaliveTx);
}

fn keepalive_tx(core: &mut Core, ev: &Event, now: Instant) {
    if let Event::TxComplete { mode } = ev {
        if *mode == core.session.control_mode {
            let deadline = now + consts::ACK_GUARD;
            core.session.arm(deadline, DeadlineKind::Keepalive);
            core.session.enter_dflow_state(DflowState::KeepaliveWait);
        }
    }
}

fn keepalive_wait(core: &mut Core, ev: &Event, now: Instant) {
    let return_state = if core.session.is_iss { DflowState::IdleIss } else { DflowState::IdleIrs };
    match ev {
        Event::RxKeepaliveAck { session_id } if *session_id == sid(core) => {
            core.session.keepalive_miss_count = 0;
            core.session.last_rx = now;
            core.session.disarm();
            core.session.enter_dflow_state(return_state);
        }
        Event::TimerKeepalive => {
            core.session.keepalive_miss_count += 1;
            if core.session.keepalive_miss_count >= consts::KEEPALIVE_MISS_LIMIT {
                core.session.disarm();
                core.session.enter_dflow_state(return_state);
                core.event_queue.push(Event::AppDisconnect);
            } else {
                let deadline = now + consts::ACK_GUARD;
                core.session.arm(deadline, DeadlineKind::Keepalive);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionQueue;
    use crate::event::EventQueue;
    use crate::session::{ConnState, Role};
    use std::sync::Arc;

    fn connected_core(role: Role) -> Core {
        let mut c = Core::new(Arc::new(ActionQueue::new(16)), Arc::new(EventQueue::new(16)));
        let _ = c.local_call.push_str("PU2UIT");
        c.new_session(role, 7, Instant::ZERO);
        c.session.is_iss = role == Role::Caller;
        c.session.enter_conn_state(ConnState::Connected, Instant::ZERO);
        c.session.enter_dflow_state(if c.session.is_iss { DflowState::IdleIss } else { DflowState::IdleIrs });
        c
    }

    #[test]
    fn single_frame_gets_acked_and_delivered() {
        let mut c = connected_core(Role::Callee);
        let ev = Event::RxData {
            session_id: 7,
            seq: 0,
            flags: 0,
            snr_raw: 0,
            payload: b"hello".to_vec(),
        };
        step(&mut c, &ev, Instant::ZERO);
        assert_eq!(c.session.dflow_state, DflowState::AckTx);
        assert_eq!(c.session.rx_expected, 1);
        assert_eq!(c.rx_deliver.peek(5), b"hello");
    }

    #[test]
    fn retransmitted_frame_is_reacked_without_redelivery() {
        let mut c = connected_core(Role::Callee);
        let ev = Event::RxData {
            session_id: 7,
            seq: 0,
            flags: 0,
            snr_raw: 0,
            payload: b"hello".to_vec(),
        };
        step(&mut c, &ev, Instant::ZERO);
        step(&mut c, &Event::TxComplete { mode: core_control_mode() }, Instant::from_millis(10));
        assert_eq!(c.session.dflow_state, DflowState::IdleIrs);

        step(&mut c, &ev, Instant::from_millis(20));
        assert_eq!(c.rx_deliver.len(), 5, "duplicate must not be redelivered");
    }

    fn core_control_mode() -> ModeId {
        ModeId::Datac13
    }

    #[test]
    fn out_of_order_frame_is_dropped_without_ack() {
        let mut c = connected_core(Role::Callee);
        let ev = Event::RxData {
            session_id: 7,
            seq: 5,
            flags: 0,
            snr_raw: 0,
            payload: b"x".to_vec(),
        };
        step(&mut c, &ev, Instant::ZERO);
        assert_eq!(c.session.dflow_state, DflowState::IdleIrs);
        assert_eq!(c.rx_deliver.len(), 0);
    }

    #[test]
    fn ack_advances_seq_and_drops_acked_bytes() {
        let mut c = connected_core(Role::Caller);
        c.outbound.push_slice(b"hello world").unwrap();
        c.event_queue.push(Event::AppDataReady);
        let ev = c.event_queue.drain_wait(std::time::Duration::from_millis(1)).remove(0);
        step(&mut c, &ev, Instant::ZERO);
        assert_eq!(c.session.dflow_state, DflowState::DataTx);

        step(&mut c, &Event::TxStarted { mode: ModeId::Datac4 }, Instant::from_millis(10));
        step(&mut c, &Event::TxComplete { mode: ModeId::Datac4 }, Instant::from_millis(20));
        assert_eq!(c.session.dflow_state, DflowState::WaitAck);

        let ack = Event::RxAck {
            session_id: 7,
            ack_seq: 0,
            flags: 0,
            snr_raw: 0,
            ack_delay_raw: 0,
        };
        step(&mut c, &ack, Instant::from_millis(40));
        assert_eq!(c.session.tx_seq, 1);
        assert_eq!(c.outbound.len(), 0);
    }

    #[test]
    fn fresh_data_frame_is_armed_with_full_data_retries() {
        let mut c = connected_core(Role::Caller);
        c.outbound.push_slice(b"hi").unwrap();
        send_data_frame(&mut c, Instant::ZERO);
        assert_eq!(c.session.tx_retries_left, consts::DATA_RETRIES);
    }

    #[test]
    fn ack_timeout_resends_the_same_frame_before_giving_up() {
        let mut c = connected_core(Role::Caller);
        c.outbound.push_slice(b"hi").unwrap();
        send_data_frame(&mut c, Instant::ZERO);
        step(&mut c, &Event::TxComplete { mode: ModeId::Datac4 }, Instant::from_millis(10));
        assert_eq!(c.session.dflow_state, DflowState::WaitAck);

        let retries_before = c.session.tx_retries_left;
        step(&mut c, &Event::TimerAck, Instant::from_millis(20));
        assert_eq!(c.session.tx_retries_left, retries_before - 1);
        assert_eq!(c.session.dflow_state, DflowState::DataTx);
        assert_eq!(c.outbound.len(), 2, "unacked bytes stay queued across a retry");
    }

    #[test]
    fn ack_timeout_retries_then_disconnects_when_exhausted() {
        let mut c = connected_core(Role::Caller);
        c.outbound.push_slice(b"hi").unwrap();
        send_data_frame(&mut c, Instant::ZERO);
        step(&mut c, &Event::TxComplete { mode: ModeId::Datac4 }, Instant::from_millis(10));
        assert_eq!(c.session.dflow_state, DflowState::WaitAck);

        c.session.tx_retries_left = 0;
        step(&mut c, &Event::TimerAck, Instant::from_millis(20));
        assert_eq!(c.session.conn_state, ConnState::Disconnecting);
    }

    #[test]
    fn keepalive_deadline_is_armed_once_idle_after_connect() {
        let mut c = connected_core(Role::Callee);
        c.session.disarm();
        crate::fsm::dispatch(&mut c, Event::RxKeepalive { session_id: 7 }, Instant::from_millis(5));
        let deadline = c.session.deadline.expect("keepalive deadline should be armed once idle");
        assert_eq!(deadline.kind, crate::session::DeadlineKind::Keepalive);
    }

    #[test]
    fn keepalive_miss_limit_triggers_disconnect_request() {
        let mut c = connected_core(Role::Caller);
        c.session.keepalive_miss_count = consts::KEEPALIVE_MISS_LIMIT - 1;
        c.session.enter_dflow_state(DflowState::KeepaliveWait);
        step(&mut c, &Event::TimerKeepalive, Instant::ZERO);
        assert_eq!(c.session.keepalive_miss_count, consts::KEEPALIVE_MISS_LIMIT);
        let drained = c.event_queue.drain_wait(std::time::Duration::from_millis(1));
        assert_eq!(drained, vec![Event::AppDisconnect]);
    }
}
