//! Level 1 — connection FSM — §4.4.
//!
//! Six states, table-driven as plain `match` arms over `(ConnState, Event)`.
//! Only this module ever calls `Core::new_session` / `Core::teardown_session`
//! — the data-flow FSM reaches back in through `pub(super) fn
//! enter_disconnecting` when it needs to force a teardown (retry exhaustion,
//! keepalive death) but never constructs or destroys a session itself.

use crate::core::{Core, Notice};
use crate::event::Event;
use crate::mode::{consts, mode_timing, ModeId};
use crate::session::{ConnState, DeadlineKind, Role};
use crate::time::{Duration, Instant};
use crate::wire;

use super::push_control;

pub fn step(core: &mut Core, ev: &Event, now: Instant) {
    use ConnState::*;
    match core.session.conn_state {
        Disconnected => on_disconnected(core, ev, now),
        Listening => on_listening(core, ev, now),
        Calling => on_calling(core, ev, now),
        Accepting => on_accepting(core, ev, now),
        Connected => on_connected(core, ev, now),
        Disconnecting => on_disconnecting(core, ev, now),
    }
}

fn sid(core: &Core) -> u8 {
    core.session.session_id
}

fn on_disconnected(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::AppListen => {
            core.listening = true;
            core.session.enter_conn_state(ConnState::Listening, now);
        }
        Event::AppConnect { remote_call } => start_call(core, remote_call, now),
        _ => {}
    }
}

fn on_listening(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxCall { session_id, remote, local } if *local == core.local_call => {
            core.new_session(Role::Callee, *session_id, now);
            let _ = core.session.remote_call.push_str(remote);
            core.session.listen_after_disconnect = core.listening;
            let frame = wire::build_accept(*session_id, core.local_call.as_str(), remote.as_str());
            push_control(core, ModeId::Datac13, frame.to_vec());
            core.session.tx_retries_left = consts::ACCEPT_RETRIES;
            let deadline = now + mode_timing(ModeId::Datac13).retry_interval;
            core.session.arm(deadline, DeadlineKind::Retry);
            core.session.enter_conn_state(ConnState::Accepting, now);
        }
        Event::RxCall { .. } => {}
        Event::AppStopListen => {
            core.listening = false;
            core.session.enter_conn_state(ConnState::Disconnected, now);
        }
        Event::AppConnect { remote_call } => start_call(core, remote_call, now),
        _ => {}
    }
}

fn on_calling(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxAccept { session_id, remote } if *session_id == sid(core) && *remote == core.session.remote_call => {
            enter_connected(core, Role::Caller, now);
        }
        Event::TimerRetry => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                let frame = wire::build_call(sid(core), core.local_call.as_str(), core.session.remote_call.as_str());
                push_control(core, ModeId::Datac13, frame.to_vec());
                let deadline = now + mode_timing(ModeId::Datac13).retry_interval;
                core.session.arm(deadline, DeadlineKind::Retry);
            } else {
                teardown(core, now, false);
            }
        }
        Event::TimerTimeout => teardown(core, now, false),
        Event::AppDisconnect => teardown(core, now, false),
        _ => {}
    }
}

fn on_accepting(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxAck { session_id, .. } if *session_id == sid(core) => {
            enter_connected(core, Role::Callee, now);
        }
        Event::RxData { session_id, .. } if *session_id == sid(core) => {
            enter_connected(core, Role::Callee, now);
        }
        Event::TimerRetry => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                let frame = wire::build_accept(sid(core), core.local_call.as_str(), core.session.remote_call.as_str());
                push_control(core, ModeId::Datac13, frame.to_vec());
                let deadline = now + mode_timing(ModeId::Datac13).retry_interval;
                core.session.arm(deadline, DeadlineKind::Retry);
            } else {
                let relisten = core.session.listen_after_disconnect;
                teardown(core, now, relisten);
            }
        }
        Event::TimerTimeout => {
            let relisten = core.session.listen_after_disconnect;
            teardown(core, now, relisten);
        }
        Event::AppDisconnect => teardown(core, now, false),
        _ => {}
    }
}

fn on_connected(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxDisconnect { session_id } if *session_id == sid(core) => {
            enter_disconnecting(core, now);
        }
        Event::AppDisconnect => enter_disconnecting(core, now),
        // Everything else — RX_*, TIMER_* — belongs to the data-flow FSM.
        _ => {}
    }
}

fn on_disconnecting(core: &mut Core, ev: &Event, now: Instant) {
    match ev {
        Event::RxDisconnect { session_id } if *session_id == sid(core) => {
            let relisten = core.session.listen_after_disconnect;
            teardown(core, now, relisten);
        }
        Event::TimerRetry => {
            if core.session.tx_retries_left > 0 {
                core.session.tx_retries_left -= 1;
                let frame = wire::build_disconnect(sid(core), core.local_snr_byte());
                push_control(core, core.session.control_mode, frame.to_vec());
                let deadline = now + mode_timing(core.session.control_mode).retry_interval;
                core.session.arm(deadline, DeadlineKind::Retry);
            } else {
                let relisten = core.session.listen_after_disconnect;
                teardown(core, now, relisten);
            }
        }
        Event::TimerTimeout => {
            let relisten = core.session.listen_after_disconnect;
            teardown(core, now, relisten);
        }
        _ => {}
    }
}

fn start_call(core: &mut Core, remote_call: &str, now: Instant) {
    let session_id = core.random_session_id();
    core.new_session(Role::Caller, session_id, now);
    let _ = core.session.remote_call.push_str(remote_call);
    let frame = wire::build_call(session_id, core.local_call.as_str(), remote_call);
    push_control(core, ModeId::Datac13, frame.to_vec());
    core.session.tx_retries_left = consts::CALL_RETRIES;

    let retry = mode_timing(ModeId::Datac13).retry_interval;
    let grace_ms = consts::CHANNEL_GUARD.as_millis() * consts::CONNECT_GRACE_SLOTS as u64;
    let total_ms = retry.as_millis() * (consts::CALL_RETRIES as u64 + 1) + grace_ms;
    core.session.arm(now + Duration::from_millis(total_ms), DeadlineKind::Retry);
    core.session.enter_conn_state(ConnState::Calling, now);
}

fn enter_connected(core: &mut Core, role: Role, now: Instant) {
    use crate::session::DflowState;
    core.session.is_iss = role == Role::Caller;
    core.session.payload_mode = ModeId::Datac4;
    core.session.speed_level = 0;
    core.session.startup_deadline = now + consts::STARTUP_WINDOW;
    core.session.startup_acks_seen = 0;
    core.session.last_rx = now;
    core.session.keepalive_miss_count = 0;
    core.session.disarm();
    core.session.enter_conn_state(ConnState::Connected, now);
    core.session.enter_dflow_state(if core.session.is_iss {
        DflowState::IdleIss
    } else {
        DflowState::IdleIrs
    });
    core.notices.push(Notice::Connected {
        local: core.local_call.as_str().to_string(),
        remote: core.session.remote_call.as_str().to_string(),
    });
    if core.session.is_iss {
        core.event_queue.push(Event::AppDataReady);
    }
}

/// Send the DISCONNECT frame and move to `Disconnecting` — the single path
/// both the connection FSM and the data-flow FSM (retry exhaustion, dead
/// keepalive) use to start tearing a session down gracefully.
pub(super) fn enter_disconnecting(core: &mut Core, now: Instant) {
    let frame = wire::build_disconnect(sid(core), core.local_snr_byte());
    push_control(core, core.session.control_mode, frame.to_vec());
    core.session.tx_retries_left = consts::DISCONNECT_RETRIES;
    let deadline = now + mode_timing(core.session.control_mode).retry_interval;
    core.session.arm(deadline, DeadlineKind::Retry);
    core.session.enter_conn_state(ConnState::Disconnecting, now);
}

fn teardown(core: &mut Core, now: Instant, relisten: bool) {
    core.teardown_session(now);
    core.notices.push(Notice::Disconnected);
    if relisten && core.listening {
        core.session.enter_conn_state(ConnState::Listening, now);
    }
}
