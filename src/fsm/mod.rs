//! FSM engine — §4.4, §4.5.
//!
//! Two nested finite-state machines, dispatched from the single
//! event-loop thread: Level 1 (connection) and Level 2 (data-flow, active
//! only while `ConnState::Connected` — invariant 1 in §8). Transitions are
//! expressed as plain `match` arms over `(state, event)` rather than
//! pointer-to-function state handlers (§9): the table *is* the match.

mod connection;
mod dataflow;

use crate::action::Action;
use crate::core::Core;
use crate::event::Event;
use crate::mode::ModeId;
use crate::session::ConnState;
use crate::time::Instant;
use crate::wire;

/// Dispatch one event through both FSM levels and return the armed
/// deadline's ms-until-fire for the event loop's next wait computation
/// (`None` if no timer is armed) — §4.6.
pub fn dispatch(core: &mut Core, ev: Event, now: Instant) {
    match ev {
        Event::PttOn { .. } => return core.notices.push(crate::core::Notice::Ptt(true)),
        Event::PttOff { .. } => return core.notices.push(crate::core::Notice::Ptt(false)),
        Event::RxSnrSample { snr_raw } => {
            core.session.local_snr_x10 = (wire::decode_snr(snr_raw) * 10.0) as i32;
            return;
        }
        Event::CtlSetCallsign(call) => return core.local_call = call,
        Event::CtlSetPublic(on) => return core.public = on,
        Event::CtlSetBandwidth(n) => return core.bw_hint = n,
        _ => {}
    }
    connection::step(core, &ev, now);
    if core.session.conn_state == ConnState::Connected {
        dataflow::step(core, &ev, now);
        dataflow::ensure_keepalive_armed(core, now);
    }
}

/// Milliseconds until the event loop must wake for the session's armed
/// deadline, clamped the same way the loop clamps its own poll at 500ms —
/// returns `None` if no timer is armed (`deadline_ms == ∞`, §3 invariant).
pub fn timeout_ms(core: &Core, now: Instant) -> Option<u64> {
    let deadline = core.session.deadline?;
    Some(deadline.at.saturating_duration_since(now).as_millis())
}

fn push_control(core: &mut Core, mode: ModeId, frame: Vec<u8>) {
    core.action_queue.push(Action::TxControl { mode, frame });
}

fn push_mode_switch(core: &mut Core, mode: ModeId) {
    core.action_queue.push(Action::ModeSwitch { mode });
}

fn push_payload(core: &mut Core, mode: ModeId, frame: Vec<u8>) {
    core.action_queue.push(Action::TxPayload { mode, frame });
}
