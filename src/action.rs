//! Action queue — §3, §4.7.
//!
//! The FSM emits actions; the modem TX worker dequeues and executes them.
//! Control frames and mode-switch actions are priority-promoted: the
//! dequeue operation scans forward for the first priority action and swaps
//! it to the head before popping, rather than maintaining two physical
//! queues (matches the source's single-queue-with-scan design).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration as StdDuration;

use crate::mode::ModeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    TxControl { mode: ModeId, frame: Vec<u8> },
    TxPayload { mode: ModeId, frame: Vec<u8> },
    ModeSwitch { mode: ModeId },
}

impl Action {
    fn is_priority(&self) -> bool {
        !matches!(self, Action::TxPayload { .. })
    }
}

pub struct ActionQueue {
    inner: Mutex<ActionQueueInner>,
    not_empty: Condvar,
    capacity: usize,
}

struct ActionQueueInner {
    items: VecDeque<Action>,
    dropped: u64,
}

impl ActionQueue {
    pub fn new(capacity: usize) -> ActionQueue {
        ActionQueue {
            inner: Mutex::new(ActionQueueInner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue an action. Control frames are never dropped by construction
    /// (§7): the FSM only builds them when leaving a state that can't
    /// re-enter it without room, so a full queue here only ever drops a
    /// payload action.
    pub fn push(&self, action: Action) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= self.capacity {
            inner.dropped += 1;
            log::warn!("action queue full ({} cap); dropping newest action", self.capacity);
            return;
        }
        inner.items.push_back(action);
        self.not_empty.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Dequeue the next action to transmit, waiting up to `timeout`.
    /// Scans for the first priority (control/mode-switch) action and
    /// promotes it to the head before popping — §4.7.
    pub fn pop_with_timeout(&self, timeout: StdDuration) -> Option<Action> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, timed_out) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |i| i.items.is_empty())
            .unwrap();
        if timed_out.timed_out() && inner.items.is_empty() {
            return None;
        }
        if let Some(idx) = inner.items.iter().position(|a| a.is_priority()) {
            if idx != 0 {
                let promoted = inner.items.remove(idx).unwrap();
                inner.items.push_front(promoted);
            }
        }
        inner.items.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u8) -> Action {
        Action::TxPayload {
            mode: ModeId::Datac4,
            frame: vec![n],
        }
    }

    fn control() -> Action {
        Action::TxControl {
            mode: ModeId::Datac13,
            frame: vec![0],
        }
    }

    #[test]
    fn control_overtakes_queued_payloads() {
        let q = ActionQueue::new(8);
        q.push(payload(1));
        q.push(payload(2));
        q.push(control());
        let first = q.pop_with_timeout(StdDuration::from_millis(10)).unwrap();
        assert!(matches!(first, Action::TxControl { .. }));
        let second = q.pop_with_timeout(StdDuration::from_millis(10)).unwrap();
        assert_eq!(second, payload(1));
    }

    #[test]
    fn payloads_stay_fifo_among_themselves() {
        let q = ActionQueue::new(8);
        q.push(payload(1));
        q.push(payload(2));
        assert_eq!(q.pop_with_timeout(StdDuration::from_millis(10)), Some(payload(1)));
        assert_eq!(q.pop_with_timeout(StdDuration::from_millis(10)), Some(payload(2)));
    }

    #[test]
    fn overflow_drops_newest() {
        let q = ActionQueue::new(1);
        q.push(payload(1));
        q.push(payload(2));
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.pop_with_timeout(StdDuration::from_millis(10)), Some(payload(1)));
    }
}
