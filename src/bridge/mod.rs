//! TCP control and data reactors — §4.8.
//!
//! Two listening sockets, at most one client each. The control reactor
//! turns `\r`-terminated command lines into [`Event`]s pushed onto the
//! shared [`EventQueue`] (or answers directly from the lock-free
//! [`CoreSnapshot`] for `BUFFER`/`SN`/`BITRATE`), and relays [`Notice`]s the
//! FSM queued for the client. The data reactor forwards raw bytes both
//! directions through the `mpsc` channels `core::run` already expects,
//! throttling its own reads off `CoreSnapshot::backlog_bytes` rather than
//! ever letting `core.outbound` overflow (§7: "the outbound ring never
//! drops bytes silently").
//!
//! Neither reactor ever touches `Core` directly — same boundary the modem
//! workers observe (§5, §9): only the event-loop thread owns session state.

pub mod command;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration as StdDuration, Instant as StdInstant};

use crate::core::{CoreSnapshot, Notice};
use crate::event::{Event, EventQueue};

use command::{parse_command_line, Command};

/// How long `accept()` / line reads block before rechecking `shutdown`.
const POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);
/// `tnc_send_connected`'s hardcoded port literal in the source — kept as a
/// wire-compatibility constant, not derived from `base_port` (Open Question
/// territory the source itself never resolved: see DESIGN.md).
const CONNECTED_PORT_LITERAL: u16 = 2300;

/// Bounded notice relay from the event-loop thread to the control bridge's
/// writer thread. Same mutex+condvar shape as [`EventQueue`]/`ActionQueue`
/// rather than `mpsc::Receiver`, so the writer thread can keep draining it
/// across TCP client reconnects without losing the receiving end.
pub struct NoticeQueue {
    inner: Mutex<std::collections::VecDeque<Notice>>,
    not_empty: Condvar,
}

impl NoticeQueue {
    pub fn new() -> Arc<NoticeQueue> {
        Arc::new(NoticeQueue {
            inner: Mutex::new(std::collections::VecDeque::new()),
            not_empty: Condvar::new(),
        })
    }

    /// Feed everything `core::run` surfaced this iteration. Called from the
    /// event-loop thread via the `on_notices` callback.
    pub fn push_all(&self, notices: &[Notice]) {
        let mut inner = self.inner.lock().unwrap();
        inner.extend(notices.iter().cloned());
        self.not_empty.notify_one();
    }

    fn drain_wait(&self, timeout: StdDuration) -> Vec<Notice> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _timed_out) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |i| i.is_empty())
            .unwrap();
        inner.drain(..).collect()
    }
}

fn notice_line(n: &Notice) -> String {
    match n {
        Notice::Connected { local, remote } => format!("CONNECTED {local} {remote} {CONNECTED_PORT_LITERAL}\r"),
        Notice::Disconnected => "DISCONNECTED\r".to_string(),
        Notice::BufferChanged(n) => format!("BUFFER {n}\r"),
        Notice::BitrateChanged { level, bps } => format!("BITRATE ({level}) {bps} BPS\r"),
        Notice::Ptt(true) => "PTT ON\r".to_string(),
        Notice::Ptt(false) => "PTT OFF\r".to_string(),
    }
}

/// Accept loop for the control socket — one client at a time, §4.8.
pub fn control_reactor(
    listener: TcpListener,
    event_queue: Arc<EventQueue>,
    snapshot: Arc<CoreSnapshot>,
    notices: Arc<NoticeQueue>,
    shutdown: Arc<AtomicBool>,
) {
    listener
        .set_nonblocking(true)
        .expect("control listener must support non-blocking accept");
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("control client connected from {addr}");
                serve_control_client(stream, &event_queue, &snapshot, &notices, &shutdown);
                log::info!("control client disconnected");
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                log::warn!("control accept failed: {e}");
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn serve_control_client(
    stream: TcpStream,
    event_queue: &Arc<EventQueue>,
    snapshot: &Arc<CoreSnapshot>,
    notices: &Arc<NoticeQueue>,
    shutdown: &Arc<AtomicBool>,
) {
    let Ok(writer_half) = stream.try_clone() else {
        log::warn!("failed to clone control socket for the writer thread");
        return;
    };
    let client_gone = Arc::new(AtomicBool::new(false));

    let writer_shutdown = shutdown.clone();
    let writer_gone = client_gone.clone();
    let writer_notices = notices.clone();
    let writer_snapshot = snapshot.clone();
    let writer = std::thread::spawn(move || {
        run_control_writer(writer_half, writer_notices, writer_snapshot, writer_shutdown, writer_gone);
    });

    let _ = stream.set_read_timeout(Some(POLL_INTERVAL));
    let mut reader = BufReader::new(stream.try_clone().unwrap_or(stream));
    let mut line = String::new();
    while !shutdown.load(Ordering::Relaxed) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // client closed the socket
            Ok(_) => {
                for cmd_line in line.split('\r').map(str::trim).filter(|s| !s.is_empty()) {
                    handle_control_line(cmd_line, event_queue, snapshot, reader.get_mut());
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                log::warn!("control read failed: {e}");
                break;
            }
        }
    }
    client_gone.store(true, Ordering::Relaxed);
    let _ = writer.join();
}

fn handle_control_line(line: &str, event_queue: &EventQueue, snapshot: &CoreSnapshot, out: &mut TcpStream) {
    log::info!("control command received: {line}");
    let Some(cmd) = parse_command_line(line) else {
        log::warn!("unknown or malformed control command: {line:?}");
        let _ = out.write_all(b"WRONG\r");
        return;
    };
    match cmd {
        Command::Buffer => {
            let _ = write!(out, "BUFFER {}\r", snapshot.backlog_bytes());
            return;
        }
        Command::Sn => {
            let _ = write!(out, "SN {:.1}\r", snapshot.snr_db());
            return;
        }
        Command::Bitrate => {
            let (level, bps) = snapshot.bitrate();
            let _ = write!(out, "BITRATE ({level}) {bps} BPS\r");
            return;
        }
        Command::P2p => {
            let _ = out.write_all(b"OK\r");
            return;
        }
        Command::MyCall(call) => match crate::event::Callsign::try_from(call.as_str()) {
            Ok(c) => event_queue.push(Event::CtlSetCallsign(c)),
            Err(_) => return drop(out.write_all(b"WRONG\r")),
        },
        Command::ListenOn => event_queue.push(Event::AppListen),
        Command::ListenOff => event_queue.push(Event::AppStopListen),
        Command::PublicOn => event_queue.push(Event::CtlSetPublic(true)),
        Command::PublicOff => event_queue.push(Event::CtlSetPublic(false)),
        Command::Bandwidth(n) => event_queue.push(Event::CtlSetBandwidth(n)),
        Command::Disconnect => event_queue.push(Event::AppDisconnect),
        Command::Connect { dst, .. } => match crate::event::Callsign::try_from(dst.as_str()) {
            Ok(remote_call) => event_queue.push(Event::AppConnect { remote_call }),
            Err(_) => return drop(out.write_all(b"WRONG\r")),
        },
    }
    let _ = out.write_all(b"OK\r");
}

/// Writer half of a control connection: relays FSM notices as they arrive
/// and injects the two bridge-driven timers the source polls for rather
/// than receiving as events — `IAMALIVE` every 60s and a `BUFFER <n>`
/// backlog line whenever the snapshot's value changes since the last tick.
fn run_control_writer(
    mut out: TcpStream,
    notices: Arc<NoticeQueue>,
    snapshot: Arc<CoreSnapshot>,
    shutdown: Arc<AtomicBool>,
    client_gone: Arc<AtomicBool>,
) {
    let mut last_keepalive = StdInstant::now();
    let mut last_buffer_report: Option<usize> = None;
    while !shutdown.load(Ordering::Relaxed) && !client_gone.load(Ordering::Relaxed) {
        for n in notices.drain_wait(StdDuration::from_millis(1000)) {
            if out.write_all(notice_line(&n).as_bytes()).is_err() {
                return;
            }
        }

        if last_keepalive.elapsed() >= crate::mode::consts::IAMALIVE_INTERVAL.as_std() {
            if out.write_all(b"IAMALIVE\r").is_err() {
                return;
            }
            last_keepalive = StdInstant::now();
        }

        let backlog = snapshot.backlog_bytes();
        if last_buffer_report != Some(backlog) {
            if write!(out, "BUFFER {backlog}\r").is_err() {
                return;
            }
            last_buffer_report = Some(backlog);
        }
    }
}

/// Accept loop for the raw-byte data socket — one client at a time, §4.8.
/// Ingress bytes are forwarded to `core::run` over `to_core`; whatever
/// `core::run` delivers out of `rx_deliver` arrives on `from_core` and is
/// written back to the client.
/// Short read timeout so one thread can alternate between draining
/// `from_core` (non-blocking) and reading the socket without a second
/// thread — `from_core` is a single-consumer `mpsc::Receiver` and can't be
/// handed to a spawned thread each time a new client connects without
/// moving it there permanently, so both directions are served from the
/// accept loop's own thread instead (the source's `poll()`-based reactor
/// does the same thing, just with a real multiplexing syscall).
const DATA_READ_TIMEOUT: StdDuration = StdDuration::from_millis(100);

pub fn data_reactor(
    listener: TcpListener,
    to_core: std::sync::mpsc::Sender<Vec<u8>>,
    from_core: std::sync::mpsc::Receiver<Vec<u8>>,
    snapshot: Arc<CoreSnapshot>,
    shutdown: Arc<AtomicBool>,
) {
    listener
        .set_nonblocking(true)
        .expect("data listener must support non-blocking accept");
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("data client connected from {addr}");
                serve_data_client(stream, &to_core, &from_core, &snapshot, &shutdown);
                log::info!("data client disconnected");
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                log::warn!("data accept failed: {e}");
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Backlog level above which the data reactor stops reading from the
/// client socket until `core::run` has drained some of it — §7's ingress
/// backpressure, applied here since the bridge is the only thing that can
/// stop accepting bytes in the first place (the outbound ring itself
/// either takes a whole slice or rejects it, never partially).
const INGRESS_HIGH_WATERMARK: usize = crate::core::DEFAULT_OUTBOUND_CAPACITY - 4096;

fn serve_data_client(
    mut stream: TcpStream,
    to_core: &std::sync::mpsc::Sender<Vec<u8>>,
    from_core: &std::sync::mpsc::Receiver<Vec<u8>>,
    snapshot: &Arc<CoreSnapshot>,
    shutdown: &Arc<AtomicBool>,
) {
    let _ = stream.set_read_timeout(Some(DATA_READ_TIMEOUT));
    let mut buf = [0u8; 4096];
    while !shutdown.load(Ordering::Relaxed) {
        let mut wrote_any = false;
        while let Ok(bytes) = from_core.try_recv() {
            wrote_any = true;
            if stream.write_all(&bytes).is_err() {
                return;
            }
        }

        if snapshot.backlog_bytes() >= INGRESS_HIGH_WATERMARK {
            if !wrote_any {
                std::thread::sleep(DATA_READ_TIMEOUT);
            }
            continue;
        }
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if to_core.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                log::warn!("data read failed: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionQueue;
    use crate::core::Core;

    #[test]
    fn notice_line_matches_wire_format() {
        assert_eq!(notice_line(&Notice::Connected { local: "PU2UIT".into(), remote: "PU2GNU".into() }), "CONNECTED PU2UIT PU2GNU 2300\r");
        assert_eq!(notice_line(&Notice::Disconnected), "DISCONNECTED\r");
        assert_eq!(notice_line(&Notice::BufferChanged(42)), "BUFFER 42\r");
        assert_eq!(notice_line(&Notice::BitrateChanged { level: 2, bps: 1200 }), "BITRATE (2) 1200 BPS\r");
        assert_eq!(notice_line(&Notice::Ptt(true)), "PTT ON\r");
        assert_eq!(notice_line(&Notice::Ptt(false)), "PTT OFF\r");
    }

    #[test]
    fn notice_queue_push_all_then_drain_preserves_order() {
        let q = NoticeQueue::new();
        q.push_all(&[Notice::Ptt(true), Notice::Disconnected]);
        let drained = q.drain_wait(StdDuration::from_millis(10));
        assert_eq!(drained, vec![Notice::Ptt(true), Notice::Disconnected]);
    }

    #[test]
    fn handle_control_line_answers_buffer_from_snapshot_without_touching_core() {
        let (action_queue, event_queue) = (Arc::new(ActionQueue::new(4)), Arc::new(EventQueue::new(4)));
        let core = Core::new(action_queue, event_queue.clone());
        let snapshot = CoreSnapshot::new();
        // No event should be pushed for a snapshot-answered query.
        let (a, mut b) = test_socket_pair();
        handle_control_line("BUFFER", &event_queue, &snapshot, &mut b);
        drop(a);
        assert!(event_queue.drain_wait(StdDuration::from_millis(10)).is_empty());
        let _ = core;
    }

    #[test]
    fn handle_control_line_pushes_event_for_listen_on() {
        let (action_queue, event_queue) = (Arc::new(ActionQueue::new(4)), Arc::new(EventQueue::new(4)));
        let snapshot = CoreSnapshot::new();
        let (a, mut b) = test_socket_pair();
        handle_control_line("LISTEN ON", &event_queue, &snapshot, &mut b);
        drop(a);
        let drained = event_queue.drain_wait(StdDuration::from_millis(10));
        assert_eq!(drained, vec![Event::AppListen]);
        let _ = action_queue;
    }

    #[test]
    fn handle_control_line_rejects_malformed_command() {
        let (action_queue, event_queue) = (Arc::new(ActionQueue::new(4)), Arc::new(EventQueue::new(4)));
        let snapshot = CoreSnapshot::new();
        let (a, mut b) = test_socket_pair();
        handle_control_line("GARBAGE", &event_queue, &snapshot, &mut b);
        drop(a);
        assert!(event_queue.drain_wait(StdDuration::from_millis(10)).is_empty());
        let _ = action_queue;
    }

    /// A connected loopback `TcpStream` pair for exercising `handle_control_line`'s
    /// `out.write_all` path without a real listener.
    fn test_socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).expect("connect loopback client");
        let (server, _) = listener.accept().expect("accept loopback client");
        (client, server)
    }
}
