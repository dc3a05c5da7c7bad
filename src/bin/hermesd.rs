//! `hermesd` — the process that hosts one HERMES core.
//!
//! Wiring only: parse CLI flags, init logging, build the shared queues and
//! `Core`, spawn the TX/RX modem workers and the two TCP bridge reactors,
//! then run the event loop on the main thread until `Ctrl-C`. Mirrors the
//! teacher's thin `src/bin/shell.rs` (`env_logger::init(); run(); Ok(())`)
//! scaled up to HERMES's several threads.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use hermes::action::ActionQueue;
use hermes::bridge::{control_reactor, data_reactor, NoticeQueue};
use hermes::config::{self, Action, Config};
use hermes::core::{Core, CoreSnapshot};
use hermes::error::ModemError;
use hermes::event::EventQueue;
use hermes::logging;
use hermes::mode::ModeId;
use hermes::modem::worker::{rx_worker, tx_worker};
use hermes::modem::{AudioBackend, DecodedFrame, ModeState};
use hermes::time::Instant;

const EVENT_QUEUE_CAPACITY: usize = hermes::core::DEFAULT_EVENT_QUEUE_CAPACITY;
const ACTION_QUEUE_CAPACITY: usize = hermes::core::DEFAULT_ACTION_QUEUE_CAPACITY;
const DATA_CHANNEL_CAPACITY: usize = 64;

/// `hermes::time::Instant` is epoch-free milliseconds (tests seed it from a
/// tick counter, §"Monotonic milliseconds" doc on `time.rs`); this process
/// anchors it to the moment `hermesd` started.
fn wall_clock(start: std::time::Instant) -> impl FnMut() -> Instant {
    move || Instant::from_millis(start.elapsed().as_millis() as u64)
}

/// Real soundcard/FEC-OFDM modem I/O is an external collaborator (spec §1
/// "OUT OF SCOPE ... only their interfaces matter") — this crate implements
/// the [`AudioBackend`] boundary, not a concrete backend. `NoHardware`
/// stands in until a real backend is linked in: every transmit fails
/// immediately (fatal to the TX worker, same as any other modem failure,
/// §7) and no frames are ever decoded. `-i`/`-o`/`-x`/`-k` are parsed and
/// logged but otherwise unused until that backend exists.
struct NoHardware;

impl AudioBackend for NoHardware {
    fn transmit(&mut self, _mode: ModeId, _frame: &[u8]) -> Result<(), ModemError> {
        Err(ModemError::OpenFailed("no audio backend linked into this build".into()))
    }

    fn poll_control(&mut self) -> Option<DecodedFrame> {
        None
    }

    fn poll_payload(&mut self, _mode: ModeId) -> Option<DecodedFrame> {
        None
    }
}

fn list_modes() {
    for m in [ModeId::Datac13, ModeId::Datac4, ModeId::Datac3, ModeId::Datac1] {
        let t = m.timing();
        println!("{:<8} payload_bytes={:<4} frame_duration={:?}", m.name(), t.payload_bytes, t.frame_duration);
    }
}

fn list_soundcards() {
    // Soundcard enumeration belongs to the external audio backend (spec
    // §1); nothing to enumerate without one linked in.
    println!("no audio backend linked into this build; no soundcards to list");
}

#[cfg(target_os = "linux")]
fn apply_cpu_affinity(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            log::warn!("sched_setaffinity({cpu}) failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_cpu_affinity(cpu: usize) {
    log::warn!("-c {cpu}: CPU affinity is not supported on this platform, ignoring");
}

fn run_server(cfg: Config) -> std::io::Result<()> {
    logging::init(&cfg);
    if let Some(cpu) = cfg.cpu_affinity {
        apply_cpu_affinity(cpu);
    }
    log::info!(
        "hermesd starting: base_port={} broadcast_port={} start_mode={}",
        cfg.base_port,
        cfg.broadcast_port,
        cfg.start_mode.name()
    );

    let action_queue = Arc::new(ActionQueue::new(ACTION_QUEUE_CAPACITY));
    let event_queue = Arc::new(EventQueue::new(EVENT_QUEUE_CAPACITY));
    let mode_state = Arc::new(ModeState::new(cfg.start_mode));
    let snapshot = CoreSnapshot::new();
    let notices = NoticeQueue::new();
    let shutdown = Arc::new(AtomicBool::new(false));

    let core = Core::new(action_queue.clone(), event_queue.clone());
    let process_start = std::time::Instant::now();

    let (data_ingress_tx, data_ingress_rx) = mpsc::channel::<Vec<u8>>();
    let (data_egress_tx, data_egress_rx) = mpsc::sync_channel::<Vec<u8>>(DATA_CHANNEL_CAPACITY);

    let control_listener = TcpListener::bind(("0.0.0.0", cfg.base_port))?;
    let data_listener = TcpListener::bind(("0.0.0.0", cfg.base_port + 1))?;

    let (tx_backend, rx_backend) = (NoHardware, NoHardware);

    let tx_handle = {
        let action_queue = action_queue.clone();
        let event_queue = event_queue.clone();
        let mode_state = mode_state.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || tx_worker(tx_backend, action_queue, event_queue, mode_state, shutdown))
    };
    let rx_handle = {
        let event_queue = event_queue.clone();
        let mode_state = mode_state.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || rx_worker(rx_backend, event_queue, mode_state, shutdown, wall_clock(process_start)))
    };

    let control_handle = {
        let event_queue = event_queue.clone();
        let snapshot = snapshot.clone();
        let notices = notices.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || control_reactor(control_listener, event_queue, snapshot, notices, shutdown))
    };
    let data_handle = {
        let snapshot = snapshot.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || data_reactor(data_listener, data_ingress_tx, data_egress_rx, snapshot, shutdown))
    };

    let shutdown_for_ctrlc = shutdown.clone();
    let _ = ctrlc_handler(move || shutdown_for_ctrlc.store(true, Ordering::Relaxed));

    let snapshot_for_loop = snapshot.clone();
    let notices_for_loop = notices.clone();
    let event_loop_shutdown = shutdown.clone();
    hermes::core::run(
        core,
        event_loop_shutdown,
        data_ingress_rx,
        data_egress_tx,
        snapshot_for_loop,
        wall_clock(process_start),
        |ns| notices_for_loop.push_all(ns),
    );

    // Reverse dependency order per spec §4.8: TCP reactors, then modem
    // workers. Each thread observes `shutdown` at its own poll interval.
    shutdown.store(true, Ordering::Relaxed);
    let _ = control_handle.join();
    let _ = data_handle.join();
    let _ = tx_handle.join();
    let _ = rx_handle.join();

    Ok(())
}

/// Best-effort `SIGINT` hook so `shutdown` gets set on `Ctrl-C` without
/// pulling in a signal-handling crate the rest of the stack doesn't use;
/// `libc::signal` is already a dependency surface via the teacher's own
/// `phy/sys` module.
fn ctrlc_handler(on_interrupt: impl Fn() + Send + Sync + 'static) -> Result<(), &'static str> {
    static HANDLER: std::sync::OnceLock<Box<dyn Fn() + Send + Sync>> = std::sync::OnceLock::new();
    HANDLER
        .set(Box::new(move || on_interrupt()))
        .map_err(|_| "ctrlc handler already installed")?;

    extern "C" fn dispatch(_sig: libc::c_int) {
        if let Some(f) = HANDLER.get() {
            f();
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, dispatch as libc::sighandler_t);
    }
    Ok(())
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match config::parse(&args) {
        Ok(Action::Serve(cfg)) => run_server(*cfg),
        Ok(Action::ListModes) => {
            list_modes();
            Ok(())
        }
        Ok(Action::ListSoundcards) => {
            list_soundcards();
            Ok(())
        }
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    }
}
