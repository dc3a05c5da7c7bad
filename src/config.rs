//! CLI flag parsing — §6.
//!
//! `getopts` in the same style the teacher's `examples/ping.rs` uses it
//! (`Options::new`, `opts.optopt`/`optflag`, `opts.parse`): build an
//! `Options` table, parse `env::args()`, and translate matches into a typed
//! [`Config`]. No positional arguments are used — every flag here is a
//! named switch, unlike the teacher's tun/tap device path argument.

use getopts::Options;

use crate::mode::ModeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBackendKind {
    Alsa,
    Pulse,
    DSound,
    Wasapi,
    Oss,
    CoreAudio,
    Shm,
}

impl AudioBackendKind {
    fn parse(s: &str) -> Option<AudioBackendKind> {
        match s {
            "alsa" => Some(AudioBackendKind::Alsa),
            "pulse" => Some(AudioBackendKind::Pulse),
            "dsound" => Some(AudioBackendKind::DSound),
            "wasapi" => Some(AudioBackendKind::Wasapi),
            "oss" => Some(AudioBackendKind::Oss),
            "coreaudio" => Some(AudioBackendKind::CoreAudio),
            "shm" => Some(AudioBackendKind::Shm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureChannel {
    Left,
    Right,
    Stereo,
}

impl CaptureChannel {
    fn parse(s: &str) -> Option<CaptureChannel> {
        match s {
            "left" => Some(CaptureChannel::Left),
            "right" => Some(CaptureChannel::Right),
            "stereo" => Some(CaptureChannel::Stereo),
            _ => None,
        }
    }
}

/// What `hermesd` should do once flags are parsed — most runs `Serve`, but
/// `-l`/`-z` are one-shot informational queries that exit before any socket
/// or audio device is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Serve(Box<Config>),
    ListModes,
    ListSoundcards,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub backend: Option<AudioBackendKind>,
    pub base_port: u16,
    pub broadcast_port: u16,
    pub start_mode: ModeId,
    pub cpu_affinity: Option<usize>,
    pub verbose: bool,
    pub modem_verbosity: u8,
    pub capture_channel: CaptureChannel,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            input_device: None,
            output_device: None,
            backend: None,
            base_port: DEFAULT_BASE_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            start_mode: ModeId::Datac4,
            cpu_affinity: None,
            verbose: false,
            modem_verbosity: 0,
            capture_channel: CaptureChannel::Stereo,
        }
    }
}

pub const DEFAULT_BASE_PORT: u16 = 7522;
pub const DEFAULT_BROADCAST_PORT: u16 = 7523;

fn mode_by_index(idx: usize) -> Option<ModeId> {
    match idx {
        0 => Some(ModeId::Datac13),
        1 => Some(ModeId::Datac4),
        2 => Some(ModeId::Datac3),
        3 => Some(ModeId::Datac1),
        _ => None,
    }
}

fn build_options() -> Options {
    let mut opts = Options::new();
    opts.optopt("i", "", "input audio device identifier", "DEVICE");
    opts.optopt("o", "", "output audio device identifier", "DEVICE");
    opts.optopt("x", "", "audio backend (alsa|pulse|dsound|wasapi|oss|coreaudio|shm)", "BACKEND");
    opts.optopt("p", "", "control TCP base port (data is base_port+1)", "PORT");
    opts.optopt("b", "", "KISS broadcast TCP port", "PORT");
    opts.optopt("m", "", "starting payload mode index (0-3)", "INDEX");
    opts.optopt("c", "", "CPU affinity", "CPU");
    opts.optflag("l", "", "list available modes and exit");
    opts.optflag("z", "", "list available soundcards and exit");
    opts.optflag("v", "", "verbose logging");
    opts.optopt("f", "", "modem verbosity (0-3)", "LEVEL");
    opts.optopt("k", "", "capture channel (left|right|stereo)", "CHANNEL");
    opts.optflag("h", "help", "print this help and exit");
    opts
}

/// Parse `args` (typically `std::env::args().skip(1).collect()`) into an
/// [`Action`]. Returns `Err` with a ready-to-print usage/error message on
/// any malformed flag — `hermesd::main` prints it to stderr and exits
/// nonzero rather than panicking (§7: CLI misuse is not a core error).
pub fn parse(args: &[String]) -> Result<Action, String> {
    let opts = build_options();
    let matches = opts.parse(args).map_err(|e| format!("{e}\n{}", opts.usage("usage: hermesd [options]")))?;

    if matches.opt_present("h") {
        return Err(opts.usage("usage: hermesd [options]"));
    }
    if matches.opt_present("l") {
        return Ok(Action::ListModes);
    }
    if matches.opt_present("z") {
        return Ok(Action::ListSoundcards);
    }

    let mut cfg = Config::default();
    cfg.input_device = matches.opt_str("i");
    cfg.output_device = matches.opt_str("o");

    if let Some(x) = matches.opt_str("x") {
        cfg.backend = Some(AudioBackendKind::parse(&x).ok_or_else(|| format!("unknown audio backend: {x}"))?);
    }
    if let Some(p) = matches.opt_str("p") {
        cfg.base_port = p.parse().map_err(|_| format!("invalid -p port: {p}"))?;
    }
    if let Some(b) = matches.opt_str("b") {
        cfg.broadcast_port = b.parse().map_err(|_| format!("invalid -b port: {b}"))?;
    }
    if let Some(m) = matches.opt_str("m") {
        let idx: usize = m.parse().map_err(|_| format!("invalid -m mode index: {m}"))?;
        cfg.start_mode = mode_by_index(idx).ok_or_else(|| format!("mode index out of range (0-3): {idx}"))?;
    }
    if let Some(c) = matches.opt_str("c") {
        cfg.cpu_affinity = Some(c.parse().map_err(|_| format!("invalid -c cpu: {c}"))?);
    }
    cfg.verbose = matches.opt_present("v");
    if let Some(f) = matches.opt_str("f") {
        let level: u8 = f.parse().map_err(|_| format!("invalid -f verbosity: {f}"))?;
        if level > 3 {
            return Err(format!("-f verbosity must be 0-3, got {level}"));
        }
        cfg.modem_verbosity = level;
    }
    if let Some(k) = matches.opt_str("k") {
        cfg.capture_channel = CaptureChannel::parse(&k).ok_or_else(|| format!("invalid -k capture channel: {k}"))?;
    }

    Ok(Action::Serve(Box::new(cfg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_when_no_flags_given() {
        let action = parse(&args(&[])).unwrap();
        let Action::Serve(cfg) = action else { panic!("expected Serve") };
        assert_eq!(cfg.base_port, DEFAULT_BASE_PORT);
        assert_eq!(cfg.broadcast_port, DEFAULT_BROADCAST_PORT);
        assert_eq!(cfg.start_mode, ModeId::Datac4);
        assert_eq!(cfg.capture_channel, CaptureChannel::Stereo);
        assert!(!cfg.verbose);
    }

    #[test]
    fn parses_ports_and_mode_index() {
        let action = parse(&args(&["-p", "9000", "-b", "9001", "-m", "3"])).unwrap();
        let Action::Serve(cfg) = action else { panic!("expected Serve") };
        assert_eq!(cfg.base_port, 9000);
        assert_eq!(cfg.broadcast_port, 9001);
        assert_eq!(cfg.start_mode, ModeId::Datac1);
    }

    #[test]
    fn list_flags_short_circuit_before_config_is_built() {
        assert_eq!(parse(&args(&["-l"])).unwrap(), Action::ListModes);
        assert_eq!(parse(&args(&["-z"])).unwrap(), Action::ListSoundcards);
    }

    #[test]
    fn rejects_out_of_range_mode_index() {
        assert!(parse(&args(&["-m", "9"])).is_err());
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(parse(&args(&["-x", "bluetooth"])).is_err());
    }

    #[test]
    fn accepts_every_documented_backend() {
        for b in ["alsa", "pulse", "dsound", "wasapi", "oss", "coreaudio", "shm"] {
            assert!(parse(&args(&["-x", b])).is_ok(), "backend {b} should parse");
        }
    }

    #[test]
    fn capture_channel_accepts_all_three() {
        for k in ["left", "right", "stereo"] {
            assert!(parse(&args(&["-k", k])).is_ok());
        }
    }

    #[test]
    fn modem_verbosity_out_of_range_is_rejected() {
        assert!(parse(&args(&["-f", "4"])).is_err());
        assert!(parse(&args(&["-f", "3"])).is_ok());
    }
}
