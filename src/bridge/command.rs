//! TCP control-line command parsing — §4.8, §6.
//!
//! Pure parsing only: turns one `\r`-terminated ASCII line into a typed
//! [`Command`]. Matches `execute_control_command` in
//! `data_interfaces/tcp_interfaces.c` verb-for-verb; the caller decides what
//! to do with each variant (push an event, answer from the snapshot, or
//! just acknowledge).

/// One parsed control-socket command — §4.8's line syntax table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MyCall(String),
    ListenOn,
    ListenOff,
    PublicOn,
    PublicOff,
    Bandwidth(u32),
    Connect { src: String, dst: String },
    Disconnect,
    Buffer,
    Sn,
    Bitrate,
    P2p,
}

/// Parse one already-`\r`-stripped line. Returns `None` for anything
/// unrecognized or malformed (missing argument, non-numeric `BW`/bad
/// `ON`/`OFF`) — the caller answers `WRONG\r` in that case, same as the
/// source's `sscanf` failures.
pub fn parse_command_line(line: &str) -> Option<Command> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("MYCALL") {
        let call = rest.trim();
        return if call.is_empty() { None } else { Some(Command::MyCall(call.to_string())) };
    }
    if let Some(rest) = line.strip_prefix("LISTEN") {
        return match rest.trim() {
            "ON" => Some(Command::ListenOn),
            "OFF" => Some(Command::ListenOff),
            _ => None,
        };
    }
    if let Some(rest) = line.strip_prefix("PUBLIC") {
        return match rest.trim() {
            "ON" => Some(Command::PublicOn),
            "OFF" => Some(Command::PublicOff),
            _ => None,
        };
    }
    if let Some(rest) = line.strip_prefix("BW") {
        return rest.trim().parse::<u32>().ok().map(Command::Bandwidth);
    }
    if line == "BUFFER" {
        return Some(Command::Buffer);
    }
    if line == "SN" {
        return Some(Command::Sn);
    }
    if line == "BITRATE" {
        return Some(Command::Bitrate);
    }
    if line == "P2P" {
        return Some(Command::P2p);
    }
    if let Some(rest) = line.strip_prefix("CONNECT") {
        let mut parts = rest.split_whitespace();
        let src = parts.next()?;
        let dst = parts.next()?;
        return Some(Command::Connect { src: src.to_string(), dst: dst.to_string() });
    }
    if line == "DISCONNECT" {
        return Some(Command::Disconnect);
    }
    None
}
