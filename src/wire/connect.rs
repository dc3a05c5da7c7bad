//! CALL / ACCEPT connect frames — 14-byte compact layout, §4.1.

use crate::error::WireError;
use crate::wire::callsign::{pack, unpack};
use crate::wire::crc6::crc6;

pub const CONNECT_FRAME_SIZE: usize = 14;
const SESSION_IDX: usize = 1;
const PAYLOAD_IDX: usize = 2;
const SESSION_MASK: u8 = 0x7F;
const ACCEPT_FLAG: u8 = 0x80;
const MAX_ENCODED: usize = CONNECT_FRAME_SIZE - PAYLOAD_IDX; // 12 bytes

pub const CALLSIGN_MAX_LEN: usize = 15;

fn build(is_accept: bool, session_id: u8, src: &str, dst: &str) -> [u8; CONNECT_FRAME_SIZE] {
    let msg = format!("{}|{}", dst.to_ascii_uppercase(), src.to_ascii_uppercase());
    let packed = pack(&msg, MAX_ENCODED);

    let mut buf = [0u8; CONNECT_FRAME_SIZE];
    buf[SESSION_IDX] = (session_id & SESSION_MASK) | if is_accept { ACCEPT_FLAG } else { 0 };
    buf[PAYLOAD_IDX..PAYLOAD_IDX + packed.len()].copy_from_slice(&packed);

    // packet_type = ArqData (0b01) in the top two bits, CRC-6 in the bottom six.
    let crc = crc6(&buf[1..CONNECT_FRAME_SIZE]);
    buf[0] = (1 << 6) | crc;
    buf
}

pub fn build_call(session_id: u8, src: &str, dst: &str) -> [u8; CONNECT_FRAME_SIZE] {
    build(false, session_id, src, dst)
}

pub fn build_accept(session_id: u8, src: &str, dst: &str) -> [u8; CONNECT_FRAME_SIZE] {
    build(true, session_id, src, dst)
}

/// Parsed connect frame: `(session_id, src, dst, is_accept)`.
pub struct ConnectFrame {
    pub session_id: u8,
    pub src: String,
    pub dst: String,
    pub is_accept: bool,
}

fn parse(buf: &[u8]) -> Result<ConnectFrame, WireError> {
    if buf.len() < CONNECT_FRAME_SIZE {
        return Err(WireError::Short {
            need: CONNECT_FRAME_SIZE,
            got: buf.len(),
        });
    }
    let crc_local = buf[0] & 0x3F;
    let crc_computed = crc6(&buf[1..CONNECT_FRAME_SIZE]);
    if crc_local != crc_computed {
        return Err(WireError::BadCrc);
    }

    let meta = buf[SESSION_IDX];
    let session_id = meta & SESSION_MASK;
    let is_accept = meta & ACCEPT_FLAG != 0;

    let decoded = unpack(&buf[PAYLOAD_IDX..CONNECT_FRAME_SIZE], CALLSIGN_MAX_LEN * 2 + 1);
    let (dst, src) = match decoded.split_once('|') {
        Some((dst, src)) => (dst.to_string(), src.to_string()),
        None => (decoded, String::new()),
    };
    Ok(ConnectFrame {
        session_id,
        src,
        dst,
        is_accept,
    })
}

pub fn parse_call(buf: &[u8]) -> Result<ConnectFrame, WireError> {
    parse(buf)
}

pub fn parse_accept(buf: &[u8]) -> Result<ConnectFrame, WireError> {
    parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_round_trips_for_short_callsigns() {
        let frame = build_call(0x42, "PU2UIT", "PU2GNU");
        let parsed = parse_call(&frame).unwrap();
        assert_eq!(parsed.session_id, 0x42);
        assert_eq!(parsed.src, "PU2UIT");
        assert_eq!(parsed.dst, "PU2GNU");
        assert!(!parsed.is_accept);
    }

    #[test]
    fn accept_sets_the_accept_flag() {
        let frame = build_accept(0x7F, "PU2GNU", "PU2UIT");
        let parsed = parse_accept(&frame).unwrap();
        assert!(parsed.is_accept);
        assert_eq!(parsed.src, "PU2GNU");
        assert_eq!(parsed.dst, "PU2UIT");
    }

    #[test]
    fn bad_crc_is_rejected() {
        let mut frame = build_call(1, "A", "B");
        frame[0] ^= 0x01;
        assert_eq!(parse_call(&frame).unwrap_err(), WireError::BadCrc);
    }

    #[test]
    fn session_id_is_masked_to_seven_bits() {
        let frame = build_call(0xFF, "A", "B");
        let parsed = parse_call(&frame).unwrap();
        assert_eq!(parsed.session_id, 0x7F);
    }

    /// `"DST|SRC"` lengths that leave a whole number of zero pad bits after
    /// packing (7 chars -> 6 bytes -> 6 pad bits here) used to decode one or
    /// more spurious trailing `'A'`s onto `src`.
    #[test]
    fn round_trips_callsign_pairs_with_byte_aligned_padding() {
        for (src, dst) in [("DEF", "ABC"), ("PU2UIT", "PU2GNU"), ("A", "BC"), ("WXYZ", "QRST")] {
            let frame = build_call(1, src, dst);
            let parsed = parse_call(&frame).unwrap();
            assert_eq!(parsed.src, src, "src mismatch for ({src}, {dst})");
            assert_eq!(parsed.dst, dst, "dst mismatch for ({src}, {dst})");
        }
    }
}
