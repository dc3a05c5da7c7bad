//! 8-byte ARQ header codec — §4.1.

use crate::error::WireError;
use crate::wire::crc6::crc6;

pub const HEADER_SIZE: usize = 8;

const IDX_SUBTYPE: usize = 1;
const IDX_FLAGS: usize = 2;
const IDX_SESSION: usize = 3;
const IDX_SEQ: usize = 4;
const IDX_ACK: usize = 5;
const IDX_SNR: usize = 6;
const IDX_DELAY: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    ArqControl,
    ArqData,
}

impl PacketType {
    fn bits(&self) -> u8 {
        match self {
            PacketType::ArqControl => 0,
            PacketType::ArqData => 1,
        }
    }

    fn from_bits(bits: u8) -> PacketType {
        match bits & 0x3 {
            1 => PacketType::ArqData,
            _ => PacketType::ArqControl,
        }
    }
}

/// Frame subtype (header byte 1).
///
/// Discriminants 12-15 are reserved so a future subtype (the source's
/// `FLOW_HINT`, deliberately dropped here — see Open Question 1) can be
/// added without breaking the wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtype {
    Ack = 3,
    Disconnect = 4,
    Data = 5,
    Keepalive = 6,
    KeepaliveAck = 7,
    ModeReq = 8,
    ModeAck = 9,
    TurnReq = 10,
    TurnAck = 11,
}

impl Subtype {
    fn from_u8(v: u8) -> Result<Subtype, WireError> {
        Ok(match v {
            3 => Subtype::Ack,
            4 => Subtype::Disconnect,
            5 => Subtype::Data,
            6 => Subtype::Keepalive,
            7 => Subtype::KeepaliveAck,
            8 => Subtype::ModeReq,
            9 => Subtype::ModeAck,
            10 => Subtype::TurnReq,
            11 => Subtype::TurnAck,
            _ => return Err(WireError::BadInput),
        })
    }
}

pub const FLAG_TURN_REQ: u8 = 0x80;
pub const FLAG_HAS_DATA: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub packet_type: PacketType,
    pub subtype: Subtype,
    pub flags: u8,
    /// 7-bit session id; the high bit of byte 3 is always reserved zero
    /// (Open Question 3 — normalized to a single 7-bit space on the wire).
    pub session_id: u8,
    pub tx_seq: u8,
    pub rx_ack_seq: u8,
    pub snr_raw: u8,
    pub ack_delay_raw: u8,
}

pub fn encode_header(hdr: &Header) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[IDX_SUBTYPE] = hdr.subtype as u8;
    buf[IDX_FLAGS] = hdr.flags;
    buf[IDX_SESSION] = hdr.session_id & 0x7F;
    buf[IDX_SEQ] = hdr.tx_seq;
    buf[IDX_ACK] = hdr.rx_ack_seq;
    buf[IDX_SNR] = hdr.snr_raw;
    buf[IDX_DELAY] = hdr.ack_delay_raw;
    let crc = crc6(&buf[1..HEADER_SIZE]);
    buf[0] = (hdr.packet_type.bits() << 6) | crc;
    buf
}

pub fn decode_header(buf: &[u8]) -> Result<Header, WireError> {
    if buf.len() < HEADER_SIZE {
        return Err(WireError::Short {
            need: HEADER_SIZE,
            got: buf.len(),
        });
    }
    let crc_local = buf[0] & 0x3F;
    let crc_computed = crc6(&buf[1..HEADER_SIZE]);
    if crc_local != crc_computed {
        return Err(WireError::BadCrc);
    }
    let packet_type = PacketType::from_bits(buf[0] >> 6);
    let subtype = Subtype::from_u8(buf[IDX_SUBTYPE])?;
    Ok(Header {
        packet_type,
        subtype,
        flags: buf[IDX_FLAGS],
        session_id: buf[IDX_SESSION] & 0x7F,
        tx_seq: buf[IDX_SEQ],
        rx_ack_seq: buf[IDX_ACK],
        snr_raw: buf[IDX_SNR],
        ack_delay_raw: buf[IDX_DELAY],
    })
}

/// Encode a floating-point SNR (dB) into the wire byte.
/// `0 = unknown`; `clamp(round(snr_dB)+128, 1, 255)` otherwise.
pub fn encode_snr(snr_db: f32) -> u8 {
    let v = (snr_db + 0.5).floor() as i32 + 128;
    v.clamp(1, 255) as u8
}

/// Decode the wire SNR byte back to dB; `0` decodes to the unknown sentinel `0.0`.
pub fn decode_snr(snr_raw: u8) -> f32 {
    if snr_raw == 0 {
        return 0.0;
    }
    (snr_raw as i32 - 128) as f32
}

pub const SNR_UNKNOWN: u8 = 0;

/// Encode an ACK delay in milliseconds into the 8-bit, 10ms-unit wire field.
/// Sub-10ms nonzero delays round up to 1; saturates at 255 (2.55s).
pub fn encode_ack_delay(delay_ms: u32) -> u8 {
    let mut units = delay_ms / 10;
    if units == 0 && delay_ms > 0 {
        units = 1;
    }
    units.min(0xFF) as u8
}

pub fn decode_ack_delay(raw: u8) -> u32 {
    raw as u32 * 10
}

pub fn build_ack(session_id: u8, rx_ack_seq: u8, flags: u8, snr_raw: u8, ack_delay_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::Ack,
        flags,
        session_id,
        tx_seq: 0,
        rx_ack_seq,
        snr_raw,
        ack_delay_raw,
    })
}

pub fn build_disconnect(session_id: u8, snr_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::Disconnect,
        flags: 0,
        session_id,
        tx_seq: 0,
        rx_ack_seq: 0,
        snr_raw,
        ack_delay_raw: 0,
    })
}

pub fn build_keepalive(session_id: u8, snr_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::Keepalive,
        flags: 0,
        session_id,
        tx_seq: 0,
        rx_ack_seq: 0,
        snr_raw,
        ack_delay_raw: 0,
    })
}

pub fn build_keepalive_ack(session_id: u8, snr_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::KeepaliveAck,
        flags: 0,
        session_id,
        tx_seq: 0,
        rx_ack_seq: 0,
        snr_raw,
        ack_delay_raw: 0,
    })
}

pub fn build_turn_req(session_id: u8, rx_ack_seq: u8, snr_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::TurnReq,
        flags: FLAG_TURN_REQ,
        session_id,
        tx_seq: 0,
        rx_ack_seq,
        snr_raw,
        ack_delay_raw: 0,
    })
}

pub fn build_turn_ack(session_id: u8, snr_raw: u8) -> [u8; HEADER_SIZE] {
    encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype: Subtype::TurnAck,
        flags: 0,
        session_id,
        tx_seq: 0,
        rx_ack_seq: 0,
        snr_raw,
        ack_delay_raw: 0,
    })
}

/// MODE_REQ/MODE_ACK carry the requested mode as one payload byte after the header.
pub fn build_mode_req(session_id: u8, snr_raw: u8, mode_byte: u8) -> [u8; HEADER_SIZE + 1] {
    build_with_mode_byte(Subtype::ModeReq, session_id, snr_raw, mode_byte)
}

pub fn build_mode_ack(session_id: u8, snr_raw: u8, mode_byte: u8) -> [u8; HEADER_SIZE + 1] {
    build_with_mode_byte(Subtype::ModeAck, session_id, snr_raw, mode_byte)
}

fn build_with_mode_byte(subtype: Subtype, session_id: u8, snr_raw: u8, mode_byte: u8) -> [u8; HEADER_SIZE + 1] {
    let hdr = encode_header(&Header {
        packet_type: PacketType::ArqControl,
        subtype,
        flags: 0,
        session_id,
        tx_seq: 0,
        rx_ack_seq: 0,
        snr_raw,
        ack_delay_raw: 0,
    });
    let mut out = [0u8; HEADER_SIZE + 1];
    out[..HEADER_SIZE].copy_from_slice(&hdr);
    out[HEADER_SIZE] = mode_byte;
    out
}

/// Build a DATA frame: header + payload. `buf` must be at least
/// `HEADER_SIZE + payload.len()` bytes.
pub fn build_data(
    buf: &mut [u8],
    session_id: u8,
    tx_seq: u8,
    rx_ack_seq: u8,
    flags: u8,
    snr_raw: u8,
    payload: &[u8],
) -> Result<usize, WireError> {
    let total = HEADER_SIZE + payload.len();
    if buf.len() < total {
        return Err(WireError::Short {
            need: total,
            got: buf.len(),
        });
    }
    let hdr = encode_header(&Header {
        packet_type: PacketType::ArqData,
        subtype: Subtype::Data,
        flags,
        session_id,
        tx_seq,
        rx_ack_seq,
        snr_raw,
        ack_delay_raw: 0,
    });
    buf[..HEADER_SIZE].copy_from_slice(&hdr);
    buf[HEADER_SIZE..total].copy_from_slice(payload);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            packet_type: PacketType::ArqControl,
            subtype: Subtype::Ack,
            flags: FLAG_HAS_DATA,
            session_id: 0x42,
            tx_seq: 7,
            rx_ack_seq: 6,
            snr_raw: encode_snr(12.0),
            ack_delay_raw: encode_ack_delay(340),
        }
    }

    #[test]
    fn round_trips() {
        let h = sample();
        let encoded = encode_header(&h);
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn session_id_high_bit_always_zero_on_wire() {
        let mut h = sample();
        h.session_id = 0xFF;
        let encoded = encode_header(&h);
        assert_eq!(encoded[IDX_SESSION] & 0x80, 0);
    }

    #[test]
    fn bad_crc_is_rejected() {
        let mut encoded = encode_header(&sample());
        encoded[0] ^= 0x01;
        assert_eq!(decode_header(&encoded), Err(WireError::BadCrc));
    }

    #[test]
    fn short_buffer_rejected() {
        let buf = [0u8; 4];
        assert!(matches!(decode_header(&buf), Err(WireError::Short { .. })));
    }

    #[test]
    fn snr_round_trip_within_one_db() {
        for raw_db in -127..=127 {
            let encoded = encode_snr(raw_db as f32);
            let decoded = decode_snr(encoded);
            assert!((decoded - raw_db as f32).abs() <= 1.0);
        }
    }

    #[test]
    fn snr_unknown_round_trips_to_sentinel() {
        assert_eq!(decode_snr(SNR_UNKNOWN), 0.0);
    }

    #[test]
    fn ack_delay_round_trip_monotonic_and_within_10ms() {
        let mut prev = 0u8;
        for delay_ms in (0..=2550).step_by(10) {
            let encoded = encode_ack_delay(delay_ms);
            assert!(encoded >= prev);
            prev = encoded;
            let decoded = decode_ack_delay(encoded);
            assert!((decoded as i64 - delay_ms as i64).abs() <= 10);
        }
    }

    #[test]
    fn ack_delay_rounds_up_from_sub_10ms() {
        assert_eq!(encode_ack_delay(1), 1);
        assert_eq!(encode_ack_delay(0), 0);
    }
}
