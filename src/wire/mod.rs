//! Pure, stateless wire codec — §4.1.
//!
//! Encodes and parses the 8-byte ARQ header, the 14-byte CONNECT frame, and
//! the SNR / ACK-delay micro-codecs. Nothing in this module holds state or
//! blocks; it's called from both the event loop (building outgoing frames)
//! and the RX worker (parsing decoded frames).

mod callsign;
mod connect;
mod crc6;
mod header;

pub use connect::{
    build_accept, build_call, parse_accept, parse_call, ConnectFrame, CALLSIGN_MAX_LEN,
    CONNECT_FRAME_SIZE,
};
pub use header::{
    build_ack, build_data, build_disconnect, build_keepalive, build_keepalive_ack, build_mode_ack,
    build_mode_req, build_turn_ack, build_turn_req, decode_ack_delay, decode_header, decode_snr,
    encode_ack_delay, encode_header, encode_snr, Header, PacketType, Subtype, FLAG_HAS_DATA,
    FLAG_TURN_REQ, HEADER_SIZE, SNR_UNKNOWN,
};
