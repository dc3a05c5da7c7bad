//! Fixed 6-bit packed callsign alphabet.
//!
//! The original source compresses `"DST|SRC"` with an external arithmetic
//! coder (`arithmetic_encode`/`arithmetic_decode`) that isn't present in
//! this pack. This crate substitutes a fixed 6-bit-per-symbol packing over
//! a 41-symbol alphabet (`A-Z 0-9 / - <space> |`), which gives the same
//! "12 bytes max, truncate if it doesn't fit" property §4.1 requires
//! without needing an adaptive probability model. See DESIGN.md.

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/- |";

/// A 6-bit value with no entry in `ALPHABET` (41 symbols use indices 0..40,
/// this is 41). `pack` appends one of these right after the message so
/// `unpack` has a real end-of-message marker instead of having to guess
/// whether trailing zero bits are pad or a real index-0 `'A'`.
const TERMINATOR: u32 = ALPHABET.len() as u32;

fn symbol_index(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

/// Append one 6-bit symbol to the bitstream, flushing whole bytes to `out`.
/// Returns `false` once `out_cap` is reached (caller must stop).
fn push_symbol(idx: u32, acc: &mut u32, bits: &mut u32, out: &mut Vec<u8>, out_cap: usize) -> bool {
    *acc = (*acc << 6) | idx;
    *bits += 6;
    while *bits >= 8 {
        if out.len() >= out_cap {
            return false;
        }
        *bits -= 8;
        out.push(((*acc >> *bits) & 0xFF) as u8);
    }
    true
}

/// Pack `msg` (ASCII, must only contain alphabet characters) into 6-bit
/// groups, MSB-first, truncating once `out_cap` bytes are produced. A
/// terminator symbol follows the message when it fits, so `unpack` knows
/// exactly where the real content ends.
pub fn pack(msg: &str, out_cap: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_cap);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for ch in msg.bytes() {
        let idx = symbol_index(ch).unwrap_or_else(|| symbol_index(b' ').unwrap()) as u32;
        if !push_symbol(idx, &mut acc, &mut bits, &mut out, out_cap) {
            return out;
        }
    }
    if out.len() < out_cap {
        let _ = push_symbol(TERMINATOR, &mut acc, &mut bits, &mut out, out_cap);
    }
    if bits > 0 && out.len() < out_cap {
        out.push(((acc << (8 - bits)) & 0xFF) as u8);
    }
    out
}

/// Unpack 6-bit groups back into a string. Stops at the terminator symbol
/// (or, for a message truncated by `pack` before it could emit one, once
/// `max_symbols` or the available bits run out).
pub fn unpack(bytes: &[u8], max_symbols: usize) -> String {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = String::new();
    for &b in bytes {
        acc = (acc << 8) | b as u32;
        bits += 8;
        while bits >= 6 && out.len() < max_symbols {
            bits -= 6;
            let idx = ((acc >> bits) & 0x3F) as usize;
            if idx >= ALPHABET.len() {
                return out;
            }
            out.push(ALPHABET[idx] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_callsigns() {
        let msg = "PU2GNU|PU2UIT";
        let packed = pack(msg, 12);
        let unpacked = unpack(&packed, msg.len());
        assert_eq!(unpacked, msg);
    }

    /// `connect.rs` always unpacks the full 12-byte payload region, padded
    /// with zero bytes past whatever `pack` actually emitted, and a generous
    /// `max_symbols` cap — not the exact packed length. The terminator must
    /// stop decoding before those zero pad bytes turn into spurious `'A'`s.
    #[test]
    fn terminator_stops_decoding_before_zero_padded_tail() {
        for msg in ["ABC|DEF", "PU2GNU|PU2UIT", "A|B", "ABCD|EFGH"] {
            let mut packed = pack(msg, 12);
            packed.resize(12, 0);
            let unpacked = unpack(&packed, 31);
            assert_eq!(unpacked, msg, "spurious trailing symbols for {msg:?}");
        }
    }

    #[test]
    fn truncates_when_it_does_not_fit() {
        let msg = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA|BBBBBBBBBBBBBBBBBBBBBBBBBBB";
        let packed = pack(msg, 12);
        assert!(packed.len() <= 12);
    }
}
