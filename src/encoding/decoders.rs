//! Byte-to-code-point decoders (component B, decoder half).
//!
//! Each decoder is a function from a small byte lookahead buffer to one
//! [`char`] plus an error report. The lookahead buffer is private to the
//! decoder -- it is not the single-slot push-back the [`crate::Stream`]
//! primitive exposes to its consumers, since a decoder may need to requeue
//! more than one byte (e.g. UTF-16 surrogate-pair validation).

use std::collections::VecDeque;

use crate::error::ErrorKind;
use crate::stream::Stream;

pub(super) const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

/// Reads bytes from an owned [`Stream<u8>`], remembering any bytes a
/// decoder needed to look ahead at but didn't consume. Owns (rather than
/// borrows) its source stream so it can live inside another stream's
/// closure state across repeated calls without a self-referential borrow.
pub(super) struct ByteCursor<'a> {
    inner: Stream<'a, u8>,
    requeued: VecDeque<u8>,
}

impl<'a> ByteCursor<'a> {
    pub fn new(inner: Stream<'a, u8>) -> Self {
        ByteCursor {
            inner,
            requeued: VecDeque::new(),
        }
    }

    pub fn read(&mut self) -> crate::error::Result<Option<u8>> {
        if let Some(b) = self.requeued.pop_front() {
            return Ok(Some(b));
        }
        Ok(self.inner.next()?.into_option())
    }

    /// Puts bytes back, in the order they should be re-read.
    pub fn requeue(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.requeued.push_front(b);
        }
    }
}

/// Every encoding this crate can decode and (where meaningful) encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Be,
    Utf16Le,
    Utf32Be,
    Utf32Le,
    /// The XML specification's "2-3-0-1" transposed UCS-4 byte order.
    Utf32BeTransposed2301,
    /// The XML specification's "1-0-3-2" transposed UCS-4 byte order.
    Utf32LeTransposed1032,
    Latin1,
    Ascii,
    WindowsCp1252,
    WindowsCp1251,
    Ebcdic37,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf32Be => "UCS-4BE",
            Encoding::Utf32Le => "UCS-4LE",
            Encoding::Utf32BeTransposed2301 => "UCS-4BE-transposed-2301",
            Encoding::Utf32LeTransposed1032 => "UCS-4LE-transposed-1032",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
            Encoding::WindowsCp1252 => "windows-1252",
            Encoding::WindowsCp1251 => "windows-1251",
            Encoding::Ebcdic37 => "EBCDIC-37",
        }
    }

    /// Looks up an encoding by one of its common labels (case-insensitive),
    /// as found in an `encoding="..."` pseudo-attribute or `<meta charset>`.
    pub fn from_label(label: &str) -> Option<Encoding> {
        let l = label.trim().to_ascii_lowercase();
        Some(match l.as_str() {
            "utf-8" | "utf8" => Encoding::Utf8,
            "utf-16be" => Encoding::Utf16Be,
            "utf-16le" | "utf-16" => Encoding::Utf16Le,
            "ucs-4be" | "utf-32be" => Encoding::Utf32Be,
            "ucs-4le" | "utf-32le" | "utf-32" => Encoding::Utf32Le,
            "iso-8859-1" | "latin1" | "latin-1" => Encoding::Latin1,
            "us-ascii" | "ascii" => Encoding::Ascii,
            "windows-1252" | "cp1252" => Encoding::WindowsCp1252,
            "windows-1251" | "cp1251" => Encoding::WindowsCp1251,
            "ebcdic-37" | "cp037" | "ibm037" => Encoding::Ebcdic37,
            _ => return None,
        })
    }

    /// Decodes exactly one code point from `cursor`, or `Ok(None)` at a
    /// clean end of input. On an illegal sequence, reports a
    /// `DecodingError` through `report` and returns the replacement
    /// character, having skipped the minimal illegal prefix.
    pub(super) fn decode_one(
        &self,
        cursor: &mut ByteCursor,
        report: &mut dyn FnMut(ErrorKind),
    ) -> crate::error::Result<Option<char>> {
        match self {
            Encoding::Utf8 => decode_utf8(cursor, report),
            Encoding::Utf16Be => decode_utf16(cursor, report, true),
            Encoding::Utf16Le => decode_utf16(cursor, report, false),
            Encoding::Utf32Be => decode_utf32(cursor, report, true),
            Encoding::Utf32Le => decode_utf32(cursor, report, false),
            Encoding::Utf32BeTransposed2301 => decode_utf32_transposed(cursor, report, true),
            Encoding::Utf32LeTransposed1032 => decode_utf32_transposed(cursor, report, false),
            Encoding::Latin1 => decode_latin1(cursor),
            Encoding::Ascii => decode_ascii(cursor, report),
            Encoding::WindowsCp1252 => decode_single_byte_rs(cursor, report, encoding_rs::WINDOWS_1252),
            Encoding::WindowsCp1251 => decode_single_byte_rs(cursor, report, encoding_rs::WINDOWS_1251),
            Encoding::Ebcdic37 => decode_ebcdic37(cursor),
        }
    }
}

fn continuation(b: u8) -> bool {
    (0x80..=0xBF).contains(&b)
}

fn decode_utf8(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
) -> crate::error::Result<Option<char>> {
    let b0 = match cursor.read()? {
        None => return Ok(None),
        Some(b) => b,
    };

    if b0 < 0x80 {
        return Ok(Some(b0 as char));
    }

    let (len, min_second, max_second): (usize, u8, u8) = match b0 {
        0xC2..=0xDF => (2, 0x80, 0xBF),
        0xE0 => (3, 0xA0, 0xBF),
        0xE1..=0xEC => (3, 0x80, 0xBF),
        0xED => (3, 0x80, 0x9F), // excludes surrogate range D800-DFFF
        0xEE..=0xEF => (3, 0x80, 0xBF),
        0xF0 => (4, 0x90, 0xBF),
        0xF1..=0xF3 => (4, 0x80, 0xBF),
        0xF4 => (4, 0x80, 0x8F),
        _ => {
            bad_byte(report, b0, "UTF-8");
            return Ok(Some(REPLACEMENT_CHARACTER));
        }
    };

    let mut bytes = vec![b0];
    let second = match cursor.read()? {
        None => {
            bad_bytes(report, &bytes, "UTF-8");
            return Ok(Some(REPLACEMENT_CHARACTER));
        }
        Some(b) => b,
    };
    if second < min_second || second > max_second {
        cursor.requeue(&[second]);
        bad_bytes(report, &bytes, "UTF-8");
        return Ok(Some(REPLACEMENT_CHARACTER));
    }
    bytes.push(second);

    for _ in 2..len {
        let b = match cursor.read()? {
            None => {
                bad_bytes(report, &bytes, "UTF-8");
                return Ok(Some(REPLACEMENT_CHARACTER));
            }
            Some(b) => b,
        };
        if !continuation(b) {
            cursor.requeue(&[b]);
            bad_bytes(report, &bytes, "UTF-8");
            return Ok(Some(REPLACEMENT_CHARACTER));
        }
        bytes.push(b);
    }

    let mut scalar: u32 = match len {
        2 => (bytes[0] as u32 & 0x1F),
        3 => (bytes[0] as u32 & 0x0F),
        4 => (bytes[0] as u32 & 0x07),
        _ => unreachable!(),
    };
    for &b in &bytes[1..] {
        scalar = (scalar << 6) | (b as u32 & 0x3F);
    }

    match char::from_u32(scalar) {
        Some(c) => Ok(Some(c)),
        None => {
            bad_bytes(report, &bytes, "UTF-8");
            Ok(Some(REPLACEMENT_CHARACTER))
        }
    }
}

fn decode_utf16(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
    big_endian: bool,
) -> crate::error::Result<Option<char>> {
    let unit = match read_u16(cursor, big_endian)? {
        None => return Ok(None),
        Some((unit, _bytes)) => unit,
    };

    if (0xD800..=0xDBFF).contains(&unit) {
        // High surrogate: needs a matching low surrogate.
        match read_u16(cursor, big_endian)? {
            Some((low, low_bytes)) if (0xDC00..=0xDFFF).contains(&low) => {
                let scalar = 0x10000
                    + ((unit as u32 - 0xD800) << 10)
                    + (low as u32 - 0xDC00);
                return Ok(Some(char::from_u32(scalar).unwrap_or(REPLACEMENT_CHARACTER)));
            }
            Some((_, low_bytes)) => {
                cursor.requeue(&low_bytes);
                bad_bytes(report, &u16_bytes(unit, big_endian), "UTF-16");
                return Ok(Some(REPLACEMENT_CHARACTER));
            }
            None => {
                bad_bytes(report, &u16_bytes(unit, big_endian), "UTF-16");
                return Ok(Some(REPLACEMENT_CHARACTER));
            }
        }
    }
    if (0xDC00..=0xDFFF).contains(&unit) {
        bad_bytes(report, &u16_bytes(unit, big_endian), "UTF-16");
        return Ok(Some(REPLACEMENT_CHARACTER));
    }
    Ok(Some(char::from_u32(unit as u32).unwrap_or(REPLACEMENT_CHARACTER)))
}

fn u16_bytes(unit: u16, big_endian: bool) -> [u8; 2] {
    if big_endian {
        unit.to_be_bytes()
    } else {
        unit.to_le_bytes()
    }
}

fn read_u16(
    cursor: &mut ByteCursor,
    big_endian: bool,
) -> crate::error::Result<Option<(u16, [u8; 2])>> {
    let b0 = match cursor.read()? {
        None => return Ok(None),
        Some(b) => b,
    };
    let b1 = match cursor.read()? {
        None => return Ok(None), // lone trailing byte: clean-ish EOF, drop it.
        Some(b) => b,
    };
    let bytes = [b0, b1];
    let unit = if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    };
    Ok(Some((unit, bytes)))
}

fn decode_utf32(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
    big_endian: bool,
) -> crate::error::Result<Option<char>> {
    let mut bytes = [0u8; 4];
    for slot in bytes.iter_mut() {
        match cursor.read()? {
            None => return Ok(None),
            Some(b) => *slot = b,
        }
    }
    let scalar = if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    };
    match char::from_u32(scalar) {
        Some(c) => Ok(Some(c)),
        None => {
            bad_bytes(report, &bytes, "UCS-4");
            Ok(Some(REPLACEMENT_CHARACTER))
        }
    }
}

/// Un-transposes a 2-3-0-1 (`big_endian`) or 1-0-3-2 (`!big_endian`) byte
/// order back to plain big/little-endian before decoding as UCS-4.
fn decode_utf32_transposed(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
    big_endian: bool,
) -> crate::error::Result<Option<char>> {
    let mut raw = [0u8; 4];
    for slot in raw.iter_mut() {
        match cursor.read()? {
            None => return Ok(None),
            Some(b) => *slot = b,
        }
    }
    let bytes = if big_endian {
        [raw[2], raw[3], raw[0], raw[1]]
    } else {
        [raw[1], raw[0], raw[3], raw[2]]
    };
    let scalar = if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    };
    match char::from_u32(scalar) {
        Some(c) => Ok(Some(c)),
        None => {
            bad_bytes(report, &raw, "UCS-4-transposed");
            Ok(Some(REPLACEMENT_CHARACTER))
        }
    }
}

fn decode_latin1(cursor: &mut ByteCursor) -> crate::error::Result<Option<char>> {
    match cursor.read()? {
        None => Ok(None),
        Some(b) => Ok(Some(b as char)),
    }
}

fn decode_ascii(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
) -> crate::error::Result<Option<char>> {
    match cursor.read()? {
        None => Ok(None),
        Some(b) if b < 0x80 => Ok(Some(b as char)),
        Some(b) => {
            bad_byte(report, b, "US-ASCII");
            Ok(Some(REPLACEMENT_CHARACTER))
        }
    }
}

fn decode_ebcdic37(cursor: &mut ByteCursor) -> crate::error::Result<Option<char>> {
    match cursor.read()? {
        None => Ok(None),
        Some(b) => Ok(Some(super::ebcdic::byte_to_char(b))),
    }
}

/// Decodes a single byte through an `encoding_rs` legacy single-byte table
/// (Windows-1252/1251). `encoding_rs` treats every byte as representable
/// (its single-byte tables map unassigned code points to the replacement
/// character internally), so errors here are rare, but we still run every
/// byte through the incremental decoder for fidelity rather than hand-roll
/// the 256-entry table ourselves.
fn decode_single_byte_rs(
    cursor: &mut ByteCursor,
    report: &mut dyn FnMut(ErrorKind),
    encoding: &'static encoding_rs::Encoding,
) -> crate::error::Result<Option<char>> {
    let b = match cursor.read()? {
        None => return Ok(None),
        Some(b) => b,
    };
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut out = [0u8; 4];
    let (_result, _read, written, had_errors) =
        decoder.decode_to_utf8(&[b], &mut out, true);
    if had_errors || written == 0 {
        bad_byte(report, b, encoding.name());
        return Ok(Some(REPLACEMENT_CHARACTER));
    }
    let s = std::str::from_utf8(&out[..written]).unwrap_or("\u{FFFD}");
    Ok(Some(s.chars().next().unwrap_or(REPLACEMENT_CHARACTER)))
}

fn bad_byte(report: &mut dyn FnMut(ErrorKind), byte: u8, encoding: &str) {
    bad_bytes(report, &[byte], encoding);
}

fn bad_bytes(report: &mut dyn FnMut(ErrorKind), bytes: &[u8], encoding: &str) {
    report(ErrorKind::DecodingError {
        bytes: bytes.to_vec(),
        encoding: encoding.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    fn decode_all(encoding: Encoding, bytes: &[u8]) -> (Vec<char>, usize) {
        let s = Stream::of_list(bytes.to_vec());
        let mut cursor = ByteCursor::new(s);
        let mut errors = 0;
        let mut out = Vec::new();
        loop {
            match encoding
                .decode_one(&mut cursor, &mut |_| errors += 1)
                .unwrap()
            {
                None => break,
                Some(c) => out.push(c),
            }
        }
        (out, errors)
    }

    #[test]
    fn utf8_round_trips_ascii_and_multibyte() {
        let text = "héllo, 世界!";
        let (chars, errors): (Vec<char>, usize) = decode_all(Encoding::Utf8, text.as_bytes());
        assert_eq!(errors, 0);
        assert_eq!(chars.into_iter().collect::<String>(), text);
    }

    #[test]
    fn utf8_recovers_from_invalid_continuation() {
        let bytes = [b'a', 0xC2, 0x20, b'b']; // 0xC2 needs 0x80..=0xBF, gets 0x20
        let (chars, errors) = decode_all(Encoding::Utf8, &bytes);
        assert_eq!(errors, 1);
        assert_eq!(chars, vec!['a', '\u{FFFD}', ' ', 'b']);
    }

    #[test]
    fn latin1_is_identity_on_byte_value() {
        let (chars, errors) = decode_all(Encoding::Latin1, &[0xE9]);
        assert_eq!(errors, 0);
        assert_eq!(chars, vec!['é']);
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        let (chars, errors) = decode_all(Encoding::Ascii, &[0x41, 0xFF]);
        assert_eq!(errors, 1);
        assert_eq!(chars, vec!['A', '\u{FFFD}']);
    }

    #[test]
    fn utf16be_decodes_surrogate_pair() {
        // U+1F600 GRINNING FACE
        let bytes = [0xD8, 0x3D, 0xDE, 0x00];
        let (chars, errors) = decode_all(Encoding::Utf16Be, &bytes);
        assert_eq!(errors, 0);
        assert_eq!(chars, vec!['\u{1F600}']);
    }
}
