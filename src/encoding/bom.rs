//! Byte-order-mark and XML-declaration four-byte pattern tables (§4.B
//! steps 1-2).

use super::Encoding;

/// Matches a byte-order mark against up to the first four bytes of input.
/// Returns the encoding and how many of those bytes the BOM itself
/// consumes (to be dropped rather than re-read as content).
pub(super) fn match_bom(head: &[u8]) -> Option<(Encoding, usize)> {
    if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some((Encoding::Utf8, 3));
    }
    if head.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        return Some((Encoding::Utf32Be, 4));
    }
    if head.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        return Some((Encoding::Utf32Le, 4));
    }
    // "Transposed" UCS-4 orderings from the XML specification's BOM table.
    if head.starts_with(&[0xFE, 0xFF, 0x00, 0x00]) {
        return Some((Encoding::Utf32BeTransposed2301, 4));
    }
    if head.starts_with(&[0x00, 0x00, 0xFF, 0xFE]) {
        return Some((Encoding::Utf32LeTransposed1032, 4));
    }
    if head.starts_with(&[0xFE, 0xFF]) {
        return Some((Encoding::Utf16Be, 2));
    }
    if head.starts_with(&[0xFF, 0xFE]) {
        return Some((Encoding::Utf16Le, 2));
    }
    None
}

/// Matches one of the XML specification's tentative-decoder four-byte
/// patterns (used when no BOM was found, to pick a decoder good enough to
/// read the XML declaration itself).
pub(super) fn match_xml_pattern(head: &[u8]) -> Option<Encoding> {
    if head.len() < 4 {
        return None;
    }
    match head {
        [0x00, 0x00, 0x00, 0x3C] => Some(Encoding::Utf32Be),
        [0x3C, 0x00, 0x00, 0x00] => Some(Encoding::Utf32Le),
        [0x00, 0x3C, 0x00, 0x3F] => Some(Encoding::Utf16Be),
        [0x3C, 0x00, 0x3F, 0x00] => Some(Encoding::Utf16Le),
        [0x3C, 0x3F, 0x78, 0x6D] => Some(Encoding::Utf8), // "<?xm"
        [0x4C, 0x6F, 0xA7, 0x94] => Some(Encoding::Ebcdic37),
        _ => None,
    }
}
