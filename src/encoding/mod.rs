//! Encoding detection and decoding (component B).

mod bom;
mod decoders;
mod detect;
mod ebcdic;

pub use decoders::Encoding;

use crate::error::{ErrorKind, Result};
use crate::location::Location;
use crate::stream::{Item, Stream};
use decoders::ByteCursor;

/// Decodes a raw byte stream into a stream of `(Location, char)` pairs,
/// auto-detecting the encoding per §4.B unless `explicit` bypasses
/// detection.
///
/// `report` is called for every recoverable `DecodingError`, with the
/// location of the illegal byte sequence.
pub fn decode<'a>(
    bytes: Stream<'a, u8>,
    is_html: bool,
    explicit: Option<Encoding>,
    mut report: impl FnMut(Location, ErrorKind) + 'a,
) -> Result<Stream<'a, (Location, char)>> {
    let (encoding, cursor) = match explicit {
        Some(encoding) => (encoding, ByteCursor::new(bytes)),
        None => {
            let mut bytes = bytes;
            let detection = detect::detect(&mut bytes, is_html)?;
            log::debug!(
                "detected encoding {} ({} buffered prolog bytes)",
                detection.encoding.name(),
                detection.buffered_prefix.len()
            );
            let combined = chain_bytes(detection.buffered_prefix, bytes);
            (detection.encoding, ByteCursor::new(combined))
        }
    };

    let mut cursor = cursor;
    let mut location = Location::start();
    Ok(Stream::from_fn(move || {
        let mut pending: Vec<ErrorKind> = Vec::new();
        let result = encoding.decode_one(&mut cursor, &mut |kind| pending.push(kind));
        // Errors are reported at the location the illegal sequence started.
        let start_loc = location;
        let item = result?;
        for kind in pending {
            report(start_loc, kind);
        }
        match item {
            None => Ok(Item::End),
            Some(c) => {
                location.advance(c);
                Ok(Item::Some((start_loc, c)))
            }
        }
    }))
}

/// Decodes a byte stream with a fixed encoding, without running detection
/// at all (used e.g. by the HTML writer's ASCII-safe paths and tests).
pub fn decode_with(bytes: Stream<u8>, encoding: Encoding) -> Result<Stream<(Location, char)>> {
    decode(bytes, false, Some(encoding), |_, _| {})
}

fn chain_bytes<'a>(prefix: Vec<u8>, rest: Stream<'a, u8>) -> Stream<'a, u8> {
    let mut prefix_iter = prefix.into_iter();
    let mut prefix_done = false;
    let mut rest = rest;
    Stream::from_fn(move || {
        if !prefix_done {
            if let Some(b) = prefix_iter.next() {
                return Ok(Item::Some(b));
            }
            prefix_done = true;
        }
        rest.next()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_utf8_bom_and_strips_it() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("hi".as_bytes());
        let s = Stream::of_list(bytes);
        let decoded = decode(s, false, None, |_, _| {}).unwrap();
        let chars: String = decoded.to_list().unwrap().into_iter().map(|(_, c)| c).collect();
        assert_eq!(chars, "hi");
    }

    #[test]
    fn switches_decoder_from_xml_declaration() {
        let xml = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>";
        let mut bytes = xml.as_bytes().to_vec();
        bytes.push(0xE9); // 'é' in Latin-1, not valid standalone UTF-8 continuation-less byte
        let s = Stream::of_list(bytes);
        let mut errors = Vec::new();
        let decoded = decode(s, false, None, |_, kind| errors.push(kind)).unwrap();
        let chars: String = decoded.to_list().unwrap().into_iter().map(|(_, c)| c).collect();
        assert!(chars.ends_with('é'), "got {:?}", chars);
        assert!(errors.is_empty(), "unexpected decoding errors: {:?}", errors);
    }

    #[test]
    fn defaults_to_windows_1252_for_html_without_signal() {
        let s = Stream::of_list(b"<p>hi</p>".to_vec());
        let mut seen_encoding = None;
        {
            let mut bytes = Stream::of_list(b"<p>hi</p>".to_vec());
            let d = detect::detect(&mut bytes, true).unwrap();
            seen_encoding = Some(d.encoding);
        }
        assert_eq!(seen_encoding, Some(Encoding::WindowsCp1252));
        drop(s);
    }
}
