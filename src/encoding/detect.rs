//! The encoding-detection algorithm (§4.B): BOM sniffing, the XML
//! four-byte tentative-decoder patterns, declaration/meta sniffing, and
//! the final defaulting rule.

use super::bom::{match_bom, match_xml_pattern};
use super::decoders::Encoding;
use crate::error::Result;
use crate::stream::{Item, Stream};

/// How many bytes of prolog we are willing to buffer in memory while
/// sniffing for a declared encoding. Real XML/HTML declarations are a
/// handful of bytes; this bound keeps detection "single pass, bounded
/// buffering" rather than reading the whole document.
const SNIFF_WINDOW: usize = 1024;

pub(super) struct Detection {
    pub encoding: Encoding,
    /// Bytes already pulled off the original stream while sniffing, which
    /// must be decoded (with the *final* chosen encoding) before the rest
    /// of the live stream.
    pub buffered_prefix: Vec<u8>,
}

/// Runs the detection algorithm over `bytes`, consuming only the prolog
/// bytes it needs to look at (bounded by [`SNIFF_WINDOW`]) and handing
/// those back in `buffered_prefix` so no bytes are lost.
pub(super) fn detect(bytes: &mut Stream<u8>, is_html: bool) -> Result<Detection> {
    let mut head = Vec::with_capacity(4);
    for _ in 0..4 {
        match bytes.next()? {
            Item::Some(b) => head.push(b),
            Item::End => break,
        }
    }

    if let Some((encoding, bom_len)) = match_bom(&head) {
        let remainder = head[bom_len..].to_vec();
        return Ok(refine(bytes, encoding, remainder, is_html)?);
    }

    let tentative = match_xml_pattern(&head).unwrap_or(if is_html {
        Encoding::WindowsCp1252
    } else {
        Encoding::Utf8
    });

    refine(bytes, tentative, head, is_html)
}

/// Having picked a tentative encoding, reads a bounded window of the
/// prolog decoded with it, looks for a declared encoding (XML declaration
/// or, for HTML, a `<meta charset>`), and switches if one is found and
/// differs. Because we only ever decoded a small buffered prefix (never
/// the live stream), "restarting" just means re-decoding that prefix with
/// the new encoding -- no seek on the underlying byte source is needed.
fn refine(
    bytes: &mut Stream<u8>,
    tentative: Encoding,
    already_read: Vec<u8>,
    is_html: bool,
) -> Result<Detection> {
    let mut window = already_read;
    while window.len() < SNIFF_WINDOW {
        match bytes.next()? {
            Item::Some(b) => window.push(b),
            Item::End => break,
        }
        if is_html {
            if window.windows(1).last() == Some(&[b'>']) && window_has_meta_end(&window) {
                break;
            }
        } else if window.ends_with(b"?>") {
            break;
        }
    }

    let declared = if is_html {
        sniff_meta_charset(&window)
    } else {
        sniff_xml_declared_encoding(&window, tentative)
    };

    let encoding = declared.unwrap_or_else(|| {
        if tentative == Encoding::Utf8 && is_html {
            Encoding::WindowsCp1252
        } else {
            tentative
        }
    });

    Ok(Detection {
        encoding,
        buffered_prefix: window,
    })
}

fn window_has_meta_end(window: &[u8]) -> bool {
    let lower = window.to_ascii_lowercase();
    lower.windows(5).any(|w| w == b"<meta")
}

/// Very small scanner: decodes `window` as ASCII-compatible bytes (true of
/// every encoding the XML declaration itself may tentatively use) and
/// looks for `encoding="..."` inside the first `<?xml ... ?>`.
fn sniff_xml_declared_encoding(window: &[u8], tentative: Encoding) -> Option<Encoding> {
    let text = ascii_ish_lossy(window, tentative);
    let decl_start = text.find("<?xml")?;
    let decl_end = text[decl_start..].find("?>")? + decl_start;
    let decl = &text[decl_start..decl_end];
    let key = "encoding";
    let idx = decl.find(key)?;
    let rest = decl[idx + key.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let body = &rest[1..];
    let end = body.find(quote)?;
    Encoding::from_label(&body[..end])
}

/// Scans for `<meta charset="...">` or `<meta ... content="...charset=...">`
/// inside the decoded prolog window, case-insensitively.
fn sniff_meta_charset(window: &[u8]) -> Option<Encoding> {
    let text = ascii_ish_lossy(window, Encoding::WindowsCp1252).to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(meta_idx) = text[search_from..].find("<meta") {
        let abs = search_from + meta_idx;
        let tag_end = text[abs..].find('>').map(|i| abs + i).unwrap_or(text.len());
        let tag = &text[abs..tag_end];
        if let Some(enc) = extract_attr_value(tag, "charset") {
            if let Some(encoding) = Encoding::from_label(&enc) {
                return Some(encoding);
            }
        }
        if let Some(content) = extract_attr_value(tag, "content") {
            if let Some(idx) = content.find("charset=") {
                let value = content[idx + "charset=".len()..]
                    .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
                let value: String = value
                    .chars()
                    .take_while(|c| !c.is_whitespace() && *c != ';')
                    .collect();
                if let Some(encoding) = Encoding::from_label(&value) {
                    return Some(encoding);
                }
            }
        }
        search_from = tag_end.max(abs + 1);
    }
    None
}

fn extract_attr_value(tag: &str, attr: &str) -> Option<String> {
    let idx = tag.find(attr)?;
    let rest = tag[idx + attr.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    let body = if quote == '"' || quote == '\'' {
        let body = &rest[1..];
        let end = body.find(quote)?;
        &body[..end]
    } else {
        let end = rest.find(|c: char| c.is_whitespace() || c == '>').unwrap_or(rest.len());
        &rest[..end]
    };
    Some(body.to_string())
}

/// Decodes `window` well enough to find ASCII declaration syntax,
/// regardless of which tentative multi-byte encoding is in play (every
/// encoding in [`Encoding`] agrees with ASCII on the `<?xml ... ?>` or
/// `<meta ...>` bytes once each scalar's low byte is taken, except the
/// 16/32-bit encodings where ASCII characters occupy every other byte --
/// for those we simply drop the zero bytes).
fn ascii_ish_lossy(window: &[u8], tentative: Encoding) -> String {
    match tentative {
        Encoding::Utf16Be => window
            .chunks(2)
            .filter_map(|c| c.get(1).map(|b| *b as char))
            .collect(),
        Encoding::Utf16Le => window
            .chunks(2)
            .filter_map(|c| c.first().map(|b| *b as char))
            .collect(),
        Encoding::Utf32Be => window
            .chunks(4)
            .filter_map(|c| c.get(3).map(|b| *b as char))
            .collect(),
        Encoding::Utf32Le => window
            .chunks(4)
            .filter_map(|c| c.first().map(|b| *b as char))
            .collect(),
        _ => window.iter().map(|&b| b as char).collect(),
    }
}
