//! The closed error taxonomy (§7) and its human-readable rendering.

use std::fmt;

use crate::location::Location;

pub type Result<T> = std::result::Result<T, Error>;

/// Every error this crate can report, paired with the [`Location`] at which
/// it occurred by the callers that need it (the `report` callback always
/// receives the location separately; this variant carries only the operand
/// data named in the taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An illegal byte sequence was encountered while decoding.
    DecodingError { bytes: Vec<u8>, encoding: String },
    /// A local syntactic problem in a token.
    BadToken {
        token: String,
        where_: String,
        suggestion: String,
    },
    /// Input ended in the middle of a construct.
    UnexpectedEoi { where_: String },
    /// A document-level structural problem.
    BadDocument { detail: String },
    /// A start tag was left unclosed by its containing construct.
    UnmatchedStartTag { name: String },
    /// An end tag matched no open start tag.
    UnmatchedEndTag { name: String },
    /// A namespace prefix or URI failed to resolve.
    BadNamespace { detail: String },
    /// A content-model violation forced the tree constructor to misnest.
    MisnestedTag { what: String, where_: String },
    /// Disallowed content appeared inside an element.
    BadContent { where_: String },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DecodingError { bytes, encoding } => write!(
                f,
                "illegal byte sequence {:?} for encoding {}",
                bytes, encoding
            ),
            ErrorKind::BadToken {
                token,
                where_,
                suggestion,
            } => write!(f, "in {}: '{}' {}", where_, token, suggestion),
            ErrorKind::UnexpectedEoi { where_ } => {
                write!(f, "unexpected end of input in {}", where_)
            }
            ErrorKind::BadDocument { detail } => write!(f, "malformed document: {}", detail),
            ErrorKind::UnmatchedStartTag { name } => {
                write!(f, "start tag '{}' was never closed", name)
            }
            ErrorKind::UnmatchedEndTag { name } => {
                write!(f, "end tag '{}' matches no open element", name)
            }
            ErrorKind::BadNamespace { detail } => write!(f, "namespace error: {}", detail),
            ErrorKind::MisnestedTag { what, where_ } => {
                write!(f, "'{}' cannot nest inside '{}'", what, where_)
            }
            ErrorKind::BadContent { where_ } => write!(f, "disallowed content in {}", where_),
        }
    }
}

/// The error type returned from stream operations.
///
/// `Parse(Location, ErrorKind)` is a recoverable parse error that was *also*
/// raised by the caller's `report` callback (the callback is free to panic
/// instead of merely observing it, in which case the unwind -- not this
/// variant -- is what ends the stream). `Io` wraps a fatal read/write
/// failure from the byte bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Parse(Location, ErrorKind),
    Io(String),
}

impl Error {
    pub fn parse(loc: Location, kind: ErrorKind) -> Self {
        Error::Parse(loc, kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(loc, kind) => write!(f, "[{}] {}", loc, kind),
            Error::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_line_col_kind_operand() {
        let e = Error::parse(
            Location { line: 1, column: 9 },
            ErrorKind::BadToken {
                token: "&".into(),
                where_: "text".into(),
                suggestion: "should be replaced with '&amp;'".into(),
            },
        );
        assert_eq!(
            e.to_string(),
            "[1:9] in text: '&' should be replaced with '&amp;'"
        );
    }
}
