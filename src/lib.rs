//! A streaming, error-recovering HTML and XML parser and serializer.
//!
//! The crate is built around a single lazy [`Stream`] abstraction (§2):
//! parsing and writing never buffer the whole document, and a `(Location,
//! Signal)` pair is pulled through the pipeline one step at a time. The
//! four entry points are [`parse_xml`], [`parse_html`], [`write_xml`] and
//! [`write_html`].
//!
//! ```no_run
//! use markup_stream::{parse_xml, ParserOptions, Stream};
//!
//! let bytes = Stream::from_reader(std::io::stdin());
//! let signals = parse_xml(bytes, ParserOptions::new());
//! signals.drain().unwrap();
//! ```

mod encoding;
mod error;
mod html;
mod location;
mod options;
mod signal;
mod stream;
mod xml;

pub use encoding::Encoding;
pub use error::{Error, ErrorKind, Result};
pub use location::Location;
pub use options::{Context, ParserOptions, WriterOptions};
pub use signal::{Attribute, Doctype, Name, Signal, XmlDeclaration};
pub use stream::{Item, Stream};

pub use html::{parse_html, write_html};
pub use xml::{parse_xml, write_xml};
