//! The XML parsing and serialization pipeline: components C, D and G.

mod token;
mod tokenizer;
mod tree;
mod writer;

use crate::location::Location;
use crate::options::{ParserOptions, WriterOptions};
use crate::signal::Signal;
use crate::stream::Stream;

use tokenizer::XmlTokenizer;
use tree::XmlTreeConstructor;
use writer::XmlWriter;

/// Parses a byte stream as XML, returning a lazy stream of located signals.
///
/// Decoding (component B), tokenizing (component C) and tree construction
/// (component D) are all driven lazily: nothing downstream of `bytes` runs
/// until the returned stream is pulled.
pub fn parse_xml<'a>(bytes: Stream<'a, u8>, mut options: ParserOptions<'a>) -> Stream<'a, (Location, Signal)> {
    let explicit_encoding = options.encoding.take();
    let report_sink = options.report_sink();
    let chars = match crate::encoding::decode(bytes, false, explicit_encoding, move |loc, kind| {
        report_sink.report(loc, kind)
    }) {
        Ok(chars) => chars,
        Err(e) => return Stream::from_fn(move || Err(e.clone())),
    };
    let tokenizer = XmlTokenizer::new(chars);
    let tree = XmlTreeConstructor::new(tokenizer, options);
    tree::xml_signal_stream(tree)
}

/// Serializes a stream of signals as XML.
pub fn write_xml<'a>(signals: Stream<'a, Signal>, options: WriterOptions<'a>) -> Stream<'a, u8> {
    let writer = XmlWriter::new(signals, options);
    writer::xml_byte_stream(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_then_write_round_trips_a_simple_document() {
        let input = r#"<?xml version="1.0"?><root a="1">hello</root>"#;
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let signals: Vec<Signal> = parse_xml(bytes, ParserOptions::new())
            .to_list()
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        let out = write_xml(Stream::of_list(signals), WriterOptions::new())
            .to_vec()
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }

    #[test]
    fn reports_errors_through_the_callback() {
        let input = "<r>a & b</r>";
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let mut errors = Vec::new();
        let options = ParserOptions::new().report(|_, kind| errors.push(kind.clone()));
        let signals = parse_xml(bytes, options).to_list().unwrap();
        assert_eq!(signals.len(), 3); // StartElement, Text, EndElement
        assert_eq!(errors.len(), 1);
    }
}
