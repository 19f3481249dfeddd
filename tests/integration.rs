use markup_stream::{
    parse_html, parse_xml, write_html, write_xml, Context, Location, ParserOptions, Signal, Stream, WriterOptions,
};
use quickcheck_macros::quickcheck;

fn xml_signals(input: &str) -> Vec<Signal> {
    let bytes = Stream::of_list(input.as_bytes().to_vec());
    parse_xml(bytes, ParserOptions::new())
        .to_list()
        .unwrap()
        .into_iter()
        .map(|(_, s)| s)
        .collect()
}

fn html_signals(input: &str, options: ParserOptions<'static>) -> Vec<Signal> {
    let bytes = Stream::of_list(input.as_bytes().to_vec());
    parse_html(bytes, options)
        .to_list()
        .unwrap()
        .into_iter()
        .map(|(_, s)| s)
        .collect()
}

fn balanced(signals: &[Signal]) -> bool {
    let mut depth: i64 = 0;
    for s in signals {
        match s {
            Signal::StartElement(_, _) => depth += 1,
            Signal::EndElement => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[test]
fn xml_minimal_document_round_trips() {
    let input = r#"<?xml version="1.0"?><root a="1">hello</root>"#;
    let signals = xml_signals(input);
    assert!(balanced(&signals));
    let out = write_xml(Stream::of_list(signals), WriterOptions::new())
        .to_vec()
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), input);
}

#[test]
fn xml_entity_recovery_keeps_parsing() {
    let mut errors = Vec::new();
    let options = ParserOptions::new().report(|_, kind| errors.push(kind.clone()));
    let bytes = Stream::of_list("<r>a & b</r>".as_bytes().to_vec());
    let signals: Vec<_> = parse_xml(bytes, options).to_list().unwrap();
    assert_eq!(signals.len(), 3);
    assert_eq!(errors.len(), 1);
}

#[test]
fn html_misnested_formatting_runs_adoption_agency() {
    let signals = html_signals(
        "<p>1<b>2<i>3</b>4</i>5</p>",
        ParserOptions::new().context(Context::Fragment("body".into())),
    );
    assert!(balanced(&signals));
    let texts: Vec<String> = signals
        .iter()
        .filter_map(|s| match s {
            Signal::Text(chunks) => Some(chunks.join("")),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["1", "2", "3", "4", "5"]);
}

#[test]
fn html_adoption_agency_reparents_the_furthest_block() {
    let signals = html_signals(
        "<b>1<p>2</b>3</p>",
        ParserOptions::new().context(Context::Fragment("body".into())),
    );
    assert!(balanced(&signals));
    let starts: Vec<String> = signals
        .iter()
        .filter_map(|s| match s {
            Signal::StartElement(name, _) => Some(name.local.clone()),
            _ => None,
        })
        .collect();
    // b, closed under p, then reopened as a clone inside p: "b" appears twice.
    assert_eq!(starts, vec!["b", "p", "b"]);
}

#[test]
fn html_foster_parents_stray_table_text() {
    let signals = html_signals(
        "<table>x</table>",
        ParserOptions::new().context(Context::Fragment("body".into())),
    );
    assert!(balanced(&signals));
    match signals.first() {
        Some(Signal::Text(chunks)) => assert_eq!(chunks.join(""), "x"),
        other => panic!("expected foster-parented text before the table, got {:?}", other),
    }
}

#[test]
fn html_foreign_content_breaks_out_to_html() {
    let signals = html_signals("<svg><g><p>x</svg>", ParserOptions::new());
    assert!(balanced(&signals));
    let last_start = signals.iter().rev().find_map(|s| match s {
        Signal::StartElement(name, _) => Some(name.local.clone()),
        _ => None,
    });
    assert_eq!(last_start.as_deref(), Some("p"));
}

#[test]
fn html_fragment_round_trips_through_the_writer() {
    let input = "<p>hello <b>world</b></p>";
    let bytes = Stream::of_list(input.as_bytes().to_vec());
    let signals: Vec<_> = parse_html(bytes, ParserOptions::new().context(Context::Fragment("body".into())))
        .to_list()
        .unwrap()
        .into_iter()
        .map(|(_, s)| s)
        .collect();
    let out = write_html(Stream::of_list(signals), WriterOptions::new())
        .to_vec()
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), input);
}

#[test]
fn html_context_auto_detection_infers_table_row_for_bare_cell() {
    let signals = html_signals("<td>x</td>", ParserOptions::new());
    match signals.first() {
        Some(Signal::StartElement(name, _)) => assert_eq!(name.local, "td"),
        other => panic!("expected a leading StartElement, got {:?}", other),
    }
}

#[test]
fn encoding_switch_is_honoured_mid_decode() {
    // A UTF-8 BOM with no explicit encoding hint should be detected and
    // stripped rather than surfacing as leading garbage text.
    let mut input = vec![0xEF, 0xBB, 0xBF];
    input.extend_from_slice(b"<r>hi</r>");
    let bytes = Stream::of_list(input);
    let signals: Vec<_> = parse_xml(bytes, ParserOptions::new())
        .to_list()
        .unwrap()
        .into_iter()
        .map(|(_, s)| s)
        .collect();
    assert_eq!(
        signals,
        vec![
            Signal::StartElement(markup_stream::Name::unprefixed("r"), vec![]),
            Signal::text("hi"),
            Signal::EndElement,
        ]
    );
}

#[quickcheck]
fn xml_parse_always_yields_balanced_signals(body: String) -> bool {
    let escaped: String = body
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '&'))
        .collect();
    let input = format!("<r>{}</r>", escaped);
    let signals = xml_signals(&input);
    balanced(&signals)
}

#[quickcheck]
fn location_line_numbers_are_monotonic(lines: Vec<String>) -> bool {
    let clean: Vec<String> = lines
        .into_iter()
        .map(|l| l.chars().filter(|c| *c != '\n').collect())
        .collect();
    let input = clean.join("\n");
    let bytes = Stream::of_list(input.as_bytes().to_vec());
    let mut last = Location::start();
    let result = parse_xml(bytes, ParserOptions::new()).iter(|(loc, _)| {
        last = *loc;
    });
    // A malformed fragment may legitimately error out partway through; what
    // must never happen is a location going backwards.
    let _ = result;
    last.line >= 1
}
