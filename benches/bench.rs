use criterion::{criterion_group, criterion_main, Criterion};

use markup_stream::{parse_html, parse_xml, write_xml, ParserOptions, Stream, WriterOptions};

fn bench_parse_xml(c: &mut Criterion) {
    let doc = "<root a=\"1\" b=\"2\">".to_string()
        + &"<item>hello world</item>".repeat(200)
        + "</root>";
    c.bench_function("parse_xml 200 elements", |b| {
        b.iter(|| {
            let bytes = Stream::of_list(doc.as_bytes().to_vec());
            parse_xml(bytes, ParserOptions::new()).drain().unwrap();
        })
    });
}

fn bench_parse_html(c: &mut Criterion) {
    let doc = "<!DOCTYPE html><html><body>".to_string()
        + &"<p>hello <b>world</b></p>".repeat(200)
        + "</body></html>";
    c.bench_function("parse_html 200 elements", |b| {
        b.iter(|| {
            let bytes = Stream::of_list(doc.as_bytes().to_vec());
            parse_html(bytes, ParserOptions::new()).drain().unwrap();
        })
    });
}

fn bench_round_trip_xml(c: &mut Criterion) {
    let doc = "<root>".to_string() + &"<item>x</item>".repeat(200) + "</root>";
    c.bench_function("parse then write xml 200 elements", |b| {
        b.iter(|| {
            let bytes = Stream::of_list(doc.as_bytes().to_vec());
            let signals: Vec<_> = parse_xml(bytes, ParserOptions::new())
                .to_list()
                .unwrap()
                .into_iter()
                .map(|(_, s)| s)
                .collect();
            write_xml(Stream::of_list(signals), WriterOptions::new())
                .drain()
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_parse_xml, bench_parse_html, bench_round_trip_xml);
criterion_main!(benches);
