use criterion::{Criterion, criterion_group, criterion_main};
use pdfmend::{Dictionary, Document, Object, SaveOptions, Stream};

fn sample_pdf(pages: usize) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let mut kids = Vec::new();
    for n in 0..pages {
        let content = document.add_object(Stream::new(
            Dictionary::new(),
            format!("BT /F1 12 Tf 72 720 Td (Page {n}) Tj ET").into_bytes(),
        ));
        let page = document.add_object(Dictionary::from_iter([
            ("Type", Object::name("Page")),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content)),
        ]));
        kids.push(Object::Reference(page));
    }
    document.set_object(
        pages_id,
        Dictionary::from_iter([
            ("Type", Object::name("Pages")),
            ("Count", Object::Integer(pages as i64)),
            ("Kids", Object::Array(kids)),
        ]),
    );
    let catalog = document.add_object(Dictionary::from_iter([
        ("Type", Object::name("Catalog")),
        ("Pages", Object::Reference(pages_id)),
    ]));
    document.trailer.set("Root", Object::Reference(catalog));
    document.save_mem(SaveOptions::default()).unwrap()
}

fn bench_parse(c: &mut Criterion) {
    let small = sample_pdf(5);
    let large = sample_pdf(500);
    c.bench_function("parse 5 pages", |b| {
        b.iter(|| Document::load_mem(&small).unwrap())
    });
    c.bench_function("parse 500 pages", |b| {
        b.iter(|| Document::load_mem(&large).unwrap())
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
