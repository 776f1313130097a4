use criterion::{Criterion, criterion_group, criterion_main};
use pdfmend::{
    Dictionary, Document, Object, ObjectStreamMode, SaveOptions, Stream, StreamDataMode,
};

fn sample_document(pages: usize) -> Document {
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
    document
}

fn bench_save(c: &mut Criterion) {
    c.bench_function("save 100 pages", |b| {
        let mut document = sample_document(100);
        b.iter(|| document.save_mem(SaveOptions::default()).unwrap())
    });
    c.bench_function("save 100 pages compressed + object streams", |b| {
        let mut document = sample_document(100);
        let options = SaveOptions {
            stream_data: StreamDataMode::Compress,
            object_streams: ObjectStreamMode::Generate,
            ..SaveOptions::default()
        };
        b.iter(|| document.save_mem(options.clone()).unwrap())
    });
    c.bench_function("linearize 100 pages", |b| {
        let mut document = sample_document(100);
        let options = SaveOptions {
            linearize: true,
            ..SaveOptions::default()
        };
        b.iter(|| document.save_mem(options.clone()).unwrap())
    });
}

criterion_group!(benches, bench_save);
criterion_main!(benches);
