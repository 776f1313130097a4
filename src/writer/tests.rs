use super::*;
use crate::Document;
use crate::encryption::{EncryptionRequest, Permissions};
use crate::object::StringFormat;

fn content_bytes(n: usize) -> Vec<u8> {
    format!("BT /F1 12 Tf 72 720 Td (Page {n}) Tj ET").into_bytes()
}

/// A document with `page_count` pages, each with its own content stream.
fn sample_document(page_count: usize) -> Document {
    let mut document = Document::with_version("1.4");
    let pages_id = document.new_object_id();
    let mut kids = Vec::new();
    for n in 1..=page_count {
        let content_id = document.add_object(crate::object::Stream::new(
            Dictionary::new(),
            content_bytes(n),
        ));
        let page_id = document.add_object(Dictionary::from_iter([
            ("Type", Object::name("Page")),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }
    document.set_object(
        pages_id,
        Dictionary::from_iter([
            ("Type", Object::name("Pages")),
            ("Count", Object::Integer(page_count as i64)),
            ("Kids", Object::Array(kids)),
        ]),
    );
    let catalog_id = document.add_object(Dictionary::from_iter([
        ("Type", Object::name("Catalog")),
        ("Pages", Object::Reference(pages_id)),
    ]));
    document.trailer.set("Root", Object::Reference(catalog_id));
    document
}

fn first_content(document: &Document) -> Vec<u8> {
    let page = document.page_ids()[0];
    let dict = document.get_object(page).unwrap().as_dict().unwrap();
    let contents = dict.get(b"Contents").unwrap();
    let (_, stream) = document.dereference(contents).unwrap();
    stream.as_stream().unwrap().content().unwrap().to_vec()
}

#[test]
fn round_trip_simple_document() {
    let mut document = sample_document(1);
    let bytes = document.save_mem(SaveOptions::default()).unwrap();
    let reloaded = Document::load_mem(&bytes).unwrap();
    assert!(reloaded.warnings.is_empty(), "{:?}", reloaded.warnings.iter().collect::<Vec<_>>());
    assert_eq!(reloaded.page_ids().len(), 1);
    let catalog = reloaded.catalog().unwrap();
    assert!(catalog.has_type(b"Catalog"));
    let pages = reloaded.resolve(catalog.get(b"Pages").unwrap()).as_dict().unwrap();
    assert_eq!(pages.get(b"Count").unwrap().as_i64().unwrap(), 1);
    assert_eq!(first_content(&reloaded), content_bytes(1));
}

#[test]
fn write_parse_write_is_stable() {
    let mut document = sample_document(2);
    let options = SaveOptions {
        id_policy: IdPolicy::Static,
        ..SaveOptions::default()
    };
    let first = document.save_mem(options.clone()).unwrap();
    let mut reloaded = Document::load_mem(&first).unwrap();
    let second = reloaded.save_mem(options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn deterministic_id_is_a_pure_function() {
    let options = SaveOptions {
        id_policy: IdPolicy::Deterministic,
        ..SaveOptions::default()
    };
    let first = sample_document(3).save_mem(options.clone()).unwrap();
    let second = sample_document(3).save_mem(options).unwrap();
    assert_eq!(first, second);
    let zero_id = [b"<".to_vec(), vec![b'0'; 32], b">".to_vec()].concat();
    assert!(
        !first.windows(zero_id.len()).any(|w| w == zero_id),
        "placeholder ID leaked into output"
    );
}

#[test]
fn compress_then_uncompress_round_trips() {
    let mut document = sample_document(1);
    let compressed = document
        .save_mem(SaveOptions {
            stream_data: StreamDataMode::Compress,
            ..SaveOptions::default()
        })
        .unwrap();
    let mut reloaded = Document::load_mem(&compressed).unwrap();
    assert_eq!(first_content(&reloaded), content_bytes(1));

    let uncompressed = reloaded
        .save_mem(SaveOptions {
            stream_data: StreamDataMode::Uncompress,
            ..SaveOptions::default()
        })
        .unwrap();
    let reloaded = Document::load_mem(&uncompressed).unwrap();
    let page = reloaded.page_ids()[0];
    let dict = reloaded.get_object(page).unwrap().as_dict().unwrap();
    let contents_id = dict.get(b"Contents").unwrap().as_reference().unwrap();
    let stream = reloaded.get_object(contents_id).unwrap().as_stream().unwrap().clone();
    assert!(stream.filters().is_empty());
    assert_eq!(stream.content().unwrap(), content_bytes(1));
}

#[test]
fn object_stream_generation() {
    let mut document = sample_document(1);
    let mut extras = Vec::new();
    for n in 0..50i64 {
        let id = document.add_object(Dictionary::from_iter([("Value", Object::Integer(n))]));
        extras.push(Object::Reference(id));
    }
    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    document
        .get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Extras", Object::Array(extras));

    let bytes = document
        .save_mem(SaveOptions {
            object_streams: ObjectStreamMode::Generate,
            ..SaveOptions::default()
        })
        .unwrap();
    let needle = b"/Type /ObjStm";
    assert!(bytes.windows(needle.len()).any(|w| w == needle));
    let needle = b"/Type /XRef";
    assert!(bytes.windows(needle.len()).any(|w| w == needle));

    let reloaded = Document::load_mem(&bytes).unwrap();
    assert!(reloaded.warnings.is_empty(), "{:?}", reloaded.warnings.iter().collect::<Vec<_>>());
    let catalog = reloaded.catalog().unwrap();
    let extras = reloaded.resolve(catalog.get(b"Extras").unwrap());
    let extras = extras.as_array().unwrap();
    assert_eq!(extras.len(), 50);
    let mut values: Vec<i64> = extras
        .iter()
        .map(|r| reloaded.resolve(r).as_dict().unwrap().get(b"Value").unwrap().as_i64().unwrap())
        .collect();
    values.sort();
    assert_eq!(values, (0..50).collect::<Vec<i64>>());
}

#[test]
fn object_streams_preserved_on_rewrite() {
    let mut document = sample_document(1);
    let id = document.add_object(Dictionary::from_iter([("Marker", Object::Integer(7))]));
    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    document
        .get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Extra", Object::Reference(id));
    let generated = document
        .save_mem(SaveOptions {
            object_streams: ObjectStreamMode::Generate,
            ..SaveOptions::default()
        })
        .unwrap();
    let mut reloaded = Document::load_mem(&generated).unwrap();
    let preserved = reloaded.save_mem(SaveOptions::default()).unwrap();
    let needle = b"/Type /ObjStm";
    assert!(preserved.windows(needle.len()).any(|w| w == needle));
    let again = Document::load_mem(&preserved).unwrap();
    let catalog = again.catalog().unwrap();
    let marker = again.resolve(catalog.get(b"Extra").unwrap()).as_dict().unwrap();
    assert_eq!(marker.get(b"Marker").unwrap().as_i64().unwrap(), 7);
}

#[test]
fn encryption_regenerate_and_strip() {
    let mut document = sample_document(1);
    let request = EncryptionRequest {
        user_password: "user".into(),
        owner_password: "owner".into(),
        revision: 6,
        permissions: Permissions::default(),
        encrypt_metadata: true,
    };
    let encrypted = document
        .save_mem(SaveOptions {
            encryption: EncryptionMode::Regenerate(request),
            ..SaveOptions::default()
        })
        .unwrap();
    // The plaintext must not appear in the encrypted file.
    assert!(!encrypted.windows(6).any(|w| w == b"Page 1"));

    assert!(matches!(
        Document::load_mem_with_password(&encrypted, "nope"),
        Err(Error::InvalidPassword)
    ));

    let mut decrypted = Document::load_mem_with_password(&encrypted, "user").unwrap();
    assert_eq!(first_content(&decrypted), content_bytes(1));

    let stripped = decrypted
        .save_mem(SaveOptions {
            encryption: EncryptionMode::Disable,
            ..SaveOptions::default()
        })
        .unwrap();
    let plain = Document::load_mem(&stripped).unwrap();
    assert!(plain.trailer.opt(b"Encrypt").is_none());
    assert_eq!(first_content(&plain), content_bytes(1));
}

#[test]
fn encryption_r4_round_trip() {
    let mut document = sample_document(1);
    let request = EncryptionRequest {
        user_password: String::new(),
        owner_password: "owner".into(),
        revision: 4,
        permissions: Permissions::PRINT,
        encrypt_metadata: true,
    };
    let encrypted = document
        .save_mem(SaveOptions {
            encryption: EncryptionMode::Regenerate(request),
            ..SaveOptions::default()
        })
        .unwrap();
    // The empty user password opens it without prompting.
    let decrypted = Document::load_mem(&encrypted).unwrap();
    assert_eq!(first_content(&decrypted), content_bytes(1));
    let state = decrypted.encryption_state.as_ref().unwrap();
    assert_eq!(state.revision, 4);
    assert!(state.permissions.contains(Permissions::PRINT));
}

#[test]
fn encryption_preserved_on_rewrite() {
    let mut document = sample_document(1);
    let request = EncryptionRequest {
        user_password: "pw".into(),
        owner_password: String::new(),
        revision: 6,
        permissions: Permissions::default(),
        encrypt_metadata: true,
    };
    let encrypted = document
        .save_mem(SaveOptions {
            encryption: EncryptionMode::Regenerate(request),
            ..SaveOptions::default()
        })
        .unwrap();
    let mut opened = Document::load_mem_with_password(&encrypted, "pw").unwrap();
    let rewritten = opened.save_mem(SaveOptions::default()).unwrap();
    let reopened = Document::load_mem_with_password(&rewritten, "pw").unwrap();
    assert_eq!(first_content(&reopened), content_bytes(1));
}

#[test]
fn linearized_output_shape() {
    let mut document = sample_document(10);
    let bytes = document
        .save_mem(SaveOptions {
            linearize: true,
            id_policy: IdPolicy::Deterministic,
            ..SaveOptions::default()
        })
        .unwrap();
    assert!(bytes.starts_with(b"%PDF-1."));
    // The first object after the header is the linearization dictionary.
    let header_end = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
        .map(|(i, _)| i)
        .nth(1)
        .unwrap();
    let after_header = &bytes[header_end + 1..];
    let obj_at = after_header.windows(5).position(|w| w == b" obj\n").unwrap();
    let lin = &after_header[obj_at + 5..];
    assert!(lin.starts_with(b"<< /Linearized 1 /L "), "got {:?}", &lin[..30]);
    let needle = b"/N 10";
    assert!(bytes.windows(needle.len()).any(|w| w == needle));

    let reloaded = Document::load_mem(&bytes).unwrap();
    assert_eq!(reloaded.page_ids().len(), 10);
    assert_eq!(first_content(&reloaded), content_bytes(1));

    // Deterministic: a second run produces identical bytes.
    let again = sample_document(10)
        .save_mem(SaveOptions {
            linearize: true,
            id_policy: IdPolicy::Deterministic,
            ..SaveOptions::default()
        })
        .unwrap();
    assert_eq!(bytes, again);

    // The first page's machinery sits inside the /E prefix.
    let e_marker = bytes.windows(4).position(|w| w == b"/E 0").unwrap();
    let e_value: usize = std::str::from_utf8(&bytes[e_marker + 3..e_marker + 13])
        .unwrap()
        .parse()
        .unwrap();
    let prefix = &bytes[..e_value];
    assert!(prefix.windows(7).any(|w| w == b"(Page 1"));
}

#[test]
fn qdf_mode_is_inspectable() {
    let mut document = sample_document(1);
    let bytes = document.save_mem(SaveOptions::qdf()).unwrap();
    assert!(bytes.windows(9).any(|w| w == b"%QDF-1.0\n"));
    // No compressed payloads: the content stream text is readable.
    assert!(bytes.windows(7).any(|w| w == b"(Page 1"));
    let reloaded = Document::load_mem(&bytes).unwrap();
    assert_eq!(reloaded.page_ids().len(), 1);
}

#[test]
fn preserve_unreferenced_objects() {
    let mut document = sample_document(1);
    document.add_object(Object::String(b"orphan".to_vec(), StringFormat::Literal));
    let dropped = document.save_mem(SaveOptions::default()).unwrap();
    assert!(!dropped.windows(6).any(|w| w == b"orphan"));
    let kept = document
        .save_mem(SaveOptions {
            preserve_unreferenced: true,
            ..SaveOptions::default()
        })
        .unwrap();
    assert!(kept.windows(6).any(|w| w == b"orphan"));
}

#[test]
fn reals_are_normalized_on_write() {
    let mut document = sample_document(1);
    let id = document.add_object(Object::Real(crate::object::Real::parse("0.500").unwrap()));
    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    document
        .get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Ratio", Object::Reference(id));
    let bytes = document.save_mem(SaveOptions::default()).unwrap();
    let reloaded = Document::load_mem(&bytes).unwrap();
    let catalog = reloaded.catalog().unwrap();
    match reloaded.resolve(catalog.get(b"Ratio").unwrap()) {
        Object::Real(real) => assert_eq!(real.as_text(), "0.5"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn names_with_odd_bytes_round_trip() {
    let mut document = sample_document(1);
    let mut dict = Dictionary::new();
    dict.set(b"Needs Escape".to_vec(), Object::Integer(1));
    let id = document.add_object(dict);
    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    document
        .get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Odd", Object::Reference(id));
    let bytes = document.save_mem(SaveOptions::default()).unwrap();
    let reloaded = Document::load_mem(&bytes).unwrap();
    let catalog = reloaded.catalog().unwrap();
    let odd = reloaded.resolve(catalog.get(b"Odd").unwrap()).as_dict().unwrap();
    assert!(odd.has(b"Needs Escape"));
}

#[test]
fn binary_strings_round_trip() {
    let mut document = sample_document(1);
    let payload: Vec<u8> = (0u8..=255).collect();
    let id = document.add_object(Object::String(payload.clone(), StringFormat::Literal));
    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    document
        .get_object_mut(root)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Blob", Object::Reference(id));
    let bytes = document.save_mem(SaveOptions::default()).unwrap();
    let reloaded = Document::load_mem(&bytes).unwrap();
    let catalog = reloaded.catalog().unwrap();
    assert_eq!(reloaded.resolve(catalog.get(b"Blob").unwrap()).as_str().unwrap(), payload);
}
