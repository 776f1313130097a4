use super::*;
use crate::Document;

/// Assemble a classic-xref PDF from numbered object bodies.
fn build_pdf(objects: &[(u32, &str)], trailer_extra: &str) -> Vec<u8> {
    let mut out = b"%PDF-1.5\n%\xb5\xb5\xb5\xb5\n".to_vec();
    let mut offsets = Vec::new();
    for (id, body) in objects {
        offsets.push((*id, out.len()));
        out.extend_from_slice(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for (_, offset) in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R {trailer_extra}>>\nstartxref\n{xref_start}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    out
}

fn one_page_pdf() -> Vec<u8> {
    build_pdf(
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
            (3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>"),
            (4, "<< /Length 36 >>\nstream\nBT /F1 12 Tf 72 720 Td (Hello) Tj ET\nendstream"),
        ],
        "",
    )
}

#[test]
fn load_simple_document() {
    let document = Document::load_mem(&one_page_pdf()).unwrap();
    assert_eq!(document.version, "1.5");
    assert!(document.warnings.is_empty(), "{:?}", document.warnings.iter().collect::<Vec<_>>());
    assert_eq!(document.page_ids(), vec![(3, 0)]);

    let catalog = document.catalog().unwrap();
    assert!(catalog.has_type(b"Catalog"));

    let content = document.get_object((4, 0)).unwrap();
    let stream = content.as_stream().unwrap();
    assert_eq!(stream.content().unwrap().len(), 36);
    let parsed = crate::content::Content::parse(stream.content().unwrap()).unwrap();
    assert_eq!(parsed.operations.last().unwrap().operator, "ET");
}

#[test]
fn binary_mark_is_kept() {
    let document = Document::load_mem(&one_page_pdf()).unwrap();
    assert_eq!(document.binary_mark, b"\xb5\xb5\xb5\xb5");
}

#[test]
fn garbage_before_header_is_skipped() {
    let mut data = b"junk junk junk\n".to_vec();
    data.extend_from_slice(&one_page_pdf());
    let document = Document::load_mem(&data).unwrap();
    assert_eq!(document.version, "1.5");
    assert_eq!(document.warnings.len(), 1);
}

#[test]
fn missing_header_is_fatal() {
    assert!(Document::load_mem(b"not a pdf at all").is_err());
}

#[test]
fn truncated_file_without_recovery_is_fatal() {
    let options = LoadOptions {
        attempt_recovery: false,
        ..LoadOptions::new()
    };
    let result = Document::load_mem_with_options(b"%PDF-1.5\n%%EOF\n", options);
    assert!(result.is_err());
}

#[test]
fn destroyed_xref_is_reconstructed() {
    let mut data = one_page_pdf();
    // Overwrite the entire tail: xref, trailer and startxref all go.
    let tail = data.len() - 200;
    for byte in &mut data[tail..] {
        *byte = 0;
    }
    let document = Document::load_mem(&data).unwrap();
    assert!(!document.warnings.is_empty());
    let catalog = document.catalog().unwrap();
    assert!(catalog.has_type(b"Catalog"));
    assert_eq!(document.page_ids(), vec![(3, 0)]);
}

#[test]
fn repair_prefers_later_definitions() {
    // The same object defined twice, as in an incremental update.
    let mut data = b"%PDF-1.4\n".to_vec();
    data.extend_from_slice(b"1 0 obj\n(old)\nendobj\n");
    data.extend_from_slice(b"2 0 obj\n<< /Type /Catalog >>\nendobj\n");
    data.extend_from_slice(b"1 0 obj\n(new)\nendobj\n");
    let options = LoadOptions {
        force_recovery: true,
        ..LoadOptions::new()
    };
    let document = Document::load_mem_with_options(&data, options).unwrap();
    assert_eq!(document.get_object((1, 0)).unwrap().as_str().unwrap(), b"new");
}

#[test]
fn prev_chain_merges_newest_first() {
    // An incremental update shadowing object 4 of the original.
    let mut data = one_page_pdf();
    let update_offset = data.len();
    data.extend_from_slice(b"4 0 obj\n<< /Length 1 >>\nstream\nq\nendstream\nendobj\n");
    let xref_start = data.len();
    data.extend_from_slice(format!("xref\n4 1\n{update_offset:010} 00000 n \n").as_bytes());
    let original_start = one_page_pdf()
        .windows(9)
        .rposition(|w| w == b"startxref")
        .map(|p| {
            let tail = &one_page_pdf()[p + 9..];
            std::str::from_utf8(tail)
                .unwrap()
                .split_whitespace()
                .next()
                .unwrap()
                .parse::<usize>()
                .unwrap()
        })
        .unwrap();
    data.extend_from_slice(
        format!("trailer\n<< /Size 5 /Root 1 0 R /Prev {original_start} >>\nstartxref\n{xref_start}\n%%EOF\n")
            .as_bytes(),
    );
    let document = Document::load_mem(&data).unwrap();
    let stream = document.get_object((4, 0)).unwrap().as_stream().unwrap().clone();
    assert_eq!(stream.content().unwrap(), b"q");
    // Objects only present in the original section still resolve.
    assert!(document.get_object((1, 0)).is_ok());
}

#[test]
fn generation_mismatch_warns_and_header_wins() {
    let mut data = b"%PDF-1.4\n".to_vec();
    let body_offset = data.len();
    data.extend_from_slice(b"1 3 obj\n(v)\nendobj\n");
    let xref_start = data.len();
    data.extend_from_slice(b"xref\n0 2\n0000000000 65535 f \n");
    data.extend_from_slice(format!("{body_offset:010} 00002 n \n").as_bytes());
    data.extend_from_slice(
        format!("trailer\n<< /Size 2 /Root 1 2 R >>\nstartxref\n{xref_start}\n%%EOF\n").as_bytes(),
    );
    let document = Document::load_mem(&data).unwrap();
    assert!(document.has_object((1, 3)));
    assert!(!document.warnings.is_empty());
}

#[test]
fn stream_longer_than_file_truncates_with_warning() {
    let data = build_pdf(
        &[
            (1, "<< /Type /Catalog >>"),
            (2, "<< /Length 100000 >>\nstream\nshort\nendstream"),
        ],
        "",
    );
    let document = Document::load_mem(&data).unwrap();
    assert!(!document.warnings.is_empty());
    let stream = document.get_object((2, 0)).unwrap().as_stream().unwrap().clone();
    // Recovered by scanning to endstream instead of the bogus length.
    assert_eq!(stream.content().unwrap(), b"short");
}

#[test]
fn reference_cycle_in_length_resolves_to_recovery() {
    let data = build_pdf(
        &[
            (1, "<< /Type /Catalog >>"),
            (2, "<< /Length 2 0 R >>\nstream\nxy\nendstream"),
        ],
        "",
    );
    let document = Document::load_mem(&data).unwrap();
    let stream = document.get_object((2, 0)).unwrap().as_stream().unwrap().clone();
    assert_eq!(stream.content().unwrap(), b"xy");
    assert!(!document.warnings.is_empty());
}
