//! The QDF fixer: after a QDF-mode file has been edited by hand, stream
//! lengths, object offsets and the cross-reference table are stale. This pass
//! recomputes all of them from the text, line by line, without renumbering or
//! otherwise disturbing the edited layout.

use std::collections::BTreeMap;

use crate::{Error, ParseError, Result};

/// The marker that tells the fixer the newline before `endstream` belongs to
/// the file syntax, not the stream data.
pub const IGNORE_NEWLINE: &[u8] = b"%QDF: ignore_newline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Top,
    InObject,
    InStream,
    Tail,
}

struct Line<'a> {
    offset: usize,
    /// Without its terminator.
    text: &'a [u8],
    /// With its terminator.
    raw: &'a [u8],
}

fn lines(input: &[u8]) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\n' {
            out.push(Line {
                offset: start,
                text: trim_cr(&input[start..i]),
                raw: &input[start..=i],
            });
            start = i + 1;
        }
        i += 1;
    }
    if start < input.len() {
        out.push(Line {
            offset: start,
            text: trim_cr(&input[start..]),
            raw: &input[start..],
        });
    }
    out
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_object_header(line: &[u8]) -> Option<(u32, u16)> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_whitespace();
    let id: u32 = parts.next()?.parse().ok()?;
    let generation: u16 = parts.next()?.parse().ok()?;
    if parts.next()? != "obj" || parts.next().is_some() {
        return None;
    }
    Some((id, generation))
}

/// `/Length N 0 R` inside a dictionary line.
fn parse_length_ref(line: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(line).ok()?;
    let after = text.split("/Length ").nth(1)?;
    let mut parts = after.split_whitespace();
    let id: u32 = parts.next()?.parse().ok()?;
    if parts.next()? != "0" || parts.next()? != "R" {
        return None;
    }
    Some(id)
}

/// Re-normalise an edited QDF file. The object layout is kept as it is;
/// length objects, the cross-reference table and `startxref` are rewritten.
pub fn fix_qdf(input: &[u8]) -> Result<Vec<u8>> {
    let lines = lines(input);

    // Pass one: find stream extents and the length object each stream uses.
    let mut state = State::Top;
    let mut current_length_ref: Option<u32> = None;
    let mut stream_data_start = 0usize;
    let mut ignore_newline = false;
    let mut new_lengths: BTreeMap<u32, usize> = BTreeMap::new();

    for (index, line) in lines.iter().enumerate() {
        match state {
            State::Top => {
                if parse_object_header(line.text).is_some() {
                    state = State::InObject;
                    current_length_ref = None;
                } else if line.text == b"xref" {
                    state = State::Tail;
                }
            }
            State::InObject => {
                if let Some(length_ref) = parse_length_ref(line.text) {
                    current_length_ref = Some(length_ref);
                }
                if line.text == b"stream" || line.text.ends_with(b" stream") {
                    state = State::InStream;
                    stream_data_start = line.offset + line.raw.len();
                    ignore_newline = false;
                } else if line.text == b"endobj" {
                    state = State::Top;
                }
            }
            State::InStream => {
                if line.text == IGNORE_NEWLINE && lines.get(index + 1).map(|l| l.text) == Some(b"endstream")
                {
                    // The marker line sits between the data and endstream;
                    // the newline before it is syntax, not data.
                    ignore_newline = true;
                    let length = line.offset.saturating_sub(stream_data_start).saturating_sub(1);
                    if let Some(length_ref) = current_length_ref {
                        new_lengths.insert(length_ref, length);
                    }
                } else if line.text == b"endstream" {
                    if !ignore_newline {
                        let length = line.offset.saturating_sub(stream_data_start);
                        if let Some(length_ref) = current_length_ref {
                            new_lengths.insert(length_ref, length);
                        }
                    }
                    state = State::InObject;
                }
            }
            State::Tail => {}
        }
    }

    // Pass two: emit, patching length object bodies and dropping the stale
    // tail; record offsets for the rebuilt table.
    let mut out = Vec::new();
    let mut offsets: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
    let mut trailer_lines: Vec<&[u8]> = Vec::new();
    let mut state = State::Top;
    let mut patch_body_of: Option<u32> = None;
    let mut in_trailer = false;

    for line in &lines {
        match state {
            State::Top | State::InObject => {
                if state == State::Top {
                    if let Some((id, generation)) = parse_object_header(line.text) {
                        offsets.insert(id, (generation, out.len()));
                        state = State::InObject;
                        patch_body_of = new_lengths.contains_key(&id).then_some(id);
                        out.extend_from_slice(line.raw);
                        continue;
                    }
                    if line.text == b"xref" {
                        state = State::Tail;
                        continue;
                    }
                    out.extend_from_slice(line.raw);
                } else {
                    if line.text == b"stream" || line.text.ends_with(b" stream") {
                        state = State::InStream;
                    } else if line.text == b"endobj" {
                        state = State::Top;
                    } else if let Some(id) = patch_body_of.take() {
                        // The single body line of a length object.
                        out.extend_from_slice(new_lengths[&id].to_string().as_bytes());
                        out.push(b'\n');
                        continue;
                    }
                    out.extend_from_slice(line.raw);
                }
            }
            State::InStream => {
                if line.text == b"endstream" {
                    state = State::InObject;
                }
                out.extend_from_slice(line.raw);
            }
            State::Tail => {
                if line.text == b"trailer" {
                    in_trailer = true;
                    continue;
                }
                if line.text == b"startxref" {
                    in_trailer = false;
                    continue;
                }
                if in_trailer {
                    trailer_lines.push(line.raw);
                }
            }
        }
    }

    if offsets.is_empty() || trailer_lines.is_empty() {
        return Err(Error::Parse(ParseError::InvalidXref));
    }

    // QDF files always use a classic table, even when the source had xref
    // streams.
    let max_id = *offsets.keys().next_back().unwrap();
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", max_id + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for id in 1..=max_id {
        match offsets.get(&id) {
            Some((generation, offset)) => {
                out.extend_from_slice(format!("{offset:010} {generation:05} n \n").as_bytes());
            }
            None => out.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }
    out.extend_from_slice(b"trailer\n");
    for line in trailer_lines {
        out.extend_from_slice(line);
    }
    out.extend_from_slice(format!("startxref\n{xref_start}\n%%EOF\n").as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SaveOptions;
    use crate::Document;

    fn qdf_fixture() -> Vec<u8> {
        let mut document = Document::with_version("1.4");
        let content_id = document.add_object(crate::object::Stream::new(
            crate::object::Dictionary::new(),
            b"BT (x) Tj ET".to_vec(),
        ));
        let pages_id = document.new_object_id();
        let page_id = document.add_object(crate::object::Dictionary::from_iter([
            ("Type", crate::object::Object::name("Page")),
            ("Parent", crate::object::Object::Reference(pages_id)),
            ("Contents", crate::object::Object::Reference(content_id)),
        ]));
        document.set_object(
            pages_id,
            crate::object::Dictionary::from_iter([
                ("Type", crate::object::Object::name("Pages")),
                ("Kids", crate::object::Object::Array(vec![crate::object::Object::Reference(page_id)])),
                ("Count", crate::object::Object::Integer(1)),
            ]),
        );
        let catalog_id = document.add_object(crate::object::Dictionary::from_iter([
            ("Type", crate::object::Object::name("Catalog")),
            ("Pages", crate::object::Object::Reference(pages_id)),
        ]));
        document.trailer.set("Root", crate::object::Object::Reference(catalog_id));
        document.save_mem(SaveOptions::qdf()).unwrap()
    }

    #[test]
    fn untouched_file_still_parses_after_fixing() {
        let original = qdf_fixture();
        let fixed = fix_qdf(&original).unwrap();
        let document = Document::load_mem(&fixed).unwrap();
        assert!(document.warnings.is_empty(), "{:?}", document.warnings.iter().collect::<Vec<_>>());
        assert_eq!(document.page_ids().len(), 1);
    }

    #[test]
    fn edited_stream_gets_its_length_recomputed() {
        let original = qdf_fixture();
        // A hand edit that grows the content stream.
        let edited = {
            let text = original.clone();
            let at = text.windows(8).position(|w| w == b"BT (x) T").unwrap();
            let mut out = text[..at].to_vec();
            out.extend_from_slice(b"BT (a much longer line of text) Tj ET");
            out.extend_from_slice(&text[at + 12..]);
            out
        };
        let fixed = fix_qdf(&edited).unwrap();
        let document = Document::load_mem(&fixed).unwrap();
        assert!(document.warnings.is_empty(), "{:?}", document.warnings.iter().collect::<Vec<_>>());
        let page = document.page_ids()[0];
        let dict = document.get_object(page).unwrap().as_dict().unwrap();
        let contents = dict.get(b"Contents").unwrap();
        let (_, stream) = document.dereference(contents).unwrap();
        assert_eq!(
            stream.as_stream().unwrap().content().unwrap(),
            b"BT (a much longer line of text) Tj ET"
        );
    }

    #[test]
    fn ignore_newline_marker_subtracts_one() {
        let input = b"%PDF-1.4\n1 0 obj\n<<\n  /Length 2 0 R\n>>\nstream\ndata\n%QDF: ignore_newline\nendstream\nendobj\n2 0 obj\n0\nendobj\nxref\n0 3\ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n";
        let fixed = fix_qdf(input).unwrap();
        let text = String::from_utf8_lossy(&fixed);
        // Region up to the marker is "data\n"; the marker subtracts the
        // syntax newline, leaving 4.
        assert!(text.contains("2 0 obj\n4\nendobj"), "{text}");
    }

    #[test]
    fn data_ending_with_newline_needs_no_marker() {
        let input = b"%PDF-1.4\n1 0 obj\n<<\n  /Length 2 0 R\n>>\nstream\ndata\nendstream\nendobj\n2 0 obj\n0\nendobj\nxref\n0 3\ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n";
        let fixed = fix_qdf(input).unwrap();
        let text = String::from_utf8_lossy(&fixed);
        assert!(text.contains("2 0 obj\n5\nendobj"), "{text}");
    }
}
