//! Linearised ("fast web view") output. The file is laid out so the first
//! page renders from a prefix: linearization parameter dictionary, first-page
//! cross-reference section, hint streams, the catalog and first-page objects,
//! then everything else, with the main cross-reference section at the end.
//!
//! Offsets that are only known once the tail is written are emitted as
//! fixed-width placeholders and patched in a second pass, so the layout never
//! shifts between passes.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::Document;
use crate::object::{Object, ObjectId};
use crate::{Error, Result};

use super::{EncryptionMode, ObjectStreamMode, SaveOptions, SerializeCtx, Writer, serialize_dictionary};

/// Decimal placeholder width for patched numbers.
const NUM_WIDTH: usize = 10;

struct Patch {
    position: usize,
    value: u64,
}

pub(crate) fn write_linearized(document: &mut Document, options: &SaveOptions) -> Result<Vec<u8>> {
    let encrypting = match &options.encryption {
        EncryptionMode::Disable => false,
        EncryptionMode::Preserve => document.encryption_state.is_some(),
        EncryptionMode::Regenerate(_) => true,
    };
    if encrypting {
        return Err(Error::Unsupported("linearised output of encrypted documents"));
    }
    let pages = document.page_ids();
    let Some(&first_page) = pages.first() else {
        // Nothing to front-load; fall back to a plain write.
        let options = SaveOptions {
            linearize: false,
            ..options.clone()
        };
        return document.save_mem(options);
    };
    let options = SaveOptions {
        linearize: false,
        object_streams: ObjectStreamMode::Disable,
        encryption: EncryptionMode::Disable,
        ..options.clone()
    };

    let root = document
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| Error::Logic("cannot linearise a document without a root"))?;

    // First part: the catalog, the first page, and what only it reaches.
    let first_reach = reach(document, first_page);
    let mut shared: BTreeSet<ObjectId> = BTreeSet::new();
    for &page in pages.iter().skip(1) {
        shared.extend(reach(document, page));
    }
    let mut part1: Vec<ObjectId> = vec![root, first_page];
    for id in &first_reach {
        if *id != root && *id != first_page && !shared.contains(id) {
            part1.push(*id);
        }
    }
    let part1_set: BTreeSet<ObjectId> = part1.iter().copied().collect();

    let mut part2: Vec<ObjectId> = Vec::new();
    for id in document.reachable_objects() {
        let keep = match document.objects.get(&id) {
            Some(Object::Stream(stream)) => {
                !stream.dict.has_type(b"ObjStm") && !stream.dict.has_type(b"XRef")
            }
            Some(_) => true,
            None => false,
        };
        if keep && !part1_set.contains(&id) {
            part2.push(id);
        }
    }

    // Numbering: the tail gets 1..=k, the front k+1..=m, then the
    // linearization dictionary and the hint stream.
    let mut order = part2.clone();
    order.extend(part1.iter().copied());
    let writer = Writer::with_numbering(document, &options, &order)?;
    let tail_count = part2.len() as u32;
    let front_first = tail_count + 1;
    let object_count = order.len() as u32;
    let lin_id = object_count + 1;
    let hint_id = object_count + 2;
    let size = hint_id + 1;

    let mut out = Vec::new();
    writer.write_header(&mut out);

    // Linearization parameter dictionary, placeholders first.
    let lin_offset = out.len() as u64;
    let first_page_new = writer.new_id_of(first_page).unwrap();
    out.extend_from_slice(format!("{lin_id} 0 obj\n<< /Linearized 1 /L ").as_bytes());
    let patch_l = placeholder(&mut out);
    out.extend_from_slice(b" /H [ ");
    let patch_hint_offset = placeholder(&mut out);
    out.push(b' ');
    let patch_hint_length = placeholder(&mut out);
    out.extend_from_slice(format!(" ] /O {first_page_new} /E ").as_bytes());
    let patch_e = placeholder(&mut out);
    out.extend_from_slice(format!(" /N {} /T ", pages.len()).as_bytes());
    let patch_t = placeholder(&mut out);
    out.extend_from_slice(b" >>\nendobj\n");

    // First-page cross-reference table: front objects, then the
    // linearization dictionary and hint stream entries.
    let first_xref_offset = out.len() as u64;
    let front_ids: Vec<u32> = (front_first..=object_count).chain([lin_id, hint_id]).collect();
    out.extend_from_slice(format!("xref\n{front_first} {}\n", front_ids.len()).as_bytes());
    let mut entry_patches: BTreeMap<u32, usize> = BTreeMap::new();
    for id in &front_ids {
        entry_patches.insert(*id, out.len());
        out.extend_from_slice(b"0000000000 00000 n \n");
    }
    let mut first_trailer = writer.build_trailer(size, None);
    first_trailer.set("Prev", Object::Integer(0));
    out.extend_from_slice(b"trailer\n");
    let trailer_bytes = {
        let ctx = SerializeCtx {
            renumber: None,
            encrypt: None,
            qdf: false,
        };
        let mut buffer = Vec::new();
        serialize_dictionary(&mut buffer, &first_trailer, &ctx, 0)?;
        buffer
    };
    // The /Prev value is patched to the main xref offset; find its slot by
    // re-serialising with a fixed-width placeholder instead.
    let prev_marker = b"/Prev 0";
    let prev_at = find_last_subslice(&trailer_bytes, prev_marker)
        .ok_or(Error::Logic("trailer serialisation lost /Prev"))?;
    out.extend_from_slice(&trailer_bytes[..prev_at + 6]);
    let patch_prev = placeholder(&mut out);
    out.extend_from_slice(&trailer_bytes[prev_at + 7..]);
    out.push(b'\n');
    out.extend_from_slice(b"startxref\n0\n%%EOF\n");

    // Hint stream: fixed-size uncompressed tables so the layout is stable
    // across passes. Values are patched once offsets are known.
    let hint_offset = out.len() as u64;
    let page_entries = 3 * pages.len();
    let shared_header = 7;
    let hint_len = (13 + page_entries + shared_header) * 4;
    let shared_table_offset = (13 + page_entries) * 4;
    out.extend_from_slice(
        format!("{hint_id} 0 obj\n<< /Length {hint_len} /S {shared_table_offset} >>\nstream\n").as_bytes(),
    );
    let hint_data_at = out.len();
    out.extend_from_slice(&vec![0u8; hint_len]);
    out.extend_from_slice(b"\nendstream\nendobj\n");
    let hint_total_len = out.len() as u64 - hint_offset;

    // Front objects: catalog first, then the first page and its private
    // objects.
    let mut offsets: BTreeMap<u32, u64> = BTreeMap::new();
    for old_id in &part1 {
        let new_id = writer.new_id_of(*old_id).unwrap();
        offsets.insert(new_id, out.len() as u64);
        writer.write_indirect_object(&mut out, new_id, *old_id)?;
    }
    let end_first_page = out.len() as u64;

    // The tail.
    for old_id in &part2 {
        let new_id = writer.new_id_of(*old_id).unwrap();
        offsets.insert(new_id, out.len() as u64);
        writer.write_indirect_object(&mut out, new_id, *old_id)?;
    }

    // Main cross-reference table covers the tail ids.
    let main_xref_offset = out.len() as u64;
    out.extend_from_slice(format!("xref\n0 {}\n", tail_count + 1).as_bytes());
    let main_first_entry = out.len() as u64;
    out.extend_from_slice(b"0000000000 65535 f \n");
    for id in 1..=tail_count {
        let offset = offsets
            .get(&id)
            .ok_or(Error::Logic("tail object missing from offset table"))?;
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    let main_trailer = {
        let mut trailer = writer.build_trailer(size, None);
        trailer.remove(b"Prev");
        trailer
    };
    out.extend_from_slice(b"trailer\n");
    let ctx = SerializeCtx {
        renumber: None,
        encrypt: None,
        qdf: false,
    };
    serialize_dictionary(&mut out, &main_trailer, &ctx, 0)?;
    out.push(b'\n');
    out.extend_from_slice(format!("startxref\n{first_xref_offset}\n%%EOF\n").as_bytes());

    // Second pass: patch everything that depended on the final layout.
    let mut patches: Vec<Patch> = Vec::new();
    patches.push(Patch {
        position: patch_l,
        value: out.len() as u64,
    });
    patches.push(Patch {
        position: patch_hint_offset,
        value: hint_offset,
    });
    patches.push(Patch {
        position: patch_hint_length,
        value: hint_total_len,
    });
    patches.push(Patch {
        position: patch_e,
        value: end_first_page,
    });
    patches.push(Patch {
        position: patch_t,
        value: main_first_entry,
    });
    patches.push(Patch {
        position: patch_prev,
        value: main_xref_offset,
    });
    for patch in &patches {
        apply_patch(&mut out, patch.position, patch.value);
    }
    for (id, position) in &entry_patches {
        let offset = if *id == lin_id {
            lin_offset
        } else if *id == hint_id {
            hint_offset
        } else {
            *offsets.get(id).ok_or(Error::Logic("front object missing from offset table"))?
        };
        out[*position..*position + NUM_WIDTH].copy_from_slice(format!("{offset:010}").as_bytes());
    }
    write_hint_tables(&mut out, hint_data_at, document, &pages, &offsets, &writer, end_first_page);

    if options.id_policy == super::IdPolicy::Deterministic {
        patch_deterministic_ids(&mut out, writer.file_id().0.len());
    }

    Ok(out)
}

/// Both trailers carry the `/ID` placeholder as a hex string of zeros; the
/// digest covers everything before the first of them.
fn patch_deterministic_ids(out: &mut Vec<u8>, id_len: usize) {
    use md5::{Digest, Md5};
    let marker: Vec<u8> = {
        let mut m = vec![b'<'];
        m.extend(std::iter::repeat_n(b'0', id_len * 2));
        m.push(b'>');
        m
    };
    let Some(first) = out.windows(marker.len()).position(|w| w == marker) else {
        return;
    };
    let digest = Md5::digest(&out[..first]);
    let mut replacement = vec![b'<'];
    for b in digest {
        replacement.extend_from_slice(format!("{b:02x}").as_bytes());
    }
    replacement.push(b'>');
    let positions: Vec<usize> = out
        .windows(marker.len())
        .enumerate()
        .filter(|(_, w)| *w == marker)
        .map(|(i, _)| i)
        .collect();
    for position in positions {
        out[position..position + marker.len()].copy_from_slice(&replacement);
    }
}

fn placeholder(out: &mut Vec<u8>) -> usize {
    let position = out.len();
    out.extend_from_slice(&[b'0'; NUM_WIDTH]);
    position
}

fn apply_patch(out: &mut [u8], position: usize, value: u64) {
    let text = format!("{value:0width$}", width = NUM_WIDTH);
    out[position..position + NUM_WIDTH].copy_from_slice(text.as_bytes());
}

/// Page-offset and shared-object hint tables. Field widths are declared in
/// the header, and everything is written as whole 32-bit values; the tables
/// are advisory and coarse widths keep the layout pass-stable.
fn write_hint_tables(
    out: &mut Vec<u8>, at: usize, document: &Document, pages: &[ObjectId],
    offsets: &BTreeMap<u32, u64>, writer: &Writer, end_first_page: u64,
) {
    let mut cursor = at;
    let mut put = |out: &mut Vec<u8>, cursor: &mut usize, value: u32| {
        out[*cursor..*cursor + 4].copy_from_slice(&value.to_be_bytes());
        *cursor += 4;
    };

    let page_lengths: Vec<u32> = pages
        .iter()
        .map(|page| {
            writer
                .new_id_of(*page)
                .and_then(|id| offsets.get(&id).copied())
                .map(|offset| (end_first_page.saturating_sub(offset)).min(u64::from(u32::MAX)) as u32)
                .unwrap_or(0)
        })
        .collect();
    let least_length = page_lengths.iter().copied().min().unwrap_or(0);
    let first_page_offset = pages
        .first()
        .and_then(|page| writer.new_id_of(*page))
        .and_then(|id| offsets.get(&id).copied())
        .unwrap_or(0) as u32;

    // Page offset hint table header, 13 declared fields.
    put(out, &mut cursor, 1); // least objects per page
    put(out, &mut cursor, first_page_offset);
    put(out, &mut cursor, 32); // bits per delta object count
    put(out, &mut cursor, least_length);
    put(out, &mut cursor, 32); // bits per delta page length
    put(out, &mut cursor, 0); // least content stream offset
    put(out, &mut cursor, 32); // bits per content offset delta
    put(out, &mut cursor, 0); // least content stream length
    put(out, &mut cursor, 32); // bits per content length delta
    put(out, &mut cursor, 32); // bits per shared reference count
    put(out, &mut cursor, 32); // bits per shared identifier
    put(out, &mut cursor, 32); // bits per shared numerator
    put(out, &mut cursor, 1); // fraction denominator

    for (page, length) in pages.iter().zip(&page_lengths) {
        let object_count = reach(document, *page).len().max(1) as u32;
        put(out, &mut cursor, object_count - 1);
        put(out, &mut cursor, length.saturating_sub(least_length));
        put(out, &mut cursor, 0); // shared references on this page
    }

    // Shared object hint table header: no shared entries are emitted.
    put(out, &mut cursor, 0); // first shared object number
    put(out, &mut cursor, 0); // location of first shared object
    put(out, &mut cursor, 0); // shared objects on the first page
    put(out, &mut cursor, 0); // shared objects total
    put(out, &mut cursor, 32); // bits per object count
    put(out, &mut cursor, 0); // least group length
    put(out, &mut cursor, 32); // bits per group length delta
}

/// Object ids a page needs, in discovery order. `/Parent` links are not
/// followed and other page or page-tree nodes are not expanded, so the walk
/// stays within the page's own resources instead of pulling in the whole
/// document through the page tree.
fn reach(document: &Document, start: ObjectId) -> Vec<ObjectId> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    seen.insert(start);
    order.push(start);
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        let Some(object) = document.objects.get(&id) else {
            continue;
        };
        if id != start {
            if let Ok(dict) = object.as_dict() {
                if dict.has_type(b"Page") || dict.has_type(b"Pages") {
                    continue;
                }
            }
        }
        collect(object, &mut |target| {
            if seen.insert(target) {
                order.push(target);
                stack.push(target);
            }
        });
    }
    order
}

fn collect(object: &Object, found: &mut impl FnMut(ObjectId)) {
    match object {
        Object::Reference(id) => found(*id),
        Object::Array(items) => {
            for item in items {
                collect(item, found);
            }
        }
        Object::Dictionary(dict) => {
            for (key, value) in dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                collect(value, found);
            }
        }
        Object::Stream(stream) => {
            for (key, value) in stream.dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                collect(value, found);
            }
        }
        _ => {}
    }
}

fn find_last_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).rev().find(|&i| &haystack[i..i + needle.len()] == needle)
}
