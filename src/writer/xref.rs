//! Cross-reference emission: the classic table plus trailer, and the stream
//! form with minimal field widths and a PNG Up predictor.

use std::collections::BTreeMap;

use crate::filters::{flate_encode, png_encode_up};
use crate::object::{Dictionary, Object, Stream};
use crate::{Error, Result};

use super::{SerializeCtx, serialize_dictionary};

/// Classic `xref` section. Object ids are contiguous from 1, so one
/// subsection covers everything.
pub(crate) fn write_xref_table(
    out: &mut Vec<u8>, size: u32, offsets: &BTreeMap<u32, u64>, trailer: &Dictionary,
) -> Result<()> {
    out.extend_from_slice(b"xref\n");
    out.extend_from_slice(format!("0 {size}\n").as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for id in 1..size {
        let offset = offsets
            .get(&id)
            .ok_or(Error::Logic("non-contiguous object numbers in xref table"))?;
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(b"trailer\n");
    let ctx = SerializeCtx {
        renumber: None,
        encrypt: None,
        qdf: false,
    };
    serialize_dictionary(out, trailer, &ctx, 0)?;
    out.push(b'\n');
    Ok(())
}

/// Cross-reference stream, required whenever object streams are present. The
/// stream object takes `stream_id` and describes itself too.
pub(crate) fn write_xref_stream(
    out: &mut Vec<u8>, stream_id: u32, offsets: &BTreeMap<u32, u64>,
    compressed: &BTreeMap<u32, (u32, u16)>, mut trailer: Dictionary,
) -> Result<()> {
    let own_offset = out.len() as u64;
    let size = stream_id + 1;

    let max_offset = offsets.values().copied().max().unwrap_or(0).max(own_offset);
    let max_third = compressed
        .values()
        .map(|&(_, index)| u64::from(index))
        .max()
        .unwrap_or(0)
        .max(65535);
    let w1 = 1usize;
    let w2 = width_for(max_offset).max(width_for(u64::from(
        compressed.values().map(|&(container, _)| container).max().unwrap_or(0),
    )));
    let w3 = width_for(max_third);
    let entry_len = w1 + w2 + w3;

    let mut rows = Vec::with_capacity(size as usize * entry_len);
    for id in 0..size {
        if id == 0 {
            push_entry(&mut rows, 0, 0, 65535, w2, w3);
        } else if let Some(offset) = offsets.get(&id) {
            push_entry(&mut rows, 1, *offset, 0, w2, w3);
        } else if let Some(&(container, index)) = compressed.get(&id) {
            push_entry(&mut rows, 2, u64::from(container), u64::from(index), w2, w3);
        } else if id == stream_id {
            push_entry(&mut rows, 1, own_offset, 0, w2, w3);
        } else {
            push_entry(&mut rows, 0, 0, 65535, w2, w3);
        }
    }

    let predicted = png_encode_up(&rows, entry_len);
    let data = flate_encode(&predicted)?;

    trailer.set("Type", Object::name("XRef"));
    trailer.set("Size", size as i64);
    trailer.set(
        "W",
        Object::Array(vec![
            Object::Integer(w1 as i64),
            Object::Integer(w2 as i64),
            Object::Integer(w3 as i64),
        ]),
    );
    trailer.set("Filter", Object::name("FlateDecode"));
    let mut parms = Dictionary::new();
    parms.set("Predictor", 12);
    parms.set("Columns", entry_len as i64);
    trailer.set("DecodeParms", parms);
    trailer.set("Length", data.len() as i64);

    let stream = Stream::new(trailer, data);
    let ctx = SerializeCtx {
        renumber: None,
        encrypt: None,
        qdf: false,
    };
    let mut buffer = itoa::Buffer::new();
    out.extend_from_slice(buffer.format(stream_id).as_bytes());
    out.extend_from_slice(b" 0 obj\n");
    serialize_dictionary(out, &stream.dict, &ctx, 0)?;
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(stream.content()?);
    out.extend_from_slice(b"\nendstream\nendobj\n");
    Ok(())
}

fn width_for(value: u64) -> usize {
    let mut width = 1;
    let mut limit = 0xFFu64;
    while value > limit {
        width += 1;
        limit = (limit << 8) | 0xFF;
    }
    width
}

fn push_entry(rows: &mut Vec<u8>, entry_type: u8, second: u64, third: u64, w2: usize, w3: usize) {
    rows.push(entry_type);
    rows.extend_from_slice(&second.to_be_bytes()[8 - w2..]);
    rows.extend_from_slice(&third.to_be_bytes()[8 - w3..]);
}
