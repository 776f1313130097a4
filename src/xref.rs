//! The cross-reference index: maps object numbers to where the object lives.
//! Sections are read newest to oldest; the first entry seen for an object
//! wins, which is how incremental updates shadow older definitions.

use std::collections::BTreeMap;

use log::warn;

use crate::filters::{DecodeLevel, decode_stream};
use crate::object::{Dictionary, Object, Stream};
use crate::{Error, Result, XrefError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefType {
    CrossReferenceTable,
    CrossReferenceStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrefEntry {
    /// Head of the free list entry: `next` is the next free object number.
    Free { next: u32, generation: u16 },
    /// A free entry whose generation is 65535 and can never be reused.
    UnusableFree,
    Normal { offset: u64, generation: u16 },
    Compressed { container: u32, index: u16 },
}

impl XrefEntry {
    pub fn is_normal(&self) -> bool {
        matches!(self, XrefEntry::Normal { .. })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, XrefEntry::Compressed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Xref {
    pub kind: XrefType,
    pub entries: BTreeMap<u32, XrefEntry>,
    /// The trailer `/Size`: one past the highest object number.
    pub size: u32,
}

impl Xref {
    pub fn new(size: u32, kind: XrefType) -> Xref {
        Xref {
            kind,
            entries: BTreeMap::new(),
            size,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Fold an older section underneath this one: existing entries win.
    pub fn merge(&mut self, older: Xref) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        self.size = self.size.max(older.size);
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &XrefEntry)> {
        self.entries.iter()
    }
}

/// Decode a cross-reference stream into an [`Xref`] plus its dictionary, which
/// doubles as the trailer.
pub fn decode_xref_stream(stream: &Stream) -> Result<(Xref, Dictionary)> {
    let dict = stream.dict.clone();
    if !dict.has_type(b"XRef") {
        return Err(Error::Xref(XrefError::Stream("stream is not /Type /XRef")));
    }
    let data = decode_stream(stream, stream.content()?, DecodeLevel::Specialized)?;

    let widths: Vec<usize> = dict
        .get(b"W")
        .and_then(Object::as_array)
        .map_err(|_| Error::Xref(XrefError::Stream("missing /W")))?
        .iter()
        .map(|w| w.as_usize().map_err(|_| Error::Xref(XrefError::Stream("bad /W entry"))))
        .collect::<Result<_>>()?;
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::Xref(XrefError::Stream("/W must be three small integers")));
    }
    let entry_len: usize = widths.iter().sum();
    if entry_len == 0 {
        return Err(Error::Xref(XrefError::Stream("/W adds up to zero")));
    }

    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .map_err(|_| Error::Xref(XrefError::Stream("missing /Size")))? as u32;

    let index: Vec<(u32, u32)> = match dict.opt(b"Index") {
        None => vec![(0, size)],
        Some(value) => {
            let array = value
                .as_array()
                .map_err(|_| Error::Xref(XrefError::Stream("/Index is not an array")))?;
            array
                .chunks(2)
                .map(|pair| match pair {
                    [first, count] => Ok((
                        first.as_i64().map_err(|_| Error::Xref(XrefError::Stream("bad /Index")))? as u32,
                        count.as_i64().map_err(|_| Error::Xref(XrefError::Stream("bad /Index")))? as u32,
                    )),
                    _ => Err(Error::Xref(XrefError::Stream("odd /Index length"))),
                })
                .collect::<Result<_>>()?
        }
    };

    let mut xref = Xref::new(size, XrefType::CrossReferenceStream);
    let mut rows = data.chunks_exact(entry_len);
    'sections: for (first, count) in index {
        for id in first..first.saturating_add(count) {
            let Some(row) = rows.next() else {
                warn!("cross-reference stream is shorter than /Index claims");
                break 'sections;
            };
            let (type_field, row) = row.split_at(widths[0]);
            let (second, third) = row.split_at(widths[1]);
            // A zero-width type field defaults to type 1.
            let entry_type = if widths[0] == 0 { 1 } else { be_value(type_field) };
            let second = be_value(second);
            let third = be_value(third);
            let entry = match entry_type {
                0 => {
                    if third == 65535 {
                        XrefEntry::UnusableFree
                    } else {
                        XrefEntry::Free {
                            next: second as u32,
                            generation: third as u16,
                        }
                    }
                }
                1 => XrefEntry::Normal {
                    offset: second,
                    generation: third as u16,
                },
                2 => XrefEntry::Compressed {
                    container: second as u32,
                    index: third as u16,
                },
                other => {
                    // Forward compatibility: unknown types read as null
                    // objects and are skipped here.
                    warn!("ignoring cross-reference entry of unknown type {other}");
                    continue;
                }
            };
            xref.entries.entry(id).or_insert(entry);
        }
    }

    Ok((xref, dict))
}

fn be_value(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::flate_encode;

    fn xref_stream(widths: [i64; 3], index: Option<Vec<i64>>, rows: &[u8], size: i64) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("XRef"));
        dict.set("Size", size);
        dict.set("W", Object::Array(widths.iter().map(|&w| Object::Integer(w)).collect()));
        if let Some(index) = index {
            dict.set("Index", Object::Array(index.into_iter().map(Object::Integer).collect()));
        }
        dict.set("Filter", Object::name("FlateDecode"));
        Stream::new(dict, flate_encode(rows).unwrap())
    }

    #[test]
    fn decodes_all_entry_types() {
        #[rustfmt::skip]
        let rows = [
            0u8, 0, 3, 255, 255,  // free, unusable
            1,   0, 0, 17, 0,     // in use at 17
            2,   0, 0, 9, 2,      // in stream 9 index 2
        ];
        let stream = xref_stream([1, 3, 1], None, &rows, 3);
        let (xref, dict) = decode_xref_stream(&stream).unwrap();
        assert_eq!(dict.get(b"Size").unwrap().as_i64().unwrap(), 3);
        assert_eq!(xref.get(0), Some(&XrefEntry::UnusableFree));
        assert_eq!(xref.get(1), Some(&XrefEntry::Normal { offset: 17, generation: 0 }));
        assert_eq!(xref.get(2), Some(&XrefEntry::Compressed { container: 9, index: 2 }));
    }

    #[test]
    fn index_subsections() {
        #[rustfmt::skip]
        let rows = [
            1u8, 0, 100, 0,
            1,   0, 200, 0,
        ];
        let stream = xref_stream([1, 2, 1], Some(vec![5, 1, 9, 1]), &rows, 10);
        let (xref, _) = decode_xref_stream(&stream).unwrap();
        assert_eq!(xref.get(5), Some(&XrefEntry::Normal { offset: 100, generation: 0 }));
        assert_eq!(xref.get(9), Some(&XrefEntry::Normal { offset: 200, generation: 0 }));
        assert_eq!(xref.get(0), None);
    }

    #[test]
    fn zero_width_type_defaults_to_in_use() {
        let rows = [0u8, 50, 0];
        let stream = xref_stream([0, 2, 1], Some(vec![4, 1]), &rows, 5);
        let (xref, _) = decode_xref_stream(&stream).unwrap();
        assert_eq!(xref.get(4), Some(&XrefEntry::Normal { offset: 50, generation: 0 }));
    }

    #[test]
    fn merge_keeps_newest() {
        let mut newer = Xref::new(3, XrefType::CrossReferenceTable);
        newer.insert(1, XrefEntry::Normal { offset: 10, generation: 0 });
        let mut older = Xref::new(3, XrefType::CrossReferenceTable);
        older.insert(1, XrefEntry::Normal { offset: 99, generation: 0 });
        older.insert(2, XrefEntry::Normal { offset: 20, generation: 0 });
        newer.merge(older);
        assert_eq!(newer.get(1), Some(&XrefEntry::Normal { offset: 10, generation: 0 }));
        assert_eq!(newer.get(2), Some(&XrefEntry::Normal { offset: 20, generation: 0 }));
    }

    #[test]
    fn truncated_stream_warns_and_keeps_prefix() {
        let rows = [1u8, 0, 100, 0];
        let stream = xref_stream([1, 2, 1], Some(vec![0, 5]), &rows, 5);
        let (xref, _) = decode_xref_stream(&stream).unwrap();
        assert_eq!(xref.len(), 1);
    }
}
