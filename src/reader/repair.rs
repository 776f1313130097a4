//! Cross-reference reconstruction for damaged files: scan the whole input for
//! `N G obj` headers and trailer dictionaries, then rebuild the index from
//! what was found. Later definitions shadow earlier ones, matching how
//! incremental updates stack.

use std::collections::BTreeMap;
use std::io::SeekFrom;

use crate::object::{Dictionary, Object};
use crate::source::Source;
use crate::tokenizer::{TokenKind, Tokenizer, is_whitespace};
use crate::xref::{Xref, XrefEntry, XrefType};
use crate::{Error, ParseError, Result};

use super::Reader;

impl Reader {
    /// Rebuild `(xref, trailer)` by brute force.
    pub(crate) fn repair(&mut self) -> Result<(Xref, Dictionary)> {
        let data = std::rc::Rc::clone(&self.data);

        // Offset of the newest plausible header per object number.
        let mut headers: BTreeMap<u32, (u16, u64)> = BTreeMap::new();
        let mut i = 0;
        while i + 3 <= data.len() {
            if &data[i..i + 3] == b"obj"
                && i > 0
                && is_whitespace(data[i - 1])
                && data.get(i + 3).map(|&c| !c.is_ascii_alphanumeric()).unwrap_or(true)
            {
                if let Some((id, generation, offset)) = parse_header_backwards(&data, i) {
                    if self.plausible_object_body((i + 3) as u64) {
                        headers.insert(id, (generation, offset));
                    }
                }
            }
            i += 1;
        }

        if headers.is_empty() {
            return Err(Error::Parse(ParseError::InvalidXref));
        }

        // Gather trailer dictionaries; the newest one wins key by key.
        let mut trailer = Dictionary::new();
        let mut i = 0;
        while i + 7 <= data.len() {
            if &data[i..i + 7] == b"trailer" {
                if let Some(found) = self.try_parse_trailer((i + 7) as u64) {
                    for (key, value) in found.iter() {
                        trailer.set(key.clone(), value.clone());
                    }
                }
            }
            i += 1;
        }
        trailer.remove(b"Prev");
        trailer.remove(b"XRefStm");

        let mut xref = Xref::new(0, XrefType::CrossReferenceTable);
        for (&id, &(generation, offset)) in &headers {
            xref.insert(id, XrefEntry::Normal { offset, generation });
        }

        // Enumerate object-stream members so references into them resolve
        // before the container is unpacked.
        let mut catalog_id = None;
        for (&id, &(generation, offset)) in &headers {
            let Ok((_, object)) = self.read_object(offset, Some((id, generation))) else {
                continue;
            };
            match &object {
                Object::Stream(stream) if stream.dict.has_type(b"ObjStm") => {
                    if let Ok(members) =
                        crate::object_stream::ObjectStream::parse(stream, self, &self.warnings)
                    {
                        for (index, member) in members.member_order.iter().enumerate() {
                            xref.entries.entry(*member).or_insert(XrefEntry::Compressed {
                                container: id,
                                index: index as u16,
                            });
                        }
                        // Cross-reference streams double as trailers.
                        for key in [b"Root".as_slice(), b"Info", b"Encrypt", b"ID"] {
                            if let (false, Some(value)) = (trailer.has(key), stream.dict.opt(key)) {
                                trailer.set(key.to_vec(), value.clone());
                            }
                        }
                    }
                }
                Object::Stream(stream) if stream.dict.has_type(b"XRef") => {
                    for key in [b"Root".as_slice(), b"Info", b"Encrypt", b"ID"] {
                        if let (false, Some(value)) = (trailer.has(key), stream.dict.opt(key)) {
                            trailer.set(key.to_vec(), value.clone());
                        }
                    }
                }
                Object::Dictionary(dict) if dict.has_type(b"Catalog") => {
                    catalog_id = Some((id, generation));
                }
                _ => {}
            }
        }

        if !trailer.has(b"Root") {
            match catalog_id {
                Some(id) => {
                    self.warn(None, None, "no trailer found, using the reconstructed catalog as /Root");
                    trailer.set("Root", Object::Reference(id));
                }
                None => {
                    self.warn(None, None, "could not find a catalog while reconstructing");
                    return Err(Error::Parse(ParseError::InvalidTrailer));
                }
            }
        }
        xref.size = xref.max_id() + 1;
        trailer.set("Size", xref.size as i64);
        Ok((xref, trailer))
    }

    /// The token right after `obj` must start an object body, otherwise the
    /// match was stream data that happened to contain the word.
    fn plausible_object_body(&self, offset: u64) -> bool {
        let mut source = self.source();
        if source.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        let mut tokenizer = Tokenizer::new().allow_eof();
        match tokenizer.read_token(&mut source, "repair", true, 512) {
            Ok(token) => matches!(
                token.kind,
                TokenKind::DictOpen
                    | TokenKind::ArrayOpen
                    | TokenKind::Integer
                    | TokenKind::Real
                    | TokenKind::Name
                    | TokenKind::String
                    | TokenKind::Bool
                    | TokenKind::Null
            ),
            Err(_) => false,
        }
    }

    fn try_parse_trailer(&self, offset: u64) -> Option<Dictionary> {
        let mut source = self.source();
        source.seek(SeekFrom::Start(offset)).ok()?;
        let mut parser =
            crate::parser::Parser::new(&mut source, &self.warnings, Some(self), &self.fake_names);
        match parser.parse_object() {
            Ok(Object::Dictionary(dict)) => Some(dict),
            _ => None,
        }
    }
}

/// Walk backwards from the `obj` keyword over `G`, whitespace, `N`; returns
/// `(N, G, offset_of_N)`.
fn parse_header_backwards(data: &[u8], keyword: usize) -> Option<(u32, u16, u64)> {
    let mut j = keyword;
    while j > 0 && is_whitespace(data[j - 1]) {
        j -= 1;
    }
    let generation_end = j;
    while j > 0 && data[j - 1].is_ascii_digit() {
        j -= 1;
    }
    let generation_start = j;
    if generation_start == generation_end {
        return None;
    }
    if j == 0 || !is_whitespace(data[j - 1]) {
        return None;
    }
    while j > 0 && is_whitespace(data[j - 1]) {
        j -= 1;
    }
    let id_end = j;
    while j > 0 && data[j - 1].is_ascii_digit() {
        j -= 1;
    }
    let id_start = j;
    if id_start == id_end {
        return None;
    }
    let parse = |range: &[u8]| std::str::from_utf8(range).ok().map(str::to_string);
    let id: u32 = parse(&data[id_start..id_end])?.parse().ok()?;
    let generation: u16 = parse(&data[generation_start..generation_end])?.parse().ok()?;
    Some((id, generation, id_start as u64))
}
