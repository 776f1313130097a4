//! Document loading: locate the trailer, walk the cross-reference chain,
//! resolve every object, decrypt when needed, and fall back to repair when
//! the file is damaged.

mod encrypted;
mod load;
mod object_loader;
mod repair;

#[cfg(test)]
mod tests;

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::rc::Rc;

use log::warn;

use crate::document::Document;
use crate::encryption::EncryptionState;
use crate::object::{Dictionary, Object, ObjectId};
use crate::parser::Parser;
use crate::source::{MemorySource, Source};
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::warnings::Warnings;
use crate::xref::{Xref, XrefEntry, XrefType, decode_xref_stream};
use crate::{Error, ParseError, Result, XrefError};

/// Garbage tolerated before the `%PDF-` header.
pub const MAX_HEADER_GARBAGE: usize = 1024;

/// The window scanned backwards from EOF for `startxref`.
pub const TRAILER_WINDOW: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub password: Option<String>,
    /// Supply the file key directly instead of deriving it from a password.
    pub hex_key: Option<String>,
    /// Attempt reconstruction when the cross-reference data is damaged.
    pub attempt_recovery: bool,
    /// Reconstruct even when the file looks healthy.
    pub force_recovery: bool,
}

impl LoadOptions {
    pub fn new() -> LoadOptions {
        LoadOptions {
            attempt_recovery: true,
            ..LoadOptions::default()
        }
    }
}

pub struct Reader {
    pub data: Rc<Vec<u8>>,
    pub document: Document,
    pub encryption_state: Option<EncryptionState>,
    pub options: LoadOptions,
    pub(crate) warnings: RefCell<Warnings>,
    pub(crate) fake_names: Cell<u32>,
    /// Objects being parsed right now; the cycle guard for resolution.
    pub(crate) resolving: RefCell<HashSet<ObjectId>>,
    /// Literal-string `/Contents` offsets noticed while parsing.
    pub(crate) contents_offsets: RefCell<std::collections::BTreeMap<ObjectId, u64>>,
}

impl Reader {
    pub fn new(name: impl Into<String>, data: Vec<u8>, options: LoadOptions) -> Reader {
        Reader {
            data: Rc::new(data),
            document: Document::new(),
            encryption_state: None,
            options,
            warnings: RefCell::new(Warnings::new(name.into())),
            fake_names: Cell::new(0),
            resolving: RefCell::new(HashSet::new()),
            contents_offsets: RefCell::new(std::collections::BTreeMap::new()),
        }
    }

    pub(crate) fn warn(&self, object: Option<ObjectId>, offset: Option<u64>, message: impl Into<String>) {
        self.warnings.borrow_mut().push(object, offset, message);
    }

    pub(crate) fn source(&self) -> MemorySource {
        MemorySource::shared(self.warnings.borrow().file().to_string(), Rc::clone(&self.data))
    }

    /// Read the whole document.
    pub fn read(mut self) -> Result<Document> {
        self.strip_header_garbage()?;
        let version = self.parse_header()?;

        let construction = if self.options.force_recovery {
            self.warn(None, None, "reconstructing cross-reference data on request");
            self.repair()
        } else {
            match self.read_xref_chain() {
                Ok(found) => Ok(found),
                Err(error) if self.options.attempt_recovery => {
                    self.warn(
                        None,
                        None,
                        format!("file is damaged ({error}), attempting to reconstruct the cross-reference data"),
                    );
                    self.repair()
                }
                Err(error) => Err(error),
            }
        };
        let (mut xref, trailer) = construction?;

        let xref_entry_count = xref
            .max_id()
            .checked_add(1)
            .ok_or(Error::Parse(ParseError::InvalidXref))?;
        if xref.size != xref_entry_count {
            self.warn(
                None,
                None,
                format!("trailer /Size is {}, correct value is {}", xref.size, xref_entry_count),
            );
            xref.size = xref.size.max(xref_entry_count);
        }

        self.document.version = version;
        self.document.max_id = xref.size.saturating_sub(1);
        self.document.trailer = trailer;
        self.document.reference_table = xref;

        if self.document.trailer.opt(b"Encrypt").is_some() {
            self.load_encrypted_document()?;
        } else {
            self.load_objects()?;
        }

        self.document.signature_contents = self.contents_offsets.into_inner();
        self.document.warnings = self.warnings.into_inner();
        Ok(self.document)
    }

    /// Up to 1 KiB of junk before `%PDF-` is tolerated; file offsets are then
    /// relative to the header.
    fn strip_header_garbage(&mut self) -> Result<()> {
        let window = &self.data[..self.data.len().min(MAX_HEADER_GARBAGE + 5)];
        let offset = window
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or(Error::Parse(ParseError::InvalidFileHeader))?;
        if offset > 0 {
            self.warn(
                None,
                Some(0),
                format!("{offset} bytes of junk before the header, ignoring them"),
            );
            self.data = Rc::new(self.data[offset..].to_vec());
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<String> {
        let mut source = self.source();
        let header = source.read_line(64)?;
        let version = header
            .strip_prefix(b"%PDF-")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(Error::Parse(ParseError::InvalidFileHeader))?
            .to_string();
        // The conventional binary-marker comment on the second line is
        // preserved through a rewrite.
        let second = source.read_line(64)?;
        if let Some(mark) = second.strip_prefix(b"%") {
            if !mark.is_empty() && mark.iter().all(|&b| b >= 128) {
                self.document.binary_mark = mark.to_vec();
            }
        }
        Ok(version)
    }

    fn read_xref_chain(&mut self) -> Result<(Xref, Dictionary)> {
        let xref_start = self.find_xref_start()?;
        self.document.xref_start = xref_start as usize;

        let (mut xref, mut trailer) = self.xref_section_at(xref_start)?;
        self.merge_hybrid_stream(&mut xref, &trailer);

        let mut already_seen = HashSet::new();
        let mut prev = trailer.remove(b"Prev");
        while let Some(offset) = prev.as_ref().and_then(|p| p.as_i64().ok()) {
            if !already_seen.insert(offset) {
                self.warn(None, None, "cross-reference /Prev chain loops, stopping");
                break;
            }
            if offset < 0 || offset as usize >= self.data.len() {
                return Err(Error::Xref(XrefError::PrevStart));
            }
            let (prev_xref, mut prev_trailer) = self.xref_section_at(offset as u64)?;
            self.merge_hybrid_stream(&mut xref, &prev_trailer);
            xref.merge(prev_xref);
            prev = prev_trailer.remove(b"Prev");
            // Newest trailer keys win; older sections only fill gaps.
            trailer.extend(&prev_trailer);
        }
        trailer.remove(b"XRefStm");
        Ok((xref, trailer))
    }

    /// A hybrid file's table section points at a cross-reference stream that
    /// places compressed objects. Entries already seen still win.
    fn merge_hybrid_stream(&mut self, xref: &mut Xref, trailer: &Dictionary) {
        let Some(offset) = trailer.opt(b"XRefStm").and_then(|o| o.as_i64().ok()) else {
            return;
        };
        if offset < 0 || offset as usize >= self.data.len() {
            self.warn(None, None, "/XRefStm offset is outside the file, ignoring it");
            return;
        }
        match self.xref_section_at(offset as u64) {
            Ok((stream_xref, _)) => xref.merge(stream_xref),
            Err(error) => {
                self.warn(None, Some(offset as u64), format!("ignoring bad /XRefStm: {error}"));
            }
        }
    }

    fn find_xref_start(&mut self) -> Result<u64> {
        let len = self.data.len();
        let window_start = len.saturating_sub(TRAILER_WINDOW);
        let window = &self.data[window_start..];
        let eof = window
            .windows(5)
            .rposition(|w| w == b"%%EOF")
            .ok_or(Error::Xref(XrefError::Start))?;
        let startxref = window[..eof]
            .windows(9)
            .rposition(|w| w == b"startxref")
            .ok_or(Error::Xref(XrefError::Start))?;

        let mut source = self.source();
        source.seek(SeekFrom::Start((window_start + startxref) as u64))?;
        let mut tokenizer = Tokenizer::new().allow_eof();
        let keyword = tokenizer.read_token(&mut source, "startxref", true, 0)?;
        let value = tokenizer.read_token(&mut source, "startxref", true, 0)?;
        if !keyword.is_word(b"startxref") || value.kind != TokenKind::Integer {
            return Err(Error::Xref(XrefError::Start));
        }
        let offset = value.integer_value();
        if offset < 0 || offset as usize >= len {
            return Err(Error::Xref(XrefError::Start));
        }
        Ok(offset as u64)
    }

    /// Parse one cross-reference section, table or stream form.
    pub(crate) fn xref_section_at(&self, offset: u64) -> Result<(Xref, Dictionary)> {
        let mut source = self.source();
        source.seek(SeekFrom::Start(offset))?;
        let mut tokenizer = Tokenizer::new().allow_eof();
        let first = tokenizer.read_token(&mut source, "xref", true, 0)?;
        if first.is_word(b"xref") {
            return self.parse_xref_table(&mut source, &mut tokenizer);
        }
        // Otherwise this must be a cross-reference stream object.
        let mut source = self.source();
        let mut parser = Parser::new(&mut source, &self.warnings, Some(self), &self.fake_names);
        let (_, object) = parser.parse_indirect_object(offset, None)?;
        match object {
            Object::Stream(stream) => decode_xref_stream(&stream),
            _ => Err(Error::Parse(ParseError::InvalidXref)),
        }
    }

    fn parse_xref_table(
        &self, source: &mut MemorySource, tokenizer: &mut Tokenizer,
    ) -> Result<(Xref, Dictionary)> {
        let mut xref = Xref::new(0, XrefType::CrossReferenceTable);
        loop {
            let token = tokenizer.read_token(source, "xref table", true, 0)?;
            if token.is_word(b"trailer") {
                break;
            }
            if token.kind != TokenKind::Integer {
                return Err(Error::Parse(ParseError::InvalidXref));
            }
            let start = token.integer_value();
            let count = tokenizer.read_token(source, "xref table", true, 0)?;
            if count.kind != TokenKind::Integer {
                return Err(Error::Parse(ParseError::InvalidXref));
            }
            let count = count.integer_value();
            if start < 0 || count < 0 {
                return Err(Error::Parse(ParseError::InvalidXref));
            }
            for index in 0..count {
                let offset = tokenizer.read_token(source, "xref entry", true, 0)?;
                let generation = tokenizer.read_token(source, "xref entry", true, 0)?;
                let kind = tokenizer.read_token(source, "xref entry", true, 0)?;
                if offset.kind != TokenKind::Integer || generation.kind != TokenKind::Integer {
                    return Err(Error::Parse(ParseError::InvalidXref));
                }
                let id = (start + index) as u32;
                let generation_value = generation.integer_value();
                let entry = if kind.is_word(b"n") {
                    match u16::try_from(generation_value) {
                        Ok(generation) => XrefEntry::Normal {
                            offset: offset.integer_value() as u64,
                            generation,
                        },
                        Err(_) => {
                            self.warn(
                                Some((id, 0)),
                                None,
                                format!("generation {generation_value} out of range, marking entry unusable"),
                            );
                            XrefEntry::UnusableFree
                        }
                    }
                } else if kind.is_word(b"f") {
                    if generation_value >= 65535 {
                        XrefEntry::UnusableFree
                    } else {
                        XrefEntry::Free {
                            next: offset.integer_value() as u32,
                            generation: generation_value as u16,
                        }
                    }
                } else {
                    return Err(Error::Parse(ParseError::InvalidXref));
                };
                xref.entries.entry(id).or_insert(entry);
            }
        }
        // The trailer dictionary follows the `trailer` keyword.
        let position = source.tell();
        let mut dict_source = self.source();
        dict_source.seek(SeekFrom::Start(position))?;
        let mut parser = Parser::new(&mut dict_source, &self.warnings, Some(self), &self.fake_names);
        let trailer = match parser.parse_object()? {
            Object::Dictionary(dict) => dict,
            other => {
                warn!("trailer is a {}, not a dictionary", other.enum_variant());
                return Err(Error::Parse(ParseError::InvalidTrailer));
            }
        };
        xref.size = trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .map_err(|_| Error::Parse(ParseError::InvalidTrailer))? as u32;
        Ok((xref, trailer))
    }

    /// Resolve every in-use entry, then unpack object streams. The first
    /// definition of an id wins.
    fn load_objects(&mut self) -> Result<()> {
        let containers = self.load_normal_objects();
        for container_id in containers {
            self.load_object_stream_members(container_id);
        }
        Ok(())
    }

    /// Parse every in-use entry into the arena and report which of them are
    /// object-stream containers, in need of a later unpacking pass.
    pub(crate) fn load_normal_objects(&mut self) -> Vec<ObjectId> {
        let entries: Vec<(u32, XrefEntry)> = self
            .document
            .reference_table
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();

        let mut containers = Vec::new();
        for (id, entry) in entries {
            if let XrefEntry::Normal { generation, offset } = entry {
                let object_id = (id, generation);
                match self.read_object(offset, Some(object_id)) {
                    Ok((actual_id, object)) => {
                        if let Object::Stream(stream) = &object {
                            if stream.dict.has_type(b"ObjStm") {
                                containers.push(actual_id);
                            }
                        }
                        self.document.objects.entry(actual_id).or_insert(object);
                    }
                    Err(error) => {
                        self.warn(Some(object_id), Some(offset), format!("failed to load object: {error}"));
                    }
                }
            }
        }
        containers
    }

    pub(crate) fn load_object_stream_members(&mut self, container_id: ObjectId) {
        let Some(Object::Stream(stream)) = self.document.objects.get(&container_id) else {
            return;
        };
        let stream = stream.clone();
        match crate::object_stream::ObjectStream::parse(&stream, self, &self.warnings) {
            Ok(members) => {
                for (id, object) in members.objects {
                    self.document.objects.entry(id).or_insert(object);
                }
            }
            Err(error) => {
                self.warn(
                    Some(container_id),
                    None,
                    format!("failed to unpack object stream: {error}"),
                );
            }
        }
    }
}
