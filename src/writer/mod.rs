//! Serialising a document back to PDF bytes: renumbering, stream re-encoding,
//! object-stream assembly, encryption on write, xref emission and file IDs.
//! Output goes to a temporary buffer or file and is only installed when the
//! whole write succeeded.

mod linearize;
mod xref;

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use md5::{Digest, Md5};
use rand::Rng;

use crate::document::Document;
use crate::encryption::{EncryptionRequest, EncryptionState};
use crate::filters::{DecodeLevel, decode_stream, flate_encode, is_filterable};
use crate::object::{Dictionary, Object, ObjectId, Stream, StreamData};
use crate::object_stream::ObjectStreamBuilder;
use crate::pipeline::BufferSink;
use crate::token_filter::{ContentNormalizer, apply_token_filters};
use crate::xref::XrefEntry;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectStreamMode {
    Disable,
    #[default]
    Preserve,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamDataMode {
    Uncompress,
    #[default]
    Preserve,
    Compress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    #[default]
    Random,
    /// `/ID` halves are the MD5 of the bytes written before them, making the
    /// output a pure function of content and options.
    Deterministic,
    /// A fixed value for test fixtures.
    Static,
}

#[derive(Debug, Clone, Default)]
pub enum EncryptionMode {
    Disable,
    /// Re-encrypt with the parameters the source document was opened with.
    #[default]
    Preserve,
    Regenerate(EncryptionRequest),
}

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub object_streams: ObjectStreamMode,
    pub stream_data: StreamDataMode,
    pub decode_level: DecodeLevel,
    /// Flate-compress streams that carry no filter at all.
    pub compress_uncompressed: bool,
    /// Re-tokenise page content streams and normalise their whitespace.
    pub normalize_content_streams: bool,
    pub linearize: bool,
    pub qdf_mode: bool,
    pub id_policy: IdPolicy,
    pub newline_before_endstream: bool,
    /// Also write objects nothing references.
    pub preserve_unreferenced: bool,
    pub encryption: EncryptionMode,
    /// Members packed into one object stream in generate mode.
    pub objects_per_stream: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            object_streams: ObjectStreamMode::default(),
            stream_data: StreamDataMode::default(),
            decode_level: DecodeLevel::Generalized,
            compress_uncompressed: false,
            normalize_content_streams: false,
            linearize: false,
            qdf_mode: false,
            id_policy: IdPolicy::default(),
            newline_before_endstream: true,
            preserve_unreferenced: false,
            encryption: EncryptionMode::default(),
            objects_per_stream: 100,
        }
    }
}

impl SaveOptions {
    /// The human-inspectable layout: uncompressed streams, normalised
    /// content, classic xref, contiguous numbering.
    pub fn qdf() -> SaveOptions {
        SaveOptions {
            qdf_mode: true,
            object_streams: ObjectStreamMode::Disable,
            stream_data: StreamDataMode::Uncompress,
            normalize_content_streams: true,
            ..SaveOptions::default()
        }
    }
}

impl Document {
    /// Save with default options.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.save_with_options(path, SaveOptions::default())
    }

    /// Save to a path; the bytes are staged in full first and the target is
    /// replaced atomically, so a failed write never leaves a partial file.
    pub fn save_with_options<P: AsRef<Path>>(&mut self, path: P, options: SaveOptions) -> Result<()> {
        let bytes = self.save_mem(options)?;
        let path = path.as_ref();
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp~");
        let staging = std::path::PathBuf::from(staging);
        let result = (|| -> Result<()> {
            let mut file = std::fs::File::create(&staging)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&staging, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&staging);
        }
        result
    }

    /// Save into a byte buffer.
    pub fn save_mem(&mut self, options: SaveOptions) -> Result<Vec<u8>> {
        if options.linearize {
            return linearize::write_linearized(self, &options);
        }
        Writer::new(self, &options)?.write()
    }
}

/// Serialise a direct object compactly, with no renumbering or encryption.
/// The content-stream encoder shares this form.
pub(crate) fn write_object_to(out: &mut Vec<u8>, object: &Object) -> Result<()> {
    let ctx = SerializeCtx {
        renumber: None,
        encrypt: None,
        qdf: false,
    };
    serialize_object(out, object, &ctx, 0)
}

pub(crate) struct SerializeCtx<'a> {
    /// Old id → new id; references to unmapped ids degrade to null.
    pub renumber: Option<&'a BTreeMap<ObjectId, u32>>,
    pub encrypt: Option<(&'a EncryptionState, ObjectId)>,
    pub qdf: bool,
}

pub(crate) struct Writer<'a> {
    document: &'a Document,
    options: &'a SaveOptions,
    encryption: Option<EncryptionState>,
    /// Old id → new id.
    renumber: BTreeMap<ObjectId, u32>,
    /// Old ids written as plain top-level objects, in new-id order.
    plain: Vec<ObjectId>,
    /// Object-stream groups of old ids, in member order.
    groups: Vec<Vec<ObjectId>>,
    /// Old ids of page content streams, for normalisation.
    content_streams: HashSet<ObjectId>,
    file_id: (Vec<u8>, Vec<u8>),
}

const STATIC_ID: [u8; 16] = *b"pdfmend-fixed-id";

impl<'a> Writer<'a> {
    pub(crate) fn new(document: &'a Document, options: &'a SaveOptions) -> Result<Writer<'a>> {
        let mut writer = Writer {
            document,
            options,
            encryption: None,
            renumber: BTreeMap::new(),
            plain: Vec::new(),
            groups: Vec::new(),
            content_streams: HashSet::new(),
            file_id: (Vec::new(), Vec::new()),
        };
        writer.plan()?;
        Ok(writer)
    }

    /// A writer with an externally chosen numbering: `order[i]` becomes
    /// object `i + 1`. The linearizer lays objects out itself and never uses
    /// object streams.
    pub(crate) fn with_numbering(
        document: &'a Document, options: &'a SaveOptions, order: &[ObjectId],
    ) -> Result<Writer<'a>> {
        let mut writer = Writer {
            document,
            options,
            encryption: None,
            renumber: order
                .iter()
                .enumerate()
                .map(|(index, id)| (*id, index as u32 + 1))
                .collect(),
            plain: order.to_vec(),
            groups: Vec::new(),
            content_streams: HashSet::new(),
            file_id: (Vec::new(), Vec::new()),
        };
        writer.setup_ids_and_encryption()?;
        Ok(writer)
    }

    pub(crate) fn new_id_of(&self, old: ObjectId) -> Option<u32> {
        self.renumber.get(&old).copied()
    }

    pub(crate) fn file_id(&self) -> &(Vec<u8>, Vec<u8>) {
        &self.file_id
    }

    /// Decide the write set, the object-stream grouping and the numbering.
    fn plan(&mut self) -> Result<()> {
        let mut order = self.document.reachable_objects();
        if self.options.preserve_unreferenced {
            let known: HashSet<ObjectId> = order.iter().copied().collect();
            for id in self.document.objects.keys() {
                if !known.contains(id) {
                    order.push(*id);
                }
            }
        }
        // Old containers and xref streams are never copied; both get rebuilt.
        order.retain(|id| match self.document.objects.get(id) {
            Some(Object::Stream(stream)) => {
                !stream.dict.has_type(b"ObjStm") && !stream.dict.has_type(b"XRef")
            }
            Some(_) => true,
            None => false,
        });

        if self.options.normalize_content_streams {
            let document = self.document;
            for page in document.page_ids() {
                let Ok(dict) = document.get_object(page).and_then(Object::as_dict) else {
                    continue;
                };
                match dict.opt(b"Contents") {
                    Some(Object::Reference(id)) => {
                        self.content_streams.insert(*id);
                    }
                    Some(Object::Array(items)) => {
                        for item in items {
                            if let Ok(id) = item.as_reference() {
                                self.content_streams.insert(id);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let in_group = self.partition_object_streams(&order);

        let mut next = 1u32;
        for id in &order {
            if !in_group.contains(id) {
                self.renumber.insert(*id, next);
                self.plain.push(*id);
                next += 1;
            }
        }
        for group in &self.groups {
            for member in group {
                self.renumber.insert(*member, next);
                next += 1;
            }
        }
        Ok(())
    }

    /// Which objects go into object streams, per mode and eligibility. An
    /// eligible object is a non-stream, at generation 0, and neither the
    /// catalog nor the encryption dictionary.
    fn partition_object_streams(&mut self, order: &[ObjectId]) -> HashSet<ObjectId> {
        let root = self
            .document
            .trailer
            .opt(b"Root")
            .and_then(|r| r.as_reference().ok());
        let encrypt = self
            .document
            .trailer
            .opt(b"Encrypt")
            .and_then(|r| r.as_reference().ok());
        let eligible = |id: &ObjectId| -> bool {
            if id.1 != 0 || Some(*id) == root || Some(*id) == encrypt {
                return false;
            }
            !matches!(self.document.objects.get(id), Some(Object::Stream(_)) | None)
        };

        match self.options.object_streams {
            ObjectStreamMode::Disable => HashSet::new(),
            ObjectStreamMode::Generate => {
                let members: Vec<ObjectId> = order.iter().copied().filter(|id| eligible(id)).collect();
                let per_stream = self.options.objects_per_stream.max(1);
                for chunk in members.chunks(per_stream) {
                    self.groups.push(chunk.to_vec());
                }
                members.into_iter().collect()
            }
            ObjectStreamMode::Preserve => {
                // Regroup by the container each object originally lived in.
                let mut by_container: BTreeMap<u32, Vec<ObjectId>> = BTreeMap::new();
                for id in order {
                    if !eligible(id) {
                        continue;
                    }
                    if let Some(XrefEntry::Compressed { container, .. }) =
                        self.document.reference_table.get(id.0)
                    {
                        by_container.entry(*container).or_default().push(*id);
                    }
                }
                let mut in_group = HashSet::new();
                for (_, members) in by_container {
                    in_group.extend(members.iter().copied());
                    self.groups.push(members);
                }
                in_group
            }
        }
    }

    fn uses_object_streams(&self) -> bool {
        !self.groups.is_empty()
    }

    /// The version the output needs: the input's, raised by features used.
    fn output_version(&self) -> String {
        let mut minimum = (1u32, 4u32);
        if self.uses_object_streams() {
            minimum = minimum.max((1, 5));
        }
        if let Some(state) = &self.encryption {
            minimum = minimum.max(match state.revision {
                ..=3 => (1, 4),
                4 => (1, 6),
                _ => (1, 7),
            });
        }
        let input = parse_version(&self.document.version).unwrap_or((1, 4));
        let (major, minor) = input.max(minimum);
        format!("{major}.{minor}")
    }

    pub(crate) fn write(&mut self) -> Result<Vec<u8>> {
        self.setup_ids_and_encryption()?;

        let mut out = Vec::new();
        self.write_header(&mut out);

        let mut offsets: BTreeMap<u32, u64> = BTreeMap::new();
        let mut compressed: BTreeMap<u32, (u32, u16)> = BTreeMap::new();

        let mut next_id = self.renumber.values().copied().max().unwrap_or(0) + 1;
        let plain = self.plain.clone();
        for old_id in &plain {
            let new_id = self.renumber[old_id];
            offsets.insert(new_id, out.len() as u64);
            // QDF files bind stream lengths late, through a small integer
            // object right after the stream, so the fixer can patch them.
            if self.options.qdf_mode {
                if let Some(Object::Stream(stream)) = self.document.objects.get(old_id) {
                    let prepared = self.prepare_stream(*old_id, stream)?;
                    let length_id = next_id;
                    next_id += 1;
                    let length =
                        self.write_stream_with_length_ref(&mut out, new_id, &prepared, length_id)?;
                    offsets.insert(length_id, out.len() as u64);
                    self.write_raw_object(&mut out, length_id, length.to_string().as_bytes());
                    continue;
                }
            }
            self.write_indirect_object(&mut out, new_id, *old_id)?;
        }

        // Containers take the ids right after every ordinary object.
        let groups = self.groups.clone();
        for group in &groups {
            let container_id = next_id;
            next_id += 1;
            let mut builder = ObjectStreamBuilder::new();
            for (index, member) in group.iter().enumerate() {
                let new_id = self.renumber[member];
                compressed.insert(new_id, (container_id, index as u16));
                // Members are covered by the container's encryption, so they
                // serialise plain.
                let mut body = Vec::new();
                let ctx = SerializeCtx {
                    renumber: Some(&self.renumber),
                    encrypt: None,
                    qdf: self.options.qdf_mode,
                };
                serialize_object(&mut body, self.document.get_or_null(*member), &ctx, 0)?;
                builder.add(new_id, body);
            }
            let mut stream = builder.build()?;
            if let Some(state) = &self.encryption {
                let encrypted = state.encrypt_stream((container_id, 0), stream.content()?)?;
                stream.set_content(encrypted);
            }
            offsets.insert(container_id, out.len() as u64);
            self.write_stream_object(&mut out, container_id, &stream, None)?;
        }

        let encrypt_id = match self.encryption.clone() {
            Some(state) => {
                let id = next_id;
                next_id += 1;
                offsets.insert(id, out.len() as u64);
                let dict = state.encryption_dictionary();
                // The encryption dictionary itself is never encrypted.
                let ctx = SerializeCtx {
                    renumber: Some(&self.renumber),
                    encrypt: None,
                    qdf: self.options.qdf_mode,
                };
                let mut body = Vec::new();
                serialize_object(&mut body, &Object::Dictionary(dict), &ctx, 0)?;
                self.write_raw_object(&mut out, id, &body);
                Some(id)
            }
            None => None,
        };

        if self.options.id_policy == IdPolicy::Deterministic {
            let digest = Md5::digest(&out).to_vec();
            self.file_id = (digest.clone(), digest);
        }

        let trailer = self.build_trailer(next_id, encrypt_id);
        let xref_start = out.len() as u64;
        if self.uses_object_streams() {
            xref::write_xref_stream(&mut out, next_id, &offsets, &compressed, trailer)?;
        } else {
            xref::write_xref_table(&mut out, next_id, &offsets, &trailer)?;
        }

        out.extend_from_slice(b"startxref\n");
        out.extend_from_slice(xref_start.to_string().as_bytes());
        out.extend_from_slice(b"\n%%EOF\n");
        Ok(out)
    }

    fn setup_ids_and_encryption(&mut self) -> Result<()> {
        self.file_id = match self.options.id_policy {
            IdPolicy::Static => (STATIC_ID.to_vec(), STATIC_ID.to_vec()),
            IdPolicy::Random => {
                let first: [u8; 16] = rand::rng().random();
                let second: [u8; 16] = rand::rng().random();
                (first.to_vec(), second.to_vec())
            }
            // Patched after the body is written.
            IdPolicy::Deterministic => (vec![0; 16], vec![0; 16]),
        };
        // A previously read file keeps its first ID half.
        if let Some(Object::Array(id)) = self.document.trailer.opt(b"ID") {
            if self.options.id_policy != IdPolicy::Deterministic {
                if let Some(first) = id.first().and_then(|f| f.as_str().ok()) {
                    self.file_id.0 = first.to_vec();
                }
            }
        }

        self.encryption = match &self.options.encryption {
            EncryptionMode::Disable => None,
            EncryptionMode::Preserve => self.document.encryption_state.clone(),
            EncryptionMode::Regenerate(request) => {
                Some(EncryptionState::generate(request, &self.file_id.0)?)
            }
        };
        if self.encryption.is_some() && self.options.id_policy == IdPolicy::Deterministic {
            return Err(Error::Logic("deterministic IDs cannot be combined with encryption"));
        }
        Ok(())
    }

    fn write_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"%PDF-");
        out.extend_from_slice(self.output_version().as_bytes());
        out.push(b'\n');
        out.push(b'%');
        if self.document.binary_mark.is_empty() {
            out.extend_from_slice(&[0xBF, 0xF7, 0xA2, 0xFE]);
        } else {
            out.extend_from_slice(&self.document.binary_mark);
        }
        out.push(b'\n');
        if self.options.qdf_mode {
            out.extend_from_slice(b"%QDF-1.0\n\n");
        }
    }

    fn build_trailer(&self, size: u32, encrypt_id: Option<u32>) -> Dictionary {
        let mut trailer = Dictionary::new();
        trailer.set("Size", size as i64);
        let ctx_map = &self.renumber;
        for key in [b"Root".as_slice(), b"Info"] {
            if let Some(value) = self.document.trailer.opt(key) {
                match value {
                    Object::Reference(old) => {
                        if let Some(new) = ctx_map.get(old) {
                            trailer.set(key.to_vec(), Object::Reference((*new, 0)));
                        }
                    }
                    other => trailer.set(key.to_vec(), other.clone()),
                }
            }
        }
        if let Some(encrypt_id) = encrypt_id {
            trailer.set("Encrypt", Object::Reference((encrypt_id, 0)));
        }
        trailer.set(
            "ID",
            Object::Array(vec![
                Object::String(self.file_id.0.clone(), crate::object::StringFormat::Hexadecimal),
                Object::String(self.file_id.1.clone(), crate::object::StringFormat::Hexadecimal),
            ]),
        );
        trailer
    }

    fn write_indirect_object(&self, out: &mut Vec<u8>, new_id: u32, old_id: ObjectId) -> Result<()> {
        let object = self.document.get_or_null(old_id);
        match object {
            Object::Stream(stream) => {
                let prepared = self.prepare_stream(old_id, stream)?;
                self.write_stream_object(out, new_id, &prepared, Some(old_id))
            }
            other => {
                let ctx = SerializeCtx {
                    renumber: Some(&self.renumber),
                    encrypt: self.encryption.as_ref().map(|state| (state, (new_id, 0u16))),
                    qdf: self.options.qdf_mode,
                };
                let mut body = Vec::new();
                serialize_object(&mut body, other, &ctx, 0)?;
                self.write_raw_object(out, new_id, &body);
                Ok(())
            }
        }
    }

    fn write_raw_object(&self, out: &mut Vec<u8>, new_id: u32, body: &[u8]) {
        let mut buffer = itoa::Buffer::new();
        out.extend_from_slice(buffer.format(new_id).as_bytes());
        out.extend_from_slice(b" 0 obj\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    /// QDF form: the dictionary points at a late-bound length object that is
    /// written right after the stream. Returns the payload length.
    fn write_stream_with_length_ref(
        &self, out: &mut Vec<u8>, new_id: u32, stream: &Stream, length_id: u32,
    ) -> Result<usize> {
        let mut data = stream.content()?.to_vec();
        if let Some(state) = &self.encryption {
            let exempt = !state.encrypt_metadata && stream.dict.has_type(b"Metadata");
            if !exempt {
                data = state.encrypt_stream((new_id, 0), &data)?;
            }
        }
        let mut dict = stream.dict.clone();
        dict.remove(b"Length");
        let ctx = SerializeCtx {
            renumber: Some(&self.renumber),
            encrypt: self.encryption.as_ref().map(|state| (state, (new_id, 0u16))),
            qdf: true,
        };
        let mut body = Vec::new();
        serialize_dictionary(&mut body, &dict, &ctx, 0)?;
        // Splice the length reference in as the final dictionary entry.
        debug_assert!(body.ends_with(b">>"));
        body.truncate(body.len() - 2);
        body.extend_from_slice(format!("  /Length {length_id} 0 R\n>>").as_bytes());
        body.extend_from_slice(b"\nstream\n");
        body.extend_from_slice(&data);
        // Data that does not end a line gets a syntax newline plus the
        // marker that tells the fixer the newline is not data.
        if !data.ends_with(b"\n") {
            body.push(b'\n');
            body.extend_from_slice(crate::qdf::IGNORE_NEWLINE);
            body.push(b'\n');
        }
        body.extend_from_slice(b"endstream");
        self.write_raw_object(out, new_id, &body);
        Ok(data.len())
    }

    fn write_stream_object(
        &self, out: &mut Vec<u8>, new_id: u32, stream: &Stream, old_id: Option<ObjectId>,
    ) -> Result<()> {
        let mut data = stream.content()?.to_vec();
        if old_id.is_some() {
            if let Some(state) = &self.encryption {
                let exempt = !state.encrypt_metadata && stream.dict.has_type(b"Metadata");
                if !exempt {
                    data = state.encrypt_stream((new_id, 0), &data)?;
                }
            }
        }
        let mut dict = stream.dict.clone();
        dict.set("Length", data.len() as i64);

        let ctx = SerializeCtx {
            renumber: Some(&self.renumber),
            encrypt: self.encryption.as_ref().map(|state| (state, (new_id, 0u16))),
            qdf: self.options.qdf_mode,
        };
        let mut body = Vec::new();
        serialize_dictionary(&mut body, &dict, &ctx, 0)?;
        body.extend_from_slice(b"\nstream\n");
        body.extend_from_slice(&data);
        if self.options.newline_before_endstream || self.options.qdf_mode {
            body.push(b'\n');
        }
        body.extend_from_slice(b"endstream");
        self.write_raw_object(out, new_id, &body);
        Ok(())
    }

    /// Apply stream-data policy: materialise providers, run token filters,
    /// decode or re-encode per options.
    fn prepare_stream(&self, old_id: ObjectId, stream: &Stream) -> Result<Stream> {
        let mut stream = stream.clone();

        // Provider-backed data is pulled now; the provider contract says the
        // bytes are reproducible, and the recorded length is checked.
        if let StreamData::Provider(provider) = stream.data() {
            let provider = provider.clone();
            let mut sink = BufferSink::new();
            provider.provide(old_id, &mut sink)?;
            let bytes = sink.into_inner();
            if let Some(expected) = stream.dict.opt(b"Length").and_then(|l| l.as_i64().ok()) {
                if expected != bytes.len() as i64 {
                    log::warn!(
                        "stream provider for object {} {} produced {} bytes, dictionary says {expected}",
                        old_id.0,
                        old_id.1,
                        bytes.len()
                    );
                }
            }
            stream.set_content(bytes);
        }

        if !stream.token_filters().is_empty() {
            let decoded = decode_stream(&stream, stream.content()?, DecodeLevel::Specialized)?;
            let mut sink = BufferSink::new();
            apply_token_filters(&decoded, stream.token_filters(), &mut sink)?;
            stream.replace_stream_data(sink.into_inner(), Object::Null, Object::Null);
            stream.token_filters.clear();
        }

        if self.options.normalize_content_streams && self.content_streams.contains(&old_id) {
            if is_filterable(&stream, self.options.decode_level) {
                let decoded = decode_stream(&stream, stream.content()?, self.options.decode_level)?;
                let mut sink = BufferSink::new();
                let normalizer: std::rc::Rc<std::cell::RefCell<dyn crate::token_filter::TokenFilter>> =
                    std::rc::Rc::new(std::cell::RefCell::new(ContentNormalizer::new()));
                apply_token_filters(&decoded, &[normalizer], &mut sink)?;
                stream.replace_stream_data(sink.into_inner(), Object::Null, Object::Null);
            }
        }

        match self.options.stream_data {
            StreamDataMode::Preserve => {}
            StreamDataMode::Uncompress => {
                if !stream.filters().is_empty() && is_filterable(&stream, self.options.decode_level) {
                    let decoded = decode_stream(&stream, stream.content()?, self.options.decode_level)?;
                    stream.replace_stream_data(decoded, Object::Null, Object::Null);
                }
            }
            StreamDataMode::Compress => {
                if stream.filters().is_empty() {
                    if stream.allows_compression {
                        let compressed = flate_encode(stream.content()?)?;
                        if compressed.len() < stream.content()?.len() {
                            stream.replace_stream_data(compressed, Object::name("FlateDecode"), Object::Null);
                        }
                    }
                } else if is_filterable(&stream, self.options.decode_level) {
                    let decoded = decode_stream(&stream, stream.content()?, self.options.decode_level)?;
                    let compressed = flate_encode(&decoded)?;
                    stream.replace_stream_data(compressed, Object::name("FlateDecode"), Object::Null);
                }
            }
        }

        if self.options.compress_uncompressed
            && self.options.stream_data == StreamDataMode::Preserve
            && stream.filters().is_empty()
            && stream.allows_compression
        {
            let compressed = flate_encode(stream.content()?)?;
            if compressed.len() < stream.content()?.len() {
                stream.replace_stream_data(compressed, Object::name("FlateDecode"), Object::Null);
            }
        }

        Ok(stream)
    }
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let (major, minor) = text.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}

pub(crate) fn serialize_object(
    out: &mut Vec<u8>, object: &Object, ctx: &SerializeCtx, depth: usize,
) -> Result<()> {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(value) => {
            let mut buffer = itoa::Buffer::new();
            out.extend_from_slice(buffer.format(*value).as_bytes());
        }
        Object::Real(real) => {
            // QDF keeps the source spelling for easier diffing.
            let text = if ctx.qdf {
                real.as_text().to_string()
            } else {
                real.normalized()
            };
            out.extend_from_slice(text.as_bytes());
        }
        Object::Name(name) => serialize_name(out, name),
        Object::String(bytes, format) => serialize_string(out, bytes, *format, ctx)?,
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                serialize_object(out, item, ctx, depth + 1)?;
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => serialize_dictionary(out, dict, ctx, depth)?,
        Object::Stream(_) => {
            // Streams are always referenced indirectly; a direct stream in a
            // container cannot be expressed in the file format.
            return Err(Error::Logic("attempted to serialise a stream as a direct object"));
        }
        Object::Reference(old) => {
            let mut buffer = itoa::Buffer::new();
            match ctx.renumber {
                Some(map) => match map.get(old) {
                    Some(new) => {
                        out.extend_from_slice(buffer.format(*new).as_bytes());
                        out.extend_from_slice(b" 0 R");
                    }
                    None => out.extend_from_slice(b"null"),
                },
                None => {
                    out.extend_from_slice(buffer.format(old.0).as_bytes());
                    out.push(b' ');
                    out.extend_from_slice(buffer.format(old.1).as_bytes());
                    out.extend_from_slice(b" R");
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn serialize_dictionary(
    out: &mut Vec<u8>, dict: &Dictionary, ctx: &SerializeCtx, depth: usize,
) -> Result<()> {
    if ctx.qdf {
        let indent = b"  ".repeat(depth + 1);
        out.extend_from_slice(b"<<\n");
        for (key, value) in dict.iter() {
            out.extend_from_slice(&indent);
            serialize_name(out, key);
            out.push(b' ');
            serialize_object(out, value, ctx, depth + 1)?;
            out.push(b'\n');
        }
        out.extend_from_slice(&b"  ".repeat(depth));
        out.extend_from_slice(b">>");
    } else {
        out.extend_from_slice(b"<<");
        for (key, value) in dict.iter() {
            out.push(b' ');
            serialize_name(out, key);
            out.push(b' ');
            serialize_object(out, value, ctx, depth + 1)?;
        }
        out.extend_from_slice(b" >>");
    }
    Ok(())
}

/// Names escape `#` itself and any byte outside the regular printable range.
pub(crate) fn serialize_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &b in name {
        let regular = (0x21..=0x7E).contains(&b)
            && !crate::tokenizer::is_delimiter(b)
            && b != b'#';
        if regular {
            out.push(b);
        } else {
            out.push(b'#');
            out.extend_from_slice(format!("{b:02x}").as_bytes());
        }
    }
}

fn serialize_string(
    out: &mut Vec<u8>, bytes: &[u8], format: crate::object::StringFormat, ctx: &SerializeCtx,
) -> Result<()> {
    let owned;
    let bytes = match ctx.encrypt {
        Some((state, id)) => {
            owned = state.encrypt_string(id, bytes)?;
            &owned[..]
        }
        None => bytes,
    };
    match format {
        crate::object::StringFormat::Hexadecimal => {
            out.push(b'<');
            for b in bytes {
                out.extend_from_slice(format!("{b:02x}").as_bytes());
            }
            out.push(b'>');
        }
        crate::object::StringFormat::Literal => {
            out.push(b'(');
            for &b in bytes {
                match b {
                    b'(' | b')' | b'\\' => {
                        out.push(b'\\');
                        out.push(b);
                    }
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    0x20..=0x7E => out.push(b),
                    other => out.extend_from_slice(format!("\\{other:03o}").as_bytes()),
                }
            }
            out.push(b')');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
