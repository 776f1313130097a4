//! The PDF object value model: a tagged sum over the types a PDF file can
//! contain, plus the dictionary and stream containers built from it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str;

use indexmap::IndexMap;
use log::warn;

use crate::pipeline::Sink;
use crate::token_filter::TokenFilter;
use crate::{Error, Result};

/// An object number and generation, identifying one indirect object.
/// `(0, 0)` is reserved and stands for the null object.
pub type ObjectId = (u32, u16);

/// How a string was written in the source file; round-tripped on save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// A real number kept as its source decimal text so writing it back does not
/// go through binary floating point.
#[derive(Debug, Clone, Eq)]
pub struct Real(String);

impl Real {
    /// Accepts the PDF number syntax: optional sign, digits, optional `.`
    /// fraction. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Real> {
        let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
        if unsigned.is_empty() {
            return None;
        }
        let mut seen_dot = false;
        for c in unsigned.chars() {
            match c {
                '0'..='9' => {}
                '.' if !seen_dot => seen_dot = true,
                _ => return None,
            }
        }
        Some(Real(text.to_string()))
    }

    pub fn from_f64(value: f64) -> Real {
        let mut text = format!("{value:.6}");
        Real::trim(&mut text);
        Real(text)
    }

    pub fn as_f64(&self) -> f64 {
        self.0.parse().unwrap_or(0.0)
    }

    pub fn as_text(&self) -> &str {
        &self.0
    }

    /// Canonical form: no leading `+`, no trailing fraction zeros, no bare
    /// trailing `.`, `-0` collapsed to `0`. Idempotent.
    pub fn normalized(&self) -> String {
        let (sign, unsigned) = match self.0.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", self.0.strip_prefix('+').unwrap_or(&self.0)),
        };
        let mut text = unsigned.to_string();
        Real::trim(&mut text);
        let stripped = text.trim_start_matches('0');
        let text = if stripped.is_empty() || stripped.starts_with('.') {
            format!("0{stripped}")
        } else {
            stripped.to_string()
        };
        if text == "0" {
            text
        } else {
            format!("{sign}{text}")
        }
    }

    fn trim(text: &mut String) {
        if text.contains('.') {
            while text.ends_with('0') {
                text.pop();
            }
            if text.ends_with('.') {
                text.pop();
            }
        }
        if text.is_empty() {
            text.push('0');
        }
    }
}

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Object {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(Real),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

impl Object {
    pub fn name(name: impl AsRef<[u8]>) -> Object {
        Object::Name(name.as_ref().to_vec())
    }

    pub fn string_literal(s: impl Into<Vec<u8>>) -> Object {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn real(value: f64) -> Object {
        Object::Real(Real::from_f64(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn enum_variant(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(_) => "boolean",
            Object::Integer(_) => "integer",
            Object::Real(_) => "real",
            Object::Name(_) => "name",
            Object::String(..) => "string",
            Object::Array(_) => "array",
            Object::Dictionary(_) => "dictionary",
            Object::Stream(_) => "stream",
            Object::Reference(_) => "reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.enum_variant(),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(self.type_error("boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(self.type_error("integer")),
        }
    }

    pub fn as_usize(&self) -> Result<usize> {
        usize::try_from(self.as_i64()?).map_err(|e| Error::NumericCast(e.to_string()))
    }

    /// Numeric value of an integer or real.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Object::Integer(value) => Ok(*value as f64),
            Object::Real(value) => Ok(value.as_f64()),
            _ => Err(self.type_error("number")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("name")),
        }
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match self {
            Object::String(bytes, _) => Ok(bytes),
            _ => Err(self.type_error("string")),
        }
    }

    /// UTF-8 view of a string object: UTF-16BE when the BOM is present,
    /// otherwise PDFDocEncoding.
    pub fn as_text(&self) -> Result<String> {
        self.as_str().map(crate::encodings::bytes_to_string)
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(array) => Ok(array),
            _ => Err(self.type_error("array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Object>> {
        match self {
            Object::Array(array) => Ok(array),
            _ => Err(Error::ObjectType {
                expected: "array",
                found: self.enum_variant(),
            }),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&stream.dict),
            _ => Err(self.type_error("dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&mut stream.dict),
            _ => Err(Error::ObjectType {
                expected: "dictionary",
                found: self.enum_variant(),
            }),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(Error::ObjectType {
                expected: "stream",
                found: self.enum_variant(),
            }),
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<u32> for Object {
    fn from(value: u32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<usize> for Object {
    fn from(value: usize) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::real(value)
    }
}

impl From<Real> for Object {
    fn from(value: Real) -> Self {
        Object::Real(value)
    }
}

impl From<Dictionary> for Object {
    fn from(value: Dictionary) -> Self {
        Object::Dictionary(value)
    }
}

impl From<Stream> for Object {
    fn from(value: Stream) -> Self {
        Object::Stream(value)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

/// A PDF dictionary. Key order is preserved for deterministic output; setting
/// an existing key replaces its value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn opt(&self, key: &[u8]) -> Option<&Object> {
        let value = self.0.get(key)?;
        if value.is_null() { None } else { Some(value) }
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Object>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, Vec<u8>, Object> {
        self.0.iter_mut()
    }

    /// True when `/Type` is the given name.
    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type").and_then(Object::as_name).map(|n| n == type_name).unwrap_or(false)
    }

    pub fn type_name(&self) -> Result<&[u8]> {
        self.get(b"Type").and_then(Object::as_name)
    }

    pub fn extend(&mut self, other: &Dictionary) {
        for (key, value) in other.iter() {
            if !self.has(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

impl<K: Into<Vec<u8>>, V: Into<Object>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (key, value) in iter {
            dict.set(key, value);
        }
        dict
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Supplies stream bytes at write time. May be invoked more than once and must
/// produce identical bytes each time; the writer checks the length against
/// `/Length` and warns on drift.
pub trait StreamProvider {
    fn provide(&self, id: ObjectId, sink: &mut dyn Sink) -> Result<()>;
}

impl<F: Fn(ObjectId, &mut dyn Sink) -> Result<()>> StreamProvider for F {
    fn provide(&self, id: ObjectId, sink: &mut dyn Sink) -> Result<()> {
        self(id, sink)
    }
}

/// Where a stream's undecoded bytes come from.
#[derive(Clone)]
pub enum StreamData {
    /// Bytes held in memory.
    Buffer(Vec<u8>),
    /// A range in the document's input, decrypted on read. `length` is `None`
    /// until `/Length` has been resolved.
    Range { offset: usize, length: Option<usize> },
    /// A caller-supplied producer invoked on demand.
    Provider(Rc<dyn StreamProvider>),
}

impl fmt::Debug for StreamData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamData::Buffer(data) => f.debug_tuple("Buffer").field(&data.len()).finish(),
            StreamData::Range { offset, length } => {
                f.debug_struct("Range").field("offset", offset).field("length", length).finish()
            }
            StreamData::Provider(_) => f.write_str("Provider"),
        }
    }
}

impl PartialEq for StreamData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StreamData::Buffer(a), StreamData::Buffer(b)) => a == b,
            (
                StreamData::Range { offset: ao, length: al },
                StreamData::Range { offset: bo, length: bl },
            ) => ao == bo && al == bl,
            (StreamData::Provider(a), StreamData::Provider(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A stream object: its dictionary plus a reference to its payload and an
/// optional list of token filters applied when the data is piped out.
#[derive(Clone)]
pub struct Stream {
    pub dict: Dictionary,
    pub(crate) data: StreamData,
    /// Offset of the first payload byte in the input, kept for diagnostics
    /// and for the QDF fixer.
    pub start_position: Option<usize>,
    /// Cleared for streams whose bytes must be copied verbatim (already
    /// compressed, or carrying an unknown filter).
    pub allows_compression: bool,
    pub(crate) token_filters: Vec<Rc<RefCell<dyn TokenFilter>>>,
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict
            && self.data == other.data
            && self.token_filters.len() == other.token_filters.len()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("dict", &self.dict)
            .field("data", &self.data)
            .field("start_position", &self.start_position)
            .field("allows_compression", &self.allows_compression)
            .field("token_filters", &self.token_filters.len())
            .finish()
    }
}

impl Stream {
    pub fn new(dict: Dictionary, content: Vec<u8>) -> Stream {
        let mut stream = Stream {
            dict,
            data: StreamData::Buffer(Vec::new()),
            start_position: None,
            allows_compression: true,
            token_filters: Vec::new(),
        };
        stream.set_content(content);
        stream
    }

    /// A stream whose payload range begins at `offset` but whose `/Length`
    /// has not been resolved yet.
    pub fn with_position(dict: Dictionary, offset: usize) -> Stream {
        Stream {
            dict,
            data: StreamData::Range { offset, length: None },
            start_position: Some(offset),
            allows_compression: true,
            token_filters: Vec::new(),
        }
    }

    pub fn data(&self) -> &StreamData {
        &self.data
    }

    /// Replaces the payload with an in-memory buffer and fixes `/Length`.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.dict.set("Length", content.len() as i64);
        self.data = StreamData::Buffer(content);
    }

    pub fn set_range(&mut self, offset: usize, length: usize) {
        self.dict.set("Length", length as i64);
        self.start_position = Some(offset);
        self.data = StreamData::Range { offset, length: Some(length) };
    }

    pub fn set_provider(&mut self, provider: Rc<dyn StreamProvider>) {
        self.data = StreamData::Provider(provider);
    }

    /// The in-memory payload; fails for range- or provider-backed streams
    /// that have not been materialised.
    pub fn content(&self) -> Result<&[u8]> {
        match &self.data {
            StreamData::Buffer(data) => Ok(data),
            _ => Err(Error::InvalidStream("stream content has not been loaded".to_string())),
        }
    }

    /// Replace data, `/Filter` and `/DecodeParms` as one operation, so the
    /// dictionary can never disagree with the payload.
    pub fn replace_stream_data(&mut self, content: Vec<u8>, filter: Object, decode_parms: Object) {
        match filter {
            Object::Null => {
                self.dict.remove(b"Filter");
            }
            other => self.dict.set("Filter", other),
        }
        match decode_parms {
            Object::Null => {
                self.dict.remove(b"DecodeParms");
            }
            other => self.dict.set("DecodeParms", other),
        }
        self.set_content(content);
    }

    /// Filter names from `/Filter`, normalised to a list.
    pub fn filters(&self) -> Vec<Vec<u8>> {
        match self.dict.opt(b"Filter") {
            None => Vec::new(),
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(array)) => array
                .iter()
                .filter_map(|f| f.as_name().ok().map(<[u8]>::to_vec))
                .collect(),
            Some(other) => {
                warn!("/Filter is a {}, ignoring", other.enum_variant());
                Vec::new()
            }
        }
    }

    /// `/DecodeParms` aligned with [`Stream::filters`]: always one entry per
    /// filter, `Null` standing in where the file omitted parameters.
    pub fn decode_parms(&self) -> Vec<Object> {
        let count = self.filters().len();
        let parms = self
            .dict
            .opt(b"DecodeParms")
            .or_else(|| self.dict.opt(b"DP"))
            .cloned()
            .unwrap_or(Object::Null);
        match parms {
            Object::Array(items) => {
                let mut items = items;
                items.resize(count, Object::Null);
                items
            }
            single => {
                let mut items = vec![Object::Null; count];
                if let Some(first) = items.first_mut() {
                    *first = single;
                }
                items
            }
        }
    }

    /// Copy the undecoded payload to `sink`. Decryption has already happened
    /// at load time; filters stay applied.
    pub fn pipe_raw(&self, sink: &mut dyn Sink) -> Result<()> {
        let data = self.content()?;
        crate::pipeline::drive(sink, |s| s.write_all(data))
    }

    /// Reverse the filter chain up to `decode_level` and push the decoded
    /// bytes to `sink`.
    pub fn pipe_decoded(&self, sink: &mut dyn Sink, decode_level: crate::filters::DecodeLevel) -> Result<()> {
        crate::filters::pipe_decoded(self, self.content()?, decode_level, sink)
    }

    /// Decoded payload as a buffer, at the `Specialized` level.
    pub fn decompressed_content(&self) -> Result<Vec<u8>> {
        crate::filters::decode_stream(self, self.content()?, crate::filters::DecodeLevel::Specialized)
    }

    pub fn add_token_filter(&mut self, filter: Rc<RefCell<dyn TokenFilter>>) {
        self.token_filters.push(filter);
    }

    pub fn token_filters(&self) -> &[Rc<RefCell<dyn TokenFilter>>] {
        &self.token_filters
    }
}
