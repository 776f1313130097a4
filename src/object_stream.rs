//! Object streams (`/Type /ObjStm`): compressed containers of non-stream
//! objects, prefixed by an integer table of `(object number, offset)` pairs.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::filters::{DecodeLevel, decode_stream, flate_encode};
use crate::object::{Dictionary, Object, ObjectId, Stream};
use crate::parser::{NullResolver, Parser, Resolver};
use crate::source::MemorySource;
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::warnings::Warnings;
use crate::{Error, ParseError, Result};

pub struct ObjectStream {
    pub objects: BTreeMap<ObjectId, Object>,
    /// Object numbers in prefix-table order; a member's position here is its
    /// index in the stream.
    pub member_order: Vec<u32>,
}

impl ObjectStream {
    pub fn new(stream: &Stream) -> Result<ObjectStream> {
        Self::parse(stream, &NullResolver, &RefCell::new(Warnings::default()))
    }

    /// Decode and parse every member. Members that fail to parse become null
    /// with a warning; a member that is itself a stream is illegal.
    pub fn parse(
        stream: &Stream, resolver: &dyn Resolver, warnings: &RefCell<Warnings>,
    ) -> Result<ObjectStream> {
        if !stream.dict.has_type(b"ObjStm") {
            return Err(Error::Parse(ParseError::InvalidObjectStream("not /Type /ObjStm")));
        }
        let count = stream.dict.get(b"N").and_then(Object::as_usize)
            .map_err(|_| Error::Parse(ParseError::InvalidObjectStream("missing /N")))?;
        let first = stream.dict.get(b"First").and_then(Object::as_usize)
            .map_err(|_| Error::Parse(ParseError::InvalidObjectStream("missing /First")))?;

        let data = decode_stream(stream, stream.content()?, DecodeLevel::Specialized)?;
        if first > data.len() {
            return Err(Error::Parse(ParseError::InvalidObjectStream("/First is past the end")));
        }

        let offsets = Self::parse_offset_table(&data[..first], count)?;
        let member_order: Vec<u32> = offsets.iter().map(|(id, _)| *id).collect();
        let fake_names = Cell::new(0);
        let mut objects = BTreeMap::new();
        for (id, offset) in offsets {
            let at = first + offset;
            if at > data.len() {
                warnings.borrow_mut().push(
                    Some((id, 0)),
                    None,
                    "object stream member offset is past the end, treating as null",
                );
                objects.insert((id, 0), Object::Null);
                continue;
            }
            let mut source = MemorySource::new("object stream", data[at..].to_vec());
            let mut parser = Parser::new(&mut source, warnings, Some(resolver), &fake_names).forbid_streams();
            let object = match parser.parse_object() {
                Ok(object) => object,
                Err(_) => {
                    warnings.borrow_mut().push(
                        Some((id, 0)),
                        None,
                        "failed to parse object stream member, treating as null",
                    );
                    Object::Null
                }
            };
            objects.insert((id, 0), object);
        }
        Ok(ObjectStream { objects, member_order })
    }

    fn parse_offset_table(prefix: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
        let mut source = MemorySource::new("object stream prefix", prefix.to_vec());
        let mut tokenizer = Tokenizer::new().allow_eof();
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let id = tokenizer.read_token(&mut source, "object stream prefix", false, 0)?;
            let offset = tokenizer.read_token(&mut source, "object stream prefix", false, 0)?;
            if id.kind != TokenKind::Integer || offset.kind != TokenKind::Integer {
                return Err(Error::Parse(ParseError::InvalidObjectStream("bad offset table")));
            }
            let id = u32::try_from(id.integer_value())
                .map_err(|_| Error::Parse(ParseError::InvalidObjectStream("object number out of range")))?;
            let offset = usize::try_from(offset.integer_value())
                .map_err(|_| Error::Parse(ParseError::InvalidObjectStream("offset out of range")))?;
            pairs.push((id, offset));
        }
        Ok(pairs)
    }
}

/// Assembles an object stream on the write side: members are serialised
/// bytes, concatenated behind the integer-pair prefix and flate-compressed.
#[derive(Default)]
pub struct ObjectStreamBuilder {
    members: Vec<(u32, Vec<u8>)>,
}

impl ObjectStreamBuilder {
    pub fn new() -> ObjectStreamBuilder {
        ObjectStreamBuilder::default()
    }

    pub fn add(&mut self, id: u32, serialized: Vec<u8>) {
        self.members.push((id, serialized));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }

    pub fn build(&self) -> Result<Stream> {
        let mut prefix = Vec::new();
        let mut body = Vec::new();
        let mut id_buffer = itoa::Buffer::new();
        let mut offset_buffer = itoa::Buffer::new();
        for (id, serialized) in &self.members {
            prefix.extend_from_slice(id_buffer.format(*id).as_bytes());
            prefix.push(b' ');
            prefix.extend_from_slice(offset_buffer.format(body.len()).as_bytes());
            prefix.push(b' ');
            body.extend_from_slice(serialized);
            body.push(b'\n');
        }
        let first = prefix.len();
        let mut payload = prefix;
        payload.extend_from_slice(&body);

        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("ObjStm"));
        dict.set("N", self.members.len());
        dict.set("First", first);
        dict.set("Filter", Object::name("FlateDecode"));
        let mut stream = Stream::new(dict, flate_encode(&payload)?);
        stream.allows_compression = false;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_output_parses_back() {
        let mut builder = ObjectStreamBuilder::new();
        builder.add(11, b"<< /Kind /First >>".to_vec());
        builder.add(12, b"[1 2 3]".to_vec());
        builder.add(13, b"(text)".to_vec());
        let stream = builder.build().unwrap();
        assert_eq!(stream.dict.get(b"N").unwrap().as_i64().unwrap(), 3);

        let parsed = ObjectStream::new(&stream).unwrap();
        assert_eq!(parsed.objects.len(), 3);
        assert!(parsed.objects[&(11, 0)].as_dict().unwrap().has(b"Kind"));
        assert_eq!(parsed.objects[&(12, 0)].as_array().unwrap().len(), 3);
        assert_eq!(parsed.objects[&(13, 0)].as_str().unwrap(), b"text");
    }

    #[test]
    fn member_stream_is_rejected() {
        let mut builder = ObjectStreamBuilder::new();
        builder.add(5, b"<< /Length 2 >> stream\nhi\nendstream".to_vec());
        let stream = builder.build().unwrap();
        let warnings = RefCell::new(Warnings::default());
        let parsed = ObjectStream::parse(&stream, &NullResolver, &warnings).unwrap();
        assert_eq!(parsed.objects[&(5, 0)], Object::Null);
        assert!(!warnings.borrow().is_empty());
    }

    #[test]
    fn not_an_object_stream() {
        let stream = Stream::new(Dictionary::new(), vec![]);
        assert!(ObjectStream::new(&stream).is_err());
    }
}
