//! On-demand object resolution. An object lives in one of four states:
//! absent (reads as null), unresolved (xref entry only), resolving (being
//! parsed right now, the cycle guard), and resolved (in the document arena).

use std::io::SeekFrom;

use crate::object::{Object, ObjectId};
use crate::parser::{Parser, Resolver};
use crate::source::Source;
use crate::xref::XrefEntry;
use crate::{Error, Result, XrefError};

use super::Reader;

impl Reader {
    /// Parse the object `id` names, wherever the xref places it. Callers that
    /// want the null fallback use [`Resolver::resolve`] instead.
    pub fn get_object(&self, id: ObjectId) -> Result<Object> {
        if let Some(object) = self.document.objects.get(&id) {
            return Ok(object.clone());
        }
        let entry = self
            .document
            .reference_table
            .get(id.0)
            .ok_or(Error::Xref(XrefError::MissingEntry))?
            .clone();
        match entry {
            XrefEntry::Normal { offset, generation } => {
                if generation != id.1 {
                    return Err(Error::Xref(XrefError::MissingEntry));
                }
                let (_, object) = self.read_object(offset, Some(id))?;
                Ok(object)
            }
            XrefEntry::Compressed { container, .. } => self.get_compressed_object(id, container),
            XrefEntry::Free { .. } | XrefEntry::UnusableFree => Ok(Object::Null),
        }
    }

    /// Parse an `N G obj` body at `offset`.
    pub(crate) fn read_object(&self, offset: u64, expected: Option<ObjectId>) -> Result<(ObjectId, Object)> {
        if offset as usize >= self.data.len() {
            return Err(Error::InvalidOffset(offset as usize));
        }
        let mut source = self.source();
        source.seek(SeekFrom::Start(offset))?;
        let mut parser = Parser::new(&mut source, &self.warnings, Some(self), &self.fake_names);
        let (id, object) = parser.parse_indirect_object(offset, expected)?;
        if let Some(contents_offset) = parser.contents_offset() {
            self.contents_offsets.borrow_mut().insert(id, contents_offset);
        }
        Ok((id, object))
    }

    /// Load a member of an object stream. The container itself must be an
    /// ordinary in-use object; object streams cannot nest.
    fn get_compressed_object(&self, id: ObjectId, container: u32) -> Result<Object> {
        match self.document.reference_table.get(container) {
            Some(XrefEntry::Compressed { .. }) => {
                self.warn(
                    Some(id),
                    None,
                    "object stream container is itself compressed, treating member as null",
                );
                return Ok(Object::Null);
            }
            Some(_) => {}
            None => return Err(Error::Xref(XrefError::MissingEntry)),
        }
        let container_object = self.resolve((container, 0));
        let stream = match container_object {
            Object::Stream(stream) => stream,
            other => {
                self.warn(
                    Some(id),
                    None,
                    format!("object stream container is a {}, treating member as null", other.enum_variant()),
                );
                return Ok(Object::Null);
            }
        };
        let members = crate::object_stream::ObjectStream::parse(&stream, self, &self.warnings)?;
        Ok(members.objects.get(&id).cloned().unwrap_or(Object::Null))
    }
}

impl Resolver for Reader {
    /// Never fails: a reference that cannot be resolved reads as null with a
    /// warning, and a self-reference hit during its own parse does too.
    fn resolve(&self, id: ObjectId) -> Object {
        if let Some(object) = self.document.objects.get(&id) {
            return object.clone();
        }
        if !self.resolving.borrow_mut().insert(id) {
            self.warn(
                Some(id),
                None,
                "object references itself while being parsed, treating the reference as null",
            );
            return Object::Null;
        }
        let result = match self.get_object(id) {
            Ok(object) => object,
            Err(error) => {
                self.warn(Some(id), None, format!("failed to resolve object: {error}"));
                Object::Null
            }
        };
        self.resolving.borrow_mut().remove(&id);
        result
    }
}
