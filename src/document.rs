//! The in-memory document: an arena of objects keyed by [`ObjectId`] plus the
//! trailer, version, cross-reference table and accumulated warnings. All
//! handles into the graph are `ObjectId`s; identity and shared mutation
//! follow from the arena.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::encryption::EncryptionState;
use crate::object::{Dictionary, Object, ObjectId};
use crate::warnings::Warnings;
use crate::xref::{Xref, XrefType};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Document {
    /// Header version, e.g. `1.7`. `/Version` in the catalog may override it.
    pub version: String,
    /// The binary comment bytes after the header line, preserved on save.
    pub binary_mark: Vec<u8>,
    pub trailer: Dictionary,
    pub reference_table: Xref,
    pub objects: BTreeMap<ObjectId, Object>,
    pub max_id: u32,
    /// Offset of the newest cross-reference section in the source file.
    pub xref_start: usize,
    pub warnings: Warnings,
    /// Present when the source document was encrypted and opened with a
    /// valid password. The writer can re-encrypt from it.
    pub encryption_state: Option<EncryptionState>,
    /// Absolute source offsets of literal-string `/Contents` values, kept so
    /// signature byte ranges survive inspection.
    pub signature_contents: BTreeMap<ObjectId, u64>,
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

impl Document {
    pub fn new() -> Document {
        Document {
            version: "1.4".to_string(),
            binary_mark: Vec::new(),
            trailer: Dictionary::new(),
            reference_table: Xref::new(0, XrefType::CrossReferenceTable),
            objects: BTreeMap::new(),
            max_id: 0,
            xref_start: 0,
            warnings: Warnings::default(),
            encryption_state: None,
            signature_contents: BTreeMap::new(),
        }
    }

    pub fn with_version(version: impl Into<String>) -> Document {
        let mut document = Document::new();
        document.version = version.into();
        document
    }

    /// Fetch an object from the arena. Missing ids are an error here; use
    /// [`Document::get_or_null`] where the spec calls for the null fallback.
    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        self.objects.get(&id).ok_or(Error::ObjectNotFound(id))
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))
    }

    /// An absent entry reads as the null object.
    pub fn get_or_null(&self, id: ObjectId) -> &Object {
        const NULL: &Object = &Object::Null;
        self.objects.get(&id).unwrap_or(NULL)
    }

    pub fn has_object(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Follow reference chains to the value they name. Returns the last
    /// reference id seen, if any. Loops and dangling references fail.
    pub fn dereference<'a>(&'a self, mut object: &'a Object) -> Result<(Option<ObjectId>, &'a Object)> {
        let mut id = None;
        let mut seen = HashSet::new();
        while let Object::Reference(reference) = object {
            if !seen.insert(*reference) {
                return Err(Error::ReferenceCycle(*reference));
            }
            id = Some(*reference);
            object = self.get_object(*reference)?;
        }
        Ok((id, object))
    }

    /// Resolve one level: a reference becomes its target (null when absent),
    /// anything else passes through.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.get_or_null(*id),
            other => other,
        }
    }

    pub fn add_object(&mut self, object: impl Into<Object>) -> ObjectId {
        self.max_id += 1;
        let id = (self.max_id, 0);
        self.objects.insert(id, object.into());
        id
    }

    pub fn set_object(&mut self, id: ObjectId, object: impl Into<Object>) {
        self.max_id = self.max_id.max(id.0);
        self.objects.insert(id, object.into());
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<Object> {
        self.objects.remove(&id)
    }

    pub fn new_object_id(&mut self) -> ObjectId {
        self.max_id += 1;
        (self.max_id, 0)
    }

    /// The catalog, via the trailer `/Root`.
    pub fn catalog(&self) -> Result<&Dictionary> {
        let root = self.trailer.get(b"Root")?;
        self.dereference(root)?.1.as_dict()
    }

    /// Replace every indirect reference inside `object` with a deep copy of
    /// its resolved value. Cycles through references yield null with a
    /// warning. Idempotent: running it twice changes nothing further.
    pub fn make_direct(&mut self, object: Object) -> Object {
        let mut pending = Vec::new();
        let result = self.make_direct_inner(object, &mut HashSet::new(), &mut pending);
        for message in pending {
            self.warnings.push_message(message);
        }
        result
    }

    fn make_direct_inner(
        &self, object: Object, active: &mut HashSet<ObjectId>, warnings: &mut Vec<String>,
    ) -> Object {
        match object {
            Object::Reference(id) => {
                if !active.insert(id) {
                    warnings.push(format!(
                        "reference cycle through object {} {} while making direct, substituting null",
                        id.0, id.1
                    ));
                    return Object::Null;
                }
                let resolved = self.get_or_null(id).clone();
                let result = self.make_direct_inner(resolved, active, warnings);
                active.remove(&id);
                result
            }
            Object::Array(items) => Object::Array(
                items
                    .into_iter()
                    .map(|item| self.make_direct_inner(item, active, warnings))
                    .collect(),
            ),
            Object::Dictionary(dict) => {
                let mut out = Dictionary::new();
                for (key, value) in dict.iter() {
                    out.set(key.clone(), self.make_direct_inner(value.clone(), active, warnings));
                }
                Object::Dictionary(out)
            }
            other => other,
        }
    }

    /// Object ids reachable from the trailer, in depth-first discovery order.
    pub fn reachable_objects(&self) -> Vec<ObjectId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let trailer = Object::Dictionary(self.trailer.clone());
        let mut stack = vec![trailer];
        while let Some(object) = stack.pop() {
            Self::collect_references(&object, &mut |id| {
                if seen.insert(id) {
                    order.push(id);
                    if let Some(target) = self.objects.get(&id) {
                        stack.push(target.clone());
                    }
                }
            });
        }
        order
    }

    fn collect_references(object: &Object, found: &mut impl FnMut(ObjectId)) {
        match object {
            Object::Reference(id) => found(*id),
            Object::Array(items) => {
                for item in items {
                    Self::collect_references(item, found);
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter() {
                    Self::collect_references(value, found);
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter() {
                    Self::collect_references(value, found);
                }
            }
            _ => {}
        }
    }

    /// Renumber every object consecutively from 1, in arena order, rewriting
    /// all references and the trailer. Generations reset to zero.
    pub fn renumber_objects(&mut self) {
        self.renumber_objects_with(1);
    }

    pub fn renumber_objects_with(&mut self, starting_id: u32) {
        let mut map: BTreeMap<ObjectId, u32> = BTreeMap::new();
        let mut next = starting_id;
        for id in self.objects.keys() {
            map.insert(*id, next);
            next += 1;
        }
        let objects = std::mem::take(&mut self.objects);
        self.objects = objects
            .into_iter()
            .map(|(id, mut object)| {
                Self::rewrite_references(&mut object, &map);
                ((map[&id], 0), object)
            })
            .collect();
        let mut trailer = Object::Dictionary(std::mem::take(&mut self.trailer));
        Self::rewrite_references(&mut trailer, &map);
        self.trailer = match trailer {
            Object::Dictionary(dict) => dict,
            _ => unreachable!(),
        };
        self.max_id = next.saturating_sub(1);
    }

    fn rewrite_references(object: &mut Object, map: &BTreeMap<ObjectId, u32>) {
        match object {
            Object::Reference(id) => {
                // Dangling references become the reserved null id.
                *id = map.get(id).map(|&new| (new, 0)).unwrap_or((0, 0));
            }
            Object::Array(items) => {
                for item in items {
                    Self::rewrite_references(item, map);
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter_mut() {
                    Self::rewrite_references(value, map);
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    Self::rewrite_references(value, map);
                }
            }
            _ => {}
        }
    }

    /// Decode every filterable stream in place, dropping its filters.
    pub fn decompress(&mut self) {
        use crate::filters::{DecodeLevel, decode_stream, is_filterable};
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            let Some(Object::Stream(stream)) = self.objects.get(&id) else {
                continue;
            };
            if stream.filters().is_empty() || !is_filterable(stream, DecodeLevel::Specialized) {
                continue;
            }
            let Ok(raw) = stream.content() else { continue };
            match decode_stream(stream, raw, DecodeLevel::Specialized) {
                Ok(decoded) => {
                    let Some(Object::Stream(stream)) = self.objects.get_mut(&id) else {
                        continue;
                    };
                    stream.replace_stream_data(decoded, Object::Null, Object::Null);
                }
                Err(error) => {
                    self.warnings.push(Some(id), None, format!("failed to decode stream: {error}"));
                }
            }
        }
    }

    /// Flate-compress every stream that carries no filter yet.
    pub fn compress(&mut self) {
        use crate::filters::flate_encode;
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            let Some(Object::Stream(stream)) = self.objects.get(&id) else {
                continue;
            };
            if !stream.filters().is_empty() || !stream.allows_compression {
                continue;
            }
            let Ok(raw) = stream.content() else { continue };
            match flate_encode(raw) {
                Ok(compressed) if compressed.len() < raw.len() => {
                    let Some(Object::Stream(stream)) = self.objects.get_mut(&id) else {
                        continue;
                    };
                    stream.replace_stream_data(compressed, Object::name("FlateDecode"), Object::Null);
                }
                Ok(_) => {}
                Err(error) => {
                    self.warnings.push(Some(id), None, format!("failed to compress stream: {error}"));
                }
            }
        }
    }

    /// Page object ids in page-tree order. Used by the linearizer and tests.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        let mut pages = Vec::new();
        let Ok(catalog) = self.catalog() else {
            return pages;
        };
        let Some(root) = catalog.opt(b"Pages") else {
            return pages;
        };
        let mut stack = vec![root.clone()];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            let id = node.as_reference().ok();
            if let Some(id) = id {
                if !seen.insert(id) {
                    continue;
                }
            }
            let Ok((_, node)) = self.dereference(&node) else {
                continue;
            };
            let Ok(dict) = node.as_dict() else { continue };
            if dict.has_type(b"Page") {
                if let Some(id) = id {
                    pages.push(id);
                }
            } else if let Some(kids) = dict.opt(b"Kids") {
                if let Object::Array(kids) = self.resolve(kids) {
                    for kid in kids.iter().rev() {
                        stack.push(kid.clone());
                    }
                }
            }
        }
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let page_id = document.add_object(Dictionary::from_iter([
            ("Type", Object::name("Page")),
            ("Parent", Object::Reference(pages_id)),
        ]));
        document.set_object(
            pages_id,
            Dictionary::from_iter([
                ("Type", Object::name("Pages")),
                ("Kids", Object::Array(vec![Object::Reference(page_id)])),
                ("Count", Object::Integer(1)),
            ]),
        );
        let catalog_id = document.add_object(Dictionary::from_iter([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(pages_id)),
        ]));
        document.trailer.set("Root", Object::Reference(catalog_id));
        document
    }

    #[test]
    fn arena_identity() {
        let mut document = sample();
        let id = document.add_object(Object::Integer(1));
        *document.get_object_mut(id).unwrap() = Object::Integer(2);
        assert_eq!(document.get_object(id).unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn dereference_follows_chains() {
        let mut document = sample();
        let a = document.add_object(Object::Integer(7));
        let b = document.add_object(Object::Reference(a));
        let reference = Object::Reference(b);
        let (id, value) = document.dereference(&reference).unwrap();
        assert_eq!(id, Some(a));
        assert_eq!(value.as_i64().unwrap(), 7);
    }

    #[test]
    fn dereference_detects_cycles() {
        let mut document = Document::new();
        let a = document.new_object_id();
        let b = document.add_object(Object::Reference(a));
        document.set_object(a, Object::Reference(b));
        let reference = Object::Reference(a);
        assert!(matches!(
            document.dereference(&reference),
            Err(Error::ReferenceCycle(_))
        ));
    }

    #[test]
    fn make_direct_is_idempotent() {
        let mut document = Document::new();
        let inner = document.add_object(Object::Integer(5));
        let array = Object::Array(vec![Object::Reference(inner), Object::Boolean(true)]);
        let once = document.make_direct(array);
        let twice = document.make_direct(once.clone());
        assert_eq!(once, twice);
        assert_eq!(
            once,
            Object::Array(vec![Object::Integer(5), Object::Boolean(true)])
        );
    }

    #[test]
    fn make_direct_breaks_cycles_with_null() {
        let mut document = Document::new();
        let a = document.new_object_id();
        document.set_object(a, Object::Array(vec![Object::Reference(a)]));
        let out = document.make_direct(Object::Reference(a));
        assert_eq!(out, Object::Array(vec![Object::Null]));
        assert_eq!(document.warnings.len(), 1);
    }

    #[test]
    fn reachability_ignores_orphans() {
        let mut document = sample();
        document.add_object(Object::string_literal("orphan"));
        let reachable = document.reachable_objects();
        assert_eq!(reachable.len(), 3);
    }

    #[test]
    fn renumber_rewrites_references() {
        let mut document = sample();
        document.renumber_objects();
        let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
        let catalog = document.get_object(root).unwrap().as_dict().unwrap();
        let pages_id = catalog.get(b"Pages").unwrap().as_reference().unwrap();
        let pages = document.get_object(pages_id).unwrap().as_dict().unwrap();
        assert_eq!(pages.get(b"Count").unwrap().as_i64().unwrap(), 1);
        let ids: Vec<u32> = document.objects.keys().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn page_order() {
        let document = sample();
        assert_eq!(document.page_ids().len(), 1);
    }
}
