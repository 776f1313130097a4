//! Name and number trees: the persistent, sorted key-value maps the format
//! uses for destinations, page labels, embedded files and structure data.
//! Intermediate nodes carry `/Kids` and `/Limits`; leaves carry `/Names` or
//! `/Nums` as alternating key-value arrays plus `/Limits`.

use std::collections::HashSet;

use crate::document::Document;
use crate::object::{Dictionary, Object, ObjectId};
use crate::{Error, Result};

/// Items per leaf before it splits.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 32;

/// A key type usable in a tree: byte-string keys make a name tree, integer
/// keys a number tree.
pub trait TreeKey: Clone + Ord {
    /// `Names` or `Nums`.
    const LEAF_ENTRY: &'static [u8];

    fn from_object(object: &Object) -> Option<Self>;

    fn to_object(&self) -> Object;
}

impl TreeKey for Vec<u8> {
    const LEAF_ENTRY: &'static [u8] = b"Names";

    fn from_object(object: &Object) -> Option<Self> {
        object.as_str().ok().map(<[u8]>::to_vec)
    }

    fn to_object(&self) -> Object {
        Object::string_literal(self.clone())
    }
}

impl TreeKey for i64 {
    const LEAF_ENTRY: &'static [u8] = b"Nums";

    fn from_object(object: &Object) -> Option<Self> {
        object.as_i64().ok()
    }

    fn to_object(&self) -> Object {
        Object::Integer(*self)
    }
}

pub type NameTree<'a> = Tree<'a, Vec<u8>>;
pub type NumberTree<'a> = Tree<'a, i64>;

/// A handle over a tree rooted at an indirect object.
pub struct Tree<'a, K: TreeKey> {
    document: &'a mut Document,
    root: ObjectId,
    split_threshold: usize,
    _key: std::marker::PhantomData<K>,
}

impl<'a, K: TreeKey> Tree<'a, K> {
    /// Open an existing tree rooted at `root`.
    pub fn open(document: &'a mut Document, root: ObjectId) -> Tree<'a, K> {
        Tree {
            document,
            root,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            _key: std::marker::PhantomData,
        }
    }

    /// Create an empty tree and return a handle to it.
    pub fn create(document: &'a mut Document) -> Tree<'a, K> {
        let mut node = Dictionary::new();
        node.set(K::LEAF_ENTRY.to_vec(), Object::Array(Vec::new()));
        let root = document.add_object(node);
        Tree::open(document, root)
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn set_split_threshold(&mut self, threshold: usize) {
        self.split_threshold = threshold.max(2);
    }

    fn node(&self, id: ObjectId) -> Result<&Dictionary> {
        self.document.get_object(id)?.as_dict()
    }

    fn is_leaf(&self, id: ObjectId) -> Result<bool> {
        Ok(self.node(id)?.opt(b"Kids").is_none())
    }

    /// The leaf whose limits cover `key`, with the path of intermediate
    /// nodes taken to reach it.
    fn descend(&self, key: &K) -> Result<(ObjectId, Vec<ObjectId>)> {
        let mut path = Vec::new();
        let mut current = self.root;
        let mut hops = 0;
        while !self.is_leaf(current)? {
            hops += 1;
            if hops > 64 {
                return Err(Error::InvalidStream("tree nesting is too deep".to_string()));
            }
            path.push(current);
            let node = self.node(current)?;
            let kids = node.get(b"Kids")?.as_array()?.clone();
            if kids.is_empty() {
                return Err(Error::InvalidStream("intermediate tree node has no kids".to_string()));
            }
            // First kid whose upper limit admits the key; else the last one.
            let mut chosen = kids.last().unwrap().as_reference()?;
            for kid in &kids {
                let kid_id = kid.as_reference()?;
                let (_, upper) = self.limits_of(kid_id)?;
                if *key <= upper {
                    chosen = kid_id;
                    break;
                }
            }
            current = chosen;
        }
        Ok((current, path))
    }

    fn limits_of(&self, id: ObjectId) -> Result<(K, K)> {
        let node = self.node(id)?;
        if let Some(limits) = node.opt(b"Limits") {
            let limits = limits.as_array()?;
            if limits.len() == 2 {
                if let (Some(lower), Some(upper)) =
                    (K::from_object(&limits[0]), K::from_object(&limits[1]))
                {
                    return Ok((lower, upper));
                }
            }
        }
        // A damaged or absent /Limits falls back to the actual content.
        self.subtree_limits(id)?
            .ok_or_else(|| Error::InvalidStream("tree node has no limits and no items".to_string()))
    }

    fn leaf_items(&self, id: ObjectId) -> Result<Vec<(K, Object)>> {
        let node = self.node(id)?;
        let Some(array) = node.opt(K::LEAF_ENTRY) else {
            return Ok(Vec::new());
        };
        let array = array.as_array()?;
        let mut items = Vec::with_capacity(array.len() / 2);
        for pair in array.chunks(2) {
            if let [key, value] = pair {
                if let Some(key) = K::from_object(key) {
                    items.push((key, value.clone()));
                }
            }
        }
        Ok(items)
    }

    fn store_leaf_items(&mut self, id: ObjectId, items: &[(K, Object)]) -> Result<()> {
        let mut array = Vec::with_capacity(items.len() * 2);
        for (key, value) in items {
            array.push(key.to_object());
            array.push(value.clone());
        }
        let node = self.document.get_object_mut(id)?.as_dict_mut()?;
        node.set(K::LEAF_ENTRY.to_vec(), Object::Array(array));
        self.refresh_limits(id)?;
        Ok(())
    }

    /// Recompute `/Limits` from the node's content. The root carries none.
    fn refresh_limits(&mut self, id: ObjectId) -> Result<()> {
        let limits = self.subtree_limits(id)?;
        let node = self.document.get_object_mut(id)?.as_dict_mut()?;
        match limits {
            Some((lower, upper)) if id != self.root => {
                node.set("Limits", Object::Array(vec![lower.to_object(), upper.to_object()]));
            }
            _ => {
                node.remove(b"Limits");
            }
        }
        Ok(())
    }

    fn subtree_limits(&self, id: ObjectId) -> Result<Option<(K, K)>> {
        if self.is_leaf(id)? {
            let items = self.leaf_items(id)?;
            return Ok(match (items.first(), items.last()) {
                (Some((lower, _)), Some((upper, _))) => Some((lower.clone(), upper.clone())),
                _ => None,
            });
        }
        let kids = self.node(id)?.get(b"Kids")?.as_array()?.clone();
        let mut lower = None;
        let mut upper = None;
        for kid in kids {
            if let Some((kid_lower, kid_upper)) = self.subtree_limits(kid.as_reference()?)? {
                if lower.as_ref().map(|l| kid_lower < *l).unwrap_or(true) {
                    lower = Some(kid_lower);
                }
                if upper.as_ref().map(|u| kid_upper > *u).unwrap_or(true) {
                    upper = Some(kid_upper);
                }
            }
        }
        Ok(lower.zip(upper))
    }

    pub fn find(&self, key: &K) -> Result<Option<Object>> {
        let (leaf, _) = self.descend(key)?;
        let items = self.leaf_items(leaf)?;
        Ok(items
            .iter()
            .find(|(item_key, _)| item_key == key)
            .map(|(_, value)| value.clone()))
    }

    /// Insert or replace. The leaf splits in two once it crosses the
    /// threshold, growing the tree by one level at the root when needed.
    pub fn insert(&mut self, key: K, value: Object) -> Result<()> {
        let (leaf, path) = self.descend(&key)?;
        let mut items = self.leaf_items(leaf)?;
        match items.binary_search_by(|(item_key, _)| item_key.cmp(&key)) {
            Ok(at) => items[at].1 = value,
            Err(at) => items.insert(at, (key, value)),
        }
        if items.len() > self.split_threshold {
            self.split_leaf(leaf, items, &path)?;
        } else {
            self.store_leaf_items(leaf, &items)?;
            for node in path.into_iter().rev() {
                self.refresh_limits(node)?;
            }
        }
        Ok(())
    }

    /// The bulk-load fast path: append a key known to sort after everything
    /// already present. No search, no comparison against existing keys.
    pub fn insert_after(&mut self, key: K, value: Object) -> Result<()> {
        let mut current = self.root;
        let mut path = Vec::new();
        while !self.is_leaf(current)? {
            path.push(current);
            let kids = self.node(current)?.get(b"Kids")?.as_array()?.clone();
            current = kids
                .last()
                .ok_or_else(|| Error::InvalidStream("intermediate tree node has no kids".to_string()))?
                .as_reference()?;
        }
        let mut items = self.leaf_items(current)?;
        items.push((key, value));
        if items.len() > self.split_threshold {
            self.split_leaf(current, items, &path)?;
        } else {
            self.store_leaf_items(current, &items)?;
            for node in path.into_iter().rev() {
                self.refresh_limits(node)?;
            }
        }
        Ok(())
    }

    fn split_leaf(&mut self, leaf: ObjectId, items: Vec<(K, Object)>, path: &[ObjectId]) -> Result<()> {
        let half = items.len() / 2;
        let right_items = items[half..].to_vec();
        let left_items = &items[..half];

        let mut right = Dictionary::new();
        right.set(K::LEAF_ENTRY.to_vec(), Object::Array(Vec::new()));
        let right_id = self.document.add_object(right);

        match path.last() {
            Some(&parent) => {
                self.store_leaf_items(leaf, left_items)?;
                self.store_leaf_items(right_id, &right_items)?;
                let parent_dict = self.document.get_object(parent)?.as_dict()?;
                let mut kids = parent_dict.get(b"Kids")?.as_array()?.clone();
                let position = kids
                    .iter()
                    .position(|kid| kid.as_reference().ok() == Some(leaf))
                    .map(|p| p + 1)
                    .unwrap_or(kids.len());
                kids.insert(position, Object::Reference(right_id));
                self.document
                    .get_object_mut(parent)?
                    .as_dict_mut()?
                    .set("Kids", Object::Array(kids));
                for node in path.iter().rev() {
                    self.refresh_limits(*node)?;
                }
            }
            None => {
                // The leaf is the root: push both halves one level down.
                let mut left = Dictionary::new();
                left.set(K::LEAF_ENTRY.to_vec(), Object::Array(Vec::new()));
                let left_id = self.document.add_object(left);
                self.store_leaf_items(left_id, left_items)?;
                self.store_leaf_items(right_id, &right_items)?;
                let root = self.document.get_object_mut(self.root)?.as_dict_mut()?;
                root.remove(K::LEAF_ENTRY);
                root.remove(b"Limits");
                root.set(
                    "Kids",
                    Object::Array(vec![Object::Reference(left_id), Object::Reference(right_id)]),
                );
            }
        }
        Ok(())
    }

    /// Remove a key. Returns whether it was present. An emptied leaf is
    /// unlinked from its parent.
    pub fn erase(&mut self, key: &K) -> Result<bool> {
        let (leaf, path) = self.descend(key)?;
        let mut items = self.leaf_items(leaf)?;
        let Ok(at) = items.binary_search_by(|(item_key, _)| item_key.cmp(key)) else {
            return Ok(false);
        };
        items.remove(at);
        self.store_leaf_items(leaf, &items)?;
        if items.is_empty() {
            if let Some(&parent) = path.last() {
                let parent_dict = self.document.get_object(parent)?.as_dict()?;
                let mut kids = parent_dict.get(b"Kids")?.as_array()?.clone();
                kids.retain(|kid| kid.as_reference().ok() != Some(leaf));
                self.document
                    .get_object_mut(parent)?
                    .as_dict_mut()?
                    .set("Kids", Object::Array(kids));
                self.document.remove_object(leaf);
            }
        }
        for node in path.into_iter().rev() {
            self.refresh_limits(node)?;
        }
        Ok(true)
    }

    /// All entries in key order. The returned iterator is double-ended.
    pub fn iter(&self) -> Result<std::vec::IntoIter<(K, Object)>> {
        let mut items = Vec::new();
        self.collect_items(self.root, &mut items, &mut HashSet::new())?;
        Ok(items.into_iter())
    }

    fn collect_items(
        &self, id: ObjectId, out: &mut Vec<(K, Object)>, seen: &mut HashSet<ObjectId>,
    ) -> Result<()> {
        if !seen.insert(id) {
            return Err(Error::InvalidStream("tree nodes form a cycle".to_string()));
        }
        if self.is_leaf(id)? {
            out.extend(self.leaf_items(id)?);
            return Ok(());
        }
        let kids = self.node(id)?.get(b"Kids")?.as_array()?.clone();
        for kid in kids {
            self.collect_items(kid.as_reference()?, out, seen)?;
        }
        Ok(())
    }

    /// Check the structural invariants: keys globally sorted and every
    /// non-root node's `/Limits` matching its subtree.
    pub fn validate(&self) -> Result<()> {
        let items: Vec<(K, Object)> = self.iter()?.collect();
        for window in items.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(Error::InvalidStream("tree keys are not strictly sorted".to_string()));
            }
        }
        self.validate_node(self.root)?;
        Ok(())
    }

    fn validate_node(&self, id: ObjectId) -> Result<()> {
        if id != self.root {
            let declared = self.node(id)?.opt(b"Limits").cloned();
            let Some(declared) = declared else {
                return Err(Error::InvalidStream("tree node is missing /Limits".to_string()));
            };
            let declared = declared.as_array()?.clone();
            let actual = self
                .subtree_limits(id)?
                .ok_or_else(|| Error::InvalidStream("empty tree node under an intermediate".to_string()))?;
            let matches = declared.len() == 2
                && K::from_object(&declared[0]).as_ref() == Some(&actual.0)
                && K::from_object(&declared[1]).as_ref() == Some(&actual.1);
            if !matches {
                return Err(Error::InvalidStream("/Limits does not match subtree keys".to_string()));
            }
        }
        if !self.is_leaf(id)? {
            let kids = self.node(id)?.get(b"Kids")?.as_array()?.clone();
            for kid in kids {
                self.validate_node(kid.as_reference()?)?;
            }
        }
        Ok(())
    }

    /// Rebuild a damaged tree from its flattened traversal: one fresh root
    /// leaf re-filled through ordinary inserts.
    pub fn repair(&mut self) -> Result<()> {
        let mut items = Vec::new();
        // Collection tolerates bad limits; it only follows structure.
        self.collect_items(self.root, &mut items, &mut HashSet::new())?;
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items.dedup_by(|a, b| a.0 == b.0);
        let root = self.document.get_object_mut(self.root)?.as_dict_mut()?;
        root.remove(b"Kids");
        root.remove(b"Limits");
        root.set(K::LEAF_ENTRY.to_vec(), Object::Array(Vec::new()));
        for (key, value) in items {
            self.insert_after(key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters() -> Vec<Vec<u8>> {
        (b'a'..=b'z').map(|c| vec![c]).collect()
    }

    #[test]
    fn bulk_load_iterates_in_order() {
        let mut document = Document::new();
        let root = {
            let mut tree = NameTree::create(&mut document);
            tree.set_split_threshold(4);
            for key in letters() {
                tree.insert_after(key.clone(), Object::string_literal(key)).unwrap();
            }
            tree.validate().unwrap();
            tree.root()
        };
        let tree = NameTree::open(&mut document, root);
        let keys: Vec<Vec<u8>> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, letters());
    }

    #[test]
    fn find_after_splits() {
        let mut document = Document::new();
        let mut tree = NameTree::create(&mut document);
        tree.set_split_threshold(4);
        for key in letters() {
            tree.insert(key.clone(), Object::string_literal(key)).unwrap();
        }
        assert_eq!(
            tree.find(&b"m".to_vec()).unwrap().unwrap().as_str().unwrap(),
            b"m"
        );
        assert!(tree.find(&b"zz".to_vec()).unwrap().is_none());
    }

    #[test]
    fn erase_every_other_keeps_invariants() {
        let mut document = Document::new();
        let mut tree = NameTree::create(&mut document);
        tree.set_split_threshold(4);
        for key in letters() {
            tree.insert_after(key.clone(), Object::string_literal(key)).unwrap();
        }
        for (index, key) in letters().into_iter().enumerate() {
            if index % 2 == 0 {
                assert!(tree.erase(&key).unwrap());
            }
        }
        tree.validate().unwrap();
        let remaining: Vec<Vec<u8>> = tree.iter().unwrap().map(|(k, _)| k).collect();
        let expected: Vec<Vec<u8>> = letters().into_iter().enumerate()
            .filter(|(index, _)| index % 2 == 1)
            .map(|(_, k)| k)
            .collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn reverse_iteration() {
        let mut document = Document::new();
        let mut tree = NumberTree::create(&mut document);
        for n in 0..10 {
            tree.insert_after(n, Object::Integer(n * 100)).unwrap();
        }
        let backwards: Vec<i64> = tree.iter().unwrap().rev().map(|(k, _)| k).collect();
        assert_eq!(backwards, (0..10).rev().collect::<Vec<i64>>());
    }

    #[test]
    fn number_tree_find() {
        let mut document = Document::new();
        let mut tree = NumberTree::create(&mut document);
        tree.set_split_threshold(3);
        for n in [5i64, 1, 9, 3, 7, 2, 8] {
            tree.insert(n, Object::Integer(n)).unwrap();
        }
        tree.validate().unwrap();
        assert_eq!(tree.find(&7).unwrap().unwrap().as_i64().unwrap(), 7);
        assert!(tree.find(&4).unwrap().is_none());
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut document = Document::new();
        let mut tree = NameTree::create(&mut document);
        tree.insert(b"k".to_vec(), Object::Integer(1)).unwrap();
        tree.insert(b"k".to_vec(), Object::Integer(2)).unwrap();
        assert_eq!(tree.iter().unwrap().count(), 1);
        assert_eq!(tree.find(&b"k".to_vec()).unwrap().unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn repair_rebuilds_bad_limits() {
        let mut document = Document::new();
        let root = {
            let mut tree = NameTree::create(&mut document);
            tree.set_split_threshold(3);
            for key in letters() {
                tree.insert_after(key.clone(), Object::Null).unwrap();
            }
            tree.root()
        };
        // Corrupt a /Limits entry somewhere below the root.
        let damaged = document
            .objects
            .iter()
            .find_map(|(id, object)| {
                let dict = object.as_dict().ok()?;
                if *id != root && dict.has(b"Limits") {
                    Some(*id)
                } else {
                    None
                }
            })
            .unwrap();
        document
            .get_object_mut(damaged)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Limits", Object::Array(vec![Object::string_literal("zz"), Object::string_literal("zzz")]));

        let mut tree = NameTree::open(&mut document, root);
        assert!(tree.validate().is_err());
        tree.repair().unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.iter().unwrap().count(), 26);
    }
}
