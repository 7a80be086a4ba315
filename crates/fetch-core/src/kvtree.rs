//! crates/fetch-core/src/kvtree.rs
//!
//! Ordered, string-keyed tree used for the on-disk index, the summary
//! manifest, and the filemap.
//!
//! This mirrors the "hash of hashes" shape that the original SCR
//! implementation builds with `scr_hash_set`/`scr_hash_get`: every node is
//! either a scalar leaf or a nested tree, keys iterate in insertion order,
//! and integer keys (ranks, container ids, segment offsets) are represented
//! as their decimal string form. [`KVTree`] is a clean, typed stand-in for
//! that structure, not a literal port of it.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use indexmap::IndexMap;

use crate::error::{FetchError, FetchResult};

/// A single entry under a [`KVTree`]: either a scalar value or a nested
/// tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KVNode {
    /// A scalar value, stored as its string representation.
    Leaf(String),
    /// A nested tree.
    Tree(KVTree),
}

impl KVNode {
    /// Returns this node as a tree, if it is one.
    #[must_use]
    pub fn as_tree(&self) -> Option<&KVTree> {
        match self {
            KVNode::Tree(tree) => Some(tree),
            KVNode::Leaf(_) => None,
        }
    }

    /// Returns this node as a leaf string, if it is one.
    #[must_use]
    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            KVNode::Leaf(value) => Some(value.as_str()),
            KVNode::Tree(_) => None,
        }
    }
}

/// An insertion-ordered, string-keyed tree of scalars and nested trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KVTree {
    entries: IndexMap<String, KVNode>,
}

impl KVTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Number of direct children (`size` in the external interface).
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether this tree has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a child tree by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&KVTree> {
        self.entries.get(key).and_then(KVNode::as_tree)
    }

    /// Looks up a child tree by integer key, formatted as its decimal
    /// string (the equivalent of `scr_hash_getf(tree, "%d", id)`).
    #[must_use]
    pub fn get_fmt(&self, key: i64) -> Option<&KVTree> {
        self.get(&key.to_string())
    }

    /// Mutable lookup of a child tree by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut KVTree> {
        self.entries.get_mut(key).and_then(|node| match node {
            KVNode::Tree(tree) => Some(tree),
            KVNode::Leaf(_) => None,
        })
    }

    /// Looks up a scalar child and returns its raw string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(KVNode::as_leaf)
    }

    /// Looks up a scalar child and parses it as `i64`.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key)?.parse().ok()
    }

    /// Looks up a scalar child and parses it as `u32`.
    #[must_use]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_str(key)?.parse().ok()
    }

    /// Looks up a scalar child and parses it as `u64`.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key)?.parse().ok()
    }

    /// Looks up a scalar child and parses it as `bool` (`"0"`/`"1"`).
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_i64(key).map(|value| value != 0)
    }

    /// Inserts (or replaces) a nested tree under `key` and returns a
    /// mutable reference to it, matching `scr_hash_set`'s "set and return
    /// the child" calling convention.
    pub fn set(&mut self, key: impl Into<String>, child: KVTree) -> &mut KVTree {
        let key = key.into();
        self.entries.insert(key.clone(), KVNode::Tree(child));
        self.entries
            .get_mut(&key)
            .and_then(|node| match node {
                KVNode::Tree(tree) => Some(tree),
                KVNode::Leaf(_) => None,
            })
            .expect("just inserted a Tree node under this key")
    }

    /// Inserts a scalar leaf under `key`.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), KVNode::Leaf(value.into()));
    }

    /// Inserts an integer scalar leaf under `key`.
    pub fn set_i64(&mut self, key: impl Into<String>, value: i64) {
        self.set_str(key, value.to_string());
    }

    /// Inserts an unsigned scalar leaf under `key`.
    pub fn set_u64(&mut self, key: impl Into<String>, value: u64) {
        self.set_str(key, value.to_string());
    }

    /// Inserts a boolean scalar leaf under `key`, encoded as `"0"`/`"1"`.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set_str(key, if value { "1" } else { "0" });
    }

    /// Removes and returns the child stored under `key`, if any.
    pub fn remove(&mut self, key: &str) -> Option<KVNode> {
        self.entries.shift_remove(key)
    }

    /// Recursively merges `other` into `self`: scalar leaves in `other`
    /// overwrite same-keyed leaves in `self`; nested trees are merged
    /// child-by-child rather than replaced wholesale.
    pub fn merge(&mut self, other: &KVTree) {
        for (key, node) in &other.entries {
            match node {
                KVNode::Leaf(value) => {
                    self.entries
                        .insert(key.clone(), KVNode::Leaf(value.clone()));
                }
                KVNode::Tree(child) => {
                    if let Some(KVNode::Tree(existing)) = self.entries.get_mut(key) {
                        existing.merge(child);
                    } else {
                        self.entries.insert(key.clone(), KVNode::Tree(child.clone()));
                    }
                }
            }
        }
    }

    /// Reorders direct children whose keys parse as `i64` into ascending
    /// numeric order, leaving non-numeric keys in their relative position
    /// at the end. Used to sort `rank2file` by rank and container segments
    /// by logical offset before `ContainerReader` walks them.
    pub fn sort_int(&mut self) {
        let mut numeric: Vec<(i64, String)> = Vec::new();
        let mut other: Vec<String> = Vec::new();
        for key in self.entries.keys() {
            match key.parse::<i64>() {
                Ok(n) => numeric.push((n, key.clone())),
                Err(_) => other.push(key.clone()),
            }
        }
        numeric.sort_by_key(|(n, _)| *n);

        let mut reordered = IndexMap::with_capacity(self.entries.len());
        for (_, key) in numeric {
            if let Some(node) = self.entries.shift_remove(&key) {
                reordered.insert(key, node);
            }
        }
        for key in other {
            if let Some(node) = self.entries.shift_remove(&key) {
                reordered.insert(key, node);
            }
        }
        self.entries = reordered;
    }

    /// Iterates over direct children in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &KVNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over direct children that are nested trees, in insertion
    /// order, skipping scalar leaves.
    pub fn children(&self) -> impl Iterator<Item = (&str, &KVTree)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_tree().map(|t| (k.as_str(), t)))
    }

    /// Serializes this tree to the line-oriented text format used for the
    /// index, summary, and filemap files: each line is
    /// `<tab-depth><key>` for a nested tree or `<tab-depth><key>=<value>`
    /// for a leaf, children following their parent at depth + 1.
    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        self.write_text_at(out, 0)
    }

    fn write_text_at(&self, out: &mut impl Write, depth: usize) -> io::Result<()> {
        for (key, node) in &self.entries {
            let mut line = String::new();
            for _ in 0..depth {
                line.push('\t');
            }
            match node {
                KVNode::Leaf(value) => {
                    let _ = write!(line, "{key}={value}");
                    writeln!(out, "{line}")?;
                }
                KVNode::Tree(child) => {
                    let _ = write!(line, "{key}");
                    writeln!(out, "{line}")?;
                    child.write_text_at(out, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// Parses the text format written by [`KVTree::write_text`].
    pub fn read_text(input: &mut impl BufRead) -> FetchResult<KVTree> {
        let mut raw_lines = Vec::new();
        for line in input.lines() {
            let line = line.map_err(|e| FetchError::io("<kvtree>", e))?;
            if line.trim().is_empty() {
                continue;
            }
            raw_lines.push(line);
        }
        let mut index = 0usize;
        Self::parse_block(&raw_lines, &mut index, 0)
    }

    fn parse_block(lines: &[String], index: &mut usize, depth: usize) -> FetchResult<KVTree> {
        let mut tree = KVTree::new();
        while *index < lines.len() {
            let line = &lines[*index];
            let line_depth = line.chars().take_while(|c| *c == '\t').count();
            if line_depth < depth {
                break;
            }
            if line_depth > depth {
                return Err(FetchError::manifest(format!(
                    "unexpected indentation at line {}: {line:?}",
                    *index + 1
                )));
            }
            let content = &line[depth..];
            *index += 1;
            if let Some((key, value)) = content.split_once('=') {
                tree.set_str(key, value);
            } else {
                let child = Self::parse_block(lines, index, depth + 1)?;
                tree.set(content, child);
            }
        }
        Ok(tree)
    }

    /// Builds a `rank -> KVTree` map from a `rank2file`-shaped tree whose
    /// direct children are keyed by decimal rank. Used by `SummaryScatter`
    /// to split rank-0's view of the manifest before handing it to
    /// `Transport::exchange`.
    #[must_use]
    pub fn into_rank_map(mut self) -> BTreeMap<usize, KVTree> {
        let mut out = BTreeMap::new();
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for key in keys {
            if let Ok(rank) = key.parse::<usize>() {
                if let Some(KVNode::Tree(tree)) = self.entries.shift_remove(&key) {
                    out.insert(rank, tree);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let mut tree = KVTree::new();
        tree.set_str("size", "16");
        tree.set("child", KVTree::new());
        assert_eq!(tree.get_u64("size"), Some(16));
        assert!(tree.get("child").is_some());
        assert!(tree.get("missing").is_none());
    }

    #[test]
    fn elements_preserve_insertion_order() {
        let mut tree = KVTree::new();
        tree.set_str("b", "2");
        tree.set_str("a", "1");
        tree.set_str("c", "3");
        let keys: Vec<&str> = tree.elements().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn sort_int_orders_numeric_keys_ascending() {
        let mut tree = KVTree::new();
        tree.set_str("10", "x");
        tree.set_str("2", "y");
        tree.set_str("1", "z");
        tree.sort_int();
        let keys: Vec<&str> = tree.elements().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1", "2", "10"]);
    }

    #[test]
    fn merge_overwrites_leaves_and_merges_children() {
        let mut base = KVTree::new();
        base.set_str("size", "1");
        let mut child = KVTree::new();
        child.set_str("x", "1");
        base.set("child", child);

        let mut update = KVTree::new();
        update.set_str("size", "2");
        let mut child_update = KVTree::new();
        child_update.set_str("y", "2");
        update.set("child", child_update);

        base.merge(&update);

        assert_eq!(base.get_u64("size"), Some(2));
        let merged_child = base.get("child").unwrap();
        assert_eq!(merged_child.get_str("x"), Some("1"));
        assert_eq!(merged_child.get_str("y"), Some("2"));
    }

    #[test]
    fn text_roundtrip_preserves_structure() {
        let mut tree = KVTree::new();
        tree.set_str("id", "7");
        let mut containers = KVTree::new();
        let mut container0 = KVTree::new();
        container0.set_str("name", "/pfs/box.dat");
        container0.set_str("size", "100");
        containers.set("0", container0);
        tree.set("containers", containers);

        let mut buf = Vec::new();
        tree.write_text(&mut buf).unwrap();

        let decoded = KVTree::read_text(&mut &buf[..]).unwrap();
        assert_eq!(decoded.get_u64("id"), Some(7));
        let decoded_container = decoded.get("containers").unwrap().get("0").unwrap();
        assert_eq!(decoded_container.get_str("name"), Some("/pfs/box.dat"));
        assert_eq!(decoded_container.get_u64("size"), Some(100));
    }

    #[test]
    fn into_rank_map_splits_numeric_children() {
        let mut tree = KVTree::new();
        tree.set("0", KVTree::new());
        tree.set("3", KVTree::new());
        let map = tree.into_rank_map();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&0));
        assert!(map.contains_key(&3));
    }
}
