//! Tree nodes for the sequence engine.
//!
//! A Node is either a leaf sequence of entries or a meta sequence of
//! meta-tuples pointing at child chunks.
//!
//! ## Meta-tuple Semantics
//!
//! For ordered kinds (Map, Set), every meta-tuple carries the MAXIMUM key
//! reachable in its child subtree, plus the number of leaf entries below it:
//!
//! ```text
//! Meta(level 1)  [ (c, #a, 3)          (f, #b, 2)    (k, #c, 3) ]
//!                     |                    |              |
//! Leaves         [a b c]               [d f]         [g h k]
//! ```
//!
//! To find the child that may contain a search key, take the first tuple whose
//! key is >= the search key (`search`). A key past the last tuple lies beyond the
//! end of the sequence.
//!
//! Lists are positional: their meta-tuple keys are `Null` and lookups go by
//! `num_leaves`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::Hash;
use crate::value::Value;
use crate::value_store::ValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    Map,
    Set,
    List,
}

impl CollectionKind {
    /// Map and Set keep their keys sorted; List does not.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, CollectionKind::List)
    }
}

/// One leaf item. Set and List keep their element in `key` with a `Null` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Value,
    pub value: Value,
}

impl Entry {
    pub fn new(key: Value, value: Value) -> Self {
        Entry { key, value }
    }

    pub fn element(key: Value) -> Self {
        Entry {
            key,
            value: Value::Null,
        }
    }
}

/// `(maxKey, childRef, subtreeLeafCount)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTuple {
    pub key: Value,
    pub child: Hash,
    pub num_leaves: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        kind: CollectionKind,
        entries: Vec<Entry>,
    },
    Meta {
        kind: CollectionKind,
        level: u64,
        tuples: Vec<MetaTuple>,
    },
}

impl Node {
    /// The canonical empty collection.
    pub fn empty(kind: CollectionKind) -> Self {
        Node::Leaf {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        match self {
            Node::Leaf { kind, .. } | Node::Meta { kind, .. } => *kind,
        }
    }

    /// 0 for leaves.
    pub fn level(&self) -> u64 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Meta { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Meta { tuples, .. } => tuples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> &[Entry] {
        match self {
            Node::Leaf { entries, .. } => entries,
            Node::Meta { .. } => &[],
        }
    }

    pub fn tuples(&self) -> &[MetaTuple] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Meta { tuples, .. } => tuples,
        }
    }

    /// Ordering key of item `idx`.
    pub fn key_at(&self, idx: usize) -> &Value {
        match self {
            Node::Leaf { entries, .. } => &entries[idx].key,
            Node::Meta { tuples, .. } => &tuples[idx].key,
        }
    }

    pub fn last_key(&self) -> Option<&Value> {
        if self.is_empty() {
            None
        } else {
            Some(self.key_at(self.len() - 1))
        }
    }

    /// Index of the first item whose key is >= `key`, or `len()` if none.
    pub fn search(&self, key: &Value) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.partition_point(|e| &e.key < key),
            Node::Meta { tuples, .. } => tuples.partition_point(|t| &t.key < key),
        }
    }

    /// Number of leaf entries in this subtree.
    pub fn num_leaves(&self) -> u64 {
        match self {
            Node::Leaf { entries, .. } => entries.len() as u64,
            Node::Meta { tuples, .. } => tuples.iter().map(|t| t.num_leaves).sum(),
        }
    }

    /// Meta-tuple describing this node once stored under `hash`.
    pub fn to_meta_tuple(&self, hash: Hash) -> MetaTuple {
        let key = match self.kind() {
            CollectionKind::List => Value::Null,
            _ => self.last_key().cloned().unwrap_or(Value::Null),
        };
        MetaTuple {
            key,
            child: hash,
            num_leaves: self.num_leaves(),
        }
    }

    pub(crate) fn walk_refs(&self, f: &mut dyn FnMut(Hash)) {
        match self {
            Node::Leaf { entries, .. } => {
                for entry in entries {
                    entry.key.walk_refs(f);
                    entry.value.walk_refs(f);
                }
            }
            Node::Meta { tuples, .. } => tuples.iter().for_each(|t| f(t.child)),
        }
    }

    /// Local structural check: strictly increasing keys for ordered kinds.
    pub fn check_order(&self) -> Result<(), String> {
        if !self.kind().is_ordered() {
            return Ok(());
        }
        for i in 1..self.len() {
            if self.key_at(i - 1) >= self.key_at(i) {
                return Err(format!(
                    "keys not strictly increasing at position {}: {} then {}",
                    i,
                    self.key_at(i - 1),
                    self.key_at(i)
                ));
            }
        }
        Ok(())
    }

    /// Validate this node and, when a store is given, its entire subtree.
    ///
    /// Checks key order, that each meta-tuple key equals the maximum key of
    /// its child, that child levels descend by one and that leaf counts add up.
    pub fn validate(&self, store: Option<&ValueStore>, context: &str) -> Result<(), String> {
        let context_str = if context.is_empty() {
            String::new()
        } else {
            format!(" ({})", context)
        };

        self.check_order().map_err(|e| format!("{}{}", e, context_str))?;

        let (level, tuples) = match self {
            Node::Leaf { .. } => return Ok(()),
            Node::Meta { level, tuples, .. } => (*level, tuples),
        };
        if tuples.is_empty() {
            return Err(format!("Meta node with no children{}", context_str));
        }
        let store = match store {
            Some(store) => store,
            None => return Ok(()),
        };

        for (i, tuple) in tuples.iter().enumerate() {
            let child = store
                .read_node(&tuple.child)
                .map_err(|e| format!("Child {} unreadable: {}{}", i, e, context_str))?;
            if child.level() + 1 != level {
                return Err(format!(
                    "Child {} has level {} under level {}{}",
                    i,
                    child.level(),
                    level,
                    context_str
                ));
            }
            if child.kind() != self.kind() {
                return Err(format!("Child {} has a different kind{}", i, context_str));
            }
            if child.num_leaves() != tuple.num_leaves {
                return Err(format!(
                    "Child {} leaf count {} but tuple says {}{}",
                    i,
                    child.num_leaves(),
                    tuple.num_leaves,
                    context_str
                ));
            }
            if self.kind().is_ordered() && child.last_key() != Some(&tuple.key) {
                return Err(format!(
                    "Meta key invariant violated at index {}{}\n\
                     Expected max key: {:?}\n\
                     Actual tuple key: {:?}",
                    i,
                    context_str,
                    child.last_key(),
                    tuple.key
                ));
            }
            child.validate(Some(store), &format!("child {} of level {}", i, level))?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Leaf { kind, entries } => write!(f, "Leaf<{:?}>({} entries)", kind, entries.len()),
            Node::Meta {
                kind,
                level,
                tuples,
            } => write!(
                f,
                "Meta<{:?}>(level={}, children={})",
                kind,
                level,
                tuples.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryChunkStore;
    use std::sync::Arc;

    fn leaf(keys: &[i64]) -> Node {
        Node::Leaf {
            kind: CollectionKind::Map,
            entries: keys
                .iter()
                .map(|k| Entry::new(Value::Int(*k), Value::from(format!("v{}", k))))
                .collect(),
        }
    }

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(MemoryChunkStore::new()), &Config::default())
    }

    #[test]
    fn test_empty_node() {
        let node = Node::empty(CollectionKind::Set);
        assert!(node.is_leaf());
        assert!(node.is_empty());
        assert_eq!(node.level(), 0);
        assert_eq!(node.num_leaves(), 0);
        assert!(node.validate(None, "").is_ok());
    }

    #[test]
    fn test_search_positions() {
        let node = leaf(&[10, 20, 30]);
        assert_eq!(node.search(&Value::Int(5)), 0);
        assert_eq!(node.search(&Value::Int(10)), 0);
        assert_eq!(node.search(&Value::Int(15)), 1);
        assert_eq!(node.search(&Value::Int(30)), 2);
        assert_eq!(node.search(&Value::Int(31)), 3);
    }

    #[test]
    fn test_validate_leaf_ordering() {
        let node = leaf(&[2, 1]);
        let err = node.validate(None, "").unwrap_err();
        assert!(err.contains("not strictly increasing"));
    }

    #[test]
    fn test_validate_leaf_duplicates() {
        let node = leaf(&[1, 1]);
        assert!(node.validate(None, "").is_err());
    }

    #[test]
    fn test_list_leaf_allows_any_order() {
        let node = Node::Leaf {
            kind: CollectionKind::List,
            entries: vec![Entry::element(Value::Int(3)), Entry::element(Value::Int(3))],
        };
        assert!(node.validate(None, "").is_ok());
        assert_eq!(node.to_meta_tuple(Hash::ZERO).key, Value::Null);
    }

    #[test]
    fn test_validate_meta_invariant() {
        let store = store();
        let left = leaf(&[1, 2]);
        let right = leaf(&[5, 7]);
        let left_hash = store.write_node(&left).unwrap();
        let right_hash = store.write_node(&right).unwrap();

        let meta = Node::Meta {
            kind: CollectionKind::Map,
            level: 1,
            tuples: vec![left.to_meta_tuple(left_hash), right.to_meta_tuple(right_hash)],
        };
        assert!(meta.validate(Some(&store), "").is_ok());
        assert_eq!(meta.num_leaves(), 4);
        assert_eq!(meta.search(&Value::Int(3)), 1);
    }

    #[test]
    fn test_validate_meta_invariant_violation() {
        let store = store();
        let left = leaf(&[1, 2]);
        let left_hash = store.write_node(&left).unwrap();

        let mut tuple = left.to_meta_tuple(left_hash);
        tuple.key = Value::Int(99);
        let meta = Node::Meta {
            kind: CollectionKind::Map,
            level: 1,
            tuples: vec![tuple],
        };
        let err = meta.validate(Some(&store), "").unwrap_err();
        assert!(err.contains("Meta key invariant violated"));
    }

    #[test]
    fn test_validate_level_mismatch() {
        let store = store();
        let left = leaf(&[1]);
        let left_hash = store.write_node(&left).unwrap();
        let meta = Node::Meta {
            kind: CollectionKind::Map,
            level: 2,
            tuples: vec![left.to_meta_tuple(left_hash)],
        };
        assert!(meta.validate(Some(&store), "").is_err());
    }
}
