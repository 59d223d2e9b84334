//! Chunk encoding.
//!
//! A chunk is either one tree node or one standalone value (commit, root
//! value, table, schema). Both share a single bincode envelope so a chunk can
//! be decoded and walked without knowing in advance what it holds.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::Node;
use crate::value::Value;

/// Borrowed form used for encoding; variant order must match [`Chunk`].
#[derive(Serialize)]
pub(crate) enum ChunkRef<'a> {
    Node(&'a Node),
    Value(&'a Value),
}

impl ChunkRef<'_> {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// A decoded chunk.
#[derive(Debug, Clone, Deserialize)]
pub enum Chunk {
    Node(Node),
    Value(Value),
}

impl Chunk {
    /// Decode the bytes stored under `hash`.
    pub fn decode(hash: &Hash, bytes: &[u8]) -> Result<Chunk> {
        let chunk: Chunk =
            bincode::deserialize(bytes).map_err(|e| Error::corrupt(*hash, e.to_string()))?;
        if let Chunk::Node(node) = &chunk {
            node.check_order()
                .map_err(|reason| Error::corrupt(*hash, reason))?;
        }
        Ok(chunk)
    }

    /// Addresses of every chunk this chunk refers to.
    pub fn refs(&self) -> Vec<Hash> {
        let mut out = Vec::new();
        match self {
            Chunk::Node(node) => node.walk_refs(&mut |h| out.push(h)),
            Chunk::Value(value) => value.walk_refs(&mut |h| out.push(h)),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CollectionKind, Entry, MetaTuple};

    #[test]
    fn test_node_chunk_refs() {
        let child = Hash::of(b"child");
        let node = Node::Meta {
            kind: CollectionKind::Map,
            level: 1,
            tuples: vec![MetaTuple {
                key: Value::Int(9),
                child,
                num_leaves: 3,
            }],
        };
        let bytes = ChunkRef::Node(&node).encode().unwrap();
        let hash = Hash::of(&bytes);
        let chunk = Chunk::decode(&hash, &bytes).unwrap();
        assert_eq!(chunk.refs(), vec![child]);
    }

    #[test]
    fn test_leaf_values_contribute_refs() {
        let target = Hash::of(b"table");
        let node = Node::Leaf {
            kind: CollectionKind::Map,
            entries: vec![Entry {
                key: Value::from("people"),
                value: Value::Ref(target),
            }],
        };
        let bytes = ChunkRef::Node(&node).encode().unwrap();
        let chunk = Chunk::decode(&Hash::of(&bytes), &bytes).unwrap();
        assert_eq!(chunk.refs(), vec![target]);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let hash = Hash::of(b"junk");
        match Chunk::decode(&hash, &[9, 9, 9, 9, 9]) {
            Err(Error::CorruptChunk { hash: h, .. }) => assert_eq!(h, hash),
            other => panic!("expected corrupt chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_unordered_leaf_is_corrupt() {
        let node = Node::Leaf {
            kind: CollectionKind::Set,
            entries: vec![
                Entry { key: Value::Int(2), value: Value::Null },
                Entry { key: Value::Int(1), value: Value::Null },
            ],
        };
        let bytes = ChunkRef::Node(&node).encode().unwrap();
        assert!(Chunk::decode(&Hash::of(&bytes), &bytes).is_err());
    }
}
