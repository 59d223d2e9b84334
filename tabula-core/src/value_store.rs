//! Typed access to a chunk store.
//!
//! ValueStore encodes nodes and values into chunks, decodes them back, keeps
//! recently used nodes in an LRU cache and carries the engine configuration.
//! It is cheap to clone; clones share the cache.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::chunk::{Chunk, ChunkRef};
use crate::config::{ChunkConfig, Config, EditConfig};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::Node;
use crate::store::ChunkStore;
use crate::value::Value;

#[derive(Clone)]
pub struct ValueStore {
    chunks: Arc<dyn ChunkStore>,
    cache: Arc<Mutex<NodeCache>>,
    chunking: ChunkConfig,
    edits: EditConfig,
}

impl ValueStore {
    pub fn new(chunks: Arc<dyn ChunkStore>, config: &Config) -> Self {
        let cache_size = NonZeroUsize::new(config.store.cache_size).unwrap_or(NonZeroUsize::MIN);
        ValueStore {
            chunks,
            cache: Arc::new(Mutex::new(NodeCache::new(cache_size))),
            chunking: config.chunking.clone(),
            edits: config.edits.clone(),
        }
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    pub fn chunking(&self) -> &ChunkConfig {
        &self.chunking
    }

    pub fn edits(&self) -> &EditConfig {
        &self.edits
    }

    /// Store a node and return its address.
    pub fn write_node(&self, node: &Node) -> Result<Hash> {
        Ok(self.write_node_tracked(node)?.0)
    }

    /// Store a node; the flag is false when the chunk already existed.
    pub fn write_node_tracked(&self, node: &Node) -> Result<(Hash, bool)> {
        let bytes = ChunkRef::Node(node).encode()?;
        let hash = Hash::of(&bytes);
        let existed = self.chunks.has(&hash)?;
        if !existed {
            self.chunks.put(&bytes)?;
        }
        self.cache_put(hash, Arc::new(node.clone()));
        Ok((hash, !existed))
    }

    /// Retrieve a node, failing with `HashNotFound` if it is absent.
    pub fn read_node(&self, hash: &Hash) -> Result<Arc<Node>> {
        if let Some(node) = self.cache_get(hash) {
            return Ok(node);
        }
        match self.read_chunk(hash)? {
            Chunk::Node(node) => {
                let node = Arc::new(node);
                self.cache_put(*hash, Arc::clone(&node));
                Ok(node)
            }
            Chunk::Value(_) => Err(Error::corrupt(*hash, "expected a tree node, found a value")),
        }
    }

    pub fn write_value(&self, value: &Value) -> Result<Hash> {
        let bytes = ChunkRef::Value(value).encode()?;
        Ok(self.chunks.put(&bytes)?)
    }

    /// Retrieve a standalone value, failing with `HashNotFound` if it is absent.
    pub fn read_value(&self, hash: &Hash) -> Result<Value> {
        match self.read_chunk(hash)? {
            Chunk::Value(value) => Ok(value),
            Chunk::Node(_) => Err(Error::corrupt(*hash, "expected a value, found a tree node")),
        }
    }

    pub fn read_chunk(&self, hash: &Hash) -> Result<Chunk> {
        let bytes = self
            .chunks
            .get(hash)?
            .ok_or(Error::HashNotFound(*hash))?;
        Chunk::decode(hash, &bytes)
    }

    pub fn has(&self, hash: &Hash) -> Result<bool> {
        Ok(self.chunks.has(hash)?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        match self.cache.lock() {
            Ok(cache) => cache.stats(),
            Err(_) => CacheStats::default(),
        }
    }

    fn cache_get(&self, hash: &Hash) -> Option<Arc<Node>> {
        let mut cache = self.cache.lock().ok()?;
        let hit = cache.get(hash);
        if hit.is_none() {
            cache.cache_misses += 1;
        }
        hit
    }

    // A poisoned cache only costs hit rate.
    fn cache_put(&self, hash: Hash, node: Arc<Node>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(hash, node);
        }
    }
}

/// Decoded nodes by chunk address, with hit and eviction counters.
struct NodeCache {
    nodes: LruCache<Hash, Arc<Node>>,
    cache_hits: usize,
    cache_misses: usize,
    cache_evictions: usize,
}

impl NodeCache {
    fn new(max_size: NonZeroUsize) -> Self {
        NodeCache {
            nodes: LruCache::new(max_size),
            cache_hits: 0,
            cache_misses: 0,
            cache_evictions: 0,
        }
    }

    fn get(&mut self, key: &Hash) -> Option<Arc<Node>> {
        let node = Arc::clone(self.nodes.get(key)?);
        self.cache_hits += 1;
        Some(node)
    }

    fn put(&mut self, key: Hash, value: Arc<Node>) {
        // push hands back the evicted entry, or the old value for this key
        if let Some((evicted, _)) = self.nodes.push(key, value) {
            if evicted != key {
                self.cache_evictions += 1;
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let total_requests = self.cache_hits + self.cache_misses;
        let hit_rate = if total_requests > 0 {
            (self.cache_hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            cache_size: self.nodes.len(),
            max_cache_size: self.nodes.cap().get(),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            cache_evictions: self.cache_evictions,
            hit_rate,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_evictions: usize,
    pub hit_rate: f64,
}
