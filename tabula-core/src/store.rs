//! Content-addressed chunk storage.
//!
//! Provides a ChunkStore trait and two implementations:
//! - MemoryChunkStore: In-memory storage using a HashMap
//! - FileSystemChunkStore: Persistent storage using the filesystem
//!
//! and a ChunkStoreCache mapping repository ids to opened store handles.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};
use crate::hash::Hash;

/// Content-addressed blob storage.
///
/// `put` is idempotent: writing bytes that are already present is a no-op and
/// returns the same address.
pub trait ChunkStore: Send + Sync {
    /// Store bytes under their content hash.
    fn put(&self, data: &[u8]) -> StoreResult<Hash>;

    /// Retrieve bytes by hash. Returns None if not found.
    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>>;

    fn has(&self, hash: &Hash) -> StoreResult<bool>;

    /// Subset of `hashes` present in the store.
    fn has_many(&self, hashes: &[Hash]) -> StoreResult<HashSet<Hash>> {
        let mut present = HashSet::new();
        for hash in hashes {
            if self.has(hash)? {
                present.insert(*hash);
            }
        }
        Ok(present)
    }

    /// Every chunk address in the store.
    fn list(&self) -> StoreResult<Vec<Hash>>;

    fn count(&self) -> StoreResult<usize> {
        Ok(self.list()?.len())
    }
}

/// In-memory chunk storage using a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    chunks: Arc<Mutex<HashMap<Hash, Arc<[u8]>>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, data: &[u8]) -> StoreResult<Hash> {
        let hash = Hash::of(data);
        let mut chunks = self.chunks.lock()?;
        chunks.entry(hash).or_insert_with(|| Arc::from(data));
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.get(hash).map(|c| c.to_vec()))
    }

    fn has(&self, hash: &Hash) -> StoreResult<bool> {
        Ok(self.chunks.lock()?.contains_key(hash))
    }

    fn has_many(&self, hashes: &[Hash]) -> StoreResult<HashSet<Hash>> {
        let chunks = self.chunks.lock()?;
        Ok(hashes
            .iter()
            .filter(|h| chunks.contains_key(*h))
            .copied()
            .collect())
    }

    fn list(&self) -> StoreResult<Vec<Hash>> {
        Ok(self.chunks.lock()?.keys().copied().collect())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.chunks.lock()?.len())
    }
}

/// File system-based chunk storage.
///
/// Chunks live at `<base>/<first 2 hex chars>/<full hex>`. Writes go to a
/// temporary file that is renamed into place, so a reader never observes a
/// partially written chunk.
#[derive(Debug)]
pub struct FileSystemChunkStore {
    base_path: PathBuf,
}

impl FileSystemChunkStore {
    /// Initialize filesystem storage rooted at `base_path`.
    pub fn new(base_path: impl AsRef<Path>) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(FileSystemChunkStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn chunk_path(&self, hash: &Hash) -> PathBuf {
        let hash_str = hash.to_hex();
        self.base_path.join(&hash_str[..2]).join(hash_str)
    }
}

impl ChunkStore for FileSystemChunkStore {
    fn put(&self, data: &[u8]) -> StoreResult<Hash> {
        let hash = Hash::of(data);
        let path = self.chunk_path(&hash);
        if path.exists() {
            return Ok(hash);
        }
        let dir = path.parent().unwrap_or(&self.base_path);
        fs::create_dir_all(dir)?;
        // one temporary file per writer; a concurrent writer of the same
        // chunk may win the rename
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        if let Err(e) = tmp.persist(&path) {
            if !path.is_file() {
                return Err(e.error.into());
            }
        }
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.chunk_path(hash)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, hash: &Hash) -> StoreResult<bool> {
        Ok(self.chunk_path(hash).is_file())
    }

    fn list(&self) -> StoreResult<Vec<Hash>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let subdir_path = entry?.path();
            if !subdir_path.is_dir() {
                continue;
            }
            for subentry in fs::read_dir(&subdir_path)? {
                let file_path = subentry?.path();
                let name = match file_path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name,
                    None => continue,
                };
                // skips leftover temporary files
                if let Ok(hash) = Hash::from_hex(name) {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }
}

/// Create a chunk store from a specification string.
///
/// * `:memory:` - in-memory storage
/// * `file:///path/to/dir` - filesystem storage
pub fn create_store_from_spec(spec: &str) -> StoreResult<Arc<dyn ChunkStore>> {
    if spec == ":memory:" {
        Ok(Arc::new(MemoryChunkStore::new()))
    } else if let Some(path) = spec.strip_prefix("file://") {
        Ok(Arc::new(FileSystemChunkStore::new(path)?))
    } else {
        Err(StoreError::Other(format!("Invalid store spec: {}", spec)))
    }
}

/// Opened chunk stores keyed by repository id (`org/repo`).
///
/// Handles are created lazily on first access under `<root>/<id>` and kept
/// until the cache is dropped.
pub struct ChunkStoreCache {
    root: PathBuf,
    stores: Mutex<HashMap<String, Arc<dyn ChunkStore>>>,
}

impl ChunkStoreCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        ChunkStoreCache {
            root: root.as_ref().to_path_buf(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Store for `org/repo`, opening it on first use.
    pub fn get(&self, org: &str, repo: &str) -> StoreResult<Arc<dyn ChunkStore>> {
        for part in [org, repo] {
            if part.is_empty() || part.contains(['/', '\\']) || part == "." || part == ".." {
                return Err(StoreError::Other(format!(
                    "invalid repository id component '{}'",
                    part
                )));
            }
        }
        let id = format!("{}/{}", org, repo);
        let mut stores = self.stores.lock()?;
        if let Some(store) = stores.get(&id) {
            return Ok(Arc::clone(store));
        }
        log::debug!("opening chunk store for {}", id);
        let store: Arc<dyn ChunkStore> =
            Arc::new(FileSystemChunkStore::new(self.root.join(org).join(repo))?);
        stores.insert(id, Arc::clone(&store));
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryChunkStore::new();
        let hash = store.put(b"chunk one").unwrap();
        assert_eq!(hash, Hash::of(b"chunk one"));
        assert_eq!(store.get(&hash).unwrap().unwrap(), b"chunk one".to_vec());
        assert!(store.has(&hash).unwrap());

        // idempotent
        assert_eq!(store.put(b"chunk one").unwrap(), hash);
        assert_eq!(store.count().unwrap(), 1);

        assert!(store.get(&Hash::of(b"missing")).unwrap().is_none());
    }

    #[test]
    fn test_has_many() {
        let store = MemoryChunkStore::new();
        let a = store.put(b"a").unwrap();
        let missing = Hash::of(b"b");
        let present = store.has_many(&[a, missing]).unwrap();
        assert!(present.contains(&a));
        assert!(!present.contains(&missing));
    }

    #[test]
    fn test_filesystem_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemChunkStore::new(temp_dir.path()).unwrap();

        let hash = store.put(b"value1").unwrap();
        assert_eq!(store.get(&hash).unwrap().unwrap(), b"value1".to_vec());
        assert!(store.has(&hash).unwrap());
        assert_eq!(store.list().unwrap(), vec![hash]);

        // default has_many goes through has
        let present = store.has_many(&[hash, Hash::of(b"nope")]).unwrap();
        assert_eq!(present.len(), 1);

        // survives reopening
        let reopened = FileSystemChunkStore::new(temp_dir.path()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_create_store_from_spec() {
        let store = create_store_from_spec(":memory:").unwrap();
        store.put(b"x").unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(create_store_from_spec("s3://bucket").is_err());
    }

    #[test]
    fn test_store_cache_reuses_handles() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ChunkStoreCache::new(temp_dir.path());
        assert!(cache.is_empty());

        let first = cache.get("acme", "inventory").unwrap();
        let hash = first.put(b"shared").unwrap();
        let second = cache.get("acme", "inventory").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.has(&hash).unwrap());

        cache.get("acme", "other").unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("acme", "../escape").is_err());
    }

    #[test]
    fn test_concurrent_puts_of_same_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemChunkStore::new(temp_dir.path()).unwrap();

        for round in 0..20u8 {
            let data = vec![round; 256 * 1024];
            let expected = Hash::of(&data);
            std::thread::scope(|s| {
                let handles: Vec<_> = (0..8).map(|_| s.spawn(|| store.put(&data))).collect();
                for handle in handles {
                    assert_eq!(handle.join().unwrap().unwrap(), expected);
                }
            });
            assert_eq!(store.get(&expected).unwrap().unwrap(), data);
        }
        // temporary files are gone and never listed
        assert_eq!(store.count().unwrap(), 20);
        for entry in std::fs::read_dir(temp_dir.path()).unwrap() {
            for file in std::fs::read_dir(entry.unwrap().path()).unwrap() {
                let name = file.unwrap().file_name();
                assert!(Hash::from_hex(name.to_str().unwrap()).is_ok(), "{:?}", name);
            }
        }
    }
}
