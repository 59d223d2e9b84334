//! Ref names and ref storage.
//!
//! Refs are named pointers to commits, kept in namespaces:
//!
//! - `refs/heads/<branch>` for branches
//! - `refs/internal/<name>` for bookkeeping refs such as `create`
//! - `refs/remotes/<remote>/<branch>` for remote-tracking branches
//! - `refs/tags/<tag>` for tags
//!
//! A [`RefStore`] maps full ref paths to commit hashes. Every update is a
//! compare-and-swap against the value the caller last observed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

use crate::error::{Error, Result, StoreError, StoreResult};
use crate::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefType {
    Branch,
    Internal,
    Remote,
    Tag,
}

impl RefType {
    pub const ALL: [RefType; 4] = [RefType::Branch, RefType::Internal, RefType::Remote, RefType::Tag];

    pub fn prefix(&self) -> &'static str {
        match self {
            RefType::Branch => "refs/heads/",
            RefType::Internal => "refs/internal/",
            RefType::Remote => "refs/remotes/",
            RefType::Tag => "refs/tags/",
        }
    }
}

/// A typed ref name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoltRef {
    ref_type: RefType,
    path: String,
}

impl DoltRef {
    /// Branch ref; fails with `InvalidBranchName` for names git would reject.
    pub fn branch(name: &str) -> Result<DoltRef> {
        if !is_valid_branch_name(name) {
            return Err(Error::InvalidBranchName(name.to_string()));
        }
        Ok(DoltRef {
            ref_type: RefType::Branch,
            path: name.to_string(),
        })
    }

    pub fn internal(name: &str) -> DoltRef {
        DoltRef {
            ref_type: RefType::Internal,
            path: name.to_string(),
        }
    }

    pub fn remote(remote: &str, branch: &str) -> DoltRef {
        DoltRef {
            ref_type: RefType::Remote,
            path: format!("{}/{}", remote, branch),
        }
    }

    pub fn tag(name: &str) -> DoltRef {
        DoltRef {
            ref_type: RefType::Tag,
            path: name.to_string(),
        }
    }

    /// Parse a full ref path such as `refs/heads/master`.
    pub fn parse(full: &str) -> Option<DoltRef> {
        RefType::ALL.iter().find_map(|ref_type| {
            full.strip_prefix(ref_type.prefix())
                .filter(|path| !path.is_empty())
                .map(|path| DoltRef {
                    ref_type: *ref_type,
                    path: path.to_string(),
                })
        })
    }

    pub fn ref_type(&self) -> RefType {
        self.ref_type
    }

    /// Name within the namespace, e.g. `master` for `refs/heads/master`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for DoltRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ref_type.prefix(), self.path)
    }
}

/// Branch name rules, following git's ref format checks.
pub fn is_valid_branch_name(name: &str) -> bool {
    const FORBIDDEN: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

    !(name.is_empty()
        || name == "HEAD"
        || name.contains("..")
        || name.contains("@{")
        || name.contains("//")
        || name.chars().any(|c| c.is_ascii_control() || FORBIDDEN.contains(&c))
        || name.starts_with('-')
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with('.')
        || name.ends_with(".lock"))
}

fn conflict(name: &str, expected: Option<Hash>, actual: Option<Hash>) -> StoreError {
    StoreError::RefConflict {
        ref_name: name.to_string(),
        expected: expected.map(|h| h.to_hex()),
        actual: actual.map(|h| h.to_hex()),
    }
}

/// Storage for refs and the symbolic HEAD.
pub trait RefStore: Send + Sync {
    fn get_ref(&self, name: &str) -> StoreResult<Option<Hash>>;

    /// Set `name` to `new` if it currently holds `expected` (`None`: absent).
    fn update_ref(&self, name: &str, expected: Option<Hash>, new: Hash) -> StoreResult<()>;

    /// Remove `name` if it currently holds `expected`.
    fn delete_ref(&self, name: &str, expected: Hash) -> StoreResult<()>;

    /// All refs by full path.
    fn list_refs(&self) -> StoreResult<BTreeMap<String, Hash>>;

    /// Full path of the ref HEAD points at.
    fn get_head(&self) -> StoreResult<Option<String>>;

    fn set_head(&self, name: &str) -> StoreResult<()>;
}

/// In-memory implementation of RefStore
#[derive(Clone, Default)]
pub struct MemoryRefStore {
    refs: Arc<Mutex<BTreeMap<String, Hash>>>,
    head: Arc<Mutex<Option<String>>>,
}

impl MemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefStore for MemoryRefStore {
    fn get_ref(&self, name: &str) -> StoreResult<Option<Hash>> {
        Ok(self.refs.lock()?.get(name).copied())
    }

    fn update_ref(&self, name: &str, expected: Option<Hash>, new: Hash) -> StoreResult<()> {
        let mut refs = self.refs.lock()?;
        let actual = refs.get(name).copied();
        if actual != expected {
            return Err(conflict(name, expected, actual));
        }
        refs.insert(name.to_string(), new);
        Ok(())
    }

    fn delete_ref(&self, name: &str, expected: Hash) -> StoreResult<()> {
        let mut refs = self.refs.lock()?;
        match refs.get(name).copied() {
            None => Err(StoreError::NotFound(name.to_string())),
            Some(actual) if actual != expected => Err(conflict(name, Some(expected), Some(actual))),
            Some(_) => {
                refs.remove(name);
                Ok(())
            }
        }
    }

    fn list_refs(&self) -> StoreResult<BTreeMap<String, Hash>> {
        Ok(self.refs.lock()?.clone())
    }

    fn get_head(&self) -> StoreResult<Option<String>> {
        Ok(self.head.lock()?.clone())
    }

    fn set_head(&self, name: &str) -> StoreResult<()> {
        *self.head.lock()? = Some(name.to_string());
        Ok(())
    }
}

const TMP_DIR: &str = "tmp";

/// Refs as files under a directory, git style: `<root>/refs/heads/master`
/// holds the hex hash, `<root>/HEAD` holds `ref: <full ref path>`.
///
/// Files are replaced by renaming a temporary file over them. The CAS check
/// holds a process-wide lock; it does not guard against other processes.
pub struct FsRefStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FsRefStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("refs"))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(FsRefStore {
            root,
            lock: Mutex::new(()),
        })
    }

    fn ref_path(&self, name: &str) -> StoreResult<PathBuf> {
        if !name.starts_with("refs/")
            || name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(StoreError::Other(format!("invalid ref path '{}'", name)));
        }
        Ok(self.root.join(name))
    }

    fn read(&self, name: &str) -> StoreResult<Option<Hash>> {
        match fs::read_to_string(self.ref_path(name)?) {
            Ok(content) => Ok(Some(Hash::from_hex(content.trim())?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Temporary files live in `<root>/tmp`, outside `refs/`, so listing
    /// never sees them.
    fn write_atomic(&self, path: &Path, content: &str) -> StoreResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = NamedTempFile::new_in(self.root.join(TMP_DIR))?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut BTreeMap<String, Hash>) -> StoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => format!("{}/{}", prefix, name),
                None => continue,
            };
            if path.is_dir() {
                self.collect(&path, &name, out)?;
            } else if let Some(hash) = self.read(&name)? {
                out.insert(name, hash);
            }
        }
        Ok(())
    }
}

impl RefStore for FsRefStore {
    fn get_ref(&self, name: &str) -> StoreResult<Option<Hash>> {
        self.read(name)
    }

    fn update_ref(&self, name: &str, expected: Option<Hash>, new: Hash) -> StoreResult<()> {
        let _guard = self.lock.lock()?;
        let actual = self.read(name)?;
        if actual != expected {
            return Err(conflict(name, expected, actual));
        }
        self.write_atomic(&self.ref_path(name)?, &format!("{}\n", new.to_hex()))
    }

    fn delete_ref(&self, name: &str, expected: Hash) -> StoreResult<()> {
        let _guard = self.lock.lock()?;
        match self.read(name)? {
            None => Err(StoreError::NotFound(name.to_string())),
            Some(actual) if actual != expected => Err(conflict(name, Some(expected), Some(actual))),
            Some(_) => {
                fs::remove_file(self.ref_path(name)?)?;
                Ok(())
            }
        }
    }

    fn list_refs(&self) -> StoreResult<BTreeMap<String, Hash>> {
        let mut out = BTreeMap::new();
        self.collect(&self.root.join("refs"), "refs", &mut out)?;
        Ok(out)
    }

    fn get_head(&self) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.root.join("HEAD")) {
            Ok(content) => Ok(content
                .trim()
                .strip_prefix("ref: ")
                .map(str::to_string)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_head(&self, name: &str) -> StoreResult<()> {
        self.ref_path(name)?;
        self.write_atomic(&self.root.join("HEAD"), &format!("ref: {}\n", name))
    }
}
