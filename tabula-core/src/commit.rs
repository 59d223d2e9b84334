//! Commits and commit specs.
//!
//! A commit is a standalone `Commit` struct value:
//!
//! ```text
//! Commit { parents: Ref(Set<Ref(commit)>), meta: CommitMeta{..}, value: Ref(root value) }
//! ```
//!
//! Parents live in a Set, so their order is the Set's (hash) order and a
//! parent can only appear once.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunk::Chunk;
use crate::collection::Set;
use crate::error::{Error, Result};
use crate::hash::{Hash, HASH_LEN};
use crate::refs::DoltRef;
use crate::value::{Struct, Value};
use crate::value_store::ValueStore;

pub const COMMIT_STRUCT: &str = "Commit";
pub const COMMIT_META_STRUCT: &str = "CommitMeta";

/// Who committed, when, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub name: String,
    pub email: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub description: String,
}

impl CommitMeta {
    /// Metadata stamped with the current time.
    pub fn new(name: &str, email: &str, description: &str) -> Result<CommitMeta> {
        Self::with_timestamp(name, email, description, now_millis())
    }

    pub fn with_timestamp(
        name: &str,
        email: &str,
        description: &str,
        timestamp: i64,
    ) -> Result<CommitMeta> {
        let name = name.trim();
        let email = email.trim();
        let description = description.trim();
        if name.is_empty() {
            return Err(Error::InvalidCommitMeta("name is empty".into()));
        }
        if email.is_empty() {
            return Err(Error::InvalidCommitMeta("email is empty".into()));
        }
        if description.is_empty() {
            return Err(Error::InvalidCommitMeta("description is empty".into()));
        }
        Ok(CommitMeta {
            name: name.to_string(),
            email: email.to_string(),
            timestamp,
            description: description.to_string(),
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Struct(
            Struct::new(COMMIT_META_STRUCT)
                .with("name", self.name.as_str())
                .with("email", self.email.as_str())
                .with("timestamp", self.timestamp)
                .with("description", self.description.as_str()),
        )
    }

    pub fn from_value(value: &Value) -> Option<CommitMeta> {
        let s = value.as_struct().filter(|s| s.name == COMMIT_META_STRUCT)?;
        let text = |field: &str| s.get(field).and_then(Value::as_str).map(str::to_string);
        Some(CommitMeta {
            name: text("name")?,
            email: text("email")?,
            timestamp: s.get("timestamp").and_then(Value::as_int)?,
            description: text("description")?,
        })
    }
}

/// True when `value` has the shape of a commit.
pub fn is_commit_value(value: &Value) -> bool {
    value.as_struct().is_some_and(|s| s.name == COMMIT_STRUCT)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub meta: CommitMeta,
    /// Root value this commit points at.
    pub root: Hash,
}

impl Commit {
    /// Write a commit value and return it with its address.
    pub fn write(
        store: &ValueStore,
        parents: &[Hash],
        meta: CommitMeta,
        root: Hash,
    ) -> Result<Commit> {
        let parent_set = Set::from_values(store, parents.iter().map(|h| Value::Ref(*h)))?;
        let value = Value::Struct(
            Struct::new(COMMIT_STRUCT)
                .with("parents", parent_set.hash())
                .with("meta", meta.to_value())
                .with("value", root),
        );
        let hash = store.write_value(&value)?;
        let mut parents = parents.to_vec();
        parents.sort();
        parents.dedup();
        Ok(Commit {
            hash,
            parents,
            meta,
            root,
        })
    }

    /// Read a commit, failing with `NotACommit` if the chunk holds anything
    /// else.
    pub fn load(store: &ValueStore, hash: Hash) -> Result<Commit> {
        let value = match store.read_chunk(&hash)? {
            Chunk::Value(value) => value,
            Chunk::Node(_) => return Err(Error::NotACommit(hash)),
        };
        let s = match value.as_struct() {
            Some(s) if is_commit_value(&value) => s,
            _ => return Err(Error::NotACommit(hash)),
        };

        let field_ref = |name: &str| {
            s.get(name)
                .and_then(Value::as_ref_hash)
                .ok_or_else(|| Error::corrupt(hash, format!("commit has no '{}' ref", name)))
        };
        let parents = Set::load(store, field_ref("parents")?)?
            .iter()?
            .map(|v| {
                v?.as_ref_hash()
                    .ok_or_else(|| Error::corrupt(hash, "commit parent is not a ref"))
            })
            .collect::<Result<Vec<_>>>()?;
        let meta = s
            .get("meta")
            .and_then(CommitMeta::from_value)
            .ok_or_else(|| Error::corrupt(hash, "commit has malformed metadata"))?;

        Ok(Commit {
            hash,
            parents,
            meta,
            root: field_ref("value")?,
        })
    }

    /// Parent at `index`, in the commit's parent order.
    pub fn parent(&self, index: usize) -> Option<Hash> {
        self.parents.get(index).copied()
    }
}

/// Path from a commit back to one of its ancestors: each instruction picks a
/// 0-based parent index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorSpec {
    pub instructions: Vec<usize>,
}

impl AncestorSpec {
    /// Parse a suffix such as `~2^2`. `~N` is N first-parent hops and `^N`
    /// picks parent N (1-based); a bare `~` or `^` means 1.
    pub fn parse(text: &str) -> Result<AncestorSpec> {
        let invalid = || Error::InvalidAncestorSpec(text.to_string());
        let mut instructions = Vec::new();
        let mut chars = text.chars().peekable();

        while let Some(op) = chars.next() {
            if op != '~' && op != '^' {
                return Err(invalid());
            }
            let mut digits = String::new();
            while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(c);
                chars.next();
            }
            let n = if digits.is_empty() {
                1
            } else {
                digits.parse::<usize>().map_err(|_| invalid())?
            };
            match op {
                '~' => instructions.extend(std::iter::repeat(0).take(n)),
                _ if n == 0 => return Err(invalid()),
                _ => instructions.push(n - 1),
            }
        }
        Ok(AncestorSpec { instructions })
    }
}

/// Where a commit spec starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitBase {
    /// Full or abbreviated hex address.
    Hash(String),
    /// Bare hex text: the branch of that name when one exists, otherwise a
    /// hash prefix.
    HashOrBranch(String),
    Ref(DoltRef),
    /// Whatever the working ref points at.
    Head,
}

/// `<base>[~N|^N]*`, e.g. `HEAD~2`, `feature^2`, `#3f9a0c12`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSpec {
    pub base: CommitBase,
    pub ancestors: AncestorSpec,
}

impl CommitSpec {
    pub fn head() -> CommitSpec {
        CommitSpec {
            base: CommitBase::Head,
            ancestors: AncestorSpec::default(),
        }
    }

    pub fn for_ref(dref: DoltRef) -> CommitSpec {
        CommitSpec {
            base: CommitBase::Ref(dref),
            ancestors: AncestorSpec::default(),
        }
    }

    pub fn for_hash(hash: Hash) -> CommitSpec {
        CommitSpec {
            base: CommitBase::Hash(hash.to_hex()),
            ancestors: AncestorSpec::default(),
        }
    }

    /// Parse a spec. The base is read as:
    ///
    /// - `HEAD` (exact case): the working ref
    /// - `#<hex>`: a hash or hash prefix
    /// - 8 to 40 hex digits: a branch of that name, else a hash or hash prefix
    /// - `refs/...`: a full ref path
    /// - anything else: a branch name
    pub fn parse(text: &str) -> Result<CommitSpec> {
        let text = text.trim();
        let split = text.find(['~', '^']).unwrap_or(text.len());
        let (base, suffix) = text.split_at(split);
        let invalid = || Error::InvalidCommitSpec(text.to_string());

        let base = if base.is_empty() {
            return Err(invalid());
        } else if base == "HEAD" {
            CommitBase::Head
        } else if let Some(hex) = base.strip_prefix('#') {
            if hex.is_empty() || !is_hex(hex) {
                return Err(invalid());
            }
            CommitBase::Hash(hex.to_ascii_lowercase())
        } else if (8..=HASH_LEN * 2).contains(&base.len()) && is_hex(base) {
            CommitBase::HashOrBranch(base.to_string())
        } else if base.starts_with("refs/") {
            CommitBase::Ref(DoltRef::parse(base).ok_or_else(invalid)?)
        } else {
            CommitBase::Ref(DoltRef::branch(base)?)
        };

        Ok(CommitSpec {
            base,
            ancestors: AncestorSpec::parse(suffix)?,
        })
    }
}

fn is_hex(s: &str) -> bool {
    s.len() <= HASH_LEN * 2 && s.chars().all(|c| c.is_ascii_hexdigit())
}

impl FromStr for CommitSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CommitSpec::parse(s)
    }
}

impl fmt::Display for CommitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            CommitBase::Hash(hex) => write!(f, "#{}", hex)?,
            CommitBase::HashOrBranch(text) => write!(f, "{}", text)?,
            CommitBase::Ref(dref) => write!(f, "{}", dref)?,
            CommitBase::Head => write!(f, "HEAD")?,
        }
        for idx in &self.ancestors.instructions {
            write!(f, "^{}", idx + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryChunkStore;
    use std::sync::Arc;

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(MemoryChunkStore::new()), &Config::default())
    }

    fn meta(description: &str, timestamp: i64) -> CommitMeta {
        CommitMeta::with_timestamp("Ada", "ada@example.com", description, timestamp).unwrap()
    }

    #[test]
    fn test_meta_validation() {
        let m = CommitMeta::new("  Ada ", " ada@example.com", " init ").unwrap();
        assert_eq!(m.name, "Ada");
        assert_eq!(m.description, "init");
        assert!(m.timestamp > 0);
        for (name, email, desc) in [(" ", "e", "d"), ("n", "", "d"), ("n", "e", "\t")] {
            assert!(matches!(
                CommitMeta::new(name, email, desc),
                Err(Error::InvalidCommitMeta(_))
            ));
        }
        assert_eq!(CommitMeta::from_value(&m.to_value()), Some(m));
    }

    #[test]
    fn test_write_and_load() {
        let store = store();
        let root = store.write_value(&Value::from("root")).unwrap();
        let first = Commit::write(&store, &[], meta("first", 1), root).unwrap();
        let second = Commit::write(&store, &[first.hash], meta("second", 2), root).unwrap();
        assert_ne!(first.hash, second.hash);

        let loaded = Commit::load(&store, second.hash).unwrap();
        assert_eq!(loaded, second);
        assert_eq!(loaded.parent(0), Some(first.hash));
        assert_eq!(loaded.parent(1), None);

        assert!(matches!(Commit::load(&store, root), Err(Error::NotACommit(_))));
    }

    #[test]
    fn test_merge_parents_are_sorted() {
        let store = store();
        let root = store.write_value(&Value::from("root")).unwrap();
        let a = Commit::write(&store, &[], meta("a", 1), root).unwrap();
        let b = Commit::write(&store, &[], meta("b", 2), root).unwrap();
        let merge = Commit::write(&store, &[b.hash, a.hash], meta("merge", 3), root).unwrap();

        let mut expected = vec![a.hash, b.hash];
        expected.sort();
        assert_eq!(merge.parents, expected);
        assert_eq!(Commit::load(&store, merge.hash).unwrap().parents, expected);
    }

    #[test]
    fn test_ancestor_spec() {
        assert_eq!(AncestorSpec::parse("").unwrap().instructions, Vec::<usize>::new());
        assert_eq!(AncestorSpec::parse("~").unwrap().instructions, vec![0]);
        assert_eq!(AncestorSpec::parse("~3").unwrap().instructions, vec![0, 0, 0]);
        assert_eq!(AncestorSpec::parse("^2~1^").unwrap().instructions, vec![1, 0, 0]);
        assert!(AncestorSpec::parse("^0").is_err());
        assert!(AncestorSpec::parse("~x").is_err());
    }

    #[test]
    fn test_commit_spec_parse() {
        let spec = CommitSpec::parse("HEAD~2").unwrap();
        assert_eq!(spec.base, CommitBase::Head);
        assert_eq!(spec.ancestors.instructions, vec![0, 0]);

        let spec = CommitSpec::parse("feature/x^2").unwrap();
        assert_eq!(spec.base, CommitBase::Ref(DoltRef::branch("feature/x").unwrap()));
        assert_eq!(spec.ancestors.instructions, vec![1]);

        assert_eq!(
            CommitSpec::parse("#ABC").unwrap().base,
            CommitBase::Hash("abc".into())
        );
        assert_eq!(
            CommitSpec::parse("DeadBeef01").unwrap().base,
            CommitBase::HashOrBranch("DeadBeef01".into())
        );
        assert_eq!(CommitSpec::parse("DeadBeef01~1").unwrap().to_string(), "DeadBeef01^1");

        // only the exact spelling means the working ref
        assert_eq!(
            CommitSpec::parse("head").unwrap().base,
            CommitBase::Ref(DoltRef::branch("head").unwrap())
        );
        assert_eq!(CommitSpec::parse("Head~1").unwrap().ancestors.instructions, vec![0]);
        assert_eq!(
            CommitSpec::parse("refs/tags/v1").unwrap().base,
            CommitBase::Ref(DoltRef::tag("v1"))
        );
        // short hex is a branch name
        assert!(matches!(CommitSpec::parse("beef").unwrap().base, CommitBase::Ref(_)));

        assert!(matches!(CommitSpec::parse("~1"), Err(Error::InvalidCommitSpec(_))));
        assert!(matches!(CommitSpec::parse("#xyz"), Err(Error::InvalidCommitSpec(_))));
        assert!(matches!(CommitSpec::parse("a..b"), Err(Error::InvalidBranchName(_))));
        assert_eq!(CommitSpec::parse("HEAD~2").unwrap().to_string(), "HEAD^1^1");
    }
}
