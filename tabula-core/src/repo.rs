//! Repository: the commit graph over a chunk store and a ref store.
//!
//! Provides git-like operations on root values: commit (with merge
//! parents), resolve commit specs, fast-forward, branches and history, plus
//! chunk transfer between repositories.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::chunk::Chunk;
use crate::commit::{is_commit_value, Commit, CommitBase, CommitMeta, CommitSpec};
use crate::config::Config;
use crate::error::{Error, Result, StoreError};
use crate::hash::{Hash, HASH_LEN};
use crate::history;
use crate::pull::{self, PullMode, PullProgress, PullStats};
use crate::refs::{DoltRef, FsRefStore, MemoryRefStore, RefStore, RefType};
use crate::root_value::RootValue;
use crate::store::{ChunkStore, FileSystemChunkStore, MemoryChunkStore};
use crate::value_store::ValueStore;

/// Internal ref holding the repository's first commit.
pub const CREATION_REF: &str = "create";
pub const INIT_COMMIT_MESSAGE: &str = "Data repository created.";

/// Outcome of [`Repo::fast_forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastForward {
    Applied,
    UpToDate,
    /// The ref's head is not an ancestor of the target.
    Rejected,
}

pub struct Repo {
    vs: ValueStore,
    refs: Arc<dyn RefStore>,
    config: Config,
}

impl Repo {
    pub fn new(chunks: Arc<dyn ChunkStore>, refs: Arc<dyn RefStore>, config: Config) -> Self {
        Repo {
            vs: ValueStore::new(chunks, &config),
            refs,
            config,
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MemoryRefStore::new()),
            config,
        )
    }

    /// Open (or create) a repository on disk: chunks under `<dir>/chunks`,
    /// refs under `<dir>/refs`.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let dir = dir.as_ref();
        let chunks = FileSystemChunkStore::new(dir.join("chunks"))?;
        let refs = FsRefStore::new(dir)?;
        Ok(Self::new(Arc::new(chunks), Arc::new(refs), config))
    }

    pub fn value_store(&self) -> &ValueStore {
        &self.vs
    }

    pub fn ref_store(&self) -> &Arc<dyn RefStore> {
        &self.refs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn default_branch(&self) -> Result<DoltRef> {
        DoltRef::branch(&self.config.store.default_branch)
    }

    /// Create the initial commit on the default branch and check it out.
    ///
    /// The commit holds an empty root value and is also recorded on the
    /// internal `create` ref.
    pub fn init(&self, name: &str, email: &str) -> Result<Commit> {
        let branch = self.default_branch()?;
        let creation = DoltRef::internal(CREATION_REF);
        for dref in [&creation, &branch] {
            if self.has_ref(dref)? {
                return Err(Error::RefAlreadyExists(dref.to_string()));
            }
        }

        let meta = CommitMeta::new(name, email, INIT_COMMIT_MESSAGE)?;
        let root = RootValue::empty(&self.vs)?.write()?;
        let commit = Commit::write(&self.vs, &[], meta, root)?;

        self.refs.update_ref(&creation.to_string(), None, commit.hash)?;
        self.refs.update_ref(&branch.to_string(), None, commit.hash)?;
        self.refs.set_head(&branch.to_string())?;
        log::info!("created repository at {} on {}", commit.hash.short(), branch);
        Ok(commit)
    }

    pub fn write_root_value(&self, root: &RootValue) -> Result<Hash> {
        root.write()
    }

    pub fn read_root_value(&self, hash: Hash) -> Result<RootValue> {
        RootValue::load(&self.vs, hash)
    }

    pub fn read_commit(&self, hash: Hash) -> Result<Commit> {
        Commit::load(&self.vs, hash)
    }

    /// Current head of a ref, if it has one.
    pub fn ref_head(&self, dref: &DoltRef) -> Result<Option<Hash>> {
        Ok(self.refs.get_ref(&dref.to_string())?)
    }

    pub fn has_ref(&self, dref: &DoltRef) -> Result<bool> {
        Ok(self.ref_head(dref)?.is_some())
    }

    /// Locate the commit a spec names, then walk its ancestor instructions.
    pub fn resolve(&self, spec: &CommitSpec) -> Result<Commit> {
        let mut commit = match &spec.base {
            CommitBase::Head => self.ref_commit(&self.head_ref()?)?,
            CommitBase::Ref(dref) => self.ref_commit(dref)?,
            CommitBase::Hash(hex) => self.read_commit(self.resolve_hash(hex)?)?,
            CommitBase::HashOrBranch(text) => match self.ref_head(&DoltRef::branch(text)?)? {
                Some(hash) => self.read_commit(hash)?,
                None => self.read_commit(self.resolve_hash(&text.to_ascii_lowercase())?)?,
            },
        };
        for &idx in &spec.ancestors.instructions {
            let parent = commit
                .parent(idx)
                .ok_or_else(|| Error::InvalidAncestorSpec(spec.to_string()))?;
            commit = self.read_commit(parent)?;
        }
        Ok(commit)
    }

    /// Parse and resolve a spec string such as `HEAD~1`.
    pub fn resolve_str(&self, spec: &str) -> Result<Commit> {
        self.resolve(&CommitSpec::parse(spec)?)
    }

    fn ref_commit(&self, dref: &DoltRef) -> Result<Commit> {
        let hash = self
            .ref_head(dref)?
            .ok_or_else(|| Error::RefNotFound(dref.to_string()))?;
        self.read_commit(hash)
    }

    /// Full hash for a hex string; a prefix must match exactly one commit.
    fn resolve_hash(&self, hex: &str) -> Result<Hash> {
        if hex.len() == HASH_LEN * 2 {
            return Ok(Hash::from_hex(hex)?);
        }
        let mut matches = Vec::new();
        for hash in self.vs.chunk_store().list()? {
            if hash.to_hex().starts_with(hex) && self.is_commit(&hash)? {
                matches.push(hash);
            }
        }
        match matches.as_slice() {
            [hash] => Ok(*hash),
            [] => Err(Error::Store(StoreError::NotFound(format!("commit {}", hex)))),
            _ => Err(Error::InvalidCommitSpec(format!(
                "ambiguous hash prefix {} ({} commits)",
                hex,
                matches.len()
            ))),
        }
    }

    fn is_commit(&self, hash: &Hash) -> Result<bool> {
        Ok(matches!(self.vs.read_chunk(hash)?, Chunk::Value(v) if is_commit_value(&v)))
    }

    /// Commit a root value on top of `dref`'s current head.
    pub fn commit(&self, root: Hash, dref: &DoltRef, meta: CommitMeta) -> Result<Commit> {
        self.commit_with_parents(root, dref, &[], meta)
    }

    /// Commit a root value with the ref's head plus `merge_parents` as
    /// parents, then move the ref.
    ///
    /// The ref moves with compare-and-swap against the head observed before
    /// writing; a concurrent move fails with `RefConflict`.
    pub fn commit_with_parents(
        &self,
        root: Hash,
        dref: &DoltRef,
        merge_parents: &[CommitSpec],
        meta: CommitMeta,
    ) -> Result<Commit> {
        match self.vs.read_chunk(&root)? {
            Chunk::Value(value) if RootValue::is_root_value(&value) => {}
            _ => return Err(Error::NotARootValue(root)),
        }

        let head = self.ref_head(dref)?;
        let mut parents: Vec<Hash> = head.into_iter().collect();
        for spec in merge_parents {
            parents.push(self.resolve(spec)?.hash);
        }

        let commit = Commit::write(&self.vs, &parents, meta, root)?;
        self.refs.update_ref(&dref.to_string(), head, commit.hash)?;
        log::info!(
            "committed {} on {} ({} parents)",
            commit.hash.short(),
            dref,
            commit.parents.len()
        );
        Ok(commit)
    }

    /// Point `dref` at `commit` regardless of history.
    pub fn set_ref(&self, dref: &DoltRef, commit: Hash) -> Result<()> {
        self.read_commit(commit)?;
        let name = dref.to_string();
        let current = self.refs.get_ref(&name)?;
        self.refs.update_ref(&name, current, commit)?;
        log::info!("moved {} to {}", dref, commit.short());
        Ok(())
    }

    /// Move `dref` to `commit` when that keeps history linear.
    pub fn fast_forward(&self, dref: &DoltRef, commit: Hash) -> Result<FastForward> {
        let head = self.ref_head(dref)?;
        if head == Some(commit) {
            return Ok(FastForward::UpToDate);
        }
        if let Some(head) = head {
            if !self.is_ancestor(head, commit)? {
                return Ok(FastForward::Rejected);
            }
        }
        self.refs.update_ref(&dref.to_string(), head, commit)?;
        log::info!("fast-forwarded {} to {}", dref, commit.short());
        Ok(FastForward::Applied)
    }

    /// True if `dref` has no head or its head is an ancestor of `commit`.
    pub fn can_fast_forward(&self, dref: &DoltRef, commit: Hash) -> Result<bool> {
        match self.ref_head(dref)? {
            None => Ok(true),
            Some(head) => self.is_ancestor(head, commit),
        }
    }

    /// True if `ancestor` is `descendant` or reachable from it through
    /// parents.
    pub fn is_ancestor(&self, ancestor: Hash, descendant: Hash) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut stack = vec![descendant];
        while let Some(hash) = stack.pop() {
            if hash == ancestor {
                return Ok(true);
            }
            if !visited.insert(hash) {
                continue;
            }
            stack.extend(self.read_commit(hash)?.parents);
        }
        Ok(false)
    }

    pub fn new_branch_at_commit(&self, name: &str, commit: Hash) -> Result<DoltRef> {
        let dref = DoltRef::branch(name)?;
        if self.has_ref(&dref)? {
            return Err(Error::RefAlreadyExists(dref.to_string()));
        }
        self.read_commit(commit)?;
        self.refs
            .update_ref(&dref.to_string(), None, commit)
            .map_err(|e| match e {
                StoreError::RefConflict { .. } => Error::RefAlreadyExists(dref.to_string()),
                other => Error::Store(other),
            })?;
        log::info!("created branch {} at {}", name, commit.short());
        Ok(dref)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let dref = DoltRef::branch(name)?;
        let head = self
            .ref_head(&dref)?
            .ok_or_else(|| Error::RefNotFound(dref.to_string()))?;
        self.refs.delete_ref(&dref.to_string(), head)?;
        log::info!("deleted branch {}", name);
        Ok(())
    }

    /// Refs of one namespace with their heads, in name order.
    pub fn refs_of_type(&self, ref_type: RefType) -> Result<Vec<(DoltRef, Hash)>> {
        Ok(self
            .refs
            .list_refs()?
            .into_iter()
            .filter_map(|(name, hash)| DoltRef::parse(&name).map(|dref| (dref, hash)))
            .filter(|(dref, _)| dref.ref_type() == ref_type)
            .collect())
    }

    pub fn branches(&self) -> Result<Vec<(DoltRef, Hash)>> {
        self.refs_of_type(RefType::Branch)
    }

    /// The working ref; the default branch until something is checked out.
    pub fn head_ref(&self) -> Result<DoltRef> {
        match self.refs.get_head()? {
            Some(name) => DoltRef::parse(&name)
                .ok_or_else(|| Error::Store(StoreError::Other(format!("HEAD names bad ref '{}'", name)))),
            None => self.default_branch(),
        }
    }

    /// Check out an existing ref.
    pub fn set_head_ref(&self, dref: &DoltRef) -> Result<()> {
        if !self.has_ref(dref)? {
            return Err(Error::RefNotFound(dref.to_string()));
        }
        self.refs.set_head(&dref.to_string())?;
        log::info!("HEAD is now {}", dref);
        Ok(())
    }

    pub fn head_commit(&self) -> Result<Commit> {
        self.resolve(&CommitSpec::head())
    }

    /// Up to `n` commits reachable from `spec`, newest first.
    pub fn log(&self, spec: &CommitSpec, n: usize) -> Result<Vec<Commit>> {
        let start = self.resolve(spec)?;
        history::time_sorted_commits(&self.vs, start.hash, n)
    }

    /// Copy everything reachable from `root` into `dest`, batched.
    pub fn push_chunks(
        &self,
        dest: &Repo,
        root: Hash,
        progress: Option<&Sender<PullProgress>>,
        cancel: Option<&CancelToken>,
    ) -> Result<PullStats> {
        pull::pull_chunks(
            self.vs.chunk_store().as_ref(),
            dest.vs.chunk_store().as_ref(),
            root,
            PullMode::default(),
            progress,
            cancel,
        )
    }

    /// Copy everything reachable from `root` in `src` into this repository.
    pub fn pull_chunks(
        &self,
        src: &Repo,
        root: Hash,
        mode: PullMode,
        progress: Option<&Sender<PullProgress>>,
        cancel: Option<&CancelToken>,
    ) -> Result<PullStats> {
        pull::pull_chunks(
            src.vs.chunk_store().as_ref(),
            self.vs.chunk_store().as_ref(),
            root,
            mode,
            progress,
            cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root_value::Table;
    use crate::schema::{Column, Row, Schema};
    use crate::value::{Value, ValueKind};
    use tempfile::TempDir;

    fn meta(description: &str) -> CommitMeta {
        CommitMeta::new("Ada", "ada@example.com", description).unwrap()
    }

    fn init_repo() -> (Repo, Commit) {
        let repo = Repo::in_memory(Config::default());
        let init = repo.init("Ada", "ada@example.com").unwrap();
        (repo, init)
    }

    fn people_root(repo: &Repo, names: &[&str]) -> Hash {
        let schema = Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("name", 1, ValueKind::String),
        ])
        .unwrap();
        let rows = names
            .iter()
            .enumerate()
            .map(|(i, name)| Row::from_values([(0, Value::Int(i as i64)), (1, Value::from(*name))]));
        let table = Table::from_rows(repo.value_store(), schema, rows).unwrap();
        RootValue::empty(repo.value_store())
            .unwrap()
            .put_table("people", &table)
            .unwrap()
            .write()
            .unwrap()
    }

    fn master() -> DoltRef {
        DoltRef::branch("master").unwrap()
    }

    #[test]
    fn test_init() {
        let (repo, init) = init_repo();
        assert!(init.parents.is_empty());
        assert_eq!(init.meta.description, INIT_COMMIT_MESSAGE);
        assert_eq!(repo.head_ref().unwrap(), master());
        assert_eq!(repo.head_commit().unwrap(), init);
        assert_eq!(
            repo.ref_head(&DoltRef::internal(CREATION_REF)).unwrap(),
            Some(init.hash)
        );
        let root = repo.read_root_value(init.root).unwrap();
        assert!(root.table_names().unwrap().is_empty());

        assert!(matches!(
            repo.init("Ada", "ada@example.com"),
            Err(Error::RefAlreadyExists(_))
        ));
        let fresh = Repo::in_memory(Config::default());
        assert!(matches!(fresh.init(" ", "x@y"), Err(Error::InvalidCommitMeta(_))));
    }

    #[test]
    fn test_resolve_ancestors() {
        let (repo, c1) = init_repo();
        let c2 = repo.commit(people_root(&repo, &["a"]), &master(), meta("c2")).unwrap();
        let c3 = repo.commit(people_root(&repo, &["a", "b"]), &master(), meta("c3")).unwrap();

        assert_eq!(repo.resolve_str("HEAD").unwrap(), c3);
        assert_eq!(repo.resolve_str("master~1").unwrap(), c2);
        assert_eq!(repo.resolve_str("HEAD~2").unwrap(), c1);
        assert_eq!(repo.resolve_str("HEAD^1^1").unwrap(), c1);
        assert!(matches!(
            repo.resolve_str("HEAD~5"),
            Err(Error::InvalidAncestorSpec(_))
        ));
        assert!(matches!(repo.resolve_str("HEAD^2"), Err(Error::InvalidAncestorSpec(_))));

        assert_eq!(repo.resolve(&CommitSpec::for_hash(c2.hash)).unwrap(), c2);
        let prefix = format!("#{}", &c2.hash.to_hex()[..10]);
        assert_eq!(repo.resolve_str(&prefix).unwrap(), c2);

        assert!(matches!(repo.resolve_str("nope"), Err(Error::RefNotFound(_))));
        let missing = CommitSpec::for_hash(Hash::of(b"missing"));
        assert!(matches!(repo.resolve(&missing), Err(Error::HashNotFound(_))));
        let not_commit = CommitSpec::for_hash(c3.root);
        assert!(matches!(repo.resolve(&not_commit), Err(Error::NotACommit(_))));
    }

    #[test]
    fn test_hex_and_head_like_branch_names() {
        let (repo, c1) = init_repo();
        let c2 = repo.commit(people_root(&repo, &["a"]), &master(), meta("c2")).unwrap();

        repo.new_branch_at_commit("deadbeef", c1.hash).unwrap();
        repo.new_branch_at_commit("head", c1.hash).unwrap();

        // a branch wins over a hash prefix with the same text
        assert_eq!(repo.resolve_str("deadbeef").unwrap(), c1);
        assert_eq!(repo.resolve_str("head").unwrap(), c1);
        assert_eq!(repo.resolve_str("HEAD").unwrap(), c2);
        assert_eq!(repo.log(&"head".parse().unwrap(), 10).unwrap(), vec![c1.clone()]);

        // bare hex with no such branch is still a hash prefix
        let prefix = c2.hash.to_hex()[..12].to_ascii_uppercase();
        assert_eq!(repo.resolve_str(&prefix).unwrap(), c2);
        assert_eq!(repo.resolve_str(&format!("{}~1", prefix)).unwrap(), c1);
    }

    #[test]
    fn test_commit_requires_root_value() {
        let (repo, init) = init_repo();
        let not_root = repo.value_store().write_value(&Value::from("x")).unwrap();
        assert!(matches!(
            repo.commit(not_root, &master(), meta("bad")),
            Err(Error::NotARootValue(_))
        ));

        // identical content still makes a new commit
        let again = repo.commit(init.root, &master(), meta("same content")).unwrap();
        assert_ne!(again.hash, init.hash);
        assert_eq!(again.root, init.root);
        assert_eq!(again.parents, vec![init.hash]);
    }

    #[test]
    fn test_merge_commit_parents() {
        let (repo, init) = init_repo();
        let feature = repo.new_branch_at_commit("feature", init.hash).unwrap();
        let f1 = repo.commit(people_root(&repo, &["f"]), &feature, meta("f1")).unwrap();
        let m1 = repo.commit(people_root(&repo, &["m"]), &master(), meta("m1")).unwrap();

        let merge = repo
            .commit_with_parents(
                people_root(&repo, &["f", "m"]),
                &master(),
                &[CommitSpec::for_ref(feature)],
                meta("merge"),
            )
            .unwrap();
        let mut expected = vec![f1.hash, m1.hash];
        expected.sort();
        assert_eq!(merge.parents, expected);
        assert!(repo.is_ancestor(init.hash, merge.hash).unwrap());
    }

    #[test]
    fn test_fast_forward() {
        let (repo, init) = init_repo();
        let feature = repo.new_branch_at_commit("feature", init.hash).unwrap();
        let f1 = repo.commit(people_root(&repo, &["f"]), &feature, meta("f1")).unwrap();

        assert!(repo.can_fast_forward(&master(), f1.hash).unwrap());
        assert_eq!(repo.fast_forward(&master(), f1.hash).unwrap(), FastForward::Applied);
        assert_eq!(repo.fast_forward(&master(), f1.hash).unwrap(), FastForward::UpToDate);

        // siblings
        let f2 = repo.commit(people_root(&repo, &["f2"]), &feature, meta("f2")).unwrap();
        let m2 = repo.commit(people_root(&repo, &["m2"]), &master(), meta("m2")).unwrap();
        assert!(!repo.can_fast_forward(&master(), f2.hash).unwrap());
        assert_eq!(repo.fast_forward(&master(), f2.hash).unwrap(), FastForward::Rejected);
        assert_eq!(repo.ref_head(&master()).unwrap(), Some(m2.hash));

        let unborn = DoltRef::branch("unborn").unwrap();
        assert!(repo.can_fast_forward(&unborn, f2.hash).unwrap());
    }

    #[test]
    fn test_branches_and_checkout() {
        let (repo, init) = init_repo();
        let feature = repo.new_branch_at_commit("feature", init.hash).unwrap();
        assert!(matches!(
            repo.new_branch_at_commit("feature", init.hash),
            Err(Error::RefAlreadyExists(_))
        ));
        assert!(matches!(
            repo.new_branch_at_commit("bad name", init.hash),
            Err(Error::InvalidBranchName(_))
        ));

        let names: Vec<String> = repo
            .branches()
            .unwrap()
            .into_iter()
            .map(|(dref, _)| dref.path().to_string())
            .collect();
        assert_eq!(names, vec!["feature", "master"]);
        assert_eq!(repo.refs_of_type(RefType::Internal).unwrap().len(), 1);

        repo.set_head_ref(&feature).unwrap();
        let c = repo.commit(people_root(&repo, &["x"]), &repo.head_ref().unwrap(), meta("x")).unwrap();
        assert_eq!(repo.ref_head(&feature).unwrap(), Some(c.hash));
        assert_eq!(repo.ref_head(&master()).unwrap(), Some(init.hash));

        repo.set_ref(&master(), c.hash).unwrap();
        assert_eq!(repo.ref_head(&master()).unwrap(), Some(c.hash));

        repo.delete_branch("feature").unwrap();
        assert!(matches!(repo.delete_branch("feature"), Err(Error::RefNotFound(_))));
        assert!(matches!(
            repo.set_head_ref(&feature),
            Err(Error::RefNotFound(_))
        ));
    }

    #[test]
    fn test_commit_conflict_on_moved_ref() {
        let (repo, init) = init_repo();
        let stale = init.hash;
        let c2 = repo.commit(people_root(&repo, &["a"]), &master(), meta("c2")).unwrap();
        // a writer still holding the old head loses the race
        let err = repo
            .ref_store()
            .update_ref(&master().to_string(), Some(stale), init.hash)
            .unwrap_err();
        assert!(matches!(err, StoreError::RefConflict { .. }));
        assert_eq!(repo.ref_head(&master()).unwrap(), Some(c2.hash));
    }

    #[test]
    fn test_log_and_pull_between_repos() {
        let dir = TempDir::new().unwrap();
        let src = Repo::open(dir.path().join("src"), Config::default()).unwrap();
        src.init("Ada", "ada@example.com").unwrap();
        for i in 0..3 {
            let names: Vec<String> = (0..=i).map(|n| format!("p{}", n)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            src.commit(people_root(&src, &refs), &master(), meta(&format!("c{}", i)))
                .unwrap();
        }
        let log = src.log(&CommitSpec::head(), 10).unwrap();
        assert_eq!(log.len(), 4);
        assert!(log.windows(2).all(|w| w[0].meta.timestamp >= w[1].meta.timestamp));

        let head = src.head_commit().unwrap();
        let dst = Repo::open(dir.path().join("dst"), Config::default()).unwrap();
        let stats = dst
            .pull_chunks(&src, head.hash, PullMode::OneAtATime, None, None)
            .unwrap();
        assert!(stats.chunks_copied > 0);
        dst.set_ref(&master(), head.hash).unwrap();
        assert_eq!(dst.log(&CommitSpec::for_ref(master()), 10).unwrap().len(), 4);
        let table = dst
            .read_root_value(head.root)
            .unwrap()
            .get_table("people")
            .unwrap()
            .unwrap();
        assert_eq!(table.row_count(), 3);

        // pushing again copies nothing
        let again = src.push_chunks(&dst, head.hash, None, None).unwrap();
        assert_eq!(again.chunks_copied, 0);
    }
}
