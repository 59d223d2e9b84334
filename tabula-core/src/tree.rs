//! Prolly tree engine: bulk construction and incremental edits.
//!
//! Every level of a tree is an item sequence cut into chunks by the
//! [`Chunker`]; the meta-tuples describing one level's chunks are the items
//! of the level above. Because a chunk boundary depends only on the items
//! since the previous boundary, the same contents always produce the same
//! root hash, regardless of how they were assembled.
//!
//! ## Incremental edits
//!
//! `apply_edits` works one level at a time. For each run of nearby edits it
//! seeks to the start of the chunk holding the first edit, replays the old
//! items merged with the edits through a fresh chunker, and stops as soon as
//! a freshly cut boundary lines up with an old chunk start. Everything after
//! that point is reused untouched. Chunks consumed and written become the
//! edits for the next level up.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::chunker::Chunker;
use crate::cursor::SequenceCursor;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::{CollectionKind, Entry, MetaTuple, Node};
use crate::value::Value;
use crate::value_store::ValueStore;

/// Statistics for a single build or edit.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub chunks_written: usize,
    pub leaves_written: usize,
    pub metas_written: usize,
    /// Chunks produced that were already in the store.
    pub chunks_reused: usize,
    /// Re-chunked runs, summed over all levels.
    pub regions: usize,
    pub levels_touched: usize,
}

#[derive(Clone, Debug)]
enum Item {
    Entry(Entry),
    Tuple(MetaTuple),
}

impl Item {
    fn at(node: &Node, idx: usize) -> Item {
        match node {
            Node::Leaf { entries, .. } => Item::Entry(entries[idx].clone()),
            Node::Meta { tuples, .. } => Item::Tuple(tuples[idx].clone()),
        }
    }

    /// Canonical bytes fed to the chunker.
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Item::Entry(entry) => bincode::serialize(entry)?,
            Item::Tuple(tuple) => bincode::serialize(tuple)?,
        })
    }
}

/// Cuts one level's item stream into stored chunks.
struct LevelWriter<'a> {
    store: &'a ValueStore,
    kind: CollectionKind,
    level: u64,
    chunker: Chunker,
    entries: Vec<Entry>,
    tuples: Vec<MetaTuple>,
    written: Vec<MetaTuple>,
    stats: &'a mut BuildStats,
}

impl<'a> LevelWriter<'a> {
    fn new(
        store: &'a ValueStore,
        kind: CollectionKind,
        level: u64,
        stats: &'a mut BuildStats,
    ) -> Self {
        LevelWriter {
            store,
            kind,
            level,
            chunker: Chunker::new(store.chunking()),
            entries: Vec::new(),
            tuples: Vec::new(),
            written: Vec::new(),
            stats,
        }
    }

    fn push(&mut self, item: Item) -> Result<()> {
        let bytes = item.encode()?;
        match item {
            Item::Entry(entry) => self.entries.push(entry),
            Item::Tuple(tuple) => self.tuples.push(tuple),
        }
        if self.chunker.append(&bytes) {
            self.flush()?;
        }
        Ok(())
    }

    /// True when nothing has been fed since the last boundary.
    fn is_aligned(&self) -> bool {
        self.entries.is_empty() && self.tuples.is_empty()
    }

    fn flush(&mut self) -> Result<()> {
        let node = if self.level == 0 {
            Node::Leaf {
                kind: self.kind,
                entries: std::mem::take(&mut self.entries),
            }
        } else {
            Node::Meta {
                kind: self.kind,
                level: self.level,
                tuples: std::mem::take(&mut self.tuples),
            }
        };
        let (hash, fresh) = self.store.write_node_tracked(&node)?;
        self.stats.chunks_written += 1;
        if node.is_leaf() {
            self.stats.leaves_written += 1;
        } else {
            self.stats.metas_written += 1;
        }
        if !fresh {
            self.stats.chunks_reused += 1;
        }
        self.written.push(node.to_meta_tuple(hash));
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<MetaTuple>> {
        if !self.is_aligned() {
            self.flush()?;
        }
        Ok(self.written)
    }
}

/// Chunk `tuples` into successive meta levels until one chunk remains.
fn build_upward(
    store: &ValueStore,
    kind: CollectionKind,
    mut level: u64,
    mut tuples: Vec<MetaTuple>,
    stats: &mut BuildStats,
) -> Result<Hash> {
    loop {
        match tuples.len() {
            0 => return store.write_node(&Node::empty(kind)),
            1 => return Ok(tuples[0].child),
            _ => {}
        }
        let count = tuples.len();
        let mut writer = LevelWriter::new(store, kind, level, stats);
        for tuple in tuples {
            writer.push(Item::Tuple(tuple))?;
        }
        let next = writer.finish()?;
        if next.len() == count {
            // oversized tuples cut one per chunk; stop at a single wide root
            return store.write_node(&Node::Meta {
                kind,
                level: level + 1,
                tuples: next,
            });
        }
        tuples = next;
        level += 1;
    }
}

/// Strictly increasing keys or a descriptive error.
fn check_sorted<'a>(keys: impl Iterator<Item = &'a Value>) -> Result<()> {
    let mut prev: Option<&Value> = None;
    for key in keys {
        if let Some(prev) = prev {
            if key == prev {
                return Err(Error::DuplicateKey(key.to_string()));
            }
            if key < prev {
                return Err(Error::UnsortedEdits);
            }
        }
        prev = Some(key);
    }
    Ok(())
}

/// Output of re-chunking one level.
struct LevelPass {
    /// New chunks of this level, in order.
    written: Vec<MetaTuple>,
    /// Edits for the level above, sorted by key.
    parent_edits: Vec<(Value, Option<Item>)>,
}

/// Immutable handle to one stored prolly tree.
#[derive(Clone)]
pub struct Tree {
    store: ValueStore,
    kind: CollectionKind,
    root: Hash,
    node: Arc<Node>,
}

impl Tree {
    pub fn empty(store: &ValueStore, kind: CollectionKind) -> Result<Tree> {
        let root = store.write_node(&Node::empty(kind))?;
        Tree::load(store, root)
    }

    pub fn load(store: &ValueStore, root: Hash) -> Result<Tree> {
        let node = store.read_node(&root)?;
        Ok(Tree {
            store: store.clone(),
            kind: node.kind(),
            root,
            node,
        })
    }

    /// Bulk-build a tree from entries in final order. Map and Set entries
    /// must have strictly increasing keys.
    pub fn build(
        store: &ValueStore,
        kind: CollectionKind,
        entries: Vec<Entry>,
    ) -> Result<(Tree, BuildStats)> {
        if kind.is_ordered() {
            check_sorted(entries.iter().map(|e| &e.key))?;
        }
        let start_time = Instant::now();
        let count = entries.len();
        let mut stats = BuildStats::default();

        let mut writer = LevelWriter::new(store, kind, 0, &mut stats);
        for entry in entries {
            writer.push(Item::Entry(entry))?;
        }
        let leaves = writer.finish()?;
        let root = build_upward(store, kind, 1, leaves, &mut stats)?;

        log::debug!(
            "built {:?} of {} entries: {} chunks in {:?}",
            kind,
            count,
            stats.chunks_written,
            start_time.elapsed()
        );
        Ok((Tree::load(store, root)?, stats))
    }

    /// Apply sorted, de-duplicated edits: `Some(value)` puts, `None` deletes.
    ///
    /// Fails with `UnsortedEdits` or `DuplicateKey` on bad input and with
    /// `UnsupportedOperation` on a List, whose edits go through a rebuild.
    pub fn apply_edits(&self, edits: Vec<(Value, Option<Value>)>) -> Result<(Tree, BuildStats)> {
        if !self.kind.is_ordered() {
            return Err(Error::UnsupportedOperation("keyed edits on a list"));
        }
        check_sorted(edits.iter().map(|(k, _)| k))?;
        let mut stats = BuildStats::default();
        if edits.is_empty() {
            return Ok((self.clone(), stats));
        }

        let start_time = Instant::now();
        let count = edits.len();
        let top = self.node.level();
        let mut pending: Vec<(Value, Option<Item>)> = edits
            .into_iter()
            .map(|(key, value)| {
                let item = value.map(|v| Item::Entry(Entry::new(key.clone(), v)));
                (key, item)
            })
            .collect();

        let mut level = 0;
        let root = loop {
            let pass = self.rebuild_level(level, top, &pending, &mut stats)?;
            stats.levels_touched += 1;
            if level == top {
                break self.finish_root(level, pass.written, &mut stats)?;
            }
            if pass.parent_edits.is_empty() {
                // every chunk came out unchanged
                break self.root;
            }
            pending = pass.parent_edits;
            level += 1;
        };

        log::debug!(
            "applied {} edits: {} chunks written, {} regions, {:?}",
            count,
            stats.chunks_written,
            stats.regions,
            start_time.elapsed()
        );
        Ok((Tree::load(&self.store, root)?, stats))
    }

    fn rebuild_level(
        &self,
        level: u64,
        top: u64,
        edits: &[(Value, Option<Item>)],
        stats: &mut BuildStats,
    ) -> Result<LevelPass> {
        let has_parent = level < top;
        let mut written = Vec::new();
        let mut parent: BTreeMap<Value, Option<MetaTuple>> = BTreeMap::new();
        let mut replaced: BTreeMap<Value, MetaTuple> = BTreeMap::new();

        let mut i = 0;
        while i < edits.len() {
            let mut cursor = SequenceCursor::seek_at_level(
                &self.store,
                &self.root,
                Some(&edits[i].0),
                true,
                false,
                level,
            )?;
            cursor.rewind_chunk();
            stats.regions += 1;

            let mut writer = LevelWriter::new(&self.store, self.kind, level, stats);
            loop {
                let old = cursor.current_key().cloned();
                let take_edit = match (&old, edits.get(i)) {
                    (None, None) => break,
                    (None, Some(_)) => true,
                    (Some(_), None) => false,
                    (Some(old), Some((key, _))) => key <= old,
                };
                if take_edit {
                    let (key, item) = &edits[i];
                    i += 1;
                    if old.as_ref() == Some(key) {
                        consume_old(&mut cursor, has_parent, &mut parent, &mut replaced)?;
                    }
                    if let Some(item) = item {
                        writer.push(item.clone())?;
                    }
                } else {
                    let item = Item::at(cursor.node(), cursor.index());
                    consume_old(&mut cursor, has_parent, &mut parent, &mut replaced)?;
                    writer.push(item)?;
                }
                // the root level has no parent to carry untouched chunks,
                // so it is always replayed to the end
                if has_parent && writer.is_aligned() && cursor.at_chunk_start() {
                    break;
                }
            }

            let tuples = writer.finish()?;
            for tuple in &tuples {
                parent.insert(tuple.key.clone(), Some(tuple.clone()));
            }
            written.extend(tuples);
        }

        let parent_edits = parent
            .into_iter()
            .filter(|(key, tuple)| match tuple {
                Some(tuple) => replaced.get(key) != Some(tuple),
                None => true,
            })
            .map(|(key, tuple)| (key, tuple.map(Item::Tuple)))
            .collect();
        Ok(LevelPass {
            written,
            parent_edits,
        })
    }

    /// Turn the chunks produced at the old root level into the new root.
    fn finish_root(
        &self,
        level: u64,
        written: Vec<MetaTuple>,
        stats: &mut BuildStats,
    ) -> Result<Hash> {
        let mut root = match written.len() {
            0 => return self.store.write_node(&Node::empty(self.kind)),
            1 => written[0].child,
            _ => return build_upward(&self.store, self.kind, level + 1, written, stats),
        };
        // shrinking can leave single-child meta chunks on top
        loop {
            let node = self.store.read_node(&root)?;
            match node.tuples() {
                [only] if !node.is_leaf() => root = only.child,
                _ => return Ok(root),
            }
        }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Number of leaf entries.
    pub fn len(&self) -> u64 {
        self.node.num_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Level of the root chunk; 0 when the root is a leaf.
    pub fn height(&self) -> u64 {
        self.node.level()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let cursor = self.seek(Some(key), false, false)?;
        Ok(cursor
            .current_entry()
            .filter(|e| &e.key == key)
            .map(|e| e.value.clone()))
    }

    pub fn cursor(&self) -> Result<SequenceCursor> {
        SequenceCursor::at_start(&self.store, &self.root)
    }

    pub fn seek(&self, key: Option<&Value>, for_insertion: bool, last: bool) -> Result<SequenceCursor> {
        SequenceCursor::seek_to(&self.store, &self.root, key, for_insertion, last)
    }

    pub fn cursor_at_index(&self, index: u64) -> Result<SequenceCursor> {
        SequenceCursor::at_index(&self.store, &self.root, index)
    }

    pub fn entries(&self) -> Result<Vec<Entry>> {
        self.cursor()?.collect()
    }

    /// Addresses of every chunk in the tree.
    pub fn chunk_hashes(&self) -> Result<HashSet<Hash>> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            let node = self.store.read_node(&hash)?;
            stack.extend(node.tuples().iter().map(|t| t.child));
        }
        Ok(seen)
    }

    /// Check every structural invariant of the stored tree.
    pub fn validate(&self) -> Result<()> {
        self.node
            .validate(Some(&self.store), "")
            .map_err(|reason| Error::corrupt(self.root, reason))
    }
}

/// Step past the current old item, recording its chunk as replaced when the
/// item was the chunk's last.
fn consume_old(
    cursor: &mut SequenceCursor,
    has_parent: bool,
    parent: &mut BTreeMap<Value, Option<MetaTuple>>,
    replaced: &mut BTreeMap<Value, MetaTuple>,
) -> Result<()> {
    if has_parent && cursor.at_chunk_end() {
        if let Some(tuple) = cursor.parent_tuple() {
            parent.entry(tuple.key.clone()).or_insert(None);
            replaced.insert(tuple.key.clone(), tuple.clone());
        }
    }
    cursor.advance()?;
    Ok(())
}
