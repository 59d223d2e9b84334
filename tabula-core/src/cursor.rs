//! SequenceCursor for traversing prolly trees.
//!
//! A cursor is an owned path of `(node, index)` frames from the root down to
//! a target level (the leaves for reads, a meta level for editing). Cloning a
//! cursor is cheap: frames hold `Arc<Node>`, so a clone can run a second,
//! independent walk.

use std::sync::Arc;

use crate::error::Result;
use crate::hash::Hash;
use crate::node::{Entry, MetaTuple, Node};
use crate::value::Value;
use crate::value_store::ValueStore;

#[derive(Clone, Debug)]
struct Frame {
    node: Arc<Node>,
    /// -1 is before the first item, `len` is past the last one.
    idx: isize,
}

impl Frame {
    fn len(&self) -> isize {
        self.node.len() as isize
    }

    fn valid(&self) -> bool {
        self.idx >= 0 && self.idx < self.len()
    }
}

#[derive(Clone)]
pub struct SequenceCursor {
    store: ValueStore,
    root: Hash,
    level: u64,
    frames: Vec<Frame>,
}

impl SequenceCursor {
    /// Position at the first leaf entry.
    pub fn at_start(store: &ValueStore, root: &Hash) -> Result<Self> {
        Self::seek_to(store, root, None, false, false)
    }

    /// Descend from `root` level by level using `search`.
    ///
    /// * `key` - search key; the cursor lands on the first entry >= key
    /// * `for_insertion` - when the key is past the end of a meta node,
    ///   descend into its last child so the cursor reaches the leaf insertion
    ///   point; otherwise the cursor stops, exhausted, at that meta level
    /// * `last` - ignore `key` and position at the final entry
    pub fn seek_to(
        store: &ValueStore,
        root: &Hash,
        key: Option<&Value>,
        for_insertion: bool,
        last: bool,
    ) -> Result<Self> {
        Self::seek_at_level(store, root, key, for_insertion, last, 0)
    }

    /// Like [`seek_to`](Self::seek_to) but stops at the nodes of `level`;
    /// advancing then steps over the items of that level across chunks.
    pub fn seek_at_level(
        store: &ValueStore,
        root: &Hash,
        key: Option<&Value>,
        for_insertion: bool,
        last: bool,
        level: u64,
    ) -> Result<Self> {
        let mut cursor = SequenceCursor {
            store: store.clone(),
            root: *root,
            level,
            frames: Vec::new(),
        };
        let mut node = store.read_node(root)?;
        loop {
            let len = node.len() as isize;
            let mut idx = if last {
                len - 1
            } else if let Some(key) = key {
                node.search(key) as isize
            } else {
                0
            };
            let at_target = node.level() <= level;
            if !at_target && idx >= len && for_insertion && len > 0 {
                idx = len - 1;
            }
            let frame = Frame {
                node: Arc::clone(&node),
                idx,
            };
            let descend = !at_target && frame.valid();
            let child = if descend {
                Some(node.tuples()[idx as usize].child)
            } else {
                None
            };
            cursor.frames.push(frame);
            match child {
                Some(child) => node = store.read_node(&child)?,
                None => break,
            }
        }
        Ok(cursor)
    }

    /// Position at the entry with the given ordinal, using subtree leaf counts.
    pub fn at_index(store: &ValueStore, root: &Hash, index: u64) -> Result<Self> {
        let mut cursor = SequenceCursor {
            store: store.clone(),
            root: *root,
            level: 0,
            frames: Vec::new(),
        };
        let mut node = store.read_node(root)?;
        let mut remaining = index;
        loop {
            if node.is_leaf() {
                let idx = (remaining as usize).min(node.len()) as isize;
                cursor.frames.push(Frame { node, idx });
                break;
            }
            let mut idx = node.len();
            for (i, tuple) in node.tuples().iter().enumerate() {
                if remaining < tuple.num_leaves {
                    idx = i;
                    break;
                }
                remaining -= tuple.num_leaves;
            }
            if idx == node.len() {
                let len = node.len() as isize;
                cursor.frames.push(Frame { node, idx: len });
                break;
            }
            let child = node.tuples()[idx].child;
            cursor.frames.push(Frame {
                node,
                idx: idx as isize,
            });
            node = store.read_node(&child)?;
        }
        Ok(cursor)
    }

    pub fn root(&self) -> &Hash {
        &self.root
    }

    /// True while positioned on an item of the target level.
    pub fn valid(&self) -> bool {
        match self.frames.last() {
            Some(frame) => frame.node.level() == self.level && frame.valid(),
            None => false,
        }
    }

    /// Node the cursor is in at its target level.
    pub fn node(&self) -> &Node {
        &self.frames[self.frames.len() - 1].node
    }

    /// Index within [`node`](Self::node); only meaningful while `valid()`.
    pub fn index(&self) -> usize {
        self.frames.last().map(|f| f.idx.max(0) as usize).unwrap_or(0)
    }

    pub fn current_entry(&self) -> Option<&Entry> {
        if !self.valid() {
            return None;
        }
        self.node().entries().get(self.index())
    }

    pub fn current_tuple(&self) -> Option<&MetaTuple> {
        if !self.valid() {
            return None;
        }
        self.node().tuples().get(self.index())
    }

    pub fn current_key(&self) -> Option<&Value> {
        if !self.valid() {
            return None;
        }
        Some(self.node().key_at(self.index()))
    }

    /// Meta-tuple in the parent that points at the current chunk.
    pub fn parent_tuple(&self) -> Option<&MetaTuple> {
        let n = self.frames.len();
        if n < 2 {
            return None;
        }
        let parent = &self.frames[n - 2];
        if !parent.valid() {
            return None;
        }
        parent.node.tuples().get(parent.idx as usize)
    }

    pub fn at_chunk_start(&self) -> bool {
        self.valid() && self.index() == 0
    }

    pub fn at_chunk_end(&self) -> bool {
        self.valid() && self.index() + 1 == self.node().len()
    }

    /// Move to the first item of the current chunk.
    pub fn rewind_chunk(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.node.level() == self.level && frame.len() > 0 {
                frame.idx = 0;
            }
        }
    }

    /// Step forward; false once past the last item.
    pub fn advance(&mut self) -> Result<bool> {
        if self.frames.is_empty() {
            return Ok(false);
        }
        let depth = self.frames.len() - 1;
        self.advance_frame(depth)
    }

    /// Step backward; false once before the first item.
    pub fn retreat(&mut self) -> Result<bool> {
        if self.frames.is_empty() {
            return Ok(false);
        }
        let depth = self.frames.len() - 1;
        self.retreat_frame(depth)
    }

    /// Hashes of the chunks that begin exactly at the current position,
    /// innermost first: the current chunk, then its parent if the chunk is
    /// the parent's first child, and so on up to the root.
    pub fn subtree_starts(&self) -> Vec<Hash> {
        let mut out = Vec::new();
        if !self.valid() {
            return out;
        }
        for depth in (0..self.frames.len()).rev() {
            if self.frames[depth].idx != 0 {
                break;
            }
            let hash = if depth == 0 {
                self.root
            } else {
                let parent = &self.frames[depth - 1];
                parent.node.tuples()[parent.idx as usize].child
            };
            out.push(hash);
        }
        out
    }

    /// Jump past the chunk `levels_up` above the current one (0 = the
    /// current chunk). Returns false if that exhausts the sequence.
    pub fn skip_subtree(&mut self, levels_up: usize) -> Result<bool> {
        let last = self.frames.len() - 1;
        if levels_up >= last {
            for frame in &mut self.frames {
                frame.idx = frame.len();
            }
            return Ok(false);
        }
        self.advance_frame(last - levels_up - 1)
    }

    fn advance_frame(&mut self, depth: usize) -> Result<bool> {
        let frame = &mut self.frames[depth];
        if frame.idx + 1 < frame.len() {
            frame.idx += 1;
            self.descend_from(depth, false)?;
            return Ok(true);
        }
        if depth > 0 && self.advance_frame(depth - 1)? {
            return Ok(true);
        }
        if depth == 0 {
            for frame in &mut self.frames {
                frame.idx = frame.len();
            }
        }
        Ok(false)
    }

    fn retreat_frame(&mut self, depth: usize) -> Result<bool> {
        let frame = &mut self.frames[depth];
        if frame.idx > 0 {
            frame.idx = frame.idx.min(frame.len()) - 1;
            self.descend_from(depth, true)?;
            return Ok(true);
        }
        if depth > 0 && self.retreat_frame(depth - 1)? {
            return Ok(true);
        }
        if depth == 0 {
            for frame in &mut self.frames {
                frame.idx = -1;
            }
        }
        Ok(false)
    }

    /// Rebuild the frames below `depth` at the first (or last) position of
    /// each child.
    fn descend_from(&mut self, depth: usize, to_last: bool) -> Result<()> {
        self.frames.truncate(depth + 1);
        loop {
            let frame = &self.frames[self.frames.len() - 1];
            if frame.node.level() <= self.level || !frame.valid() {
                return Ok(());
            }
            let child = frame.node.tuples()[frame.idx as usize].child;
            let node = self.store.read_node(&child)?;
            let idx = if to_last { node.len() as isize - 1 } else { 0 };
            self.frames.push(Frame { node, idx });
        }
    }
}

impl Iterator for SequenceCursor {
    type Item = Result<Entry>;

    /// Yield the current entry and step forward.
    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current_entry()?.clone();
        match self.advance() {
            Ok(_) => Some(Ok(entry)),
            Err(e) => {
                // park past the end so the error is reported once
                for frame in &mut self.frames {
                    frame.idx = frame.len();
                }
                Some(Err(e))
            }
        }
    }
}
