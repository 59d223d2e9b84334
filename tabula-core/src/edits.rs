//! Edit accumulation ahead of a tree rebuild.
//!
//! Puts and removes are collected in arrival order. `finish` sorts them by
//! key with a stable sort and keeps only the last edit for each key. Large
//! batches are cut into contiguous shards that are sorted on scoped worker
//! threads and merged back in key order; ties between shards go to the later
//! shard, which holds the later writes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::EditConfig;
use crate::value::Value;

/// `Some(value)` puts, `None` removes.
pub type Edit = (Value, Option<Value>);

pub struct EditAccumulator {
    edits: Vec<Edit>,
    config: EditConfig,
}

impl EditAccumulator {
    pub fn new(config: &EditConfig) -> Self {
        EditAccumulator {
            edits: Vec::new(),
            config: config.clone(),
        }
    }

    pub fn put(&mut self, key: Value, value: Value) {
        self.edits.push((key, Some(value)));
    }

    pub fn remove(&mut self, key: Value) {
        self.edits.push((key, None));
    }

    /// Edits recorded so far, duplicates included.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Number of shards `finish` will sort in parallel.
    fn shard_count(&self) -> usize {
        let min_size = self.config.min_shard_size.max(1);
        (self.edits.len() / min_size).clamp(1, self.config.shard_count.max(1))
    }

    /// Sorted edits with strictly increasing keys, last writer wins.
    pub fn finish(self) -> Vec<Edit> {
        let shards = self.shard_count();
        let sorted = if shards == 1 {
            let mut edits = self.edits;
            edits.sort_by(|a, b| a.0.cmp(&b.0));
            edits
        } else {
            log::debug!("sorting {} edits in {} shards", self.edits.len(), shards);
            merge_shards(sort_shards(self.edits, shards))
        };
        dedup_last_wins(sorted)
    }
}

fn sort_shards(mut edits: Vec<Edit>, shards: usize) -> Vec<Vec<Edit>> {
    let shard_len = edits.len().div_ceil(shards);
    let mut parts = Vec::with_capacity(shards);
    while edits.len() > shard_len {
        let tail = edits.split_off(shard_len);
        parts.push(edits);
        edits = tail;
    }
    parts.push(edits);

    std::thread::scope(|s| {
        for part in parts.iter_mut() {
            s.spawn(move || part.sort_by(|a, b| a.0.cmp(&b.0)));
        }
    });
    parts
}

/// Next unmerged edit of one shard.
struct ShardHead {
    edit: Edit,
    shard: usize,
}

impl PartialEq for ShardHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ShardHead {}

// BinaryHeap is a max-heap; reversed so the smallest (key, shard) pops first
impl Ord for ShardHead {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .edit
            .0
            .cmp(&self.edit.0)
            .then_with(|| other.shard.cmp(&self.shard))
    }
}

impl PartialOrd for ShardHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn merge_shards(shards: Vec<Vec<Edit>>) -> Vec<Edit> {
    let total = shards.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = shards.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (shard, iter) in iters.iter_mut().enumerate() {
        if let Some(edit) = iter.next() {
            heap.push(ShardHead { edit, shard });
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(ShardHead { edit, shard }) = heap.pop() {
        if let Some(next) = iters[shard].next() {
            heap.push(ShardHead { edit: next, shard });
        }
        merged.push(edit);
    }
    merged
}

fn dedup_last_wins(sorted: Vec<Edit>) -> Vec<Edit> {
    let mut out: Vec<Edit> = Vec::with_capacity(sorted.len());
    for edit in sorted {
        match out.last_mut() {
            Some(last) if last.0 == edit.0 => *last = edit,
            _ => out.push(edit),
        }
    }
    out
}
