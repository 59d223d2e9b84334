//! Chunk transfer between stores.
//!
//! `pull_chunks` copies every chunk reachable from a root that the
//! destination lacks. A chunk already present at the destination is assumed
//! to have its whole closure present too, so the walk stops there.
//!
//! Discovery is breadth-first from the root, one level of refs at a time.
//! Writes happen in post-order, so a chunk reaches the destination only after
//! everything it refers to; a destination interrupted mid-transfer never holds
//! a chunk with dangling refs.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;

use crate::cancel::{self, CancelToken};
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::ChunkStore;

pub const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Presence checks and progress reports in batches.
    Batched { batch_size: usize },
    /// One presence check and one progress report per chunk.
    OneAtATime,
}

impl Default for PullMode {
    fn default() -> Self {
        PullMode::Batched {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PullMode {
    fn batch_size(&self) -> usize {
        match self {
            PullMode::Batched { batch_size } => (*batch_size).max(1),
            PullMode::OneAtATime => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub done_count: u64,
    pub known_count: u64,
    pub done_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    pub chunks_copied: u64,
    pub bytes_copied: u64,
}

struct Pending {
    bytes: Vec<u8>,
    children: Vec<Hash>,
}

/// Copy the closure of `root` from `src` to `dst`.
pub fn pull_chunks(
    src: &dyn ChunkStore,
    dst: &dyn ChunkStore,
    root: Hash,
    mode: PullMode,
    progress: Option<&Sender<PullProgress>>,
    cancel: Option<&CancelToken>,
) -> Result<PullStats> {
    let batch_size = mode.batch_size();
    let mut report = Progress {
        sender: progress,
        state: PullProgress::default(),
    };

    let pending = discover(src, dst, root, batch_size, cancel, &mut report)?;
    if pending.is_empty() {
        log::debug!("pull: {} already present", root.short());
        return Ok(PullStats::default());
    }

    let mut stats = PullStats::default();
    let mut in_batch = 0;
    for hash in write_order(root, &pending) {
        cancel::check(cancel)?;
        let Some(chunk) = pending.get(&hash) else {
            continue;
        };
        dst.put(&chunk.bytes)?;
        stats.chunks_copied += 1;
        stats.bytes_copied += chunk.bytes.len() as u64;
        report.state.done_count = stats.chunks_copied;
        report.state.done_bytes = stats.bytes_copied;

        in_batch += 1;
        if in_batch == batch_size {
            report.send();
            in_batch = 0;
        }
    }
    if in_batch > 0 {
        report.send();
    }

    log::debug!(
        "pull: copied {} chunks ({} bytes) for {}",
        stats.chunks_copied,
        stats.bytes_copied,
        root.short()
    );
    Ok(stats)
}

struct Progress<'a> {
    sender: Option<&'a Sender<PullProgress>>,
    state: PullProgress,
}

impl Progress<'_> {
    fn send(&self) {
        if let Some(sender) = self.sender {
            // a dropped receiver only means nobody is watching
            let _ = sender.send(self.state);
        }
    }
}

/// Fetch and decode every missing chunk, level by level.
fn discover(
    src: &dyn ChunkStore,
    dst: &dyn ChunkStore,
    root: Hash,
    batch_size: usize,
    cancel: Option<&CancelToken>,
    report: &mut Progress<'_>,
) -> Result<HashMap<Hash, Pending>> {
    let mut pending: HashMap<Hash, Pending> = HashMap::new();
    let mut seen: HashSet<Hash> = HashSet::from([root]);
    let mut frontier = vec![root];

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for batch in frontier.chunks(batch_size) {
            cancel::check(cancel)?;
            let present = if batch.len() == 1 {
                if dst.has(&batch[0])? {
                    HashSet::from([batch[0]])
                } else {
                    HashSet::new()
                }
            } else {
                dst.has_many(batch)?
            };

            for hash in batch.iter().filter(|h| !present.contains(*h)) {
                let bytes = src.get(hash)?.ok_or(Error::HashNotFound(*hash))?;
                if Hash::of(&bytes) != *hash {
                    return Err(Error::corrupt(*hash, "content does not match its address"));
                }
                let children = Chunk::decode(hash, &bytes)?.refs();
                for child in &children {
                    if seen.insert(*child) {
                        next.push(*child);
                    }
                }
                pending.insert(*hash, Pending { bytes, children });
            }
            report.state.known_count = pending.len() as u64;
            report.send();
        }
        frontier = next;
    }
    Ok(pending)
}

/// Post-order over the pending chunks: children before parents.
fn write_order(root: Hash, pending: &HashMap<Hash, Pending>) -> Vec<Hash> {
    let mut order = Vec::with_capacity(pending.len());
    let mut visited = HashSet::new();
    let mut stack = vec![(root, false)];

    while let Some((hash, expanded)) = stack.pop() {
        if expanded {
            order.push(hash);
            continue;
        }
        let Some(chunk) = pending.get(&hash) else {
            continue;
        };
        if !visited.insert(hash) {
            continue;
        }
        stack.push((hash, true));
        for child in &chunk.children {
            if !visited.contains(child) {
                stack.push((*child, false));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Map;
    use crate::config::Config;
    use crate::store::MemoryChunkStore;
    use crate::value::Value;
    use crate::value_store::ValueStore;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn small_chunks() -> Config {
        let mut config = Config::default();
        config.chunking.pattern_bits = 6;
        config
    }

    fn source_map(n: i64) -> (ValueStore, Map) {
        let vs = ValueStore::new(Arc::new(MemoryChunkStore::new()), &small_chunks());
        let map = Map::from_entries(&vs, (0..n).map(|i| (Value::Int(i), Value::from(format!("v{}", i)))))
            .unwrap();
        (vs, map)
    }

    fn assert_closed(store: &dyn ChunkStore, root: Hash) {
        let mut stack = vec![root];
        while let Some(hash) = stack.pop() {
            let bytes = store.get(&hash).unwrap().expect("chunk copied");
            stack.extend(Chunk::decode(&hash, &bytes).unwrap().refs());
        }
    }

    #[test]
    fn test_pull_batched_copies_closure() {
        let (vs, map) = source_map(500);
        let src = vs.chunk_store();
        let dst = MemoryChunkStore::new();
        let (tx, rx) = mpsc::channel();

        let stats = pull_chunks(
            src.as_ref(),
            &dst,
            map.hash(),
            PullMode::Batched { batch_size: 4 },
            Some(&tx),
            None,
        )
        .unwrap();
        assert_eq!(stats.chunks_copied as usize, map.tree().chunk_hashes().unwrap().len());
        assert_closed(&dst, map.hash());

        let updates: Vec<PullProgress> = rx.try_iter().collect();
        let last = updates.last().unwrap();
        assert_eq!(last.done_count, stats.chunks_copied);
        assert_eq!(last.known_count, stats.chunks_copied);
        assert_eq!(last.done_bytes, stats.bytes_copied);
        assert!(updates.windows(2).all(|w| w[0].done_count <= w[1].done_count));

        // second pull finds everything present
        let again = pull_chunks(src.as_ref(), &dst, map.hash(), PullMode::default(), None, None).unwrap();
        assert_eq!(again, PullStats::default());
    }

    #[test]
    fn test_pull_one_at_a_time_skips_present() {
        let (vs, map) = source_map(300);
        let dst = MemoryChunkStore::new();
        pull_chunks(vs.chunk_store().as_ref(), &dst, map.hash(), PullMode::OneAtATime, None, None)
            .unwrap();
        let before = dst.count().unwrap();

        let mut editor = map.edit();
        editor.set(Value::Int(150), Value::from("changed"));
        let edited = editor.finalize().unwrap();

        let (tx, rx) = mpsc::channel();
        let stats = pull_chunks(
            vs.chunk_store().as_ref(),
            &dst,
            edited.hash(),
            PullMode::OneAtATime,
            Some(&tx),
            None,
        )
        .unwrap();
        assert!(stats.chunks_copied > 0);
        assert!((stats.chunks_copied as usize) < before);
        assert_closed(&dst, edited.hash());
        // one report per chunk written
        let writes = rx.try_iter().filter(|p| p.done_count > 0).count();
        assert_eq!(writes as u64, stats.chunks_copied);
    }

    #[test]
    fn test_pull_missing_and_cancelled() {
        let src = MemoryChunkStore::new();
        let dst = MemoryChunkStore::new();
        let missing = Hash::of(b"missing");
        assert!(matches!(
            pull_chunks(&src, &dst, missing, PullMode::default(), None, None),
            Err(Error::HashNotFound(h)) if h == missing
        ));

        let (vs, map) = source_map(50);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            pull_chunks(vs.chunk_store().as_ref(), &dst, map.hash(), PullMode::default(), None, Some(&token)),
            Err(Error::Cancelled)
        ));
        assert_eq!(dst.count().unwrap(), 0);
    }
}
