//! Diff algorithm for prolly trees.
//!
//! Walks two Map/Set trees in key order and reports what changed, skipping
//! any subtree whose hash appears at the same position on both sides.
//! Results stream out of an iterator, so a consumer can stop early or hand
//! them to another thread (see [`AsyncDiffer`](crate::async_diff::AsyncDiffer)).

use std::cmp::Ordering;

use crate::cancel::CancelToken;
use crate::collection::Map;
use crate::cursor::SequenceCursor;
use crate::error::Result;
use crate::tree::Tree;
use crate::value::Value;

/// Change between two trees, for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEvent {
    Added { key: Value, value: Value },
    Removed { key: Value, value: Value },
    Modified { key: Value, old: Value, new: Value },
}

impl DiffEvent {
    pub fn key(&self) -> &Value {
        match self {
            DiffEvent::Added { key, .. }
            | DiffEvent::Removed { key, .. }
            | DiffEvent::Modified { key, .. } => key,
        }
    }
}

/// Statistics from a diff operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub subtrees_skipped: u64,
    pub entries_compared: u64,
}

/// Streaming diff between two trees.
///
/// ```ignore
/// for event in TreeDiff::new(&old, &new, None)? {
///     match event? {
///         DiffEvent::Added { key, .. } => println!("+ {}", key),
///         DiffEvent::Removed { key, .. } => println!("- {}", key),
///         DiffEvent::Modified { key, .. } => println!("M {}", key),
///     }
/// }
/// ```
pub struct TreeDiff {
    old: SequenceCursor,
    new: SequenceCursor,
    cancel: Option<CancelToken>,
    stats: DiffStats,
    done: bool,
}

impl TreeDiff {
    pub fn new(old: &Tree, new: &Tree, cancel: Option<CancelToken>) -> Result<Self> {
        let mut stats = DiffStats::default();
        let done = old.root() == new.root();
        if done {
            stats.subtrees_skipped += 1;
        }
        Ok(TreeDiff {
            old: old.cursor()?,
            new: new.cursor()?,
            cancel,
            stats,
            done,
        })
    }

    pub fn maps(old: &Map, new: &Map, cancel: Option<CancelToken>) -> Result<Self> {
        Self::new(old.tree(), new.tree(), cancel)
    }

    /// Updated as the walk progresses.
    pub fn stats(&self) -> DiffStats {
        self.stats
    }

    /// Skip the largest subtree that starts at the current position on both
    /// sides with the same hash.
    fn skip_shared_subtree(&mut self) -> Result<bool> {
        let old_starts = self.old.subtree_starts();
        if old_starts.is_empty() {
            return Ok(false);
        }
        let new_starts = self.new.subtree_starts();
        // index is the chunk's level, so equal hashes sit at equal indexes
        for (levels_up, hash) in old_starts.iter().enumerate().rev() {
            if new_starts.get(levels_up) == Some(hash) {
                self.old.skip_subtree(levels_up)?;
                self.new.skip_subtree(levels_up)?;
                self.stats.subtrees_skipped += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next_event(&mut self) -> Result<Option<DiffEvent>> {
        loop {
            if let Some(token) = &self.cancel {
                token.check()?;
            }
            if self.old.valid() && self.new.valid() && self.skip_shared_subtree()? {
                continue;
            }

            let (event, advance_old, advance_new) =
                match (self.old.current_entry(), self.new.current_entry()) {
                    (None, None) => return Ok(None),
                    (Some(o), None) => (
                        Some(DiffEvent::Removed {
                            key: o.key.clone(),
                            value: o.value.clone(),
                        }),
                        true,
                        false,
                    ),
                    (None, Some(n)) => (
                        Some(DiffEvent::Added {
                            key: n.key.clone(),
                            value: n.value.clone(),
                        }),
                        false,
                        true,
                    ),
                    (Some(o), Some(n)) => {
                        self.stats.entries_compared += 1;
                        match o.key.cmp(&n.key) {
                            Ordering::Less => (
                                Some(DiffEvent::Removed {
                                    key: o.key.clone(),
                                    value: o.value.clone(),
                                }),
                                true,
                                false,
                            ),
                            Ordering::Greater => (
                                Some(DiffEvent::Added {
                                    key: n.key.clone(),
                                    value: n.value.clone(),
                                }),
                                false,
                                true,
                            ),
                            Ordering::Equal if o.value == n.value => (None, true, true),
                            Ordering::Equal => (
                                Some(DiffEvent::Modified {
                                    key: o.key.clone(),
                                    old: o.value.clone(),
                                    new: n.value.clone(),
                                }),
                                true,
                                true,
                            ),
                        }
                    }
                };

            if advance_old {
                self.old.advance()?;
            }
            if advance_new {
                self.new.advance()?;
            }
            if event.is_some() {
                return Ok(event);
            }
        }
    }
}

impl Iterator for TreeDiff {
    type Item = Result<DiffEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
