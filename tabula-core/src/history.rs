//! Commit history walks.

use std::collections::HashSet;

use crate::commit::Commit;
use crate::error::Result;
use crate::hash::Hash;
use crate::value_store::ValueStore;

/// Up to `n` distinct commits reachable from `start` (itself included),
/// newest first.
///
/// The walk is depth-first along parents and stops as soon as `n` commits
/// are collected, so with merges the result is not necessarily the `n` most
/// recent commits of the whole graph.
pub fn time_sorted_commits(store: &ValueStore, start: Hash, n: usize) -> Result<Vec<Commit>> {
    let mut commits = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(hash) = stack.pop() {
        if commits.len() >= n {
            break;
        }
        if !visited.insert(hash) {
            continue;
        }
        let commit = Commit::load(store, hash)?;
        // reversed so the first parent is walked first
        stack.extend(commit.parents.iter().rev().filter(|p| !visited.contains(*p)));
        commits.push(commit);
    }

    commits.sort_by(|a, b| {
        b.meta
            .timestamp
            .cmp(&a.meta.timestamp)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    Ok(commits)
}
