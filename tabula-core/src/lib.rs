//! # Tabula Core
//!
//! Versioned, content-addressed table storage built on prolly trees
//! (probabilistic B-trees).
//!
//! Layers, bottom up:
//!
//! - chunk storage ([`ChunkStore`]) and typed access to it ([`ValueStore`])
//! - the sequence engine: nodes, cursors, chunking and incremental rebuild
//!   ([`Tree`])
//! - collections: [`Map`], [`Set`], [`List`]
//! - tables and snapshots: [`Schema`], [`Row`], [`Table`], [`RootValue`]
//! - the commit graph: [`Commit`], refs, [`Repo`]
//! - diffs: [`TreeDiff`], [`AsyncDiffer`], [`RowDiffSource`]
//! - chunk transfer between stores ([`pull_chunks`])

pub mod async_diff;
pub mod cancel;
pub mod chunk;
pub mod chunker;
pub mod collection;
pub mod commit;
pub mod config;
pub mod cursor;
pub mod diff;
pub mod edits;
pub mod error;
pub mod hash;
pub mod history;
pub mod node;
pub mod pull;
pub mod refs;
pub mod repo;
pub mod root_value;
pub mod row_diff;
pub mod schema;
pub mod store;
pub mod tree;
pub mod value;
pub mod value_store;

// Re-export commonly used types
pub use async_diff::AsyncDiffer;
pub use cancel::CancelToken;
pub use collection::{List, Map, Set};
pub use commit::{AncestorSpec, Commit, CommitBase, CommitMeta, CommitSpec};
pub use config::Config;
pub use cursor::SequenceCursor;
pub use diff::{DiffEvent, DiffStats, TreeDiff};
pub use edits::EditAccumulator;
pub use error::{Error, Result, StoreError, StoreResult};
pub use hash::Hash;
pub use node::{CollectionKind, Entry, Node};
pub use pull::{pull_chunks, PullMode, PullProgress, PullStats};
pub use refs::{DoltRef, FsRefStore, MemoryRefStore, RefStore, RefType};
pub use repo::{FastForward, Repo};
pub use root_value::{RootValue, Table};
pub use row_diff::{BadRowAction, DiffRow, DiffType, RowDiffSource};
pub use schema::{Column, Row, RowConverter, Schema};
pub use store::{create_store_from_spec, ChunkStore, ChunkStoreCache, FileSystemChunkStore, MemoryChunkStore};
pub use tree::Tree;
pub use value::{Struct, Value, ValueKind};
pub use value_store::ValueStore;
