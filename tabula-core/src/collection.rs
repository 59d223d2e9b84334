//! Typed Map, Set and List collections over the prolly tree engine.
//!
//! Collections are immutable. Editing goes through an editor that
//! accumulates changes and produces a new collection on `finalize`; the
//! original stays valid and shares every untouched chunk with the result.

use crate::cursor::SequenceCursor;
use crate::edits::EditAccumulator;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::{CollectionKind, Entry};
use crate::tree::Tree;
use crate::value::Value;
use crate::value_store::ValueStore;

fn load_kind(store: &ValueStore, root: Hash, kind: CollectionKind) -> Result<Tree> {
    let tree = Tree::load(store, root)?;
    if tree.kind() != kind {
        return Err(Error::corrupt(
            root,
            format!("expected a {:?}, found a {:?}", kind, tree.kind()),
        ));
    }
    Ok(tree)
}

/// Cursor adapter yielding entries.
pub struct EntryIter {
    cursor: SequenceCursor,
}

impl Iterator for EntryIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }
}

#[derive(Clone)]
pub struct Map {
    tree: Tree,
}

impl Map {
    pub fn new(store: &ValueStore) -> Result<Map> {
        Ok(Map {
            tree: Tree::empty(store, CollectionKind::Map)?,
        })
    }

    pub fn load(store: &ValueStore, root: Hash) -> Result<Map> {
        Ok(Map {
            tree: load_kind(store, root, CollectionKind::Map)?,
        })
    }

    /// Build from pairs in any order; a repeated key keeps its last value.
    pub fn from_entries(
        store: &ValueStore,
        entries: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<Map> {
        let mut acc = EditAccumulator::new(store.edits());
        for (key, value) in entries {
            acc.put(key, value);
        }
        let entries = acc
            .finish()
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| Entry::new(key, v)))
            .collect();
        let (tree, _) = Tree::build(store, CollectionKind::Map, entries)?;
        Ok(Map { tree })
    }

    pub fn hash(&self) -> Hash {
        self.tree.root()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        self.tree.get(key)
    }

    pub fn has(&self, key: &Value) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn first(&self) -> Result<Option<(Value, Value)>> {
        let cursor = self.tree.cursor()?;
        Ok(cursor.current_entry().map(|e| (e.key.clone(), e.value.clone())))
    }

    pub fn last(&self) -> Result<Option<(Value, Value)>> {
        let cursor = self.tree.seek(None, false, true)?;
        Ok(cursor.current_entry().map(|e| (e.key.clone(), e.value.clone())))
    }

    pub fn iter(&self) -> Result<EntryIter> {
        Ok(EntryIter {
            cursor: self.tree.cursor()?,
        })
    }

    /// Entries with keys >= `key`, in order.
    pub fn iter_from(&self, key: &Value) -> Result<EntryIter> {
        Ok(EntryIter {
            cursor: self.tree.seek(Some(key), false, false)?,
        })
    }

    pub fn edit(&self) -> MapEditor {
        MapEditor {
            base: self.clone(),
            edits: EditAccumulator::new(self.tree.store().edits()),
        }
    }
}

pub struct MapEditor {
    base: Map,
    edits: EditAccumulator,
}

impl MapEditor {
    pub fn set(&mut self, key: Value, value: Value) -> &mut Self {
        self.edits.put(key, value);
        self
    }

    pub fn remove(&mut self, key: Value) -> &mut Self {
        self.edits.remove(key);
        self
    }

    /// Pending edits, duplicates included.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn finalize(self) -> Result<Map> {
        let (tree, _) = self.base.tree.apply_edits(self.edits.finish())?;
        Ok(Map { tree })
    }
}

#[derive(Clone)]
pub struct Set {
    tree: Tree,
}

impl Set {
    pub fn new(store: &ValueStore) -> Result<Set> {
        Ok(Set {
            tree: Tree::empty(store, CollectionKind::Set)?,
        })
    }

    pub fn load(store: &ValueStore, root: Hash) -> Result<Set> {
        Ok(Set {
            tree: load_kind(store, root, CollectionKind::Set)?,
        })
    }

    pub fn from_values(store: &ValueStore, values: impl IntoIterator<Item = Value>) -> Result<Set> {
        let mut acc = EditAccumulator::new(store.edits());
        for value in values {
            acc.put(value, Value::Null);
        }
        let entries = acc
            .finish()
            .into_iter()
            .map(|(key, _)| Entry::element(key))
            .collect();
        let (tree, _) = Tree::build(store, CollectionKind::Set, entries)?;
        Ok(Set { tree })
    }

    pub fn hash(&self) -> Hash {
        self.tree.root()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn has(&self, value: &Value) -> Result<bool> {
        Ok(self.tree.get(value)?.is_some())
    }

    pub fn first(&self) -> Result<Option<Value>> {
        Ok(self.tree.cursor()?.current_key().cloned())
    }

    pub fn last(&self) -> Result<Option<Value>> {
        Ok(self.tree.seek(None, false, true)?.current_key().cloned())
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Value>>> {
        Ok(self.tree.cursor()?.map(|e| e.map(|e| e.key)))
    }

    pub fn iter_from(&self, value: &Value) -> Result<impl Iterator<Item = Result<Value>>> {
        Ok(self
            .tree
            .seek(Some(value), false, false)?
            .map(|e| e.map(|e| e.key)))
    }

    pub fn edit(&self) -> SetEditor {
        SetEditor {
            base: self.clone(),
            edits: EditAccumulator::new(self.tree.store().edits()),
        }
    }
}

pub struct SetEditor {
    base: Set,
    edits: EditAccumulator,
}

impl SetEditor {
    pub fn insert(&mut self, value: Value) -> &mut Self {
        self.edits.put(value, Value::Null);
        self
    }

    pub fn remove(&mut self, value: Value) -> &mut Self {
        self.edits.remove(value);
        self
    }

    pub fn finalize(self) -> Result<Set> {
        let (tree, _) = self.base.tree.apply_edits(self.edits.finish())?;
        Ok(Set { tree })
    }
}

/// Positional sequence. Edits rebuild the list in bulk.
#[derive(Clone)]
pub struct List {
    tree: Tree,
}

impl List {
    pub fn new(store: &ValueStore) -> Result<List> {
        Ok(List {
            tree: Tree::empty(store, CollectionKind::List)?,
        })
    }

    pub fn load(store: &ValueStore, root: Hash) -> Result<List> {
        Ok(List {
            tree: load_kind(store, root, CollectionKind::List)?,
        })
    }

    pub fn from_values(store: &ValueStore, values: impl IntoIterator<Item = Value>) -> Result<List> {
        let entries = values.into_iter().map(Entry::element).collect();
        let (tree, _) = Tree::build(store, CollectionKind::List, entries)?;
        Ok(List { tree })
    }

    pub fn hash(&self) -> Hash {
        self.tree.root()
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, index: u64) -> Result<Option<Value>> {
        let cursor = self.tree.cursor_at_index(index)?;
        Ok(cursor.current_key().cloned())
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Value>>> {
        Ok(self.tree.cursor()?.map(|e| e.map(|e| e.key)))
    }

    pub fn edit(&self) -> Result<ListEditor> {
        Ok(ListEditor {
            store: self.tree.store().clone(),
            values: self.iter()?.collect::<Result<_>>()?,
        })
    }
}

pub struct ListEditor {
    store: ValueStore,
    values: Vec<Value>,
}

impl ListEditor {
    /// Position for `index`; `allow_end` also accepts one past the last
    /// element. Errors report the list's current length.
    fn check(&self, index: u64, allow_end: bool) -> Result<usize> {
        let len = self.values.len() as u64;
        if index > len || (index == len && !allow_end) {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(index as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) -> &mut Self {
        self.values.push(value);
        self
    }

    /// Insert before `index`; `index == len` appends.
    pub fn insert(&mut self, index: u64, value: Value) -> Result<&mut Self> {
        let index = self.check(index, true)?;
        self.values.insert(index, value);
        Ok(self)
    }

    pub fn set(&mut self, index: u64, value: Value) -> Result<&mut Self> {
        let index = self.check(index, false)?;
        self.values[index] = value;
        Ok(self)
    }

    pub fn remove(&mut self, index: u64) -> Result<Value> {
        let index = self.check(index, false)?;
        Ok(self.values.remove(index))
    }

    pub fn finalize(self) -> Result<List> {
        List::from_values(&self.store, self.values)
    }
}
