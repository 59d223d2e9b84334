//! Root values and tables.
//!
//! A [`RootValue`] is one snapshot of a database: a Map from table name to a
//! reference to a [`Table`] struct. A table holds a reference to its schema
//! and a reference to its row Map. Both are stored as standalone value
//! chunks, so a snapshot is a value tree of value trees.

use crate::chunk::Chunk;
use crate::collection::Map;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::schema::{Row, Schema};
use crate::value::{Struct, Value};
use crate::value_store::ValueStore;

pub const ROOT_VALUE_STRUCT: &str = "RootValue";
pub const TABLE_STRUCT: &str = "Table";

fn ref_field(value: &Value, struct_name: &str, field: &str) -> Option<Hash> {
    value
        .as_struct()
        .filter(|s| s.name == struct_name)
        .and_then(|s| s.get(field))
        .and_then(Value::as_ref_hash)
}

#[derive(Clone)]
pub struct Table {
    schema: Schema,
    rows: Map,
}

impl Table {
    pub fn new(store: &ValueStore, schema: Schema) -> Result<Table> {
        Ok(Table {
            schema,
            rows: Map::new(store)?,
        })
    }

    pub fn from_rows(
        store: &ValueStore,
        schema: Schema,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<Table> {
        let entries = rows
            .into_iter()
            .map(|row| row.to_kv(&schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table {
            rows: Map::from_entries(store, entries)?,
            schema,
        })
    }

    pub fn load(store: &ValueStore, hash: Hash) -> Result<Table> {
        let value = store.read_value(&hash)?;
        let (schema_hash, rows_hash) = match (
            ref_field(&value, TABLE_STRUCT, "schema"),
            ref_field(&value, TABLE_STRUCT, "rows"),
        ) {
            (Some(s), Some(r)) => (s, r),
            _ => return Err(Error::corrupt(hash, "expected a table")),
        };
        Ok(Table {
            schema: Schema::from_value(&store.read_value(&schema_hash)?)?,
            rows: Map::load(store, rows_hash)?,
        })
    }

    /// Store the schema and table structs; returns the table's address.
    pub fn write(&self, store: &ValueStore) -> Result<Hash> {
        let schema_hash = store.write_value(&self.schema.to_value())?;
        store.write_value(&Value::Struct(
            Struct::new(TABLE_STRUCT)
                .with("schema", schema_hash)
                .with("rows", self.rows.hash()),
        ))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &Map {
        &self.rows
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len()
    }

    pub fn with_rows(&self, rows: Map) -> Table {
        Table {
            schema: self.schema.clone(),
            rows,
        }
    }

    pub fn get_row(&self, pk_values: &[Value]) -> Result<Option<Row>> {
        let key = Row::key_for(&self.schema, pk_values)?;
        match self.rows.get(&key)? {
            Some(value) => Ok(Some(Row::from_kv(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite rows by primary key.
    pub fn put_rows(&self, rows: impl IntoIterator<Item = Row>) -> Result<Table> {
        let mut editor = self.rows.edit();
        for row in rows {
            let (key, value) = row.to_kv(&self.schema)?;
            editor.set(key, value);
        }
        Ok(self.with_rows(editor.finalize()?))
    }

    pub fn delete_rows(&self, pks: impl IntoIterator<Item = Vec<Value>>) -> Result<Table> {
        let mut editor = self.rows.edit();
        for pk in pks {
            editor.remove(Row::key_for(&self.schema, &pk)?);
        }
        Ok(self.with_rows(editor.finalize()?))
    }
}

#[derive(Clone)]
pub struct RootValue {
    store: ValueStore,
    tables: Map,
}

impl std::fmt::Debug for RootValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootValue").finish_non_exhaustive()
    }
}

impl RootValue {
    pub fn empty(store: &ValueStore) -> Result<RootValue> {
        Ok(RootValue {
            store: store.clone(),
            tables: Map::new(store)?,
        })
    }

    /// True when `value` has the shape of a root value.
    pub fn is_root_value(value: &Value) -> bool {
        ref_field(value, ROOT_VALUE_STRUCT, "tables").is_some()
    }

    /// Read a root value, failing with `NotARootValue` if the chunk holds
    /// something else.
    pub fn load(store: &ValueStore, hash: Hash) -> Result<RootValue> {
        let value = match store.read_chunk(&hash)? {
            Chunk::Value(value) => value,
            Chunk::Node(_) => return Err(Error::NotARootValue(hash)),
        };
        let tables = ref_field(&value, ROOT_VALUE_STRUCT, "tables")
            .ok_or(Error::NotARootValue(hash))?;
        Ok(RootValue {
            store: store.clone(),
            tables: Map::load(store, tables)?,
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Struct(Struct::new(ROOT_VALUE_STRUCT).with("tables", self.tables.hash()))
    }

    pub fn write(&self) -> Result<Hash> {
        self.store.write_value(&self.to_value())
    }

    /// Address this root value has once written.
    pub fn hash(&self) -> Result<Hash> {
        self.to_value().hash()
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        self.tables.has(&Value::from(name))
    }

    pub fn table_hash(&self, name: &str) -> Result<Option<Hash>> {
        Ok(self
            .tables
            .get(&Value::from(name))?
            .and_then(|v| v.as_ref_hash()))
    }

    pub fn get_table(&self, name: &str) -> Result<Option<Table>> {
        match self.table_hash(name)? {
            Some(hash) => Ok(Some(Table::load(&self.store, hash)?)),
            None => Ok(None),
        }
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.tables
            .iter()?
            .map(|entry| {
                let entry = entry?;
                entry
                    .key
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::corrupt(self.tables.hash(), "table name is not a string"))
            })
            .collect()
    }

    pub fn put_table(&self, name: &str, table: &Table) -> Result<RootValue> {
        let hash = table.write(&self.store)?;
        let mut editor = self.tables.edit();
        editor.set(Value::from(name), Value::Ref(hash));
        Ok(RootValue {
            store: self.store.clone(),
            tables: editor.finalize()?,
        })
    }

    /// Fails with `TableNotFound` if any name is absent.
    pub fn remove_tables(&self, names: &[&str]) -> Result<RootValue> {
        let mut editor = self.tables.edit();
        for name in names {
            if !self.has_table(name)? {
                return Err(Error::TableNotFound(name.to_string()));
            }
            editor.remove(Value::from(*name));
        }
        Ok(RootValue {
            store: self.store.clone(),
            tables: editor.finalize()?,
        })
    }

    /// Take the named tables as they are in `other`; names missing there are
    /// removed here.
    pub fn update_tables_from_other(&self, names: &[&str], other: &RootValue) -> Result<RootValue> {
        let mut editor = self.tables.edit();
        for name in names {
            match other.table_hash(name)? {
                Some(hash) => editor.set(Value::from(*name), Value::Ref(hash)),
                None => editor.remove(Value::from(*name)),
            };
        }
        Ok(RootValue {
            store: self.store.clone(),
            tables: editor.finalize()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::Column;
    use crate::store::MemoryChunkStore;
    use crate::value::ValueKind;
    use std::sync::Arc;

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(MemoryChunkStore::new()), &Config::default())
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("name", 1, ValueKind::String),
        ])
        .unwrap()
    }

    fn person(id: i64, name: &str) -> Row {
        Row::from_values([(0, Value::Int(id)), (1, Value::from(name))])
    }

    #[test]
    fn test_table_rows() {
        let store = store();
        let table = Table::from_rows(&store, schema(), vec![person(1, "Ada"), person(2, "Bob")]).unwrap();
        assert_eq!(table.row_count(), 2);

        let table = table.put_rows(vec![person(2, "Bea"), person(3, "Cy")]).unwrap();
        assert_eq!(table.row_count(), 3);
        let row = table.get_row(&[Value::Int(2)]).unwrap().unwrap();
        assert_eq!(row.get(1), Some(&Value::from("Bea")));

        let table = table.delete_rows(vec![vec![Value::Int(1)]]).unwrap();
        assert!(table.get_row(&[Value::Int(1)]).unwrap().is_none());

        let hash = table.write(&store).unwrap();
        let loaded = Table::load(&store, hash).unwrap();
        assert_eq!(loaded.schema(), table.schema());
        assert_eq!(loaded.rows().hash(), table.rows().hash());
    }

    #[test]
    fn test_root_value_tables() {
        let store = store();
        let root = RootValue::empty(&store).unwrap();
        assert!(root.table_names().unwrap().is_empty());

        let table = Table::new(&store, schema()).unwrap();
        let root = root.put_table("people", &table).unwrap();
        let root = root.put_table("animals", &table).unwrap();
        assert_eq!(root.table_names().unwrap(), vec!["animals", "people"]);
        assert!(root.has_table("people").unwrap());
        assert!(root.get_table("plants").unwrap().is_none());

        let hash = root.write().unwrap();
        assert_eq!(hash, root.hash().unwrap());
        let loaded = RootValue::load(&store, hash).unwrap();
        assert_eq!(loaded.table_names().unwrap(), root.table_names().unwrap());

        let pruned = loaded.remove_tables(&["animals"]).unwrap();
        assert_eq!(pruned.table_names().unwrap(), vec!["people"]);
        assert!(matches!(
            pruned.remove_tables(&["animals"]),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_update_tables_from_other() {
        let store = store();
        let base = RootValue::empty(&store).unwrap();
        let empty = Table::new(&store, schema()).unwrap();
        let filled = Table::from_rows(&store, schema(), vec![person(1, "Ada")]).unwrap();

        let ours = base.put_table("a", &empty).unwrap().put_table("b", &empty).unwrap();
        let theirs = base.put_table("a", &filled).unwrap();

        let merged = ours.update_tables_from_other(&["a", "b"], &theirs).unwrap();
        assert_eq!(merged.table_names().unwrap(), vec!["a"]);
        assert_eq!(merged.get_table("a").unwrap().unwrap().row_count(), 1);
    }

    #[test]
    fn test_load_rejects_other_values() {
        let store = store();
        let hash = store.write_value(&Value::from("not a root")).unwrap();
        assert!(matches!(RootValue::load(&store, hash), Err(Error::NotARootValue(_))));
        let missing = Hash::of(b"nothing");
        assert!(RootValue::load(&store, missing).unwrap_err().is_not_found());
    }
}
