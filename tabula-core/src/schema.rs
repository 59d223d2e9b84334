//! Table schemas, rows and row conversion.
//!
//! Columns are identified by a numeric tag that survives renames, so rows
//! written under one schema version can be read under another. A row is
//! stored in its table's row map as two tuples of `Uint(tag), value` pairs:
//! the key over the primary-key columns in schema order, the value over the
//! remaining columns that are not null.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::value::{Struct, Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub tag: u64,
    pub kind: ValueKind,
    pub is_pk: bool,
    pub nullable: bool,
}

impl Column {
    /// A nullable, non-key column.
    pub fn new(name: impl Into<String>, tag: u64, kind: ValueKind) -> Self {
        Column {
            name: name.into(),
            tag,
            kind,
            is_pk: false,
            nullable: true,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_pk = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn to_value(&self) -> Value {
        Value::Struct(
            Struct::new("Column")
                .with("name", self.name.as_str())
                .with("tag", self.tag)
                .with("kind", self.kind.name())
                .with("is_pk", self.is_pk)
                .with("nullable", self.nullable),
        )
    }

    fn from_value(value: &Value) -> Result<Column> {
        let fields = value
            .as_struct()
            .filter(|s| s.name == "Column")
            .ok_or_else(|| Error::Schema(format!("not a column: {}", value)))?;
        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| Error::Schema(format!("column is missing field '{}'", name)))
        };
        let flag = |name: &str| match field(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::Schema(format!("column field '{}' is {}", name, other))),
        };
        let name = field("name")?
            .as_str()
            .ok_or_else(|| Error::Schema("column name is not a string".to_string()))?;
        let tag = field("tag")?
            .as_uint()
            .ok_or_else(|| Error::Schema("column tag is not a uint".to_string()))?;
        let kind = field("kind")?
            .as_str()
            .ok_or_else(|| Error::Schema("column kind is not a string".to_string()))?
            .parse::<ValueKind>()?;
        Ok(Column {
            name: name.to_string(),
            tag,
            kind,
            is_pk: flag("is_pk")?,
            nullable: flag("nullable")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Validate and build a schema: at least one primary-key column, unique
    /// names and tags, and key columns never nullable.
    pub fn new(columns: Vec<Column>) -> Result<Schema> {
        if !columns.iter().any(|c| c.is_pk) {
            return Err(Error::Schema("schema needs a primary key column".to_string()));
        }
        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(Error::Schema("column name is empty".to_string()));
            }
            if !names.insert(column.name.as_str()) {
                return Err(Error::Schema(format!("duplicate column name '{}'", column.name)));
            }
            if !tags.insert(column.tag) {
                return Err(Error::Schema(format!("duplicate column tag {}", column.tag)));
            }
            if column.is_pk && column.nullable {
                return Err(Error::Schema(format!(
                    "primary key column '{}' cannot be nullable",
                    column.name
                )));
            }
        }
        Ok(Schema { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_pk)
    }

    pub fn non_pk_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_pk)
    }

    pub fn by_tag(&self, tag: u64) -> Option<&Column> {
        self.columns.iter().find(|c| c.tag == tag)
    }

    pub fn by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns of `self` followed by the columns of `other` whose tags are
    /// new. Used as the output schema when diffing across schema versions.
    pub fn union(&self, other: &Schema) -> Result<Schema> {
        let mut columns = self.columns.clone();
        for column in &other.columns {
            match self.by_tag(column.tag) {
                Some(existing) if existing.kind != column.kind => {
                    return Err(Error::Schema(format!(
                        "column tag {} is {} in one schema and {} in the other",
                        column.tag, existing.kind, column.kind
                    )));
                }
                Some(_) => {}
                None => columns.push(column.clone()),
            }
        }
        Schema::new(columns)
    }

    pub fn to_value(&self) -> Value {
        let columns = self.columns.iter().map(Column::to_value).collect::<Vec<_>>();
        Value::Struct(Struct::new("Schema").with("columns", columns))
    }

    pub fn from_value(value: &Value) -> Result<Schema> {
        let columns = value
            .as_struct()
            .filter(|s| s.name == "Schema")
            .and_then(|s| s.get("columns"))
            .and_then(Value::as_tuple)
            .ok_or_else(|| Error::Schema(format!("not a schema: {}", value)))?;
        Schema::new(
            columns
                .iter()
                .map(Column::from_value)
                .collect::<Result<_>>()?,
        )
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", column.name, column.kind)?;
            if column.is_pk {
                write!(f, " PRIMARY KEY")?;
            } else if !column.nullable {
                write!(f, " NOT NULL")?;
            }
        }
        Ok(())
    }
}

/// Column values by tag. Absent tags are null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: BTreeMap<u64, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = (u64, Value)>) -> Self {
        let mut row = Row::new();
        for (tag, value) in values {
            row.set(tag, value);
        }
        row
    }

    pub fn get(&self, tag: u64) -> Option<&Value> {
        self.values.get(&tag)
    }

    /// Setting `Null` clears the column.
    pub fn set(&mut self, tag: u64, value: Value) {
        if value.is_null() {
            self.values.remove(&tag);
        } else {
            self.values.insert(tag, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Value)> {
        self.values.iter().map(|(tag, value)| (*tag, value))
    }

    /// Decode a row-map entry.
    pub fn from_kv(key: &Value, value: &Value) -> Result<Row> {
        let mut row = Row::new();
        for tuple in [key, value] {
            let items = tuple
                .as_tuple()
                .ok_or_else(|| Error::BadRow(format!("row data is not a tuple: {}", tuple)))?;
            if items.len() % 2 != 0 {
                return Err(Error::BadRow(format!("odd number of row items in {}", tuple)));
            }
            for pair in items.chunks(2) {
                let tag = pair[0]
                    .as_uint()
                    .ok_or_else(|| Error::BadRow(format!("row tag is not a uint: {}", pair[0])))?;
                row.set(tag, pair[1].clone());
            }
        }
        Ok(row)
    }

    /// Encode as a row-map entry, checking it against `schema`.
    pub fn to_kv(&self, schema: &Schema) -> Result<(Value, Value)> {
        for (tag, value) in &self.values {
            let column = schema
                .by_tag(*tag)
                .ok_or_else(|| Error::BadRow(format!("no column with tag {}", tag)))?;
            if value.kind() != column.kind {
                return Err(Error::BadRow(format!(
                    "column '{}' expects {} but got {}",
                    column.name,
                    column.kind,
                    value.kind()
                )));
            }
        }

        let mut key = Vec::new();
        for column in schema.pk_columns() {
            let value = self.get(column.tag).ok_or_else(|| {
                Error::BadRow(format!("primary key column '{}' is missing", column.name))
            })?;
            key.push(Value::Uint(column.tag));
            key.push(value.clone());
        }

        let mut value = Vec::new();
        for column in schema.non_pk_columns() {
            match self.get(column.tag) {
                Some(v) => {
                    value.push(Value::Uint(column.tag));
                    value.push(v.clone());
                }
                None if !column.nullable => {
                    return Err(Error::BadRow(format!(
                        "column '{}' may not be null",
                        column.name
                    )));
                }
                None => {}
            }
        }
        Ok((Value::Tuple(key), Value::Tuple(value)))
    }

    /// Key tuple alone, for lookups.
    pub fn key_for(schema: &Schema, pk_values: &[Value]) -> Result<Value> {
        let pk: Vec<&Column> = schema.pk_columns().collect();
        if pk.len() != pk_values.len() {
            return Err(Error::BadRow(format!(
                "expected {} key values, got {}",
                pk.len(),
                pk_values.len()
            )));
        }
        let mut key = Vec::with_capacity(pk.len() * 2);
        for (column, value) in pk.into_iter().zip(pk_values) {
            key.push(Value::Uint(column.tag));
            key.push(value.clone());
        }
        Ok(Value::Tuple(key))
    }
}

/// Maps rows from a source schema onto a destination schema by column tag.
#[derive(Debug, Clone)]
pub struct RowConverter {
    src: Schema,
    dest: Schema,
    identity: bool,
}

impl RowConverter {
    /// Fails when a tag shared by both schemas changes kind.
    pub fn new(src: &Schema, dest: &Schema) -> Result<RowConverter> {
        for column in src.columns() {
            if let Some(other) = dest.by_tag(column.tag) {
                if other.kind != column.kind {
                    return Err(Error::Schema(format!(
                        "cannot convert column '{}' from {} to {}",
                        column.name, column.kind, other.kind
                    )));
                }
            }
        }
        Ok(RowConverter {
            identity: src == dest,
            src: src.clone(),
            dest: dest.clone(),
        })
    }

    pub fn identity(schema: &Schema) -> RowConverter {
        RowConverter {
            src: schema.clone(),
            dest: schema.clone(),
            identity: true,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn src_schema(&self) -> &Schema {
        &self.src
    }

    pub fn dest_schema(&self) -> &Schema {
        &self.dest
    }

    /// Keep the columns the destination knows; a value whose kind differs
    /// from its column is a bad row.
    pub fn convert(&self, row: &Row) -> Result<Row> {
        let mut out = Row::new();
        for (tag, value) in row.iter() {
            let column = match self.dest.by_tag(tag) {
                Some(column) => column,
                None => continue,
            };
            if value.kind() != column.kind {
                return Err(Error::BadRow(format!(
                    "column '{}' expects {} but got {}",
                    column.name,
                    column.kind,
                    value.kind()
                )));
            }
            out.set(tag, value.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Schema {
        Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("name", 1, ValueKind::String).not_null(),
            Column::new("age", 2, ValueKind::Uint),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_validation() {
        assert!(Schema::new(vec![Column::new("a", 0, ValueKind::Int)]).is_err());
        assert!(Schema::new(vec![
            Column::new("a", 0, ValueKind::Int).primary_key(),
            Column::new("a", 1, ValueKind::Int),
        ])
        .is_err());
        assert!(Schema::new(vec![
            Column::new("a", 0, ValueKind::Int).primary_key(),
            Column::new("b", 0, ValueKind::Int),
        ])
        .is_err());
    }

    #[test]
    fn test_schema_value_roundtrip() {
        let schema = people();
        assert_eq!(Schema::from_value(&schema.to_value()).unwrap(), schema);
        assert!(Schema::from_value(&Value::Int(3)).is_err());
        assert_eq!(schema.to_string(), "id int PRIMARY KEY, name string NOT NULL, age uint");
    }

    #[test]
    fn test_row_kv() {
        let schema = people();
        let row = Row::from_values([
            (0, Value::Int(7)),
            (1, Value::from("Ada")),
            (2, Value::Null),
        ]);
        let (key, value) = row.to_kv(&schema).unwrap();
        assert_eq!(key, Value::Tuple(vec![Value::Uint(0), Value::Int(7)]));
        assert_eq!(value, Value::Tuple(vec![Value::Uint(1), Value::from("Ada")]));
        assert_eq!(Row::from_kv(&key, &value).unwrap(), row);
        assert_eq!(Row::key_for(&schema, &[Value::Int(7)]).unwrap(), key);
    }

    #[test]
    fn test_row_kv_rejects_bad_rows() {
        let schema = people();
        let missing_key = Row::from_values([(1, Value::from("Ada"))]);
        assert!(matches!(missing_key.to_kv(&schema), Err(Error::BadRow(_))));

        let missing_required = Row::from_values([(0, Value::Int(1))]);
        assert!(matches!(missing_required.to_kv(&schema), Err(Error::BadRow(_))));

        let wrong_kind = Row::from_values([(0, Value::from("x")), (1, Value::from("Ada"))]);
        assert!(matches!(wrong_kind.to_kv(&schema), Err(Error::BadRow(_))));

        assert!(Row::from_kv(&Value::Int(1), &Value::Tuple(vec![])).is_err());
    }

    #[test]
    fn test_row_converter() {
        let old = people();
        let new = Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("full_name", 1, ValueKind::String).not_null(),
            Column::new("email", 3, ValueKind::String),
        ])
        .unwrap();
        let conv = RowConverter::new(&old, &new).unwrap();
        assert!(!conv.is_identity());

        let row = Row::from_values([(0, Value::Int(1)), (1, Value::from("Ada")), (2, Value::Uint(36))]);
        let converted = conv.convert(&row).unwrap();
        assert_eq!(converted.get(1), Some(&Value::from("Ada")));
        assert_eq!(converted.get(2), None);

        let union = old.union(&new).unwrap();
        assert_eq!(union.columns().len(), 4);
        assert!(RowConverter::identity(&old).is_identity());

        let clash = Schema::new(vec![Column::new("id", 0, ValueKind::String).primary_key()]).unwrap();
        assert!(RowConverter::new(&old, &clash).is_err());
    }
}
