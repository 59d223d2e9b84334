//! Immutable, orderable values.
//!
//! Every datum stored in tabula is a [`Value`]. Values have a canonical bincode
//! encoding, a content hash over that encoding, and a total order: values of
//! the same kind compare naturally, values of different kinds compare by
//! [`ValueKind`] tag. Collections appear inside values as [`Value::Ref`] to
//! their root chunk.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::chunk::ChunkRef;
use crate::error::{Error, Result};
use crate::hash::Hash;

/// Kind tag of a value. Declaration order is the cross-kind sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Uint,
    Float,
    String,
    Uuid,
    Blob,
    Ref,
    Tuple,
    Struct,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Uint => "uint",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Uuid => "uuid",
            ValueKind::Blob => "blob",
            ValueKind::Ref => "ref",
            ValueKind::Tuple => "tuple",
            ValueKind::Struct => "struct",
        }
    }

    /// Parse a textual literal as a value of this kind.
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        let bad = || Error::Schema(format!("cannot parse '{}' as {}", text, self.name()));
        let value = match self {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => Value::Bool(text.parse().map_err(|_| bad())?),
            ValueKind::Int => Value::Int(text.parse().map_err(|_| bad())?),
            ValueKind::Uint => Value::Uint(text.parse().map_err(|_| bad())?),
            ValueKind::Float => Value::Float(text.parse().map_err(|_| bad())?),
            ValueKind::String => Value::String(text.to_string()),
            ValueKind::Uuid => Value::Uuid(Uuid::parse_str(text).map_err(|_| bad())?),
            ValueKind::Blob => Value::Blob(hex::decode(text).map_err(|_| bad())?),
            ValueKind::Ref => Value::Ref(Hash::from_hex(text).map_err(|_| bad())?),
            ValueKind::Tuple | ValueKind::Struct => return Err(bad()),
        };
        Ok(value)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "null" => ValueKind::Null,
            "bool" | "boolean" => ValueKind::Bool,
            "int" | "integer" => ValueKind::Int,
            "uint" => ValueKind::Uint,
            "float" | "double" => ValueKind::Float,
            "string" | "text" => ValueKind::String,
            "uuid" => ValueKind::Uuid,
            "blob" => ValueKind::Blob,
            "ref" => ValueKind::Ref,
            other => return Err(Error::Schema(format!("unknown column kind '{}'", other))),
        };
        Ok(kind)
    }
}

/// A named record with fields kept in name order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Struct {
    pub name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Struct {
    pub fn new(name: impl Into<String>) -> Self {
        Struct {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    Blob(Vec<u8>),
    Ref(Hash),
    Tuple(Vec<Value>),
    Struct(Struct),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Blob(_) => ValueKind::Blob,
            Value::Ref(_) => ValueKind::Ref,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Struct(_) => ValueKind::Struct,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical bytes of this value on its own.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Value> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Address this value would have when written as a standalone chunk.
    pub fn hash(&self) -> Result<Hash> {
        Ok(Hash::of(&ChunkRef::Value(self).encode()?))
    }

    /// Visit every chunk address this value refers to.
    pub fn walk_refs(&self, f: &mut dyn FnMut(Hash)) {
        match self {
            Value::Ref(h) => f(*h),
            Value::Tuple(items) => items.iter().for_each(|v| v.walk_refs(f)),
            Value::Struct(s) => s.fields.values().for_each(|v| v.walk_refs(f)),
            _ => {}
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_ref_hash(&self) -> Option<Hash> {
        match self {
            Value::Ref(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (Value::Struct(a), Value::Struct(b)) => a.cmp(b),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Ref(h) => write!(f, "#{}", h.short()),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Value::Struct(s) => {
                write!(f, "{} {{", s.name)?;
                for (i, (name, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {}: {}", name, value)?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Uint(u)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Hash> for Value {
    fn from(h: Hash) -> Self {
        Value::Ref(h)
    }
}

impl From<Struct> for Value {
    fn from(s: Struct) -> Self {
        Value::Struct(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Tuple(items)
    }
}
