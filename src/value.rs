//! # Boundary Value Model
//!
//! Every value that enters or leaves the dispatch layer is a [`BoundaryValue`]: a closed
//! tagged union over the shapes two independently-typed runtimes can agree on.
//!
//! ## Overview
//!
//! | Variant | Host type | JSON projection |
//! |---------|-----------|-----------------|
//! | `Null` | `()` / `None` | `null` |
//! | `Bool` | `bool` | `true` / `false` |
//! | `Int` | `i64` | integer |
//! | `Float` | `f64` | number (finite only) |
//! | `Str` | `String` | string |
//! | `List` | `Vec<BoundaryValue>` | array |
//! | `Map` | [`BoundaryMap`] | object |
//! | `Bytes` | `bytes::Bytes` | base64 string |
//!
//! Projections are explicit. Host values go in through `From`/`TryFrom` and come back out
//! through [`FromBoundary`], which never coerces across variants: an `Int` is not a `Float`,
//! `false` is not `0`, and `Null` is not an empty string. An *absent* value is modelled one
//! level up as `Option<BoundaryValue>::None` (see [`crate::request::Request::body`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtdispatch::value::{BoundaryMap, BoundaryValue};
//!
//! let mut order = BoundaryMap::new();
//! order.insert("price", 19.99);
//! order.insert("tax", 2.50);
//! let value = BoundaryValue::Map(order);
//!
//! let price: f64 = value.get("price").unwrap().extract()?;
//! assert_eq!(price, 19.99);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Discriminant of a [`BoundaryValue`], used in error messages and type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Bytes,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to move a value into or out of the boundary model.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// Integer does not fit in a signed 64-bit slot
    IntegerOutOfRange { value: String },
    /// NaN or infinity has no JSON representation
    NonFiniteFloat { value: f64 },
    /// The value has a different variant than the host type requires
    TypeMismatch {
        expected: &'static str,
        found: ValueKind,
    },
    /// serde failed while bridging to or from a host type
    Serde { message: String },
}

impl fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionError::IntegerOutOfRange { value } => {
                write!(f, "integer {value} is outside the signed 64-bit range")
            }
            ProjectionError::NonFiniteFloat { value } => {
                write!(f, "float {value} cannot be represented as JSON")
            }
            ProjectionError::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            ProjectionError::Serde { message } => write!(f, "projection failed: {message}"),
        }
    }
}

impl std::error::Error for ProjectionError {}

/// The closed value universe shared by both sides of the boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BoundaryValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<BoundaryValue>),
    Map(BoundaryMap),
    Bytes(Bytes),
}

impl BoundaryValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            BoundaryValue::Null => ValueKind::Null,
            BoundaryValue::Bool(_) => ValueKind::Bool,
            BoundaryValue::Int(_) => ValueKind::Int,
            BoundaryValue::Float(_) => ValueKind::Float,
            BoundaryValue::Str(_) => ValueKind::Str,
            BoundaryValue::List(_) => ValueKind::List,
            BoundaryValue::Map(_) => ValueKind::Map,
            BoundaryValue::Bytes(_) => ValueKind::Bytes,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, BoundaryValue::Null)
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, BoundaryValue::Bool(_))
    }

    #[must_use]
    pub fn is_int(&self) -> bool {
        matches!(self, BoundaryValue::Int(_))
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, BoundaryValue::Float(_))
    }

    #[must_use]
    pub fn is_str(&self) -> bool {
        matches!(self, BoundaryValue::Str(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BoundaryValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BoundaryValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            BoundaryValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BoundaryValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[BoundaryValue]> {
        match self {
            BoundaryValue::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BoundaryMap> {
        match self {
            BoundaryValue::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            BoundaryValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BoundaryValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Project out into a host type without cross-variant coercion.
    pub fn extract<T: FromBoundary>(&self) -> Result<T, ProjectionError> {
        T::from_boundary(self)
    }

    /// Build a value from parsed JSON.
    ///
    /// Integers that fit in `i64` become `Int`; every other number becomes `Float`.
    /// Unsigned integers above `i64::MAX` are rejected rather than rounded.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ProjectionError> {
        Ok(match value {
            serde_json::Value::Null => BoundaryValue::Null,
            serde_json::Value::Bool(b) => BoundaryValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BoundaryValue::Int(i)
                } else if n.is_u64() {
                    return Err(ProjectionError::IntegerOutOfRange {
                        value: n.to_string(),
                    });
                } else {
                    // Non-integral numbers always fit f64 without arbitrary_precision
                    BoundaryValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => BoundaryValue::Str(s),
            serde_json::Value::Array(items) => BoundaryValue::List(
                items
                    .into_iter()
                    .map(BoundaryValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(obj) => {
                let mut map = BoundaryMap::with_capacity(obj.len());
                for (k, v) in obj {
                    map.insert(k, BoundaryValue::from_json(v)?);
                }
                BoundaryValue::Map(map)
            }
        })
    }

    /// Project to JSON. Bytes become standard base64 strings.
    pub fn to_json(&self) -> Result<serde_json::Value, ProjectionError> {
        Ok(match self {
            BoundaryValue::Null => serde_json::Value::Null,
            BoundaryValue::Bool(b) => serde_json::Value::Bool(*b),
            BoundaryValue::Int(i) => serde_json::Value::from(*i),
            BoundaryValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(ProjectionError::NonFiniteFloat { value: *f })?,
            BoundaryValue::Str(s) => serde_json::Value::String(s.clone()),
            BoundaryValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(BoundaryValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            BoundaryValue::Map(map) => {
                let mut obj = serde_json::Map::with_capacity(map.len());
                for (k, v) in map.iter() {
                    obj.insert(k.to_string(), v.to_json()?);
                }
                serde_json::Value::Object(obj)
            }
            BoundaryValue::Bytes(b) => serde_json::Value::String(STANDARD.encode(b)),
        })
    }

    /// Bridge any serde-serializable host type into the model.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ProjectionError> {
        let json = serde_json::to_value(value).map_err(|e| ProjectionError::Serde {
            message: e.to_string(),
        })?;
        BoundaryValue::from_json(json)
    }

    /// Bridge the model into any serde-deserializable host type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, ProjectionError> {
        let json = self.to_json()?;
        serde_json::from_value(json).map_err(|e| ProjectionError::Serde {
            message: e.to_string(),
        })
    }
}

/// Insertion-ordered map with unique string keys.
///
/// Inserting an existing key replaces its value in place and keeps the original position.
#[derive(Clone, Default)]
pub struct BoundaryMap {
    entries: Vec<(String, BoundaryValue)>,
    index: HashMap<String, usize>,
}

impl BoundaryMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a value, returning the previous value for the key if any.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<BoundaryValue>,
    ) -> Option<BoundaryValue> {
        let key = key.into();
        let value = value.into();
        if let Some(&pos) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[pos].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BoundaryValue> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<BoundaryValue> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundaryValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl fmt::Debug for BoundaryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for BoundaryMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Into<String>, V: Into<BoundaryValue>> FromIterator<(K, V)> for BoundaryMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = BoundaryMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for BoundaryMap {
    type Item = (String, BoundaryValue);
    type IntoIter = std::vec::IntoIter<(String, BoundaryValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// --- host → boundary ---

impl From<()> for BoundaryValue {
    fn from(_: ()) -> Self {
        BoundaryValue::Null
    }
}

impl From<bool> for BoundaryValue {
    fn from(b: bool) -> Self {
        BoundaryValue::Bool(b)
    }
}

macro_rules! from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for BoundaryValue {
            fn from(i: $t) -> Self {
                BoundaryValue::Int(i64::from(i))
            }
        })*
    };
}

from_signed!(i8, i16, i32, i64, u16, u32);

impl TryFrom<u64> for BoundaryValue {
    type Error = ProjectionError;

    fn try_from(u: u64) -> Result<Self, Self::Error> {
        i64::try_from(u)
            .map(BoundaryValue::Int)
            .map_err(|_| ProjectionError::IntegerOutOfRange {
                value: u.to_string(),
            })
    }
}

impl TryFrom<usize> for BoundaryValue {
    type Error = ProjectionError;

    fn try_from(u: usize) -> Result<Self, Self::Error> {
        i64::try_from(u)
            .map(BoundaryValue::Int)
            .map_err(|_| ProjectionError::IntegerOutOfRange {
                value: u.to_string(),
            })
    }
}

impl From<f32> for BoundaryValue {
    fn from(f: f32) -> Self {
        BoundaryValue::Float(f64::from(f))
    }
}

impl From<f64> for BoundaryValue {
    fn from(f: f64) -> Self {
        BoundaryValue::Float(f)
    }
}

impl From<String> for BoundaryValue {
    fn from(s: String) -> Self {
        BoundaryValue::Str(s)
    }
}

impl From<&str> for BoundaryValue {
    fn from(s: &str) -> Self {
        BoundaryValue::Str(s.to_owned())
    }
}

impl From<Bytes> for BoundaryValue {
    fn from(b: Bytes) -> Self {
        BoundaryValue::Bytes(b)
    }
}

impl From<BoundaryMap> for BoundaryValue {
    fn from(m: BoundaryMap) -> Self {
        BoundaryValue::Map(m)
    }
}

impl<T: Into<BoundaryValue>> From<Vec<T>> for BoundaryValue {
    fn from(items: Vec<T>) -> Self {
        BoundaryValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<BoundaryValue>> From<Option<T>> for BoundaryValue {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(BoundaryValue::Null, Into::into)
    }
}

// --- boundary → host ---

/// Strict projection out of the boundary model.
pub trait FromBoundary: Sized {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError>;
}

fn mismatch(expected: &'static str, value: &BoundaryValue) -> ProjectionError {
    ProjectionError::TypeMismatch {
        expected,
        found: value.kind(),
    }
}

impl FromBoundary for BoundaryValue {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        Ok(value.clone())
    }
}

impl FromBoundary for bool {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromBoundary for i64 {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value.as_int().ok_or_else(|| mismatch("int", value))
    }
}

macro_rules! from_boundary_narrow {
    ($($t:ty),*) => {
        $(impl FromBoundary for $t {
            fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
                let i = value.as_int().ok_or_else(|| mismatch("int", value))?;
                <$t>::try_from(i).map_err(|_| ProjectionError::IntegerOutOfRange {
                    value: i.to_string(),
                })
            }
        })*
    };
}

from_boundary_narrow!(i32, u32, u64, usize);

impl FromBoundary for f64 {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value.as_float().ok_or_else(|| mismatch("float", value))
    }
}

impl FromBoundary for String {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("string", value))
    }
}

impl FromBoundary for Bytes {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value.as_bytes().cloned().ok_or_else(|| mismatch("bytes", value))
    }
}

impl FromBoundary for BoundaryMap {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value.as_map().cloned().ok_or_else(|| mismatch("map", value))
    }
}

impl<T: FromBoundary> FromBoundary for Vec<T> {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value
            .as_list()
            .ok_or_else(|| mismatch("list", value))?
            .iter()
            .map(T::from_boundary)
            .collect()
    }
}

impl<T: FromBoundary> FromBoundary for Option<T> {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        match value {
            BoundaryValue::Null => Ok(None),
            other => T::from_boundary(other).map(Some),
        }
    }
}

impl<T: FromBoundary> FromBoundary for HashMap<String, T> {
    fn from_boundary(value: &BoundaryValue) -> Result<Self, ProjectionError> {
        value
            .as_map()
            .ok_or_else(|| mismatch("map", value))?
            .iter()
            .map(|(k, v)| T::from_boundary(v).map(|v| (k.to_string(), v)))
            .collect()
    }
}

// --- serde ---

impl Serialize for BoundaryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BoundaryValue::Null => serializer.serialize_unit(),
            BoundaryValue::Bool(b) => serializer.serialize_bool(*b),
            BoundaryValue::Int(i) => serializer.serialize_i64(*i),
            BoundaryValue::Float(f) => serializer.serialize_f64(*f),
            BoundaryValue::Str(s) => serializer.serialize_str(s),
            BoundaryValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            BoundaryValue::Map(map) => map.serialize(serializer),
            BoundaryValue::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
        }
    }
}

impl Serialize for BoundaryMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            out.serialize_entry(k, v)?;
        }
        out.end()
    }
}

struct BoundaryVisitor;

impl<'de> Visitor<'de> for BoundaryVisitor {
    type Value = BoundaryValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boundary value")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        BoundaryValue::deserialize(d)
    }

    fn visit_bool<E>(self, b: bool) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Bool(b))
    }

    fn visit_i64<E>(self, i: i64) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Self::Value, E> {
        i64::try_from(u)
            .map(BoundaryValue::Int)
            .map_err(|_| E::custom(format!("integer {u} is outside the signed 64-bit range")))
    }

    fn visit_f64<E>(self, f: f64) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Float(f))
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Str(s.to_owned()))
    }

    fn visit_string<E>(self, s: String) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Str(s))
    }

    fn visit_bytes<E>(self, b: &[u8]) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Bytes(Bytes::copy_from_slice(b)))
    }

    fn visit_byte_buf<E>(self, b: Vec<u8>) -> Result<Self::Value, E> {
        Ok(BoundaryValue::Bytes(Bytes::from(b)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(BoundaryValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BoundaryMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, BoundaryValue>()? {
            map.insert(k, v);
        }
        Ok(BoundaryValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for BoundaryValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BoundaryVisitor)
    }
}
