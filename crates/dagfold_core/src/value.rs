//! Runtime values.
//!
//! [`Value`] follows the JSON data model, but strings, arrays and objects
//! are reference-counted. Cloning a value is constant-time however deeply
//! it nests, so a result can be cached and handed to any number of
//! parents without being copied. The last owner of a nested value tears
//! it down with an explicit work list, so dropping is not bounded by the
//! native stack either.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Object fields, in insertion order
pub type Map = IndexMap<String, Value>;

/// A folded value
#[derive(Clone, Default, PartialEq)]
pub enum Value {
    /// JSON `null`
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer or float
    Number(Number),
    /// Text
    String(Arc<str>),
    /// Ordered list
    Array(Array),
    /// Named fields, in insertion order
    Object(Object),
}

/// Shared immutable array
#[derive(Clone, Default)]
pub struct Array(Arc<Vec<Value>>);

/// Shared immutable object
#[derive(Clone, Default)]
pub struct Object(Arc<Map>);

impl Array {
    /// Wrap owned items
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(items))
    }

    /// Copy the item handles out
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.as_ref().clone()
    }
}

impl Deref for Array {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        if let Some(items) = Arc::get_mut(&mut self.0) {
            dismantle(std::mem::take(items));
        }
    }
}

impl Object {
    /// Wrap owned fields
    #[must_use]
    pub fn new(fields: Map) -> Self {
        Self(Arc::new(fields))
    }
}

impl Deref for Object {
    type Target = Map;

    fn deref(&self) -> &Map {
        &self.0
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if let Some(fields) = Arc::get_mut(&mut self.0) {
            dismantle(fields.drain(..).map(|(_, value)| value).collect());
        }
    }
}

/// Release uniquely owned containers one level at a time.
///
/// A container shared with another owner only loses a reference here; its
/// contents stay alive for that owner.
fn dismantle(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(mut array) => {
                if let Some(items) = Arc::get_mut(&mut array.0) {
                    pending.append(items);
                }
            }
            Value::Object(mut object) => {
                if let Some(fields) = Arc::get_mut(&mut object.0) {
                    pending.extend(fields.drain(..).map(|(_, value)| value));
                }
            }
            _ => {}
        }
    }
}

impl Value {
    /// Create an array value
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Array::new(items.into_iter().collect()))
    }

    /// Create an object value from key-value pairs
    pub fn object(pairs: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Self::Object(Object::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Check for `null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get as boolean
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as signed integer
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Get as unsigned integer
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Get as float
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    /// Get as array
    #[must_use]
    pub const fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get as object
    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field of an object value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(key))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(Number::from(n))
                }
            }
        )*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(Array::new(items))
    }
}

impl From<Map> for Value {
    fn from(fields: Map) -> Self {
        Self::Object(Object::new(fields))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::array(iter)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => Self::array(items.into_iter().map(Self::from)),
            serde_json::Value::Object(fields) => {
                Self::object(fields.into_iter().map(|(k, v)| (k, Self::from(v))))
            }
        }
    }
}

impl PartialEq<serde_json::Value> for Value {
    fn eq(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (Self::Null, serde_json::Value::Null) => true,
            (Self::Bool(a), serde_json::Value::Bool(b)) => a == b,
            (Self::Number(a), serde_json::Value::Number(b)) => a == b,
            (Self::String(a), serde_json::Value::String(b)) => **a == **b,
            (Self::Array(a), serde_json::Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (Self::Object(a), serde_json::Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
            }
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => serializer.collect_seq(items.iter()),
            Self::Object(fields) => serializer.collect_map(fields.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
