//! AMF value type
//!
//! One representation serves both wire dialects. AMF3-only shapes are folded
//! into the closest variant on decode (dates become numbers, dense arrays
//! become strict arrays) so command handlers only ever see these nine cases.

use indexmap::IndexMap;

/// Ordered key/value map backing objects and ECMA arrays
///
/// Insertion order is preserved so re-encoded metadata keeps the producer's
/// field order.
pub type AmfObject = IndexMap<String, AmfValue>;

/// Tagged AMF value
///
/// Object and array variants own their collections; `clone()` is a deep copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// IEEE 754 double (AMF0 0x00, AMF3 0x05)
    Number(f64),

    /// 29-bit signed integer (AMF3 0x04), written as a number in AMF0
    Integer(i32),

    /// Boolean (AMF0 0x01, AMF3 0x02/0x03)
    Boolean(bool),

    /// UTF-8 string (AMF0 0x02/0x0C, AMF3 0x06)
    String(String),

    /// Null (AMF0 0x05, AMF3 0x01)
    #[default]
    Null,

    /// Undefined (AMF0 0x06, AMF3 0x00)
    Undefined,

    /// Anonymous object (AMF0 0x03)
    Object(AmfObject),

    /// Associative array (AMF0 0x08), carries an element count on the wire
    EcmaArray(AmfObject),

    /// Dense array (AMF0 0x0A)
    StrictArray(Vec<AmfValue>),
}

impl AmfValue {
    /// Empty anonymous object
    pub fn object() -> Self {
        AmfValue::Object(AmfObject::new())
    }

    /// Empty ECMA array
    pub fn ecma_array() -> Self {
        AmfValue::EcmaArray(AmfObject::new())
    }

    /// Build an object from `(key, value)` pairs, keeping their order
    pub fn object_from<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers and booleans widen to `f64`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            AmfValue::Integer(i) => Some(*i as f64),
            AmfValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Object view over both objects and ECMA arrays
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::StrictArray(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Loose truthiness: non-zero numbers, `true`, non-empty strings and
    /// any collection count as set
    pub fn is_truthy(&self) -> bool {
        match self {
            AmfValue::Number(n) => *n != 0.0,
            AmfValue::Integer(i) => *i != 0,
            AmfValue::Boolean(b) => *b,
            AmfValue::String(s) => !s.is_empty(),
            AmfValue::Null | AmfValue::Undefined => false,
            AmfValue::Object(_) | AmfValue::EcmaArray(_) | AmfValue::StrictArray(_) => true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Insert or replace a property. No-op on non-object values.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) {
        if let Some(map) = self.as_object_mut() {
            map.insert(key.into(), value.into());
        }
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::StrictArray(v.into_iter().map(Into::into).collect())
    }
}
