//! Value representations on both sides of the binding layer.
//!
//! [`RawValue`] is what the detector speaks: plain numbers, strings and arrays.
//! [`AttributeValue`] is what clients see, typed by the attribute's
//! [`ValueType`]. Bindings convert between the two; nothing else does.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, DaqError};

// =============================================================================
// Hardware-native values
// =============================================================================

/// Value as returned by or sent to the hardware accessor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    FloatArray(Vec<f64>),
    IntArray(Vec<i64>),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Int(i) => write!(f, "{}", i),
            RawValue::Float(fl) => write!(f, "{}", fl),
            RawValue::String(s) => write!(f, "{}", s),
            RawValue::FloatArray(arr) => write!(f, "{:?}", arr),
            RawValue::IntArray(arr) => write!(f, "{:?}", arr),
        }
    }
}

impl RawValue {
    /// Short name of the variant, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::String(_) => "string",
            RawValue::FloatArray(_) => "float array",
            RawValue::IntArray(_) => "int array",
        }
    }

    /// Extract value as i64. Floats convert only when integral and in range.
    pub fn as_i64(&self) -> Option<i64> {
        // i64::MIN is exactly -2^63; i64::MAX rounds up to 2^63 as f64
        const LIMIT: f64 = 9_223_372_036_854_775_808.0;
        match self {
            RawValue::Int(i) => Some(*i),
            RawValue::Float(f) if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(f) => {
                Some(*f as i64)
            }
            RawValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Extract value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Float(f) => Some(*f),
            RawValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extract value as bool. Integers 0 and 1 are accepted.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            RawValue::Int(0) => Some(false),
            RawValue::Int(1) => Some(true),
            _ => None,
        }
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, RawValue::FloatArray(_) | RawValue::IntArray(_))
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::String(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::String(value)
    }
}

impl From<Vec<f64>> for RawValue {
    fn from(value: Vec<f64>) -> Self {
        RawValue::FloatArray(value)
    }
}

// =============================================================================
// Client-facing values
// =============================================================================

/// Ordered, duplicate-free set of enum symbols.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSet(Vec<String>);

impl SymbolSet {
    /// Build a set, dropping repeated symbols while keeping first-seen order.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.into();
            if !out.contains(&symbol) {
                out.push(symbol);
            }
        }
        Self(out)
    }

    /// Whether `symbol` belongs to the set.
    pub fn contains(&self, symbol: &str) -> bool {
        self.0.iter().any(|s| s == symbol)
    }

    /// Iterate symbols in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the set has no symbols.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

/// Declared type of an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "symbols", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ValueType {
    Int,
    Float,
    Bool,
    String,
    Enum(SymbolSet),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::String => write!(f, "string"),
            ValueType::Enum(symbols) => {
                write!(f, "enum[")?;
                for (i, s) in symbols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Typed value as seen by control-system clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Enum(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(fl) => write!(f, "{}", fl),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::String(s) | AttributeValue::Enum(s) => write!(f, "{}", s),
        }
    }
}

impl AttributeValue {
    /// Short name of the variant, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::String(_) => "string",
            AttributeValue::Enum(_) => "enum",
        }
    }

    /// Hardware representation for passthrough bindings.
    ///
    /// Enum symbols are never pushed through this path; enum attributes go
    /// through an [`EnumTranslator`](crate::translator::EnumTranslator).
    pub fn to_raw(&self) -> RawValue {
        match self {
            AttributeValue::Int(i) => RawValue::Int(*i),
            AttributeValue::Float(f) => RawValue::Float(*f),
            AttributeValue::Bool(b) => RawValue::Bool(*b),
            AttributeValue::String(s) | AttributeValue::Enum(s) => RawValue::String(s.clone()),
        }
    }

    /// JSON form handed to the transport layer.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Value::from(*f),
            AttributeValue::Bool(b) => serde_json::Value::from(*b),
            AttributeValue::String(s) | AttributeValue::Enum(s) => {
                serde_json::Value::from(s.as_str())
            }
        }
    }

    /// Symbol carried by an enum value.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

// =============================================================================
// Validation and coercion
// =============================================================================

fn mismatch(attribute: &str, expected: &ValueType, actual: &str) -> DaqError {
    DaqError::TypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

impl ValueType {
    /// Value an attribute holds before its first fetch or write.
    pub fn default_value(&self) -> AttributeValue {
        match self {
            ValueType::Int => AttributeValue::Int(0),
            ValueType::Float => AttributeValue::Float(0.0),
            ValueType::Bool => AttributeValue::Bool(false),
            ValueType::String => AttributeValue::String(String::new()),
            ValueType::Enum(symbols) => {
                AttributeValue::Enum(symbols.first().unwrap_or_default().to_string())
            }
        }
    }

    /// Check a client-supplied value and return its normalized form.
    ///
    /// Ints widen to floats and plain strings are accepted for enum attributes;
    /// every other combination is a [`DaqError::TypeMismatch`]. Enum values
    /// outside the symbol set fail with [`DaqError::UnknownSymbol`].
    pub fn validate(&self, attribute: &str, value: AttributeValue) -> AppResult<AttributeValue> {
        match (self, value) {
            (ValueType::Int, AttributeValue::Int(i)) => Ok(AttributeValue::Int(i)),
            (ValueType::Float, AttributeValue::Float(f)) => Ok(AttributeValue::Float(f)),
            (ValueType::Float, AttributeValue::Int(i)) => Ok(AttributeValue::Float(i as f64)),
            (ValueType::Bool, AttributeValue::Bool(b)) => Ok(AttributeValue::Bool(b)),
            (ValueType::String, AttributeValue::String(s)) => Ok(AttributeValue::String(s)),
            (ValueType::Enum(symbols), AttributeValue::Enum(s))
            | (ValueType::Enum(symbols), AttributeValue::String(s)) => {
                if symbols.contains(&s) {
                    Ok(AttributeValue::Enum(s))
                } else {
                    Err(DaqError::UnknownSymbol {
                        attribute: attribute.to_string(),
                        symbol: s,
                    })
                }
            }
            (expected, other) => Err(mismatch(attribute, expected, other.kind())),
        }
    }

    /// Decode a JSON value from the transport layer, then validate it.
    pub fn value_from_json(
        &self,
        attribute: &str,
        json: &serde_json::Value,
    ) -> AppResult<AttributeValue> {
        let value = match (self, json) {
            (ValueType::Int, serde_json::Value::Number(n)) => n
                .as_i64()
                .map(AttributeValue::Int)
                .ok_or_else(|| mismatch(attribute, self, "non-integer number"))?,
            (ValueType::Float, serde_json::Value::Number(n)) => n
                .as_f64()
                .map(AttributeValue::Float)
                .ok_or_else(|| mismatch(attribute, self, "number"))?,
            (ValueType::Bool, serde_json::Value::Bool(b)) => AttributeValue::Bool(*b),
            (ValueType::String, serde_json::Value::String(s)) => AttributeValue::String(s.clone()),
            (ValueType::Enum(_), serde_json::Value::String(s)) => AttributeValue::Enum(s.clone()),
            (_, other) => return Err(mismatch(attribute, self, json_kind(other))),
        };
        self.validate(attribute, value)
    }

    /// Pure coercion of a hardware value into this (non-enum) type.
    pub fn coerce_raw(&self, attribute: &str, raw: RawValue) -> AppResult<AttributeValue> {
        let coerced = match self {
            ValueType::Int => raw.as_i64().map(AttributeValue::Int),
            ValueType::Float => raw.as_f64().map(AttributeValue::Float),
            ValueType::Bool => raw.as_bool().map(AttributeValue::Bool),
            ValueType::String if raw.is_scalar() => Some(AttributeValue::String(raw.to_string())),
            ValueType::String => None,
            ValueType::Enum(_) => None,
        };
        coerced.ok_or_else(|| mismatch(attribute, self, raw.kind()))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
