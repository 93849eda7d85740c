//! Typed cell values for data columns.
//!
//! Models expose a fixed set of typed columns; every cell holds a [`Value`]
//! whose variant matches the column's declared [`ValueType`]. A `Value` can
//! also be [`Value::None`] for an unset cell.

use std::fmt;

/// The declared type of a model column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean cells. The only type accepted for a visibility column.
    Bool,
    /// 64-bit signed integer cells.
    Int,
    /// 64-bit floating point cells.
    Float,
    /// String cells.
    String,
}

/// Type-erased container for a single cell value.
///
/// # Example
///
/// ```
/// use trellis::model::Value;
///
/// let data = Value::from("Hello");
/// assert_eq!(data.as_str(), Some("Hello"));
///
/// let flag = Value::from(true);
/// assert_eq!(flag.as_bool(), Some(true));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No data.
    #[default]
    None,
    /// Boolean data.
    Bool(bool),
    /// Integer data.
    Int(i64),
    /// Floating point data.
    Float(f64),
    /// String data.
    String(String),
}

impl Value {
    /// Returns `true` if this value holds no data.
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Returns the [`ValueType`] of this value, or `None` for [`Value::None`].
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::None => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::String),
        }
    }

    /// Returns `true` if this value can be stored in a column of `ty`.
    ///
    /// `Value::None` matches any column type (an unset cell).
    pub fn matches(&self, ty: ValueType) -> bool {
        match self.value_type() {
            None => true,
            Some(own) => own == ty,
        }
    }

    /// Returns the boolean value, if this holds one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float value, if this holds one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string value as a slice, if this holds one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Consumes the value, returning the owned string if this holds one.
    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
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
