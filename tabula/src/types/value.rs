use std::{fmt, sync::Arc};

use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;

use crate::{
    error::{Error, ExecResult},
    types::{
        blob::{BlobData, BytesBlob},
        interval,
        object::{Object, ObjectRef},
        DataType,
    },
};

/// An engine value.
///
/// Values are immutable: every operation over them yields a new value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Numeric(Decimal),
    String(String),
    Timestamp(NaiveDateTime),
    Interval(TimeDelta),
    Blob(Arc<dyn BlobData>),
    Object(ObjectRef),
}

impl Value {
    /// Returns the runtime kind.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Numeric(_) => DataType::Numeric,
            Value::String(_) => DataType::String,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Interval(_) => DataType::Interval,
            Value::Blob(_) => DataType::Blob,
            Value::Object(_) => DataType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Wraps an engine-external instance.
    pub fn object<O: Object>(object: O) -> Value {
        Value::Object(ObjectRef::new(object))
    }

    /// Wraps owned bytes as a blob.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Blob(Arc::new(BytesBlob::from(bytes.into())))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(inner) => Some(*inner),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(inner) => Some(*inner),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(inner) => Some(*inner),
            Value::Integer(inner) => Some(*inner as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns the wrapped object if it is of type `T`.
    pub fn downcast_object<T: Object>(&self) -> Option<&T> {
        self.as_object().and_then(|object| object.downcast_ref::<T>())
    }

    /// Same as [`Self::downcast_object`], but failing with a descriptive
    /// error.
    pub fn require_object<T: Object>(&self, what: &str) -> ExecResult<&T> {
        self.downcast_object::<T>()
            .ok_or_else(|| Error::ExecError(format!("expected {what}, got `{}`", self.data_type())))
    }

    /// SQL truthiness. `Null` is never true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(inner) => *inner,
            Value::Integer(inner) => *inner != 0,
            Value::Float(inner) => *inner != 0.0,
            Value::Numeric(inner) => !inner.is_zero(),
            Value::String(inner) => string_truthiness(inner),
            Value::Timestamp(_) => true,
            Value::Interval(inner) => !inner.is_zero(),
            Value::Blob(inner) => inner.len() > 0,
            Value::Object(_) => true,
        }
    }

    /// Three-valued truth: `None` stands for SQL unknown.
    pub fn as_tri_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            other => Some(other.is_truthy()),
        }
    }
}

/// Strings are false when empty, "false" or "0" (case-insensitive); any
/// other text is true.
pub(crate) fn string_truthiness(s: &str) -> bool {
    let s = s.trim();
    !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0")
}

impl From<bool> for Value {
    fn from(inner: bool) -> Value {
        Value::Boolean(inner)
    }
}

impl From<i64> for Value {
    fn from(inner: i64) -> Value {
        Value::Integer(inner)
    }
}

impl From<i32> for Value {
    fn from(inner: i32) -> Value {
        Value::Integer(inner.into())
    }
}

impl From<f64> for Value {
    fn from(inner: f64) -> Value {
        Value::Float(inner)
    }
}

impl From<Decimal> for Value {
    fn from(inner: Decimal) -> Value {
        Value::Numeric(inner)
    }
}

impl From<&str> for Value {
    fn from(inner: &str) -> Value {
        Value::String(inner.to_owned())
    }
}

impl From<String> for Value {
    fn from(inner: String) -> Value {
        Value::String(inner)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(inner: NaiveDateTime) -> Value {
        Value::Timestamp(inner)
    }
}

impl From<TimeDelta> for Value {
    fn from(inner: TimeDelta) -> Value {
        Value::Interval(inner)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(inner: Option<T>) -> Value {
        inner.map_or(Value::Null, Into::into)
    }
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(inner) => inner.fmt(f),
            Value::Integer(inner) => inner.fmt(f),
            Value::Float(inner) => inner.fmt(f),
            Value::Numeric(inner) => inner.fmt(f),
            Value::String(inner) => inner.fmt(f),
            Value::Timestamp(inner) => inner.format(TIMESTAMP_FORMAT).fmt(f),
            Value::Interval(inner) => f.write_str(&interval::format(*inner)),
            Value::Blob(inner) => write!(f, "<blob ({})>", inner.len()),
            Value::Object(inner) => write!(f, "<{}>", inner.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::String(inner) => write!(f, "{inner:?}"),
            Value::Object(inner) => write!(f, "Object({})", inner.type_name()),
            other => fmt::Display::fmt(other, f),
        }
    }
}

/// Structural equality, used by tests and by `DISTINCT`-like lookups. It is
/// not the SQL `=` operator (for that, see [`crate::types::ops`]): here
/// `Null` equals `Null` and kinds never coerce.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Numeric(a), Value::Numeric(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Interval(a), Value::Interval(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a.to_vec() == b.to_vec(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}
