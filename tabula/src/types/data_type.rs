use std::{fmt, str::FromStr};

use crate::error::{Error, ExecResult};

/// The kind of a [`Value`](super::Value).
///
/// The first [`DataType::KIND_COUNT`] variants are the concrete kinds a
/// value may carry at runtime; they index the operator dispatch tables. The
/// remaining variants only exist at compile time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    Null = 0,
    Boolean = 1,
    Integer = 2,
    Float = 3,
    Numeric = 4,
    String = 5,
    Timestamp = 6,
    Interval = 7,
    Blob = 8,
    Object = 9,
    /// Statically unknown; resolved when the unit runs.
    Dynamic = 10,
    /// Statement units that produce no meaningful value.
    Void = 11,
}

impl DataType {
    /// Number of runtime kinds.
    pub const KIND_COUNT: usize = 10;

    /// All runtime kinds, in discriminant order.
    pub const KINDS: [DataType; DataType::KIND_COUNT] = [
        DataType::Null,
        DataType::Boolean,
        DataType::Integer,
        DataType::Float,
        DataType::Numeric,
        DataType::String,
        DataType::Timestamp,
        DataType::Interval,
        DataType::Blob,
        DataType::Object,
    ];

    /// Returns the canonical type name.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Null => "null",
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Timestamp => "timestamp",
            DataType::Interval => "interval",
            DataType::Blob => "blob",
            DataType::Object => "object",
            DataType::Dynamic => "any",
            DataType::Void => "void",
        }
    }

    /// Index in the dispatch tables, if this is a runtime kind.
    pub fn index(self) -> Option<usize> {
        let i = self as usize;
        (i < DataType::KIND_COUNT).then_some(i)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Float | DataType::Numeric
        )
    }

    /// Returns `true` if the kind is known before execution.
    pub fn is_static(self) -> bool {
        !matches!(self, DataType::Dynamic | DataType::Null | DataType::Void)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> ExecResult<Self> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "null" => DataType::Null,
            "bool" | "boolean" => DataType::Boolean,
            "int" | "integer" | "bigint" => DataType::Integer,
            "float" | "real" | "double" => DataType::Float,
            "numeric" | "decimal" => DataType::Numeric,
            "string" | "text" | "varchar" => DataType::String,
            "timestamp" => DataType::Timestamp,
            "interval" => DataType::Interval,
            "blob" => DataType::Blob,
            "object" => DataType::Object,
            "any" => DataType::Dynamic,
            "void" => DataType::Void,
            other => return Err(Error::ExecError(format!("unknown type `{other}`"))),
        };
        Ok(ty)
    }
}
