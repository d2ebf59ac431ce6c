use std::borrow::Cow;

use crate::types::DataType;

pub type ExecResult<T, E = Error> = Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An operator has no dispatch entry for the given operand kinds.
    #[error("cannot apply `{op}` to `{left}` and `{right}`")]
    TypeMismatch {
        op: &'static str,
        left: DataType,
        right: DataType,
    },

    /// A value could not be converted into the requested kind.
    #[error("cannot convert `{value}` to `{target}`")]
    ConversionFailure { value: String, target: DataType },

    /// A variable, column or path did not resolve to anything.
    #[error("cannot find identifier `{0}`")]
    CannotFindIdentifier(String),

    /// No registered function accepts the given arguments.
    #[error("function `{0}` not found")]
    FunctionNotFound(String),

    /// More than one overload matches the call equally well.
    #[error("ambiguous call `{0}`")]
    AmbiguousOverload(String),

    /// A required key column of a source got no value from the query.
    #[error("the query must have a condition on column `{column}` (supported operations: {operations})")]
    QueryMissedCondition { column: String, operations: String },

    /// A command with external effects ran under safe mode.
    #[error("`{0}` is not allowed in safe mode")]
    SafeModeViolation(Cow<'static, str>),

    /// The UPDATE target doesn't support in-place updates.
    #[error("rows input must be updatable")]
    SourceNotUpdatable,

    /// The DELETE target doesn't support deletion.
    #[error("rows input must support delete")]
    SourceNotDeletable,

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in `{0}`")]
    ArithmeticOverflow(&'static str),

    /// The execution was cancelled through its token.
    #[error("execution cancelled")]
    Cancelled,

    #[error("maximum recursion depth ({0}) exceeded")]
    MaxRecursionDepth(usize),

    /// A data source failed while opening, reading or writing.
    #[error("source error: {0}")]
    Source(String),

    /// Generic statement error.
    #[error("{0}")]
    ExecError(String),
}

impl Error {
    /// Shortcut to build an [`Error::TypeMismatch`].
    pub fn mismatch(op: &'static str, left: DataType, right: DataType) -> Error {
        Error::TypeMismatch { op, left, right }
    }

    /// Shortcut to build an [`Error::ConversionFailure`].
    pub fn conversion(value: impl ToString, target: DataType) -> Error {
        Error::ConversionFailure {
            value: value.to_string(),
            target,
        }
    }

    /// Returns `true` if a retry-capable source may attempt the failed
    /// operation again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}
