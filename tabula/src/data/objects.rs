//! Values wrapping rows and rows sources.

use std::{any::Any, fmt, sync::Arc};

use crate::{
    data::{
        find_column, shared_input, shared_iterator, shared_output, Column, Row, RowsInput,
        RowsIterator, RowsOutput, SharedInput, SharedIterator, SharedOutput,
    },
    types::{Object, Value},
};

/// A row bound to its columns, e.g., the variable of a `FOR` loop.
#[derive(Debug, Clone)]
pub struct RowObject {
    columns: Arc<[Column]>,
    row: Row,
}

impl RowObject {
    pub fn new(columns: Arc<[Column]>, row: Row) -> RowObject {
        RowObject { columns, row }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn row(&self) -> &Row {
        &self.row
    }
}

impl Object for RowObject {
    fn type_name(&self) -> &str {
        "row"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        find_column(&self.columns, name, None).map(|i| self.row.value(i))
    }

    fn get_index(&self, index: &[Value]) -> Option<Value> {
        match index {
            [Value::Integer(i)] => usize::try_from(*i)
                .ok()
                .and_then(|i| self.row.get(i).cloned()),
            [Value::String(name)] => self.get_property(name),
            _ => None,
        }
    }
}

/// A shared [`RowsInput`].
///
/// Inputs opened by an `OPEN` statement are managed by their holder: the
/// pipelines reading them only rewind them. Any other input is opened and
/// closed by whoever reads it.
#[derive(Clone)]
pub struct InputObject {
    input: SharedInput,
    opened: bool,
}

impl InputObject {
    pub fn new<I: RowsInput + 'static>(input: I) -> InputObject {
        InputObject::shared(shared_input(input))
    }

    pub fn shared(input: SharedInput) -> InputObject {
        InputObject {
            input,
            opened: false,
        }
    }

    /// Wraps an input that is already open.
    pub fn opened(input: SharedInput) -> InputObject {
        InputObject {
            input,
            opened: true,
        }
    }

    pub fn input(&self) -> &SharedInput {
        &self.input
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }
}

impl Object for InputObject {
    fn type_name(&self) -> &str {
        "rows_input"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for InputObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputObject")
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}

/// A shared [`RowsIterator`], e.g., the result of a query.
#[derive(Clone)]
pub struct IteratorObject(pub SharedIterator);

impl IteratorObject {
    pub fn new<I: RowsIterator + 'static>(iterator: I) -> IteratorObject {
        IteratorObject(shared_iterator(iterator))
    }
}

impl Object for IteratorObject {
    fn type_name(&self) -> &str {
        "rows_iterator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for IteratorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IteratorObject")
    }
}

/// A shared [`RowsOutput`].
#[derive(Clone)]
pub struct OutputObject(pub SharedOutput);

impl OutputObject {
    pub fn new<O: RowsOutput + 'static>(output: O) -> OutputObject {
        OutputObject(shared_output(output))
    }
}

impl Object for OutputObject {
    fn type_name(&self) -> &str {
        "rows_output"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for OutputObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputObject")
    }
}
