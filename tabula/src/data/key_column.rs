use crate::types::Operation;

/// A column of a rows input usable for condition pushdown.
#[derive(Debug, Clone)]
pub struct KeyColumn {
    /// The input column index.
    pub column_index: usize,
    /// The input cannot be opened without a value for this column.
    pub required: bool,
    operations: Vec<Operation>,
}

impl KeyColumn {
    pub fn new(column_index: usize) -> KeyColumn {
        KeyColumn {
            column_index,
            required: false,
            operations: Vec::new(),
        }
    }

    pub fn required(mut self, required: bool) -> KeyColumn {
        self.required = required;
        self
    }

    /// Declares support for another comparison.
    pub fn with_operation(mut self, op: Operation) -> KeyColumn {
        debug_assert!(op.is_comparison());
        if !self.operations.contains(&op) {
            self.operations.push(op);
        }
        self
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Lists the supported operations, for error messages.
    pub fn describe_operations(&self) -> String {
        self.operations
            .iter()
            .map(|op| op.symbol())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
