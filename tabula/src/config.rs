use std::{fmt, time::Duration};

use crate::data::SharedOutput;

/// Maximum nesting of runs (and thus recursive calls) per execution thread.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1024;

/// Default number of retries of a [`RetryRowsInput`](crate::data::RetryRowsInput).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum number of cached function overload resolutions.
pub const RESOLUTION_CACHE_CAPACITY: u64 = 1024;

/// Default number of compiled statements cached per execution thread.
pub const DEFAULT_MAX_COMPILED_STATEMENTS: u64 = 4096;

/// Maximum number of errors kept in the execution statistic.
pub const DEFAULT_MAX_ERRORS: usize = 64;

/// Name of the column injected when row numbers are enabled.
pub const ROW_NUMBER_COLUMN: &str = "row_number";

/// Execution thread options. They don't change for the thread lifetime.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Refuses commands with external effects (`INSERT`, `UPDATE`, `DELETE`,
    /// unsafe functions).
    pub safe_mode: bool,
    /// Where the rows of top-level `SELECT` statements are written to. When
    /// unset, such statements yield their rows iterator instead.
    pub default_output: Option<SharedOutput>,
    /// Prepends a row number column to the rows of top-level queries.
    pub add_row_number: bool,
    /// Records per-statement details in the execution statistic.
    pub show_detailed_statistic: bool,
    pub max_recursion_depth: usize,
    /// Serializes runs on the same thread. Otherwise, concurrent runs share
    /// the root scope but keep their inner scopes apart.
    pub prevent_concurrent_run: bool,
    /// Maximum number of errors kept in the statistic.
    pub max_errors: usize,
    /// Maximum number of compiled statements kept for reuse.
    pub max_compiled_statements: u64,
}

impl Default for ExecutionOptions {
    fn default() -> ExecutionOptions {
        ExecutionOptions {
            safe_mode: false,
            default_output: None,
            add_row_number: false,
            show_detailed_statistic: false,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            prevent_concurrent_run: true,
            max_errors: DEFAULT_MAX_ERRORS,
            max_compiled_statements: DEFAULT_MAX_COMPILED_STATEMENTS,
        }
    }
}

impl ExecutionOptions {
    pub fn with_safe_mode(mut self, safe_mode: bool) -> ExecutionOptions {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_default_output(mut self, output: SharedOutput) -> ExecutionOptions {
        self.default_output = Some(output);
        self
    }

    pub fn with_row_number(mut self, add_row_number: bool) -> ExecutionOptions {
        self.add_row_number = add_row_number;
        self
    }

    pub fn with_detailed_statistic(mut self, show: bool) -> ExecutionOptions {
        self.show_detailed_statistic = show;
        self
    }

    pub fn with_max_recursion_depth(mut self, depth: usize) -> ExecutionOptions {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_prevent_concurrent_run(mut self, prevent: bool) -> ExecutionOptions {
        self.prevent_concurrent_run = prevent;
        self
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> ExecutionOptions {
        self.max_errors = max_errors;
        self
    }

    pub fn with_max_compiled_statements(mut self, max: u64) -> ExecutionOptions {
        self.max_compiled_statements = max;
        self
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("safe_mode", &self.safe_mode)
            .field("default_output", &self.default_output.is_some())
            .field("add_row_number", &self.add_row_number)
            .field("show_detailed_statistic", &self.show_detailed_statistic)
            .field("max_recursion_depth", &self.max_recursion_depth)
            .field("prevent_concurrent_run", &self.prevent_concurrent_run)
            .field("max_errors", &self.max_errors)
            .field("max_compiled_statements", &self.max_compiled_statements)
            .finish()
    }
}
