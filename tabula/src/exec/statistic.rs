use std::{collections::HashMap, time::Duration};

use crate::{
    ast::{NodeId, ProgramId},
    error::Error,
};

/// Accumulated timings of one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementDetail {
    pub executions: u64,
    pub total_time: Duration,
}

/// Counters of an execution thread.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStatistic {
    /// Total time spent running programs.
    pub execution_time: Duration,
    pub statements_executed: u64,
    /// Rows written or touched by statements.
    pub rows_processed: u64,
    /// The most recent errors, oldest first.
    pub errors: Vec<Error>,
    /// Per-statement timings, only kept with detailed statistics enabled.
    pub details: HashMap<(ProgramId, NodeId), StatementDetail>,
    max_errors: usize,
}

impl ExecutionStatistic {
    pub fn new(max_errors: usize) -> ExecutionStatistic {
        ExecutionStatistic {
            max_errors,
            ..ExecutionStatistic::default()
        }
    }

    pub(crate) fn record_error(&mut self, error: &Error) {
        if self.max_errors == 0 {
            return;
        }
        if self.errors.len() == self.max_errors {
            self.errors.remove(0);
        }
        self.errors.push(error.clone());
    }

    pub(crate) fn record_detail(&mut self, program: ProgramId, id: NodeId, elapsed: Duration) {
        let detail = self.details.entry((program, id)).or_default();
        detail.executions += 1;
        detail.total_time += elapsed;
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn clear(&mut self) {
        *self = ExecutionStatistic::new(self.max_errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_bounded() {
        let mut statistic = ExecutionStatistic::new(2);
        for i in 0..3 {
            statistic.record_error(&Error::ExecError(i.to_string()));
        }
        let kept: Vec<String> = statistic.errors.iter().map(ToString::to_string).collect();
        assert_eq!(kept, ["1", "2"]);
    }

    #[test]
    fn details_are_aggregated_per_statement() {
        let mut statistic = ExecutionStatistic::new(2);
        let program = ProgramId::next();
        for _ in 0..1000 {
            statistic.record_detail(program, NodeId(3), Duration::from_millis(2));
        }
        statistic.record_detail(program, NodeId(4), Duration::from_millis(1));

        assert_eq!(statistic.details.len(), 2);
        assert_eq!(
            statistic.details[&(program, NodeId(3))],
            StatementDetail {
                executions: 1000,
                total_time: Duration::from_secs(2),
            }
        );
    }
}
