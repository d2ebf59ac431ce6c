//! Extraction of key conditions from a `WHERE` clause.
//!
//! The clause is split into its `AND`-ed conjuncts. A conjunct comparing a
//! column of the scanned input with a value not depending on the scanned
//! row is handed to the input when the column is a key column supporting
//! the comparison. Everything else stays in the residual filter.

use std::sync::Arc;

use tracing::debug;

use crate::{
    ast::{InSource, Node, NodeId},
    compile::{Compiler, LogicalUnit, Unit},
    data::KeyColumn,
    error::{Error, ExecResult},
    select::{
        ArrayValuesGenerator, IteratorValuesGenerator, KeyCondition, KeyConditionValueGenerator,
        SingleValueGenerator, VariableValuesGenerator,
    },
    types::Operation,
};

/// Where the values of a key condition come from.
#[derive(Clone)]
pub(crate) enum ValuePlan {
    Single(Unit),
    Array(Vec<Unit>),
    Iterator(Unit),
    Variable(Unit),
}

impl ValuePlan {
    fn is_multiple(&self) -> bool {
        !matches!(self, ValuePlan::Single(_))
    }

    fn generator(&self) -> Box<dyn KeyConditionValueGenerator> {
        match self {
            ValuePlan::Single(unit) => Box::new(SingleValueGenerator::new(Arc::clone(unit))),
            ValuePlan::Array(units) => Box::new(ArrayValuesGenerator::new(units.clone())),
            ValuePlan::Iterator(unit) => Box::new(IteratorValuesGenerator::new(Arc::clone(unit))),
            ValuePlan::Variable(unit) => Box::new(VariableValuesGenerator::new(Arc::clone(unit))),
        }
    }
}

#[derive(Clone)]
pub(crate) struct KeyConditionPlan {
    pub column: usize,
    pub op: Operation,
    pub value: ValuePlan,
}

impl KeyConditionPlan {
    /// Creates the condition with fresh generator state, for one scan.
    pub fn bind(&self) -> KeyCondition {
        KeyCondition {
            column: self.column,
            op: self.op,
            generator: self.value.generator(),
        }
    }
}

/// The outcome of planning a `WHERE` clause.
#[derive(Default)]
pub(crate) struct FilterPlan {
    pub conditions: Vec<KeyConditionPlan>,
    pub residual: Option<Unit>,
}

fn conjuncts(compiler: &Compiler<'_>, id: NodeId, out: &mut Vec<NodeId>) {
    match compiler.program.node(id) {
        Node::Binary {
            op: Operation::And,
            left,
            right,
        } => {
            conjuncts(compiler, *left, out);
            conjuncts(compiler, *right, out);
        }
        _ => out.push(id),
    }
}

fn find_key(keys: &[KeyColumn], column: usize) -> Option<&KeyColumn> {
    keys.iter().find(|key| key.column_index == column)
}

impl Compiler<'_> {
    /// Plans the filter of a scan over an input declaring `keys`. The scan
    /// scope must be the innermost one.
    pub(crate) async fn plan_filter(
        &mut self,
        filter: Option<NodeId>,
        keys: &[KeyColumn],
    ) -> ExecResult<FilterPlan> {
        let mut plan = FilterPlan::default();
        let mut parts = Vec::new();
        if let Some(filter) = filter {
            conjuncts(self, filter, &mut parts);
        }

        let mut residual = Vec::new();
        for part in parts {
            let has_multiple = plan.conditions.iter().any(|c| c.value.is_multiple());
            match self.extract(part, keys, has_multiple).await? {
                Some(conditions) => plan.conditions.extend(conditions),
                None => residual.push(part),
            }
        }

        for key in keys.iter().filter(|key| key.required) {
            if !plan.conditions.iter().any(|c| c.column == key.column_index) {
                let column = self
                    .rows
                    .last()
                    .and_then(|scope| scope.columns.get(key.column_index))
                    .map_or_else(|| key.column_index.to_string(), |column| column.name.clone());
                return Err(Error::QueryMissedCondition {
                    column,
                    operations: key.describe_operations(),
                });
            }
        }

        for part in residual {
            let unit = self.scalar(part).await?;
            plan.residual = Some(match plan.residual.take() {
                Some(left) => Arc::new(LogicalUnit {
                    op: Operation::And,
                    left,
                    right: unit,
                }),
                None => unit,
            });
        }
        debug!(
            pushed = plan.conditions.len(),
            residual = plan.residual.is_some(),
            "planned filter"
        );
        Ok(plan)
    }

    /// Turns a conjunct into key conditions, if the input can evaluate it.
    async fn extract(
        &mut self,
        id: NodeId,
        keys: &[KeyColumn],
        has_multiple: bool,
    ) -> ExecResult<Option<Vec<KeyConditionPlan>>> {
        let program = Arc::clone(&self.program);
        match program.node(id) {
            Node::Binary { op, left, right } if op.is_comparison() => {
                let (column, op, value) = match (
                    self.current_column(*left),
                    self.current_column(*right),
                    op.mirror(),
                ) {
                    (Some(column), _, _) if !self.references_current(*right) => {
                        (column, *op, *right)
                    }
                    (None, Some(column), Some(mirrored)) if !self.references_current(*left) => {
                        (column, mirrored, *left)
                    }
                    _ => return Ok(None),
                };
                let Some(key) = find_key(keys, column) else {
                    return Ok(None);
                };
                if key.supports(op) {
                    let value = ValuePlan::Single(self.scalar(value).await?);
                    return Ok(Some(vec![KeyConditionPlan { column, op, value }]));
                }
                if op == Operation::Equals && supports_range(key) {
                    let unit = self.scalar(value).await?;
                    return Ok(Some(range(column, Arc::clone(&unit), unit)));
                }
                Ok(None)
            }
            Node::Between {
                expr,
                low,
                high,
                negated: false,
            } => {
                let Some(column) = self.current_column(*expr) else {
                    return Ok(None);
                };
                if self.references_current(*low) || self.references_current(*high) {
                    return Ok(None);
                }
                match find_key(keys, column) {
                    Some(key) if supports_range(key) => {
                        let low = self.scalar(*low).await?;
                        let high = self.scalar(*high).await?;
                        Ok(Some(range(column, low, high)))
                    }
                    _ => Ok(None),
                }
            }
            Node::In {
                expr,
                source,
                negated: false,
            } if !has_multiple => {
                let Some(column) = self.current_column(*expr) else {
                    return Ok(None);
                };
                if !find_key(keys, column).is_some_and(|key| key.supports(Operation::Equals)) {
                    return Ok(None);
                }
                let value = match source {
                    InSource::List(items) => {
                        if items.iter().any(|&item| self.references_current(item)) {
                            return Ok(None);
                        }
                        let mut units = Vec::with_capacity(items.len());
                        for &item in items {
                            units.push(self.scalar(item).await?);
                        }
                        ValuePlan::Array(units)
                    }
                    InSource::Query(query) | InSource::Value(query)
                        if self.references_current(*query) =>
                    {
                        return Ok(None)
                    }
                    InSource::Query(query) => ValuePlan::Iterator(self.expr(*query).await?),
                    InSource::Value(value) => ValuePlan::Variable(self.expr(*value).await?),
                };
                Ok(Some(vec![KeyConditionPlan {
                    column,
                    op: Operation::Equals,
                    value,
                }]))
            }
            _ => Ok(None),
        }
    }
}

fn supports_range(key: &KeyColumn) -> bool {
    key.supports(Operation::GreaterOrEquals) && key.supports(Operation::LessOrEquals)
}

fn range(column: usize, low: Unit, high: Unit) -> Vec<KeyConditionPlan> {
    vec![
        KeyConditionPlan {
            column,
            op: Operation::GreaterOrEquals,
            value: ValuePlan::Single(low),
        },
        KeyConditionPlan {
            column,
            op: Operation::LessOrEquals,
            value: ValuePlan::Single(high),
        },
    ]
}
