//! Queries: the rows pipeline and key condition pushdown.
//!
//! A `SELECT` compiles into a [`SelectUnit`], which opens a chain of
//! [`RowsIterator`] stages on every invocation: scan (with key conditions
//! pushed into the input), residual filter, projection, distinct, order,
//! and offset/limit.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use tracing::instrument;

use crate::{
    ast::{Node, NodeId, Select, SelectColumn, Selector},
    compile::{ColumnUnit, Compiler, FuncUnit, Unit},
    data::{Column, IteratorObject, RowsIterator},
    error::{Error, ExecResult},
    exec::ExecCtx,
    index::OrderKey,
    types::{cast, DataType, Value},
};

mod key_condition;
pub use key_condition::*;

mod set_keys;
pub use set_keys::*;

mod iterators;
pub use iterators::*;

mod planner;
pub(crate) use planner::*;

mod scan;
pub(crate) use scan::*;

/// A compiled query.
pub struct SelectUnit {
    pub(crate) scan: ScanPlan,
    units: Vec<Unit>,
    /// Output columns, followed by the hidden sort keys.
    columns: Vec<Column>,
    visible: usize,
    distinct: bool,
    order: Vec<OrderKey>,
    limit: Option<Unit>,
    offset: Option<Unit>,
}

impl SelectUnit {
    /// The columns of the produced rows.
    pub fn columns(&self) -> &[Column] {
        &self.columns[..self.visible]
    }

    /// Builds the pipeline. Nothing is read before the first pull.
    #[instrument(name = "Select", level = "debug", skip_all)]
    pub async fn open(&self, ctx: &mut ExecCtx) -> ExecResult<Box<dyn RowsIterator>> {
        let offset = count(self.offset.as_ref(), "OFFSET", ctx).await?.unwrap_or(0);
        let limit = count(self.limit.as_ref(), "LIMIT", ctx).await?;

        let scan = self.scan.open(ctx).await?;
        let mut rows: Box<dyn RowsIterator> = Box::new(ProjectRowsIterator::new(
            scan.iterator,
            self.units.clone(),
            self.columns.clone(),
            self.scan.slot.clone(),
        ));
        if self.distinct {
            rows = Box::new(DistinctRowsIterator::new(rows, self.visible));
        }
        if !self.order.is_empty() {
            rows = Box::new(OrderRowsStage::new(rows, self.order.clone(), self.visible));
        }
        if offset > 0 || limit.is_some() {
            rows = Box::new(LimitRowsIterator::new(rows, offset, limit));
        }
        Ok(rows)
    }
}

#[async_trait]
impl FuncUnit for SelectUnit {
    fn output_type(&self) -> DataType {
        DataType::Object
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let rows = self.open(ctx).await?;
        Ok(Value::object(IteratorObject::new(rows)))
    }
}

async fn count(unit: Option<&Unit>, clause: &str, ctx: &mut ExecCtx) -> ExecResult<Option<u64>> {
    let Some(unit) = unit else {
        return Ok(None);
    };
    let value = unit.invoke(ctx).await?;
    match cast::cast(&value, DataType::Integer)? {
        Value::Null => Ok(None),
        Value::Integer(n) => u64::try_from(n)
            .map(Some)
            .map_err(|_| Error::ExecError(format!("{clause} must not be negative, got {n}"))),
        other => Err(Error::conversion(&other, DataType::Integer)),
    }
}

/// A compiled projection.
struct Projection {
    units: Vec<Unit>,
    columns: Vec<Column>,
    visible: usize,
    order: Vec<OrderKey>,
}

impl Compiler<'_> {
    /// Compiles a query.
    pub(crate) fn select<'a>(
        &'a mut self,
        select: &'a Select,
    ) -> BoxFuture<'a, ExecResult<Arc<SelectUnit>>> {
        async move {
            // Evaluated before the scan, outside of the query scope.
            let limit = self.optional_scalar(select.limit).await?;
            let offset = self.optional_scalar(select.offset).await?;

            let scan = self.scan(select.from.as_ref(), select.filter).await?;
            let projection = self.projection(select).await;
            self.pop_rows();
            let Projection {
                units,
                columns,
                visible,
                order,
            } = projection?;

            Ok(Arc::new(SelectUnit {
                scan,
                units,
                columns,
                visible,
                distinct: select.distinct,
                order,
                limit,
                offset,
            }))
        }
        .boxed()
    }

    async fn optional_scalar(&mut self, id: Option<NodeId>) -> ExecResult<Option<Unit>> {
        match id {
            Some(id) => Ok(Some(self.scalar(id).await?)),
            None => Ok(None),
        }
    }

    /// Compiles the output columns and the sort keys against the innermost
    /// query scope.
    async fn projection(&mut self, select: &Select) -> ExecResult<Projection> {
        let Some(scope) = self.rows.last().cloned() else {
            return Err(Error::ExecError("query scope is missing".into()));
        };
        let mut units: Vec<Unit> = Vec::new();
        let mut columns = Vec::new();
        // Output position of every aliased expression.
        let mut aliases: Vec<(&str, usize)> = Vec::new();
        let mut exprs: Vec<(NodeId, usize)> = Vec::new();

        let all = [SelectColumn::All];
        let select_columns = if select.columns.is_empty() {
            &all[..]
        } else {
            &select.columns[..]
        };
        for column in select_columns {
            match column {
                SelectColumn::All => {
                    for (index, column) in scope.columns.iter().enumerate() {
                        units.push(Arc::new(ColumnUnit {
                            slot: scope.slot.clone(),
                            index,
                            ty: column.ty,
                        }));
                        columns.push(column.clone());
                    }
                }
                SelectColumn::Expr { expr, alias } => {
                    let unit = self.scalar(*expr).await?;
                    let name = match alias {
                        Some(alias) => {
                            aliases.push((alias, columns.len()));
                            alias.clone()
                        }
                        None => self.column_name(*expr, columns.len()),
                    };
                    exprs.push((*expr, columns.len()));
                    columns.push(Column::new(name, unit.output_type()));
                    units.push(unit);
                }
            }
        }

        let visible = units.len();
        let mut order = Vec::with_capacity(select.order_by.len());
        for order_by in &select.order_by {
            let output = self
                .output_alias(order_by.expr, &aliases)
                .or_else(|| {
                    exprs
                        .iter()
                        .find(|(expr, _)| *expr == order_by.expr)
                        .map(|(_, i)| *i)
                });
            let column = match output {
                Some(column) => column,
                None => {
                    let unit = self.scalar(order_by.expr).await?;
                    columns.push(Column::new(
                        format!("order{}", order.len() + 1),
                        unit.output_type(),
                    ));
                    units.push(unit);
                    units.len() - 1
                }
            };
            order.push(OrderKey {
                column,
                direction: order_by.direction,
                nulls: order_by.nulls,
            });
        }

        Ok(Projection {
            units,
            columns,
            visible,
            order,
        })
    }

    fn output_alias(&self, id: NodeId, aliases: &[(&str, usize)]) -> Option<usize> {
        let Node::Identifier(ident) = self.program.node(id) else {
            return None;
        };
        if !ident.selectors.is_empty() {
            return None;
        }
        aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(&ident.name))
            .map(|(_, i)| *i)
    }

    fn column_name(&self, id: NodeId, position: usize) -> String {
        match self.program.node(id) {
            Node::Identifier(ident) => match ident.selectors.last() {
                Some(Selector::Property(name)) => name.clone(),
                Some(Selector::Index(_)) => ident.full_name(),
                None => ident.name.clone(),
            },
            _ => format!("column{}", position + 1),
        }
    }
}
