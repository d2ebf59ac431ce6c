use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::{
    ast::{FromClause, FromSource, Node, NodeId, Selector},
    compile::{Compiler, LiteralUnit, RowScope, RowSlot, Unit},
    data::{
        close_after, convert, Column, FrameIterator, InputIterator, InputObject, Row, RowsFrame,
        RowsIterator, SharedInput,
    },
    error::{Error, ExecResult},
    exec::ExecCtx,
    select::{FilterRowsIterator, KeyConditionPlan, SetKeysRowsIterator},
    types::Value,
};

pub(crate) enum SourcePlan {
    /// No `FROM`: a single row without columns.
    Empty,
    Values(Vec<Vec<Unit>>),
    Expr(Unit),
}

/// A resolved `FROM` value. Resolving opens nothing, so an unused one is
/// just dropped.
pub(crate) enum Prepared {
    /// An input, with whether the scan owns it.
    Input(SharedInput, bool),
    Rows(Box<dyn RowsIterator>),
}

impl Prepared {
    async fn resolve(value: &Value, ctx: &ExecCtx) -> ExecResult<Prepared> {
        if value.downcast_object::<InputObject>().is_some() || matches!(value, Value::String(_)) {
            let (input, owned) = convert::to_input(value, ctx.sources().as_ref()).await?;
            return Ok(Prepared::Input(input, owned));
        }
        Ok(Prepared::Rows(convert::to_iterator(value).await?))
    }

    async fn columns(&self) -> Vec<Column> {
        match self {
            Prepared::Input(input, _) => input.lock().await.columns().to_vec(),
            Prepared::Rows(rows) => rows.columns().to_vec(),
        }
    }
}

/// The scan of a query source, with the filter applied.
pub(crate) struct ScanPlan {
    pub source: SourcePlan,
    pub slot: RowSlot,
    pub conditions: Vec<KeyConditionPlan>,
    pub filter: Option<Unit>,
    /// The `FROM` value resolved while compiling, with the epoch it was
    /// resolved in. Only a scan opened in that same epoch uses it; the
    /// source may have been rebound since.
    prepared: Mutex<Option<(u64, Prepared)>>,
}

/// A scan ready to be pulled.
pub(crate) struct OpenedScan {
    pub iterator: Box<dyn RowsIterator>,
    /// The scanned input, when the source is one.
    pub input: Option<SharedInput>,
}

impl ScanPlan {
    pub async fn open(&self, ctx: &mut ExecCtx) -> ExecResult<OpenedScan> {
        let prepared = self
            .prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .and_then(|(epoch, prepared)| {
                if epoch == ctx.epoch() {
                    return Some(prepared);
                }
                trace!(epoch, "discarding a source resolved by an earlier statement");
                None
            });
        let (iterator, input): (Box<dyn RowsIterator>, _) = match &self.source {
            SourcePlan::Empty => {
                let mut frame = RowsFrame::new(Vec::new());
                frame.push(Row::new(0))?;
                (Box::new(FrameIterator::new(Arc::new(frame))), None)
            }
            SourcePlan::Values(rows) => {
                let frame = values_frame(rows, ctx).await?;
                (Box::new(FrameIterator::new(Arc::new(frame))), None)
            }
            SourcePlan::Expr(unit) => {
                let prepared = match prepared {
                    Some(prepared) => prepared,
                    None => {
                        let value = unit.invoke(ctx).await?;
                        Prepared::resolve(&value, ctx).await?
                    }
                };
                match prepared {
                    Prepared::Input(input, owned) => {
                        let inner = InputIterator::new(Arc::clone(&input), owned).await;
                        let iterator: Box<dyn RowsIterator> = if self.conditions.is_empty() {
                            Box::new(inner)
                        } else {
                            let conditions =
                                self.conditions.iter().map(KeyConditionPlan::bind).collect();
                            Box::new(SetKeysRowsIterator::new(inner, conditions))
                        };
                        (iterator, Some(input))
                    }
                    Prepared::Rows(mut rows) if !self.conditions.is_empty() => {
                        let err =
                            Error::ExecError("the query source is no longer a rows input".into());
                        return close_after(&mut rows, Err(err)).await;
                    }
                    Prepared::Rows(rows) => (rows, None),
                }
            }
        };
        let iterator: Box<dyn RowsIterator> = match &self.filter {
            Some(predicate) => Box::new(FilterRowsIterator::new(
                iterator,
                Arc::clone(predicate),
                self.slot.clone(),
            )),
            None => iterator,
        };
        Ok(OpenedScan { iterator, input })
    }
}

pub(crate) async fn values_frame(rows: &[Vec<Unit>], ctx: &mut ExecCtx) -> ExecResult<RowsFrame> {
    let width = rows.first().map_or(0, Vec::len);
    let mut frame = RowsFrame::new(values_columns(rows));
    for row in rows {
        let mut values = Vec::with_capacity(width);
        for unit in row {
            values.push(unit.invoke(ctx).await?);
        }
        frame.push(Row::from(values))?;
    }
    Ok(frame)
}

/// `column1`, `column2`... typed after the first row.
fn values_columns(rows: &[Vec<Unit>]) -> Vec<Column> {
    rows.first()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, unit)| Column::new(format!("column{}", i + 1), unit.output_type()))
                .collect()
        })
        .unwrap_or_default()
}

impl Compiler<'_> {
    /// Compiles the scan of a query and pushes its scope, which the caller
    /// pops once done with the query.
    pub(crate) async fn scan(
        &mut self,
        from: Option<&FromClause>,
        filter: Option<NodeId>,
    ) -> ExecResult<ScanPlan> {
        let mut alias = from.and_then(|from| from.alias.clone());
        let mut keys = Vec::new();
        let mut prepared = None;
        let (source, columns) = match from.map(|from| &from.source) {
            None => (SourcePlan::Empty, Vec::new()),
            Some(FromSource::Values(rows)) => {
                let mut units = Vec::with_capacity(rows.len());
                for row in rows {
                    units.push(self.scalars(row).await?);
                }
                if let Some(first) = units.first() {
                    if units.iter().any(|row| row.len() != first.len()) {
                        return Err(Error::ExecError(
                            "all the VALUES rows must have the same width".into(),
                        ));
                    }
                }
                let columns = values_columns(&units);
                (SourcePlan::Values(units), columns)
            }
            Some(FromSource::Expr(id)) => {
                let unit = self.source_expr(*id).await?;
                if alias.is_none() {
                    alias = self.default_alias(*id);
                }
                let value = unit.invoke(self.ctx).await?;
                let resolved = Prepared::resolve(&value, self.ctx).await?;
                let columns = resolved.columns().await;
                if let Prepared::Input(input, _) = &resolved {
                    keys = input.lock().await.key_columns().to_vec();
                }
                prepared = Some((self.ctx.epoch(), resolved));
                (SourcePlan::Expr(unit), columns)
            }
        };

        let slot = RowSlot::default();
        self.push_rows(RowScope {
            alias,
            columns: columns.into(),
            slot: slot.clone(),
        });
        let plan = match self.plan_filter(filter, &keys).await {
            Ok(plan) => plan,
            Err(err) => {
                self.pop_rows();
                return Err(err);
            }
        };
        Ok(ScanPlan {
            source,
            slot,
            conditions: plan.conditions,
            filter: plan.residual,
            prepared: Mutex::new(prepared),
        })
    }

    /// Compiles a `FROM` expression. Names matching nothing are source
    /// names, resolved through the source factory.
    pub(crate) async fn source_expr(&mut self, id: NodeId) -> ExecResult<Unit> {
        match self.expr(id).await {
            Err(Error::CannotFindIdentifier(name))
                if matches!(self.program.node(id), Node::Identifier(_)) =>
            {
                Ok(Arc::new(LiteralUnit(Value::String(name))))
            }
            other => other,
        }
    }

    fn default_alias(&self, id: NodeId) -> Option<String> {
        match self.program.node(id) {
            Node::Identifier(ident) => match ident.selectors.last() {
                Some(Selector::Property(name)) => Some(name.clone()),
                Some(Selector::Index(_)) => None,
                None => Some(ident.name.clone()),
            },
            Node::Literal(Value::String(name)) => Some(name.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn values_columns_are_numbered() {
        let rows: Vec<Vec<Unit>> = vec![vec![
            Arc::new(LiteralUnit(1.into())),
            Arc::new(LiteralUnit("a".into())),
        ]];
        let columns = values_columns(&rows);
        assert_eq!(columns[0].name, "column1");
        assert_eq!(columns[0].ty, DataType::Integer);
        assert_eq!(columns[1].name, "column2");
        assert_eq!(columns[1].ty, DataType::String);
    }
}
