use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use crate::{
    ast::{Delete, FromClause, FromSource, Insert, InsertSource, Update},
    command::{CommandUnit, Completion},
    compile::{Compiler, Unit},
    data::{
        close_after, convert, find_column, Column, FrameIterator, Row, RowsIterator, SharedInput,
        SharedOutput,
    },
    error::{Error, ExecResult},
    exec::ExecCtx,
    select::{values_frame, ScanPlan},
    types::{cast, DataType, Value},
};

/// How source columns land into the target columns.
#[derive(Debug, PartialEq)]
pub(super) enum ColumnMapping {
    /// Rows are written as they are.
    Identity,
    /// `(source, target)` index pairs; target columns left out get null.
    Pairs { width: usize, pairs: Vec<(usize, usize)> },
}

impl ColumnMapping {
    /// Maps explicit target names, else by name, else by position
    /// (`positional` forces it, e.g., for `VALUES`). Source columns are
    /// mapped by name as soon as one of them matches a target column.
    pub fn resolve(
        explicit: &[String],
        positional: bool,
        source: &[Column],
        target: &[Column],
    ) -> ExecResult<ColumnMapping> {
        if target.is_empty() {
            return Ok(ColumnMapping::Identity);
        }
        let width = target.len();
        if !explicit.is_empty() {
            let pairs = explicit
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    find_column(target, name, None)
                        .map(|t| (i, t))
                        .ok_or_else(|| Error::CannotFindIdentifier(name.clone()))
                })
                .collect::<ExecResult<_>>()?;
            return Ok(ColumnMapping::Pairs { width, pairs });
        }
        if !positional {
            let found: Vec<_> = source
                .iter()
                .map(|column| find_column(target, &column.name, None))
                .collect();
            if found.iter().any(Option::is_some) {
                // Once mapping by name, every source column must land somewhere.
                let mut pairs = Vec::with_capacity(found.len());
                for (i, target) in found.into_iter().enumerate() {
                    let target =
                        target.ok_or_else(|| Error::CannotFindIdentifier(source[i].name.clone()))?;
                    pairs.push((i, target));
                }
                return Ok(ColumnMapping::Pairs { width, pairs });
            }
        }
        if source.len() > width {
            return Err(Error::ExecError(format!(
                "{} values for {width} target columns",
                source.len()
            )));
        }
        let pairs = (0..source.len()).map(|i| (i, i)).collect();
        Ok(ColumnMapping::Pairs { width, pairs })
    }

    fn apply(&self, row: &Row) -> Vec<Value> {
        match self {
            ColumnMapping::Identity => row.values().to_vec(),
            ColumnMapping::Pairs { width, pairs } => {
                let mut values = vec![Value::Null; *width];
                for &(source, target) in pairs {
                    values[target] = row.value(source);
                }
                values
            }
        }
    }
}

/// Streams `rows` into `output`, opening and closing both. Returns the
/// number of written rows.
pub(super) async fn write_rows(
    rows: &mut Box<dyn RowsIterator>,
    output: &SharedOutput,
    mapping: Option<&ColumnMapping>,
    ctx: &mut ExecCtx,
) -> ExecResult<u64> {
    if let Err(err) = output.lock().await.open().await {
        return close_after(rows, Err(err)).await;
    }
    let result = async {
        let mut written = 0;
        while rows.move_next(ctx).await? {
            let values = match mapping {
                Some(mapping) => mapping.apply(rows.current()),
                None => rows.current().values().to_vec(),
            };
            output.lock().await.write_values(&values).await?;
            written += 1;
        }
        Ok::<_, Error>(written)
    }
    .await;
    let result = close_after(rows, result).await;
    let output_closed = output.lock().await.close().await;
    match (result, output_closed) {
        (Ok(written), closed) => closed.map(|()| written),
        (Err(err), Err(close_err)) => {
            warn!(%close_err, %err, "failed to close output after an error");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}

enum InsertRows {
    Values(Vec<Vec<Unit>>),
    Query(Unit),
}

struct InsertCommand {
    target: Unit,
    columns: Vec<String>,
    rows: InsertRows,
}

impl InsertCommand {
    async fn rows(&self, ctx: &mut ExecCtx) -> ExecResult<Box<dyn RowsIterator>> {
        match &self.rows {
            InsertRows::Values(rows) => {
                let frame = values_frame(rows, ctx).await?;
                Ok(Box::new(FrameIterator::new(Arc::new(frame))))
            }
            InsertRows::Query(query) => {
                let rows = query.invoke(ctx).await?;
                convert::to_iterator(&rows).await
            }
        }
    }
}

#[async_trait]
impl CommandUnit for InsertCommand {
    #[instrument(name = "Insert", level = "debug", skip_all)]
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let target = self.target.invoke(ctx).await?;
        let output = convert::to_output(&target, ctx.sources().as_ref()).await?;
        let mut rows = self.rows(ctx).await?;

        let positional = matches!(self.rows, InsertRows::Values(_));
        let target_columns = output.lock().await.columns().to_vec();
        let mapping = match ColumnMapping::resolve(
            &self.columns,
            positional,
            rows.columns(),
            &target_columns,
        ) {
            Ok(mapping) => mapping,
            Err(err) => return close_after(&mut rows, Err(err)).await,
        };
        trace!(?mapping, "insert mapping");

        let written = write_rows(&mut rows, &output, Some(&mapping), ctx).await?;
        debug!(written, "inserted rows");
        ctx.record_rows(written);
        Ok(Completion::Normal(Value::Integer(written as i64)))
    }
}

pub(super) async fn insert(
    compiler: &mut Compiler<'_>,
    insert: &Insert,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let target = compiler.source_expr(insert.target).await?;
    let rows = match &insert.source {
        InsertSource::Values(rows) => {
            let mut units = Vec::with_capacity(rows.len());
            for row in rows {
                units.push(compiler.scalars(row).await?);
            }
            InsertRows::Values(units)
        }
        InsertSource::Query(query) => InsertRows::Query(compiler.expr(*query).await?),
    };
    Ok(Arc::new(InsertCommand {
        target,
        columns: insert.columns.clone(),
        rows,
    }))
}

#[derive(Clone, Copy)]
enum Capability {
    Update,
    Delete,
}

/// Opens the scan of an `UPDATE` or a `DELETE`, checking that the source is
/// an input with the capability before anything is read.
async fn open_target(
    scan: &ScanPlan,
    capability: Capability,
    ctx: &mut ExecCtx,
) -> ExecResult<(Box<dyn RowsIterator>, SharedInput)> {
    let opened = scan.open(ctx).await?;
    let mut iterator = opened.iterator;
    if let Some(input) = opened.input {
        let supported = {
            let mut guard = input.lock().await;
            match capability {
                Capability::Update => guard.as_updatable().is_some(),
                Capability::Delete => guard.as_deletable().is_some(),
            }
        };
        if supported {
            return Ok((iterator, input));
        }
    }
    let err = match capability {
        Capability::Update => Error::SourceNotUpdatable,
        Capability::Delete => Error::SourceNotDeletable,
    };
    close_after(&mut iterator, Err(err)).await
}

struct UpdateCommand {
    scan: ScanPlan,
    /// Target column index, declared kind and new value.
    assignments: Vec<(usize, DataType, Unit)>,
}

impl UpdateCommand {
    async fn update_rows(
        &self,
        rows: &mut Box<dyn RowsIterator>,
        input: &SharedInput,
        ctx: &mut ExecCtx,
    ) -> ExecResult<u64> {
        let mut touched = 0;
        while rows.move_next(ctx).await? {
            self.scan.slot.set(rows.current());
            let mut values = Vec::with_capacity(self.assignments.len());
            for (column, ty, unit) in &self.assignments {
                let mut value = unit.invoke(ctx).await?;
                if ty.is_static() {
                    value = cast::cast(&value, *ty)?;
                }
                values.push((*column, value));
            }

            let mut input = input.lock().await;
            let Some(updatable) = input.as_updatable() else {
                return Err(Error::SourceNotUpdatable);
            };
            let mut changed = false;
            for (column, value) in values {
                changed |= updatable.update_value(column, value).await?;
            }
            if changed {
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl CommandUnit for UpdateCommand {
    #[instrument(name = "Update", level = "debug", skip_all)]
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let (mut rows, input) = open_target(&self.scan, Capability::Update, ctx).await?;
        let result = self.update_rows(&mut rows, &input, ctx).await;
        let touched = close_after(&mut rows, result).await?;
        debug!(touched, "updated rows");
        ctx.record_rows(touched);
        Ok(Completion::Normal(Value::Integer(touched as i64)))
    }
}

pub(super) async fn update(
    compiler: &mut Compiler<'_>,
    update: &Update,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let from = FromClause {
        source: FromSource::Expr(update.target),
        alias: update.alias.clone(),
    };
    let scan = compiler.scan(Some(&from), update.filter).await?;
    let assignments = assignments(compiler, update).await;
    compiler.pop_rows();
    Ok(Arc::new(UpdateCommand {
        scan,
        assignments: assignments?,
    }))
}

/// Compiles the `SET` list against the target scope.
async fn assignments(
    compiler: &mut Compiler<'_>,
    update: &Update,
) -> ExecResult<Vec<(usize, DataType, Unit)>> {
    let Some(scope) = compiler.rows.last().cloned() else {
        return Err(Error::ExecError("update scope is missing".into()));
    };
    let mut out = Vec::with_capacity(update.assignments.len());
    for (name, value) in &update.assignments {
        let column = scope
            .find(name, None)
            .ok_or_else(|| Error::CannotFindIdentifier(name.clone()))?;
        let unit = compiler.scalar(*value).await?;
        out.push((column, scope.columns[column].ty, unit));
    }
    Ok(out)
}

struct DeleteCommand {
    scan: ScanPlan,
}

impl DeleteCommand {
    async fn delete_rows(
        &self,
        rows: &mut Box<dyn RowsIterator>,
        input: &SharedInput,
        ctx: &mut ExecCtx,
    ) -> ExecResult<u64> {
        let mut deleted = 0;
        while rows.move_next(ctx).await? {
            let mut input = input.lock().await;
            let Some(deletable) = input.as_deletable() else {
                return Err(Error::SourceNotDeletable);
            };
            if deletable.delete().await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl CommandUnit for DeleteCommand {
    #[instrument(name = "Delete", level = "debug", skip_all)]
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let (mut rows, input) = open_target(&self.scan, Capability::Delete, ctx).await?;
        let result = self.delete_rows(&mut rows, &input, ctx).await;
        let deleted = close_after(&mut rows, result).await?;
        debug!(deleted, "deleted rows");
        ctx.record_rows(deleted);
        Ok(Completion::Normal(Value::Integer(deleted as i64)))
    }
}

pub(super) async fn delete(
    compiler: &mut Compiler<'_>,
    delete: &Delete,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let from = FromClause {
        source: FromSource::Expr(delete.target),
        alias: delete.alias.clone(),
    };
    let scan = compiler.scan(Some(&from), delete.filter).await?;
    compiler.pop_rows();
    Ok(Arc::new(DeleteCommand { scan }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<Column> {
        names
            .iter()
            .map(|name| Column::new(*name, DataType::Dynamic))
            .collect()
    }

    #[test]
    fn maps_by_name_then_by_position() {
        let target = columns(&["id", "name", "age"]);
        let by_name = ColumnMapping::resolve(&[], false, &columns(&["name", "id"]), &target);
        assert_eq!(
            by_name.unwrap(),
            ColumnMapping::Pairs {
                width: 3,
                pairs: vec![(0, 1), (1, 0)]
            }
        );

        let by_position = ColumnMapping::resolve(&[], false, &columns(&["a", "b"]), &target);
        assert_eq!(
            by_position.unwrap(),
            ColumnMapping::Pairs {
                width: 3,
                pairs: vec![(0, 0), (1, 1)]
            }
        );
    }

    #[test]
    fn partial_name_matches_are_refused() {
        let target = columns(&["id", "title"]);
        let err = ColumnMapping::resolve(&[], false, &columns(&["id", "name"]), &target);
        assert!(matches!(err, Err(Error::CannotFindIdentifier(name)) if name == "name"));
    }

    #[test]
    fn explicit_columns_must_exist() {
        let target = columns(&["id", "name"]);
        let explicit = vec!["name".to_owned(), "missing".to_owned()];
        let err = ColumnMapping::resolve(&explicit, true, &columns(&["a", "b"]), &target);
        assert!(matches!(err, Err(Error::CannotFindIdentifier(name)) if name == "missing"));
    }

    #[test]
    fn unfilled_columns_are_null() {
        let mapping = ColumnMapping::Pairs {
            width: 3,
            pairs: vec![(0, 2)],
        };
        let row = Row::from(vec![Value::Integer(7)]);
        assert_eq!(
            mapping.apply(&row),
            vec![Value::Null, Value::Null, Value::Integer(7)]
        );
        assert_eq!(ColumnMapping::Identity.apply(&row), vec![Value::Integer(7)]);
    }
}
