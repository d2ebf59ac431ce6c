//! Pipeline stages of a query.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use tracing::trace;

use crate::{
    compile::{RowSlot, Unit},
    config::ROW_NUMBER_COLUMN,
    data::{Column, Row, RowsFrame, RowsIterator},
    error::ExecResult,
    exec::ExecCtx,
    index::{OrderColumnsIndex, OrderKey, OrderRowsIterator},
    types::{DataType, Value},
};

/// Keeps the rows satisfying a predicate.
pub struct FilterRowsIterator {
    inner: Box<dyn RowsIterator>,
    predicate: Unit,
    slot: RowSlot,
}

impl FilterRowsIterator {
    pub fn new(inner: Box<dyn RowsIterator>, predicate: Unit, slot: RowSlot) -> FilterRowsIterator {
        FilterRowsIterator {
            inner,
            predicate,
            slot,
        }
    }
}

#[async_trait]
impl RowsIterator for FilterRowsIterator {
    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn current(&self) -> &Row {
        self.inner.current()
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        while self.inner.move_next(ctx).await? {
            self.slot.set(self.inner.current());
            if self.predicate.invoke(ctx).await?.is_truthy() {
                return Ok(true);
            }
            trace!("row filtered out");
        }
        Ok(false)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }
}

/// Evaluates the output expressions of a query over every row.
pub struct ProjectRowsIterator {
    inner: Box<dyn RowsIterator>,
    units: Vec<Unit>,
    columns: Vec<Column>,
    slot: RowSlot,
    row: Row,
}

impl ProjectRowsIterator {
    pub fn new(
        inner: Box<dyn RowsIterator>,
        units: Vec<Unit>,
        columns: Vec<Column>,
        slot: RowSlot,
    ) -> ProjectRowsIterator {
        ProjectRowsIterator {
            row: Row::new(columns.len()),
            inner,
            units,
            columns,
            slot,
        }
    }
}

#[async_trait]
impl RowsIterator for ProjectRowsIterator {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        &self.row
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if !self.inner.move_next(ctx).await? {
            return Ok(false);
        }
        self.slot.set(self.inner.current());
        let mut values = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            values.push(unit.invoke(ctx).await?);
        }
        self.row = Row::from(values);
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }
}

/// Materializes its input on the first pull and returns it sorted. Only the
/// first `visible` columns are exposed, the others being sort keys only.
pub struct OrderRowsStage {
    inner: Option<Box<dyn RowsIterator>>,
    keys: Vec<OrderKey>,
    columns: Vec<Column>,
    sorted: Option<OrderRowsIterator>,
    empty: Row,
}

impl OrderRowsStage {
    pub fn new(inner: Box<dyn RowsIterator>, keys: Vec<OrderKey>, visible: usize) -> OrderRowsStage {
        let columns: Vec<Column> = inner.columns().iter().take(visible).cloned().collect();
        OrderRowsStage {
            empty: Row::new(columns.len()),
            inner: Some(inner),
            keys,
            columns,
            sorted: None,
        }
    }
}

#[async_trait]
impl RowsIterator for OrderRowsStage {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        self.sorted
            .as_ref()
            .map_or(&self.empty, |sorted| sorted.current())
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if self.sorted.is_none() {
            let Some(mut inner) = self.inner.take() else {
                return Ok(false);
            };
            let frame = RowsFrame::collect(&mut inner, ctx).await?;
            let index = OrderColumnsIndex::new(Arc::new(frame), self.keys.clone())?;
            self.sorted = Some(index.iterator(self.columns.len()));
        }
        match &mut self.sorted {
            Some(sorted) => sorted.move_next(ctx).await,
            None => Ok(false),
        }
    }

    /// Rewinds over the rows already sorted; the input is not read again.
    async fn reset(&mut self) -> ExecResult<()> {
        match &mut self.sorted {
            Some(sorted) => sorted.reset().await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> ExecResult<()> {
        match self.inner.take() {
            Some(mut inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

/// `OFFSET` and `LIMIT`.
pub struct LimitRowsIterator {
    inner: Box<dyn RowsIterator>,
    offset: u64,
    limit: Option<u64>,
    skipped: bool,
    taken: u64,
}

impl LimitRowsIterator {
    pub fn new(inner: Box<dyn RowsIterator>, offset: u64, limit: Option<u64>) -> LimitRowsIterator {
        LimitRowsIterator {
            inner,
            offset,
            limit,
            skipped: false,
            taken: 0,
        }
    }
}

#[async_trait]
impl RowsIterator for LimitRowsIterator {
    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn current(&self) -> &Row {
        self.inner.current()
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.offset {
                if !self.inner.move_next(ctx).await? {
                    return Ok(false);
                }
            }
        }
        if self.limit.is_some_and(|limit| self.taken >= limit) {
            return Ok(false);
        }
        let moved = self.inner.move_next(ctx).await?;
        if moved {
            self.taken += 1;
        }
        Ok(moved)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.skipped = false;
        self.taken = 0;
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }
}

/// `DISTINCT`: skips the rows whose first `width` values were already
/// returned. Placed before the order stage, so the hidden sort keys are not
/// part of the comparison.
pub struct DistinctRowsIterator {
    inner: Box<dyn RowsIterator>,
    width: usize,
    seen: HashSet<Vec<DistinctCell>>,
}

impl DistinctRowsIterator {
    pub fn new(inner: Box<dyn RowsIterator>, width: usize) -> DistinctRowsIterator {
        DistinctRowsIterator {
            inner,
            width,
            seen: HashSet::new(),
        }
    }
}

#[async_trait]
impl RowsIterator for DistinctRowsIterator {
    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn current(&self) -> &Row {
        self.inner.current()
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        while self.inner.move_next(ctx).await? {
            let values = self.inner.current().values();
            let key = values[..self.width.min(values.len())]
                .iter()
                .map(DistinctCell::from)
                .collect();
            if self.seen.insert(key) {
                return Ok(true);
            }
            trace!("duplicate row skipped");
        }
        Ok(false)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.seen.clear();
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }
}

/// A hashable image of a value. Nulls are equal to each other, as are NaNs
/// and both zeros. Blobs compare by content and objects by identity.
#[derive(PartialEq, Eq, Hash)]
enum DistinctCell {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    Numeric(Decimal),
    String(String),
    Timestamp(NaiveDateTime),
    Interval(TimeDelta),
    Blob(Vec<u8>),
    Object(usize),
}

impl From<&Value> for DistinctCell {
    fn from(value: &Value) -> DistinctCell {
        match value {
            Value::Null => DistinctCell::Null,
            Value::Boolean(b) => DistinctCell::Boolean(*b),
            Value::Integer(n) => DistinctCell::Integer(*n),
            Value::Float(f) if f.is_nan() => DistinctCell::Float(f64::NAN.to_bits()),
            // -0.0 + 0.0 is 0.0
            Value::Float(f) => DistinctCell::Float((f + 0.0).to_bits()),
            Value::Numeric(d) => DistinctCell::Numeric(*d),
            Value::String(s) => DistinctCell::String(s.clone()),
            Value::Timestamp(t) => DistinctCell::Timestamp(*t),
            Value::Interval(i) => DistinctCell::Interval(*i),
            Value::Blob(blob) => DistinctCell::Blob(blob.to_vec()),
            Value::Object(object) => DistinctCell::Object(object.addr()),
        }
    }
}

/// Prepends the 1-based position of every row.
pub struct RowNumberRowsIterator {
    inner: Box<dyn RowsIterator>,
    columns: Vec<Column>,
    number: i64,
    row: Row,
}

impl RowNumberRowsIterator {
    pub fn new(inner: Box<dyn RowsIterator>) -> RowNumberRowsIterator {
        let mut columns = Vec::with_capacity(inner.columns().len() + 1);
        columns.push(Column::new(ROW_NUMBER_COLUMN, DataType::Integer));
        columns.extend(inner.columns().iter().cloned());
        RowNumberRowsIterator {
            row: Row::new(columns.len()),
            inner,
            columns,
            number: 0,
        }
    }
}

#[async_trait]
impl RowsIterator for RowNumberRowsIterator {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        &self.row
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if !self.inner.move_next(ctx).await? {
            return Ok(false);
        }
        self.number += 1;
        let mut values = Vec::with_capacity(self.columns.len());
        values.push(Value::Integer(self.number));
        values.extend(self.inner.current().values().iter().cloned());
        self.row = Row::from(values);
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.number = 0;
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{config::ExecutionOptions, data::FrameIterator, exec::ExecutionThread};

    fn numbers(count: i64) -> Box<dyn RowsIterator> {
        let mut frame = RowsFrame::new(vec![Column::new("n", DataType::Integer)]);
        for n in 1..=count {
            frame.push(Row::from(vec![Value::Integer(n)])).unwrap();
        }
        Box::new(FrameIterator::new(Arc::new(frame)))
    }

    async fn pull(rows: &mut dyn RowsIterator, ctx: &mut ExecCtx) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        while rows.move_next(ctx).await.unwrap() {
            out.push(rows.current().values().to_vec());
        }
        out
    }

    #[tokio::test]
    async fn limit_skips_then_takes_and_restarts_on_reset() {
        let thread = ExecutionThread::new(ExecutionOptions::default());
        let mut ctx = ExecCtx::new(thread, CancellationToken::new());
        let mut rows = LimitRowsIterator::new(numbers(5), 1, Some(2));

        let expected = vec![vec![Value::Integer(2)], vec![Value::Integer(3)]];
        assert_eq!(pull(&mut rows, &mut ctx).await, expected);
        rows.reset().await.unwrap();
        assert_eq!(pull(&mut rows, &mut ctx).await, expected);
    }

    #[tokio::test]
    async fn distinct_compares_the_visible_columns_only() {
        let thread = ExecutionThread::new(ExecutionOptions::default());
        let mut ctx = ExecCtx::new(thread, CancellationToken::new());
        let mut frame = RowsFrame::new(vec![
            Column::new("kind", DataType::String),
            Column::new("n", DataType::Integer),
        ]);
        for (kind, n) in [("a", 1), ("b", 2), ("a", 3), ("b", 4), ("c", 5)] {
            frame
                .push(Row::from(vec![Value::from(kind), Value::Integer(n)]))
                .unwrap();
        }
        let inner = Box::new(FrameIterator::new(Arc::new(frame)));
        let mut rows = DistinctRowsIterator::new(inner, 1);

        let kinds = |out: Vec<Vec<Value>>| {
            out.into_iter()
                .map(|row| row[0].clone())
                .collect::<Vec<_>>()
        };
        let expected = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        assert_eq!(kinds(pull(&mut rows, &mut ctx).await), expected);
        rows.reset().await.unwrap();
        assert_eq!(kinds(pull(&mut rows, &mut ctx).await), expected);
    }

    #[test]
    fn distinct_cells_merge_nulls_nans_and_zeros() {
        let cell = |value: Value| DistinctCell::from(&value);
        assert!(cell(Value::Null) == cell(Value::Null));
        assert!(cell(Value::Float(f64::NAN)) == cell(Value::Float(-f64::NAN)));
        assert!(cell(Value::Float(-0.0)) == cell(Value::Float(0.0)));
        assert!(cell(Value::Integer(1)) != cell(Value::Float(1.0)));
    }

    #[tokio::test]
    async fn row_numbers_restart_on_reset() {
        let thread = ExecutionThread::new(ExecutionOptions::default());
        let mut ctx = ExecCtx::new(thread, CancellationToken::new());
        let mut rows = RowNumberRowsIterator::new(numbers(2));
        assert_eq!(rows.columns()[0].name, ROW_NUMBER_COLUMN);

        pull(&mut rows, &mut ctx).await;
        rows.reset().await.unwrap();
        let out = pull(&mut rows, &mut ctx).await;
        assert_eq!(out[0], vec![Value::Integer(1), Value::Integer(1)]);
        assert_eq!(out[1], vec![Value::Integer(2), Value::Integer(2)]);
    }
}
