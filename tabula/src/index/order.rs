use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{
    data::{Column, FrameIterator, Row, RowsFrame, RowsIterator},
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::{ops, Value},
};

/// Order by direction.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Placement of nulls, regardless of the direction.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum NullOrder {
    First,
    #[default]
    Last,
}

/// A sort key: a column index plus how to order it.
#[derive(Copy, Clone, Debug)]
pub struct OrderKey {
    pub column: usize,
    pub direction: OrderDirection,
    pub nulls: NullOrder,
}

impl OrderKey {
    pub fn asc(column: usize) -> OrderKey {
        OrderKey {
            column,
            direction: OrderDirection::Asc,
            nulls: NullOrder::Last,
        }
    }

    pub fn desc(column: usize) -> OrderKey {
        OrderKey {
            direction: OrderDirection::Desc,
            ..OrderKey::asc(column)
        }
    }

    pub fn nulls(mut self, nulls: NullOrder) -> OrderKey {
        self.nulls = nulls;
        self
    }

    /// Values must have been checked with [`OrderKey::check_comparable`].
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return self.null_side(),
            (false, true) => return self.null_side().reverse(),
            (false, false) => ops::total_compare(a, b).unwrap_or(Ordering::Equal),
        };
        match self.direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        }
    }

    /// Fails unless every non-null value of the key orders against the
    /// others. Comparable kinds form classes, so checking against the first
    /// value is enough.
    fn check_comparable(&self, rows: &[Row]) -> ExecResult<()> {
        let mut values = rows
            .iter()
            .map(|row| row.value(self.column))
            .filter(|value| !value.is_null());
        let Some(first) = values.next() else {
            return Ok(());
        };
        for value in values {
            if ops::total_compare(&first, &value).is_none() {
                return Err(Error::mismatch("ORDER BY", first.data_type(), value.data_type()));
            }
        }
        Ok(())
    }

    /// Where a null goes relative to a non-null value.
    fn null_side(&self) -> Ordering {
        match self.nulls {
            NullOrder::First => Ordering::Less,
            NullOrder::Last => Ordering::Greater,
        }
    }
}

/// Compares two rows key by key; the first unequal key decides.
fn compare_rows(a: &Row, b: &Row, keys: &[OrderKey]) -> Ordering {
    for key in keys {
        let ord = key.compare(&a.value(key.column), &b.value(key.column));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// A sort permutation over a materialized frame.
///
/// The index is never rebuilt on its own: when the frame changes, the
/// owner must call [`OrderColumnsIndex::rebuild`].
pub struct OrderColumnsIndex {
    frame: Arc<RowsFrame>,
    keys: Vec<OrderKey>,
    permutation: Arc<[usize]>,
}

impl OrderColumnsIndex {
    pub fn new(frame: Arc<RowsFrame>, keys: Vec<OrderKey>) -> ExecResult<OrderColumnsIndex> {
        let width = frame.columns().len();
        if let Some(key) = keys.iter().find(|key| key.column >= width) {
            return Err(Error::ExecError(format!(
                "order key column {} is out of range",
                key.column
            )));
        }
        let mut index = OrderColumnsIndex {
            frame,
            keys,
            permutation: Arc::from([]),
        };
        index.rebuild()?;
        Ok(index)
    }

    /// Sorts the row positions. Ties keep their original relative order.
    #[instrument(name = "OrderIndexRebuild", level = "debug", skip_all)]
    pub fn rebuild(&mut self) -> ExecResult<()> {
        let rows = self.frame.rows();
        for key in &self.keys {
            key.check_comparable(rows)?;
        }
        let mut permutation: Vec<usize> = (0..rows.len()).collect();
        permutation.sort_by(|&a, &b| compare_rows(&rows[a], &rows[b], &self.keys));
        debug!(rows = rows.len(), keys = self.keys.len(), "built order index");
        self.permutation = permutation.into();
        Ok(())
    }

    /// Replaces the frame and rebuilds the permutation.
    pub fn rebuild_with(&mut self, frame: Arc<RowsFrame>) -> ExecResult<()> {
        self.frame = frame;
        self.rebuild()
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Returns an iterator over the frame in index order, exposing the first
    /// `visible` columns.
    pub fn iterator(&self, visible: usize) -> OrderRowsIterator {
        let visible = visible.min(self.frame.columns().len());
        OrderRowsIterator {
            columns: self.frame.columns()[..visible].to_vec(),
            cursor: FrameIterator::new(Arc::clone(&self.frame)),
            permutation: Arc::clone(&self.permutation),
            position: None,
            row: Row::new(visible),
        }
    }
}

/// Reads a frame following an [`OrderColumnsIndex`] permutation, seeking the
/// frame cursor on every pull.
pub struct OrderRowsIterator {
    columns: Vec<Column>,
    cursor: FrameIterator,
    permutation: Arc<[usize]>,
    position: Option<usize>,
    row: Row,
}

#[async_trait]
impl RowsIterator for OrderRowsIterator {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        &self.row
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        ctx.check_cancelled()?;
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next);
        let Some(&target) = self.permutation.get(next) else {
            return Ok(false);
        };
        if !self.cursor.seek(target) {
            return Ok(false);
        }
        let mut row = self.cursor.current().clone();
        row.truncate(self.columns.len());
        self.row = row;
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn frame(rows: Vec<Vec<Value>>) -> Arc<RowsFrame> {
        let width = rows.first().map_or(1, Vec::len);
        let columns = (0..width)
            .map(|i| Column::new(format!("c{i}"), DataType::Dynamic))
            .collect();
        let mut frame = RowsFrame::new(columns);
        for row in rows {
            frame.push(Row::from(row)).unwrap();
        }
        Arc::new(frame)
    }

    fn sorted(frame: &Arc<RowsFrame>, keys: Vec<OrderKey>) -> Vec<Row> {
        let index = OrderColumnsIndex::new(Arc::clone(frame), keys).unwrap();
        index
            .permutation()
            .iter()
            .map(|&i| frame.rows()[i].clone())
            .collect()
    }

    #[test]
    fn multi_key_ascending() {
        let frame = frame(vec![
            vec![1.into(), "b".into()],
            vec![1.into(), "a".into()],
            vec![2.into(), "z".into()],
        ]);
        let rows = sorted(&frame, vec![OrderKey::asc(0), OrderKey::asc(1)]);
        let expected: Vec<Row> = vec![
            Row::from(vec![1.into(), "a".into()]),
            Row::from(vec![1.into(), "b".into()]),
            Row::from(vec![2.into(), "z".into()]),
        ];
        assert_eq!(rows, expected);
    }

    #[test]
    fn nulls_placement() {
        let frame = frame(vec![vec![3.into()], vec![Value::Null], vec![1.into()]]);
        let last: Vec<Value> = sorted(&frame, vec![OrderKey::asc(0)])
            .into_iter()
            .map(|r| r.value(0))
            .collect();
        assert_eq!(last, vec![1.into(), 3.into(), Value::Null]);

        let first: Vec<Value> = sorted(&frame, vec![OrderKey::desc(0).nulls(NullOrder::First)])
            .into_iter()
            .map(|r| r.value(0))
            .collect();
        assert_eq!(first, vec![Value::Null, 3.into(), 1.into()]);
    }

    #[test]
    fn ties_are_stable() {
        let frame = frame(vec![
            vec![1.into(), "first".into()],
            vec![0.into(), "x".into()],
            vec![1.into(), "second".into()],
            vec![1.into(), "third".into()],
        ]);
        let names: Vec<Value> = sorted(&frame, vec![OrderKey::asc(0)])
            .into_iter()
            .map(|r| r.value(1))
            .collect();
        assert_eq!(names, vec!["x".into(), "first".into(), "second".into(), "third".into()]);
    }

    #[test]
    fn nan_sorts_after_numbers() {
        let frame = frame(vec![
            vec![Value::Float(f64::NAN)],
            vec![2.into()],
            vec![Value::Null],
            vec![Value::Float(0.5)],
        ]);
        let values: Vec<Value> = sorted(&frame, vec![OrderKey::asc(0)])
            .into_iter()
            .map(|r| r.value(0))
            .collect();
        assert_eq!(values[..2], [Value::Float(0.5), Value::Integer(2)]);
        assert!(matches!(values[2], Value::Float(f) if f.is_nan()));
        assert!(values[3].is_null());
    }

    #[test]
    fn incomparable_keys_fail() {
        let frame = frame(vec![vec![1.into()], vec![Value::bytes(vec![0])]]);
        assert!(matches!(
            OrderColumnsIndex::new(frame, vec![OrderKey::asc(0)]),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
