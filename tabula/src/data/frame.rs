use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    data::{iterator::drain, Column, Row, RowsIterator},
    error::{Error, ExecResult},
    exec::ExecCtx,
};

/// Materialized rows.
#[derive(Debug, Clone, Default)]
pub struct RowsFrame {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl RowsFrame {
    pub fn new(columns: Vec<Column>) -> RowsFrame {
        RowsFrame {
            columns,
            rows: Vec::new(),
        }
    }

    /// Reads the whole iterator, closing it afterwards.
    pub async fn collect<I>(iterator: &mut I, ctx: &mut ExecCtx) -> ExecResult<RowsFrame>
    where
        I: RowsIterator + ?Sized,
    {
        let mut frame = RowsFrame::new(iterator.columns().to_vec());
        let rows = &mut frame.rows;
        drain(iterator, ctx, |_, row| {
            rows.push(row.clone());
            Ok(())
        })
        .await?;
        Ok(frame)
    }

    pub fn push(&mut self, row: Row) -> ExecResult<()> {
        if row.len() != self.columns.len() {
            return Err(Error::ExecError(format!(
                "row has {} values, but the frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }
}

/// A cursor over a [`RowsFrame`].
pub struct FrameIterator {
    frame: Arc<RowsFrame>,
    /// `None` before the first row.
    position: Option<usize>,
    empty: Row,
}

impl FrameIterator {
    pub fn new(frame: Arc<RowsFrame>) -> FrameIterator {
        FrameIterator {
            empty: Row::new(frame.columns().len()),
            frame,
            position: None,
        }
    }

    pub fn frame(&self) -> &Arc<RowsFrame> {
        &self.frame
    }

    /// Moves the cursor to the given row. Returns `false` if out of bounds.
    pub fn seek(&mut self, position: usize) -> bool {
        if position < self.frame.len() {
            self.position = Some(position);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RowsIterator for FrameIterator {
    fn columns(&self) -> &[Column] {
        self.frame.columns()
    }

    fn current(&self) -> &Row {
        self.position
            .and_then(|i| self.frame.row(i))
            .unwrap_or(&self.empty)
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        ctx.check_cancelled()?;
        let next = self.position.map_or(0, |i| i + 1);
        if next >= self.frame.len() {
            self.position = Some(self.frame.len());
            return Ok(false);
        }
        self.position = Some(next);
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = None;
        Ok(())
    }
}
