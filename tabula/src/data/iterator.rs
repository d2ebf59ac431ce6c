use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::{
    data::{input::read_row, Column, Row, SharedInput},
    error::ExecResult,
    exec::ExecCtx,
};

/// A stage of a rows pipeline.
///
/// The execution is based on the iterator model: `move_next` lazily pulls
/// one row at a time, which is then available through `current` until the
/// next pull.
#[async_trait]
pub trait RowsIterator: Send + Sync {
    fn columns(&self) -> &[Column];

    /// The current row. Only meaningful after `move_next` returned `true`.
    fn current(&self) -> &Row;

    /// Advances to the next row. Returns `false` once exhausted.
    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool>;

    /// Rewinds to before the first row.
    async fn reset(&mut self) -> ExecResult<()>;

    /// Releases the resources held by the stage. Must be called once the
    /// consumer is done with the iterator, on every exit path.
    async fn close(&mut self) -> ExecResult<()> {
        Ok(())
    }
}

pub type SharedIterator = Arc<Mutex<dyn RowsIterator>>;

pub fn shared_iterator<I: RowsIterator + 'static>(iterator: I) -> SharedIterator {
    Arc::new(Mutex::new(iterator))
}

#[async_trait]
impl RowsIterator for Box<dyn RowsIterator> {
    fn columns(&self) -> &[Column] {
        (**self).columns()
    }

    fn current(&self) -> &Row {
        (**self).current()
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        (**self).move_next(ctx).await
    }

    async fn reset(&mut self) -> ExecResult<()> {
        (**self).reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        (**self).close().await
    }
}

/// Closes `iterator` once the work over it ended with `result`.
///
/// A failing close only surfaces when the work succeeded. Otherwise it is
/// logged and the original error is returned.
pub async fn close_after<I, T>(iterator: &mut I, result: ExecResult<T>) -> ExecResult<T>
where
    I: RowsIterator + ?Sized,
{
    let closed = iterator.close().await;
    match (result, closed) {
        (Ok(out), Ok(())) => Ok(out),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(%close_err, %err, "failed to close rows after an error");
            Err(err)
        }
    }
}

/// Pulls every row of `iterator` through `f`, closing the iterator
/// afterwards whatever the outcome.
pub async fn drain<I, F>(iterator: &mut I, ctx: &mut ExecCtx, mut f: F) -> ExecResult<u64>
where
    I: RowsIterator + ?Sized,
    F: FnMut(&[Column], &Row) -> ExecResult<()> + Send,
{
    let result = async {
        let mut count = 0;
        while iterator.move_next(ctx).await? {
            f(iterator.columns(), iterator.current())?;
            count += 1;
        }
        Ok(count)
    }
    .await;
    close_after(iterator, result).await
}

/// Reads a rows input as an iterator.
///
/// An owned input is opened on the first pull and closed with the
/// iterator. A borrowed one (e.g., opened by an `OPEN` statement) is only
/// rewound.
pub struct InputIterator {
    input: SharedInput,
    columns: Vec<Column>,
    row: Row,
    owned: bool,
    opened: bool,
    needs_reset: bool,
}

impl InputIterator {
    pub async fn new(input: SharedInput, owned: bool) -> InputIterator {
        let columns = input.lock().await.columns().to_vec();
        InputIterator {
            row: Row::new(columns.len()),
            input,
            columns,
            owned,
            opened: false,
            needs_reset: !owned,
        }
    }

    pub fn input(&self) -> &SharedInput {
        &self.input
    }

    /// Makes sure the input is open and rewound, ready for a scan.
    pub(crate) async fn prepare(&mut self) -> ExecResult<()> {
        let mut input = self.input.lock().await;
        if self.owned && !self.opened {
            input.open().await?;
            self.opened = true;
        } else if self.needs_reset {
            input.reset().await?;
        }
        self.needs_reset = false;
        Ok(())
    }

    /// Requests a rewind before the next pull.
    pub(crate) fn rewind(&mut self) {
        self.needs_reset = true;
    }
}

#[async_trait]
impl RowsIterator for InputIterator {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        &self.row
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        ctx.check_cancelled()?;
        if self.needs_reset || (self.owned && !self.opened) {
            self.prepare().await?;
        }
        let mut input = self.input.lock().await;
        if !input.read_next().await? {
            return Ok(false);
        }
        self.row = Row::from(read_row(&*input).await?);
        trace!(row = ?self.row, "read input row");
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.rewind();
        Ok(())
    }

    async fn close(&mut self) -> ExecResult<()> {
        if self.owned && self.opened {
            self.opened = false;
            self.input.lock().await.close().await?;
        }
        Ok(())
    }
}

/// Pulls from an iterator shared through a value, keeping a copy of its
/// current row.
pub struct SharedIteratorReader {
    inner: SharedIterator,
    columns: Vec<Column>,
    row: Row,
}

impl SharedIteratorReader {
    pub async fn new(inner: SharedIterator) -> SharedIteratorReader {
        let columns = inner.lock().await.columns().to_vec();
        SharedIteratorReader {
            row: Row::new(columns.len()),
            inner,
            columns,
        }
    }
}

#[async_trait]
impl RowsIterator for SharedIteratorReader {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn current(&self) -> &Row {
        &self.row
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.move_next(ctx).await? {
            return Ok(false);
        }
        self.row = inner.current().clone();
        Ok(true)
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.inner.lock().await.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;

    use super::*;

    /// Fails reads after `rows` rows and always fails to close.
    struct Broken {
        rows: usize,
        row: Row,
    }

    #[async_trait]
    impl RowsIterator for Broken {
        fn columns(&self) -> &[Column] {
            &[]
        }

        fn current(&self) -> &Row {
            &self.row
        }

        async fn move_next(&mut self, _ctx: &mut ExecCtx) -> ExecResult<bool> {
            if self.rows == 0 {
                return Err(Error::Source("read failed".into()));
            }
            self.rows -= 1;
            Ok(true)
        }

        async fn reset(&mut self) -> ExecResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> ExecResult<()> {
            Err(Error::Source("close failed".into()))
        }
    }

    #[tokio::test]
    async fn close_failure_does_not_hide_the_original_error() {
        let mut rows = Broken {
            rows: 0,
            row: Row::new(0),
        };
        let err = close_after(&mut rows, Err::<(), _>(Error::DivisionByZero))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DivisionByZero));

        let err = close_after(&mut rows, Ok(1)).await.unwrap_err();
        assert!(matches!(err, Error::Source(msg) if msg == "close failed"));
    }

    #[tokio::test]
    async fn drain_reports_the_read_error() {
        use tokio_util::sync::CancellationToken;

        use crate::{config::ExecutionOptions, exec::ExecutionThread};

        let thread = ExecutionThread::new(ExecutionOptions::default());
        let mut ctx = ExecCtx::new(thread, CancellationToken::new());
        let mut rows = Broken {
            rows: 2,
            row: Row::new(0),
        };
        let mut seen = 0;
        let err = drain(&mut rows, &mut ctx, |_, _| {
            seen += 1;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Source(msg) if msg == "read failed"));
        assert_eq!(seen, 2);
    }
}
