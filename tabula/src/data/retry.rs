use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{debug, instrument, warn};

use crate::{
    config,
    data::{Column, KeyColumn, RowsInput, RowsInputDelete, RowsInputUpdate},
    error::{Error, ExecResult},
    types::{Operation, Value},
};

/// Retry budget of a [`RetryRowsInput`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry. It doubles on every further attempt.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_retries: config::DEFAULT_MAX_RETRIES,
            interval: config::DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.interval.saturating_mul(1 << attempt.min(16))
    }
}

/// Retries the failing `open`, `reset` and `read_next` calls of the
/// wrapped input.
///
/// Once the budget is exhausted, the error of the last attempt is returned
/// as is.
pub struct RetryRowsInput {
    inner: Box<dyn RowsInput>,
    policy: RetryPolicy,
    failures: Arc<AtomicUsize>,
}

impl RetryRowsInput {
    pub fn new(inner: Box<dyn RowsInput>, policy: RetryPolicy) -> RetryRowsInput {
        RetryRowsInput {
            inner,
            policy,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of failures recorded so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// A handle to the failure counter that outlives the input.
    pub fn failure_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.failures)
    }

    async fn retry<T, F>(&mut self, what: &'static str, mut op: F) -> ExecResult<T>
    where
        T: Send,
        F: for<'a> FnMut(&'a mut dyn RowsInput) -> BoxFuture<'a, ExecResult<T>> + Send,
    {
        let mut attempt = 0;
        loop {
            match op(&mut *self.inner).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    self.failures.fetch_add(1, Ordering::AcqRel);
                    if !err.is_retryable() || attempt >= self.policy.max_retries {
                        warn!(what, attempt, %err, "giving up");
                        return Err(err);
                    }
                    self.backoff(what, attempt, &err).await;
                    attempt += 1;
                }
            }
        }
    }

    #[instrument(name = "InputRetry", level = "debug", skip_all, fields(what = what, attempt = attempt))]
    async fn backoff(&self, what: &'static str, attempt: u32, err: &Error) {
        let delay = self.policy.delay(attempt);
        debug!(%err, ?delay, "retrying");
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl RowsInput for RetryRowsInput {
    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    async fn open(&mut self) -> ExecResult<()> {
        self.retry("open", |input| input.open()).await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.close().await
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.retry("reset", |input| input.reset()).await
    }

    async fn read_value(&self, column_index: usize) -> ExecResult<Value> {
        self.inner.read_value(column_index).await
    }

    async fn read_next(&mut self) -> ExecResult<bool> {
        self.retry("read_next", |input| input.read_next()).await
    }

    fn key_columns(&self) -> &[KeyColumn] {
        self.inner.key_columns()
    }

    async fn set_key_column_value(
        &mut self,
        column_index: usize,
        op: Operation,
        value: Value,
    ) -> ExecResult<()> {
        self.inner.set_key_column_value(column_index, op, value).await
    }

    async fn unset_key_column_value(&mut self, column_index: usize, op: Operation) -> ExecResult<()> {
        self.inner.unset_key_column_value(column_index, op).await
    }

    fn as_updatable(&mut self) -> Option<&mut dyn RowsInputUpdate> {
        self.inner.as_updatable()
    }

    fn as_deletable(&mut self) -> Option<&mut dyn RowsInputDelete> {
        self.inner.as_deletable()
    }
}
