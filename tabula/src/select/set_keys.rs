use async_trait::async_trait;
use tracing::trace;

use crate::{
    data::{Column, InputIterator, Row, RowsIterator},
    error::ExecResult,
    exec::ExecCtx,
    select::KeyConditionValueGenerator,
    types::{Operation, Value},
};

/// A key condition bound to its value generator.
pub struct KeyCondition {
    pub column: usize,
    pub op: Operation,
    pub generator: Box<dyn KeyConditionValueGenerator>,
}

/// Scans an input with key conditions pushed into it.
///
/// Before the first pull, every generator is moved to its first value and
/// the values are handed to the input. Whenever the scan is exhausted, the
/// multi-value generator (there is at most one) advances, its new value is
/// set and the input is rewound; the rows of all the scans are returned in
/// generation order. A generator without values makes the result empty.
pub struct SetKeysRowsIterator {
    inner: InputIterator,
    conditions: Vec<KeyCondition>,
    multi: Option<usize>,
    started: bool,
    exhausted: bool,
}

impl SetKeysRowsIterator {
    pub fn new(inner: InputIterator, conditions: Vec<KeyCondition>) -> SetKeysRowsIterator {
        let multi = conditions
            .iter()
            .position(|condition| condition.generator.is_multiple());
        SetKeysRowsIterator {
            inner,
            conditions,
            multi,
            started: false,
            exhausted: false,
        }
    }

    async fn set_key(&self, index: usize) -> ExecResult<()> {
        let condition = &self.conditions[index];
        let value = condition.generator.get().cloned().unwrap_or(Value::Null);
        trace!(column = condition.column, op = %condition.op, %value, "set key condition");
        let mut input = self.inner.input().lock().await;
        input
            .set_key_column_value(condition.column, condition.op, value)
            .await
    }

    /// Positions every generator on its first value. Returns `false` if one
    /// of them has none.
    async fn start(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        for condition in &mut self.conditions {
            condition.generator.reset().await?;
            if !condition.generator.move_next(ctx).await? {
                return Ok(false);
            }
        }
        for index in 0..self.conditions.len() {
            self.set_key(index).await?;
        }
        self.inner.rewind();
        Ok(true)
    }

    /// Moves to the next value of the multi-value generator, preparing a new
    /// scan.
    async fn next_scan(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        let Some(index) = self.multi else {
            return Ok(false);
        };
        if !self.conditions[index].generator.move_next(ctx).await? {
            return Ok(false);
        }
        self.set_key(index).await?;
        self.inner.rewind();
        Ok(true)
    }
}

#[async_trait]
impl RowsIterator for SetKeysRowsIterator {
    fn columns(&self) -> &[Column] {
        self.inner.columns()
    }

    fn current(&self) -> &Row {
        self.inner.current()
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if !self.started {
            self.started = true;
            if !self.start(ctx).await? {
                self.exhausted = true;
                return Ok(false);
            }
        }
        loop {
            if self.inner.move_next(ctx).await? {
                return Ok(true);
            }
            if !self.next_scan(ctx).await? {
                self.exhausted = true;
                return Ok(false);
            }
        }
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.started = false;
        self.exhausted = false;
        self.inner.reset().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        let mut first_error = None;
        {
            let mut input = self.inner.input().lock().await;
            for condition in &self.conditions {
                if let Err(err) = input
                    .unset_key_column_value(condition.column, condition.op)
                    .await
                {
                    first_error.get_or_insert(err);
                }
            }
        }
        for condition in &mut self.conditions {
            if let Err(err) = condition.generator.reset().await {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.inner.close().await {
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
