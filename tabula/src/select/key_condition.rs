//! Producers of the values a pushed-down condition is compared against.
//!
//! Every generator is a cursor: the position is -1 before the first value,
//! `move_next` advances it and `get` returns the value under it (the same
//! value until the next `move_next`). `reset` brings the cursor back to -1,
//! releasing whatever was opened to produce the values.

use async_trait::async_trait;

use crate::{
    compile::Unit,
    data::{convert, RowsIterator},
    error::ExecResult,
    exec::ExecCtx,
    types::Value,
};

#[async_trait]
pub trait KeyConditionValueGenerator: Send + Sync {
    /// Index of the current value; -1 before the first one.
    fn position(&self) -> i64;

    /// Returns `true` if the generator may yield more than one value.
    fn is_multiple(&self) -> bool;

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool>;

    /// The current value, if the cursor is on one.
    fn get(&self) -> Option<&Value>;

    async fn reset(&mut self) -> ExecResult<()>;
}

/// A single value, e.g., `id = 10`.
pub struct SingleValueGenerator {
    unit: Unit,
    value: Option<Value>,
    position: i64,
}

impl SingleValueGenerator {
    pub fn new(unit: Unit) -> SingleValueGenerator {
        SingleValueGenerator {
            unit,
            value: None,
            position: -1,
        }
    }
}

#[async_trait]
impl KeyConditionValueGenerator for SingleValueGenerator {
    fn position(&self) -> i64 {
        self.position
    }

    fn is_multiple(&self) -> bool {
        false
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if self.position >= 0 {
            self.position = 1;
            self.value = None;
            return Ok(false);
        }
        self.value = Some(self.unit.invoke(ctx).await?);
        self.position = 0;
        Ok(true)
    }

    fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = -1;
        self.value = None;
        Ok(())
    }
}

/// A fixed list, e.g., `id IN (1, 2, 3)`.
pub struct ArrayValuesGenerator {
    units: Vec<Unit>,
    value: Option<Value>,
    position: i64,
}

impl ArrayValuesGenerator {
    pub fn new(units: Vec<Unit>) -> ArrayValuesGenerator {
        ArrayValuesGenerator {
            units,
            value: None,
            position: -1,
        }
    }
}

#[async_trait]
impl KeyConditionValueGenerator for ArrayValuesGenerator {
    fn position(&self) -> i64 {
        self.position
    }

    fn is_multiple(&self) -> bool {
        true
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        let next = self.position + 1;
        match usize::try_from(next).ok().and_then(|i| self.units.get(i)) {
            Some(unit) => {
                self.value = Some(unit.invoke(ctx).await?);
                self.position = next;
                Ok(true)
            }
            None => {
                self.value = None;
                self.position = self.units.len() as i64;
                Ok(false)
            }
        }
    }

    fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = -1;
        self.value = None;
        Ok(())
    }
}

/// Pulls the first column of some rows, created when the first value is
/// requested.
struct RowsCursor {
    rows: Option<Box<dyn RowsIterator>>,
    value: Option<Value>,
    position: i64,
}

impl RowsCursor {
    fn new() -> RowsCursor {
        RowsCursor {
            rows: None,
            value: None,
            position: -1,
        }
    }

    async fn move_next(&mut self, rows: &mut Box<dyn RowsIterator>, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if rows.move_next(ctx).await? {
            self.value = Some(rows.current().value(0));
            self.position += 1;
            Ok(true)
        } else {
            self.value = None;
            Ok(false)
        }
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = -1;
        self.value = None;
        if let Some(mut rows) = self.rows.take() {
            rows.close().await?;
        }
        Ok(())
    }
}

/// The rows of a subquery, e.g., `id IN (SELECT ...)`. The subquery runs
/// again after every reset.
pub struct IteratorValuesGenerator {
    query: Unit,
    cursor: RowsCursor,
}

impl IteratorValuesGenerator {
    pub fn new(query: Unit) -> IteratorValuesGenerator {
        IteratorValuesGenerator {
            query,
            cursor: RowsCursor::new(),
        }
    }
}

#[async_trait]
impl KeyConditionValueGenerator for IteratorValuesGenerator {
    fn position(&self) -> i64 {
        self.cursor.position
    }

    fn is_multiple(&self) -> bool {
        true
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        let mut rows = match self.cursor.rows.take() {
            Some(rows) => rows,
            None => {
                let value = self.query.invoke(ctx).await?;
                convert::to_iterator(&value).await?
            }
        };
        let moved = self.cursor.move_next(&mut rows, ctx).await;
        self.cursor.rows = Some(rows);
        moved
    }

    fn get(&self) -> Option<&Value> {
        self.cursor.value.as_ref()
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.cursor.reset().await
    }
}

/// A variable (or any expression) resolved when the first value is
/// requested: objects holding rows yield their first column, any other
/// value is yielded alone.
pub struct VariableValuesGenerator {
    unit: Unit,
    cursor: RowsCursor,
    scalar: Option<Value>,
    resolved: bool,
}

impl VariableValuesGenerator {
    pub fn new(unit: Unit) -> VariableValuesGenerator {
        VariableValuesGenerator {
            unit,
            cursor: RowsCursor::new(),
            scalar: None,
            resolved: false,
        }
    }
}

#[async_trait]
impl KeyConditionValueGenerator for VariableValuesGenerator {
    fn position(&self) -> i64 {
        self.cursor.position
    }

    fn is_multiple(&self) -> bool {
        true
    }

    async fn move_next(&mut self, ctx: &mut ExecCtx) -> ExecResult<bool> {
        if !self.resolved {
            self.resolved = true;
            let value = self.unit.invoke(ctx).await?;
            if matches!(value, Value::Object(_)) {
                self.cursor.rows = Some(convert::to_iterator(&value).await?);
            } else {
                self.scalar = Some(value);
            }
        }
        match self.cursor.rows.take() {
            Some(mut rows) => {
                let moved = self.cursor.move_next(&mut rows, ctx).await;
                self.cursor.rows = Some(rows);
                moved
            }
            None => match self.scalar.take() {
                Some(value) => {
                    self.cursor.value = Some(value);
                    self.cursor.position = 0;
                    Ok(true)
                }
                None => {
                    self.cursor.value = None;
                    Ok(false)
                }
            },
        }
    }

    fn get(&self) -> Option<&Value> {
        self.cursor.value.as_ref()
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.resolved = false;
        self.scalar = None;
        self.cursor.reset().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{compile::LiteralUnit, config::ExecutionOptions, exec::ExecutionThread};

    fn ctx() -> ExecCtx {
        ExecCtx::new(ExecutionThread::new(ExecutionOptions::default()), CancellationToken::new())
    }

    fn lit(value: impl Into<Value>) -> Unit {
        Arc::new(LiteralUnit(value.into()))
    }

    async fn collect(generator: &mut dyn KeyConditionValueGenerator, ctx: &mut ExecCtx) -> Vec<Value> {
        let mut out = Vec::new();
        while generator.move_next(ctx).await.unwrap() {
            // Repeated reads don't move the cursor.
            assert_eq!(generator.get(), generator.get());
            out.push(generator.get().cloned().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn array_cursor_resets_to_before_first() {
        let mut ctx = ctx();
        let mut generator = ArrayValuesGenerator::new(vec![lit(1), lit(2), lit(3)]);
        assert_eq!(generator.position(), -1);
        let values = collect(&mut generator, &mut ctx).await;
        assert_eq!(values, vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(generator.get(), None);

        generator.reset().await.unwrap();
        assert_eq!(generator.position(), -1);
        assert_eq!(collect(&mut generator, &mut ctx).await.len(), 3);
    }

    #[tokio::test]
    async fn single_yields_once() {
        let mut ctx = ctx();
        let mut generator = SingleValueGenerator::new(lit("a"));
        assert!(!generator.is_multiple());
        assert_eq!(collect(&mut generator, &mut ctx).await, vec!["a".into()]);
        generator.reset().await.unwrap();
        assert_eq!(generator.position(), -1);
    }

    #[tokio::test]
    async fn variable_scalar_is_single_value() {
        let mut ctx = ctx();
        let mut generator = VariableValuesGenerator::new(lit(7));
        assert_eq!(collect(&mut generator, &mut ctx).await, vec![7.into()]);
        generator.reset().await.unwrap();
        assert_eq!(collect(&mut generator, &mut ctx).await, vec![7.into()]);
    }
}
