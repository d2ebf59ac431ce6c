use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    data::{Column, KeyColumn},
    error::{Error, ExecResult},
    types::{Operation, Value},
};

/// A pull-based source of rows.
///
/// The cursor starts before the first row: `read_next` must be called (and
/// return `true`) before values can be read. Sources that can evaluate
/// conditions by themselves declare [`KeyColumn`]s; the engine then hands
/// them the values to compare against before scanning.
#[async_trait]
pub trait RowsInput: Send + Sync {
    fn columns(&self) -> &[Column];

    async fn open(&mut self) -> ExecResult<()>;

    async fn close(&mut self) -> ExecResult<()>;

    /// Rewinds the cursor to before the first row.
    async fn reset(&mut self) -> ExecResult<()>;

    /// Reads a value of the current row.
    async fn read_value(&self, column_index: usize) -> ExecResult<Value>;

    /// Advances to the next row. Returns `false` once exhausted.
    async fn read_next(&mut self) -> ExecResult<bool>;

    fn key_columns(&self) -> &[KeyColumn] {
        &[]
    }

    /// Supplies the value a key column is compared against by `op`.
    async fn set_key_column_value(
        &mut self,
        _column_index: usize,
        _op: Operation,
        _value: Value,
    ) -> ExecResult<()> {
        Ok(())
    }

    async fn unset_key_column_value(&mut self, _column_index: usize, _op: Operation) -> ExecResult<()> {
        Ok(())
    }

    /// Returns the update capability, if the input supports it.
    fn as_updatable(&mut self) -> Option<&mut dyn RowsInputUpdate> {
        None
    }

    /// Returns the delete capability, if the input supports it.
    fn as_deletable(&mut self) -> Option<&mut dyn RowsInputDelete> {
        None
    }
}

/// In-place update of the current row.
#[async_trait]
pub trait RowsInputUpdate: Send + Sync {
    /// Returns `true` if the row was changed.
    async fn update_value(&mut self, column_index: usize, value: Value) -> ExecResult<bool>;
}

/// Removal of the current row.
#[async_trait]
pub trait RowsInputDelete: Send + Sync {
    /// Returns `true` if the row was removed.
    async fn delete(&mut self) -> ExecResult<bool>;
}

/// A rows input shared between variables and pipeline stages.
pub type SharedInput = Arc<Mutex<dyn RowsInput>>;

pub fn shared_input<I: RowsInput + 'static>(input: I) -> SharedInput {
    Arc::new(Mutex::new(input))
}

/// Reads all the values of the current row.
pub async fn read_row(input: &dyn RowsInput) -> ExecResult<Vec<Value>> {
    let mut values = Vec::with_capacity(input.columns().len());
    for i in 0..input.columns().len() {
        values.push(input.read_value(i).await?);
    }
    Ok(values)
}

/// Exposes a [`SharedInput`] as an owned input, so that wrappers (like the
/// retrying one) can be stacked on top of it.
pub struct SharedRowsInput {
    inner: SharedInput,
    columns: Vec<Column>,
    key_columns: Vec<KeyColumn>,
    updatable: bool,
    deletable: bool,
}

impl SharedRowsInput {
    pub async fn new(inner: SharedInput) -> SharedRowsInput {
        let mut guard = inner.lock().await;
        let columns = guard.columns().to_vec();
        let key_columns = guard.key_columns().to_vec();
        let updatable = guard.as_updatable().is_some();
        let deletable = guard.as_deletable().is_some();
        drop(guard);
        SharedRowsInput {
            inner,
            columns,
            key_columns,
            updatable,
            deletable,
        }
    }
}

#[async_trait]
impl RowsInput for SharedRowsInput {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn open(&mut self) -> ExecResult<()> {
        self.inner.lock().await.open().await
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.inner.lock().await.close().await
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.inner.lock().await.reset().await
    }

    async fn read_value(&self, column_index: usize) -> ExecResult<Value> {
        self.inner.lock().await.read_value(column_index).await
    }

    async fn read_next(&mut self) -> ExecResult<bool> {
        self.inner.lock().await.read_next().await
    }

    fn key_columns(&self) -> &[KeyColumn] {
        &self.key_columns
    }

    async fn set_key_column_value(
        &mut self,
        column_index: usize,
        op: Operation,
        value: Value,
    ) -> ExecResult<()> {
        let mut inner = self.inner.lock().await;
        inner.set_key_column_value(column_index, op, value).await
    }

    async fn unset_key_column_value(&mut self, column_index: usize, op: Operation) -> ExecResult<()> {
        let mut inner = self.inner.lock().await;
        inner.unset_key_column_value(column_index, op).await
    }

    fn as_updatable(&mut self) -> Option<&mut dyn RowsInputUpdate> {
        if self.updatable {
            Some(self)
        } else {
            None
        }
    }

    fn as_deletable(&mut self) -> Option<&mut dyn RowsInputDelete> {
        if self.deletable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl RowsInputUpdate for SharedRowsInput {
    async fn update_value(&mut self, column_index: usize, value: Value) -> ExecResult<bool> {
        let mut inner = self.inner.lock().await;
        let updatable = inner.as_updatable().ok_or(Error::SourceNotUpdatable)?;
        updatable.update_value(column_index, value).await
    }
}

#[async_trait]
impl RowsInputDelete for SharedRowsInput {
    async fn delete(&mut self) -> ExecResult<bool> {
        let mut inner = self.inner.lock().await;
        let deletable = inner.as_deletable().ok_or(Error::SourceNotDeletable)?;
        deletable.delete().await
    }
}
