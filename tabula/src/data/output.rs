use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{data::Column, error::ExecResult, types::Value};

/// A sink of rows.
#[async_trait]
pub trait RowsOutput: Send + Sync {
    /// Declared target columns. Outputs that accept any shape return an
    /// empty slice.
    fn columns(&self) -> &[Column] {
        &[]
    }

    async fn open(&mut self) -> ExecResult<()>;

    async fn close(&mut self) -> ExecResult<()>;

    async fn write_values(&mut self, values: &[Value]) -> ExecResult<()>;
}

pub type SharedOutput = Arc<Mutex<dyn RowsOutput>>;

pub fn shared_output<O: RowsOutput + 'static>(output: O) -> SharedOutput {
    Arc::new(Mutex::new(output))
}

/// Discards everything written into it.
#[derive(Debug, Default)]
pub struct NullRowsOutput;

#[async_trait]
impl RowsOutput for NullRowsOutput {
    async fn open(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn write_values(&mut self, _values: &[Value]) -> ExecResult<()> {
        Ok(())
    }
}
