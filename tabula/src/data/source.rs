use async_trait::async_trait;

use crate::{
    data::{SharedInput, SharedOutput},
    error::{Error, ExecResult},
};

/// Resolves source names (file paths, URIs, table names...) into rows
/// inputs and outputs.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Creates a new, not yet opened, input.
    async fn create_input(&self, uri: &str) -> ExecResult<SharedInput>;

    /// Creates a new, not yet opened, output.
    async fn create_output(&self, uri: &str) -> ExecResult<SharedOutput>;
}

/// A factory that knows no sources.
#[derive(Debug, Default)]
pub struct NoSources;

#[async_trait]
impl SourceFactory for NoSources {
    async fn create_input(&self, uri: &str) -> ExecResult<SharedInput> {
        Err(Error::CannotFindIdentifier(uri.to_owned()))
    }

    async fn create_output(&self, uri: &str) -> ExecResult<SharedOutput> {
        Err(Error::CannotFindIdentifier(uri.to_owned()))
    }
}
