use std::{
    sync::{
        atomic::{self, AtomicU64},
        Arc,
    },
    time::Instant,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::{
    ast::{NodeId, Program},
    command::{CommandUnit, Completion, Jump},
    compile::Compiler,
    config::ExecutionOptions,
    data::SourceFactory,
    error::{Error, ExecResult},
    exec::{
        scope::{lock_scopes, ScopeGuard},
        ExecutionThread,
    },
    functions::FunctionRegistry,
    types::Value,
    util::lock::ChainId,
};

/// The state of one call chain over an execution thread.
///
/// Everything that runs (units, iterators, functions) receives the context
/// of the chain it belongs to.
pub struct ExecCtx {
    thread: ExecutionThread,
    chain: ChainId,
    cancel: CancellationToken,
    depth: usize,
    /// Changes with every statement execution, across all chains.
    epoch: u64,
}

fn next_epoch() -> u64 {
    static EPOCH: AtomicU64 = AtomicU64::new(1);
    EPOCH.fetch_add(1, atomic::Ordering::Relaxed)
}

impl ExecCtx {
    pub(crate) fn new(thread: ExecutionThread, cancel: CancellationToken) -> ExecCtx {
        ExecCtx {
            thread,
            chain: ChainId::next(),
            cancel,
            depth: 0,
            epoch: 0,
        }
    }

    pub fn thread(&self) -> &ExecutionThread {
        &self.thread
    }

    pub fn options(&self) -> &ExecutionOptions {
        self.thread.options()
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        self.thread.registry()
    }

    pub fn sources(&self) -> &Arc<dyn SourceFactory> {
        self.thread.sources()
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with [`Error::Cancelled`] once the token is cancelled.
    pub fn check_cancelled(&self) -> ExecResult<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Identifies the statement execution in progress. Values computed while
    /// compiling are only valid within the same epoch.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of nested runs in progress.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        lock_scopes(&self.thread.inner.scopes).get(Some(self.chain), name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        lock_scopes(&self.thread.inner.scopes).contains(Some(self.chain), name)
    }

    /// Overwrites an existing variable.
    pub fn set_variable(&self, name: &str, value: Value) -> ExecResult<()> {
        lock_scopes(&self.thread.inner.scopes).set(Some(self.chain), name, value)
    }

    /// Defines a variable in the innermost scope.
    pub fn declare_variable(&self, name: &str, value: Value) {
        lock_scopes(&self.thread.inner.scopes).declare(Some(self.chain), name, value);
    }

    /// Opens a scope, closed when the guard is dropped.
    pub fn push_scope(&self) -> ScopeGuard {
        ScopeGuard::push(&self.thread.inner.scopes, self.chain)
    }

    pub(crate) fn record_rows(&self, rows: u64) {
        self.thread.record_rows(rows);
    }

    /// Runs a program within this chain, e.g., from a function body. Nested
    /// runs get their own scope and count towards the recursion limit.
    pub async fn run(&mut self, program: Arc<Program>) -> ExecResult<Value> {
        let (max_depth, prevent_concurrent_run) = {
            let options = self.options();
            (options.max_recursion_depth, options.prevent_concurrent_run)
        };
        if self.depth >= max_depth {
            return Err(Error::MaxRecursionDepth(max_depth));
        }

        let thread = self.thread.clone();
        let _lock = if prevent_concurrent_run {
            Some(thread.inner.run_lock.lock(self.chain, &self.cancel).await?)
        } else {
            None
        };
        let _scope = (self.depth > 0).then(|| self.push_scope());

        let started = Instant::now();
        self.depth += 1;
        let result = self
            .run_body(&program)
            .instrument(thread.inner.span.clone())
            .await;
        self.depth -= 1;

        if let Err(err) = &result {
            warn!(%err, chain = %self.chain, "run failed");
        }
        thread.record_run(started.elapsed(), result.as_ref().err());
        result
    }

    async fn run_body(&mut self, program: &Arc<Program>) -> ExecResult<Value> {
        let mut last = Value::Null;
        for &id in program.body() {
            match self.execute_statement(program, id).await? {
                Completion::Normal(value) => last = value,
                Completion::Jump(Jump::Return(value)) => return Ok(value),
                Completion::Jump(jump) => {
                    return Err(Error::ExecError(format!("`{jump}` outside of a loop")))
                }
            }
        }
        Ok(last)
    }

    /// Compiles (once) and executes a statement.
    pub(crate) async fn execute_statement(
        &mut self,
        program: &Arc<Program>,
        id: NodeId,
    ) -> ExecResult<Completion> {
        self.check_cancelled()?;
        self.epoch = next_epoch();
        let unit = self.statement(program, id).await?;
        let started = Instant::now();
        let result = unit.execute(self).await;
        self.thread.record_statement(program.id(), id, started.elapsed());
        result
    }

    /// Returns the compiled statement, compiling it on first use.
    pub(crate) async fn statement(
        &mut self,
        program: &Arc<Program>,
        id: NodeId,
    ) -> ExecResult<Arc<dyn CommandUnit>> {
        let key = (program.id(), id);
        if let Some(unit) = self.thread.inner.statements.get(&key) {
            return Ok(unit);
        }

        debug!(statement = %id, "compiling statement");
        let unit = Compiler::new(self, Arc::clone(program)).statement(id).await?;
        let thread = self.thread.clone();
        thread.inner.statements.insert(key, Arc::clone(&unit)).await;
        Ok(unit)
    }
}
