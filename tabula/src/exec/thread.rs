use std::{
    collections::hash_map::RandomState,
    sync::{
        atomic::{self, AtomicU64},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::{
    ast::{NodeId, Program, ProgramId},
    command::CommandUnit,
    config::ExecutionOptions,
    data::{NoSources, SourceFactory},
    error::{Error, ExecResult},
    exec::{
        scope::{lock_scopes, SharedScopes},
        ExecCtx, ExecutionStatistic,
    },
    functions::FunctionRegistry,
    types::Value,
    util::{cache::Cache, lock::AsyncLock},
};

/// Runs programs, owning their variables and statistic.
///
/// This is a cheap handle: clones share the same state. Runs on the same
/// thread are serialized (see [`ExecutionOptions::prevent_concurrent_run`]),
/// whereas different threads only share the function registry and the data
/// sources.
#[derive(Clone)]
pub struct ExecutionThread {
    pub(crate) inner: Arc<ThreadInner>,
}

pub(crate) struct ThreadInner {
    id: u64,
    options: ExecutionOptions,
    registry: Arc<FunctionRegistry>,
    sources: Arc<dyn SourceFactory>,
    pub(crate) scopes: SharedScopes,
    statistic: Mutex<ExecutionStatistic>,
    pub(crate) run_lock: AsyncLock,
    pub(crate) span: Span,
    /// Compiled statements, by program and node. Least used ones are
    /// evicted past [`ExecutionOptions::max_compiled_statements`].
    pub(crate) statements: Cache<(ProgramId, NodeId), Arc<dyn CommandUnit>>,
}

impl ExecutionThread {
    pub fn new(options: ExecutionOptions) -> ExecutionThread {
        ExecutionThread::builder(options).build()
    }

    pub fn builder(options: ExecutionOptions) -> ExecutionThreadBuilder {
        ExecutionThreadBuilder {
            options,
            registry: None,
            sources: None,
            span: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.inner.registry
    }

    pub fn sources(&self) -> &Arc<dyn SourceFactory> {
        &self.inner.sources
    }

    /// Returns a snapshot of the statistic.
    pub fn statistic(&self) -> ExecutionStatistic {
        self.statistic_mut(|statistic| statistic.clone())
    }

    /// Runs all the statements of `program`, returning the value of the
    /// last one (or of the `RETURN` that ended it).
    pub async fn run(&self, program: Arc<Program>, cancel: CancellationToken) -> ExecResult<Value> {
        let mut ctx = ExecCtx::new(self.clone(), cancel);
        ctx.run(program).await
    }

    /// Reads a variable of the root scope, shared by every run.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        lock_scopes(&self.inner.scopes).get(None, name)
    }

    /// Defines a variable in the root scope.
    pub fn declare_variable(&self, name: &str, value: impl Into<Value>) {
        lock_scopes(&self.inner.scopes).declare(None, name, value.into());
    }

    /// Forgets every compiled statement.
    pub fn clear_compiled(&self) {
        self.inner.statements.clear();
    }

    /// Number of compiled statements currently cached.
    pub fn compiled_count(&self) -> u64 {
        self.inner.statements.len()
    }

    pub(crate) fn record_statement(&self, program: ProgramId, id: NodeId, elapsed: Duration) {
        let detailed = self.inner.options.show_detailed_statistic;
        self.statistic_mut(|statistic| {
            statistic.statements_executed += 1;
            if detailed {
                statistic.record_detail(program, id, elapsed);
            }
        });
    }

    pub(crate) fn record_rows(&self, rows: u64) {
        self.statistic_mut(|statistic| statistic.rows_processed += rows);
    }

    pub(crate) fn record_run(&self, elapsed: Duration, error: Option<&Error>) {
        self.statistic_mut(|statistic| {
            statistic.execution_time += elapsed;
            if let Some(error) = error {
                statistic.record_error(error);
            }
        });
    }

    fn statistic_mut<T>(&self, f: impl FnOnce(&mut ExecutionStatistic) -> T) -> T {
        let mut statistic = self
            .inner
            .statistic
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut statistic)
    }
}

/// Configures an [`ExecutionThread`].
pub struct ExecutionThreadBuilder {
    options: ExecutionOptions,
    registry: Option<Arc<FunctionRegistry>>,
    sources: Option<Arc<dyn SourceFactory>>,
    span: Option<Span>,
}

impl ExecutionThreadBuilder {
    /// Shares a function registry. Defaults to a new standard one.
    pub fn registry(mut self, registry: Arc<FunctionRegistry>) -> ExecutionThreadBuilder {
        self.registry = Some(registry);
        self
    }

    /// Sets the data source factory. Defaults to one that knows no source.
    pub fn sources(mut self, sources: Arc<dyn SourceFactory>) -> ExecutionThreadBuilder {
        self.sources = Some(sources);
        self
    }

    /// Sets the span every run is instrumented under.
    pub fn span(mut self, span: Span) -> ExecutionThreadBuilder {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> ExecutionThread {
        static THREAD_ID: AtomicU64 = AtomicU64::new(1);
        let id = THREAD_ID.fetch_add(1, atomic::Ordering::AcqRel);

        let max_errors = self.options.max_errors;
        let inner = ThreadInner {
            id,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(FunctionRegistry::standard())),
            sources: self.sources.unwrap_or_else(|| Arc::new(NoSources)),
            scopes: SharedScopes::default(),
            statistic: Mutex::new(ExecutionStatistic::new(max_errors)),
            run_lock: AsyncLock::new(),
            span: self
                .span
                .unwrap_or_else(|| tracing::info_span!("execution_thread", thread = id)),
            statements: Cache::new(self.options.max_compiled_statements, RandomState::new()),
            options: self.options,
        };
        ExecutionThread {
            inner: Arc::new(inner),
        }
    }
}
