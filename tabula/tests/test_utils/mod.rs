use std::sync::Arc;

use tabula::{
    data::{shared_output, Column, KeyColumn, MemorySources, MemoryTable, SourceFactory},
    types::{Operation, Value},
    DataType, ExecutionOptions, ExecutionThread,
};

/// Sets up tracing subscriber.
#[allow(dead_code)]
pub fn setup_tracing(level: Option<&str>) {
    use tracing_subscriber::{
        fmt::{format::FmtSpan, layer},
        layer::SubscriberExt,
        util::SubscriberInitExt,
        EnvFilter,
    };

    let filter_layer = level
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or("warn".into()));
    let fmt_layer = layer().with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Several tests of the same binary may race to install it.
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}

/// A thread reading from (and writing to) the given tables.
#[allow(dead_code)]
pub struct TestEnv {
    pub sources: Arc<MemorySources>,
    pub thread: ExecutionThread,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new(options: ExecutionOptions) -> TestEnv {
        TestEnv::build(Arc::new(MemorySources::new()), options)
    }

    /// Same as [`TestEnv::new`], with queries writing into the returned
    /// `out` table.
    pub fn with_output(
        options: ExecutionOptions,
        columns: &[(&str, DataType)],
    ) -> (TestEnv, Arc<MemoryTable>) {
        let sources = Arc::new(MemorySources::new());
        let out = sources.register(MemoryTable::new("out", to_columns(columns)));
        let options = options.with_default_output(shared_output(out.output()));
        (TestEnv::build(sources, options), out)
    }

    fn build(sources: Arc<MemorySources>, options: ExecutionOptions) -> TestEnv {
        let factory: Arc<dyn SourceFactory> = Arc::clone(&sources) as _;
        let thread = ExecutionThread::builder(options).sources(factory).build();
        TestEnv { sources, thread }
    }

    /// Registers `users(id, name, age)` with three rows. `id` takes pushed
    /// `=` conditions.
    pub fn users(&self) -> Arc<MemoryTable> {
        let table = MemoryTable::new(
            "users",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::String),
                Column::new("age", DataType::Integer),
            ],
        )
        .with_key_column(KeyColumn::new(0).with_operation(Operation::Equals));
        for (id, name, age) in [(1, "ann", 31), (2, "bob", 25), (3, "cid", 47)] {
            table
                .insert(vec![Value::Integer(id), name.into(), Value::Integer(age)])
                .unwrap();
        }
        self.sources.register(table)
    }

    /// Registers an empty table.
    pub fn table(&self, name: &str, columns: &[(&str, DataType)]) -> Arc<MemoryTable> {
        self.sources.register(MemoryTable::new(name, to_columns(columns)))
    }
}

fn to_columns(columns: &[(&str, DataType)]) -> Vec<Column> {
    columns
        .iter()
        .map(|(name, ty)| Column::new(*name, *ty))
        .collect()
}

/// The values of every row of `table`.
#[allow(dead_code)]
pub fn dump(table: &MemoryTable) -> Vec<Vec<Value>> {
    table
        .rows()
        .into_iter()
        .map(|row| row.into_values())
        .collect()
}
