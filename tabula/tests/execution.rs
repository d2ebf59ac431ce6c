use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures_util::FutureExt;
use tabula::{
    ast::{ProgramBuilder, Select},
    data::{Column, InputObject, RowsInput},
    functions::{Function, FunctionRegistry},
    types::Operation,
    DataType, Error, ExecResult, ExecutionOptions, ExecutionThread, Value,
};
use tokio_util::sync::CancellationToken;

use crate::test_utils::{dump, setup_tracing, TestEnv};

mod test_utils;

/// Yields `1..=rows`, failing the first `failures` reads.
struct FlakyInput {
    columns: Vec<Column>,
    rows: i64,
    current: i64,
    failures: usize,
    failed: Arc<AtomicUsize>,
}

impl FlakyInput {
    fn new(rows: i64, failures: usize) -> (FlakyInput, Arc<AtomicUsize>) {
        let failed = Arc::new(AtomicUsize::new(0));
        let input = FlakyInput {
            columns: vec![Column::new("n", DataType::Integer)],
            rows,
            current: 0,
            failures,
            failed: Arc::clone(&failed),
        };
        (input, failed)
    }
}

#[async_trait]
impl RowsInput for FlakyInput {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn open(&mut self) -> ExecResult<()> {
        self.current = 0;
        Ok(())
    }

    async fn close(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.current = 0;
        Ok(())
    }

    async fn read_value(&self, _column_index: usize) -> ExecResult<Value> {
        Ok(Value::Integer(self.current))
    }

    async fn read_next(&mut self) -> ExecResult<bool> {
        if self.failed.load(Ordering::Acquire) < self.failures {
            self.failed.fetch_add(1, Ordering::AcqRel);
            return Err(Error::Source("connection reset".into()));
        }
        if self.current >= self.rows {
            return Ok(false);
        }
        self.current += 1;
        Ok(true)
    }
}

#[tokio::test]
async fn test_safe_mode_refuses_side_effects_before_reading() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default().with_safe_mode(true));
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let target = b.ident("users");
    let delete = b.delete(target, None);
    let program = b.build(vec![delete]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::SafeModeViolation(what)) if what == "DELETE"));
    assert_eq!(users.scan_count(), 0);
    assert_eq!(users.len(), 3);
}

#[tokio::test]
async fn test_safe_mode_refuses_select_into() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default().with_safe_mode(true));
    let users = env.users();
    let copy = env.table("copy", &[("id", DataType::Integer)]);

    let mut b = ProgramBuilder::new();
    let (id, users_ref, target) = (b.ident("id"), b.ident("users"), b.ident("copy"));
    let query = b.select(Select::new().column(id).from(users_ref).into_target(target));
    let program = b.build(vec![query]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::SafeModeViolation(_))));
    assert_eq!(users.scan_count(), 0);
    assert!(copy.is_empty());
}

#[tokio::test]
async fn test_safe_mode_allows_reads() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(
        ExecutionOptions::default().with_safe_mode(true),
        &[("name", DataType::String)],
    );
    env.users();

    let mut b = ProgramBuilder::new();
    let (name, users_ref) = (b.ident("name"), b.ident("users"));
    let upper = b.call("upper", vec![name]);
    let query = b.select(Select::new().column(upper).from(users_ref));
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();
    assert_eq!(out.len(), 3);
}

#[tokio::test]
async fn test_retried_input_recovers_from_failures() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("n", DataType::Integer)]);
    let (flaky, failed) = FlakyInput::new(3, 2);
    env.thread
        .declare_variable("flaky", Value::object(InputObject::new(flaky)));

    let mut b = ProgramBuilder::new();
    let (flaky, retries, interval) = (b.ident("flaky"), b.lit(3), b.lit(0.0));
    let source = b.call("retry_input", vec![flaky, retries, interval]);
    let n = b.ident("n");
    let query = b.select(Select::new().column(n).from(source));
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(failed.load(Ordering::Acquire), 2);
    assert_eq!(
        dump(&out),
        vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Integer(3)],
        ]
    );
}

#[tokio::test]
async fn test_retries_give_up_with_the_last_error() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("n", DataType::Integer)]);
    let (flaky, failed) = FlakyInput::new(3, 10);
    env.thread
        .declare_variable("flaky", Value::object(InputObject::new(flaky)));

    let mut b = ProgramBuilder::new();
    let (flaky, retries, interval) = (b.ident("flaky"), b.lit(1), b.lit(0.0));
    let source = b.call("retry_input", vec![flaky, retries, interval]);
    let query = b.select(Select::new().all().from(source));
    let program = b.build(vec![query]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Source(_))));
    assert_eq!(failed.load(Ordering::Acquire), 2);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_cancelled_run_stops_before_next_statement() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());

    let mut b = ProgramBuilder::new();
    let one = b.lit(1);
    let declare = b.declare("x", None, Some(one));
    let program = b.build(vec![declare]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = env.thread.run(program, cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(env.thread.get_variable("x"), None);
    assert_eq!(env.thread.statistic().errors.len(), 1);
}

#[tokio::test]
async fn test_nested_runs_reenter_the_lock_up_to_the_depth_limit() {
    setup_tracing(None);
    let mut b = ProgramBuilder::new();
    let call = b.call("recurse", vec![]);
    let ret = b.ret(Some(call));
    let program = b.build(vec![ret]);

    let registry = Arc::new(FunctionRegistry::new());
    let inner = Arc::clone(&program);
    registry.register(
        Function::builder("recurse")
            .returns(DataType::Dynamic)
            .async_body(move |ctx, _args| {
                let program = Arc::clone(&inner);
                async move { ctx.run(program).await }.boxed()
            }),
    );
    let options = ExecutionOptions::default()
        .with_prevent_concurrent_run(true)
        .with_max_recursion_depth(4);
    let thread = ExecutionThread::builder(options).registry(registry).build();

    let result = thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::MaxRecursionDepth(4))));
}

#[tokio::test]
async fn test_functions_resolve_overloads() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());

    let mut b = ProgramBuilder::new();
    let (null, text) = (b.null(), b.lit("x"));
    let first = b.call("coalesce", vec![null, text]);
    let typed = b.call("typeof", vec![first]);
    let (minus, five) = (b.lit(-2.5), b.lit(5));
    let abs = b.call("abs", vec![minus]);
    let sum = b.binary(Operation::Add, abs, five);
    let declare_sum = b.declare("sum", None, Some(sum));
    let ret = b.ret(Some(typed));
    let program = b.build(vec![declare_sum, ret]);

    let value = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(value, Value::from("string"));
    assert_eq!(env.thread.get_variable("sum"), Some(Value::Float(7.5)));
}

#[tokio::test]
async fn test_unknown_function() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());

    let mut b = ProgramBuilder::new();
    let one = b.lit(1);
    let call = b.call_statement("nope", vec![one]);
    let program = b.build(vec![call]);

    let result = env.thread.run(program, CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::FunctionNotFound(sig)) if sig == "nope(integer)"));
}

#[tokio::test]
async fn test_detailed_statistic_aggregates_loop_iterations() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default().with_detailed_statistic(true));

    let mut b = ProgramBuilder::new();
    let zero = b.lit(0);
    let declare = b.declare("n", None, Some(zero));
    let (one, hundred) = (b.lit(1), b.lit(100));
    let series = b.call("generate_series", vec![one, hundred]);
    let (n, one) = (b.ident("n"), b.lit(1));
    let inc = b.binary(Operation::Add, n, one);
    let count = b.set("n", inc);
    let each = b.for_each("i", series, vec![count]);
    let program = b.build(vec![declare, each]);

    env.thread
        .run(Arc::clone(&program), CancellationToken::new())
        .await
        .unwrap();

    let statistic = env.thread.statistic();
    assert_eq!(env.thread.get_variable("n"), Some(Value::Integer(100)));
    // The loop body block counts as a statement too.
    assert_eq!(statistic.details.len(), 4);
    assert_eq!(statistic.details[&(program.id(), count)].executions, 100);
    assert_eq!(statistic.details[&(program.id(), each)].executions, 1);
}

#[tokio::test]
async fn test_compiled_statements_are_bounded() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default().with_max_compiled_statements(8));

    for i in 0..64 {
        let mut b = ProgramBuilder::new();
        let value = b.lit(i64::from(i));
        let declare = b.declare("x", None, Some(value));
        let program = b.build(vec![declare]);
        env.thread.run(program, CancellationToken::new()).await.unwrap();
    }

    assert_eq!(env.thread.get_variable("x"), Some(Value::Integer(63)));
    assert!(env.thread.compiled_count() <= 8);
}

#[tokio::test]
async fn test_concurrent_runs_keep_their_loop_scopes() {
    setup_tracing(None);
    let registry = Arc::new(FunctionRegistry::standard());
    registry.register(
        Function::builder("pause")
            .returns(DataType::Dynamic)
            .async_body(|_ctx, _args| {
                async {
                    tokio::task::yield_now().await;
                    Ok(Value::Null)
                }
                .boxed()
            }),
    );
    let options = ExecutionOptions::default().with_prevent_concurrent_run(false);
    let thread = ExecutionThread::builder(options).registry(registry).build();
    thread.declare_variable("last_a", 0);
    thread.declare_variable("last_b", 0);

    let count_to = |rows: i64, target: &str| {
        let mut b = ProgramBuilder::new();
        let (one, last) = (b.lit(1), b.lit(rows));
        let series = b.call("generate_series", vec![one, last]);
        let pause = b.call_statement("pause", vec![]);
        let value = b.ident("i.value");
        let set = b.set(target, value);
        let each = b.for_each("i", series, vec![pause, set]);
        b.build(vec![each])
    };
    let (a, b) = (count_to(3, "last_a"), count_to(6, "last_b"));

    let (a, b) = tokio::join!(
        thread.run(a, CancellationToken::new()),
        thread.run(b, CancellationToken::new())
    );

    a.unwrap();
    b.unwrap();
    assert_eq!(thread.get_variable("last_a"), Some(Value::Integer(3)));
    assert_eq!(thread.get_variable("last_b"), Some(Value::Integer(6)));
    assert_eq!(thread.get_variable("i"), None);
}

#[tokio::test]
async fn test_rebound_source_is_read_on_a_later_run() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let first = env.table("first", &[("v", DataType::Integer)]);
    let second = env.table("second", &[("v", DataType::Integer)]);
    first.insert(vec![Value::Integer(1)]).unwrap();
    second.insert(vec![Value::Integer(5)]).unwrap();
    env.thread.declare_variable("src", "first");
    env.thread.declare_variable("flag", false);

    // The subquery is compiled by the first run but only opened by the
    // second one, after `src` has been rebound.
    let mut b = ProgramBuilder::new();
    let (flag, v, src) = (b.ident("flag"), b.ident("v"), b.ident("src"));
    let query = b.select(Select::new().column(v).from(src));
    let zero = b.lit(0);
    let value = b.case(None, vec![(flag, query)], Some(zero));
    let ret = b.ret(Some(value));
    let program = b.build(vec![ret]);

    let value = env
        .thread
        .run(Arc::clone(&program), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value, Value::Integer(0));

    env.thread.declare_variable("src", "second");
    env.thread.declare_variable("flag", true);
    let value = env.thread.run(program, CancellationToken::new()).await.unwrap();
    assert_eq!(value, Value::Integer(5));
    assert_eq!(first.scan_count(), 0);
}
