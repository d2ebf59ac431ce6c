use tabula::{
    ast::{ProgramBuilder, Select},
    data::{Column, KeyColumn, MemoryTable},
    index::{NullOrder, OrderDirection},
    types::Operation,
    DataType, Error, ExecutionOptions, Value,
};
use tokio_util::sync::CancellationToken;

use crate::test_utils::{dump, setup_tracing, TestEnv};

mod test_utils;

#[tokio::test]
async fn test_in_list_scans_once_per_value() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(
        ExecutionOptions::default(),
        &[("id", DataType::Integer), ("name", DataType::String)],
    );
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let (id, name, users_ref) = (b.ident("id"), b.ident("name"), b.ident("users"));
    let filter_id = b.ident("id");
    let items = vec![b.lit(3), b.lit(1), b.lit(2)];
    let filter = b.in_list(filter_id, items);
    let order_id = b.ident("id");
    let query = b.select(
        Select::new()
            .column(id)
            .column(name)
            .from(users_ref)
            .filter(filter)
            .order_by(order_id, OrderDirection::Asc, NullOrder::Last),
    );
    let program = b.build(vec![query]);

    let written = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(written, Value::Integer(3));
    assert_eq!(users.scan_count(), 3);
    assert_eq!(
        dump(&out),
        vec![
            vec![Value::Integer(1), "ann".into()],
            vec![Value::Integer(2), "bob".into()],
            vec![Value::Integer(3), "cid".into()],
        ]
    );
}

#[tokio::test]
async fn test_equality_is_pushed_into_a_single_scan() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("name", DataType::String)]);
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let (name, users_ref, id) = (b.ident("name"), b.ident("users"), b.ident("id"));
    let two = b.lit(2);
    // Mirrored operands still match the key.
    let filter = b.binary(Operation::Equals, two, id);
    let query = b.select(Select::new().column(name).from(users_ref).filter(filter));
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(users.scan_count(), 1);
    assert_eq!(dump(&out), vec![vec![Value::from("bob")]]);
}

#[tokio::test]
async fn test_order_by_with_offset_and_limit() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("name", DataType::String)]);
    env.users();

    let mut b = ProgramBuilder::new();
    let (name, users_ref, age) = (b.ident("name"), b.ident("users"), b.ident("age"));
    let (limit, offset) = (b.lit(2), b.lit(1));
    let query = b.select(
        Select::new()
            .column(name)
            .from(users_ref)
            .order_by(age, OrderDirection::Desc, NullOrder::Last)
            .limit(limit)
            .offset(offset),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    // The sort key is not part of the output.
    assert_eq!(out.columns().len(), 1);
    assert_eq!(
        dump(&out),
        vec![vec![Value::from("ann")], vec![Value::from("bob")]]
    );
}

#[tokio::test]
async fn test_negative_limit_fails() {
    setup_tracing(None);
    let (env, _out) = TestEnv::with_output(ExecutionOptions::default(), &[("id", DataType::Integer)]);
    env.users();

    let mut b = ProgramBuilder::new();
    let (id, users_ref, limit) = (b.ident("id"), b.ident("users"), b.lit(-1));
    let query = b.select(Select::new().column(id).from(users_ref).limit(limit));
    let program = b.build(vec![query]);

    let result = env.thread.run(program, CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::ExecError(_))));
}

#[tokio::test]
async fn test_required_key_without_condition() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let events = env.sources.register(
        MemoryTable::new(
            "events",
            vec![
                Column::new("day", DataType::String),
                Column::new("count", DataType::Integer),
            ],
        )
        .with_key_column(
            KeyColumn::new(0)
                .required(true)
                .with_operation(Operation::Equals),
        ),
    );

    let mut b = ProgramBuilder::new();
    let events_ref = b.ident("events");
    let (count, ten) = (b.ident("count"), b.lit(10));
    let filter = b.binary(Operation::Greater, count, ten);
    let query = b.select(Select::new().all().from(events_ref).filter(filter));
    let program = b.build(vec![query]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    match result {
        Err(Error::QueryMissedCondition { column, operations }) => {
            assert_eq!(column, "day");
            assert_eq!(operations, "=");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(events.scan_count(), 0);
}

#[tokio::test]
async fn test_select_from_variable_holding_an_input() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("value", DataType::Integer)]);

    let mut b = ProgramBuilder::new();
    let (one, five) = (b.lit(1), b.lit(5));
    let series = b.call("generate_series", vec![one, five]);
    let declare = b.declare("s", None, Some(series));
    let (value, s, filter_value, three) = (b.ident("value"), b.ident("s"), b.ident("value"), b.lit(3));
    let filter = b.binary(Operation::Greater, filter_value, three);
    let query = b.select(Select::new().column(value).from(s).filter(filter));
    let program = b.build(vec![declare, query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&out),
        vec![vec![Value::Integer(4)], vec![Value::Integer(5)]]
    );
}

#[tokio::test]
async fn test_values_with_expressions() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(
        ExecutionOptions::default(),
        &[("doubled", DataType::Integer), ("upper", DataType::String)],
    );

    let mut b = ProgramBuilder::new();
    let rows = vec![vec![b.lit(1), b.lit("a")], vec![b.lit(2), b.lit("b")]];
    let (column1, two) = (b.ident("column1"), b.lit(2));
    let doubled = b.binary(Operation::Multiply, column1, two);
    let column2 = b.ident("column2");
    let upper = b.call("upper", vec![column2]);
    let query = b.select(
        Select::new()
            .column_as(doubled, "doubled")
            .column(upper)
            .from_values(rows),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&out),
        vec![
            vec![Value::Integer(2), "A".into()],
            vec![Value::Integer(4), "B".into()],
        ]
    );
}

#[tokio::test]
async fn test_row_numbers_are_prepended() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(
        ExecutionOptions::default().with_row_number(true),
        &[("row_number", DataType::Integer), ("name", DataType::String)],
    );
    env.users();

    let mut b = ProgramBuilder::new();
    let (name, users_ref, age, thirty) = (b.ident("name"), b.ident("users"), b.ident("age"), b.lit(30));
    let filter = b.binary(Operation::Greater, age, thirty);
    let query = b.select(Select::new().column(name).from(users_ref).filter(filter));
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&out),
        vec![
            vec![Value::Integer(1), "ann".into()],
            vec![Value::Integer(2), "cid".into()],
        ]
    );
}

#[tokio::test]
async fn test_order_by_puts_nan_after_numbers() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("v", DataType::Float)]);
    let readings = env.table("readings", &[("v", DataType::Float)]);
    for v in [Value::Float(2.0), Value::Float(f64::NAN), Value::Null, Value::Float(-1.0)] {
        readings.insert(vec![v]).unwrap();
    }

    let mut b = ProgramBuilder::new();
    let (v, readings_ref, order_v) = (b.ident("v"), b.ident("readings"), b.ident("v"));
    let query = b.select(
        Select::new()
            .column(v)
            .from(readings_ref)
            .order_by(order_v, OrderDirection::Asc, NullOrder::Last),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    let rows = dump(&out);
    assert_eq!(rows[0], vec![Value::Float(-1.0)]);
    assert_eq!(rows[1], vec![Value::Float(2.0)]);
    assert!(matches!(rows[2][0], Value::Float(f) if f.is_nan()));
    assert!(rows[3][0].is_null());
}

#[tokio::test]
async fn test_order_by_mixed_kinds_fails() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("v", DataType::Dynamic)]);
    let mixed = env.table("mixed", &[("v", DataType::Dynamic)]);
    for i in 0..2000 {
        let v = if i % 3 == 0 { Value::from("x") } else { Value::Integer(i) };
        mixed.insert(vec![v]).unwrap();
    }

    let mut b = ProgramBuilder::new();
    let (v, mixed_ref, order_v) = (b.ident("v"), b.ident("mixed"), b.ident("v"));
    let query = b.select(
        Select::new()
            .column(v)
            .from(mixed_ref)
            .order_by(order_v, OrderDirection::Desc, NullOrder::Last),
    );
    let program = b.build(vec![query]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::TypeMismatch { op: "ORDER BY", .. })));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_searched_case_in_projection() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(
        ExecutionOptions::default(),
        &[("name", DataType::String), ("band", DataType::String)],
    );
    env.users();

    let mut b = ProgramBuilder::new();
    let (name, users_ref, age, order_id) =
        (b.ident("name"), b.ident("users"), b.ident("age"), b.ident("id"));
    let thirty = b.lit(30);
    let older = b.binary(Operation::Greater, age, thirty);
    let (senior, junior) = (b.lit("senior"), b.lit("junior"));
    let band = b.case(None, vec![(older, senior)], Some(junior));
    let query = b.select(
        Select::new()
            .column(name)
            .column_as(band, "band")
            .from(users_ref)
            .order_by(order_id, OrderDirection::Asc, NullOrder::Last),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&out),
        vec![
            vec![Value::from("ann"), Value::from("senior")],
            vec![Value::from("bob"), Value::from("junior")],
            vec![Value::from("cid"), Value::from("senior")],
        ]
    );
}

#[tokio::test]
async fn test_simple_case_without_match_is_null() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("word", DataType::String)]);
    env.users();

    let mut b = ProgramBuilder::new();
    let (id, users_ref, order_id) = (b.ident("id"), b.ident("users"), b.ident("id"));
    let (one, two) = (b.lit(1), b.lit(2));
    let (first, second) = (b.lit("one"), b.lit("two"));
    let word = b.case(Some(id), vec![(one, first), (two, second)], None);
    let query = b.select(
        Select::new()
            .column(word)
            .from(users_ref)
            .order_by(order_id, OrderDirection::Asc, NullOrder::Last),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&out),
        vec![
            vec![Value::from("one")],
            vec![Value::from("two")],
            vec![Value::Null],
        ]
    );
}

#[tokio::test]
async fn test_case_evaluates_only_the_chosen_branch() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("age", DataType::Integer)]);
    env.users();

    let mut b = ProgramBuilder::new();
    let (id, users_ref) = (b.ident("id"), b.ident("users"));
    let (age, other_age) = (b.ident("age"), b.ident("age"));
    let (zero, divisor) = (b.lit(0), b.lit(0));
    let never = b.binary(Operation::Equals, id, zero);
    let failing = b.binary(Operation::Divide, age, divisor);
    let value = b.case(None, vec![(never, failing)], Some(other_age));
    let query = b.select(Select::new().column(value).from(users_ref));
    let program = b.build(vec![query]);

    let written = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(written, Value::Integer(3));
    assert_eq!(out.len(), 3);
}

#[tokio::test]
async fn test_distinct_before_order_and_limit() {
    setup_tracing(None);
    let (env, out) = TestEnv::with_output(ExecutionOptions::default(), &[("tag", DataType::String)]);
    let tags = env.table("tags", &[("tag", DataType::String), ("n", DataType::Integer)]);
    for (tag, n) in [("b", 1), ("a", 2), ("b", 3), ("a", 4), ("c", 5), ("c", 6)] {
        tags.insert(vec![Value::from(tag), Value::Integer(n)]).unwrap();
    }

    let mut b = ProgramBuilder::new();
    let (tag, tags_ref, order_tag, limit) =
        (b.ident("tag"), b.ident("tags"), b.ident("tag"), b.lit(2));
    let query = b.select(
        Select::new()
            .distinct()
            .column(tag)
            .from(tags_ref)
            .order_by(order_tag, OrderDirection::Desc, NullOrder::Last)
            .limit(limit),
    );
    let program = b.build(vec![query]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    // The limit applies to the distinct rows.
    assert_eq!(
        dump(&out),
        vec![vec![Value::from("c")], vec![Value::from("b")]]
    );
}
