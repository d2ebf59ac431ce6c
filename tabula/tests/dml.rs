use tabula::{
    ast::{ProgramBuilder, Select},
    data::{Column, MemoryTable},
    types::Operation,
    DataType, Error, ExecutionOptions, Value,
};
use tokio_util::sync::CancellationToken;

use crate::test_utils::{dump, setup_tracing, TestEnv};

mod test_utils;

#[tokio::test]
async fn test_insert_values_maps_explicit_columns() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let people = env.table(
        "people",
        &[
            ("id", DataType::Integer),
            ("name", DataType::String),
            ("email", DataType::String),
        ],
    );

    let mut b = ProgramBuilder::new();
    let target = b.ident("people");
    let rows = vec![vec![b.lit("ann"), b.lit(1)], vec![b.lit("bob"), b.lit(2)]];
    let insert = b.insert_values(target, &["name", "id"], rows);
    let program = b.build(vec![insert]);

    let inserted = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(inserted, Value::Integer(2));
    assert_eq!(
        dump(&people),
        vec![
            vec![Value::Integer(1), "ann".into(), Value::Null],
            vec![Value::Integer(2), "bob".into(), Value::Null],
        ]
    );
    assert_eq!(env.thread.statistic().rows_processed, 2);
}

#[tokio::test]
async fn test_insert_from_query_maps_by_name() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    env.users();
    let archive = env.table(
        "archive",
        &[("name", DataType::String), ("id", DataType::Integer)],
    );

    let mut b = ProgramBuilder::new();
    let (id, name, users_ref) = (b.ident("id"), b.ident("name"), b.ident("users"));
    let (age, thirty) = (b.ident("age"), b.lit(30));
    let filter = b.binary(Operation::Greater, age, thirty);
    let query = b.select(
        Select::new()
            .column(id)
            .column(name)
            .from(users_ref)
            .filter(filter),
    );
    let target = b.ident("archive");
    let insert = b.insert_query(target, &[], query);
    let program = b.build(vec![insert]);

    env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(
        dump(&archive),
        vec![
            vec![Value::from("ann"), Value::Integer(1)],
            vec![Value::from("cid"), Value::Integer(3)],
        ]
    );
}

#[tokio::test]
async fn test_update_with_pushed_key() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let target = b.ident("users");
    let (age, one) = (b.ident("age"), b.lit(1));
    let older = b.binary(Operation::Add, age, one);
    let (id, two) = (b.ident("id"), b.lit(2));
    let filter = b.binary(Operation::Equals, id, two);
    let update = b.update(target, vec![("age", older)], Some(filter));
    let program = b.build(vec![update]);

    let touched = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(touched, Value::Integer(1));
    assert_eq!(users.scan_count(), 1);
    assert_eq!(
        dump(&users)[1],
        vec![Value::Integer(2), "bob".into(), Value::Integer(26)]
    );
}

#[tokio::test]
async fn test_delete_with_residual_filter() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let target = b.ident("users");
    let (age, thirty) = (b.ident("age"), b.lit(30));
    let filter = b.binary(Operation::Less, age, thirty);
    let delete = b.delete(target, Some(filter));
    let program = b.build(vec![delete]);

    let deleted = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(deleted, Value::Integer(1));
    assert_eq!(users.len(), 2);
    assert!(dump(&users).iter().all(|row| row[1] != Value::from("bob")));
}

#[tokio::test]
async fn test_update_of_read_only_source() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let frozen = env.sources.register(
        MemoryTable::new("frozen", vec![Column::new("n", DataType::Integer)]).read_only(),
    );
    frozen.insert(vec![Value::Integer(1)]).unwrap();

    let mut b = ProgramBuilder::new();
    let target = b.ident("frozen");
    let two = b.lit(2);
    let update = b.update(target, vec![("n", two)], None);
    let program = b.build(vec![update]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::SourceNotUpdatable)));
    assert_eq!(dump(&frozen), vec![vec![Value::Integer(1)]]);
}

#[tokio::test]
async fn test_insert_unknown_column() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    env.table("people", &[("id", DataType::Integer)]);

    let mut b = ProgramBuilder::new();
    let target = b.ident("people");
    let rows = vec![vec![b.lit(1)]];
    let insert = b.insert_values(target, &["nope"], rows);
    let program = b.build(vec![insert]);

    let result = env.thread.run(program, CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::CannotFindIdentifier(name)) if name == "nope"));
}

#[tokio::test]
async fn test_insert_from_query_with_unmatched_column() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    env.users();
    let archive = env.table(
        "archive",
        &[("id", DataType::Integer), ("title", DataType::String)],
    );

    let mut b = ProgramBuilder::new();
    let (id, name, users_ref) = (b.ident("id"), b.ident("name"), b.ident("users"));
    let query = b.select(Select::new().column(id).column(name).from(users_ref));
    let target = b.ident("archive");
    let insert = b.insert_query(target, &[], query);
    let program = b.build(vec![insert]);

    let result = env.thread.run(program, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::CannotFindIdentifier(name)) if name == "name"));
    assert!(archive.is_empty());
}

#[tokio::test]
async fn test_update_through_retried_input() {
    setup_tracing(None);
    let env = TestEnv::new(ExecutionOptions::default());
    let users = env.users();

    let mut b = ProgramBuilder::new();
    let source = b.lit("users");
    let target = b.call("retry_input", vec![source]);
    let (age, one) = (b.ident("age"), b.lit(1));
    let older = b.binary(Operation::Add, age, one);
    let (id, two) = (b.ident("id"), b.lit(2));
    let filter = b.binary(Operation::Equals, id, two);
    let update = b.update(target, vec![("age", older)], Some(filter));

    let source = b.lit("users");
    let target = b.call("retry_input", vec![source]);
    let (id, three) = (b.ident("id"), b.lit(3));
    let filter = b.binary(Operation::Equals, id, three);
    let delete = b.delete(target, Some(filter));
    let program = b.build(vec![update, delete]);

    let deleted = env.thread.run(program, CancellationToken::new()).await.unwrap();

    assert_eq!(deleted, Value::Integer(1));
    assert_eq!(
        dump(&users),
        vec![
            vec![Value::Integer(1), "ann".into(), Value::Integer(31)],
            vec![Value::Integer(2), "bob".into(), Value::Integer(26)],
        ]
    );
}
