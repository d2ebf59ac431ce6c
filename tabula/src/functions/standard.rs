use std::{sync::Arc, time::Duration};

use futures_util::FutureExt;
use tracing::debug;

use crate::{
    data::{
        convert, shared_input, Column, InputObject, MemoryTable, RetryPolicy, RetryRowsInput,
        SharedRowsInput,
    },
    error::{Error, ExecResult},
    functions::{Function, FunctionRegistry},
    types::{cast, DataType, Value},
};

pub(super) fn register_all(registry: &FunctionRegistry) {
    for function in [
        string_fn("length", DataType::Integer, |s| Value::Integer(s.chars().count() as i64)),
        string_fn("upper", DataType::String, |s| Value::String(s.to_uppercase())),
        string_fn("lower", DataType::String, |s| Value::String(s.to_lowercase())),
        string_fn("trim", DataType::String, |s| Value::String(s.trim().to_owned())),
        coalesce(),
        abs(DataType::Integer),
        abs(DataType::Float),
        abs(DataType::Numeric),
        Function::builder("typeof")
            .arg("value", DataType::Dynamic)
            .returns(DataType::String)
            .safe()
            .body(|args| Ok(Value::from(args[0].data_type().name()))),
        Function::builder("now")
            .returns(DataType::Timestamp)
            .safe()
            .body(|_| Ok(Value::Timestamp(chrono::Utc::now().naive_utc()))),
        Function::builder("to_string")
            .arg("value", DataType::Dynamic)
            .returns(DataType::String)
            .safe()
            .body(|args| cast::cast(&args[0], DataType::String)),
        generate_series(),
        retry_input(),
    ] {
        registry.register(function);
    }
}

/// A single string argument function; null in, null out.
fn string_fn(name: &str, returns: DataType, f: fn(&str) -> Value) -> Function {
    Function::builder(name)
        .arg("text", DataType::String)
        .returns(returns)
        .safe()
        .body(move |args| match &args[0] {
            Value::String(s) => Ok(f(s)),
            _ => Ok(Value::Null),
        })
}

fn coalesce() -> Function {
    Function::builder("coalesce")
        .arg("values", DataType::Dynamic)
        .variadic()
        .safe()
        .body(|args| Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or_default()))
}

fn abs(ty: DataType) -> Function {
    Function::builder("abs")
        .arg("value", ty)
        .returns(ty)
        .safe()
        .body(|args| match &args[0] {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or(Error::ArithmeticOverflow("abs")),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            Value::Numeric(d) => Ok(Value::Numeric(d.abs())),
            _ => Ok(Value::Null),
        })
}

/// `generate_series(start, stop [, step])`: an input of the integers from
/// `start` to `stop`, both included.
fn generate_series() -> Function {
    Function::builder("generate_series")
        .arg("start", DataType::Integer)
        .arg("stop", DataType::Integer)
        .optional("step", DataType::Integer, 1)
        .returns(DataType::Object)
        .safe()
        .body(|args| {
            let (Some(start), Some(stop), Some(step)) = (
                args[0].as_integer(),
                args[1].as_integer(),
                args[2].as_integer(),
            ) else {
                return Ok(Value::Null);
            };
            if step == 0 {
                return Err(Error::ExecError("generate_series step cannot be zero".into()));
            }
            let table = MemoryTable::new(
                "generate_series",
                vec![Column::new(convert::SCALAR_COLUMN, DataType::Integer)],
            );
            let mut current = start;
            while (step > 0 && current <= stop) || (step < 0 && current >= stop) {
                table.insert(vec![Value::Integer(current)])?;
                match current.checked_add(step) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            Ok(Value::object(InputObject::new(Arc::new(table).input())))
        })
}

/// `retry_input(input [, max_retries [, interval_secs]])`: wraps an input so
/// that its failing reads are attempted again.
fn retry_input() -> Function {
    Function::builder("retry_input")
        .arg("input", DataType::Dynamic)
        .optional("max_retries", DataType::Integer, 3)
        .optional("interval_secs", DataType::Float, 0.5)
        .returns(DataType::Object)
        .safe()
        .async_body(|ctx, args| {
            async move {
                let (input, owned) = convert::to_input(&args[0], ctx.sources().as_ref()).await?;
                let policy = retry_policy(&args[1], &args[2])?;
                debug!(?policy, "wrapping input with retries");
                let retry = RetryRowsInput::new(Box::new(SharedRowsInput::new(input).await), policy);
                let input = shared_input(retry);
                Ok(Value::object(if owned {
                    InputObject::shared(input)
                } else {
                    InputObject::opened(input)
                }))
            }
            .boxed()
        })
}

fn retry_policy(max_retries: &Value, interval: &Value) -> ExecResult<RetryPolicy> {
    let mut policy = RetryPolicy::default();
    if let Some(max) = max_retries.as_integer() {
        policy.max_retries =
            u32::try_from(max).map_err(|_| Error::conversion(max, DataType::Integer))?;
    }
    if let Some(secs) = interval.as_float() {
        policy.interval =
            Duration::try_from_secs_f64(secs).map_err(|_| Error::conversion(secs, DataType::Interval))?;
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_sync(registry: &FunctionRegistry, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        let kinds: Vec<_> = args.iter().map(Value::data_type).collect();
        let function = registry.find(name, &kinds)?;
        match &function.body {
            crate::functions::FunctionBody::Sync(body) => body(&args),
            crate::functions::FunctionBody::Async(_) => panic!("`{name}` is async"),
        }
    }

    #[test]
    fn string_functions_propagate_null() {
        let registry = FunctionRegistry::standard();
        assert_eq!(
            call_sync(&registry, "upper", vec!["abc".into()]).unwrap(),
            Value::from("ABC")
        );
        assert_eq!(
            call_sync(&registry, "length", vec!["héllo".into()]).unwrap(),
            Value::Integer(5)
        );
        assert!(call_sync(&registry, "trim", vec![Value::Null]).unwrap().is_null());
    }

    #[test]
    fn abs_picks_the_overload_by_kind() {
        let registry = FunctionRegistry::standard();
        assert_eq!(
            call_sync(&registry, "abs", vec![Value::Integer(-3)]).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            call_sync(&registry, "abs", vec![Value::Float(-1.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert!(matches!(
            call_sync(&registry, "abs", vec![Value::Integer(i64::MIN)]),
            Err(Error::ArithmeticOverflow(_))
        ));
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let registry = FunctionRegistry::standard();
        let out = call_sync(
            &registry,
            "coalesce",
            vec![Value::Null, Value::Integer(2), Value::Integer(3)],
        );
        assert_eq!(out.unwrap(), Value::Integer(2));
    }

    #[test]
    fn negative_retries_are_rejected() {
        assert!(retry_policy(&Value::Integer(-1), &Value::Null).is_err());
        let policy = retry_policy(&Value::Integer(1), &Value::Float(0.0)).unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.interval, Duration::ZERO);
    }
}
