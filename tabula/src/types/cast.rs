use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{prelude::ToPrimitive, Decimal};

use crate::{
    error::{Error, ExecResult},
    types::{interval, value::TIMESTAMP_FORMAT, DataType, Value},
};

/// Converts a value into the given kind.
///
/// Null converts into null for every target. Strings are parsed without
/// regard to locale; everything converts into a boolean through its
/// truthiness.
pub fn cast(value: &Value, target: DataType) -> ExecResult<Value> {
    if value.is_null() || target == DataType::Dynamic || value.data_type() == target {
        return Ok(value.clone());
    }
    let fail = || Error::conversion(value, target);

    let out = match (target, value) {
        (DataType::Null, _) => Value::Null,
        (DataType::Boolean, Value::Object(_)) => return Err(fail()),
        (DataType::Boolean, other) => Value::Boolean(other.is_truthy()),

        (DataType::Integer, Value::Boolean(b)) => Value::Integer(i64::from(*b)),
        (DataType::Integer, Value::Float(f)) => {
            if !f.is_finite() || f.trunc() < i64::MIN as f64 || f.trunc() > i64::MAX as f64 {
                return Err(fail());
            }
            Value::Integer(f.trunc() as i64)
        }
        (DataType::Integer, Value::Numeric(d)) => Value::Integer(d.trunc().to_i64().ok_or_else(fail)?),
        (DataType::Integer, Value::String(s)) => Value::Integer(s.trim().parse().map_err(|_| fail())?),
        (DataType::Integer, Value::Timestamp(t)) => Value::Integer(t.and_utc().timestamp()),

        (DataType::Float, Value::Boolean(b)) => Value::Float(f64::from(u8::from(*b))),
        (DataType::Float, Value::Integer(i)) => Value::Float(*i as f64),
        (DataType::Float, Value::Numeric(d)) => Value::Float(d.to_f64().ok_or_else(fail)?),
        (DataType::Float, Value::String(s)) => Value::Float(s.trim().parse().map_err(|_| fail())?),

        (DataType::Numeric, Value::Boolean(b)) => Value::Numeric(Decimal::from(u8::from(*b))),
        (DataType::Numeric, Value::Integer(i)) => Value::Numeric(Decimal::from(*i)),
        (DataType::Numeric, Value::Float(f)) => {
            Value::Numeric(Decimal::from_f64_retain(*f).ok_or_else(fail)?.normalize())
        }
        (DataType::Numeric, Value::String(s)) => {
            let s = s.trim();
            let d = Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s));
            Value::Numeric(d.map_err(|_| fail())?)
        }

        (DataType::String, Value::Blob(blob)) => {
            Value::String(String::from_utf8_lossy(&blob.to_vec()).into_owned())
        }
        (DataType::String, other) => Value::String(other.to_string()),

        (DataType::Timestamp, Value::String(s)) => Value::Timestamp(parse_timestamp(s).ok_or_else(fail)?),
        (DataType::Timestamp, Value::Integer(secs)) => {
            Value::Timestamp(DateTime::from_timestamp(*secs, 0).ok_or_else(fail)?.naive_utc())
        }

        (DataType::Interval, Value::String(s)) => Value::Interval(interval::parse(s)?),

        (DataType::Blob, Value::String(s)) => Value::bytes(s.as_bytes()),

        _ => return Err(fail()),
    };
    Ok(out)
}

/// Parses RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` or a bare date.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn lossless_round_trips() {
        let values = [
            Value::Integer(-42),
            Value::Float(2.25),
            Value::Numeric(Decimal::new(12345, 3)),
            Value::Boolean(true),
            Value::Interval(TimeDelta::seconds(3725)),
            cast(&Value::from("2023-05-06 07:08:09.5"), DataType::Timestamp).unwrap(),
        ];
        for value in values {
            let text = cast(&value, DataType::String).unwrap();
            let back = cast(&text, value.data_type()).unwrap();
            assert_eq!(back, value, "through {text:?}");
        }
    }

    #[test]
    fn truthiness() {
        for falsy in [Value::Integer(0), Value::from(""), Value::from("FALSE"), Value::from("0")] {
            assert_eq!(cast(&falsy, DataType::Boolean).unwrap(), Value::Boolean(false));
        }
        for truthy in [Value::Integer(7), Value::from("yes"), Value::Float(0.1)] {
            assert_eq!(cast(&truthy, DataType::Boolean).unwrap(), Value::Boolean(true));
        }
    }

    #[test]
    fn null_propagates() {
        for target in DataType::KINDS {
            assert!(cast(&Value::Null, target).unwrap().is_null());
        }
    }

    #[test]
    fn parse_failures() {
        assert!(matches!(
            cast(&Value::from("12abc"), DataType::Integer),
            Err(Error::ConversionFailure { target: DataType::Integer, .. })
        ));
        assert!(matches!(
            cast(&Value::Float(f64::NAN), DataType::Integer),
            Err(Error::ConversionFailure { .. })
        ));
        assert!(cast(&Value::from("not a date"), DataType::Timestamp).is_err());
    }

    #[test]
    fn invariant_number_parsing() {
        assert_eq!(cast(&Value::from(" 1.5 "), DataType::Float).unwrap(), Value::Float(1.5));
        assert_eq!(
            cast(&Value::from("1e3"), DataType::Numeric).unwrap(),
            Value::Numeric(Decimal::from(1000))
        );
        assert!(cast(&Value::from("1,5"), DataType::Float).is_err());
    }
}
