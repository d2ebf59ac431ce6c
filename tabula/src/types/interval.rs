//! Interval text forms.
//!
//! Two forms are accepted: the clock form `[-][d.]hh:mm:ss[.fffffff]` and a
//! list of unit tokens such as `1d 2h 30m 5s 10ms` (long unit names and a
//! space between the number and the unit are accepted too).

use chrono::TimeDelta;

use crate::{
    error::{Error, ExecResult},
    types::DataType,
};

const NANOS_PER_SEC: i128 = 1_000_000_000;

const SECS_PER_DAY: i64 = 86_400;

/// Formats an interval in clock form.
pub fn format(delta: TimeDelta) -> String {
    let negative = delta < TimeDelta::zero();
    let delta = if negative { -delta } else { delta };

    let total = delta.num_seconds();
    let (days, rest) = (total / SECS_PER_DAY, total % SECS_PER_DAY);
    let (h, m, s) = (rest / 3600, rest % 3600 / 60, rest % 60);
    let nanos = delta.subsec_nanos();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{h:02}:{m:02}:{s:02}"));
    if nanos > 0 {
        let frac = format!("{nanos:09}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out
}

/// Parses an interval in either text form.
pub fn parse(text: &str) -> ExecResult<TimeDelta> {
    let trimmed = text.trim();
    let nanos = if trimmed.contains(':') {
        parse_clock(trimmed)
    } else {
        parse_units(trimmed)
    };
    nanos
        .and_then(|n| i64::try_from(n).ok())
        .map(TimeDelta::nanoseconds)
        .ok_or_else(|| Error::conversion(text, DataType::Interval))
}

fn parse_clock(text: &str) -> Option<i128> {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = text.splitn(3, ':');
    let (head, m, s) = (parts.next()?, parts.next()?, parts.next()?);

    let (days, h) = match head.split_once('.') {
        Some((d, h)) => (d.parse::<i128>().ok()?, h),
        None => (0, head),
    };
    let h: i128 = h.parse().ok()?;
    let m: i128 = m.parse().ok()?;
    let (s, frac) = match s.split_once('.') {
        Some((s, frac)) => (s, frac),
        None => (s, ""),
    };
    let s: i128 = s.parse().ok()?;
    if m >= 60 || s >= 60 || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let frac_nanos = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse::<i128>().ok()?
    };

    let secs = ((days * 24 + h) * 60 + m) * 60 + s;
    let nanos = secs * NANOS_PER_SEC + frac_nanos;
    Some(if negative { -nanos } else { nanos })
}

fn unit_nanos(unit: &str) -> Option<i128> {
    let secs = match unit.to_ascii_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => return Some(1_000_000),
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 7 * 86_400,
        _ => return None,
    };
    Some(secs * NANOS_PER_SEC)
}

fn parse_units(text: &str) -> Option<i128> {
    let mut total: i128 = 0;
    let mut tokens = text.split_whitespace().peekable();
    if tokens.peek().is_none() {
        return None;
    }
    while let Some(token) = tokens.next() {
        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(token.len());
        let (number, unit) = token.split_at(split);
        let unit = if unit.is_empty() { tokens.next()? } else { unit };
        let number: f64 = number.parse().ok()?;
        let nanos = number * unit_nanos(unit)? as f64;
        if !nanos.is_finite() || nanos.abs() > i64::MAX as f64 {
            return None;
        }
        total = total.checked_add(nanos.round() as i128)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_form() {
        assert_eq!(parse("01:30:00").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse("2.00:00:01").unwrap(), TimeDelta::seconds(2 * 86_400 + 1));
        assert_eq!(parse("-00:00:00.5").unwrap(), TimeDelta::milliseconds(-500));
        assert!(parse("00:61:00").is_err());
    }

    #[test]
    fn unit_form() {
        let expected = TimeDelta::days(1) + TimeDelta::hours(2) + TimeDelta::minutes(30);
        assert_eq!(parse("1d 2h 30m").unwrap(), expected);
        assert_eq!(parse("10 seconds").unwrap(), TimeDelta::seconds(10));
        assert_eq!(parse("1.5h").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse("250ms").unwrap(), TimeDelta::milliseconds(250));
        assert!(parse("3 parsecs").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn format_reads_back() {
        for delta in [
            TimeDelta::zero(),
            TimeDelta::seconds(59),
            TimeDelta::days(3) + TimeDelta::milliseconds(1),
            TimeDelta::hours(-5),
        ] {
            assert_eq!(parse(&format(delta)).unwrap(), delta, "{}", format(delta));
        }
        assert_eq!(format(TimeDelta::minutes(-90)), "-01:30:00");
    }
}
