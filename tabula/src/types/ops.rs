//! Operator dispatch.
//!
//! Every operator owns a table indexed by the operand kinds. A missing entry
//! means the operator is undefined for that kind pair, which is reported as
//! [`Error::TypeMismatch`]. The tables are built once, on first use.

use std::{cmp::Ordering, fmt, sync::LazyLock};

use chrono::TimeDelta;
use rust_decimal::{prelude::ToPrimitive, Decimal};

use crate::{
    error::{Error, ExecResult},
    types::{cast, DataType, Value},
};

/// An operator over values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Greater,
    GreaterOrEquals,
    Less,
    LessOrEquals,
    Like,
    NotLike,
    And,
    Or,
    Concat,
    // Unary.
    Negate,
    Not,
    IsNull,
    IsNotNull,
}

const BINARY_COUNT: usize = Operation::Concat as usize + 1;

impl Operation {
    pub const BINARY: [Operation; BINARY_COUNT] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
        Operation::Modulo,
        Operation::Equals,
        Operation::NotEquals,
        Operation::Greater,
        Operation::GreaterOrEquals,
        Operation::Less,
        Operation::LessOrEquals,
        Operation::Like,
        Operation::NotLike,
        Operation::And,
        Operation::Or,
        Operation::Concat,
    ];

    pub fn is_unary(self) -> bool {
        self as usize >= BINARY_COUNT
    }

    /// Returns `true` for the operators a key column may support.
    pub fn is_comparison(self) -> bool {
        use Operation::*;
        matches!(
            self,
            Equals | NotEquals | Greater | GreaterOrEquals | Less | LessOrEquals | Like | NotLike
        )
    }

    /// The operator that gives the same result with swapped operands, so that
    /// `a OP b` equals `b OP.mirror() a`.
    pub fn mirror(self) -> Option<Operation> {
        use Operation::*;
        let mirrored = match self {
            Equals => Equals,
            NotEquals => NotEquals,
            Greater => Less,
            GreaterOrEquals => LessOrEquals,
            Less => Greater,
            LessOrEquals => GreaterOrEquals,
            _ => return None,
        };
        Some(mirrored)
    }

    pub fn symbol(self) -> &'static str {
        use Operation::*;
        match self {
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Modulo => "%",
            Equals => "=",
            NotEquals => "<>",
            Greater => ">",
            GreaterOrEquals => ">=",
            Less => "<",
            LessOrEquals => "<=",
            Like => "LIKE",
            NotLike => "NOT LIKE",
            And => "AND",
            Or => "OR",
            Concat => "||",
            Negate => "-",
            Not => "NOT",
            IsNull => "IS NULL",
            IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

pub type BinaryFn = fn(&Value, &Value) -> ExecResult<Value>;

pub type UnaryFn = fn(&Value) -> ExecResult<Value>;

/// A dispatch entry: the implementation plus its static result kind.
#[derive(Copy, Clone)]
pub struct Entry<F> {
    pub func: F,
    pub result: DataType,
}

type BinaryTable = [[Option<Entry<BinaryFn>>; DataType::KIND_COUNT]; DataType::KIND_COUNT];

type UnaryTable = [Option<Entry<UnaryFn>>; DataType::KIND_COUNT];

struct Tables {
    binary: Vec<BinaryTable>,
    unary: Vec<UnaryTable>,
}

static TABLES: LazyLock<Tables> = LazyLock::new(|| Tables {
    binary: Operation::BINARY.iter().map(|op| build_binary(*op)).collect(),
    unary: [
        Operation::Negate,
        Operation::Not,
        Operation::IsNull,
        Operation::IsNotNull,
    ]
    .into_iter()
    .map(build_unary)
    .collect(),
});

/// Looks up the entry of a binary operator.
pub fn binary_entry(op: Operation, left: DataType, right: DataType) -> Option<Entry<BinaryFn>> {
    debug_assert!(!op.is_unary());
    TABLES.binary[op as usize][left.index()?][right.index()?]
}

/// Looks up the entry of a unary operator.
pub fn unary_entry(op: Operation, operand: DataType) -> Option<Entry<UnaryFn>> {
    debug_assert!(op.is_unary());
    TABLES.unary[op as usize - BINARY_COUNT][operand.index()?]
}

/// Applies a binary operator.
pub fn binary(op: Operation, left: &Value, right: &Value) -> ExecResult<Value> {
    let (l, r) = (left.data_type(), right.data_type());
    match binary_entry(op, l, r) {
        Some(entry) => (entry.func)(left, right),
        None => Err(Error::mismatch(op.symbol(), l, r)),
    }
}

/// Applies a unary operator.
pub fn unary(op: Operation, operand: &Value) -> ExecResult<Value> {
    let ty = operand.data_type();
    match unary_entry(op, ty) {
        Some(entry) => (entry.func)(operand),
        None => Err(Error::mismatch(op.symbol(), ty, ty)),
    }
}

/// Static result kind of a binary operator. Dynamic operands yield a dynamic
/// result, to be checked when the unit runs.
pub fn binary_result_type(op: Operation, left: DataType, right: DataType) -> ExecResult<DataType> {
    if left == DataType::Dynamic || right == DataType::Dynamic {
        return Ok(match op {
            o if o.is_comparison() || matches!(o, Operation::And | Operation::Or) => {
                DataType::Boolean
            }
            _ => DataType::Dynamic,
        });
    }
    binary_entry(op, left, right)
        .map(|entry| entry.result)
        .ok_or_else(|| Error::mismatch(op.symbol(), left, right))
}

/// Static result kind of a unary operator.
pub fn unary_result_type(op: Operation, operand: DataType) -> ExecResult<DataType> {
    if operand == DataType::Dynamic {
        return Ok(match op {
            Operation::Negate => DataType::Dynamic,
            _ => DataType::Boolean,
        });
    }
    unary_entry(op, operand)
        .map(|entry| entry.result)
        .ok_or_else(|| Error::mismatch(op.symbol(), operand, operand))
}

/// SQL equality. `None` stands for unknown (either side is null).
pub fn equals(left: &Value, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    if left.data_type() == right.data_type() {
        return Some(left == right);
    }
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return Some(Num::cmp(a, b) == Some(Ordering::Equal));
    }
    // Coerce the string side into the other kind; failing that, the values
    // are just different.
    let coerced = match (left, right) {
        (Value::String(_), other) => cast::cast(left, other.data_type()).map(|l| (l, other.clone())),
        (other, Value::String(_)) => cast::cast(right, other.data_type()).map(|r| (other.clone(), r)),
        (Value::Boolean(_), other) | (other, Value::Boolean(_)) if other.data_type().is_numeric() => {
            Ok((Value::Boolean(left.is_truthy()), Value::Boolean(right.is_truthy())))
        }
        _ => return Some(false),
    };
    match coerced {
        Ok((l, r)) => equals(&l, &r),
        Err(_) => Some(false),
    }
}

/// Orders two non-null values of comparable kinds.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Interval(a), Value::Interval(b)) => Some(a.cmp(b)),
        _ => Num::cmp(Num::of(left)?, Num::of(right)?),
    }
}

/// Like [`compare`], but a total order: NaN sorts after every other
/// number. Values of kinds that don't compare yield `None`.
pub fn total_compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => Some(Num::total_cmp(a, b)),
        _ => compare(left, right),
    }
}

//
// Numbers.
//

#[derive(Copy, Clone)]
enum Num {
    Int(i64),
    Float(f64),
    Dec(Decimal),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Integer(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            Value::Numeric(d) => Some(Num::Dec(*d)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
            Num::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    /// Brings both operands to the wider representation: integer, then
    /// decimal, then float.
    fn promote(a: Num, b: Num) -> (Num, Num) {
        match (a, b) {
            (Num::Float(_), _) | (_, Num::Float(_)) => {
                (Num::Float(a.to_f64()), Num::Float(b.to_f64()))
            }
            (Num::Dec(_), Num::Int(i)) => (a, Num::Dec(Decimal::from(i))),
            (Num::Int(i), Num::Dec(_)) => (Num::Dec(Decimal::from(i)), b),
            _ => (a, b),
        }
    }

    fn cmp(a: Num, b: Num) -> Option<Ordering> {
        match Num::promote(a, b) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (Num::Dec(a), Num::Dec(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }

    fn total_cmp(a: Num, b: Num) -> Ordering {
        match Num::promote(a, b) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (Num::Dec(a), Num::Dec(b)) => a.cmp(&b),
            (a, b) => {
                let (a, b) = (a.to_f64(), b.to_f64());
                // Both NaN signs sort last.
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.total_cmp(&b),
                }
            }
        }
    }
}

#[derive(Copy, Clone)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    fn name(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Rem => "%",
        }
    }
}

fn arith(op: Arith, left: &Value, right: &Value) -> ExecResult<Value> {
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(Error::mismatch(op.name(), left.data_type(), right.data_type()));
    };
    let overflow = || Error::ArithmeticOverflow(op.name());
    let value = match Num::promote(a, b) {
        (Num::Int(a), Num::Int(b)) => {
            if matches!(op, Arith::Div | Arith::Rem) && b == 0 {
                return Err(Error::DivisionByZero);
            }
            let out = match op {
                Arith::Add => a.checked_add(b),
                Arith::Sub => a.checked_sub(b),
                Arith::Mul => a.checked_mul(b),
                Arith::Div => a.checked_div(b),
                Arith::Rem => a.checked_rem(b),
            };
            Value::Integer(out.ok_or_else(overflow)?)
        }
        (Num::Dec(a), Num::Dec(b)) => {
            if matches!(op, Arith::Div | Arith::Rem) && b.is_zero() {
                return Err(Error::DivisionByZero);
            }
            let out = match op {
                Arith::Add => a.checked_add(b),
                Arith::Sub => a.checked_sub(b),
                Arith::Mul => a.checked_mul(b),
                Arith::Div => a.checked_div(b),
                Arith::Rem => a.checked_rem(b),
            };
            Value::Numeric(out.ok_or_else(overflow)?)
        }
        (a, b) => {
            let (a, b) = (a.to_f64(), b.to_f64());
            Value::Float(match op {
                Arith::Add => a + b,
                Arith::Sub => a - b,
                Arith::Mul => a * b,
                Arith::Div => a / b,
                Arith::Rem => a % b,
            })
        }
    };
    Ok(value)
}

fn numeric_result(left: DataType, right: DataType) -> DataType {
    use DataType::*;
    match (left, right) {
        (Float, _) | (_, Float) => Float,
        (Numeric, _) | (_, Numeric) => Numeric,
        _ => Integer,
    }
}

//
// Temporal values.
//

fn delta_factor(value: &Value, op: &'static str) -> ExecResult<i32> {
    match value {
        Value::Integer(i) => i32::try_from(*i).map_err(|_| Error::ArithmeticOverflow(op)),
        other => Err(Error::mismatch(op, DataType::Interval, other.data_type())),
    }
}

fn temporal(op: Operation, left: &Value, right: &Value) -> ExecResult<Value> {
    let overflow = || Error::ArithmeticOverflow(op.symbol());
    let value = match (op, left, right) {
        (Operation::Add, Value::Timestamp(t), Value::Interval(d))
        | (Operation::Add, Value::Interval(d), Value::Timestamp(t)) => {
            Value::Timestamp(t.checked_add_signed(*d).ok_or_else(overflow)?)
        }
        (Operation::Subtract, Value::Timestamp(t), Value::Interval(d)) => {
            Value::Timestamp(t.checked_sub_signed(*d).ok_or_else(overflow)?)
        }
        (Operation::Subtract, Value::Timestamp(a), Value::Timestamp(b)) => {
            Value::Interval(a.signed_duration_since(*b))
        }
        (Operation::Add, Value::Interval(a), Value::Interval(b)) => {
            Value::Interval(a.checked_add(b).ok_or_else(overflow)?)
        }
        (Operation::Subtract, Value::Interval(a), Value::Interval(b)) => {
            Value::Interval(a.checked_sub(b).ok_or_else(overflow)?)
        }
        (Operation::Multiply, Value::Interval(d), n) | (Operation::Multiply, n, Value::Interval(d)) => {
            Value::Interval(d.checked_mul(delta_factor(n, "*")?).ok_or_else(overflow)?)
        }
        (Operation::Divide, Value::Interval(d), n) => {
            let n = delta_factor(n, "/")?;
            if n == 0 {
                return Err(Error::DivisionByZero);
            }
            Value::Interval(d.checked_div(n).ok_or_else(overflow)?)
        }
        _ => return Err(Error::mismatch(op.symbol(), left.data_type(), right.data_type())),
    };
    Ok(value)
}

//
// Strings.
//

/// SQL `LIKE`: `%` matches any run, `_` any single character and `[abc]` /
/// `[^abc]` a character set.
pub fn like(pattern: &str, text: &str) -> bool {
    let tokens = like_tokens(pattern);
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // Token after the last `%` and the text position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::AnyRun) => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(token) if token.matches(text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((after, from)) => {
                    p = after;
                    t = from + 1;
                    backtrack = Some((after, from + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| matches!(token, LikeToken::AnyRun))
}

enum LikeToken {
    AnyRun,
    AnyOne,
    Set { chars: Vec<char>, negated: bool },
    Char(char),
}

impl LikeToken {
    fn matches(&self, c: char) -> bool {
        match self {
            LikeToken::AnyRun | LikeToken::AnyOne => true,
            LikeToken::Set { chars, negated } => chars.contains(&c) != *negated,
            LikeToken::Char(expected) => *expected == c,
        }
    }
}

/// An unterminated `[` is a literal.
fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let pattern: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;
    while i < pattern.len() {
        let token = match pattern[i] {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            '[' => match pattern[i + 1..].iter().position(|c| *c == ']') {
                Some(len) => {
                    let set = &pattern[i + 1..i + 1 + len];
                    i += len + 1;
                    match set {
                        ['^', chars @ ..] => LikeToken::Set {
                            chars: chars.to_vec(),
                            negated: true,
                        },
                        chars => LikeToken::Set {
                            chars: chars.to_vec(),
                            negated: false,
                        },
                    }
                }
                None => LikeToken::Char('['),
            },
            c => LikeToken::Char(c),
        };
        tokens.push(token);
        i += 1;
    }
    tokens
}

fn concat(left: &Value, right: &Value) -> ExecResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::String(format!("{left}{right}")))
}

//
// Table construction.
//

fn null_binary(_: &Value, _: &Value) -> ExecResult<Value> {
    Ok(Value::Null)
}

fn tri(value: Option<bool>) -> Value {
    value.map_or(Value::Null, Value::Boolean)
}

fn ordering(op: Operation, left: &Value, right: &Value) -> ExecResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ord = compare(left, right)
        .ok_or_else(|| Error::mismatch(op.symbol(), left.data_type(), right.data_type()))?;
    let out = match op {
        Operation::Greater => ord.is_gt(),
        Operation::GreaterOrEquals => ord.is_ge(),
        Operation::Less => ord.is_lt(),
        Operation::LessOrEquals => ord.is_le(),
        _ => unreachable!("not an ordering operator"),
    };
    Ok(Value::Boolean(out))
}

struct Builder {
    table: BinaryTable,
}

impl Builder {
    fn new() -> Builder {
        Builder {
            table: [[None; DataType::KIND_COUNT]; DataType::KIND_COUNT],
        }
    }

    fn set(&mut self, left: DataType, right: DataType, result: DataType, func: BinaryFn) {
        if let (Some(l), Some(r)) = (left.index(), right.index()) {
            self.table[l][r] = Some(Entry { func, result });
        }
    }

    fn each(&mut self, kinds: &[DataType], result: impl Fn(DataType, DataType) -> DataType, func: BinaryFn) {
        for l in kinds {
            for r in kinds {
                self.set(*l, *r, result(*l, *r), func);
            }
        }
    }

    /// Null against any kind yields null.
    fn null_propagation(&mut self, result: Option<DataType>) {
        for kind in DataType::KINDS {
            self.set(DataType::Null, kind, result.unwrap_or(kind), null_binary);
            self.set(kind, DataType::Null, result.unwrap_or(kind), null_binary);
        }
    }
}

const NUMERIC: [DataType; 3] = [DataType::Integer, DataType::Float, DataType::Numeric];

fn build_binary(op: Operation) -> BinaryTable {
    use DataType::*;
    let mut b = Builder::new();
    match op {
        Operation::Add => {
            b.each(&NUMERIC, numeric_result, |l, r| arith(Arith::Add, l, r));
            b.set(String, String, String, concat);
            b.set(Timestamp, Interval, Timestamp, |l, r| temporal(Operation::Add, l, r));
            b.set(Interval, Timestamp, Timestamp, |l, r| temporal(Operation::Add, l, r));
            b.set(Interval, Interval, Interval, |l, r| temporal(Operation::Add, l, r));
            b.null_propagation(None);
        }
        Operation::Subtract => {
            b.each(&NUMERIC, numeric_result, |l, r| arith(Arith::Sub, l, r));
            b.set(Timestamp, Interval, Timestamp, |l, r| temporal(Operation::Subtract, l, r));
            b.set(Timestamp, Timestamp, Interval, |l, r| temporal(Operation::Subtract, l, r));
            b.set(Interval, Interval, Interval, |l, r| temporal(Operation::Subtract, l, r));
            b.null_propagation(None);
        }
        Operation::Multiply => {
            b.each(&NUMERIC, numeric_result, |l, r| arith(Arith::Mul, l, r));
            b.set(Interval, Integer, Interval, |l, r| temporal(Operation::Multiply, l, r));
            b.set(Integer, Interval, Interval, |l, r| temporal(Operation::Multiply, l, r));
            b.null_propagation(None);
        }
        Operation::Divide => {
            b.each(&NUMERIC, numeric_result, |l, r| arith(Arith::Div, l, r));
            b.set(Interval, Integer, Interval, |l, r| temporal(Operation::Divide, l, r));
            b.null_propagation(None);
        }
        Operation::Modulo => {
            b.each(&NUMERIC, numeric_result, |l, r| arith(Arith::Rem, l, r));
            b.null_propagation(None);
        }
        Operation::Equals => {
            b.each(&DataType::KINDS, |_, _| Boolean, |l, r| Ok(tri(equals(l, r))));
        }
        Operation::NotEquals => {
            b.each(&DataType::KINDS, |_, _| Boolean, |l, r| {
                Ok(tri(equals(l, r).map(|eq| !eq)))
            });
        }
        Operation::Greater
        | Operation::GreaterOrEquals
        | Operation::Less
        | Operation::LessOrEquals => {
            let func: BinaryFn = match op {
                Operation::Greater => |l, r| ordering(Operation::Greater, l, r),
                Operation::GreaterOrEquals => |l, r| ordering(Operation::GreaterOrEquals, l, r),
                Operation::Less => |l, r| ordering(Operation::Less, l, r),
                _ => |l, r| ordering(Operation::LessOrEquals, l, r),
            };
            b.each(&NUMERIC, |_, _| Boolean, func);
            for kind in [Boolean, String, Timestamp, Interval] {
                b.set(kind, kind, Boolean, func);
            }
            b.null_propagation(Some(Boolean));
        }
        Operation::Like => {
            b.set(String, String, Boolean, |l, r| match (l, r) {
                (Value::String(text), Value::String(pattern)) => Ok(Value::Boolean(like(pattern, text))),
                _ => Ok(Value::Null),
            });
            b.null_propagation(Some(Boolean));
        }
        Operation::NotLike => {
            b.set(String, String, Boolean, |l, r| match (l, r) {
                (Value::String(text), Value::String(pattern)) => Ok(Value::Boolean(!like(pattern, text))),
                _ => Ok(Value::Null),
            });
            b.null_propagation(Some(Boolean));
        }
        Operation::And => {
            b.each(&[Null, Boolean], |_, _| Boolean, |l, r| {
                Ok(match (l.as_tri_bool(), r.as_tri_bool()) {
                    (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            });
        }
        Operation::Or => {
            b.each(&[Null, Boolean], |_, _| Boolean, |l, r| {
                Ok(match (l.as_tri_bool(), r.as_tri_bool()) {
                    (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            });
        }
        Operation::Concat => {
            let scalars = [Null, Boolean, Integer, Float, Numeric, String, Timestamp, Interval];
            b.each(&scalars, |_, _| String, concat);
        }
        _ => unreachable!("unary operator in binary table"),
    }
    b.table
}

fn negate(value: &Value) -> ExecResult<Value> {
    let overflow = || Error::ArithmeticOverflow("-");
    Ok(match value {
        Value::Null => Value::Null,
        Value::Integer(i) => Value::Integer(i.checked_neg().ok_or_else(overflow)?),
        Value::Float(f) => Value::Float(-*f),
        Value::Numeric(d) => Value::Numeric(-*d),
        Value::Interval(d) => Value::Interval(TimeDelta::zero().checked_sub(d).ok_or_else(overflow)?),
        other => return Err(Error::mismatch("-", other.data_type(), other.data_type())),
    })
}

fn build_unary(op: Operation) -> UnaryTable {
    use DataType::*;
    let mut table: UnaryTable = [None; DataType::KIND_COUNT];
    let mut set = |kind: DataType, result: DataType, func: UnaryFn| {
        if let Some(i) = kind.index() {
            table[i] = Some(Entry { func, result });
        }
    };
    match op {
        Operation::Negate => {
            for kind in [Null, Integer, Float, Numeric, Interval] {
                set(kind, kind, negate);
            }
        }
        Operation::Not => {
            set(Null, Boolean, |_| Ok(Value::Null));
            set(Boolean, Boolean, |v| Ok(tri(v.as_tri_bool().map(|b| !b))));
        }
        Operation::IsNull => {
            for kind in DataType::KINDS {
                set(kind, Boolean, |v| Ok(Value::Boolean(v.is_null())));
            }
        }
        Operation::IsNotNull => {
            for kind in DataType::KINDS {
                set(kind, Boolean, |v| Ok(Value::Boolean(!v.is_null())));
            }
        }
        _ => unreachable!("binary operator in unary table"),
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MapObject;

    #[test]
    fn undefined_pairs_are_type_mismatches() {
        let blob = Value::bytes(vec![1, 2]);
        let object = Value::object(MapObject::new());
        for op in [
            Operation::Add,
            Operation::Subtract,
            Operation::Multiply,
            Operation::Greater,
            Operation::Less,
        ] {
            assert!(matches!(
                binary(op, &blob, &Value::Integer(1)),
                Err(Error::TypeMismatch { .. })
            ));
            assert!(matches!(
                binary(op, &object, &Value::from("x")),
                Err(Error::TypeMismatch { .. })
            ));
        }
        assert!(matches!(
            binary(Operation::Greater, &Value::Boolean(true), &Value::Integer(1)),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn null_propagates() {
        let null = Value::Null;
        assert!(binary(Operation::Add, &null, &Value::Integer(2)).unwrap().is_null());
        assert!(binary(Operation::Less, &Value::Float(1.0), &null).unwrap().is_null());
        assert!(binary(Operation::Equals, &null, &null).unwrap().is_null());
        assert!(!binary(Operation::Equals, &null, &null).unwrap().is_truthy());
        assert!(binary(Operation::Concat, &Value::from("a"), &null).unwrap().is_null());
        assert_eq!(
            unary(Operation::IsNull, &null).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn three_valued_logic() {
        let (t, f, n) = (Value::Boolean(true), Value::Boolean(false), Value::Null);
        assert_eq!(binary(Operation::And, &n, &f).unwrap(), f);
        assert!(binary(Operation::And, &n, &t).unwrap().is_null());
        assert_eq!(binary(Operation::Or, &n, &t).unwrap(), t);
        assert!(binary(Operation::Or, &n, &f).unwrap().is_null());
        assert!(unary(Operation::Not, &n).unwrap().is_null());
    }

    #[test]
    fn arithmetic_widens() {
        let out = binary(Operation::Add, &Value::Integer(1), &Value::Float(0.5)).unwrap();
        assert_eq!(out, Value::Float(1.5));
        let out = binary(Operation::Multiply, &Value::Integer(3), &Value::Numeric(Decimal::new(15, 1))).unwrap();
        assert_eq!(out, Value::Numeric(Decimal::new(45, 1)));
        assert_eq!(
            binary_result_type(Operation::Add, DataType::Integer, DataType::Numeric).unwrap(),
            DataType::Numeric
        );
    }

    #[test]
    fn overflow_and_division_by_zero() {
        assert!(matches!(
            binary(Operation::Add, &Value::Integer(i64::MAX), &Value::Integer(1)),
            Err(Error::ArithmeticOverflow(_))
        ));
        assert!(matches!(
            binary(Operation::Divide, &Value::Integer(1), &Value::Integer(0)),
            Err(Error::DivisionByZero)
        ));
        let out = binary(Operation::Divide, &Value::Float(1.0), &Value::Integer(0)).unwrap();
        assert_eq!(out, Value::Float(f64::INFINITY));
    }

    #[test]
    fn cross_kind_equality() {
        assert_eq!(equals(&Value::Integer(1), &Value::Float(1.0)), Some(true));
        assert_eq!(equals(&Value::from("42"), &Value::Integer(42)), Some(true));
        assert_eq!(equals(&Value::from("abc"), &Value::Integer(42)), Some(false));
        assert_eq!(equals(&Value::Boolean(true), &Value::Integer(1)), Some(true));
        assert_eq!(equals(&Value::bytes(vec![1]), &Value::Integer(1)), Some(false));
    }

    #[test]
    fn temporal_arithmetic() {
        let t = cast::cast(&Value::from("2024-01-31 10:00:00"), DataType::Timestamp).unwrap();
        let d = Value::Interval(TimeDelta::hours(36));
        let later = binary(Operation::Add, &t, &d).unwrap();
        assert_eq!(later.to_string(), "2024-02-01 22:00:00");
        assert_eq!(binary(Operation::Subtract, &later, &t).unwrap(), d);
        let half = binary(Operation::Divide, &d, &Value::Integer(2)).unwrap();
        assert_eq!(half, Value::Interval(TimeDelta::hours(18)));
    }

    #[test]
    fn like_patterns() {
        assert!(like("a%", "abc"));
        assert!(like("%b%", "abc"));
        assert!(like("a_c", "abc"));
        assert!(!like("a_c", "abbc"));
        assert!(like("[ab]x", "bx"));
        assert!(!like("[^ab]x", "bx"));
        assert!(like("%", ""));
        assert!(like("[a", "[a"));
        assert!(!like("a%", ""));
        assert!(like("%a%b", "xxaxxb"));
        assert!(!like("%a%b", "xxbxxa"));
    }

    #[test]
    fn like_does_not_backtrack_exponentially() {
        let text = "a".repeat(10_000);
        assert!(!like("%a%a%a%a%a%a%a%a%b", &text));
        assert!(like("%a%a%a%a%a%a%a%a%", &text));
    }

    #[test]
    fn total_order_puts_nan_last() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(total_compare(&nan, &Value::Integer(1)), Some(Ordering::Greater));
        assert_eq!(total_compare(&Value::Float(f64::INFINITY), &nan), Some(Ordering::Less));
        assert_eq!(total_compare(&nan, &Value::Float(-f64::NAN)), Some(Ordering::Equal));
        assert_eq!(total_compare(&Value::Integer(2), &Value::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(total_compare(&Value::from("a"), &Value::Integer(1)), None);
    }
}
