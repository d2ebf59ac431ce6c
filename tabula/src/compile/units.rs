use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    compile::{FuncUnit, RowSlot, Unit},
    data::{close_after, convert, RowsIterator},
    error::{Error, ExecResult},
    exec::ExecCtx,
    functions::Function,
    types::{cast, ops, DataType, Operation, Value},
};

pub(crate) struct LiteralUnit(pub Value);

#[async_trait]
impl FuncUnit for LiteralUnit {
    fn output_type(&self) -> DataType {
        self.0.data_type()
    }

    async fn invoke(&self, _ctx: &mut ExecCtx) -> ExecResult<Value> {
        Ok(self.0.clone())
    }
}

/// Reads a variable, innermost scope first.
pub(crate) struct VariableUnit {
    pub name: String,
}

#[async_trait]
impl FuncUnit for VariableUnit {
    fn output_type(&self) -> DataType {
        DataType::Dynamic
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        ctx.get_variable(&self.name)
            .ok_or_else(|| Error::CannotFindIdentifier(self.name.clone()))
    }
}

/// Reads a column of the row bound to a query scope.
pub(crate) struct ColumnUnit {
    pub slot: RowSlot,
    pub index: usize,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for ColumnUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, _ctx: &mut ExecCtx) -> ExecResult<Value> {
        Ok(self.slot.value(self.index))
    }
}

pub(crate) struct BinaryUnit {
    pub op: Operation,
    pub left: Unit,
    pub right: Unit,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for BinaryUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let left = self.left.invoke(ctx).await?;
        let right = self.right.invoke(ctx).await?;
        ops::binary(self.op, &left, &right)
    }
}

/// `AND` and `OR`, skipping the right operand when the left one decides.
pub(crate) struct LogicalUnit {
    pub op: Operation,
    pub left: Unit,
    pub right: Unit,
}

#[async_trait]
impl FuncUnit for LogicalUnit {
    fn output_type(&self) -> DataType {
        DataType::Boolean
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let left = self.left.invoke(ctx).await?;
        let decided = match (self.op, &left) {
            (Operation::And, Value::Boolean(false)) => Some(false),
            (Operation::Or, Value::Boolean(true)) => Some(true),
            _ => None,
        };
        if let Some(result) = decided {
            return Ok(Value::Boolean(result));
        }
        let right = self.right.invoke(ctx).await?;
        ops::binary(self.op, &left, &right)
    }
}

pub(crate) struct UnaryUnit {
    pub op: Operation,
    pub operand: Unit,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for UnaryUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let operand = self.operand.invoke(ctx).await?;
        ops::unary(self.op, &operand)
    }
}

/// `CASE`: the branches are tried in order and only the chosen result is
/// evaluated. A null operand matches no branch.
pub(crate) struct CaseUnit {
    pub operand: Option<Unit>,
    pub branches: Vec<(Unit, Unit)>,
    pub otherwise: Option<Unit>,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for CaseUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let operand = match &self.operand {
            Some(unit) => Some(unit.invoke(ctx).await?),
            None => None,
        };
        for (when, then) in &self.branches {
            let when = when.invoke(ctx).await?;
            let matched = match &operand {
                Some(operand) => ops::equals(operand, &when) == Some(true),
                None => when.is_truthy(),
            };
            if matched {
                return then.invoke(ctx).await;
            }
        }
        match &self.otherwise {
            Some(unit) => unit.invoke(ctx).await,
            None => Ok(Value::Null),
        }
    }
}

/// `expr [NOT] BETWEEN low AND high`.
pub(crate) struct BetweenUnit {
    pub expr: Unit,
    pub low: Unit,
    pub high: Unit,
    pub negated: bool,
}

#[async_trait]
impl FuncUnit for BetweenUnit {
    fn output_type(&self) -> DataType {
        DataType::Boolean
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let value = self.expr.invoke(ctx).await?;
        let low = self.low.invoke(ctx).await?;
        let high = self.high.invoke(ctx).await?;
        let above = ops::binary(Operation::GreaterOrEquals, &value, &low)?;
        let below = ops::binary(Operation::LessOrEquals, &value, &high)?;
        let result = ops::binary(Operation::And, &above, &below)?;
        negate_if(self.negated, result)
    }
}

/// Folds candidates into the SQL `IN` outcome: true on the first match,
/// unknown if there was no match but some comparison was unknown.
#[derive(Default)]
struct Membership {
    unknown: bool,
}

impl Membership {
    fn check(&mut self, value: &Value, candidate: &Value) -> bool {
        match ops::equals(value, candidate) {
            Some(found) => found,
            None => {
                self.unknown = true;
                false
            }
        }
    }

    fn outcome(self) -> Value {
        if self.unknown {
            Value::Null
        } else {
            Value::Boolean(false)
        }
    }
}

/// `expr [NOT] IN (a, b, ...)`.
pub(crate) struct InListUnit {
    pub expr: Unit,
    pub items: Vec<Unit>,
    pub negated: bool,
}

#[async_trait]
impl FuncUnit for InListUnit {
    fn output_type(&self) -> DataType {
        DataType::Boolean
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let value = self.expr.invoke(ctx).await?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mut membership = Membership::default();
        for item in &self.items {
            let candidate = item.invoke(ctx).await?;
            if membership.check(&value, &candidate) {
                return negate_if(self.negated, Value::Boolean(true));
            }
        }
        negate_if(self.negated, membership.outcome())
    }
}

/// `expr [NOT] IN (subquery)` or `expr [NOT] IN variable`, matching against
/// the first column of the rows.
pub(crate) struct InRowsUnit {
    pub expr: Unit,
    pub source: Unit,
    pub negated: bool,
}

#[async_trait]
impl FuncUnit for InRowsUnit {
    fn output_type(&self) -> DataType {
        DataType::Boolean
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let value = self.expr.invoke(ctx).await?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let source = self.source.invoke(ctx).await?;
        let mut rows = convert::to_iterator(&source).await?;
        let found = async {
            let mut membership = Membership::default();
            while rows.move_next(ctx).await? {
                if membership.check(&value, &rows.current().value(0)) {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok::<_, Error>(membership.outcome())
        }
        .await;
        let found = close_after(&mut rows, found).await?;
        negate_if(self.negated, found)
    }
}

fn negate_if(negated: bool, value: Value) -> ExecResult<Value> {
    if negated {
        ops::unary(Operation::Not, &value)
    } else {
        Ok(value)
    }
}

pub(crate) struct CastUnit {
    pub expr: Unit,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for CastUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let value = self.expr.invoke(ctx).await?;
        cast::cast(&value, self.ty)
    }
}

/// A function call. The overload is either fixed at compile time or
/// resolved on every call from the argument kinds.
pub(crate) struct CallUnit {
    pub name: String,
    pub args: Vec<Unit>,
    pub function: Option<Arc<Function>>,
    pub ty: DataType,
}

#[async_trait]
impl FuncUnit for CallUnit {
    fn output_type(&self) -> DataType {
        self.ty
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.invoke(ctx).await?);
        }
        let function = match &self.function {
            Some(function) => Arc::clone(function),
            None => {
                let kinds: Vec<DataType> = args.iter().map(Value::data_type).collect();
                let registry = Arc::clone(ctx.registry());
                registry.resolve(&self.name, &kinds).await?
            }
        };
        function.call(ctx, args).await
    }
}

/// The first value of the first row of a subquery, or null.
pub(crate) struct ScalarSubqueryUnit {
    pub query: Unit,
}

#[async_trait]
impl FuncUnit for ScalarSubqueryUnit {
    fn output_type(&self) -> DataType {
        DataType::Dynamic
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let rows = self.query.invoke(ctx).await?;
        let mut rows = convert::to_iterator(&rows).await?;
        let first = match rows.move_next(ctx).await {
            Ok(true) => Ok(rows.current().value(0)),
            Ok(false) => Ok(Value::Null),
            Err(err) => Err(err),
        };
        close_after(&mut rows, first).await
    }
}
