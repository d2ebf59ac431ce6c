//! Identifier resolution and the object selector protocol.
//!
//! A bare name is a column of an enclosing query or a variable. A path
//! (`a.b[0].c`) starts from such a value and walks the selectors against the
//! objects met on the way: get-property first, then get-index with the name,
//! for property selectors; get-index for index selectors. A null met
//! halfway makes the whole path null. When a selector finds nothing, the
//! path falls back to a variable literally named after the whole path, and
//! fails with [`Error::CannotFindIdentifier`] if there is none.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    ast::{Identifier, Selector},
    compile::{ColumnUnit, Compiler, FuncUnit, Unit, VariableUnit},
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::{DataType, Value},
};

/// A compiled selector.
pub(crate) enum Step {
    Property(String),
    Index(Vec<Unit>),
}

impl Step {
    async fn args(&self, ctx: &mut ExecCtx) -> ExecResult<Option<Vec<Value>>> {
        match self {
            Step::Property(_) => Ok(None),
            Step::Index(units) => {
                let mut args = Vec::with_capacity(units.len());
                for unit in units {
                    args.push(unit.invoke(ctx).await?);
                }
                Ok(Some(args))
            }
        }
    }

    /// Applies a get strategy. `None` means no strategy applied.
    async fn get(&self, value: &Value, ctx: &mut ExecCtx) -> ExecResult<Option<Value>> {
        let args = self.args(ctx).await?;
        let Value::Object(object) = value else {
            return Ok(None);
        };
        Ok(match (self, args) {
            (Step::Property(name), _) => object
                .get_property(name)
                .or_else(|| object.get_index(&[Value::String(name.clone())])),
            (Step::Index(_), Some(args)) => object.get_index(&args),
            (Step::Index(_), None) => None,
        })
    }

    /// Applies a set strategy. Returns `false` if none applied.
    async fn set(&self, target: &Value, value: Value, ctx: &mut ExecCtx) -> ExecResult<bool> {
        let args = self.args(ctx).await?;
        let Value::Object(object) = target else {
            return Ok(false);
        };
        match (self, args) {
            (Step::Property(name), _) => {
                if object.set_property(name, value.clone())? {
                    return Ok(true);
                }
                object.set_index(&[Value::String(name.clone())], value)
            }
            (Step::Index(_), Some(args)) => object.set_index(&args, value),
            (Step::Index(_), None) => Ok(false),
        }
    }
}

enum Walk {
    Found(Value),
    /// A selector found nothing.
    Missed,
}

async fn walk(mut value: Value, steps: &[Step], ctx: &mut ExecCtx) -> ExecResult<Walk> {
    for step in steps {
        if value.is_null() {
            return Ok(Walk::Found(Value::Null));
        }
        match step.get(&value, ctx).await? {
            Some(next) => value = next,
            None => return Ok(Walk::Missed),
        }
    }
    Ok(Walk::Found(value))
}

fn fallback(ctx: &ExecCtx, full_name: &str) -> ExecResult<Value> {
    ctx.get_variable(full_name)
        .ok_or_else(|| Error::CannotFindIdentifier(full_name.to_owned()))
}

/// Reads a path.
pub(crate) struct PathUnit {
    base: Unit,
    steps: Vec<Step>,
    full_name: String,
}

#[async_trait]
impl FuncUnit for PathUnit {
    fn output_type(&self) -> DataType {
        DataType::Dynamic
    }

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value> {
        let base = self.base.invoke(ctx).await?;
        match walk(base, &self.steps, ctx).await? {
            Walk::Found(value) => Ok(value),
            Walk::Missed => fallback(ctx, &self.full_name),
        }
    }
}

/// The left-hand side of an assignment.
pub(crate) enum AssignTarget {
    Variable(String),
    Path {
        base: Unit,
        /// All the steps but the last, walked to find the written object.
        steps: Vec<Step>,
        last: Step,
        full_name: String,
    },
}

impl AssignTarget {
    /// Writes `value`, returning it.
    pub async fn assign(&self, value: Value, ctx: &mut ExecCtx) -> ExecResult<Value> {
        match self {
            AssignTarget::Variable(name) => {
                ctx.set_variable(name, value.clone())?;
                Ok(value)
            }
            AssignTarget::Path {
                base,
                steps,
                last,
                full_name,
            } => {
                let base = base.invoke(ctx).await?;
                if let Walk::Found(target) = walk(base, steps, ctx).await? {
                    if last.set(&target, value.clone(), ctx).await? {
                        return Ok(value);
                    }
                }
                ctx.set_variable(full_name, value.clone())?;
                Ok(value)
            }
        }
    }
}

impl Compiler<'_> {
    /// Finds the base of an identifier: a column or a variable. Returns the
    /// base unit and the number of selectors it consumed.
    fn base(&self, ident: &Identifier) -> Option<(Unit, usize)> {
        if let Some(Selector::Property(column)) = ident.selectors.first() {
            if let Some(unit) = self.column(column, Some(&ident.name)) {
                return Some((unit, 1));
            }
        }
        if let Some(unit) = self.column(&ident.name, None) {
            return Some((unit, 0));
        }
        self.ctx.has_variable(&ident.name).then(|| {
            let unit: Unit = Arc::new(VariableUnit {
                name: ident.name.clone(),
            });
            (unit, 0)
        })
    }

    fn column(&self, name: &str, qualifier: Option<&str>) -> Option<Unit> {
        self.rows.iter().rev().find_map(|scope| {
            scope.find(name, qualifier).map(|index| {
                let unit: Unit = Arc::new(ColumnUnit {
                    slot: scope.slot.clone(),
                    index,
                    ty: scope.columns[index].ty,
                });
                unit
            })
        })
    }

    async fn steps(&mut self, selectors: &[Selector]) -> ExecResult<Vec<Step>> {
        let mut steps = Vec::with_capacity(selectors.len());
        for selector in selectors {
            steps.push(match selector {
                Selector::Property(name) => Step::Property(name.clone()),
                Selector::Index(args) => Step::Index(self.scalars(args).await?),
            });
        }
        Ok(steps)
    }

    /// Compiles a reference.
    pub(crate) async fn identifier(&mut self, ident: &Identifier) -> ExecResult<Unit> {
        let full_name = ident.full_name();
        let Some((base, consumed)) = self.base(ident) else {
            if !ident.selectors.is_empty() && self.ctx.has_variable(&full_name) {
                return Ok(Arc::new(VariableUnit { name: full_name }));
            }
            return Err(Error::CannotFindIdentifier(full_name));
        };
        let rest = &ident.selectors[consumed..];
        if rest.is_empty() {
            return Ok(base);
        }
        Ok(Arc::new(PathUnit {
            base,
            steps: self.steps(rest).await?,
            full_name,
        }))
    }

    /// Compiles the target of an assignment.
    pub(crate) async fn assign_target(&mut self, ident: &Identifier) -> ExecResult<AssignTarget> {
        let full_name = ident.full_name();
        if ident.selectors.is_empty() {
            if !self.ctx.has_variable(&ident.name) {
                return Err(Error::CannotFindIdentifier(full_name));
            }
            return Ok(AssignTarget::Variable(ident.name.clone()));
        }
        let Some((base, consumed)) = self.base(ident) else {
            if self.ctx.has_variable(&full_name) {
                return Ok(AssignTarget::Variable(full_name));
            }
            return Err(Error::CannotFindIdentifier(full_name));
        };
        let mut steps = self.steps(&ident.selectors[consumed..]).await?;
        let Some(last) = steps.pop() else {
            return Err(Error::ExecError(format!("`{full_name}` cannot be assigned")));
        };
        Ok(AssignTarget::Path {
            base,
            steps,
            last,
            full_name,
        })
    }
}
