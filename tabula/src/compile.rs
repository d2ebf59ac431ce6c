//! Compilation of syntax trees into executable units.
//!
//! Every expression node becomes a [`FuncUnit`]: a reusable thunk that
//! yields a value given an execution context. Compilation runs in two
//! passes over each expression: the static kinds of the subtree are resolved
//! first (which checks operator dispatch and picks function overloads), then
//! the units are built bottom-up and memoized by node.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    ast::{InSource, Node, NodeId, Program},
    command::{self, CommandUnit},
    data::{Column, Row},
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::{DataType, Operation, Value},
};

mod resolve_types;
pub(crate) use resolve_types::TypeResolver;

mod selector;
pub(crate) use selector::AssignTarget;

mod units;
pub(crate) use units::*;

/// A compiled expression.
#[async_trait]
pub trait FuncUnit: Send + Sync {
    /// The static kind of the produced values ([`DataType::Dynamic`] when
    /// only known at runtime).
    fn output_type(&self) -> DataType;

    async fn invoke(&self, ctx: &mut ExecCtx) -> ExecResult<Value>;
}

pub type Unit = Arc<dyn FuncUnit>;

/// The row currently visible to the column references of a query.
///
/// Pipeline stages store each row they pull here before evaluating the
/// units that depend on it.
#[derive(Debug, Clone, Default)]
pub struct RowSlot(Arc<Mutex<Row>>);

impl RowSlot {
    pub fn set(&self, row: &Row) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.clone_from(row);
    }

    pub fn value(&self, index: usize) -> Value {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value(index)
    }
}

/// The columns of a query source, visible while compiling the query.
#[derive(Debug, Clone)]
pub(crate) struct RowScope {
    pub alias: Option<String>,
    pub columns: Arc<[Column]>,
    pub slot: RowSlot,
}

impl RowScope {
    /// Finds a column by name, optionally qualified by the scope alias.
    pub fn find(&self, name: &str, qualifier: Option<&str>) -> Option<usize> {
        if let Some(qualifier) = qualifier {
            let alias_matches = self
                .alias
                .as_deref()
                .is_some_and(|alias| alias.eq_ignore_ascii_case(qualifier));
            if !alias_matches {
                return self
                    .columns
                    .iter()
                    .position(|column| column.matches(name, Some(qualifier)));
            }
        }
        self.columns.iter().position(|column| column.matches(name, None))
    }
}

/// Compiles the statements and expressions of a program.
pub struct Compiler<'c> {
    pub(crate) ctx: &'c mut ExecCtx,
    pub(crate) program: Arc<Program>,
    /// Query scopes, innermost last.
    pub(crate) rows: Vec<RowScope>,
    units: HashMap<NodeId, Unit>,
    types: HashMap<NodeId, DataType>,
}

impl<'c> Compiler<'c> {
    pub fn new(ctx: &'c mut ExecCtx, program: Arc<Program>) -> Compiler<'c> {
        Compiler {
            ctx,
            program,
            rows: Vec::new(),
            units: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Compiles a statement.
    pub async fn statement(mut self, id: NodeId) -> ExecResult<Arc<dyn CommandUnit>> {
        command::build(&mut self, id).await
    }

    /// Returns the static kind of an expression.
    pub(crate) fn resolve_type(&mut self, id: NodeId) -> ExecResult<DataType> {
        let registry = Arc::clone(self.ctx.registry());
        let mut resolver = TypeResolver {
            program: &self.program,
            rows: &self.rows,
            registry: &registry,
            types: &mut self.types,
        };
        resolver.resolve(id)
    }

    pub(crate) fn push_rows(&mut self, scope: RowScope) {
        self.rows.push(scope);
    }

    pub(crate) fn pop_rows(&mut self) {
        self.rows.pop();
    }

    /// Compiles an expression.
    pub(crate) fn expr(&mut self, id: NodeId) -> BoxFuture<'_, ExecResult<Unit>> {
        async move {
            if let Some(unit) = self.units.get(&id) {
                return Ok(Arc::clone(unit));
            }
            let ty = self.resolve_type(id)?;
            let unit = self.build_expr(id, ty).await?;
            self.units.insert(id, Arc::clone(&unit));
            Ok(unit)
        }
        .boxed()
    }

    /// Compiles an expression whose value must be a scalar: subqueries yield
    /// the first value of their first row.
    pub(crate) async fn scalar(&mut self, id: NodeId) -> ExecResult<Unit> {
        let unit = self.expr(id).await?;
        Ok(match self.program.node(id) {
            Node::Select(_) => Arc::new(ScalarSubqueryUnit { query: unit }),
            _ => unit,
        })
    }

    pub(crate) async fn scalars(&mut self, ids: &[NodeId]) -> ExecResult<Vec<Unit>> {
        let mut units = Vec::with_capacity(ids.len());
        for &id in ids {
            units.push(self.scalar(id).await?);
        }
        Ok(units)
    }

    async fn build_expr(&mut self, id: NodeId, ty: DataType) -> ExecResult<Unit> {
        let program = Arc::clone(&self.program);
        let unit: Unit = match program.node(id) {
            Node::Literal(value) => Arc::new(LiteralUnit(value.clone())),
            Node::Identifier(ident) => self.identifier(ident).await?,
            Node::Binary { op, left, right } => {
                let left = self.scalar(*left).await?;
                let right = self.scalar(*right).await?;
                match op {
                    Operation::And | Operation::Or => Arc::new(LogicalUnit {
                        op: *op,
                        left,
                        right,
                    }),
                    _ => Arc::new(BinaryUnit {
                        op: *op,
                        left,
                        right,
                        ty,
                    }),
                }
            }
            Node::Unary { op, operand } => Arc::new(UnaryUnit {
                op: *op,
                operand: self.scalar(*operand).await?,
                ty,
            }),
            Node::Between {
                expr,
                low,
                high,
                negated,
            } => Arc::new(BetweenUnit {
                expr: self.scalar(*expr).await?,
                low: self.scalar(*low).await?,
                high: self.scalar(*high).await?,
                negated: *negated,
            }),
            Node::In {
                expr,
                source,
                negated,
            } => {
                let expr = self.scalar(*expr).await?;
                match source {
                    InSource::List(items) => Arc::new(InListUnit {
                        expr,
                        items: self.scalars(items).await?,
                        negated: *negated,
                    }),
                    InSource::Query(source) | InSource::Value(source) => Arc::new(InRowsUnit {
                        expr,
                        source: self.expr(*source).await?,
                        negated: *negated,
                    }),
                }
            }
            Node::Cast { expr, ty } => Arc::new(CastUnit {
                expr: self.scalar(*expr).await?,
                ty: *ty,
            }),
            Node::Call { name, args } => self.call(name, args, ty).await?,
            Node::Case {
                operand,
                branches,
                otherwise,
            } => {
                let operand = match operand {
                    Some(id) => Some(self.scalar(*id).await?),
                    None => None,
                };
                let mut arms = Vec::with_capacity(branches.len());
                for &(when, then) in branches {
                    arms.push((self.scalar(when).await?, self.scalar(then).await?));
                }
                let otherwise = match otherwise {
                    Some(id) => Some(self.scalar(*id).await?),
                    None => None,
                };
                Arc::new(CaseUnit {
                    operand,
                    branches: arms,
                    otherwise,
                    ty,
                })
            }
            Node::Select(select) => self.select(select).await?,
            _ => {
                return Err(Error::ExecError(format!(
                    "statement {id} cannot be used as an expression"
                )))
            }
        };
        Ok(unit)
    }

    async fn call(&mut self, name: &str, args: &[NodeId], ty: DataType) -> ExecResult<Unit> {
        let mut arg_types = Vec::with_capacity(args.len());
        for &arg in args {
            arg_types.push(self.resolve_type(arg)?);
        }
        // Overloads are picked now when every argument kind is known, else
        // on every call from the runtime kinds.
        let function = if arg_types.iter().all(|ty| *ty != DataType::Dynamic) {
            Some(self.ctx.registry().resolve(name, &arg_types).await?)
        } else {
            None
        };
        Ok(Arc::new(CallUnit {
            name: name.to_owned(),
            args: self.scalars(args).await?,
            function,
            ty,
        }))
    }

    /// Checks whether `id` references a column of the innermost query scope,
    /// returning its index.
    pub(crate) fn current_column(&self, id: NodeId) -> Option<usize> {
        let Node::Identifier(ident) = self.program.node(id) else {
            return None;
        };
        let scope = self.rows.last()?;
        match ident.selectors.as_slice() {
            [] => scope.find(&ident.name, None),
            [crate::ast::Selector::Property(column)] => {
                let alias = scope.alias.as_deref()?;
                alias
                    .eq_ignore_ascii_case(&ident.name)
                    .then(|| scope.find(column, Some(alias)))
                    .flatten()
            }
            _ => None,
        }
    }

    /// Checks whether the subtree rooted at `id` depends on the innermost
    /// query scope.
    pub(crate) fn references_current(&self, id: NodeId) -> bool {
        let mut found = false;
        self.program.walk(id, &mut |child, node| {
            if matches!(node, Node::Identifier(_)) && self.current_column(child).is_some() {
                found = true;
            }
        });
        found
    }
}
