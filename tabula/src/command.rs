//! Statements.
//!
//! Every statement kind has a handler building a [`CommandUnit`] once, at
//! compile time. Running the unit yields a [`Completion`]: either a value
//! or a jump (`BREAK`, `CONTINUE`, `RETURN`) that the enclosing loops and
//! blocks inspect.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    ast::{Node, NodeId},
    compile::{Compiler, Unit},
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::Value,
};

mod control;
mod dml;
mod query;
mod variables;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Normal(Value),
    Jump(Jump),
}

/// A non-local exit.
#[derive(Debug, Clone, PartialEq)]
pub enum Jump {
    /// Leaves the innermost loop.
    Break,
    /// Skips to the next iteration of the innermost loop.
    Continue,
    /// Leaves the program.
    Return(Value),
}

impl fmt::Display for Jump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Jump::Break => f.write_str("BREAK"),
            Jump::Continue => f.write_str("CONTINUE"),
            Jump::Return(_) => f.write_str("RETURN"),
        }
    }
}

/// A compiled statement.
#[async_trait]
pub trait CommandUnit: Send + Sync {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion>;
}

/// A statement made of a single expression.
struct ExpressionCommand {
    unit: Unit,
}

#[async_trait]
impl CommandUnit for ExpressionCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        self.unit.invoke(ctx).await.map(Completion::Normal)
    }
}

/// Names the statements with external effects, refused under safe mode.
fn side_effect(node: &Node) -> Option<&'static str> {
    match node {
        Node::Insert(_) => Some("INSERT"),
        Node::Update(_) => Some("UPDATE"),
        Node::Delete(_) => Some("DELETE"),
        Node::Select(select) if select.into.is_some() => Some("SELECT INTO"),
        _ => None,
    }
}

/// Builds the unit of a statement.
pub(crate) fn build<'a, 'c>(
    compiler: &'a mut Compiler<'c>,
    id: NodeId,
) -> BoxFuture<'a, ExecResult<Arc<dyn CommandUnit>>> {
    async move {
        let program = Arc::clone(&compiler.program);
        let node = program.node(id);
        if compiler.ctx.options().safe_mode {
            if let Some(command) = side_effect(node) {
                return Err(Error::SafeModeViolation(command.into()));
            }
        }

        let unit: Arc<dyn CommandUnit> = match node {
            Node::Block(body) => control::block(&program, body, true),
            Node::If {
                branches,
                otherwise,
            } => control::branch(compiler, branches, *otherwise).await?,
            Node::For {
                variable,
                source,
                body,
            } => control::for_each(compiler, variable, *source, *body).await?,
            Node::Break => control::jump(Jump::Break),
            Node::Continue => control::jump(Jump::Continue),
            Node::Return(value) => control::ret(compiler, *value).await?,
            Node::Declare { name, ty, init } => {
                variables::declare(compiler, name, *ty, *init).await?
            }
            Node::Set { target, value } => variables::set(compiler, *target, *value).await?,
            Node::Open(source) => variables::open(compiler, *source).await?,
            Node::CallStatement(call) => Arc::new(ExpressionCommand {
                unit: compiler.expr(*call).await?,
            }),
            Node::Select(select) => query::select(compiler, select).await?,
            Node::Insert(insert) => dml::insert(compiler, insert).await?,
            Node::Update(update) => dml::update(compiler, update).await?,
            Node::Delete(delete) => dml::delete(compiler, delete).await?,
            _ => Arc::new(ExpressionCommand {
                unit: compiler.expr(id).await?,
            }),
        };
        Ok(unit)
    }
    .boxed()
}
