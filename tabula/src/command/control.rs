use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::{
    ast::{NodeId, Program},
    command::{CommandUnit, Completion, Jump},
    compile::{Compiler, Unit},
    data::{close_after, convert, Column, RowObject, RowsIterator},
    error::ExecResult,
    exec::ExecCtx,
    types::Value,
};

/// A list of statements, optionally within its own scope. Statements are
/// compiled when first reached.
struct BlockCommand {
    program: Arc<Program>,
    body: Vec<NodeId>,
    scoped: bool,
}

#[async_trait]
impl CommandUnit for BlockCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let _scope = self.scoped.then(|| ctx.push_scope());
        let mut last = Value::Null;
        for &id in &self.body {
            match ctx.execute_statement(&self.program, id).await? {
                Completion::Normal(value) => last = value,
                jump => return Ok(jump),
            }
        }
        Ok(Completion::Normal(last))
    }
}

pub(super) fn block(program: &Arc<Program>, body: &[NodeId], scoped: bool) -> Arc<dyn CommandUnit> {
    Arc::new(BlockCommand {
        program: Arc::clone(program),
        body: body.to_vec(),
        scoped,
    })
}

/// `IF ... ELSE IF ... ELSE`. Conditions are compiled upfront, the blocks
/// when first taken.
struct IfCommand {
    program: Arc<Program>,
    branches: Vec<(Unit, NodeId)>,
    otherwise: Option<NodeId>,
}

#[async_trait]
impl CommandUnit for IfCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        for (condition, block) in &self.branches {
            if condition.invoke(ctx).await?.is_truthy() {
                return ctx.execute_statement(&self.program, *block).await;
            }
        }
        match self.otherwise {
            Some(block) => ctx.execute_statement(&self.program, block).await,
            None => Ok(Completion::Normal(Value::Null)),
        }
    }
}

pub(super) async fn branch(
    compiler: &mut Compiler<'_>,
    branches: &[(NodeId, NodeId)],
    otherwise: Option<NodeId>,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let mut compiled = Vec::with_capacity(branches.len());
    for &(condition, block) in branches {
        compiled.push((compiler.scalar(condition).await?, block));
    }
    Ok(Arc::new(IfCommand {
        program: Arc::clone(&compiler.program),
        branches: compiled,
        otherwise,
    }))
}

/// `FOR variable IN source body`.
///
/// Every run gets a fresh iterator and a scope holding the loop variable,
/// both released whatever the way out of the loop.
struct ForCommand {
    program: Arc<Program>,
    variable: String,
    source: Unit,
    body: NodeId,
}

impl ForCommand {
    async fn iterate(
        &self,
        rows: &mut Box<dyn RowsIterator>,
        ctx: &mut ExecCtx,
    ) -> ExecResult<Completion> {
        let columns: Arc<[Column]> = rows.columns().into();
        let _scope = ctx.push_scope();
        ctx.declare_variable(&self.variable, Value::Null);
        let mut iterations = 0u64;
        while rows.move_next(ctx).await? {
            iterations += 1;
            let row = RowObject::new(Arc::clone(&columns), rows.current().clone());
            ctx.set_variable(&self.variable, Value::object(row))?;
            match ctx.execute_statement(&self.program, self.body).await? {
                Completion::Normal(_) | Completion::Jump(Jump::Continue) => {}
                Completion::Jump(Jump::Break) => break,
                Completion::Jump(Jump::Return(value)) => {
                    return Ok(Completion::Jump(Jump::Return(value)))
                }
            }
        }
        trace!(iterations, "loop done");
        Ok(Completion::Normal(Value::Null))
    }
}

#[async_trait]
impl CommandUnit for ForCommand {
    #[instrument(name = "For", level = "debug", skip_all)]
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let source = self.source.invoke(ctx).await?;
        let mut rows = convert::to_iterator(&source).await?;
        let result = self.iterate(&mut rows, ctx).await;
        close_after(&mut rows, result).await
    }
}

pub(super) async fn for_each(
    compiler: &mut Compiler<'_>,
    variable: &str,
    source: NodeId,
    body: NodeId,
) -> ExecResult<Arc<dyn CommandUnit>> {
    Ok(Arc::new(ForCommand {
        program: Arc::clone(&compiler.program),
        variable: variable.to_owned(),
        source: compiler.expr(source).await?,
        body,
    }))
}

struct JumpCommand(Jump);

#[async_trait]
impl CommandUnit for JumpCommand {
    async fn execute(&self, _ctx: &mut ExecCtx) -> ExecResult<Completion> {
        Ok(Completion::Jump(self.0.clone()))
    }
}

/// `BREAK`, `CONTINUE` and a bare `RETURN` are shared by all programs.
pub(super) fn jump(jump: Jump) -> Arc<dyn CommandUnit> {
    static BREAK: OnceLock<Arc<dyn CommandUnit>> = OnceLock::new();
    static CONTINUE: OnceLock<Arc<dyn CommandUnit>> = OnceLock::new();
    static RETURN: OnceLock<Arc<dyn CommandUnit>> = OnceLock::new();

    let cell = match &jump {
        Jump::Break => &BREAK,
        Jump::Continue => &CONTINUE,
        Jump::Return(Value::Null) => &RETURN,
        Jump::Return(_) => return Arc::new(JumpCommand(jump)),
    };
    Arc::clone(cell.get_or_init(|| Arc::new(JumpCommand(jump))))
}

struct ReturnCommand {
    value: Unit,
}

#[async_trait]
impl CommandUnit for ReturnCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let value = self.value.invoke(ctx).await?;
        Ok(Completion::Jump(Jump::Return(value)))
    }
}

pub(super) async fn ret(
    compiler: &mut Compiler<'_>,
    value: Option<NodeId>,
) -> ExecResult<Arc<dyn CommandUnit>> {
    match value {
        Some(value) => Ok(Arc::new(ReturnCommand {
            value: compiler.expr(value).await?,
        })),
        None => Ok(jump(Jump::Return(Value::Null))),
    }
}
