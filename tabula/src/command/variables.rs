use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    ast::{Node, NodeId},
    command::{CommandUnit, Completion},
    compile::{AssignTarget, Compiler, Unit},
    data::{convert, InputObject},
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::{cast, DataType, Value},
};

/// `DECLARE name [type] [:= init]`.
struct DeclareCommand {
    name: String,
    ty: Option<DataType>,
    init: Option<Unit>,
}

#[async_trait]
impl CommandUnit for DeclareCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let mut value = match &self.init {
            Some(init) => init.invoke(ctx).await?,
            None => Value::Null,
        };
        if let Some(ty) = self.ty.filter(|ty| ty.is_static()) {
            value = cast::cast(&value, ty)?;
        }
        ctx.declare_variable(&self.name, value.clone());
        Ok(Completion::Normal(value))
    }
}

pub(super) async fn declare(
    compiler: &mut Compiler<'_>,
    name: &str,
    ty: Option<DataType>,
    init: Option<NodeId>,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let init = match init {
        Some(init) => Some(compiler.scalar(init).await?),
        None => None,
    };
    Ok(Arc::new(DeclareCommand {
        name: name.to_owned(),
        ty,
        init,
    }))
}

/// `SET target = value`, returning the written value.
struct SetCommand {
    target: AssignTarget,
    value: Unit,
}

#[async_trait]
impl CommandUnit for SetCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let value = self.value.invoke(ctx).await?;
        self.target.assign(value, ctx).await.map(Completion::Normal)
    }
}

pub(super) async fn set(
    compiler: &mut Compiler<'_>,
    target: NodeId,
    value: NodeId,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let program = Arc::clone(&compiler.program);
    let Node::Identifier(ident) = program.node(target) else {
        return Err(Error::ExecError(format!("{target} cannot be assigned")));
    };
    let target = compiler.assign_target(ident).await?;
    let value = compiler.scalar(value).await?;
    Ok(Arc::new(SetCommand { target, value }))
}

/// `OPEN source`: resolves and opens an input, leaving it to its holder.
struct OpenCommand {
    source: Unit,
}

#[async_trait]
impl CommandUnit for OpenCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let source = self.source.invoke(ctx).await?;
        let (input, owned) = convert::to_input(&source, ctx.sources().as_ref()).await?;
        if owned {
            input.lock().await.open().await?;
            debug!(%source, "opened input");
        }
        Ok(Completion::Normal(Value::object(InputObject::opened(input))))
    }
}

pub(super) async fn open(
    compiler: &mut Compiler<'_>,
    source: NodeId,
) -> ExecResult<Arc<dyn CommandUnit>> {
    Ok(Arc::new(OpenCommand {
        source: compiler.source_expr(source).await?,
    }))
}
