use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    ast::Select,
    command::{dml::write_rows, CommandUnit, Completion},
    compile::{Compiler, Unit},
    data::{convert, IteratorObject},
    error::ExecResult,
    exec::ExecCtx,
    select::{RowNumberRowsIterator, SelectUnit},
    types::Value,
};

/// A query run as a statement.
///
/// Rows go to the `INTO` target, else to the thread's default output; the
/// written row count is returned. Without any output, the lazy result
/// iterator is returned instead.
struct SelectCommand {
    query: Arc<SelectUnit>,
    into: Option<Unit>,
}

#[async_trait]
impl CommandUnit for SelectCommand {
    async fn execute(&self, ctx: &mut ExecCtx) -> ExecResult<Completion> {
        let output = match &self.into {
            Some(into) => {
                let target = into.invoke(ctx).await?;
                Some(convert::to_output(&target, ctx.sources().as_ref()).await?)
            }
            None => ctx.options().default_output.clone(),
        };

        let mut rows = self.query.open(ctx).await?;
        if ctx.options().add_row_number {
            rows = Box::new(RowNumberRowsIterator::new(rows));
        }

        let Some(output) = output else {
            return Ok(Completion::Normal(Value::object(IteratorObject::new(rows))));
        };
        let written = write_rows(&mut rows, &output, None, ctx).await?;
        debug!(written, "query written");
        ctx.record_rows(written);
        Ok(Completion::Normal(Value::Integer(written as i64)))
    }
}

pub(super) async fn select(
    compiler: &mut Compiler<'_>,
    select: &Select,
) -> ExecResult<Arc<dyn CommandUnit>> {
    let query = compiler.select(select).await?;
    let into = match select.into {
        Some(into) => Some(compiler.source_expr(into).await?),
        None => None,
    };
    Ok(Arc::new(SelectCommand { query, into }))
}
