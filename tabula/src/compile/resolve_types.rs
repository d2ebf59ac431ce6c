use std::collections::HashMap;

use crate::{
    ast::{InSource, Node, NodeId, Program, Selector},
    compile::RowScope,
    error::{Error, ExecResult},
    functions::FunctionRegistry,
    types::{ops, DataType, Operation},
};

/// Annotates expression nodes with their static kinds.
///
/// Operators whose operand kinds are statically known are checked against
/// the dispatch tables here, so that a mismatch fails the compilation
/// instead of the first evaluation. Variables and object paths are always
/// [`DataType::Dynamic`]: their kind may change between runs.
pub(crate) struct TypeResolver<'a> {
    pub program: &'a Program,
    pub rows: &'a [RowScope],
    pub registry: &'a FunctionRegistry,
    pub types: &'a mut HashMap<NodeId, DataType>,
}

impl TypeResolver<'_> {
    pub fn resolve(&mut self, id: NodeId) -> ExecResult<DataType> {
        if let Some(ty) = self.types.get(&id) {
            return Ok(*ty);
        }
        let ty = self.resolve_node(id)?;
        self.types.insert(id, ty);
        Ok(ty)
    }

    /// Like [`TypeResolver::resolve`], but a subquery stands for its first
    /// value.
    fn resolve_scalar(&mut self, id: NodeId) -> ExecResult<DataType> {
        let ty = self.resolve(id)?;
        Ok(match self.program.node(id) {
            Node::Select(_) => DataType::Dynamic,
            _ => ty,
        })
    }

    fn resolve_node(&mut self, id: NodeId) -> ExecResult<DataType> {
        let ty = match self.program.node(id) {
            Node::Literal(value) => value.data_type(),
            Node::Identifier(ident) => {
                for selector in &ident.selectors {
                    if let Selector::Index(args) = selector {
                        for &arg in args {
                            self.resolve(arg)?;
                        }
                    }
                }
                match ident.selectors.as_slice() {
                    [] => self.column_type(&ident.name, None),
                    [Selector::Property(column)] => self.column_type(column, Some(&ident.name)),
                    _ => None,
                }
                .unwrap_or(DataType::Dynamic)
            }
            Node::Binary { op, left, right } => {
                let left = self.resolve(*left)?;
                let right = self.resolve(*right)?;
                ops::binary_result_type(*op, left, right)?
            }
            Node::Unary { op, operand } => {
                let operand = self.resolve(*operand)?;
                ops::unary_result_type(*op, operand)?
            }
            Node::Between {
                expr, low, high, ..
            } => {
                let expr = self.resolve(*expr)?;
                let low = self.resolve(*low)?;
                let high = self.resolve(*high)?;
                ops::binary_result_type(Operation::GreaterOrEquals, expr, low)?;
                ops::binary_result_type(Operation::LessOrEquals, expr, high)?;
                DataType::Boolean
            }
            Node::In { expr, source, .. } => {
                self.resolve(*expr)?;
                match source {
                    InSource::List(items) => {
                        for &item in items {
                            self.resolve(item)?;
                        }
                    }
                    InSource::Query(_) | InSource::Value(_) => {}
                }
                DataType::Boolean
            }
            Node::Cast { expr, ty } => {
                self.resolve(*expr)?;
                *ty
            }
            Node::Call { name, args } => {
                let mut arg_types = Vec::with_capacity(args.len());
                for &arg in args {
                    arg_types.push(self.resolve(arg)?);
                }
                match self.registry.find(name, &arg_types) {
                    Ok(function) => function.return_type(),
                    // Settled at runtime, once the argument kinds are known.
                    Err(Error::AmbiguousOverload(_)) if arg_types.contains(&DataType::Dynamic) => {
                        DataType::Dynamic
                    }
                    Err(err) => return Err(err),
                }
            }
            Node::Case {
                operand,
                branches,
                otherwise,
            } => {
                let operand = operand.map(|id| self.resolve_scalar(id)).transpose()?;
                let mut results = Vec::with_capacity(branches.len() + 1);
                for &(when, then) in branches {
                    let when = self.resolve_scalar(when)?;
                    if let Some(operand) = operand {
                        ops::binary_result_type(Operation::Equals, operand, when)?;
                    }
                    results.push(self.resolve_scalar(then)?);
                }
                match otherwise {
                    Some(id) => results.push(self.resolve_scalar(*id)?),
                    None => results.push(DataType::Null),
                }
                common_type(&results)
            }
            Node::Select(_) => DataType::Object,
            _ => DataType::Void,
        };
        Ok(ty)
    }

    fn column_type(&self, name: &str, qualifier: Option<&str>) -> Option<DataType> {
        self.rows.iter().rev().find_map(|scope| {
            scope
                .find(name, qualifier)
                .map(|index| scope.columns[index].ty)
        })
    }
}

/// The kind shared by every non-null branch of a `CASE`, else dynamic.
fn common_type(types: &[DataType]) -> DataType {
    let mut known = types.iter().filter(|ty| **ty != DataType::Null);
    match known.next() {
        None => DataType::Null,
        Some(first) if known.all(|ty| ty == first) => *first,
        Some(_) => DataType::Dynamic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_kind_ignores_null_branches() {
        use DataType::*;
        assert_eq!(common_type(&[Integer, Null, Integer]), Integer);
        assert_eq!(common_type(&[Integer, String]), Dynamic);
        assert_eq!(common_type(&[Null]), Null);
        assert_eq!(common_type(&[Dynamic, Integer]), Dynamic);
    }
}
