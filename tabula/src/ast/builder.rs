use std::sync::Arc;

use crate::{
    ast::{
        Delete, Identifier, InSource, Insert, InsertSource, Node, NodeId, Program, ProgramId,
        Select, Selector, Update,
    },
    types::{DataType, Operation, Value},
};

/// Builds programs node by node.
///
/// This is the entry point for parsers: every method pushes a node into the
/// arena and returns its id, to be used as a child of later nodes.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    nodes: Vec<Node>,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Finishes the program with the given top-level statements.
    pub fn build(self, body: Vec<NodeId>) -> Arc<Program> {
        Arc::new(Program {
            id: ProgramId::next(),
            nodes: self.nodes,
            body,
        })
    }

    pub fn lit(&mut self, value: impl Into<Value>) -> NodeId {
        self.push(Node::Literal(value.into()))
    }

    pub fn null(&mut self) -> NodeId {
        self.push(Node::Literal(Value::Null))
    }

    /// A reference; dots in `path` become property selectors.
    pub fn ident(&mut self, path: &str) -> NodeId {
        let mut parts = path.split('.');
        let name = parts.next().unwrap_or_default().to_owned();
        let selectors = parts.map(|p| Selector::Property(p.to_owned())).collect();
        self.push(Node::Identifier(Identifier { name, selectors }))
    }

    pub fn path(&mut self, name: &str, selectors: Vec<Selector>) -> NodeId {
        self.push(Node::Identifier(Identifier {
            name: name.to_owned(),
            selectors,
        }))
    }

    pub fn binary(&mut self, op: Operation, left: NodeId, right: NodeId) -> NodeId {
        self.push(Node::Binary { op, left, right })
    }

    pub fn unary(&mut self, op: Operation, operand: NodeId) -> NodeId {
        self.push(Node::Unary { op, operand })
    }

    pub fn between(&mut self, expr: NodeId, low: NodeId, high: NodeId) -> NodeId {
        self.push(Node::Between {
            expr,
            low,
            high,
            negated: false,
        })
    }

    pub fn in_list(&mut self, expr: NodeId, items: Vec<NodeId>) -> NodeId {
        self.push(Node::In {
            expr,
            source: InSource::List(items),
            negated: false,
        })
    }

    pub fn in_query(&mut self, expr: NodeId, query: NodeId) -> NodeId {
        self.push(Node::In {
            expr,
            source: InSource::Query(query),
            negated: false,
        })
    }

    pub fn in_value(&mut self, expr: NodeId, value: NodeId) -> NodeId {
        self.push(Node::In {
            expr,
            source: InSource::Value(value),
            negated: false,
        })
    }

    pub fn cast(&mut self, expr: NodeId, ty: DataType) -> NodeId {
        self.push(Node::Cast { expr, ty })
    }

    pub fn call(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        self.push(Node::Call {
            name: name.to_owned(),
            args,
        })
    }

    /// `CASE operand WHEN value THEN result ... [ELSE otherwise] END`, or the
    /// searched form (`WHEN condition THEN ...`) without an operand.
    pub fn case(
        &mut self,
        operand: Option<NodeId>,
        branches: Vec<(NodeId, NodeId)>,
        otherwise: Option<NodeId>,
    ) -> NodeId {
        self.push(Node::Case {
            operand,
            branches,
            otherwise,
        })
    }

    pub fn select(&mut self, select: Select) -> NodeId {
        self.push(Node::Select(Box::new(select)))
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.push(Node::Block(statements))
    }

    pub fn declare(&mut self, name: &str, ty: Option<DataType>, init: Option<NodeId>) -> NodeId {
        self.push(Node::Declare {
            name: name.to_owned(),
            ty,
            init,
        })
    }

    /// `SET path = value`.
    pub fn set(&mut self, path: &str, value: NodeId) -> NodeId {
        let target = self.ident(path);
        self.push(Node::Set { target, value })
    }

    pub fn if_else(&mut self, branches: Vec<(NodeId, NodeId)>, otherwise: Option<NodeId>) -> NodeId {
        self.push(Node::If {
            branches,
            otherwise,
        })
    }

    pub fn for_each(&mut self, variable: &str, source: NodeId, body: Vec<NodeId>) -> NodeId {
        let body = self.block(body);
        self.push(Node::For {
            variable: variable.to_owned(),
            source,
            body,
        })
    }

    pub fn break_loop(&mut self) -> NodeId {
        self.push(Node::Break)
    }

    pub fn continue_loop(&mut self) -> NodeId {
        self.push(Node::Continue)
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.push(Node::Return(value))
    }

    pub fn call_statement(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        let call = self.call(name, args);
        self.push(Node::CallStatement(call))
    }

    pub fn open(&mut self, source: NodeId) -> NodeId {
        self.push(Node::Open(source))
    }

    pub fn insert_values(&mut self, target: NodeId, columns: &[&str], rows: Vec<Vec<NodeId>>) -> NodeId {
        self.push(Node::Insert(Box::new(Insert {
            target,
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            source: InsertSource::Values(rows),
        })))
    }

    pub fn insert_query(&mut self, target: NodeId, columns: &[&str], query: NodeId) -> NodeId {
        self.push(Node::Insert(Box::new(Insert {
            target,
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            source: InsertSource::Query(query),
        })))
    }

    pub fn update(
        &mut self,
        target: NodeId,
        assignments: Vec<(&str, NodeId)>,
        filter: Option<NodeId>,
    ) -> NodeId {
        self.push(Node::Update(Box::new(Update {
            target,
            alias: None,
            assignments: assignments
                .into_iter()
                .map(|(column, value)| (column.to_owned(), value))
                .collect(),
            filter,
        })))
    }

    pub fn delete(&mut self, target: NodeId, filter: Option<NodeId>) -> NodeId {
        self.push(Node::Delete(Box::new(Delete {
            target,
            alias: None,
            filter,
        })))
    }
}
