use std::{
    fmt,
    sync::atomic::{self, AtomicU64},
};

use crate::{
    index::{NullOrder, OrderDirection},
    types::{DataType, Operation, Value},
};

/// Index of a node in its program arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a program, so that compiled units may be cached across runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(u64);

impl ProgramId {
    pub(crate) fn next() -> ProgramId {
        static PROGRAM_ID: AtomicU64 = AtomicU64::new(1);
        ProgramId(PROGRAM_ID.fetch_add(1, atomic::Ordering::AcqRel))
    }
}

/// A parsed program: an arena of nodes plus the top-level statements.
///
/// Children are referenced by index, so the tree is trivially cloneable.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) id: ProgramId,
    pub(crate) nodes: Vec<Node>,
    pub(crate) body: Vec<NodeId>,
}

impl Program {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Top-level statements.
    pub fn body(&self) -> &[NodeId] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visits `id` and all its descendants, parents first.
    pub fn walk<F>(&self, id: NodeId, visitor: &mut F)
    where
        F: FnMut(NodeId, &Node),
    {
        let node = self.node(id);
        visitor(id, node);
        for child in node.children() {
            self.walk(child, visitor);
        }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    // Expressions.
    Literal(Value),
    Identifier(Identifier),
    Binary {
        op: Operation,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        op: Operation,
        operand: NodeId,
    },
    Between {
        expr: NodeId,
        low: NodeId,
        high: NodeId,
        negated: bool,
    },
    In {
        expr: NodeId,
        source: InSource,
        negated: bool,
    },
    Cast {
        expr: NodeId,
        ty: DataType,
    },
    Call {
        name: String,
        args: Vec<NodeId>,
    },
    /// `CASE [operand] WHEN .. THEN .. [ELSE ..] END`. With an operand, the
    /// `WHEN` values are compared to it; without, they are conditions.
    Case {
        operand: Option<NodeId>,
        branches: Vec<(NodeId, NodeId)>,
        otherwise: Option<NodeId>,
    },
    Select(Box<Select>),

    // Statements.
    Block(Vec<NodeId>),
    Declare {
        name: String,
        ty: Option<DataType>,
        init: Option<NodeId>,
    },
    Set {
        target: NodeId,
        value: NodeId,
    },
    If {
        branches: Vec<(NodeId, NodeId)>,
        otherwise: Option<NodeId>,
    },
    For {
        variable: String,
        source: NodeId,
        body: NodeId,
    },
    Break,
    Continue,
    Return(Option<NodeId>),
    CallStatement(NodeId),
    Open(NodeId),
    Insert(Box<Insert>),
    Update(Box<Update>),
    Delete(Box<Delete>),
}

impl Node {
    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self {
            Node::Literal(_) | Node::Break | Node::Continue => {}
            Node::Identifier(ident) => {
                for selector in &ident.selectors {
                    if let Selector::Index(args) = selector {
                        out.extend(args);
                    }
                }
            }
            Node::Binary { left, right, .. } => out.extend([*left, *right]),
            Node::Unary { operand, .. } => out.push(*operand),
            Node::Between {
                expr, low, high, ..
            } => out.extend([*expr, *low, *high]),
            Node::In { expr, source, .. } => {
                out.push(*expr);
                match source {
                    InSource::List(items) => out.extend(items),
                    InSource::Query(id) | InSource::Value(id) => out.push(*id),
                }
            }
            Node::Cast { expr, .. } => out.push(*expr),
            Node::Call { args, .. } => out.extend(args),
            Node::Case {
                operand,
                branches,
                otherwise,
            } => {
                out.extend(*operand);
                for (when, then) in branches {
                    out.extend([*when, *then]);
                }
                out.extend(*otherwise);
            }
            Node::Select(select) => select.children(&mut out),
            Node::Block(stmts) => out.extend(stmts),
            Node::Declare { init, .. } => out.extend(init),
            Node::Set { target, value } => out.extend([*target, *value]),
            Node::If {
                branches,
                otherwise,
            } => {
                for (cond, block) in branches {
                    out.extend([*cond, *block]);
                }
                out.extend(otherwise);
            }
            Node::For { source, body, .. } => out.extend([*source, *body]),
            Node::Return(value) => out.extend(value),
            Node::CallStatement(id) | Node::Open(id) => out.push(*id),
            Node::Insert(insert) => {
                out.push(insert.target);
                match &insert.source {
                    InsertSource::Values(rows) => out.extend(rows.iter().flatten()),
                    InsertSource::Query(id) => out.push(*id),
                }
            }
            Node::Update(update) => {
                out.push(update.target);
                out.extend(update.assignments.iter().map(|(_, value)| *value));
                out.extend(update.filter);
            }
            Node::Delete(delete) => {
                out.push(delete.target);
                out.extend(delete.filter);
            }
        }
        out
    }

    pub fn is_statement(&self) -> bool {
        !matches!(
            self,
            Node::Literal(_)
                | Node::Identifier(_)
                | Node::Binary { .. }
                | Node::Unary { .. }
                | Node::Between { .. }
                | Node::In { .. }
                | Node::Cast { .. }
                | Node::Call { .. }
                | Node::Case { .. }
        )
    }
}

/// A variable or column reference, with an optional object path.
#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: String,
    pub selectors: Vec<Selector>,
}

impl Identifier {
    /// The textual path, e.g. `user.address.city`.
    pub fn full_name(&self) -> String {
        let mut out = self.name.clone();
        for selector in &self.selectors {
            match selector {
                Selector::Property(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Selector::Index(args) => {
                    out.push('[');
                    out.push_str(&args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
                    out.push(']');
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum Selector {
    Property(String),
    Index(Vec<NodeId>),
}

#[derive(Debug, Clone)]
pub enum InSource {
    List(Vec<NodeId>),
    Query(NodeId),
    /// A variable (or any expression) holding rows or a single value.
    Value(NodeId),
}

#[derive(Debug, Clone, Default)]
pub struct Select {
    pub columns: Vec<SelectColumn>,
    pub distinct: bool,
    pub from: Option<FromClause>,
    pub filter: Option<NodeId>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<NodeId>,
    pub offset: Option<NodeId>,
    pub into: Option<NodeId>,
}

impl Select {
    pub fn new() -> Select {
        Select::default()
    }

    /// Adds `*`.
    pub fn all(mut self) -> Select {
        self.columns.push(SelectColumn::All);
        self
    }

    pub fn column(mut self, expr: NodeId) -> Select {
        self.columns.push(SelectColumn::Expr { expr, alias: None });
        self
    }

    pub fn column_as(mut self, expr: NodeId, alias: &str) -> Select {
        self.columns.push(SelectColumn::Expr {
            expr,
            alias: Some(alias.to_owned()),
        });
        self
    }

    /// Skips the rows equal to an earlier one. Sort keys that are not
    /// output columns come from the first of the equal rows.
    pub fn distinct(mut self) -> Select {
        self.distinct = true;
        self
    }

    pub fn from(mut self, source: NodeId) -> Select {
        self.from = Some(FromClause {
            source: FromSource::Expr(source),
            alias: None,
        });
        self
    }

    pub fn from_as(mut self, source: NodeId, alias: &str) -> Select {
        self.from = Some(FromClause {
            source: FromSource::Expr(source),
            alias: Some(alias.to_owned()),
        });
        self
    }

    pub fn from_values(mut self, rows: Vec<Vec<NodeId>>) -> Select {
        self.from = Some(FromClause {
            source: FromSource::Values(rows),
            alias: None,
        });
        self
    }

    pub fn filter(mut self, condition: NodeId) -> Select {
        self.filter = Some(condition);
        self
    }

    pub fn order_by(mut self, expr: NodeId, direction: OrderDirection, nulls: NullOrder) -> Select {
        self.order_by.push(OrderBy {
            expr,
            direction,
            nulls,
        });
        self
    }

    pub fn limit(mut self, limit: NodeId) -> Select {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: NodeId) -> Select {
        self.offset = Some(offset);
        self
    }

    pub fn into_target(mut self, target: NodeId) -> Select {
        self.into = Some(target);
        self
    }

    fn children(&self, out: &mut Vec<NodeId>) {
        for column in &self.columns {
            if let SelectColumn::Expr { expr, .. } = column {
                out.push(*expr);
            }
        }
        if let Some(from) = &self.from {
            match &from.source {
                FromSource::Expr(id) => out.push(*id),
                FromSource::Values(rows) => out.extend(rows.iter().flatten()),
            }
        }
        out.extend(self.filter);
        out.extend(self.order_by.iter().map(|o| o.expr));
        out.extend(self.limit);
        out.extend(self.offset);
        out.extend(self.into);
    }
}

#[derive(Debug, Clone)]
pub enum SelectColumn {
    All,
    Expr { expr: NodeId, alias: Option<String> },
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub source: FromSource,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FromSource {
    /// A variable, function call, source name or subquery.
    Expr(NodeId),
    Values(Vec<Vec<NodeId>>),
}

#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub expr: NodeId,
    pub direction: OrderDirection,
    pub nulls: NullOrder,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub target: NodeId,
    /// Explicit target columns; empty when not given.
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone)]
pub enum InsertSource {
    Values(Vec<Vec<NodeId>>),
    Query(NodeId),
}

#[derive(Debug, Clone)]
pub struct Update {
    pub target: NodeId,
    pub alias: Option<String>,
    pub assignments: Vec<(String, NodeId)>,
    pub filter: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub target: NodeId,
    pub alias: Option<String>,
    pub filter: Option<NodeId>,
}
