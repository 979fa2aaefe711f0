// src/ast/mod.rs
//! Abstract syntax tree for script expressions and statements.
//!
//! The external config parser hands these trees to the optimizer; after
//! optimization they are immutable and shared read-only across worker
//! threads. Each node exclusively owns its children.

use std::sync::Arc;

use crate::functions::{CompiledState, FuncId};
use crate::host::MessageAction;
use crate::primask::PriMask;

/// Comparison operators. The `*I` variants are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    ContainsI,
    StartsWith,
    StartsWithI,
}

impl CompareOp {
    /// True for the operators a priority mask can encode.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            CompareOp::Eq
                | CompareOp::Ne
                | CompareOp::Lt
                | CompareOp::Le
                | CompareOp::Gt
                | CompareOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Expression node. Mutated in place only by the optimizer (array sort,
/// node replacement); read-only during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    String(String),
    /// Array literal; sorted in place by the optimizer for EQ/NE compares.
    Array(Vec<String>),
    /// Variable reference, resolved by name against the message context.
    Var(String),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Concat(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call(FuncCall),
}

/// A call to a built-in function. `state` is produced once at compile
/// time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    pub id: FuncId,
    pub args: Vec<Expr>,
    pub state: CompiledState,
}

impl FuncCall {
    pub fn new(id: FuncId, args: Vec<Expr>) -> Self {
        FuncCall {
            id,
            args,
            state: CompiledState::Pending,
        }
    }

    /// A ready-made priority filter call, as the optimizer emits them.
    pub fn prifilt(mask: PriMask) -> Self {
        FuncCall {
            id: FuncId::PriFilt,
            args: Vec::new(),
            state: CompiledState::Mask(mask),
        }
    }
}

impl Expr {
    /// True if this node is a compiled priority-filter call; used by the
    /// optimizer's NOT/AND/OR mask-fusion rules.
    pub fn prifilt_mask(&self) -> Option<&PriMask> {
        match self {
            Expr::Call(FuncCall {
                id: FuncId::PriFilt,
                state: CompiledState::Mask(mask),
                ..
            }) => Some(mask),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Number(_) | Expr::String(_) | Expr::Array(_))
    }
}

/// Index of a compiled ruleset inside a `Program`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RulesetHandle(pub usize);

/// Property-filter operations (the legacy `:property, op, "value"` form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropOp {
    Contains,
    IsEqual,
    StartsWith,
    Regex,
}

/// Statement node. Branches are ordered lists executed front to back.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Does nothing; stripped by the optimizer.
    Nop,
    /// Stop processing the current message.
    Stop,
    /// Invoke another ruleset by name; resolved at optimize time because
    /// forward references are legal.
    Call {
        target: String,
        resolved: Option<RulesetHandle>,
    },
    /// Ruleset name computed per message.
    CallIndirect(Expr),
    /// Submit the message to an output action.
    Action(Arc<dyn MessageAction>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    Foreach {
        var: String,
        collection: Expr,
        body: Vec<Stmt>,
    },
    Set {
        var: String,
        expr: Expr,
        force_reset: bool,
    },
    Unset {
        var: String,
    },
    PriFilter {
        mask: PriMask,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    PropFilter {
        prop: String,
        op: PropOp,
        negated: bool,
        value: String,
        /// Compiled once when `op` is `Regex`; `None` after a failed
        /// compile, which makes the filter never match.
        compiled: Option<regex::Regex>,
        then_branch: Vec<Stmt>,
    },
    ReloadLookupTable {
        table: String,
        stub_value: Option<String>,
        resolved: Option<Arc<dyn crate::host::LookupTable>>,
    },
}

// ---- builder helpers -------------------------------------------------
//
// External parsers and tests assemble trees through these; they keep the
// Box noise out of call sites.

pub fn num(n: i64) -> Expr {
    Expr::Number(n)
}

pub fn text(s: impl Into<String>) -> Expr {
    Expr::String(s.into())
}

pub fn array<I, S>(items: I) -> Expr
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Expr::Array(items.into_iter().map(Into::into).collect())
}

pub fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

pub fn call(id: FuncId, args: Vec<Expr>) -> Expr {
    Expr::Call(FuncCall::new(id, args))
}

impl Expr {
    pub fn compare(self, op: CompareOp, rhs: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Ne, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn contains(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::Contains, rhs)
    }

    pub fn startswith(self, rhs: Expr) -> Expr {
        self.compare(CompareOp::StartsWith, rhs)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn add(self, rhs: Expr) -> Expr {
        Expr::Arith {
            op: ArithOp::Add,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    pub fn concat(self, rhs: Expr) -> Expr {
        Expr::Concat(Box::new(self), Box::new(rhs))
    }
}
