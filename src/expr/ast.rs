//! Rule expression AST
//!
//! The parser (`crate::expr::parse`) turns rule text into this tree; every other
//! component works on the tree, never on the text:
//! - the compiler folds it into diagram-engine calls through [`ExprVisitor`]
//! - the conflict detector splits it into condition and action
//! - the priority manager scores its size

use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Numeric comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CmpOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }

    /// Short mnemonic used in derived variable names
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

/// Binary boolean operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BinaryOp {
    And,
    Or,
    Implies,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Implies => "->",
        }
    }
}

/// A rule expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(bool),
    Ident(String),
    Compare { var: String, op: CmpOp, value: f64 },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Post-order fold over an expression
///
/// Children are visited first; their results are handed to the parent's
/// callback.
pub trait ExprVisitor {
    type Output;

    fn constant(&mut self, value: bool) -> Result<Self::Output>;
    fn ident(&mut self, name: &str) -> Result<Self::Output>;
    fn compare(&mut self, var: &str, op: CmpOp, value: f64) -> Result<Self::Output>;
    fn not(&mut self, inner: Self::Output) -> Result<Self::Output>;
    fn binary(
        &mut self,
        op: BinaryOp,
        left: Self::Output,
        right: Self::Output,
    ) -> Result<Self::Output>;
}

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Ident(name.to_string())
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn implies(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Implies, left, right)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Fold the tree with a visitor
    pub fn accept<V: ExprVisitor>(&self, visitor: &mut V) -> Result<V::Output> {
        match self {
            Expr::Const(value) => visitor.constant(*value),
            Expr::Ident(name) => visitor.ident(name),
            Expr::Compare { var, op, value } => visitor.compare(var, *op, *value),
            Expr::Not(inner) => {
                let inner = inner.accept(visitor)?;
                visitor.not(inner)
            }
            Expr::Binary { op, left, right } => {
                let left = left.accept(visitor)?;
                let right = right.accept(visitor)?;
                visitor.binary(*op, left, right)
            }
        }
    }

    /// Pre-order walk over every node
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match self {
            Expr::Not(inner) => inner.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            _ => {}
        }
    }

    /// Every identifier referenced, including comparison operands
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |node| match node {
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Compare { var, .. } => {
                out.insert(var.clone());
            }
            _ => {}
        });
        out
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Number of boolean and comparison operators
    pub fn operator_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if matches!(
                node,
                Expr::Not(_) | Expr::Binary { .. } | Expr::Compare { .. }
            ) {
                count += 1;
            }
        });
        count
    }

    pub fn depth(&self) -> usize {
        match self {
            Expr::Not(inner) => 1 + inner.depth(),
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            _ => 1,
        }
    }

    /// Split at a top-level implication into (antecedent, consequent)
    pub fn split_implication(&self) -> Option<(&Expr, &Expr)> {
        match self {
            Expr::Binary {
                op: BinaryOp::Implies,
                left,
                right,
            } => Some((left, right)),
            _ => None,
        }
    }

    /// Negation with double negation removed
    pub fn negated(&self) -> Expr {
        match self {
            Expr::Not(inner) => (**inner).clone(),
            Expr::Const(value) => Expr::Const(!value),
            other => Expr::not(other.clone()),
        }
    }

    /// Literals of a conjunction of identifiers, `None` for anything else
    ///
    /// `a && !b` yields `[("a", true), ("b", false)]`.
    pub fn conjunctive_literals(&self) -> Option<Vec<(String, bool)>> {
        match self {
            Expr::Ident(name) => Some(vec![(name.clone(), true)]),
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Ident(name) => Some(vec![(name.clone(), false)]),
                Expr::Not(double) => double.conjunctive_literals(),
                _ => None,
            },
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut lits = left.conjunctive_literals()?;
                lits.extend(right.conjunctive_literals()?);
                Some(lits)
            }
            _ => None,
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Expr::Const(_) | Expr::Ident(_) | Expr::Compare { .. } | Expr::Not(_)
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{}", value),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Compare { var, op, value } => write!(f, "{} {} {}", var, op.symbol(), value),
            Expr::Not(inner) => {
                if inner.is_atomic() {
                    write!(f, "!{}", inner)
                } else {
                    write!(f, "!({})", inner)
                }
            }
            Expr::Binary { op, left, right } => {
                let wrap = |e: &Expr| {
                    if e.is_atomic() {
                        e.to_string()
                    } else {
                        format!("({})", e)
                    }
                };
                write!(f, "{} {} {}", wrap(left), op.symbol(), wrap(right))
            }
        }
    }
}
