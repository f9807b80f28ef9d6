//! Rule expressions
//!
//! - `ast` - expression tree and post-order visitor
//! - `parse` - text to tree
//!
//! Rule text is parsed exactly once per compilation; everything downstream
//! works on [`Expr`].

pub mod ast;
pub mod parse;

pub use ast::{BinaryOp, CmpOp, Expr, ExprVisitor};
pub use parse::{is_valid_expr, parse_expr};

use crate::error::Result;
use crate::model::{Rule, RuleType};

/// Expression a rule actually enforces
///
/// Excludes rules are written from the forbidden side:
/// - `A -> B` means "A excludes B" and enforces `A -> !B`
/// - `A -> !B` is already in enforced form and is kept
/// - an expression without implication names the forbidden combination and
///   enforces its negation
///
/// Every other rule type is returned unchanged.
pub fn normalize_rule_expr(rule_type: RuleType, expr: Expr) -> Expr {
    if rule_type != RuleType::Excludes {
        return expr;
    }
    match expr {
        Expr::Binary {
            op: BinaryOp::Implies,
            left,
            right,
        } => {
            let consequent = match *right {
                Expr::Not(_) => *right,
                other => Expr::not(other),
            };
            Expr::implies(*left, consequent)
        }
        other => other.negated(),
    }
}

/// Parse and normalise a rule's expression
pub fn parse_rule(rule: &Rule) -> Result<Expr> {
    let expr = parse_expr(&rule.expression)?;
    Ok(normalize_rule_expr(rule.rule_type, expr))
}
