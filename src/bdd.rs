//! Reduced ordered binary decision diagrams
//!
//! The diagram engine behind compiled rules. A [`Bdd`] manager owns every
//! node; functions are referred to by [`NodeId`] handles that stay valid for
//! the manager's lifetime.
//!
//! - variables are plain indices, ordered by index (lower index nearer the root)
//! - nodes are hash-consed through a unique table, so equal functions share a handle
//! - AND/OR results are memoised in an apply cache
//! - evaluation treats unassigned variables as false
//!
//! ```
//! use cpq_engine::bdd::Bdd;
//!
//! let mut bdd = Bdd::new();
//! let a = bdd.var(0);
//! let b = bdd.var(1);
//! let rule = bdd.implies(a, b);
//! assert!(bdd.eval(rule, &[true, true]).unwrap());
//! assert!(!bdd.eval(rule, &[true, false]).unwrap());
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Handle to a function owned by a [`Bdd`] manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub const FALSE: NodeId = NodeId(0);
    pub const TRUE: NodeId = NodeId(1);

    pub fn is_const(&self) -> bool {
        self.0 < 2
    }
}

const TERMINAL_VAR: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    var: u32,
    low: NodeId,
    high: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    And,
    Or,
}

/// Decision diagram manager
#[derive(Debug, Clone)]
pub struct Bdd {
    nodes: Vec<Node>,
    unique: HashMap<(u32, NodeId, NodeId), NodeId>,
    apply_cache: HashMap<(Op, NodeId, NodeId), NodeId>,
    not_cache: HashMap<NodeId, NodeId>,
}

impl Default for Bdd {
    fn default() -> Self {
        Self::new()
    }
}

impl Bdd {
    pub fn new() -> Self {
        let terminal = |_| Node {
            var: TERMINAL_VAR,
            low: NodeId::FALSE,
            high: NodeId::FALSE,
        };
        Self {
            nodes: (0..2).map(terminal).collect(),
            unique: HashMap::new(),
            apply_cache: HashMap::new(),
            not_cache: HashMap::new(),
        }
    }

    pub fn constant(&self, value: bool) -> NodeId {
        if value {
            NodeId::TRUE
        } else {
            NodeId::FALSE
        }
    }

    /// Function that is true exactly when variable `index` is true
    pub fn var(&mut self, index: u32) -> NodeId {
        self.mk(index, NodeId::FALSE, NodeId::TRUE)
    }

    pub fn not(&mut self, node: NodeId) -> NodeId {
        match node {
            NodeId::FALSE => return NodeId::TRUE,
            NodeId::TRUE => return NodeId::FALSE,
            _ => {}
        }
        if let Some(&cached) = self.not_cache.get(&node) {
            return cached;
        }
        let Node { var, low, high } = self.nodes[node.0 as usize];
        let low = self.not(low);
        let high = self.not(high);
        let result = self.mk(var, low, high);
        self.not_cache.insert(node, result);
        result
    }

    pub fn and(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.apply(Op::And, a, b)
    }

    pub fn or(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.apply(Op::Or, a, b)
    }

    /// `a -> b`, built as `!a || b`
    pub fn implies(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let not_a = self.not(a);
        self.or(not_a, b)
    }

    pub fn and_all<I: IntoIterator<Item = NodeId>>(&mut self, nodes: I) -> NodeId {
        nodes
            .into_iter()
            .fold(NodeId::TRUE, |acc, node| self.and(acc, node))
    }

    pub fn or_all<I: IntoIterator<Item = NodeId>>(&mut self, nodes: I) -> NodeId {
        nodes
            .into_iter()
            .fold(NodeId::FALSE, |acc, node| self.or(acc, node))
    }

    /// True when at least `k` of `vars` are true
    pub fn at_least(&mut self, vars: &[u32], k: usize) -> NodeId {
        self.cardinality(vars, |count| count >= k, k)
    }

    /// True when at most `k` of `vars` are true
    pub fn at_most(&mut self, vars: &[u32], k: usize) -> NodeId {
        self.cardinality(vars, |count| count <= k, k + 1)
    }

    /// Evaluate a function; variables beyond `assignment` are false
    pub fn eval(&self, node: NodeId, assignment: &[bool]) -> Result<bool> {
        self.check(node)?;
        let mut current = node;
        while !current.is_const() {
            let Node { var, low, high } = self.nodes[current.0 as usize];
            let value = assignment.get(var as usize).copied().unwrap_or(false);
            current = if value { high } else { low };
        }
        Ok(current == NodeId::TRUE)
    }

    /// Whether some assignment extending `fixed` satisfies the function
    pub fn satisfiable_with(&self, node: NodeId, fixed: &HashMap<u32, bool>) -> Result<bool> {
        self.check(node)?;
        let mut memo = HashMap::new();
        Ok(self.sat_rec(node, fixed, &mut memo))
    }

    pub fn is_satisfiable(&self, node: NodeId) -> bool {
        node != NodeId::FALSE
    }

    pub fn is_tautology(&self, node: NodeId) -> bool {
        node == NodeId::TRUE
    }

    /// Internal nodes reachable from `node`
    pub fn node_count(&self, node: NodeId) -> usize {
        let mut seen = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.is_const() || (current.0 as usize) >= self.nodes.len() {
                continue;
            }
            if seen.insert(current) {
                let Node { low, high, .. } = self.nodes[current.0 as usize];
                stack.push(low);
                stack.push(high);
            }
        }
        seen.len()
    }

    /// Variable indices the function depends on
    pub fn support(&self, node: NodeId) -> BTreeSet<u32> {
        let mut vars = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.is_const() || !seen.insert(current) {
                continue;
            }
            let Node { var, low, high } = self.nodes[current.0 as usize];
            vars.insert(var);
            stack.push(low);
            stack.push(high);
        }
        vars
    }

    /// Total nodes held by the manager, terminals included
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check(&self, node: NodeId) -> Result<()> {
        if (node.0 as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(Error::Evaluation(format!(
                "node {} does not belong to this diagram",
                node.0
            )))
        }
    }

    fn mk(&mut self, var: u32, low: NodeId, high: NodeId) -> NodeId {
        if low == high {
            return low;
        }
        if let Some(&existing) = self.unique.get(&(var, low, high)) {
            return existing;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { var, low, high });
        self.unique.insert((var, low, high), id);
        id
    }

    fn apply(&mut self, op: Op, a: NodeId, b: NodeId) -> NodeId {
        match (op, a, b) {
            (Op::And, NodeId::FALSE, _) | (Op::And, _, NodeId::FALSE) => return NodeId::FALSE,
            (Op::And, NodeId::TRUE, x) | (Op::And, x, NodeId::TRUE) => return x,
            (Op::Or, NodeId::TRUE, _) | (Op::Or, _, NodeId::TRUE) => return NodeId::TRUE,
            (Op::Or, NodeId::FALSE, x) | (Op::Or, x, NodeId::FALSE) => return x,
            _ => {}
        }
        if a == b {
            return a;
        }
        // Both operators are commutative
        let key = if a <= b { (op, a, b) } else { (op, b, a) };
        if let Some(&cached) = self.apply_cache.get(&key) {
            return cached;
        }

        let na = self.nodes[a.0 as usize];
        let nb = self.nodes[b.0 as usize];
        let var = na.var.min(nb.var);
        let (a_low, a_high) = if na.var == var { (na.low, na.high) } else { (a, a) };
        let (b_low, b_high) = if nb.var == var { (nb.low, nb.high) } else { (b, b) };

        let low = self.apply(op, a_low, b_low);
        let high = self.apply(op, a_high, b_high);
        let result = self.mk(var, low, high);
        self.apply_cache.insert(key, result);
        result
    }

    /// Threshold function over `vars`; counts are saturated at `cap`
    fn cardinality<F: Fn(usize) -> bool>(&mut self, vars: &[u32], accept: F, cap: usize) -> NodeId {
        let ordered: Vec<u32> = vars.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut memo: HashMap<(usize, usize), NodeId> = HashMap::new();
        self.cardinality_rec(&ordered, 0, 0, &accept, cap, &mut memo)
    }

    fn cardinality_rec<F: Fn(usize) -> bool>(
        &mut self,
        vars: &[u32],
        position: usize,
        count: usize,
        accept: &F,
        cap: usize,
        memo: &mut HashMap<(usize, usize), NodeId>,
    ) -> NodeId {
        if position == vars.len() {
            return self.constant(accept(count));
        }
        if let Some(&cached) = memo.get(&(position, count)) {
            return cached;
        }
        let low = self.cardinality_rec(vars, position + 1, count, accept, cap, memo);
        let high = self.cardinality_rec(vars, position + 1, (count + 1).min(cap), accept, cap, memo);
        let result = self.mk(vars[position], low, high);
        memo.insert((position, count), result);
        result
    }

    fn sat_rec(
        &self,
        node: NodeId,
        fixed: &HashMap<u32, bool>,
        memo: &mut HashMap<NodeId, bool>,
    ) -> bool {
        match node {
            NodeId::FALSE => return false,
            NodeId::TRUE => return true,
            _ => {}
        }
        if let Some(&cached) = memo.get(&node) {
            return cached;
        }
        let Node { var, low, high } = self.nodes[node.0 as usize];
        let result = match fixed.get(&var) {
            Some(true) => self.sat_rec(high, fixed, memo),
            Some(false) => self.sat_rec(low, fixed, memo),
            None => self.sat_rec(low, fixed, memo) || self.sat_rec(high, fixed, memo),
        };
        memo.insert(node, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(values: &[(u32, bool)]) -> Vec<bool> {
        let len = values.iter().map(|(v, _)| *v as usize + 1).max().unwrap_or(0);
        let mut out = vec![false; len];
        for (var, value) in values {
            out[*var as usize] = *value;
        }
        out
    }

    #[test]
    fn test_hash_consing_shares_nodes() {
        let mut bdd = Bdd::new();
        let a = bdd.var(0);
        let b = bdd.var(1);
        let ab = bdd.and(a, b);
        let ba = bdd.and(b, a);
        assert_eq!(ab, ba);
        assert_eq!(bdd.var(0), a);
    }

    #[test]
    fn test_implication_truth_table() {
        let mut bdd = Bdd::new();
        let a = bdd.var(0);
        let b = bdd.var(1);
        let f = bdd.implies(a, b);
        assert!(bdd.eval(f, &assignment(&[(0, false), (1, false)])).unwrap());
        assert!(bdd.eval(f, &assignment(&[(0, false), (1, true)])).unwrap());
        assert!(!bdd.eval(f, &assignment(&[(0, true), (1, false)])).unwrap());
        assert!(bdd.eval(f, &assignment(&[(0, true), (1, true)])).unwrap());
    }

    #[test]
    fn test_double_negation_is_identity() {
        let mut bdd = Bdd::new();
        let a = bdd.var(3);
        let na = bdd.not(a);
        assert_eq!(bdd.not(na), a);
    }

    #[test]
    fn test_contradiction_and_tautology() {
        let mut bdd = Bdd::new();
        let a = bdd.var(0);
        let na = bdd.not(a);
        let contradiction = bdd.and(a, na);
        let tautology = bdd.or(a, na);
        assert!(!bdd.is_satisfiable(contradiction));
        assert!(bdd.is_tautology(tautology));
    }

    #[test]
    fn test_cardinality_constraints() {
        let mut bdd = Bdd::new();
        let vars = [0, 1, 2];
        let exactly_one = {
            let lo = bdd.at_least(&vars, 1);
            let hi = bdd.at_most(&vars, 1);
            bdd.and(lo, hi)
        };
        assert!(!bdd.eval(exactly_one, &[false, false, false]).unwrap());
        assert!(bdd.eval(exactly_one, &[false, true, false]).unwrap());
        assert!(!bdd.eval(exactly_one, &[true, true, false]).unwrap());
        let none_needed = bdd.at_least(&vars, 0);
        assert!(bdd.is_tautology(none_needed));
        let impossible = bdd.at_least(&vars, 4);
        assert!(!bdd.is_satisfiable(impossible));
    }

    #[test]
    fn test_satisfiable_with_partial_assignment() {
        let mut bdd = Bdd::new();
        let a = bdd.var(0);
        let b = bdd.var(1);
        let nb = bdd.not(b);
        let f = bdd.implies(a, nb);

        let mut fixed = HashMap::new();
        fixed.insert(0, true);
        assert!(bdd.satisfiable_with(f, &fixed).unwrap());
        fixed.insert(1, true);
        assert!(!bdd.satisfiable_with(f, &fixed).unwrap());
    }

    #[test]
    fn test_unknown_node_is_an_error() {
        let bdd = Bdd::new();
        assert!(matches!(
            bdd.eval(NodeId(99), &[]),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_node_count_and_support() {
        let mut bdd = Bdd::new();
        let a = bdd.var(0);
        let c = bdd.var(2);
        let f = bdd.or(a, c);
        assert_eq!(bdd.node_count(f), 2);
        assert_eq!(bdd.support(f).into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(bdd.node_count(NodeId::TRUE), 0);
    }
}
