//! Conflict detection
//!
//! Static analysis of a model's rule set. Every active constraint rule is
//! split into a (condition, action) pair after excludes normalisation:
//! `A -> !B` has condition `A` and action `!B`.
//!
//! | Check | Severity |
//! |-------|----------|
//! | direct contradiction: overlapping conditions, opposite actions on one option | critical |
//! | circular dependency among requires rules | critical |
//! | impossible group cardinality | critical |
//! | duplicate rule (same normalised expression) | warning |
//! | unreachable option (no valid configuration contains it) | warning |
//!
//! Condition overlap is decided on the diagram: two conditions overlap when
//! their conjunction with the group constraints is satisfiable.

use crate::config::{CompilationPolicy, EngineConfig};
use crate::engine::ConstraintNetwork;
use crate::error::{Error, Result};
use crate::expr::{parse_rule, Expr};
use crate::model::{Model, RuleType};
use crate::registry::option_var;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DirectContradiction,
    CircularDependency,
    ImpossibleConstraint,
    DuplicateRule,
    UnreachableOption,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictType::DirectContradiction => "direct_contradiction",
            ConflictType::CircularDependency => "circular_dependency",
            ConflictType::ImpossibleConstraint => "impossible_constraint",
            ConflictType::DuplicateRule => "duplicate_rule",
            ConflictType::UnreachableOption => "unreachable_option",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Critical,
    Warning,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictSeverity::Critical => write!(f, "CRITICAL"),
            ConflictSeverity::Warning => write!(f, "WARN"),
        }
    }
}

/// One finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleConflict {
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    /// Implicated rule IDs (group or option IDs for structural findings)
    pub rule_ids: Vec<String>,
    pub description: String,
}

/// Result of analysing one model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConflictDetectionResult {
    pub model_id: String,
    pub rules_analyzed: usize,
    pub conflicts: Vec<RuleConflict>,
    pub recommendations: Vec<String>,
    /// Rules that could not be analysed because they do not compile
    pub skipped_rules: Vec<String>,
    pub analysis_time_us: u64,
}

impl ConflictDetectionResult {
    pub fn has_critical(&self) -> bool {
        self.critical_count() > 0
    }

    pub fn critical_count(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.severity == ConflictSeverity::Critical)
            .count()
    }

    pub fn of_type(&self, conflict_type: ConflictType) -> Vec<&RuleConflict> {
        self.conflicts
            .iter()
            .filter(|c| c.conflict_type == conflict_type)
            .collect()
    }
}

impl std::fmt::Display for ConflictDetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Model '{}': {} rules analysed, {} conflicts ({} critical)",
            self.model_id,
            self.rules_analyzed,
            self.conflicts.len(),
            self.critical_count()
        )?;
        for conflict in &self.conflicts {
            writeln!(
                f,
                "  [{}] {} ({}): {}",
                conflict.severity,
                conflict.conflict_type,
                conflict.rule_ids.join(", "),
                conflict.description
            )?;
        }
        if !self.skipped_rules.is_empty() {
            writeln!(f, "  skipped (does not compile): {}", self.skipped_rules.join(", "))?;
        }
        if !self.recommendations.is_empty() {
            writeln!(f, "Recommendations:")?;
            for rec in &self.recommendations {
                writeln!(f, "  - {}", rec)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Detection
// ============================================================================

struct RuleShape {
    id: String,
    rule_type: RuleType,
    normalised: Expr,
    condition: Option<Expr>,
    /// `(option, must_be_selected)`; empty when the action is not a conjunction
    action: Vec<(String, bool)>,
}

pub struct ConflictDetector {
    config: EngineConfig,
}

impl ConflictDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn detect(&self, model: &Model) -> Result<ConflictDetectionResult> {
        let started = Instant::now();
        let mut conflicts = Vec::new();

        let impossible = impossible_groups(model);
        let structurally_broken = !impossible.is_empty();
        conflicts.extend(impossible);

        let (shapes, skipped) = self.shapes(model)?;
        conflicts.extend(duplicates(&shapes));
        conflicts.extend(cycles(&shapes));

        if !structurally_broken {
            let network = ConstraintNetwork::build(Arc::new(model.clone()), &self.config)?;
            conflicts.extend(contradictions(&network, &shapes)?);
            conflicts.extend(unreachable_options(&network)?);
        }

        conflicts.sort_by(|a, b| {
            (a.severity != ConflictSeverity::Critical, a.conflict_type)
                .cmp(&(b.severity != ConflictSeverity::Critical, b.conflict_type))
        });
        let recommendations = recommendations(&conflicts);

        let result = ConflictDetectionResult {
            model_id: model.id.clone(),
            rules_analyzed: shapes.len(),
            conflicts,
            recommendations,
            skipped_rules: skipped,
            analysis_time_us: started.elapsed().as_micros() as u64,
        };
        debug!(
            model = %model.id,
            conflicts = result.conflicts.len(),
            elapsed_us = result.analysis_time_us,
            "Conflict detection finished"
        );
        Ok(result)
    }

    fn shapes(&self, model: &Model) -> Result<(Vec<RuleShape>, Vec<String>)> {
        let mut shapes = Vec::new();
        let mut skipped = Vec::new();
        for rule in model.constraint_rules() {
            let normalised = match parse_rule(rule) {
                Ok(expr) => expr,
                Err(e) if self.config.compilation_policy == CompilationPolicy::Strict => {
                    return Err(Error::Compilation {
                        rule: rule.id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "Rule skipped by conflict detection");
                    skipped.push(rule.id.clone());
                    continue;
                }
            };
            let (condition, action) = match normalised.split_implication() {
                Some((lhs, rhs)) => (
                    Some(lhs.clone()),
                    rhs.conjunctive_literals().unwrap_or_default(),
                ),
                None => (None, Vec::new()),
            };
            let action = action
                .into_iter()
                .filter(|(id, _)| model.option(id).is_some())
                .collect();
            shapes.push(RuleShape {
                id: rule.id.clone(),
                rule_type: rule.rule_type,
                normalised,
                condition,
                action,
            });
        }
        Ok((shapes, skipped))
    }
}

fn impossible_groups(model: &Model) -> Vec<RuleConflict> {
    let mut out = Vec::new();
    for group in &model.groups {
        let active = model.active_options_in_group(&group.id).len() as u32;
        let reason = if group.min_selections > group.max_selections {
            Some(format!(
                "minimum {} exceeds maximum {}",
                group.min_selections, group.max_selections
            ))
        } else if group.min_selections > active {
            Some(format!(
                "minimum {} exceeds its {} active option(s)",
                group.min_selections, active
            ))
        } else {
            None
        };
        if let Some(reason) = reason {
            out.push(RuleConflict {
                conflict_type: ConflictType::ImpossibleConstraint,
                severity: ConflictSeverity::Critical,
                rule_ids: vec![group.id.clone()],
                description: format!("Group '{}' can never be satisfied: {}", group.name, reason),
            });
        }
    }
    out
}

fn duplicates(shapes: &[RuleShape]) -> Vec<RuleConflict> {
    let mut by_text: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for shape in shapes {
        by_text
            .entry(shape.normalised.to_string())
            .or_default()
            .push(&shape.id);
    }
    by_text
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(text, ids)| RuleConflict {
            conflict_type: ConflictType::DuplicateRule,
            severity: ConflictSeverity::Warning,
            rule_ids: ids.iter().map(|s| s.to_string()).collect(),
            description: format!("Rules {} all enforce '{}'", ids.join(", "), text),
        })
        .collect()
}

/// Cycles in the requires graph, one finding per strongly connected component
fn cycles(shapes: &[RuleShape]) -> Vec<RuleConflict> {
    // option -> [(option, rule)]
    let mut edges: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for shape in shapes.iter().filter(|s| s.rule_type == RuleType::Requires) {
        let Some(condition) = &shape.condition else {
            continue;
        };
        for from in condition.identifiers() {
            for (to, positive) in &shape.action {
                if *positive {
                    edges
                        .entry(from.clone())
                        .or_default()
                        .push((to.clone(), shape.id.clone()));
                }
            }
        }
    }

    let components = strongly_connected(&edges);
    let mut out = Vec::new();
    for component in components {
        let members: BTreeSet<&String> = component.iter().collect();
        let mut rules = BTreeSet::new();
        for from in &component {
            for (to, rule) in edges.get(from).into_iter().flatten() {
                if members.contains(to) {
                    rules.insert(rule.clone());
                }
            }
        }
        let self_loop = component.len() == 1 && !rules.is_empty();
        if component.len() > 1 || self_loop {
            let path: Vec<&str> = component.iter().map(String::as_str).collect();
            out.push(RuleConflict {
                conflict_type: ConflictType::CircularDependency,
                severity: ConflictSeverity::Critical,
                rule_ids: rules.into_iter().collect(),
                description: format!("Circular requires chain between {}", path.join(" -> ")),
            });
        }
    }
    out
}

/// Tarjan's algorithm over string nodes; components come out sorted
fn strongly_connected(edges: &BTreeMap<String, Vec<(String, String)>>) -> Vec<Vec<String>> {
    struct State<'a> {
        edges: &'a BTreeMap<String, Vec<(String, String)>>,
        index: HashMap<&'a str, usize>,
        low: HashMap<&'a str, usize>,
        on_stack: BTreeSet<&'a str>,
        stack: Vec<&'a str>,
        next: usize,
        out: Vec<Vec<String>>,
    }

    fn visit<'a>(state: &mut State<'a>, node: &'a str) {
        state.index.insert(node, state.next);
        state.low.insert(node, state.next);
        state.next += 1;
        state.stack.push(node);
        state.on_stack.insert(node);

        let edges = state.edges;
        if let Some(targets) = edges.get(node) {
            for (to, _) in targets {
                let to = to.as_str();
                if !state.index.contains_key(to) {
                    visit(state, to);
                    let low = state.low[node].min(state.low[to]);
                    state.low.insert(node, low);
                } else if state.on_stack.contains(to) {
                    let low = state.low[node].min(state.index[to]);
                    state.low.insert(node, low);
                }
            }
        }

        if state.low[node] == state.index[node] {
            let mut component = Vec::new();
            while let Some(top) = state.stack.pop() {
                state.on_stack.remove(top);
                component.push(top.to_string());
                if top == node {
                    break;
                }
            }
            component.sort();
            state.out.push(component);
        }
    }

    let mut state = State {
        edges,
        index: HashMap::new(),
        low: HashMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        next: 0,
        out: Vec::new(),
    };
    for node in edges.keys() {
        if !state.index.contains_key(node.as_str()) {
            visit(&mut state, node);
        }
    }
    let mut out = state.out;
    out.sort();
    out
}

fn contradictions(network: &ConstraintNetwork, shapes: &[RuleShape]) -> Result<Vec<RuleConflict>> {
    let compiler = network.compiler();
    let mut conditions = HashMap::new();
    for shape in shapes {
        if let (Some(condition), false) = (&shape.condition, shape.action.is_empty()) {
            let id = format!("{}:condition", shape.id);
            match compiler.compile_condition(&id, &condition.to_string()) {
                Ok(compiled) => {
                    conditions.insert(shape.id.as_str(), compiled.handle);
                }
                Err(e) => debug!(rule = %shape.id, error = %e, "Condition not comparable"),
            }
        }
    }

    let groups: Vec<_> = network.group_constraints().iter().map(|g| g.handle).collect();
    let mut bdd = compiler.bdd().write()?;
    let structure = bdd.and_all(groups);

    let mut out = Vec::new();
    for (i, a) in shapes.iter().enumerate() {
        let Some(&cond_a) = conditions.get(a.id.as_str()) else {
            continue;
        };
        for b in &shapes[i + 1..] {
            let Some(&cond_b) = conditions.get(b.id.as_str()) else {
                continue;
            };
            let clash: Vec<&str> = a
                .action
                .iter()
                .filter(|(id, pol)| b.action.iter().any(|(other, p)| other == id && p != pol))
                .map(|(id, _)| id.as_str())
                .collect();
            if clash.is_empty() {
                continue;
            }
            let both = bdd.and(cond_a, cond_b);
            let overlap = bdd.and(both, structure);
            if !bdd.is_satisfiable(overlap) {
                continue;
            }
            out.push(RuleConflict {
                conflict_type: ConflictType::DirectContradiction,
                severity: ConflictSeverity::Critical,
                rule_ids: vec![a.id.clone(), b.id.clone()],
                description: format!(
                    "Rules '{}' and '{}' demand opposite selections of {} when both conditions hold",
                    a.id,
                    b.id,
                    clash.join(", ")
                ),
            });
        }
    }
    Ok(out)
}

fn unreachable_options(network: &ConstraintNetwork) -> Result<Vec<RuleConflict>> {
    if !network.is_satisfiable() {
        return Ok(vec![RuleConflict {
            conflict_type: ConflictType::ImpossibleConstraint,
            severity: ConflictSeverity::Critical,
            rule_ids: network.rules().iter().map(|r| r.rule_id.clone()).collect(),
            description: "No selection set satisfies every rule and group constraint".into(),
        }]);
    }

    let model = network.model();
    let registry = network.compiler().registry().read()?;
    let mut out = Vec::new();
    for option in model.options.iter().filter(|o| o.active) {
        let Some(index) = registry.index_of(&option_var(&option.id)) else {
            continue;
        };
        let fixed = HashMap::from([(index, true)]);
        if !network.satisfiable_with(network.unified(), &fixed)? {
            out.push(RuleConflict {
                conflict_type: ConflictType::UnreachableOption,
                severity: ConflictSeverity::Warning,
                rule_ids: vec![option.id.clone()],
                description: format!("Option '{}' cannot appear in any valid configuration", option.name),
            });
        }
    }
    Ok(out)
}

fn recommendations(conflicts: &[RuleConflict]) -> Vec<String> {
    let mut counts: BTreeMap<ConflictType, usize> = BTreeMap::new();
    for conflict in conflicts {
        *counts.entry(conflict.conflict_type).or_default() += 1;
    }
    if counts.is_empty() {
        return vec!["No conflicts detected; the rule set is consistent".into()];
    }
    counts
        .into_iter()
        .map(|(kind, n)| match kind {
            ConflictType::DirectContradiction => format!(
                "Resolve {} direct contradiction(s): make the conditions mutually exclusive or remove one of each pair",
                n
            ),
            ConflictType::CircularDependency => format!(
                "Break {} circular requires chain(s); options in a cycle can only be selected together",
                n
            ),
            ConflictType::ImpossibleConstraint => format!(
                "Fix {} impossible constraint(s) by adjusting group cardinality or rules",
                n
            ),
            ConflictType::DuplicateRule => {
                format!("Remove {} set(s) of duplicate rules", n)
            }
            ConflictType::UnreachableOption => format!(
                "Review {} option(s) that no valid configuration can contain",
                n
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ModelOption, Rule};
    use pretty_assertions::assert_eq;

    fn model(rules: Vec<Rule>) -> Model {
        let mut builder = Model::builder("m", "M")
            .group(Group::multi("g", "G", 0, 4))
            .option(ModelOption::new("a", "A", "g", 1.0))
            .option(ModelOption::new("b", "B", "g", 1.0))
            .option(ModelOption::new("c", "C", "g", 1.0))
            .option(ModelOption::new("d", "D", "g", 1.0));
        for rule in rules {
            builder = builder.rule(rule);
        }
        builder.build().unwrap()
    }

    fn detect(rules: Vec<Rule>) -> ConflictDetectionResult {
        ConflictDetector::new(&EngineConfig::default())
            .detect(&model(rules))
            .unwrap()
    }

    #[test]
    fn test_clean_model() {
        let result = detect(vec![Rule::requires("R1", "a -> b")]);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.recommendations[0].starts_with("No conflicts"));
    }

    #[test]
    fn test_direct_contradiction() {
        let result = detect(vec![
            Rule::requires("R1", "a -> b"),
            Rule::excludes("X1", "a -> b"),
        ]);
        let found = result.of_type(ConflictType::DirectContradiction);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule_ids, vec!["R1", "X1"]);
        assert_eq!(found[0].severity, ConflictSeverity::Critical);
        // 'a' can no longer be selected at all
        assert_eq!(result.of_type(ConflictType::UnreachableOption).len(), 1);
    }

    #[test]
    fn test_disjoint_conditions_do_not_contradict() {
        let result = detect(vec![
            Rule::requires("R1", "a && c -> b"),
            Rule::requires("R2", "a && !c -> !b"),
        ]);
        assert!(result.of_type(ConflictType::DirectContradiction).is_empty());
    }

    #[test]
    fn test_circular_dependency() {
        let result = detect(vec![
            Rule::requires("R1", "a -> b"),
            Rule::requires("R2", "b -> c"),
            Rule::requires("R3", "c -> a"),
            Rule::requires("R4", "c -> d"),
        ]);
        let cycles = result.of_type(ConflictType::CircularDependency);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].rule_ids, vec!["R1", "R2", "R3"]);
    }

    #[test]
    fn test_duplicates() {
        let result = detect(vec![
            Rule::excludes("X1", "a -> b"),
            Rule::excludes("X2", "a -> !b"),
        ]);
        let dups = result.of_type(ConflictType::DuplicateRule);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].rule_ids, vec!["X1", "X2"]);
    }

    #[test]
    fn test_impossible_group() {
        let model = Model::builder("m", "M")
            .group(Group::multi("g", "G", 2, 3))
            .option(ModelOption::new("a", "A", "g", 1.0))
            .option(ModelOption::new("b", "B", "g", 1.0).inactive())
            .build()
            .unwrap();
        let result = ConflictDetector::new(&EngineConfig::default())
            .detect(&model)
            .unwrap();
        assert_eq!(result.critical_count(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::ImpossibleConstraint);
    }

    #[test]
    fn test_uncompilable_rule_follows_policy() {
        let rules = vec![Rule::requires("R1", "a -> b"), Rule::requires("BAD", "a ->")];
        let result = detect(rules.clone());
        assert_eq!(result.skipped_rules, vec!["BAD"]);

        let strict = EngineConfig {
            compilation_policy: CompilationPolicy::Strict,
            ..Default::default()
        };
        assert!(ConflictDetector::new(&strict).detect(&model(rules)).is_err());
    }
}
