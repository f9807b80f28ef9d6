//! Rule priority management
//!
//! Rules without a priority get one from their type's base, spaced by the
//! configured gap: validation rules first, then requires/excludes, then
//! pricing. Slots already held by explicit priorities or manual overrides
//! are skipped. Manual overrides always win and are flagged.
//!
//! Assignments are advisory; [`apply_priority_assignments`] writes them into
//! a new model version.

use crate::config::PriorityConfig;
use crate::error::{Error, Result};
use crate::expr::parse_expr;
use crate::model::{Model, Rule, RuleType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrioritySource {
    /// Taken from the rule as written
    Existing,
    /// Manual override from configuration
    Manual,
    /// Generated from the rule type's base
    Assigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriorityAssignment {
    pub rule_id: String,
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<i32>,
    pub priority: i32,
    pub source: PrioritySource,
    /// AST nodes plus operators; tie-breaker for execution order
    pub complexity: usize,
}

impl PriorityAssignment {
    pub fn is_manual(&self) -> bool {
        self.source == PrioritySource::Manual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriorityConflictKind {
    Duplicate,
    LargeGap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriorityConflict {
    pub kind: PriorityConflictKind,
    pub rule_ids: Vec<String>,
    pub priorities: Vec<i32>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorityAnalysis {
    pub model_id: String,
    pub assignments: Vec<PriorityAssignment>,
    pub conflicts: Vec<PriorityConflict>,
    /// Active rule IDs in execution order
    pub execution_order: Vec<String>,
}

impl std::fmt::Display for PriorityAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Priorities for '{}':", self.model_id)?;
        for a in &self.assignments {
            let marker = match a.source {
                PrioritySource::Existing => "",
                PrioritySource::Manual => " (manual)",
                PrioritySource::Assigned => " (assigned)",
            };
            writeln!(f, "  {:>6}  {} [{}]{}", a.priority, a.rule_id, a.rule_type, marker)?;
        }
        for c in &self.conflicts {
            writeln!(f, "  WARN {}", c.description)?;
        }
        writeln!(f, "Execution order: {}", self.execution_order.join(", "))
    }
}

fn base_for(rule_type: RuleType, config: &PriorityConfig) -> i32 {
    match rule_type {
        RuleType::Validation => config.validation_base,
        RuleType::Requires | RuleType::Excludes => config.constraint_base,
        RuleType::Pricing => config.pricing_base,
    }
}

/// Expression size of a rule; unparsable rules sort last
pub fn rule_complexity(rule: &Rule) -> usize {
    parse_expr(&rule.expression)
        .map(|e| e.node_count() + e.operator_count())
        .unwrap_or(usize::MAX)
}

/// Priorities for every rule of `model`, in declaration order
///
/// A non-positive `gap` is treated as 1.
pub fn assign_priorities(model: &Model, config: &PriorityConfig) -> Vec<PriorityAssignment> {
    let gap = config.gap.max(1);
    let mut taken: BTreeSet<i32> = model.rules.iter().filter_map(|r| r.priority).collect();
    taken.extend(config.manual_overrides.values().copied());
    let mut next_slot: HashMap<RuleType, i32> = HashMap::new();

    model
        .rules
        .iter()
        .map(|rule| {
            let (priority, source) = if let Some(p) = config.manual_overrides.get(&rule.id) {
                (*p, PrioritySource::Manual)
            } else if let Some(p) = rule.priority {
                (p, PrioritySource::Existing)
            } else {
                let slot = next_slot
                    .entry(rule.rule_type)
                    .or_insert_with(|| base_for(rule.rule_type, config));
                while taken.contains(slot) {
                    *slot += gap;
                }
                let p = *slot;
                taken.insert(p);
                *slot += gap;
                (p, PrioritySource::Assigned)
            };
            PriorityAssignment {
                rule_id: rule.id.clone(),
                rule_type: rule.rule_type,
                current: rule.priority,
                priority,
                source,
                complexity: rule_complexity(rule),
            }
        })
        .collect()
}

/// Duplicate priorities and unexplained gaps
pub fn detect_priority_conflicts(
    assignments: &[PriorityAssignment],
    config: &PriorityConfig,
) -> Vec<PriorityConflict> {
    let mut by_priority: BTreeMap<i32, Vec<&str>> = BTreeMap::new();
    for a in assignments {
        by_priority.entry(a.priority).or_default().push(&a.rule_id);
    }

    let mut out = Vec::new();
    for (priority, ids) in &by_priority {
        if ids.len() > 1 {
            out.push(PriorityConflict {
                kind: PriorityConflictKind::Duplicate,
                rule_ids: ids.iter().map(|s| s.to_string()).collect(),
                priorities: vec![*priority],
                description: format!("Rules {} share priority {}", ids.join(", "), priority),
            });
        }
    }

    let ordered: Vec<(&i32, &Vec<&str>)> = by_priority.iter().collect();
    for pair in ordered.windows(2) {
        let (lo, lo_ids) = pair[0];
        let (hi, hi_ids) = pair[1];
        if hi - lo > config.large_gap_threshold {
            out.push(PriorityConflict {
                kind: PriorityConflictKind::LargeGap,
                rule_ids: lo_ids.iter().chain(hi_ids.iter()).map(|s| s.to_string()).collect(),
                priorities: vec![*lo, *hi],
                description: format!("Gap of {} between priorities {} and {}", hi - lo, lo, hi),
            });
        }
    }
    out
}

/// Active rules ordered by (priority, complexity, id)
pub fn optimize_execution_order(model: &Model, assignments: &[PriorityAssignment]) -> Vec<String> {
    let active: BTreeSet<&str> = model
        .rules
        .iter()
        .filter(|r| r.active)
        .map(|r| r.id.as_str())
        .collect();
    let mut ordered: Vec<&PriorityAssignment> = assignments
        .iter()
        .filter(|a| active.contains(a.rule_id.as_str()))
        .collect();
    ordered.sort_by(|a, b| {
        (a.priority, a.complexity, &a.rule_id).cmp(&(b.priority, b.complexity, &b.rule_id))
    });
    ordered.into_iter().map(|a| a.rule_id.clone()).collect()
}

pub fn analyze_priorities(model: &Model, config: &PriorityConfig) -> PriorityAnalysis {
    let assignments = assign_priorities(model, config);
    let conflicts = detect_priority_conflicts(&assignments, config);
    let execution_order = optimize_execution_order(model, &assignments);
    PriorityAnalysis {
        model_id: model.id.clone(),
        assignments,
        conflicts,
        execution_order,
    }
}

/// New model version with the assignments written into its rules
pub fn apply_priority_assignments(model: &Model, assignments: &[PriorityAssignment]) -> Result<Model> {
    let mut updated = model.clone();
    for assignment in assignments {
        let rule = updated
            .rules
            .iter_mut()
            .find(|r| r.id == assignment.rule_id)
            .ok_or_else(|| Error::NotFound(format!("rule '{}'", assignment.rule_id)))?;
        rule.priority = Some(assignment.priority);
    }
    updated.version += 1;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ModelOption};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::builder("m", "M")
            .version(3)
            .group(Group::multi("g", "G", 0, 3))
            .option(ModelOption::new("a", "A", "g", 1.0))
            .option(ModelOption::new("b", "B", "g", 1.0))
            .option(ModelOption::new("c", "C", "g", 1.0))
            .rule(Rule::requires("R1", "a -> b && c"))
            .rule(Rule::excludes("X1", "a -> c"))
            .rule(Rule::validation("V1", "!c"))
            .rule(Rule::requires("R2", "b -> c").with_priority(200))
            .build()
            .unwrap()
    }

    fn priorities(analysis: &[PriorityAssignment]) -> Vec<(&str, i32)> {
        analysis.iter().map(|a| (a.rule_id.as_str(), a.priority)).collect()
    }

    #[test]
    fn test_assignment_skips_taken_slots() {
        let assignments = assign_priorities(&model(), &PriorityConfig::default());
        assert_eq!(
            priorities(&assignments),
            vec![("R1", 210), ("X1", 220), ("V1", 100), ("R2", 200)]
        );
        assert_eq!(assignments[3].source, PrioritySource::Existing);
    }

    #[test]
    fn test_non_positive_gap_still_assigns_unique_slots() {
        for gap in [0, -10] {
            let config = PriorityConfig {
                gap,
                ..PriorityConfig::default()
            };
            let assignments = assign_priorities(&model(), &config);
            assert_eq!(
                priorities(&assignments),
                vec![("R1", 201), ("X1", 202), ("V1", 100), ("R2", 200)]
            );
        }
    }

    #[test]
    fn test_manual_override_flagged() {
        let mut config = PriorityConfig::default();
        config.manual_overrides.insert("X1".into(), 5);
        let assignments = assign_priorities(&model(), &config);
        let x1 = assignments.iter().find(|a| a.rule_id == "X1").unwrap();
        assert_eq!(x1.priority, 5);
        assert!(x1.is_manual());
    }

    #[test]
    fn test_conflicts() {
        let mut config = PriorityConfig::default();
        config.manual_overrides.insert("X1".into(), 200);
        config.manual_overrides.insert("V1".into(), 900);
        let analysis = analyze_priorities(&model(), &config);
        let kinds: Vec<PriorityConflictKind> = analysis.conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![PriorityConflictKind::Duplicate, PriorityConflictKind::LargeGap]);
        assert_eq!(analysis.conflicts[0].rule_ids, vec!["X1", "R2"]);
    }

    #[test]
    fn test_execution_order_breaks_ties_by_complexity() {
        let mut config = PriorityConfig::default();
        config.manual_overrides.insert("R1".into(), 200);
        let analysis = analyze_priorities(&model(), &config);
        // R1 and R2 share 200; R2 is simpler
        assert_eq!(analysis.execution_order, vec!["V1", "R2", "R1", "X1"]);
    }

    #[test]
    fn test_apply_creates_new_version() {
        let model = model();
        let assignments = assign_priorities(&model, &PriorityConfig::default());
        let updated = apply_priority_assignments(&model, &assignments).unwrap();
        assert_eq!(updated.version, 4);
        assert_eq!(updated.rule("V1").unwrap().priority, Some(100));
        assert_eq!(model.rule("V1").unwrap().priority, None);

        let mut bogus = assignments.clone();
        bogus[0].rule_id = "nope".into();
        assert!(matches!(
            apply_priority_assignments(&model, &bogus),
            Err(Error::NotFound(_))
        ));
    }
}
