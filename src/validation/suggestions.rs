//! Remedies for violations
//!
//! Group violations get a count-based suggestion. Rule violations are tried
//! one referenced option at a time: the option's value is flipped and the
//! single failing rule is re-evaluated, never the whole network, so the cost
//! stays linear in rule size. Additions are offered before removals.

use super::{RuleViolation, ViolationKind};
use crate::engine::{Assignment, ConstraintNetwork};
use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionAction {
    Add,
    Remove,
    SelectFromGroup,
    RemoveFromGroup,
    Review,
}

/// A proposed change to the selections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Suggestion {
    pub action: SuggestionAction,
    /// Violation this suggestion addresses
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub message: String,
}

/// Suggestions for `violations`, deduplicated and capped at `max`
pub fn suggest(
    network: &ConstraintNetwork,
    assignment: &Assignment,
    violations: &[RuleViolation],
    max: usize,
) -> Result<Vec<Suggestion>> {
    let mut out = Vec::new();
    for violation in violations {
        match violation.kind {
            ViolationKind::GroupMinimum | ViolationKind::GroupMaximum => {
                out.extend(group_suggestion(network, assignment, violation));
            }
            ViolationKind::Rule => {
                out.extend(rule_suggestions(network, assignment, violation)?);
            }
        }
    }

    let mut seen = HashSet::new();
    out.retain(|s| seen.insert(s.message.clone()));
    out.truncate(max);
    Ok(out)
}

fn group_suggestion(
    network: &ConstraintNetwork,
    assignment: &Assignment,
    violation: &RuleViolation,
) -> Option<Suggestion> {
    let constraint = network
        .group_constraints()
        .iter()
        .find(|c| c.id == violation.rule_id)?;
    let selected = constraint
        .options
        .iter()
        .filter(|id| assignment.selected().contains(*id))
        .count() as u32;

    let (action, message) = match violation.kind {
        ViolationKind::GroupMinimum => {
            let missing = constraint.limit.saturating_sub(selected);
            let message = if constraint.limit == 1 {
                format!("Select one option from group '{}'", constraint.group_name)
            } else {
                format!(
                    "Select at least {} more option(s) from group '{}'",
                    missing, constraint.group_name
                )
            };
            (SuggestionAction::SelectFromGroup, message)
        }
        _ => (
            SuggestionAction::RemoveFromGroup,
            format!(
                "Remove {} option(s) from group '{}'",
                selected.saturating_sub(constraint.limit),
                constraint.group_name
            ),
        ),
    };

    Some(Suggestion {
        action,
        rule_id: violation.rule_id.clone(),
        option_id: None,
        group_id: Some(constraint.group_id.clone()),
        message,
    })
}

fn rule_suggestions(
    network: &ConstraintNetwork,
    assignment: &Assignment,
    violation: &RuleViolation,
) -> Result<Vec<Suggestion>> {
    let Some(compiled) = network
        .rules()
        .iter()
        .find(|r| r.rule_id == violation.rule_id)
    else {
        return Ok(Vec::new());
    };
    let model = network.model();

    let mut adds = Vec::new();
    let mut removes = Vec::new();
    for option_id in &violation.affected_options {
        let index = network.option_index(option_id)?;
        let selected = assignment.value(index);
        let flipped = assignment.with(index, !selected);
        if !network.eval(compiled.handle, &flipped)? {
            continue;
        }
        let name = model
            .option(option_id)
            .map(|o| o.name.as_str())
            .unwrap_or(option_id.as_str());
        let (action, verb, bucket) = if selected {
            (SuggestionAction::Remove, "Remove", &mut removes)
        } else {
            (SuggestionAction::Add, "Add", &mut adds)
        };
        bucket.push(Suggestion {
            action,
            rule_id: violation.rule_id.clone(),
            option_id: Some(option_id.clone()),
            group_id: None,
            message: format!("{} '{}' to satisfy '{}'", verb, name, violation.rule_name),
        });
    }

    adds.append(&mut removes);
    if adds.is_empty() {
        adds.push(Suggestion {
            action: SuggestionAction::Review,
            rule_id: violation.rule_id.clone(),
            option_id: None,
            group_id: None,
            message: format!(
                "Review the selections involved in '{}'",
                violation.rule_name
            ),
        });
    }
    Ok(adds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{Group, Model, ModelOption, Rule, Selection};
    use crate::validation::ValidationEngine;
    use std::sync::Arc;

    fn network(rules: Vec<Rule>) -> Arc<ConstraintNetwork> {
        let mut builder = Model::builder("m", "M")
            .group(Group::multi("g", "Parts", 0, 4))
            .option(ModelOption::new("a", "Alpha", "g", 1.0))
            .option(ModelOption::new("b", "Beta", "g", 1.0))
            .option(ModelOption::new("c", "Gamma", "g", 1.0));
        for rule in rules {
            builder = builder.rule(rule);
        }
        Arc::new(ConstraintNetwork::build(Arc::new(builder.build().unwrap()), &EngineConfig::default()).unwrap())
    }

    fn suggestions_for(network: &Arc<ConstraintNetwork>, selections: &[Selection], max: usize) -> Vec<Suggestion> {
        let engine = ValidationEngine::new(network.clone(), &EngineConfig::default());
        let assignment = network.assignment(selections, None).unwrap();
        let violations = engine.violations(&assignment).unwrap();
        suggest(network, &assignment, &violations, max).unwrap()
    }

    #[test]
    fn test_add_before_remove() {
        let network = network(vec![Rule::requires("R1", "a -> b")]);
        let suggestions = suggestions_for(&network, &[Selection::one("a")], 5);
        let messages: Vec<&str> = suggestions.iter().map(|s| s.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Add 'Beta' to satisfy 'R1'", "Remove 'Alpha' to satisfy 'R1'"]
        );
    }

    #[test]
    fn test_excludes_suggests_removal() {
        let network = network(vec![Rule::excludes("X1", "a -> c")]);
        let suggestions =
            suggestions_for(&network, &[Selection::one("a"), Selection::one("c")], 5);
        assert!(suggestions
            .iter()
            .all(|s| s.action == SuggestionAction::Remove));
        assert_eq!(suggestions.len(), 2);
    }

    #[test]
    fn test_review_when_no_single_flip_helps() {
        let network = network(vec![Rule::requires("R2", "a -> (b && c)")]);
        let suggestions = suggestions_for(&network, &[Selection::one("a")], 5);
        // Removing 'a' still fixes it, adding one of b/c alone does not
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].action, SuggestionAction::Remove);

        let network = self::network(vec![Rule::validation("V", "a && b")]);
        let suggestions = suggestions_for(&network, &[], 5);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].action, SuggestionAction::Review);
    }

    #[test]
    fn test_capped() {
        let network = network(vec![
            Rule::requires("R1", "a -> b"),
            Rule::requires("R2", "a -> c"),
        ]);
        assert_eq!(suggestions_for(&network, &[Selection::one("a")], 2).len(), 2);
    }
}
