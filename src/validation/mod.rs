//! Validation engine
//!
//! Explains an invalid verdict: every compiled rule and every group
//! constraint is evaluated on its own against the same assignment, and each
//! one that fails becomes a [`RuleViolation`]. Suggestions are produced from
//! the violations by [`suggestions::suggest`].
//!
//! | Source | Severity |
//! |--------|----------|
//! | requires / excludes rule | `ERROR` |
//! | group minimum / maximum | `ERROR` |
//! | validation rule | `WARN` |

pub mod suggestions;

pub use suggestions::{Suggestion, SuggestionAction};

use crate::cache::{CacheStats, Sweepable, TtlCache};
use crate::config::EngineConfig;
use crate::engine::{Assignment, CardinalityBound, ConstraintNetwork};
use crate::error::Result;
use crate::model::{selections_fingerprint, CustomerContext, RuleType, Selection};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Severity of a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARN"),
        }
    }
}

/// What produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Rule,
    GroupMinimum,
    GroupMaximum,
}

/// One failed rule or group constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleViolation {
    pub rule_id: String,
    pub rule_name: String,
    pub message: String,
    /// Option IDs referenced by the failed constraint, sorted
    pub affected_options: Vec<String>,
    pub severity: Severity,
    pub kind: ViolationKind,
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.rule_id, self.message)
    }
}

/// Verdict for one selection set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<RuleViolation>,
    pub suggestions: Vec<Suggestion>,
    pub response_time_us: u64,
    /// Served from the validation cache
    #[serde(default)]
    pub cached: bool,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
            suggestions: Vec::new(),
            response_time_us: 0,
            cached: false,
        }
    }

    pub fn error_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
            .count()
    }

    /// IDs of the violated rules and constraints, in report order
    pub fn violated_rule_ids(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.rule_id.as_str()).collect()
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid {
            writeln!(f, "VALID")?;
        } else {
            writeln!(
                f,
                "INVALID ({} errors, {} warnings)",
                self.error_count(),
                self.warning_count()
            )?;
        }
        for violation in &self.violations {
            writeln!(f, "  {}", violation)?;
        }
        for suggestion in &self.suggestions {
            writeln!(f, "  -> {}", suggestion.message)?;
        }
        Ok(())
    }
}

/// Per-rule evaluation and suggestion generation over a constraint network
pub struct ValidationEngine {
    network: Arc<ConstraintNetwork>,
    cache: Arc<TtlCache<String, ValidationResult>>,
    max_suggestions: usize,
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("cached", &self.cache.len())
            .field("max_suggestions", &self.max_suggestions)
            .finish()
    }
}

impl ValidationEngine {
    pub fn new(network: Arc<ConstraintNetwork>, config: &EngineConfig) -> Self {
        Self {
            network,
            cache: Arc::new(TtlCache::new(
                "validation",
                config.cache.validation_ttl(),
                config.cache.max_bytes,
            )),
            max_suggestions: config.max_suggestions,
        }
    }

    /// Validate a selection set; identical sets (in any order) hit the cache
    pub fn validate(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<ValidationResult> {
        let started = Instant::now();
        let key = match customer {
            Some(c) => format!("{}:{}", selections_fingerprint(selections), c.fingerprint()),
            None => selections_fingerprint(selections),
        };

        if let Some(mut hit) = self.cache.get(&key)? {
            debug!(model = %self.network.model().id, "Validation cache hit");
            hit.cached = true;
            hit.response_time_us = started.elapsed().as_micros() as u64;
            return Ok(hit);
        }

        let assignment = self.network.assignment(selections, customer)?;
        let is_valid = self.network.eval_unified(&assignment)?;
        let (violations, suggestions) = if is_valid {
            (Vec::new(), Vec::new())
        } else {
            let violations = self.violations(&assignment)?;
            let suggestions = suggestions::suggest(
                &self.network,
                &assignment,
                &violations,
                self.max_suggestions,
            )?;
            (violations, suggestions)
        };

        let result = ValidationResult {
            is_valid,
            violations,
            suggestions,
            response_time_us: started.elapsed().as_micros() as u64,
            cached: false,
        };
        self.cache.set(key, result.clone())?;
        Ok(result)
    }

    /// Every rule and group constraint that fails under `assignment`
    pub fn violations(&self, assignment: &Assignment) -> Result<Vec<RuleViolation>> {
        let model = self.network.model();
        let mut violations = Vec::new();

        for compiled in self.network.rules() {
            if self.network.eval(compiled.handle, assignment)? {
                continue;
            }
            let Some(rule) = model.rule(&compiled.rule_id) else {
                continue;
            };
            let mut affected = compiled.option_ids();
            affected.sort();
            violations.push(RuleViolation {
                rule_id: rule.id.clone(),
                rule_name: rule.display_name().to_string(),
                message: rule.violation_message(),
                affected_options: affected,
                severity: match rule.rule_type {
                    RuleType::Validation => Severity::Warning,
                    _ => Severity::Error,
                },
                kind: ViolationKind::Rule,
            });
        }

        for constraint in self.network.group_constraints() {
            if self.network.eval(constraint.handle, assignment)? {
                continue;
            }
            let (kind, message) = match constraint.bound {
                CardinalityBound::Min => (
                    ViolationKind::GroupMinimum,
                    format!(
                        "Group '{}' requires at least {} selection(s)",
                        constraint.group_name, constraint.limit
                    ),
                ),
                CardinalityBound::Max => (
                    ViolationKind::GroupMaximum,
                    format!(
                        "Group '{}' allows at most {} selection(s)",
                        constraint.group_name, constraint.limit
                    ),
                ),
            };
            let mut affected: Vec<String> = match constraint.bound {
                CardinalityBound::Min => constraint.options.clone(),
                CardinalityBound::Max => constraint
                    .options
                    .iter()
                    .filter(|id| assignment.selected().contains(*id))
                    .cloned()
                    .collect(),
            };
            affected.sort();
            violations.push(RuleViolation {
                rule_id: constraint.id.clone(),
                rule_name: constraint.group_name.clone(),
                message,
                affected_options: affected,
                severity: Severity::Error,
                kind,
            });
        }

        Ok(violations)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweepable(&self) -> Arc<dyn Sweepable> {
        self.cache.clone()
    }

    pub fn invalidate(&self) -> Result<usize> {
        self.cache.clear()
    }
}
