//! Constraint / configuration engine
//!
//! The per-model runtime everything else talks to.
//!
//! - [`ConstraintNetwork`] - compiled rules, group-cardinality constraints and
//!   their conjunction (the unified network); immutable once built
//! - [`ConfigurationEngine`] - evaluates selection sets against the network,
//!   caches verdicts, reports availability and keeps metrics
//!
//! The unified network only answers "valid or not". Localising which rule
//! failed is the job of [`crate::validation::ValidationEngine`].

mod assignment;

pub use assignment::Assignment;

use crate::bdd::{Bdd, NodeId};
use crate::cache::{Sweepable, TtlCache};
use crate::compiler::{CompilationFailure, CompiledRule, RuleCompiler};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{CustomerContext, Model, Selection};
use crate::registry::{option_var, VariableRegistry};
use crate::validation::{ValidationEngine, ValidationResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ============================================================================
// Group constraints
// ============================================================================

/// Which side of a group's cardinality a constraint enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityBound {
    Min,
    Max,
}

/// A group-cardinality constraint generated from a group's min/max
#[derive(Debug, Clone)]
pub struct GroupConstraint {
    /// `group:<id>:min` or `group:<id>:max`
    pub id: String,
    pub group_id: String,
    pub group_name: String,
    pub bound: CardinalityBound,
    pub limit: u32,
    /// Active options counted by the constraint
    pub options: Vec<String>,
    pub handle: NodeId,
}

// ============================================================================
// Availability
// ============================================================================

/// Whether an option can still be selected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AvailableOption {
    pub option_id: String,
    pub name: String,
    pub group_id: String,
    pub price: f64,
    pub selected: bool,
    pub available: bool,
    /// IDs of the rules or group constraints that block the option
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Default)]
struct EngineMetrics {
    evaluations: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    budget_overruns: AtomicU64,
    total_time_us: AtomicU64,
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineMetricsSnapshot {
    pub evaluations: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub budget_overruns: u64,
    pub average_time_us: u64,
    pub compiled_rules: usize,
    pub group_constraints: usize,
    pub compilation_failures: usize,
    pub variables: usize,
    pub network_nodes: usize,
}

// ============================================================================
// Constraint network
// ============================================================================

/// Compiled constraints of one model
pub struct ConstraintNetwork {
    model: Arc<Model>,
    compiler: Arc<RuleCompiler>,
    rules: Vec<CompiledRule>,
    groups: Vec<GroupConstraint>,
    unified: NodeId,
    failures: Vec<CompilationFailure>,
}

impl std::fmt::Debug for ConstraintNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintNetwork")
            .field("model", &self.model.id)
            .field("rules", &self.rules.len())
            .field("groups", &self.groups.len())
            .field("failures", &self.failures.len())
            .finish()
    }
}

impl ConstraintNetwork {
    /// Compile a model into a network
    ///
    /// Fails on an invalid model, and on the first uncompilable rule under the
    /// strict compilation policy.
    pub fn build(model: Arc<Model>, config: &EngineConfig) -> Result<Self> {
        model.validate()?;

        let registry = Arc::new(RwLock::new(VariableRegistry::with_naming_rules(
            &config.naming_rules,
        )?));
        let bdd = Arc::new(RwLock::new(Bdd::new()));
        let compiler = Arc::new(RuleCompiler::new(
            &model,
            registry,
            bdd,
            config.declaration_mode,
            config.cache.compiled_rule_capacity,
        )?);

        let (rules, failures) =
            compiler.compile_all(model.constraint_rules(), config.compilation_policy)?;
        let groups = Self::build_group_constraints(&model, &compiler)?;

        let unified = {
            let mut bdd = compiler.bdd().write()?;
            let handles: Vec<NodeId> = rules
                .iter()
                .map(|r| r.handle)
                .chain(groups.iter().map(|g| g.handle))
                .collect();
            bdd.and_all(handles)
        };

        let network = Self {
            model,
            compiler,
            rules,
            groups,
            unified,
            failures,
        };
        info!(
            model = %network.model.id,
            rules = network.rules.len(),
            constraints = network.groups.len(),
            failures = network.failures.len(),
            variables = network.variable_count(),
            nodes = network.node_count(),
            "Constraint network built"
        );
        Ok(network)
    }

    fn build_group_constraints(
        model: &Model,
        compiler: &RuleCompiler,
    ) -> Result<Vec<GroupConstraint>> {
        let registry = compiler.registry().read()?;
        let mut bdd = compiler.bdd().write()?;
        let mut constraints = Vec::new();

        for group in &model.groups {
            let options: Vec<String> = model
                .active_options_in_group(&group.id)
                .iter()
                .map(|o| o.id.clone())
                .collect();
            let vars: Vec<u32> = options
                .iter()
                .filter_map(|id| registry.index_of(&option_var(id)))
                .collect();

            let mut push = |bound: CardinalityBound, limit: u32, handle: NodeId| {
                let suffix = match bound {
                    CardinalityBound::Min => "min",
                    CardinalityBound::Max => "max",
                };
                constraints.push(GroupConstraint {
                    id: format!("group:{}:{}", group.id, suffix),
                    group_id: group.id.clone(),
                    group_name: group.name.clone(),
                    bound,
                    limit,
                    options: options.clone(),
                    handle,
                });
            };

            if group.min_selections > 0 {
                let handle = bdd.at_least(&vars, group.min_selections as usize);
                push(CardinalityBound::Min, group.min_selections, handle);
            }
            if (group.max_selections as usize) < vars.len() {
                let handle = bdd.at_most(&vars, group.max_selections as usize);
                push(CardinalityBound::Max, group.max_selections, handle);
            }
        }
        Ok(constraints)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn compiler(&self) -> &Arc<RuleCompiler> {
        &self.compiler
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn group_constraints(&self) -> &[GroupConstraint] {
        &self.groups
    }

    pub fn failures(&self) -> &[CompilationFailure] {
        &self.failures
    }

    pub fn unified(&self) -> NodeId {
        self.unified
    }

    /// Some selection set satisfies every constraint
    pub fn is_satisfiable(&self) -> bool {
        self.unified != NodeId::FALSE
    }

    pub fn variable_count(&self) -> usize {
        self.compiler.registry().read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.compiler
            .bdd()
            .read()
            .map(|b| b.node_count(self.unified))
            .unwrap_or(0)
    }

    /// IDs and handles of every constraint in the network
    pub fn constraint_handles(&self) -> Vec<(&str, NodeId)> {
        self.rules
            .iter()
            .map(|r| (r.rule_id.as_str(), r.handle))
            .chain(self.groups.iter().map(|g| (g.id.as_str(), g.handle)))
            .collect()
    }

    pub fn assignment(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<Assignment> {
        let registry = self.compiler.registry().read()?;
        Assignment::build(&registry, &self.model, selections, customer)
    }

    pub fn eval(&self, handle: NodeId, assignment: &Assignment) -> Result<bool> {
        self.compiler.bdd().read()?.eval(handle, assignment.bits())
    }

    pub fn eval_unified(&self, assignment: &Assignment) -> Result<bool> {
        self.eval(self.unified, assignment)
    }

    pub fn satisfiable_with(&self, handle: NodeId, fixed: &HashMap<u32, bool>) -> Result<bool> {
        self.compiler.bdd().read()?.satisfiable_with(handle, fixed)
    }

    /// Fixed values for a satisfiability query around `assignment`
    pub fn partial(&self, assignment: &Assignment) -> Result<HashMap<u32, bool>> {
        let registry = self.compiler.registry().read()?;
        Ok(assignment.partial(&registry))
    }

    pub fn option_index(&self, option_id: &str) -> Result<u32> {
        self.compiler
            .registry()
            .read()?
            .index_of(&option_var(option_id))
            .ok_or_else(|| Error::UnknownOption(option_id.to_string()))
    }
}

// ============================================================================
// Configuration engine
// ============================================================================

/// Per-model runtime: validity, availability, metrics
pub struct ConfigurationEngine {
    network: Arc<ConstraintNetwork>,
    validation: ValidationEngine,
    verdicts: Arc<TtlCache<String, bool>>,
    metrics: EngineMetrics,
    budget: Duration,
}

impl std::fmt::Debug for ConfigurationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationEngine")
            .field("network", &self.network)
            .field("budget", &self.budget)
            .finish()
    }
}

fn cache_key(selections: &[Selection], customer: Option<&CustomerContext>) -> String {
    let selections = crate::model::selections_fingerprint(selections);
    match customer {
        Some(c) => format!("{}:{}", selections, c.fingerprint()),
        None => selections,
    }
}

impl ConfigurationEngine {
    pub fn new(model: Model, config: &EngineConfig) -> Result<Self> {
        Self::from_shared(Arc::new(model), config)
    }

    pub fn from_shared(model: Arc<Model>, config: &EngineConfig) -> Result<Self> {
        let network = Arc::new(ConstraintNetwork::build(model, config)?);
        let validation = ValidationEngine::new(network.clone(), config);
        Ok(Self {
            network,
            validation,
            verdicts: Arc::new(TtlCache::new(
                "verdicts",
                config.cache.validation_ttl(),
                config.cache.max_bytes,
            )),
            metrics: EngineMetrics::default(),
            budget: config.response_time_budget(),
        })
    }

    pub fn model(&self) -> &Model {
        self.network.model()
    }

    pub fn network(&self) -> &Arc<ConstraintNetwork> {
        &self.network
    }

    pub fn validation_engine(&self) -> &ValidationEngine {
        &self.validation
    }

    /// Rules left out of the network because they failed to compile
    pub fn compilation_failures(&self) -> &[CompilationFailure] {
        self.network.failures()
    }

    /// Full verdict with violations and suggestions
    pub fn validate(&self, selections: &[Selection]) -> Result<ValidationResult> {
        self.validate_for(selections, None)
    }

    pub fn validate_for(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<ValidationResult> {
        self.track("validate", || {
            let result = self.validation.validate(selections, customer)?;
            self.record_cache(result.cached);
            Ok(result)
        })
    }

    /// Unified verdict only
    pub fn is_valid(&self, selections: &[Selection]) -> Result<bool> {
        self.is_valid_for(selections, None)
    }

    pub fn is_valid_for(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<bool> {
        self.track("is_valid", || {
            let key = cache_key(selections, customer);
            if let Some(verdict) = self.verdicts.get(&key)? {
                self.record_cache(true);
                return Ok(verdict);
            }
            self.record_cache(false);
            let assignment = self.network.assignment(selections, customer)?;
            let verdict = self.network.eval_unified(&assignment)?;
            self.verdicts.set(key, verdict)?;
            Ok(verdict)
        })
    }

    /// Active options with their selectability under the current selections
    ///
    /// An option is available when some completion of the current selections
    /// plus that option satisfies the network. Adding to a group whose
    /// maximum is one replaces the group's current selection.
    pub fn available_options(&self, selections: &[Selection]) -> Result<Vec<AvailableOption>> {
        self.available_options_for(selections, None)
    }

    pub fn available_options_for(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<Vec<AvailableOption>> {
        self.track("available_options", || {
            let model = self.network.model();
            let mut groups: Vec<_> = model.groups.iter().collect();
            groups.sort_by_key(|g| g.display_order);

            let mut out = Vec::new();
            for group in groups {
                for option in model.active_options_in_group(&group.id) {
                    let selected = selections
                        .iter()
                        .any(|s| s.option_id == option.id && s.quantity > 0);
                    let mut entry = AvailableOption {
                        option_id: option.id.clone(),
                        name: option.name.clone(),
                        group_id: group.id.clone(),
                        price: option.price,
                        selected,
                        available: true,
                        blocked_by: Vec::new(),
                        reason: None,
                    };
                    if !selected {
                        let trial = self.trial_selections(selections, &option.id, group.max_selections);
                        let assignment = self.network.assignment(&trial, customer)?;
                        let fixed = self.network.partial(&assignment)?;
                        if !self.network.satisfiable_with(self.network.unified(), &fixed)? {
                            entry.available = false;
                            for (id, handle) in self.network.constraint_handles() {
                                if !self.network.satisfiable_with(handle, &fixed)? {
                                    entry.blocked_by.push(id.to_string());
                                }
                            }
                            entry.reason = Some(if entry.blocked_by.is_empty() {
                                "blocked by a combination of constraints".to_string()
                            } else {
                                format!("blocked by {}", entry.blocked_by.join(", "))
                            });
                        }
                    }
                    out.push(entry);
                }
            }
            Ok(out)
        })
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        let evaluations = self.metrics.evaluations.load(Ordering::Relaxed);
        let total = self.metrics.total_time_us.load(Ordering::Relaxed);
        EngineMetricsSnapshot {
            evaluations,
            errors: self.metrics.errors.load(Ordering::Relaxed),
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.metrics.cache_misses.load(Ordering::Relaxed),
            budget_overruns: self.metrics.budget_overruns.load(Ordering::Relaxed),
            average_time_us: total.checked_div(evaluations).unwrap_or(0),
            compiled_rules: self.network.rules().len(),
            group_constraints: self.network.group_constraints().len(),
            compilation_failures: self.network.failures().len(),
            variables: self.network.variable_count(),
            network_nodes: self.network.node_count(),
        }
    }

    /// Caches owned by this engine, for the background sweeper
    pub fn sweepables(&self) -> Vec<Arc<dyn Sweepable>> {
        vec![
            self.verdicts.clone() as Arc<dyn Sweepable>,
            self.validation.sweepable(),
        ]
    }

    /// Drop every cached verdict and validation result
    pub fn invalidate_caches(&self) -> Result<()> {
        self.verdicts.clear()?;
        self.validation.invalidate()?;
        Ok(())
    }

    fn trial_selections(
        &self,
        selections: &[Selection],
        candidate: &str,
        group_max: u32,
    ) -> Vec<Selection> {
        let model = self.network.model();
        let candidate_group = model.option(candidate).map(|o| o.group_id.as_str());
        let mut trial: Vec<Selection> = selections
            .iter()
            .filter(|s| {
                group_max != 1
                    || model.option(&s.option_id).map(|o| o.group_id.as_str()) != candidate_group
            })
            .cloned()
            .collect();
        trial.push(Selection::one(candidate));
        trial
    }

    fn record_cache(&self, hit: bool) {
        let counter = if hit {
            &self.metrics.cache_hits
        } else {
            &self.metrics.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn track<T, F: FnOnce() -> Result<T>>(&self, operation: &str, f: F) -> Result<T> {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();

        self.metrics.evaluations.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if result.is_err() {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
        if elapsed > self.budget {
            self.metrics.budget_overruns.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation,
                model = %self.network.model().id,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.budget.as_millis() as u64,
                "Response time budget exceeded"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilationPolicy;
    use crate::model::{Group, ModelOption, Rule};

    fn laptop() -> Model {
        Model::builder("laptop", "Laptop")
            .group(Group::single("cpu", "Processor", true))
            .group(Group::multi("extras", "Extras", 0, 2))
            .option(ModelOption::new("i5", "Core i5", "cpu", 200.0))
            .option(ModelOption::new("i9", "Core i9", "cpu", 550.0))
            .option(ModelOption::new("cooling", "Liquid cooling", "extras", 120.0))
            .option(ModelOption::new("dock", "Dock", "extras", 90.0))
            .option(ModelOption::new("bag", "Bag", "extras", 40.0))
            .option(ModelOption::new("legacy", "Legacy", "extras", 10.0).inactive())
            .rule(Rule::requires("R1", "i9 -> cooling").with_message("Core i9 needs liquid cooling"))
            .rule(Rule::excludes("X1", "i5 -> cooling"))
            .build()
            .unwrap()
    }

    fn engine() -> ConfigurationEngine {
        ConfigurationEngine::new(laptop(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_network_contains_rules_and_group_constraints() {
        let engine = engine();
        let network = engine.network();
        assert_eq!(network.rules().len(), 2);
        let ids: Vec<&str> = network.group_constraints().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["group:cpu:min", "group:cpu:max", "group:extras:max"]);
        assert!(network.is_satisfiable());
    }

    #[test]
    fn test_is_valid_uses_unified_network() {
        let engine = engine();
        assert!(!engine.is_valid(&[]).unwrap());
        assert!(engine.is_valid(&[Selection::one("i5")]).unwrap());
        assert!(!engine.is_valid(&[Selection::one("i9")]).unwrap());
        assert!(engine
            .is_valid(&[Selection::one("i9"), Selection::one("cooling")])
            .unwrap());
        assert!(!engine
            .is_valid(&[Selection::one("i5"), Selection::one("i9")])
            .unwrap());
    }

    #[test]
    fn test_verdicts_cached_order_independent() {
        let engine = engine();
        engine
            .is_valid(&[Selection::one("i9"), Selection::one("cooling")])
            .unwrap();
        engine
            .is_valid(&[Selection::one("cooling"), Selection::one("i9")])
            .unwrap();
        let metrics = engine.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
    }

    #[test]
    fn test_unknown_option_is_an_error_and_counted() {
        let engine = engine();
        let err = engine.is_valid(&[Selection::one("nope")]).unwrap_err();
        assert!(matches!(err, Error::UnknownOption(_)));
        assert_eq!(engine.metrics().errors, 1);
    }

    #[test]
    fn test_available_options_report_blockers() {
        let engine = engine();
        let options = engine.available_options(&[Selection::one("i5")]).unwrap();
        assert_eq!(options.len(), 5, "inactive options are not listed");

        let cooling = options.iter().find(|o| o.option_id == "cooling").unwrap();
        assert!(!cooling.available);
        assert_eq!(cooling.blocked_by, vec!["X1"]);

        // Swapping the single-select CPU is always possible
        let i9 = options.iter().find(|o| o.option_id == "i9").unwrap();
        assert!(i9.available);
        assert!(options.iter().find(|o| o.option_id == "i5").unwrap().selected);
    }

    #[test]
    fn test_full_multi_select_group_blocks_more() {
        let engine = engine();
        let options = engine
            .available_options(&[
                Selection::one("i9"),
                Selection::one("cooling"),
                Selection::one("dock"),
            ])
            .unwrap();
        let bag = options.iter().find(|o| o.option_id == "bag").unwrap();
        assert!(!bag.available);
        assert_eq!(bag.blocked_by, vec!["group:extras:max"]);
    }

    #[test]
    fn test_inactive_selection_does_not_count_toward_quantity() {
        let mut rules = laptop().rules;
        rules.push(Rule::requires("Q1", "quantity >= 3 -> dock"));
        let engine =
            ConfigurationEngine::new(laptop().with_rules(rules), &EngineConfig::default()).unwrap();
        assert!(engine
            .is_valid(&[Selection::one("i5"), Selection::new("legacy", 5)])
            .unwrap());
        assert!(!engine
            .is_valid(&[Selection::one("i5"), Selection::new("bag", 3)])
            .unwrap());
    }

    #[test]
    fn test_degraded_rule_excluded() {
        let model = laptop().with_rules(vec![
            Rule::requires("R1", "i9 -> cooling"),
            Rule::requires("BROKEN", "i9 -> -> cooling"),
        ]);
        let engine = ConfigurationEngine::new(model.clone(), &EngineConfig::default()).unwrap();
        assert_eq!(engine.compilation_failures().len(), 1);
        assert_eq!(engine.compilation_failures()[0].rule_id, "BROKEN");
        assert_eq!(engine.metrics().compiled_rules, 1);

        let strict = EngineConfig {
            compilation_policy: CompilationPolicy::Strict,
            ..Default::default()
        };
        assert!(matches!(
            ConfigurationEngine::new(model, &strict),
            Err(Error::Compilation { .. })
        ));
    }
}
