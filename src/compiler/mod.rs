//! Rule compiler
//!
//! Turns rule text into a diagram-engine function:
//!
//! 1. parse (and normalise excludes rules) into an [`Expr`]
//! 2. resolve every identifier against the [`VariableRegistry`], declaring
//!    pseudo-variables and comparisons on the way
//! 3. fold the resolved tree into [`Bdd`] calls (`A -> B` is built as `!A || B`)
//!
//! A compile is a function of (normalised text, registry version). Compiled
//! handles are cached under that key, so recompiling an unchanged rule
//! skips diagram composition entirely. The cache is dropped as soon as the
//! registry gains a variable.
//!
//! ## Identifier resolution
//!
//! | Identifier | Variable |
//! |------------|----------|
//! | option ID | `opt_<id>` |
//! | group ID | `drv_grp_<id>_qty_ge_1` (anything selected in the group) |
//! | `customer.<attr>` | `cust_<attr>` |
//! | `quantity <op> n` | `drv_price_quantity_<op>_<n>` |
//! | `price <op> n` | `drv_price_total_<op>_<n>` |
//! | `<group> <op> n` | `drv_grp_<group>_qty_<op>_<n>` |

pub mod tiers;

pub use tiers::TierCompiler;

use crate::bdd::{Bdd, NodeId};
use crate::config::{CompilationPolicy, DeclarationMode};
use crate::error::{Error, Result};
use crate::expr::{self, BinaryOp, CmpOp, Expr, ExprVisitor};
use crate::model::{Model, Rule, RuleType};
use crate::registry::{
    customer_var, derived_var, group_quantity_var, option_var, VarSource, VarType,
    VariableRegistry, PRICE_QUANTITY, PRICE_TOTAL,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A rule folded into the diagram engine
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_id: String,
    /// Normalised expression text that was compiled
    pub expression: String,
    /// Registry names of every referenced variable
    pub variables: BTreeSet<String>,
    pub handle: NodeId,
    pub compile_time: Duration,
    /// Served from the compile cache
    pub cached: bool,
}

impl CompiledRule {
    /// Option IDs referenced by the rule
    pub fn option_ids(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter_map(|v| crate::registry::option_id_of(v))
            .map(str::to_string)
            .collect()
    }
}

/// A rule that failed to compile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompilationFailure {
    pub rule_id: String,
    pub expression: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CompilerStats {
    pub compiled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub cache_entries: usize,
    pub total_compile_time_us: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    handle: NodeId,
    variables: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct CompileCache {
    registry_version: u64,
    entries: HashMap<String, CacheEntry>,
}

/// Compiles rules of one model against a shared registry and diagram
pub struct RuleCompiler {
    registry: Arc<RwLock<VariableRegistry>>,
    bdd: Arc<RwLock<Bdd>>,
    options: HashSet<String>,
    groups: HashSet<String>,
    mode: DeclarationMode,
    capacity: usize,
    cache: RwLock<CompileCache>,
    compiled: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failures: AtomicU64,
    compile_time_us: AtomicU64,
}

impl std::fmt::Debug for RuleCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCompiler")
            .field("options", &self.options.len())
            .field("groups", &self.groups.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl RuleCompiler {
    /// Compiler for `model`; every option of the model is declared up front
    pub fn new(
        model: &Model,
        registry: Arc<RwLock<VariableRegistry>>,
        bdd: Arc<RwLock<Bdd>>,
        mode: DeclarationMode,
        capacity: usize,
    ) -> Result<Self> {
        {
            let mut reg = registry.write()?;
            for option in &model.options {
                reg.declare_option(&option.id)?;
            }
        }
        Ok(Self {
            registry,
            bdd,
            options: model.options.iter().map(|o| o.id.clone()).collect(),
            groups: model.groups.iter().map(|g| g.id.clone()).collect(),
            mode,
            capacity: capacity.max(1),
            cache: RwLock::new(CompileCache::default()),
            compiled: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            compile_time_us: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<RwLock<VariableRegistry>> {
        &self.registry
    }

    pub fn bdd(&self) -> &Arc<RwLock<Bdd>> {
        &self.bdd
    }

    /// Compile one rule
    pub fn compile(&self, rule: &Rule) -> Result<CompiledRule> {
        self.compile_text(&rule.id, &rule.expression, rule.rule_type)
            .inspect_err(|_| {
                self.failures.fetch_add(1, Ordering::Relaxed);
            })
    }

    /// Compile a bare condition (price-rule conditions, tier patterns)
    pub fn compile_condition(&self, id: &str, expression: &str) -> Result<CompiledRule> {
        self.compile_text(id, expression, RuleType::Pricing)
            .inspect_err(|_| {
                self.failures.fetch_add(1, Ordering::Relaxed);
            })
    }

    /// Compile a batch of rules
    ///
    /// Under [`CompilationPolicy::Degrade`] failing rules are reported and left
    /// out; under [`CompilationPolicy::Strict`] the first failure is returned.
    pub fn compile_all<'a, I>(
        &self,
        rules: I,
        policy: CompilationPolicy,
    ) -> Result<(Vec<CompiledRule>, Vec<CompilationFailure>)>
    where
        I: IntoIterator<Item = &'a Rule>,
    {
        let mut compiled = Vec::new();
        let mut failures = Vec::new();
        for rule in rules {
            match self.compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) if policy == CompilationPolicy::Strict => {
                    return Err(Error::Compilation {
                        rule: rule.id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "Rule excluded from network");
                    failures.push(CompilationFailure {
                        rule_id: rule.id.clone(),
                        expression: rule.expression.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok((compiled, failures))
    }

    pub fn stats(&self) -> CompilerStats {
        CompilerStats {
            compiled: self.compiled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_entries: self.cache.read().map(|c| c.entries.len()).unwrap_or(0),
            total_compile_time_us: self.compile_time_us.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached compile
    pub fn invalidate_cache(&self) -> Result<()> {
        self.cache.write()?.entries.clear();
        Ok(())
    }

    fn compile_text(&self, id: &str, text: &str, rule_type: RuleType) -> Result<CompiledRule> {
        let started = Instant::now();
        let parsed = expr::parse_expr(text)?;
        let normalised = expr::normalize_rule_expr(rule_type, parsed);
        let expression = normalised.to_string();

        // A hit at the current registry version needs no new declarations
        let current = self.registry.read()?.version();
        if let Some(hit) = self.cached(id, &expression, current, started)? {
            return Ok(hit);
        }

        let (resolved, variables, version) = {
            let mut registry = self.registry.write()?;
            let mut resolver = Resolver {
                registry: &mut registry,
                options: &self.options,
                groups: &self.groups,
                mode: self.mode,
                expression: text,
                variables: BTreeSet::new(),
            };
            let resolved = normalised.accept(&mut resolver)?;
            let variables = resolver.variables;
            (resolved, variables, registry.version())
        };

        if let Some(hit) = self.cached(id, &expression, version, started)? {
            return Ok(hit);
        }
        let key = cache_key(&expression, version);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let handle = {
            let registry = self.registry.read()?;
            let mut bdd = self.bdd.write()?;
            let mut builder = DiagramBuilder {
                registry: &registry,
                bdd: &mut bdd,
            };
            resolved.accept(&mut builder)?
        };

        {
            let mut cache = self.cache.write()?;
            if cache.registry_version != version {
                cache.entries.clear();
                cache.registry_version = version;
            }
            if cache.entries.len() >= self.capacity {
                debug!(capacity = self.capacity, "Compile cache full, clearing");
                cache.entries.clear();
            }
            cache.entries.insert(
                key,
                CacheEntry {
                    handle,
                    variables: variables.clone(),
                },
            );
        }

        let compile_time = started.elapsed();
        self.compiled.fetch_add(1, Ordering::Relaxed);
        self.compile_time_us
            .fetch_add(compile_time.as_micros() as u64, Ordering::Relaxed);

        Ok(CompiledRule {
            rule_id: id.to_string(),
            expression,
            variables,
            handle,
            compile_time,
            cached: false,
        })
    }
    fn cached(
        &self,
        id: &str,
        expression: &str,
        version: u64,
        started: Instant,
    ) -> Result<Option<CompiledRule>> {
        let key = cache_key(expression, version);
        let Some(entry) = self.cache.read()?.entries.get(&key).cloned() else {
            return Ok(None);
        };
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!(rule = id, "Compile cache hit");
        Ok(Some(CompiledRule {
            rule_id: id.to_string(),
            expression: expression.to_string(),
            variables: entry.variables,
            handle: entry.handle,
            compile_time: started.elapsed(),
            cached: true,
        }))
    }
}

fn cache_key(expression: &str, registry_version: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(expression.as_bytes());
    hasher.update(registry_version.to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}

// ============================================================================
// Identifier resolution
// ============================================================================

/// Rewrites identifiers into registry names; comparisons become derived booleans
struct Resolver<'a> {
    registry: &'a mut VariableRegistry,
    options: &'a HashSet<String>,
    groups: &'a HashSet<String>,
    mode: DeclarationMode,
    expression: &'a str,
    variables: BTreeSet<String>,
}

impl Resolver<'_> {
    fn unknown(&self, identifier: &str) -> Error {
        Error::UnknownIdentifier {
            identifier: identifier.to_string(),
            expression: self.expression.to_string(),
        }
    }

    fn numeric_var(&mut self, name: &str) -> Result<String> {
        let (var, var_type, source) = match name {
            "quantity" => (
                PRICE_QUANTITY.to_string(),
                VarType::Integer,
                VarSource::Pricing("quantity".into()),
            ),
            "price" => (
                PRICE_TOTAL.to_string(),
                VarType::Real,
                VarSource::Pricing("price".into()),
            ),
            group if self.groups.contains(group) => (
                group_quantity_var(group),
                VarType::Integer,
                VarSource::Group(group.to_string()),
            ),
            other => return Err(self.unknown(other)),
        };
        self.registry.declare(&var, var_type, source)?;
        Ok(var)
    }

    fn derived(&mut self, numeric: &str, op: CmpOp, value: f64) -> Result<Expr> {
        let var = self.numeric_var(numeric)?;
        let name = derived_var(&var, op, value);
        self.registry.declare(
            &name,
            VarType::Boolean,
            VarSource::Comparison {
                var: var.clone(),
                op,
                value,
            },
        )?;
        self.variables.insert(name.clone());
        Ok(Expr::Ident(name))
    }
}

impl ExprVisitor for Resolver<'_> {
    type Output = Expr;

    fn constant(&mut self, value: bool) -> Result<Expr> {
        Ok(Expr::Const(value))
    }

    fn ident(&mut self, name: &str) -> Result<Expr> {
        if self.options.contains(name) {
            let var = option_var(name);
            self.registry.declare_option(name)?;
            self.variables.insert(var.clone());
            return Ok(Expr::Ident(var));
        }
        if self.groups.contains(name) {
            return self.derived(name, CmpOp::Ge, 1.0);
        }
        if let Some(attribute) = name.strip_prefix("customer.") {
            let var = customer_var(attribute);
            self.registry.declare(
                &var,
                VarType::Boolean,
                VarSource::Customer(attribute.to_string()),
            )?;
            self.variables.insert(var.clone());
            return Ok(Expr::Ident(var));
        }
        match self.mode {
            DeclarationMode::Implicit => {
                let var = option_var(name);
                self.registry.declare_option(name)?;
                self.variables.insert(var.clone());
                Ok(Expr::Ident(var))
            }
            DeclarationMode::Explicit => Err(self.unknown(name)),
        }
    }

    fn compare(&mut self, var: &str, op: CmpOp, value: f64) -> Result<Expr> {
        self.derived(var, op, value)
    }

    fn not(&mut self, inner: Expr) -> Result<Expr> {
        Ok(Expr::not(inner))
    }

    fn binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Result<Expr> {
        Ok(Expr::binary(op, left, right))
    }
}

/// Folds a resolved expression into diagram nodes
struct DiagramBuilder<'a> {
    registry: &'a VariableRegistry,
    bdd: &'a mut Bdd,
}

impl ExprVisitor for DiagramBuilder<'_> {
    type Output = NodeId;

    fn constant(&mut self, value: bool) -> Result<NodeId> {
        Ok(self.bdd.constant(value))
    }

    fn ident(&mut self, name: &str) -> Result<NodeId> {
        let index = self.registry.index_of(name).ok_or_else(|| Error::Compilation {
            rule: name.to_string(),
            reason: format!("variable '{}' is not declared", name),
        })?;
        Ok(self.bdd.var(index))
    }

    fn compare(&mut self, var: &str, _op: CmpOp, _value: f64) -> Result<NodeId> {
        Err(Error::Compilation {
            rule: var.to_string(),
            reason: "unresolved comparison".into(),
        })
    }

    fn not(&mut self, inner: NodeId) -> Result<NodeId> {
        Ok(self.bdd.not(inner))
    }

    fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> Result<NodeId> {
        Ok(match op {
            BinaryOp::And => self.bdd.and(left, right),
            BinaryOp::Or => self.bdd.or(left, right),
            BinaryOp::Implies => self.bdd.implies(left, right),
        })
    }
}
