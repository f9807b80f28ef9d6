//! Variable registry
//!
//! Symbol table mapping model entities to diagram-engine variable indices.
//! Names carry a role prefix so any component can classify a variable from
//! its name alone:
//!
//! | Prefix | Role | Type |
//! |--------|------|------|
//! | `opt_<id>` | option selected | boolean |
//! | `grp_<id>_qty` | quantity selected in a group | integer |
//! | `cust_<attr>` | customer-context flag | boolean |
//! | `price_quantity`, `price_total` | order quantity and base price | integer, real |
//! | `drv_<var>_<op>_<n>` | derived comparison | boolean |
//! | `sys_<name>` | system / meta | meta |
//!
//! Indices grow monotonically from [`INDEX_BASE`] and are never reused within
//! one registry. A changed model gets a fresh registry.

use crate::config::NamingRuleConfig;
use crate::error::{Error, Result};
use crate::expr::CmpOp;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// First index handed out
pub const INDEX_BASE: u32 = 0;

pub const PRICE_QUANTITY: &str = "price_quantity";
pub const PRICE_TOTAL: &str = "price_total";

/// Value domain of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Boolean,
    Integer,
    Real,
    Meta,
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarType::Boolean => write!(f, "boolean"),
            VarType::Integer => write!(f, "integer"),
            VarType::Real => write!(f, "real"),
            VarType::Meta => write!(f, "meta"),
        }
    }
}

/// Role of a variable, derived from its name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VarRole {
    Option,
    GroupQuantity,
    Customer,
    Pricing,
    Derived,
    System,
}

impl VarRole {
    /// Classify a variable name by prefix
    pub fn classify(name: &str) -> Option<VarRole> {
        if name.starts_with("opt_") {
            Some(VarRole::Option)
        } else if name.starts_with("grp_") && name.ends_with("_qty") {
            Some(VarRole::GroupQuantity)
        } else if name.starts_with("cust_") {
            Some(VarRole::Customer)
        } else if name.starts_with("price_") {
            Some(VarRole::Pricing)
        } else if name.starts_with("drv_") {
            Some(VarRole::Derived)
        } else if name.starts_with("sys_") {
            Some(VarRole::System)
        } else {
            None
        }
    }
}

impl std::fmt::Display for VarRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VarRole::Option => "option",
            VarRole::GroupQuantity => "group_quantity",
            VarRole::Customer => "customer",
            VarRole::Pricing => "pricing",
            VarRole::Derived => "derived",
            VarRole::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// Entity a variable stands for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum VarSource {
    Option(String),
    Group(String),
    Customer(String),
    Pricing(String),
    /// Comparison over a numeric variable
    Comparison {
        var: String,
        op: CmpOp,
        value: f64,
    },
    System(String),
}

/// A declared variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariableInfo {
    pub name: String,
    pub var_type: VarType,
    pub role: Option<VarRole>,
    pub index: u32,
    pub source: VarSource,
    /// Number of declarations, including the first
    pub usage_count: u64,
}

/// A naming rule failure, collected at declaration time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamingViolation {
    pub variable: String,
    pub rule: String,
    pub message: String,
}

/// Snapshot of registry contents
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegistryStats {
    pub total: usize,
    pub by_role: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub naming_violations: Vec<NamingViolation>,
    pub version: u64,
    pub next_index: u32,
}

struct NamingRule {
    name: String,
    pattern: Regex,
    role: Option<VarRole>,
}

// ============================================================================
// Name construction
// ============================================================================

pub fn option_var(option_id: &str) -> String {
    format!("opt_{}", option_id)
}

pub fn group_quantity_var(group_id: &str) -> String {
    format!("grp_{}_qty", group_id)
}

pub fn customer_var(attribute: &str) -> String {
    format!("cust_{}", attribute)
}

pub fn system_var(name: &str) -> String {
    format!("sys_{}", name)
}

/// Name of the boolean standing for `var <op> value`
pub fn derived_var(var: &str, op: CmpOp, value: f64) -> String {
    let value = format!("{}", value).replace('-', "m").replace('.', "p");
    format!("drv_{}_{}_{}", var, op.mnemonic(), value)
}

/// Option ID behind an `opt_` variable
pub fn option_id_of(name: &str) -> Option<&str> {
    name.strip_prefix("opt_")
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of variables for one compiled model
pub struct VariableRegistry {
    variables: HashMap<String, VariableInfo>,
    by_index: Vec<String>,
    next_index: u32,
    version: u64,
    naming_rules: Vec<NamingRule>,
    naming_violations: Vec<NamingViolation>,
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRegistry")
            .field("variables", &self.variables.len())
            .field("next_index", &self.next_index)
            .field("version", &self.version)
            .finish()
    }
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
            by_index: Vec::new(),
            next_index: INDEX_BASE,
            version: 0,
            naming_rules: Vec::new(),
            naming_violations: Vec::new(),
        }
    }

    /// Registry that checks the given naming rules at every declaration
    pub fn with_naming_rules(rules: &[NamingRuleConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for rule in rules {
            let pattern = Regex::new(&rule.pattern)
                .map_err(|e| Error::Config(format!("naming rule '{}': {}", rule.name, e)))?;
            registry.naming_rules.push(NamingRule {
                name: rule.name.clone(),
                pattern,
                role: rule.role,
            });
        }
        Ok(registry)
    }

    /// Declare a variable and return its index
    ///
    /// Redeclaring with the same type returns the existing index and bumps the
    /// usage counter. Redeclaring with another type fails.
    pub fn declare(&mut self, name: &str, var_type: VarType, source: VarSource) -> Result<u32> {
        if let Some(existing) = self.variables.get_mut(name) {
            if existing.var_type != var_type {
                return Err(Error::VariableTypeConflict {
                    name: name.to_string(),
                    existing: existing.var_type.to_string(),
                    requested: var_type.to_string(),
                });
            }
            existing.usage_count += 1;
            return Ok(existing.index);
        }

        let role = VarRole::classify(name);
        self.check_naming(name, role);

        let index = self.next_index;
        self.next_index += 1;
        self.version += 1;
        self.by_index.push(name.to_string());
        self.variables.insert(
            name.to_string(),
            VariableInfo {
                name: name.to_string(),
                var_type,
                role,
                index,
                source,
                usage_count: 1,
            },
        );
        Ok(index)
    }

    pub fn declare_option(&mut self, option_id: &str) -> Result<u32> {
        self.declare(
            &option_var(option_id),
            VarType::Boolean,
            VarSource::Option(option_id.to_string()),
        )
    }

    pub fn lookup(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.variables.get(name).map(|v| v.index)
    }

    pub fn name_of(&self, index: u32) -> Option<&str> {
        index
            .checked_sub(INDEX_BASE)
            .and_then(|offset| self.by_index.get(offset as usize))
            .map(String::as_str)
    }

    /// All variables, sorted by name
    pub fn all_variables(&self) -> Vec<&VariableInfo> {
        let mut vars: Vec<&VariableInfo> = self.variables.values().collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }

    /// Variables of one role, sorted by index
    pub fn variables_with_role(&self, role: VarRole) -> Vec<&VariableInfo> {
        let mut vars: Vec<&VariableInfo> = self
            .variables
            .values()
            .filter(|v| v.role == Some(role))
            .collect();
        vars.sort_by_key(|v| v.index);
        vars
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Identity of the current variable set; changes with every new declaration
    pub fn version(&self) -> u64 {
        self.version
    }

    /// One past the highest index handed out
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn naming_violations(&self) -> &[NamingViolation] {
        &self.naming_violations
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_role = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for var in self.variables.values() {
            let role = var
                .role
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unclassified".to_string());
            *by_role.entry(role).or_insert(0) += 1;
            *by_type.entry(var.var_type.to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total: self.variables.len(),
            by_role,
            by_type,
            naming_violations: self.naming_violations.clone(),
            version: self.version,
            next_index: self.next_index,
        }
    }

    fn check_naming(&mut self, name: &str, role: Option<VarRole>) {
        if role.is_none() {
            self.naming_violations.push(NamingViolation {
                variable: name.to_string(),
                rule: "role_prefix".to_string(),
                message: format!("'{}' has no recognised role prefix", name),
            });
        }
        for rule in &self.naming_rules {
            if rule.role.is_some() && rule.role != role {
                continue;
            }
            if !rule.pattern.is_match(name) {
                self.naming_violations.push(NamingViolation {
                    variable: name.to_string(),
                    rule: rule.name.clone(),
                    message: format!("'{}' does not match /{}/", name, rule.pattern.as_str()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_monotonic_from_base() {
        let mut registry = VariableRegistry::new();
        let a = registry.declare_option("a").unwrap();
        let b = registry.declare_option("b").unwrap();
        assert_eq!(a, INDEX_BASE);
        assert_eq!(b, INDEX_BASE + 1);
        assert_eq!(registry.name_of(b), Some("opt_b"));
    }

    #[test]
    fn test_redeclaration_is_idempotent() {
        let mut registry = VariableRegistry::new();
        let first = registry.declare_option("a").unwrap();
        let version = registry.version();
        let second = registry.declare_option("a").unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.version(), version);
        assert_eq!(registry.lookup("opt_a").unwrap().usage_count, 2);
    }

    #[test]
    fn test_type_conflict_rejected() {
        let mut registry = VariableRegistry::new();
        registry.declare_option("a").unwrap();
        let err = registry
            .declare("opt_a", VarType::Integer, VarSource::Option("a".into()))
            .unwrap_err();
        assert!(matches!(err, Error::VariableTypeConflict { .. }));
    }

    #[test]
    fn test_role_classification() {
        assert_eq!(VarRole::classify("opt_x"), Some(VarRole::Option));
        assert_eq!(VarRole::classify("grp_cpu_qty"), Some(VarRole::GroupQuantity));
        assert_eq!(VarRole::classify("cust_vip"), Some(VarRole::Customer));
        assert_eq!(VarRole::classify(PRICE_TOTAL), Some(VarRole::Pricing));
        assert_eq!(VarRole::classify("drv_price_quantity_ge_10"), Some(VarRole::Derived));
        assert_eq!(VarRole::classify("sys_valid"), Some(VarRole::System));
        assert_eq!(VarRole::classify("x"), None);
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(
            derived_var(PRICE_QUANTITY, CmpOp::Ge, 10.0),
            "drv_price_quantity_ge_10"
        );
        assert_eq!(derived_var(PRICE_TOTAL, CmpOp::Lt, -2.5), "drv_price_total_lt_m2p5");
    }

    #[test]
    fn test_naming_violations_collected_not_thrown() {
        let rules = vec![NamingRuleConfig {
            name: "lowercase options".into(),
            pattern: "^opt_[a-z0-9_]+$".into(),
            role: Some(VarRole::Option),
        }];
        let mut registry = VariableRegistry::with_naming_rules(&rules).unwrap();
        registry.declare_option("ok_1").unwrap();
        registry.declare_option("Bad").unwrap();
        registry
            .declare("weird", VarType::Meta, VarSource::System("weird".into()))
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.naming_violations.len(), 2);
        assert_eq!(stats.by_role.get("option"), Some(&2));
        assert_eq!(stats.by_role.get("unclassified"), Some(&1));
    }

    #[test]
    fn test_all_variables_sorted() {
        let mut registry = VariableRegistry::new();
        registry.declare_option("z").unwrap();
        registry.declare_option("a").unwrap();
        let names: Vec<&str> = registry
            .all_variables()
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(names, vec!["opt_a", "opt_z"]);
    }
}
