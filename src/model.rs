//! Model types: the product catalog and customer configurations
//!
//! A `Model` is a named, versioned catalog:
//! - `groups` define selection cardinality (single/multi/optional)
//! - `options` belong to exactly one group and carry a unit price
//! - `rules` are boolean business rules over option identifiers
//! - `price_rules` are discounts, surcharges and volume tiers
//!
//! A `Configuration` is a set of selections against one model. Its validity
//! flag and total price are cached projections, always recomputed by the
//! engines.
//!
//! ## Example Model
//!
//! ```yaml
//! id: laptop
//! name: "Laptop Configurator"
//! groups:
//!   - id: cpu
//!     name: Processor
//!     type: single_select
//!     min_selections: 1
//!     max_selections: 1
//! options:
//!   - id: cpu_i5
//!     name: Core i5
//!     group_id: cpu
//!     price: 200
//!   - id: cpu_i9
//!     name: Core i9
//!     group_id: cpu
//!     price: 550
//! rules:
//!   - id: R1
//!     name: i9 needs cooling
//!     type: requires
//!     expression: "cpu_i9 -> cooling_liquid"
//! ```

use crate::error::{Error, Result};
use crate::expr::Expr;
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

// ============================================================================
// Groups and options
// ============================================================================

/// Selection cardinality policy of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    SingleSelect,
    MultiSelect,
    Optional,
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupType::SingleSelect => write!(f, "single_select"),
            GroupType::MultiSelect => write!(f, "multi_select"),
            GroupType::Optional => write!(f, "optional"),
        }
    }
}

/// A group of options with a selection cardinality policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    #[serde(default)]
    pub min_selections: u32,
    pub max_selections: u32,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Group {
    /// Single-select group; `required` makes exactly one selection mandatory
    pub fn single(id: &str, name: &str, required: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            group_type: GroupType::SingleSelect,
            min_selections: u32::from(required),
            max_selections: 1,
            display_order: 0,
            description: None,
        }
    }

    pub fn multi(id: &str, name: &str, min: u32, max: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            group_type: GroupType::MultiSelect,
            min_selections: min,
            max_selections: max,
            display_order: 0,
            description: None,
        }
    }

    pub fn optional(id: &str, name: &str, max: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            group_type: GroupType::Optional,
            min_selections: 0,
            max_selections: max,
            display_order: 0,
            description: None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.min_selections > 0
    }

    /// Check the cardinality invariants
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Error::InvalidGroup {
            group: self.id.clone(),
            reason,
        };
        if self.group_type == GroupType::SingleSelect && self.max_selections != 1 {
            return Err(fail(format!(
                "single-select group must have max_selections = 1, got {}",
                self.max_selections
            )));
        }
        if self.group_type == GroupType::Optional && self.min_selections != 0 {
            return Err(fail("optional group must have min_selections = 0".into()));
        }
        if self.min_selections > self.max_selections {
            return Err(fail(format!(
                "min_selections {} exceeds max_selections {}",
                self.min_selections, self.max_selections
            )));
        }
        Ok(())
    }
}

/// A selectable option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelOption {
    pub id: String,
    pub name: String,
    pub group_id: String,
    /// Unit price
    pub price: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModelOption {
    pub fn new(id: &str, name: &str, group_id: &str, price: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            group_id: group_id.to_string(),
            price,
            active: true,
            display_order: 0,
            description: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Business rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Requires,
    Excludes,
    Validation,
    Pricing,
}

impl RuleType {
    /// Rules of this type take part in the constraint network
    pub fn is_constraint(&self) -> bool {
        !matches!(self, RuleType::Pricing)
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleType::Requires => write!(f, "requires"),
            RuleType::Excludes => write!(f, "excludes"),
            RuleType::Validation => write!(f, "validation"),
            RuleType::Pricing => write!(f, "pricing"),
        }
    }
}

/// A boolean business rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Boolean expression over option identifiers
    pub expression: String,
    /// Execution-order hint (lower runs first); `None` until assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Message reported when the rule is violated
    #[serde(default)]
    pub message: String,
}

impl Rule {
    pub fn new(id: &str, rule_type: RuleType, expression: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            rule_type,
            expression: expression.to_string(),
            priority: None,
            active: true,
            message: String::new(),
        }
    }

    pub fn requires(id: &str, expression: &str) -> Self {
        Self::new(id, RuleType::Requires, expression)
    }

    pub fn excludes(id: &str, expression: &str) -> Self {
        Self::new(id, RuleType::Excludes, expression)
    }

    pub fn validation(id: &str, expression: &str) -> Self {
        Self::new(id, RuleType::Validation, expression)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Stored message, or a generated one when none was configured
    pub fn violation_message(&self) -> String {
        if self.message.is_empty() {
            format!("Rule '{}' is violated", self.display_name())
        } else {
            self.message.clone()
        }
    }
}

/// Price rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriceRuleType {
    FixedDiscount,
    PercentDiscount,
    Surcharge,
    VolumeTier,
}

impl std::fmt::Display for PriceRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceRuleType::FixedDiscount => write!(f, "fixed_discount"),
            PriceRuleType::PercentDiscount => write!(f, "percent_discount"),
            PriceRuleType::Surcharge => write!(f, "surcharge"),
            PriceRuleType::VolumeTier => write!(f, "volume_tier"),
        }
    }
}

/// A pricing rule
///
/// `value` is an amount for fixed discounts and surcharges, a percentage for
/// percent discounts, and a price multiplier for volume tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: PriceRuleType,
    /// Condition under which the rule applies; absent means always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<u32>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl PriceRule {
    fn base(id: &str, rule_type: PriceRuleType, value: f64, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            rule_type,
            expression: None,
            value,
            min_quantity: None,
            max_quantity: None,
            priority,
            active: true,
        }
    }

    pub fn fixed_discount(id: &str, amount: f64, priority: i32) -> Self {
        Self::base(id, PriceRuleType::FixedDiscount, amount, priority)
    }

    pub fn percent_discount(id: &str, percent: f64, priority: i32) -> Self {
        Self::base(id, PriceRuleType::PercentDiscount, percent, priority)
    }

    pub fn surcharge(id: &str, amount: f64, priority: i32) -> Self {
        Self::base(id, PriceRuleType::Surcharge, amount, priority)
    }

    /// Volume tier covering `[min, max]`; `max = None` is open-ended
    pub fn volume_tier(id: &str, min: u32, max: Option<u32>, multiplier: f64) -> Self {
        let mut rule = Self::base(id, PriceRuleType::VolumeTier, multiplier, 0);
        rule.min_quantity = Some(min);
        rule.max_quantity = max;
        rule
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn when(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// View a volume-tier rule as a tier
    pub fn as_volume_tier(&self) -> Option<VolumeTier> {
        if self.rule_type != PriceRuleType::VolumeTier {
            return None;
        }
        Some(VolumeTier {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            min_quantity: self.min_quantity.unwrap_or(0),
            max_quantity: self.max_quantity,
            multiplier: self.value,
            priority: self.priority,
        })
    }
}

/// A quantity range with a price multiplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VolumeTier {
    pub id: String,
    pub name: String,
    pub min_quantity: u32,
    pub max_quantity: Option<u32>,
    pub multiplier: f64,
    pub priority: i32,
}

impl VolumeTier {
    pub fn contains(&self, quantity: u32) -> bool {
        quantity >= self.min_quantity && self.max_quantity.is_none_or(|max| quantity <= max)
    }

    /// Discount expressed in percent (0.95 multiplier = 5%)
    pub fn discount_percent(&self) -> f64 {
        (1.0 - self.multiplier) * 100.0
    }
}

// ============================================================================
// Model
// ============================================================================

/// A complete product model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "CPQ Model", description = "Product configuration model")]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub options: Vec<ModelOption>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub price_rules: Vec<PriceRule>,
}

impl Model {
    pub fn builder(id: &str, name: &str) -> ModelBuilder {
        ModelBuilder::new(id, name)
    }

    /// Parse a model from YAML and validate it
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let model: Model = serde_norway::from_str(yaml)?;
        model.validate()?;
        Ok(model)
    }

    /// Load a model from a YAML or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            let model: Model = serde_json::from_str(&content)?;
            model.validate()?;
            Ok(model)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_norway::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the structural invariants of the model
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidModel("model id is empty".into()));
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "duplicate group id '{}'",
                    group.id
                )));
            }
            group.validate()?;
        }

        let mut option_ids = HashSet::new();
        for option in &self.options {
            if !option_ids.insert(option.id.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "duplicate option id '{}'",
                    option.id
                )));
            }
            if !group_ids.contains(option.group_id.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "option '{}' references undeclared group '{}'",
                    option.id, option.group_id
                )));
            }
            if !option.price.is_finite() {
                return Err(Error::InvalidModel(format!(
                    "option '{}' has a non-finite price",
                    option.id
                )));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
        }

        let mut price_rule_ids = HashSet::new();
        for rule in &self.price_rules {
            if !price_rule_ids.insert(rule.id.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "duplicate price rule id '{}'",
                    rule.id
                )));
            }
            if !rule.value.is_finite() {
                return Err(Error::InvalidModel(format!(
                    "price rule '{}' has a non-finite value",
                    rule.id
                )));
            }
        }

        let rule_texts = self
            .rules
            .iter()
            .map(|r| (r.id.as_str(), Some(r.expression.as_str())));
        let price_texts = self
            .price_rules
            .iter()
            .map(|r| (r.id.as_str(), r.expression.as_deref()));
        for (rule_id, text) in rule_texts.chain(price_texts) {
            let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
                continue;
            };
            if let Some(identifier) = undeclared_identifier(text, &option_ids, &group_ids) {
                return Err(Error::InvalidModel(format!(
                    "rule '{}' references undeclared identifier '{}'",
                    rule_id, identifier
                )));
            }
        }

        Ok(())
    }

    pub fn option(&self, id: &str) -> Option<&ModelOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn price_rule(&self, id: &str) -> Option<&PriceRule> {
        self.price_rules.iter().find(|r| r.id == id)
    }

    /// Active options of a group, in display order
    pub fn active_options_in_group(&self, group_id: &str) -> Vec<&ModelOption> {
        let mut options: Vec<&ModelOption> = self
            .options
            .iter()
            .filter(|o| o.group_id == group_id && o.active)
            .collect();
        options.sort_by_key(|o| o.display_order);
        options
    }

    /// Active rules that take part in the constraint network
    pub fn constraint_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.active && r.rule_type.is_constraint())
    }

    /// Volume tiers declared through price rules, ordered by lower bound
    pub fn volume_tiers(&self) -> Vec<VolumeTier> {
        let mut tiers: Vec<VolumeTier> = self
            .price_rules
            .iter()
            .filter(|r| r.active)
            .filter_map(PriceRule::as_volume_tier)
            .collect();
        tiers.sort_by_key(|t| t.min_quantity);
        tiers
    }

    /// Stable content hash identifying this model version
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("sha256:{}", hex::encode(&hasher.finalize()[..8]))
    }

    /// Copy of this model with a different rule list (used for what-if analysis)
    pub fn with_rules(&self, rules: Vec<Rule>) -> Model {
        Model {
            rules,
            ..self.clone()
        }
    }

    pub fn with_price_rules(&self, price_rules: Vec<PriceRule>) -> Model {
        Model {
            price_rules,
            ..self.clone()
        }
    }
}

/// First identifier in `text` that names neither an option, a group nor a
/// pseudo-variable. Unparsable text is left to the compilation policy.
fn undeclared_identifier(
    text: &str,
    option_ids: &HashSet<&str>,
    group_ids: &HashSet<&str>,
) -> Option<String> {
    let expr = crate::expr::parse_expr(text).ok()?;
    let mut found = None;
    expr.walk(&mut |node| {
        let unknown = match node {
            Expr::Ident(name)
                if !option_ids.contains(name.as_str())
                    && !group_ids.contains(name.as_str())
                    && !name.strip_prefix("customer.").is_some_and(|a| !a.is_empty()) =>
            {
                Some(name)
            }
            Expr::Compare { var, .. }
                if !matches!(var.as_str(), "quantity" | "price")
                    && !group_ids.contains(var.as_str()) =>
            {
                Some(var)
            }
            _ => None,
        };
        if let (None, Some(name)) = (&found, unknown) {
            found = Some(name.clone());
        }
    });
    found
}

/// Builder for `Model`; `build` validates the result
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            model: Model {
                id: id.to_string(),
                name: name.to_string(),
                version: 1,
                description: None,
                groups: Vec::new(),
                options: Vec::new(),
                rules: Vec::new(),
                price_rules: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.model.version = version;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.model.description = Some(description.to_string());
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.model.groups.push(group);
        self
    }

    pub fn option(mut self, option: ModelOption) -> Self {
        self.model.options.push(option);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.model.rules.push(rule);
        self
    }

    pub fn price_rule(mut self, rule: PriceRule) -> Self {
        self.model.price_rules.push(rule);
        self
    }

    pub fn build(self) -> Result<Model> {
        self.model.validate()?;
        Ok(self.model)
    }
}

// ============================================================================
// Configurations
// ============================================================================

/// One selected option with its quantity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Selection {
    pub option_id: String,
    pub quantity: u32,
}

impl Selection {
    pub fn new(option_id: &str, quantity: u32) -> Self {
        Self {
            option_id: option_id.to_string(),
            quantity,
        }
    }

    pub fn one(option_id: &str) -> Self {
        Self::new(option_id, 1)
    }
}

/// Order-independent hash of a selection set
pub fn selections_fingerprint(selections: &[Selection]) -> String {
    let mut parts: Vec<String> = selections
        .iter()
        .map(|s| format!("{}:{}", s.option_id, s.quantity))
        .collect();
    parts.sort();
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// A customer's configuration of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Configuration {
    pub id: String,
    pub model_id: String,
    #[serde(default)]
    pub selections: Vec<Selection>,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Configuration {
    pub fn new(model_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            selections: Vec::new(),
            is_valid: false,
            total_price: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn selection(&self, option_id: &str) -> Option<&Selection> {
        self.selections.iter().find(|s| s.option_id == option_id)
    }

    pub fn is_selected(&self, option_id: &str) -> bool {
        self.selection(option_id).is_some()
    }

    /// Insert or replace the selection for an option
    pub fn upsert(&mut self, option_id: &str, quantity: u32) {
        match self.selections.iter_mut().find(|s| s.option_id == option_id) {
            Some(existing) => existing.quantity = quantity,
            None => self.selections.push(Selection::new(option_id, quantity)),
        }
        self.touch();
    }

    /// Remove an option; returns whether it was selected
    pub fn remove(&mut self, option_id: &str) -> bool {
        let before = self.selections.len();
        self.selections.retain(|s| s.option_id != option_id);
        let removed = self.selections.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.selections.clear();
        self.touch();
    }

    pub fn total_quantity(&self) -> u32 {
        self.selections.iter().map(|s| s.quantity).sum()
    }

    pub fn fingerprint(&self) -> String {
        selections_fingerprint(&self.selections)
    }

    /// Copy with a fresh identity and timestamps but the same selections
    pub fn clone_with_new_identity(&self) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Customer information used for bonuses and `customer.*` identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CustomerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Segment name, matched case-insensitively against configured rates
    #[serde(default = "default_segment")]
    pub segment: String,
    /// Volume purchased historically (currency units)
    #[serde(default)]
    pub historical_volume: f64,
    #[serde(default)]
    pub loyalty_years: u32,
    /// Date used for seasonal bonuses; today when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_date: Option<NaiveDate>,
    /// Free-form boolean attributes addressable as `customer.<name>`
    #[serde(default)]
    pub attributes: BTreeMap<String, bool>,
}

fn default_segment() -> String {
    "standard".to_string()
}

impl Default for CustomerContext {
    fn default() -> Self {
        Self {
            customer_id: None,
            segment: default_segment(),
            historical_volume: 0.0,
            loyalty_years: 0,
            order_date: None,
            attributes: BTreeMap::new(),
        }
    }
}

impl CustomerContext {
    pub fn segment(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Default::default()
        }
    }

    /// Value of a `customer.<name>` identifier
    pub fn attribute(&self, name: &str) -> bool {
        if let Some(segment) = name.strip_prefix("segment_") {
            return self.segment.eq_ignore_ascii_case(segment);
        }
        self.attributes.get(name).copied().unwrap_or(false)
    }

    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> ModelBuilder {
        Model::builder("m1", "Sample")
            .group(Group::single("base", "Base", true))
            .option(ModelOption::new("opt1", "Option 1", "base", 100.0))
            .option(ModelOption::new("opt2", "Option 2", "base", 50.0))
    }

    #[test]
    fn test_builder_builds_valid_model() {
        let model = sample_model().build().unwrap();
        assert_eq!(model.options.len(), 2);
        assert_eq!(model.version, 1);
        assert!(model.option("opt1").is_some());
    }

    #[test]
    fn test_option_with_unknown_group_rejected() {
        let result = sample_model()
            .option(ModelOption::new("x", "X", "missing", 1.0))
            .build();
        assert!(matches!(result, Err(Error::InvalidModel(_))));
    }

    #[test]
    fn test_single_select_cardinality_enforced() {
        let mut group = Group::single("g", "G", true);
        group.max_selections = 2;
        assert!(matches!(group.validate(), Err(Error::InvalidGroup { .. })));
    }

    #[test]
    fn test_min_exceeding_max_rejected() {
        let group = Group::multi("g", "G", 3, 2);
        assert!(group.validate().is_err());
    }

    #[test]
    fn test_duplicate_option_rejected() {
        let result = sample_model()
            .option(ModelOption::new("opt1", "Dup", "base", 1.0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_with_undeclared_identifier_rejected() {
        let result = sample_model()
            .rule(Rule::requires("R1", "opt1 -> opt22"))
            .build();
        match result {
            Err(Error::InvalidModel(msg)) => {
                assert!(msg.contains("R1"));
                assert!(msg.contains("opt22"));
            }
            other => panic!("expected InvalidModel, got {:?}", other),
        }

        let priced = sample_model()
            .price_rule(PriceRule::surcharge("S1", 5.0, 1).when("qty >= 3"))
            .build();
        assert!(matches!(priced, Err(Error::InvalidModel(_))));
    }

    #[test]
    fn test_rule_pseudo_variables_accepted() {
        let model = sample_model()
            .rule(Rule::validation("V1", "quantity >= 2 -> customer.vip"))
            .rule(Rule::validation("V2", "base > 0 || price < 500"))
            .price_rule(PriceRule::percent_discount("P1", 5.0, 1).when("base && opt2"))
            .build();
        assert!(model.is_ok());

        // Unparsable text is left to the compilation policy
        let broken = sample_model().rule(Rule::requires("R1", "opt1 -> (")).build();
        assert!(broken.is_ok());
    }

    #[test]
    fn test_yaml_round_trip_preserves_model() {
        let model = sample_model()
            .rule(Rule::requires("R1", "opt1 -> opt2"))
            .price_rule(PriceRule::volume_tier("T1", 1, Some(10), 1.0))
            .build()
            .unwrap();
        let yaml = model.to_yaml().unwrap();
        let parsed = Model::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = r#"
id: m
name: M
groups:
  - id: g
    name: G
    type: multi_select
    max_selections: 3
options:
  - id: a
    name: A
    group_id: g
    price: 10
rules:
  - id: R1
    type: requires
    expression: "a -> a"
"#;
        let model = Model::from_yaml(yaml).unwrap();
        assert!(model.options[0].active);
        assert!(model.rules[0].active);
        assert_eq!(model.rules[0].priority, None);
        assert_eq!(model.groups[0].min_selections, 0);
    }

    #[test]
    fn test_volume_tiers_sorted() {
        let model = sample_model()
            .price_rule(PriceRule::volume_tier("T2", 11, Some(50), 0.95))
            .price_rule(PriceRule::volume_tier("T1", 1, Some(10), 1.0))
            .build()
            .unwrap();
        let tiers = model.volume_tiers();
        assert_eq!(tiers[0].id, "T1");
        assert!(tiers[1].contains(11));
        assert!(!tiers[1].contains(51));
    }

    #[test]
    fn test_selection_fingerprint_is_order_independent() {
        let a = vec![Selection::one("x"), Selection::new("y", 2)];
        let b = vec![Selection::new("y", 2), Selection::one("x")];
        assert_eq!(selections_fingerprint(&a), selections_fingerprint(&b));
        let c = vec![Selection::new("y", 3), Selection::one("x")];
        assert_ne!(selections_fingerprint(&a), selections_fingerprint(&c));
    }

    #[test]
    fn test_fingerprint_keeps_repeated_selections() {
        let once = vec![Selection::one("a")];
        let twice = vec![Selection::one("a"), Selection::one("a")];
        assert_ne!(selections_fingerprint(&once), selections_fingerprint(&twice));
    }

    #[test]
    fn test_configuration_upsert_and_clone() {
        let mut config = Configuration::new("m1");
        config.upsert("a", 1);
        config.upsert("a", 3);
        assert_eq!(config.selections.len(), 1);
        assert_eq!(config.total_quantity(), 3);

        let copy = config.clone_with_new_identity();
        assert_ne!(copy.id, config.id);
        assert_eq!(copy.selections, config.selections);
        assert!(config.remove("a"));
        assert!(!config.remove("a"));
    }

    #[test]
    fn test_customer_segment_attribute() {
        let customer = CustomerContext::segment("Enterprise");
        assert!(customer.attribute("segment_enterprise"));
        assert!(!customer.attribute("segment_premium"));
        assert!(!customer.attribute("unknown"));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = sample_model().build().unwrap();
        let b = sample_model()
            .rule(Rule::requires("R1", "opt1 -> opt2"))
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("sha256:"));
    }
}
