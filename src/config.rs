//! Engine configuration
//!
//! One `EngineConfig` drives every per-model engine: compilation policy,
//! cache lifetimes, suggestion limits, pricing policy, priority spacing and
//! impact-analysis weights. Every field has a default, so an empty YAML
//! document is a valid configuration.
//!
//! ```yaml
//! compilation_policy: strict
//! cache:
//!   validation_ttl_ms: 60000
//! pricing:
//!   rounding_precision: 2
//!   tier_scope: per_line
//! priority:
//!   gap: 5
//!   manual_overrides:
//!     R-legacy: 1
//! ```

use crate::error::{Error, Result};
use crate::registry::VarRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// What happens when a rule expression fails to compile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompilationPolicy {
    /// Record the failure, exclude the rule from the network, keep the model usable
    #[default]
    Degrade,
    /// Abort engine construction on the first failing rule
    Strict,
}

/// How the registry treats identifiers it has not seen before
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationMode {
    /// Identifiers must resolve to declared options or pseudo-variables
    #[default]
    Explicit,
    /// Unknown identifiers are declared on the fly as option booleans
    Implicit,
}

/// Which portion of the price a volume tier governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TierScope {
    /// Tier chosen from the total quantity, applied to the whole base price
    #[default]
    Order,
    /// Tier chosen per selection from its own quantity, applied to that line
    PerLine,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    pub compilation_policy: CompilationPolicy,
    pub declaration_mode: DeclarationMode,
    pub cache: CacheConfig,
    /// Maximum number of suggestions attached to a validation result
    pub max_suggestions: usize,
    /// Latency budget per operation; overruns are logged, never enforced
    pub response_time_budget_ms: u64,
    pub pricing: PricingConfig,
    pub priority: PriorityConfig,
    pub impact: ImpactConfig,
    /// Naming rules checked whenever a variable is declared
    pub naming_rules: Vec<NamingRuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compilation_policy: CompilationPolicy::default(),
            declaration_mode: DeclarationMode::default(),
            cache: CacheConfig::default(),
            max_suggestions: 5,
            response_time_budget_ms: 200,
            pricing: PricingConfig::default(),
            priority: PriorityConfig::default(),
            impact: ImpactConfig::default(),
            naming_rules: Vec::new(),
        }
    }
}

/// Cache lifetimes and budgets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CacheConfig {
    pub validation_ttl_ms: u64,
    pub pricing_ttl_ms: u64,
    pub tier_ttl_ms: u64,
    pub compiled_rule_capacity: usize,
    /// Byte budget per cache; least-recently-used entries are evicted beyond it
    pub max_bytes: usize,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            validation_ttl_ms: 5 * 60 * 1000,
            pricing_ttl_ms: 5 * 60 * 1000,
            tier_ttl_ms: 10 * 60 * 1000,
            compiled_rule_capacity: 4096,
            max_bytes: 8 * 1024 * 1024,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn validation_ttl(&self) -> Duration {
        Duration::from_millis(self.validation_ttl_ms)
    }

    pub fn pricing_ttl(&self) -> Duration {
        Duration::from_millis(self.pricing_ttl_ms)
    }

    pub fn tier_ttl(&self) -> Duration {
        Duration::from_millis(self.tier_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Pricing policy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PricingConfig {
    /// Decimal places applied to the final total only
    pub rounding_precision: u32,
    pub tier_scope: TierScope,
    /// Quantities above the highest tier use that tier
    pub open_ended_top_tier: bool,
    pub customer: CustomerBonusConfig,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rounding_precision: 2,
            tier_scope: TierScope::default(),
            open_ended_top_tier: true,
            customer: CustomerBonusConfig::default(),
        }
    }
}

/// Customer-context bonuses, all expressed in percent of the running total
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CustomerBonusConfig {
    pub segment_enabled: bool,
    pub volume_history_enabled: bool,
    pub loyalty_enabled: bool,
    pub seasonal_enabled: bool,
    /// Segment name (lowercase) to percent
    pub segment_rates: BTreeMap<String, f64>,
    pub volume_history_threshold: f64,
    pub volume_history_rate: f64,
    pub loyalty_rate_per_year: f64,
    pub loyalty_cap: f64,
    /// Months (1-12) in which the seasonal bonus applies
    pub seasonal_months: Vec<u32>,
    pub seasonal_rate: f64,
}

impl Default for CustomerBonusConfig {
    fn default() -> Self {
        let mut segment_rates = BTreeMap::new();
        segment_rates.insert("standard".to_string(), 0.0);
        segment_rates.insert("premium".to_string(), 5.0);
        segment_rates.insert("enterprise".to_string(), 10.0);
        Self {
            segment_enabled: true,
            volume_history_enabled: true,
            loyalty_enabled: true,
            seasonal_enabled: true,
            segment_rates,
            volume_history_threshold: 1000.0,
            volume_history_rate: 3.0,
            loyalty_rate_per_year: 0.5,
            loyalty_cap: 5.0,
            seasonal_months: vec![11, 12],
            seasonal_rate: 5.0,
        }
    }
}

/// Rule priority spacing
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PriorityConfig {
    pub validation_base: i32,
    pub constraint_base: i32,
    pub pricing_base: i32,
    /// Distance between consecutive auto-assigned priorities
    pub gap: i32,
    /// Gaps between neighbouring priorities wider than this are reported
    pub large_gap_threshold: i32,
    /// Rule ID to priority; always wins over auto-assignment
    pub manual_overrides: BTreeMap<String, i32>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            validation_base: 100,
            constraint_base: 200,
            pricing_base: 300,
            gap: 10,
            large_gap_threshold: 100,
            manual_overrides: BTreeMap::new(),
        }
    }
}

/// Impact-analysis sampling and scoring
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ImpactConfig {
    pub max_samples: usize,
    /// Maximum selections enumerated per group for combinatorial samples
    pub max_group_combinations: usize,
    /// Price differences below this are treated as unchanged
    pub price_tolerance: f64,
    pub broken_weight: f64,
    pub price_weight: f64,
    pub restriction_weight: f64,
    pub high_impact_threshold: f64,
    pub moderate_impact_threshold: f64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            max_samples: 500,
            max_group_combinations: 32,
            price_tolerance: 0.01,
            broken_weight: 0.5,
            price_weight: 0.3,
            restriction_weight: 0.2,
            high_impact_threshold: 50.0,
            moderate_impact_threshold: 20.0,
        }
    }
}

/// A naming rule applied at variable declaration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NamingRuleConfig {
    pub name: String,
    /// Regex the variable name must match
    pub pattern: String,
    /// Restrict the rule to one variable role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<VarRole>,
}

impl EngineConfig {
    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_norway::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Reject settings no engine can work with
    pub fn validate(&self) -> Result<()> {
        if self.pricing.rounding_precision > 10 {
            return Err(Error::Config(format!(
                "rounding_precision {} exceeds 10",
                self.pricing.rounding_precision
            )));
        }
        if self.priority.gap <= 0 {
            return Err(Error::Config("priority gap must be positive".into()));
        }
        let weights = [
            self.impact.broken_weight,
            self.impact.price_weight,
            self.impact.restriction_weight,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(Error::Config("impact weights must be non-negative".into()));
        }
        for rule in &self.naming_rules {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                Error::Config(format!("naming rule '{}': {}", rule.name, e))
            })?;
        }
        Ok(())
    }

    pub fn response_time_budget(&self) -> Duration {
        Duration::from_millis(self.response_time_budget_ms)
    }
}
