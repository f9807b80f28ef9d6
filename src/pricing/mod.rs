//! Pricing / volume calculator
//!
//! Adjustments are applied sequentially to a running total:
//!
//! 1. base price: option price × quantity over active, known, non-zero selections
//! 2. volume tier: `base × (multiplier - 1)` for the tier of the total quantity
//!    (or per line, see [`TierScope`])
//! 3. price rules in ascending priority (ties by ID), each against the running total
//! 4. customer bonuses, when a customer context is given
//!
//! Discounts are negative amounts, surcharges positive. Rounding happens once,
//! on the final total.

pub mod customer;

pub use customer::customer_adjustments;

use crate::bdd::{Bdd, NodeId};
use crate::cache::{CacheStats, Sweepable, TtlCache};
use crate::compiler::{RuleCompiler, TierCompiler};
use crate::config::{CompilationPolicy, EngineConfig, PricingConfig, TierScope};
use crate::engine::Assignment;
use crate::error::{Error, Result};
use crate::model::{
    selections_fingerprint, CustomerContext, Model, PriceRule, PriceRuleType, Selection, VolumeTier,
};
use crate::registry::VariableRegistry;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Source of one price adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    VolumeTier,
    FixedDiscount,
    PercentDiscount,
    Surcharge,
    CustomerSegment,
    VolumeHistory,
    Loyalty,
    Seasonal,
}

impl std::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdjustmentType::VolumeTier => "volume_tier",
            AdjustmentType::FixedDiscount => "fixed_discount",
            AdjustmentType::PercentDiscount => "percent_discount",
            AdjustmentType::Surcharge => "surcharge",
            AdjustmentType::CustomerSegment => "customer_segment",
            AdjustmentType::VolumeHistory => "volume_history",
            AdjustmentType::Loyalty => "loyalty",
            AdjustmentType::Seasonal => "seasonal",
        };
        write!(f, "{}", s)
    }
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceAdjustment {
    #[serde(rename = "type")]
    pub adjustment_type: AdjustmentType,
    /// Negative for discounts, positive for surcharges
    pub amount: f64,
    pub rule_name: String,
    pub description: String,
}

/// Priced selection set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceBreakdown {
    pub base_price: f64,
    pub adjustments: Vec<PriceAdjustment>,
    /// Tier of the total quantity (order scope) or of the largest line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<VolumeTier>,
    pub total_quantity: u32,
    pub total: f64,
    #[serde(default)]
    pub cached: bool,
}

impl PriceBreakdown {
    fn empty() -> Self {
        Self {
            base_price: 0.0,
            adjustments: Vec::new(),
            tier: None,
            total_quantity: 0,
            total: 0.0,
            cached: false,
        }
    }

    /// Sum of all adjustment amounts
    pub fn total_adjustment(&self) -> f64 {
        self.adjustments.iter().map(|a| a.amount).sum()
    }
}

impl std::fmt::Display for PriceBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Base price: {:.2} ({} unit(s))", self.base_price, self.total_quantity)?;
        for adjustment in &self.adjustments {
            writeln!(
                f,
                "  {:>+10.2}  {} [{}] {}",
                adjustment.amount, adjustment.rule_name, adjustment.adjustment_type, adjustment.description
            )?;
        }
        writeln!(f, "Total: {:.2}", self.total)
    }
}

/// Calculator counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PricingStats {
    pub calculations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub tier_cache: CacheStats,
}

struct ConditionalRule {
    rule: PriceRule,
    condition: Option<NodeId>,
}

/// Prices selection sets of one model
pub struct PricingCalculator {
    model: Arc<Model>,
    compiler: Arc<RuleCompiler>,
    tiers: TierCompiler,
    rules: Vec<ConditionalRule>,
    config: PricingConfig,
    cache: Arc<TtlCache<String, PriceBreakdown>>,
    calculations: AtomicU64,
}

impl std::fmt::Debug for PricingCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingCalculator")
            .field("model", &self.model.id)
            .field("tiers", &self.tiers)
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

impl PricingCalculator {
    pub fn new(model: Arc<Model>, config: &EngineConfig) -> Result<Self> {
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

        let tiers = TierCompiler::new(
            model.volume_tiers(),
            compiler.clone(),
            config.pricing.open_ended_top_tier,
            config.cache.tier_ttl(),
            config.cache.max_bytes,
        )?;

        let mut ordered: Vec<&PriceRule> = model
            .price_rules
            .iter()
            .filter(|r| r.active && r.rule_type != PriceRuleType::VolumeTier)
            .collect();
        ordered.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));

        let mut rules = Vec::with_capacity(ordered.len());
        for rule in ordered {
            let condition = match rule.expression.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(text) => match compiler.compile_condition(&rule.id, text) {
                    Ok(compiled) => Some(compiled.handle),
                    Err(e) if config.compilation_policy == CompilationPolicy::Strict => {
                        return Err(Error::Compilation {
                            rule: rule.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(rule = %rule.id, error = %e, "Price rule excluded");
                        continue;
                    }
                },
            };
            rules.push(ConditionalRule {
                rule: rule.clone(),
                condition,
            });
        }

        info!(
            model = %model.id,
            tiers = model.volume_tiers().len(),
            price_rules = rules.len(),
            "Pricing calculator ready"
        );

        Ok(Self {
            model,
            compiler,
            tiers,
            rules,
            config: config.pricing.clone(),
            cache: Arc::new(TtlCache::new(
                "pricing",
                config.cache.pricing_ttl(),
                config.cache.max_bytes,
            )),
            calculations: AtomicU64::new(0),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn tier_compiler(&self) -> &TierCompiler {
        &self.tiers
    }

    pub fn calculate_price(&self, selections: &[Selection]) -> Result<PriceBreakdown> {
        self.calculate(selections, None)
    }

    pub fn calculate_price_for(
        &self,
        selections: &[Selection],
        customer: &CustomerContext,
    ) -> Result<PriceBreakdown> {
        self.calculate(selections, Some(customer))
    }

    /// Price a selection set; unknown, inactive and zero-quantity selections are skipped
    pub fn calculate(
        &self,
        selections: &[Selection],
        customer: Option<&CustomerContext>,
    ) -> Result<PriceBreakdown> {
        self.calculations.fetch_add(1, Ordering::Relaxed);
        let today = chrono::Local::now().date_naive();
        let key = match customer {
            Some(c) => format!("{}:{}:{}", selections_fingerprint(selections), c.fingerprint(), today),
            None => selections_fingerprint(selections),
        };
        if let Some(mut hit) = self.cache.get(&key)? {
            debug!(model = %self.model.id, "Pricing cache hit");
            hit.cached = true;
            return Ok(hit);
        }

        let priced: Vec<Selection> = selections
            .iter()
            .filter(|s| s.quantity > 0)
            .filter(|s| self.model.option(&s.option_id).is_some_and(|o| o.active))
            .cloned()
            .collect();

        let mut breakdown = PriceBreakdown::empty();
        for selection in &priced {
            if let Some(option) = self.model.option(&selection.option_id) {
                breakdown.base_price += option.price * f64::from(selection.quantity);
                breakdown.total_quantity += selection.quantity;
            }
        }
        let mut running = breakdown.base_price;

        running += self.apply_tiers(&priced, &mut breakdown)?;

        let assignment = {
            let registry = self.compiler.registry().read()?;
            Assignment::build(&registry, &self.model, &priced, customer)?
        };
        for conditional in &self.rules {
            let rule = &conditional.rule;
            if !self.rule_applies(conditional, &assignment, breakdown.total_quantity)? {
                continue;
            }
            let (kind, amount, description) = match rule.rule_type {
                PriceRuleType::FixedDiscount => (
                    AdjustmentType::FixedDiscount,
                    -rule.value,
                    format!("{:.2} off", rule.value),
                ),
                PriceRuleType::PercentDiscount => (
                    AdjustmentType::PercentDiscount,
                    -(running * rule.value / 100.0),
                    format!("{}% off {:.2}", rule.value, running),
                ),
                PriceRuleType::Surcharge => (
                    AdjustmentType::Surcharge,
                    rule.value,
                    format!("{:.2} surcharge", rule.value),
                ),
                PriceRuleType::VolumeTier => continue,
            };
            running += amount;
            breakdown.adjustments.push(PriceAdjustment {
                adjustment_type: kind,
                amount,
                rule_name: rule.display_name().to_string(),
                description,
            });
        }

        if let Some(customer) = customer {
            let bonuses = customer_adjustments(running, customer, &self.config.customer, today);
            running += bonuses.iter().map(|b| b.amount).sum::<f64>();
            breakdown.adjustments.extend(bonuses);
        }

        breakdown.total = round_to(running.max(0.0), self.config.rounding_precision);
        self.cache.set(key, breakdown.clone())?;
        Ok(breakdown)
    }

    /// Tier governing a total quantity
    pub fn determine_tier(&self, quantity: u32) -> Result<Option<VolumeTier>> {
        self.tiers.determine_tier(quantity)
    }

    pub fn stats(&self) -> PricingStats {
        let cache = self.cache.stats();
        PricingStats {
            calculations: self.calculations.load(Ordering::Relaxed),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_evictions: cache.evictions,
            tier_cache: self.tiers.cache_stats(),
        }
    }

    pub fn sweepables(&self) -> Vec<Arc<dyn Sweepable>> {
        vec![self.cache.clone() as Arc<dyn Sweepable>, self.tiers.sweepable()]
    }

    pub fn invalidate_cache(&self) -> Result<usize> {
        self.cache.clear()
    }

    fn apply_tiers(&self, priced: &[Selection], breakdown: &mut PriceBreakdown) -> Result<f64> {
        if self.tiers.is_empty() {
            return Ok(0.0);
        }
        let mut delta = 0.0;
        match self.config.tier_scope {
            TierScope::Order => {
                let tier = self.tiers.determine_tier(breakdown.total_quantity)?;
                if let Some(tier) = &tier {
                    let amount = breakdown.base_price * (tier.multiplier - 1.0);
                    if amount != 0.0 {
                        delta += amount;
                        breakdown.adjustments.push(tier_adjustment(tier, amount, breakdown.total_quantity));
                    }
                }
                breakdown.tier = tier;
            }
            TierScope::PerLine => {
                let mut largest = 0;
                for selection in priced {
                    let Some(option) = self.model.option(&selection.option_id) else {
                        continue;
                    };
                    let Some(tier) = self.tiers.determine_tier(selection.quantity)? else {
                        continue;
                    };
                    let line = option.price * f64::from(selection.quantity);
                    let amount = line * (tier.multiplier - 1.0);
                    if amount != 0.0 {
                        delta += amount;
                        let mut adjustment = tier_adjustment(&tier, amount, selection.quantity);
                        adjustment.description = format!("{} on '{}'", adjustment.description, option.id);
                        breakdown.adjustments.push(adjustment);
                    }
                    if selection.quantity > largest {
                        largest = selection.quantity;
                        breakdown.tier = Some(tier);
                    }
                }
            }
        }
        Ok(delta)
    }

    fn rule_applies(
        &self,
        conditional: &ConditionalRule,
        assignment: &Assignment,
        quantity: u32,
    ) -> Result<bool> {
        let rule = &conditional.rule;
        if rule.min_quantity.is_some_and(|min| quantity < min)
            || rule.max_quantity.is_some_and(|max| quantity > max)
        {
            return Ok(false);
        }
        match conditional.condition {
            None => Ok(true),
            Some(handle) => self.compiler.bdd().read()?.eval(handle, assignment.bits()),
        }
    }
}

fn tier_adjustment(tier: &VolumeTier, amount: f64, quantity: u32) -> PriceAdjustment {
    PriceAdjustment {
        adjustment_type: AdjustmentType::VolumeTier,
        amount,
        rule_name: tier.name.clone(),
        description: format!("x{} for quantity {}", tier.multiplier, quantity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ModelOption};

    fn model(price_rules: Vec<PriceRule>) -> Arc<Model> {
        let mut builder = Model::builder("widget", "Widget")
            .group(Group::multi("parts", "Parts", 0, 3))
            .option(ModelOption::new("w", "Widget", "parts", 100.0))
            .option(ModelOption::new("gadget", "Gadget", "parts", 20.0))
            .option(ModelOption::new("old", "Old", "parts", 5.0).inactive());
        for rule in price_rules {
            builder = builder.price_rule(rule);
        }
        Arc::new(builder.build().unwrap())
    }

    fn tiered() -> PricingCalculator {
        PricingCalculator::new(
            model(vec![
                PriceRule::volume_tier("T1", 1, Some(10), 1.0),
                PriceRule::volume_tier("T2", 11, Some(50), 0.95),
            ]),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_tier_boundaries() {
        let calc = tiered();
        assert_eq!(calc.calculate_price(&[Selection::new("w", 10)]).unwrap().total, 1000.0);
        assert_eq!(calc.calculate_price(&[Selection::new("w", 11)]).unwrap().total, 1045.0);
        let fifteen = calc.calculate_price(&[Selection::new("w", 15)]).unwrap();
        assert_eq!(fifteen.total, 1425.0);
        assert_eq!(fifteen.tier.as_ref().map(|t| t.id.as_str()), Some("T2"));
        assert_eq!(fifteen.adjustments[0].adjustment_type, AdjustmentType::VolumeTier);
        assert!((fifteen.adjustments[0].amount + 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_skips_unknown_inactive_and_zero() {
        let calc = tiered();
        let breakdown = calc
            .calculate_price(&[
                Selection::new("w", 1),
                Selection::new("ghost", 3),
                Selection::new("old", 2),
                Selection::new("gadget", 0),
            ])
            .unwrap();
        assert_eq!(breakdown.base_price, 100.0);
        assert_eq!(breakdown.total_quantity, 1);
    }

    #[test]
    fn test_sequential_adjustments() {
        let calc = PricingCalculator::new(
            model(vec![
                PriceRule::percent_discount("P10", 10.0, 2),
                PriceRule::fixed_discount("F50", 50.0, 1),
            ]),
            &EngineConfig::default(),
        )
        .unwrap();
        let breakdown = calc.calculate_price(&[Selection::new("w", 10)]).unwrap();
        let names: Vec<&str> = breakdown.adjustments.iter().map(|a| a.rule_name.as_str()).collect();
        assert_eq!(names, vec!["F50", "P10"]);
        assert!((breakdown.adjustments[1].amount + 95.0).abs() < 1e-9);
        assert_eq!(breakdown.total, 855.0);
    }

    #[test]
    fn test_equal_priorities_apply_in_id_order() {
        let calc = PricingCalculator::new(
            model(vec![
                PriceRule::fixed_discount("Z_FIXED", 50.0, 1),
                PriceRule::percent_discount("A_PCT", 10.0, 1),
            ]),
            &EngineConfig::default(),
        )
        .unwrap();
        let breakdown = calc.calculate_price(&[Selection::new("w", 10)]).unwrap();
        let names: Vec<&str> = breakdown.adjustments.iter().map(|a| a.rule_name.as_str()).collect();
        assert_eq!(names, vec!["A_PCT", "Z_FIXED"]);
        // 1000 * 0.9 - 50
        assert_eq!(breakdown.total, 850.0);
    }

    #[test]
    fn test_conditional_rule_and_surcharge() {
        let calc = PricingCalculator::new(
            model(vec![
                PriceRule::surcharge("S", 15.0, 1).when("gadget"),
                PriceRule::percent_discount("BULK", 5.0, 2).when("quantity >= 5"),
            ]),
            &EngineConfig::default(),
        )
        .unwrap();
        let plain = calc.calculate_price(&[Selection::one("w")]).unwrap();
        assert!(plain.adjustments.is_empty());

        let with_gadget = calc
            .calculate_price(&[Selection::one("w"), Selection::new("gadget", 4)])
            .unwrap();
        // 180 + 15 surcharge, then 5% of 195
        assert_eq!(with_gadget.adjustments.len(), 2);
        assert_eq!(with_gadget.total, 185.25);
    }

    #[test]
    fn test_per_line_tiers() {
        let mut config = EngineConfig::default();
        config.pricing.tier_scope = TierScope::PerLine;
        let calc = PricingCalculator::new(
            model(vec![
                PriceRule::volume_tier("T1", 1, Some(10), 1.0),
                PriceRule::volume_tier("T2", 11, Some(50), 0.9),
            ]),
            &config,
        )
        .unwrap();
        let breakdown = calc
            .calculate_price(&[Selection::new("w", 5), Selection::new("gadget", 20)])
            .unwrap();
        // Only the gadget line reaches T2: 400 * 0.9
        assert_eq!(breakdown.total, 860.0);
        assert_eq!(breakdown.tier.as_ref().map(|t| t.id.as_str()), Some("T2"));
    }

    #[test]
    fn test_customer_bonus_layered_last() {
        let calc = tiered();
        let customer = CustomerContext {
            segment: "enterprise".into(),
            order_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let breakdown = calc.calculate_price_for(&[Selection::new("w", 10)], &customer).unwrap();
        assert_eq!(breakdown.total, 900.0);
        assert_eq!(
            breakdown.adjustments.last().map(|a| a.adjustment_type),
            Some(AdjustmentType::CustomerSegment)
        );
    }

    #[test]
    fn test_cache_counters() {
        let calc = tiered();
        calc.calculate_price(&[Selection::new("w", 2), Selection::one("gadget")]).unwrap();
        let second = calc
            .calculate_price(&[Selection::one("gadget"), Selection::new("w", 2)])
            .unwrap();
        assert!(second.cached);
        let stats = calc.stats();
        assert_eq!(stats.calculations, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_rounding_on_final_total_only() {
        let calc = PricingCalculator::new(
            model(vec![PriceRule::percent_discount("THIRD", 33.333, 1)]),
            &EngineConfig::default(),
        )
        .unwrap();
        let breakdown = calc.calculate_price(&[Selection::one("gadget")]).unwrap();
        assert_eq!(breakdown.total, 13.33);
        assert!((breakdown.adjustments[0].amount + 6.6666).abs() < 1e-9);
    }

    #[test]
    fn test_uncompilable_condition_follows_policy() {
        let rules = vec![PriceRule::fixed_discount("BROKEN", 10.0, 1).when("w && (")];

        let degraded = PricingCalculator::new(model(rules.clone()), &EngineConfig::default()).unwrap();
        let breakdown = degraded.calculate_price(&[Selection::one("w")]).unwrap();
        assert!(breakdown.adjustments.is_empty());
        assert_eq!(breakdown.total, 100.0);

        let mut strict = EngineConfig::default();
        strict.compilation_policy = CompilationPolicy::Strict;
        assert!(matches!(
            PricingCalculator::new(model(rules), &strict),
            Err(Error::Compilation { .. })
        ));
    }
}
