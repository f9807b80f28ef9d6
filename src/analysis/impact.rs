//! Rule-change impact analysis
//!
//! A proposed [`RuleChange`] is applied to a copy of the model, and a sample
//! of configurations is evaluated under both versions with private engines.
//!
//! Samples:
//! - every active option selected alone
//! - per group, each allowed combination of that group's options on top of a
//!   baseline that satisfies every group minimum
//!
//! Samples are deduplicated by their sorted option set and capped.
//!
//! Score (0-100) = 100 × (broken_weight × broken + price_weight × repriced +
//! restriction_weight × restricted) / samples

use crate::config::{EngineConfig, ImpactConfig};
use crate::engine::ConfigurationEngine;
use crate::error::{Error, Result};
use crate::model::{Model, PriceRule, Rule, Selection};
use crate::pricing::PricingCalculator;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

// ============================================================================
// Changes
// ============================================================================

/// A proposed edit to a model's rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleChange {
    AddRule { rule: Rule },
    RemoveRule { rule_id: String },
    ModifyRule { rule: Rule },
    AddPriceRule { rule: PriceRule },
    RemovePriceRule { rule_id: String },
    ModifyPriceRule { rule: PriceRule },
}

impl RuleChange {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_norway::from_str(yaml)?)
    }

    /// ID of the rule the change is about
    pub fn rule_id(&self) -> &str {
        match self {
            RuleChange::AddRule { rule } | RuleChange::ModifyRule { rule } => &rule.id,
            RuleChange::AddPriceRule { rule } | RuleChange::ModifyPriceRule { rule } => &rule.id,
            RuleChange::RemoveRule { rule_id } | RuleChange::RemovePriceRule { rule_id } => rule_id,
        }
    }

    /// Copy of `model` with the change applied
    pub fn apply(&self, model: &Model) -> Result<Model> {
        let mut rules = model.rules.clone();
        let mut price_rules = model.price_rules.clone();
        let missing = || Error::NotFound(format!("rule '{}'", self.rule_id()));

        match self {
            RuleChange::AddRule { rule } => {
                if model.rule(&rule.id).is_some() {
                    return Err(Error::AlreadyExists(format!("rule '{}'", rule.id)));
                }
                rules.push(rule.clone());
            }
            RuleChange::RemoveRule { rule_id } => {
                let before = rules.len();
                rules.retain(|r| &r.id != rule_id);
                if rules.len() == before {
                    return Err(missing());
                }
            }
            RuleChange::ModifyRule { rule } => {
                let slot = rules.iter_mut().find(|r| r.id == rule.id).ok_or_else(missing)?;
                *slot = rule.clone();
            }
            RuleChange::AddPriceRule { rule } => {
                if model.price_rule(&rule.id).is_some() {
                    return Err(Error::AlreadyExists(format!("price rule '{}'", rule.id)));
                }
                price_rules.push(rule.clone());
            }
            RuleChange::RemovePriceRule { rule_id } => {
                let before = price_rules.len();
                price_rules.retain(|r| &r.id != rule_id);
                if price_rules.len() == before {
                    return Err(missing());
                }
            }
            RuleChange::ModifyPriceRule { rule } => {
                let slot = price_rules
                    .iter_mut()
                    .find(|r| r.id == rule.id)
                    .ok_or_else(missing)?;
                *slot = rule.clone();
            }
        }

        let changed = model.with_rules(rules).with_price_rules(price_rules);
        changed.validate()?;
        Ok(changed)
    }
}

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidityImpact {
    Broken,
    Fixed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PricingImpact {
    Increase,
    Decrease,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityImpact {
    Restricted,
    Expanded,
    Unchanged,
}

/// Effect of the change on one sampled configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigurationChange {
    pub options: Vec<String>,
    pub validity: ValidityImpact,
    pub pricing: PricingImpact,
    pub availability: AvailabilityImpact,
    pub original_valid: bool,
    pub modified_valid: bool,
    pub original_price: f64,
    pub modified_price: f64,
    pub original_available: usize,
    pub modified_available: usize,
}

impl ConfigurationChange {
    pub fn is_unchanged(&self) -> bool {
        self.validity == ValidityImpact::Unchanged
            && self.pricing == PricingImpact::Unchanged
            && self.availability == AvailabilityImpact::Unchanged
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactSummary {
    pub samples: usize,
    pub broken: usize,
    pub fixed: usize,
    pub price_increased: usize,
    pub price_decreased: usize,
    pub restricted: usize,
    pub expanded: usize,
    pub unchanged: usize,
    pub impact_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImpactAnalysis {
    pub model_id: String,
    pub change: RuleChange,
    pub summary: ImpactSummary,
    /// Sampled configurations the change affects
    pub affected: Vec<ConfigurationChange>,
    pub recommendations: Vec<String>,
    pub analysis_time_us: u64,
}

impl std::fmt::Display for ImpactAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = &self.summary;
        writeln!(
            f,
            "Impact of change to '{}' on model '{}': score {:.1}/100",
            self.change.rule_id(),
            self.model_id,
            s.impact_score
        )?;
        writeln!(
            f,
            "  {} samples: {} broken, {} fixed, {} repriced, {} restricted, {} expanded, {} unchanged",
            s.samples,
            s.broken,
            s.fixed,
            s.price_increased + s.price_decreased,
            s.restricted,
            s.expanded,
            s.unchanged
        )?;
        for rec in &self.recommendations {
            writeln!(f, "  - {}", rec)?;
        }
        Ok(())
    }
}

// ============================================================================
// Analysis
// ============================================================================

struct Engines {
    constraints: ConfigurationEngine,
    pricing: PricingCalculator,
}

impl Engines {
    fn new(model: Model, config: &EngineConfig) -> Result<Self> {
        let model = Arc::new(model);
        Ok(Self {
            constraints: ConfigurationEngine::from_shared(model.clone(), config)?,
            pricing: PricingCalculator::new(model, config)?,
        })
    }

    fn observe(&self, selections: &[Selection]) -> Result<(bool, f64, usize)> {
        let valid = self.constraints.is_valid(selections)?;
        let price = self.pricing.calculate_price(selections)?.total;
        let available = self
            .constraints
            .available_options(selections)?
            .iter()
            .filter(|o| o.available && !o.selected)
            .count();
        Ok((valid, price, available))
    }
}

pub struct ImpactAnalyzer {
    config: EngineConfig,
}

impl ImpactAnalyzer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn analyze_rule_change(&self, model: &Model, change: &RuleChange) -> Result<ImpactAnalysis> {
        let started = Instant::now();
        let modified_model = change.apply(model)?;
        let original = Engines::new(model.clone(), &self.config)?;
        let modified = Engines::new(modified_model, &self.config)?;
        let settings = &self.config.impact;

        let samples = sample_configurations(model, settings);
        let mut summary = ImpactSummary {
            samples: samples.len(),
            ..Default::default()
        };
        let mut affected = Vec::new();

        for options in samples {
            let selections: Vec<Selection> = options.iter().map(|id| Selection::one(id)).collect();
            let (ov, op, oa) = original.observe(&selections)?;
            let (mv, mp, ma) = modified.observe(&selections)?;

            let validity = match (ov, mv) {
                (true, false) => ValidityImpact::Broken,
                (false, true) => ValidityImpact::Fixed,
                _ => ValidityImpact::Unchanged,
            };
            let pricing = if (mp - op).abs() <= settings.price_tolerance {
                PricingImpact::Unchanged
            } else if mp > op {
                PricingImpact::Increase
            } else {
                PricingImpact::Decrease
            };
            let availability = match ma.cmp(&oa) {
                std::cmp::Ordering::Less => AvailabilityImpact::Restricted,
                std::cmp::Ordering::Greater => AvailabilityImpact::Expanded,
                std::cmp::Ordering::Equal => AvailabilityImpact::Unchanged,
            };

            let change = ConfigurationChange {
                options,
                validity,
                pricing,
                availability,
                original_valid: ov,
                modified_valid: mv,
                original_price: op,
                modified_price: mp,
                original_available: oa,
                modified_available: ma,
            };
            tally(&mut summary, &change);
            if !change.is_unchanged() {
                affected.push(change);
            }
        }

        summary.impact_score = impact_score(&summary, settings);
        let recommendations = recommendations(&summary, settings);
        let analysis = ImpactAnalysis {
            model_id: model.id.clone(),
            change: change.clone(),
            summary,
            affected,
            recommendations,
            analysis_time_us: started.elapsed().as_micros() as u64,
        };
        info!(
            model = %model.id,
            rule = change.rule_id(),
            samples = analysis.summary.samples,
            score = analysis.summary.impact_score,
            "Impact analysis finished"
        );
        Ok(analysis)
    }
}

fn tally(summary: &mut ImpactSummary, change: &ConfigurationChange) {
    match change.validity {
        ValidityImpact::Broken => summary.broken += 1,
        ValidityImpact::Fixed => summary.fixed += 1,
        ValidityImpact::Unchanged => {}
    }
    match change.pricing {
        PricingImpact::Increase => summary.price_increased += 1,
        PricingImpact::Decrease => summary.price_decreased += 1,
        PricingImpact::Unchanged => {}
    }
    match change.availability {
        AvailabilityImpact::Restricted => summary.restricted += 1,
        AvailabilityImpact::Expanded => summary.expanded += 1,
        AvailabilityImpact::Unchanged => {}
    }
    if change.is_unchanged() {
        summary.unchanged += 1;
    }
}

pub fn impact_score(summary: &ImpactSummary, settings: &ImpactConfig) -> f64 {
    if summary.samples == 0 {
        return 0.0;
    }
    let n = summary.samples as f64;
    let repriced = (summary.price_increased + summary.price_decreased) as f64;
    let raw = settings.broken_weight * summary.broken as f64 / n
        + settings.price_weight * repriced / n
        + settings.restriction_weight * summary.restricted as f64 / n;
    (raw * 100.0).clamp(0.0, 100.0)
}

fn recommendations(summary: &ImpactSummary, settings: &ImpactConfig) -> Vec<String> {
    let mut out = Vec::new();
    let score = summary.impact_score;
    if summary.broken > 0 {
        out.push(format!(
            "CRITICAL: {} sampled configuration(s) become invalid; review affected customers before applying",
            summary.broken
        ));
    }
    if score >= settings.high_impact_threshold {
        out.push(format!(
            "HIGH IMPACT: score {:.1}; stage the change and notify sales",
            score
        ));
    } else if score >= settings.moderate_impact_threshold {
        out.push(format!("MODERATE: score {:.1}; test the affected configurations", score));
    }
    if summary.fixed > 0 && score < settings.moderate_impact_threshold {
        out.push(format!(
            "POSITIVE: {} previously invalid configuration(s) become valid",
            summary.fixed
        ));
    }
    if out.is_empty() {
        out.push(format!("LOW IMPACT: score {:.1}; safe to apply", score));
    }
    out
}

/// Sorted option-ID sets to evaluate, deduplicated and capped
pub fn sample_configurations(model: &Model, settings: &ImpactConfig) -> Vec<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |mut options: Vec<String>| {
        options.sort();
        options.dedup();
        if out.len() < settings.max_samples && seen.insert(options.clone()) {
            out.push(options);
        }
    };

    for option in model.options.iter().filter(|o| o.active) {
        push(vec![option.id.clone()]);
    }

    let per_group: Vec<(String, Vec<String>)> = model
        .groups
        .iter()
        .map(|g| {
            let ids = model
                .active_options_in_group(&g.id)
                .iter()
                .map(|o| o.id.clone())
                .collect();
            (g.id.clone(), ids)
        })
        .collect();

    // First options of every group, enough to meet its minimum
    let baseline: Vec<(String, Vec<String>)> = model
        .groups
        .iter()
        .zip(&per_group)
        .map(|(g, (id, ids))| {
            let take = (g.min_selections as usize).min(ids.len());
            (id.clone(), ids[..take].to_vec())
        })
        .collect();

    for (group, (_, ids)) in model.groups.iter().zip(&per_group) {
        let lo = (group.min_selections as usize).max(1);
        let hi = (group.max_selections as usize).min(ids.len());
        let mut produced = 0;
        for k in lo..=hi {
            let remaining = settings.max_group_combinations.saturating_sub(produced);
            for combo in combinations(ids, k, remaining) {
                produced += 1;
                let mut options: Vec<String> = baseline
                    .iter()
                    .filter(|(id, _)| id != &group.id)
                    .flat_map(|(_, picks)| picks.iter().cloned())
                    .collect();
                options.extend(combo);
                push(options);
            }
            if produced >= settings.max_group_combinations {
                break;
            }
        }
    }
    out
}

/// Up to `limit` k-combinations of `items`, lexicographic
fn combinations(items: &[String], k: usize, limit: usize) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    if k == 0 || k > items.len() || limit == 0 {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.iter().map(|&i| items[i].clone()).collect());
        if out.len() >= limit {
            break;
        }
        let mut i = k;
        while i > 0 && idx[i - 1] == items.len() - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            break;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ModelOption};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::builder("pc", "PC")
            .group(Group::single("case", "Case", true))
            .group(Group::multi("cards", "Cards", 0, 2))
            .option(ModelOption::new("tower", "Tower", "case", 80.0))
            .option(ModelOption::new("mini", "Mini", "case", 60.0))
            .option(ModelOption::new("gpu", "GPU", "cards", 400.0))
            .option(ModelOption::new("wifi", "WiFi", "cards", 25.0))
            .option(ModelOption::new("sound", "Sound", "cards", 30.0))
            .build()
            .unwrap()
    }

    fn analyze(change: RuleChange) -> ImpactAnalysis {
        ImpactAnalyzer::new(&EngineConfig::default())
            .analyze_rule_change(&model(), &change)
            .unwrap()
    }

    #[test]
    fn test_combinations() {
        let items: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let pairs = combinations(&items, 2, 100);
        assert_eq!(pairs.len(), 6);
        assert_eq!(pairs[0], vec!["a", "b"]);
        assert_eq!(pairs[5], vec!["c", "d"]);
        assert_eq!(combinations(&items, 2, 4).len(), 4);
        assert!(combinations(&items, 5, 10).is_empty());
    }

    #[test]
    fn test_samples_deduplicated() {
        let samples = sample_configurations(&model(), &ImpactConfig::default());
        let unique: BTreeSet<_> = samples.iter().collect();
        assert_eq!(unique.len(), samples.len());
        assert!(samples.contains(&vec!["tower".to_string()]));
        assert!(samples.contains(&vec!["gpu".to_string(), "tower".to_string(), "wifi".to_string()]));
    }

    #[test]
    fn test_tautology_has_no_impact() {
        let analysis = analyze(RuleChange::AddRule {
            rule: Rule::validation("T", "gpu || !gpu"),
        });
        assert_eq!(analysis.summary.broken, 0);
        assert_eq!(analysis.summary.impact_score, 0.0);
        assert!(analysis.affected.is_empty());
        assert!(analysis.recommendations[0].starts_with("LOW IMPACT"));
    }

    #[test]
    fn test_restrictive_rule_breaks_configurations() {
        let analysis = analyze(RuleChange::AddRule {
            rule: Rule::requires("R", "wifi -> sound"),
        });
        assert!(analysis.summary.broken > 0);
        assert!(analysis.summary.restricted > 0);
        assert!(analysis.summary.impact_score > 0.0);
        assert!(analysis.recommendations[0].starts_with("CRITICAL"));
        assert!(analysis
            .affected
            .iter()
            .any(|c| c.options == vec!["tower", "wifi"] && c.validity == ValidityImpact::Broken));
    }

    #[test]
    fn test_price_rule_change_counts_repricing() {
        let analysis = analyze(RuleChange::AddPriceRule {
            rule: PriceRule::surcharge("GPU_FEE", 20.0, 1).when("gpu"),
        });
        assert_eq!(analysis.summary.broken, 0);
        assert!(analysis.summary.price_increased > 0);
        assert_eq!(analysis.summary.price_decreased, 0);
    }

    #[test]
    fn test_invalid_changes_rejected() {
        let model = model();
        let missing = RuleChange::RemoveRule { rule_id: "nope".into() };
        assert!(matches!(missing.apply(&model), Err(Error::NotFound(_))));

        let with_rule = RuleChange::AddRule { rule: Rule::requires("R", "gpu -> tower") }
            .apply(&model)
            .unwrap();
        let duplicate = RuleChange::AddRule { rule: Rule::requires("R", "wifi -> tower") };
        assert!(matches!(duplicate.apply(&with_rule), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_change_from_yaml() {
        let change = RuleChange::from_yaml(
            "action: add_rule\nrule:\n  id: R9\n  type: requires\n  expression: gpu -> tower\n",
        )
        .unwrap();
        assert_eq!(change.rule_id(), "R9");
    }
}
