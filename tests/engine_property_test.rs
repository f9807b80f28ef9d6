//! Property-based tests for the configuration engine and pricing
//!
//! Uses proptest to generate random selection sets over a fixed model

use cpq_engine::*;
use proptest::prelude::*;
use std::sync::{Arc, OnceLock};

const OPTION_IDS: &[&str] = &["i5", "i7", "i9", "ram8", "ram16", "cooler", "wifi", "dock"];

fn model() -> Arc<Model> {
    static MODEL: OnceLock<Arc<Model>> = OnceLock::new();
    MODEL
        .get_or_init(|| {
            Arc::new(
                Model::builder("laptop", "Laptop")
                    .group(Group::single("cpu", "CPU", true))
                    .group(Group::single("ram", "Memory", true))
                    .group(Group::optional("extras", "Extras", 2))
                    .option(ModelOption::new("i5", "Core i5", "cpu", 800.0))
                    .option(ModelOption::new("i7", "Core i7", "cpu", 1100.0))
                    .option(ModelOption::new("i9", "Core i9", "cpu", 1400.0))
                    .option(ModelOption::new("ram8", "8 GB", "ram", 80.0))
                    .option(ModelOption::new("ram16", "16 GB", "ram", 160.0))
                    .option(ModelOption::new("cooler", "Cooler", "extras", 60.0))
                    .option(ModelOption::new("wifi", "WiFi", "extras", 30.0))
                    .option(ModelOption::new("dock", "Dock", "extras", 150.0))
                    .rule(Rule::requires("R1", "i9 -> cooler"))
                    .rule(Rule::excludes("X1", "ram8 -> i9"))
                    .rule(Rule::validation("V1", "dock -> ram16"))
                    .price_rule(PriceRule::percent_discount("BUNDLE", 5.0, 1).when("dock && wifi"))
                    .build()
                    .unwrap(),
            )
        })
        .clone()
}

fn engine() -> &'static ConfigurationEngine {
    static ENGINE: OnceLock<ConfigurationEngine> = OnceLock::new();
    ENGINE.get_or_init(|| ConfigurationEngine::from_shared(model(), &EngineConfig::default()).unwrap())
}

fn any_selections() -> impl Strategy<Value = Vec<Selection>> {
    prop::collection::btree_map(prop::sample::select(OPTION_IDS), 1u32..5, 0..6).prop_map(|m| {
        m.into_iter()
            .map(|(id, qty)| Selection::new(id, qty))
            .collect()
    })
}

proptest! {
    #[test]
    fn test_verdict_matches_violations(selections in any_selections()) {
        let result = engine().validate(&selections).unwrap();
        prop_assert_eq!(result.is_valid, result.violations.is_empty());
        prop_assert_eq!(engine().is_valid(&selections).unwrap(), result.is_valid);
    }

    #[test]
    fn test_violations_are_stable(selections in any_selections()) {
        let first = engine().validate(&selections).unwrap();
        let mut reversed = selections.clone();
        reversed.reverse();
        let second = engine().validate(&reversed).unwrap();
        prop_assert_eq!(first.violated_rule_ids(), second.violated_rule_ids());
        for violation in &first.violations {
            let mut sorted = violation.affected_options.clone();
            sorted.sort();
            prop_assert_eq!(&violation.affected_options, &sorted);
        }
    }

    #[test]
    fn test_suggestions_are_capped(selections in any_selections()) {
        let result = engine().validate(&selections).unwrap();
        prop_assert!(result.suggestions.len() <= EngineConfig::default().max_suggestions);
        if result.is_valid {
            prop_assert!(result.suggestions.is_empty());
        }
    }

    #[test]
    fn test_availability_lists_every_active_option(selections in any_selections()) {
        let options = engine().available_options(&selections).unwrap();
        prop_assert_eq!(options.len(), OPTION_IDS.len());
        for option in &options {
            let selected = selections.iter().any(|s| s.option_id == option.option_id);
            prop_assert_eq!(option.selected, selected);
            if option.available {
                prop_assert!(option.blocked_by.is_empty());
            }
        }
    }

    #[test]
    fn test_price_is_rounded_and_non_negative(selections in any_selections()) {
        let calc = PricingCalculator::new(model(), &EngineConfig::default()).unwrap();
        let breakdown = calc.calculate_price(&selections).unwrap();
        prop_assert!(breakdown.total >= 0.0);
        prop_assert!(breakdown.total <= breakdown.base_price + 1e-9);
        let cents = breakdown.total * 100.0;
        prop_assert!((cents - cents.round()).abs() < 1e-6);
    }
}
