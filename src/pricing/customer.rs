//! Customer-context bonuses
//!
//! Each bonus is a percentage of the running total at the point it is
//! applied, so bonuses compound in the order segment, volume history,
//! loyalty, seasonal.

use super::{AdjustmentType, PriceAdjustment};
use crate::config::CustomerBonusConfig;
use crate::model::CustomerContext;
use chrono::{Datelike, NaiveDate};

/// Bonus adjustments for `customer`, applied on top of `running`
///
/// `today` is used for the seasonal bonus when the context has no order date.
pub fn customer_adjustments(
    running: f64,
    customer: &CustomerContext,
    config: &CustomerBonusConfig,
    today: NaiveDate,
) -> Vec<PriceAdjustment> {
    let mut running = running;
    let mut out = Vec::new();
    let mut apply = |kind: AdjustmentType, percent: f64, name: &str, description: String| {
        if percent <= 0.0 {
            return;
        }
        let amount = -(running * percent / 100.0);
        running += amount;
        out.push(PriceAdjustment {
            adjustment_type: kind,
            amount,
            rule_name: name.to_string(),
            description,
        });
    };

    if config.segment_enabled {
        let segment = customer.segment.to_lowercase();
        let rate = config.segment_rates.get(&segment).copied().unwrap_or(0.0);
        apply(
            AdjustmentType::CustomerSegment,
            rate,
            "segment bonus",
            format!("{}% {} segment bonus", rate, segment),
        );
    }

    if config.volume_history_enabled && customer.historical_volume >= config.volume_history_threshold {
        apply(
            AdjustmentType::VolumeHistory,
            config.volume_history_rate,
            "volume history bonus",
            format!(
                "{}% for historical volume {}",
                config.volume_history_rate, customer.historical_volume
            ),
        );
    }

    if config.loyalty_enabled && customer.loyalty_years > 0 {
        let rate = (f64::from(customer.loyalty_years) * config.loyalty_rate_per_year)
            .min(config.loyalty_cap);
        apply(
            AdjustmentType::Loyalty,
            rate,
            "loyalty bonus",
            format!("{}% for {} year(s) of loyalty", rate, customer.loyalty_years),
        );
    }

    if config.seasonal_enabled {
        let month = customer.order_date.unwrap_or(today).month();
        if config.seasonal_months.contains(&month) {
            apply(
                AdjustmentType::Seasonal,
                config.seasonal_rate,
                "seasonal bonus",
                format!("{}% seasonal bonus (month {})", config.seasonal_rate, month),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn june() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_standard_customer_gets_nothing() {
        let adjustments =
            customer_adjustments(1000.0, &CustomerContext::default(), &CustomerBonusConfig::default(), june());
        assert!(adjustments.is_empty());
    }

    #[test]
    fn test_bonuses_compound() {
        let customer = CustomerContext {
            segment: "Premium".into(),
            historical_volume: 5000.0,
            ..Default::default()
        };
        let adjustments =
            customer_adjustments(1000.0, &customer, &CustomerBonusConfig::default(), june());
        assert_eq!(adjustments.len(), 2);
        assert_eq!(adjustments[0].adjustment_type, AdjustmentType::CustomerSegment);
        assert!((adjustments[0].amount + 50.0).abs() < 1e-9);
        // 3% of 950
        assert!((adjustments[1].amount + 28.5).abs() < 1e-9);
    }

    #[test]
    fn test_loyalty_capped() {
        let customer = CustomerContext {
            loyalty_years: 40,
            ..Default::default()
        };
        let adjustments =
            customer_adjustments(200.0, &customer, &CustomerBonusConfig::default(), june());
        assert_eq!(adjustments.len(), 1);
        assert!((adjustments[0].amount + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_seasonal_uses_order_date() {
        let customer = CustomerContext {
            order_date: NaiveDate::from_ymd_opt(2024, 12, 1),
            ..Default::default()
        };
        let adjustments =
            customer_adjustments(100.0, &customer, &CustomerBonusConfig::default(), june());
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].adjustment_type, AdjustmentType::Seasonal);

        let mut config = CustomerBonusConfig::default();
        config.seasonal_enabled = false;
        assert!(customer_adjustments(100.0, &customer, &config, june()).is_empty());
    }
}
