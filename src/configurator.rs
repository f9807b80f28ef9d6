//! Configurator facade
//!
//! One customer session against one model. Every mutating operation checks
//! its input first, so a rejected call leaves the configuration untouched,
//! then re-derives validity, price and availability in an [`UpdateResult`].
//!
//! The constraint engine and pricing calculator are shared through `Arc` and
//! can serve any number of configurators of the same model.

use crate::cache::EntityCache;
use crate::config::EngineConfig;
use crate::engine::{AvailableOption, ConfigurationEngine};
use crate::error::{Error, Result};
use crate::model::{Configuration, CustomerContext, Model, ModelOption};
use crate::pricing::{PriceBreakdown, PricingCalculator};
use crate::validation::ValidationResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Outcome of one configurator operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateResult {
    pub configuration: Configuration,
    pub validation: ValidationResult,
    pub price: PriceBreakdown,
    pub available_options: Vec<AvailableOption>,
    pub response_time_us: u64,
}

pub struct Configurator {
    engine: Arc<ConfigurationEngine>,
    pricing: Arc<PricingCalculator>,
    configuration: Configuration,
    customer: Option<CustomerContext>,
    cache: Option<Arc<EntityCache>>,
}

impl std::fmt::Debug for Configurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configurator")
            .field("model", &self.engine.model().id)
            .field("configuration", &self.configuration.id)
            .field("selections", &self.configuration.selections.len())
            .finish()
    }
}

impl Configurator {
    /// Configurator with its own engines
    pub fn new(model: Model, config: &EngineConfig) -> Result<Self> {
        let model = Arc::new(model);
        let engine = Arc::new(ConfigurationEngine::from_shared(model.clone(), config)?);
        let pricing = Arc::new(PricingCalculator::new(model, config)?);
        Self::with_engines(engine, pricing)
    }

    /// Configurator over shared engines; both must belong to the same model
    pub fn with_engines(
        engine: Arc<ConfigurationEngine>,
        pricing: Arc<PricingCalculator>,
    ) -> Result<Self> {
        if engine.model().id != pricing.model().id {
            return Err(Error::ModelMismatch {
                expected: engine.model().id.clone(),
                actual: pricing.model().id.clone(),
            });
        }
        let configuration = Configuration::new(&engine.model().id);
        Ok(Self {
            engine,
            pricing,
            configuration,
            customer: None,
            cache: None,
        })
    }

    pub fn with_customer(mut self, customer: CustomerContext) -> Self {
        self.customer = Some(customer);
        self
    }

    /// Store configurations and availability lists in `cache`
    pub fn with_cache(mut self, cache: Arc<EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn model(&self) -> &Model {
        self.engine.model()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn engine(&self) -> &Arc<ConfigurationEngine> {
        &self.engine
    }

    pub fn pricing(&self) -> &Arc<PricingCalculator> {
        &self.pricing
    }

    /// Select an option; in a group allowing one selection it replaces the
    /// current one
    pub fn add_selection(&mut self, option_id: &str, quantity: u32) -> Result<UpdateResult> {
        let started = Instant::now();
        let option = self.selectable(option_id, quantity)?.clone();

        let single = self
            .model()
            .group(&option.group_id)
            .is_some_and(|g| g.max_selections == 1);
        if single {
            let siblings: Vec<String> = self
                .configuration
                .selections
                .iter()
                .filter(|s| s.option_id != option.id)
                .filter(|s| {
                    self.model()
                        .option(&s.option_id)
                        .is_some_and(|o| o.group_id == option.group_id)
                })
                .map(|s| s.option_id.clone())
                .collect();
            for sibling in siblings {
                debug!(replaced = %sibling, by = %option.id, "Single-select replacement");
                self.configuration.remove(&sibling);
            }
        }

        self.configuration.upsert(&option.id, quantity);
        self.refresh(started)
    }

    pub fn remove_selection(&mut self, option_id: &str) -> Result<UpdateResult> {
        let started = Instant::now();
        if !self.configuration.remove(option_id) {
            return Err(Error::SelectionNotFound(option_id.to_string()));
        }
        self.refresh(started)
    }

    /// Change the quantity of an already-selected option
    pub fn update_selection(&mut self, option_id: &str, quantity: u32) -> Result<UpdateResult> {
        let started = Instant::now();
        if !self.configuration.is_selected(option_id) {
            return Err(Error::SelectionNotFound(option_id.to_string()));
        }
        self.selectable(option_id, quantity)?;
        self.configuration.upsert(option_id, quantity);
        self.refresh(started)
    }

    /// Replace the session's configuration with a stored one
    pub fn load_configuration(&mut self, configuration: Configuration) -> Result<UpdateResult> {
        let started = Instant::now();
        if configuration.model_id != self.model().id {
            return Err(Error::ModelMismatch {
                expected: self.model().id.clone(),
                actual: configuration.model_id,
            });
        }
        let mut seen = HashSet::new();
        for selection in &configuration.selections {
            if !seen.insert(selection.option_id.as_str()) {
                return Err(Error::DuplicateSelection(selection.option_id.clone()));
            }
            if self.model().option(&selection.option_id).is_none() {
                return Err(Error::UnknownOption(selection.option_id.clone()));
            }
            if selection.quantity == 0 {
                return Err(Error::InvalidQuantity {
                    option: selection.option_id.clone(),
                    quantity: 0,
                });
            }
        }
        self.configuration = configuration;
        self.refresh(started)
    }

    pub fn clear_configuration(&mut self) -> Result<UpdateResult> {
        let started = Instant::now();
        self.configuration.clear();
        self.refresh(started)
    }

    /// Copy of the current configuration under a new identity; the session
    /// keeps working on the original
    pub fn clone_configuration(&self) -> Result<UpdateResult> {
        let started = Instant::now();
        let clone = self.configuration.clone_with_new_identity();
        self.evaluate(clone, started)
    }

    /// Re-derive everything for the current selections
    pub fn refresh_now(&mut self) -> Result<UpdateResult> {
        self.refresh(Instant::now())
    }

    fn selectable(&self, option_id: &str, quantity: u32) -> Result<&ModelOption> {
        let option = self
            .model()
            .option(option_id)
            .ok_or_else(|| Error::UnknownOption(option_id.to_string()))?;
        if !option.active {
            return Err(Error::InactiveOption(option_id.to_string()));
        }
        if quantity == 0 {
            return Err(Error::InvalidQuantity {
                option: option_id.to_string(),
                quantity: 0,
            });
        }
        Ok(option)
    }

    fn refresh(&mut self, started: Instant) -> Result<UpdateResult> {
        let result = self.evaluate(self.configuration.clone(), started)?;
        self.configuration = result.configuration.clone();
        Ok(result)
    }

    fn evaluate(&self, mut configuration: Configuration, started: Instant) -> Result<UpdateResult> {
        let customer = self.customer.as_ref();
        let selections = &configuration.selections;

        let validation = self.engine.validate_for(selections, customer)?;
        let price = self.pricing.calculate(selections, customer)?;
        let available_options = self.available_options(&configuration)?;

        configuration.is_valid = validation.is_valid;
        configuration.total_price = price.total;
        if let Some(cache) = &self.cache {
            cache.set_configuration(&configuration)?;
        }

        Ok(UpdateResult {
            configuration,
            validation,
            price,
            available_options,
            response_time_us: started.elapsed().as_micros() as u64,
        })
    }

    fn available_options(&self, configuration: &Configuration) -> Result<Vec<AvailableOption>> {
        let customer = self.customer.as_ref();
        let Some(cache) = &self.cache else {
            return self
                .engine
                .available_options_for(&configuration.selections, customer);
        };
        let fingerprint = match customer {
            Some(c) => format!("{}:{}", configuration.fingerprint(), c.fingerprint()),
            None => configuration.fingerprint(),
        };
        if let Some(hit) = cache.get_available_options(&configuration.model_id, &fingerprint)? {
            return Ok(hit);
        }
        let options = self
            .engine
            .available_options_for(&configuration.selections, customer)?;
        cache.set_available_options(&configuration.model_id, &fingerprint, &options)?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::model::{Group, ModelOption, Rule, Selection};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::builder("desk", "Desk")
            .group(Group::single("top", "Desktop", true))
            .group(Group::optional("addons", "Add-ons", 2))
            .option(ModelOption::new("oak", "Oak", "top", 100.0))
            .option(ModelOption::new("pine", "Pine", "top", 50.0))
            .option(ModelOption::new("lamp", "Lamp", "addons", 30.0))
            .option(ModelOption::new("drawer", "Drawer", "addons", 45.0))
            .option(ModelOption::new("retired", "Retired", "addons", 1.0).inactive())
            .rule(Rule::requires("R1", "lamp -> drawer"))
            .build()
            .unwrap()
    }

    fn configurator() -> Configurator {
        Configurator::new(model(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_single_select_replaces() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let result = c.add_selection("pine", 1).unwrap();
        assert_eq!(result.configuration.selections, vec![Selection::one("pine")]);
        assert_eq!(result.price.total, 50.0);
        assert!(result.validation.is_valid);
        assert!(c.configuration().is_valid);
        assert_eq!(c.configuration().total_price, 50.0);
    }

    #[test]
    fn test_input_errors_leave_state_unchanged() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let before = c.configuration().clone();

        assert!(matches!(c.add_selection("nope", 1), Err(Error::UnknownOption(_))));
        assert!(matches!(c.add_selection("retired", 1), Err(Error::InactiveOption(_))));
        assert!(matches!(
            c.add_selection("lamp", 0),
            Err(Error::InvalidQuantity { .. })
        ));
        assert!(matches!(
            c.remove_selection("lamp"),
            Err(Error::SelectionNotFound(_))
        ));
        assert!(matches!(
            c.update_selection("lamp", 2),
            Err(Error::SelectionNotFound(_))
        ));
        assert_eq!(c.configuration(), &before);
    }

    #[test]
    fn test_requires_violation_then_resolution() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let broken = c.add_selection("lamp", 1).unwrap();
        assert!(!broken.validation.is_valid);
        assert_eq!(broken.validation.violated_rule_ids(), vec!["R1"]);

        let fixed = c.add_selection("drawer", 1).unwrap();
        assert!(fixed.validation.is_valid);
        assert_eq!(fixed.price.total, 175.0);

        let removed = c.remove_selection("drawer").unwrap();
        assert!(!removed.validation.is_valid);
    }

    #[test]
    fn test_update_quantity() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let result = c.update_selection("oak", 3).unwrap();
        assert_eq!(result.price.base_price, 300.0);
        assert_eq!(c.configuration().total_quantity(), 3);
    }

    #[test]
    fn test_load_rejects_foreign_and_unknown() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let before = c.configuration().clone();

        let foreign = Configuration::new("chair");
        assert!(matches!(
            c.load_configuration(foreign),
            Err(Error::ModelMismatch { .. })
        ));

        let mut unknown = Configuration::new("desk");
        unknown.upsert("ghost", 1);
        assert!(matches!(
            c.load_configuration(unknown),
            Err(Error::UnknownOption(_))
        ));
        assert_eq!(c.configuration(), &before);

        let mut repeated = Configuration::new("desk");
        repeated.upsert("oak", 1);
        repeated.selections.push(Selection::one("oak"));
        let err = c.load_configuration(repeated).unwrap_err();
        assert!(matches!(err, Error::DuplicateSelection(ref id) if id == "oak"));
        assert!(err.is_input_error());
        assert_eq!(c.configuration(), &before);

        let mut stored = Configuration::new("desk");
        stored.upsert("pine", 2);
        let id = stored.id.clone();
        let result = c.load_configuration(stored).unwrap();
        assert_eq!(result.configuration.id, id);
        assert_eq!(result.price.total, 100.0);
    }

    #[test]
    fn test_clear_and_clone() {
        let mut c = configurator();
        c.add_selection("oak", 1).unwrap();
        let cloned = c.clone_configuration().unwrap();
        assert_ne!(cloned.configuration.id, c.configuration().id);
        assert_eq!(cloned.configuration.selections, c.configuration().selections);

        let cleared = c.clear_configuration().unwrap();
        assert!(cleared.configuration.selections.is_empty());
        assert!(!cleared.validation.is_valid);
        assert_eq!(cleared.price.total, 0.0);
    }

    #[test]
    fn test_cache_collaborator_populated() {
        let cache = Arc::new(EntityCache::new(&CacheConfig::default()));
        let mut c = configurator().with_cache(cache.clone());
        let result = c.add_selection("oak", 1).unwrap();
        let stored = cache.get_configuration(&result.configuration.id).unwrap().unwrap();
        assert!(stored.is_valid);

        let again = c.refresh_now().unwrap();
        assert_eq!(again.available_options, result.available_options);
        assert!(cache.stats().hits >= 1);
    }
}
