//! Typed entity cache
//!
//! One [`TtlCache`] per entity kind instead of a single cache of
//! heterogeneous values. Keys are namespaced strings so that glob
//! invalidation works across kinds:
//!
//! - `model:<model>`
//! - `configuration:<configuration>`
//! - `options:<model>:<selections fingerprint>`
//! - `validation:<model>:<selections fingerprint>`

use super::{CacheStats, Sweepable, TtlCache};
use crate::config::CacheConfig;
use crate::engine::AvailableOption;
use crate::error::Result;
use crate::model::{Configuration, Model};
use crate::validation::ValidationResult;
use std::sync::Arc;

pub struct EntityCache {
    models: Arc<TtlCache<String, Model>>,
    configurations: Arc<TtlCache<String, Configuration>>,
    options: Arc<TtlCache<String, Vec<AvailableOption>>>,
    validations: Arc<TtlCache<String, ValidationResult>>,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("models", &self.models.len())
            .field("configurations", &self.configurations.len())
            .field("options", &self.options.len())
            .field("validations", &self.validations.len())
            .finish()
    }
}

fn model_key(model_id: &str) -> String {
    format!("model:{}", model_id)
}

fn configuration_key(configuration_id: &str) -> String {
    format!("configuration:{}", configuration_id)
}

fn scoped_key(kind: &str, model_id: &str, fingerprint: &str) -> String {
    format!("{}:{}:{}", kind, model_id, fingerprint)
}

impl EntityCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            models: Arc::new(TtlCache::new("models", config.tier_ttl(), config.max_bytes)),
            configurations: Arc::new(TtlCache::new(
                "configurations",
                config.validation_ttl(),
                config.max_bytes,
            )),
            options: Arc::new(TtlCache::new(
                "available_options",
                config.validation_ttl(),
                config.max_bytes,
            )),
            validations: Arc::new(TtlCache::new(
                "validations",
                config.validation_ttl(),
                config.max_bytes,
            )),
        }
    }

    pub fn get_model(&self, model_id: &str) -> Result<Option<Model>> {
        self.models.get(&model_key(model_id))
    }

    pub fn set_model(&self, model: &Model) -> Result<()> {
        self.models.set(model_key(&model.id), model.clone())
    }

    pub fn get_configuration(&self, configuration_id: &str) -> Result<Option<Configuration>> {
        self.configurations.get(&configuration_key(configuration_id))
    }

    pub fn set_configuration(&self, configuration: &Configuration) -> Result<()> {
        self.configurations
            .set(configuration_key(&configuration.id), configuration.clone())
    }

    pub fn get_available_options(
        &self,
        model_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Vec<AvailableOption>>> {
        self.options.get(&scoped_key("options", model_id, fingerprint))
    }

    pub fn set_available_options(
        &self,
        model_id: &str,
        fingerprint: &str,
        options: &[AvailableOption],
    ) -> Result<()> {
        self.options
            .set(scoped_key("options", model_id, fingerprint), options.to_vec())
    }

    pub fn get_validation(
        &self,
        model_id: &str,
        fingerprint: &str,
    ) -> Result<Option<ValidationResult>> {
        self.validations
            .get(&scoped_key("validation", model_id, fingerprint))
    }

    pub fn set_validation(
        &self,
        model_id: &str,
        fingerprint: &str,
        result: &ValidationResult,
    ) -> Result<()> {
        self.validations
            .set(scoped_key("validation", model_id, fingerprint), result.clone())
    }

    /// Remove every key matching a glob, across all entity kinds
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        Ok(self.models.invalidate_pattern(pattern)?
            + self.configurations.invalidate_pattern(pattern)?
            + self.options.invalidate_pattern(pattern)?
            + self.validations.invalidate_pattern(pattern)?)
    }

    /// Drop everything derived from one model
    pub fn invalidate_model(&self, model_id: &str) -> Result<usize> {
        let mut removed = self.invalidate_pattern(&model_key(model_id))?;
        removed += self.invalidate_pattern(&format!("options:{}:*", model_id))?;
        removed += self.invalidate_pattern(&format!("validation:{}:*", model_id))?;
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats::combine(&[
            self.models.stats(),
            self.configurations.stats(),
            self.options.stats(),
            self.validations.stats(),
        ])
    }

    /// Handles for the background sweeper
    pub fn sweepables(&self) -> Vec<Arc<dyn Sweepable>> {
        vec![
            self.models.clone() as Arc<dyn Sweepable>,
            self.configurations.clone() as Arc<dyn Sweepable>,
            self.options.clone() as Arc<dyn Sweepable>,
            self.validations.clone() as Arc<dyn Sweepable>,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, ModelOption};

    fn model() -> Model {
        Model::builder("m1", "M")
            .group(Group::single("g", "G", true))
            .option(ModelOption::new("a", "A", "g", 1.0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_typed_round_trip() {
        let cache = EntityCache::new(&CacheConfig::default());
        cache.set_model(&model()).unwrap();
        assert_eq!(cache.get_model("m1").unwrap().unwrap().id, "m1");

        let config = Configuration::new("m1");
        cache.set_configuration(&config).unwrap();
        assert!(cache.get_configuration(&config.id).unwrap().is_some());
        assert!(cache.get_configuration("missing").unwrap().is_none());
    }

    #[test]
    fn test_invalidate_model_scoped_entries() {
        let cache = EntityCache::new(&CacheConfig::default());
        cache.set_model(&model()).unwrap();
        cache
            .set_validation("m1", "fp", &ValidationResult::valid())
            .unwrap();
        cache
            .set_validation("m2", "fp", &ValidationResult::valid())
            .unwrap();

        assert_eq!(cache.invalidate_model("m1").unwrap(), 2);
        assert!(cache.get_validation("m2", "fp").unwrap().is_some());
        let stats = cache.stats();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.deletes, 2);
    }
}
