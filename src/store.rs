//! Model and configuration persistence
//!
//! The core never touches storage directly; it talks to a [`ModelStore`].
//! [`InMemoryStore`] is the bundled implementation, used by tests and the CLI.

use crate::error::{Error, Result};
use crate::model::{Configuration, Model, Selection};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Persistence collaborator for models and configurations
pub trait ModelStore: Send + Sync {
    fn get_model(&self, model_id: &str) -> Result<Model>;
    /// All models, ordered by ID
    fn list_models(&self) -> Result<Vec<Model>>;
    /// Fails if a model with the same ID exists
    fn create_model(&self, model: &Model) -> Result<()>;

    fn get_configuration(&self, configuration_id: &str) -> Result<Configuration>;
    fn list_configurations(&self, model_id: &str) -> Result<Vec<Configuration>>;
    /// Fails if the configuration's model is unknown or its ID is taken
    fn create_configuration(&self, configuration: &Configuration) -> Result<()>;
    /// Insert or replace one selection of a stored configuration
    fn upsert_selection(&self, configuration_id: &str, selection: &Selection) -> Result<Configuration>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    models: RwLock<BTreeMap<String, Model>>,
    configurations: RwLock<BTreeMap<String, Configuration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for InMemoryStore {
    fn get_model(&self, model_id: &str) -> Result<Model> {
        self.models
            .read()?
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("model '{}'", model_id)))
    }

    fn list_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.read()?.values().cloned().collect())
    }

    fn create_model(&self, model: &Model) -> Result<()> {
        model.validate()?;
        let mut models = self.models.write()?;
        if models.contains_key(&model.id) {
            return Err(Error::AlreadyExists(format!("model '{}'", model.id)));
        }
        models.insert(model.id.clone(), model.clone());
        Ok(())
    }

    fn get_configuration(&self, configuration_id: &str) -> Result<Configuration> {
        self.configurations
            .read()?
            .get(configuration_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("configuration '{}'", configuration_id)))
    }

    fn list_configurations(&self, model_id: &str) -> Result<Vec<Configuration>> {
        Ok(self
            .configurations
            .read()?
            .values()
            .filter(|c| c.model_id == model_id)
            .cloned()
            .collect())
    }

    fn create_configuration(&self, configuration: &Configuration) -> Result<()> {
        if !self.models.read()?.contains_key(&configuration.model_id) {
            return Err(Error::NotFound(format!("model '{}'", configuration.model_id)));
        }
        let mut configurations = self.configurations.write()?;
        if configurations.contains_key(&configuration.id) {
            return Err(Error::AlreadyExists(format!(
                "configuration '{}'",
                configuration.id
            )));
        }
        configurations.insert(configuration.id.clone(), configuration.clone());
        Ok(())
    }

    fn upsert_selection(&self, configuration_id: &str, selection: &Selection) -> Result<Configuration> {
        if selection.quantity == 0 {
            return Err(Error::InvalidQuantity {
                option: selection.option_id.clone(),
                quantity: 0,
            });
        }
        let mut configurations = self.configurations.write()?;
        let configuration = configurations
            .get_mut(configuration_id)
            .ok_or_else(|| Error::NotFound(format!("configuration '{}'", configuration_id)))?;
        configuration.upsert(&selection.option_id, selection.quantity);
        Ok(configuration.clone())
    }
}
