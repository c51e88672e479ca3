//! Model factory for creating model instances from configuration.

use std::str::FromStr;
use std::sync::Arc;

use scribe_abstraction::{Model, ModelError, ModelTier};
use tracing::debug;

use crate::{ClaudeModel, MockModel, TieredModels};

/// Model provider enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Offline mock model.
    Mock,
    /// Anthropic Claude model.
    Claude,
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "claude" | "anthropic" => Ok(Self::Claude),
            other => Err(ModelError::UnsupportedModelProvider(other.to_string())),
        }
    }
}

/// Model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID.
    pub model_id: String,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self { model_type, model_id, api_key: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing API key).
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model>, ModelError> {
        debug!(model_type = ?config.model_type, model_id = %config.model_id, "Creating model instance");

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id))),
            ModelType::Claude => {
                let model = match config.api_key {
                    Some(api_key) => ClaudeModel::with_api_key(config.model_id, api_key),
                    None => ClaudeModel::new(config.model_id)?,
                };
                Ok(Arc::new(model))
            }
        }
    }

    /// Builds a tier router with one model per tier from the same provider.
    ///
    /// # Arguments
    /// * `model_type` - Provider for every tier
    /// * `tiers` - `(tier, model_id)` pairs
    ///
    /// # Errors
    /// Returns a `ModelError` if any model cannot be created.
    pub fn create_tiered(
        model_type: ModelType,
        tiers: &[(ModelTier, String)],
    ) -> Result<TieredModels, ModelError> {
        tiers.iter().try_fold(TieredModels::new(), |router, (tier, model_id)| {
            let model = Self::create(ModelConfig::new(model_type, model_id.clone()))?;
            Ok(router.with_tier(*tier, model))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_from_str() {
        assert_eq!("Anthropic".parse::<ModelType>().unwrap(), ModelType::Claude);
        assert_eq!("mock".parse::<ModelType>().unwrap(), ModelType::Mock);
        assert!("gemini".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_create_tiered_mock() {
        let router = ModelFactory::create_tiered(
            ModelType::Mock,
            &[(ModelTier::Fast, "mock-fast".to_string()), (ModelTier::Smart, "mock-smart".to_string())],
        )
        .unwrap();

        assert_eq!(router.model_for(ModelTier::Fast).unwrap().model_id(), "mock-fast");
        assert!(router.model_for(ModelTier::Creative).is_none());
    }

    #[test]
    fn test_claude_with_explicit_key() {
        let config = ModelConfig::new(ModelType::Claude, "claude-x".to_string()).with_api_key("k".to_string());
        let model = ModelFactory::create(config).unwrap();
        assert_eq!(model.model_id(), "claude-x");
    }
}
