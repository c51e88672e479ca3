//! Tier router implementing `InferenceService`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scribe_abstraction::{CompletionRequest, InferenceService, Model, ModelError, ModelResponse, ModelTier};
use tracing::debug;

/// Maps each [`ModelTier`] to a concrete model.
#[derive(Clone, Default)]
pub struct TieredModels {
    models: HashMap<ModelTier, Arc<dyn Model>>,
}

impl std::fmt::Debug for TieredModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (tier, model) in &self.models {
            map.entry(&tier.as_str(), &model.model_id());
        }
        map.finish()
    }
}

impl TieredModels {
    /// Creates a router with no tiers configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves every tier with the same model.
    #[must_use]
    pub fn uniform(model: Arc<dyn Model>) -> Self {
        Self::new()
            .with_tier(ModelTier::Fast, Arc::clone(&model))
            .with_tier(ModelTier::Smart, Arc::clone(&model))
            .with_tier(ModelTier::Creative, model)
    }

    /// Assigns `model` to `tier`, replacing any previous assignment.
    #[must_use]
    pub fn with_tier(mut self, tier: ModelTier, model: Arc<dyn Model>) -> Self {
        self.models.insert(tier, model);
        self
    }

    /// Returns the model serving `tier`.
    pub fn model_for(&self, tier: ModelTier) -> Option<&Arc<dyn Model>> {
        self.models.get(&tier)
    }
}

#[async_trait]
impl InferenceService for TieredModels {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, ModelError> {
        let model = self.model_for(request.tier).ok_or(ModelError::TierUnavailable(request.tier))?;
        debug!(
            tier = %request.tier,
            model_id = %model.model_id(),
            max_tokens = request.max_tokens,
            "Routing completion"
        );
        model.generate_chat_completion(&request.to_messages(), Some(request.parameters())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedModel;

    #[tokio::test]
    async fn test_routes_by_tier() {
        let fast = Arc::new(ScriptedModel::new("fast").then_respond("quick"));
        let smart = Arc::new(ScriptedModel::new("smart").then_respond("deep"));
        let router = TieredModels::new()
            .with_tier(ModelTier::Fast, fast.clone())
            .with_tier(ModelTier::Smart, smart.clone());

        let reply = router.complete(CompletionRequest::new(ModelTier::Smart, "sys", "q")).await.unwrap();
        assert_eq!(reply.content, "deep");
        assert_eq!(fast.call_count(), 0);
        assert_eq!(smart.calls()[0].system.as_deref(), Some("sys"));
    }

    #[tokio::test]
    async fn test_missing_tier_is_an_error() {
        let router = TieredModels::new();
        let err = router.complete(CompletionRequest::new(ModelTier::Creative, "s", "u")).await.unwrap_err();
        assert_eq!(err, ModelError::TierUnavailable(ModelTier::Creative));
    }
}
