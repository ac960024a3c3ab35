mod openai;

pub use openai::OpenAiProvider;

use relay_core::config::AppConfig;
use relay_core::error::ProviderError;
use relay_core::model::{self, ModelId};
use relay_core::provider::Provider;
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Builds the provider for `model_id`, or the configured default model.
pub fn create_provider(
    config: &AppConfig,
    model_id: Option<&ModelId>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let model_id = model_id.unwrap_or(&config.agent.model);
    let model = model::get_model(model_id)
        .ok_or_else(|| ProviderError::UnsupportedModel(model_id.to_string()))?;

    let api_key = config.get_api_key().ok_or_else(|| {
        ProviderError::MissingApiKey("set RELAY_API_KEY or api_key in relay.json".into())
    })?;

    Ok(Arc::new(OpenAiProvider::new(
        api_key.to_string(),
        model,
        config.base_url.clone(),
        config.agent.max_tokens,
    )))
}
