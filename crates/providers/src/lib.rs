//! Model service implementations for stepwise.
//!
//! All services implement the `stepwise_core::ModelService` trait.
//! [`build_from_config`] constructs the configured one.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use std::time::Duration;

use stepwise_config::AppConfig;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::ModelService;

/// Build the model service described by the configuration.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ModelService>, ProviderError> {
    let provider = OpenAiCompatProvider::new(
        config.provider.name.clone(),
        config.provider.base_url.clone(),
        config.effective_api_key().map(str::to_string),
        Duration::from_secs(config.provider.request_timeout_secs),
    )?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_provider() {
        let service = build_from_config(&AppConfig::default()).unwrap();
        assert_eq!(service.name(), "openrouter");
    }
}
