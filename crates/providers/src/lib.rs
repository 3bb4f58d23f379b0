//! Remote model endpoint implementations for Companion.
//!
//! All providers implement the `companion_core::Provider` trait.
//! [`build_from_config`] picks the right one from the configured URL.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use companion_config::AppConfig;
use companion_core::{Provider, ProviderError};
use std::sync::Arc;

/// Infer a display name from an endpoint URL.
pub fn provider_name_for(api_url: &str) -> &'static str {
    if api_url.contains("openrouter.ai") {
        "openrouter"
    } else if api_url.contains("api.openai.com") {
        "openai"
    } else if api_url.contains(":11434") {
        "ollama"
    } else {
        "custom"
    }
}

/// Build the shared remote connection from configuration.
///
/// A missing API key is only accepted for a local Ollama endpoint.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = provider_name_for(&config.api_url);

    let provider = match (&config.api_key, name) {
        (Some(key), _) => OpenAiCompatProvider::new(name, &config.api_url, key),
        (None, "ollama") => OpenAiCompatProvider::ollama(Some(&config.api_url)),
        (None, _) => {
            return Err(ProviderError::AuthenticationFailed(format!(
                "No API key configured for {}. Set COMPANION_API_KEY or api_key in {}",
                config.api_url,
                AppConfig::config_path().display()
            )));
        }
    };

    tracing::debug!(provider = name, url = %config.api_url, "Built remote connection");
    Ok(Arc::new(provider))
}
