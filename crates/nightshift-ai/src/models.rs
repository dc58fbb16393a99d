//! Model resolution for OpenAI-compatible providers.

use crate::{Model, Provider};

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "x-ai/grok-4.1-fast:free";

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Parse a provider name as written in config files and flags.
pub fn parse_provider(name: &str) -> Option<Provider> {
    match name.to_lowercase().as_str() {
        "openrouter" => Some(Provider::OpenRouter),
        "openai" => Some(Provider::OpenAI),
        "groq" => Some(Provider::Groq),
        "xai" => Some(Provider::XAI),
        "ollama" => Some(Provider::Ollama),
        "custom" => Some(Provider::Custom),
        _ => None,
    }
}

/// Build a model definition for `id` served by `provider`.
///
/// `base_url` overrides the provider default; it is required for
/// [`Provider::Custom`].
pub fn resolve_model(provider: Provider, id: &str, base_url: Option<&str>) -> Model {
    let base_url = base_url
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| provider.default_base_url().to_string());

    let mut headers = std::collections::HashMap::new();
    if provider == Provider::OpenRouter {
        headers.insert("X-Title".to_string(), "nightshift".to_string());
    }

    Model {
        id: id.to_string(),
        provider,
        base_url,
        context_window: DEFAULT_CONTEXT_WINDOW,
        max_tokens: DEFAULT_MAX_TOKENS,
        headers,
    }
}
