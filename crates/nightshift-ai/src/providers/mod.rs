//! Completion provider implementations

pub mod openai;

use crate::{Context, Error, MessageEventStream, Model, Result};
use async_trait::async_trait;

/// Trait for completion providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response for the given transcript
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or(Error::InvalidApiKey)
}
