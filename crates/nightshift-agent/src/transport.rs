//! The remote completion call seen by the conversation loop

use async_trait::async_trait;
use nightshift_ai::providers::openai::OpenAICompatProvider;
use nightshift_ai::providers::{LlmProvider, get_api_key};
use nightshift_ai::stream::collect_message;
use nightshift_ai::{Context, Message, Model};
use std::sync::Arc;

use crate::error::Result;

/// One request/response exchange with the completion service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the full transcript and tool schema, get the next assistant turn
    async fn complete(&self, context: &Context) -> nightshift_ai::Result<Message>;
}

/// [`Transport`] backed by a streaming [`LlmProvider`]
pub struct ProviderTransport {
    model: Model,
    provider: Arc<dyn LlmProvider>,
}

impl ProviderTransport {
    /// Create a transport for `model` using the OpenAI-compatible client.
    ///
    /// The key falls back to the provider's environment variable; providers
    /// that need a key fail here rather than on the first request.
    pub fn new(model: Model, api_key: Option<&str>) -> Result<Self> {
        let api_key = match model.provider.api_key_env_var() {
            Some(env_var) => Some(get_api_key(api_key, env_var)?),
            None => api_key.filter(|k| !k.is_empty()).map(str::to_string),
        };

        Ok(Self::with_provider(
            model,
            Arc::new(OpenAICompatProvider::new(api_key)),
        ))
    }

    /// Create a transport over an arbitrary provider
    pub fn with_provider(model: Model, provider: Arc<dyn LlmProvider>) -> Self {
        Self { model, provider }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn complete(&self, context: &Context) -> nightshift_ai::Result<Message> {
        tracing::debug!(
            model = %self.model.id,
            messages = context.messages.len(),
            "Requesting completion"
        );
        let stream = self.provider.stream(&self.model, context).await?;
        let mut message = collect_message(stream).await?;

        if let Message::Assistant { metadata, .. } = &mut message {
            metadata.provider.get_or_insert(self.model.provider);
            metadata.model.get_or_insert_with(|| self.model.id.clone());
        }
        Ok(message)
    }
}
