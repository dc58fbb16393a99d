//! OpenAI-compatible Chat Completions provider (OpenRouter, OpenAI, Groq, ...)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, Usage},
};

/// Client for any endpoint speaking the chat-completions protocol
pub struct OpenAICompatProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAICompatProvider {
    /// Create a provider; `api_key` may be absent for local endpoints
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn build_headers(&self, model: &Model) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::InvalidConfig(format!("API key is not a valid header: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        // Add model-specific headers
        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<HeaderName>(),
                value.parse::<HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }

    fn build_request(&self, model: &Model, context: &Context) -> ChatRequest {
        let mut messages = Vec::new();

        // System prompt goes first
        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system_prompt.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for msg in &context.messages {
            messages.push(convert_message(msg));
        }

        let tools: Vec<ChatTool> = context
            .tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                },
            })
            .collect();

        let has_tools = !tools.is_empty();
        ChatRequest {
            model: model.id.clone(),
            messages,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: Some(model.max_tokens),
            tools: has_tools.then_some(tools),
            tool_choice: has_tools.then(|| serde_json::json!("auto")),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAICompatProvider {
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no base URL configured for model {}",
                model.id
            )));
        }

        let request = self.build_request(model, context);
        let url = format!("{}/chat/completions", model.base_url);
        let headers = self.build_headers(model)?;
        tracing::debug!(
            url = %url,
            messages = request.messages.len(),
            "Opening completion stream"
        );

        let request_builder = self.client.post(&url).headers(headers).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

/// Decode streamed tool-call argument text.
///
/// Empty text means "no arguments". Text that is not valid JSON is preserved
/// verbatim as a JSON string.
pub fn parse_tool_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Inverse of [`parse_tool_arguments`] for echoing a call back in the transcript.
fn encode_tool_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg {
        Message::User { .. } => ChatMessage {
            role: "user".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for c in content {
                match c {
                    Content::Text { text } => text_parts.push(text.clone()),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => tool_calls.push(ChatToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: name.clone(),
                            arguments: encode_tool_arguments(arguments),
                        },
                    }),
                }
            }

            ChatMessage {
                role: "assistant".to_string(),
                content: (!text_parts.is_empty()).then(|| text_parts.join("")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult { tool_call_id, .. } => ChatMessage {
            role: "tool".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (id, name, args)
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start {
            message: Message::Assistant {
                content: vec![],
                metadata: AssistantMetadata {
                    model: Some(model.id.clone()),
                    ..Default::default()
                },
            },
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: std::result::Result<StreamChunk, _> = serde_json::from_str(&msg.data);
                    match chunk {
                        Ok(chunk) => {
                            if let Some(err) = chunk.error {
                                yield MessageEvent::Error {
                                    message: format!("API error: {}", err.message),
                                };
                                return;
                            }

                            for choice in &chunk.choices {
                                if let Some(ref content) = choice.delta.content {
                                    accumulated_text.push_str(content);
                                    yield MessageEvent::TextDelta {
                                        content_index: 0,
                                        delta: content.clone(),
                                    };
                                }

                                if let Some(ref tcs) = choice.delta.tool_calls {
                                    for tc in tcs {
                                        let idx = tc.index as usize;

                                        while tool_calls.len() <= idx {
                                            tool_calls.push((String::new(), String::new(), String::new()));
                                        }

                                        if let Some(ref id) = tc.id {
                                            tool_calls[idx].0 = id.clone();
                                        }
                                        if let Some(ref function) = tc.function {
                                            if let Some(ref name) = function.name {
                                                tool_calls[idx].1 = name.clone();
                                                yield MessageEvent::ToolCallStart {
                                                    content_index: idx,
                                                    id: tool_calls[idx].0.clone(),
                                                    name: name.clone(),
                                                };
                                            }
                                            if let Some(ref args) = function.arguments {
                                                tool_calls[idx].2.push_str(args);
                                                yield MessageEvent::ToolCallDelta {
                                                    content_index: idx,
                                                    delta: args.clone(),
                                                };
                                            }
                                        }
                                    }
                                }

                                if let Some(ref reason) = choice.finish_reason {
                                    finish_reason = Some(reason.clone());
                                }
                            }

                            if let Some(ref stream_usage) = chunk.usage {
                                usage.input = stream_usage.prompt_tokens;
                                usage.output = stream_usage.completion_tokens;
                            }
                        }
                        Err(e) => {
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status, body),
                    };
                    return;
                }
                Err(e) => {
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();

        if !accumulated_text.is_empty() {
            content.push(Content::Text {
                text: accumulated_text,
            });
        }

        for (idx, (id, name, args)) in tool_calls.into_iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            // Some providers omit ids; synthesize a stable one so results can be matched.
            let id = if id.is_empty() { format!("call_{}", idx) } else { id };
            content.push(Content::ToolCall {
                id,
                name,
                arguments: parse_tool_arguments(&args),
            });
        }

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("tool_calls") => StopReason::ToolUse,
            _ => StopReason::Stop,
        };

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                provider: Some(model.provider),
                model: Some(model.id.clone()),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: i32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
