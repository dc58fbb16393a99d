//! Streaming event types and utilities

use crate::error::{Error, Result};
use crate::types::{Message, StopReason, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during message streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Drain a stream until its terminal event and return the completed message.
///
/// Usage reported on the `Done` event is copied into the assistant metadata.
pub async fn collect_message(mut stream: MessageEventStream) -> Result<Message> {
    while let Some(event) = stream.next().await {
        match event {
            MessageEvent::Done {
                mut message,
                stop_reason,
                usage,
            } => {
                if let Message::Assistant { metadata, .. } = &mut message {
                    metadata.usage = usage;
                    metadata.stop_reason = Some(stop_reason);
                }
                return Ok(message);
            }
            MessageEvent::Error { message } => return Err(Error::Sse(message)),
            _ => {}
        }
    }
    Err(Error::UnexpectedResponse(
        "stream ended without a final message".to_string(),
    ))
}
