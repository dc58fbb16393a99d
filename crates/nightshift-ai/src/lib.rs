//! nightshift-ai: completion-service abstraction layer
//!
//! This crate provides the message and tool types exchanged with a remote
//! reasoning model, plus a streaming client for OpenAI-compatible
//! chat-completions endpoints (OpenRouter by default).

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
