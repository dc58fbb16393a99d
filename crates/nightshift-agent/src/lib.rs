//! nightshift-agent: build-verified tool-calling loop
//!
//! This crate provides the conversation loop that drives a remote model
//! through tool calls against a workspace and refuses to finish until a
//! build it ran itself has passed.

pub mod agent;
pub mod build_state;
pub mod conversation;
pub mod error;
pub mod events;
pub mod goal;
pub mod retry;
pub mod tool;
pub mod tools;
pub mod transport;

pub use agent::{Agent, AgentConfig, RunOutcome, RunReport};
pub use build_state::{BuildVerificationState, CommandClassifier, CommandKind};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use goal::{Goal, GoalKind};
pub use retry::RetryPolicy;
pub use tool::{ToolDispatcher, ToolResult};
pub use tools::{ListSettings, ToolSettings, WorkspaceTools};
pub use transport::{ProviderTransport, Transport};
