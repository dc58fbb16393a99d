//! Agent event types

use nightshift_ai::{Message, Usage};
use serde::{Deserialize, Serialize};

use crate::agent::RunOutcome;
use crate::build_state::BuildVerificationState;
use crate::goal::GoalKind;

/// Events broadcast while a run is in progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run started
    RunStart { goal: GoalKind },

    /// A new iteration of the loop started
    IterationStart { iteration: u32, max_iterations: u32 },

    /// An assistant turn arrived and was appended
    MessageEnd { message: Message },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// A tool call changed the run's build state
    BuildStateChanged { state: BuildVerificationState },

    /// The model tried to finish without a verified build
    VerificationRejected { corrective_turns: u32 },

    /// The run finished
    RunEnd {
        outcome: RunOutcome,
        iterations: u32,
        usage: Usage,
    },

    /// Error occurred
    Error { message: String },
}
