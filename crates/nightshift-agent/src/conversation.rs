//! The transcript of a single run

use nightshift_ai::{Context, Message, Tool, Usage};

use crate::goal::Goal;

/// Append-only transcript plus the fixed tool schema; the whole of it is
/// sent with every completion request.
#[derive(Debug, Clone)]
pub struct Conversation {
    context: Context,
    total_usage: Usage,
}

impl Conversation {
    /// Open a transcript with the goal's system turn and instruction
    pub fn start(goal: &Goal, tools: Vec<Tool>) -> Self {
        let mut context = Context::with_system(goal.system_prompt.clone());
        context.tools = tools;
        context.push(Message::user(goal.instruction.clone()));
        Self {
            context,
            total_usage: Usage::default(),
        }
    }

    /// Append a turn, counting its usage
    pub fn push(&mut self, message: Message) {
        if let Some(usage) = message.usage() {
            self.total_usage.accumulate(usage);
        }
        self.context.push(message);
    }

    /// The request payload for the next turn
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn messages(&self) -> &[Message] {
        &self.context.messages
    }

    pub fn total_usage(&self) -> &Usage {
        &self.total_usage
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.context.messages
    }
}
