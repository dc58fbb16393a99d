//! What a conversation run is asked to achieve

use serde::{Deserialize, Serialize};

/// Corrective turn sent when the model tries to finish before a build passed
pub const DEFAULT_VERIFICATION_REMINDER: &str = "SYSTEM: Build has NOT been verified. You MUST run './gradlew build' to verify your changes compile. Do not finish until the build passes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    /// Complete one task from the queue
    Task,
    /// Repair a failing CI run on an open pull request
    CiFix,
}

/// Input to one run of the conversation loop.
///
/// Both goal kinds drive the same loop; they differ only in the system turn,
/// the opening instruction and the wording of the corrective turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub kind: GoalKind,
    pub system_prompt: String,
    pub instruction: String,
    pub verification_reminder: String,
}

impl Goal {
    pub fn new(kind: GoalKind, system_prompt: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            kind,
            system_prompt: system_prompt.into(),
            instruction: instruction.into(),
            verification_reminder: DEFAULT_VERIFICATION_REMINDER.to_string(),
        }
    }

    pub fn task(system_prompt: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::new(GoalKind::Task, system_prompt, instruction)
    }

    pub fn ci_fix(system_prompt: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::new(GoalKind::CiFix, system_prompt, instruction)
    }

    /// Replace the corrective turn text
    pub fn with_verification_reminder(mut self, reminder: impl Into<String>) -> Self {
        self.verification_reminder = reminder.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_goal_uses_default_reminder() {
        let goal = Goal::task("system", "Add a spinner");
        assert_eq!(goal.kind, GoalKind::Task);
        assert_eq!(goal.verification_reminder, DEFAULT_VERIFICATION_REMINDER);
    }

    #[test]
    fn test_reminder_override() {
        let goal = Goal::ci_fix("system", "Fix CI").with_verification_reminder("run it");
        assert_eq!(goal.kind, GoalKind::CiFix);
        assert_eq!(goal.verification_reminder, "run it");
    }
}
