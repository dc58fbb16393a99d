//! The conversation loop

use nightshift_ai::{Message, Usage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    build_state::BuildVerificationState,
    conversation::Conversation,
    events::AgentEvent,
    goal::Goal,
    retry::RetryPolicy,
    tool::ToolDispatcher,
    transport::Transport,
};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard ceiling on loop iterations per run
    pub max_iterations: u32,
    /// Whether a passing build is required before a run may finish
    pub require_build_verification: bool,
    /// Backoff for the completion call
    pub retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            require_build_verification: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model stopped asking for tools and the build was verified
    Success,
    /// The iteration ceiling was reached first
    ExhaustedIterations,
    /// The completion call kept failing after all retries
    RemoteFailure { error: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub iterations: u32,
    /// Number of corrective turns sent because the build was not verified
    pub corrective_turns: u32,
    pub build_state: BuildVerificationState,
    pub usage: Usage,
    /// Last non-empty text the model produced
    pub final_report: Option<String>,
    pub transcript: Vec<Message>,
}

/// Runs goals to completion against a transport and a tool set
pub struct Agent {
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    tools: Arc<dyn ToolDispatcher>,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        tools: Arc<dyn ToolDispatcher>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            transport,
            tools,
            event_tx,
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Drive one goal until it is verified done, the iteration ceiling is
    /// hit, or the completion service gives up.
    ///
    /// Build state and transcript are fresh for every call.
    pub async fn run(&self, goal: &Goal) -> RunReport {
        let mut build = BuildVerificationState::new();
        let mut conversation = Conversation::start(goal, self.tools.definitions());
        let mut iterations = 0u32;
        let mut corrective_turns = 0u32;
        let mut final_report: Option<String> = None;

        self.emit(AgentEvent::RunStart { goal: goal.kind });

        let outcome = loop {
            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    max_iterations = self.config.max_iterations,
                    "Reached max iterations without completing"
                );
                break RunOutcome::ExhaustedIterations;
            }
            iterations += 1;

            tracing::debug!(
                iteration = iterations,
                max_iterations = self.config.max_iterations,
                "--- Iteration {}/{} ---",
                iterations,
                self.config.max_iterations
            );
            self.emit(AgentEvent::IterationStart {
                iteration: iterations,
                max_iterations: self.config.max_iterations,
            });

            let transport = &self.transport;
            let context = conversation.context();
            let message = match self
                .config
                .retry
                .invoke(move |_| transport.complete(context))
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("Completion request failed: {}", e);
                    self.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    break RunOutcome::RemoteFailure {
                        error: e.to_string(),
                    };
                }
            };

            let text = message.text();
            if !text.trim().is_empty() {
                tracing::info!("Agent: {}", text);
                final_report = Some(text);
            }

            let tool_calls = message.tool_calls();
            conversation.push(message.clone());
            self.emit(AgentEvent::MessageEnd { message });

            if tool_calls.is_empty() {
                if build.is_verified(self.config.require_build_verification) {
                    tracing::info!(build = %build, "Agent finished with verified build");
                    break RunOutcome::Success;
                }

                corrective_turns += 1;
                tracing::warn!(
                    build = %build,
                    "Agent tried to finish without verifying build"
                );
                self.emit(AgentEvent::VerificationRejected { corrective_turns });
                conversation.push(Message::user(goal.verification_reminder.clone()));
                continue;
            }

            for call in tool_calls {
                tracing::debug!(tool = %call.name, "Calling tool: {}", call.name);
                self.emit(AgentEvent::ToolExecutionStart {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });

                let before = build.clone();
                let result = self.tools.dispatch(&call, &mut build).await;

                if build != before {
                    tracing::info!(build = %build, "Build state changed");
                    self.emit(AgentEvent::BuildStateChanged {
                        state: build.clone(),
                    });
                }

                self.emit(AgentEvent::ToolExecutionEnd {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    result: result.text_content(),
                    is_error: result.is_error,
                });

                conversation.push(Message::tool_result(
                    call.id,
                    call.name,
                    result.content,
                    result.is_error,
                ));
            }
        };

        let usage = conversation.total_usage().clone();
        self.emit(AgentEvent::RunEnd {
            outcome: outcome.clone(),
            iterations,
            usage: usage.clone(),
        });

        RunReport {
            outcome,
            iterations,
            corrective_turns,
            build_state: build,
            usage,
            final_report,
            transcript: conversation.into_messages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_state::CommandKind;
    use crate::goal::DEFAULT_VERIFICATION_REMINDER;
    use crate::tool::ToolResult;
    use crate::tools::{ToolSettings, WorkspaceTools};
    use async_trait::async_trait;
    use nightshift_ai::{Content, Context, ToolCall};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Replays scripted assistant turns; once the script runs out it keeps
    /// returning `fallback`.
    struct MockTransport {
        responses: Mutex<Vec<Message>>,
        fallback: Option<Message>,
        calls: Mutex<u32>,
    }

    impl MockTransport {
        fn new(responses: Vec<Message>) -> Self {
            Self {
                responses: Mutex::new(responses),
                fallback: None,
                calls: Mutex::new(0),
            }
        }

        fn always(message: Message) -> Self {
            Self {
                responses: Mutex::new(vec![]),
                fallback: Some(message),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn complete(&self, _context: &Context) -> nightshift_ai::Result<Message> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return self.fallback.clone().ok_or_else(|| {
                    nightshift_ai::Error::UnexpectedResponse("script exhausted".into())
                });
            }
            Ok(responses.remove(0))
        }
    }

    /// `build` passes the build, `write` invalidates it, anything else is a no-op
    struct ScriptedTools {
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTools {
        fn new() -> Self {
            Self {
                seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl ToolDispatcher for ScriptedTools {
        fn definitions(&self) -> Vec<nightshift_ai::Tool> {
            vec![]
        }

        async fn dispatch(&self, call: &ToolCall, build: &mut BuildVerificationState) -> ToolResult {
            self.seen.lock().push(call.name.clone());
            match call.name.as_str() {
                "build" => build.record_command(
                    CommandKind {
                        build: true,
                        test: false,
                    },
                    0,
                    "BUILD SUCCESSFUL",
                ),
                "write" => build.invalidate(),
                _ => {}
            }
            ToolResult::text("ok")
        }
    }

    fn finish(text: &str) -> Message {
        Message::assistant(vec![Content::text(text)])
    }

    fn tool(id: &str, name: &str) -> Message {
        Message::assistant(vec![Content::tool_call(id, name, serde_json::json!({}))])
    }

    fn agent(config: AgentConfig, transport: Arc<MockTransport>, tools: Arc<dyn ToolDispatcher>) -> Agent {
        Agent::new(config, transport, tools)
    }

    fn reminders(transcript: &[Message]) -> usize {
        transcript
            .iter()
            .filter(|m| m.role() == "user" && m.text() == DEFAULT_VERIFICATION_REMINDER)
            .count()
    }

    #[tokio::test]
    async fn test_unverified_finish_gets_one_corrective_turn() {
        let transport = Arc::new(MockTransport::new(vec![
            finish("All done!"),
            tool("c1", "build"),
            finish("Build passes, done."),
        ]));
        let agent = agent(AgentConfig::default(), transport.clone(), Arc::new(ScriptedTools::new()));

        let report = agent.run(&Goal::task("system", "Add a spinner")).await;

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.corrective_turns, 1);
        assert_eq!(reminders(&report.transcript), 1);
        assert_eq!(report.iterations, 3);
        assert_eq!(transport.calls(), 3);
        assert_eq!(report.final_report.as_deref(), Some("Build passes, done."));
    }

    #[tokio::test]
    async fn test_write_after_build_requires_rebuild() {
        let transport = Arc::new(MockTransport::new(vec![
            tool("c1", "build"),
            tool("c2", "write"),
            finish("done"),
            tool("c3", "build"),
            finish("done"),
        ]));
        let tools = Arc::new(ScriptedTools::new());
        let agent = agent(AgentConfig::default(), transport, tools.clone());

        let report = agent.run(&Goal::task("system", "task")).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.corrective_turns, 1);
        assert!(report.build_state.build_passed());
        assert_eq!(*tools.seen.lock(), vec!["build", "write", "build"]);
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let transport = Arc::new(MockTransport::always(tool("c1", "noop")));
        let config = AgentConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let agent = agent(config, transport.clone(), Arc::new(ScriptedTools::new()));

        let report = agent.run(&Goal::task("system", "task")).await;

        assert_eq!(report.outcome, RunOutcome::ExhaustedIterations);
        assert_eq!(report.iterations, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_never_succeeds_without_build() {
        let transport = Arc::new(MockTransport::always(finish("done")));
        let config = AgentConfig {
            max_iterations: 4,
            ..Default::default()
        };
        let agent = agent(config, transport, Arc::new(ScriptedTools::new()));

        let report = agent.run(&Goal::task("system", "task")).await;

        assert_eq!(report.outcome, RunOutcome::ExhaustedIterations);
        assert_eq!(report.corrective_turns, 4);
    }

    #[tokio::test]
    async fn test_verification_disabled_finishes_immediately() {
        let transport = Arc::new(MockTransport::new(vec![finish("done")]));
        let config = AgentConfig {
            require_build_verification: false,
            ..Default::default()
        };
        let agent = agent(config, transport, Arc::new(ScriptedTools::new()));

        let report = agent.run(&Goal::task("system", "task")).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.corrective_turns, 0);
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_after_retries() {
        let transport = Arc::new(MockTransport::new(vec![]));
        let config = AgentConfig {
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            ..Default::default()
        };
        let agent = agent(config, transport.clone(), Arc::new(ScriptedTools::new()));

        let report = agent.run(&Goal::task("system", "task")).await;

        match report.outcome {
            RunOutcome::RemoteFailure { error } => assert!(error.contains("script exhausted")),
            other => panic!("expected remote failure, got {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_malformed_arguments_do_not_abort() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = Arc::new(WorkspaceTools::new(dir.path(), ToolSettings::default()).unwrap());
        let transport = Arc::new(MockTransport::new(vec![
            Message::assistant(vec![Content::tool_call(
                "c1",
                "read_file",
                serde_json::Value::String("{\"path\": ".into()),
            )]),
            finish("gave up on reading"),
        ]));
        let config = AgentConfig {
            require_build_verification: false,
            ..Default::default()
        };
        let agent = agent(config, transport, tools);

        let report = agent.run(&Goal::task("system", "task")).await;

        assert!(report.outcome.is_success());
        let tool_result = report
            .transcript
            .iter()
            .find(|m| m.role() == "tool_result")
            .unwrap();
        match tool_result {
            Message::ToolResult { is_error, .. } => assert!(*is_error),
            _ => unreachable!(),
        }
        assert!(
            tool_result
                .text()
                .starts_with("Error: Invalid JSON arguments:")
        );
    }

    #[tokio::test]
    async fn test_events_report_build_changes_and_end() {
        let transport = Arc::new(MockTransport::new(vec![tool("c1", "build"), finish("done")]));
        let agent = agent(AgentConfig::default(), transport, Arc::new(ScriptedTools::new()));
        let mut rx = agent.subscribe();

        let report = agent.run(&Goal::task("system", "task")).await;
        assert!(report.outcome.is_success());

        let mut saw_build_change = false;
        let mut saw_end = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::BuildStateChanged { state } => {
                    saw_build_change = true;
                    assert!(state.build_passed());
                }
                AgentEvent::RunEnd { outcome, iterations, .. } => {
                    saw_end = true;
                    assert_eq!(outcome, RunOutcome::Success);
                    assert_eq!(iterations, 2);
                }
                _ => {}
            }
        }
        assert!(saw_build_change);
        assert!(saw_end);
    }
}
