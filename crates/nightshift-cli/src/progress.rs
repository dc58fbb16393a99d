//! Console progress lines rendered from agent events

use nightshift_agent::{AgentEvent, RunOutcome};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const PREVIEW_CHARS: usize = 80;

/// First line of `text`, cut to `max` chars
fn preview(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() > max {
        let cut: String = first.chars().take(max).collect();
        format!("{}...", cut)
    } else if text.trim().lines().nth(1).is_some() {
        format!("{}...", first)
    } else {
        first.to_string()
    }
}

/// One progress line per interesting event
pub fn render(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::IterationStart {
            iteration,
            max_iterations,
        } => Some(format!("-- iteration {}/{}", iteration, max_iterations)),
        AgentEvent::ToolExecutionStart {
            tool_name,
            arguments,
            ..
        } => {
            let detail = ["command", "path"]
                .iter()
                .find_map(|k| arguments.get(*k).and_then(|v| v.as_str()))
                .map(|s| format!(" {}", preview(s, PREVIEW_CHARS)))
                .unwrap_or_default();
            Some(format!("   [{}{}]", tool_name, detail))
        }
        AgentEvent::ToolExecutionEnd {
            result, is_error, ..
        } => is_error.then(|| format!("     error: {}", preview(result, PREVIEW_CHARS))),
        AgentEvent::RunEnd {
            outcome,
            iterations,
            usage,
        } => {
            let status = match outcome {
                RunOutcome::Success => "verified".to_string(),
                RunOutcome::ExhaustedIterations => "iteration limit reached".to_string(),
                RunOutcome::RemoteFailure { error } => format!("remote failure: {}", error),
            };
            Some(format!(
                "-- run ended after {} iterations: {} [{} in, {} out]",
                iterations, status, usage.input, usage.output
            ))
        }
        // Logged by the agent through tracing
        AgentEvent::MessageEnd { .. }
        | AgentEvent::BuildStateChanged { .. }
        | AgentEvent::VerificationRejected { .. }
        | AgentEvent::Error { .. } => None,
        AgentEvent::RunStart { .. } => None,
    }
}

/// Print events from `rx` until the agent is dropped
pub fn spawn_printer(mut rx: broadcast::Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render(&event) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("progress printer skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightshift_ai::Usage;
    use serde_json::json;

    #[test]
    fn test_tool_start_shows_command() {
        let event = AgentEvent::ToolExecutionStart {
            tool_call_id: "call_1".into(),
            tool_name: "run_shell".into(),
            arguments: json!({"command": "./gradlew build"}),
        };
        assert_eq!(render(&event).unwrap(), "   [run_shell ./gradlew build]");
    }

    #[test]
    fn test_successful_tool_end_is_quiet() {
        let ok = AgentEvent::ToolExecutionEnd {
            tool_call_id: "call_1".into(),
            tool_name: "read_file".into(),
            result: "fun main() {}".into(),
            is_error: false,
        };
        assert!(render(&ok).is_none());

        let err = AgentEvent::ToolExecutionEnd {
            tool_call_id: "call_2".into(),
            tool_name: "run_shell".into(),
            result: "Command failed with exit code 1:\ne: Unresolved reference".into(),
            is_error: true,
        };
        assert_eq!(
            render(&err).unwrap(),
            "     error: Command failed with exit code 1:..."
        );
    }

    #[test]
    fn test_logged_events_are_not_repeated() {
        let rejected = AgentEvent::VerificationRejected {
            corrective_turns: 1,
        };
        assert!(render(&rejected).is_none());

        let error = AgentEvent::Error {
            message: "connection reset".into(),
        };
        assert!(render(&error).is_none());
    }

    #[test]
    fn test_run_end() {
        let event = AgentEvent::RunEnd {
            outcome: RunOutcome::ExhaustedIterations,
            iterations: 50,
            usage: Usage {
                input: 1200,
                output: 300,
            },
        };
        assert_eq!(
            render(&event).unwrap(),
            "-- run ended after 50 iterations: iteration limit reached [1200 in, 300 out]"
        );
    }

    #[test]
    fn test_preview_cuts_long_lines() {
        let long = "a".repeat(100);
        assert_eq!(preview(&long, 10), format!("{}...", "a".repeat(10)));
        assert_eq!(preview("short", 10), "short");
    }
}
