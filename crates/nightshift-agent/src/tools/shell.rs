//! `run_shell`

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::build_state::{BuildVerificationState, CommandClassifier};
use crate::tool::ToolResult;

/// Run `command` through `sh -c` in `cwd`.
///
/// The result is stdout followed by stderr. Build- and test-like commands
/// update `build`; a timed out command leaves it untouched and the child is
/// killed.
pub(super) async fn run_shell(
    cwd: &Path,
    command: &str,
    timeout: Duration,
    classifier: &CommandClassifier,
    build: &mut BuildVerificationState,
) -> ToolResult {
    tracing::info!("Executing: {}", command);

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Command error: {}", e);
            return ToolResult::error(format!("Error executing command: {}", e));
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Command error: {}", e);
            return ToolResult::error(format!("Error executing command: {}", e));
        }
        Err(_) => {
            tracing::error!("Command timed out: {}", command);
            return ToolResult::error(format!(
                "Error: Command timed out after {} seconds",
                timeout.as_secs()
            ));
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    // Killed by a signal
    let exit_code = output.status.code().unwrap_or(-1);

    let kind = classifier.classify(command);
    if kind.is_tracked() {
        build.record_command(kind, exit_code, &text);
        if exit_code == 0 {
            tracing::info!("Command succeeded (exit code 0)");
        } else {
            tracing::warn!("Command failed (exit code {})", exit_code);
        }
    }

    if exit_code != 0 {
        return ToolResult::error(format!(
            "Command failed with exit code {}:\n{}",
            exit_code, text
        ));
    }
    ToolResult::text(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run(command: &str, build: &mut BuildVerificationState) -> ToolResult {
        let dir = TempDir::new().unwrap();
        run_shell(
            dir.path(),
            command,
            Duration::from_secs(30),
            &CommandClassifier::default(),
            build,
        )
        .await
    }

    #[tokio::test]
    async fn test_successful_build_command() {
        let mut build = BuildVerificationState::new();
        let result = run("echo gradlew build", &mut build).await;

        assert!(!result.is_error);
        assert_eq!(result.text_content(), "gradlew build\n");
        assert!(build.build_attempted());
        assert!(build.build_passed());
    }

    #[tokio::test]
    async fn test_failing_build_command() {
        let mut build = BuildVerificationState::new();
        let result = run("echo gradlew build; echo oops >&2; exit 3", &mut build).await;

        assert!(result.is_error);
        assert_eq!(
            result.text_content(),
            "Command failed with exit code 3:\ngradlew build\noops\n"
        );
        assert!(build.build_attempted());
        assert!(!build.build_passed());
        assert_eq!(build.last_error(), Some("gradlew build\noops\n"));
    }

    #[tokio::test]
    async fn test_untracked_command_leaves_state() {
        let mut build = BuildVerificationState::new();
        let result = run("echo hello", &mut build).await;

        assert_eq!(result.text_content(), "hello\n");
        assert_eq!(build, BuildVerificationState::default());
    }

    #[tokio::test]
    async fn test_runs_in_workspace_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let mut build = BuildVerificationState::new();

        let result = run_shell(
            dir.path(),
            "cat marker.txt",
            Duration::from_secs(30),
            &CommandClassifier::default(),
            &mut build,
        )
        .await;
        assert_eq!(result.text_content(), "here");
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_not_passed() {
        let dir = TempDir::new().unwrap();
        let mut build = BuildVerificationState::new();

        let result = run_shell(
            dir.path(),
            "sleep 5; echo gradlew build",
            Duration::from_secs(1),
            &CommandClassifier::default(),
            &mut build,
        )
        .await;

        assert!(result.is_error);
        assert_eq!(
            result.text_content(),
            "Error: Command timed out after 1 seconds"
        );
        assert!(!build.build_passed());
    }
}
