//! System and instruction turns for task and CI-fix goals

use nightshift_agent::Goal;
use nightshift_agent::tools::{ListSettings, list_files};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::ci::CheckStatus;

/// Corrective turn for CI fixes: the failing check is the target, not just
/// a local build
pub const CI_FIX_VERIFICATION_REMINDER: &str = "SYSTEM: Build has NOT been verified. You MUST run the failing checks locally (at least './gradlew build') and see them pass before finishing.";

/// Workspace facts embedded in every system turn, gathered once per session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    pub architecture_guide: String,
    pub project_files: String,
}

impl ProjectContext {
    /// Read the architecture guide (if present) and list the workspace
    pub fn load(root: &Path, guide: &Path, list: &ListSettings) -> Self {
        let guide_path = root.join(guide);
        let architecture_guide = if guide_path.is_file() {
            match fs::read_to_string(&guide_path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to read {}: {}", guide_path.display(), e);
                    String::new()
                }
            }
        } else {
            debug!("No architecture guide at {}", guide_path.display());
            String::new()
        };

        let project_files = list_files(root, root, list).unwrap_or_else(|e| {
            warn!("Failed to list project files: {}", e);
            String::new()
        });

        Self {
            architecture_guide,
            project_files,
        }
    }
}

/// System turn for working a task from the queue
pub fn task_system_prompt(project: &ProjectContext) -> String {
    format!(
        "You are the Night Shift Agent, an autonomous coding assistant for a Kotlin Multiplatform project.

ARCHITECTURE GUIDE:
{guide}

PROJECT FILES:
{files}

INSTRUCTIONS:
1. Analyze the task carefully.
2. Read necessary files to understand the existing code.
3. Modify or create files using 'write_file'.
4. **CRITICAL**: After ANY code changes, you MUST run './gradlew build' to verify compilation.
5. If the build fails, analyze the error and fix the code. Repeat until build passes.
6. Run tests with './gradlew test' if appropriate.
7. Do not commit or push; verified changes are committed for you.

GUARDRAILS:
- NEVER claim a task is complete if the build has not been verified.
- If you modify code, you MUST run the build before finishing.
- If the build fails, you MUST attempt to fix it.
- Be concise in your reasoning.

When you have completed the task with a PASSING build, provide a summary of what you did.",
        guide = project.architecture_guide,
        files = project.project_files,
    )
}

pub fn task_goal(project: &ProjectContext, task: &str) -> Goal {
    Goal::task(task_system_prompt(project), format!("TASK: {}", task))
}

/// System turn for repairing a red pull request
pub fn ci_fix_system_prompt(project: &ProjectContext) -> String {
    format!(
        "You are the Night Shift Agent, an autonomous coding assistant for a Kotlin Multiplatform project. \
Continuous integration is failing on a pull request you opened.

ARCHITECTURE GUIDE:
{guide}

PROJECT FILES:
{files}

INSTRUCTIONS:
1. Work out from the failing checks what broke. Reproduce it locally with 'run_shell'.
2. Read the relevant files before changing them.
3. Fix the cause using 'write_file'. Do not disable or skip checks.
4. **CRITICAL**: After ANY code changes, you MUST run './gradlew build' to verify compilation.
5. Run './gradlew test' if a test check is failing.
6. Do not commit or push; verified changes are committed for you.

GUARDRAILS:
- NEVER claim CI is fixed if the build has not been verified.
- Keep the fix minimal and focused on the failing checks.

When the build PASSES, summarize the cause and the fix.",
        guide = project.architecture_guide,
        files = project.project_files,
    )
}

/// Instruction naming each failing check and where its log lives
pub fn ci_fix_instruction(failing: &[CheckStatus], attempt: u32, max_attempts: u32) -> String {
    let mut text = format!(
        "CI FIX (attempt {}/{}): the following checks failed on the pull request.\n",
        attempt, max_attempts
    );
    for check in failing {
        match &check.link {
            Some(link) => {
                let _ = writeln!(text, "- {} ({})", check.name, link);
            }
            None => {
                let _ = writeln!(text, "- {}", check.name);
            }
        }
    }
    if failing.is_empty() {
        text.push_str("- (no check details available)\n");
    }
    text.push_str("Find the cause, fix it and verify the build.");
    text
}

pub fn ci_fix_goal(
    project: &ProjectContext,
    failing: &[CheckStatus],
    attempt: u32,
    max_attempts: u32,
) -> Goal {
    Goal::ci_fix(
        ci_fix_system_prompt(project),
        ci_fix_instruction(failing, attempt, max_attempts),
    )
    .with_verification_reminder(CI_FIX_VERIFICATION_REMINDER)
}

/// Commit message for a verified task: first line of the task, bounded
pub fn commit_message(task: &str) -> String {
    const MAX_SUBJECT: usize = 72;
    let subject = task.lines().next().unwrap_or("").trim();
    let subject: String = if subject.chars().count() > MAX_SUBJECT {
        let cut: String = subject.chars().take(MAX_SUBJECT - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        subject.to_string()
    };
    format!("nightshift: {}", subject)
}

/// Title and body of the session's pull request
pub fn pull_request_text(completed: &[(String, Option<String>)]) -> (String, String) {
    let title = match completed {
        [(task, _)] => format!("Night shift: {}", task),
        _ => format!("Night shift: {} tasks", completed.len()),
    };

    let mut body = String::from("Changes made by the night shift agent. Every task below finished with a passing build.\n\n## Completed tasks\n\n");
    for (task, _) in completed {
        let _ = writeln!(body, "- [x] {}", task);
    }
    for (task, report) in completed {
        if let Some(report) = report.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            let _ = write!(body, "\n### {}\n\n{}\n", task, report);
        }
    }
    (title, body)
}
