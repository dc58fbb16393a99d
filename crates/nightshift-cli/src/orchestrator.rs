//! Session driver: task queue, branch, pull request and CI remediation

use anyhow::Result;
use async_trait::async_trait;
use nightshift_agent::Agent;
use nightshift_ai::Usage;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ci::{CheckStatus, CiFixer, CiMonitor, CiReport, CiSettings};
use crate::prompts::{ProjectContext, ci_fix_goal, commit_message, pull_request_text, task_goal};
use crate::tasks::{TaskOutcome, TaskQueue};
use crate::vcs::{BranchWorkflow, PullRequest, Repository};

const RULE: &str = "============================================================";

/// Session-level knobs
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Pause between tasks
    pub task_delay: Duration,
    /// Requeue `[!]` tasks before starting
    pub retry_failed: bool,
    pub ci: CiSettings,
    pub log_file: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            task_delay: Duration::from_secs(2),
            retry_failed: false,
            ci: CiSettings::default(),
            log_file: None,
        }
    }
}

/// What a session did
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed tasks put back in the queue at startup
    pub requeued: usize,
    pub pull_request: Option<PullRequest>,
    pub ci: Option<CiReport>,
    pub usage: Usage,
    pub log_file: Option<PathBuf>,
    /// Why the queue stopped before it was empty
    pub stopped_early: Option<String>,
}

impl SessionSummary {
    fn new(session_id: Uuid, log_file: Option<PathBuf>) -> Self {
        Self {
            session_id,
            processed: 0,
            succeeded: 0,
            failed: 0,
            requeued: 0,
            pull_request: None,
            ci: None,
            usage: Usage::default(),
            log_file,
            stopped_early: None,
        }
    }

    /// Write the summary to the log, one line at a time
    pub fn log(&self) {
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Session Summary ({})", self.session_id)?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "   Tasks processed: {}", self.processed)?;
        writeln!(f, "   Tasks succeeded: {}", self.succeeded)?;
        writeln!(f, "   Tasks failed:    {}", self.failed)?;
        if self.requeued > 0 {
            writeln!(f, "   Tasks requeued:  {}", self.requeued)?;
        }
        if let Some(reason) = &self.stopped_early {
            writeln!(f, "   Stopped early:   {}", reason)?;
        }
        match &self.pull_request {
            Some(pr) => writeln!(f, "   Pull request:    {}", pr)?,
            None => writeln!(f, "   Pull request:    none")?,
        }
        if let Some(ci) = &self.ci {
            write!(
                f,
                "   CI:              {} ({} fix attempts, {} pushed",
                ci.status, ci.fix_attempts, ci.successful_fixes
            )?;
            if ci.timed_out {
                write!(f, ", gave up waiting")?;
            }
            writeln!(f, ")")?;
        }
        writeln!(
            f,
            "   Tokens:          {} in, {} out",
            self.usage.input, self.usage.output
        )?;
        if let Some(path) = &self.log_file {
            writeln!(f, "   Log file:        {}", path.display())?;
        }
        Ok(())
    }
}

/// Commit the working tree. Failures are logged; the session goes on.
async fn commit(repo: &dyn Repository, message: &str) -> bool {
    match repo.commit_all(message).await {
        Ok(true) => {
            info!(commit = message, "Committed changes");
            true
        }
        Ok(false) => {
            info!("Nothing to commit");
            false
        }
        Err(e) => {
            warn!("Commit failed: {:#}", e);
            false
        }
    }
}

/// Runs the conversation loop on a CI-fix goal, then commits and pushes
struct AgentCiFixer<'a> {
    agent: &'a Agent,
    project: &'a ProjectContext,
    repo: &'a dyn Repository,
    workflow: &'a BranchWorkflow,
    max_attempts: u32,
    /// Tokens spent across every fix attempt
    usage: Mutex<Usage>,
}

#[async_trait]
impl CiFixer for AgentCiFixer<'_> {
    async fn fix(&self, failing: &[CheckStatus], attempt: u32) -> bool {
        let goal = ci_fix_goal(self.project, failing, attempt, self.max_attempts);
        let report = self.agent.run(&goal).await;
        self.usage.lock().accumulate(&report.usage);
        if !report.outcome.is_success() {
            warn!(attempt, outcome = ?report.outcome, "CI fix run did not finish with a verified build");
            return false;
        }
        if let Some(text) = &report.final_report {
            info!("CI fix report:\n{}", text);
        }

        let message = format!("nightshift: fix CI (attempt {})", attempt);
        if !commit(self.repo, &message).await {
            warn!(attempt, "CI fix produced no commit");
            return false;
        }
        match self.workflow.push().await {
            Ok(()) => {
                info!(attempt, "Pushed CI fix");
                true
            }
            Err(e) => {
                error!("Failed to push CI fix: {:#}", e);
                false
            }
        }
    }
}

/// Works the task queue for one session
pub struct Orchestrator {
    agent: Agent,
    queue: TaskQueue,
    project: ProjectContext,
    repo: Arc<dyn Repository>,
    /// `None` runs in local mode: current branch, no push, no PR, no CI
    workflow: Option<BranchWorkflow>,
    settings: SessionSettings,
}

impl Orchestrator {
    pub fn new(
        agent: Agent,
        queue: TaskQueue,
        project: ProjectContext,
        repo: Arc<dyn Repository>,
        workflow: Option<BranchWorkflow>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            agent,
            queue,
            project,
            repo,
            workflow,
            settings,
        }
    }

    /// Run every pending task, then publish and shepherd CI when in
    /// pull-request mode.
    ///
    /// Only setup failures abort the session. A task-store error stops the
    /// queue, but verified work is still published, the original branch is
    /// restored and the summary is logged.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let session_id = Uuid::new_v4();
        let mut summary = SessionSummary::new(session_id, self.settings.log_file.clone());
        let mode = if self.workflow.is_some() {
            "pull request"
        } else {
            "local"
        };
        info!(session = %session_id, mode, "Session started");

        if self.settings.retry_failed {
            summary.requeued = self.queue.requeue_failed()?;
            info!("Requeued {} failed tasks", summary.requeued);
        }

        if let Some(workflow) = self.workflow.as_mut() {
            let branch = workflow.prepare().await?;
            info!(branch = %branch, "Working on branch {}", branch);
        }

        let mut completed: Vec<(String, Option<String>)> = Vec::new();
        if let Err(e) = self.work_queue(&mut summary, &mut completed).await {
            error!("Task store error; stopping: {:#}", e);
            summary.stopped_early = Some(format!("{:#}", e));
        }

        if let Some(workflow) = &self.workflow {
            if completed.is_empty() {
                info!("No task succeeded; skipping pull request");
            } else {
                let (title, body) = pull_request_text(&completed);
                match workflow.publish(&title, &body).await {
                    Ok(pr) => {
                        summary.pull_request = Some(pr);
                        summary.ci = self.monitor_ci(workflow, &mut summary.usage).await;
                    }
                    Err(e) => error!("Failed to open pull request: {:#}", e),
                }
            }
            if let Err(e) = workflow.restore().await {
                warn!("Could not return to the original branch: {:#}", e);
            }
        }

        summary.log();
        Ok(summary)
    }

    /// Work pending tasks until none remain. Returns early only on
    /// task-store errors.
    async fn work_queue(
        &self,
        summary: &mut SessionSummary,
        completed: &mut Vec<(String, Option<String>)>,
    ) -> Result<()> {
        loop {
            let Some((index, task)) = self.queue.next_pending()? else {
                info!("All tasks completed!");
                return Ok(());
            };

            if summary.processed > 0 && !self.settings.task_delay.is_zero() {
                tokio::time::sleep(self.settings.task_delay).await;
            }

            info!("{}", RULE);
            info!(task = index + 1, "Processing task {}: {}", index + 1, task);
            info!("{}", RULE);
            summary.processed += 1;

            let report = self.agent.run(&task_goal(&self.project, &task)).await;
            summary.usage.accumulate(&report.usage);

            if report.outcome.is_success() {
                let marked = self.queue.mark_outcome(index, &task, TaskOutcome::Done);
                if marked.is_ok() {
                    info!("Marked task as done: {}", task);
                }
                if let Some(text) = &report.final_report {
                    info!("Agent report:\n{}", text);
                }
                // The change is verified, so it is kept even if the mark failed
                commit(self.repo.as_ref(), &commit_message(&task)).await;
                summary.succeeded += 1;
                completed.push((task, report.final_report));
                marked?;
            } else {
                self.queue.mark_outcome(index, &task, TaskOutcome::Failed)?;
                error!(
                    outcome = ?report.outcome,
                    iterations = report.iterations,
                    "Task failed (marked [!]): {}",
                    task
                );
                summary.failed += 1;
            }
        }
    }

    async fn monitor_ci(&self, workflow: &BranchWorkflow, usage: &mut Usage) -> Option<CiReport> {
        let branch = workflow.branch()?;
        let fixer = AgentCiFixer {
            agent: &self.agent,
            project: &self.project,
            repo: self.repo.as_ref(),
            workflow,
            max_attempts: self.settings.ci.max_fix_attempts,
            usage: Mutex::new(Usage::default()),
        };
        let monitor = CiMonitor::new(workflow.hosting().clone(), self.settings.ci.clone());
        info!(branch, "Monitoring CI");
        let report = monitor.run(branch, &fixer).await;
        usage.accumulate(&fixer.usage.lock());
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{CheckConclusion, CheckState, CiStatus};
    use crate::vcs::WorkflowSettings;
    use crate::vcs::tests::{MockHosting, MockRepository};
    use nightshift_agent::{
        AgentConfig, BuildVerificationState, ToolDispatcher, ToolResult, Transport,
    };
    use nightshift_ai::{Content, Context, Message, ToolCall};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Finishes any goal whose instruction lacks "impossible"; otherwise
    /// keeps asking for a tool. Every reply reports 10 tokens in and 2 out.
    struct GoalAwareTransport {
        instructions: Mutex<Vec<String>>,
        /// File rewrite applied once, while the first goal is running
        edit: Mutex<Option<(PathBuf, String)>>,
    }

    #[async_trait]
    impl Transport for GoalAwareTransport {
        async fn complete(&self, context: &Context) -> nightshift_ai::Result<Message> {
            let instruction = context
                .messages
                .first()
                .map(|m| m.text())
                .unwrap_or_default();
            if context.messages.len() == 1 {
                self.instructions.lock().push(instruction.clone());
            }
            if let Some((path, content)) = self.edit.lock().take() {
                fs::write(path, content).unwrap();
            }
            let mut reply = if instruction.contains("impossible") {
                Message::assistant(vec![Content::tool_call(
                    "call_1",
                    "list_files",
                    serde_json::json!({}),
                )])
            } else {
                Message::assistant(vec![Content::text("Done.")])
            };
            if let Message::Assistant { metadata, .. } = &mut reply {
                metadata.usage = Usage {
                    input: 10,
                    output: 2,
                };
            }
            Ok(reply)
        }
    }

    struct NoopTools;

    #[async_trait]
    impl ToolDispatcher for NoopTools {
        fn definitions(&self) -> Vec<nightshift_ai::Tool> {
            vec![]
        }

        async fn dispatch(&self, _call: &ToolCall, _build: &mut BuildVerificationState) -> ToolResult {
            ToolResult::text("ok")
        }
    }

    fn agent(transport: Arc<GoalAwareTransport>) -> Agent {
        let config = AgentConfig {
            max_iterations: 2,
            require_build_verification: false,
            ..Default::default()
        };
        Agent::new(config, transport, Arc::new(NoopTools))
    }

    fn transport() -> Arc<GoalAwareTransport> {
        Arc::new(GoalAwareTransport {
            instructions: Mutex::new(vec![]),
            edit: Mutex::new(None),
        })
    }

    /// Transport that rewrites `path` while working the first goal
    fn editing_transport(path: &Path, content: &str) -> Arc<GoalAwareTransport> {
        let transport = transport();
        *transport.edit.lock() = Some((path.to_path_buf(), content.to_string()));
        transport
    }

    fn task_file(content: &str) -> (TempDir, TaskQueue) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.txt");
        fs::write(&path, content).unwrap();
        (dir, TaskQueue::new(path))
    }

    fn workflow(repo: Arc<MockRepository>, hosting: Arc<MockHosting>) -> BranchWorkflow {
        BranchWorkflow::new(
            repo,
            hosting,
            WorkflowSettings {
                upstream_remote: "origin".into(),
                fork_remote: "fork".into(),
                base_branch: None,
                branch_prefix: "nightshift".into(),
            },
        )
    }

    fn check(conclusion: CheckConclusion) -> CheckStatus {
        CheckStatus {
            name: "build".into(),
            state: CheckState::Completed,
            conclusion: Some(conclusion),
            link: Some("https://ci.test/build".into()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_mode_marks_outcomes() {
        let (_dir, queue) = task_file("Add a spinner\nimpossible task\n# later\n");
        let repo = Arc::new(MockRepository::default());
        let transport = transport();

        let summary = Orchestrator::new(
            agent(transport.clone()),
            queue.clone(),
            ProjectContext::default(),
            repo.clone(),
            None,
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.pull_request.is_none());
        assert!(summary.ci.is_none());
        assert_eq!(
            fs::read_to_string(queue.path()).unwrap(),
            "[x] Add a spinner\n[!] impossible task\n# later\n"
        );
        assert_eq!(
            *repo.calls.lock(),
            vec!["commit nightshift: Add a spinner".to_string()]
        );
        assert_eq!(
            *transport.instructions.lock(),
            vec!["TASK: Add a spinner".to_string(), "TASK: impossible task".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_request_and_ci_fix() {
        let (_dir, queue) = task_file("Add a spinner\n");
        let repo = Arc::new(MockRepository::default());
        let hosting = Arc::new(MockHosting::with_checks(vec![
            Ok(vec![check(CheckConclusion::Failure)]),
            Ok(vec![check(CheckConclusion::Success)]),
        ]));
        let transport = transport();

        let summary = Orchestrator::new(
            agent(transport.clone()),
            queue,
            ProjectContext::default(),
            repo.clone(),
            Some(workflow(repo.clone(), hosting.clone())),
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.pull_request.as_ref().map(|pr| pr.number), Some(42));
        // One task run and one CI fix run, one reply each
        assert_eq!(
            summary.usage,
            Usage {
                input: 20,
                output: 4
            }
        );
        let ci = summary.ci.unwrap();
        assert_eq!(ci.status, CiStatus::Passed);
        assert_eq!(ci.fix_attempts, 1);
        assert_eq!(ci.successful_fixes, 1);

        let calls = repo.calls.lock().clone();
        let pushes = calls.iter().filter(|c| c.starts_with("push fork")).count();
        assert_eq!(pushes, 2);
        assert!(calls.contains(&"commit nightshift: fix CI (attempt 1)".to_string()));
        assert_eq!(calls.last().unwrap(), "checkout main");

        let instructions = transport.instructions.lock();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[1].starts_with("CI FIX (attempt 1/5)"));
        assert!(instructions[1].contains("- build (https://ci.test/build)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_file_edited_during_run() {
        let (_dir, queue) = task_file("Add a spinner\nSecond task\n");
        let transport = editing_transport(
            queue.path(),
            "Urgent new task\nAdd a spinner\nSecond task\n",
        );

        let summary = Orchestrator::new(
            agent(transport.clone()),
            queue.clone(),
            ProjectContext::default(),
            Arc::new(MockRepository::default()),
            None,
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert!(summary.stopped_early.is_none());
        assert_eq!(
            fs::read_to_string(queue.path()).unwrap(),
            "[x] Urgent new task\n[x] Add a spinner\n[x] Second task\n"
        );
        assert_eq!(
            *transport.instructions.lock(),
            vec![
                "TASK: Add a spinner".to_string(),
                "TASK: Urgent new task".to_string(),
                "TASK: Second task".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_removed_during_run_still_publishes() {
        let (_dir, queue) = task_file("Add a spinner\nSecond task\n");
        let repo = Arc::new(MockRepository::default());
        let hosting = Arc::new(MockHosting::with_checks(vec![Ok(vec![check(
            CheckConclusion::Success,
        )])]));
        let transport = editing_transport(queue.path(), "# emptied\n");

        let summary = Orchestrator::new(
            agent(transport.clone()),
            queue.clone(),
            ProjectContext::default(),
            repo.clone(),
            Some(workflow(repo.clone(), hosting.clone())),
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(
            summary
                .stopped_early
                .as_deref()
                .is_some_and(|r| r.contains("no longer pending"))
        );
        assert_eq!(summary.pull_request.as_ref().map(|pr| pr.number), Some(42));
        assert_eq!(fs::read_to_string(queue.path()).unwrap(), "# emptied\n");

        let calls = repo.calls.lock().clone();
        assert!(calls.contains(&"commit nightshift: Add a spinner".to_string()));
        assert_eq!(calls.last().unwrap(), "checkout main");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_success_skips_pull_request() {
        let (_dir, queue) = task_file("impossible task\n");
        let repo = Arc::new(MockRepository::default());
        let hosting = Arc::new(MockHosting::default());

        let summary = Orchestrator::new(
            agent(transport()),
            queue,
            ProjectContext::default(),
            repo.clone(),
            Some(workflow(repo.clone(), hosting.clone())),
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(summary.pull_request.is_none());
        assert!(!hosting.calls.lock().iter().any(|c| c.starts_with("create_pr")));
        assert_eq!(repo.calls.lock().last().unwrap(), "checkout main");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_requeues() {
        let (_dir, queue) = task_file("[!] Add a spinner\n[x] old\n");
        let summary = Orchestrator::new(
            agent(transport()),
            queue.clone(),
            ProjectContext::default(),
            Arc::new(MockRepository::default()),
            None,
            SessionSettings {
                retry_failed: true,
                ..Default::default()
            },
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            fs::read_to_string(queue.path()).unwrap(),
            "[x] Add a spinner\n[x] old\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_tasks() {
        let (_dir, queue) = task_file("one\ntwo\nthree\n");
        let start = tokio::time::Instant::now();

        Orchestrator::new(
            agent(transport()),
            queue,
            ProjectContext::default(),
            Arc::new(MockRepository::default()),
            None,
            SessionSettings::default(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(start.elapsed().as_secs(), 4);
    }

    #[test]
    fn test_summary_display() {
        let mut summary = SessionSummary::new(Uuid::nil(), Some(PathBuf::from("logs/a.log")));
        summary.processed = 3;
        summary.succeeded = 2;
        summary.failed = 1;
        summary.ci = Some(CiReport {
            status: CiStatus::Failed,
            fix_attempts: 5,
            successful_fixes: 4,
            polls: 6,
            timed_out: false,
        });
        summary.stopped_early = Some("task file vanished".into());
        let text = summary.to_string();
        assert!(text.contains("Tasks processed: 3"));
        assert!(text.contains("Stopped early:   task file vanished"));
        assert!(text.contains("Tasks failed:    1"));
        assert!(text.contains("Pull request:    none"));
        assert!(text.contains("CI:              failed (5 fix attempts, 4 pushed)"));
        assert!(text.contains("Log file:        logs/a.log"));
    }
}
