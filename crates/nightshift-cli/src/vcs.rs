//! Version control and code review adapters
//!
//! [`GitRepository`] and [`GhHosting`] shell out to `git` and `gh`.
//! [`BranchWorkflow`] strings them together into the fork / branch / push /
//! pull request sequence a session needs.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::ci::{CheckConclusion, CheckState, CheckStatus};

/// An open pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.url)
    }
}

/// Local working copy operations
#[async_trait]
pub trait Repository: Send + Sync {
    async fn current_branch(&self) -> Result<String>;
    async fn fetch(&self, remote: &str) -> Result<()>;
    /// Create `branch` at `start_point` and check it out
    async fn create_branch(&self, branch: &str, start_point: &str) -> Result<()>;
    async fn checkout(&self, branch: &str) -> Result<()>;
    /// Stage everything and commit. Returns false when there was nothing to commit.
    async fn commit_all(&self, message: &str) -> Result<bool>;
    async fn push(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Fork and pull request operations against the hosting service
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Make sure the bot's fork exists and is configured as `remote`
    async fn ensure_fork(&self, remote: &str) -> Result<()>;
    async fn default_branch(&self) -> Result<String>;
    /// Open PR whose head is the bot's `branch`, if any
    async fn find_pull_request(&self, branch: &str) -> Result<Option<PullRequest>>;
    async fn create_pull_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;
    async fn checks(&self, pr: &PullRequest) -> Result<Vec<CheckStatus>>;
}

async fn run_output(mut cmd: Command) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output()
        .await
        .with_context(|| format!("failed to spawn {:?}", cmd.as_std().get_program()))
}

fn checked(program: &str, args: &[&str], out: Output) -> Result<String> {
    if out.status.success() {
        return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    Err(anyhow!(
        "{} {} failed ({}): {}",
        program,
        args.join(" "),
        out.status,
        stderr.trim()
    ))
}

/// Wrapper for executing git commands in a working directory.
#[derive(Clone)]
pub struct GitRepository {
    workdir: PathBuf,
    /// Used for pushes over HTTPS through `gh`'s credential helper
    token: Option<String>,
}

impl fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRepository")
            .field("workdir", &self.workdir)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GitRepository {
    pub fn new(workdir: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            workdir: workdir.into(),
            token,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir).args(args);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        run_output(self.command(args)).await
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let out = self.run(args).await?;
        checked("git", args, out)
    }
}

#[async_trait]
impl Repository for GitRepository {
    #[instrument(skip_all)]
    async fn current_branch(&self) -> Result<String> {
        let out = self.run_checked(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            bail!("detached HEAD (refuse to run)");
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run_checked(&["fetch", remote]).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch, start_point = %start_point))]
    async fn create_branch(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run_checked(&["checkout", "-b", branch, start_point])
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch))]
    async fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> Result<bool> {
        self.run_checked(&["add", "-A"]).await?;
        let staged = self.run_checked(&["diff", "--cached", "--name-only"]).await?;
        if staged.trim().is_empty() {
            debug!("nothing to commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message]).await?;
        Ok(true)
    }

    #[instrument(skip_all, fields(remote = %remote, branch = %branch))]
    async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let mut args: Vec<&str> = Vec::new();
        if self.token.is_some() {
            args.extend(["-c", "credential.helper=", "-c", "credential.helper=!gh auth git-credential"]);
        }
        args.extend(["push", "--set-upstream", remote, branch]);

        let mut cmd = self.command(&args);
        if let Some(token) = &self.token {
            cmd.env("GH_TOKEN", token).env("GIT_TERMINAL_PROMPT", "0");
        }
        let out = run_output(cmd).await?;
        checked("git", &["push", remote, branch], out)?;
        info!(remote, branch, "pushed");
        Ok(())
    }
}

/// `gh` CLI adapter, authenticated as the bot through `GH_TOKEN`
#[derive(Clone)]
pub struct GhHosting {
    workdir: PathBuf,
    token: String,
    bot_user: Option<String>,
}

impl fmt::Debug for GhHosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GhHosting")
            .field("workdir", &self.workdir)
            .field("token", &"[REDACTED]")
            .field("bot_user", &self.bot_user)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoView {
    name_with_owner: String,
    default_branch_ref: Option<BranchRef>,
}

#[derive(Deserialize)]
struct BranchRef {
    name: String,
}

#[derive(Deserialize)]
struct PrListEntry {
    number: u64,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrChecks {
    #[serde(default)]
    status_check_rollup: Vec<RollupEntry>,
}

/// One `statusCheckRollup` entry: either a check run or a commit status
#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum RollupEntry {
    #[serde(rename_all = "camelCase")]
    CheckRun {
        name: String,
        status: Option<String>,
        conclusion: Option<String>,
        details_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StatusContext {
        context: String,
        state: Option<String>,
        target_url: Option<String>,
    },
}

impl From<RollupEntry> for CheckStatus {
    fn from(entry: RollupEntry) -> Self {
        match entry {
            RollupEntry::CheckRun {
                name,
                status,
                conclusion,
                details_url,
            } => {
                let state = CheckState::parse(status.as_deref().unwrap_or(""));
                let conclusion = conclusion
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .map(CheckConclusion::parse);
                CheckStatus {
                    name,
                    state,
                    conclusion,
                    link: details_url.filter(|u| !u.is_empty()),
                }
            }
            RollupEntry::StatusContext {
                context,
                state,
                target_url,
            } => {
                let (state, conclusion) = match state.as_deref().unwrap_or("") {
                    "PENDING" | "EXPECTED" => (CheckState::Pending, None),
                    "SUCCESS" => (CheckState::Completed, Some(CheckConclusion::Success)),
                    "FAILURE" | "ERROR" => (CheckState::Completed, Some(CheckConclusion::Failure)),
                    _ => (CheckState::Completed, Some(CheckConclusion::Other)),
                };
                CheckStatus {
                    name: context,
                    state,
                    conclusion,
                    link: target_url.filter(|u| !u.is_empty()),
                }
            }
        }
    }
}

/// Parse `gh pr view --json statusCheckRollup` output
pub fn parse_checks(json: &str) -> Result<Vec<CheckStatus>> {
    let parsed: PrChecks = serde_json::from_str(json).context("unexpected gh pr view output")?;
    Ok(parsed
        .status_check_rollup
        .into_iter()
        .map(CheckStatus::from)
        .collect())
}

impl GhHosting {
    pub fn new(workdir: impl Into<PathBuf>, token: String, bot_user: Option<String>) -> Self {
        Self {
            workdir: workdir.into(),
            token,
            bot_user,
        }
    }

    /// `gh` with non-interactive, token-based auth
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("gh");
        cmd.current_dir(&self.workdir)
            .args(args)
            .env("GH_TOKEN", &self.token)
            .env("GH_NO_UPDATE_NOTIFIER", "1")
            .env("GH_PROMPT_DISABLED", "1")
            .env("NO_COLOR", "1");
        cmd
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let out = run_output(self.command(args)).await?;
        checked("gh", args, out)
    }

    async fn repo_view(&self) -> Result<RepoView> {
        let out = self
            .run_checked(&["repo", "view", "--json", "nameWithOwner,defaultBranchRef"])
            .await?;
        serde_json::from_str(&out).context("unexpected gh repo view output")
    }

    async fn upstream(&self) -> Result<String> {
        Ok(self.repo_view().await?.name_with_owner)
    }

    /// `owner:branch` when the bot identity is known
    fn head_ref(&self, branch: &str) -> String {
        match &self.bot_user {
            Some(user) => format!("{}:{}", user, branch),
            None => branch.to_string(),
        }
    }
}

#[async_trait]
impl HostingService for GhHosting {
    #[instrument(skip_all, fields(remote = %remote))]
    async fn ensure_fork(&self, remote: &str) -> Result<()> {
        let remote_flag = format!("--remote-name={}", remote);
        let args = ["repo", "fork", "--clone=false", "--remote", &remote_flag];
        let out = run_output(self.command(&args)).await?;
        if out.status.success() {
            info!(remote, "fork ready");
            return Ok(());
        }
        // gh refuses to re-add an existing remote; the fork itself is fine
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("already exists") {
            debug!(remote, "fork remote already configured");
            return Ok(());
        }
        checked("gh", &args, out).map(|_| ())
    }

    async fn default_branch(&self) -> Result<String> {
        self.repo_view()
            .await?
            .default_branch_ref
            .map(|r| r.name)
            .ok_or_else(|| anyhow!("repository has no default branch"))
    }

    async fn find_pull_request(&self, branch: &str) -> Result<Option<PullRequest>> {
        let upstream = self.upstream().await?;
        let out = self
            .run_checked(&[
                "pr", "list", "--repo", &upstream, "--head", branch, "--state", "open", "--json",
                "number,url", "--limit", "1",
            ])
            .await?;
        let mut entries: Vec<PrListEntry> =
            serde_json::from_str(&out).context("unexpected gh pr list output")?;
        Ok(entries.pop().map(|e| PullRequest {
            number: e.number,
            url: e.url,
        }))
    }

    async fn create_pull_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let upstream = self.upstream().await?;
        let head = self.head_ref(branch);
        self.run_checked(&[
            "pr", "create", "--repo", &upstream, "--head", &head, "--base", base, "--title", title,
            "--body", body,
        ])
        .await?;

        self.find_pull_request(branch)
            .await?
            .ok_or_else(|| anyhow!("pull request for {} not found after creation", head))
    }

    async fn checks(&self, pr: &PullRequest) -> Result<Vec<CheckStatus>> {
        let upstream = self.upstream().await?;
        let number = pr.number.to_string();
        let out = self
            .run_checked(&[
                "pr",
                "view",
                &number,
                "--repo",
                &upstream,
                "--json",
                "statusCheckRollup",
            ])
            .await?;
        parse_checks(&out)
    }
}

/// Names the remotes and branches a session works with
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub upstream_remote: String,
    pub fork_remote: String,
    pub base_branch: Option<String>,
    pub branch_prefix: String,
}

/// Fork, branch, push and pull request handling for one session
pub struct BranchWorkflow {
    repo: Arc<dyn Repository>,
    hosting: Arc<dyn HostingService>,
    settings: WorkflowSettings,
    original_branch: Option<String>,
    branch: Option<String>,
    base: Option<String>,
}

impl BranchWorkflow {
    pub fn new(
        repo: Arc<dyn Repository>,
        hosting: Arc<dyn HostingService>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            repo,
            hosting,
            settings,
            original_branch: None,
            branch: None,
            base: None,
        }
    }

    pub fn hosting(&self) -> &Arc<dyn HostingService> {
        &self.hosting
    }

    /// Working branch, once [`prepare`](Self::prepare) has run
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// `<prefix>/<YYYYmmdd-HHMMSS>`
    pub fn branch_name(prefix: &str, now: chrono::DateTime<chrono::Local>) -> String {
        format!("{}/{}", prefix, now.format("%Y%m%d-%H%M%S"))
    }

    /// Ensure the fork, then cut a fresh timestamped branch from the
    /// up-to-date base branch.
    pub async fn prepare(&mut self) -> Result<String> {
        self.hosting
            .ensure_fork(&self.settings.fork_remote)
            .await
            .context("failed to set up fork")?;

        let original = self.repo.current_branch().await?;
        let base = match &self.settings.base_branch {
            Some(b) => b.clone(),
            None => self.hosting.default_branch().await?,
        };

        self.repo.fetch(&self.settings.upstream_remote).await?;
        let branch = Self::branch_name(&self.settings.branch_prefix, chrono::Local::now());
        let start = format!("{}/{}", self.settings.upstream_remote, base);
        self.repo
            .create_branch(&branch, &start)
            .await
            .with_context(|| format!("failed to create branch {} from {}", branch, start))?;

        info!(branch = %branch, base = %base, "created working branch");
        self.original_branch = Some(original);
        self.base = Some(base);
        self.branch = Some(branch.clone());
        Ok(branch)
    }

    fn working_branch(&self) -> Result<&str> {
        self.branch
            .as_deref()
            .ok_or_else(|| anyhow!("working branch not prepared"))
    }

    /// Push the working branch to the fork
    pub async fn push(&self) -> Result<()> {
        let branch = self.working_branch()?;
        self.repo.push(&self.settings.fork_remote, branch).await
    }

    /// Push and open a pull request, reusing an open one for the branch
    pub async fn publish(&self, title: &str, body: &str) -> Result<PullRequest> {
        let branch = self.working_branch()?;
        let base = self
            .base
            .as_deref()
            .ok_or_else(|| anyhow!("base branch not resolved"))?;

        self.push().await?;

        if let Some(pr) = self.hosting.find_pull_request(branch).await? {
            info!(pr = %pr, "pull request already open");
            return Ok(pr);
        }
        let pr = self
            .hosting
            .create_pull_request(branch, base, title, body)
            .await?;
        info!(pr = %pr, "opened pull request");
        Ok(pr)
    }

    /// Check the branch the session started on back out
    pub async fn restore(&self) -> Result<()> {
        if let Some(original) = &self.original_branch {
            if let Err(e) = self.repo.checkout(original).await {
                warn!("failed to restore branch {}: {}", original, e);
                return Err(e);
            }
            info!(branch = %original, "restored original branch");
        }
        Ok(())
    }
}
