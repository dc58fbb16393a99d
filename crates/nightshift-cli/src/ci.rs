//! CI monitoring and remediation for the session's pull request

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::vcs::HostingService;

/// Lifecycle of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Queued,
    Pending,
    InProgress,
    Completed,
}

impl CheckState {
    /// Map a GitHub check-run status. Anything unrecognised counts as pending.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "QUEUED" | "REQUESTED" | "WAITING" => CheckState::Queued,
            "IN_PROGRESS" => CheckState::InProgress,
            "COMPLETED" => CheckState::Completed,
            _ => CheckState::Pending,
        }
    }

    pub fn is_pending(self) -> bool {
        self != CheckState::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
    Other,
}

impl CheckConclusion {
    /// Neutral and skipped checks do not block a merge, so they count as success
    pub fn parse(conclusion: &str) -> Self {
        match conclusion.to_ascii_uppercase().as_str() {
            "SUCCESS" | "NEUTRAL" | "SKIPPED" => CheckConclusion::Success,
            "FAILURE" | "TIMED_OUT" | "CANCELLED" | "ACTION_REQUIRED" | "STARTUP_FAILURE" => {
                CheckConclusion::Failure
            }
            _ => CheckConclusion::Other,
        }
    }
}

/// One CI check attached to a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckStatus {
    pub name: String,
    pub state: CheckState,
    pub conclusion: Option<CheckConclusion>,
    pub link: Option<String>,
}

impl CheckStatus {
    pub fn is_failed(&self) -> bool {
        self.conclusion == Some(CheckConclusion::Failure)
    }
}

/// Reduction over a PR's check set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub pending: bool,
    pub all_passed: bool,
    pub any_failed: bool,
}

pub fn summarize(checks: &[CheckStatus]) -> CheckSummary {
    let pending = checks.iter().any(|c| c.state.is_pending());
    let any_failed = checks.iter().any(CheckStatus::is_failed);
    let all_passed = !checks.is_empty()
        && !pending
        && checks
            .iter()
            .all(|c| c.conclusion == Some(CheckConclusion::Success));
    CheckSummary {
        pending,
        all_passed,
        any_failed,
    }
}

/// Aggregate CI status of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiStatus {
    Pending,
    Passed,
    Failed,
    Unknown,
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CiStatus::Pending => "pending",
            CiStatus::Passed => "passed",
            CiStatus::Failed => "failed",
            CiStatus::Unknown => "unknown",
        })
    }
}

/// Pending wins over failed: fixes start once every check has finished.
/// No checks at all is unknown, not passed.
pub fn classify(checks: &[CheckStatus]) -> CiStatus {
    if checks.is_empty() {
        return CiStatus::Unknown;
    }
    let summary = summarize(checks);
    if summary.pending {
        CiStatus::Pending
    } else if summary.any_failed {
        CiStatus::Failed
    } else if summary.all_passed {
        CiStatus::Passed
    } else {
        CiStatus::Unknown
    }
}

/// Something that can try to repair failing checks
#[async_trait]
pub trait CiFixer: Send + Sync {
    /// Attempt number `attempt` (1-based). Returns true when a verified fix
    /// was pushed.
    async fn fix(&self, failing: &[CheckStatus], attempt: u32) -> bool;
}

#[derive(Debug, Clone)]
pub struct CiSettings {
    pub poll_interval: Duration,
    pub max_fix_attempts: u32,
    /// Overall ceiling on monitoring time
    pub max_wait: Option<Duration>,
}

impl Default for CiSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_fix_attempts: 5,
            max_wait: Some(Duration::from_secs(7200)),
        }
    }
}

/// How monitoring ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiReport {
    /// Last status observed
    pub status: CiStatus,
    pub fix_attempts: u32,
    pub successful_fixes: u32,
    pub polls: u32,
    /// Stopped by the overall ceiling
    pub timed_out: bool,
}

pub struct CiMonitor {
    hosting: Arc<dyn HostingService>,
    settings: CiSettings,
}

impl CiMonitor {
    pub fn new(hosting: Arc<dyn HostingService>, settings: CiSettings) -> Self {
        Self { hosting, settings }
    }

    /// Current checks of the open PR whose head is `branch`
    pub async fn poll(&self, branch: &str) -> anyhow::Result<Vec<CheckStatus>> {
        let pr = self
            .hosting
            .find_pull_request(branch)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no open pull request for {}", branch))?;
        self.hosting.checks(&pr).await
    }

    /// Poll until CI passes, the fix budget is spent on a further failure,
    /// or the overall ceiling is reached.
    pub async fn run(&self, branch: &str, fixer: &dyn CiFixer) -> CiReport {
        let started = Instant::now();
        let mut report = CiReport {
            status: CiStatus::Unknown,
            fix_attempts: 0,
            successful_fixes: 0,
            polls: 0,
            timed_out: false,
        };

        loop {
            report.polls += 1;
            match self.poll(branch).await {
                Ok(checks) => {
                    let status = classify(&checks);
                    let summary = summarize(&checks);
                    info!(
                        ci_status = %status,
                        checks = checks.len(),
                        pending = summary.pending,
                        any_failed = summary.any_failed,
                        "CI status: {}",
                        status
                    );
                    report.status = status;

                    match status {
                        CiStatus::Passed => {
                            info!("CI passed");
                            return report;
                        }
                        CiStatus::Failed => {
                            if report.fix_attempts >= self.settings.max_fix_attempts {
                                warn!(
                                    "CI still failing after {} fix attempts; leaving the pull request open",
                                    report.fix_attempts
                                );
                                return report;
                            }
                            report.fix_attempts += 1;
                            let failing: Vec<CheckStatus> =
                                checks.into_iter().filter(CheckStatus::is_failed).collect();
                            info!(
                                attempt = report.fix_attempts,
                                "CI fix attempt {}/{}",
                                report.fix_attempts,
                                self.settings.max_fix_attempts
                            );
                            if fixer.fix(&failing, report.fix_attempts).await {
                                report.successful_fixes += 1;
                            } else {
                                warn!("CI fix attempt {} did not produce a verified fix", report.fix_attempts);
                            }
                        }
                        CiStatus::Pending | CiStatus::Unknown => {}
                    }
                }
                Err(e) => warn!("Failed to query CI status: {:#}", e),
            }

            tokio::time::sleep(self.settings.poll_interval).await;

            if let Some(max_wait) = self.settings.max_wait {
                if started.elapsed() >= max_wait {
                    warn!(
                        ci_status = %report.status,
                        "Giving up on CI after {}s",
                        max_wait.as_secs()
                    );
                    report.timed_out = true;
                    return report;
                }
            }
        }
    }
}
