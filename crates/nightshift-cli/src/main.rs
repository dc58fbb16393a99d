//! nightshift - autonomous task runner with build verification

mod ci;
mod config;
mod logging;
mod orchestrator;
mod progress;
mod prompts;
mod tasks;
mod vcs;

use anyhow::Context;
use clap::Parser;
use nightshift_agent::{Agent, ProviderTransport, WorkspaceTools};
use nightshift_ai::models::resolve_model;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, Overrides};
use crate::orchestrator::{Orchestrator, SessionSettings};
use crate::prompts::ProjectContext;
use crate::tasks::{TaskQueue, missing_file_guidance};
use crate::vcs::{BranchWorkflow, GhHosting, GitRepository, Repository, WorkflowSettings};

const BANNER: &str = "
    +--------------------------------------------------------------+
    |  Night Shift Agent v2.0                                      |
    |  Autonomous Coding Assistant with Build Verification         |
    +--------------------------------------------------------------+
";

/// nightshift - work through a task file unattended
#[derive(Parser, Debug)]
#[command(name = "nightshift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ./nightshift.toml or $NIGHTSHIFT_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write an example config file and exit
    #[arg(long)]
    init_config: bool,

    /// Model to use (default: x-ai/grok-4.1-fast:free)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (openrouter, openai, groq, xai, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Task file (default: tasks.txt)
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Iteration ceiling per task
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Accept tasks without a passing build
    #[arg(long)]
    no_verify: bool,

    /// Work on the current branch; no fork, pull request or CI monitoring
    #[arg(long)]
    no_pr: bool,

    /// Branch to base the work branch on (default: the repository default)
    #[arg(long)]
    base_branch: Option<String>,

    /// Directory for session logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Mark failed ([!]) tasks as pending again before starting
    #[arg(long)]
    retry_failed: bool,

    /// Working directory
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            tasks_file: self.tasks.clone(),
            max_iterations: self.max_iterations,
            no_verify: self.no_verify,
            no_pr: self.no_pr,
            base_branch: self.base_branch.clone(),
            log_dir: self.log_dir.clone(),
            retry_failed: self.retry_failed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.working_dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("failed to change to {}", dir.display()))?;
    }

    let config_path = Config::config_path(args.config.as_deref());
    if args.init_config {
        if Config::init(&config_path)? {
            println!("Created {}", config_path.display());
        } else {
            println!("{} already exists", config_path.display());
        }
        return Ok(());
    }

    let mut config = Config::load(&config_path, args.config.is_some())?;
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_overrides(&args.overrides());

    println!("{}", BANNER);
    let log_file = logging::init(&config.logging.dir, args.verbose)?;

    info!("Starting Night Shift Agent");
    info!("Log file: {}", log_file.display());
    info!("Model: {}", config.model.id);
    info!("Max iterations: {}", config.agent.max_iterations);
    info!(
        "Build verification: {}",
        if config.agent.require_build_verification {
            "REQUIRED"
        } else {
            "OPTIONAL"
        }
    );

    let provider = config.provider()?;
    if let Some(env_var) = provider.api_key_env_var() {
        if config.model.api_key.is_none() {
            error!("{} not set in environment", env_var);
            std::process::exit(1);
        }
    }
    let model = resolve_model(provider, &config.model.id, config.model.base_url.as_deref());
    let transport = ProviderTransport::new(model, config.model.api_key.as_deref())?;

    let workdir = std::env::current_dir().context("failed to resolve working directory")?;
    let queue = TaskQueue::new(workdir.join(&config.tasks.file));
    if !queue.exists() {
        warn!("No {} found", config.tasks.file.display());
        println!("{}", missing_file_guidance(&config.tasks.file));
        return Ok(());
    }

    let counts = queue.counts()?;
    info!(
        "Task file {}: {} pending, {} done, {} failed",
        config.tasks.file.display(),
        counts.pending,
        counts.done,
        counts.failed
    );

    let tools = WorkspaceTools::new(&workdir, config.tool_settings())?;
    let project = ProjectContext::load(
        &workdir,
        &config.tasks.architecture_guide,
        &config.tools.list,
    );

    let agent = Agent::new(config.agent_config(), Arc::new(transport), Arc::new(tools));
    let printer = progress::spawn_printer(agent.subscribe());

    let repo: Arc<dyn Repository> =
        Arc::new(GitRepository::new(&workdir, config.pr.bot_token.clone()));
    let workflow = match config.pr_token() {
        Some(token) => {
            let hosting = Arc::new(GhHosting::new(
                &workdir,
                token.to_string(),
                config.pr.bot_user.clone(),
            ));
            Some(BranchWorkflow::new(
                repo.clone(),
                hosting,
                WorkflowSettings {
                    upstream_remote: config.pr.upstream_remote.clone(),
                    fork_remote: config.pr.fork_remote.clone(),
                    base_branch: config.pr.base_branch.clone(),
                    branch_prefix: config.pr.branch_prefix.clone(),
                },
            ))
        }
        None if config.pr.enabled => {
            warn!("No bot token (NIGHTSHIFT_BOT_TOKEN or GH_TOKEN); running in local mode");
            None
        }
        None => {
            info!("Pull requests disabled; running in local mode");
            None
        }
    };

    let settings = SessionSettings {
        task_delay: Duration::from_secs(config.tasks.delay_secs),
        retry_failed: config.tasks.retry_failed,
        ci: config.ci_settings(),
        log_file: Some(log_file),
    };

    let result = Orchestrator::new(agent, queue, project, repo, workflow, settings)
        .run()
        .await;

    // The agent is gone, so the printer drains and stops
    let _ = printer.await;

    result.map(|_| ())
}
