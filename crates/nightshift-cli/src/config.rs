//! Configuration file support
//!
//! Values come from `nightshift.toml` (or `--config` / `NIGHTSHIFT_CONFIG`),
//! then environment variables, then command-line flags, each layer
//! overriding the one before.

use anyhow::{Context, Result, bail};
use nightshift_agent::build_state::CommandClassifier;
use nightshift_agent::tools::{ListSettings, ToolSettings};
use nightshift_agent::{AgentConfig, RetryPolicy};
use nightshift_ai::Provider;
use nightshift_ai::models::{DEFAULT_MODEL, parse_provider};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ci::CiSettings;

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "nightshift.toml";

/// Configuration for nightshift
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub tasks: TasksSection,
    pub logging: LoggingSection,
    pub pr: PrSection,
    pub ci: CiSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// openrouter, openai, groq, xai, ollama or custom
    pub provider: String,
    pub id: String,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    /// Alternative to the provider's API key environment variable
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            id: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    pub require_build_verification: bool,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            require_build_verification: true,
            max_retries: 3,
            retry_base_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub max_result_chars: usize,
    pub shell_timeout_secs: u64,
    pub list: ListSettings,
    pub commands: CommandClassifier,
}

impl Default for ToolsSection {
    fn default() -> Self {
        let defaults = ToolSettings::default();
        Self {
            max_result_chars: defaults.max_result_chars,
            shell_timeout_secs: defaults.shell_timeout.as_secs(),
            list: defaults.list,
            commands: defaults.classifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    pub file: PathBuf,
    /// Pause between tasks
    pub delay_secs: u64,
    /// Embedded in the system turn when present
    pub architecture_guide: PathBuf,
    /// Re-mark `[!]` tasks as pending at startup
    pub retry_failed: bool,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            file: PathBuf::from("tasks.txt"),
            delay_secs: 2,
            architecture_guide: PathBuf::from("ARCHITECTURE.md"),
            retry_failed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".agent_logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrSection {
    /// Open a pull request from the bot's fork. Without a bot token the
    /// session runs in local mode regardless.
    pub enabled: bool,
    /// Branch the work branch starts from and the PR targets. Defaults to
    /// the upstream repository's default branch.
    pub base_branch: Option<String>,
    /// Remote name the fork is added under
    pub fork_remote: String,
    pub upstream_remote: String,
    pub branch_prefix: String,
    pub bot_user: Option<String>,
    pub bot_token: Option<String>,
}

impl Default for PrSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_branch: None,
            fork_remote: "fork".to_string(),
            upstream_remote: "origin".to_string(),
            branch_prefix: "nightshift".to_string(),
            bot_user: None,
            bot_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiSection {
    pub poll_interval_secs: u64,
    pub max_fix_attempts: u32,
    /// Overall monitoring ceiling; 0 disables it
    pub max_wait_secs: u64,
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_fix_attempts: 5,
            max_wait_secs: 7200,
        }
    }
}

/// Command-line values that override the file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub tasks_file: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub no_verify: bool,
    pub no_pr: bool,
    pub base_branch: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub retry_failed: bool,
}

impl Config {
    /// Resolve the config file path: explicit flag, then `NIGHTSHIFT_CONFIG`,
    /// then `nightshift.toml` in the working directory.
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("NIGHTSHIFT_CONFIG") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from `path`. A missing file yields defaults unless the
    /// path was given explicitly.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Create an example config file if it doesn't exist
    pub fn init(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        fs::write(path, example_config())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(true)
    }

    /// Overlay environment variables, read through `var`
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(model) = var("AGENT_MODEL") {
            self.model.id = model;
        }
        if let Some(key) = self
            .provider()
            .ok()
            .and_then(|p| p.api_key_env_var())
            .and_then(|name| var(name))
        {
            self.model.api_key = Some(key);
        }
        if let Some(user) = var("NIGHTSHIFT_BOT_USER") {
            self.pr.bot_user = Some(user);
        }
        if let Some(token) = var("NIGHTSHIFT_BOT_TOKEN").or_else(|| var("GH_TOKEN")) {
            self.pr.bot_token = Some(token);
        }
    }

    /// Overlay command-line flags
    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(provider) = &o.provider {
            self.model.provider = provider.clone();
        }
        if let Some(model) = &o.model {
            self.model.id = model.clone();
        }
        if let Some(base_url) = &o.base_url {
            self.model.base_url = Some(base_url.clone());
        }
        if let Some(file) = &o.tasks_file {
            self.tasks.file = file.clone();
        }
        if let Some(max) = o.max_iterations {
            self.agent.max_iterations = max;
        }
        if o.no_verify {
            self.agent.require_build_verification = false;
        }
        if o.no_pr {
            self.pr.enabled = false;
        }
        if let Some(base) = &o.base_branch {
            self.pr.base_branch = Some(base.clone());
        }
        if let Some(dir) = &o.log_dir {
            self.logging.dir = dir.clone();
        }
        if o.retry_failed {
            self.tasks.retry_failed = true;
        }
    }

    pub fn provider(&self) -> Result<Provider> {
        parse_provider(&self.model.provider)
            .with_context(|| format!("unknown provider '{}'", self.model.provider))
    }

    /// Bot token, when pull requests and CI monitoring are active
    pub fn pr_token(&self) -> Option<&str> {
        self.pr
            .bot_token
            .as_deref()
            .filter(|_| self.pr.enabled)
    }

    pub fn ci_settings(&self) -> CiSettings {
        CiSettings {
            poll_interval: Duration::from_secs(self.ci.poll_interval_secs),
            max_fix_attempts: self.ci.max_fix_attempts,
            max_wait: (self.ci.max_wait_secs > 0).then(|| Duration::from_secs(self.ci.max_wait_secs)),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.agent.max_iterations,
            require_build_verification: self.agent.require_build_verification,
            retry: RetryPolicy::new(
                self.agent.max_retries,
                Duration::from_secs(self.agent.retry_base_delay_secs),
            ),
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            max_result_chars: self.tools.max_result_chars,
            list: self.tools.list.clone(),
            shell_timeout: Duration::from_secs(self.tools.shell_timeout_secs),
            classifier: self.tools.commands.clone(),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# nightshift configuration file
# Place at ./nightshift.toml, or point NIGHTSHIFT_CONFIG / --config at it.

[model]
# openrouter, openai, groq, xai, ollama or custom
provider = "openrouter"
id = "x-ai/grok-4.1-fast:free"
# base_url = "http://localhost:8080/v1"
# API keys are better kept in the environment (OPENROUTER_API_KEY, ...)
# api_key = "sk-or-..."

[agent]
max_iterations = 50
require_build_verification = true
max_retries = 3
retry_base_delay_secs = 2

[tools]
max_result_chars = 10000
shell_timeout_secs = 600

[tools.list]
max_entries = 100
ignore_dirs = [".git", ".gradle", ".idea", ".venv", "__pycache__", "build", ".kotlin", "node_modules"]
ignore_extensions = [".jar", ".class", ".pyc", ".so", ".dylib"]

[tools.commands]
build_keywords = ["gradlew", "gradle", "build", "compile", "assemble"]
test_keywords = ["test", "check", "verify"]

[tasks]
file = "tasks.txt"
delay_secs = 2
architecture_guide = "ARCHITECTURE.md"
retry_failed = false

[logging]
dir = ".agent_logs"

[pr]
# Needs a bot token (NIGHTSHIFT_BOT_TOKEN or GH_TOKEN); without one tasks
# are committed on the current branch only.
enabled = true
# base_branch = "main"
fork_remote = "fork"
upstream_remote = "origin"
branch_prefix = "nightshift"
# bot_user = "nightshift-bot"

[ci]
poll_interval_secs = 60
max_fix_attempts = 5
# 0 disables the overall ceiling
max_wait_secs = 7200
"#
}
