//! Build verification tracking
//!
//! A run may only finish once a build command it executed itself has exited
//! successfully. [`BuildVerificationState`] records what the run has observed;
//! [`CommandClassifier`] decides which shell commands count.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tool::tail_chars;

/// Number of trailing output characters kept from a failed build
pub const LAST_ERROR_CHARS: usize = 2000;

/// Keywords marking a command as a build
pub const DEFAULT_BUILD_KEYWORDS: &[&str] = &["gradlew", "gradle", "build", "compile", "assemble"];

/// Keywords marking a command as a test run
pub const DEFAULT_TEST_KEYWORDS: &[&str] = &["test", "check", "verify"];

/// What a shell command counts as for verification purposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandKind {
    pub build: bool,
    pub test: bool,
}

impl CommandKind {
    /// Whether the command affects verification state at all
    pub fn is_tracked(&self) -> bool {
        self.build || self.test
    }
}

/// Keyword matcher for build- and test-like commands.
///
/// Matching is a case-insensitive substring test against the whole command
/// line, so `./gradlew :app:assembleDebug` is a build and `./gradlew check`
/// is both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandClassifier {
    pub build_keywords: Vec<String>,
    pub test_keywords: Vec<String>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self {
            build_keywords: DEFAULT_BUILD_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            test_keywords: DEFAULT_TEST_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommandClassifier {
    /// Classify a command line
    pub fn classify(&self, command: &str) -> CommandKind {
        let lowered = command.to_lowercase();
        let matches = |keywords: &[String]| {
            keywords
                .iter()
                .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
        };
        CommandKind {
            build: matches(&self.build_keywords),
            test: matches(&self.test_keywords),
        }
    }
}

/// Verification state owned by a single conversation run.
///
/// `build_passed` implies `build_attempted`; every transition below keeps
/// that true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVerificationState {
    build_attempted: bool,
    build_passed: bool,
    test_attempted: bool,
    test_passed: bool,
    last_error: Option<String>,
}

impl BuildVerificationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_attempted(&self) -> bool {
        self.build_attempted
    }

    pub fn build_passed(&self) -> bool {
        self.build_passed
    }

    pub fn test_attempted(&self) -> bool {
        self.test_attempted
    }

    pub fn test_passed(&self) -> bool {
        self.test_passed
    }

    /// Tail of the output of the most recent failing build or test command
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A file was modified; the previous build no longer says anything
    /// about the tree.
    pub fn invalidate(&mut self) {
        self.build_attempted = false;
        self.build_passed = false;
    }

    /// Record a completed (not timed out) command.
    ///
    /// Untracked commands leave the state alone.
    pub fn record_command(&mut self, kind: CommandKind, exit_code: i32, output: &str) {
        if !kind.is_tracked() {
            return;
        }

        self.build_attempted = true;
        if exit_code == 0 {
            self.build_passed = true;
            if kind.test {
                self.test_attempted = true;
                self.test_passed = true;
            }
        } else {
            self.build_passed = false;
            self.last_error = Some(tail_chars(output, LAST_ERROR_CHARS).to_string());
            if kind.test {
                self.test_attempted = true;
                self.test_passed = false;
            }
        }
    }

    /// Whether the run may finish.
    ///
    /// Always true when verification is not required; tests are tracked but
    /// never demanded.
    pub fn is_verified(&self, required: bool) -> bool {
        !required || (self.build_attempted && self.build_passed)
    }
}

impl fmt::Display for BuildVerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |attempted: bool, passed: bool| match (attempted, passed) {
            (false, _) => "not run",
            (true, true) => "passed",
            (true, false) => "failed",
        };
        write!(
            f,
            "build {}, tests {}",
            mark(self.build_attempted, self.build_passed),
            mark(self.test_attempted, self.test_passed)
        )
    }
}
