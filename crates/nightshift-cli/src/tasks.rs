//! Line-based task store
//!
//! One task per line. `[x]` marks a finished task, `[!]` a failed one and `#`
//! a comment; every other non-blank line is pending. The file is re-read on
//! every scan so it can be edited while a session runs.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

pub const DONE_MARKER: &str = "[x]";
pub const FAILED_MARKER: &str = "[!]";
pub const COMMENT_MARKER: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
}

/// Terminal result of working on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Failed,
}

impl TaskOutcome {
    fn marker(self) -> &'static str {
        match self {
            TaskOutcome::Done => DONE_MARKER,
            TaskOutcome::Failed => FAILED_MARKER,
        }
    }
}

/// Status of a line, or `None` for blank and comment lines
pub fn line_status(line: &str) -> Option<TaskStatus> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
        None
    } else if trimmed.starts_with(DONE_MARKER) {
        Some(TaskStatus::Done)
    } else if trimmed.starts_with(FAILED_MARKER) {
        Some(TaskStatus::Failed)
    } else {
        Some(TaskStatus::Pending)
    }
}

/// First pending line as `(index, trimmed text)`
pub fn next_pending<S: AsRef<str>>(lines: &[S]) -> Option<(usize, String)> {
    lines.iter().enumerate().find_map(|(i, line)| {
        let line = line.as_ref();
        (line_status(line) == Some(TaskStatus::Pending)).then(|| (i, line.trim().to_string()))
    })
}

/// Prefix `line` with the outcome marker, keeping its text and line ending
fn mark_line(line: &str, outcome: TaskOutcome) -> String {
    format!("{} {}", outcome.marker(), line.trim_start())
}

/// Strip a leading failed marker, keeping the line ending
fn unmark_failed(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix(FAILED_MARKER)?;
    Some(rest.trim_start_matches([' ', '\t']).to_string())
}

/// Counts of each task status in the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

/// The task file
#[derive(Debug, Clone)]
pub struct TaskQueue {
    path: PathBuf,
}

impl TaskQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Lines with their endings attached
    fn read_lines(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read task file {}", self.path.display()))?;
        Ok(content.split_inclusive('\n').map(str::to_string).collect())
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        fs::write(&self.path, lines.concat())
            .with_context(|| format!("failed to write task file {}", self.path.display()))
    }

    /// Re-read the store and return the first pending task
    pub fn next_pending(&self) -> Result<Option<(usize, String)>> {
        Ok(next_pending(&self.read_lines()?))
    }

    /// Re-mark the pending line holding `task`. The file may have been edited
    /// since the task was read, so `index` is only a hint: if that line no
    /// longer holds the task, the first pending line that does is marked.
    pub fn mark_outcome(&self, index: usize, task: &str, outcome: TaskOutcome) -> Result<()> {
        let mut lines = self.read_lines()?;
        let holds_task =
            |line: &str| line_status(line) == Some(TaskStatus::Pending) && line.trim() == task;

        let target = if lines.get(index).is_some_and(|l| holds_task(l)) {
            index
        } else {
            let Some(found) = lines.iter().position(|l| holds_task(l)) else {
                bail!(
                    "task '{}' is no longer pending in {}",
                    task,
                    self.path.display()
                );
            };
            tracing::warn!(
                "Task '{}' moved from line {} to line {}",
                task,
                index + 1,
                found + 1
            );
            found
        };

        lines[target] = mark_line(&lines[target], outcome);
        self.write_lines(&lines)
    }

    /// Turn every failed task back into a pending one. Returns how many
    /// lines changed.
    pub fn requeue_failed(&self) -> Result<usize> {
        let mut lines = self.read_lines()?;
        let mut count = 0;
        for line in &mut lines {
            if line_status(line) == Some(TaskStatus::Failed) {
                if let Some(unmarked) = unmark_failed(line) {
                    *line = unmarked;
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.write_lines(&lines)?;
        }
        Ok(count)
    }

    pub fn counts(&self) -> Result<TaskCounts> {
        let mut counts = TaskCounts::default();
        for line in self.read_lines()? {
            match line_status(&line) {
                Some(TaskStatus::Pending) => counts.pending += 1,
                Some(TaskStatus::Done) => counts.done += 1,
                Some(TaskStatus::Failed) => counts.failed += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

/// Printed when the task file is missing
pub fn missing_file_guidance(path: &Path) -> String {
    format!(
        "\nCreate a {} file with one task per line.\n\
         Example:\n  \
         Add a loading spinner to the main screen\n  \
         [x] Completed tasks start with [x]\n  \
         [!] Failed tasks start with [!]\n  \
         # Lines starting with # are ignored\n",
        path.display()
    )
}
