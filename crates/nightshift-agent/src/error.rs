//! Error types for nightshift-agent

use thiserror::Error;

/// Result type alias using nightshift-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up a conversation run.
///
/// Failures *inside* a run (tool errors, build failures, exhausted retries)
/// are reported through [`crate::RunOutcome`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion layer
    #[error(transparent)]
    Ai(#[from] nightshift_ai::Error),

    /// Workspace root could not be resolved
    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// A built-in tool schema failed to compile
    #[error("Invalid schema for tool '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },
}
