//! `write_file`

use std::path::Path;

use crate::build_state::BuildVerificationState;
use crate::tool::ToolResult;

/// Write `content`, creating parent directories. A successful write
/// invalidates the run's build state.
pub(super) async fn write_file(
    path: &Path,
    shown: &str,
    content: &str,
    build: &mut BuildVerificationState,
) -> ToolResult {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::error!("Failed to create directory for {}: {}", shown, e);
            return ToolResult::error(format!("Error writing to file {}: {}", shown, e));
        }
    }

    match tokio::fs::write(path, content).await {
        Ok(()) => {
            tracing::info!("Wrote file: {} ({} bytes)", shown, content.len());
            build.invalidate();
            ToolResult::text(format!("Successfully wrote to {}", shown))
        }
        Err(e) => {
            tracing::error!("Failed to write {}: {}", shown, e);
            ToolResult::error(format!("Error writing to file {}: {}", shown, e))
        }
    }
}
