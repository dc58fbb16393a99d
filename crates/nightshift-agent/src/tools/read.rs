//! `read_file`

use std::path::Path;

use crate::tool::ToolResult;

/// Read a UTF-8 file. `shown` is the path as the model wrote it.
pub(super) async fn read_file(path: &Path, shown: &str) -> ToolResult {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            tracing::info!("Read file: {} ({} bytes)", shown, content.len());
            ToolResult::text(content)
        }
        Err(e) => {
            tracing::error!("Failed to read {}: {}", shown, e);
            ToolResult::error(format!("Error reading file {}: {}", shown, e))
        }
    }
}
