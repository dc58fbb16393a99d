//! Tool results and the dispatch seam

use async_trait::async_trait;
use nightshift_ai::{Content, ToolCall};
use serde::{Deserialize, Serialize};

use crate::build_state::BuildVerificationState;

/// Results longer than this many characters are truncated
pub const DEFAULT_MAX_RESULT_CHARS: usize = 10_000;

/// Marker placed between the kept head and tail of a truncated result
pub const TRUNCATION_MARKER: &str = "\n\n... [truncated] ...\n\n";

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the model
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Apply [`truncate_middle`] to every text block
    pub fn truncated(mut self, max_chars: usize) -> Self {
        for block in &mut self.content {
            if let Content::Text { text } = block {
                if let Some(short) = truncate_middle(text, max_chars) {
                    *text = short;
                }
            }
        }
        self
    }
}

/// Executes tool calls requested by the model.
///
/// Implementations never fail: every problem, including an unknown tool
/// name or malformed arguments, comes back as an error [`ToolResult`]. The
/// run's build state is passed in so that writes and build commands can
/// update it.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Tool schema advertised to the model
    fn definitions(&self) -> Vec<nightshift_ai::Tool>;

    /// Execute one call
    async fn dispatch(&self, call: &ToolCall, build: &mut BuildVerificationState) -> ToolResult;
}

/// Keep the first and last `max_chars / 2` characters of `text` when it is
/// longer than `max_chars`. Returns `None` when no truncation is needed.
pub fn truncate_middle(text: &str, max_chars: usize) -> Option<String> {
    let total = text.chars().count();
    if total <= max_chars {
        return None;
    }

    let half = max_chars / 2;
    let head_end = text
        .char_indices()
        .nth(half)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail = tail_chars(text, half);

    let mut out = String::with_capacity(head_end + TRUNCATION_MARKER.len() + tail.len());
    out.push_str(&text[..head_end]);
    out.push_str(TRUNCATION_MARKER);
    out.push_str(tail);
    Some(out)
}

/// The last `n` characters of `text`
pub fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &text[i..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_text() {
        let r = ToolResult::text("ok");
        assert!(!r.is_error);
        assert_eq!(r.text_content(), "ok");
    }

    #[test]
    fn test_tool_result_error() {
        let r = ToolResult::error("bad");
        assert!(r.is_error);
        assert_eq!(r.text_content(), "bad");
    }

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_middle("hello", 10), None);
        assert_eq!(truncate_middle(&"x".repeat(10_000), 10_000), None);
    }

    #[test]
    fn test_truncates_twelve_thousand_chars() {
        let text = format!("{}{}{}", "h".repeat(5000), "m".repeat(2000), "t".repeat(5000));
        let out = truncate_middle(&text, DEFAULT_MAX_RESULT_CHARS).unwrap();

        assert!(out.starts_with(&"h".repeat(5000)));
        assert!(out.ends_with(&"t".repeat(5000)));
        assert!(out.contains(TRUNCATION_MARKER));
        assert!(!out.contains('m'));
        assert!(out.chars().count() < 10_100);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(30);
        let out = truncate_middle(&text, 10).unwrap();
        assert_eq!(out, format!("{}{}{}", "é".repeat(5), TRUNCATION_MARKER, "é".repeat(5)));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 2), "ef");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(tail_chars("abc", 0), "");
        assert_eq!(tail_chars("日本語", 1), "語");
    }

    #[test]
    fn test_truncated_result_keeps_error_flag() {
        let r = ToolResult::error("e".repeat(50)).truncated(20);
        assert!(r.is_error);
        assert!(r.text_content().contains("[truncated]"));
    }
}
