//! The four workspace tools offered to the model
//!
//! Dispatch goes through the closed [`ToolRequest`] set. Every failure mode
//! (unknown name, malformed or schema-violating arguments, I/O errors,
//! timeouts) is turned into an error [`ToolResult`] so the model can react to
//! it; nothing here aborts a run.

mod list;
mod read;
mod shell;
mod write;

pub use list::{ListSettings, list_files};

use async_trait::async_trait;
use nightshift_ai::ToolCall;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::build_state::{BuildVerificationState, CommandClassifier};
use crate::error::{Error, Result};
use crate::tool::{DEFAULT_MAX_RESULT_CHARS, ToolDispatcher, ToolResult};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const LIST_FILES: &str = "list_files";
pub const RUN_SHELL: &str = "run_shell";

/// Wall-clock limit for a single shell command
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListFilesArgs {
    #[serde(default = "default_list_path")]
    pub path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunShellArgs {
    pub command: String,
}

/// A decoded tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    ReadFile(ReadFileArgs),
    WriteFile(WriteFileArgs),
    ListFiles(ListFilesArgs),
    RunShell(RunShellArgs),
    Unknown(String),
}

impl ToolRequest {
    /// Decode a call by name. Argument problems are returned as the message
    /// to hand back to the model.
    pub fn parse(name: &str, arguments: &Value) -> std::result::Result<Self, String> {
        Ok(match name {
            READ_FILE => Self::ReadFile(decode(arguments)?),
            WRITE_FILE => Self::WriteFile(decode(arguments)?),
            LIST_FILES => Self::ListFiles(decode(arguments)?),
            RUN_SHELL => Self::RunShell(decode(arguments)?),
            other => Self::Unknown(other.to_string()),
        })
    }
}

fn decode<T: DeserializeOwned>(arguments: &Value) -> std::result::Result<T, String> {
    let arguments = normalize_arguments(arguments)?;
    serde_json::from_value(arguments).map_err(|e| format!("Error: Invalid JSON arguments: {}", e))
}

/// Turn the arguments as received into a JSON object.
///
/// The provider keeps argument text it could not parse as a JSON string;
/// that text is re-parsed here so the error names the actual problem.
fn normalize_arguments(arguments: &Value) -> std::result::Result<Value, String> {
    match arguments {
        Value::Object(_) => Ok(arguments.clone()),
        Value::Null => Ok(json!({})),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            Ok(_) => Err("Error: Invalid JSON arguments: expected an object".to_string()),
            Err(e) => Err(format!("Error: Invalid JSON arguments: {}", e)),
        },
        _ => Err("Error: Invalid JSON arguments: expected an object".to_string()),
    }
}

/// Tunables for the workspace tools
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Results longer than this are cut down to head and tail
    pub max_result_chars: usize,
    pub list: ListSettings,
    pub shell_timeout: Duration,
    pub classifier: CommandClassifier,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
            list: ListSettings::default(),
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
            classifier: CommandClassifier::default(),
        }
    }
}

/// Dispatcher for `read_file`, `write_file`, `list_files` and `run_shell`,
/// with relative paths resolved against a workspace root.
pub struct WorkspaceTools {
    root: PathBuf,
    settings: ToolSettings,
    /// Compiled argument validators keyed by tool name
    validators: HashMap<String, jsonschema::Validator>,
}

impl WorkspaceTools {
    /// Create the tool set for the workspace at `root`, which must exist
    pub fn new(root: impl AsRef<Path>, settings: ToolSettings) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;

        let mut validators = HashMap::new();
        for tool in definitions() {
            let validator =
                jsonschema::validator_for(&tool.parameters).map_err(|e| Error::InvalidSchema {
                    tool: tool.name.clone(),
                    message: e.to_string(),
                })?;
            validators.insert(tool.name, validator);
        }

        Ok(Self {
            root,
            settings,
            validators,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    async fn execute(&self, request: ToolRequest, build: &mut BuildVerificationState) -> ToolResult {
        match request {
            ToolRequest::ReadFile(args) => read::read_file(&self.resolve(&args.path), &args.path).await,
            ToolRequest::WriteFile(args) => {
                write::write_file(&self.resolve(&args.path), &args.path, &args.content, build).await
            }
            ToolRequest::ListFiles(args) => {
                match list_files(&self.root, &self.resolve(&args.path), &self.settings.list) {
                    Ok(listing) => ToolResult::text(listing),
                    Err(e) => {
                        ToolResult::error(format!("Error listing files in {}: {}", args.path, e))
                    }
                }
            }
            ToolRequest::RunShell(args) => {
                shell::run_shell(
                    &self.root,
                    &args.command,
                    self.settings.shell_timeout,
                    &self.settings.classifier,
                    build,
                )
                .await
            }
            ToolRequest::Unknown(name) => {
                tracing::warn!(tool = %name, "Model requested an unknown tool");
                ToolResult::error(format!("Error: Unknown tool '{}'", name))
            }
        }
    }
}

#[async_trait]
impl ToolDispatcher for WorkspaceTools {
    fn definitions(&self) -> Vec<nightshift_ai::Tool> {
        definitions()
    }

    async fn dispatch(&self, call: &ToolCall, build: &mut BuildVerificationState) -> ToolResult {
        if let Some(validator) = self.validators.get(&call.name) {
            let arguments = match normalize_arguments(&call.arguments) {
                Ok(a) => a,
                Err(message) => return ToolResult::error(message),
            };
            if let Some(message) = validate_with_validator(&arguments, validator) {
                return ToolResult::error(message);
            }
        }

        let request = match ToolRequest::parse(&call.name, &call.arguments) {
            Ok(r) => r,
            Err(message) => {
                tracing::warn!(tool = %call.name, "Malformed tool arguments");
                return ToolResult::error(message);
            }
        };

        self.execute(request, build)
            .await
            .truncated(self.settings.max_result_chars)
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails.
fn validate_with_validator(args: &Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

/// Tool schema sent with every completion request
pub fn definitions() -> Vec<nightshift_ai::Tool> {
    vec![
        nightshift_ai::Tool::new(
            READ_FILE,
            "Read the contents of a file",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The path to the file to read" }
                },
                "required": ["path"]
            }),
        ),
        nightshift_ai::Tool::new(
            WRITE_FILE,
            "Write content to a file, creating parent directories. WARNING: After writing, you MUST run the build to verify the code compiles.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The path to the file to write" },
                    "content": { "type": "string", "description": "The content to write" }
                },
                "required": ["path", "content"]
            }),
        ),
        nightshift_ai::Tool::new(
            LIST_FILES,
            "List all files in a directory (recursive, filtered)",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The directory to list (default .)" }
                }
            }),
        ),
        nightshift_ai::Tool::new(
            RUN_SHELL,
            "Run a shell command. Use this to run builds (./gradlew build) and tests (./gradlew test).",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn tools(dir: &TempDir) -> WorkspaceTools {
        WorkspaceTools::new(dir.path(), ToolSettings::default()).unwrap()
    }

    #[test]
    fn test_parse_known_tools() {
        let req = ToolRequest::parse(READ_FILE, &json!({"path": "a.txt"})).unwrap();
        assert_eq!(
            req,
            ToolRequest::ReadFile(ReadFileArgs {
                path: "a.txt".to_string()
            })
        );

        let req = ToolRequest::parse(LIST_FILES, &json!({})).unwrap();
        assert_eq!(
            req,
            ToolRequest::ListFiles(ListFilesArgs {
                path: ".".to_string()
            })
        );
    }

    #[test]
    fn test_parse_unknown_tool() {
        let req = ToolRequest::parse("delete_everything", &json!({})).unwrap();
        assert_eq!(req, ToolRequest::Unknown("delete_everything".to_string()));
    }

    #[test]
    fn test_parse_malformed_arguments() {
        let err = ToolRequest::parse(RUN_SHELL, &Value::String("{\"command\": ".to_string()))
            .unwrap_err();
        assert!(err.starts_with("Error: Invalid JSON arguments:"));
    }

    #[test]
    fn test_parse_string_encoded_object() {
        let req =
            ToolRequest::parse(RUN_SHELL, &Value::String("{\"command\":\"ls\"}".to_string()))
                .unwrap();
        assert_eq!(
            req,
            ToolRequest::RunShell(RunShellArgs {
                command: "ls".to_string()
            })
        );
    }

    #[test]
    fn test_definitions_cover_all_tools() {
        let names: Vec<String> = definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![READ_FILE, WRITE_FILE, LIST_FILES, RUN_SHELL]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let dir = TempDir::new().unwrap();
        let mut build = BuildVerificationState::new();
        let result = tools(&dir)
            .dispatch(&call("rm_rf", json!({})), &mut build)
            .await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Error: Unknown tool 'rm_rf'");
    }

    #[tokio::test]
    async fn test_schema_violation_is_error_result() {
        let dir = TempDir::new().unwrap();
        let mut build = BuildVerificationState::new();
        let result = tools(&dir)
            .dispatch(&call(WRITE_FILE, json!({"path": "a.txt"})), &mut build)
            .await;
        assert!(result.is_error);
        assert!(
            result
                .text_content()
                .starts_with("Tool argument validation failed")
        );
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_error_result() {
        let dir = TempDir::new().unwrap();
        let mut build = BuildVerificationState::new();
        let result = tools(&dir)
            .dispatch(
                &call(READ_FILE, Value::String("{not json".to_string())),
                &mut build,
            )
            .await;
        assert!(result.is_error);
        assert!(
            result
                .text_content()
                .starts_with("Error: Invalid JSON arguments:")
        );
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip_resets_build() {
        let dir = TempDir::new().unwrap();
        let tools = tools(&dir);
        let mut build = BuildVerificationState::new();

        let result = tools
            .dispatch(&call(RUN_SHELL, json!({"command": "echo gradlew build"})), &mut build)
            .await;
        assert!(!result.is_error);
        assert!(build.is_verified(true));

        let result = tools
            .dispatch(
                &call(WRITE_FILE, json!({"path": "src/deep/Main.kt", "content": "fun main() {}"})),
                &mut build,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "Successfully wrote to src/deep/Main.kt");
        assert!(!build.build_attempted());
        assert!(!build.build_passed());

        let result = tools
            .dispatch(&call(READ_FILE, json!({"path": "src/deep/Main.kt"})), &mut build)
            .await;
        assert_eq!(result.text_content(), "fun main() {}");
    }

    #[tokio::test]
    async fn test_long_results_are_truncated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "z".repeat(12_000)).unwrap();
        let mut build = BuildVerificationState::new();

        let result = tools(&dir)
            .dispatch(&call(READ_FILE, json!({"path": "big.txt"})), &mut build)
            .await;
        let text = result.text_content();
        assert!(text.contains("[truncated]"));
        assert!(text.chars().count() < 10_100);
    }

    #[tokio::test]
    async fn test_list_files_through_dispatch() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.kt"), "").unwrap();
        let mut build = BuildVerificationState::new();

        let result = tools(&dir)
            .dispatch(&call(LIST_FILES, json!({})), &mut build)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "src/a.kt");
    }

    #[test]
    fn test_missing_root_is_workspace_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = WorkspaceTools::new(&missing, ToolSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Workspace(_)));
    }
}
