//! Sandbox tools exposed to the task agent
//!
//! The three tools are bound to one workspace; the model never names it.

use crate::completion::ToolHandler;
use async_trait::async_trait;
use crew_foundation::{Error, Result};
use crew_provider::ToolDef;
use crew_sandbox::{ExecOutput, WorkspaceRegistry};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub const EXEC: &str = "exec";
pub const FILE_WRITE: &str = "file_write";
pub const FILE_READ: &str = "file_read";

/// A parsed sandbox tool call
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxToolCall {
    Exec { command: String },
    WriteFile { path: String, content: String },
    ReadFile { path: String },
}

impl SandboxToolCall {
    /// Parse arguments for the tool called `name`
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct ExecArgs {
            command: String,
        }
        #[derive(Deserialize)]
        struct WriteArgs {
            path: String,
            content: String,
        }
        #[derive(Deserialize)]
        struct ReadArgs {
            path: String,
        }

        let invalid = |e: serde_json::Error| {
            Error::InvalidInput(format!("invalid arguments for {}: {}", name, e))
        };
        match name {
            EXEC => serde_json::from_value::<ExecArgs>(arguments)
                .map(|a| Self::Exec { command: a.command })
                .map_err(invalid),
            FILE_WRITE => serde_json::from_value::<WriteArgs>(arguments)
                .map(|a| Self::WriteFile {
                    path: a.path,
                    content: a.content,
                })
                .map_err(invalid),
            FILE_READ => serde_json::from_value::<ReadArgs>(arguments)
                .map(|a| Self::ReadFile { path: a.path })
                .map_err(invalid),
            other => Err(Error::ToolNotFound(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exec { .. } => EXEC,
            Self::WriteFile { .. } => FILE_WRITE,
            Self::ReadFile { .. } => FILE_READ,
        }
    }

    pub async fn run(&self, registry: &WorkspaceRegistry, workspace_id: &str) -> Result<String> {
        match self {
            Self::Exec { command } => {
                let output = registry.exec(workspace_id, command).await?;
                Ok(format_exec(&output))
            }
            Self::WriteFile { path, content } => {
                let resolved = registry.write_file(workspace_id, path, content).await?;
                Ok(format!("Written {} bytes to {}", content.len(), resolved))
            }
            Self::ReadFile { path } => registry.read_file(workspace_id, path).await,
        }
    }
}

/// stdout, then stderr and a non-zero exit code when present
pub fn format_exec(output: &ExecOutput) -> String {
    let mut text = output.stdout.clone();
    if !output.stderr.is_empty() {
        text.push_str(&format!("\n[stderr]: {}", output.stderr));
    }
    if output.timed_out {
        text.push_str("\n[timed out]");
    }
    if output.truncated {
        text.push_str("\n[output truncated]");
    }
    if output.exit_code != 0 {
        text.push_str(&format!("\n[exit code: {}]", output.exit_code));
    }
    if text.is_empty() {
        text.push_str("(no output)");
    }
    text
}

pub fn definition(name: &str) -> Option<ToolDef> {
    let def = match name {
        EXEC => ToolDef::new(
            EXEC,
            "Run a shell command inside the workspace container (cwd /workspace). \
             Use it to run code, tests and installs.",
        )
        .with_string_param("command", "Shell command to execute", true),
        FILE_WRITE => ToolDef::new(
            FILE_WRITE,
            "Create or overwrite a file in the workspace. Paths are relative to /workspace.",
        )
        .with_string_param("path", "File path, e.g. src/main.py", true)
        .with_string_param("content", "Complete file content", true),
        FILE_READ => ToolDef::new(FILE_READ, "Read a file from the workspace.")
            .with_string_param("path", "File path relative to /workspace", true),
        _ => return None,
    };
    Some(def)
}

/// One sandbox tool bound to a workspace
pub struct SandboxTool {
    name: &'static str,
    registry: Arc<WorkspaceRegistry>,
    workspace_id: String,
}

#[async_trait]
impl ToolHandler for SandboxTool {
    fn definition(&self) -> ToolDef {
        definition(self.name).unwrap_or_else(|| ToolDef::new(self.name, ""))
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        SandboxToolCall::parse(self.name, arguments)?
            .run(&self.registry, &self.workspace_id)
            .await
    }
}

/// exec, file_write and file_read for `workspace_id`
pub fn sandbox_tools(
    registry: Arc<WorkspaceRegistry>,
    workspace_id: &str,
) -> Vec<Arc<dyn ToolHandler>> {
    [FILE_WRITE, EXEC, FILE_READ]
        .into_iter()
        .map(|name| {
            Arc::new(SandboxTool {
                name,
                registry: registry.clone(),
                workspace_id: workspace_id.to_string(),
            }) as Arc<dyn ToolHandler>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_by_name() {
        assert_eq!(
            SandboxToolCall::parse("exec", json!({"command": "ls"})).unwrap(),
            SandboxToolCall::Exec {
                command: "ls".into()
            }
        );
        let write =
            SandboxToolCall::parse("file_write", json!({"path": "a.py", "content": "x"})).unwrap();
        assert_eq!(write.name(), FILE_WRITE);
        assert!(SandboxToolCall::parse("file_write", json!({"path": "a.py"})).is_err());
        assert!(matches!(
            SandboxToolCall::parse("rm_rf", json!({})),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_format_exec() {
        let ok = ExecOutput {
            stdout: "hi\n".into(),
            ..Default::default()
        };
        assert_eq!(format_exec(&ok), "hi\n");

        let failed = ExecOutput {
            stderr: "boom".into(),
            exit_code: 2,
            ..Default::default()
        };
        assert_eq!(format_exec(&failed), "\n[stderr]: boom\n[exit code: 2]");
        assert_eq!(format_exec(&ExecOutput::default()), "(no output)");
    }

    #[test]
    fn test_definitions_require_arguments() {
        let def = definition(FILE_WRITE).unwrap();
        assert!(def.validate_arguments(&json!({"path": "a"})).is_err());
        assert!(def
            .validate_arguments(&json!({"path": "a", "content": ""}))
            .is_ok());
        assert!(definition("nope").is_none());
    }
}
