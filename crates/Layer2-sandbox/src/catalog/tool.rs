//! Tool Catalog - 저장된 커스텀 스크립트
//!
//! 도구는 워크스페이스와 독립적이며, 런타임이 맞는 어떤 워크스페이스에서도 실행할 수 있다.

use crate::driver::ExecOutput;
use crate::registry::WorkspaceRegistry;
use chrono::{DateTime, Utc};
use crew_foundation::{prefixed_id, Error, JsonCollection, JsonStore, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub const TOOLS_FILE: &str = "tools.json";

/// Interpreter a tool script is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRuntime {
    Python,
    Node,
    Shell,
}

impl ToolRuntime {
    fn interpreter(&self) -> Option<&'static str> {
        match self {
            Self::Python => Some("python3"),
            Self::Node => Some("node"),
            Self::Shell => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Node => "js",
            Self::Shell => "sh",
        }
    }
}

impl fmt::Display for ToolRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Shell => "shell",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ToolRuntime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "node" | "js" | "javascript" => Ok(Self::Node),
            "shell" | "sh" | "bash" => Ok(Self::Shell),
            other => Err(Error::InvalidInput(format!(
                "Unknown tool runtime '{}' (expected python, node or shell)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub script: String,
    pub runtime: ToolRuntime,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub script: Option<String>,
    pub runtime: Option<ToolRuntime>,
}

pub struct ToolCatalog {
    tools: JsonCollection<CustomTool>,
}

impl ToolCatalog {
    pub fn open(store: JsonStore) -> Result<Self> {
        Ok(Self {
            tools: JsonCollection::open(store, TOOLS_FILE, "Tool")?,
        })
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        script: impl Into<String>,
        runtime: ToolRuntime,
    ) -> Result<CustomTool> {
        let tool = CustomTool {
            id: prefixed_id("tool"),
            name: name.into(),
            description: description.into(),
            script: script.into(),
            runtime,
            created_at: Utc::now(),
        };
        self.tools.insert(&tool.id, tool.clone())?;
        info!(id = %tool.id, name = %tool.name, runtime = %runtime, "Tool created");
        Ok(tool)
    }

    pub fn get(&self, id: &str) -> Option<CustomTool> {
        self.tools.get(id)
    }

    pub fn require(&self, id: &str) -> Result<CustomTool> {
        self.tools.require(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<CustomTool> {
        self.tools.find(|t| t.name == name)
    }

    pub fn list(&self) -> Vec<CustomTool> {
        let mut all = self.tools.values();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tools.remove(id)?.is_some())
    }

    pub fn update(&self, id: &str, patch: ToolPatch) -> Result<CustomTool> {
        self.tools.update(id, |t| {
            if let Some(name) = patch.name {
                t.name = name;
            }
            if let Some(description) = patch.description {
                t.description = description;
            }
            if let Some(script) = patch.script {
                t.script = script;
            }
            if let Some(runtime) = patch.runtime {
                t.runtime = runtime;
            }
            Ok(t.clone())
        })
    }

    /// Run a saved tool inside a workspace and format its output
    ///
    /// Shell scripts run as-is; python and node scripts are staged under
    /// `/tmp` first and handed to their interpreter.
    pub async fn run_tool(
        &self,
        registry: &WorkspaceRegistry,
        tool_id: &str,
        workspace_id: &str,
    ) -> Result<String> {
        let tool = self.require(tool_id)?;
        info!(tool = %tool.name, workspace = workspace_id, "Running tool");

        let output = match tool.runtime.interpreter() {
            None => registry.exec(workspace_id, &tool.script).await?,
            Some(interpreter) => {
                let path = format!("/tmp/crew-{}.{}", tool.id, tool.runtime.extension());
                registry
                    .put_file(workspace_id, &path, tool.script.as_bytes())
                    .await?;
                registry
                    .exec(workspace_id, &format!("{} {}", interpreter, path))
                    .await?
            }
        };

        Ok(format_run(&tool.name, &output))
    }
}

fn format_run(name: &str, output: &ExecOutput) -> String {
    let mut text = format!("Running tool: {}\n{}\n", name, "─".repeat(40));
    if !output.stdout.is_empty() {
        text.push_str(&output.stdout);
    }
    if !output.stderr.is_empty() {
        if !output.stdout.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[stderr] {}", output.stderr));
    }
    if output.exit_code != 0 {
        text.push_str(&format!("\n[exit code: {}]", output.exit_code));
    }
    if output.stdout.is_empty() && output.stderr.is_empty() && output.exit_code == 0 {
        text.push_str(&format!("Tool {} completed (no output)", name));
    }
    text
}
