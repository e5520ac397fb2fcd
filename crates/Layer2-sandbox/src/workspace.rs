//! Workspace model
//!
//! A workspace = one container + one persistent volume + one image built
//! from a recipe. The container and image are disposable; the volume is
//! what carries state across rebuilds.

use crate::driver::{BuildOutput, ExecOutput, WORKDIR};
use chrono::{DateTime, Utc};
use crew_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workspace lifecycle state
///
/// `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Building,
    Running,
    Stopped,
    Failed,
    Destroyed,
}

impl WorkspaceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Counts toward the total cap
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub dockerfile: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    pub container_name: String,
    pub volume_name: String,
    pub image_tag: String,
    pub network_enabled: bool,
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub build_log: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Workspace {
    /// New workspace in `building` state; docker names derive from the id
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dockerfile: impl Into<String>,
        template_id: Option<String>,
        network_enabled: bool,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            container_name: format!("crew-{}", id),
            volume_name: format!("crew-vol-{}", id),
            image_tag: format!("crew-img-{}", id),
            id,
            name: name.into(),
            template_id,
            dockerfile: dockerfile.into(),
            image_id: None,
            container_id: None,
            network_enabled,
            status: WorkspaceStatus::Building,
            build_log: String::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkspaceStatus::Running
    }

    /// Reject any mutation of a destroyed workspace
    pub fn ensure_not_destroyed(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::state_conflict(format!(
                "Workspace {} has been destroyed",
                self.id
            )));
        }
        Ok(())
    }

    /// Why this workspace cannot be started, if it cannot
    pub fn start_blocker(&self) -> Option<String> {
        match self.status {
            WorkspaceStatus::Destroyed => Some(format!("Workspace {} has been destroyed", self.id)),
            WorkspaceStatus::Failed => Some(format!(
                "Workspace {} failed to build. Update the Dockerfile and rebuild.",
                self.id
            )),
            WorkspaceStatus::Building => Some(format!("Workspace {} is still building", self.id)),
            WorkspaceStatus::Running | WorkspaceStatus::Stopped => None,
        }
    }
}

/// Result of `rebuild`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResult {
    pub success: bool,
    pub log: String,
    pub workspace: Workspace,
}

/// Result of `verify`: rebuild, then run a test command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub build: BuildOutput,
    /// Absent when the build failed
    pub test: Option<ExecOutput>,
}

impl VerifyResult {
    pub fn passed(&self) -> bool {
        self.build.success && self.test.as_ref().map(|t| t.success()).unwrap_or(false)
    }
}

/// Resolve `path` to an absolute path under the sandbox working directory
///
/// Relative paths are joined onto `/workspace`. `..` segments may not climb
/// above it and absolute paths must already live inside it.
pub fn resolve_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Path must not be empty".into()));
    }

    let relative = if let Some(rest) = trimmed.strip_prefix('/') {
        match rest.strip_prefix(&WORKDIR[1..]) {
            Some("") => "",
            Some(r) if r.starts_with('/') => &r[1..],
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Path {} is outside {}",
                    path, WORKDIR
                )))
            }
        }
    } else {
        trimmed
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidInput(format!(
                        "Path {} escapes {}",
                        path, WORKDIR
                    )));
                }
            }
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        Ok(WORKDIR.to_string())
    } else {
        Ok(format!("{}/{}", WORKDIR, parts.join("/")))
    }
}
