//! Project / Team / Sprint / Task model
//!
//! Project 가 팀과 스프린트를 소유하고, 스프린트가 태스크 그래프를 소유한다.
//! 모든 필드는 camelCase 로 직렬화된다 (LLM 출력도 같은 형태로 파싱).

use chrono::{DateTime, Utc};
use crew_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Idle,
    Analyzing,
    Planning,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintStatus {
    #[default]
    Planning,
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    /// Done or failed; the sprint no longer waits on it
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Pending => "◯",
            Self::InProgress => "⟳",
            Self::Done => "✓",
            Self::Failed => "✗",
        }
    }
}

macro_rules! display_as_serde {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(s)) => write!(f, "{}", s),
                    _ => write!(f, "{:?}", self),
                }
            }
        }
    )*};
}

display_as_serde!(ProjectStatus, SprintStatus, TaskStatus);

// ============================================================================
// Entities
// ============================================================================

/// Agent persona on a project team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub retries: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            assigned_to: String::new(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            output: None,
            retries: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn assigned_to(mut self, member_id: impl Into<String>) -> Self {
        self.assigned_to = member_id.into();
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub status: SprintStatus,
}

impl Sprint {
    pub fn task(&self, task_id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| Error::not_found("Task", task_id))
    }

    pub fn task_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| Error::not_found("Task", task_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub workspace_id: String,
    #[serde(default)]
    pub team: Vec<TeamMember>,
    #[serde(default)]
    pub sprints: Vec<Sprint>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn sprint(&self, sprint_id: &str) -> Result<&Sprint> {
        self.sprints
            .iter()
            .find(|s| s.id == sprint_id)
            .ok_or_else(|| Error::not_found("Sprint", sprint_id))
    }

    pub fn sprint_mut(&mut self, sprint_id: &str) -> Result<&mut Sprint> {
        self.sprints
            .iter_mut()
            .find(|s| s.id == sprint_id)
            .ok_or_else(|| Error::not_found("Sprint", sprint_id))
    }

    pub fn member(&self, member_id: &str) -> Option<&TeamMember> {
        self.team.iter().find(|m| m.id == member_id)
    }

    pub fn require_member(&self, member_id: &str) -> Result<&TeamMember> {
        self.member(member_id)
            .ok_or_else(|| Error::not_found("Team member", member_id))
    }
}

// ============================================================================
// Patches (shallow merge; None leaves a field alone)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, project: &mut Project) {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(description) = self.description {
            project.description = description;
        }
        if let Some(status) = self.status {
            project.status = status;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SprintPatch {
    pub goal: Option<String>,
    pub status: Option<SprintStatus>,
}

impl SprintPatch {
    pub fn status(status: SprintStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, sprint: &mut Sprint) {
        if let Some(goal) = self.goal {
            sprint.goal = goal;
        }
        if let Some(status) = self.status {
            sprint.status = status;
        }
    }
}

/// `output: Some(None)` clears the transcript
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub output: Option<Option<String>>,
    pub retries: Option<u32>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn finished(status: TaskStatus, output: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            output: Some(Some(output.into())),
            ..Default::default()
        }
    }

    pub fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(assigned_to) = self.assigned_to {
            task.assigned_to = assigned_to;
        }
        if let Some(dependencies) = self.dependencies {
            task.dependencies = dependencies;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(output) = self.output {
            task.output = output;
        }
        if let Some(retries) = self.retries {
            task.retries = retries;
        }
    }
}
