//! Project Store
//!
//! Every nested mutation is replace-on-copy: the project is cloned, the
//! sprint/task/member is located by id and merged, and the whole project is
//! written back. A failing mutation leaves the stored project untouched.

use crate::model::{
    Project, ProjectPatch, ProjectStatus, Sprint, SprintPatch, Task, TaskPatch, TeamMember,
};
use chrono::Utc;
use crew_foundation::{prefixed_id, Error, JsonCollection, JsonStore, Result};
use tracing::{debug, info};

pub const PROJECTS_FILE: &str = "projects.json";

pub struct ProjectStore {
    projects: JsonCollection<Project>,
}

impl ProjectStore {
    pub fn open(store: JsonStore) -> Result<Self> {
        Ok(Self {
            projects: JsonCollection::open(store, PROJECTS_FILE, "Project")?,
        })
    }

    // ========================================================================
    // Project CRUD
    // ========================================================================

    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: prefixed_id("proj"),
            name: name.into(),
            description: description.into(),
            workspace_id: workspace_id.into(),
            team: Vec::new(),
            sprints: Vec::new(),
            status: ProjectStatus::Idle,
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(&project.id, project.clone())?;
        info!(id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.projects.get(id)
    }

    pub fn require(&self, id: &str) -> Result<Project> {
        self.projects.require(id)
    }

    /// Oldest first
    pub fn list(&self) -> Vec<Project> {
        let mut all = self.projects.values();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn delete(&self, id: &str) -> Result<Project> {
        let removed = self
            .projects
            .remove(id)?
            .ok_or_else(|| Error::not_found(self.projects.kind(), id))?;
        info!(id, "Project deleted");
        Ok(removed)
    }

    pub fn update(&self, id: &str, patch: ProjectPatch) -> Result<Project> {
        self.modify(id, |p| {
            patch.apply(p);
            Ok(p.clone())
        })
    }

    pub fn set_status(&self, id: &str, status: ProjectStatus) -> Result<Project> {
        debug!(id, %status, "Project status");
        self.update(id, ProjectPatch::status(status))
    }

    /// Run `f` against a copy of the project; the copy is stored (with a
    /// fresh `updatedAt`) only if `f` succeeds
    pub fn modify<R>(&self, id: &str, f: impl FnOnce(&mut Project) -> Result<R>) -> Result<R> {
        self.projects.update(id, |p| {
            let out = f(p)?;
            p.updated_at = Utc::now();
            Ok(out)
        })
    }

    // ========================================================================
    // Team
    // ========================================================================

    /// Replace the whole team; the project returns to idle
    pub fn set_team(&self, id: &str, team: Vec<TeamMember>) -> Result<Project> {
        self.modify(id, |p| {
            p.team = team;
            p.status = ProjectStatus::Idle;
            Ok(p.clone())
        })
    }

    pub fn add_team_member(&self, id: &str, member: TeamMember) -> Result<Project> {
        self.modify(id, |p| {
            if p.member(&member.id).is_some() {
                return Err(Error::InvalidInput(format!(
                    "Team member {} already exists",
                    member.id
                )));
            }
            p.team.push(member);
            Ok(p.clone())
        })
    }

    pub fn remove_team_member(&self, id: &str, member_id: &str) -> Result<Project> {
        self.modify(id, |p| {
            p.require_member(member_id)?;
            p.team.retain(|m| m.id != member_id);
            Ok(p.clone())
        })
    }

    // ========================================================================
    // Sprints
    // ========================================================================

    pub fn add_sprint(&self, id: &str, sprint: Sprint) -> Result<Project> {
        self.modify(id, |p| {
            p.sprints.push(sprint);
            Ok(p.clone())
        })
    }

    pub fn get_sprint(&self, id: &str, sprint_id: &str) -> Result<Sprint> {
        self.require(id)?.sprint(sprint_id).cloned()
    }

    pub fn update_sprint(&self, id: &str, sprint_id: &str, patch: SprintPatch) -> Result<Sprint> {
        self.modify(id, |p| {
            let sprint = p.sprint_mut(sprint_id)?;
            patch.apply(sprint);
            Ok(sprint.clone())
        })
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn get_task(&self, id: &str, sprint_id: &str, task_id: &str) -> Result<Task> {
        self.get_sprint(id, sprint_id)?.task(task_id).cloned()
    }

    pub fn update_task(
        &self,
        id: &str,
        sprint_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<Task> {
        self.modify(id, |p| {
            let task = p.sprint_mut(sprint_id)?.task_mut(task_id)?;
            patch.apply(task);
            Ok(task.clone())
        })
    }
}
