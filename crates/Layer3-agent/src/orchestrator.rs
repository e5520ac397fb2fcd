//! Orchestrator - the project surface
//!
//! Projects, teams, sprints and tasks on top of the Project Store, with the
//! planner for the LLM-driven steps and the task agent for execution.
//! Side-effecting calls take an optional operation id and go through the
//! ledger so a repeated call replays instead of re-running.

use crate::planner::{default_member_prompt, role_slug, Planner};
use crate::task_agent::TaskAgent;
use crew_foundation::{prefixed_id, Error, Result};
use crew_sandbox::{WorkspaceRegistry, WorkspaceStatus, DEFAULT_DOCKERFILE};
use crew_task::scheduler::{self, SprintProgress};
use crew_task::{
    OperationLedger, Project, ProjectPatch, ProjectStatus, ProjectStore, Sprint, SprintStatus,
    Task, TaskPatch, TaskStatus, TeamMember,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Where a new project's workspace comes from
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceSource {
    /// Reuse a live workspace
    Existing(String),
    Dockerfile(String),
    Template(String),
    /// Build the stock python recipe
    Default,
}

/// Result of one executed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: String,
    pub title: String,
    pub assigned_to: String,
    pub status: TaskStatus,
    pub output: String,
}

impl TaskOutcome {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            assigned_to: task.assigned_to.clone(),
            status: task.status,
            output: task.output.clone().unwrap_or_default(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Report of one `start_sprint` round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintRound {
    pub sprint_id: String,
    pub executed: Vec<TaskOutcome>,
    /// Tasks that became ready during this round
    pub ready_next: Vec<String>,
    pub status: SprintStatus,
    pub progress: SprintProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintReport {
    pub sprint: Sprint,
    pub progress: SprintProgress,
    pub ready: Vec<String>,
}

pub struct Orchestrator {
    registry: Arc<WorkspaceRegistry>,
    projects: Arc<ProjectStore>,
    ledger: Arc<OperationLedger>,
    planner: Planner,
    agent: TaskAgent,
    max_parallel: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<WorkspaceRegistry>,
        projects: Arc<ProjectStore>,
        ledger: Arc<OperationLedger>,
        planner: Planner,
        agent: TaskAgent,
    ) -> Self {
        let max_parallel = registry.limits().max_running.max(1);
        Self {
            registry,
            projects,
            ledger,
            planner,
            agent,
            max_parallel,
        }
    }

    /// Upper bound on tasks dispatched at once in a sprint round
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn projects(&self) -> &Arc<ProjectStore> {
        &self.projects
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        workspace: WorkspaceSource,
        network_enabled: bool,
        op_id: Option<&str>,
    ) -> Result<Project> {
        self.ledger
            .run(op_id, "project.create", || async move {
                let ws_name = format!("{}-workspace", name);
                let ws = match workspace {
                    WorkspaceSource::Existing(id) => {
                        let ws = self.registry.require(&id)?;
                        ws.ensure_not_destroyed()?;
                        ws
                    }
                    WorkspaceSource::Dockerfile(dockerfile) => {
                        self.registry
                            .create_from_dockerfile(&ws_name, &dockerfile, network_enabled)
                            .await?
                    }
                    WorkspaceSource::Template(template_id) => {
                        self.registry
                            .create_from_template(&ws_name, &template_id, network_enabled)
                            .await?
                    }
                    WorkspaceSource::Default => {
                        self.registry
                            .create_from_dockerfile(&ws_name, DEFAULT_DOCKERFILE, network_enabled)
                            .await?
                    }
                };
                if ws.status == WorkspaceStatus::Failed {
                    warn!(workspace = %ws.id, "Project workspace failed to build; fix the recipe and rebuild");
                }
                self.projects.create(name, description, ws.id)
            })
            .await
    }

    pub fn list_projects(&self) -> Vec<Project> {
        self.projects.list()
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.projects.require(id)
    }

    pub fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Project> {
        self.projects.update(id, patch)
    }

    /// Delete a project, destroying its workspace and volume unless kept
    pub async fn delete_project(&self, id: &str, keep_workspace: bool) -> Result<Project> {
        let project = self.projects.require(id)?;
        if !keep_workspace {
            match self.registry.destroy(&project.workspace_id, false).await {
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.projects.delete(id)
    }

    // ========================================================================
    // Team
    // ========================================================================

    /// Let the model pick a team for the project description
    pub async fn analyze_team(&self, id: &str) -> Result<Vec<TeamMember>> {
        let project = self.projects.set_status(id, ProjectStatus::Analyzing)?;
        match self.planner.analyze_team(&project.description).await {
            Ok(team) => Ok(self.projects.set_team(id, team)?.team),
            Err(e) => {
                warn!(project = id, error = %e, "Team analysis failed");
                self.projects.set_status(id, ProjectStatus::Idle)?;
                Err(e)
            }
        }
    }

    pub fn add_team_member(
        &self,
        id: &str,
        role: &str,
        name: &str,
        capabilities: Vec<String>,
        system_prompt: Option<String>,
    ) -> Result<TeamMember> {
        let member = TeamMember {
            id: prefixed_id(&format!("member-{}", role_slug(role))),
            role: role.to_string(),
            name: name.to_string(),
            system_prompt: system_prompt
                .unwrap_or_else(|| default_member_prompt(name, role, &capabilities)),
            capabilities,
        };
        self.projects.add_team_member(id, member.clone())?;
        Ok(member)
    }

    pub fn remove_team_member(&self, id: &str, member_id: &str) -> Result<Project> {
        self.projects.remove_team_member(id, member_id)
    }

    pub fn list_team(&self, id: &str) -> Result<Vec<TeamMember>> {
        Ok(self.projects.require(id)?.team)
    }

    // ========================================================================
    // Sprints
    // ========================================================================

    /// Plan a new sprint for `goal`
    pub async fn create_sprint(&self, id: &str, goal: &str, op_id: Option<&str>) -> Result<Sprint> {
        self.ledger
            .run(op_id, "sprint.create", || async move {
                let project = self.projects.require(id)?;
                if project.team.is_empty() {
                    return Err(Error::state_conflict(format!(
                        "Project {} has no team. Analyze or add team members first.",
                        id
                    )));
                }

                self.projects.set_status(id, ProjectStatus::Planning)?;
                let planned = self
                    .planner
                    .plan_sprint(&prefixed_id("sprint"), goal, &project.team)
                    .await;
                self.projects.set_status(id, ProjectStatus::Idle)?;

                let sprint = planned?;
                self.projects.add_sprint(id, sprint.clone())?;
                Ok(sprint)
            })
            .await
    }

    /// Dispatch every ready task once
    pub async fn start_sprint(
        &self,
        id: &str,
        sprint_id: &str,
        op_id: Option<&str>,
    ) -> Result<SprintRound> {
        self.ledger
            .run(op_id, "sprint.start", || self.run_round(id, sprint_id))
            .await
    }

    async fn run_round(&self, id: &str, sprint_id: &str) -> Result<SprintRound> {
        let (project, ready) = self.projects.modify(id, |p| {
            let sprint = p.sprint_mut(sprint_id)?;
            if sprint.status == SprintStatus::Completed {
                return Err(Error::state_conflict(format!(
                    "Sprint {} is already completed",
                    sprint_id
                )));
            }

            let ready = scheduler::ready_ids(sprint);
            if ready.is_empty() {
                // nothing to dispatch: leave statuses alone unless the sprint is simply done
                if !scheduler::is_complete(sprint) {
                    return Err(Error::state_conflict(blocked_message(sprint)));
                }
                return Ok((p.clone(), ready));
            }

            sprint.status = SprintStatus::Active;
            for task in sprint.tasks.iter_mut().filter(|t| ready.contains(&t.id)) {
                task.status = TaskStatus::InProgress;
            }
            p.status = ProjectStatus::Running;
            Ok((p.clone(), ready))
        })?;

        let dispatched: Vec<Task> = project
            .sprint(sprint_id)?
            .tasks
            .iter()
            .filter(|t| ready.contains(&t.id))
            .cloned()
            .collect();
        info!(project = id, sprint = sprint_id, tasks = dispatched.len(), "Sprint round");

        // 세마포어로 동시 실행 수 제한
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let project = &project;
        let futures: Vec<_> = dispatched
            .into_iter()
            .map(|task| {
                let sem = Arc::clone(&semaphore);
                async move {
                    let _permit = sem.acquire().await.ok();
                    self.execute_task(project, sprint_id, task).await
                }
            })
            .collect();
        let executed = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        // everything ready before the round was dispatched, so what is ready now is new
        let sprint = self.settle(id, sprint_id)?;
        let ready_next = scheduler::ready_ids(&sprint);

        Ok(SprintRound {
            sprint_id: sprint_id.to_string(),
            executed,
            ready_next,
            status: sprint.status,
            progress: scheduler::progress(&sprint),
        })
    }

    /// Complete the sprint (and idle the project) once every task is finished.
    /// A sprint left with nothing ready or running also idles the project.
    fn settle(&self, id: &str, sprint_id: &str) -> Result<Sprint> {
        self.projects.modify(id, |p| {
            let sprint = p.sprint_mut(sprint_id)?;
            let finished = sprint.status != SprintStatus::Completed && scheduler::is_complete(sprint);
            if finished {
                sprint.status = SprintStatus::Completed;
            }
            let sprint = sprint.clone();
            if finished {
                p.status = ProjectStatus::Idle;
                info!(project = %p.id, sprint = %sprint.id, "Sprint completed");
            } else if is_stuck(&sprint) {
                p.status = ProjectStatus::Idle;
                warn!(project = %p.id, sprint = %sprint.id, "Sprint blocked on failed dependencies");
            }
            Ok(sprint)
        })
    }

    pub fn pause_sprint(&self, id: &str, sprint_id: &str) -> Result<Sprint> {
        self.transition(id, sprint_id, SprintStatus::Paused, ProjectStatus::Paused)
    }

    pub fn resume_sprint(&self, id: &str, sprint_id: &str) -> Result<Sprint> {
        self.transition(id, sprint_id, SprintStatus::Active, ProjectStatus::Running)
    }

    /// Force the sprint closed, whatever its tasks say
    pub fn complete_sprint(&self, id: &str, sprint_id: &str) -> Result<Sprint> {
        self.transition(id, sprint_id, SprintStatus::Completed, ProjectStatus::Idle)
    }

    fn transition(
        &self,
        id: &str,
        sprint_id: &str,
        sprint_status: SprintStatus,
        project_status: ProjectStatus,
    ) -> Result<Sprint> {
        self.projects.modify(id, |p| {
            let sprint = p.sprint_mut(sprint_id)?;
            if sprint.status == SprintStatus::Completed && sprint_status != SprintStatus::Completed
            {
                return Err(Error::state_conflict(format!(
                    "Sprint {} is already completed",
                    sprint_id
                )));
            }
            sprint.status = sprint_status;
            let sprint = sprint.clone();
            p.status = project_status;
            Ok(sprint)
        })
    }

    pub fn sprint_status(&self, id: &str, sprint_id: &str) -> Result<SprintReport> {
        let sprint = self.projects.get_sprint(id, sprint_id)?;
        Ok(SprintReport {
            progress: scheduler::progress(&sprint),
            ready: scheduler::ready_ids(&sprint),
            sprint,
        })
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn list_tasks(&self, id: &str, sprint_id: &str) -> Result<Vec<Task>> {
        Ok(self.projects.get_sprint(id, sprint_id)?.tasks)
    }

    pub fn task_status(&self, id: &str, sprint_id: &str, task_id: &str) -> Result<Task> {
        self.projects.get_task(id, sprint_id, task_id)
    }

    /// Run one task outside the scheduler
    pub async fn run_task(
        &self,
        id: &str,
        sprint_id: &str,
        task_id: &str,
        op_id: Option<&str>,
    ) -> Result<TaskOutcome> {
        self.ledger
            .run(op_id, "task.run", || async move {
                let project = self.projects.modify(id, |p| {
                    let sprint = p.sprint_mut(sprint_id)?;
                    let task = sprint.task(task_id)?;
                    let unmet: Vec<String> = scheduler::unmet_dependencies(sprint, task)
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    if !unmet.is_empty() {
                        return Err(Error::state_conflict(format!(
                            "Task {} is blocked by unfinished dependencies: {}",
                            task_id,
                            unmet.join(", ")
                        )));
                    }
                    let task = sprint.task_mut(task_id)?;
                    if task.status == TaskStatus::InProgress {
                        return Err(Error::state_conflict(format!(
                            "Task {} is already in progress",
                            task_id
                        )));
                    }
                    task.status = TaskStatus::InProgress;
                    Ok(p.clone())
                })?;

                let task = project.sprint(sprint_id)?.task(task_id)?.clone();
                let outcome = self.execute_task(&project, sprint_id, task).await?;
                self.settle(id, sprint_id)?;
                Ok(outcome)
            })
            .await
    }

    /// Reset a failed task to pending
    pub fn retry_task(
        &self,
        id: &str,
        sprint_id: &str,
        task_id: &str,
        op_id: Option<&str>,
    ) -> Result<Task> {
        self.ledger.run_sync(op_id, "task.retry", || {
            self.projects.modify(id, |p| {
                let sprint = p.sprint_mut(sprint_id)?;
                let task = sprint.task_mut(task_id)?;
                if task.status != TaskStatus::Failed {
                    return Err(Error::state_conflict(format!(
                        "Only failed tasks can be retried; task {} is {}",
                        task_id, task.status
                    )));
                }
                task.status = TaskStatus::Pending;
                task.output = None;
                task.retries += 1;
                let task = task.clone();
                if sprint.status == SprintStatus::Completed {
                    sprint.status = SprintStatus::Active;
                }
                info!(task = task_id, retries = task.retries, "Task reset for retry");
                Ok(task)
            })
        })
    }

    /// Mark a task done without running it
    pub fn skip_task(
        &self,
        id: &str,
        sprint_id: &str,
        task_id: &str,
        reason: Option<&str>,
        op_id: Option<&str>,
    ) -> Result<Task> {
        self.ledger.run_sync(op_id, "task.skip", || {
            let reason = reason.unwrap_or("Manually skipped");
            let task = self.projects.update_task(
                id,
                sprint_id,
                task_id,
                TaskPatch::finished(TaskStatus::Done, format!("[SKIPPED] {}", reason)),
            )?;
            self.settle(id, sprint_id)?;
            Ok(task)
        })
    }

    pub fn assign_task(
        &self,
        id: &str,
        sprint_id: &str,
        task_id: &str,
        member_id: &str,
    ) -> Result<Task> {
        self.projects.require(id)?.require_member(member_id)?;
        self.projects.update_task(
            id,
            sprint_id,
            task_id,
            TaskPatch {
                assigned_to: Some(member_id.to_string()),
                ..Default::default()
            },
        )
    }

    /// Run the agent for one in-progress task and record the result
    async fn execute_task(
        &self,
        project: &Project,
        sprint_id: &str,
        task: Task,
    ) -> Result<TaskOutcome> {
        let (status, output) = match project.member(&task.assigned_to) {
            None => {
                warn!(task = %task.id, assignee = %task.assigned_to, "Assignee not on team");
                (
                    TaskStatus::Failed,
                    format!(
                        "Task is assigned to '{}', who is not on the project team. \
                         Reassign it and retry.",
                        task.assigned_to
                    ),
                )
            }
            Some(member) => match self.agent.run(&task, member, &project.workspace_id).await {
                Ok(report) if report.success => (TaskStatus::Done, report.output),
                Ok(report) => (TaskStatus::Failed, report.output),
                Err(e) => {
                    warn!(task = %task.id, error = %e, "Agent error");
                    (TaskStatus::Failed, format!("Agent error: {}", e))
                }
            },
        };

        let task = self.projects.update_task(
            &project.id,
            sprint_id,
            &task.id,
            TaskPatch::finished(status, output),
        )?;
        Ok(TaskOutcome::from_task(&task))
    }
}

/// Explain why a sprint with unfinished tasks has nothing ready
fn blocked_message(sprint: &Sprint) -> String {
    let blocked: Vec<String> = sprint
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| {
            format!(
                "{} (waiting on {})",
                t.id,
                scheduler::unmet_dependencies(sprint, t).join(", ")
            )
        })
        .collect();
    if blocked.is_empty() {
        format!("No tasks ready to run in sprint {}; tasks are still in progress", sprint.id)
    } else {
        format!(
            "No tasks ready to run in sprint {}. Blocked: {}. Retry or skip the failed dependencies",
            sprint.id,
            blocked.join(", ")
        )
    }
}

fn is_stuck(sprint: &Sprint) -> bool {
    scheduler::ready_set(sprint).is_empty()
        && !sprint.tasks.iter().any(|t| t.status == TaskStatus::InProgress)
}
