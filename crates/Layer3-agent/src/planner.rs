//! Planner - LLM-driven team synthesis and sprint planning
//!
//! Both steps ask for bare JSON and then cut the widest `[...]` / `{...}`
//! span out of the reply, since models like to wrap JSON in prose.

use crate::completion::CompletionEngine;
use crew_foundation::{prefixed_id, Error, Result};
use crew_provider::Message;
use crew_task::scheduler::validate_dependencies;
use crew_task::{Sprint, SprintStatus, Task, TaskStatus, TeamMember};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

static JSON_ARRAY: OnceLock<Option<Regex>> = OnceLock::new();
static JSON_OBJECT: OnceLock<Option<Regex>> = OnceLock::new();

pub const TEAM_ANALYZER_PROMPT: &str = r#"You are a project analyzer. Given a project description, determine the ideal team composition to build it.

Output a JSON array of team members. Each team member must have:
- id: unique identifier (e.g. "member-architect")
- role: the member's role (e.g. "Backend Developer", "QA Engineer")
- name: a short display name
- systemPrompt: a detailed system prompt describing how this member works
- capabilities: array of strings describing what the member can do

Match the team to the project: a small project needs 2-3 members, a larger one up to 5.

Respond ONLY with valid JSON, no additional text."#;

pub const SPRINT_PLANNER_PROMPT: &str = r#"You are a sprint planner. Given a sprint goal and the available team members, break the goal into concrete development tasks.

Output a JSON object with:
- goal: the sprint goal
- tasks: array of tasks, each with
  - id: unique short identifier (e.g. "task-1")
  - title: short title
  - description: what exactly must be done, specific enough to implement
  - assignedTo: the id of the team member who does it
  - dependencies: array of task ids that must be done first (empty if none)

Rules:
- Only assign tasks to the listed team member ids.
- Dependencies must reference tasks in this sprint and must not form cycles.
- Keep tasks small enough to finish in one working session.

Respond ONLY with valid JSON, no additional text."#;

/// First `[` to last `]`
pub fn extract_json_array(text: &str) -> Option<&str> {
    find_span(&JSON_ARRAY, r"\[[\s\S]*\]", text)
}

/// First `{` to last `}`
pub fn extract_json_object(text: &str) -> Option<&str> {
    find_span(&JSON_OBJECT, r"\{[\s\S]*\}", text)
}

fn find_span<'a>(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    text: &'a str,
) -> Option<&'a str> {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()?
        .find(text)
        .map(|m| m.as_str())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedMember {
    #[serde(default)]
    id: String,
    role: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedSprint {
    #[serde(default)]
    goal: String,
    tasks: Vec<PlannedTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedTask {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assigned_to: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Persona used when a member is added without an explicit prompt
pub fn default_member_prompt(name: &str, role: &str, capabilities: &[String]) -> String {
    format!(
        "You are {}, a {}. Your capabilities include: {}.",
        name,
        role,
        capabilities.join(", ")
    )
}

/// Lowercase, dash-separated form of a role for ids
pub fn role_slug(role: &str) -> String {
    let slug: Vec<String> = role
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect();
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug.join("-")
    }
}

pub struct Planner {
    engine: Arc<CompletionEngine>,
}

impl Planner {
    pub fn new(engine: Arc<CompletionEngine>) -> Self {
        Self { engine }
    }

    async fn ask(&self, system_prompt: &str, user: String) -> Result<String> {
        let outcome = self
            .engine
            .complete(
                vec![Message::user(user)],
                Some(system_prompt.to_string()),
                &[],
            )
            .await?;
        Ok(outcome.content)
    }

    /// Synthesize a team for a project description
    pub async fn analyze_team(&self, description: &str) -> Result<Vec<TeamMember>> {
        let raw = self
            .ask(
                TEAM_ANALYZER_PROMPT,
                format!("Analyze this project and create a team:\n\n{}", description),
            )
            .await?;
        let team = parse_team(&raw)?;
        info!(members = team.len(), "Team synthesized");
        Ok(team)
    }

    /// Plan a sprint for `goal`; the returned sprint has id `sprint_id`
    pub async fn plan_sprint(
        &self,
        sprint_id: &str,
        goal: &str,
        team: &[TeamMember],
    ) -> Result<Sprint> {
        let roster: Vec<String> = team
            .iter()
            .map(|m| {
                format!(
                    "- {}: {} ({}) - Capabilities: {}",
                    m.id,
                    m.role,
                    m.name,
                    m.capabilities.join(", ")
                )
            })
            .collect();
        let raw = self
            .ask(
                SPRINT_PLANNER_PROMPT,
                format!(
                    "Sprint ID: {}\n\nGoal: {}\n\nAvailable Team Members:\n{}",
                    sprint_id,
                    goal,
                    roster.join("\n")
                ),
            )
            .await?;
        let sprint = parse_sprint(&raw, sprint_id, goal)?;
        info!(sprint = sprint_id, tasks = sprint.tasks.len(), "Sprint planned");
        Ok(sprint)
    }
}

pub fn parse_team(raw: &str) -> Result<Vec<TeamMember>> {
    let json = extract_json_array(raw).ok_or_else(|| Error::parse_failure("team", raw))?;
    let planned: Vec<PlannedMember> = serde_json::from_str(json).map_err(|e| {
        debug!(error = %e, "Team JSON did not deserialize");
        Error::parse_failure("team", raw)
    })?;
    if planned.is_empty() {
        return Err(Error::parse_failure("team", raw));
    }

    let mut seen = HashSet::new();
    let team = planned
        .into_iter()
        .map(|m| {
            let name = if m.name.trim().is_empty() {
                m.role.clone()
            } else {
                m.name
            };
            let mut id = if m.id.trim().is_empty() {
                format!("member-{}", role_slug(&m.role))
            } else {
                m.id
            };
            if !seen.insert(id.clone()) {
                id = prefixed_id(&format!("member-{}", role_slug(&m.role)));
                seen.insert(id.clone());
            }
            let system_prompt = if m.system_prompt.trim().is_empty() {
                default_member_prompt(&name, &m.role, &m.capabilities)
            } else {
                m.system_prompt
            };
            TeamMember {
                id,
                role: m.role,
                name,
                system_prompt,
                capabilities: m.capabilities,
            }
        })
        .collect();
    Ok(team)
}

/// Parse a planner reply into a fresh sprint with validated dependencies
pub fn parse_sprint(raw: &str, sprint_id: &str, goal: &str) -> Result<Sprint> {
    let json = extract_json_object(raw).ok_or_else(|| Error::parse_failure("sprint", raw))?;
    let planned: PlannedSprint = serde_json::from_str(json).map_err(|e| {
        debug!(error = %e, "Sprint JSON did not deserialize");
        Error::parse_failure("sprint", raw)
    })?;
    if planned.tasks.is_empty() {
        warn!(sprint = sprint_id, "Planner returned no tasks");
        return Err(Error::parse_failure("sprint", raw));
    }

    let tasks: Vec<Task> = planned
        .tasks
        .into_iter()
        .map(|t| Task {
            id: t.id,
            title: t.title,
            description: t.description,
            assigned_to: t.assigned_to,
            dependencies: t.dependencies,
            status: TaskStatus::Pending,
            output: None,
            retries: 0,
        })
        .collect();
    validate_dependencies(&tasks)?;

    let goal = if planned.goal.trim().is_empty() {
        goal.to_string()
    } else {
        planned.goal
    };
    Ok(Sprint {
        id: sprint_id.to_string(),
        goal,
        tasks,
        status: SprintStatus::Planning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_provider::{ProviderResponse, RetryConfig, ScriptedProvider};

    fn planner(reply: &str) -> (Planner, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::text(reply)]));
        let engine = CompletionEngine::new(provider.clone()).with_retry(RetryConfig::no_retry());
        (Planner::new(Arc::new(engine)), provider)
    }

    #[test]
    fn test_extract_spans() {
        let text = "Sure! Here is the team:\n[{\"a\": [1]}, {\"b\": 2}]\nHope that helps.";
        assert_eq!(extract_json_array(text), Some("[{\"a\": [1]}, {\"b\": 2}]"));
        assert_eq!(extract_json_object("x {\"a\": {}} y"), Some("{\"a\": {}}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_team_fills_gaps() {
        let raw = r#"```json
[
  {"id": "member-dev", "role": "Developer", "name": "Dev", "systemPrompt": "You code.", "capabilities": ["python"]},
  {"id": "member-dev", "role": "QA Engineer", "capabilities": ["pytest", "review"]}
]
```"#;
        let team = parse_team(raw).unwrap();
        assert_eq!(team.len(), 2);
        assert_eq!(team[0].id, "member-dev");
        assert!(team[1].id.starts_with("member-qa-engineer-"));
        assert_eq!(team[1].name, "QA Engineer");
        assert_eq!(
            team[1].system_prompt,
            "You are QA Engineer, a QA Engineer. Your capabilities include: pytest, review."
        );
    }

    #[test]
    fn test_parse_team_failure_keeps_raw() {
        let err = parse_team("I think you need a developer.").unwrap_err();
        match err {
            Error::ParseFailure { what, raw } => {
                assert_eq!(what, "team");
                assert_eq!(raw, "I think you need a developer.");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(parse_team("[]"), Err(Error::ParseFailure { .. })));
    }

    #[test]
    fn test_parse_sprint_resets_state() {
        let raw = r#"{"id": "whatever", "goal": "Calculator", "status": "completed", "tasks": [
            {"id": "t1", "title": "add", "assignedTo": "member-dev", "status": "done", "retries": 3},
            {"id": "t2", "title": "test", "assignedTo": "member-qa", "dependencies": ["t1"]}
        ]}"#;
        let sprint = parse_sprint(raw, "sprint-1", "fallback").unwrap();
        assert_eq!(sprint.id, "sprint-1");
        assert_eq!(sprint.goal, "Calculator");
        assert_eq!(sprint.status, SprintStatus::Planning);
        assert!(sprint
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Pending && t.retries == 0));
    }

    #[test]
    fn test_parse_sprint_rejects_cycles() {
        let raw = r#"{"tasks": [
            {"id": "a", "title": "A", "dependencies": ["b"]},
            {"id": "b", "title": "B", "dependencies": ["a"]}
        ]}"#;
        assert!(matches!(
            parse_sprint(raw, "s", "g"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_role_slug() {
        assert_eq!(role_slug("Backend Developer"), "backend-developer");
        assert_eq!(role_slug("UI/UX"), "ui-ux");
        assert_eq!(role_slug("!!!"), "agent");
    }

    #[tokio::test]
    async fn test_plan_sprint_prompt_lists_roster() {
        let (planner, provider) = planner(
            r#"{"goal": "g", "tasks": [{"id": "t1", "title": "x", "assignedTo": "member-dev"}]}"#,
        );
        let team = vec![TeamMember {
            id: "member-dev".into(),
            role: "Developer".into(),
            name: "Dev".into(),
            system_prompt: String::new(),
            capabilities: vec!["python".into(), "sql".into()],
        }];

        let sprint = planner.plan_sprint("sprint-9", "build it", &team).await.unwrap();
        assert_eq!(sprint.id, "sprint-9");

        let request = &provider.requests()[0];
        assert_eq!(
            request.system_prompt.as_deref(),
            Some(SPRINT_PLANNER_PROMPT)
        );
        assert!(request.tool_names.is_empty());
        let prompt = &request.messages[0].content;
        assert!(prompt.starts_with("Sprint ID: sprint-9\n\nGoal: build it"));
        assert!(prompt.contains("- member-dev: Developer (Dev) - Capabilities: python, sql"));
    }

    #[tokio::test]
    async fn test_analyze_team_uses_description() {
        let (planner, provider) =
            planner(r#"[{"role": "Developer"}, {"role": "Tester"}]"#);
        let team = planner.analyze_team("A todo app").await.unwrap();
        assert_eq!(team[0].id, "member-developer");
        assert_eq!(
            provider.requests()[0].messages[0].content,
            "Analyze this project and create a team:\n\nA todo app"
        );
    }
}
