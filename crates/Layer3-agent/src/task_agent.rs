//! Task Execution Agent
//!
//! Runs one sprint task inside the project's workspace as one team member,
//! then turns the completion transcript into a report.

use crate::completion::{CompletionEngine, CompletionOutcome, ToolInvocation};
use crate::tools::{self, SandboxToolCall};
use crew_foundation::Result;
use crew_provider::Message;
use crew_sandbox::WorkspaceRegistry;
use crew_task::{Task, TeamMember};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const CONTENT_PREVIEW: usize = 200;
const RESULT_PREVIEW: usize = 300;

/// Phrases in the final answer that mark a task as failed
const FAILURE_MARKERS: [&str; 3] = ["error:", "failed to", "could not"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub success: bool,
    /// Markdown transcript: execution log followed by the model's summary
    pub output: String,
    pub tool_calls: usize,
    pub rounds: usize,
    pub hit_iteration_cap: bool,
}

pub struct TaskAgent {
    engine: Arc<CompletionEngine>,
    registry: Arc<WorkspaceRegistry>,
}

impl TaskAgent {
    pub fn new(engine: Arc<CompletionEngine>, registry: Arc<WorkspaceRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Execute `task` as `member` in `workspace_id`
    ///
    /// Provider failures are errors; everything the model does with the tools
    /// (including failing commands) ends up in the report.
    pub async fn run(
        &self,
        task: &Task,
        member: &TeamMember,
        workspace_id: &str,
    ) -> Result<TaskReport> {
        info!(task = %task.id, member = %member.id, workspace = workspace_id, "Running task");

        let tools = tools::sandbox_tools(self.registry.clone(), workspace_id);
        let outcome = self
            .engine
            .complete(
                vec![Message::user(task_prompt(task, workspace_id))],
                Some(member.system_prompt.clone()),
                &tools,
            )
            .await?;

        let report = build_report(&outcome);
        if report.success {
            info!(task = %task.id, tool_calls = report.tool_calls, "Task succeeded");
        } else {
            warn!(task = %task.id, tool_calls = report.tool_calls, "Task failed");
        }
        Ok(report)
    }
}

pub fn task_prompt(task: &Task, workspace_id: &str) -> String {
    let description = if task.description.trim().is_empty() {
        "(none)"
    } else {
        task.description.as_str()
    };
    format!(
        "You are working on a development task in workspace {workspace}.\n\n\
         Task: {title}\n\n\
         Description:\n{description}\n\n\
         You MUST use these tools to complete the task - do NOT just describe what you would do:\n\
         - file_write: create or modify files (paths relative to /workspace)\n\
         - exec: run shell commands (tests, installs, scripts)\n\
         - file_read: read existing files\n\n\
         Rules:\n\
         1. Write real code with file_write, not code blocks in your answer.\n\
         2. Run what you wrote with exec to check it works.\n\
         3. When finished, reply with a short summary of what you did and no tool calls.\n\n\
         Start now by calling the tools.",
        workspace = workspace_id,
        title = task.title,
        description = description,
    )
}

/// Case-insensitive scan of the final answer for failure phrases
///
/// Best-effort: a summary that mentions an error it fixed still reads as a
/// failure.
pub fn judge_success(final_text: &str) -> bool {
    let lower = final_text.to_lowercase();
    !FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn build_report(outcome: &CompletionOutcome) -> TaskReport {
    let final_text = if outcome.content.trim().is_empty() {
        "Task completed (no summary provided)".to_string()
    } else {
        outcome.content.clone()
    };

    if outcome.invocations.is_empty() {
        return TaskReport {
            success: false,
            output: format!(
                "**Agent did not use any tools.**\n\nResponse was:\n{}\n\n\
                 This task may need to be retried.",
                final_text
            ),
            tool_calls: 0,
            rounds: outcome.rounds,
            hit_iteration_cap: outcome.hit_iteration_cap,
        };
    }

    let log: Vec<String> = outcome.invocations.iter().map(log_entry).collect();
    let mut output = format!(
        "### Execution Log ({} rounds)\n\n{}\n\n---\n\n### Summary\n{}",
        outcome.rounds,
        log.join("\n\n"),
        final_text
    );
    if outcome.hit_iteration_cap {
        output.push_str("\n\n_Stopped at the iteration limit._");
    }

    TaskReport {
        success: judge_success(&final_text),
        output,
        tool_calls: outcome.invocations.len(),
        rounds: outcome.rounds,
        hit_iteration_cap: outcome.hit_iteration_cap,
    }
}

fn log_entry(invocation: &ToolInvocation) -> String {
    let header = match SandboxToolCall::parse(&invocation.name, invocation.arguments.clone()) {
        Ok(SandboxToolCall::WriteFile { path, content }) => format!(
            "**file_write** → `{}`\n```\n{}\n```",
            path,
            preview_with_total(&content, CONTENT_PREVIEW)
        ),
        Ok(SandboxToolCall::Exec { command }) => format!("**exec** → `{}`", command),
        Ok(SandboxToolCall::ReadFile { path }) => format!("**file_read** → `{}`", path),
        Err(_) => format!("**{}** → `{}`", invocation.name, invocation.arguments),
    };
    let mark = if invocation.is_error { "✗" } else { "↳" };
    format!(
        "{}\n   {} {}",
        header,
        mark,
        preview(invocation.result.trim(), RESULT_PREVIEW)
    )
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn preview_with_total(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total > max_chars {
        format!("{}... ({} chars total)", preview(text, max_chars).trim_end_matches("..."), total)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_provider::TokenUsage;
    use serde_json::json;

    fn outcome(content: &str, invocations: Vec<ToolInvocation>) -> CompletionOutcome {
        CompletionOutcome {
            content: content.to_string(),
            messages: vec![],
            new_messages_from: 0,
            rounds: invocations.len() + 1,
            invocations,
            hit_iteration_cap: false,
            usage: TokenUsage::default(),
        }
    }

    fn write_call(path: &str, content: &str) -> ToolInvocation {
        ToolInvocation {
            name: "file_write".into(),
            arguments: json!({"path": path, "content": content}),
            result: format!("Written {} bytes to /workspace/{}", content.len(), path),
            is_error: false,
        }
    }

    #[test]
    fn test_judge_success() {
        assert!(judge_success("Implemented add() and all tests pass"));
        assert!(!judge_success("ERROR: module not found"));
        assert!(!judge_success("I could not install numpy"));
        assert!(!judge_success("The build Failed to link"));
    }

    #[test]
    fn test_no_tools_is_failure() {
        let report = build_report(&outcome("Here is how I would do it...", vec![]));
        assert!(!report.success);
        assert_eq!(report.tool_calls, 0);
        assert!(report.output.contains("did not use any tools"));
        assert!(report.output.contains("Here is how I would do it"));
    }

    #[test]
    fn test_transcript_layout() {
        let report = build_report(&outcome(
            "Created add.py",
            vec![
                write_call("add.py", "def add(a, b):\n    return a + b\n"),
                ToolInvocation {
                    name: "exec".into(),
                    arguments: json!({"command": "python3 add.py"}),
                    result: "\n[exit code: 1]".into(),
                    is_error: false,
                },
            ],
        ));

        assert!(report.success);
        assert_eq!(report.tool_calls, 2);
        assert!(report.output.starts_with("### Execution Log (3 rounds)"));
        assert!(report.output.contains("**file_write** → `add.py`"));
        assert!(report.output.contains("**exec** → `python3 add.py`"));
        assert!(report.output.ends_with("### Summary\nCreated add.py"));
    }

    #[test]
    fn test_long_content_is_previewed() {
        let content = "x".repeat(450);
        let report = build_report(&outcome("ok", vec![write_call("big.txt", &content)]));
        assert!(report.output.contains("(450 chars total)"));
        assert!(!report.output.contains(&content));
    }

    #[test]
    fn test_empty_summary_gets_default() {
        let report = build_report(&outcome("", vec![write_call("a", "b")]));
        assert!(report
            .output
            .ends_with("Task completed (no summary provided)"));
        assert!(report.success);
    }

    #[test]
    fn test_prompt_mentions_task_and_tools() {
        let task = Task::new("t1", "Write add()").with_description("add two ints");
        let prompt = task_prompt(&task, "ws-1");
        assert!(prompt.contains("workspace ws-1"));
        assert!(prompt.contains("Task: Write add()"));
        assert!(prompt.contains("add two ints"));
        for tool in ["file_write", "exec", "file_read"] {
            assert!(prompt.contains(tool));
        }
    }
}
