//! Terminal rendering for command results

use chrono::{DateTime, Local, Utc};
use crew_agent::{SprintRound, TaskOutcome};
use crew_sandbox::{CustomTool, ExecOutput, Template, VerifyResult, Workspace};
use crew_task::{Project, Sprint, SprintProgress, Task, TeamMember};

/// Lines of build log shown after a failed build
const LOG_TAIL: usize = 20;

/// Truncate a string for display
pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

fn when(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

// ============================================================================
// Sandbox
// ============================================================================

pub fn workspaces(list: &[Workspace]) {
    if list.is_empty() {
        println!("No workspaces.");
        return;
    }
    println!("{:<14} {:<24} {:<10} {:<8} LAST USED", "ID", "NAME", "STATUS", "NET");
    for ws in list {
        println!(
            "{:<14} {:<24} {:<10} {:<8} {}",
            ws.id,
            truncate(&ws.name, 24),
            ws.status.to_string(),
            if ws.network_enabled { "on" } else { "off" },
            when(&ws.last_accessed_at)
        );
    }
}

pub fn workspace(ws: &Workspace) {
    println!("{} ({})", ws.name, ws.id);
    println!("  Status:    {}", ws.status);
    println!("  Image:     {}", ws.image_tag);
    println!("  Container: {}", ws.container_name);
    println!("  Volume:    {}", ws.volume_name);
    println!("  Network:   {}", if ws.network_enabled { "enabled" } else { "disabled" });
    if let Some(template) = &ws.template_id {
        println!("  Template:  {}", template);
    }
    println!("  Created:   {}", when(&ws.created_at));
    if ws.status == crew_sandbox::WorkspaceStatus::Failed && !ws.build_log.is_empty() {
        println!();
        build_log(&ws.build_log);
    }
}

pub fn build_log(log: &str) {
    println!("--- build log (last {} lines) ---", LOG_TAIL);
    println!("{}", tail(log, LOG_TAIL));
}

pub fn exec(output: &ExecOutput) {
    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
        if !output.stdout.ends_with('\n') {
            println!();
        }
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
        if !output.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    if output.timed_out {
        eprintln!("[timed out]");
    }
    if output.truncated {
        eprintln!("[output truncated]");
    }
}

pub fn verify(result: &VerifyResult) {
    if !result.build.success {
        println!("✗ Build failed");
        build_log(&result.build.log);
        return;
    }
    println!("✓ Build succeeded");
    if let Some(test) = &result.test {
        exec(test);
        let mark = if test.success() { "✓" } else { "✗" };
        println!("{} Tests exited with code {}", mark, test.exit_code);
    }
}

pub fn templates(list: &[Template]) {
    if list.is_empty() {
        println!("No templates.");
        return;
    }
    for tpl in list {
        println!("{:<14} {:<20} {}", tpl.id, tpl.name, truncate(&tpl.description, 50));
    }
}

pub fn template(tpl: &Template) {
    println!("{} ({})", tpl.name, tpl.id);
    if !tpl.description.is_empty() {
        println!("  {}", tpl.description);
    }
    if let Some(test) = &tpl.test_command {
        println!("  Test: {}", test);
    }
    println!("  Last used: {}", when(&tpl.last_used));
    println!("--- Dockerfile ---\n{}", tpl.dockerfile.trim_end());
}

pub fn tools(list: &[CustomTool]) {
    if list.is_empty() {
        println!("No tools.");
        return;
    }
    for tool in list {
        println!(
            "{:<14} {:<20} {:<7} {}",
            tool.id,
            tool.name,
            tool.runtime.to_string(),
            truncate(&tool.description, 40)
        );
    }
}

pub fn tool(tool: &CustomTool) {
    println!("{} ({}, {})", tool.name, tool.id, tool.runtime);
    if !tool.description.is_empty() {
        println!("  {}", tool.description);
    }
    println!("--- script ---\n{}", tool.script.trim_end());
}

// ============================================================================
// Projects
// ============================================================================

pub fn projects(list: &[Project]) {
    if list.is_empty() {
        println!("No projects.");
        return;
    }
    for project in list {
        println!(
            "{:<14} {:<24} {:<10} team {:<3} sprints {}",
            project.id,
            truncate(&project.name, 24),
            project.status.to_string(),
            project.team.len(),
            project.sprints.len()
        );
    }
}

pub fn project(project: &Project) {
    println!("{} ({})", project.name, project.id);
    if !project.description.is_empty() {
        println!("  {}", truncate(&project.description, 100));
    }
    println!("  Status:    {}", project.status);
    println!("  Workspace: {}", project.workspace_id);
    println!("  Updated:   {}", when(&project.updated_at));
    if !project.team.is_empty() {
        println!();
        team(&project.team);
    }
    for sprint in &project.sprints {
        let progress = crew_task::scheduler::progress(sprint);
        println!(
            "  {} [{}] {} ({}%)",
            sprint.id,
            sprint.status,
            truncate(&sprint.goal, 60),
            progress.percent
        );
    }
}

pub fn team(members: &[TeamMember]) {
    if members.is_empty() {
        println!("No team members.");
        return;
    }
    println!("Team:");
    for member in members {
        let caps = if member.capabilities.is_empty() {
            String::new()
        } else {
            format!(" - {}", member.capabilities.join(", "))
        };
        println!("  {:<20} {} ({}){}", member.id, member.name, member.role, caps);
    }
}

pub fn sprint(sprint: &Sprint) {
    println!("Sprint {} [{}]", sprint.id, sprint.status);
    println!("  Goal: {}", sprint.goal);
    tasks(&sprint.tasks);
}

pub fn tasks(list: &[Task]) {
    for task in list {
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            format!(" ← {}", task.dependencies.join(", "))
        };
        println!(
            "  {} {:<10} {:<40} @{}{}",
            task.status.symbol(),
            task.id,
            truncate(&task.title, 40),
            task.assigned_to,
            deps
        );
    }
}

pub fn task(task: &Task) {
    println!("{} {} ({})", task.status.symbol(), task.title, task.id);
    println!("  Status:   {}", task.status);
    println!("  Assigned: {}", task.assigned_to);
    if !task.dependencies.is_empty() {
        println!("  Depends:  {}", task.dependencies.join(", "));
    }
    if task.retries > 0 {
        println!("  Retries:  {}", task.retries);
    }
    if !task.description.is_empty() {
        println!("\n{}", task.description);
    }
    if let Some(output) = &task.output {
        println!("\n{}", output);
    }
}

pub fn progress(progress: &SprintProgress) {
    println!(
        "Progress: {}/{} done ({}%), {} failed, {} in progress, {} pending",
        progress.done,
        progress.total,
        progress.percent,
        progress.failed,
        progress.in_progress,
        progress.pending
    );
}

pub fn outcome(outcome: &TaskOutcome) {
    let mark = if outcome.succeeded() { "✓" } else { "✗" };
    println!("\n{} {} ({}) @{}", mark, outcome.title, outcome.task_id, outcome.assigned_to);
    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
}

pub fn round(round: &SprintRound) {
    if round.executed.is_empty() {
        println!("No tasks were ready in sprint {}.", round.sprint_id);
    }
    for executed in &round.executed {
        outcome(executed);
    }
    println!("\nSprint {} [{}]", round.sprint_id, round.status);
    progress(&round.progress);
    if !round.ready_next.is_empty() {
        println!(
            "Ready next: {}. Run `crew sprint start` again to continue.",
            round.ready_next.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("1\n2\n3\n4", 2), "3\n4");
        assert_eq!(tail("only", 5), "only");
    }
}
