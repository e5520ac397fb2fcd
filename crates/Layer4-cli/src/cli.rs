//! Subcommands and their handlers

use crate::render;
use crate::services::Services;
use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Subcommand};
use crew_agent::{CompletionEvent, WorkspaceSource};
use crew_sandbox::{TemplatePatch, ToolRuntime};
use crew_task::ProjectPatch;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Container sandboxes
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Saved build recipes
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Saved scripts that run inside a workspace
    #[command(subcommand)]
    Tool(ToolCommand),

    /// Projects (a workspace plus a team and sprints)
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Project team members
    #[command(subcommand)]
    Team(TeamCommand),

    /// Sprint planning and execution
    #[command(subcommand)]
    Sprint(SprintCommand),

    /// Individual sprint tasks
    #[command(subcommand)]
    Task(TaskCommand),
}

// ============================================================================
// Workspace
// ============================================================================

#[derive(ClapArgs, Debug)]
#[group(required = false, multiple = false)]
pub struct RecipeSource {
    /// Dockerfile to build
    #[arg(long)]
    dockerfile: Option<PathBuf>,

    /// Template id or name to build from
    #[arg(long)]
    template: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// Build and start a new workspace
    Create {
        name: String,
        #[command(flatten)]
        source: RecipeSource,
        /// Allow network access from the container
        #[arg(long)]
        network: bool,
    },
    List {
        /// Include destroyed workspaces
        #[arg(long)]
        all: bool,
    },
    Get {
        id: String,
    },
    Destroy {
        id: String,
        /// Keep the data volume
        #[arg(long)]
        keep_volume: bool,
    },
    /// Rebuild the image from the stored recipe, keeping the volume
    Rebuild {
        id: String,
    },
    /// Replace the stored recipe (takes effect on rebuild)
    SetRecipe {
        id: String,
        dockerfile: PathBuf,
    },
    /// Run a shell command in the workspace
    Exec {
        id: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Write a file under /workspace
    Write {
        id: String,
        path: String,
        /// Content to write
        #[arg(long, conflicts_with = "from")]
        content: Option<String>,
        /// Host file to copy from
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Print a file from /workspace
    Read {
        id: String,
        path: String,
    },
    /// Rebuild and run a test command
    Verify {
        id: String,
        /// Test command (defaults to the template's)
        #[arg(long)]
        test: Option<String>,
    },
}

// ============================================================================
// Template / Tool
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    Create {
        name: String,
        #[arg(long)]
        dockerfile: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
        /// Command that checks a workspace built from this template
        #[arg(long)]
        test: Option<String>,
    },
    /// Save a workspace's current recipe as a template
    Save {
        workspace_id: String,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        test: Option<String>,
    },
    /// Change a template
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        dockerfile: Option<PathBuf>,
        #[arg(long)]
        test: Option<String>,
    },
    List,
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ToolCommand {
    Create {
        name: String,
        /// shell, python or node
        #[arg(long, default_value = "shell")]
        runtime: String,
        #[arg(long, conflicts_with = "from")]
        script: Option<String>,
        /// Host file holding the script
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long, default_value = "")]
        description: String,
    },
    List,
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Run a tool inside a workspace
    Run {
        tool: String,
        workspace_id: String,
    },
}

// ============================================================================
// Project / Team / Sprint / Task
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project and provision its workspace
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Reuse an existing workspace
        #[arg(long, conflicts_with_all = ["dockerfile", "template"])]
        workspace: Option<String>,
        #[command(flatten)]
        source: RecipeSource,
        /// Build the workspace without network access
        #[arg(long)]
        no_network: bool,
    },
    List,
    Get {
        id: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
        /// Leave the workspace running
        #[arg(long)]
        keep_workspace: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TeamCommand {
    /// Let the model pick a team from the project description
    Analyze { project: String },
    Add {
        project: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        name: String,
        /// Comma separated
        #[arg(long, default_value = "")]
        capabilities: String,
        /// Custom persona prompt
        #[arg(long)]
        prompt: Option<String>,
    },
    Remove {
        project: String,
        member: String,
    },
    List {
        project: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SprintCommand {
    /// Plan a sprint for a goal
    Create { project: String, goal: String },
    /// Run one round of ready tasks
    Start { project: String, sprint: String },
    Pause { project: String, sprint: String },
    Resume { project: String, sprint: String },
    /// Close the sprint regardless of task state
    Complete { project: String, sprint: String },
    Status { project: String, sprint: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    List {
        project: String,
        sprint: String,
    },
    /// Run one task now (its dependencies must be done)
    Run {
        project: String,
        sprint: String,
        task: String,
    },
    /// Reset a failed task to pending
    Retry {
        project: String,
        sprint: String,
        task: String,
    },
    /// Mark a task done without running it
    Skip {
        project: String,
        sprint: String,
        task: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Status {
        project: String,
        sprint: String,
        task: String,
    },
    /// Reassign a task to another team member
    Assign {
        project: String,
        sprint: String,
        task: String,
        member: String,
    },
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn run(command: Command, services: &Services, op_id: Option<&str>) -> anyhow::Result<()> {
    match command {
        Command::Workspace(cmd) => workspace(cmd, services).await,
        Command::Template(cmd) => template(cmd, services),
        Command::Tool(cmd) => tool(cmd, services).await,
        Command::Project(cmd) => project(cmd, services, op_id).await,
        Command::Team(cmd) => team(cmd, services).await,
        Command::Sprint(cmd) => sprint(cmd, services, op_id).await,
        Command::Task(cmd) => task(cmd, services, op_id).await,
    }
}

fn read_host_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

/// Template id, falling back to lookup by name
fn resolve_template(services: &Services, key: &str) -> anyhow::Result<String> {
    if services.templates.get(key)?.is_some() {
        return Ok(key.to_string());
    }
    match services.templates.get_by_name(key)? {
        Some(template) => Ok(template.id),
        None => bail!("Template not found: {}", key),
    }
}

async fn workspace(cmd: WorkspaceCommand, services: &Services) -> anyhow::Result<()> {
    let registry = &services.registry;
    match cmd {
        WorkspaceCommand::Create {
            name,
            source,
            network,
        } => {
            let ws = match (source.dockerfile, source.template) {
                (_, Some(template)) => {
                    let id = resolve_template(services, &template)?;
                    registry.create_from_template(&name, &id, network).await?
                }
                (Some(path), None) => {
                    let dockerfile = read_host_file(&path)?;
                    registry.create_from_dockerfile(&name, &dockerfile, network).await?
                }
                (None, None) => {
                    registry
                        .create_from_dockerfile(&name, crew_sandbox::DEFAULT_DOCKERFILE, network)
                        .await?
                }
            };
            render::workspace(&ws);
        }
        WorkspaceCommand::List { all } => {
            let list = if all { registry.list_all() } else { registry.list() };
            render::workspaces(&list);
        }
        WorkspaceCommand::Get { id } => render::workspace(&registry.require(&id)?),
        WorkspaceCommand::Destroy { id, keep_volume } => {
            let ws = registry.destroy(&id, keep_volume).await?;
            println!("✓ Destroyed {}{}", ws.id, if keep_volume { " (volume kept)" } else { "" });
        }
        WorkspaceCommand::Rebuild { id } => {
            let result = registry.rebuild(&id).await?;
            render::build_log(&result.log);
            if !result.success {
                bail!("Rebuild of {} failed", id);
            }
            println!("✓ Rebuilt {}", result.workspace.id);
        }
        WorkspaceCommand::SetRecipe { id, dockerfile } => {
            let ws = registry.update_dockerfile(&id, &read_host_file(&dockerfile)?)?;
            println!("✓ Recipe updated for {}. Run `crew workspace rebuild {}` to apply.", ws.id, ws.id);
        }
        WorkspaceCommand::Exec { id, command } => {
            let output = registry.exec(&id, &command.join(" ")).await?;
            render::exec(&output);
            if !output.success() {
                bail!("Command exited with code {}", output.exit_code);
            }
        }
        WorkspaceCommand::Write {
            id,
            path,
            content,
            from,
        } => {
            let content = match (content, from) {
                (Some(content), _) => content,
                (None, Some(file)) => read_host_file(&file)?,
                (None, None) => bail!("Give --content or --from"),
            };
            let written = registry.write_file(&id, &path, &content).await?;
            println!("✓ Written {} bytes to {}", content.len(), written);
        }
        WorkspaceCommand::Read { id, path } => {
            print!("{}", registry.read_file(&id, &path).await?);
        }
        WorkspaceCommand::Verify { id, test } => {
            let test = match test {
                Some(test) => test,
                None => {
                    let ws = registry.require(&id)?;
                    let template = match &ws.template_id {
                        Some(tpl) => services.templates.get(tpl)?,
                        None => None,
                    };
                    match template.and_then(|t| t.test_command) {
                        Some(test) => test,
                        None => bail!("No test command. Pass --test or use a template that has one."),
                    }
                }
            };
            let result = registry.verify(&id, &test).await?;
            render::verify(&result);
            if !result.passed() {
                bail!("Verification of {} failed", id);
            }
        }
    }
    Ok(())
}

fn template(cmd: TemplateCommand, services: &Services) -> anyhow::Result<()> {
    let templates = &services.templates;
    match cmd {
        TemplateCommand::Create {
            name,
            dockerfile,
            description,
            test,
        } => {
            let tpl = templates.create(name, description, read_host_file(&dockerfile)?, test)?;
            println!("✓ Template {} ({})", tpl.name, tpl.id);
        }
        TemplateCommand::Save {
            workspace_id,
            name,
            description,
            test,
        } => {
            let ws = services.registry.require(&workspace_id)?;
            let tpl = templates.create_from_workspace(&ws, name, description, test)?;
            println!("✓ Saved {} as template {} ({})", ws.id, tpl.name, tpl.id);
        }
        TemplateCommand::Update {
            id,
            name,
            description,
            dockerfile,
            test,
        } => {
            let dockerfile = dockerfile.as_deref().map(read_host_file).transpose()?;
            let tpl = templates.update(
                &resolve_template(services, &id)?,
                TemplatePatch {
                    name,
                    description,
                    dockerfile,
                    test_command: test,
                },
            )?;
            render::template(&tpl);
        }
        TemplateCommand::List => render::templates(&templates.list()),
        TemplateCommand::Get { id } => {
            render::template(&templates.require(&resolve_template(services, &id)?)?)
        }
        TemplateCommand::Delete { id } => {
            if !templates.delete(&resolve_template(services, &id)?)? {
                bail!("Template not found: {}", id);
            }
            println!("✓ Deleted template {}", id);
        }
    }
    Ok(())
}

async fn tool(cmd: ToolCommand, services: &Services) -> anyhow::Result<()> {
    let tools = &services.tools;
    let resolve = |key: &str| -> anyhow::Result<String> {
        match tools.get(key).or_else(|| tools.get_by_name(key)) {
            Some(tool) => Ok(tool.id),
            None => bail!("Tool not found: {}", key),
        }
    };
    match cmd {
        ToolCommand::Create {
            name,
            runtime,
            script,
            from,
            description,
        } => {
            let runtime: ToolRuntime = runtime.parse()?;
            let script = match (script, from) {
                (Some(script), _) => script,
                (None, Some(file)) => read_host_file(&file)?,
                (None, None) => bail!("Give --script or --from"),
            };
            let tool = tools.create(name, description, script, runtime)?;
            println!("✓ Tool {} ({}, {})", tool.name, tool.id, tool.runtime);
        }
        ToolCommand::List => render::tools(&tools.list()),
        ToolCommand::Get { id } => render::tool(&tools.require(&resolve(&id)?)?),
        ToolCommand::Delete { id } => {
            if !tools.delete(&resolve(&id)?)? {
                bail!("Tool not found: {}", id);
            }
            println!("✓ Deleted tool {}", id);
        }
        ToolCommand::Run { tool, workspace_id } => {
            let output = tools
                .run_tool(&services.registry, &resolve(&tool)?, &workspace_id)
                .await?;
            println!("{}", output);
        }
    }
    Ok(())
}

async fn project(
    cmd: ProjectCommand,
    services: &Services,
    op_id: Option<&str>,
) -> anyhow::Result<()> {
    let orchestrator = services.orchestrator(None);
    match cmd {
        ProjectCommand::Create {
            name,
            description,
            workspace,
            source,
            no_network,
        } => {
            let source = match (workspace, source.dockerfile, source.template) {
                (Some(id), _, _) => WorkspaceSource::Existing(id),
                (None, _, Some(template)) => {
                    WorkspaceSource::Template(resolve_template(services, &template)?)
                }
                (None, Some(path), None) => WorkspaceSource::Dockerfile(read_host_file(&path)?),
                (None, None, None) => WorkspaceSource::Default,
            };
            let project = orchestrator
                .create_project(&name, &description, source, !no_network, op_id)
                .await?;
            render::project(&project);
        }
        ProjectCommand::List => render::projects(&orchestrator.list_projects()),
        ProjectCommand::Get { id } => render::project(&orchestrator.get_project(&id)?),
        ProjectCommand::Update {
            id,
            name,
            description,
        } => {
            let project = orchestrator.update_project(
                &id,
                ProjectPatch {
                    name,
                    description,
                    status: None,
                },
            )?;
            render::project(&project);
        }
        ProjectCommand::Delete { id, keep_workspace } => {
            let project = orchestrator.delete_project(&id, keep_workspace).await?;
            println!("✓ Deleted project {} ({})", project.name, project.id);
        }
    }
    Ok(())
}

async fn team(cmd: TeamCommand, services: &Services) -> anyhow::Result<()> {
    let orchestrator = services.orchestrator(None);
    match cmd {
        TeamCommand::Analyze { project } => {
            println!("Analyzing project...");
            render::team(&orchestrator.analyze_team(&project).await?);
        }
        TeamCommand::Add {
            project,
            role,
            name,
            capabilities,
            prompt,
        } => {
            let capabilities = capabilities
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
            let member = orchestrator.add_team_member(&project, &role, &name, capabilities, prompt)?;
            println!("✓ Added {} ({}) as {}", member.name, member.id, member.role);
        }
        TeamCommand::Remove { project, member } => {
            orchestrator.remove_team_member(&project, &member)?;
            println!("✓ Removed {}", member);
        }
        TeamCommand::List { project } => render::team(&orchestrator.list_team(&project)?),
    }
    Ok(())
}

/// Orchestrator whose task agents report tool activity on stdout
fn live_orchestrator(
    services: &Services,
) -> (crew_agent::Orchestrator, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(100);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                CompletionEvent::ToolStarted { tool_name, .. } => {
                    println!("  [{}] Running...", tool_name);
                }
                CompletionEvent::ToolFinished {
                    tool_name,
                    result,
                    is_error,
                    ..
                } => {
                    let status = if is_error { "✗" } else { "✓" };
                    println!("  [{}] {} {}", tool_name, status, render::truncate(&result, 100));
                }
                _ => {}
            }
        }
    });
    (services.orchestrator(Some(tx)), printer)
}

async fn sprint(cmd: SprintCommand, services: &Services, op_id: Option<&str>) -> anyhow::Result<()> {
    match cmd {
        SprintCommand::Create { project, goal } => {
            println!("Planning sprint...");
            let sprint = services
                .orchestrator(None)
                .create_sprint(&project, &goal, op_id)
                .await?;
            render::sprint(&sprint);
        }
        SprintCommand::Start { project, sprint } => {
            let (orchestrator, printer) = live_orchestrator(services);
            let round = orchestrator.start_sprint(&project, &sprint, op_id).await;
            drop(orchestrator);
            let _ = printer.await;
            render::round(&round?);
        }
        SprintCommand::Pause { project, sprint } => {
            let sprint = services.orchestrator(None).pause_sprint(&project, &sprint)?;
            println!("⏸ Sprint {} paused", sprint.id);
        }
        SprintCommand::Resume { project, sprint } => {
            let sprint = services.orchestrator(None).resume_sprint(&project, &sprint)?;
            println!("▶ Sprint {} active", sprint.id);
        }
        SprintCommand::Complete { project, sprint } => {
            let sprint = services.orchestrator(None).complete_sprint(&project, &sprint)?;
            println!("✓ Sprint {} completed", sprint.id);
        }
        SprintCommand::Status { project, sprint } => {
            let report = services.orchestrator(None).sprint_status(&project, &sprint)?;
            render::sprint(&report.sprint);
            render::progress(&report.progress);
            if !report.ready.is_empty() {
                println!("Ready: {}", report.ready.join(", "));
            }
        }
    }
    Ok(())
}

async fn task(cmd: TaskCommand, services: &Services, op_id: Option<&str>) -> anyhow::Result<()> {
    match cmd {
        TaskCommand::List { project, sprint } => {
            render::tasks(&services.orchestrator(None).list_tasks(&project, &sprint)?);
        }
        TaskCommand::Run {
            project,
            sprint,
            task,
        } => {
            let (orchestrator, printer) = live_orchestrator(services);
            let outcome = orchestrator.run_task(&project, &sprint, &task, op_id).await;
            drop(orchestrator);
            let _ = printer.await;
            render::outcome(&outcome?);
        }
        TaskCommand::Retry {
            project,
            sprint,
            task,
        } => {
            let task = services
                .orchestrator(None)
                .retry_task(&project, &sprint, &task, op_id)?;
            println!("↻ Task {} reset to pending (retry #{})", task.id, task.retries);
        }
        TaskCommand::Skip {
            project,
            sprint,
            task,
            reason,
        } => {
            let task = services.orchestrator(None).skip_task(
                &project,
                &sprint,
                &task,
                reason.as_deref(),
                op_id,
            )?;
            println!("✓ Task {} skipped", task.id);
        }
        TaskCommand::Status {
            project,
            sprint,
            task,
        } => render::task(&services.orchestrator(None).task_status(&project, &sprint, &task)?),
        TaskCommand::Assign {
            project,
            sprint,
            task,
            member,
        } => {
            let task = services
                .orchestrator(None)
                .assign_task(&project, &sprint, &task, &member)?;
            println!("✓ Task {} assigned to {}", task.id, task.assigned_to);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::Args;
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_command_tree_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_exec_keeps_hyphenated_arguments() {
        let args =
            Args::try_parse_from(["crew", "workspace", "exec", "ws-1", "ls", "-la", "/tmp"]).unwrap();
        match args.command {
            super::Command::Workspace(super::WorkspaceCommand::Exec { id, command }) => {
                assert_eq!(id, "ws-1");
                assert_eq!(command, vec!["ls", "-la", "/tmp"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "crew", "sprint", "start", "proj-1", "sprint-1", "--op-id", "op-7", "--debug",
        ])
        .unwrap();
        assert_eq!(args.op_id.as_deref(), Some("op-7"));
        assert!(args.debug);
    }

    #[test]
    fn test_recipe_sources_conflict() {
        assert!(Args::try_parse_from([
            "crew", "workspace", "create", "demo", "--dockerfile", "Dockerfile", "--template", "py",
        ])
        .is_err());
    }
}
