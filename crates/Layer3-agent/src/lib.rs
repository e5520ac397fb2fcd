//! # crew-agent
//!
//! Agent layer for crew.
//!
//! ## Components
//!
//! - **Completion Engine**: model call → tool execution → model call ... 루프
//! - **Sandbox tools**: exec / file_write / file_read, 워크스페이스에 바인딩
//! - **Task Agent**: 태스크 하나를 팀 멤버로서 실행하고 리포트 생성
//! - **Planner**: LLM 기반 팀 구성 / 스프린트 계획
//! - **Orchestrator**: 프로젝트 / 팀 / 스프린트 / 태스크 API

pub mod completion;
pub mod orchestrator;
pub mod planner;
pub mod task_agent;
pub mod tools;

pub use completion::{
    CompletionEngine, CompletionEvent, CompletionOutcome, ToolHandler, ToolInvocation,
};
pub use orchestrator::{Orchestrator, SprintReport, SprintRound, TaskOutcome, WorkspaceSource};
pub use planner::Planner;
pub use task_agent::{judge_success, TaskAgent, TaskReport};
pub use tools::{sandbox_tools, SandboxTool, SandboxToolCall};
