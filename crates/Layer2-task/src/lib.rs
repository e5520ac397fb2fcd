//! # crew-task
//!
//! Project / Team / Sprint / Task state for crew.
//!
//! ## Features
//!
//! - Project Store: persisted projects with nested team/sprint/task mutation
//! - Sprint Scheduler: ready-set computation, completion, dependency validation
//! - Operation Ledger: idempotent side effects keyed by caller-supplied ids

pub mod model;
pub mod operation;
pub mod scheduler;
pub mod store;

pub use model::{
    Project, ProjectPatch, ProjectStatus, Sprint, SprintPatch, SprintStatus, Task, TaskPatch,
    TaskStatus, TeamMember,
};
pub use operation::{Claim, OperationLedger, OperationRecord, OperationState, OPERATIONS_FILE};
pub use scheduler::SprintProgress;
pub use store::{ProjectStore, PROJECTS_FILE};
