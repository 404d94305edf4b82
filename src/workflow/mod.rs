//! Project → Phase → Task workflow.
//!
//! Pure transition rules live in [`task_engine`], [`phase_gate`] and
//! [`project_gate`]; [`progress`] derives percentages. [`WorkflowService`]
//! owns the [`EntityCache`] and runs every mutation through the optimistic
//! reconciliation loop against a [`WorkflowRemote`].

mod cache;
mod error;
mod http;
mod memory;
mod policy;
mod reconcile;
mod remote;
mod types;

pub mod phase_gate;
pub mod progress;
pub mod project_gate;
pub mod task_engine;

pub use cache::{EntityCache, SharedCache, WorkflowEvent};
pub use error::{
    classify_http_status, error_from_response, Blocker, EntityRef, RemoteRejection, StatusClass,
    WorkflowError, WorkflowResult,
};
pub use http::HttpWorkflowRemote;
pub use memory::InMemoryWorkflowStore;
pub use phase_gate::PhaseAction;
pub use policy::WorkflowPolicy;
pub use progress::{PhaseProgress, ProjectProgress};
pub use project_gate::Eligibility;
pub use reconcile::{WorkflowService, DEFAULT_SETTLE_DELAY};
pub use remote::{SharedRemote, WorkflowRemote};
pub use task_engine::TaskAction;
pub use types::{
    NewTask, PhaseEdit, PhaseId, PhaseInstance, PhaseProgression, PhaseStatus, PhaseTemplate,
    Progression, Project, ProjectId, ProjectStatus, Task, TaskEdit, TaskId, TaskPriority,
    TaskStatus, UserId,
};
