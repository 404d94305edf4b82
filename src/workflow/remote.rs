//! Boundary to the authoritative workflow store.
//!
//! The store is the single source of truth after any mutation and runs the
//! binding versions of every transition check. Rejections come back as
//! [`WorkflowError`]s already mapped onto the taxonomy.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::WorkflowResult;
use super::phase_gate::PhaseAction;
use super::project_gate::Eligibility;
use super::task_engine::TaskAction;
use super::types::{
    NewTask, PhaseEdit, PhaseId, PhaseInstance, Progression, Project, ProjectId, Task, TaskEdit,
    TaskId,
};

#[async_trait]
pub trait WorkflowRemote: Send + Sync {
    async fn fetch_project(&self, project: ProjectId) -> WorkflowResult<Project>;

    async fn list_phases(&self, project: ProjectId) -> WorkflowResult<Vec<PhaseInstance>>;

    async fn fetch_phase(&self, phase: PhaseId) -> WorkflowResult<PhaseInstance>;

    async fn list_tasks(&self, phase: PhaseId) -> WorkflowResult<Vec<Task>>;

    async fn fetch_task(&self, task: TaskId) -> WorkflowResult<Task>;

    async fn fetch_progression(&self, project: ProjectId) -> WorkflowResult<Progression>;

    /// Returns the updated task.
    async fn transition_task(&self, task: TaskId, action: TaskAction) -> WorkflowResult<Task>;

    async fn update_task(&self, task: TaskId, edit: &TaskEdit) -> WorkflowResult<Task>;

    async fn create_task(&self, phase: PhaseId, task: &NewTask) -> WorkflowResult<Task>;

    async fn delete_task(&self, task: TaskId) -> WorkflowResult<()>;

    /// Returns the confirmed phase record.
    async fn transition_phase(
        &self,
        phase: PhaseId,
        action: PhaseAction,
    ) -> WorkflowResult<PhaseInstance>;

    async fn update_phase(&self, phase: PhaseId, edit: &PhaseEdit)
        -> WorkflowResult<PhaseInstance>;

    async fn project_eligibility(&self, project: ProjectId) -> WorkflowResult<Eligibility>;

    async fn set_project_completed(
        &self,
        project: ProjectId,
        completed: bool,
    ) -> WorkflowResult<Project>;
}

pub type SharedRemote = Arc<dyn WorkflowRemote>;
