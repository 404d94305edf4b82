//! Optimistic reconciliation loop.
//!
//! Every mutation runs the same sequence:
//!
//! 1. Apply the change to the cache right away when the local precondition
//!    holds, so progress and gating flags update without waiting on the store.
//! 2. Issue the store operation. The store's check is binding; a failed local
//!    check only skips step 1.
//! 3. On success, store the returned record, re-fetch the ancestor chain
//!    (task → phase → project) and schedule one more re-fetch after
//!    `settle_delay` to pick up server-side cascades.
//! 4. On failure, put back the last record the store gave us, then reload the
//!    affected entity and its chain over it. Levels the reload cannot reach
//!    keep the restored record until the settle re-fetch tries again.
//!
//! Sequences for different entities do not coordinate. Cache writes are
//! last-write-wins per entity, so a later re-fetch simply overwrites an earlier
//! one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::SubscriptionId;

use super::cache::{EntityCache, SharedCache, WorkflowEvent};
use super::error::{EntityRef, WorkflowError, WorkflowResult};
use super::phase_gate::{self, PhaseAction};
use super::policy::WorkflowPolicy;
use super::progress::ProjectProgress;
use super::project_gate::{self, Eligibility};
use super::remote::{SharedRemote, WorkflowRemote};
use super::task_engine::{self, TaskAction};
use super::types::{
    NewTask, PhaseEdit, PhaseId, PhaseInstance, Project, ProjectId, Task, TaskEdit, TaskId,
};

/// Default delay before the settle re-fetch.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Entities to re-fetch after a mutation, innermost first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Chain {
    task: Option<TaskId>,
    phase: Option<PhaseId>,
    project: Option<ProjectId>,
}

/// Last record the store confirmed, kept while an optimistic write is pending.
enum Snapshot {
    Task(Task),
    Phase(PhaseInstance),
    Project(Project),
    Nothing,
}

impl Snapshot {
    async fn restore(self, cache: &EntityCache) {
        match self {
            Self::Task(task) => cache.put_task(task).await,
            Self::Phase(phase) => cache.put_phase(phase).await,
            Self::Project(project) => cache.put_project(project).await,
            Self::Nothing => {}
        }
    }
}

/// Re-fetch `chain` from the store into the cache.
///
/// Entities the store reports as gone are evicted. The first other failure
/// aborts the re-fetch.
async fn refetch_chain(
    remote: &dyn WorkflowRemote,
    cache: &EntityCache,
    chain: Chain,
) -> WorkflowResult<()> {
    let mut phase_id = chain.phase;
    let mut project_id = chain.project;

    if let Some(id) = chain.task {
        match remote.fetch_task(id).await {
            Ok(task) => {
                phase_id.get_or_insert(task.phase_id);
                cache.put_task(task).await;
            }
            Err(WorkflowError::NotFound { .. }) => {
                debug!(task = %id, "Task vanished from store; evicting");
                cache.evict(EntityRef::Task(id)).await;
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(id) = phase_id {
        match remote.fetch_phase(id).await {
            Ok(phase) => {
                project_id.get_or_insert(phase.project_id);
                cache.put_phase(phase).await;
                let tasks = remote.list_tasks(id).await?;
                cache.replace_phase_tasks(id, tasks).await;
            }
            Err(WorkflowError::NotFound { .. }) => {
                debug!(phase = %id, "Phase vanished from store; evicting");
                cache.evict(EntityRef::Phase(id)).await;
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(id) = project_id {
        match fetch_project_with_progress(remote, id).await {
            Ok(project) => {
                let phases = remote.list_phases(id).await?;
                cache.put_project(project).await;
                cache.replace_project_phases(id, phases).await;
            }
            Err(WorkflowError::NotFound { .. }) => {
                debug!(project = %id, "Project vanished from store; evicting");
                cache.evict(EntityRef::Project(id)).await;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Fetch a project and fold in the server aggregate when the store has one.
async fn fetch_project_with_progress(
    remote: &dyn WorkflowRemote,
    id: ProjectId,
) -> WorkflowResult<Project> {
    let mut project = remote.fetch_project(id).await?;
    match remote.fetch_progression(id).await {
        Ok(progression) => project.progress = Some(progression.project.min(100)),
        Err(e) => debug!(project = %id, error = %e, "No progression aggregate"),
    }
    Ok(project)
}

/// Owner of the entity cache and driver of every workflow mutation.
pub struct WorkflowService {
    remote: SharedRemote,
    cache: SharedCache,
    policy: WorkflowPolicy,
    settle_delay: Duration,
    shutdown: CancellationToken,
}

impl WorkflowService {
    pub fn new(remote: SharedRemote, policy: WorkflowPolicy, settle_delay: Duration) -> Self {
        Self {
            remote,
            cache: Arc::new(EntityCache::new()),
            policy,
            settle_delay,
            shutdown: CancellationToken::new(),
        }
    }

    /// The cache every read and subscription goes through.
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Policy the local checks run under.
    pub fn policy(&self) -> WorkflowPolicy {
        self.policy
    }

    /// Cancel every scheduled settle re-fetch. In-flight store calls finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Receive every cache change and progress recomputation.
    pub fn subscribe(
        &self,
    ) -> (
        SubscriptionId,
        tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>,
    ) {
        self.cache.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cache.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bootstrap and reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Load a project, its phases and all their tasks into the cache.
    pub async fn load_project(&self, id: ProjectId) -> WorkflowResult<ProjectProgress> {
        info!(project = %id, "Loading project");
        let project = fetch_project_with_progress(self.remote.as_ref(), id).await?;
        let phases = self.remote.list_phases(id).await?;
        let tasks = futures::future::try_join_all(
            phases.iter().map(|phase| self.remote.list_tasks(phase.id)),
        )
        .await?;

        let phase_ids: Vec<PhaseId> = phases.iter().map(|p| p.id).collect();
        self.cache.put_project(project).await;
        self.cache.replace_project_phases(id, phases).await;
        for (phase, tasks) in phase_ids.into_iter().zip(tasks) {
            self.cache.replace_phase_tasks(phase, tasks).await;
        }

        let progress = self
            .cache
            .progress(id)
            .await
            .ok_or(WorkflowError::NotFound {
                entity: EntityRef::Project(id),
            })?;
        info!(
            project = %id,
            percent = progress.percent,
            phases = progress.phases.len(),
            "Project loaded"
        );
        Ok(progress)
    }

    /// Re-sync a loaded project with the store.
    pub async fn refresh_project(&self, id: ProjectId) -> WorkflowResult<()> {
        let chain = Chain {
            project: Some(id),
            ..Default::default()
        };
        refetch_chain(self.remote.as_ref(), &self.cache, chain).await?;
        for phase in self.cache.phases_of(id).await {
            let tasks = self.remote.list_tasks(phase.id).await?;
            self.cache.replace_phase_tasks(phase.id, tasks).await;
        }
        debug!(project = %id, "Project refreshed");
        Ok(())
    }

    pub async fn project(&self, id: ProjectId) -> Option<Project> {
        self.cache.project(id).await
    }

    /// Cached phases of a project in template order.
    pub async fn phases(&self, project: ProjectId) -> Vec<PhaseInstance> {
        self.cache.phases_of(project).await
    }

    pub async fn tasks(&self, phase: PhaseId) -> Vec<Task> {
        self.cache.tasks_of(phase).await
    }

    /// Progress derived from the cache, preferring the store's aggregate.
    pub async fn progress(&self, project: ProjectId) -> Option<ProjectProgress> {
        self.cache.progress(project).await
    }

    /// Advisory end flag; the store still checks at `end` time.
    pub async fn phase_can_end(&self, phase: PhaseId) -> bool {
        self.cache.phase_can_end(phase).await.unwrap_or(false)
    }

    /// Local eligibility computed from cached phases.
    pub async fn eligibility(&self, project: ProjectId) -> Option<Eligibility> {
        self.cache.eligibility(project, &self.policy).await
    }

    /// Eligibility as the store sees it.
    pub async fn remote_eligibility(&self, project: ProjectId) -> WorkflowResult<Eligibility> {
        self.remote.project_eligibility(project).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Task operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn start_task(&self, id: TaskId) -> WorkflowResult<Task> {
        self.transition_task(id, TaskAction::Start).await
    }

    pub async fn complete_task(&self, id: TaskId) -> WorkflowResult<Task> {
        self.transition_task(id, TaskAction::Complete).await
    }

    pub async fn cancel_task(&self, id: TaskId) -> WorkflowResult<Task> {
        self.transition_task(id, TaskAction::Cancel).await
    }

    pub async fn transition_task(&self, id: TaskId, action: TaskAction) -> WorkflowResult<Task> {
        let op = Uuid::new_v4();
        debug!(op = %op, task = %id, action = %action, "Task transition requested");

        let snapshot = self.cache.task(id).await;
        let policy = self.policy;
        let now = Utc::now();
        if let Err(e) = self
            .cache
            .mutate_task(id, |task| {
                task_engine::apply_transition(task, action, &policy, now)
            })
            .await
        {
            debug!(op = %op, task = %id, error = %e, "Local check failed; deferring to store");
        }

        let chain = self.chain_for_task(id, snapshot.as_ref()).await;
        match self.remote.transition_task(id, action).await {
            Ok(task) => {
                info!(op = %op, task = %id, status = %task.status, "Task {}", action);
                let phase = task.phase_id;
                self.cache.put_task(task.clone()).await;
                self.confirm(
                    op,
                    Chain {
                        task: None,
                        phase: Some(phase),
                        project: chain.project,
                    },
                )
                .await;
                Ok(task)
            }
            Err(err) => {
                self.rollback(op, chain, snapshot.map_or(Snapshot::Nothing, Snapshot::Task), &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Field edit; allowed in any status.
    pub async fn edit_task(&self, id: TaskId, edit: TaskEdit) -> WorkflowResult<Task> {
        let op = Uuid::new_v4();
        let snapshot = self.cache.task(id).await;
        if let Err(e) = self
            .cache
            .mutate_task(id, |task| {
                task_engine::apply_edit(task, &edit);
                Ok(())
            })
            .await
        {
            debug!(op = %op, task = %id, error = %e, "Local edit skipped");
        }

        match self.remote.update_task(id, &edit).await {
            Ok(task) => {
                debug!(op = %op, task = %id, "Task fields updated");
                self.cache.put_task(task.clone()).await;
                Ok(task)
            }
            Err(err) => {
                let chain = Chain {
                    task: Some(id),
                    ..Default::default()
                };
                self.rollback(op, chain, snapshot.map_or(Snapshot::Nothing, Snapshot::Task), &err)
                    .await;
                Err(err)
            }
        }
    }

    pub async fn create_task(&self, phase: PhaseId, task: NewTask) -> WorkflowResult<Task> {
        let op = Uuid::new_v4();
        let created = self.remote.create_task(phase, &task).await?;
        info!(op = %op, task = %created.id, phase = %phase, "Task created");
        self.cache.put_task(created.clone()).await;
        let project = self.cache.project_of_phase(phase).await;
        self.confirm(
            op,
            Chain {
                task: None,
                phase: Some(phase),
                project,
            },
        )
        .await;
        Ok(created)
    }

    /// Remove a task whatever its status.
    pub async fn delete_task(&self, id: TaskId) -> WorkflowResult<()> {
        let op = Uuid::new_v4();
        let existing = self.cache.task(id).await;
        let chain = self.chain_for_task(id, existing.as_ref()).await;
        let snapshot = self.cache.take_task(id).await;

        match self.remote.delete_task(id).await {
            Ok(()) => {
                info!(op = %op, task = %id, "Task deleted");
                self.confirm(
                    op,
                    Chain {
                        task: None,
                        ..chain
                    },
                )
                .await;
                Ok(())
            }
            Err(err) => {
                self.rollback(op, chain, snapshot.map_or(Snapshot::Nothing, Snapshot::Task), &err)
                    .await;
                Err(err)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn start_phase(&self, id: PhaseId) -> WorkflowResult<PhaseInstance> {
        self.transition_phase(id, PhaseAction::Start).await
    }

    pub async fn end_phase(&self, id: PhaseId) -> WorkflowResult<PhaseInstance> {
        self.transition_phase(id, PhaseAction::End).await
    }

    pub async fn skip_phase(&self, id: PhaseId) -> WorkflowResult<PhaseInstance> {
        self.transition_phase(id, PhaseAction::Skip).await
    }

    pub async fn transition_phase(
        &self,
        id: PhaseId,
        action: PhaseAction,
    ) -> WorkflowResult<PhaseInstance> {
        let op = Uuid::new_v4();
        debug!(op = %op, phase = %id, action = %action, "Phase transition requested");

        let snapshot = self.cache.phase(id).await;
        let now = Utc::now();
        if let Err(e) = self
            .cache
            .mutate_phase(id, |phase, tasks| {
                phase_gate::apply_transition(phase, action, tasks.iter().copied(), now)
            })
            .await
        {
            debug!(op = %op, phase = %id, error = %e, "Local check failed; deferring to store");
        }

        let chain = Chain {
            task: None,
            phase: Some(id),
            project: snapshot.as_ref().map(|p| p.project_id),
        };
        match self.remote.transition_phase(id, action).await {
            Ok(phase) => {
                info!(op = %op, phase = %id, status = %phase.status, "Phase {}", action);
                let project = phase.project_id;
                self.cache.put_phase(phase.clone()).await;
                self.confirm(
                    op,
                    Chain {
                        project: Some(project),
                        ..chain
                    },
                )
                .await;
                Ok(phase)
            }
            Err(err) => {
                self.rollback(
                    op,
                    chain,
                    snapshot.map_or(Snapshot::Nothing, Snapshot::Phase),
                    &err,
                )
                .await;
                Err(err)
            }
        }
    }

    /// Comment and date overrides; allowed in any status.
    pub async fn edit_phase(&self, id: PhaseId, edit: PhaseEdit) -> WorkflowResult<PhaseInstance> {
        let op = Uuid::new_v4();
        let snapshot = self.cache.phase(id).await;
        if let Err(e) = self
            .cache
            .mutate_phase(id, |phase, _| {
                phase_gate::apply_edit(phase, &edit);
                Ok(())
            })
            .await
        {
            debug!(op = %op, phase = %id, error = %e, "Local edit skipped");
        }

        match self.remote.update_phase(id, &edit).await {
            Ok(phase) => {
                debug!(op = %op, phase = %id, "Phase fields updated");
                self.cache.put_phase(phase.clone()).await;
                Ok(phase)
            }
            Err(err) => {
                let chain = Chain {
                    phase: Some(id),
                    ..Default::default()
                };
                self.rollback(
                    op,
                    chain,
                    snapshot.map_or(Snapshot::Nothing, Snapshot::Phase),
                    &err,
                )
                .await;
                Err(err)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Project operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn mark_project_complete(&self, id: ProjectId) -> WorkflowResult<Project> {
        self.set_project_completed(id, true).await
    }

    /// Always permitted.
    pub async fn mark_project_incomplete(&self, id: ProjectId) -> WorkflowResult<Project> {
        self.set_project_completed(id, false).await
    }

    pub async fn set_project_completed(
        &self,
        id: ProjectId,
        completed: bool,
    ) -> WorkflowResult<Project> {
        let op = Uuid::new_v4();
        debug!(op = %op, project = %id, completed, "Project completion toggle requested");

        let snapshot = self.cache.project(id).await;
        let policy = self.policy;
        if let Err(e) = self
            .cache
            .mutate_project(id, |project, phases| {
                project_gate::apply_completion(project, completed, phases.iter().copied(), &policy)
            })
            .await
        {
            debug!(op = %op, project = %id, error = %e, "Local check failed; deferring to store");
        }

        let chain = Chain {
            project: Some(id),
            ..Default::default()
        };
        match self.remote.set_project_completed(id, completed).await {
            Ok(project) => {
                info!(
                    op = %op,
                    project = %id,
                    completed = project.completed,
                    "Project completion updated"
                );
                self.cache.put_project(project.clone()).await;
                self.confirm(op, chain).await;
                Ok(project)
            }
            Err(err) => {
                self.rollback(
                    op,
                    chain,
                    snapshot.map_or(Snapshot::Nothing, Snapshot::Project),
                    &err,
                )
                .await;
                Err(err)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    async fn chain_for_task(&self, id: TaskId, known: Option<&Task>) -> Chain {
        let phase = match known {
            Some(task) => Some(task.phase_id),
            None => self.cache.task(id).await.map(|t| t.phase_id),
        };
        let project = match phase {
            Some(p) => self.cache.project_of_phase(p).await,
            None => None,
        };
        Chain {
            task: Some(id),
            phase,
            project,
        }
    }

    async fn confirm(&self, op: Uuid, chain: Chain) {
        if let Err(e) = refetch_chain(self.remote.as_ref(), &self.cache, chain).await {
            warn!(op = %op, error = %e, "Confirm re-fetch failed; settle re-fetch will retry");
        }
        self.schedule_settle(op, chain);
    }

    /// Undo the optimistic write, then reload. The snapshot goes in first so a
    /// partial reload never ends up underneath a stale record.
    async fn rollback(&self, op: Uuid, chain: Chain, snapshot: Snapshot, cause: &WorkflowError) {
        warn!(op = %op, error = %cause, "Store rejected mutation; reloading");
        snapshot.restore(&self.cache).await;
        if let Err(e) = refetch_chain(self.remote.as_ref(), &self.cache, chain).await {
            warn!(op = %op, error = %e, "Reload failed; settle re-fetch will retry");
            self.schedule_settle(op, chain);
        }
    }

    fn schedule_settle(&self, op: Uuid, chain: Chain) {
        let remote = Arc::clone(&self.remote);
        let cache = Arc::clone(&self.cache);
        let delay = self.settle_delay;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(op = %op, "Settle re-fetch cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    match refetch_chain(remote.as_ref(), &cache, chain).await {
                        Ok(()) => debug!(op = %op, "Settle re-fetch applied"),
                        Err(e) => warn!(op = %op, error = %e, "Settle re-fetch failed"),
                    }
                }
            }
        });
    }
}

impl Drop for WorkflowService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
