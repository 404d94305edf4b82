//! In-memory entity cache.
//!
//! The only shared mutable state in the workflow core. It is owned by the
//! [`WorkflowService`](super::WorkflowService) and handed out as
//! [`SharedCache`]; there is no global instance. Writes are last-write-wins per
//! entity, and every write publishes a [`WorkflowEvent`] plus a fresh
//! [`ProjectProgress`] for the affected project.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::{Listeners, SubscriptionId};

use super::error::{EntityRef, WorkflowError, WorkflowResult};
use super::phase_gate;
use super::policy::WorkflowPolicy;
use super::progress::{self, PhaseProgress, ProjectProgress};
use super::project_gate::{self, Eligibility};
use super::types::{PhaseId, PhaseInstance, Project, ProjectId, Task, TaskId};

/// Change published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Changed(EntityRef),
    Removed(EntityRef),
    Progress(ProjectProgress),
}

#[derive(Debug, Default)]
struct CacheState {
    projects: HashMap<ProjectId, Project>,
    phases: HashMap<PhaseId, PhaseInstance>,
    tasks: HashMap<TaskId, Task>,
}

impl CacheState {
    fn phases_of(&self, project: ProjectId) -> Vec<&PhaseInstance> {
        let mut phases: Vec<&PhaseInstance> = self
            .phases
            .values()
            .filter(|p| p.project_id == project)
            .collect();
        phases.sort_by_key(|p| (p.order(), p.id));
        phases
    }

    fn tasks_of(&self, phase: PhaseId) -> Vec<&Task> {
        let position: HashMap<TaskId, usize> = self
            .phases
            .get(&phase)
            .map(|p| p.task_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect())
            .unwrap_or_default();
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.phase_id == phase)
            .collect();
        tasks.sort_by_key(|t| (position.get(&t.id).copied().unwrap_or(usize::MAX), t.id));
        tasks
    }

    fn project_of_phase(&self, phase: PhaseId) -> Option<ProjectId> {
        self.phases.get(&phase).map(|p| p.project_id)
    }

    fn project_of_task(&self, task: TaskId) -> Option<ProjectId> {
        self.tasks
            .get(&task)
            .and_then(|t| self.project_of_phase(t.phase_id))
    }

    fn progress(&self, project_id: ProjectId) -> Option<ProjectProgress> {
        let project = self.projects.get(&project_id)?;
        let phases = self.phases_of(project_id);
        let phase_progress = phases
            .iter()
            .map(|phase| {
                let tasks = self.tasks_of(phase.id);
                PhaseProgress {
                    phase_id: phase.id,
                    order: phase.order(),
                    status: phase.status,
                    percent: progress::phase_progress(tasks.iter().copied()),
                    can_end: phase_gate::can_end(phase, tasks.iter().copied()),
                }
            })
            .collect();
        Some(ProjectProgress {
            project_id,
            percent: progress::project_progress(project.progress, phases.iter().copied()),
            completed: project.completed,
            phases: phase_progress,
        })
    }

    /// Drop the server aggregate so the local fallback is shown until the next
    /// re-fetch brings a fresh one.
    fn invalidate_aggregate(&mut self, project: Option<ProjectId>) {
        if let Some(p) = project.and_then(|id| self.projects.get_mut(&id)) {
            p.progress = None;
        }
    }

    fn link_task(&mut self, task: &Task) {
        for phase in self.phases.values_mut() {
            if phase.id == task.phase_id {
                if !phase.task_ids.contains(&task.id) {
                    phase.task_ids.push(task.id);
                }
            } else {
                phase.task_ids.retain(|id| *id != task.id);
            }
        }
    }
}

/// Entity cache shared between the service and its background re-fetches.
pub struct EntityCache {
    state: RwLock<CacheState>,
    listeners: Listeners<WorkflowEvent>,
}

pub type SharedCache = Arc<EntityCache>;

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn subscribe(
        &self,
    ) -> (
        SubscriptionId,
        tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>,
    ) {
        self.listeners.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn publish(&self, events: Vec<WorkflowEvent>, progress: Option<ProjectProgress>) {
        for event in &events {
            self.listeners.emit(event);
        }
        if let Some(progress) = progress {
            self.listeners.emit(&WorkflowEvent::Progress(progress));
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub async fn project(&self, id: ProjectId) -> Option<Project> {
        self.state.read().await.projects.get(&id).cloned()
    }

    pub async fn phase(&self, id: PhaseId) -> Option<PhaseInstance> {
        self.state.read().await.phases.get(&id).cloned()
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    /// Phases of a project in display order.
    pub async fn phases_of(&self, project: ProjectId) -> Vec<PhaseInstance> {
        let state = self.state.read().await;
        state.phases_of(project).into_iter().cloned().collect()
    }

    pub async fn tasks_of(&self, phase: PhaseId) -> Vec<Task> {
        let state = self.state.read().await;
        state.tasks_of(phase).into_iter().cloned().collect()
    }

    pub async fn project_of_phase(&self, phase: PhaseId) -> Option<ProjectId> {
        self.state.read().await.project_of_phase(phase)
    }

    pub async fn project_of_task(&self, task: TaskId) -> Option<ProjectId> {
        self.state.read().await.project_of_task(task)
    }

    pub async fn progress(&self, project: ProjectId) -> Option<ProjectProgress> {
        self.state.read().await.progress(project)
    }

    pub async fn phase_can_end(&self, phase: PhaseId) -> Option<bool> {
        let state = self.state.read().await;
        let p = state.phases.get(&phase)?;
        Some(phase_gate::can_end(p, state.tasks_of(phase)))
    }

    pub async fn eligibility(
        &self,
        project: ProjectId,
        policy: &WorkflowPolicy,
    ) -> Option<Eligibility> {
        let state = self.state.read().await;
        let p = state.projects.get(&project)?;
        Some(project_gate::eligibility(p, state.phases_of(project), policy))
    }

    // ── Authoritative writes ────────────────────────────────────────────────

    pub async fn put_project(&self, project: Project) {
        let id = project.id;
        let progress = {
            let mut state = self.state.write().await;
            state.projects.insert(id, project);
            state.progress(id)
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Project(id))], progress);
    }

    pub async fn put_phase(&self, phase: PhaseInstance) {
        let id = phase.id;
        let project = phase.project_id;
        let progress = {
            let mut state = self.state.write().await;
            state.phases.insert(id, phase);
            state.progress(project)
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Phase(id))], progress);
    }

    pub async fn put_task(&self, task: Task) {
        let id = task.id;
        let progress = {
            let mut state = self.state.write().await;
            state.link_task(&task);
            state.tasks.insert(id, task);
            let project = state.project_of_task(id);
            project.and_then(|p| state.progress(p))
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Task(id))], progress);
    }

    /// Replace every cached task of `phase` with the store's listing.
    pub async fn replace_phase_tasks(&self, phase: PhaseId, tasks: Vec<Task>) {
        let (removed, progress) = {
            let mut state = self.state.write().await;
            let incoming: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
            let removed: Vec<TaskId> = state
                .tasks
                .values()
                .filter(|t| t.phase_id == phase && !incoming.contains(&t.id))
                .map(|t| t.id)
                .collect();
            for id in &removed {
                state.tasks.remove(id);
            }
            if let Some(p) = state.phases.get_mut(&phase) {
                p.task_ids = incoming;
            }
            for task in tasks {
                state.tasks.insert(task.id, task);
            }
            let project = state.project_of_phase(phase);
            (removed, project.and_then(|p| state.progress(p)))
        };
        let mut events: Vec<WorkflowEvent> = removed
            .into_iter()
            .map(|id| WorkflowEvent::Removed(EntityRef::Task(id)))
            .collect();
        events.push(WorkflowEvent::Changed(EntityRef::Phase(phase)));
        self.publish(events, progress);
    }

    /// Replace every cached phase of `project` with the store's listing.
    pub async fn replace_project_phases(&self, project: ProjectId, phases: Vec<PhaseInstance>) {
        let (removed, progress) = {
            let mut state = self.state.write().await;
            let incoming: Vec<PhaseId> = phases.iter().map(|p| p.id).collect();
            let removed: Vec<PhaseId> = state
                .phases
                .values()
                .filter(|p| p.project_id == project && !incoming.contains(&p.id))
                .map(|p| p.id)
                .collect();
            for id in &removed {
                state.phases.remove(id);
                state.tasks.retain(|_, t| t.phase_id != *id);
            }
            for phase in phases {
                state.phases.insert(phase.id, phase);
            }
            (removed, state.progress(project))
        };
        let mut events: Vec<WorkflowEvent> = removed
            .into_iter()
            .map(|id| WorkflowEvent::Removed(EntityRef::Phase(id)))
            .collect();
        events.push(WorkflowEvent::Changed(EntityRef::Project(project)));
        self.publish(events, progress);
    }

    /// Drop an entity the store no longer knows about.
    pub async fn evict(&self, entity: EntityRef) {
        let progress = {
            let mut state = self.state.write().await;
            match entity {
                EntityRef::Task(id) => {
                    let project = state.project_of_task(id);
                    if let Some(task) = state.tasks.remove(&id) {
                        if let Some(p) = state.phases.get_mut(&task.phase_id) {
                            p.task_ids.retain(|t| *t != id);
                        }
                    }
                    project.and_then(|p| state.progress(p))
                }
                EntityRef::Phase(id) => {
                    let project = state.project_of_phase(id);
                    state.phases.remove(&id);
                    state.tasks.retain(|_, t| t.phase_id != id);
                    project.and_then(|p| state.progress(p))
                }
                EntityRef::Project(id) => {
                    state.projects.remove(&id);
                    let phase_ids: Vec<PhaseId> = state
                        .phases
                        .values()
                        .filter(|p| p.project_id == id)
                        .map(|p| p.id)
                        .collect();
                    for phase in phase_ids {
                        state.phases.remove(&phase);
                        state.tasks.retain(|_, t| t.phase_id != phase);
                    }
                    None
                }
            }
        };
        self.publish(vec![WorkflowEvent::Removed(entity)], progress);
    }

    // ── Optimistic writes ───────────────────────────────────────────────────
    //
    // These invalidate the project's server aggregate so the displayed
    // percentage follows the local guess until reconciliation.

    pub async fn mutate_task<F>(&self, id: TaskId, f: F) -> WorkflowResult<Task>
    where
        F: FnOnce(&mut Task) -> WorkflowResult<()>,
    {
        let (task, progress) = {
            let mut state = self.state.write().await;
            let entity = EntityRef::Task(id);
            let task = state
                .tasks
                .get_mut(&id)
                .ok_or(WorkflowError::NotFound { entity })?;
            let mut draft = task.clone();
            f(&mut draft)?;
            *task = draft.clone();
            let project = state.project_of_task(id);
            state.invalidate_aggregate(project);
            (draft, project.and_then(|p| state.progress(p)))
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Task(id))], progress);
        Ok(task)
    }

    pub async fn mutate_phase<F>(&self, id: PhaseId, f: F) -> WorkflowResult<PhaseInstance>
    where
        F: FnOnce(&mut PhaseInstance, &[&Task]) -> WorkflowResult<()>,
    {
        let (phase, progress) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let entity = EntityRef::Phase(id);
            let mut draft = state
                .phases
                .get(&id)
                .cloned()
                .ok_or(WorkflowError::NotFound { entity })?;
            {
                let tasks = state.tasks_of(id);
                f(&mut draft, &tasks)?;
            }
            let project = draft.project_id;
            state.phases.insert(id, draft.clone());
            state.invalidate_aggregate(Some(project));
            (draft, state.progress(project))
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Phase(id))], progress);
        Ok(phase)
    }

    pub async fn mutate_project<F>(&self, id: ProjectId, f: F) -> WorkflowResult<Project>
    where
        F: FnOnce(&mut Project, &[&PhaseInstance]) -> WorkflowResult<()>,
    {
        let (project, progress) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let entity = EntityRef::Project(id);
            let mut draft = state
                .projects
                .get(&id)
                .cloned()
                .ok_or(WorkflowError::NotFound { entity })?;
            {
                let phases = state.phases_of(id);
                f(&mut draft, &phases)?;
            }
            state.projects.insert(id, draft.clone());
            (draft, state.progress(id))
        };
        self.publish(vec![WorkflowEvent::Changed(EntityRef::Project(id))], progress);
        Ok(project)
    }

    /// Remove a task ahead of the store confirming the deletion.
    pub async fn take_task(&self, id: TaskId) -> Option<Task> {
        let (task, progress) = {
            let mut state = self.state.write().await;
            let project = state.project_of_task(id);
            let task = state.tasks.remove(&id)?;
            if let Some(p) = state.phases.get_mut(&task.phase_id) {
                p.task_ids.retain(|t| *t != id);
            }
            state.invalidate_aggregate(project);
            (task, project.and_then(|p| state.progress(p)))
        };
        self.publish(vec![WorkflowEvent::Removed(EntityRef::Task(id))], progress);
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{
        PhaseStatus, PhaseTemplate, ProjectStatus, TaskPriority, TaskStatus,
    };

    fn project() -> Project {
        Project {
            id: ProjectId(1),
            name: "Depot".to_string(),
            status: ProjectStatus::InProgress,
            completed: false,
            progress: Some(10),
        }
    }

    fn phase(id: i64, order: u32) -> PhaseInstance {
        PhaseInstance {
            id: PhaseId(id),
            project_id: ProjectId(1),
            template: PhaseTemplate {
                id,
                name: format!("P{}", order),
                description: String::new(),
                order,
            },
            status: PhaseStatus::InProgress,
            started_at: None,
            ended_at: None,
            comment: String::new(),
            task_ids: vec![],
        }
    }

    fn task(id: i64, phase: i64, status: TaskStatus) -> Task {
        Task {
            id: TaskId(id),
            phase_id: PhaseId(phase),
            title: format!("T{}", id),
            description: String::new(),
            priority: TaskPriority::Normal,
            status,
            assignee: None,
            planned_start: None,
            planned_end: None,
            actual_start: None,
            actual_end: None,
            progress: None,
            notes: String::new(),
        }
    }

    async fn seeded() -> EntityCache {
        let cache = EntityCache::new();
        cache.put_project(project()).await;
        cache
            .replace_project_phases(ProjectId(1), vec![phase(2, 2), phase(1, 1)])
            .await;
        cache
            .replace_phase_tasks(
                PhaseId(1),
                vec![
                    task(10, 1, TaskStatus::Completed),
                    task(11, 1, TaskStatus::Pending),
                ],
            )
            .await;
        cache
    }

    #[tokio::test]
    async fn phases_come_back_in_order() {
        let cache = seeded().await;
        let ids: Vec<PhaseId> = cache
            .phases_of(ProjectId(1))
            .await
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![PhaseId(1), PhaseId(2)]);
    }

    #[tokio::test]
    async fn optimistic_write_recomputes_progress_and_drops_aggregate() {
        let cache = seeded().await;
        let before = cache.progress(ProjectId(1)).await.unwrap();
        assert_eq!(before.percent, 10);
        assert_eq!(before.phase(PhaseId(1)).unwrap().percent, 50);
        assert!(!before.phase(PhaseId(1)).unwrap().can_end);

        cache
            .mutate_task(TaskId(11), |t| {
                t.status = TaskStatus::Completed;
                Ok(())
            })
            .await
            .unwrap();

        let after = cache.progress(ProjectId(1)).await.unwrap();
        assert_eq!(after.phase(PhaseId(1)).unwrap().percent, 100);
        assert!(after.phase(PhaseId(1)).unwrap().can_end);
        // Falls back to completed phases / total until the next re-fetch
        assert_eq!(after.percent, 0);
    }

    #[tokio::test]
    async fn failed_mutation_leaves_cache_untouched() {
        let cache = seeded().await;
        let result = cache
            .mutate_task(TaskId(11), |t| {
                t.status = TaskStatus::Cancelled;
                Err(WorkflowError::invalid(EntityRef::Task(t.id), "nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(
            cache.task(TaskId(11)).await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn subscribers_receive_progress() {
        let cache = seeded().await;
        let (_id, mut rx) = cache.subscribe();
        cache.put_task(task(12, 1, TaskStatus::Pending)).await;
        assert_eq!(
            rx.recv().await,
            Some(WorkflowEvent::Changed(EntityRef::Task(TaskId(12))))
        );
        match rx.recv().await {
            Some(WorkflowEvent::Progress(p)) => {
                assert_eq!(p.phase(PhaseId(1)).unwrap().percent, 33);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn take_task_unlinks_from_phase() {
        let cache = seeded().await;
        let taken = cache.take_task(TaskId(11)).await.unwrap();
        assert_eq!(taken.id, TaskId(11));
        let phase = cache.phase(PhaseId(1)).await.unwrap();
        assert_eq!(phase.task_ids, vec![TaskId(10)]);
        assert!(cache.phase_can_end(PhaseId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn replacing_tasks_evicts_vanished_ones() {
        let cache = seeded().await;
        cache
            .replace_phase_tasks(PhaseId(1), vec![task(10, 1, TaskStatus::Completed)])
            .await;
        assert!(cache.task(TaskId(11)).await.is_none());
        assert_eq!(cache.tasks_of(PhaseId(1)).await.len(), 1);
    }
}
