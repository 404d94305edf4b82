//! In-process workflow store.
//!
//! Applies the same binding checks as the real store, optionally cascades
//! completion upward the way the server does when the last task of a phase
//! resolves, and lets callers inject failures. Used for local demos and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::error::{EntityRef, WorkflowError, WorkflowResult};
use super::phase_gate::{self, PhaseAction};
use super::policy::WorkflowPolicy;
use super::progress;
use super::project_gate::{self, Eligibility};
use super::remote::WorkflowRemote;
use super::task_engine::{self, TaskAction};
use super::types::{
    NewTask, PhaseEdit, PhaseId, PhaseInstance, PhaseProgression, PhaseStatus, Progression,
    Project, ProjectId, Task, TaskEdit, TaskId, TaskStatus,
};

#[derive(Debug, Default)]
struct StoreState {
    projects: HashMap<ProjectId, Project>,
    phases: HashMap<PhaseId, PhaseInstance>,
    tasks: HashMap<TaskId, Task>,
    next_task_id: i64,
}

impl StoreState {
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
        self.phases
            .get(&phase)
            .map(|p| {
                p.task_ids
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn project(&self, id: ProjectId) -> WorkflowResult<&Project> {
        self.projects.get(&id).ok_or(WorkflowError::NotFound {
            entity: EntityRef::Project(id),
        })
    }

    fn phase(&self, id: PhaseId) -> WorkflowResult<&PhaseInstance> {
        self.phases.get(&id).ok_or(WorkflowError::NotFound {
            entity: EntityRef::Phase(id),
        })
    }

    fn task(&self, id: TaskId) -> WorkflowResult<&Task> {
        self.tasks.get(&id).ok_or(WorkflowError::NotFound {
            entity: EntityRef::Task(id),
        })
    }

    /// Server-side cascade after a task resolves.
    fn cascade_from_phase(&mut self, phase_id: PhaseId, policy: &WorkflowPolicy) {
        let Some(phase) = self.phases.get(&phase_id) else {
            return;
        };
        let tasks = self.tasks_of(phase_id);
        if tasks.is_empty() || !phase_gate::can_end(phase, tasks) {
            return;
        }
        let project_id = phase.project_id;
        if let Some(phase) = self.phases.get_mut(&phase_id) {
            phase.status = PhaseStatus::Completed;
            phase.ended_at.get_or_insert_with(Utc::now);
            tracing::debug!(phase = %phase_id, "Phase completed by cascade");
        }

        let Some(project) = self.projects.get(&project_id) else {
            return;
        };
        if project_gate::check_mark_complete(project, self.phases_of(project_id), policy).is_ok() {
            if let Some(project) = self.projects.get_mut(&project_id) {
                project.completed = true;
                tracing::debug!(project = %project_id, "Project completed by cascade");
            }
        }
    }
}

/// Workflow store held entirely in memory.
pub struct InMemoryWorkflowStore {
    state: RwLock<StoreState>,
    policy: WorkflowPolicy,
    cascade: bool,
    progression: bool,
    offline: AtomicBool,
    project_reads_down: AtomicBool,
    failures: Mutex<VecDeque<WorkflowError>>,
    mutations: AtomicUsize,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new(WorkflowPolicy::default())
    }
}

impl InMemoryWorkflowStore {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self {
            state: RwLock::new(StoreState {
                next_task_id: 1,
                ..Default::default()
            }),
            policy,
            cascade: false,
            progression: true,
            offline: AtomicBool::new(false),
            project_reads_down: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Complete a phase (and then its project) when its last task resolves.
    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    /// Whether `fetch_progression` answers; when off it reports `NotFound`.
    pub fn with_progression(mut self, progression: bool) -> Self {
        self.progression = progression;
        self
    }

    pub async fn insert_project(&self, project: Project) {
        self.state.write().await.projects.insert(project.id, project);
    }

    pub async fn insert_phase(&self, phase: PhaseInstance) {
        self.state.write().await.phases.insert(phase.id, phase);
    }

    /// Insert a task and link it to its phase.
    pub async fn insert_task(&self, task: Task) {
        let mut state = self.state.write().await;
        state.next_task_id = state.next_task_id.max(task.id.0 + 1);
        if let Some(phase) = state.phases.get_mut(&task.phase_id) {
            if !phase.task_ids.contains(&task.id) {
                phase.task_ids.push(task.id);
            }
        }
        state.tasks.insert(task.id, task);
    }

    /// While offline every call fails with `TransportUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, `fetch_project` alone fails with `TransportUnavailable`.
    pub fn set_project_reads_down(&self, down: bool) {
        self.project_reads_down.store(down, Ordering::SeqCst);
    }

    /// Queue an error for the next mutating call.
    pub fn fail_next(&self, error: WorkflowError) {
        self.failures_lock().push_back(error);
    }

    /// Mutating calls that reached the store and changed it.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    pub async fn phase(&self, id: PhaseId) -> Option<PhaseInstance> {
        self.state.read().await.phases.get(&id).cloned()
    }

    pub async fn project(&self, id: ProjectId) -> Option<Project> {
        self.state.read().await.projects.get(&id).cloned()
    }

    fn failures_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkflowError>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> WorkflowResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(WorkflowError::TransportUnavailable(
                "store offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn before_mutation(&self) -> WorkflowResult<()> {
        self.check_online()?;
        match self.failures_lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowRemote for InMemoryWorkflowStore {
    async fn fetch_project(&self, project: ProjectId) -> WorkflowResult<Project> {
        self.check_online()?;
        if self.project_reads_down.load(Ordering::SeqCst) {
            return Err(WorkflowError::TransportUnavailable(
                "project endpoint down".to_string(),
            ));
        }
        self.state.read().await.project(project).cloned()
    }

    async fn list_phases(&self, project: ProjectId) -> WorkflowResult<Vec<PhaseInstance>> {
        self.check_online()?;
        let state = self.state.read().await;
        state.project(project)?;
        Ok(state.phases_of(project).into_iter().cloned().collect())
    }

    async fn fetch_phase(&self, phase: PhaseId) -> WorkflowResult<PhaseInstance> {
        self.check_online()?;
        self.state.read().await.phase(phase).cloned()
    }

    async fn list_tasks(&self, phase: PhaseId) -> WorkflowResult<Vec<Task>> {
        self.check_online()?;
        let state = self.state.read().await;
        state.phase(phase)?;
        Ok(state.tasks_of(phase).into_iter().cloned().collect())
    }

    async fn fetch_task(&self, task: TaskId) -> WorkflowResult<Task> {
        self.check_online()?;
        self.state.read().await.task(task).cloned()
    }

    async fn fetch_progression(&self, project: ProjectId) -> WorkflowResult<Progression> {
        self.check_online()?;
        let state = self.state.read().await;
        state.project(project)?;
        if !self.progression {
            return Err(WorkflowError::NotFound {
                entity: EntityRef::Project(project),
            });
        }

        let phases = state.phases_of(project);
        let all_tasks: Vec<&Task> = phases
            .iter()
            .flat_map(|p| state.tasks_of(p.id))
            .collect();
        Ok(Progression {
            project: progress::phase_progress(all_tasks),
            phases: phases
                .iter()
                .map(|p| PhaseProgression {
                    phase_id: p.id,
                    percent: progress::phase_progress(state.tasks_of(p.id)),
                })
                .collect(),
        })
    }

    async fn transition_task(&self, task: TaskId, action: TaskAction) -> WorkflowResult<Task> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let mut updated = state.task(task)?.clone();
        task_engine::apply_transition(&mut updated, action, &self.policy, Utc::now())?;
        let phase_id = updated.phase_id;
        state.tasks.insert(task, updated);
        self.record_mutation();

        if self.cascade && matches!(action.target(), TaskStatus::Completed | TaskStatus::Cancelled)
        {
            state.cascade_from_phase(phase_id, &self.policy);
        }
        state.task(task).cloned()
    }

    async fn update_task(&self, task: TaskId, edit: &TaskEdit) -> WorkflowResult<Task> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let mut updated = state.task(task)?.clone();
        task_engine::apply_edit(&mut updated, edit);
        state.tasks.insert(task, updated.clone());
        self.record_mutation();
        Ok(updated)
    }

    async fn create_task(&self, phase: PhaseId, task: &NewTask) -> WorkflowResult<Task> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        state.phase(phase)?;
        let id = TaskId(state.next_task_id);
        state.next_task_id += 1;
        let created = Task {
            id,
            phase_id: phase,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: TaskStatus::Pending,
            assignee: task.assignee,
            planned_start: task.planned_start,
            planned_end: task.planned_end,
            actual_start: None,
            actual_end: None,
            progress: None,
            notes: String::new(),
        };
        if let Some(p) = state.phases.get_mut(&phase) {
            p.task_ids.push(id);
        }
        state.tasks.insert(id, created.clone());
        self.record_mutation();
        Ok(created)
    }

    async fn delete_task(&self, task: TaskId) -> WorkflowResult<()> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let removed = state.tasks.remove(&task).ok_or(WorkflowError::NotFound {
            entity: EntityRef::Task(task),
        })?;
        if let Some(p) = state.phases.get_mut(&removed.phase_id) {
            p.task_ids.retain(|id| *id != task);
        }
        self.record_mutation();
        Ok(())
    }

    async fn transition_phase(
        &self,
        phase: PhaseId,
        action: PhaseAction,
    ) -> WorkflowResult<PhaseInstance> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let mut updated = state.phase(phase)?.clone();
        phase_gate::apply_transition(&mut updated, action, state.tasks_of(phase), Utc::now())?;
        state.phases.insert(phase, updated.clone());
        self.record_mutation();
        Ok(updated)
    }

    async fn update_phase(
        &self,
        phase: PhaseId,
        edit: &PhaseEdit,
    ) -> WorkflowResult<PhaseInstance> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let mut updated = state.phase(phase)?.clone();
        phase_gate::apply_edit(&mut updated, edit);
        state.phases.insert(phase, updated.clone());
        self.record_mutation();
        Ok(updated)
    }

    async fn project_eligibility(&self, project: ProjectId) -> WorkflowResult<Eligibility> {
        self.check_online()?;
        let state = self.state.read().await;
        let p = state.project(project)?;
        Ok(project_gate::eligibility(
            p,
            state.phases_of(project),
            &self.policy,
        ))
    }

    async fn set_project_completed(
        &self,
        project: ProjectId,
        completed: bool,
    ) -> WorkflowResult<Project> {
        self.before_mutation()?;
        let mut state = self.state.write().await;
        let mut updated = state.project(project)?.clone();
        project_gate::apply_completion(
            &mut updated,
            completed,
            state.phases_of(project),
            &self.policy,
        )?;
        state.projects.insert(project, updated.clone());
        self.record_mutation();
        Ok(updated)
    }
}
