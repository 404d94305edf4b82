//! Progress percentages at task, phase and project granularity.
//!
//! Nothing here is cached. Callers recompute from the current entities on every
//! read, so a percentage can never outlive the mutation that changed it.

use serde::{Deserialize, Serialize};

use super::types::{PhaseId, PhaseInstance, PhaseStatus, ProjectId, Task, TaskStatus};

/// `numerator / denominator × 100`, rounded half up. Zero denominator is 0.
fn percent(numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return 0;
    }
    let numerator = numerator.min(denominator);
    ((numerator * 100 + denominator / 2) / denominator) as u8
}

/// The task's own percentage when set, otherwise 100 for completed and 0 for
/// anything else.
pub fn task_progress(task: &Task) -> u8 {
    match task.progress {
        Some(p) => p.min(100),
        None if task.status == TaskStatus::Completed => 100,
        None => 0,
    }
}

/// Completed tasks over all tasks. Cancelled tasks stay in the denominator.
pub fn phase_progress<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> u8 {
    let mut total = 0;
    let mut done = 0;
    for task in tasks {
        total += 1;
        if task.status == TaskStatus::Completed {
            done += 1;
        }
    }
    percent(done, total)
}

/// Server aggregate when supplied, else completed phases over all phases.
pub fn project_progress<'a>(
    server_aggregate: Option<u8>,
    phases: impl IntoIterator<Item = &'a PhaseInstance>,
) -> u8 {
    if let Some(p) = server_aggregate {
        return p.min(100);
    }
    let mut total = 0;
    let mut done = 0;
    for phase in phases {
        total += 1;
        if phase.status == PhaseStatus::Completed {
            done += 1;
        }
    }
    percent(done, total)
}

/// Snapshot of one phase as presented to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase_id: PhaseId,
    pub order: u32,
    pub status: PhaseStatus,
    pub percent: u8,
    /// Advisory flag for the end action
    pub can_end: bool,
}

/// Snapshot of a project's progress at every level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProgress {
    pub project_id: ProjectId,
    pub percent: u8,
    pub completed: bool,
    /// In display order
    pub phases: Vec<PhaseProgress>,
}

impl ProjectProgress {
    pub fn phase(&self, id: PhaseId) -> Option<&PhaseProgress> {
        self.phases.iter().find(|p| p.phase_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{PhaseTemplate, TaskId, TaskPriority};

    fn task(status: TaskStatus, progress: Option<u8>) -> Task {
        Task {
            id: TaskId(1),
            phase_id: PhaseId(1),
            title: "t".to_string(),
            description: String::new(),
            priority: TaskPriority::Normal,
            status,
            assignee: None,
            planned_start: None,
            planned_end: None,
            actual_start: None,
            actual_end: None,
            progress,
            notes: String::new(),
        }
    }

    fn phase(status: PhaseStatus) -> PhaseInstance {
        PhaseInstance {
            id: PhaseId(1),
            project_id: ProjectId(1),
            template: PhaseTemplate {
                id: 1,
                name: "Design".to_string(),
                description: String::new(),
                order: 1,
            },
            status,
            started_at: None,
            ended_at: None,
            comment: String::new(),
            task_ids: vec![],
        }
    }

    #[test]
    fn task_level_prefers_author_value() {
        assert_eq!(task_progress(&task(TaskStatus::InProgress, Some(40))), 40);
        assert_eq!(task_progress(&task(TaskStatus::Completed, None)), 100);
        assert_eq!(task_progress(&task(TaskStatus::Cancelled, None)), 0);
        assert_eq!(task_progress(&task(TaskStatus::Pending, Some(250))), 100);
    }

    #[test]
    fn phase_level_counts_cancelled_in_denominator() {
        let tasks = vec![
            task(TaskStatus::Completed, None),
            task(TaskStatus::Completed, None),
            task(TaskStatus::Completed, None),
            task(TaskStatus::Cancelled, None),
        ];
        assert_eq!(phase_progress(&tasks), 75);
        assert_eq!(phase_progress(&[]), 0);
    }

    #[test]
    fn phase_level_rounds() {
        let tasks = vec![
            task(TaskStatus::Completed, None),
            task(TaskStatus::Pending, None),
            task(TaskStatus::Pending, None),
        ];
        assert_eq!(phase_progress(&tasks), 33);
        let tasks = vec![
            task(TaskStatus::Completed, None),
            task(TaskStatus::Completed, None),
            task(TaskStatus::Pending, None),
        ];
        assert_eq!(phase_progress(&tasks), 67);
    }

    #[test]
    fn cancelling_completed_work_never_raises_progress() {
        let mut tasks = vec![
            task(TaskStatus::Completed, None),
            task(TaskStatus::Completed, None),
            task(TaskStatus::Pending, None),
        ];
        let before = phase_progress(&tasks);
        tasks[0].status = TaskStatus::Cancelled;
        assert!(phase_progress(&tasks) <= before);
    }

    #[test]
    fn project_level_prefers_server_aggregate() {
        let phases = vec![phase(PhaseStatus::Completed), phase(PhaseStatus::InProgress)];
        assert_eq!(project_progress(Some(42), &phases), 42);
        assert_eq!(project_progress(None, &phases), 50);
        assert_eq!(project_progress(None, &[]), 0);
    }
}
