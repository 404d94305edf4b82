//! Task status engine.
//!
//! Pure transition rules for a single task. The reconciliation loop uses them
//! to decide whether an optimistic write is plausible; the store runs the same
//! rules as the binding check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{EntityRef, WorkflowError, WorkflowResult};
use super::policy::WorkflowPolicy;
use super::types::{Task, TaskEdit, TaskStatus};

/// Status mutations a task supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Complete,
    Cancel,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }

    pub fn target(&self) -> TaskStatus {
        match self {
            Self::Start => TaskStatus::InProgress,
            Self::Complete => TaskStatus::Completed,
            Self::Cancel => TaskStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate `action` against the task's current status.
///
/// Returns the status the task would move to.
pub fn check_transition(
    task: &Task,
    action: TaskAction,
    policy: &WorkflowPolicy,
) -> WorkflowResult<TaskStatus> {
    let entity = EntityRef::Task(task.id);
    let from = task.status;

    match (action, from) {
        (TaskAction::Start, TaskStatus::Pending) => Ok(TaskStatus::InProgress),
        (TaskAction::Start, _) => Err(WorkflowError::invalid(
            entity,
            format!("cannot start a task that is {}", from),
        )),

        (TaskAction::Complete, TaskStatus::InProgress) => Ok(TaskStatus::Completed),
        (TaskAction::Complete, TaskStatus::Pending) if policy.allow_complete_from_pending => {
            Ok(TaskStatus::Completed)
        }
        (TaskAction::Complete, TaskStatus::Pending) => Err(WorkflowError::invalid(
            entity,
            "a task must be started before it can be completed",
        )),
        (TaskAction::Complete, TaskStatus::Completed) => {
            Err(WorkflowError::AlreadyCompleted { entity })
        }
        (TaskAction::Complete, TaskStatus::Cancelled) => Err(WorkflowError::invalid(
            entity,
            "cannot complete a cancelled task",
        )),

        (TaskAction::Cancel, TaskStatus::Pending | TaskStatus::InProgress) => {
            Ok(TaskStatus::Cancelled)
        }
        (TaskAction::Cancel, _) => Err(WorkflowError::invalid(
            entity,
            format!("cannot cancel a task that is {}", from),
        )),
    }
}

/// Apply `action` to the task, stamping the actual start/end time.
pub fn apply_transition(
    task: &mut Task,
    action: TaskAction,
    policy: &WorkflowPolicy,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let next = check_transition(task, action, policy)?;
    task.status = next;
    match action {
        TaskAction::Start => task.actual_start = Some(now),
        TaskAction::Complete => {
            if task.actual_start.is_none() {
                task.actual_start = Some(now);
            }
            task.actual_end = Some(now);
        }
        TaskAction::Cancel => {}
    }
    Ok(())
}

/// Apply field changes. Never touches the status.
pub fn apply_edit(task: &mut Task, edit: &TaskEdit) {
    if let Some(title) = &edit.title {
        task.title = title.clone();
    }
    if let Some(description) = &edit.description {
        task.description = description.clone();
    }
    if let Some(priority) = edit.priority {
        task.priority = priority;
    }
    if let Some(assignee) = edit.assignee {
        task.assignee = assignee;
    }
    if let Some(planned_start) = edit.planned_start {
        task.planned_start = planned_start;
    }
    if let Some(planned_end) = edit.planned_end {
        task.planned_end = planned_end;
    }
    if let Some(progress) = edit.progress {
        task.progress = progress.map(|p| p.min(100));
    }
    if let Some(notes) = &edit.notes {
        task.notes = notes.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{PhaseId, TaskId, TaskPriority, UserId};

    fn task(status: TaskStatus) -> Task {
        Task {
            id: TaskId(1),
            phase_id: PhaseId(1),
            title: "Excavation".to_string(),
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

    #[test]
    fn start_only_from_pending() {
        let policy = WorkflowPolicy::default();
        assert_eq!(
            check_transition(&task(TaskStatus::Pending), TaskAction::Start, &policy).unwrap(),
            TaskStatus::InProgress
        );
        for status in [
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert!(matches!(
                check_transition(&task(status), TaskAction::Start, &policy),
                Err(WorkflowError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn complete_from_pending_follows_policy() {
        let pending = task(TaskStatus::Pending);
        assert!(
            check_transition(&pending, TaskAction::Complete, &WorkflowPolicy::default()).is_ok()
        );
        assert!(matches!(
            check_transition(&pending, TaskAction::Complete, &WorkflowPolicy::strict()),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn completing_twice_is_already_completed() {
        let err = check_transition(
            &task(TaskStatus::Completed),
            TaskAction::Complete,
            &WorkflowPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::AlreadyCompleted {
                entity: EntityRef::Task(TaskId(1))
            }
        );
    }

    #[test]
    fn cancelled_task_cannot_complete() {
        assert!(matches!(
            check_transition(
                &task(TaskStatus::Cancelled),
                TaskAction::Complete,
                &WorkflowPolicy::default()
            ),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_from_open_statuses_only() {
        let policy = WorkflowPolicy::default();
        assert!(check_transition(&task(TaskStatus::Pending), TaskAction::Cancel, &policy).is_ok());
        assert!(
            check_transition(&task(TaskStatus::InProgress), TaskAction::Cancel, &policy).is_ok()
        );
        assert!(
            check_transition(&task(TaskStatus::Completed), TaskAction::Cancel, &policy).is_err()
        );
    }

    #[test]
    fn apply_stamps_timestamps() {
        let policy = WorkflowPolicy::default();
        let now = Utc::now();
        let mut t = task(TaskStatus::Pending);
        apply_transition(&mut t, TaskAction::Start, &policy, now).unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.actual_start, Some(now));
        assert!(t.actual_end.is_none());

        apply_transition(&mut t, TaskAction::Complete, &policy, now).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.actual_end, Some(now));
    }

    #[test]
    fn failed_apply_leaves_task_untouched() {
        let mut t = task(TaskStatus::Cancelled);
        let before = t.clone();
        assert!(apply_transition(
            &mut t,
            TaskAction::Complete,
            &WorkflowPolicy::default(),
            Utc::now()
        )
        .is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn edit_does_not_change_status() {
        let mut t = task(TaskStatus::InProgress);
        apply_edit(
            &mut t,
            &TaskEdit {
                title: Some("Backfill".to_string()),
                priority: Some(TaskPriority::Critical),
                assignee: Some(Some(UserId(12))),
                progress: Some(Some(140)),
                ..Default::default()
            },
        );
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.title, "Backfill");
        assert_eq!(t.priority, TaskPriority::Critical);
        assert_eq!(t.assignee, Some(UserId(12)));
        assert_eq!(t.progress, Some(100));
    }
}
