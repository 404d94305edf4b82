//! Phase completion gate.
//!
//! A phase reaches `completed` only when every task it owns is `completed` or
//! `cancelled`. [`can_end`] is the advisory flag collaborators use to enable the
//! end action; [`check_end`] is the check the store applies at `end` time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Blocker, EntityRef, WorkflowError, WorkflowResult};
use super::types::{PhaseEdit, PhaseInstance, PhaseStatus, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAction {
    Start,
    End,
    Skip,
}

impl PhaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Skip => "skip",
        }
    }

    pub fn target(&self) -> PhaseStatus {
        match self {
            Self::Start => PhaseStatus::InProgress,
            Self::End => PhaseStatus::Completed,
            Self::Skip => PhaseStatus::Skipped,
        }
    }
}

impl std::fmt::Display for PhaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tasks still open under the phase, in the order given.
pub fn blockers<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<Blocker> {
    tasks
        .into_iter()
        .filter(|t| !t.status.is_resolved())
        .map(|t| Blocker {
            id: t.id.0,
            title: t.title.clone(),
        })
        .collect()
}

/// Advisory: could `end` succeed right now.
pub fn can_end<'a>(phase: &PhaseInstance, tasks: impl IntoIterator<Item = &'a Task>) -> bool {
    phase.status == PhaseStatus::InProgress && tasks.into_iter().all(|t| t.status.is_resolved())
}

/// Status after `start`. Only a phase that has not started may start.
pub fn check_start(phase: &PhaseInstance) -> WorkflowResult<PhaseStatus> {
    let entity = EntityRef::Phase(phase.id);
    match phase.status {
        PhaseStatus::NotStarted => Ok(PhaseStatus::InProgress),
        PhaseStatus::Completed => Err(WorkflowError::AlreadyCompleted { entity }),
        other => Err(WorkflowError::invalid(
            entity,
            format!("cannot start a phase that is {}", other),
        )),
    }
}

/// Status after `end`. The phase must be in progress and every task resolved;
/// otherwise the open tasks come back as blockers.
pub fn check_end<'a>(
    phase: &PhaseInstance,
    tasks: impl IntoIterator<Item = &'a Task>,
) -> WorkflowResult<PhaseStatus> {
    let entity = EntityRef::Phase(phase.id);
    match phase.status {
        PhaseStatus::InProgress => {
            let blocking = blockers(tasks);
            if blocking.is_empty() {
                Ok(PhaseStatus::Completed)
            } else {
                Err(WorkflowError::BlockedByIncompleteTasks {
                    phase: phase.id,
                    blockers: blocking,
                })
            }
        }
        PhaseStatus::Completed => Err(WorkflowError::AlreadyCompleted { entity }),
        PhaseStatus::NotStarted => Err(WorkflowError::NotStarted { phase: phase.id }),
        PhaseStatus::Skipped => Err(WorkflowError::invalid(
            entity,
            "cannot end a skipped phase",
        )),
    }
}

/// Status after `skip`, allowed from `not_started` or `in_progress`.
pub fn check_skip(phase: &PhaseInstance) -> WorkflowResult<PhaseStatus> {
    let entity = EntityRef::Phase(phase.id);
    match phase.status {
        PhaseStatus::NotStarted | PhaseStatus::InProgress => Ok(PhaseStatus::Skipped),
        PhaseStatus::Completed => Err(WorkflowError::AlreadyCompleted { entity }),
        PhaseStatus::Skipped => Err(WorkflowError::invalid(entity, "phase is already skipped")),
    }
}

pub fn check_transition<'a>(
    phase: &PhaseInstance,
    action: PhaseAction,
    tasks: impl IntoIterator<Item = &'a Task>,
) -> WorkflowResult<PhaseStatus> {
    match action {
        PhaseAction::Start => check_start(phase),
        PhaseAction::End => check_end(phase, tasks),
        PhaseAction::Skip => check_skip(phase),
    }
}

/// Apply `action`, stamping start/end times that were not set explicitly.
pub fn apply_transition<'a>(
    phase: &mut PhaseInstance,
    action: PhaseAction,
    tasks: impl IntoIterator<Item = &'a Task>,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let next = check_transition(phase, action, tasks)?;
    phase.status = next;
    match action {
        PhaseAction::Start => {
            phase.started_at.get_or_insert(now);
        }
        PhaseAction::End | PhaseAction::Skip => {
            phase.ended_at.get_or_insert(now);
        }
    }
    Ok(())
}

/// Overwrite the fields `edit` names. Status never changes.
pub fn apply_edit(phase: &mut PhaseInstance, edit: &PhaseEdit) {
    if let Some(comment) = &edit.comment {
        phase.comment = comment.clone();
    }
    if let Some(started_at) = edit.started_at {
        phase.started_at = started_at;
    }
    if let Some(ended_at) = edit.ended_at {
        phase.ended_at = ended_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{
        PhaseId, PhaseTemplate, ProjectId, TaskId, TaskPriority, TaskStatus,
    };

    fn phase(status: PhaseStatus) -> PhaseInstance {
        PhaseInstance {
            id: PhaseId(3),
            project_id: ProjectId(1),
            template: PhaseTemplate {
                id: 1,
                name: "Build".to_string(),
                description: String::new(),
                order: 2,
            },
            status,
            started_at: None,
            ended_at: None,
            comment: String::new(),
            task_ids: vec![],
        }
    }

    fn task(id: i64, title: &str, status: TaskStatus) -> Task {
        Task {
            id: TaskId(id),
            phase_id: PhaseId(3),
            title: title.to_string(),
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
    fn end_is_blocked_by_open_tasks() {
        let p = phase(PhaseStatus::InProgress);
        let tasks = vec![
            task(1, "Frame", TaskStatus::Completed),
            task(2, "Roof", TaskStatus::Completed),
            task(3, "Windows", TaskStatus::Pending),
        ];
        assert!(!can_end(&p, &tasks));
        match check_end(&p, &tasks) {
            Err(WorkflowError::BlockedByIncompleteTasks { phase, blockers }) => {
                assert_eq!(phase, PhaseId(3));
                assert_eq!(
                    blockers,
                    vec![Blocker {
                        id: 3,
                        title: "Windows".to_string()
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_tasks_count_as_resolved() {
        let p = phase(PhaseStatus::InProgress);
        let tasks = vec![
            task(1, "A", TaskStatus::Completed),
            task(2, "B", TaskStatus::Cancelled),
        ];
        assert!(can_end(&p, &tasks));
        assert_eq!(check_end(&p, &tasks).unwrap(), PhaseStatus::Completed);
    }

    #[test]
    fn empty_phase_can_end_once_started() {
        assert!(can_end(&phase(PhaseStatus::InProgress), &[]));
        assert!(!can_end(&phase(PhaseStatus::NotStarted), &[]));
    }

    #[test]
    fn end_failure_taxonomy() {
        let tasks: Vec<Task> = vec![];
        assert_eq!(
            check_end(&phase(PhaseStatus::NotStarted), &tasks),
            Err(WorkflowError::NotStarted { phase: PhaseId(3) })
        );
        assert_eq!(
            check_end(&phase(PhaseStatus::Completed), &tasks),
            Err(WorkflowError::AlreadyCompleted {
                entity: EntityRef::Phase(PhaseId(3))
            })
        );
        assert!(matches!(
            check_end(&phase(PhaseStatus::Skipped), &tasks),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn start_only_when_not_started() {
        assert!(check_start(&phase(PhaseStatus::NotStarted)).is_ok());
        assert!(check_start(&phase(PhaseStatus::InProgress)).is_err());
        assert!(check_start(&phase(PhaseStatus::Skipped)).is_err());
    }

    #[test]
    fn skip_from_open_statuses() {
        assert!(check_skip(&phase(PhaseStatus::NotStarted)).is_ok());
        assert!(check_skip(&phase(PhaseStatus::InProgress)).is_ok());
        assert!(check_skip(&phase(PhaseStatus::Completed)).is_err());
    }

    #[test]
    fn apply_keeps_explicit_dates() {
        let explicit = "2026-03-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut p = phase(PhaseStatus::NotStarted);
        p.started_at = Some(explicit);
        apply_transition(&mut p, PhaseAction::Start, &[], Utc::now()).unwrap();
        assert_eq!(p.status, PhaseStatus::InProgress);
        assert_eq!(p.started_at, Some(explicit));

        let now = Utc::now();
        apply_transition(&mut p, PhaseAction::End, &[], now).unwrap();
        assert_eq!(p.ended_at, Some(now));
    }

    #[test]
    fn edit_touches_only_named_fields() {
        let started = "2026-02-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut p = phase(PhaseStatus::Completed);
        p.started_at = Some(started);
        p.ended_at = Some(started);

        apply_edit(
            &mut p,
            &PhaseEdit {
                comment: Some("Signed off".to_string()),
                ended_at: Some(None),
                ..Default::default()
            },
        );
        assert_eq!(p.status, PhaseStatus::Completed);
        assert_eq!(p.comment, "Signed off");
        assert_eq!(p.started_at, Some(started));
        assert_eq!(p.ended_at, None);
    }
}
