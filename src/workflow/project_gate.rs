//! Project completion gate.

use serde::{Deserialize, Serialize};

use super::error::{Blocker, EntityRef, WorkflowError, WorkflowResult};
use super::policy::WorkflowPolicy;
use super::types::{PhaseInstance, PhaseStatus, Project};

/// Whether the completion action should be offered at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub can_complete: bool,
    #[serde(default)]
    pub blocking_phases: Vec<Blocker>,
    #[serde(default)]
    pub already_complete: bool,
}

fn phase_resolved(phase: &PhaseInstance, policy: &WorkflowPolicy) -> bool {
    match phase.status {
        PhaseStatus::Completed => true,
        PhaseStatus::Skipped => policy.skipped_phase_resolves_project,
        PhaseStatus::NotStarted | PhaseStatus::InProgress => false,
    }
}

/// Phases preventing completion, in display order.
pub fn blocking_phases<'a>(
    phases: impl IntoIterator<Item = &'a PhaseInstance>,
    policy: &WorkflowPolicy,
) -> Vec<Blocker> {
    let mut open: Vec<&PhaseInstance> = phases
        .into_iter()
        .filter(|p| !phase_resolved(p, policy))
        .collect();
    open.sort_by_key(|p| p.order());
    open.into_iter()
        .map(|p| Blocker {
            id: p.id.0,
            title: p.name().to_string(),
        })
        .collect()
}

pub fn eligibility<'a>(
    project: &Project,
    phases: impl IntoIterator<Item = &'a PhaseInstance>,
    policy: &WorkflowPolicy,
) -> Eligibility {
    let blocking = blocking_phases(phases, policy);
    Eligibility {
        can_complete: !project.completed && blocking.is_empty(),
        blocking_phases: blocking,
        already_complete: project.completed,
    }
}

pub fn check_mark_complete<'a>(
    project: &Project,
    phases: impl IntoIterator<Item = &'a PhaseInstance>,
    policy: &WorkflowPolicy,
) -> WorkflowResult<()> {
    if project.completed {
        return Err(WorkflowError::AlreadyCompleted {
            entity: EntityRef::Project(project.id),
        });
    }
    let blocking = blocking_phases(phases, policy);
    if blocking.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::BlockedByIncompletePhases {
            project: project.id,
            blockers: blocking,
        })
    }
}

/// Set or clear the completion flag. Clearing is always permitted.
pub fn apply_completion<'a>(
    project: &mut Project,
    completed: bool,
    phases: impl IntoIterator<Item = &'a PhaseInstance>,
    policy: &WorkflowPolicy,
) -> WorkflowResult<()> {
    if completed {
        check_mark_complete(project, phases, policy)?;
    }
    project.completed = completed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{PhaseId, PhaseTemplate, ProjectId, ProjectStatus};

    fn project(completed: bool) -> Project {
        Project {
            id: ProjectId(1),
            name: "Depot".to_string(),
            status: ProjectStatus::InProgress,
            completed,
            progress: None,
        }
    }

    fn phase(id: i64, order: u32, status: PhaseStatus) -> PhaseInstance {
        PhaseInstance {
            id: PhaseId(id),
            project_id: ProjectId(1),
            template: PhaseTemplate {
                id,
                name: format!("Phase {}", order),
                description: String::new(),
                order,
            },
            status,
            started_at: None,
            ended_at: None,
            comment: String::new(),
            task_ids: vec![],
        }
    }

    #[test]
    fn blockers_listed_in_order() {
        let phases = vec![
            phase(10, 3, PhaseStatus::InProgress),
            phase(11, 1, PhaseStatus::Completed),
            phase(12, 2, PhaseStatus::NotStarted),
        ];
        let e = eligibility(&project(false), &phases, &WorkflowPolicy::default());
        assert!(!e.can_complete);
        assert!(!e.already_complete);
        let ids: Vec<i64> = e.blocking_phases.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![12, 10]);
    }

    #[test]
    fn skipped_phase_follows_policy() {
        let phases = vec![
            phase(1, 1, PhaseStatus::Completed),
            phase(2, 2, PhaseStatus::Skipped),
        ];
        assert!(check_mark_complete(&project(false), &phases, &WorkflowPolicy::default()).is_ok());
        assert!(matches!(
            check_mark_complete(&project(false), &phases, &WorkflowPolicy::strict()),
            Err(WorkflowError::BlockedByIncompletePhases { .. })
        ));
    }

    #[test]
    fn already_complete_is_reported() {
        let phases = vec![phase(1, 1, PhaseStatus::Completed)];
        let e = eligibility(&project(true), &phases, &WorkflowPolicy::default());
        assert!(e.already_complete);
        assert!(!e.can_complete);
        assert_eq!(
            check_mark_complete(&project(true), &phases, &WorkflowPolicy::default()),
            Err(WorkflowError::AlreadyCompleted {
                entity: EntityRef::Project(ProjectId(1))
            })
        );
    }

    #[test]
    fn mark_incomplete_is_unconditional() {
        let mut p = project(true);
        let phases = vec![phase(1, 1, PhaseStatus::NotStarted)];
        apply_completion(&mut p, false, &phases, &WorkflowPolicy::default()).unwrap();
        assert!(!p.completed);
    }
}
