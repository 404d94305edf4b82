//! Error taxonomy for workflow operations and its mapping from store rejections.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{PhaseId, ProjectId, TaskId};

/// Reference to any entity in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Project(ProjectId),
    Phase(PhaseId),
    Task(TaskId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => id.fmt(f),
            Self::Phase(id) => id.fmt(f),
            Self::Task(id) => id.fmt(f),
        }
    }
}

/// An entity preventing a gated transition, as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("{entity}: {reason}")]
    InvalidTransition { entity: EntityRef, reason: String },

    #[error("{phase} still has {} unresolved task(s)", .blockers.len())]
    BlockedByIncompleteTasks {
        phase: PhaseId,
        blockers: Vec<Blocker>,
    },

    #[error("{project} still has {} unfinished phase(s)", .blockers.len())]
    BlockedByIncompletePhases {
        project: ProjectId,
        blockers: Vec<Blocker>,
    },

    #[error("{entity} is already completed")]
    AlreadyCompleted { entity: EntityRef },

    #[error("{phase} has not been started")]
    NotStarted { phase: PhaseId },

    #[error("{entity} no longer exists")]
    NotFound { entity: EntityRef },

    #[error("Workflow store unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Notification channel disconnected: {0}")]
    ChannelDisconnected(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn invalid(entity: EntityRef, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            entity,
            reason: reason.into(),
        }
    }

    /// Expected outcomes the user can act on; shown with their enumeration.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::BlockedByIncompleteTasks { .. }
                | Self::BlockedByIncompletePhases { .. }
                | Self::AlreadyCompleted { .. }
                | Self::NotStarted { .. }
        )
    }

    /// Failures worth retrying as-is once the store is reachable again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_) | Self::NotFound { .. })
    }

    /// Entities blocking the transition, if this is a gating rejection.
    pub fn blockers(&self) -> &[Blocker] {
        match self {
            Self::BlockedByIncompleteTasks { blockers, .. }
            | Self::BlockedByIncompletePhases { blockers, .. } => blockers,
            _ => &[],
        }
    }

    /// Text for the presentation layer. `None` means the failure stays silent.
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            Self::InvalidTransition { reason, .. } => {
                format!("This action is not allowed: {}", reason)
            }
            Self::BlockedByIncompleteTasks { blockers, .. } => format!(
                "The phase cannot be ended while these tasks are open: {}",
                join_titles(blockers)
            ),
            Self::BlockedByIncompletePhases { blockers, .. } => format!(
                "The project cannot be completed while these phases are unfinished: {}",
                join_titles(blockers)
            ),
            Self::AlreadyCompleted { entity } => match entity {
                EntityRef::Project(_) => "This project is already completed".to_string(),
                EntityRef::Phase(_) => "This phase is already completed".to_string(),
                EntityRef::Task(_) => "This task is already completed".to_string(),
            },
            Self::NotStarted { .. } => {
                "The phase must be started before it can be ended".to_string()
            }
            Self::NotFound { .. } | Self::TransportUnavailable(_) => {
                "The operation could not be completed. Please try again.".to_string()
            }
            Self::ChannelDisconnected(_) => return None,
        };
        Some(message)
    }
}

fn join_titles(blockers: &[Blocker]) -> String {
    blockers
        .iter()
        .map(|b| b.title.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Store rejections
// ─────────────────────────────────────────────────────────────────────────────

/// Structured rejection body returned by the store for a refused mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRejection {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub blockers: Vec<Blocker>,
}

impl RemoteRejection {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            blockers: Vec::new(),
        }
    }

    /// Map the rejection onto the taxonomy for the entity the call targeted.
    pub fn into_error(self, entity: EntityRef) -> WorkflowError {
        match (self.code.as_str(), entity) {
            ("blocked_by_incomplete_tasks", EntityRef::Phase(phase)) => {
                WorkflowError::BlockedByIncompleteTasks {
                    phase,
                    blockers: self.blockers,
                }
            }
            ("blocked_by_incomplete_phases", EntityRef::Project(project)) => {
                WorkflowError::BlockedByIncompletePhases {
                    project,
                    blockers: self.blockers,
                }
            }
            ("already_completed", _) => WorkflowError::AlreadyCompleted { entity },
            ("not_started", EntityRef::Phase(phase)) => WorkflowError::NotStarted { phase },
            ("not_found", _) => WorkflowError::NotFound { entity },
            _ => {
                let reason = if self.message.is_empty() {
                    self.code
                } else {
                    self.message
                };
                WorkflowError::InvalidTransition { entity, reason }
            }
        }
    }
}

/// Class of an HTTP status returned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 404
    Missing,
    /// 400, 409, 422: the store refused the mutation
    Rejected,
    /// 5xx, auth failures and anything unexpected
    Unavailable,
}

pub fn classify_http_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::Missing,
        400 | 409 | 422 => StatusClass::Rejected,
        _ => StatusClass::Unavailable,
    }
}

/// Build the error for a non-success store response.
pub fn error_from_response(status: u16, body: &str, entity: EntityRef) -> WorkflowError {
    match classify_http_status(status) {
        StatusClass::Missing => WorkflowError::NotFound { entity },
        StatusClass::Rejected => match serde_json::from_str::<RemoteRejection>(body) {
            Ok(rejection) => rejection.into_error(entity),
            Err(_) => WorkflowError::invalid(entity, body.trim().to_string()),
        },
        StatusClass::Success | StatusClass::Unavailable => {
            WorkflowError::TransportUnavailable(format!("HTTP {} - {}", status, body.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_map_to_taxonomy() {
        let phase = EntityRef::Phase(PhaseId(9));
        let rejection = RemoteRejection {
            code: "blocked_by_incomplete_tasks".to_string(),
            message: "open work".to_string(),
            blockers: vec![Blocker {
                id: 31,
                title: "Wiring".to_string(),
            }],
        };
        match rejection.into_error(phase) {
            WorkflowError::BlockedByIncompleteTasks { phase, blockers } => {
                assert_eq!(phase, PhaseId(9));
                assert_eq!(blockers.len(), 1);
                assert_eq!(blockers[0].title, "Wiring");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            RemoteRejection::new("already_completed", "").into_error(phase),
            WorkflowError::AlreadyCompleted { entity: phase }
        );
        assert_eq!(
            RemoteRejection::new("not_started", "").into_error(phase),
            WorkflowError::NotStarted { phase: PhaseId(9) }
        );
    }

    #[test]
    fn unknown_codes_become_invalid_transitions() {
        let task = EntityRef::Task(TaskId(2));
        let err = RemoteRejection::new("frozen", "Task is locked by review").into_error(task);
        assert_eq!(
            err,
            WorkflowError::invalid(task, "Task is locked by review")
        );
    }

    #[test]
    fn http_status_classification() {
        let task = EntityRef::Task(TaskId(5));
        assert_eq!(
            error_from_response(404, "", task),
            WorkflowError::NotFound { entity: task }
        );
        assert!(matches!(
            error_from_response(503, "maintenance", task),
            WorkflowError::TransportUnavailable(_)
        ));
        assert_eq!(
            error_from_response(
                409,
                r#"{"code":"invalid_transition","message":"Task is cancelled"}"#,
                task
            ),
            WorkflowError::invalid(task, "Task is cancelled")
        );
        assert_eq!(
            error_from_response(400, "plain text", task),
            WorkflowError::invalid(task, "plain text")
        );
    }

    #[test]
    fn user_messages_follow_the_policy() {
        let blocked = WorkflowError::BlockedByIncompleteTasks {
            phase: PhaseId(1),
            blockers: vec![
                Blocker {
                    id: 1,
                    title: "Survey".to_string(),
                },
                Blocker {
                    id: 2,
                    title: "Permit".to_string(),
                },
            ],
        };
        assert!(blocked.is_actionable());
        assert!(!blocked.is_retryable());
        let msg = blocked.user_message().unwrap();
        assert!(msg.contains("Survey, Permit"));

        let transport = WorkflowError::TransportUnavailable("reset".to_string());
        assert!(transport.is_retryable());
        assert_eq!(
            transport.user_message().unwrap(),
            "The operation could not be completed. Please try again."
        );

        assert!(WorkflowError::ChannelDisconnected("eof".to_string())
            .user_message()
            .is_none());
    }
}
