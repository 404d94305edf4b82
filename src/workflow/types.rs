//! Types for the project / phase / task hierarchy.
//!
//! Every entity carries exactly one status enum, so a phase that is both
//! finished and running cannot be built.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a project.
    ProjectId,
    "project"
);
entity_id!(
    /// Identity of a phase instance (not the shared template).
    PhaseId,
    "phase"
);
entity_id!(
    /// Identity of a task ("étape").
    TaskId,
    "task"
);
entity_id!(
    /// Identity of a user that can be assigned to a task.
    UserId,
    "user"
);

// ─────────────────────────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Overall status of a project. Independent from the completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
    OverDue,
    Rejected,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::OverDue => "over_due",
            Self::Rejected => "rejected",
        }
    }
}

/// Lifecycle of a phase instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
    /// Terminal, reachable from `NotStarted` or `InProgress`
    Skipped,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    /// Completed or skipped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// A resolved task no longer blocks its phase from ending.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────────

/// A project and its completion flag.
///
/// Phases are not embedded: they live in the cache keyed by [`PhaseId`] and are
/// ordered by their template's order index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub status: ProjectStatus,
    /// Administrative completion flag, set only through the completion gate
    #[serde(default)]
    pub completed: bool,
    /// Server-computed progress aggregate, when the store supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

/// Template shared by every project's instance of the same phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Fixed position; defines display order and is never renumbered
    pub order: u32,
}

/// A project-specific occurrence of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInstance {
    pub id: PhaseId,
    pub project_id: ProjectId,
    pub template: PhaseTemplate,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: String,
    /// Owned tasks, in the order the store lists them
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
}

impl PhaseInstance {
    pub fn order(&self) -> u32 {
        self.template.order
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }
}

/// The smallest unit of trackable work ("étape").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub phase_id: PhaseId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: Option<UserId>,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_end: Option<NaiveDate>,
    #[serde(default)]
    pub actual_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_end: Option<DateTime<Utc>>,
    /// Author-set percentage, independent from the status machine
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub notes: String,
}

/// Field changes for a task. `None` leaves the field untouched; the nested
/// `Option` on clearable fields distinguishes "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_start: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_end: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Option<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fields for a task that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub assignee: Option<UserId>,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_end: Option<NaiveDate>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: TaskPriority::Normal,
            assignee: None,
            planned_start: None,
            planned_end: None,
        }
    }
}

/// Field changes for a phase instance; unconstrained by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Option<DateTime<Utc>>>,
}

/// Server-side progression aggregate for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progression {
    pub project: u8,
    #[serde(default)]
    pub phases: Vec<PhaseProgression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgression {
    pub phase_id: PhaseId,
    pub percent: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_use_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::OverDue).unwrap(),
            "\"over_due\""
        );
        assert_eq!(
            serde_json::to_string(&PhaseStatus::NotStarted).unwrap(),
            "\"not_started\""
        );
        let status: TaskStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(status, TaskStatus::Cancelled);
    }

    #[test]
    fn task_defaults_fill_missing_fields() {
        let task: Task =
            serde_json::from_str(r#"{"id": 4, "phase_id": 2, "title": "Pour slab"}"#).unwrap();
        assert_eq!(task.id, TaskId(4));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert!(task.progress.is_none());
    }

    #[test]
    fn task_edit_sends_null_to_clear() {
        let edit = TaskEdit {
            assignee: Some(None),
            ..Default::default()
        };
        assert!(!edit.is_empty());
        assert_eq!(
            serde_json::to_value(&edit).unwrap(),
            serde_json::json!({"assignee": null})
        );
        assert!(TaskEdit::default().is_empty());
        assert_eq!(
            serde_json::to_value(TaskEdit::default()).unwrap(),
            serde_json::json!({})
        );
    }

    #[test]
    fn ids_display_with_their_kind() {
        assert_eq!(TaskId(7).to_string(), "task#7");
        assert_eq!(PhaseId(3).to_string(), "phase#3");
    }

    #[test]
    fn resolved_statuses() {
        assert!(TaskStatus::Completed.is_resolved());
        assert!(TaskStatus::Cancelled.is_resolved());
        assert!(!TaskStatus::InProgress.is_resolved());
        assert!(PhaseStatus::Skipped.is_terminal());
        assert!(!PhaseStatus::InProgress.is_terminal());
    }
}
