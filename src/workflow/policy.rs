//! Policy toggles for transitions whose product intent is not settled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    /// Treat a `skipped` phase as resolved when checking project completion.
    #[serde(default = "default_true")]
    pub skipped_phase_resolves_project: bool,
    /// Allow `complete` directly from `pending`, skipping `in_progress`.
    #[serde(default = "default_true")]
    pub allow_complete_from_pending: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            skipped_phase_resolves_project: true,
            allow_complete_from_pending: true,
        }
    }
}

impl WorkflowPolicy {
    /// The strictest reading: skipped phases block, tasks must be started first.
    pub fn strict() -> Self {
        Self {
            skipped_phase_resolves_project: false,
            allow_complete_from_pending: false,
        }
    }
}
