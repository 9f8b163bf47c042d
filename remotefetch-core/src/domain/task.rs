//! Fetch task domain types
//!
//! The executor owns the live scheduling records; callers only ever see
//! snapshots of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::FetchRunReport;

/// Execution state of a fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Scheduled and waiting for its next run
    Idle,

    /// A pipeline run is in flight
    Running,

    /// Not scheduled (configuration disabled or unregistered)
    Disabled,
}

/// Point-in-time view of a fetch task for operator inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTaskSnapshot {
    pub configuration_id: Uuid,
    pub state: TaskState,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_report: Option<FetchRunReport>,
}

impl FetchTaskSnapshot {
    /// True when the last run failed in a way retries will not fix
    pub fn needs_attention(&self) -> bool {
        self.last_report
            .as_ref()
            .is_some_and(FetchRunReport::requires_attention)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Idle => write!(f, "Idle"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Disabled => write!(f, "Disabled"),
        }
    }
}
