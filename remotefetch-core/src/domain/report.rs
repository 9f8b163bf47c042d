//! Run report domain types
//!
//! A `FetchRunReport` is produced for every pipeline execution, whether it
//! deployed everything, some things or nothing at all. Reports are built
//! incrementally with a `RunReportBuilder` while the run progresses and are
//! finalized exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRunReport {
    pub configuration_id: Uuid,
    pub run_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last stage the run entered
    pub stage: PipelineStage,
    pub outcomes: Vec<ArtifactOutcome>,
    pub status: RunStatus,
    /// Why the run aborted, if it did
    pub failure: Option<RunFailure>,
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Acquire,
    Diff,
    Deploy,
    Completed,
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Action taken for a single artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactAction {
    Created,
    Updated,
    Deleted,
    Skipped,
    Failed,
}

/// Per-artifact outcome recorded in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub artifact_id: String,
    pub action: ArtifactAction,
    pub error: Option<String>,
}

/// Reason a run aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Classification of run-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A plugin identifier did not resolve or a plugin could not be built
    Configuration,
    /// The remote source was unreachable; the next scheduled run retries
    Transient,
    Authentication,
    MalformedSource,
    Timeout,
    /// The pipeline itself crashed
    Internal,
}

impl ArtifactOutcome {
    pub fn succeeded(artifact_id: impl Into<String>, action: ArtifactAction) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            action,
            error: None,
        }
    }

    pub fn failed(artifact_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            action: ArtifactAction::Failed,
            error: Some(error.into()),
        }
    }

    pub fn skipped(artifact_id: impl Into<String>) -> Self {
        Self::succeeded(artifact_id, ArtifactAction::Skipped)
    }

    pub fn is_failure(&self) -> bool {
        self.action == ArtifactAction::Failed
    }

    /// True when the artifact reached the target (created, updated or deleted)
    pub fn is_applied(&self) -> bool {
        matches!(
            self.action,
            ArtifactAction::Created | ArtifactAction::Updated | ArtifactAction::Deleted
        )
    }
}

impl RunStatus {
    /// Aggregates artifact outcomes into an overall status
    ///
    /// No outcomes at all is a success (nothing changed upstream).
    pub fn from_outcomes(outcomes: &[ArtifactOutcome]) -> Self {
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        match failed {
            0 => RunStatus::Success,
            n if n == outcomes.len() => RunStatus::Failed,
            _ => RunStatus::PartialFailure,
        }
    }
}

impl FailureKind {
    /// Failures that will repeat until an operator changes something
    pub fn requires_attention(&self) -> bool {
        matches!(
            self,
            FailureKind::Configuration | FailureKind::Authentication | FailureKind::MalformedSource
        )
    }
}

impl FetchRunReport {
    pub fn outcome(&self, artifact_id: &str) -> Option<&ArtifactOutcome> {
        self.outcomes.iter().find(|o| o.artifact_id == artifact_id)
    }

    pub fn requires_attention(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|failure| failure.kind.requires_attention())
    }
}

/// Accumulates a report while a run is in progress
#[derive(Debug)]
pub struct RunReportBuilder {
    configuration_id: Uuid,
    run_number: u64,
    started_at: DateTime<Utc>,
    stage: PipelineStage,
    outcomes: Vec<ArtifactOutcome>,
}

impl RunReportBuilder {
    /// Starts a report at the current time in the `Acquire` stage
    pub fn start(configuration_id: Uuid, run_number: u64) -> Self {
        Self {
            configuration_id,
            run_number,
            started_at: Utc::now(),
            stage: PipelineStage::Acquire,
            outcomes: Vec::new(),
        }
    }

    pub fn configuration_id(&self) -> Uuid {
        self.configuration_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
    }

    pub fn record(&mut self, outcome: ArtifactOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[ArtifactOutcome] {
        &self.outcomes
    }

    /// Finalizes a run that went through all of its stages
    pub fn complete(mut self) -> FetchRunReport {
        self.stage = PipelineStage::Completed;
        let status = RunStatus::from_outcomes(&self.outcomes);
        self.finish(status, None)
    }

    /// Finalizes an aborted run; the stage stays where the run stopped
    pub fn abort(self, kind: FailureKind, message: impl Into<String>) -> FetchRunReport {
        let failure = RunFailure {
            kind,
            message: message.into(),
        };
        self.finish(RunStatus::Failed, Some(failure))
    }

    fn finish(self, status: RunStatus, failure: Option<RunFailure>) -> FetchRunReport {
        FetchRunReport {
            configuration_id: self.configuration_id,
            run_number: self.run_number,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stage: self.stage,
            outcomes: self.outcomes,
            status,
            failure,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Acquire => write!(f, "Acquire"),
            PipelineStage::Diff => write!(f, "Diff"),
            PipelineStage::Deploy => write!(f, "Deploy"),
            PipelineStage::Completed => write!(f, "Completed"),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "Success"),
            RunStatus::PartialFailure => write!(f, "PartialFailure"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}
