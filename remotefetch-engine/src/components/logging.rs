//! Action listener that traces pipeline events

use remotefetch_core::domain::report::{ArtifactOutcome, FetchRunReport, PipelineStage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::component::ActionListener;

pub const IDENTIFIER: &str = "log";

pub struct LoggingActionListener {
    tenant: String,
}

impl LoggingActionListener {
    pub fn new(tenant: String) -> Self {
        Self { tenant }
    }
}

impl ActionListener for LoggingActionListener {
    fn on_stage_started(&self, configuration_id: Uuid, stage: PipelineStage) -> anyhow::Result<()> {
        info!(
            tenant = %self.tenant,
            configuration = %configuration_id,
            "Stage {} started",
            stage
        );
        Ok(())
    }

    fn on_artifact_result(
        &self,
        configuration_id: Uuid,
        outcome: &ArtifactOutcome,
    ) -> anyhow::Result<()> {
        match &outcome.error {
            Some(error) => warn!(
                tenant = %self.tenant,
                configuration = %configuration_id,
                "Artifact '{}' failed: {}",
                outcome.artifact_id,
                error
            ),
            None => info!(
                tenant = %self.tenant,
                configuration = %configuration_id,
                "Artifact '{}' {:?}",
                outcome.artifact_id,
                outcome.action
            ),
        }
        Ok(())
    }

    fn on_run_completed(
        &self,
        configuration_id: Uuid,
        report: &FetchRunReport,
    ) -> anyhow::Result<()> {
        info!(
            tenant = %self.tenant,
            configuration = %configuration_id,
            "Run #{} finished with {} ({} artifacts)",
            report.run_number,
            report.status,
            report.outcomes.len()
        );
        Ok(())
    }
}
