//! Fetch pipeline
//!
//! Executes one run of a fetch configuration:
//! - Resolving its listeners, repository manager and config deployer
//! - Synchronizing the remote source (Acquire)
//! - Inspecting the change list (Diff)
//! - Applying every change through the deployer (Deploy)
//! - Committing the outcomes back to the repository manager
//!
//! The pipeline never fails as a whole: every problem ends up in the
//! returned report.

use async_trait::async_trait;
use remotefetch_core::domain::artifact::{ArtifactChange, ChangeKind};
use remotefetch_core::domain::configuration::{FetchConfiguration, Parameters};
use remotefetch_core::domain::report::{
    ArtifactAction, ArtifactOutcome, FailureKind, FetchRunReport, PipelineStage, RunReportBuilder,
};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::component::{
    ActionListener, ConfigDeployer, DeployAction, PluginContext, RepositoryManager,
};
use crate::error::RegistryError;
use crate::service::CapabilityRegistry;

/// Service trait for executing fetch runs
#[async_trait]
pub trait PipelineService: Send + Sync {
    /// Executes one run of `configuration`
    ///
    /// # Returns
    /// The finalized report, also for runs that aborted
    async fn execute(&self, configuration: &FetchConfiguration, run_number: u64)
    -> FetchRunReport;
}

/// Standard implementation of PipelineService
pub struct StandardPipelineService {
    registry: Arc<CapabilityRegistry>,
    working_directory: PathBuf,
    run_timeout: Option<Duration>,
}

impl StandardPipelineService {
    /// Creates a pipeline resolving plugins from `registry`
    ///
    /// # Arguments
    /// * `working_directory` - Root under which each configuration gets a private directory
    /// * `run_timeout` - Wall-clock budget for the plugin calls of a single run
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        working_directory: PathBuf,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            working_directory,
            run_timeout,
        }
    }

    fn context(
        &self,
        configuration: &FetchConfiguration,
        parameters: &Parameters,
    ) -> PluginContext {
        PluginContext {
            configuration_id: configuration.id,
            tenant: configuration.tenant.clone(),
            working_directory: self.configuration_directory(configuration.id),
            parameters: parameters.clone(),
        }
    }

    fn configuration_directory(&self, configuration_id: Uuid) -> PathBuf {
        self.working_directory.join(configuration_id.to_string())
    }

    /// Builds every listener that resolves, plus the first resolution error
    fn resolve_listeners(
        &self,
        configuration: &FetchConfiguration,
    ) -> (Listeners, Option<RegistryError>) {
        let ctx = self.context(configuration, &Parameters::new());
        let mut listeners = Vec::new();
        let mut first_error = None;

        for identifier in &configuration.action_listeners {
            match self.registry.resolve_action_listener(identifier, &ctx) {
                Ok(listener) => listeners.push((identifier.clone(), listener)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        (Listeners(listeners), first_error)
    }

    fn resolve_plugins(
        &self,
        configuration: &FetchConfiguration,
    ) -> Result<(Box<dyn RepositoryManager>, Box<dyn ConfigDeployer>), RegistryError> {
        let repository = self.registry.resolve_repository_manager(
            &configuration.repository_manager.identifier,
            &self.context(configuration, &configuration.repository_manager.parameters),
        )?;
        let deployer = self.registry.resolve_config_deployer(
            &configuration.config_deployer.identifier,
            &self.context(configuration, &configuration.config_deployer.parameters),
        )?;
        Ok((repository, deployer))
    }
}

#[async_trait]
impl PipelineService for StandardPipelineService {
    async fn execute(
        &self,
        configuration: &FetchConfiguration,
        run_number: u64,
    ) -> FetchRunReport {
        let id = configuration.id;
        let mut report = RunReportBuilder::start(id, run_number);
        let deadline = self.run_timeout.map(|timeout| Instant::now() + timeout);

        info!(
            "Starting run #{} of '{}' ({})",
            run_number, configuration.name, id
        );

        let (listeners, listener_error) = self.resolve_listeners(configuration);
        let plugins = match listener_error {
            Some(e) => Err(e),
            None => self.resolve_plugins(configuration),
        };
        let (repository, deployer) = match plugins {
            Ok(plugins) => plugins,
            Err(e) => {
                warn!("Run #{} of {} cannot start: {}", run_number, id, e);
                let report = report.abort(FailureKind::Configuration, e.to_string());
                return listeners.finish(report);
            }
        };

        // Acquire
        listeners.stage_started(id, PipelineStage::Acquire);
        let changes = match within(
            deadline,
            repository.sync(&configuration.repository_manager.parameters),
        )
        .await
        {
            Some(Ok(changes)) => changes,
            Some(Err(e)) => {
                warn!("Run #{} of {} failed to acquire: {}", run_number, id, e);
                let report = report.abort(e.failure_kind(), e.to_string());
                return listeners.finish(report);
            }
            None => {
                let report = report.abort(FailureKind::Timeout, timeout_message(self.run_timeout));
                return listeners.finish(report);
            }
        };

        // Diff
        report.enter(PipelineStage::Diff);
        listeners.stage_started(id, PipelineStage::Diff);
        if changes.is_empty() {
            debug!("Run #{} of {}: no changes", run_number, id);
            return listeners.finish(report.complete());
        }
        debug!("Run #{} of {}: {} change(s)", run_number, id, changes.len());

        // Deploy
        report.enter(PipelineStage::Deploy);
        listeners.stage_started(id, PipelineStage::Deploy);

        let mut pending = changes.into_iter();
        while let Some(change) = pending.next() {
            match within(deadline, apply(repository.as_ref(), deployer.as_ref(), &change)).await {
                Some(outcome) => {
                    listeners.artifact_result(id, &outcome);
                    report.record(outcome);
                }
                None => {
                    let outcome = ArtifactOutcome::failed(&change.artifact_id, "run timed out");
                    listeners.artifact_result(id, &outcome);
                    report.record(outcome);

                    for skipped in pending {
                        let outcome = ArtifactOutcome::skipped(skipped.artifact_id);
                        listeners.artifact_result(id, &outcome);
                        report.record(outcome);
                    }

                    warn!("Run #{} of {} timed out while deploying", run_number, id);
                    commit(repository.as_ref(), &report).await;
                    let report = report.abort(FailureKind::Timeout, timeout_message(self.run_timeout));
                    return listeners.finish(report);
                }
            }
        }

        commit(repository.as_ref(), &report).await;
        listeners.finish(report.complete())
    }
}

/// Reports the deploy outcomes back to the repository manager
///
/// Runs outside the run deadline. A failed commit only means the next sync
/// offers the applied artifacts again.
async fn commit(repository: &dyn RepositoryManager, report: &RunReportBuilder) {
    if let Err(e) = repository.commit(report.outcomes()).await {
        warn!(
            "Failed to commit deployed artifacts of {}: {}",
            report.configuration_id(),
            e
        );
    }
}

/// Applies one change through the deployer
async fn apply(
    repository: &dyn RepositoryManager,
    deployer: &dyn ConfigDeployer,
    change: &ArtifactChange,
) -> ArtifactOutcome {
    let id = change.artifact_id.as_str();

    match change.kind {
        ChangeKind::Added | ChangeKind::Modified => {
            let content = match repository.read(id).await {
                Ok(content) => content,
                Err(e) => return ArtifactOutcome::failed(id, e.to_string()),
            };
            match deployer.deploy(id, &content).await {
                Ok(DeployAction::Created) => ArtifactOutcome::succeeded(id, ArtifactAction::Created),
                Ok(DeployAction::Updated) => ArtifactOutcome::succeeded(id, ArtifactAction::Updated),
                Err(e) => ArtifactOutcome::failed(id, e.to_string()),
            }
        }
        ChangeKind::Removed => match deployer.remove(id).await {
            Ok(()) => ArtifactOutcome::succeeded(id, ArtifactAction::Deleted),
            Err(e) => ArtifactOutcome::failed(id, e.to_string()),
        },
    }
}

/// Runs `future` until the deadline, if there is one
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

fn timeout_message(timeout: Option<Duration>) -> String {
    match timeout {
        Some(timeout) => format!("run exceeded its {:?} timeout", timeout),
        None => "run timed out".to_string(),
    }
}

/// Listeners resolved for one run
struct Listeners(Vec<(String, Box<dyn ActionListener>)>);

impl Listeners {
    fn stage_started(&self, configuration_id: Uuid, stage: PipelineStage) {
        self.notify("stage start", |listener| {
            listener.on_stage_started(configuration_id, stage)
        });
    }

    fn artifact_result(&self, configuration_id: Uuid, outcome: &ArtifactOutcome) {
        self.notify("artifact result", |listener| {
            listener.on_artifact_result(configuration_id, outcome)
        });
    }

    /// Announces the finalized report and hands it back
    fn finish(&self, report: FetchRunReport) -> FetchRunReport {
        info!(
            "Run #{} of {} finished with {} at stage {}",
            report.run_number, report.configuration_id, report.status, report.stage
        );
        self.notify("run completion", |listener| {
            listener.on_run_completed(report.configuration_id, &report)
        });
        report
    }

    fn notify(&self, event: &str, call: impl Fn(&dyn ActionListener) -> anyhow::Result<()>) {
        for (identifier, listener) in &self.0 {
            match catch_unwind(AssertUnwindSafe(|| call(&**listener))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Action listener '{}' failed on {}: {:#}", identifier, event, e),
                Err(_) => warn!("Action listener '{}' panicked on {}", identifier, event),
            }
        }
    }
}
