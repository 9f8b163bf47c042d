//! Plugin contracts
//!
//! Every fetch configuration names three kinds of components by identifier:
//! a repository manager that materializes the remote source, a config
//! deployer that applies changed artifacts, and any number of action
//! listeners that observe the run. Implementations are registered in the
//! [`CapabilityRegistry`](crate::service::CapabilityRegistry) and built per
//! run from a [`PluginContext`].
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use remotefetch_core::domain::artifact::ArtifactChange;
//! use remotefetch_core::domain::configuration::Parameters;
//! use remotefetch_engine::component::RepositoryManager;
//! use remotefetch_engine::error::RepositoryError;
//!
//! struct EmptySource;
//!
//! #[async_trait]
//! impl RepositoryManager for EmptySource {
//!     async fn sync(&self, _parameters: &Parameters) -> Result<Vec<ArtifactChange>, RepositoryError> {
//!         Ok(Vec::new())
//!     }
//!
//!     async fn read(&self, artifact_id: &str) -> Result<Vec<u8>, RepositoryError> {
//!         Err(RepositoryError::MalformedSource(format!("unknown artifact {}", artifact_id)))
//!     }
//! }
//! ```

use async_trait::async_trait;
use remotefetch_core::domain::artifact::ArtifactChange;
use remotefetch_core::domain::configuration::Parameters;
use remotefetch_core::domain::report::{ArtifactOutcome, FetchRunReport, PipelineStage};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{DeployError, PluginBuildError, RepositoryError};

/// Everything a plugin factory knows about the configuration it builds for
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub configuration_id: Uuid,
    pub tenant: String,
    /// Private working directory for this configuration
    pub working_directory: PathBuf,
    /// Parameters of the component being built
    pub parameters: Parameters,
}

impl PluginContext {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn required_parameter(&self, name: &str) -> Result<&str, PluginBuildError> {
        self.parameter(name)
            .ok_or_else(|| PluginBuildError::missing_parameter(name))
    }
}

/// Retrieves and diffs a remote artifact source
#[async_trait]
pub trait RepositoryManager: Send + Sync {
    /// Updates the local materialization of the remote source
    ///
    /// Returns the artifacts that differ from the previously deployed set.
    /// Once a run has committed its outcomes, calling this again with an
    /// unchanged source returns an empty list.
    async fn sync(&self, parameters: &Parameters) -> Result<Vec<ArtifactChange>, RepositoryError>;

    /// Returns the content of an artifact from the latest change list
    async fn read(&self, artifact_id: &str) -> Result<Vec<u8>, RepositoryError>;

    /// Records which changes from the latest sync were applied
    ///
    /// Called once after the deploy stage with every outcome recorded so
    /// far. Only succeeded outcomes count as deployed; failed and skipped
    /// artifacts must be offered again by the next sync.
    async fn commit(&self, _outcomes: &[ArtifactOutcome]) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Action performed by a successful deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
}

/// Applies artifacts to the running server
///
/// Each call stands alone: a failure for one artifact never prevents the
/// pipeline from attempting the rest.
#[async_trait]
pub trait ConfigDeployer: Send + Sync {
    async fn deploy(&self, artifact_id: &str, content: &[u8]) -> Result<DeployAction, DeployError>;

    /// Removes a deployed artifact
    async fn remove(&self, artifact_id: &str) -> Result<(), DeployError>;
}

/// Observes pipeline progress
///
/// Calls happen on the worker executing the run and must return quickly.
/// Errors (and panics) are logged by the pipeline and otherwise ignored.
pub trait ActionListener: Send + Sync {
    fn on_stage_started(&self, configuration_id: Uuid, stage: PipelineStage) -> anyhow::Result<()>;

    fn on_artifact_result(
        &self,
        configuration_id: Uuid,
        outcome: &ArtifactOutcome,
    ) -> anyhow::Result<()>;

    fn on_run_completed(&self, configuration_id: Uuid, report: &FetchRunReport)
    -> anyhow::Result<()>;
}

/// Builds a repository manager for one configuration
pub type RepositoryManagerFactory = Arc<
    dyn Fn(&PluginContext) -> Result<Box<dyn RepositoryManager>, PluginBuildError> + Send + Sync,
>;

/// Builds a config deployer for one configuration
pub type ConfigDeployerFactory =
    Arc<dyn Fn(&PluginContext) -> Result<Box<dyn ConfigDeployer>, PluginBuildError> + Send + Sync>;

/// Builds an action listener for one configuration
pub type ActionListenerFactory =
    Arc<dyn Fn(&PluginContext) -> Result<Box<dyn ActionListener>, PluginBuildError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn context(parameters: &[(&str, &str)]) -> PluginContext {
        PluginContext {
            configuration_id: Uuid::new_v4(),
            tenant: "carbon.super".to_string(),
            working_directory: PathBuf::from("/tmp/remotefetch"),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_parameter_lookup() {
        let ctx = context(&[("uri", "/srv/repo"), ("branch", "")]);

        assert_eq!(ctx.parameter("uri"), Some("/srv/repo"));
        // Empty values count as unset
        assert_eq!(ctx.parameter("branch"), None);
        assert!(ctx.required_parameter("uri").is_ok());
        assert!(ctx.required_parameter("directory").is_err());
    }
}
