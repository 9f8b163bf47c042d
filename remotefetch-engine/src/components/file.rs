//! File config deployer
//!
//! Writes each artifact to `<target>/<artifact id>`. A ledger of the digests
//! this deployer wrote lets it notice files edited out of band, which are
//! reported as conflicts and left untouched. The ledger is replaced
//! atomically, and a write whose ledger update fails is rolled back.
//!
//! Parameters:
//! - `target`: directory receiving the artifacts (required)
//! - `format`: `raw` (default) or `json` to reject content that is not valid JSON

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{artifact_path, content_hash};
use crate::component::{ConfigDeployer, DeployAction, PluginContext};
use crate::error::{DeployError, PluginBuildError};

pub const IDENTIFIER: &str = "file";

const LEDGER_FILE: &str = "deployed.json";

/// Accepted artifact content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Raw,
    Json,
}

/// Deployer writing artifacts to a directory
pub struct FileConfigDeployer {
    target: PathBuf,
    format: ContentFormat,
    ledger_path: PathBuf,
    /// Artifact id to digest of the content last written
    ledger: Mutex<BTreeMap<String, String>>,
}

impl FileConfigDeployer {
    /// Builds a deployer from its plugin context
    pub fn from_context(ctx: &PluginContext) -> Result<Self, PluginBuildError> {
        let target = PathBuf::from(ctx.required_parameter("target")?);
        let format = match ctx.parameter("format") {
            None | Some("raw") => ContentFormat::Raw,
            Some("json") => ContentFormat::Json,
            Some(other) => {
                return Err(PluginBuildError::new(format!(
                    "unsupported format '{}'",
                    other
                )));
            }
        };

        Self::new(target, format, ctx.working_directory.join(LEDGER_FILE))
    }

    /// Creates a deployer, loading any ledger left by earlier runs
    pub fn new(
        target: PathBuf,
        format: ContentFormat,
        ledger_path: PathBuf,
    ) -> Result<Self, PluginBuildError> {
        let ledger = match std::fs::read(&ledger_path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| {
                PluginBuildError::new(format!(
                    "corrupt deployment ledger {}: {}",
                    ledger_path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PluginBuildError::new(format!(
                    "cannot read deployment ledger {}: {}",
                    ledger_path.display(),
                    e
                )));
            }
        };

        Ok(Self {
            target,
            format,
            ledger_path,
            ledger: Mutex::new(ledger),
        })
    }

    fn path_for(&self, artifact_id: &str) -> Result<PathBuf, DeployError> {
        artifact_path(&self.target, artifact_id)
            .ok_or_else(|| DeployError::Validation(format!("invalid artifact id '{}'", artifact_id)))
    }

    fn validate(&self, artifact_id: &str, content: &[u8]) -> Result<(), DeployError> {
        if self.format == ContentFormat::Json {
            serde_json::from_slice::<serde_json::Value>(content).map_err(|e| {
                DeployError::Validation(format!("'{}' is not valid JSON: {}", artifact_id, e))
            })?;
        }
        Ok(())
    }

    /// Replaces the ledger file through a staged copy
    async fn save_ledger(&self, ledger: &BTreeMap<String, String>) -> Result<(), DeployError> {
        let content =
            serde_json::to_vec_pretty(ledger).map_err(|e| DeployError::Io(e.to_string()))?;
        if let Some(parent) = self.ledger_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self.ledger_path.with_extension("json.tmp");
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &self.ledger_path).await?;
        Ok(())
    }
}

/// Content of the file currently at `path`, if any
async fn current_content(path: &Path) -> Result<Option<Vec<u8>>, DeployError> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Puts `path` back the way it was before a failed deployment
async fn restore(path: &Path, previous: Option<&[u8]>) {
    let result = match previous {
        Some(content) => tokio::fs::write(path, content).await,
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    if let Err(e) = result {
        warn!("Failed to roll back {}: {}", path.display(), e);
    }
}

/// Puts a ledger entry back after a failed save
fn restore_entry(
    ledger: &mut BTreeMap<String, String>,
    artifact_id: &str,
    previous: Option<String>,
) {
    match previous {
        Some(digest) => ledger.insert(artifact_id.to_string(), digest),
        None => ledger.remove(artifact_id),
    };
}

/// Refuses to touch files this deployer did not write last
fn check_ownership(
    artifact_id: &str,
    on_disk: Option<&String>,
    recorded: Option<&String>,
) -> Result<(), DeployError> {
    match (on_disk, recorded) {
        (Some(actual), Some(expected)) if actual != expected => Err(DeployError::Conflict(format!(
            "'{}' was modified outside of remote fetch",
            artifact_id
        ))),
        (Some(_), None) => Err(DeployError::Conflict(format!(
            "'{}' already exists and was not deployed by remote fetch",
            artifact_id
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl ConfigDeployer for FileConfigDeployer {
    async fn deploy(&self, artifact_id: &str, content: &[u8]) -> Result<DeployAction, DeployError> {
        let path = self.path_for(artifact_id)?;
        self.validate(artifact_id, content)?;

        let mut ledger = self.ledger.lock().await;
        let existing = current_content(&path).await?;
        let on_disk = existing.as_deref().map(content_hash);
        check_ownership(artifact_id, on_disk.as_ref(), ledger.get(artifact_id))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            restore(&path, existing.as_deref()).await;
            return Err(e.into());
        }

        let previous = ledger.insert(artifact_id.to_string(), content_hash(content));
        if let Err(e) = self.save_ledger(&ledger).await {
            restore_entry(&mut ledger, artifact_id, previous);
            restore(&path, existing.as_deref()).await;
            return Err(e);
        }

        let action = if on_disk.is_some() {
            DeployAction::Updated
        } else {
            DeployAction::Created
        };
        debug!("Deployed '{}' to {} ({:?})", artifact_id, path.display(), action);
        Ok(action)
    }

    async fn remove(&self, artifact_id: &str) -> Result<(), DeployError> {
        let path = self.path_for(artifact_id)?;

        let mut ledger = self.ledger.lock().await;
        let existing = current_content(&path).await?;
        let on_disk = existing.as_deref().map(content_hash);
        check_ownership(artifact_id, on_disk.as_ref(), ledger.get(artifact_id))?;

        if existing.is_some() {
            tokio::fs::remove_file(&path).await?;
        }

        if let Some(previous) = ledger.remove(artifact_id) {
            if let Err(e) = self.save_ledger(&ledger).await {
                restore_entry(&mut ledger, artifact_id, Some(previous));
                restore(&path, existing.as_deref()).await;
                return Err(e);
            }
        }
        debug!("Removed '{}' from {}", artifact_id, path.display());
        Ok(())
    }
}
