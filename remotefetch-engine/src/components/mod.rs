//! Built-in components
//!
//! Reference implementations of the plugin contracts:
//! - `directory`: repository manager reading a local directory tree
//! - `file`: config deployer writing artifacts below a target directory
//! - `log`: action listener that traces pipeline events

pub mod directory;
pub mod file;
pub mod logging;

pub use directory::DirectoryRepositoryManager;
pub use file::FileConfigDeployer;
pub use logging::LoggingActionListener;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::service::CapabilityRegistry;

/// Registers every built-in component
pub fn register_builtin(registry: &mut CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register_repository_manager(
        directory::IDENTIFIER,
        "Local Directory Repository",
        |ctx| Ok(Box::new(DirectoryRepositoryManager::new(ctx.working_directory.clone()))),
    )?;
    registry.register_config_deployer(file::IDENTIFIER, "File Deployer", |ctx| {
        Ok(Box::new(FileConfigDeployer::from_context(ctx)?))
    })?;
    registry.register_action_listener(logging::IDENTIFIER, "Log Listener", |ctx| {
        Ok(Box::new(LoggingActionListener::new(ctx.tenant.clone())))
    })?;
    Ok(())
}

/// Hex-encoded SHA-256 of an artifact's content
pub(crate) fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Maps a `/`-separated artifact id below `base`
///
/// Returns `None` for ids that are empty or would escape `base`.
pub(crate) fn artifact_path(base: &Path, artifact_id: &str) -> Option<PathBuf> {
    let mut path = base.to_path_buf();
    for segment in artifact_id.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}
