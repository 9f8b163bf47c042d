//! Error types for the fetch engine
//!
//! Plugin calls return these typed errors; the pipeline turns them into
//! report entries instead of propagating them.

use remotefetch_core::domain::component::ComponentKind;
use remotefetch_core::domain::report::FailureKind;
use thiserror::Error;

/// Errors reported by a repository manager
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Remote source unavailable; the next scheduled run retries
    #[error("Remote source unavailable: {0}")]
    Transient(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote layout does not match expectations
    #[error("Malformed source: {0}")]
    MalformedSource(String),
}

/// Errors reported by a config deployer for a single artifact
#[derive(Debug, Error)]
pub enum DeployError {
    /// Content is not acceptable for this deployer
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Target was modified out of band
    #[error("Deployment conflict: {0}")]
    Conflict(String),

    /// Target could not be written
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors from the capability registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{identifier}' is already registered")]
    Duplicate {
        kind: ComponentKind,
        identifier: String,
    },

    #[error("{kind} '{identifier}' is not registered")]
    NotFound {
        kind: ComponentKind,
        identifier: String,
    },

    #[error("Failed to build {kind} '{identifier}': {source}")]
    Build {
        kind: ComponentKind,
        identifier: String,
        #[source]
        source: PluginBuildError,
    },
}

/// A plugin factory rejected its context (missing or invalid parameters)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PluginBuildError(pub String);

impl PluginBuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self(format!("missing required parameter '{}'", name))
    }
}

impl RepositoryError {
    /// Run-level failure classification for an aborted acquire stage
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RepositoryError::Transient(_) => FailureKind::Transient,
            RepositoryError::Authentication(_) => FailureKind::Authentication,
            RepositoryError::MalformedSource(_) => FailureKind::MalformedSource,
        }
    }

    /// Maps filesystem errors onto repository failure modes
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                RepositoryError::Authentication(format!("{}: {}", context, err))
            }
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput => {
                RepositoryError::MalformedSource(format!("{}: {}", context, err))
            }
            _ => RepositoryError::Transient(format!("{}: {}", context, err)),
        }
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        DeployError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            RepositoryError::Transient("timeout".into()).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            RepositoryError::Authentication("denied".into()).failure_kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            RepositoryError::MalformedSource("no dir".into()).failure_kind(),
            FailureKind::MalformedSource
        );
    }

    #[test]
    fn test_from_io() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            RepositoryError::from_io("reading source", denied),
            RepositoryError::Authentication(_)
        ));

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            RepositoryError::from_io("reading source", missing),
            RepositoryError::Transient(_)
        ));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotFound {
            kind: ComponentKind::ConfigDeployer,
            identifier: "ldap".to_string(),
        };
        assert_eq!(err.to_string(), "config deployer 'ldap' is not registered");
    }
}
