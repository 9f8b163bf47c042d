//! Plugin component descriptors
//!
//! Describes the plugins available to fetch configurations, as listed
//! to operators when they pick a repository manager, deployer or listener.

use serde::{Deserialize, Serialize};

/// Kind of pluggable component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    RepositoryManager,
    ConfigDeployer,
    ActionListener,
}

/// A registered component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub kind: ComponentKind,
    /// Stable identifier referenced by fetch configurations
    pub identifier: String,
    /// Display name
    pub name: String,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::RepositoryManager => write!(f, "repository manager"),
            ComponentKind::ConfigDeployer => write!(f, "config deployer"),
            ComponentKind::ActionListener => write!(f, "action listener"),
        }
    }
}
