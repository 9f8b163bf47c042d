//! Artifact domain types

use serde::{Deserialize, Serialize};

/// One artifact that differs between the remote source and the last materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChange {
    pub artifact_id: String,
    pub kind: ChangeKind,
    /// Opaque handle to the content (e.g. a content hash), if the repository manager has one
    pub content_ref: Option<String>,
}

/// Kind of change detected for an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ArtifactChange {
    pub fn added(artifact_id: impl Into<String>) -> Self {
        Self::new(artifact_id, ChangeKind::Added)
    }

    pub fn modified(artifact_id: impl Into<String>) -> Self {
        Self::new(artifact_id, ChangeKind::Modified)
    }

    pub fn removed(artifact_id: impl Into<String>) -> Self {
        Self::new(artifact_id, ChangeKind::Removed)
    }

    fn new(artifact_id: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            kind,
            content_ref: None,
        }
    }

    pub fn with_content_ref(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Modified => write!(f, "Modified"),
            ChangeKind::Removed => write!(f, "Removed"),
        }
    }
}
