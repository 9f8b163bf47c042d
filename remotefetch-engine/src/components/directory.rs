//! Local directory repository manager
//!
//! Treats a directory tree as the remote source. Each sync copies changed
//! files into a private working copy. The manifest of SHA-256 digests only
//! advances on commit, and only for artifacts that were deployed, so the next
//! sync reports everything that still differs from the deployed set.
//!
//! Parameters:
//! - `uri`: source path, optionally prefixed with `file://` (required)
//! - `directory`: subdirectory of the source holding the artifacts
//! - `branch`: accepted for compatibility with version-controlled sources, ignored

use async_trait::async_trait;
use remotefetch_core::domain::artifact::{ArtifactChange, ChangeKind};
use remotefetch_core::domain::configuration::Parameters;
use remotefetch_core::domain::report::ArtifactOutcome;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::{artifact_path, content_hash};
use crate::component::RepositoryManager;
use crate::error::RepositoryError;

pub const IDENTIFIER: &str = "directory";

const CHECKOUT_DIR: &str = "checkout";
const MANIFEST_FILE: &str = "manifest.json";

/// Artifact id to content digest
type Manifest = BTreeMap<String, String>;

/// Repository manager backed by a local directory
pub struct DirectoryRepositoryManager {
    working_directory: PathBuf,
    /// Source digests seen by the latest sync, waiting for commit
    synced: Mutex<Option<Manifest>>,
}

impl DirectoryRepositoryManager {
    /// Creates a manager keeping its working copy under `working_directory`
    pub fn new(working_directory: PathBuf) -> Self {
        Self {
            working_directory,
            synced: Mutex::new(None),
        }
    }

    fn checkout(&self) -> PathBuf {
        self.working_directory.join(CHECKOUT_DIR)
    }
}

#[async_trait]
impl RepositoryManager for DirectoryRepositoryManager {
    async fn sync(&self, parameters: &Parameters) -> Result<Vec<ArtifactChange>, RepositoryError> {
        let source = source_root(parameters)?;
        let working_directory = self.working_directory.clone();

        debug!("Syncing {} into {}", source.display(), working_directory.display());

        let (changes, current) =
            tokio::task::spawn_blocking(move || sync_blocking(&source, &working_directory))
                .await
                .map_err(|e| RepositoryError::Transient(format!("sync task failed: {}", e)))??;

        *self.synced.lock().unwrap_or_else(PoisonError::into_inner) = Some(current);
        Ok(changes)
    }

    async fn read(&self, artifact_id: &str) -> Result<Vec<u8>, RepositoryError> {
        let path = artifact_path(&self.checkout(), artifact_id).ok_or_else(|| {
            RepositoryError::MalformedSource(format!("invalid artifact id '{}'", artifact_id))
        })?;

        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RepositoryError::MalformedSource(
                format!("artifact '{}' is not in the working copy", artifact_id),
            )),
            Err(e) => Err(RepositoryError::from_io(
                &format!("reading artifact '{}'", artifact_id),
                e,
            )),
        }
    }

    async fn commit(&self, outcomes: &[ArtifactOutcome]) -> Result<(), RepositoryError> {
        let Some(current) = self
            .synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let applied: Vec<String> = outcomes
            .iter()
            .filter(|o| o.is_applied())
            .map(|o| o.artifact_id.clone())
            .collect();
        if applied.is_empty() {
            return Ok(());
        }

        let manifest_path = self.working_directory.join(MANIFEST_FILE);
        tokio::task::spawn_blocking(move || commit_blocking(&manifest_path, &current, &applied))
            .await
            .map_err(|e| RepositoryError::Transient(format!("commit task failed: {}", e)))?
    }
}

/// Resolves `uri` and `directory` into the directory holding the artifacts
fn source_root(parameters: &Parameters) -> Result<PathBuf, RepositoryError> {
    let uri = parameters
        .get("uri")
        .map(|uri| uri.trim())
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| RepositoryError::MalformedSource("missing 'uri' parameter".to_string()))?;

    let mut root = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));

    if let Some(directory) = parameters.get("directory") {
        let directory = directory.trim().trim_matches('/');
        if !directory.is_empty() && directory != "." {
            root = artifact_path(&root, directory).ok_or_else(|| {
                RepositoryError::MalformedSource(format!("invalid directory '{}'", directory))
            })?;
        }
    }

    Ok(root)
}

/// Diffs the source against the deployed manifest and refreshes the working copy
fn sync_blocking(
    source: &Path,
    working_directory: &Path,
) -> Result<(Vec<ArtifactChange>, Manifest), RepositoryError> {
    match fs::metadata(source) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(RepositoryError::MalformedSource(format!(
                "{} is not a directory",
                source.display()
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RepositoryError::Transient(format!(
                "source {} is not reachable",
                source.display()
            )));
        }
        Err(e) => return Err(RepositoryError::from_io("inspecting source", e)),
    }

    let current = scan(source)?;
    let manifest_path = working_directory.join(MANIFEST_FILE);
    let previous = load_manifest(&manifest_path);

    let mut changes = Vec::new();
    for (id, digest) in &current {
        match previous.get(id) {
            None => changes.push(ArtifactChange::added(id).with_content_ref(digest)),
            Some(old) if old != digest => {
                changes.push(ArtifactChange::modified(id).with_content_ref(digest))
            }
            Some(_) => {}
        }
    }
    for id in previous.keys().filter(|id| !current.contains_key(*id)) {
        changes.push(ArtifactChange::removed(id));
    }
    changes.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));

    if changes.is_empty() {
        return Ok((changes, current));
    }

    let checkout = working_directory.join(CHECKOUT_DIR);
    for change in &changes {
        apply_change(source, &checkout, change)?;
    }

    debug!("Detected {} change(s) in {}", changes.len(), source.display());
    Ok((changes, current))
}

/// Advances the manifest for the artifacts that were deployed
fn commit_blocking(
    manifest_path: &Path,
    current: &Manifest,
    applied: &[String],
) -> Result<(), RepositoryError> {
    let mut manifest = load_manifest(manifest_path);
    for id in applied {
        match current.get(id) {
            Some(digest) => manifest.insert(id.clone(), digest.clone()),
            None => manifest.remove(id),
        };
    }
    store_manifest(manifest_path, &manifest)?;

    debug!("Committed {} artifact(s) to {}", applied.len(), manifest_path.display());
    Ok(())
}

/// Walks the source tree, skipping hidden entries and symlinks
fn scan(root: &Path) -> Result<Manifest, RepositoryError> {
    let mut manifest = Manifest::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        let entries =
            fs::read_dir(&dir).map_err(|e| RepositoryError::from_io("listing source", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::from_io("listing source", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let id = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let file_type = entry
                .file_type()
                .map_err(|e| RepositoryError::from_io("inspecting source entry", e))?;

            if file_type.is_dir() {
                pending.push((entry.path(), id));
            } else if file_type.is_file() {
                let content = fs::read(entry.path())
                    .map_err(|e| RepositoryError::from_io("reading source file", e))?;
                manifest.insert(id, content_hash(&content));
            }
        }
    }

    Ok(manifest)
}

fn apply_change(
    source: &Path,
    checkout: &Path,
    change: &ArtifactChange,
) -> Result<(), RepositoryError> {
    let invalid =
        || RepositoryError::MalformedSource(format!("invalid artifact id '{}'", change.artifact_id));
    let target = artifact_path(checkout, &change.artifact_id).ok_or_else(invalid)?;

    if change.kind == ChangeKind::Removed {
        return match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepositoryError::from_io("updating working copy", e)),
        };
    }

    let origin = artifact_path(source, &change.artifact_id).ok_or_else(invalid)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RepositoryError::from_io("updating working copy", e))?;
    }
    fs::copy(&origin, &target).map_err(|e| RepositoryError::from_io("updating working copy", e))?;
    Ok(())
}

fn load_manifest(path: &Path) -> Manifest {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Manifest::new(),
        Err(e) => {
            warn!("Failed to read manifest {}: {}", path.display(), e);
            return Manifest::new();
        }
    };

    serde_json::from_slice(&content).unwrap_or_else(|e| {
        warn!(
            "Ignoring corrupt manifest {}, treating every artifact as new: {}",
            path.display(),
            e
        );
        Manifest::new()
    })
}

fn store_manifest(path: &Path, manifest: &Manifest) -> Result<(), RepositoryError> {
    let content = serde_json::to_vec_pretty(manifest)
        .map_err(|e| RepositoryError::Transient(format!("encoding manifest: {}", e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RepositoryError::from_io("writing manifest", e))?;
    }

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, content).map_err(|e| RepositoryError::from_io("writing manifest", e))?;
    fs::rename(&staging, path).map_err(|e| RepositoryError::from_io("writing manifest", e))?;
    Ok(())
}
