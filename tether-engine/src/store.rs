//! Persistence of managed project documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::ownership::LAST_APPLIED_ANNOTATION;
use crate::project::{ManagedProject, ProjectKey};

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ProjectKey>, StoreError>;

    async fn load(&self, key: &ProjectKey) -> Result<ManagedProject, StoreError>;

    /// Write back the engine-owned parts of a project: its status and the
    /// ownership snapshot. The spec on disk is left as it is.
    async fn save_status(&self, project: &ManagedProject) -> Result<(), StoreError>;
}

/// Projects stored as `<root>/<namespace>/<name>.json`.
pub struct FileProjectStore {
    root: PathBuf,
}

impl FileProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &ProjectKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn read_document(path: &Path, key: &ProjectKey) -> Result<ManagedProject, StoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(key.to_string()))
        }
        Err(e) => return Err(io_error(path, e)),
    };
    let mut project: ManagedProject =
        serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
    // The file location is authoritative for the name.
    project.metadata.namespace = key.namespace.clone();
    project.metadata.name = key.name.clone();
    Ok(project)
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn list(&self) -> Result<Vec<ProjectKey>, StoreError> {
        let mut keys = Vec::new();
        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(io_error(&self.root, e)),
        };
        while let Some(ns) = namespaces
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let ns_path = ns.path();
            if !ns_path.is_dir() {
                continue;
            }
            let namespace = ns.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(&ns_path)
                .await
                .map_err(|e| io_error(&ns_path, e))?;
            while let Some(file) = files.next_entry().await.map_err(|e| io_error(&ns_path, e))? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(ProjectKey::new(namespace.clone(), stem));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn load(&self, key: &ProjectKey) -> Result<ManagedProject, StoreError> {
        read_document(&self.path(key), key).await
    }

    async fn save_status(&self, project: &ManagedProject) -> Result<(), StoreError> {
        let key = project.key();
        let path = self.path(&key);
        let mut current = read_document(&path, &key).await?;

        current.status = project.status.clone();
        match project.metadata.annotations.get(LAST_APPLIED_ANNOTATION) {
            Some(blob) => {
                current
                    .metadata
                    .annotations
                    .insert(LAST_APPLIED_ANNOTATION.to_string(), blob.clone());
            }
            None => {
                current.metadata.annotations.remove(LAST_APPLIED_ANNOTATION);
            }
        }

        let body = serde_json::to_vec_pretty(&current).map_err(|source| StoreError::Malformed {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }
}
