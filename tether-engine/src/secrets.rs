//! Secret lookup for credentials referenced from the declaration.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{SecretError, StoreError};
use crate::spec::SecretRef;

/// Key/value contents of one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the secret does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;
}

/// Read one field of a referenced secret.
///
/// The reference's namespace defaults to `default_namespace`. A missing
/// secret, a missing field and an empty value are distinct errors.
pub async fn read_secret_field(
    store: &dyn SecretStore,
    reference: &SecretRef,
    default_namespace: &str,
    field: &str,
) -> Result<String, SecretError> {
    let namespace = if reference.namespace.is_empty() {
        default_namespace
    } else {
        reference.namespace.as_str()
    };
    let secret = store
        .get_secret(namespace, &reference.name)
        .await
        .map_err(|e| SecretError::Store {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            message: e.to_string(),
        })?
        .ok_or_else(|| SecretError::SecretNotFound {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
        })?;
    match secret.data.get(field) {
        None => Err(SecretError::MissingField {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            field: field.to_string(),
        }),
        Some(value) if value.is_empty() => Err(SecretError::EmptyField {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            field: field.to_string(),
        }),
        Some(value) => Ok(value.clone()),
    }
}

/// Secrets stored as `<root>/<namespace>/<name>.json` with a `data` map.
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let path = self.root.join(namespace).join(format!("{name}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                path: path.display().to_string(),
                source,
            })
    }
}

/// In-memory secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Secret>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.secrets
            .write()
            .await
            .insert((namespace.to_string(), name.to_string()), secret);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .secrets
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ref(name: &str, namespace: &str) -> SecretRef {
        SecretRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    #[tokio::test]
    async fn test_namespace_defaults_to_project() {
        let store = MemorySecretStore::new();
        store.insert("team-a", "pd", &[("serviceKey", "abc")]).await;
        let value = read_secret_field(&store, &make_ref("pd", ""), "team-a", "serviceKey")
            .await
            .unwrap();
        assert_eq!(value, "abc");
    }

    #[tokio::test]
    async fn test_distinct_errors() {
        let store = MemorySecretStore::new();
        store
            .insert("ns", "pd", &[("serviceKey", ""), ("other", "x")])
            .await;

        let err = read_secret_field(&store, &make_ref("missing", "ns"), "ns", "serviceKey")
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::SecretNotFound { .. }));

        let err = read_secret_field(&store, &make_ref("pd", "ns"), "ns", "apiToken")
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::MissingField { .. }));

        let err = read_secret_field(&store, &make_ref("pd", "ns"), "ns", "serviceKey")
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::EmptyField { .. }));
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ns")).unwrap();
        std::fs::write(
            dir.path().join("ns").join("slack.json"),
            r#"{"data":{"apiToken":"xoxb"}}"#,
        )
        .unwrap();

        let store = FileSecretStore::new(dir.path());
        let secret = store.get_secret("ns", "slack").await.unwrap().unwrap();
        assert_eq!(secret.data["apiToken"], "xoxb");
        assert!(store.get_secret("ns", "absent").await.unwrap().is_none());
    }
}
