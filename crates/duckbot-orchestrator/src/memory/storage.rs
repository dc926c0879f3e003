//! Persistence backends for the memory store.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use duckbot_core::{Case, CaseId};

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Case serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Case id cannot be used as a storage key: {0}")]
    InvalidKey(String),
}

/// Key-value persistence for cases, keyed by case id.
#[async_trait]
pub trait CaseStorage: Send + Sync {
    /// Insert or overwrite a case.
    async fn put(&self, case: &Case) -> Result<(), StorageError>;

    /// Remove a case. Removing a missing case is not an error.
    async fn remove(&self, id: &CaseId) -> Result<(), StorageError>;

    /// Load every stored case.
    async fn load_all(&self) -> Result<Vec<Case>, StorageError>;
}

/// Process-local storage.
#[derive(Default)]
pub struct InMemoryStorage {
    cases: Mutex<HashMap<CaseId, Case>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted cases.
    pub async fn len(&self) -> usize {
        self.cases.lock().await.len()
    }
}

#[async_trait]
impl CaseStorage for InMemoryStorage {
    async fn put(&self, case: &Case) -> Result<(), StorageError> {
        self.cases.lock().await.insert(case.id.clone(), case.clone());
        Ok(())
    }

    async fn remove(&self, id: &CaseId) -> Result<(), StorageError> {
        self.cases.lock().await.remove(id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Case>, StorageError> {
        Ok(self.cases.lock().await.values().cloned().collect())
    }
}

/// One JSON document per case in a directory.
pub struct JsonDirStorage {
    dir: PathBuf,
}

impl JsonDirStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &CaseId) -> Result<PathBuf, StorageError> {
        let key = id.as_str();
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl CaseStorage for JsonDirStorage {
    async fn put(&self, case: &Case) -> Result<(), StorageError> {
        let path = self.path_for(&case.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(case)?;
        // Write then rename: readers never see a truncated case.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(case_id = %case.id, path = %path.display(), "Case persisted");
        Ok(())
    }

    async fn remove(&self, id: &CaseId) -> Result<(), StorageError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Case>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut cases = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Case>(&raw) {
                Ok(case) => cases.push(case),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable case file");
                }
            }
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckbot_core::{ContextSnapshot, Outcome};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("duckbot-cases-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_json_dir_roundtrip_and_remove() {
        let dir = temp_dir();
        let storage = JsonDirStorage::new(&dir);
        let snapshot = ContextSnapshot::default().with_focused_app("code");
        let case = Case::new(&snapshot, "apply_layout").with_outcome(Outcome::Success);

        storage.put(&case).await.unwrap();
        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded, vec![case.clone()]);

        storage.remove(&case.id).await.unwrap();
        storage.remove(&case.id).await.unwrap();
        assert!(storage.load_all().await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_dir_loads_empty() {
        let storage = JsonDirStorage::new(temp_dir());
        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let storage = JsonDirStorage::new(temp_dir());
        let mut case = Case::new(&ContextSnapshot::default(), "x");
        case.id = CaseId::new("../escape");
        assert!(matches!(
            storage.put(&case).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
