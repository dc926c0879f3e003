//! Memory store - case-based recall of past contexts.
//!
//! Cases are matched by Jaccard similarity over context features rather
//! than by exact fingerprint, so partially matching contexts still recall
//! useful precedents.

mod storage;

pub use storage::{CaseStorage, InMemoryStorage, JsonDirStorage, StorageError};

use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use duckbot_core::{jaccard, Case, CaseId, ContextSnapshot, Outcome};

use crate::config::MemoryConfig;

/// Memory store errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Capacity reached and eviction is disabled.
    #[error("Memory store is full ({capacity} cases) and eviction is disabled")]
    StorageFull { capacity: usize },

    #[error("Case not found: {0}")]
    CaseNotFound(CaseId),

    #[error("Case already stored: {0}")]
    DuplicateCase(CaseId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A case returned by a query with its similarity to the query context.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCase {
    pub case: Case,
    pub similarity: f64,
}

impl ScoredCase {
    /// Similarity weighted by how well the case's action turned out.
    pub fn confidence(&self) -> f64 {
        self.similarity * self.case.outcome_weight()
    }
}

/// Case repository with bounded capacity.
pub struct MemoryStore {
    capacity: usize,
    eviction_enabled: bool,
    min_similarity: f64,
    cases: RwLock<Vec<Case>>,
    storage: Arc<dyn CaseStorage>,
}

impl MemoryStore {
    /// Open a store, warm-loading whatever the backend already holds.
    pub async fn open(
        config: &MemoryConfig,
        storage: Arc<dyn CaseStorage>,
    ) -> Result<Self, MemoryError> {
        let mut cases = storage.load_all().await?;
        cases.sort_by(|a, b| a.stored_at.cmp(&b.stored_at));
        for case in &mut cases {
            case.ensure_fingerprint();
        }

        let capacity = config.capacity.max(1);
        if cases.len() > capacity {
            let excess = cases.len() - capacity;
            if config.eviction_enabled {
                for case in cases.drain(..excess) {
                    storage.remove(&case.id).await?;
                }
                info!(evicted = excess, "Evicted cases over capacity on load");
            } else {
                warn!(
                    loaded = cases.len(),
                    capacity, "Loaded more cases than capacity; new stores will fail"
                );
            }
        }

        info!(cases = cases.len(), capacity, "Memory store opened");
        Ok(Self {
            capacity,
            eviction_enabled: config.eviction_enabled,
            min_similarity: config.min_similarity,
            cases: RwLock::new(cases),
            storage,
        })
    }

    /// An empty in-memory store.
    pub async fn in_memory(config: &MemoryConfig) -> Result<Self, MemoryError> {
        Self::open(config, Arc::new(InMemoryStorage::new())).await
    }

    /// Persist a case, computing its fingerprint if absent.
    ///
    /// The new case is written before anything is evicted, so a failed
    /// write leaves the store unchanged.
    pub async fn store(&self, mut case: Case) -> Result<CaseId, MemoryError> {
        case.ensure_fingerprint();

        let mut cases = self.cases.write().await;
        if cases.iter().any(|c| c.id == case.id) {
            return Err(MemoryError::DuplicateCase(case.id));
        }
        if cases.len() >= self.capacity && !self.eviction_enabled {
            return Err(MemoryError::StorageFull {
                capacity: self.capacity,
            });
        }

        self.storage.put(&case).await?;
        let id = case.id.clone();
        debug!(case_id = %id, action = %case.action, "Case stored");

        while cases.len() >= self.capacity {
            let oldest = cases
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.stored_at)
                .map(|(i, _)| i);
            let Some(index) = oldest else { break };
            let evicted = cases.remove(index);
            // A leftover record is trimmed again when the store is reopened.
            if let Err(e) = self.storage.remove(&evicted.id).await {
                warn!(case_id = %evicted.id, error = %e, "Failed to remove evicted case");
            }
            debug!(case_id = %evicted.id, "Evicted oldest case");
        }
        cases.push(case);
        Ok(id)
    }

    /// The `k` cases most similar to `snapshot`, best first.
    ///
    /// Cases below the minimum similarity are never returned; an empty
    /// result is not an error. Ties go to the most recently stored case.
    pub async fn query(&self, snapshot: &ContextSnapshot, k: usize) -> Vec<ScoredCase> {
        let features = snapshot.features();
        let cases = self.cases.read().await;

        let mut scored: Vec<ScoredCase> = cases
            .iter()
            .filter_map(|case| {
                let similarity = jaccard(&features, &case.context.features());
                (similarity > 0.0 && similarity >= self.min_similarity).then(|| ScoredCase {
                    case: case.clone(),
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.case.stored_at.cmp(&a.case.stored_at))
        });
        scored.truncate(k);
        scored
    }

    /// The `k` cases most similar to `snapshot` that recorded `action`,
    /// best first.
    pub async fn query_action(
        &self,
        snapshot: &ContextSnapshot,
        action: &str,
        k: usize,
    ) -> Vec<ScoredCase> {
        let mut matches = self.query(snapshot, usize::MAX).await;
        matches.retain(|m| m.case.action == action);
        matches.truncate(k);
        matches
    }

    /// Best confidence for repeating `action` in `snapshot`, with the
    /// precedents used. Cases that recorded a different action never
    /// count.
    pub async fn confidence(
        &self,
        snapshot: &ContextSnapshot,
        action: &str,
        k: usize,
    ) -> (f64, Vec<ScoredCase>) {
        let matches = self.query_action(snapshot, action, k).await;
        let confidence = matches
            .iter()
            .map(ScoredCase::confidence)
            .fold(0.0, f64::max);
        (confidence, matches)
    }

    /// Append an outcome to a stored case.
    pub async fn append_outcome(&self, id: &CaseId, outcome: Outcome) -> Result<(), MemoryError> {
        let mut cases = self.cases.write().await;
        let case = cases
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| MemoryError::CaseNotFound(id.clone()))?;
        case.outcomes.push(outcome);
        self.storage.put(case).await?;
        debug!(case_id = %id, outcomes = case.outcomes.len(), "Outcome appended");
        Ok(())
    }

    pub async fn get(&self, id: &CaseId) -> Option<Case> {
        self.cases.read().await.iter().find(|c| &c.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cases.read().await.is_empty()
    }
}
