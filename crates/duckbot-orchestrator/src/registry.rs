//! Agent handle registry.
//!
//! The registry is the only structure mutated by several concurrent actors.
//! Claiming a handle is a single compare-and-swap from Idle to Busy, so two
//! dispatches can never hold the same handle.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use duckbot_core::{AgentId, AgentInfo, AgentLiveness, AgentStats};

use crate::agent::Agent;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent already registered: {0}")]
    AlreadyRegistered(AgentId),

    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error("Agent '{0}' declares no capabilities")]
    NoCapabilities(AgentId),

    #[error("Agent '{agent}' is {liveness:?}, expected {expected:?}")]
    WrongLiveness {
        agent: AgentId,
        liveness: AgentLiveness,
        expected: AgentLiveness,
    },
}

/// A registered agent worker and its liveness.
pub struct AgentHandle {
    info: AgentInfo,
    liveness: AtomicU8,
    stats: Mutex<AgentStats>,
    worker: Arc<dyn Agent>,
    registered_at: DateTime<Utc>,
}

impl AgentHandle {
    fn new(info: AgentInfo, worker: Arc<dyn Agent>) -> Self {
        Self {
            info,
            liveness: AtomicU8::new(AgentLiveness::Idle.as_u8()),
            stats: Mutex::new(AgentStats::default()),
            worker,
            registered_at: Utc::now(),
        }
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn liveness(&self) -> AgentLiveness {
        AgentLiveness::from_u8(self.liveness.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> AgentStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn supports_all(&self, capabilities: &BTreeSet<String>) -> bool {
        capabilities.iter().all(|cap| self.info.supports(cap))
    }

    fn transition(&self, from: AgentLiveness, to: AgentLiveness) -> bool {
        self.liveness
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn update_stats(&self, f: impl FnOnce(&mut AgentStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Exclusive hold on an agent handle.
///
/// Dropping the claim returns the handle to Idle unless it was marked
/// Unreachable.
pub struct AgentClaim {
    handle: Arc<AgentHandle>,
    released: bool,
}

impl AgentClaim {
    pub fn agent_id(&self) -> &AgentId {
        &self.handle.info.agent_id
    }

    pub fn worker(&self) -> Arc<dyn Agent> {
        self.handle.worker.clone()
    }

    pub fn record_success(&self) {
        self.handle.update_stats(|s| s.completed += 1);
    }

    pub fn record_failure(&self) {
        self.handle.update_stats(|s| s.failed += 1);
    }

    /// Flip the handle to Unreachable after a timeout. It will not be
    /// claimed again until marked reachable.
    pub fn mark_unreachable(mut self) {
        self.handle.update_stats(|s| s.timeouts += 1);
        if self
            .handle
            .transition(AgentLiveness::Busy, AgentLiveness::Unreachable)
        {
            warn!(agent_id = %self.agent_id(), "Agent marked unreachable");
        }
        self.released = true;
    }
}

impl Drop for AgentClaim {
    fn drop(&mut self) {
        if !self.released
            && self
                .handle
                .transition(AgentLiveness::Busy, AgentLiveness::Idle)
        {
            debug!(agent_id = %self.agent_id(), "Agent released");
        }
    }
}

/// Point-in-time view of a handle, for status and metrics.
#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub info: AgentInfo,
    pub liveness: AgentLiveness,
    pub stats: AgentStats,
    pub registered_at: DateTime<Utc>,
}

/// Registry of agent handles indexed by AgentId.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Arc<AgentHandle>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its declared capabilities.
    pub async fn register(
        &self,
        info: AgentInfo,
        worker: Arc<dyn Agent>,
    ) -> Result<(), RegistryError> {
        if info.capabilities.is_empty() {
            return Err(RegistryError::NoCapabilities(info.agent_id));
        }
        let mut agents = self.agents.write().await;
        if agents.contains_key(&info.agent_id) {
            return Err(RegistryError::AlreadyRegistered(info.agent_id));
        }
        info!(
            agent_id = %info.agent_id,
            name = %info.name,
            capabilities = ?info.capabilities,
            "Agent registered"
        );
        agents.insert(info.agent_id.clone(), Arc::new(AgentHandle::new(info, worker)));
        Ok(())
    }

    /// Remove a handle. An outstanding claim keeps the worker alive until
    /// it is dropped.
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<AgentInfo, RegistryError> {
        let handle = self
            .agents
            .write()
            .await
            .remove(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;
        info!(agent_id = %agent_id, "Agent deregistered");
        Ok(handle.info.clone())
    }

    /// Claim an Idle handle supporting every capability.
    ///
    /// Prefers the best success rate, then the lowest id. Returns `None`
    /// when no capable handle is Idle.
    pub async fn claim(
        &self,
        capabilities: &BTreeSet<String>,
        exclude: &HashSet<AgentId>,
    ) -> Option<AgentClaim> {
        let mut candidates: Vec<(f64, Arc<AgentHandle>)> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|h| !exclude.contains(&h.info.agent_id))
                .filter(|h| h.supports_all(capabilities))
                .filter(|h| h.liveness() == AgentLiveness::Idle)
                .map(|h| (h.stats().success_rate(), h.clone()))
                .collect()
        };
        candidates.sort_by(|(rate_a, a), (rate_b, b)| {
            rate_b
                .partial_cmp(rate_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.info.agent_id.cmp(&b.info.agent_id))
        });

        // Another dispatcher may win the swap between the filter and here;
        // fall through to the next candidate.
        for (_, handle) in candidates {
            if handle.transition(AgentLiveness::Idle, AgentLiveness::Busy) {
                debug!(agent_id = %handle.info.agent_id, "Agent claimed");
                return Some(AgentClaim {
                    handle,
                    released: false,
                });
            }
        }
        None
    }

    /// Return an Unreachable handle to Idle.
    pub async fn mark_reachable(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        let agents = self.agents.read().await;
        let handle = agents
            .get(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;
        if handle.transition(AgentLiveness::Unreachable, AgentLiveness::Idle) {
            info!(agent_id = %agent_id, "Agent reachable again");
            Ok(())
        } else {
            Err(RegistryError::WrongLiveness {
                agent: agent_id.clone(),
                liveness: handle.liveness(),
                expected: AgentLiveness::Unreachable,
            })
        }
    }

    pub async fn liveness(&self, agent_id: &AgentId) -> Option<AgentLiveness> {
        self.agents.read().await.get(agent_id).map(|h| h.liveness())
    }

    /// Summaries of every handle, sorted by id.
    pub async fn list(&self) -> Vec<AgentSummary> {
        let agents = self.agents.read().await;
        let mut summaries: Vec<AgentSummary> = agents
            .values()
            .map(|h| AgentSummary {
                info: h.info.clone(),
                liveness: h.liveness(),
                stats: h.stats(),
                registered_at: h.registered_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.info.agent_id.cmp(&b.info.agent_id));
        summaries
    }

    /// Get the number of registered agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EchoAgent;

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn registry_with(agents: &[(&str, Vec<&str>)]) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());
        for (id, capabilities) in agents {
            let mut info = AgentInfo::new(AgentId::new(*id), *id);
            for cap in capabilities {
                info = info.with_capability(*cap);
            }
            registry
                .register(info, Arc::new(EchoAgent::new(*id)))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_is_exclusive() {
        let registry = registry_with(&[("solo", vec!["coding"])]).await;

        let mut attempts = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            attempts.push(tokio::spawn(async move {
                registry.claim(&caps(&["coding"]), &HashSet::new()).await
            }));
        }
        let mut claims = Vec::new();
        for attempt in attempts {
            if let Some(claim) = attempt.await.unwrap() {
                claims.push(claim);
            }
        }
        assert_eq!(claims.len(), 1);
        assert_eq!(
            registry.liveness(&AgentId::new("solo")).await,
            Some(AgentLiveness::Busy)
        );
    }

    #[tokio::test]
    async fn test_drop_releases_claim() {
        let registry = registry_with(&[("dev", vec!["coding"])]).await;
        let claim = registry.claim(&caps(&["coding"]), &HashSet::new()).await;
        assert!(claim.is_some());
        assert!(registry
            .claim(&caps(&["coding"]), &HashSet::new())
            .await
            .is_none());
        drop(claim);
        assert!(registry
            .claim(&caps(&["coding"]), &HashSet::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_unreachable_until_marked_reachable() {
        let registry = registry_with(&[("dev", vec!["coding"])]).await;
        let id = AgentId::new("dev");
        let claim = registry
            .claim(&caps(&["coding"]), &HashSet::new())
            .await
            .unwrap();
        claim.mark_unreachable();
        assert_eq!(registry.liveness(&id).await, Some(AgentLiveness::Unreachable));
        assert!(registry
            .claim(&caps(&["coding"]), &HashSet::new())
            .await
            .is_none());

        registry.mark_reachable(&id).await.unwrap();
        assert!(registry
            .claim(&caps(&["coding"]), &HashSet::new())
            .await
            .is_some());
        assert!(matches!(
            registry.mark_reachable(&id).await,
            Err(RegistryError::WrongLiveness { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_requires_all_capabilities_and_prefers_success() {
        let registry = registry_with(&[
            ("a-flaky", vec!["coding", "documentation"]),
            ("b-steady", vec!["coding", "documentation"]),
            ("c-coder", vec!["coding"]),
        ])
        .await;

        let claim = registry
            .claim(&caps(&["coding", "documentation"]), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(claim.agent_id().as_str(), "a-flaky");
        claim.record_failure();
        drop(claim);

        let claim = registry
            .claim(&caps(&["coding", "documentation"]), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(claim.agent_id().as_str(), "b-steady");
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_empty() {
        let registry = registry_with(&[("dev", vec!["coding"])]).await;
        let err = registry
            .register(
                AgentInfo::new(AgentId::new("dev"), "dev").with_capability("coding"),
                Arc::new(EchoAgent::new("dev")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));

        let err = registry
            .register(
                AgentInfo::new(AgentId::new("idle"), "idle"),
                Arc::new(EchoAgent::new("idle")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoCapabilities(_)));
    }
}
