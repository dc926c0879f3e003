//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use duckbot_core::context::DEFAULT_RECENT_EVENTS;
use duckbot_core::TagRuleSet;

use crate::intent::IntentRules;

/// Upper bound for coordinator durations: one hour.
pub const MAX_COORDINATOR_MS: u64 = 60 * 60 * 1000;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub context: ContextConfig,
    pub memory: MemoryConfig,
    pub coordinator: CoordinatorConfig,
    pub router: RouterConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing fields keep defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.subscriber_capacity must be at least 1".to_string(),
            ));
        }
        if self.context.recent_events_limit == 0 {
            return Err(ConfigError::Invalid(
                "context.recent_events_limit must be at least 1".to_string(),
            ));
        }
        if self.memory.capacity == 0 {
            return Err(ConfigError::Invalid(
                "memory.capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory.min_similarity) {
            return Err(ConfigError::Invalid(
                "memory.min_similarity must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "router.confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.coordinator.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_attempts must be at least 1".to_string(),
            ));
        }
        let coordinator = &self.coordinator;
        if coordinator.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.initial_backoff_ms must be at least 1".to_string(),
            ));
        }
        if coordinator.max_backoff_ms < coordinator.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "coordinator.max_backoff_ms must not be below initial_backoff_ms".to_string(),
            ));
        }
        for (name, value) in [
            ("max_backoff_ms", coordinator.max_backoff_ms),
            ("dispatch_deadline_ms", coordinator.dispatch_deadline_ms),
            ("agent_timeout_ms", coordinator.agent_timeout_ms),
        ] {
            if value == 0 || value > MAX_COORDINATOR_MS {
                return Err(ConfigError::Invalid(format!(
                    "coordinator.{name} must be within 1..={MAX_COORDINATOR_MS}"
                )));
            }
        }
        Ok(())
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events buffered per subscriber before the oldest is dropped.
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

/// Context builder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Bound on the snapshot's recent events.
    pub recent_events_limit: usize,
    /// Rules deriving context tags.
    pub tag_rules: TagRuleSet,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_events_limit: DEFAULT_RECENT_EVENTS,
            tag_rules: TagRuleSet::default(),
        }
    }
}

/// Memory store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of cases kept.
    pub capacity: usize,
    /// Drop the oldest cases when full instead of rejecting stores.
    pub eviction_enabled: bool,
    /// Minimum similarity for a case to be returned by a query.
    pub min_similarity: f64,
    /// Number of cases consulted when computing confidence.
    pub query_limit: usize,
    /// Directory for persisted cases; in-memory when unset.
    pub storage_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            eviction_enabled: true,
            min_similarity: 0.2,
            query_limit: 5,
            storage_dir: None,
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// First retry delay while waiting for a capable agent.
    pub initial_backoff_ms: u64,
    /// Cap on the retry delay.
    pub max_backoff_ms: u64,
    /// How long a subtask may wait for a capable agent.
    pub dispatch_deadline_ms: u64,
    /// Timeout for a single agent request.
    pub agent_timeout_ms: u64,
    /// Agent-reported failures tolerated per subtask.
    pub max_attempts: u32,
    /// Keyword table mapping voice intents to capabilities.
    pub intent_rules: IntentRules,
}

impl CoordinatorConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn dispatch_deadline(&self) -> Duration {
        Duration::from_millis(self.dispatch_deadline_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            dispatch_deadline_ms: 10_000,
            agent_timeout_ms: 30_000,
            max_attempts: 3,
            intent_rules: IntentRules::default(),
        }
    }
}

/// Decision router settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum confidence to apply an allow-listed action without asking.
    pub confidence_threshold: f64,
    /// Actions that are safe to retry and may be applied directly.
    pub apply_allow_list: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            apply_allow_list: vec![
                "apply_layout".to_string(),
                "focus_window".to_string(),
                "switch_workspace".to_string(),
                "tile_windows".to_string(),
            ],
        }
    }
}

/// Status HTTP server settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address; the server is disabled when unset.
    pub bind_addr: Option<String>,
}
