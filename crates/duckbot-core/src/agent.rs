//! Agent descriptors and the request/response contract agents implement.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;
use crate::ids::{AgentId, TaskId};

/// Information about an agent worker's capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Unique agent identifier.
    pub agent_id: AgentId,

    /// Human-readable name.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Capability tags this agent can serve.
    pub capabilities: BTreeSet<String>,

    /// Agent-level labels (model, host, etc.).
    pub labels: HashMap<String, String>,
}

impl AgentInfo {
    /// Create a new AgentInfo.
    pub fn new(agent_id: AgentId, name: impl Into<String>) -> Self {
        Self {
            agent_id,
            name: name.into(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            labels: HashMap::new(),
        }
    }

    /// Check if this agent declares a capability.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Builder method to add a capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Builder method to set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder method to add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Running performance counters for an agent handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
}

impl AgentStats {
    /// Fraction of finished requests that succeeded; 1.0 before any history.
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed + self.timeouts;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }
}

/// A desktop-affecting action proposed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopAction {
    /// Action name, matched against the router's allow-list.
    pub name: String,
    /// Action parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl DesktopAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Builder method to set parameters.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Request sent to an agent worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub task_id: TaskId,
    pub intent: String,
    /// The capability this request exercises.
    pub capability: String,
    pub context: ContextSnapshot,
}

/// Whether the agent handled the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseStatus {
    Succeeded,
    Failed { message: String },
}

/// Response returned by an agent worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Human-readable result.
    pub result: String,
    pub status: ResponseStatus,
    /// Desktop action the agent proposes, if any.
    #[serde(default)]
    pub action: Option<DesktopAction>,
}

impl AgentResponse {
    /// A successful response.
    pub fn succeeded(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            status: ResponseStatus::Succeeded,
            action: None,
        }
    }

    /// A failed response.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            result: String::new(),
            status: ResponseStatus::Failed { message },
            action: None,
        }
    }

    /// Builder method to attach a proposed action.
    pub fn with_action(mut self, action: DesktopAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ResponseStatus::Succeeded)
    }
}
