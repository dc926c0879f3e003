//! Status and priority enums for Tasks and agent handles.

use serde::{Deserialize, Serialize};

/// Status of a Task in the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task created but no agent handle claimed yet.
    #[default]
    Pending,
    /// An agent handle has been claimed for the task.
    Dispatched,
    /// The agent is working on the task.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed; see the task's failure reason.
    Failed,
    /// Task was explicitly skipped and counts as done for its parent.
    Skipped,
    /// Task was cancelled by the user or system.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the task counts as done for its parent.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Urgency of a Task. Higher priorities are served first when several
/// tasks wait for the same kind of agent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    Emergency,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// Liveness of an agent handle in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AgentLiveness {
    /// Handle is ready to be claimed.
    #[default]
    Idle = 0,
    /// Handle is claimed by a task.
    Busy = 1,
    /// Handle timed out and will not be claimed until marked reachable.
    Unreachable = 2,
}

impl AgentLiveness {
    /// Encode for storage in an atomic.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from an atomic; unknown values read as Unreachable.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Unreachable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Unreachable => "unreachable",
        }
    }
}
