//! Decisions handed to the desktop action executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::DesktopAction;
use crate::ids::TaskId;

/// How a coordination result is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Execute the actions directly.
    Apply,
    /// Show the user a message.
    Notify,
    /// Ask the user to confirm or disambiguate first.
    Ask,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Notify => "notify",
            Self::Ask => "ask",
        }
    }
}

/// Why the router chose a disposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Every action is allow-listed and confidence met the threshold.
    AllowListed,
    /// Confidence from past cases is below the threshold.
    LowConfidence { confidence: f64, threshold: f64 },
    /// An action is not on the allow-list.
    NotAllowListed { action: String },
    /// The task failed; these capabilities could not be satisfied.
    TaskFailed { capabilities: Vec<String> },
    /// The task was cancelled.
    Cancelled,
    /// The agents proposed no desktop action.
    NoAction,
}

/// Router output: `{disposition, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub task_id: TaskId,
    pub disposition: Disposition,
    pub reason: DecisionReason,
    /// User-visible message.
    pub message: String,
    /// Actions to apply (Apply) or to confirm (Ask).
    pub actions: Vec<DesktopAction>,
    /// Merged agent results, in subtask order.
    pub results: Vec<String>,
    /// Confidence derived from memory similarity.
    pub confidence: f64,
    /// True when only some subtasks produced results.
    pub partial: bool,
    pub created_at: DateTime<Utc>,
}
