//! Task trees dispatched to agent workers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::DesktopAction;
use crate::error::CoreError;
use crate::ids::{AgentId, TaskId};
use crate::status::{TaskPriority, TaskStatus};

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// No handle with the capability became available before the deadline.
    #[error("no agent available with capability '{capability}'")]
    NoCapableAgent { capability: String },

    /// Every capable handle timed out.
    #[error("agents for '{capability}' timed out after {attempts} attempt(s)")]
    AgentTimeout { capability: String, attempts: u32 },

    /// Agents reported failure until the attempt budget ran out.
    #[error("agent for '{capability}' failed: {message}")]
    AgentFailed { capability: String, message: String },

    /// The task was cancelled before it finished.
    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// The capability that could not be satisfied, if any.
    pub fn capability(&self) -> Option<&str> {
        match self {
            Self::NoCapableAgent { capability }
            | Self::AgentTimeout { capability, .. }
            | Self::AgentFailed { capability, .. } => Some(capability),
            Self::Cancelled => None,
        }
    }
}

/// Result an agent produced for a leaf task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub agent_id: AgentId,
    pub result: String,
    #[serde(default)]
    pub action: Option<DesktopAction>,
}

/// A unit of agent work. Subtasks are owned by their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// What the user asked for.
    pub intent: String,

    /// Capability tags needed to fulfil the task.
    pub required_capabilities: BTreeSet<String>,

    /// Current task status.
    pub status: TaskStatus,

    /// Urgency; subtasks inherit it from their parent.
    #[serde(default)]
    pub priority: TaskPriority,

    /// Ordered subtasks.
    #[serde(default)]
    pub subtasks: Vec<Task>,

    /// Agent currently or last assigned (leaves only).
    pub assigned_agent: Option<AgentId>,

    /// Number of dispatch attempts made (leaves only).
    pub attempts: u32,

    /// Agent output once completed (leaves only).
    pub output: Option<TaskOutput>,

    /// Failure reason once failed or cancelled.
    pub failure: Option<FailureReason>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new Task.
    pub fn new<I, S>(intent: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: TaskId::generate(),
            intent: intent.into(),
            required_capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            subtasks: Vec::new(),
            assigned_agent: None,
            attempts: 0,
            output: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to append a subtask.
    pub fn with_subtask(mut self, subtask: Task) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// Split a multi-capability leaf into one subtask per capability.
    ///
    /// Tasks that already have subtasks, or need a single capability, are
    /// returned unchanged.
    pub fn decompose(mut self) -> Self {
        if self.subtasks.is_empty() && self.required_capabilities.len() > 1 {
            self.subtasks = self
                .required_capabilities
                .iter()
                .map(|cap| {
                    Task::new(self.intent.clone(), [cap.clone()]).with_priority(self.priority)
                })
                .collect();
        }
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Capability label used in logs and failure reasons.
    pub fn capability_label(&self) -> String {
        self.required_capabilities
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Label a memory case records for this task: the proposed action
    /// names joined with `+`, or the capability label when no agent
    /// proposed an action.
    pub fn action_label(&self) -> String {
        let names: Vec<&str> = self
            .outputs()
            .into_iter()
            .filter_map(|o| o.action.as_ref())
            .map(|a| a.name.as_str())
            .collect();
        if names.is_empty() {
            self.capability_label()
        } else {
            names.join("+")
        }
    }

    /// Check that every task's subtasks cover its required capabilities.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.required_capabilities.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "task {} requires no capabilities",
                self.id
            )));
        }
        if self.is_leaf() {
            return Ok(());
        }
        let covered: BTreeSet<&String> = self
            .subtasks
            .iter()
            .flat_map(|s| s.required_capabilities.iter())
            .collect();
        let missing: Vec<String> = self
            .required_capabilities
            .iter()
            .filter(|cap| !covered.contains(cap))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::UncoveredCapabilities {
                task: self.id.to_string(),
                missing,
            });
        }
        self.subtasks.iter().try_for_each(Task::validate)
    }

    fn transition(&mut self, allowed: &[TaskStatus], to: TaskStatus) -> Result<(), CoreError> {
        if !allowed.contains(&self.status) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Pending -> Dispatched, recording the claimed agent.
    pub fn mark_dispatched(&mut self, agent_id: AgentId) -> Result<(), CoreError> {
        self.transition(&[TaskStatus::Pending], TaskStatus::Dispatched)?;
        self.assigned_agent = Some(agent_id);
        self.attempts += 1;
        Ok(())
    }

    /// Dispatched -> Running.
    pub fn mark_running(&mut self) -> Result<(), CoreError> {
        self.transition(&[TaskStatus::Dispatched], TaskStatus::Running)
    }

    /// Back to Pending so the task can be rescheduled on another handle.
    pub fn requeue(&mut self) -> Result<(), CoreError> {
        self.transition(
            &[TaskStatus::Dispatched, TaskStatus::Running],
            TaskStatus::Pending,
        )
    }

    /// Running -> Completed.
    pub fn complete(&mut self, output: TaskOutput) -> Result<(), CoreError> {
        self.transition(&[TaskStatus::Running], TaskStatus::Completed)?;
        self.output = Some(output);
        Ok(())
    }

    /// Any non-terminal state -> Failed.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), CoreError> {
        self.transition(
            &[
                TaskStatus::Pending,
                TaskStatus::Dispatched,
                TaskStatus::Running,
            ],
            TaskStatus::Failed,
        )?;
        self.failure = Some(reason);
        Ok(())
    }

    /// Pending -> Skipped. A skipped subtask counts as done for its parent.
    pub fn skip(&mut self) -> Result<(), CoreError> {
        self.transition(&[TaskStatus::Pending], TaskStatus::Skipped)
    }

    /// Cancel this task and every subtask that has not finished.
    /// Finished subtasks keep their status.
    pub fn cancel(&mut self) {
        for subtask in &mut self.subtasks {
            subtask.cancel();
        }
        if !self.status.is_terminal() {
            self.status = TaskStatus::Cancelled;
            self.failure = Some(FailureReason::Cancelled);
            self.finished_at = Some(Utc::now());
        }
    }

    /// Recompute parent statuses bottom-up from their subtasks.
    pub fn aggregate(&mut self) {
        if self.is_leaf() {
            return;
        }
        for subtask in &mut self.subtasks {
            subtask.aggregate();
        }

        let statuses: Vec<TaskStatus> = self.subtasks.iter().map(|s| s.status).collect();
        let status = if statuses.iter().all(TaskStatus::is_done) {
            TaskStatus::Completed
        } else if statuses.contains(&TaskStatus::Failed) {
            TaskStatus::Failed
        } else if statuses.contains(&TaskStatus::Cancelled) {
            TaskStatus::Cancelled
        } else if statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::Dispatched | TaskStatus::Running))
        {
            TaskStatus::Running
        } else {
            TaskStatus::Pending
        };

        self.failure = match status {
            TaskStatus::Failed => self
                .subtasks
                .iter()
                .find(|s| s.status == TaskStatus::Failed)
                .and_then(|s| s.failure.clone()),
            TaskStatus::Cancelled => Some(FailureReason::Cancelled),
            _ => None,
        };
        if status.is_terminal() && !self.status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
    }

    /// Leaf tasks in depth-first order.
    pub fn leaves(&self) -> Vec<&Task> {
        if self.is_leaf() {
            return vec![self];
        }
        self.subtasks.iter().flat_map(Task::leaves).collect()
    }

    /// Mutable leaf tasks in depth-first order.
    pub fn leaves_mut(&mut self) -> Vec<&mut Task> {
        if self.subtasks.is_empty() {
            return vec![self];
        }
        self.subtasks.iter_mut().flat_map(Task::leaves_mut).collect()
    }

    /// Percentage of leaves that are completed or skipped.
    pub fn progress(&self) -> f64 {
        let leaves = self.leaves();
        let done = leaves.iter().filter(|t| t.status.is_done()).count();
        done as f64 * 100.0 / leaves.len() as f64
    }

    /// Failure reasons of failed leaves, in order.
    pub fn failures(&self) -> Vec<&FailureReason> {
        self.leaves()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .filter_map(|t| t.failure.as_ref())
            .collect()
    }

    /// Outputs of completed leaves, in order.
    pub fn outputs(&self) -> Vec<&TaskOutput> {
        self.leaves()
            .into_iter()
            .filter_map(|t| t.output.as_ref())
            .collect()
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
