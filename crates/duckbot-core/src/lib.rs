//! DuckBot Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - Storage engines
//! - The desktop session itself
//!
//! All types here describe the orchestration domain: desktop events, the
//! rolling context snapshot, case-based memory, agent tasks and the
//! decisions handed back to the desktop.

pub mod agent;
pub mod case;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod tags;
pub mod task;

// Re-export commonly used types
pub use agent::{AgentInfo, AgentRequest, AgentResponse, AgentStats, DesktopAction, ResponseStatus};
pub use case::{Case, CaseContext, Outcome};
pub use context::{jaccard, ContextFingerprint, ContextSnapshot};
pub use decision::{Decision, DecisionReason, Disposition};
pub use error::CoreError;
pub use event::{DesktopEvent, EventKind, EventPayload, FileChange};
pub use ids::{AgentId, CaseId, EventId, SessionId, TaskId};
pub use status::{AgentLiveness, TaskPriority, TaskStatus};
pub use tags::{TagCondition, TagRule, TagRuleSet};
pub use task::{FailureReason, Task, TaskOutput};
