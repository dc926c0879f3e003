//! Decision router - picks Apply, Notify or Ask for a coordination result.

use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;

use duckbot_core::{
    ContextSnapshot, Decision, DecisionReason, DesktopAction, Disposition, TaskStatus,
};

use crate::config::RouterConfig;
use crate::coordinator::CoordinationResult;

/// Risk tiering for agent results.
///
/// Only allow-listed actions backed by enough precedent confidence are
/// applied directly. Failures always notify, naming the capabilities that
/// could not be satisfied.
#[derive(Debug, Clone)]
pub struct DecisionRouter {
    threshold: f64,
    allow_list: HashSet<String>,
}

impl DecisionRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            allow_list: config.apply_allow_list.iter().cloned().collect(),
        }
    }

    pub fn is_allowed(&self, action: &DesktopAction) -> bool {
        self.allow_list.contains(&action.name)
    }

    pub fn route(&self, result: &CoordinationResult, context: &ContextSnapshot) -> Decision {
        let task = &result.task;
        let outputs = result.outputs();
        let results: Vec<String> = outputs.iter().map(|o| o.result.clone()).collect();
        let actions: Vec<DesktopAction> = outputs.iter().filter_map(|o| o.action.clone()).collect();

        let (disposition, reason, message, actions) = match task.status {
            TaskStatus::Failed => {
                let mut capabilities: Vec<String> = task
                    .failures()
                    .iter()
                    .filter_map(|f| f.capability().map(str::to_string))
                    .collect();
                capabilities.dedup();
                let mut message = if capabilities.is_empty() {
                    format!("Could not complete \"{}\"", task.intent)
                } else {
                    format!(
                        "Could not complete \"{}\": no agent could handle {}",
                        task.intent,
                        capabilities.join(", ")
                    )
                };
                if !results.is_empty() {
                    message.push_str(&format!(". Partial results: {}", results.join("; ")));
                }
                (
                    Disposition::Notify,
                    DecisionReason::TaskFailed { capabilities },
                    message,
                    Vec::new(),
                )
            }
            TaskStatus::Cancelled => (
                Disposition::Notify,
                DecisionReason::Cancelled,
                format!("Cancelled \"{}\"", task.intent),
                Vec::new(),
            ),
            TaskStatus::Completed | TaskStatus::Skipped if actions.is_empty() => (
                Disposition::Notify,
                DecisionReason::NoAction,
                results.join("\n"),
                Vec::new(),
            ),
            TaskStatus::Completed | TaskStatus::Skipped => {
                if let Some(blocked) = actions.iter().find(|a| !self.is_allowed(a)) {
                    (
                        Disposition::Notify,
                        DecisionReason::NotAllowListed {
                            action: blocked.name.clone(),
                        },
                        format!("Suggested: {}", results.join("\n")),
                        actions,
                    )
                } else if result.confidence < self.threshold {
                    (
                        Disposition::Ask,
                        DecisionReason::LowConfidence {
                            confidence: result.confidence,
                            threshold: self.threshold,
                        },
                        format!("Apply this? {}", results.join("\n")),
                        actions,
                    )
                } else {
                    (
                        Disposition::Apply,
                        DecisionReason::AllowListed,
                        results.join("\n"),
                        actions,
                    )
                }
            }
            TaskStatus::Pending | TaskStatus::Dispatched | TaskStatus::Running => (
                Disposition::Notify,
                DecisionReason::NoAction,
                format!("\"{}\" is still in progress", task.intent),
                Vec::new(),
            ),
        };

        debug!(
            task_id = %task.id,
            disposition = disposition.as_str(),
            confidence = result.confidence,
            focused_app = ?context.focused_app,
            "Routed decision"
        );

        Decision {
            task_id: task.id.clone(),
            disposition,
            reason,
            message,
            actions,
            results,
            confidence: result.confidence,
            partial: result.is_partial(),
            created_at: Utc::now(),
        }
    }
}
