//! Core domain errors.

use thiserror::Error;

/// Core domain errors for DuckBot.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Subtasks do not cover the parent's required capabilities.
    #[error("Task '{task}' has uncovered capabilities: {missing:?}")]
    UncoveredCapabilities { task: String, missing: Vec<String> },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
