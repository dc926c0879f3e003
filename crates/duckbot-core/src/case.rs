//! Cases for case-based recall: (context, action, outcome) triples.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{salient_features, ContextFingerprint, ContextSnapshot};
use crate::ids::CaseId;

/// Salient fields of the snapshot a case was recorded in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseContext {
    pub focused_app: Option<String>,
    pub active_workspace: Option<String>,
    pub tags: BTreeSet<String>,
}

impl CaseContext {
    /// Similarity features, matching [`ContextSnapshot::features`].
    pub fn features(&self) -> BTreeSet<String> {
        salient_features(
            self.focused_app.as_deref(),
            self.active_workspace.as_deref(),
            &self.tags,
        )
    }

    pub fn fingerprint(&self) -> ContextFingerprint {
        ContextFingerprint::compute(
            self.focused_app.as_deref(),
            self.active_workspace.as_deref(),
            &self.tags,
        )
    }
}

impl From<&ContextSnapshot> for CaseContext {
    fn from(snapshot: &ContextSnapshot) -> Self {
        Self {
            focused_app: snapshot.focused_app.clone(),
            active_workspace: snapshot.active_workspace.clone(),
            tags: snapshot.derived_tags.clone(),
        }
    }
}

/// What happened after an action was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure {
        reason: String,
    },
    UserFeedback {
        positive: bool,
        #[serde(default)]
        note: Option<String>,
    },
}

impl Outcome {
    /// How much this outcome supports repeating the action.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Failure { .. } => 0.0,
            Self::UserFeedback { positive: true, .. } => 0.9,
            Self::UserFeedback { positive: false, .. } => 0.1,
        }
    }
}

/// A remembered case.
///
/// Immutable once stored except for appended outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub context: CaseContext,
    /// Filled in by the memory store when absent.
    #[serde(default)]
    pub fingerprint: Option<ContextFingerprint>,
    /// Action taken in this context.
    pub action: String,
    /// Outcomes, oldest first.
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    pub stored_at: DateTime<Utc>,
}

impl Case {
    /// Create a case for an action taken in a snapshot.
    pub fn new(snapshot: &ContextSnapshot, action: impl Into<String>) -> Self {
        Self {
            id: CaseId::generate(),
            context: CaseContext::from(snapshot),
            fingerprint: None,
            action: action.into(),
            outcomes: Vec::new(),
            stored_at: Utc::now(),
        }
    }

    /// Builder method to record an initial outcome.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcomes.push(outcome);
        self
    }

    /// Builder method to set `stored_at` (useful for testing).
    pub fn with_stored_at(mut self, stored_at: DateTime<Utc>) -> Self {
        self.stored_at = stored_at;
        self
    }

    /// The fingerprint, computing it when not yet set.
    pub fn ensure_fingerprint(&mut self) -> &ContextFingerprint {
        self.fingerprint
            .get_or_insert_with(|| self.context.fingerprint())
    }

    pub fn latest_outcome(&self) -> Option<&Outcome> {
        self.outcomes.last()
    }

    /// Weight of the latest outcome; 0.5 when no outcome is known yet.
    pub fn outcome_weight(&self) -> f64 {
        self.latest_outcome().map_or(0.5, Outcome::weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_captures_salient_fields() {
        let snapshot = ContextSnapshot::default()
            .with_focused_app("code")
            .with_workspace("1")
            .with_tag("coding");
        let mut case = Case::new(&snapshot, "apply_layout");
        assert!(case.fingerprint.is_none());
        let fingerprint = case.ensure_fingerprint().clone();
        assert_eq!(fingerprint, snapshot.fingerprint());
        assert_eq!(case.context.features(), snapshot.features());
    }

    #[test]
    fn test_outcome_weight_uses_latest() {
        let snapshot = ContextSnapshot::default();
        let mut case = Case::new(&snapshot, "focus_window");
        assert_eq!(case.outcome_weight(), 0.5);
        case.outcomes.push(Outcome::Success);
        case.outcomes.push(Outcome::UserFeedback {
            positive: false,
            note: None,
        });
        assert_eq!(case.outcome_weight(), 0.1);
    }
}
