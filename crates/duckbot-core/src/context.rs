//! Rolling desktop context and its fingerprint.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::DesktopEvent;
use crate::ids::SessionId;

/// Default bound on `recent_events`.
pub const DEFAULT_RECENT_EVENTS: usize = 50;

/// Point-in-time view of the desktop session.
///
/// Consumers always receive an owned copy; the builder keeps the only
/// mutable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Session this snapshot belongs to.
    pub session_id: SessionId,
    /// Application owning the focused window.
    pub focused_app: Option<String>,
    /// Currently active workspace.
    pub active_workspace: Option<String>,
    /// Most recent events, oldest first.
    pub recent_events: VecDeque<DesktopEvent>,
    /// Tags derived from the rule set.
    pub derived_tags: BTreeSet<String>,
    /// Timestamp of the last merged event.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContextSnapshot {
    /// Create an empty snapshot for a session.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            focused_app: None,
            active_workspace: None,
            recent_events: VecDeque::new(),
            derived_tags: BTreeSet::new(),
            updated_at: None,
        }
    }

    /// Builder method to set the focused app.
    pub fn with_focused_app(mut self, app: impl Into<String>) -> Self {
        self.focused_app = Some(app.into());
        self
    }

    /// Builder method to set the active workspace.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.active_workspace = Some(workspace.into());
        self
    }

    /// Builder method to add a derived tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.derived_tags.insert(tag.into());
        self
    }

    /// The most recently merged event.
    pub fn latest_event(&self) -> Option<&DesktopEvent> {
        self.recent_events.back()
    }

    /// Similarity features: derived tags plus the focused app and workspace.
    pub fn features(&self) -> BTreeSet<String> {
        salient_features(
            self.focused_app.as_deref(),
            self.active_workspace.as_deref(),
            &self.derived_tags,
        )
    }

    /// Fingerprint of the salient fields.
    pub fn fingerprint(&self) -> ContextFingerprint {
        ContextFingerprint::compute(
            self.focused_app.as_deref(),
            self.active_workspace.as_deref(),
            &self.derived_tags,
        )
    }
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self::new(SessionId::new("default"))
    }
}

pub(crate) fn salient_features(
    focused_app: Option<&str>,
    workspace: Option<&str>,
    tags: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut features = tags.clone();
    if let Some(app) = focused_app {
        features.insert(format!("app:{}", app.to_lowercase()));
    }
    if let Some(ws) = workspace {
        features.insert(format!("workspace:{ws}"));
    }
    features
}

/// Hex-encoded SHA-256 over a context's salient fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextFingerprint(String);

impl ContextFingerprint {
    /// Compute a fingerprint. Pure: equal inputs always give equal output.
    pub fn compute(
        focused_app: Option<&str>,
        workspace: Option<&str>,
        tags: &BTreeSet<String>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"app\0");
        hasher.update(focused_app.unwrap_or_default().to_lowercase().as_bytes());
        hasher.update(b"\0workspace\0");
        hasher.update(workspace.unwrap_or_default().as_bytes());
        hasher.update(b"\0tags");
        // BTreeSet iteration is sorted, so tag order never matters.
        for tag in tags {
            hasher.update(b"\0");
            hasher.update(tag.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Jaccard similarity of two feature sets; two empty sets score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_idempotent() {
        let snapshot = ContextSnapshot::default()
            .with_focused_app("code")
            .with_workspace("2")
            .with_tag("coding")
            .with_tag("morning");
        assert_eq!(snapshot.fingerprint(), snapshot.fingerprint());
        assert_eq!(snapshot.fingerprint(), snapshot.clone().fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_recent_events() {
        let a = ContextSnapshot::default().with_focused_app("code");
        let mut b = a.clone();
        b.recent_events
            .push_back(DesktopEvent::window_focused("code"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_apps() {
        let a = ContextSnapshot::default().with_focused_app("code");
        let b = ContextSnapshot::default().with_focused_app("firefox");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<String> = ["coding", "morning"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["coding", "evening"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_features_include_app_and_workspace() {
        let snapshot = ContextSnapshot::default()
            .with_focused_app("Code")
            .with_workspace("dev")
            .with_tag("coding");
        let features = snapshot.features();
        assert!(features.contains("app:code"));
        assert!(features.contains("workspace:dev"));
        assert!(features.contains("coding"));
    }
}
