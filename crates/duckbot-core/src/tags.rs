//! Data-driven rules that derive context tags.
//!
//! Rules are evaluated against a snapshot without side effects, so adding a
//! tag means adding a rule, not touching the context builder.

use std::collections::BTreeSet;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;
use crate::event::{EventKind, EventPayload};

/// A single tag rule: emit `tag` when `condition` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub condition: TagCondition,
}

impl TagRule {
    pub fn new(tag: impl Into<String>, condition: TagCondition) -> Self {
        Self {
            tag: tag.into(),
            condition,
        }
    }
}

/// Condition evaluated against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TagCondition {
    /// Focused app name contains any of the needles (case-insensitive).
    FocusedAppContains { any: Vec<String> },
    /// Active workspace equals any of the names.
    WorkspaceIs { any: Vec<String> },
    /// At least `count` recent events are of `kind`.
    RecentKindAtLeast { kind: EventKind, count: usize },
    /// A recent file change touched a path with one of the extensions.
    RecentFileExtension { any: Vec<String> },
    /// The latest event's UTC hour is in `[start_hour, end_hour)`.
    /// A range with `start_hour > end_hour` wraps midnight.
    HourBetween { start_hour: u32, end_hour: u32 },
}

impl TagCondition {
    fn holds(&self, snapshot: &ContextSnapshot) -> bool {
        match self {
            Self::FocusedAppContains { any } => match &snapshot.focused_app {
                Some(app) => {
                    let app = app.to_lowercase();
                    any.iter().any(|needle| app.contains(&needle.to_lowercase()))
                }
                None => false,
            },
            Self::WorkspaceIs { any } => snapshot
                .active_workspace
                .as_ref()
                .is_some_and(|ws| any.iter().any(|name| name == ws)),
            Self::RecentKindAtLeast { kind, count } => {
                *count > 0
                    && snapshot
                        .recent_events
                        .iter()
                        .filter(|e| e.kind() == *kind)
                        .count()
                        >= *count
            }
            Self::RecentFileExtension { any } => {
                snapshot.recent_events.iter().any(|e| match &e.payload {
                    EventPayload::FileChanged { path, .. } => {
                        let path = path.to_lowercase();
                        any.iter()
                            .any(|ext| path.ends_with(&format!(".{}", ext.to_lowercase())))
                    }
                    _ => false,
                })
            }
            Self::HourBetween {
                start_hour,
                end_hour,
            } => match snapshot.latest_event() {
                Some(event) => {
                    let hour = event.timestamp.hour();
                    if start_hour <= end_hour {
                        hour >= *start_hour && hour < *end_hour
                    } else {
                        hour >= *start_hour || hour < *end_hour
                    }
                }
                None => false,
            },
        }
    }
}

/// An ordered collection of tag rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRuleSet(Vec<TagRule>);

impl TagRuleSet {
    pub fn new(rules: Vec<TagRule>) -> Self {
        Self(rules)
    }

    /// An empty rule set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Builder method to add a rule.
    pub fn with_rule(mut self, rule: TagRule) -> Self {
        self.0.push(rule);
        self
    }

    pub fn rules(&self) -> &[TagRule] {
        &self.0
    }

    /// Derive the tag set for a snapshot.
    pub fn evaluate(&self, snapshot: &ContextSnapshot) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|rule| rule.condition.holds(snapshot))
            .map(|rule| rule.tag.clone())
            .collect()
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for TagRuleSet {
    fn default() -> Self {
        let app = |tag: &str, apps: &[&str]| {
            TagRule::new(tag, TagCondition::FocusedAppContains { any: words(apps) })
        };
        let hours = |tag: &str, start_hour, end_hour| {
            TagRule::new(
                tag,
                TagCondition::HourBetween {
                    start_hour,
                    end_hour,
                },
            )
        };

        Self(vec![
            app(
                "coding",
                &["code", "vscode", "vim", "nvim", "emacs", "sublime", "idea", "zed"],
            ),
            app(
                "terminal",
                &["terminal", "konsole", "xterm", "alacritty", "kitty"],
            ),
            app(
                "research",
                &["firefox", "chrome", "chromium", "safari", "edge"],
            ),
            app(
                "creative",
                &["gimp", "krita", "inkscape", "blender", "figma"],
            ),
            app(
                "communication",
                &["thunderbird", "slack", "discord", "telegram"],
            ),
            TagRule::new(
                "editing-files",
                TagCondition::RecentKindAtLeast {
                    kind: EventKind::FileChanged,
                    count: 3,
                },
            ),
            TagRule::new(
                "voice-active",
                TagCondition::RecentKindAtLeast {
                    kind: EventKind::VoiceCommand,
                    count: 1,
                },
            ),
            hours("morning", 6, 12),
            hours("afternoon", 12, 17),
            hours("evening", 17, 21),
            hours("night", 21, 6),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DesktopEvent, FileChange};
    use chrono::{TimeZone, Utc};

    fn snapshot_at(hour: u32) -> ContextSnapshot {
        let mut snapshot = ContextSnapshot::default();
        let at = Utc.with_ymd_and_hms(2025, 3, 4, hour, 30, 0).unwrap();
        snapshot
            .recent_events
            .push_back(DesktopEvent::window_focused("x").with_timestamp(at));
        snapshot
    }

    #[test]
    fn test_editor_yields_coding_tag() {
        let snapshot = ContextSnapshot::default().with_focused_app("Visual Studio Code");
        let tags = TagRuleSet::default().evaluate(&snapshot);
        assert!(tags.contains("coding"));
        assert!(!tags.contains("research"));
    }

    #[test]
    fn test_time_of_day_tags() {
        let rules = TagRuleSet::default();
        assert!(rules.evaluate(&snapshot_at(7)).contains("morning"));
        assert!(rules.evaluate(&snapshot_at(13)).contains("afternoon"));
        assert!(rules.evaluate(&snapshot_at(18)).contains("evening"));
        assert!(rules.evaluate(&snapshot_at(23)).contains("night"));
        assert!(rules.evaluate(&snapshot_at(2)).contains("night"));
    }

    #[test]
    fn test_new_rule_without_code_change() {
        let rules = TagRuleSet::empty().with_rule(TagRule::new(
            "rust",
            TagCondition::RecentFileExtension {
                any: vec!["rs".to_string()],
            },
        ));
        let mut snapshot = ContextSnapshot::default();
        snapshot
            .recent_events
            .push_back(DesktopEvent::file_changed("src/main.rs", FileChange::Modified));
        assert_eq!(
            rules.evaluate(&snapshot),
            BTreeSet::from(["rust".to_string()])
        );
    }

    #[test]
    fn test_rules_load_from_json() {
        let json = r#"[{"tag":"work","condition":{"type":"workspace_is","any":["2"]}}]"#;
        let rules: TagRuleSet = serde_json::from_str(json).unwrap();
        let snapshot = ContextSnapshot::default().with_workspace("2");
        assert!(rules.evaluate(&snapshot).contains("work"));
    }
}
