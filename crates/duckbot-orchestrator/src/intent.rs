//! Keyword table mapping spoken intents to capability tags and priority.

use std::collections::BTreeSet;

use serde::Deserialize;

use duckbot_core::TaskPriority;

/// Capability assigned when no keyword matches.
pub const FALLBACK_CAPABILITY: &str = "general";

/// One row of the table: any keyword selects the capability.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentRule {
    pub capability: String,
    /// Word prefixes, matched case-insensitively ("document" matches
    /// "documentation").
    pub keywords: Vec<String>,
}

/// Any keyword raises the intent to `priority`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriorityRule {
    pub priority: TaskPriority,
    pub keywords: Vec<String>,
}

/// Keyword table. Loaded from config so new capabilities need no code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntentRules {
    pub rules: Vec<IntentRule>,
    pub fallback: String,
    pub priorities: Vec<PriorityRule>,
}

impl IntentRules {
    /// Capabilities an intent requires; never empty.
    pub fn capabilities_for(&self, intent: &str) -> BTreeSet<String> {
        let words = words(intent);
        let mut capabilities: BTreeSet<String> = self
            .rules
            .iter()
            .filter(|rule| mentions(&words, &rule.keywords))
            .map(|rule| rule.capability.clone())
            .collect();

        if capabilities.is_empty() {
            capabilities.insert(self.fallback.clone());
        }
        capabilities
    }

    /// Highest priority any keyword asks for; Medium otherwise.
    pub fn priority_for(&self, intent: &str) -> TaskPriority {
        let words = words(intent);
        self.priorities
            .iter()
            .filter(|rule| mentions(&words, &rule.keywords))
            .map(|rule| rule.priority)
            .max()
            .unwrap_or_default()
    }
}

fn words(intent: &str) -> Vec<String> {
    intent
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn mentions(words: &[String], keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        words.iter().any(|w| w.starts_with(&keyword))
    })
}

fn rule(capability: &str, keywords: &[&str]) -> IntentRule {
    IntentRule {
        capability: capability.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn priority(priority: TaskPriority, keywords: &[&str]) -> PriorityRule {
    PriorityRule {
        priority,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

impl Default for IntentRules {
    fn default() -> Self {
        Self {
            rules: vec![
                rule(
                    "coding",
                    &["code", "bug", "debug", "compile", "refactor", "program", "fix"],
                ),
                rule(
                    "research",
                    &["search", "find", "research", "lookup", "compare"],
                ),
                rule(
                    "automation",
                    &["layout", "arrange", "tile", "window", "workspace", "launch", "automat"],
                ),
                rule(
                    "documentation",
                    &["document", "readme", "write", "note", "summar"],
                ),
                rule("communication", &["email", "mail", "message", "reply"]),
                rule("system", &["install", "update", "monitor", "disk", "cpu"]),
            ],
            fallback: FALLBACK_CAPABILITY.to_string(),
            priorities: vec![
                priority(TaskPriority::Low, &["later", "whenever", "eventually"]),
                priority(TaskPriority::High, &["urgent", "asap", "immediately", "quick"]),
                priority(TaskPriority::Critical, &["critical", "broken", "outage"]),
                priority(TaskPriority::Emergency, &["emergency"]),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_capability() {
        let rules = IntentRules::default();
        assert_eq!(
            rules.capabilities_for("Tile my windows"),
            BTreeSet::from(["automation".to_string()])
        );
    }

    #[test]
    fn test_multiple_capabilities() {
        let rules = IntentRules::default();
        let caps = rules.capabilities_for("fix the parser bug and write documentation");
        assert_eq!(
            caps,
            BTreeSet::from(["coding".to_string(), "documentation".to_string()])
        );
    }

    #[test]
    fn test_fallback() {
        let rules = IntentRules::default();
        assert_eq!(
            rules.capabilities_for("hello there"),
            BTreeSet::from([FALLBACK_CAPABILITY.to_string()])
        );
    }

    #[test]
    fn test_priority_keywords() {
        let rules = IntentRules::default();
        assert_eq!(rules.priority_for("tile my windows"), TaskPriority::Medium);
        assert_eq!(rules.priority_for("Urgent: fix the build"), TaskPriority::High);
        assert_eq!(
            rules.priority_for("urgent, the server is broken"),
            TaskPriority::Critical
        );
        assert_eq!(rules.priority_for("summarize this later"), TaskPriority::Low);
    }

    #[test]
    fn test_custom_rules_from_json() {
        let rules: IntentRules = serde_json::from_str(
            r#"{"rules":[{"capability":"music","keywords":["play","song"]}]}"#,
        )
        .unwrap();
        assert_eq!(rules.fallback, FALLBACK_CAPABILITY);
        assert!(rules.capabilities_for("play a song").contains("music"));
        assert_eq!(rules.priority_for("play a song asap"), TaskPriority::High);
    }
}
