//! Desktop events emitted by the window manager, voice pipeline and file watchers.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// A desktop signal, immutable once published.
///
/// `seq` is assigned by the event bus on publish; events created by a
/// producer carry `0` until then. Events order by timestamp with ties broken
/// by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopEvent {
    /// Unique event identifier.
    #[serde(default = "EventId::generate")]
    pub id: EventId,
    /// Bus-assigned, monotonically increasing sequence number.
    #[serde(default)]
    pub seq: u64,
    /// When the event happened on the desktop.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Kind-specific fields.
    pub payload: EventPayload,
}

impl DesktopEvent {
    /// Create a new event stamped with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::generate(),
            seq: 0,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a WindowCreated event.
    pub fn window_created(app: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(EventPayload::WindowCreated {
            app: app.into(),
            title: title.into(),
            window_id: None,
        })
    }

    /// Create a WindowFocused event.
    pub fn window_focused(app: impl Into<String>) -> Self {
        Self::new(EventPayload::WindowFocused {
            app: app.into(),
            title: None,
        })
    }

    /// Create a WorkspaceChanged event.
    pub fn workspace_changed(workspace: impl Into<String>) -> Self {
        Self::new(EventPayload::WorkspaceChanged {
            workspace: workspace.into(),
        })
    }

    /// Create a VoiceCommand event.
    pub fn voice_command(transcript: impl Into<String>) -> Self {
        Self::new(EventPayload::VoiceCommand {
            transcript: transcript.into(),
            confidence: None,
        })
    }

    /// Create a FileChanged event.
    pub fn file_changed(path: impl Into<String>, change: FileChange) -> Self {
        Self::new(EventPayload::FileChanged {
            path: path.into(),
            change,
        })
    }

    /// Builder method to set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Total order used for delivery: timestamp, then bus sequence.
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Kind of a desktop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WindowCreated,
    WindowFocused,
    WorkspaceChanged,
    VoiceCommand,
    FileChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindowCreated => "window_created",
            Self::WindowFocused => "window_focused",
            Self::WorkspaceChanged => "workspace_changed",
            Self::VoiceCommand => "voice_command",
            Self::FileChanged => "file_changed",
        }
    }
}

/// Kind-specific event fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new window was mapped.
    WindowCreated {
        app: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        window_id: Option<u64>,
    },
    /// Input focus moved to a window.
    WindowFocused {
        app: String,
        #[serde(default)]
        title: Option<String>,
    },
    /// The active workspace changed.
    WorkspaceChanged { workspace: String },
    /// A transcribed voice command.
    VoiceCommand {
        transcript: String,
        /// Recognizer confidence in `[0, 1]`, if reported.
        #[serde(default)]
        confidence: Option<f32>,
    },
    /// A watched file changed.
    FileChanged { path: String, change: FileChange },
}

impl EventPayload {
    /// The kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WindowCreated { .. } => EventKind::WindowCreated,
            Self::WindowFocused { .. } => EventKind::WindowFocused,
            Self::WorkspaceChanged { .. } => EventKind::WorkspaceChanged,
            Self::VoiceCommand { .. } => EventKind::VoiceCommand,
            Self::FileChanged { .. } => EventKind::FileChanged,
        }
    }
}

/// Type of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChange {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_follows_payload() {
        assert_eq!(
            DesktopEvent::window_focused("editor").kind(),
            EventKind::WindowFocused
        );
        assert_eq!(
            DesktopEvent::voice_command("tile my windows").kind(),
            EventKind::VoiceCommand
        );
    }

    #[test]
    fn test_order_ties_broken_by_seq() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let mut a = DesktopEvent::window_focused("a").with_timestamp(at);
        let mut b = DesktopEvent::window_focused("b").with_timestamp(at);
        a.seq = 2;
        b.seq = 1;
        assert_eq!(a.order_cmp(&b), Ordering::Greater);

        let earlier = DesktopEvent::window_focused("c")
            .with_timestamp(at - chrono::Duration::seconds(1));
        assert_eq!(earlier.order_cmp(&b), Ordering::Less);
    }

    #[test]
    fn test_deserialize_producer_json() {
        let json = r#"{"payload":{"type":"window_focused","app":"firefox"}}"#;
        let event: DesktopEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.seq, 0);
        assert_eq!(
            event.payload,
            EventPayload::WindowFocused {
                app: "firefox".to_string(),
                title: None
            }
        );
    }
}
