//! Context builder - folds the event stream into a rolling snapshot.

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use duckbot_core::{ContextSnapshot, DesktopEvent, EventPayload, SessionId, TagRuleSet};

use crate::bus::Subscription;

/// Owns the single mutable snapshot of a session.
pub struct ContextBuilder {
    snapshot: ContextSnapshot,
    rules: TagRuleSet,
    limit: usize,
}

impl ContextBuilder {
    /// Create a builder keeping at most `limit` recent events.
    pub fn new(session_id: SessionId, rules: TagRuleSet, limit: usize) -> Self {
        Self {
            snapshot: ContextSnapshot::new(session_id),
            rules,
            limit: limit.max(1),
        }
    }

    /// Merge an event into the snapshot.
    pub fn on_event(&mut self, event: &DesktopEvent) {
        match &event.payload {
            EventPayload::WindowFocused { app, .. } => {
                self.snapshot.focused_app = Some(app.clone());
            }
            EventPayload::WorkspaceChanged { workspace } => {
                self.snapshot.active_workspace = Some(workspace.clone());
            }
            _ => {}
        }

        self.snapshot.recent_events.push_back(event.clone());
        while self.snapshot.recent_events.len() > self.limit {
            self.snapshot.recent_events.pop_front();
        }
        self.snapshot.updated_at = Some(event.timestamp);
        self.snapshot.derived_tags = self.rules.evaluate(&self.snapshot);

        debug!(
            seq = event.seq,
            kind = event.kind().as_str(),
            focused_app = ?self.snapshot.focused_app,
            tags = ?self.snapshot.derived_tags,
            "Context updated"
        );
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> ContextSnapshot {
        self.snapshot.clone()
    }

    /// Consume events until the subscription ends or `shutdown` fires,
    /// publishing a fresh copy after every merge.
    pub async fn run(
        mut self,
        subscription: Subscription,
        snapshots: watch::Sender<ContextSnapshot>,
        shutdown: CancellationToken,
    ) {
        info!(session_id = %self.snapshot.session_id, "Context builder started");
        let mut events = Box::pin(subscription.into_stream());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => {
                        self.on_event(&event);
                        snapshots.send_replace(self.snapshot());
                    }
                    None => break,
                },
            }
        }
        info!(session_id = %self.snapshot.session_id, "Context builder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn builder(limit: usize) -> ContextBuilder {
        ContextBuilder::new(SessionId::new("test"), TagRuleSet::default(), limit)
    }

    #[test]
    fn test_last_focus_wins() {
        let mut builder = builder(50);
        builder.on_event(&DesktopEvent::window_focused("editor"));
        builder.on_event(&DesktopEvent::window_focused("browser"));
        assert_eq!(builder.snapshot().focused_app.as_deref(), Some("browser"));
    }

    #[test]
    fn test_workspace_replaced() {
        let mut builder = builder(50);
        builder.on_event(&DesktopEvent::workspace_changed("1"));
        builder.on_event(&DesktopEvent::voice_command("hello"));
        builder.on_event(&DesktopEvent::workspace_changed("3"));
        let snapshot = builder.snapshot();
        assert_eq!(snapshot.active_workspace.as_deref(), Some("3"));
        assert_eq!(snapshot.recent_events.len(), 3);
    }

    #[test]
    fn test_recent_events_bounded_fifo() {
        let mut builder = builder(5);
        for i in 0..500u64 {
            let mut event = DesktopEvent::workspace_changed(i.to_string());
            event.seq = i + 1;
            builder.on_event(&event);
            assert!(builder.snapshot().recent_events.len() <= 5);
        }
        let seqs: Vec<u64> = builder
            .snapshot()
            .recent_events
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![496, 497, 498, 499, 500]);
    }

    #[test]
    fn test_tags_recomputed() {
        let mut builder = builder(50);
        builder.on_event(&DesktopEvent::window_focused("nvim"));
        assert!(builder.snapshot().derived_tags.contains("coding"));
        builder.on_event(&DesktopEvent::window_focused("firefox"));
        let tags = builder.snapshot().derived_tags;
        assert!(!tags.contains("coding"));
        assert!(tags.contains("research"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut builder = builder(50);
        builder.on_event(&DesktopEvent::window_focused("editor"));
        let before = builder.snapshot();
        builder.on_event(&DesktopEvent::window_focused("browser"));
        assert_eq!(before.focused_app.as_deref(), Some("editor"));
    }

    #[tokio::test]
    async fn test_run_publishes_snapshots() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = watch::channel(ContextSnapshot::default());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(builder(50).run(bus.subscribe_all(), tx, shutdown.clone()));

        bus.publish(DesktopEvent::window_focused("editor")).unwrap();
        bus.publish(DesktopEvent::window_focused("browser")).unwrap();

        rx.wait_for(|s| s.recent_events.len() == 2).await.unwrap();
        assert_eq!(rx.borrow().focused_app.as_deref(), Some("browser"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
