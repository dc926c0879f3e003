//! The request/response contract agent workers implement, plus the offline
//! agents bundled with the daemon.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use duckbot_core::{AgentRequest, AgentResponse, DesktopAction, EventPayload};

/// Errors an agent worker can return instead of a response.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Agent error: {0}")]
    Internal(String),
}

/// An agent worker. This is the only surface a new agent type implements;
/// the coordinator picks workers by the capabilities they register with.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Offline agent that acknowledges the intent without doing inference.
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        debug!(agent = %self.name, task_id = %request.task_id, "Echo agent handling request");
        Ok(AgentResponse::succeeded(format!(
            "{} ({}) received: {}",
            self.name, request.capability, request.intent
        )))
    }
}

/// Offline agent that proposes a window layout sized to the windows opened
/// in the recent context.
pub struct LayoutAgent;

impl LayoutAgent {
    fn layout_for(window_count: usize) -> &'static str {
        match window_count {
            0..=2 => "side_by_side",
            3..=4 => "grid",
            _ => "adaptive_grid",
        }
    }
}

#[async_trait]
impl Agent for LayoutAgent {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let windows: Vec<&str> = request
            .context
            .recent_events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::WindowCreated { app, .. } => Some(app.as_str()),
                _ => None,
            })
            .collect();
        let layout = Self::layout_for(windows.len());
        let workspace = request.context.active_workspace.clone();

        let action = DesktopAction::new("apply_layout").with_params(json!({
            "layout": layout,
            "workspace": workspace,
            "windows": windows,
        }));
        Ok(AgentResponse::succeeded(format!(
            "Arrange {} window(s) as {layout}",
            windows.len()
        ))
        .with_action(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckbot_core::{ContextSnapshot, DesktopEvent, TaskId};

    fn request(context: ContextSnapshot) -> AgentRequest {
        AgentRequest {
            task_id: TaskId::generate(),
            intent: "tile my windows".to_string(),
            capability: "automation".to_string(),
            context,
        }
    }

    #[tokio::test]
    async fn test_layout_agent_scales_with_windows() {
        let mut context = ContextSnapshot::default().with_workspace("2");
        for app in ["code", "firefox", "terminal"] {
            context
                .recent_events
                .push_back(DesktopEvent::window_created(app, app));
        }
        let response = LayoutAgent.handle(request(context)).await.unwrap();
        assert!(response.is_success());
        let action = response.action.unwrap();
        assert_eq!(action.name, "apply_layout");
        assert_eq!(action.params["layout"], "grid");
        assert_eq!(action.params["workspace"], "2");
    }

    #[tokio::test]
    async fn test_echo_agent_has_no_action() {
        let response = EchoAgent::new("Research Specialist")
            .handle(request(ContextSnapshot::default()))
            .await
            .unwrap();
        assert!(response.action.is_none());
        assert!(response.result.contains("tile my windows"));
    }
}
