//! HTTP status server.
//!
//! Read-only views of the session and its tasks, plus two write endpoints
//! for desktop integrations that cannot use stdin: publishing events and
//! sending feedback on a recorded case.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use duckbot_core::{CaseId, DesktopEvent, TaskId};

use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Request body for the feedback endpoint.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub positive: bool,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub seq: u64,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create the HTTP router.
pub fn create_router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/context", get(context))
        .route("/v1/events", post(publish_event))
        .route("/v1/tasks/:id", get(task_status))
        .route("/v1/cases/:id/feedback", post(feedback))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        orchestrator.metrics().await,
    )
}

/// Current context snapshot.
async fn context(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    Json(orchestrator.snapshot())
}

async fn publish_event(
    State(orchestrator): State<Orchestrator>,
    Json(event): Json<DesktopEvent>,
) -> impl IntoResponse {
    match orchestrator.publish(event) {
        Ok(seq) => (StatusCode::ACCEPTED, Json(PublishResponse { seq })).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// Status and progress of a running or recently finished task.
async fn task_status(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task_id = TaskId::new(id);
    match orchestrator.task_status(&task_id) {
        Some(view) => Json(view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Task not found: {task_id}")),
    }
}

async fn feedback(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let case_id = CaseId::new(id);
    match orchestrator
        .record_feedback(&case_id, req.positive, req.note)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(OrchestratorError::Memory(crate::memory::MemoryError::CaseNotFound(_))) => {
            error_response(StatusCode::NOT_FOUND, format!("Case not found: {case_id}"))
        }
        Err(e) => {
            warn!(case_id = %case_id, error = %e, "Failed to record feedback");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    use duckbot_core::{AgentId, AgentInfo};

    use crate::agent::EchoAgent;
    use crate::config::Config;
    use crate::memory::InMemoryStorage;
    use crate::sink::ChannelSink;

    async fn orchestrator() -> Orchestrator {
        let (sink, _rx) = ChannelSink::new();
        Orchestrator::init(
            Config::default(),
            Arc::new(InMemoryStorage::new()),
            Arc::new(sink),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_context() {
        let orchestrator = orchestrator().await;
        let app = create_router(orchestrator.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/v1/events")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"payload":{"type":"window_focused","app":"firefox"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        orchestrator
            .subscribe_snapshots()
            .wait_for(|s| s.focused_app.is_some())
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/context").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot["focused_app"], "firefox");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_status() {
        let orchestrator = orchestrator().await;
        orchestrator
            .register_agent(
                AgentInfo::new(AgentId::new("dev"), "Dev").with_capability("coding"),
                Arc::new(EchoAgent::new("Dev")),
            )
            .await
            .unwrap();
        let report = orchestrator.submit_intent("fix the bug").await.unwrap();
        let app = create_router(orchestrator.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/v1/tasks/{}", report.decision.task_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "COMPLETED");
        assert_eq!(view["progress"], 100.0);

        let response = app
            .oneshot(Request::get("/v1/tasks/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_feedback_unknown_case() {
        let orchestrator = orchestrator().await;
        let response = create_router(orchestrator.clone())
            .oneshot(
                Request::post("/v1/cases/missing/feedback")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"positive":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        orchestrator.shutdown().await;
    }
}
