//! End-to-end checks of the orchestration pipeline through its public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use duckbot_core::{
    AgentId, AgentInfo, AgentRequest, AgentResponse, ContextSnapshot, DecisionReason,
    DesktopEvent, Disposition, FailureReason, Task, TaskStatus,
};
use duckbot_orchestrator::config::CoordinatorConfig;
use duckbot_orchestrator::{
    Agent, AgentError, AgentRegistry, CaseStorage, ChannelSink, Config, Coordinator, EchoAgent,
    InMemoryStorage, JsonDirStorage, LayoutAgent, MemoryStore, Orchestrator,
};

struct BrokenAgent;

#[async_trait]
impl Agent for BrokenAgent {
    async fn handle(&self, _request: AgentRequest) -> Result<AgentResponse, AgentError> {
        Err(AgentError::Unavailable("search backend offline".to_string()))
    }
}

async fn start(config: Config, storage: Arc<dyn CaseStorage>) -> Orchestrator {
    let (sink, _rx) = ChannelSink::new();
    Orchestrator::init(config, storage, Arc::new(sink))
        .await
        .unwrap()
}

fn info(id: &str, capability: &str) -> AgentInfo {
    AgentInfo::new(AgentId::new(id), id).with_capability(capability)
}

/// Publish an event and wait until the snapshot includes it.
async fn publish_and_settle(orchestrator: &Orchestrator, event: DesktopEvent) {
    let seq = orchestrator.publish(event).unwrap();
    orchestrator
        .subscribe_snapshots()
        .wait_for(|s| s.latest_event().is_some_and(|e| e.seq >= seq))
        .await
        .unwrap();
}

#[tokio::test]
async fn focus_changes_replace_focused_app() {
    let orchestrator = start(Config::default(), Arc::new(InMemoryStorage::new())).await;
    orchestrator
        .publish(DesktopEvent::window_focused("editor"))
        .unwrap();
    publish_and_settle(&orchestrator, DesktopEvent::window_focused("browser")).await;
    assert_eq!(orchestrator.snapshot().focused_app.as_deref(), Some("browser"));
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dispatch_without_capable_agent_fails_after_deadline() {
    let memory = MemoryStore::in_memory(&Default::default()).await.unwrap();
    let coordinator = Coordinator::new(
        Arc::new(AgentRegistry::new()),
        Arc::new(memory),
        CoordinatorConfig::default(),
        5,
    );

    let started = Instant::now();
    let result = coordinator
        .dispatch(Task::new("fix the build", ["coding"]), &ContextSnapshot::default())
        .await
        .unwrap();

    assert!(started.elapsed() >= CoordinatorConfig::default().dispatch_deadline());
    assert_eq!(result.task.status, TaskStatus::Failed);
    assert_eq!(
        result.task.failure,
        Some(FailureReason::NoCapableAgent {
            capability: "coding".to_string()
        })
    );
}

#[tokio::test]
async fn partial_failure_notifies_with_partial_results() {
    let orchestrator = start(Config::default(), Arc::new(InMemoryStorage::new())).await;
    orchestrator
        .register_agent(info("dev", "coding"), Arc::new(EchoAgent::new("dev")))
        .await
        .unwrap();
    orchestrator
        .register_agent(info("searcher", "research"), Arc::new(BrokenAgent))
        .await
        .unwrap();

    let report = orchestrator
        .submit_intent("debug the crash and research similar reports")
        .await
        .unwrap();

    assert_eq!(report.result.task.status, TaskStatus::Failed);
    assert_eq!(report.decision.disposition, Disposition::Notify);
    assert_eq!(
        report.decision.reason,
        DecisionReason::TaskFailed {
            capabilities: vec!["research".to_string()]
        }
    );
    assert!(report.decision.partial);
    assert_eq!(report.decision.results.len(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn voice_command_flows_to_sink() {
    let (sink, mut decisions) = ChannelSink::new();
    let orchestrator = Orchestrator::init(
        Config::default(),
        Arc::new(InMemoryStorage::new()),
        Arc::new(sink),
    )
    .await
    .unwrap();
    orchestrator
        .register_agent(info("layout", "automation"), Arc::new(LayoutAgent))
        .await
        .unwrap();

    for app in ["code", "firefox", "terminal"] {
        orchestrator
            .publish(DesktopEvent::window_created(app, app))
            .unwrap();
    }
    orchestrator
        .publish(DesktopEvent::voice_command("arrange my windows"))
        .unwrap();

    let decision = tokio::time::timeout(Duration::from_secs(5), decisions.recv())
        .await
        .unwrap()
        .unwrap();
    // No precedent yet, so the layout is offered rather than applied.
    assert_eq!(decision.disposition, Disposition::Ask);
    assert_eq!(decision.actions[0].params["layout"], "grid");
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn feedback_persists_across_sessions() {
    let dir = std::env::temp_dir().join(format!("duckbot-pipeline-{}", uuid::Uuid::new_v4()));
    let mut config = Config::default();
    config.memory.storage_dir = Some(dir.clone());
    let focused_at = chrono::Utc::now();
    let focus = || DesktopEvent::window_focused("code").with_timestamp(focused_at);

    let first = start(config.clone(), Arc::new(JsonDirStorage::new(&dir))).await;
    first
        .register_agent(info("layout", "automation"), Arc::new(LayoutAgent))
        .await
        .unwrap();
    publish_and_settle(&first, focus()).await;
    let report = first.submit_intent("tile windows").await.unwrap();
    assert_eq!(report.decision.disposition, Disposition::Ask);
    first
        .record_feedback(report.case_id().unwrap(), true, None)
        .await
        .unwrap();
    first.shutdown().await;

    let second = start(config, Arc::new(JsonDirStorage::new(&dir))).await;
    second
        .register_agent(info("layout", "automation"), Arc::new(LayoutAgent))
        .await
        .unwrap();
    publish_and_settle(&second, focus()).await;
    let report = second.submit_intent("tile windows").await.unwrap();
    assert_eq!(report.decision.disposition, Disposition::Apply);
    assert_eq!(report.decision.reason, DecisionReason::AllowListed);
    second.shutdown().await;

    std::fs::remove_dir_all(&dir).ok();
}
