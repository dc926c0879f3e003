//! Orchestration session - constructs and wires every component.
//!
//! Nothing here is global: a session owns its bus, registry, memory store,
//! coordinator and router, and runs two background loops:
//!
//! - the context builder, folding every event into the snapshot
//! - the intent loop, turning voice commands into dispatched tasks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use duckbot_core::{
    AgentInfo, Case, CaseId, ContextSnapshot, Decision, DesktopEvent, Disposition, EventKind,
    EventPayload, Outcome, SessionId, Task, TaskId, TaskStatus,
};

use crate::agent::Agent;
use crate::bus::{BusError, EventBus, Subscription};
use crate::config::{Config, ConfigError};
use crate::context::ContextBuilder;
use crate::coordinator::{CoordinationResult, Coordinator, CoordinatorError, TaskView};
use crate::intent::IntentRules;
use crate::memory::{CaseStorage, MemoryError, MemoryStore};
use crate::metrics;
use crate::registry::{AgentRegistry, RegistryError};
use crate::router::DecisionRouter;
use crate::sink::{DecisionSink, SinkError};

/// How long a voice command waits for the snapshot to include it.
const SNAPSHOT_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What became of one intent.
#[derive(Debug)]
pub struct IntentReport {
    pub decision: Decision,
    /// Case recorded for the intent. `None` when nothing is recorded for
    /// the task's outcome (cancelled tasks); an error when the memory
    /// store refused the case.
    pub case: Option<Result<CaseId, MemoryError>>,
    pub result: CoordinationResult,
}

impl IntentReport {
    /// The recorded case, if it was stored.
    pub fn case_id(&self) -> Option<&CaseId> {
        self.case.as_ref().and_then(|case| case.as_ref().ok())
    }
}

/// Components shared by the session's loops and its handles.
pub(crate) struct Pipeline {
    pub(crate) bus: EventBus,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) coordinator: Coordinator,
    router: DecisionRouter,
    intents: IntentRules,
    sink: Arc<dyn DecisionSink>,
    snapshots: watch::Receiver<ContextSnapshot>,
}

impl Pipeline {
    /// The current snapshot, or a newer one once it includes event `seq`.
    async fn snapshot_after(&self, seq: u64) -> ContextSnapshot {
        let mut rx = self.snapshots.clone();
        let caught_up = match timeout(
            SNAPSHOT_WAIT,
            rx.wait_for(|s| s.latest_event().is_some_and(|e| e.seq >= seq)),
        )
        .await
        {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        };
        caught_up.unwrap_or_else(|| {
            debug!(seq, "Snapshot did not catch up, using current");
            rx.borrow().clone()
        })
    }

    async fn process_intent(
        &self,
        intent: &str,
        snapshot: ContextSnapshot,
    ) -> Result<IntentReport, OrchestratorError> {
        let capabilities = self.intents.capabilities_for(intent);
        let priority = self.intents.priority_for(intent);
        info!(
            intent,
            capabilities = ?capabilities,
            priority = priority.as_str(),
            "Processing intent"
        );

        let task = Task::new(intent, capabilities).with_priority(priority);
        let result = self.coordinator.dispatch(task, &snapshot).await?;
        let decision = self.router.route(&result, &snapshot);
        info!(
            task_id = %decision.task_id,
            disposition = decision.disposition.as_str(),
            partial = decision.partial,
            "Decision ready"
        );

        if let Err(e) = self.sink.deliver(&decision).await {
            error!(task_id = %decision.task_id, error = %e, "Failed to deliver decision");
        }
        let case = self.record_case(&result, &decision, &snapshot).await;

        Ok(IntentReport {
            decision,
            case,
            result,
        })
    }

    /// Remember what was done in this context. Applied actions count as
    /// successes; suggestions wait for user feedback.
    async fn record_case(
        &self,
        result: &CoordinationResult,
        decision: &Decision,
        snapshot: &ContextSnapshot,
    ) -> Option<Result<CaseId, MemoryError>> {
        let action = result.task.action_label();

        let case = match result.task.status {
            TaskStatus::Completed | TaskStatus::Skipped => {
                let case = Case::new(snapshot, action);
                if decision.disposition == Disposition::Apply {
                    case.with_outcome(Outcome::Success)
                } else {
                    case
                }
            }
            TaskStatus::Failed => Case::new(snapshot, action).with_outcome(Outcome::Failure {
                reason: decision.message.clone(),
            }),
            _ => return None,
        };

        let stored = self.memory.store(case).await;
        match &stored {
            Ok(_) => {}
            Err(MemoryError::StorageFull { capacity }) => {
                warn!(capacity, "Memory full, case not recorded");
            }
            Err(e) => error!(error = %e, "Failed to record case"),
        }
        Some(stored)
    }
}

struct Loops {
    builder: JoinHandle<()>,
    intents: JoinHandle<()>,
}

/// A running orchestration session. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Pipeline>,
    shutdown: CancellationToken,
    loops: Arc<Mutex<Option<Loops>>>,
}

impl Orchestrator {
    /// Build every component and start the background loops.
    pub async fn init(
        config: Config,
        storage: Arc<dyn CaseStorage>,
        sink: Arc<dyn DecisionSink>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let session_id = SessionId::generate();
        let bus = EventBus::new(config.bus.subscriber_capacity);
        let memory = Arc::new(MemoryStore::open(&config.memory, storage).await?);
        let registry = Arc::new(AgentRegistry::new());
        let coordinator = Coordinator::new(
            registry.clone(),
            memory.clone(),
            config.coordinator.clone(),
            config.memory.query_limit,
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(ContextSnapshot::new(session_id.clone()));
        let events = bus.subscribe_all();
        let commands = bus.subscribe_kinds(&[EventKind::VoiceCommand]);

        let inner = Arc::new(Pipeline {
            bus,
            registry,
            memory,
            coordinator,
            router: DecisionRouter::new(&config.router),
            intents: config.coordinator.intent_rules.clone(),
            sink,
            snapshots: snapshot_rx,
        });

        let shutdown = CancellationToken::new();
        let builder = ContextBuilder::new(
            session_id.clone(),
            config.context.tag_rules.clone(),
            config.context.recent_events_limit,
        );
        let builder = tokio::spawn(builder.run(events, snapshot_tx, shutdown.clone()));
        let intents = tokio::spawn(intent_loop(inner.clone(), commands, shutdown.clone()));

        info!(session_id = %session_id, "Orchestrator started");
        Ok(Self {
            inner,
            shutdown,
            loops: Arc::new(Mutex::new(Some(Loops { builder, intents }))),
        })
    }

    /// Feed a desktop event into the bus.
    pub fn publish(&self, event: DesktopEvent) -> Result<u64, BusError> {
        self.inner.bus.publish(event)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Watch snapshot updates.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<ContextSnapshot> {
        self.inner.snapshots.clone()
    }

    /// Run an intent against the current context and wait for its report.
    pub async fn submit_intent(&self, intent: &str) -> Result<IntentReport, OrchestratorError> {
        self.inner.process_intent(intent, self.snapshot()).await
    }

    pub async fn register_agent(
        &self,
        info: AgentInfo,
        worker: Arc<dyn Agent>,
    ) -> Result<(), OrchestratorError> {
        Ok(self.inner.registry.register(info, worker).await?)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.inner.memory
    }

    /// Attach user feedback to a recorded case.
    pub async fn record_feedback(
        &self,
        case_id: &CaseId,
        positive: bool,
        note: Option<String>,
    ) -> Result<(), OrchestratorError> {
        self.inner
            .memory
            .append_outcome(case_id, Outcome::UserFeedback { positive, note })
            .await?;
        info!(case_id = %case_id, positive, "Feedback recorded");
        Ok(())
    }

    /// Status and progress of a running or recently finished task.
    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskView> {
        self.inner.coordinator.status(task_id)
    }

    /// Cancel an in-flight task. Completed subtasks stand.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        self.inner.coordinator.cancel(task_id)
    }

    pub fn cancel_all(&self) {
        self.inner.coordinator.cancel_all();
    }

    /// Prometheus text exposition of the session's counters.
    pub async fn metrics(&self) -> String {
        metrics::collect_metrics(&self.inner).await
    }

    /// Close the bus, let queued voice commands finish, then stop the
    /// context builder. Safe to call more than once.
    pub async fn shutdown(&self) {
        let loops = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(loops) = loops else { return };

        info!("Orchestrator shutting down");
        self.inner.bus.close();
        if let Err(e) = loops.intents.await {
            error!(error = %e, "Intent loop panicked");
        }
        self.shutdown.cancel();
        if let Err(e) = loops.builder.await {
            error!(error = %e, "Context builder panicked");
        }
        info!("Orchestrator stopped");
    }
}

/// Turn voice commands into tasks. Each command runs on its own task so a
/// slow dispatch never holds up the next command.
async fn intent_loop(pipeline: Arc<Pipeline>, mut commands: Subscription, shutdown: CancellationToken) {
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = commands.recv() => {
                let Some(event) = next else { break };
                if let EventPayload::VoiceCommand { transcript, .. } = &event.payload {
                    let snapshot = pipeline.snapshot_after(event.seq).await;
                    let pipeline = pipeline.clone();
                    let intent = transcript.clone();
                    running.spawn(async move {
                        if let Err(e) = pipeline.process_intent(&intent, snapshot).await {
                            warn!(intent = %intent, error = %e, "Intent failed");
                        }
                    });
                }
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Intent task panicked");
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Intent task panicked");
        }
    }
    debug!("Intent loop stopped");
}
