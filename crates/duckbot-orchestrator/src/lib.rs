//! DuckBot Orchestrator Library
//!
//! This crate provides the orchestration core of the DuckBot desktop
//! assistant: the event bus, context builder, memory store, agent
//! coordinator and decision router, wired together by [`Orchestrator`].

pub mod agent;
pub mod bus;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod http;
pub mod intent;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod sink;

pub use agent::{Agent, AgentError, EchoAgent, LayoutAgent};
pub use bus::{BusError, BusStats, EventBus, Subscription};
pub use config::{Config, ConfigError};
pub use context::ContextBuilder;
pub use coordinator::{
    CoordinationResult, Coordinator, CoordinatorError, CoordinatorStats, TaskView,
};
pub use intent::{IntentRules, PriorityRule};
pub use memory::{CaseStorage, InMemoryStorage, JsonDirStorage, MemoryError, MemoryStore, ScoredCase};
pub use orchestrator::{IntentReport, Orchestrator, OrchestratorError};
pub use registry::{AgentClaim, AgentRegistry, RegistryError};
pub use router::DecisionRouter;
pub use sink::{ChannelSink, DecisionSink, JsonLinesSink, SinkError};
