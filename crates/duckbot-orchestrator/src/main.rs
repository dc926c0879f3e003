//! DuckBot orchestrator daemon.
//!
//! Reads newline-delimited JSON desktop events on stdin and writes each
//! decision as a JSON line on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use duckbot_core::{AgentId, AgentInfo, DesktopEvent};
use duckbot_orchestrator::{
    http, Agent, CaseStorage, Config, EchoAgent, InMemoryStorage, JsonDirStorage,
    JsonLinesSink, LayoutAgent, Orchestrator,
};

/// DuckBot orchestration daemon.
#[derive(Parser, Debug)]
#[command(name = "duckbot-orchestrator", about = "DuckBot desktop orchestration daemon")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve /health, /metrics and /context on this address
    #[arg(long)]
    http_addr: Option<String>,

    /// Persist memory cases as JSON files in this directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Number of recent events kept in the context snapshot
    #[arg(long)]
    recent_events: Option<usize>,

    /// Confidence needed to apply an action without asking
    #[arg(long)]
    confidence_threshold: Option<f64>,
}

/// Offline agents, one per built-in capability.
fn builtin_agents() -> Vec<(AgentInfo, Arc<dyn Agent>)> {
    let mut agents: Vec<(AgentInfo, Arc<dyn Agent>)> = vec![(
        AgentInfo::new(AgentId::new("layout"), "Layout Specialist")
            .with_capability("automation")
            .with_description("Arranges windows for the current workspace"),
        Arc::new(LayoutAgent),
    )];
    for (id, name, capability) in [
        ("coder", "Coding Specialist", "coding"),
        ("researcher", "Research Specialist", "research"),
        ("writer", "Documentation Specialist", "documentation"),
        ("messenger", "Communication Specialist", "communication"),
        ("sysadmin", "System Specialist", "system"),
        ("assistant", "General Assistant", "general"),
    ] {
        agents.push((
            AgentInfo::new(AgentId::new(id), name).with_capability(capability),
            Arc::new(EchoAgent::new(name)),
        ));
    }
    agents
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Stdout carries decisions, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("duckbot=info".parse()?))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(addr) = args.http_addr {
        config.http.bind_addr = Some(addr);
    }
    if let Some(dir) = args.storage_dir {
        config.memory.storage_dir = Some(dir);
    }
    if let Some(limit) = args.recent_events {
        config.context.recent_events_limit = limit;
    }
    if let Some(threshold) = args.confidence_threshold {
        config.router.confidence_threshold = threshold;
    }

    let storage: Arc<dyn CaseStorage> = match &config.memory.storage_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Persisting cases to disk");
            Arc::new(JsonDirStorage::new(dir))
        }
        None => Arc::new(InMemoryStorage::new()),
    };
    let sink = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
    let bind_addr = config.http.bind_addr.clone();

    let orchestrator = Orchestrator::init(config, storage, sink).await?;
    for (info, agent) in builtin_agents() {
        orchestrator.register_agent(info, agent).await?;
    }

    if let Some(addr) = bind_addr {
        let listener = TcpListener::bind(&addr).await?;
        let router = http::create_router(orchestrator.clone());
        info!(addr = %addr, "HTTP server listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "HTTP server error");
            }
        });
    }

    info!("Reading desktop events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, cancelling in-flight tasks");
                orchestrator.cancel_all();
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DesktopEvent>(line) {
                        Ok(event) => {
                            if let Err(e) = orchestrator.publish(event) {
                                warn!(error = %e, "Dropping event");
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed event"),
                    }
                }
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            },
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
