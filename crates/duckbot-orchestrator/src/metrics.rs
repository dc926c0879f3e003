//! Prometheus metrics collection and formatting.
//!
//! This module renders session counters in Prometheus text exposition
//! format.

use std::fmt::Write;

use duckbot_core::AgentLiveness;

use crate::orchestrator::Pipeline;

/// Collect all metrics from a session and format as Prometheus text.
pub(crate) async fn collect_metrics(pipeline: &Pipeline) -> String {
    let mut output = String::new();

    collect_agent_metrics(pipeline, &mut output).await;
    collect_task_metrics(pipeline, &mut output);
    collect_bus_metrics(pipeline, &mut output);
    collect_memory_metrics(pipeline, &mut output).await;

    output
}

/// Agent handles by liveness.
async fn collect_agent_metrics(pipeline: &Pipeline, output: &mut String) {
    let mut idle = 0u64;
    let mut busy = 0u64;
    let mut unreachable = 0u64;

    for agent in pipeline.registry.list().await {
        match agent.liveness {
            AgentLiveness::Idle => idle += 1,
            AgentLiveness::Busy => busy += 1,
            AgentLiveness::Unreachable => unreachable += 1,
        }
    }

    writeln!(
        output,
        "# HELP duckbot_agents Number of registered agents by liveness"
    )
    .ok();
    writeln!(output, "# TYPE duckbot_agents gauge").ok();
    writeln!(output, "duckbot_agents{{liveness=\"idle\"}} {idle}").ok();
    writeln!(output, "duckbot_agents{{liveness=\"busy\"}} {busy}").ok();
    writeln!(
        output,
        "duckbot_agents{{liveness=\"unreachable\"}} {unreachable}"
    )
    .ok();
}

/// Tasks by final status, plus those still running.
fn collect_task_metrics(pipeline: &Pipeline, output: &mut String) {
    let stats = pipeline.coordinator.stats();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP duckbot_tasks_total Total number of finished tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE duckbot_tasks_total counter").ok();
    writeln!(
        output,
        "duckbot_tasks_total{{status=\"completed\"}} {}",
        stats.completed
    )
    .ok();
    writeln!(output, "duckbot_tasks_total{{status=\"failed\"}} {}", stats.failed).ok();
    writeln!(
        output,
        "duckbot_tasks_total{{status=\"cancelled\"}} {}",
        stats.cancelled
    )
    .ok();

    writeln!(output).ok();
    writeln!(output, "# HELP duckbot_tasks_in_flight Tasks being dispatched").ok();
    writeln!(output, "# TYPE duckbot_tasks_in_flight gauge").ok();
    writeln!(output, "duckbot_tasks_in_flight {}", stats.in_flight).ok();
}

fn collect_bus_metrics(pipeline: &Pipeline, output: &mut String) {
    let stats = pipeline.bus.stats();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP duckbot_events_published_total Events published on the bus"
    )
    .ok();
    writeln!(output, "# TYPE duckbot_events_published_total counter").ok();
    writeln!(output, "duckbot_events_published_total {}", stats.published).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP duckbot_events_dropped_total Events shed from full subscriber buffers"
    )
    .ok();
    writeln!(output, "# TYPE duckbot_events_dropped_total counter").ok();
    writeln!(output, "duckbot_events_dropped_total {}", stats.dropped).ok();

    writeln!(output).ok();
    writeln!(output, "# HELP duckbot_bus_subscribers Active bus subscribers").ok();
    writeln!(output, "# TYPE duckbot_bus_subscribers gauge").ok();
    writeln!(output, "duckbot_bus_subscribers {}", stats.subscribers).ok();
}

async fn collect_memory_metrics(pipeline: &Pipeline, output: &mut String) {
    writeln!(output).ok();
    writeln!(output, "# HELP duckbot_memory_cases Cases held by the memory store").ok();
    writeln!(output, "# TYPE duckbot_memory_cases gauge").ok();
    writeln!(output, "duckbot_memory_cases {}", pipeline.memory.len().await).ok();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::memory::InMemoryStorage;
    use crate::orchestrator::Orchestrator;
    use crate::sink::ChannelSink;

    #[tokio::test]
    async fn test_collect_metrics_empty_session() {
        let (sink, _rx) = ChannelSink::new();
        let orchestrator = Orchestrator::init(
            Config::default(),
            Arc::new(InMemoryStorage::new()),
            Arc::new(sink),
        )
        .await
        .unwrap();
        let output = orchestrator.metrics().await;

        // Should contain agent metrics
        assert!(output.contains("duckbot_agents{liveness=\"idle\"} 0"));

        // Should contain task metrics
        assert!(output.contains("duckbot_tasks_total{status=\"failed\"} 0"));

        // Context builder and intent loop subscribe at start-up
        assert!(output.contains("duckbot_bus_subscribers 2"));
        assert!(output.contains("duckbot_memory_cases 0"));

        orchestrator.shutdown().await;
    }
}
