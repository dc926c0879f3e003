//! Agent coordinator - decomposes tasks and dispatches leaves to agents.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duckbot_core::{
    AgentId, AgentRequest, AgentResponse, ContextSnapshot, CoreError, FailureReason,
    ResponseStatus, Task, TaskId, TaskOutput, TaskPriority, TaskStatus,
};

use crate::config::CoordinatorConfig;
use crate::memory::{MemoryStore, ScoredCase};
use crate::registry::AgentRegistry;

/// Finished tasks kept for status lookups.
const RECENT_TASKS: usize = 128;

/// Coordinator errors. Agent failures are not errors; they end up in the
/// returned task tree.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid task: {0}")]
    InvalidTask(#[from] CoreError),

    #[error("Task already dispatched: {0}")]
    AlreadyDispatched(TaskId),
}

/// Result of dispatching a task tree.
#[derive(Debug, Clone)]
pub struct CoordinationResult {
    pub task: Task,
    /// Best precedent confidence for repeating the task's action in the
    /// triggering context.
    pub confidence: f64,
    /// Past cases behind `confidence`, best first.
    pub precedents: Vec<ScoredCase>,
}

impl CoordinationResult {
    /// Some subtasks produced output but the task as a whole did not
    /// complete.
    pub fn is_partial(&self) -> bool {
        self.task.status != TaskStatus::Completed && !self.task.outputs().is_empty()
    }

    pub fn outputs(&self) -> Vec<&TaskOutput> {
        self.task.outputs()
    }
}

/// Point-in-time view of a dispatched task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    /// Percentage of leaves completed or skipped.
    pub progress: f64,
}

impl TaskView {
    fn of(task: &Task) -> Self {
        Self {
            task: task.clone(),
            progress: task.progress(),
        }
    }
}

/// Counts of tasks by final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// A task being dispatched: its cancel token and live tree.
struct InFlight {
    token: CancellationToken,
    task: Task,
}

/// A leaf waiting for an agent.
struct Waiter {
    ticket: u64,
    priority: TaskPriority,
    capabilities: BTreeSet<String>,
}

impl Waiter {
    /// Higher priority first, then first come.
    fn outranks(&self, other: &Waiter) -> bool {
        self.capabilities == other.capabilities
            && (self.priority > other.priority
                || (self.priority == other.priority && self.ticket < other.ticket))
    }
}

/// A leaf's place in the wait queue. Dropping it leaves the queue.
struct WaitTicket<'a> {
    queue: &'a Mutex<Vec<Waiter>>,
    waiter: Waiter,
    queued: bool,
}

impl<'a> WaitTicket<'a> {
    fn new(queue: &'a Mutex<Vec<Waiter>>, ticket: u64, leaf: &Task) -> Self {
        Self {
            queue,
            waiter: Waiter {
                ticket,
                priority: leaf.priority,
                capabilities: leaf.required_capabilities.clone(),
            },
            queued: false,
        }
    }

    /// Another waiting leaf for the same capabilities goes first.
    fn outranked(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|w| w.ticket != self.waiter.ticket && w.outranks(&self.waiter))
    }

    fn enqueue(&mut self) {
        if self.queued {
            return;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Waiter {
                ticket: self.waiter.ticket,
                priority: self.waiter.priority,
                capabilities: self.waiter.capabilities.clone(),
            });
        self.queued = true;
    }

    fn leave(&mut self) {
        if !self.queued {
            return;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|w| w.ticket != self.waiter.ticket);
        self.queued = false;
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.leave();
    }
}

/// How a single agent call ended.
enum Attempt {
    Done(AgentResponse),
    Failed(String),
    TimedOut,
    Cancelled,
}

pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    memory: Arc<MemoryStore>,
    config: CoordinatorConfig,
    query_limit: usize,
    in_flight: Mutex<HashMap<TaskId, InFlight>>,
    finished: Mutex<VecDeque<Task>>,
    waiting: Mutex<Vec<Waiter>>,
    next_ticket: AtomicU64,
    counters: Counters,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        memory: Arc<MemoryStore>,
        config: CoordinatorConfig,
        query_limit: usize,
    ) -> Self {
        Self {
            registry,
            memory,
            config,
            query_limit,
            in_flight: Mutex::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            waiting: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Dispatch a task and wait for every leaf to finish.
    ///
    /// Multi-capability tasks are split first. Leaves run concurrently; a
    /// failed leaf does not stop its siblings, so partial results survive.
    /// Confidence comes from precedents that recorded the same action the
    /// agents proposed.
    pub async fn dispatch(
        &self,
        task: Task,
        context: &ContextSnapshot,
    ) -> Result<CoordinationResult, CoordinatorError> {
        let mut task = task.decompose();
        task.validate()?;

        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.contains_key(&task.id) {
                return Err(CoordinatorError::AlreadyDispatched(task.id));
            }
            in_flight.insert(
                task.id.clone(),
                InFlight {
                    token: token.clone(),
                    task: task.clone(),
                },
            );
        }

        info!(
            task_id = %task.id,
            capabilities = %task.capability_label(),
            priority = task.priority.as_str(),
            subtasks = task.subtasks.len(),
            "Dispatching task"
        );

        let root = task.id.clone();
        let leaves: Vec<Task> = task.leaves().into_iter().cloned().collect();
        let finished = join_all(leaves.into_iter().enumerate().map(|(index, leaf)| {
            self.dispatch_leaf(&root, index, leaf, context, token.child_token())
        }))
        .await;
        for (slot, leaf) in task.leaves_mut().into_iter().zip(finished) {
            *slot = leaf;
        }
        task.aggregate();

        let action = task.action_label();
        let (confidence, precedents) = self
            .memory
            .confidence(context, &action, self.query_limit)
            .await;

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task.id);
        {
            let mut recent = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() >= RECENT_TASKS {
                recent.pop_front();
            }
            recent.push_back(task.clone());
        }
        self.count(&task);

        info!(
            task_id = %task.id,
            status = task.status.as_str(),
            progress = task.progress(),
            action = %action,
            confidence,
            precedents = precedents.len(),
            "Task finished"
        );
        Ok(CoordinationResult {
            task,
            confidence,
            precedents,
        })
    }

    /// Run one leaf to a terminal state, mirroring its progress into the
    /// task's live view.
    async fn dispatch_leaf(
        &self,
        root: &TaskId,
        index: usize,
        leaf: Task,
        context: &ContextSnapshot,
        cancel: CancellationToken,
    ) -> Task {
        let leaf = self.run_leaf(root, index, leaf, context, cancel).await;
        self.publish_leaf(root, index, &leaf);
        leaf
    }

    async fn run_leaf(
        &self,
        root: &TaskId,
        index: usize,
        mut leaf: Task,
        context: &ContextSnapshot,
        cancel: CancellationToken,
    ) -> Task {
        if leaf.status != TaskStatus::Pending {
            return leaf;
        }

        let capability = leaf.capability_label();
        let deadline = Instant::now() + self.config.dispatch_deadline();
        let mut backoff = self.config.initial_backoff();
        let mut timed_out: HashSet<AgentId> = HashSet::new();
        let mut failures = 0u32;
        let mut ticket = WaitTicket::new(
            &self.waiting,
            self.next_ticket.fetch_add(1, Ordering::Relaxed),
            &leaf,
        );

        loop {
            if cancel.is_cancelled() {
                leaf.cancel();
                return leaf;
            }

            // Leaves outranked by a waiting leaf of higher priority hold
            // back so the waiter gets the next free handle.
            let claim = if ticket.outranked() {
                None
            } else {
                self.registry
                    .claim(&leaf.required_capabilities, &timed_out)
                    .await
            };
            let Some(claim) = claim else {
                ticket.enqueue();
                let now = Instant::now();
                if now >= deadline {
                    let reason = if timed_out.is_empty() {
                        FailureReason::NoCapableAgent {
                            capability: capability.clone(),
                        }
                    } else {
                        FailureReason::AgentTimeout {
                            capability: capability.clone(),
                            attempts: leaf.attempts,
                        }
                    };
                    warn!(task_id = %leaf.id, %reason, "Giving up on subtask");
                    transition(&mut leaf, |t| t.fail(reason));
                    return leaf;
                }

                debug!(
                    task_id = %leaf.id,
                    capability = %capability,
                    priority = leaf.priority.as_str(),
                    backoff_ms = backoff.as_millis() as u64,
                    "No idle agent, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(backoff.min(deadline - now)) => {}
                }
                backoff = (backoff * 2).min(self.config.max_backoff());
                continue;
            };
            ticket.leave();

            let agent_id = claim.agent_id().clone();
            transition(&mut leaf, |t| {
                t.mark_dispatched(agent_id.clone())
                    .and_then(|_| t.mark_running())
            });
            self.publish_leaf(root, index, &leaf);
            debug!(task_id = %leaf.id, agent_id = %agent_id, attempt = leaf.attempts, "Subtask running");

            let request = AgentRequest {
                task_id: leaf.id.clone(),
                intent: leaf.intent.clone(),
                capability: capability.clone(),
                context: context.clone(),
            };
            let worker = claim.worker();
            let attempt = tokio::select! {
                _ = cancel.cancelled() => Attempt::Cancelled,
                result = timeout(self.config.agent_timeout(), worker.handle(request)) => match result {
                    Ok(Ok(response)) => match &response.status {
                        ResponseStatus::Succeeded => Attempt::Done(response),
                        ResponseStatus::Failed { message } => Attempt::Failed(message.clone()),
                    },
                    Ok(Err(e)) => Attempt::Failed(e.to_string()),
                    Err(_) => Attempt::TimedOut,
                },
            };

            match attempt {
                Attempt::Done(response) => {
                    claim.record_success();
                    drop(claim);
                    let output = TaskOutput {
                        agent_id,
                        result: response.result,
                        action: response.action,
                    };
                    transition(&mut leaf, |t| t.complete(output));
                    return leaf;
                }
                Attempt::Cancelled => {
                    drop(claim);
                    info!(task_id = %leaf.id, agent_id = %agent_id, "Subtask cancelled");
                    leaf.cancel();
                    return leaf;
                }
                Attempt::Failed(message) => {
                    claim.record_failure();
                    drop(claim);
                    failures += 1;
                    warn!(
                        task_id = %leaf.id,
                        agent_id = %agent_id,
                        failures,
                        error = %message,
                        "Agent reported failure"
                    );
                    transition(&mut leaf, Task::requeue);
                    if failures >= self.config.max_attempts {
                        transition(&mut leaf, |t| {
                            t.fail(FailureReason::AgentFailed {
                                capability: capability.clone(),
                                message: message.clone(),
                            })
                        });
                        return leaf;
                    }
                }
                Attempt::TimedOut => {
                    warn!(
                        task_id = %leaf.id,
                        agent_id = %agent_id,
                        timeout_ms = self.config.agent_timeout_ms,
                        "Agent timed out, rescheduling"
                    );
                    claim.mark_unreachable();
                    timed_out.insert(agent_id);
                    transition(&mut leaf, Task::requeue);
                }
            }
            self.publish_leaf(root, index, &leaf);
        }
    }

    /// Copy a leaf's state into the live view of its task.
    fn publish_leaf(&self, root: &TaskId, index: usize, leaf: &Task) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = in_flight.get_mut(root) else {
            return;
        };
        if let Some(slot) = entry.task.leaves_mut().into_iter().nth(index) {
            *slot = leaf.clone();
        }
        entry.task.aggregate();
    }

    /// Status and progress of a task being dispatched or recently
    /// finished.
    pub fn status(&self, task_id: &TaskId) -> Option<TaskView> {
        if let Some(entry) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
        {
            return Some(TaskView::of(&entry.task));
        }
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|t| &t.id == task_id)
            .map(TaskView::of)
    }

    /// Cancel an in-flight task. Returns false if it is not running.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.get(task_id) {
            Some(entry) => {
                info!(task_id = %task_id, "Cancelling task");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight task.
    pub fn cancel_all(&self) {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in in_flight.values() {
            entry.token.cancel();
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            in_flight: self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len() as u64,
        }
    }

    fn count(&self, task: &Task) {
        let counter = match task.status {
            TaskStatus::Completed | TaskStatus::Skipped => &self.counters.completed,
            TaskStatus::Failed => &self.counters.failed,
            TaskStatus::Cancelled => &self.counters.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transitions are driven by the loop above and should never be rejected.
fn transition(task: &mut Task, f: impl FnOnce(&mut Task) -> Result<(), CoreError>) {
    if let Err(e) = f(task) {
        warn!(task_id = %task.id, error = %e, "Unexpected task transition");
    }
}
