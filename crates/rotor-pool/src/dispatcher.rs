//! The dispatch loop and its public handle.
//!
//! All queue, slot-table, and settlement state is owned by one spawned loop
//! task; the `WorkerPool` handle talks to it over a command channel. Dispatch
//! is purely event-driven: it runs on enqueue, on slot-idle, on a timer
//! deadline, and on shutdown — nothing re-polls the queue on a fixed tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use rotor_core::{SlotId, SubmitError, Task, TaskErrorKind, TaskId, TaskResult};

use crate::config::PoolConfig;
use crate::handler::HandlerRegistry;
use crate::queue::PriorityQueue;
use crate::slot::{Assignment, InFlight, SlotMessage, SlotState, WorkerSlot};

const COMMAND_BUFFER: usize = 256;
const SLOT_MESSAGE_BUFFER: usize = 256;

/// Point-in-time pool snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub queued: usize,
    pub busy: usize,
    pub idle: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_processing_ms: f64,
}

enum Command {
    Submit {
        task: Task,
        settle: oneshot::Sender<TaskResult>,
        ack: oneshot::Sender<Result<(), SubmitError>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Shutdown {
        drain_timeout: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Settlement handle for one accepted task. Resolves exactly once.
pub struct TaskReceipt {
    task_id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskReceipt {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the task to settle. Always yields a `TaskResult`: if the
    /// dispatch loop died before settling, the task is reported as cancelled
    /// by shutdown rather than leaving the caller hanging.
    pub async fn wait(self) -> TaskResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => TaskResult::failed(
                self.task_id,
                None,
                TaskErrorKind::PoolShuttingDown,
                "pool terminated before settlement",
                0,
            ),
        }
    }
}

/// Settlement handles for a batch, in input order.
pub struct BatchReceipt {
    receipts: Vec<TaskReceipt>,
}

impl BatchReceipt {
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.receipts.iter().map(|r| r.task_id.clone()).collect()
    }

    /// Resolve once every task in the batch has individually settled.
    /// Results come back in input order.
    pub async fn join(self) -> Vec<TaskResult> {
        futures::future::join_all(self.receipts.into_iter().map(TaskReceipt::wait)).await
    }
}

/// Handle to a running worker pool. Cloneable; the dispatch loop stops once
/// shutdown completes or every handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    cmd_tx: mpsc::Sender<Command>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawn the worker slots and the dispatch loop.
    pub fn start(config: PoolConfig, handlers: HandlerRegistry) -> Self {
        let size = config.size.max(1);
        let handlers = Arc::new(handlers);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (slot_tx, slot_rx) = mpsc::channel(SLOT_MESSAGE_BUFFER);
        let shutdown_token = CancellationToken::new();

        let slots = (0..size)
            .map(|i| WorkerSlot::spawn(SlotId(i), Arc::clone(&handlers), slot_tx.clone()))
            .collect();

        let dispatch = DispatchLoop {
            handlers,
            default_timeout: config.default_timeout,
            slots,
            slot_tx,
            cmd_rx,
            slot_rx,
            queue: PriorityQueue::new(),
            pending: HashMap::new(),
            completed: 0,
            failed: 0,
            total_processing_ms: 0,
            settled_with_time: 0,
            drain: None,
            shutdown_token: shutdown_token.clone(),
        };
        tokio::spawn(dispatch.run());

        tracing::info!(slots = size, "Worker pool started");
        Self {
            cmd_tx,
            shutdown_token,
        }
    }

    /// Submit one task. Contract violations (invalid task, duplicate id,
    /// pool shutting down) come back synchronously; every accepted task
    /// settles exactly once through the returned receipt.
    pub async fn submit(&self, task: Task) -> Result<TaskReceipt, SubmitError> {
        if self.shutdown_token.is_cancelled() {
            return Err(SubmitError::PoolShuttingDown);
        }
        task.validate().map_err(SubmitError::InvalidTask)?;

        let task_id = task.id.clone();
        let (settle_tx, settle_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                task,
                settle: settle_tx,
                ack: ack_tx,
            })
            .await
            .map_err(|_| SubmitError::PoolShuttingDown)?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(TaskReceipt {
                task_id,
                rx: settle_rx,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SubmitError::PoolShuttingDown),
        }
    }

    /// Submit several tasks. The receipt batch resolves when every input has
    /// settled, in input order.
    pub async fn submit_batch(&self, tasks: Vec<Task>) -> Result<BatchReceipt, SubmitError> {
        let mut receipts = Vec::with_capacity(tasks.len());
        for task in tasks {
            receipts.push(self.submit(task).await?);
        }
        Ok(BatchReceipt { receipts })
    }

    /// Snapshot taken by the dispatch loop itself, so counts never interleave
    /// with a dispatch in progress.
    pub async fn stats(&self) -> PoolStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Stats { reply: reply_tx })
            .await
            .is_err()
        {
            return PoolStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Stop accepting tasks, give in-flight work until the drain deadline,
    /// then force-terminate whatever is left. Resolves once every accepted
    /// task has settled.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.shutdown_token.cancel();
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Shutdown {
                drain_timeout,
                done: done_tx,
            })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}

struct DrainState {
    deadline: Instant,
    done: Vec<oneshot::Sender<()>>,
}

struct DispatchLoop {
    handlers: Arc<HandlerRegistry>,
    default_timeout: Option<Duration>,
    slots: Vec<WorkerSlot>,
    slot_tx: mpsc::Sender<SlotMessage>,
    cmd_rx: mpsc::Receiver<Command>,
    slot_rx: mpsc::Receiver<SlotMessage>,
    queue: PriorityQueue,
    pending: HashMap<TaskId, oneshot::Sender<TaskResult>>,
    completed: u64,
    failed: u64,
    total_processing_ms: u64,
    settled_with_time: u64,
    drain: Option<DrainState>,
    shutdown_token: CancellationToken,
}

impl DispatchLoop {
    async fn run(mut self) {
        loop {
            let next_deadline = self.next_deadline();
            let stop = tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.terminate("all pool handles dropped");
                        true
                    }
                },
                Some(msg) = self.slot_rx.recv() => self.handle_slot_message(msg),
                _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() => self.handle_deadlines(),
            };
            if stop {
                break;
            }
        }
        tracing::info!("Dispatch loop stopped");
    }

    /// Returns true once the loop should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit { task, settle, ack } => {
                if self.shutdown_token.is_cancelled() || self.drain.is_some() {
                    let _ = ack.send(Err(SubmitError::PoolShuttingDown));
                    return false;
                }
                if self.pending.contains_key(&task.id) {
                    let _ = ack.send(Err(SubmitError::DuplicateTaskId(task.id.clone())));
                    return false;
                }
                let mut task = task;
                if task.timeout_ms.is_none() {
                    if let Some(default) = self.default_timeout {
                        task.timeout_ms = Some(default.as_millis() as u64);
                    }
                }
                self.pending.insert(task.id.clone(), settle);
                let _ = ack.send(Ok(()));
                tracing::debug!(
                    task_id = %task.id,
                    kind = %task.kind,
                    priority = task.priority.as_str(),
                    "Task accepted"
                );
                self.queue.push(task);
                self.dispatch();
                false
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats_snapshot());
                false
            }
            Command::Shutdown {
                drain_timeout,
                done,
            } => self.begin_shutdown(drain_timeout, done),
        }
    }

    fn begin_shutdown(&mut self, drain_timeout: Duration, done: oneshot::Sender<()>) -> bool {
        self.shutdown_token.cancel();

        if let Some(drain) = &mut self.drain {
            // second shutdown call: honor the earlier deadline
            drain.deadline = drain.deadline.min(Instant::now() + drain_timeout);
            drain.done.push(done);
            return false;
        }

        // queued-but-unassigned tasks are rejected immediately
        let rejected = self.queue.drain();
        if !rejected.is_empty() {
            tracing::info!(count = rejected.len(), "Rejecting queued tasks at shutdown");
        }
        for task in rejected {
            self.failed += 1;
            let result = TaskResult::failed(
                task.id.clone(),
                None,
                TaskErrorKind::PoolShuttingDown,
                "rejected at shutdown",
                0,
            );
            self.settle(&task.id, result);
        }

        self.drain = Some(DrainState {
            deadline: Instant::now() + drain_timeout,
            done: vec![done],
        });
        self.try_finish_drain()
    }

    fn handle_slot_message(&mut self, msg: SlotMessage) -> bool {
        match msg {
            SlotMessage::Completed {
                slot_id,
                epoch,
                task_id,
                outcome,
                elapsed_ms,
            } => {
                let idx = slot_id.0;
                if self.slots[idx].epoch != epoch {
                    // late report from a unit that was already replaced
                    return false;
                }
                let Some(inflight) = self.slots[idx].current.take() else {
                    return false;
                };
                if inflight.task_id != task_id {
                    self.slots[idx].current = Some(inflight);
                    return false;
                }
                self.slots[idx].state = SlotState::Idle;

                self.total_processing_ms += elapsed_ms;
                self.settled_with_time += 1;
                let result = match outcome {
                    Ok(value) => {
                        self.completed += 1;
                        TaskResult::completed(task_id.clone(), slot_id, value, elapsed_ms)
                    }
                    Err(message) => {
                        self.failed += 1;
                        tracing::warn!(task_id = %task_id, slot = %slot_id, error = %message, "Handler failed");
                        TaskResult::failed(
                            task_id.clone(),
                            Some(slot_id),
                            TaskErrorKind::HandlerFailed,
                            message,
                            elapsed_ms,
                        )
                    }
                };
                self.settle(&task_id, result);
                self.dispatch();
                self.try_finish_drain()
            }
            SlotMessage::Exited {
                slot_id,
                epoch,
                panicked,
            } => {
                let idx = slot_id.0;
                if self.slots[idx].epoch != epoch {
                    // exit of a unit we already aborted and replaced
                    return false;
                }
                if let Some(inflight) = self.slots[idx].current.take() {
                    let elapsed_ms = inflight.started_at.elapsed().as_millis() as u64;
                    self.failed += 1;
                    self.total_processing_ms += elapsed_ms;
                    self.settled_with_time += 1;
                    tracing::warn!(
                        task_id = %inflight.task_id,
                        slot = %slot_id,
                        "Execution unit crashed mid-task"
                    );
                    let result = TaskResult::failed(
                        inflight.task_id.clone(),
                        Some(slot_id),
                        TaskErrorKind::WorkerCrashed,
                        "execution unit crashed",
                        elapsed_ms,
                    );
                    self.settle(&inflight.task_id, result);
                } else if panicked {
                    tracing::warn!(slot = %slot_id, "Idle execution unit exited abnormally, replacing");
                }

                if self.drain.is_none() {
                    let handlers = Arc::clone(&self.handlers);
                    let slot_tx = self.slot_tx.clone();
                    self.slots[idx].respawn(handlers, slot_tx);
                    self.dispatch();
                    false
                } else {
                    // shutting down: the slot stays down
                    self.slots[idx].state = SlotState::Restarting;
                    self.try_finish_drain()
                }
            }
        }
    }

    fn handle_deadlines(&mut self) -> bool {
        let now = Instant::now();

        for idx in 0..self.slots.len() {
            let fired = self.slots[idx]
                .current
                .as_ref()
                .is_some_and(|c| c.deadline.is_some_and(|d| d <= now));
            if !fired {
                continue;
            }
            let Some(inflight) = self.slots[idx].current.take() else {
                continue;
            };
            let elapsed_ms = (now - inflight.started_at).as_millis() as u64;
            self.failed += 1;
            self.total_processing_ms += elapsed_ms;
            self.settled_with_time += 1;
            tracing::warn!(
                task_id = %inflight.task_id,
                slot = %self.slots[idx].id,
                elapsed_ms,
                "Task deadline fired, recycling execution unit"
            );
            let result = TaskResult::failed(
                inflight.task_id.clone(),
                Some(self.slots[idx].id),
                TaskErrorKind::TaskTimeout,
                "task timed out",
                elapsed_ms,
            );
            self.settle(&inflight.task_id, result);

            // the stalled unit cannot be trusted to ever report back
            if self.drain.is_none() {
                let handlers = Arc::clone(&self.handlers);
                let slot_tx = self.slot_tx.clone();
                self.slots[idx].respawn(handlers, slot_tx);
            } else {
                self.slots[idx].abort.abort();
                self.slots[idx].state = SlotState::Restarting;
            }
        }

        if self
            .drain
            .as_ref()
            .is_some_and(|drain| drain.deadline <= now)
        {
            self.force_cancel_in_flight(now);
            self.terminate("drain deadline reached");
            return true;
        }

        self.dispatch();
        self.try_finish_drain()
    }

    fn force_cancel_in_flight(&mut self, now: Instant) {
        for idx in 0..self.slots.len() {
            let Some(inflight) = self.slots[idx].current.take() else {
                continue;
            };
            let elapsed_ms = (now - inflight.started_at).as_millis() as u64;
            self.failed += 1;
            tracing::warn!(
                task_id = %inflight.task_id,
                slot = %self.slots[idx].id,
                "Cancelling in-flight task at drain deadline"
            );
            let result = TaskResult::failed(
                inflight.task_id.clone(),
                Some(self.slots[idx].id),
                TaskErrorKind::PoolShuttingDown,
                "cancelled at shutdown drain deadline",
                elapsed_ms,
            );
            self.settle(&inflight.task_id, result);
        }
    }

    /// Assign queued tasks to idle slots until one of them runs out.
    fn dispatch(&mut self) {
        loop {
            if self.queue.is_empty() {
                return;
            }
            let Some(idx) = self
                .slots
                .iter()
                .position(|s| s.state == SlotState::Idle && s.current.is_none())
            else {
                return;
            };
            let Some(task) = self.queue.pop() else {
                return;
            };
            let task_id = task.id.clone();
            let deadline = task.timeout().map(|t| Instant::now() + t);
            match self.slots[idx].assign_tx.try_send(Assignment { task }) {
                Ok(()) => {
                    self.slots[idx].state = SlotState::Busy;
                    self.slots[idx].current = Some(InFlight {
                        task_id: task_id.clone(),
                        deadline,
                        started_at: Instant::now(),
                    });
                    tracing::debug!(task_id = %task_id, slot = %self.slots[idx].id, "Task assigned");
                }
                Err(err) => {
                    // the unit died between reports; put the task back at the
                    // head of its lane and recycle the slot
                    let Assignment { task } = err.into_inner();
                    self.queue.requeue_front(task);
                    let handlers = Arc::clone(&self.handlers);
                    let slot_tx = self.slot_tx.clone();
                    self.slots[idx].respawn(handlers, slot_tx);
                }
            }
        }
    }

    /// Earliest instant the loop must wake up at: the nearest in-flight task
    /// deadline or the drain deadline, whichever comes first.
    fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        for slot in &self.slots {
            if let Some(deadline) = slot.current.as_ref().and_then(|c| c.deadline) {
                next = Some(next.map_or(deadline, |n| n.min(deadline)));
            }
        }
        if let Some(drain) = &self.drain {
            next = Some(next.map_or(drain.deadline, |n| n.min(drain.deadline)));
        }
        next
    }

    /// Write-once settlement: the sender leaves the pending map exactly once,
    /// so a late completion after a timeout (or any other double-settlement
    /// race) has nothing left to resolve.
    fn settle(&mut self, task_id: &TaskId, result: TaskResult) {
        if let Some(tx) = self.pending.remove(task_id) {
            let _ = tx.send(result);
        }
    }

    fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.current.is_some()).count()
    }

    fn try_finish_drain(&mut self) -> bool {
        if self.drain.is_some() && self.busy_count() == 0 {
            self.terminate("drained");
            return true;
        }
        false
    }

    fn terminate(&mut self, reason: &str) {
        self.shutdown_token.cancel();
        for slot in &mut self.slots {
            slot.abort.abort();
        }
        let outstanding: Vec<TaskId> = self.pending.keys().cloned().collect();
        for task_id in outstanding {
            let result = TaskResult::failed(
                task_id.clone(),
                None,
                TaskErrorKind::PoolShuttingDown,
                "pool shut down before settlement",
                0,
            );
            self.settle(&task_id, result);
        }
        if let Some(drain) = self.drain.take() {
            for done in drain.done {
                let _ = done.send(());
            }
        }
        tracing::info!(reason, "Worker pool terminated");
    }

    fn stats_snapshot(&self) -> PoolStats {
        PoolStats {
            queued: self.queue.len(),
            busy: self.busy_count(),
            idle: self
                .slots
                .iter()
                .filter(|s| s.state == SlotState::Idle && s.current.is_none())
                .count(),
            completed: self.completed,
            failed: self.failed,
            avg_processing_ms: if self.settled_with_time == 0 {
                0.0
            } else {
                self.total_processing_ms as f64 / self.settled_with_time as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    use rotor_core::{Priority, TaskKind};

    use crate::handler::{HandlerError, TaskHandler};

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError> {
            Ok(task.payload.clone())
        }
    }

    /// Blocks until released; used to hold a slot busy deterministically.
    struct GateHandler {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TaskHandler for GateHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
            self.release.notified().await;
            Ok(serde_json::json!({"gated": true}))
        }
    }

    /// Records the marker of every task it runs, in execution order.
    struct RecordingHandler {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError> {
            let marker = task.payload["marker"].as_str().unwrap_or("?").to_owned();
            self.log.lock().unwrap().push(marker);
            Ok(serde_json::json!({}))
        }
    }

    struct StallHandler;

    #[async_trait]
    impl TaskHandler for StallHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
            panic!("handler blew up");
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
            Err(HandlerError::new("target unreachable"))
        }
    }

    struct SleepHandler {
        millis: u64,
    }

    #[async_trait]
    impl TaskHandler for SleepHandler {
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            Ok(serde_json::json!({"slept_ms": self.millis}))
        }
    }

    fn pool_with(size: usize, entries: Vec<(TaskKind, Arc<dyn TaskHandler>)>) -> WorkerPool {
        let mut registry = HandlerRegistry::new();
        for (kind, handler) in entries {
            registry.register(kind, handler).unwrap();
        }
        WorkerPool::start(
            PoolConfig {
                size,
                default_timeout: None,
            },
            registry,
        )
    }

    #[tokio::test]
    async fn submit_resolves_with_handler_value() {
        let pool = pool_with(
            1,
            vec![(TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>)],
        );
        let task = Task::new(TaskKind::Collect, serde_json::json!({"n": 7}));
        let task_id = task.id.clone();

        let result = pool.submit(task).await.unwrap().wait().await;
        assert!(result.success);
        assert_eq!(result.task_id, task_id);
        assert_eq!(result.value, Some(serde_json::json!({"n": 7})));
        assert_eq!(result.slot_id, Some(SlotId(0)));
    }

    #[tokio::test]
    async fn duplicate_outstanding_id_rejected_synchronously() {
        let release = Arc::new(Notify::new());
        let pool = pool_with(
            1,
            vec![(
                TaskKind::Monitor,
                Arc::new(GateHandler {
                    release: Arc::clone(&release),
                }) as Arc<dyn TaskHandler>,
            )],
        );

        let first = Task::new(TaskKind::Monitor, serde_json::json!({}));
        let id = first.id.clone();
        let receipt = pool.submit(first).await.unwrap();

        let dup = Task::new(TaskKind::Monitor, serde_json::json!({})).with_id(id);
        match pool.submit(dup).await {
            Err(SubmitError::DuplicateTaskId(_)) => {}
            other => panic!("expected DuplicateTaskId, got {other:?}"),
        }

        release.notify_one();
        assert!(receipt.wait().await.success);
    }

    #[tokio::test]
    async fn invalid_task_rejected_synchronously() {
        let pool = pool_with(
            1,
            vec![(TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>)],
        );
        let mut task = Task::new(TaskKind::Collect, serde_json::json!({}));
        task.timeout_ms = Some(0);
        match pool.submit(task).await {
            Err(SubmitError::InvalidTask(_)) => {}
            other => panic!("expected InvalidTask, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn priority_order_on_single_slot() {
        let release = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = pool_with(
            1,
            vec![
                (
                    TaskKind::Monitor,
                    Arc::new(GateHandler {
                        release: Arc::clone(&release),
                    }) as Arc<dyn TaskHandler>,
                ),
                (
                    TaskKind::Collect,
                    Arc::new(RecordingHandler {
                        log: Arc::clone(&log),
                    }) as Arc<dyn TaskHandler>,
                ),
            ],
        );

        // occupy the only slot so a, b, c all queue behind the gate
        let gate = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();

        let a = pool
            .submit(
                Task::new(TaskKind::Collect, serde_json::json!({"marker": "a"}))
                    .with_priority(Priority::Low),
            )
            .await
            .unwrap();
        let b = pool
            .submit(
                Task::new(TaskKind::Collect, serde_json::json!({"marker": "b"}))
                    .with_priority(Priority::High),
            )
            .await
            .unwrap();
        let c = pool
            .submit(
                Task::new(TaskKind::Collect, serde_json::json!({"marker": "c"}))
                    .with_priority(Priority::Normal),
            )
            .await
            .unwrap();

        release.notify_one();
        gate.wait().await;
        a.wait().await;
        b.wait().await;
        c.wait().await;

        assert_eq!(*log.lock().unwrap(), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn fifo_within_one_priority_tier() {
        let release = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = pool_with(
            1,
            vec![
                (
                    TaskKind::Monitor,
                    Arc::new(GateHandler {
                        release: Arc::clone(&release),
                    }) as Arc<dyn TaskHandler>,
                ),
                (
                    TaskKind::Collect,
                    Arc::new(RecordingHandler {
                        log: Arc::clone(&log),
                    }) as Arc<dyn TaskHandler>,
                ),
            ],
        );

        let gate = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();
        let mut receipts = Vec::new();
        for m in ["first", "second", "third"] {
            receipts.push(
                pool.submit(Task::new(TaskKind::Collect, serde_json::json!({"marker": m})))
                    .await
                    .unwrap(),
            );
        }
        release.notify_one();
        gate.wait().await;
        for r in receipts {
            r.wait().await;
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_settles_task_and_pool_recovers() {
        let pool = pool_with(
            1,
            vec![
                (TaskKind::Monitor, Arc::new(StallHandler) as Arc<dyn TaskHandler>),
                (TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>),
            ],
        );

        let stalled = Task::new(TaskKind::Monitor, serde_json::json!({}))
            .with_timeout(Duration::from_millis(50));
        let result = pool.submit(stalled).await.unwrap().wait().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(TaskErrorKind::TaskTimeout));
        assert_eq!(result.slot_id, Some(SlotId(0)));
        assert!(result.processing_time_ms >= 50);

        // the replaced slot still serves work
        let after = pool
            .submit(Task::new(TaskKind::Collect, serde_json::json!({"ok": 1})))
            .await
            .unwrap()
            .wait()
            .await;
        assert!(after.success);

        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn crash_settles_worker_crashed_and_pool_survives() {
        let pool = pool_with(
            1,
            vec![
                (TaskKind::Monitor, Arc::new(PanicHandler) as Arc<dyn TaskHandler>),
                (TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>),
            ],
        );

        let result = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap()
            .wait()
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(TaskErrorKind::WorkerCrashed));

        let after = pool
            .submit(Task::new(TaskKind::Collect, serde_json::json!({"ok": 1})))
            .await
            .unwrap()
            .wait()
            .await;
        assert!(after.success);

        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn handler_error_settles_handler_failed() {
        let pool = pool_with(
            1,
            vec![(TaskKind::Parse, Arc::new(FailingHandler) as Arc<dyn TaskHandler>)],
        );
        let result = pool
            .submit(Task::new(TaskKind::Parse, serde_json::json!({})))
            .await
            .unwrap()
            .wait()
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(TaskErrorKind::HandlerFailed));
        assert_eq!(result.error.as_deref(), Some("target unreachable"));
        // the unit is still trusted after a clean handler error
        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn batch_results_in_input_order() {
        let pool = pool_with(
            2,
            vec![(TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>)],
        );
        let tasks: Vec<Task> = (0..6)
            .map(|i| {
                Task::new(TaskKind::Collect, serde_json::json!({"i": i})).with_priority(
                    match i % 3 {
                        0 => Priority::Low,
                        1 => Priority::High,
                        _ => Priority::Normal,
                    },
                )
            })
            .collect();
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

        let batch = pool.submit_batch(tasks).await.unwrap();
        assert_eq!(batch.len(), 6);
        let results = batch.join().await;

        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.task_id, ids[i]);
            assert!(result.success);
            assert_eq!(result.value, Some(serde_json::json!({"i": i})));
        }
    }

    #[tokio::test]
    async fn every_accepted_task_settles_exactly_once() {
        let pool = pool_with(
            3,
            vec![
                (TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>),
                (TaskKind::Parse, Arc::new(FailingHandler) as Arc<dyn TaskHandler>),
            ],
        );

        let mut submitted = std::collections::HashSet::new();
        let mut receipts = Vec::new();
        for i in 0..20 {
            let kind = if i % 4 == 0 { TaskKind::Parse } else { TaskKind::Collect };
            let task = Task::new(kind, serde_json::json!({"i": i}));
            submitted.insert(task.id.clone());
            receipts.push(pool.submit(task).await.unwrap());
        }

        let results = futures::future::join_all(receipts.into_iter().map(TaskReceipt::wait)).await;
        let settled: std::collections::HashSet<TaskId> =
            results.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(settled, submitted);
        assert_eq!(results.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_in_flight_work() {
        let pool = pool_with(
            2,
            vec![(
                TaskKind::Collect,
                Arc::new(SleepHandler { millis: 10 }) as Arc<dyn TaskHandler>,
            )],
        );

        let mut receipts = Vec::new();
        for i in 0..10 {
            receipts.push(
                pool.submit(Task::new(TaskKind::Collect, serde_json::json!({"i": i})))
                    .await
                    .unwrap(),
            );
        }

        // 2 tasks are in flight, 8 still queued when shutdown lands
        pool.shutdown(Duration::from_millis(1000)).await;

        let results = futures::future::join_all(receipts.into_iter().map(TaskReceipt::wait)).await;
        assert_eq!(results.len(), 10);

        // every submitted task has settled by the time shutdown resolves:
        // the in-flight pair drained to completion, the queued rest were
        // rejected without ever touching a slot
        let drained: Vec<_> = results.iter().filter(|r| r.success).collect();
        assert_eq!(drained.len(), 2);
        for rejected in results.iter().filter(|r| !r.success) {
            assert_eq!(rejected.error_kind, Some(TaskErrorKind::PoolShuttingDown));
            assert!(rejected.slot_id.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_queued_and_cancels_at_deadline() {
        let pool = pool_with(
            1,
            vec![(TaskKind::Monitor, Arc::new(StallHandler) as Arc<dyn TaskHandler>)],
        );

        let stuck = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();
        let queued = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();

        pool.shutdown(Duration::from_millis(50)).await;

        let queued_result = queued.wait().await;
        assert_eq!(queued_result.error_kind, Some(TaskErrorKind::PoolShuttingDown));
        assert!(queued_result.slot_id.is_none());

        let stuck_result = stuck.wait().await;
        assert_eq!(stuck_result.error_kind, Some(TaskErrorKind::PoolShuttingDown));
        assert_eq!(stuck_result.slot_id, Some(SlotId(0)));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = pool_with(
            1,
            vec![(TaskKind::Collect, Arc::new(EchoHandler) as Arc<dyn TaskHandler>)],
        );
        pool.shutdown(Duration::from_millis(10)).await;
        assert!(pool.is_shutting_down());

        match pool
            .submit(Task::new(TaskKind::Collect, serde_json::json!({})))
            .await
        {
            Err(SubmitError::PoolShuttingDown) => {}
            other => panic!("expected PoolShuttingDown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stats_reflect_queue_and_slot_occupancy() {
        let release = Arc::new(Notify::new());
        let pool = pool_with(
            1,
            vec![(
                TaskKind::Monitor,
                Arc::new(GateHandler {
                    release: Arc::clone(&release),
                }) as Arc<dyn TaskHandler>,
            )],
        );

        let busy = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();
        let q1 = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();
        let q2 = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap();

        let stats = pool.stats().await;
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.completed, 0);

        release.notify_one();
        busy.wait().await;
        release.notify_one();
        q1.wait().await;
        release.notify_one();
        q2.wait().await;

        let stats = pool.stats().await;
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.queued, 0);
        assert!(stats.avg_processing_ms >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_when_task_has_none() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskKind::Monitor, Arc::new(StallHandler))
            .unwrap();
        let pool = WorkerPool::start(
            PoolConfig {
                size: 1,
                default_timeout: Some(Duration::from_millis(25)),
            },
            registry,
        );

        let result = pool
            .submit(Task::new(TaskKind::Monitor, serde_json::json!({})))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(result.error_kind, Some(TaskErrorKind::TaskTimeout));
    }
}
