use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use rotor_core::{SlotId, Task, TaskId};

use crate::handler::HandlerRegistry;

/// Observable lifecycle of a worker slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    Idle,
    Busy,
    Restarting,
}

/// One task handed to an execution unit.
pub(crate) struct Assignment {
    pub task: Task,
}

/// Messages from execution units (and their watchers) back to the dispatch
/// loop. `epoch` identifies which spawn of the slot sent the message; the
/// loop discards anything from a unit it has already replaced.
pub(crate) enum SlotMessage {
    Completed {
        slot_id: SlotId,
        epoch: u64,
        task_id: TaskId,
        outcome: Result<serde_json::Value, String>,
        elapsed_ms: u64,
    },
    Exited {
        slot_id: SlotId,
        epoch: u64,
        panicked: bool,
    },
}

/// Bookkeeping for the task currently occupying a slot.
pub(crate) struct InFlight {
    pub task_id: TaskId,
    pub deadline: Option<Instant>,
    pub started_at: Instant,
}

/// A worker slot: stable id, current state, and the channel + abort handle of
/// its live execution unit. The slot itself never goes away; the unit behind
/// it is replaced on crash or timeout.
pub(crate) struct WorkerSlot {
    pub id: SlotId,
    pub epoch: u64,
    pub state: SlotState,
    pub assign_tx: mpsc::Sender<Assignment>,
    pub abort: AbortHandle,
    pub current: Option<InFlight>,
}

impl WorkerSlot {
    pub fn spawn(
        id: SlotId,
        handlers: Arc<HandlerRegistry>,
        msg_tx: mpsc::Sender<SlotMessage>,
    ) -> Self {
        let epoch = 0;
        let (assign_tx, abort) = spawn_execution_unit(id, epoch, handlers, msg_tx);
        Self {
            id,
            epoch,
            state: SlotState::Idle,
            assign_tx,
            abort,
            current: None,
        }
    }

    /// Kill the current execution unit (if still running) and bring up a
    /// replacement. The slot passes through Restarting and comes back Idle.
    pub fn respawn(&mut self, handlers: Arc<HandlerRegistry>, msg_tx: mpsc::Sender<SlotMessage>) {
        self.state = SlotState::Restarting;
        self.abort.abort();
        self.epoch += 1;
        let (assign_tx, abort) = spawn_execution_unit(self.id, self.epoch, handlers, msg_tx);
        self.assign_tx = assign_tx;
        self.abort = abort;
        self.current = None;
        self.state = SlotState::Idle;
        tracing::debug!(slot = %self.id, epoch = self.epoch, "Execution unit replaced");
    }
}

/// Spawn the execution unit for a slot: a task that waits for assignments and
/// reports outcomes, plus a watcher that turns the unit's JoinHandle into an
/// `Exited` message so the dispatch loop sees crashes.
fn spawn_execution_unit(
    slot_id: SlotId,
    epoch: u64,
    handlers: Arc<HandlerRegistry>,
    msg_tx: mpsc::Sender<SlotMessage>,
) -> (mpsc::Sender<Assignment>, AbortHandle) {
    let (assign_tx, mut assign_rx) = mpsc::channel::<Assignment>(1);

    let unit_tx = msg_tx.clone();
    let unit = tokio::spawn(async move {
        while let Some(Assignment { task }) = assign_rx.recv().await {
            let started = Instant::now();
            let task_id = task.id.clone();
            let outcome = match handlers.get(task.kind) {
                Some(handler) => handler.handle(&task).await.map_err(|e| e.to_string()),
                None => Err(format!("no handler registered for {}", task.kind)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let sent = unit_tx
                .send(SlotMessage::Completed {
                    slot_id,
                    epoch,
                    task_id,
                    outcome,
                    elapsed_ms,
                })
                .await;
            if sent.is_err() {
                // dispatch loop is gone
                break;
            }
        }
    });

    let abort = unit.abort_handle();
    tokio::spawn(async move {
        let panicked = match unit.await {
            Ok(()) => false,
            Err(err) => err.is_panic(),
        };
        let _ = msg_tx
            .send(SlotMessage::Exited {
                slot_id,
                epoch,
                panicked,
            })
            .await;
    });

    (assign_tx, abort)
}
