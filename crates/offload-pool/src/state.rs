//! Pool bookkeeping guarded by the pool mutex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use offload_common::{OffloadError, QueueDiscipline, TaskId};
use offload_metrics::PoolStats;
use offload_worker::{WorkerHandle, WorkerId, WorkerProgram};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::queue::{Responder, TaskQueue};

pub type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Idle,
    Busy,
    /// The instance faulted or was abandoned; a replacement is pending.
    Terminated,
}

/// The task a slot is running.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub task_id: TaskId,
    pub function_name: String,
    pub dispatched_at: Instant,
    /// `None` once the caller has been answered early (cancel, timeout); the
    /// worker's eventual reply is then dropped.
    pub responder: Option<Responder>,
    /// Pending timeout timer, aborted when this record is dropped.
    pub timeout: Option<AbortHandle>,
}

impl InFlight {
    pub fn cancel_timeout(&mut self) {
        if let Some(timer) = self.timeout.take() {
            timer.abort();
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.cancel_timeout();
    }
}

#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub slot_id: SlotId,
    pub status: SlotStatus,
    pub handle: Option<WorkerHandle>,
    pub current: Option<InFlight>,
    pub restarts: u32,
    pub consecutive_faults: u32,
    pub program_version: u64,
}

impl WorkerSlot {
    pub fn new(slot_id: SlotId, handle: WorkerHandle) -> Self {
        Self {
            slot_id,
            status: SlotStatus::Idle,
            program_version: handle.program_version(),
            handle: Some(handle),
            current: None,
            restarts: 0,
            consecutive_faults: 0,
        }
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.handle.as_ref().map(WorkerHandle::worker_id)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, SlotStatus::Idle | SlotStatus::Busy)
    }

    pub fn info(&self) -> WorkerSlotInfo {
        WorkerSlotInfo {
            slot_id: self.slot_id,
            worker_id: self.worker_id(),
            status: self.status,
            current_task: self.current.as_ref().map(|task| task.task_id),
            restarts: self.restarts,
            program_version: self.program_version,
        }
    }
}

/// Snapshot of one worker slot, as returned by
/// [`WorkerPool::worker_slots`](crate::WorkerPool::worker_slots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSlotInfo {
    pub slot_id: SlotId,
    /// Id of the current worker instance; `None` while terminated.
    pub worker_id: Option<WorkerId>,
    pub status: SlotStatus,
    pub current_task: Option<TaskId>,
    pub restarts: u32,
    pub program_version: u64,
}

#[derive(Debug)]
pub(crate) struct PoolState {
    pub queue: TaskQueue,
    pub slots: BTreeMap<SlotId, WorkerSlot>,
    pub program: Arc<WorkerProgram>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    total_duration_ms: f64,
    next_task_id: TaskId,
    next_slot_id: SlotId,
    next_worker_id: WorkerId,
    pub closed: bool,
}

impl PoolState {
    pub fn new(discipline: QueueDiscipline, program: Arc<WorkerProgram>) -> Self {
        Self {
            queue: TaskQueue::new(discipline),
            slots: BTreeMap::new(),
            program,
            tasks_completed: 0,
            tasks_failed: 0,
            total_duration_ms: 0.0,
            next_task_id: 1,
            next_slot_id: 1,
            next_worker_id: 1,
            closed: false,
        }
    }

    pub fn next_task_id(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    pub fn next_slot_id(&mut self) -> SlotId {
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        id
    }

    pub fn next_worker_id(&mut self) -> WorkerId {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        id
    }

    /// Folds a successful task's dispatch-to-completion time into the average.
    pub fn record_completion(&mut self, elapsed: Duration) {
        self.tasks_completed += 1;
        self.total_duration_ms += elapsed.as_secs_f64() * 1000.0;
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    /// Fails the next queued task with `error`. Used when no worker can be
    /// started to serve it.
    pub fn reject_next(&mut self, error: OffloadError) -> Option<TaskId> {
        let task = self.queue.dequeue_next()?;
        self.record_failure();
        let _ = task.responder.send(Err(error));
        Some(task.id)
    }

    pub fn slot_for_worker(&self, worker_id: WorkerId) -> Option<SlotId> {
        self.slots
            .values()
            .find(|slot| slot.worker_id() == Some(worker_id))
            .map(|slot| slot.slot_id)
    }

    pub fn idle_slot(&self) -> Option<SlotId> {
        self.slots
            .values()
            .find(|slot| slot.status == SlotStatus::Idle && slot.handle.is_some())
            .map(|slot| slot.slot_id)
    }

    pub fn stats(&self) -> PoolStats {
        let total_workers = self.slots.values().filter(|slot| slot.is_live()).count();
        let active_workers = self
            .slots
            .values()
            .filter(|slot| slot.status == SlotStatus::Busy)
            .count();

        let average_task_duration_ms = if self.tasks_completed == 0 {
            0.0
        } else {
            self.total_duration_ms / self.tasks_completed as f64
        };

        PoolStats {
            total_workers,
            active_workers,
            queue_length: self.queue.len(),
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            average_task_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_stats() {
        let state = PoolState::new(QueueDiscipline::Fifo, Arc::new(WorkerProgram::empty()));
        assert_eq!(state.stats(), PoolStats::default());
    }

    #[test]
    fn test_running_average() {
        let mut state = PoolState::new(QueueDiscipline::Fifo, Arc::new(WorkerProgram::empty()));
        state.record_completion(Duration::from_millis(10));
        state.record_completion(Duration::from_millis(30));
        state.record_failure();

        let stats = state.stats();
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.tasks_failed, 1);
        assert!((stats.average_task_duration_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_reject_next_fails_queue_head() {
        let mut state = PoolState::new(QueueDiscipline::Fifo, Arc::new(WorkerProgram::empty()));
        let mut receivers = Vec::new();
        for id in 1..=2 {
            let (responder, receiver) = tokio::sync::oneshot::channel();
            state.queue.enqueue(crate::queue::Task {
                id,
                function_name: "double".into(),
                arguments: vec![],
                priority: 0,
                submitted_at: Instant::now(),
                responder,
            });
            receivers.push(receiver);
        }

        let rejected = state.reject_next(OffloadError::WorkerFault("no threads".into()));
        assert_eq!(rejected, Some(1));
        assert!(matches!(
            receivers[0].try_recv(),
            Ok(Err(OffloadError::WorkerFault(ref reason))) if reason == "no threads"
        ));
        assert!(receivers[1].try_recv().is_err());

        let stats = state.stats();
        assert_eq!(stats.queue_length, 1);
        assert_eq!(stats.tasks_failed, 1);

        state.reject_next(OffloadError::WorkerFault("no threads".into()));
        assert_eq!(state.reject_next(OffloadError::Shutdown), None);
        assert_eq!(state.stats().tasks_failed, 2);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut state = PoolState::new(QueueDiscipline::Fifo, Arc::new(WorkerProgram::empty()));
        assert_eq!(state.next_task_id(), 1);
        assert_eq!(state.next_task_id(), 2);
        assert_eq!(state.next_slot_id(), 1);
        assert_eq!(state.next_worker_id(), 1);
        assert_eq!(state.next_worker_id(), 2);
    }
}
