use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use offload_common::{
    FunctionDefinition, OffloadError, PoolConfig, RemoteDependency, Result, TaskArgs, TaskId,
    TaskMessage, TaskReply,
};
use offload_metrics::{FunctionMetricsRegistry, MetricsSnapshot, PoolStats};
use offload_worker::{
    spawn_worker, DefaultLoader, ScriptLoader, WorkerEvent, WorkerHandle, WorkerId, WorkerProgram,
};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::handle::TaskHandle;
use crate::queue::Task;
use crate::registry::FunctionRegistry;
use crate::state::{InFlight, PoolState, SlotId, SlotStatus, WorkerSlot, WorkerSlotInfo};
use crate::stats::StatsStream;

/// Backoff doubles per consecutive fault up to this multiple.
const MAX_BACKOFF_MULTIPLIER: u32 = 32;

/// Deferred work delivered to the event loop.
#[derive(Debug)]
enum TimerEvent {
    TimedOut {
        slot_id: SlotId,
        worker_id: WorkerId,
        task_id: TaskId,
    },
    Respawn {
        slot_id: SlotId,
    },
}

/// State shared between the pool handle, the event loop, task handles and
/// stats streams. Only [`WorkerPool`] holds a strong reference.
pub(crate) struct Shared {
    config: PoolConfig,
    registry: RwLock<FunctionRegistry>,
    state: Mutex<PoolState>,
    stats_tx: watch::Sender<PoolStats>,
    metrics: FunctionMetricsRegistry,
    loader: Arc<dyn ScriptLoader>,
    events_tx: UnboundedSender<WorkerEvent>,
    timers_tx: UnboundedSender<TimerEvent>,
    runtime: Handle,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A bounded pool of JavaScript worker threads.
///
/// Workers are spawned lazily, up to `maxWorkers`, each running the program
/// built from the functions registered so far. Must be created inside a tokio
/// runtime; the pool's event loop runs as a task on it.
///
/// # Example
///
/// ```no_run
/// use offload_common::PoolConfig;
/// use offload_pool::WorkerPool;
/// use serde_json::json;
///
/// # async fn example() -> offload_common::Result<()> {
/// let pool = WorkerPool::new(PoolConfig::default().with_max_workers(2))?;
/// pool.register("double", "x => x * 2", vec![])?;
///
/// let result = pool.call("double", vec![json!(21)]).await?;
/// assert_eq!(result, json!(42));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    event_loop: JoinHandle<()>,
}

impl WorkerPool {
    /// Creates a pool that loads dependencies over http(s) or from disk.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_loader(config, Arc::new(DefaultLoader::default()))
    }

    pub fn with_loader(config: PoolConfig, loader: Arc<dyn ScriptLoader>) -> Result<Self> {
        Self::with_functions(config, loader, Vec::new())
    }

    /// Creates a pool with `functions` registered before any worker starts,
    /// so prewarmed workers already carry them.
    pub fn with_functions(
        config: PoolConfig,
        loader: Arc<dyn ScriptLoader>,
        functions: Vec<FunctionDefinition>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            OffloadError::InvalidConfig("WorkerPool must be created inside a tokio runtime".into())
        })?;

        let mut registry = FunctionRegistry::new(config.duplicate_policy);
        for function in functions {
            registry.register(&function.name, &function.body, function.dependencies)?;
        }
        let program = Arc::new(build_program(&config, &registry));

        let (events_tx, events_rx) = unbounded_channel();
        let (timers_tx, timers_rx) = unbounded_channel();
        let state = PoolState::new(config.queue_discipline, program);
        let (stats_tx, _) = watch::channel(state.stats());

        let shared = Arc::new(Shared {
            config,
            registry: RwLock::new(registry),
            state: Mutex::new(state),
            stats_tx,
            metrics: FunctionMetricsRegistry::new(),
            loader,
            events_tx,
            timers_tx,
            runtime: runtime.clone(),
        });

        let event_loop = runtime.spawn(run_event_loop(
            Arc::downgrade(&shared),
            events_rx,
            timers_rx,
        ));

        {
            let mut state = shared.lock_state();
            for _ in 0..shared.config.prewarm_workers {
                shared.spawn_slot(&mut state)?;
            }
            shared.publish(&state);
        }

        info!(
            max_workers = shared.config.max_workers,
            prewarm = shared.config.prewarm_workers,
            functions = shared.read_registry().len(),
            "Worker pool started"
        );

        Ok(Self { shared, event_loop })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Registers a function. Running workers keep their program; idle ones
    /// are replaced right away and busy ones after their current task.
    pub fn register(
        &self,
        name: &str,
        body: &str,
        dependencies: Vec<RemoteDependency>,
    ) -> Result<()> {
        self.shared.register(name, body, dependencies)
    }

    pub fn register_definition(&self, function: FunctionDefinition) -> Result<()> {
        self.register(&function.name, &function.body, function.dependencies)
    }

    /// Names of registered functions, in registration order.
    pub fn functions(&self) -> Vec<String> {
        self.shared.read_registry().names()
    }

    /// Queues a call to `name`. Fails with `UnknownFunction` without queueing
    /// anything if the name is not registered.
    pub fn submit(&self, name: &str, arguments: TaskArgs) -> Result<TaskHandle> {
        self.shared.submit(name, arguments, 0)
    }

    /// Like [`submit`](Self::submit), ordering by `priority` when the pool
    /// uses the priority queue discipline.
    pub fn submit_with_priority(
        &self,
        name: &str,
        arguments: TaskArgs,
        priority: i32,
    ) -> Result<TaskHandle> {
        self.shared.submit(name, arguments, priority)
    }

    /// Submits and awaits the result.
    pub async fn call(&self, name: &str, arguments: TaskArgs) -> Result<Value> {
        self.submit(name, arguments)?.await
    }

    /// Cancels a queued or running task. Returns `false` if it already settled.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.shared.cancel(task_id)
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// A receiver updated on every state transition.
    pub fn watch_stats(&self) -> watch::Receiver<PoolStats> {
        self.shared.stats_tx.subscribe()
    }

    /// A stream yielding a snapshot every `period`.
    pub fn subscribe_stats(&self, period: Duration) -> StatsStream {
        StatsStream::new(period, Arc::downgrade(&self.shared))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_ms: self.shared.metrics.uptime_ms(),
            pool: self.shared.stats(),
            functions: self.shared.metrics.snapshot(),
        }
    }

    pub fn worker_slots(&self) -> Vec<WorkerSlotInfo> {
        let state = self.shared.lock_state();
        state.slots.values().map(WorkerSlot::info).collect()
    }

    /// The program new workers are spawned with.
    pub fn program(&self) -> Arc<WorkerProgram> {
        self.shared.lock_state().program.clone()
    }

    /// Rejects every queued and running task with `Shutdown` and stops all
    /// workers. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown();
        self.event_loop.abort();
    }
}

fn build_program(config: &PoolConfig, registry: &FunctionRegistry) -> WorkerProgram {
    WorkerProgram::build(
        registry.version(),
        &config.remote_dependencies,
        &config.remote_dependency_names,
        registry.entries(),
    )
}

/// Error delivered to a task whose worker faulted.
fn fault_error(error: &OffloadError) -> OffloadError {
    match error {
        OffloadError::DependencyLoad { url, reason } => OffloadError::DependencyLoad {
            url: url.clone(),
            reason: reason.clone(),
        },
        OffloadError::WorkerFault(reason) => OffloadError::WorkerFault(reason.clone()),
        other => OffloadError::WorkerFault(other.to_string()),
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, FunctionRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, FunctionRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.lock_state().stats()
    }

    fn publish(&self, state: &PoolState) {
        let stats = state.stats();
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }

    fn register(&self, name: &str, body: &str, dependencies: Vec<RemoteDependency>) -> Result<()> {
        // Registry before state, everywhere
        let program = {
            let mut registry = self.write_registry();
            registry.register(name, body, dependencies)?;
            Arc::new(build_program(&self.config, &registry))
        };

        let mut state = self.lock_state();
        let version = program.version();
        state.program = program;
        info!(function = name, version, "Function registered");

        let stale: Vec<SlotId> = state
            .slots
            .values()
            .filter(|slot| slot.status == SlotStatus::Idle && slot.program_version != version)
            .map(|slot| slot.slot_id)
            .collect();
        for slot_id in stale {
            self.retire_slot(&mut state, slot_id);
        }

        self.pump(&mut state);
        self.publish(&state);
        Ok(())
    }

    fn submit(self: &Arc<Self>, name: &str, arguments: TaskArgs, priority: i32) -> Result<TaskHandle> {
        self.read_registry().lookup(name)?;

        let mut state = self.lock_state();
        if state.closed {
            return Err(OffloadError::Shutdown);
        }

        let task_id = state.next_task_id();
        let (responder, receiver) = oneshot::channel();
        state.queue.enqueue(Task {
            id: task_id,
            function_name: name.to_string(),
            arguments,
            priority,
            submitted_at: std::time::Instant::now(),
            responder,
        });
        trace!(task_id, function = name, priority, "Task queued");

        self.pump(&mut state);
        self.publish(&state);

        Ok(TaskHandle::new(task_id, receiver, Arc::downgrade(self)))
    }

    /// Hands queued tasks to idle slots, spawning slots while under the cap.
    fn pump(&self, state: &mut PoolState) {
        if state.closed {
            return;
        }

        while !state.queue.is_empty() {
            let slot_id = match state.idle_slot() {
                Some(slot_id) => slot_id,
                None if state.slots.len() < self.config.max_workers => {
                    match self.spawn_slot(state) {
                        Ok(slot_id) => slot_id,
                        // Busy or respawning slots pump again when they settle;
                        // with none left the queue would never drain.
                        Err(e) if state.slots.is_empty() => {
                            warn!(error = %e, "Failed to spawn worker, rejecting queued task");
                            state.reject_next(OffloadError::WorkerFault(format!(
                                "failed to spawn worker: {}",
                                e
                            )));
                            continue;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to spawn worker");
                            break;
                        }
                    }
                }
                None => break,
            };

            let Some(task) = state.queue.dequeue_next() else {
                break;
            };
            self.dispatch(state, slot_id, task);
        }
    }

    fn dispatch(&self, state: &mut PoolState, slot_id: SlotId, task: Task) {
        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return;
        };
        let Some(handle) = slot.handle.as_ref() else {
            return;
        };

        let Task {
            id: task_id,
            function_name,
            arguments,
            submitted_at,
            responder,
            ..
        } = task;

        let worker_id = handle.worker_id();
        let message = TaskMessage::new(task_id, function_name.clone(), arguments);

        // A worker only drops its receiver after queueing Fault or Exited, so
        // the task settles when that event arrives.
        let timeout = match handle.send(message) {
            Ok(()) => self.start_timeout(slot_id, worker_id, task_id),
            Err(error) => {
                debug!(task_id, slot_id, error = %error, "Worker gone before dispatch");
                None
            }
        };

        slot.status = SlotStatus::Busy;
        slot.current = Some(InFlight {
            task_id,
            function_name,
            dispatched_at: std::time::Instant::now(),
            responder: Some(responder),
            timeout,
        });
        debug!(
            task_id,
            slot_id,
            worker_id,
            queued_ms = submitted_at.elapsed().as_millis() as u64,
            "Task dispatched"
        );
    }

    fn start_timeout(&self, slot_id: SlotId, worker_id: WorkerId, task_id: TaskId) -> Option<AbortHandle> {
        let timeout = self.config.task_timeout()?;
        let timers = self.timers_tx.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timers.send(TimerEvent::TimedOut {
                slot_id,
                worker_id,
                task_id,
            });
        });
        Some(timer.abort_handle())
    }

    fn spawn_instance(&self, state: &mut PoolState) -> Result<WorkerHandle> {
        let worker_id = state.next_worker_id();
        spawn_worker(
            worker_id,
            state.program.clone(),
            self.loader.clone(),
            self.events_tx.clone(),
        )
    }

    /// New slots are Idle immediately; tasks sent before bootstrap finishes
    /// wait in the worker's channel.
    fn spawn_slot(&self, state: &mut PoolState) -> Result<SlotId> {
        let handle = self.spawn_instance(state)?;
        let slot_id = state.next_slot_id();
        debug!(
            slot_id,
            worker_id = handle.worker_id(),
            program_version = handle.program_version(),
            "Worker spawned"
        );
        state.slots.insert(slot_id, WorkerSlot::new(slot_id, handle));
        Ok(slot_id)
    }

    fn retire_slot(&self, state: &mut PoolState, slot_id: SlotId) {
        if let Some(slot) = state.slots.remove(&slot_id) {
            debug!(slot_id, program_version = slot.program_version, "Retiring stale worker");
            if let Some(handle) = slot.handle {
                handle.shutdown();
            }
        }
    }

    fn handle_worker_event(&self, event: WorkerEvent) {
        let mut state = self.lock_state();
        let worker_id = event.worker_id();
        let Some(slot_id) = state.slot_for_worker(worker_id) else {
            trace!(worker_id, "Ignoring event from retired worker");
            return;
        };

        match event {
            WorkerEvent::Ready { .. } => {
                if let Some(slot) = state.slots.get_mut(&slot_id) {
                    slot.consecutive_faults = 0;
                }
                debug!(slot_id, worker_id, "Worker ready");
            }
            WorkerEvent::Reply { reply, .. } => self.complete(&mut state, slot_id, reply),
            WorkerEvent::Fault { error, .. } => self.fault(&mut state, slot_id, error),
            WorkerEvent::Exited { .. } => {
                if !state.closed {
                    self.fault(
                        &mut state,
                        slot_id,
                        OffloadError::WorkerFault(format!("worker {} exited unexpectedly", worker_id)),
                    );
                }
            }
        }

        self.pump(&mut state);
        self.publish(&state);
    }

    fn complete(&self, state: &mut PoolState, slot_id: SlotId, reply: TaskReply) {
        let current_version = state.program.version();
        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return;
        };
        let Some(mut in_flight) = slot.current.take() else {
            warn!(slot_id, task_id = reply.task_id, "Reply from a worker with no task");
            return;
        };
        if in_flight.task_id != reply.task_id {
            warn!(
                slot_id,
                expected = in_flight.task_id,
                got = reply.task_id,
                "Reply for unexpected task"
            );
        }

        slot.status = SlotStatus::Idle;
        let stale = slot.program_version != current_version;
        let elapsed = in_flight.dispatched_at.elapsed();

        if let Some(responder) = in_flight.responder.take() {
            let outcome = reply.into_outcome();
            self.metrics
                .record(&in_flight.function_name, elapsed.as_micros() as u64, outcome.is_ok());
            match outcome {
                Ok(value) => {
                    state.record_completion(elapsed);
                    trace!(task_id = in_flight.task_id, elapsed_ms = elapsed.as_millis() as u64, "Task completed");
                    let _ = responder.send(Ok(value));
                }
                Err(payload) => {
                    state.record_failure();
                    let _ = responder.send(Err(OffloadError::TaskExecution(payload.message)));
                }
            }
        } else {
            trace!(task_id = in_flight.task_id, "Dropping reply for abandoned task");
        }

        if stale {
            self.retire_slot(state, slot_id);
        }
    }

    /// The worker instance in `slot_id` is unusable.
    fn fault(&self, state: &mut PoolState, slot_id: SlotId, error: OffloadError) {
        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return;
        };

        let in_flight = slot.current.take();
        slot.status = SlotStatus::Terminated;
        if let Some(handle) = slot.handle.take() {
            handle.detach();
        }
        slot.consecutive_faults += 1;
        let multiplier = 2u32
            .saturating_pow(slot.consecutive_faults.saturating_sub(1))
            .min(MAX_BACKOFF_MULTIPLIER);
        let delay = self.config.respawn_backoff() * multiplier;
        warn!(slot_id, error = %error, respawn_in_ms = delay.as_millis() as u64, "Worker faulted");

        if let Some(mut in_flight) = in_flight {
            if let Some(responder) = in_flight.responder.take() {
                self.metrics.record(
                    &in_flight.function_name,
                    in_flight.dispatched_at.elapsed().as_micros() as u64,
                    false,
                );
                state.record_failure();
                let _ = responder.send(Err(fault_error(&error)));
            }
        }

        self.schedule_respawn(slot_id, delay);
    }

    fn schedule_respawn(&self, slot_id: SlotId, delay: Duration) {
        let timers = self.timers_tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(TimerEvent::Respawn { slot_id });
        });
    }

    /// Replaces a terminated slot's worker with one running the current program.
    fn respawn(&self, state: &mut PoolState, slot_id: SlotId) {
        if state.closed {
            return;
        }
        let is_terminated = state
            .slots
            .get(&slot_id)
            .is_some_and(|slot| slot.status == SlotStatus::Terminated);
        if !is_terminated {
            return;
        }

        match self.spawn_instance(state) {
            Ok(handle) => {
                if let Some(slot) = state.slots.get_mut(&slot_id) {
                    slot.restarts += 1;
                    slot.program_version = handle.program_version();
                    info!(
                        slot_id,
                        worker_id = handle.worker_id(),
                        restarts = slot.restarts,
                        "Worker respawned"
                    );
                    slot.handle = Some(handle);
                    slot.status = SlotStatus::Idle;
                }
            }
            Err(e) => {
                warn!(slot_id, error = %e, "Failed to respawn worker, retrying");
                self.schedule_respawn(slot_id, self.config.respawn_backoff() * MAX_BACKOFF_MULTIPLIER);
            }
        }
    }

    fn handle_timer(&self, timer: TimerEvent) {
        let mut state = self.lock_state();
        match timer {
            TimerEvent::TimedOut {
                slot_id,
                worker_id,
                task_id,
            } => self.timed_out(&mut state, slot_id, worker_id, task_id),
            TimerEvent::Respawn { slot_id } => self.respawn(&mut state, slot_id),
        }
        self.pump(&mut state);
        self.publish(&state);
    }

    fn timed_out(&self, state: &mut PoolState, slot_id: SlotId, worker_id: WorkerId, task_id: TaskId) {
        let timeout_ms = self.config.task_timeout_ms.unwrap_or_default();
        let terminate = self.config.terminate_on_timeout;

        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return;
        };
        if slot.worker_id() != Some(worker_id) {
            return;
        }
        let Some(in_flight) = slot.current.as_mut().filter(|t| t.task_id == task_id) else {
            return;
        };
        let Some(responder) = in_flight.responder.take() else {
            return;
        };

        warn!(task_id, slot_id, timeout_ms, terminate, "Task timed out");
        self.metrics.record(
            &in_flight.function_name,
            in_flight.dispatched_at.elapsed().as_micros() as u64,
            false,
        );
        let _ = responder.send(Err(OffloadError::Timeout { task_id, timeout_ms }));

        if terminate {
            slot.current = None;
            slot.status = SlotStatus::Terminated;
            if let Some(handle) = slot.handle.take() {
                handle.detach();
            }
            state.record_failure();
            self.respawn(state, slot_id);
        } else {
            state.record_failure();
        }
    }

    pub(crate) fn cancel(&self, task_id: TaskId) -> bool {
        let mut state = self.lock_state();

        if let Some(task) = state.queue.remove(task_id) {
            state.record_failure();
            let _ = task.responder.send(Err(OffloadError::Cancelled(task_id)));
            debug!(task_id, "Queued task cancelled");
            self.publish(&state);
            return true;
        }

        let running = state.slots.values_mut().find_map(|slot| {
            slot.current
                .as_mut()
                .filter(|t| t.task_id == task_id)
                .and_then(|t| {
                    t.cancel_timeout();
                    t.responder.take().map(|r| (r, t.function_name.clone(), t.dispatched_at))
                })
        });

        match running {
            Some((responder, function_name, dispatched_at)) => {
                self.metrics
                    .record(&function_name, dispatched_at.elapsed().as_micros() as u64, false);
                state.record_failure();
                let _ = responder.send(Err(OffloadError::Cancelled(task_id)));
                debug!(task_id, "Running task cancelled; its result will be discarded");
                self.publish(&state);
                true
            }
            None => false,
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        state.closed = true;

        let queued: Vec<Task> = state.queue.drain().collect();
        for task in queued {
            state.record_failure();
            let _ = task.responder.send(Err(OffloadError::Shutdown));
        }

        let slots = std::mem::take(&mut state.slots);
        for (_, slot) in slots {
            if let Some(responder) = slot.current.and_then(|mut t| t.responder.take()) {
                state.record_failure();
                let _ = responder.send(Err(OffloadError::Shutdown));
            }
            if let Some(handle) = slot.handle {
                handle.detach();
            }
        }

        info!("Worker pool shut down");
        self.publish(&state);
    }
}

async fn run_event_loop(
    shared: Weak<Shared>,
    mut events: UnboundedReceiver<WorkerEvent>,
    mut timers: UnboundedReceiver<TimerEvent>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.handle_worker_event(event);
            }
            Some(timer) = timers.recv() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.handle_timer(timer);
            }
            else => break,
        }
    }
    trace!("Pool event loop stopped");
}
