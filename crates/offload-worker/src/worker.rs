//! Worker threads.
//!
//! Each worker is an OS thread that owns one [`WorkerContext`]. Commands
//! arrive over a `std::sync::mpsc` channel (the thread blocks on it between
//! tasks); events leave over a tokio unbounded channel consumed by the pool's
//! event loop.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use offload_common::{OffloadError, Result, TaskMessage, TaskReply};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, info_span};

use crate::context::WorkerContext;
use crate::loader::ScriptLoader;
use crate::program::WorkerProgram;

/// Identifies one spawned worker instance. A respawned slot gets a new id.
pub type WorkerId = u64;

#[derive(Debug)]
pub enum WorkerCommand {
    Run(TaskMessage),
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerEvent {
    /// Bootstrap finished; the worker is accepting tasks.
    Ready { worker_id: WorkerId },
    Reply { worker_id: WorkerId, reply: TaskReply },
    /// The instance is unusable: bootstrap failed or the thread panicked.
    Fault { worker_id: WorkerId, error: OffloadError },
    /// The thread is about to return.
    Exited { worker_id: WorkerId },
}

impl WorkerEvent {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            WorkerEvent::Ready { worker_id }
            | WorkerEvent::Reply { worker_id, .. }
            | WorkerEvent::Fault { worker_id, .. }
            | WorkerEvent::Exited { worker_id } => *worker_id,
        }
    }
}

/// The manager's end of a worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    worker_id: WorkerId,
    program_version: u64,
    commands: mpsc::Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn program_version(&self) -> u64 {
        self.program_version
    }

    /// Queues a task on the worker. Fails with `WorkerFault` if the thread is
    /// gone.
    pub fn send(&self, message: TaskMessage) -> Result<()> {
        self.commands
            .send(WorkerCommand::Run(message))
            .map_err(|_| OffloadError::WorkerFault(format!("worker {} is not running", self.worker_id)))
    }

    /// Asks the worker to exit after its current task. Does not wait.
    pub fn shutdown(&self) {
        // Already gone is fine
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    /// Gives up on the thread without waiting for it. A thread stuck in a
    /// long-running function exits once that function returns.
    pub fn detach(mut self) {
        self.shutdown();
        self.thread.take();
    }
}

/// Spawns a worker thread running `program`.
///
/// The thread bootstraps its own context, reports `Ready` (or `Fault`) and
/// then serves commands until `Shutdown` or until every sender is dropped.
/// Tasks sent before `Ready` are buffered by the channel.
pub fn spawn_worker(
    worker_id: WorkerId,
    program: Arc<WorkerProgram>,
    loader: Arc<dyn ScriptLoader>,
    events: UnboundedSender<WorkerEvent>,
) -> Result<WorkerHandle> {
    let (tx, rx) = mpsc::channel();
    let program_version = program.version();

    let thread = thread::Builder::new()
        .name(format!("offload-worker-{}", worker_id))
        .spawn(move || {
            let span = info_span!("worker", worker_id, program_version);
            let _enter = span.enter();

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_worker(worker_id, &program, loader.as_ref(), &rx, &events)
            }));

            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(OffloadError::WorkerFault(format!(
                    "worker thread panicked: {}",
                    panic_message(&panic)
                ))),
            };

            if let Some(error) = fault {
                error!(error = %error, "Worker faulted");
                let _ = events.send(WorkerEvent::Fault { worker_id, error });
            }

            debug!("Worker exiting");
            let _ = events.send(WorkerEvent::Exited { worker_id });
        })?;

    Ok(WorkerHandle {
        worker_id,
        program_version,
        commands: tx,
        thread: Some(thread),
    })
}

fn run_worker(
    worker_id: WorkerId,
    program: &WorkerProgram,
    loader: &dyn ScriptLoader,
    commands: &mpsc::Receiver<WorkerCommand>,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<()> {
    let mut ctx = WorkerContext::bootstrap(program, loader)?;
    info!(
        dependencies = program.dependencies().len(),
        functions = program.functions().len(),
        "Worker ready"
    );

    if events.send(WorkerEvent::Ready { worker_id }).is_err() {
        // Pool is gone
        return Ok(());
    }

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Run(message) => {
                let task_id = message.task_id;
                debug!(task_id, function = %message.function_name, "Running task");
                let reply = ctx.dispatch(message);
                if events.send(WorkerEvent::Reply { worker_id, reply }).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }

    Ok(())
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
