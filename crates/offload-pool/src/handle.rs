use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use offload_common::{OffloadError, Result, TaskId};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::pool::Shared;

/// The caller's side of a submitted task.
///
/// Resolves exactly once with the function's result or the error that ended
/// the task. Dropping the handle does not cancel the task; call
/// [`cancel`](TaskHandle::cancel) for that.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    receiver: oneshot::Receiver<Result<Value>>,
    pool: Weak<Shared>,
}

impl TaskHandle {
    pub(crate) fn new(
        task_id: TaskId,
        receiver: oneshot::Receiver<Result<Value>>,
        pool: Weak<Shared>,
    ) -> Self {
        Self {
            task_id,
            receiver,
            pool,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task_id
    }

    /// Cancels the task. The handle then resolves with `Cancelled`.
    ///
    /// Returns `false` if the task already settled or the pool is gone. A task
    /// that is already running keeps running on its worker; only its result is
    /// discarded.
    pub fn cancel(&self) -> bool {
        self.pool
            .upgrade()
            .is_some_and(|pool| pool.cancel(self.task_id))
    }
}

impl Future for TaskHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The responder is only dropped unanswered when the pool is torn down
            Poll::Ready(Err(_)) => Poll::Ready(Err(OffloadError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}
