//! Task queue.

use std::collections::VecDeque;
use std::time::Instant;

use offload_common::{QueueDiscipline, TaskArgs, TaskId};
use serde_json::Value;
use tokio::sync::oneshot;

pub(crate) type Responder = oneshot::Sender<offload_common::Result<Value>>;

/// A submitted task that has not been dispatched yet.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub function_name: String,
    pub arguments: TaskArgs,
    pub priority: i32,
    pub submitted_at: Instant,
    pub(crate) responder: Responder,
}

/// Pending tasks, in dispatch order.
///
/// FIFO by default. Under [`QueueDiscipline::Priority`] higher priorities are
/// dequeued first and equal priorities keep submission order.
#[derive(Debug)]
pub struct TaskQueue {
    discipline: QueueDiscipline,
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self {
            discipline,
            tasks: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, task: Task) {
        match self.discipline {
            QueueDiscipline::Fifo => self.tasks.push_back(task),
            QueueDiscipline::Priority => {
                let position = self
                    .tasks
                    .iter()
                    .position(|queued| queued.priority < task.priority)
                    .unwrap_or(self.tasks.len());
                self.tasks.insert(position, task);
            }
        }
    }

    pub fn dequeue_next(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Removes a queued task, e.g. on cancellation.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let position = self.tasks.iter().position(|task| task.id == id)?;
        self.tasks.remove(position)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|task| task.id).collect()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: TaskId, priority: i32) -> Task {
        let (responder, _) = oneshot::channel();
        Task {
            id,
            function_name: "f".into(),
            arguments: vec![],
            priority,
            submitted_at: Instant::now(),
            responder,
        }
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let mut queue = TaskQueue::new(QueueDiscipline::Fifo);
        queue.enqueue(task(1, 0));
        queue.enqueue(task(2, 10));
        queue.enqueue(task(3, 5));
        assert_eq!(queue.ids(), vec![1, 2, 3]);
        assert_eq!(queue.dequeue_next().map(|t| t.id), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_priority_is_stable() {
        let mut queue = TaskQueue::new(QueueDiscipline::Priority);
        queue.enqueue(task(1, 0));
        queue.enqueue(task(2, 5));
        queue.enqueue(task(3, 0));
        queue.enqueue(task(4, 5));
        queue.enqueue(task(5, -1));
        assert_eq!(queue.ids(), vec![2, 4, 1, 3, 5]);
    }

    #[test]
    fn test_remove() {
        let mut queue = TaskQueue::new(QueueDiscipline::Fifo);
        queue.enqueue(task(1, 0));
        queue.enqueue(task(2, 0));
        assert_eq!(queue.remove(1).map(|t| t.id), Some(1));
        assert!(queue.remove(1).is_none());
        assert_eq!(queue.ids(), vec![2]);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = TaskQueue::new(QueueDiscipline::Fifo);
        assert!(queue.is_empty());
        assert!(queue.dequeue_next().is_none());
        assert_eq!(queue.drain().count(), 0);
    }
}
