//! The unit of work moved through the queue and its identity.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{QueueError, TaskError};

/// A unit of computation executed on the queue's worker pool.
///
/// Implementors carry their own input state. `execute` runs synchronously on a dedicated
/// worker thread and returns its output explicitly; the task value itself is handed back to
/// the producer together with the output inside a [`CompletedTask`].
///
/// A panic inside `execute` is contained to the task: it surfaces as
/// [`TaskError::Panicked`] on the producer's [`ResponseHandle`] and the worker moves on to
/// the next item.
pub trait Task: Send + 'static {
    /// The value produced by executing this task.
    type Output: Send + 'static;

    /// Performs the computation.
    fn execute(&mut self) -> Self::Output;
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a task within the queue.
///
/// Ids are drawn from a process-global monotonic counter, so every id handed out is unique
/// for the lifetime of the process and ids are strictly increasing. Uniqueness is what makes
/// exactly-once result routing possible; it is enforced by construction rather than assumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub(crate) type ReplySender<T> = oneshot::Sender<Result<CompletedTask<T>, QueueError>>;

/// The envelope submitted to the queue.
///
/// Carries the task's identity, the sending half of the producer's private response channel,
/// and the task itself. Usually constructed implicitly through
/// [`QueueHandle::submit`](crate::QueueHandle::submit); construct it directly when the id is
/// needed before submission.
pub struct TaskItem<T: Task> {
    pub(crate) id: TaskId,
    pub(crate) reply_tx: ReplySender<T>,
    pub(crate) task: T,
}

impl<T: Task> TaskItem<T> {
    /// Creates an item for `task` together with the handle its result is delivered on.
    ///
    /// Allocates a fresh [`TaskId`] and a fresh single-use response channel. The item is
    /// what gets submitted; the handle is what the producer awaits.
    pub fn new(task: T) -> (Self, ResponseHandle<T>) {
        let id = TaskId::next();
        let (reply_tx, reply_rx) = oneshot::channel();

        let item = Self { id, reply_tx, task };
        let handle = ResponseHandle { id, rx: reply_rx };

        (item, handle)
    }

    /// Returns the identity of this item.
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T: Task> fmt::Debug for TaskItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskItem").field("id", &self.id).finish()
    }
}

/// A task that has been registered with the dispatcher but carries no routing information.
///
/// This is what travels to the workers: identity and payload only. Workers never see the
/// response channel.
pub(crate) struct PendingTask<T: Task> {
    pub id: TaskId,
    pub task: T,
}

/// A finished task as delivered back to its producer.
pub struct CompletedTask<T: Task> {
    /// The identity the task was submitted with.
    pub id: TaskId,
    /// The task value itself, after execution.
    pub task: T,
    /// The output of `execute`, or the execution failure.
    pub result: Result<T::Output, TaskError>,
}

impl<T: Task> CompletedTask<T> {
    /// Unwraps the execution result, discarding the task value.
    pub fn into_result(self) -> Result<T::Output, TaskError> {
        self.result
    }
}

impl<T: Task> fmt::Debug for CompletedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedTask")
            .field("id", &self.id)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// The receiving half of a producer's private response channel.
///
/// Resolves exactly once: with the [`CompletedTask`] once the task has executed, or with a
/// [`QueueError`] if the queue rejected or abandoned it. Dropping the handle does not cancel
/// the task.
pub struct ResponseHandle<T: Task> {
    id: TaskId,
    rx: oneshot::Receiver<Result<CompletedTask<T>, QueueError>>,
}

impl<T: Task> ResponseHandle<T> {
    /// Returns the identity of the submitted task this handle belongs to.
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T: Task> fmt::Debug for ResponseHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("id", &self.id)
            .finish()
    }
}

impl<T: Task> Future for ResponseHandle<T> {
    type Output = Result<CompletedTask<T>, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            // The sender is dropped unresolved only if the dispatcher is gone.
            match received {
                Ok(resolution) => resolution,
                Err(_) => Err(QueueError::ShuttingDown),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Task for Noop {
        type Output = ();

        fn execute(&mut self) {}
    }

    #[test]
    fn test_task_ids_are_unique_and_increasing() {
        let ids: Vec<TaskId> = (0..100).map(|_| TaskItem::new(Noop).0.id()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_item_and_handle_share_an_id() {
        let (item, handle) = TaskItem::new(Noop);
        assert_eq!(item.id(), handle.id());
    }
}
