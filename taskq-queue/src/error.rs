//! Error types surfaced to producers.

use thiserror::Error;

/// An error resolved on a [`ResponseHandle`](crate::ResponseHandle) in place of a completed
/// task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The dispatcher's backlog was at capacity and the task was not admitted.
    #[error("the task queue backlog is full")]
    QueueFull,
    /// The queue stopped before the task could run to completion.
    #[error("the task queue is shutting down")]
    ShuttingDown,
}

/// An execution failure of a single task.
///
/// Execution failures are contained to the task they occurred in; the queue and its workers
/// keep running.
#[derive(Clone, Debug, Error)]
pub enum TaskError {
    /// The task's `execute` panicked.
    #[error("task panicked: {message}")]
    Panicked {
        /// The panic payload, rendered to a string.
        message: String,
    },
}

/// An error when sending a message to the queue fails because the dispatcher has stopped.
#[derive(Clone, Copy, Debug, Error)]
#[error("failed to send message to the task queue")]
pub struct SubmitError;
