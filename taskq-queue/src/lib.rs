//! # Taskq Queue
//!
//! An in-process task queue that decouples producers of compute work from a fixed pool of
//! worker threads. Each producer submits a task and asynchronously awaits its own result,
//! without knowledge of or contention with other producers.
//!
//! ## Architecture
//!
//! The center of the queue is a single dispatcher task. It owns the routing table mapping
//! every in-flight task to its producer's private response channel, and it is the only
//! reader and writer of that table, so the table needs no lock. Around it:
//!
//! - Producers submit [`TaskItem`]s on a bounded ingress channel through a [`QueueHandle`]
//!   and await their private [`ResponseHandle`].
//! - The dispatcher registers each item, then moves it into a worker pool
//!   ([`taskq_threading`]) through a bounded admission channel. Items that do not fit are
//!   held in a bounded backlog; beyond that, submissions are rejected with
//!   [`QueueError::QueueFull`].
//! - Workers execute [`Task::execute`] and forward the outcome on the results channel, from
//!   which the dispatcher routes it back to the matching producer.
//!
//! Completion order between independent tasks is unspecified; delivery per task is exactly
//! once.
//!
//! ## Error Handling
//!
//! A panic inside a task is contained to that task and comes back to its producer as
//! [`TaskError::Panicked`]. Overload and shutdown surface as [`QueueError`] values on the
//! response handle rather than blocking or crashing.
//!
//! ## Usage Example
//!
//! ```
//! use taskq_queue::{Task, start_queue};
//!
//! struct Double(u64);
//!
//! impl Task for Double {
//!     type Output = u64;
//!
//!     fn execute(&mut self) -> u64 {
//!         self.0 * 2
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = start_queue(4).unwrap();
//!
//! let handle = queue.submit(Double(21)).await.unwrap();
//! let completed = handle.await.unwrap();
//! assert_eq!(completed.result.unwrap(), 42);
//! # }
//! ```
//!
//! ## Shutdown
//!
//! [`QueueHandle::shutdown`] stops admission, drains in-flight tasks (up to an optional
//! deadline, after which still-pending response handles fail with
//! [`QueueError::ShuttingDown`]), closes the worker channels, and stops the dispatcher.
//! Dropping all handles triggers the same drain implicitly.

mod dispatcher;
mod error;
mod queue;
mod task;

pub use self::error::{QueueError, SubmitError, TaskError};
pub use self::queue::{QueueConfig, QueueHandle, TaskQueue, start_queue};
pub use self::task::{CompletedTask, ResponseHandle, Task, TaskId, TaskItem};
