//! # Taskq Threading
//!
//! This crate provides the worker pools backing the task queue: a fixed set of
//! dedicated OS threads that consume items from a shared, bounded admission
//! channel and run a caller-supplied callback for each of them.
//!
//! - **Flexible Configuration**: Fine-tune thread counts, naming patterns and
//!   panic handling strategies through a builder pattern.
//! - **Bounded Admission**: The pool holds a channel bounded to the number of
//!   worker threads. Dispatching is non-blocking; when the channel is full the
//!   item is handed back to the caller, which decides how to queue or reject
//!   it.
//! - **Panic Recovery**: Panics can be intercepted both per item and at the
//!   thread level, so a misbehaving item does not take the pool down.
//!
//! ## Concurrency Model
//!
//! All workers share a single receiver, so they naturally load-balance across
//! incoming items. An item occupies its worker for the full duration of the
//! callback; the pool never preempts or times out an item.
//!
//! ## Usage Example
//!
//! ```
//! use taskq_threading::WorkerPoolBuilder;
//!
//! let (tx, rx) = flume::unbounded();
//! let pool = WorkerPoolBuilder::new()
//!     .num_threads(4)
//!     .thread_name(|index| format!("worker-{index}"))
//!     .build(move |item: u64| {
//!         let _ = tx.send(item * 2);
//!     })
//!     .expect("failed to build worker pool");
//!
//! pool.dispatch(21).unwrap();
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```

mod builder;
mod pool;

pub use self::builder::*;
pub use self::pool::*;

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync;
