//! Queue bootstrap and the producer-facing handle.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use taskq_threading::WorkerPoolBuilder;

use crate::dispatcher::Dispatcher;
use crate::error::{SubmitError, TaskError};
use crate::task::{CompletedTask, PendingTask, ResponseHandle, Task, TaskItem};

/// Configuration for a [`TaskQueue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker threads. Fixed for the lifetime of the queue.
    pub worker_count: usize,
    /// Maximum number of admitted tasks held back while the worker pool is saturated.
    ///
    /// Submissions beyond this limit resolve with
    /// [`QueueError::QueueFull`](crate::QueueError::QueueFull) instead of growing the queue
    /// without bound.
    pub backlog_limit: usize,
    /// Name prefix for the worker threads; the worker's index is appended.
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            backlog_limit: 1024,
            thread_name: "taskq-worker".to_owned(),
        }
    }
}

/// Messages accepted on the queue's ingress channel.
pub(crate) enum QueueMessage<T: Task> {
    Submit(TaskItem<T>),
    Shutdown {
        timeout: Option<Duration>,
        ack: oneshot::Sender<()>,
    },
}

/// An in-process task queue backed by a fixed pool of worker threads.
///
/// Producers submit tasks through a [`QueueHandle`] and each awaits its own result on a
/// private [`ResponseHandle`], without contending with other producers. See the crate docs
/// for the overall flow.
#[derive(Debug)]
pub struct TaskQueue;

impl TaskQueue {
    /// Starts a queue and returns the handle producers submit tasks on.
    ///
    /// This spawns `config.worker_count` dedicated worker threads and one dispatcher task on
    /// the ambient tokio runtime. The queue runs until [`QueueHandle::shutdown`] is called
    /// or every handle has been dropped and all in-flight tasks have completed.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime context.
    pub fn start<T: Task>(config: QueueConfig) -> io::Result<QueueHandle<T>> {
        let (ingress_tx, ingress_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = flume::bounded(config.worker_count.max(1));

        let thread_name = config.thread_name;
        let pool = WorkerPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(move |index| format!("{thread_name}-{index}"))
            .build(move |pending: PendingTask<T>| execute_pending(pending, &results_tx))?;

        let dispatcher = Dispatcher::new(ingress_rx, results_rx, pool, config.backlog_limit);
        tokio::spawn(dispatcher.run());

        Ok(QueueHandle { tx: ingress_tx })
    }
}

/// Starts a queue with default configuration and the given number of workers.
pub fn start_queue<T: Task>(worker_count: usize) -> io::Result<QueueHandle<T>> {
    TaskQueue::start(QueueConfig {
        worker_count,
        ..QueueConfig::default()
    })
}

/// The worker body: execute one task and forward the outcome to the dispatcher.
///
/// A panic inside [`Task::execute`] is captured here and travels back to the producer as an
/// error result; it never unwinds into the worker's item loop.
fn execute_pending<T: Task>(pending: PendingTask<T>, results: &flume::Sender<CompletedTask<T>>) {
    let PendingTask { id, mut task } = pending;

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| task.execute()))
        .map_err(|payload| TaskError::Panicked {
            message: panic_message(payload),
        });

    if results.send(CompletedTask { id, task, result }).is_err() {
        tracing::debug!(%id, "dispatcher stopped before the result could be forwarded");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// The producer side of a [`TaskQueue`].
///
/// The handle allows submitting tasks to the queue for as long as it is running, and can be
/// freely cloned. Dropping the last handle shuts the queue down gracefully once all
/// in-flight tasks have completed.
#[derive(Debug)]
pub struct QueueHandle<T: Task> {
    pub(crate) tx: mpsc::Sender<QueueMessage<T>>,
}

// Manually derive clone since we do not require `T: Clone` and the Clone derive adds this
// constraint.
impl<T: Task> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Task> QueueHandle<T> {
    /// Submits a task and returns the handle its result will be delivered on.
    ///
    /// The ingress channel is unbuffered, so this suspends until the dispatcher is ready to
    /// receive the submission; that is the only backpressure producers observe. The returned
    /// [`ResponseHandle`] resolves exactly once.
    pub async fn submit(&self, task: T) -> Result<ResponseHandle<T>, SubmitError> {
        let (item, handle) = TaskItem::new(task);
        self.submit_item(item).await?;
        Ok(handle)
    }

    /// Submits a previously constructed [`TaskItem`].
    ///
    /// Useful when the task's id must be known before submission; pair with
    /// [`TaskItem::new`].
    pub async fn submit_item(&self, item: TaskItem<T>) -> Result<(), SubmitError> {
        self.tx
            .send(QueueMessage::Submit(item))
            .await
            .map_err(|_| SubmitError)
    }

    /// Shuts the queue down and waits for the dispatcher to stop.
    ///
    /// New submissions are rejected with
    /// [`QueueError::ShuttingDown`](crate::QueueError::ShuttingDown) from this point on,
    /// while tasks already admitted keep running to completion. With a `timeout`, tasks
    /// still unresolved when it elapses have their response handles failed instead; without
    /// one, the call waits for a full drain.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), SubmitError> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.tx
            .send(QueueMessage::Shutdown {
                timeout,
                ack: ack_tx,
            })
            .await
            .map_err(|_| SubmitError)?;

        ack_rx.await.map_err(|_| SubmitError)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Instant;

    use futures::future::{Either, select};

    use super::*;
    use crate::error::QueueError;

    /// Sleeps for the configured duration, then returns its tag.
    struct Sleepy {
        millis: u64,
        tag: usize,
    }

    impl Task for Sleepy {
        type Output = usize;

        fn execute(&mut self) -> usize {
            std::thread::sleep(Duration::from_millis(self.millis));
            self.tag
        }
    }

    struct Panicky;

    impl Task for Panicky {
        type Output = ();

        fn execute(&mut self) {
            panic!("boom");
        }
    }

    /// Blocks its worker until released, and reports when execution has started.
    ///
    /// The started signal goes over a tokio channel so the test can await it without
    /// blocking the runtime; the worker side blocks on a std channel.
    struct Gate {
        started: mpsc::UnboundedSender<()>,
        release: std_mpsc::Receiver<()>,
    }

    impl Gate {
        fn new(started: &mpsc::UnboundedSender<()>) -> (Self, std_mpsc::Sender<()>) {
            let (release_tx, release_rx) = std_mpsc::channel();
            let gate = Self {
                started: started.clone(),
                release: release_rx,
            };
            (gate, release_tx)
        }
    }

    impl Task for Gate {
        type Output = ();

        fn execute(&mut self) {
            let _ = self.started.send(());
            let _ = self.release.recv();
        }
    }

    #[tokio::test]
    async fn test_delivers_result_with_matching_id() {
        let queue = start_queue(1).unwrap();

        let handle = queue.submit(Sleepy { millis: 0, tag: 7 }).await.unwrap();
        let submitted_id = handle.id();

        let completed = handle.await.unwrap();
        assert_eq!(completed.id, submitted_id);
        assert_eq!(completed.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_pool_of_four_drains_ten_tasks_in_rounds() {
        let queue = start_queue(4).unwrap();
        let start = Instant::now();

        let mut handles = Vec::new();
        for tag in 0..10 {
            handles.push(queue.submit(Sleepy { millis: 10, tag }).await.unwrap());
        }

        for (tag, handle) in handles.into_iter().enumerate() {
            let submitted_id = handle.id();
            let completed = handle.await.unwrap();
            assert_eq!(completed.id, submitted_id);
            assert_eq!(completed.result.unwrap(), tag);
        }

        // Ten 10ms tasks over four workers need three scheduling rounds, roughly 30ms; the
        // bound is generous to absorb scheduling noise.
        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(500),
            "Elapsed time was too high: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_completion_order_is_not_submission_order() {
        let queue = start_queue(2).unwrap();

        let slow = queue.submit(Sleepy { millis: 300, tag: 1 }).await.unwrap();
        let fast = queue.submit(Sleepy { millis: 10, tag: 2 }).await.unwrap();

        // The fast task was submitted second but finishes first.
        match select(slow, fast).await {
            Either::Right((completed, slow)) => {
                assert_eq!(completed.unwrap().result.unwrap(), 2);
                assert_eq!(slow.await.unwrap().result.unwrap(), 1);
            }
            Either::Left(_) => panic!("slow task completed before the fast one"),
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let queue = start_queue(1).unwrap();

        let completed = queue.submit(Panicky).await.unwrap().await.unwrap();
        match completed.result {
            Err(TaskError::Panicked { message }) => assert!(message.contains("boom")),
            other => panic!("expected a panicked result, got {other:?}"),
        }

        // The worker pool keeps serving tasks after a panic. A queue is fixed to one task
        // type, so the follow-up check runs on its own queue.
        let queue = start_queue(1).unwrap();
        let completed = queue
            .submit(Sleepy { millis: 0, tag: 3 })
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(completed.result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_full_backlog_rejects_submissions() {
        let queue: QueueHandle<Gate> = TaskQueue::start(QueueConfig {
            worker_count: 1,
            backlog_limit: 0,
            ..QueueConfig::default()
        })
        .unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        // The first gate occupies the lone worker, the second fills the admission channel.
        let (gate, release_first) = Gate::new(&started_tx);
        let first = queue.submit(gate).await.unwrap();
        started_rx.recv().await.unwrap();

        let (gate, release_second) = Gate::new(&started_tx);
        let second = queue.submit(gate).await.unwrap();

        // With a backlog limit of zero the next submission has nowhere to go.
        let (gate, _release_third) = Gate::new(&started_tx);
        let rejected = queue.submit(gate).await.unwrap();
        assert_eq!(rejected.await.unwrap_err(), QueueError::QueueFull);

        release_first.send(()).unwrap();
        release_second.send(()).unwrap();
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_tasks() {
        let queue = start_queue(2).unwrap();

        let mut handles = Vec::new();
        for tag in 0..4 {
            handles.push(queue.submit(Sleepy { millis: 20, tag }).await.unwrap());
        }

        queue.shutdown(None).await.unwrap();

        // Everything admitted before the shutdown was still delivered.
        for (tag, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().result.unwrap(), tag);
        }

        // The dispatcher is gone, so new submissions fail outright.
        assert!(queue.submit(Sleepy { millis: 0, tag: 0 }).await.is_err());
    }

    #[tokio::test]
    async fn test_submissions_during_drain_are_rejected() {
        let queue: QueueHandle<Gate> = TaskQueue::start(QueueConfig {
            worker_count: 1,
            backlog_limit: 16,
            ..QueueConfig::default()
        })
        .unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (gate, release) = Gate::new(&started_tx);
        let in_flight = queue.submit(gate).await.unwrap();
        started_rx.recv().await.unwrap();

        let shutdown = tokio::spawn({
            let queue = queue.clone();
            async move { queue.shutdown(Some(Duration::from_secs(5))).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (gate, _release_late) = Gate::new(&started_tx);
        let late = queue.submit(gate).await.unwrap();
        assert_eq!(late.await.unwrap_err(), QueueError::ShuttingDown);

        release.send(()).unwrap();
        assert!(in_flight.await.is_ok());
        shutdown.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_deadline_fails_pending_tasks() {
        let queue: QueueHandle<Gate> = TaskQueue::start(QueueConfig {
            worker_count: 1,
            backlog_limit: 16,
            ..QueueConfig::default()
        })
        .unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (gate, release) = Gate::new(&started_tx);
        let stuck = queue.submit(gate).await.unwrap();
        started_rx.recv().await.unwrap();

        let (gate, _release_queued) = Gate::new(&started_tx);
        let queued = queue.submit(gate).await.unwrap();

        queue.shutdown(Some(Duration::from_millis(50))).await.unwrap();

        assert_eq!(stuck.await.unwrap_err(), QueueError::ShuttingDown);
        assert_eq!(queued.await.unwrap_err(), QueueError::ShuttingDown);

        let _ = release.send(());
    }

    #[tokio::test]
    async fn test_queue_config_deserializes_with_defaults() {
        let config: QueueConfig = serde_json::from_str("{\"worker_count\": 8}").unwrap();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.backlog_limit, QueueConfig::default().backlog_limit);
        assert_eq!(config.thread_name, "taskq-worker");

        let config: QueueConfig =
            serde_json::from_str("{\"thread_name\": \"billing-worker\"}").unwrap();
        assert_eq!(config.thread_name, "billing-worker");
        assert_eq!(config.worker_count, QueueConfig::default().worker_count);
    }

    /// Returns the name of the thread it executes on.
    struct WhoAmI;

    impl Task for WhoAmI {
        type Output = Option<String>;

        fn execute(&mut self) -> Option<String> {
            std::thread::current().name().map(ToOwned::to_owned)
        }
    }

    #[tokio::test]
    async fn test_configured_thread_name_is_applied() {
        let queue = TaskQueue::start(QueueConfig {
            worker_count: 1,
            thread_name: "billing-worker".to_owned(),
            ..QueueConfig::default()
        })
        .unwrap();

        let completed = queue.submit(WhoAmI).await.unwrap().await.unwrap();
        assert_eq!(completed.result.unwrap().as_deref(), Some("billing-worker-0"));
    }
}
