//! The single coordinating loop at the center of the queue.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use taskq_threading::{DispatchError, WorkerPool};

use crate::error::QueueError;
use crate::queue::QueueMessage;
use crate::task::{CompletedTask, PendingTask, ReplySender, Task, TaskId, TaskItem};

/// The central coordinator of a task queue.
///
/// The dispatcher is the sole owner of the routing table, the backlog, and the worker-facing
/// admission and results channels. All of that state is mutated exclusively from within
/// [`run`](Self::run), so none of it needs a lock: single-writer discipline is enforced by
/// construction.
pub(crate) struct Dispatcher<T: Task> {
    /// Producer-facing ingress. Bounded to one message, so a submission suspends its
    /// producer until this loop is ready to receive it.
    ingress: mpsc::Receiver<QueueMessage<T>>,
    /// Completed items coming back from the worker pool.
    results: flume::Receiver<CompletedTask<T>>,
    /// The admission side of the worker pool.
    pool: WorkerPool<PendingTask<T>>,
    /// Maps every registered, unresolved task to its producer's response channel.
    routing: HashMap<TaskId, ReplySender<T>>,
    /// Registered tasks that did not fit the pool's admission channel yet.
    backlog: VecDeque<PendingTask<T>>,
    backlog_limit: usize,
    /// Set once a shutdown request has been received; new submissions are rejected.
    draining: bool,
    /// Hard deadline for draining, if the shutdown request carried a timeout.
    deadline: Option<Instant>,
    /// Acknowledgement channels of all received shutdown requests.
    shutdown_acks: Vec<oneshot::Sender<()>>,
}

impl<T: Task> Dispatcher<T> {
    pub fn new(
        ingress: mpsc::Receiver<QueueMessage<T>>,
        results: flume::Receiver<CompletedTask<T>>,
        pool: WorkerPool<PendingTask<T>>,
        backlog_limit: usize,
    ) -> Self {
        Self {
            ingress,
            results,
            pool,
            routing: HashMap::new(),
            backlog: VecDeque::new(),
            backlog_limit,
            draining: false,
            deadline: None,
            shutdown_acks: Vec::new(),
        }
    }

    /// Runs the dispatch loop until the queue has shut down.
    ///
    /// The loop waits on its event sources and never blocks in between: admission into the
    /// pool uses `try_dispatch`, with overflow going to the bounded backlog. It exits once
    /// draining has been requested (explicitly, or implicitly by all producer handles being
    /// dropped) and the routing table is empty.
    pub async fn run(mut self) {
        tracing::debug!(backlog_limit = self.backlog_limit, "dispatcher started");

        let mut ingress_open = true;

        loop {
            // A disabled select branch still evaluates its expression, so the sleep needs a
            // placeholder deadline when none is armed.
            let deadline = self.deadline;
            let sleep_until = deadline.unwrap_or_else(far_future);

            tokio::select! {
                biased;

                // Results are drained first so that a burst of submissions can never starve
                // deliveries, and every completion frees pool capacity for the backlog.
                Ok(completed) = self.results.recv_async() => {
                    self.deliver(completed);
                    self.pump();
                }

                message = self.ingress.recv(), if ingress_open => match message {
                    Some(QueueMessage::Submit(item)) => self.admit(item),
                    Some(QueueMessage::Shutdown { timeout, ack }) => self.begin_drain(timeout, ack),
                    None => {
                        // Every producer handle is gone; finish what is in flight and stop.
                        tracing::debug!("all queue handles dropped, draining");
                        ingress_open = false;
                    }
                },

                () = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    self.fail_pending();
                }
            }

            if (self.draining || !ingress_open) && self.routing.is_empty() {
                break;
            }
        }

        debug_assert!(self.backlog.is_empty());

        // Dropping the pool closes the admission channel; workers finish their current item,
        // drain what is already admitted, and exit.
        drop(self.pool);

        for ack in self.shutdown_acks.drain(..) {
            let _ = ack.send(());
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Registers a new item and hands it towards the worker pool.
    fn admit(&mut self, item: TaskItem<T>) {
        if self.draining {
            tracing::debug!(id = %item.id, "rejecting submission while draining");
            let _ = item.reply_tx.send(Err(QueueError::ShuttingDown));
            return;
        }

        let TaskItem { id, reply_tx, task } = item;
        let mut pending = PendingTask { id, task };

        // Only bypass the backlog when it is empty, to keep admission in submission order.
        if self.backlog.is_empty() {
            pending = match self.pool.try_dispatch(pending) {
                Ok(()) => {
                    self.routing.insert(id, reply_tx);
                    return;
                }
                Err(DispatchError::Full(pending)) => pending,
                Err(DispatchError::Closed(_)) => {
                    tracing::error!(%id, "worker pool is gone, rejecting submission");
                    let _ = reply_tx.send(Err(QueueError::ShuttingDown));
                    return;
                }
            };
        }

        if self.backlog.len() >= self.backlog_limit {
            tracing::warn!(
                %id,
                backlog_limit = self.backlog_limit,
                "backlog full, rejecting submission"
            );
            let _ = reply_tx.send(Err(QueueError::QueueFull));
            return;
        }

        self.routing.insert(id, reply_tx);
        self.backlog.push_back(pending);
    }

    /// Routes a completed item back to the producer that submitted it.
    fn deliver(&mut self, completed: CompletedTask<T>) {
        let id = completed.id;

        match self.routing.remove(&id) {
            Some(reply_tx) => {
                if reply_tx.send(Ok(completed)).is_err() {
                    tracing::debug!(%id, "producer dropped its response handle before delivery");
                }
            }
            // Ids are unique by construction, so this indicates internal state corruption.
            None => tracing::error!(%id, "completed task has no routing entry"),
        }
    }

    /// Moves backlogged items into the admission channel until it reports full.
    fn pump(&mut self) {
        while let Some(pending) = self.backlog.pop_front() {
            match self.pool.try_dispatch(pending) {
                Ok(()) => {}
                Err(DispatchError::Full(pending)) => {
                    self.backlog.push_front(pending);
                    break;
                }
                Err(DispatchError::Closed(pending)) => {
                    tracing::error!(id = %pending.id, "worker pool is gone, failing task");
                    if let Some(reply_tx) = self.routing.remove(&pending.id) {
                        let _ = reply_tx.send(Err(QueueError::ShuttingDown));
                    }
                }
            }
        }
    }

    /// Switches the dispatcher into draining mode.
    fn begin_drain(&mut self, timeout: Option<Duration>, ack: oneshot::Sender<()>) {
        self.shutdown_acks.push(ack);

        if !self.draining {
            self.draining = true;
            self.deadline = timeout.map(|timeout| Instant::now() + timeout);
            tracing::info!(
                in_flight = self.routing.len(),
                ?timeout,
                "shutdown requested, draining in-flight tasks"
            );
        }
    }

    /// Fails everything still unresolved once the drain deadline has passed.
    fn fail_pending(&mut self) {
        tracing::warn!(
            pending = self.routing.len(),
            "shutdown deadline reached, failing pending tasks"
        );

        self.backlog.clear();
        for (_, reply_tx) in self.routing.drain() {
            let _ = reply_tx.send(Err(QueueError::ShuttingDown));
        }
        self.deadline = None;
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}
