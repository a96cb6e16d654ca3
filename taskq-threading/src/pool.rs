use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::PanicHandler;
use crate::builder::WorkerPoolBuilder;

/// A fixed pool of dedicated threads for executing items in parallel.
///
/// [`WorkerPool`] spawns its threads once, at construction, and never resizes. Items are
/// admitted through a channel bounded to the number of threads, which acts as a small
/// in-flight buffer between the dispatching side and the workers. Admission never blocks:
/// when the channel is full, [`WorkerPool::try_dispatch`] hands the item back so the caller
/// can apply its own queueing or rejection policy.
pub struct WorkerPool<I> {
    tx: flume::Sender<I>,
}

impl<I> WorkerPool<I>
where
    I: Send + 'static,
{
    /// Constructs a new [`WorkerPool`] using the configuration specified by
    /// [`WorkerPoolBuilder`].
    ///
    /// Every worker shares the same admission channel and the same `on_item` callback, so
    /// items are load-balanced across whichever workers are idle.
    pub fn new<S, F>(mut builder: WorkerPoolBuilder<S>, on_item: F) -> io::Result<Self>
    where
        S: ThreadSpawn<I>,
        F: Fn(I) + Send + Sync + 'static,
    {
        let (tx, rx) = flume::bounded(builder.num_threads.max(1));
        let on_item: Arc<dyn Fn(I) + Send + Sync> = Arc::new(on_item);

        for index in 0..builder.num_threads.max(1) {
            let worker = Worker {
                index,
                name: builder.thread_name.as_mut().map(|f| f(index)),
                rx: rx.clone(),
                on_item: Arc::clone(&on_item),
                item_panic_handler: builder.item_panic_handler.clone(),
                thread_panic_handler: builder.thread_panic_handler.clone(),
            };

            builder.spawn_handler.spawn(worker)?;
        }

        Ok(Self { tx })
    }

    /// Dispatches an item to the pool without blocking.
    ///
    /// When the admission channel is at capacity the item is returned in
    /// [`DispatchError::Full`], leaving the queueing decision to the caller.
    pub fn try_dispatch(&self, item: I) -> Result<(), DispatchError<I>> {
        self.tx.try_send(item).map_err(|error| match error {
            flume::TrySendError::Full(item) => DispatchError::Full(item),
            flume::TrySendError::Disconnected(item) => DispatchError::Closed(item),
        })
    }

    /// Dispatches an item to the pool, blocking until the admission channel has capacity.
    pub fn dispatch(&self, item: I) -> Result<(), DispatchError<I>> {
        self.tx
            .send(item)
            .map_err(|flume::SendError(item)| DispatchError::Closed(item))
    }
}

impl<I> fmt::Debug for WorkerPool<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

/// An error returned when an item could not be placed on the pool's admission channel.
///
/// The rejected item is handed back in both variants.
pub enum DispatchError<I> {
    /// The admission channel is at capacity.
    Full(I),
    /// All workers have exited and the channel is closed.
    Closed(I),
}

impl<I> DispatchError<I> {
    /// Returns the item that could not be dispatched.
    pub fn into_inner(self) -> I {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

impl<I> fmt::Debug for DispatchError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<I> fmt::Display for DispatchError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("the worker pool admission channel is full"),
            Self::Closed(_) => f.write_str("the worker pool has shut down"),
        }
    }
}

impl<I> std::error::Error for DispatchError<I> {}

/// Represents a dedicated worker thread within a [`WorkerPool`].
pub struct Worker<I> {
    index: usize,
    name: Option<String>,
    rx: flume::Receiver<I>,
    on_item: Arc<dyn Fn(I) + Send + Sync>,
    item_panic_handler: Option<Arc<PanicHandler>>,
    thread_panic_handler: Option<Arc<PanicHandler>>,
}

impl<I> Worker<I> {
    /// Returns the identifier assigned to this worker.
    ///
    /// The identifier is useful for debugging or tracing item execution across workers.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the name of this worker, if one was provided.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Runs this worker's item loop until the admission channel is closed and drained.
    ///
    /// If a panic escapes the loop, the `thread_panic_handler` is invoked; without one the
    /// panic is propagated.
    pub fn run(self) {
        let Self {
            index,
            name: _,
            rx,
            on_item,
            item_panic_handler,
            thread_panic_handler,
        } = self;

        tracing::debug!(worker = index, "worker thread started");

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            while let Ok(item) = rx.recv() {
                let execution = std::panic::catch_unwind(AssertUnwindSafe(|| on_item(item)));
                if let Err(error) = execution {
                    match &item_panic_handler {
                        Some(handler) => handler(error),
                        None => std::panic::resume_unwind(error),
                    }
                }
            }
        }));

        match (thread_panic_handler, result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => {
                panic_handler(error);
            }
            // No panic handler and error, we propagate the panic.
            (None, Err(error)) => {
                std::panic::resume_unwind(error);
            }
            // Otherwise, we do nothing.
            (_, Ok(())) => {
                tracing::debug!(worker = index, "worker thread exiting");
            }
        }
    }
}

/// A trait for customizing the spawning of threads in a [`WorkerPool`].
///
/// Implement [`ThreadSpawn`] to modify thread settings such as the thread name or stack
/// size prior to creation, allowing the thread to be tailored for the requirements of your
/// application.
pub trait ThreadSpawn<I> {
    /// Spawns a new thread running the provided worker.
    fn spawn(&mut self, worker: Worker<I>) -> io::Result<()>;
}

/// A default implementation of [`ThreadSpawn`] that uses system defaults.
///
/// [`DefaultSpawn`] applies the worker's name, if any, and otherwise relies on the standard
/// behavior of the operating system.
#[derive(Clone)]
pub struct DefaultSpawn;

impl<I> ThreadSpawn<I> for DefaultSpawn
where
    I: Send + 'static,
{
    fn spawn(&mut self, worker: Worker<I>) -> io::Result<()> {
        let mut b = std::thread::Builder::new();
        if let Some(name) = worker.name() {
            b = b.name(name.to_owned());
        }
        b.spawn(|| worker.run())?;

        Ok(())
    }
}

/// A flexible [`ThreadSpawn`] implementation that uses a closure for dynamic thread
/// configuration.
///
/// Use [`CustomSpawn`] to provide custom settings for thread creation via a user-supplied
/// closure.
#[derive(Clone)]
pub struct CustomSpawn<B>(B);

impl<B> CustomSpawn<B> {
    /// Creates a new instance of [`CustomSpawn`] with the provided configuration closure.
    pub fn new(spawn_handler: B) -> Self {
        CustomSpawn(spawn_handler)
    }
}

impl<I, B> ThreadSpawn<I> for CustomSpawn<B>
where
    B: FnMut(Worker<I>) -> io::Result<()>,
{
    /// Applies the custom configuration closure when spawning a new thread.
    fn spawn(&mut self, worker: Worker<I>) -> io::Result<()> {
        self.0(worker)
    }
}
