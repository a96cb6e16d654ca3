use std::any::Any;
use std::io;
use std::sync::Arc;

use crate::PanicHandler;
use crate::pool::{CustomSpawn, DefaultSpawn, ThreadSpawn, Worker, WorkerPool};

/// [`WorkerPoolBuilder`] provides a flexible way to configure and build a [`WorkerPool`] that
/// executes items on a fixed set of dedicated threads.
///
/// This builder enables you to customize the number of threads, thread naming, and panic
/// handling strategies.
pub struct WorkerPoolBuilder<S = DefaultSpawn> {
    pub(crate) thread_name: Option<Box<dyn FnMut(usize) -> String>>,
    pub(crate) thread_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) item_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) spawn_handler: S,
    pub(crate) num_threads: usize,
}

impl WorkerPoolBuilder<DefaultSpawn> {
    /// Initializes a new [`WorkerPoolBuilder`] with default settings.
    pub fn new() -> WorkerPoolBuilder<DefaultSpawn> {
        WorkerPoolBuilder {
            thread_name: None,
            thread_panic_handler: None,
            item_panic_handler: None,
            spawn_handler: DefaultSpawn,
            num_threads: 1,
        }
    }
}

impl Default for WorkerPoolBuilder<DefaultSpawn> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WorkerPoolBuilder<S> {
    /// Specifies a custom naming convention for threads in the [`WorkerPool`].
    ///
    /// The provided closure receives the worker's index and returns a name,
    /// which can be useful for debugging and logging.
    pub fn thread_name<F>(mut self, thread_name: F) -> Self
    where
        F: FnMut(usize) -> String + 'static,
    {
        self.thread_name = Some(Box::new(thread_name));
        self
    }

    /// Sets a custom panic handler for threads in the [`WorkerPool`].
    ///
    /// The handler is invoked when a panic escapes a worker's item loop. Without a handler,
    /// such a panic is propagated and terminates the thread's unwinding normally.
    pub fn thread_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.thread_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Sets a custom panic handler for individual items executed by the [`WorkerPool`].
    ///
    /// With a handler installed, a panicking item is contained to that single item and the
    /// worker continues with the next one. Without one, the panic propagates to the thread
    /// level.
    pub fn item_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.item_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Configures a custom thread spawning procedure for the [`WorkerPool`].
    ///
    /// This method allows you to adjust thread settings (e.g. naming, stack size) before thread
    /// creation, making it possible to apply application-specific configurations.
    pub fn spawn_handler<I, F>(self, spawn_handler: F) -> WorkerPoolBuilder<CustomSpawn<F>>
    where
        F: FnMut(Worker<I>) -> io::Result<()>,
    {
        WorkerPoolBuilder {
            thread_name: self.thread_name,
            thread_panic_handler: self.thread_panic_handler,
            item_panic_handler: self.item_panic_handler,
            spawn_handler: CustomSpawn::new(spawn_handler),
            num_threads: self.num_threads,
        }
    }

    /// Sets the number of worker threads for the [`WorkerPool`].
    ///
    /// This also determines the capacity of the pool's admission channel, which acts as a
    /// limited in-flight buffer in front of the workers.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Constructs a [`WorkerPool`] based on the configured settings.
    ///
    /// Finalizing the builder spawns the dedicated worker threads, each of which runs
    /// `on_item` for every item it receives from the admission channel.
    pub fn build<I, F>(self, on_item: F) -> io::Result<WorkerPool<I>>
    where
        I: Send + 'static,
        S: ThreadSpawn<I>,
        F: Fn(I) + Send + Sync + 'static,
    {
        WorkerPool::new(self, on_item)
    }
}
