//! Where callbacks run.
//!
//! Every observer is bound to an [`ExecutionContext`] when it subscribes, and
//! every delivery to it goes through that context. The crate never owns a
//! scheduler of its own: [`Immediate`] runs on the notifying thread,
//! [`MainContext`] hops onto a thread the host pumps through a [`MainLoop`],
//! and [`QueueContext`] hands work to a named worker pool.

use std::{
    fmt::{self, Debug, Formatter},
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, ThreadId},
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error};

/// A unit of scheduled work.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Type-erased context, as stored alongside each observer.
pub type SharedContext = Arc<dyn ExecutionContext>;

/// Something that can run a callback, now or later.
///
/// Scheduling can't fail from the caller's point of view: a context that has
/// lost the means to run `work` drops it and logs the fact.
pub trait ExecutionContext: Send + Sync {
    fn execute(&self, work: Work);
}

impl<C: ExecutionContext + ?Sized> ExecutionContext for Arc<C> {
    fn execute(&self, work: Work) {
        (**self).execute(work)
    }
}

/// Erases `context` for storage next to an observer.
pub fn shared(context: impl ExecutionContext + 'static) -> SharedContext {
    Arc::new(context)
}

pub(crate) fn immediate() -> SharedContext {
    Arc::new(Immediate)
}

/// Runs work synchronously on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl ExecutionContext for Immediate {
    fn execute(&self, work: Work) {
        work()
    }
}

/// A work queue bound to the thread that created it.
///
/// The host keeps the loop on its designated thread and pumps it with
/// [`run_pending`](MainLoop::run_pending) or [`turn`](MainLoop::turn); the
/// [`MainContext`]s it hands out can be used from anywhere.
pub struct MainLoop {
    thread: ThreadId,
    sender: Sender<Work>,
    receiver: Receiver<Work>,
}

impl Debug for MainLoop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("thread", &self.thread)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    /// Designates the calling thread as the main thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            thread: thread::current().id(),
            sender,
            receiver,
        }
    }

    pub fn context(&self) -> MainContext {
        MainContext {
            thread: self.thread,
            sender: self.sender.clone(),
        }
    }

    /// Runs everything queued so far without blocking. Returns how many
    /// items ran.
    pub fn run_pending(&self) -> usize {
        debug_assert_eq!(thread::current().id(), self.thread, "MainLoop pumped off its thread");
        let mut ran = 0;
        while let Ok(work) = self.receiver.try_recv() {
            work();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for one item and runs it.
    pub fn turn(&self, timeout: Duration) -> bool {
        debug_assert_eq!(thread::current().id(), self.thread, "MainLoop pumped off its thread");
        match self.receiver.recv_timeout(timeout) {
            Ok(work) => {
                work();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Runs work inline when already on the main thread, otherwise enqueues it
/// on the [`MainLoop`].
///
/// Enqueueing never waits, so scheduling from the main thread onto itself
/// can't deadlock.
#[derive(Clone)]
pub struct MainContext {
    thread: ThreadId,
    sender: Sender<Work>,
}

impl Debug for MainContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainContext").field("thread", &self.thread).finish()
    }
}

impl MainContext {
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }
}

impl ExecutionContext for MainContext {
    fn execute(&self, work: Work) {
        if self.is_current() {
            work()
        } else if self.sender.send(work).is_err() {
            error!("main loop is gone, dropping scheduled work");
        }
    }
}

/// Configures a [`QueueContext`].
#[derive(Debug, Clone)]
pub struct QueueBuilder {
    name: String,
    workers: usize,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            name: "promise-kit-queue".into(),
            workers: 1,
        }
    }
}

impl QueueBuilder {
    /// Prefix for the worker thread names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of worker threads. `1` (the default) makes a serial queue.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn build(self) -> io::Result<QueueContext> {
        let (sender, receiver) = unbounded::<Work>();
        for index in 0..self.workers {
            let receiver = receiver.clone();
            let name = format!("{}-{index}", self.name);
            thread::Builder::new().name(name.clone()).spawn(move || {
                debug!(worker = %name, "queue worker started");
                for work in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                        error!(worker = %name, "queued work panicked");
                    }
                }
                debug!(worker = %name, "queue worker stopped");
            })?;
        }
        Ok(QueueContext {
            name: self.name.into(),
            workers: self.workers,
            sender,
        })
    }
}

/// Always enqueues work on a pool of named worker threads.
///
/// Workers shut down once every clone of the context has been dropped and
/// the queue has drained.
#[derive(Clone)]
pub struct QueueContext {
    name: Arc<str>,
    workers: usize,
    sender: Sender<Work>,
}

impl Debug for QueueContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueContext")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .finish()
    }
}

impl QueueContext {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::default()
    }

    /// A single-worker queue: work runs one item at a time, in order.
    pub fn serial(name: impl Into<String>) -> io::Result<Self> {
        Self::builder().name(name).build()
    }

    pub fn concurrent(name: impl Into<String>, workers: usize) -> io::Result<Self> {
        Self::builder().name(name).workers(workers).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl ExecutionContext for QueueContext {
    fn execute(&self, work: Work) {
        if self.sender.send(work).is_err() {
            error!(queue = %self.name, "queue has no workers left, dropping scheduled work");
        }
    }
}
