pub mod event;

mod capture;
mod inotify;
mod queue;
mod watch_table;
mod worker;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use capture::CaptureThread;
use event::ChangeEvent;
use inotify::Inotify;
use queue::EventQueue;
use watch_table::WatchTable;
use worker::{MonitorRequest, Responder, WorkerExecutor};

pub(crate) use capture::MIN_READ_BUFFER;

/// State shared by the facade, the capture thread and pending requests.
pub(crate) struct Shared {
    pub(crate) watches: WatchTable,
    pub(crate) queue: EventQueue,
    pub(crate) overflows: AtomicU64,
}

impl Shared {
    pub(crate) fn new(inotify: Arc<Inotify>) -> Self {
        Self {
            watches: WatchTable::new(inotify),
            queue: EventQueue::new(),
            overflows: AtomicU64::new(0),
        }
    }
}

/// A handler paired with its result. Runs the handler when dropped if it has
/// not run yet, so a task discarded by a stopped runtime still answers.
struct Delivery<F: FnOnce(Result<ChangeEvent>)>(Option<(F, Result<ChangeEvent>)>);

impl<F: FnOnce(Result<ChangeEvent>)> Delivery<F> {
    fn run(mut self) {
        if let Some((handler, result)) = self.0.take() {
            handler(result);
        }
    }
}

impl<F: FnOnce(Result<ChangeEvent>)> Drop for Delivery<F> {
    fn drop(&mut self) {
        if let Some((handler, result)) = self.0.take() {
            handler(result);
        }
    }
}

/// Threads that live until shutdown.
struct Running {
    capture: CaptureThread,
    worker: WorkerExecutor,
}

/// Watches directories for changes and hands out [`ChangeEvent`]s.
///
/// Events can be pulled with the blocking [`monitor`](Self::monitor) or
/// requested asynchronously with [`async_monitor`](Self::async_monitor) /
/// [`next_event`](Self::next_event). Both draw from the same FIFO, in the order
/// the kernel reported the changes.
///
/// Dropping the monitor shuts it down.
pub struct PathMonitor {
    identifier: String,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl PathMonitor {
    /// Start a monitor with the default configuration.
    pub fn new(identifier: impl Into<String>) -> Result<Self> {
        Self::with_config(identifier, &MonitorConfig::default())
    }

    /// Start a monitor: open the inotify channel and spawn the capture and
    /// worker threads. Fails without leaving any thread behind.
    pub fn with_config(identifier: impl Into<String>, config: &MonitorConfig) -> Result<Self> {
        let identifier = identifier.into();
        let inotify = Inotify::init().map_err(|e| MonitorError::native("inotify_init1 failed", e))?;
        let inotify = Arc::new(inotify);
        let shared = Arc::new(Shared::new(Arc::clone(&inotify)));

        let capture = CaptureThread::spawn(
            Arc::clone(&shared),
            inotify,
            config.effective_read_buffer_size(),
        )
        .map_err(|e| MonitorError::native("failed to start capture thread", e))?;
        // `capture` stops itself on drop if the worker cannot start.
        let worker = WorkerExecutor::spawn()
            .map_err(|e| MonitorError::native("failed to start worker thread", e))?;

        debug!(%identifier, "path monitor started");
        Ok(Self {
            identifier,
            shared,
            running: Mutex::new(Some(Running { capture, worker })),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Start reporting changes to entries directly inside `path`.
    pub fn add_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.watches.add(path.as_ref()).map(|_| ())
    }

    /// Stop reporting changes for `path`. Unknown paths are a no-op.
    pub fn remove_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.shared.watches.remove(path.as_ref())
    }

    /// Currently registered paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.shared.watches.paths()
    }

    /// Block until the next event.
    ///
    /// Returns [`MonitorError::Cancelled`] once the monitor is shut down and
    /// every event captured before that has been handed out.
    pub fn monitor(&self) -> Result<ChangeEvent> {
        self.shared.queue.pop()
    }

    /// Non-blocking [`monitor`](Self::monitor): `None` if no event is queued yet.
    pub fn try_monitor(&self) -> Option<Result<ChangeEvent>> {
        self.shared.queue.try_pop()
    }

    /// Request the next event without blocking the caller.
    ///
    /// The request runs on the monitor's worker thread. `handler` is invoked
    /// exactly once: on the tokio runtime current at call time if there is one
    /// (spawned as a task, so a current-thread runtime runs it on the caller's
    /// thread), otherwise directly on the worker thread. Requests are served in
    /// the order they were made. A shutdown while the request is pending
    /// completes it with [`MonitorError::Cancelled`]. If that runtime has shut
    /// down by the time the result is ready, the handler runs on whichever
    /// thread drops the rejected task, usually the worker.
    pub fn async_monitor<F>(&self, handler: F)
    where
        F: FnOnce(Result<ChangeEvent>) + Send + 'static,
    {
        let context = Handle::try_current().ok();
        self.submit(Responder::handler(move |result| {
            let delivery = Delivery(Some((handler, result)));
            match context {
                Some(handle) => {
                    handle.spawn(async move { delivery.run() });
                }
                None => delivery.run(),
            }
        }));
    }

    /// Future form of [`async_monitor`](Self::async_monitor).
    ///
    /// Dropping the future before it resolves loses nothing: an event taken
    /// for it is returned to the head of the queue.
    pub async fn next_event(&self) -> Result<ChangeEvent> {
        let (tx, rx) = oneshot::channel();
        self.submit(Responder::Channel(tx));
        rx.await.unwrap_or(Err(MonitorError::Cancelled))
    }

    fn submit(&self, respond: Responder) {
        let request = MonitorRequest::new(Arc::downgrade(&self.shared), respond);
        let rejected = match self.running.lock().as_ref() {
            Some(running) => running.worker.execute(request).err(),
            None => Some(request),
        };
        if let Some(request) = rejected {
            request.cancel();
        }
    }

    /// Number of kernel queue overflows seen so far. Each one means an unknown
    /// number of events were lost.
    pub fn overflow_count(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.running.lock().is_none()
    }

    /// Stop capturing and cancel every waiter. Blocks until the capture and
    /// worker threads have exited. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(Running {
            mut capture,
            worker,
        }) = self.running.lock().take()
        else {
            return;
        };

        capture.stop();
        // Drops the last inotify handle, which also invalidates every watch.
        self.shared.watches.close();
        self.shared.queue.close();
        worker.join();
        debug!(identifier = %self.identifier, "path monitor shut down");
    }
}

impl Drop for PathMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PathMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMonitor")
            .field("identifier", &self.identifier)
            .field("watched_paths", &self.watched_paths())
            .field("pending_events", &self.shared.queue.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
