use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use super::Shared;
use super::event::ChangeEvent;
use crate::error::MonitorError;

type Handler = Box<dyn FnOnce(Result<ChangeEvent, MonitorError>) + Send + 'static>;

/// Where the result of a request goes.
pub(crate) enum Responder {
    /// Invoked with whatever the request produced.
    Handler(Handler),
    /// Feeds a `next_event` future, which may be dropped before it is answered.
    Channel(oneshot::Sender<Result<ChangeEvent, MonitorError>>),
}

impl Responder {
    pub(crate) fn handler<F>(handler: F) -> Self
    where
        F: FnOnce(Result<ChangeEvent, MonitorError>) + Send + 'static,
    {
        Self::Handler(Box::new(handler))
    }

    /// The receiving side is gone; nothing would see a result.
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Handler(_) => false,
            Self::Channel(tx) => tx.is_closed(),
        }
    }

    /// Hands the result back if the receiver was dropped meanwhile.
    fn respond(
        self,
        result: Result<ChangeEvent, MonitorError>,
    ) -> Result<(), Result<ChangeEvent, MonitorError>> {
        match self {
            Self::Handler(handler) => {
                handler(result);
                Ok(())
            }
            Self::Channel(tx) => tx.send(result),
        }
    }
}

/// One pending asynchronous monitor call.
///
/// Holds only a weak reference to the monitor state: if the monitor is gone by
/// the time the request runs, the responder gets [`MonitorError::Cancelled`].
pub(crate) struct MonitorRequest {
    state: Weak<Shared>,
    respond: Responder,
}

impl MonitorRequest {
    pub(crate) fn new(state: Weak<Shared>, respond: Responder) -> Self {
        Self { state, respond }
    }

    fn run(self) {
        if self.respond.is_abandoned() {
            trace!("skipping abandoned request");
            return;
        }
        let Some(shared) = self.state.upgrade() else {
            let _ = self.respond.respond(Err(MonitorError::Cancelled));
            return;
        };
        let result = shared.queue.pop();
        // The future was dropped while waiting: the event belongs to the next consumer.
        if let Err(Ok(event)) = self.respond.respond(result) {
            trace!(path = %event.path.display(), "requeueing undelivered event");
            shared.queue.push_front(event);
        }
    }

    pub(crate) fn cancel(self) {
        let _ = self.respond.respond(Err(MonitorError::Cancelled));
    }
}

/// Single background thread that runs monitor requests one after another.
pub(crate) struct WorkerExecutor {
    sender: mpsc::Sender<MonitorRequest>,
    handle: JoinHandle<()>,
}

impl WorkerExecutor {
    pub(crate) fn spawn() -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<MonitorRequest>();
        let handle = thread::Builder::new()
            .name("path-monitor-worker".into())
            .spawn(move || {
                debug!("worker thread started");
                while let Ok(request) = receiver.recv() {
                    // A panicking handler must not take later requests down with it.
                    if panic::catch_unwind(AssertUnwindSafe(|| request.run())).is_err() {
                        error!("monitor handler panicked");
                    }
                }
                debug!("worker thread stopped");
            })?;
        Ok(Self { sender, handle })
    }

    /// Queue a request. Hands it back if the worker is no longer running.
    pub(crate) fn execute(&self, request: MonitorRequest) -> Result<(), MonitorRequest> {
        self.sender.send(request).map_err(|err| err.0)
    }

    /// Stop accepting requests and wait until the queued ones have run.
    /// Called from a handler on the worker itself, only detaches.
    pub(crate) fn join(self) {
        drop(self.sender);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;
    use crate::monitor::event::EventKind;
    use crate::monitor::inotify::Inotify;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(Arc::new(Inotify::init().unwrap())))
    }

    fn request(
        state: Weak<Shared>,
        tx: std_mpsc::Sender<Result<ChangeEvent, MonitorError>>,
    ) -> MonitorRequest {
        MonitorRequest::new(
            state,
            Responder::handler(move |result| {
                let _ = tx.send(result);
            }),
        )
    }

    #[test]
    fn test_requests_receive_events_in_order() {
        let shared = shared();
        let worker = WorkerExecutor::spawn().unwrap();
        let (tx, rx) = std_mpsc::channel();

        for _ in 0..3 {
            assert!(worker.execute(request(Arc::downgrade(&shared), tx.clone())).is_ok());
        }
        for name in ["a", "b", "c"] {
            shared.queue.push(ChangeEvent::new("/w", name, EventKind::Added));
        }

        let names: Vec<String> = (0..3)
            .map(|_| rx.recv().unwrap().unwrap().path.display().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        worker.join();
    }

    #[test]
    fn test_dropped_state_yields_cancellation() {
        let state = Arc::downgrade(&shared());
        let worker = WorkerExecutor::spawn().unwrap();
        let (tx, rx) = std_mpsc::channel();
        assert!(worker.execute(request(state, tx)).is_ok());
        assert!(rx.recv().unwrap().unwrap_err().is_cancelled());
        worker.join();
    }

    #[test]
    fn test_join_drains_queued_requests() {
        let shared = shared();
        let worker = WorkerExecutor::spawn().unwrap();
        let (tx, rx) = std_mpsc::channel();
        for _ in 0..3 {
            assert!(worker.execute(request(Arc::downgrade(&shared), tx.clone())).is_ok());
        }
        drop(tx);
        shared.queue.close();
        worker.join();

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results.len(), 3, "every request answers exactly once");
        assert!(results.iter().all(|r| matches!(r, Err(MonitorError::Cancelled))));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_worker() {
        let shared = shared();
        shared.queue.close();
        let worker = WorkerExecutor::spawn().unwrap();
        let boom = MonitorRequest::new(
            Arc::downgrade(&shared),
            Responder::handler(|_| panic!("boom")),
        );
        assert!(worker.execute(boom).is_ok());

        let (tx, rx) = std_mpsc::channel();
        assert!(worker.execute(request(Arc::downgrade(&shared), tx)).is_ok());
        assert!(rx.recv().unwrap().unwrap_err().is_cancelled());
        worker.join();
    }

    #[test]
    fn test_abandoned_request_leaves_event_queued() {
        let shared = shared();
        let worker = WorkerExecutor::spawn().unwrap();
        let event = ChangeEvent::new("/w", "kept", EventKind::Added);
        shared.queue.push(event.clone());

        let (tx, rx) = oneshot::channel();
        drop(rx);
        let abandoned = MonitorRequest::new(Arc::downgrade(&shared), Responder::Channel(tx));
        assert!(worker.execute(abandoned).is_ok());
        shared.queue.close();
        worker.join();

        assert_eq!(shared.queue.pop().unwrap(), event);
        assert!(shared.queue.pop().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_event_for_dropped_receiver_is_requeued() {
        let shared = shared();
        let worker = WorkerExecutor::spawn().unwrap();
        let (tx, rx) = oneshot::channel();
        let pending = MonitorRequest::new(Arc::downgrade(&shared), Responder::Channel(tx));
        assert!(worker.execute(pending).is_ok());
        // Let the worker block in pop before the receiver goes away.
        thread::sleep(Duration::from_millis(50));
        drop(rx);

        let event = ChangeEvent::new("/w", "a", EventKind::Added);
        shared.queue.push(event.clone());
        shared.queue.push(ChangeEvent::new("/w", "b", EventKind::Added));

        let (next_tx, next_rx) = std_mpsc::channel();
        assert!(worker.execute(request(Arc::downgrade(&shared), next_tx)).is_ok());
        assert_eq!(next_rx.recv().unwrap().unwrap(), event);
        worker.join();
    }
}
