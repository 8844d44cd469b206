use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::event::ChangeEvent;
use crate::error::MonitorError;

/// Why the queue stopped accepting events.
#[derive(Debug, Clone)]
enum Closed {
    Shutdown,
    Failed(Arc<io::Error>),
}

impl Closed {
    fn to_error(&self) -> MonitorError {
        match self {
            Self::Shutdown => MonitorError::Cancelled,
            Self::Failed(err) => MonitorError::Capture(Arc::clone(err)),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    events: VecDeque<ChangeEvent>,
    closed: Option<Closed>,
}

/// FIFO handoff between the capture thread and every consumer.
///
/// Events queued before the queue is closed are still handed out; a pop on an
/// empty closed queue returns the close reason as an error.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    state: Mutex<State>,
    ready: Condvar,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append an event. Silently dropped once the queue is closed.
    pub(crate) fn push(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        state.events.push_back(event);
        drop(state);
        self.ready.notify_one();
    }

    /// Return an event nobody received to the head of the queue. Accepted even
    /// after close, since the event was already handed out once.
    pub(crate) fn push_front(&self, event: ChangeEvent) {
        self.state.lock().events.push_front(event);
        self.ready.notify_one();
    }

    /// Block until an event is available or the queue is closed.
    pub(crate) fn pop(&self) -> Result<ChangeEvent, MonitorError> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Ok(event);
            }
            if let Some(closed) = &state.closed {
                return Err(closed.to_error());
            }
            self.ready.wait(&mut state);
        }
    }

    /// `None` when the queue is open and currently empty.
    pub(crate) fn try_pop(&self) -> Option<Result<ChangeEvent, MonitorError>> {
        let mut state = self.state.lock();
        if let Some(event) = state.events.pop_front() {
            return Some(Ok(event));
        }
        state.closed.as_ref().map(|closed| Err(closed.to_error()))
    }

    /// Close for shutdown. Waiters see [`MonitorError::Cancelled`].
    pub(crate) fn close(&self) {
        self.close_with(Closed::Shutdown);
    }

    /// Close after a capture failure. Waiters see [`MonitorError::Capture`].
    pub(crate) fn fail(&self, err: io::Error) {
        self.close_with(Closed::Failed(Arc::new(err)));
    }

    fn close_with(&self, reason: Closed) {
        let mut state = self.state.lock();
        // First close wins.
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        drop(state);
        self.ready.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::monitor::event::EventKind;

    fn ev(name: &str) -> ChangeEvent {
        ChangeEvent::new("/watched", name, EventKind::Added)
    }

    #[test]
    fn test_pop_returns_events_in_push_order() {
        let queue = EventQueue::new();
        queue.push(ev("a"));
        queue.push(ev("b"));
        queue.push(ev("c"));
        assert_eq!(queue.len(), 3);

        let names: Vec<String> = (0..3)
            .map(|_| queue.pop().unwrap().path.display().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(EventQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(ev("late"));
        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.path.to_str(), Some("late"));
    }

    #[test]
    fn test_close_wakes_all_waiters_with_cancellation() {
        let queue = Arc::new(EventQueue::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queue.close();
        for w in waiters {
            let err = w.join().unwrap().unwrap_err();
            assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
        }
    }

    #[test]
    fn test_push_after_close_is_discarded() {
        let queue = EventQueue::new();
        queue.close();
        queue.push(ev("ignored"));
        assert_eq!(queue.len(), 0);
        assert!(queue.pop().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_buffered_events_drain_before_cancellation() {
        let queue = EventQueue::new();
        queue.push(ev("kept"));
        queue.close();
        assert_eq!(queue.pop().unwrap().path.to_str(), Some("kept"));
        assert!(queue.pop().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_close_is_idempotent_and_first_reason_wins() {
        let queue = EventQueue::new();
        queue.fail(io::Error::from_raw_os_error(libc::EIO));
        queue.close();
        queue.close();
        assert!(queue.is_closed());
        match queue.pop() {
            Err(MonitorError::Capture(err)) => assert_eq!(err.raw_os_error(), Some(libc::EIO)),
            other => panic!("expected capture failure, got {other:?}"),
        }
        // Every later consumer sees the same failure.
        assert!(matches!(queue.try_pop(), Some(Err(MonitorError::Capture(_)))));
    }

    #[test]
    fn test_push_front_returns_event_to_head() {
        let queue = EventQueue::new();
        queue.push(ev("b"));
        let first = ev("a");
        queue.push_front(first.clone());
        queue.close();
        assert_eq!(queue.pop().unwrap(), first);
        assert_eq!(queue.pop().unwrap().path.to_str(), Some("b"));
        assert!(queue.pop().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_try_pop_on_open_empty_queue_is_none() {
        let queue = EventQueue::new();
        assert!(queue.try_pop().is_none());
        queue.push(ev("x"));
        assert!(matches!(queue.try_pop(), Some(Ok(_))));
    }

    #[test]
    fn test_concurrent_consumers_receive_distinct_events() {
        let queue = Arc::new(EventQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(event) = queue.pop() {
                        seen.push(event.path);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..200 {
            queue.push(ev(&format!("f{i}")));
        }
        // Buffered events survive close.
        queue.close();

        let all: Vec<_> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200, "no event may be delivered twice");
    }
}
