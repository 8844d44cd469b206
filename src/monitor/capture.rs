use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

use super::Shared;
use super::event::{ChangeEvent, EventKind};
use super::inotify::{self, Inotify, Readiness, WatchId, Waker};

/// Fixed header of a `struct inotify_event`: wd, mask, cookie, len.
const HEADER_LEN: usize = std::mem::size_of::<libc::inotify_event>();

/// Longest file name a record can carry, excluding the terminating NUL.
const NAME_MAX: usize = 255;

/// Smallest read buffer guaranteed to fit one record with a maximal name.
pub(crate) const MIN_READ_BUFFER: usize = HEADER_LEN + NAME_MAX + 1;

/// Bits of the mask that carry the event type (IN_ALL_EVENTS).
const EVENT_TYPE_BITS: u32 = 0x0000_0fff;

/// One record as laid out by the kernel, name already stripped of padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawRecord {
    pub(crate) wd: WatchId,
    pub(crate) mask: u32,
    pub(crate) cookie: u32,
    pub(crate) name: PathBuf,
}

/// Accumulates bytes from `read` and yields records once they are complete.
#[derive(Debug, Default)]
pub(crate) struct RecordDecoder {
    pending: Vec<u8>,
    consumed: usize,
}

impl RecordDecoder {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        if self.consumed > 0 {
            self.pending.drain(..self.consumed);
            self.consumed = 0;
        }
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete record, or `None` if more bytes are needed.
    pub(crate) fn next_record(&mut self) -> Option<RawRecord> {
        let buf = &self.pending[self.consumed..];
        if buf.len() < HEADER_LEN {
            return None;
        }
        let wd = field(buf, 0) as WatchId;
        let mask = field(buf, 4);
        let cookie = field(buf, 8);
        let len = field(buf, 12) as usize;

        let total = HEADER_LEN + len;
        if buf.len() < total {
            return None;
        }
        let name = &buf[HEADER_LEN..total];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = PathBuf::from(OsStr::from_bytes(&name[..end]));

        self.consumed += total;
        Some(RawRecord {
            wd,
            mask,
            cookie,
            name,
        })
    }

    /// Bytes buffered but not yet decoded.
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len() - self.consumed
    }
}

fn field(buf: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// What a record means for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoded {
    Event(EventKind),
    /// The kernel queue overflowed; records were lost.
    Overflow,
    /// The watch itself went away.
    Ignored,
    Unmount,
    Unrecognized,
}

pub(crate) fn classify(mask: u32) -> Decoded {
    if mask & libc::IN_Q_OVERFLOW != 0 {
        return Decoded::Overflow;
    }
    if mask & libc::IN_IGNORED != 0 {
        return Decoded::Ignored;
    }
    if mask & libc::IN_UNMOUNT != 0 {
        return Decoded::Unmount;
    }
    match mask & EVENT_TYPE_BITS {
        libc::IN_CREATE => Decoded::Event(EventKind::Added),
        libc::IN_DELETE => Decoded::Event(EventKind::Removed),
        libc::IN_MODIFY => Decoded::Event(EventKind::Modified),
        libc::IN_MOVED_FROM => Decoded::Event(EventKind::RenamedOld),
        libc::IN_MOVED_TO => Decoded::Event(EventKind::RenamedNew),
        _ => Decoded::Unrecognized,
    }
}

/// State owned by the capture thread.
pub(crate) struct Capture {
    shared: Arc<Shared>,
    inotify: Arc<Inotify>,
    decoder: RecordDecoder,
}

impl Capture {
    pub(crate) fn new(shared: Arc<Shared>, inotify: Arc<Inotify>) -> Self {
        Self {
            shared,
            inotify,
            decoder: RecordDecoder::default(),
        }
    }

    /// Decode `bytes` (appended to any partial record) and queue the resulting events.
    pub(crate) fn ingest(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
        while let Some(record) = self.decoder.next_record() {
            self.dispatch(record);
        }
    }

    fn dispatch(&self, record: RawRecord) {
        match classify(record.mask) {
            Decoded::Event(kind) => {
                let parent_path = self.shared.watches.path_for(record.wd);
                trace!(
                    wd = record.wd,
                    cookie = record.cookie,
                    %kind,
                    name = %record.name.display(),
                    "event"
                );
                self.shared.queue.push(ChangeEvent {
                    parent_path,
                    path: record.name,
                    kind,
                });
            }
            Decoded::Overflow => {
                let total = self.shared.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(total, "inotify queue overflow, events were dropped");
            }
            Decoded::Ignored => self.shared.watches.forget(record.wd),
            Decoded::Unmount => debug!(wd = record.wd, "watched filesystem unmounted"),
            Decoded::Unrecognized => trace!(wd = record.wd, mask = record.mask, "skipping record"),
        }
    }

    fn run(mut self, waker: Arc<Waker>, read_buffer_size: usize) {
        debug!("capture thread started");
        let mut buffer = vec![0u8; read_buffer_size.max(MIN_READ_BUFFER)];
        loop {
            match inotify::wait(&self.inotify, &waker) {
                Ok(Readiness::Woken) => break,
                Ok(Readiness::Events) => {}
                Err(err) => return self.fail(err),
            }
            if let Err(err) = self.read_once(&mut buffer) {
                return self.fail(err);
            }
        }
        debug!("capture thread stopped");
    }

    /// One read per wakeup of `poll`, so a pending stop is seen between buffers
    /// even while records keep arriving.
    fn read_once(&mut self, buffer: &mut [u8]) -> io::Result<()> {
        match self.inotify.read(buffer) {
            Ok(n) => {
                self.ingest(&buffer[..n]);
                Ok(())
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn fail(self, err: io::Error) {
        error!(error = %err, "inotify read failed, monitor stops capturing");
        self.shared.queue.fail(err);
    }
}

/// The dedicated thread draining inotify for one monitor.
pub(crate) struct CaptureThread {
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        inotify: Arc<Inotify>,
        read_buffer_size: usize,
    ) -> io::Result<Self> {
        let waker = Arc::new(Waker::new()?);
        let capture = Capture::new(shared, inotify);
        let handle = thread::Builder::new()
            .name("path-monitor-capture".into())
            .spawn({
                let waker = Arc::clone(&waker);
                move || capture.run(waker, read_buffer_size)
            })?;
        Ok(Self {
            waker,
            handle: Some(handle),
        })
    }

    /// Wake the thread and wait for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(err) = self.waker.wake() {
            // Joining would hang forever; leave the thread detached.
            error!(error = %err, "failed to wake capture thread");
            return;
        }
        if handle.join().is_err() {
            error!("capture thread panicked");
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}
