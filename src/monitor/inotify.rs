//! Owned wrappers over the inotify descriptor and the eventfd used to
//! interrupt the capture thread's `poll`.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Watch descriptor handed out by the kernel.
pub(crate) type WatchId = i32;

/// Interest registered for every watched path.
pub(crate) const WATCH_MASK: u32 =
    libc::IN_MODIFY | libc::IN_CREATE | libc::IN_DELETE | libc::IN_MOVED_FROM | libc::IN_MOVED_TO;

pub(crate) struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    pub(crate) fn init() -> io::Result<Self> {
        // SAFETY: plain syscall with constant flags; no pointers involved.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn add_watch(&self, path: &Path, mask: u32) -> io::Result<WatchId> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    pub(crate) fn rm_watch(&self, id: WatchId) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor owned by `self`.
        let rc = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), id) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Non-blocking read of raw records. Returns `WouldBlock` when drained.
    pub(crate) fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buffer` is valid for writes of `buffer.len()` bytes.
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buffer.as_mut_ptr().cast::<libc::c_void>(),
                buffer.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl AsRawFd for Inotify {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// One-shot wakeup for the capture thread.
pub(crate) struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: plain syscall with constant flags; no pointers involved.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        // SAFETY: `one` is a live u64 and exactly its size is written.
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            // Counter already saturated: the thread is woken regardless.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// inotify has records to read.
    Events,
    /// Shutdown was requested.
    Woken,
}

/// Block until either descriptor is readable. A wakeup wins over pending records.
pub(crate) fn wait(inotify: &Inotify, waker: &Waker) -> io::Result<Readiness> {
    let mut fds = [
        libc::pollfd {
            fd: inotify.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: waker.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    loop {
        // SAFETY: `fds` is a live array and its length is passed alongside it.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if fds[1].revents != 0 {
            return Ok(Readiness::Woken);
        }
        let revents = fds[0].revents;
        if revents & libc::POLLIN != 0 {
            return Ok(Readiness::Events);
        }
        if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::other(format!(
                "inotify descriptor reported poll condition {revents:#x}"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_watch() {
        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init().unwrap();
        let wd = inotify.add_watch(dir.path(), WATCH_MASK).unwrap();
        assert!(wd > 0);
        inotify.rm_watch(wd).unwrap();
        assert!(inotify.rm_watch(wd).is_err(), "second rm_watch should fail");
    }

    #[test]
    fn test_read_without_records_would_block() {
        let inotify = Inotify::init().unwrap();
        let mut buf = [0u8; 512];
        let err = inotify.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let inotify = Inotify::init().unwrap();
        let waker = Waker::new().unwrap();
        waker.wake().unwrap();
        assert_eq!(wait(&inotify, &waker).unwrap(), Readiness::Woken);
    }

    #[test]
    fn test_wait_reports_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init().unwrap();
        let waker = Waker::new().unwrap();
        inotify.add_watch(dir.path(), WATCH_MASK).unwrap();
        std::fs::File::create(dir.path().join("a.txt")).unwrap();
        assert_eq!(wait(&inotify, &waker).unwrap(), Readiness::Events);
    }
}
