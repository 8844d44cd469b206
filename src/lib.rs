//! Filesystem change notification for watched directories, built on Linux inotify.
//!
//! A [`PathMonitor`] owns one inotify channel. A dedicated capture thread
//! decodes the kernel's records into [`ChangeEvent`]s and queues them;
//! callers take them either with the blocking [`PathMonitor::monitor`] or with
//! [`PathMonitor::async_monitor`] / [`PathMonitor::next_event`], which are
//! served by a private worker thread.
//!
//! ```no_run
//! use path_monitor::{EventKind, PathMonitor};
//!
//! let monitor = PathMonitor::new("logs")?;
//! monitor.add_path("/var/log")?;
//! let event = monitor.monitor()?;
//! if event.kind == EventKind::Added {
//!     println!("new file: {}", event.full_path().display());
//! }
//! # Ok::<(), path_monitor::MonitorError>(())
//! ```

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("path-monitor requires inotify (Linux or Android)");

pub mod config;
pub mod error;
pub mod monitor;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use monitor::PathMonitor;
pub use monitor::event::{ChangeEvent, EventKind};
