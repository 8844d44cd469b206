use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Errors returned by [`PathMonitor`](crate::PathMonitor) operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A call into inotify (or the supporting descriptors) failed.
    #[error("{context}: {source}")]
    Native {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The monitor was shut down while the request was pending, or after it.
    #[error("operation canceled")]
    Cancelled,

    /// The capture thread hit an unrecoverable read error. Every pending and
    /// future request on the same monitor returns this.
    #[error("event capture failed: {0}")]
    Capture(Arc<io::Error>),
}

impl MonitorError {
    pub(crate) fn native(context: impl Into<String>, source: io::Error) -> Self {
        Self::Native {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn watch(op: &str, path: &Path, source: io::Error) -> Self {
        Self::native(format!("{op} for \"{}\" failed", path.display()), source)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The OS error code behind a native or capture failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Native { source, .. } => source.raw_os_error(),
            Self::Capture(source) => source.raw_os_error(),
            Self::Cancelled => Some(libc::ECANCELED),
        }
    }
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
