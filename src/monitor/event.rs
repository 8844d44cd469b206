use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Kind of change reported for a path inside a watched directory.
///
/// The numeric codes are stable and exposed through [`EventKind::as_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    /// Placeholder for a default-constructed event. Never produced by a monitor.
    #[default]
    None = 0,
    /// A file or directory was created.
    Added = 1,
    /// A file or directory was deleted.
    Removed = 2,
    /// File contents were written.
    Modified = 3,
    /// First half of a rename: the name the entry had before the move.
    #[serde(rename = "renamed_old_name")]
    RenamedOld = 4,
    /// Second half of a rename: the name the entry has after the move.
    #[serde(rename = "renamed_new_name")]
    RenamedNew = 5,
}

impl EventKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::RenamedOld => "renamed_old_name",
            Self::RenamedNew => "renamed_new_name",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single change observed under a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChangeEvent {
    /// The watched directory the change happened in. Lets a handler filter
    /// events per registered path. Empty if the watch was unregistered
    /// before the record could be resolved.
    pub parent_path: PathBuf,
    /// Name of the entry relative to `parent_path`, as reported by the kernel.
    pub path: PathBuf,
    pub kind: EventKind,
}

impl ChangeEvent {
    pub fn new(parent_path: impl Into<PathBuf>, path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            parent_path: parent_path.into(),
            path: path.into(),
            kind,
        }
    }

    /// `parent_path` joined with `path`.
    pub fn full_path(&self) -> PathBuf {
        self.parent_path.join(&self.path)
    }
}
