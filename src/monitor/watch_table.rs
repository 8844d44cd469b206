use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::inotify::{Inotify, WATCH_MASK, WatchId};
use crate::error::MonitorError;

#[derive(Default)]
struct Watches {
    /// `None` once the table has been closed at shutdown.
    inotify: Option<Arc<Inotify>>,
    by_id: HashMap<WatchId, PathBuf>,
    by_path: HashMap<PathBuf, WatchId>,
}

impl Watches {
    fn insert(&mut self, id: WatchId, path: PathBuf) {
        // inotify hands back the same id for two spellings of one directory;
        // keep the maps one-to-one by letting the newest spelling win.
        if let Some(previous) = self.by_id.insert(id, path.clone()) {
            if previous != path {
                self.by_path.remove(&previous);
            }
        }
        self.by_path.insert(path, id);
    }

    fn erase(&mut self, id: WatchId) -> Option<PathBuf> {
        let path = self.by_id.remove(&id)?;
        self.by_path.remove(&path);
        Some(path)
    }
}

/// Watch descriptor <-> watched path, in both directions.
pub(crate) struct WatchTable {
    watches: Mutex<Watches>,
}

impl WatchTable {
    pub(crate) fn new(inotify: Arc<Inotify>) -> Self {
        Self {
            watches: Mutex::new(Watches {
                inotify: Some(inotify),
                ..Watches::default()
            }),
        }
    }

    /// Register `path` with inotify and record the returned id.
    ///
    /// The lock is held across `inotify_add_watch` because the kernel decides
    /// whether the id is new or shared with an existing entry.
    pub(crate) fn add(&self, path: &Path) -> Result<WatchId, MonitorError> {
        let mut watches = self.watches.lock();
        let inotify = watches.inotify.as_ref().ok_or(MonitorError::Cancelled)?;
        let id = inotify
            .add_watch(path, WATCH_MASK)
            .map_err(|e| MonitorError::watch("inotify_add_watch", path, e))?;
        watches.insert(id, path.to_path_buf());
        debug!(id, path = %path.display(), "watch added");
        Ok(id)
    }

    /// Unregister `path`. Unknown paths are a successful no-op.
    pub(crate) fn remove(&self, path: &Path) -> Result<(), MonitorError> {
        let mut watches = self.watches.lock();
        let Some(&id) = watches.by_path.get(path) else {
            return Ok(());
        };
        let inotify = watches.inotify.as_ref().ok_or(MonitorError::Cancelled)?;
        inotify
            .rm_watch(id)
            .map_err(|e| MonitorError::watch("inotify_rm_watch", path, e))?;
        watches.erase(id);
        debug!(id, path = %path.display(), "watch removed");
        Ok(())
    }

    /// Path registered under `id`, or an empty path if there is none.
    pub(crate) fn path_for(&self, id: WatchId) -> PathBuf {
        self.watches.lock().by_id.get(&id).cloned().unwrap_or_default()
    }

    /// Drop a mapping the kernel has already invalidated (IN_IGNORED).
    pub(crate) fn forget(&self, id: WatchId) {
        if let Some(path) = self.watches.lock().erase(id) {
            debug!(id, path = %path.display(), "watch dropped by kernel");
        }
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.watches.lock().by_path.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Release the table's inotify handle and every mapping.
    pub(crate) fn close(&self) {
        let mut watches = self.watches.lock();
        watches.inotify = None;
        watches.by_id.clear();
        watches.by_path.clear();
    }
}
