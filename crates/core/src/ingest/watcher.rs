use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Backends that report when a writer closes a file. Elsewhere the file may
/// still be growing when it is seen, so creates and data changes are
/// submitted too and a failed read is retried on the next event.
const REPORTS_CLOSE_WRITE: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// A recursive watch that is already registered with the OS but not yet
/// forwarding events.
pub struct RootWatcher {
    root: PathBuf,
    // Dropping the watcher unregisters it.
    _watcher: RecommendedWatcher,
    events: std_mpsc::Receiver<notify::Result<Event>>,
}

impl RootWatcher {
    /// Register a recursive watch on `root`. Events that happen from here on
    /// are buffered until [`RootWatcher::forward`] runs.
    pub fn register(root: &Path) -> Result<Self> {
        let (tx, events) = std_mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("Watching {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            events,
        })
    }

    /// Translate raw events into discovered paths on `out` until `cancel`
    /// fires or `out` closes. Blocks the calling thread; a full `out` blocks
    /// the loop instead of dropping paths.
    pub fn forward(self, out: mpsc::Sender<PathBuf>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let event = match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    error!("Watch error on {}: {e}", self.root.display());
                    continue;
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("Watcher channel closed for {}", self.root.display());
                    break;
                }
            };

            for path in discovered_paths(&event) {
                if out.blocking_send(path).is_err() {
                    return;
                }
            }
        }
        debug!("Stopped watching {}", self.root.display());
    }
}

/// Paths an event makes available for ingestion. Removals are logged and
/// otherwise ignored since the catalog is append-only.
pub fn discovered_paths(event: &Event) -> Vec<PathBuf> {
    discovered_with(event, REPORTS_CLOSE_WRITE)
}

fn discovered_with(event: &Event, close_write: bool) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        // A created file is empty or half-written until its writer closes it.
        EventKind::Create(_) if close_write => Vec::new(),
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Data(_)) if !close_write => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        // FSEvents does not say which side of a rename a path is; the
        // vanished side fails its read and is dropped.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.clone(),
        // Source and target in one event.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).cloned().into_iter().collect()
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event.paths.clone(),
        EventKind::Remove(_) => {
            for path in &event.paths {
                info!("Ignoring removal of {}", path.display());
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use notify::event::RemoveKind;

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_close_write_backends_wait_for_the_close() {
        let created = event(EventKind::Create(CreateKind::File), &["/r/a.jpg"]);
        assert!(discovered_with(&created, true).is_empty());

        let written = event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/r/a.jpg"],
        );
        assert!(discovered_with(&written, true).is_empty());

        let closed = event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            &["/r/a.jpg"],
        );
        assert_eq!(discovered_with(&closed, true), vec![PathBuf::from("/r/a.jpg")]);
    }

    #[test]
    fn test_other_backends_submit_creates_and_writes() {
        let created = event(EventKind::Create(CreateKind::File), &["/r/a.jpg"]);
        assert_eq!(discovered_with(&created, false), vec![PathBuf::from("/r/a.jpg")]);

        let written = event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Any)),
            &["/r/a.jpg"],
        );
        assert_eq!(discovered_with(&written, false), vec![PathBuf::from("/r/a.jpg")]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_inotify_ignores_creates() {
        let created = event(EventKind::Create(CreateKind::Any), &["/r/a.jpg"]);
        assert!(discovered_paths(&created).is_empty());
    }

    #[test]
    fn test_rename_targets_are_discovered() {
        let to = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/r/new.jpg"],
        );
        assert_eq!(discovered_paths(&to), vec![PathBuf::from("/r/new.jpg")]);

        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/r/old.jpg", "/r/new.jpg"],
        );
        assert_eq!(discovered_paths(&both), vec![PathBuf::from("/r/new.jpg")]);

        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/r/old.jpg"],
        );
        assert!(discovered_paths(&from).is_empty());
    }

    #[test]
    fn test_removals_and_noise_are_ignored() {
        let removed = event(EventKind::Remove(RemoveKind::File), &["/r/a.jpg"]);
        assert!(discovered_paths(&removed).is_empty());

        let folder = event(EventKind::Create(CreateKind::Folder), &["/r/dir"]);
        assert!(discovered_paths(&folder).is_empty());

        let metadata = event(
            EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Any)),
            &["/r/a.jpg"],
        );
        assert!(discovered_paths(&metadata).is_empty());
    }
}
