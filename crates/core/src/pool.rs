//! Bounded worker pool for per-file ingestion.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::catalog::{Catalog, CatalogHandle};
use crate::config::{CaptureFallback, ThumbnailSettings};
use crate::domain::IngestOutcome;
use crate::error::{Error, FileError, Result};
use crate::thumbnail;

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Case-insensitive extension filter.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub peak_active: usize,
    pub stored: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Tasks cut short by a fatal catalog failure.
    pub aborted: u64,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    stored: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
}

/// Per-task settings shared by every worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolSettings {
    pub capacity: usize,
    pub thumbnail: ThumbnailSettings,
    pub capture_fallback: CaptureFallback,
}

/// Submits files to at most `capacity` concurrent ingestion tasks.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    permits: Arc<Semaphore>,
    capacity: usize,
    /// Paths with a running task, flagged when another event for the same
    /// path arrived meanwhile.
    in_flight: Mutex<HashMap<PathBuf, bool>>,
    counters: Counters,
    catalog: Catalog,
    writer: CatalogHandle,
    thumbnail: ThumbnailSettings,
    capture_fallback: CaptureFallback,
    halt: CancellationToken,
}

enum Failure {
    File(FileError),
    Catalog(Error),
}

impl From<FileError> for Failure {
    fn from(e: FileError) -> Self {
        Failure::File(e)
    }
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Catalog(e)
    }
}

/// Removes the path from the in-flight set when the task ends.
struct InFlight {
    inner: Arc<Inner>,
    path: PathBuf,
}

impl InFlight {
    /// Keep the claim and return true when the attempt failed and another
    /// event for the path arrived meanwhile; otherwise release it.
    fn retry_or_release(&self, outcome: IngestOutcome) -> bool {
        let mut in_flight = self.inner.lock_in_flight();
        let requested = in_flight.get(&self.path).copied().unwrap_or(false);
        if requested && outcome == IngestOutcome::Failed {
            in_flight.insert(self.path.clone(), false);
            return true;
        }
        in_flight.remove(&self.path);
        false
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.lock_in_flight().remove(&self.path);
    }
}

impl WorkerPool {
    /// `halt` stops the pool from accepting work. The pool cancels it itself
    /// when the catalog fails in a way no later file can recover from.
    pub fn new(
        catalog: Catalog,
        writer: CatalogHandle,
        settings: PoolSettings,
        halt: CancellationToken,
    ) -> Self {
        let capacity = settings.capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                catalog,
                writer,
                thumbnail: settings.thumbnail,
                capture_fallback: settings.capture_fallback,
                halt,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Start a task for `path`, waiting for a free slot first.
    ///
    /// Returns immediately for unsupported files, for paths that already
    /// have a task running, and once the pool is halted.
    pub async fn submit(&self, path: PathBuf) -> Result<()> {
        if self.inner.halt.is_cancelled() {
            debug!("Ingestion halted, dropping {}", path.display());
            return Ok(());
        }
        if !is_supported(&path) {
            self.inner.record(IngestOutcome::Ignored);
            return Ok(());
        }
        let Some(guard) = self.claim(path) else {
            self.inner.record(IngestOutcome::InFlight);
            return Ok(());
        };
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut outcome = inner.run(&guard.path).await;
            while guard.retry_or_release(outcome) {
                inner.record(outcome);
                debug!("Retrying {} after a newer event", guard.path.display());
                outcome = inner.run(&guard.path).await;
            }
            inner.record(outcome);
            drop(guard);
            drop(permit);
        });
        Ok(())
    }

    /// Wait until every running task has finished.
    pub async fn drain(&self) -> Result<()> {
        let all = self
            .inner
            .permits
            .acquire_many(self.inner.capacity as u32)
            .await
            .map_err(|_| Error::PoolClosed)?;
        drop(all);
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            active: c.active.load(Ordering::Relaxed),
            peak_active: c.peak_active.load(Ordering::Relaxed),
            stored: c.stored.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
        }
    }

    fn claim(&self, path: PathBuf) -> Option<InFlight> {
        let mut in_flight = self.inner.lock_in_flight();
        match in_flight.entry(path) {
            Entry::Occupied(mut running) => {
                debug!("Already processing {}", running.key().display());
                *running.get_mut() = true;
                None
            }
            Entry::Vacant(free) => {
                let path = free.key().clone();
                free.insert(false);
                Some(InFlight {
                    inner: Arc::clone(&self.inner),
                    path,
                })
            }
        }
    }
}

impl Inner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<PathBuf, bool>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, path: &Path) -> IngestOutcome {
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_active.fetch_max(active, Ordering::SeqCst);

        let outcome = match self.process(path).await {
            Ok(outcome) => outcome,
            Err(Failure::File(e)) => {
                warn!("Skipping {}: {e}", path.display());
                IngestOutcome::Failed
            }
            Err(Failure::Catalog(e)) if e.is_store() || matches!(e, Error::WriterClosed) => {
                if !self.halt.is_cancelled() {
                    error!("Halting ingestion at {}: {e}", path.display());
                }
                self.halt.cancel();
                IngestOutcome::Aborted
            }
            Err(Failure::Catalog(e)) => {
                error!("Catalog error while ingesting {}: {e}", path.display());
                IngestOutcome::Failed
            }
        };

        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn process(&self, path: &Path) -> std::result::Result<IngestOutcome, Failure> {
        if self.catalog.dedup_check(path)? {
            debug!("Already cataloged {}", path.display());
            return Ok(IngestOutcome::Deduped);
        }

        let bytes = tokio::fs::read(path).await.map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(FileError::Empty(path.to_path_buf()).into());
        }
        let modified = match self.capture_fallback {
            CaptureFallback::Mtime => tokio::fs::metadata(path)
                .await
                .ok()
                .and_then(|m| m.modified().ok()),
            CaptureFallback::Epoch => None,
        };

        let settings = self.thumbnail;
        let processed =
            tokio::task::spawn_blocking(move || thumbnail::process(&bytes, &settings))
                .await
                .map_err(Error::from)??;

        let captured_at = processed
            .captured_at
            .unwrap_or_else(|| self.capture_fallback.resolve(modified));
        self.writer
            .put_asset(path.to_path_buf(), captured_at, processed.preview.jpeg)
            .await?;
        Ok(IngestOutcome::Stored)
    }

    fn record(&self, outcome: IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Stored => &self.counters.stored,
            IngestOutcome::Failed => &self.counters.failed,
            IngestOutcome::Aborted => &self.counters.aborted,
            IngestOutcome::Deduped | IngestOutcome::Ignored | IngestOutcome::InFlight => {
                &self.counters.skipped
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
