//! Discovery: one recursive scan plus a live watch of the same root.

pub mod scanner;
pub mod watcher;

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::WorkerPool;

pub use scanner::{scan, ScanSummary};
pub use watcher::RootWatcher;

/// Fail early on a root that cannot be scanned.
pub fn check_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(Error::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(Error::RootNotDirectory(root.to_path_buf()));
    }
    Ok(())
}

/// Running scan and watch tasks for one root.
pub struct Ingestion {
    cancel: CancellationToken,
    scan: Option<JoinHandle<Result<ScanSummary>>>,
    scanned: Option<ScanSummary>,
    watch: JoinHandle<Result<()>>,
    forwarder: JoinHandle<()>,
}

impl Ingestion {
    /// Register the watch, then start the scan. Files created while the
    /// scan runs are seen by at least one of the two.
    pub fn start(
        root: &Path,
        pool: WorkerPool,
        watch_buffer: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        check_root(root)?;
        let watcher = RootWatcher::register(root)?;

        let (tx, mut rx) = mpsc::channel::<PathBuf>(watch_buffer.max(1));
        let forward_cancel = cancel.clone();
        let forwarder = tokio::task::spawn_blocking(move || watcher.forward(tx, forward_cancel));

        let watch_pool = pool.clone();
        let watch_cancel = cancel.clone();
        let watch = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch_cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(path) => {
                            debug!("Watch discovered {}", path.display());
                            watch_pool.submit(path).await?;
                        }
                        None => break,
                    },
                }
            }
            Ok::<_, Error>(())
        });

        let scan_root = root.to_path_buf();
        let scan_cancel = cancel.clone();
        let scan =
            tokio::spawn(async move { scanner::scan(&scan_root, &pool, &scan_cancel).await });

        Ok(Self {
            cancel,
            scan: Some(scan),
            scanned: None,
            watch,
            forwarder,
        })
    }

    /// Wait for the initial scan to finish submitting.
    pub async fn wait_for_scan(&mut self) -> Result<ScanSummary> {
        if let Some(scan) = self.scan.take() {
            self.scanned = Some(scan.await??);
        }
        Ok(self.scanned.unwrap_or_default())
    }

    /// Cancel both sources and wait for them to stop submitting.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        let scanned = self.wait_for_scan().await;
        let watched = self.watch.await?;
        self.forwarder.await?;
        scanned.and(watched)
    }
}
