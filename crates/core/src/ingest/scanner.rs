use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::pool::WorkerPool;

const SCAN_BUFFER: usize = 256;

/// Totals for one recursive scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Regular files handed to the pool.
    pub discovered: u64,
    /// Entries the walk could not read.
    pub walk_errors: u64,
}

/// Walk `root` on a blocking thread and submit every regular file to the
/// pool. Returns once the walk is exhausted or `cancel` fires; submitted
/// tasks may still be running.
pub async fn scan(
    root: &Path,
    pool: &WorkerPool,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let (tx, mut rx) = mpsc::channel::<PathBuf>(SCAN_BUFFER);
    let walk_root = root.to_path_buf();

    let walker = tokio::task::spawn_blocking(move || {
        let mut walk_errors = 0u64;
        for entry in WalkDir::new(&walk_root).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if tx.blocking_send(entry.into_path()).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    walk_errors += 1;
                }
            }
        }
        walk_errors
    });

    let mut discovered = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Scan of {} cancelled", root.display());
                break;
            }
            next = rx.recv() => match next {
                Some(path) => {
                    discovered += 1;
                    pool.submit(path).await?;
                }
                None => break,
            },
        }
    }
    // Unblocks the walker if we stopped early.
    drop(rx);
    let walk_errors = walker.await?;

    info!(discovered, walk_errors, "Scanned {}", root.display());
    Ok(ScanSummary {
        discovered,
        walk_errors,
    })
}
