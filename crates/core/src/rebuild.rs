use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::CatalogHandle;

/// Ask the writer for a dedup-index rebuild every `period`. The writer
/// decides whether there is anything to do.
pub fn spawn(writer: CatalogHandle, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Requesting dedup index rebuild");
                    if writer.request_rebuild().await.is_err() {
                        warn!("Catalog writer is gone, stopping rebuild timer");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::DateTime;

    use super::*;
    use crate::catalog::CatalogWriter;
    use crate::domain::RebuildOutcome;
    use crate::store::Store;

    #[tokio::test]
    async fn test_timer_consumes_the_dirty_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let (_store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let (writer, task) = CatalogWriter::spawn(store_writer, 16, CancellationToken::new());
        let cancel = CancellationToken::new();
        let timer = spawn(writer.clone(), Duration::from_millis(50), cancel.clone());

        writer
            .put_asset(PathBuf::from("/p/a.jpg"), DateTime::UNIX_EPOCH, vec![1])
            .await
            .unwrap();
        writer.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // A scheduled request already rebuilt the index.
        assert_eq!(writer.rebuild().await.unwrap(), RebuildOutcome::Skipped);

        cancel.cancel();
        timer.await.unwrap();
        drop(writer);
        task.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_the_timer() {
        let tmp = tempfile::tempdir().unwrap();
        let (_store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let (writer, task) = CatalogWriter::spawn(store_writer, 16, CancellationToken::new());
        let cancel = CancellationToken::new();
        let timer = spawn(writer.clone(), Duration::from_secs(3600), cancel.clone());

        cancel.cancel();
        timer.await.unwrap();
        // The timer's handle is gone, so the writer can finish.
        drop(writer);
        task.join().await.unwrap();
    }
}
