//! Single-writer discipline.
//!
//! One blocking task owns the [`StoreWriter`] and drains a bounded queue of
//! [`Mutation`]s in enqueue order, applying each in its own write
//! transaction. The dirty flag lives on that task only.

use std::ops::ControlFlow;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{resolve_primary, set_bucket, ASSETS, LOOKUP, PATHS, SELECTED_FLAG, SELECTIONS};
use crate::domain::{AssetRecord, RebuildOutcome, SetName};
use crate::error::{Error, Result};
use crate::keys::{path_to_bytes, LookupKey, PrimaryKey};
use crate::store::StoreWriter;

type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Mutation {
    PutAsset {
        path: PathBuf,
        captured_at: DateTime<Utc>,
        thumbnail: Vec<u8>,
    },
    SetSelection {
        primary: PrimaryKey,
        selected: bool,
        reply: Reply<()>,
    },
    AddToSet {
        set: String,
        lookup: LookupKey,
        reply: Reply<()>,
    },
    RemoveFromSet {
        set: String,
        lookup: LookupKey,
        reply: Reply<bool>,
    },
    Rebuild {
        reply: Option<Reply<RebuildOutcome>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Sending side of the mutation queue. Cheap to clone; the writer stops
/// once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct CatalogHandle {
    tx: mpsc::Sender<Mutation>,
}

impl CatalogHandle {
    async fn send(&self, mutation: Mutation) -> Result<()> {
        self.tx.send(mutation).await.map_err(|_| Error::WriterClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Mutation) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| Error::WriterClosed)?
    }

    /// Queue an asset for persistence. Returns once queued, not once applied.
    pub async fn put_asset(
        &self,
        path: PathBuf,
        captured_at: DateTime<Utc>,
        thumbnail: Vec<u8>,
    ) -> Result<()> {
        self.send(Mutation::PutAsset {
            path,
            captured_at,
            thumbnail,
        })
        .await
    }

    pub async fn set_selection(&self, primary: PrimaryKey, selected: bool) -> Result<()> {
        self.request(|reply| Mutation::SetSelection {
            primary,
            selected,
            reply,
        })
        .await
    }

    pub async fn add_to_set(&self, set: &str, lookup: LookupKey) -> Result<()> {
        let set = writable_set(set)?;
        self.request(|reply| Mutation::AddToSet { set, lookup, reply })
            .await
    }

    /// Returns whether the asset was a member.
    pub async fn remove_from_set(&self, set: &str, lookup: LookupKey) -> Result<bool> {
        let set = writable_set(set)?;
        self.request(|reply| Mutation::RemoveFromSet { set, lookup, reply })
            .await
    }

    /// Rebuild the dedup index if anything was written since the last one.
    pub async fn rebuild(&self) -> Result<RebuildOutcome> {
        self.request(|reply| Mutation::Rebuild { reply: Some(reply) })
            .await
    }

    /// Fire-and-forget variant used by the scheduler.
    pub async fn request_rebuild(&self) -> Result<()> {
        self.send(Mutation::Rebuild { reply: None }).await
    }

    /// Resolves once every mutation queued before it has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Mutation::Flush { reply }).await?;
        rx.await.map_err(|_| Error::WriterClosed)
    }

    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }
}

/// `all` and `selected` are maintained by the catalog itself.
fn writable_set(name: &str) -> Result<String> {
    match SetName::parse(name) {
        SetName::Named(name) => Ok(name),
        reserved => Err(Error::Config(format!(
            "set `{reserved}` is managed by the catalog"
        ))),
    }
}

/// Join handle of the writer task.
pub struct WriterTask {
    handle: JoinHandle<Result<()>>,
}

impl WriterTask {
    /// Wait for the writer to finish. Resolves after every handle is dropped
    /// and the queue is drained, or with the store error that stopped it.
    pub async fn join(self) -> Result<()> {
        self.handle.await?
    }
}

pub struct CatalogWriter {
    store: StoreWriter,
    rx: mpsc::Receiver<Mutation>,
    dirty: bool,
    applied: u64,
    halt: CancellationToken,
}

impl CatalogWriter {
    /// Start the writer on the blocking pool with a queue of `capacity`.
    /// `halt` is cancelled if a store failure stops the writer.
    pub fn spawn(
        store: StoreWriter,
        capacity: usize,
        halt: CancellationToken,
    ) -> (CatalogHandle, WriterTask) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = Self {
            store,
            rx,
            dirty: false,
            applied: 0,
            halt,
        };
        let handle = tokio::task::spawn_blocking(move || writer.run());
        (CatalogHandle { tx }, WriterTask { handle })
    }

    fn run(mut self) -> Result<()> {
        while let Some(mutation) = self.rx.blocking_recv() {
            if let Err(e) = self.apply(mutation) {
                error!("Catalog writer stopped: {e}");
                self.halt.cancel();
                return Err(e);
            }
            self.applied += 1;
        }
        info!(applied = self.applied, "Catalog writer finished");
        Ok(())
    }

    /// Store failures are returned and stop the writer; anything else is
    /// reported to the caller that asked.
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::PutAsset {
                path,
                captured_at,
                thumbnail,
            } => self.put_asset(path, captured_at, thumbnail),
            Mutation::SetSelection {
                primary,
                selected,
                reply,
            } => {
                let result = self.set_selection(&primary, selected);
                settle(result, reply)
            }
            Mutation::AddToSet { set, lookup, reply } => {
                let result = self.store.write(|txn| {
                    let primary = resolve_primary(txn, &lookup)?;
                    txn.put(&set_bucket(&set), lookup.as_bytes(), primary.as_bytes())
                });
                settle(result, reply)
            }
            Mutation::RemoveFromSet { set, lookup, reply } => {
                let result = self
                    .store
                    .write(|txn| txn.delete(&set_bucket(&set), lookup.as_bytes()));
                settle(result, reply)
            }
            Mutation::Rebuild { reply } => {
                let outcome = self.rebuild()?;
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(outcome));
                }
                Ok(())
            }
            Mutation::Flush { reply } => {
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    fn put_asset(
        &mut self,
        path: PathBuf,
        captured_at: DateTime<Utc>,
        thumbnail: Vec<u8>,
    ) -> Result<()> {
        let primary = PrimaryKey::derive(captured_at, &path);
        let lookup = primary.lookup_key();
        let record = AssetRecord::new(&lookup, &path, captured_at, thumbnail).encode()?;
        let all = set_bucket(SetName::ALL);

        self.store.write(|txn| {
            txn.put(ASSETS, primary.as_bytes(), &record)?;
            txn.put(LOOKUP, lookup.as_bytes(), primary.as_bytes())?;
            txn.put(PATHS, &path_to_bytes(&path), primary.as_bytes())?;
            txn.put(&all, lookup.as_bytes(), primary.as_bytes())
        })?;
        self.dirty = true;
        debug!(key = %lookup, "Stored {}", path.display());
        Ok(())
    }

    fn set_selection(&mut self, primary: &PrimaryKey, selected: bool) -> Result<()> {
        self.store.write(|txn| {
            if !txn.contains(ASSETS, primary.as_bytes())? {
                return Err(Error::NotFound(primary.lookup_key().to_string()));
            }
            if selected {
                txn.put(SELECTIONS, primary.as_bytes(), SELECTED_FLAG)
            } else {
                txn.delete(SELECTIONS, primary.as_bytes()).map(|_| ())
            }
        })
    }

    /// Replace the dedup index with one derived from the primary table.
    fn rebuild(&mut self) -> Result<RebuildOutcome> {
        if !self.dirty {
            info!("Dedup index is clean, rebuild skipped");
            return Ok(RebuildOutcome::Skipped);
        }
        self.dirty = false;

        let entries = self.store.write(|txn| {
            let mut paths = Vec::new();
            txn.for_each(ASSETS, |key, _| {
                let (_, path) = PrimaryKey::from_bytes(key.to_vec())?.decode()?;
                paths.push((path_to_bytes(&path), key.to_vec()));
                Ok(ControlFlow::Continue(()))
            })?;
            txn.clear(PATHS)?;
            for (path, primary) in &paths {
                txn.put(PATHS, path, primary)?;
            }
            Ok(paths.len() as u64)
        })?;
        info!(entries, "Dedup index rebuilt");
        Ok(RebuildOutcome::Rebuilt { entries })
    }
}

fn settle<T>(result: Result<T>, reply: Reply<T>) -> Result<()> {
    match result {
        Err(e) if e.is_store() => Err(e),
        other => {
            let _ = reply.send(other);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::catalog::Catalog;
    use crate::store::Store;

    #[tokio::test]
    async fn test_mutations_apply_in_order_and_flush_waits() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let catalog = Catalog::new(Arc::new(store));
        let (handle, task) = CatalogWriter::spawn(store_writer, 4, CancellationToken::new());

        for i in 0..100 {
            handle
                .put_asset(
                    PathBuf::from(format!("/p/{i}.jpg")),
                    DateTime::UNIX_EPOCH,
                    vec![i as u8],
                )
                .await
                .unwrap();
        }
        handle.flush().await.unwrap();
        assert_eq!(catalog.asset_count().unwrap(), 100);
        assert!(catalog.dedup_check(Path::new("/p/99.jpg")).unwrap());

        drop(handle);
        task.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_mutations_survive_handle_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let catalog = Catalog::new(Arc::new(store));
        let (handle, task) = CatalogWriter::spawn(store_writer, 64, CancellationToken::new());

        for i in 0..20 {
            handle
                .put_asset(PathBuf::from(format!("/p/{i}.jpg")), DateTime::UNIX_EPOCH, vec![])
                .await
                .unwrap();
        }
        drop(handle);
        task.join().await.unwrap();
        assert_eq!(catalog.asset_count().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_reserved_sets_are_not_writable() {
        let tmp = tempfile::tempdir().unwrap();
        let (_store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let (handle, task) = CatalogWriter::spawn(store_writer, 4, CancellationToken::new());
        let lookup = PrimaryKey::derive(DateTime::UNIX_EPOCH, Path::new("/a.jpg")).lookup_key();

        for reserved in ["all", "selected", ""] {
            assert!(matches!(
                handle.add_to_set(reserved, lookup.clone()).await,
                Err(Error::Config(_))
            ));
        }

        drop(handle);
        task.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_error_stops_the_writer_and_halts() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("c.db");
        let (_store, store_writer) = Store::open(&db).unwrap();
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_assets BEFORE INSERT ON entries
                 WHEN NEW.bucket = 'assets'
                 BEGIN SELECT RAISE(ABORT, 'disk says no'); END;",
            )
            .unwrap();
        let halt = CancellationToken::new();
        let (handle, task) = CatalogWriter::spawn(store_writer, 4, halt.clone());

        handle
            .put_asset(PathBuf::from("/a.jpg"), DateTime::UNIX_EPOCH, vec![1])
            .await
            .unwrap();
        assert!(matches!(handle.flush().await, Err(Error::WriterClosed)));
        assert!(halt.is_cancelled());
        assert!(matches!(task.join().await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_handles_report_closed_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let (_store, store_writer) = Store::open(&tmp.path().join("c.db")).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        drop(store_writer);
        let handle = CatalogHandle { tx };
        assert!(matches!(
            handle.put_asset(PathBuf::from("/a.jpg"), DateTime::UNIX_EPOCH, vec![]).await,
            Err(Error::WriterClosed)
        ));
        assert!(matches!(handle.flush().await, Err(Error::WriterClosed)));
    }
}
