pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod exif;
pub mod export;
pub mod ingest;
pub mod keys;
pub mod logging;
pub mod pool;
pub mod rebuild;
pub mod store;
pub mod thumbnail;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use catalog::writer::WriterTask;
use catalog::{Catalog, CatalogHandle, CatalogWriter};
use export::{ExportProgress, ExportSummary};
use ingest::{Ingestion, ScanSummary};
use pool::{PoolSettings, PoolStats, WorkerPool};
use store::Store;

pub use config::LibraryConfig;
pub use domain::{Asset, IngestOutcome, RebuildOutcome, SetName};
pub use error::{Error, FileError, Result};
pub use keys::{LookupKey, PrimaryKey};

/// The main entry point: a cataloged photo root plus its ingestion
/// pipeline.
///
/// Must be opened inside a Tokio runtime; the writer and pool run on it.
pub struct Library {
    config: LibraryConfig,
    catalog: Catalog,
    writer: CatalogHandle,
    writer_task: WriterTask,
    pool: WorkerPool,
    cancel: CancellationToken,
    ingestion: Option<Ingestion>,
    rebuild_timer: Option<JoinHandle<()>>,
}

impl Library {
    /// Open or create the store and start the catalog writer. Discovery does
    /// not begin until [`Library::start`] or [`Library::scan`].
    pub fn open(config: LibraryConfig) -> Result<Self> {
        config.validate()?;
        let (store, store_writer) = Store::open(&config.db_path)?;
        let catalog = Catalog::new(Arc::new(store));
        let cancel = CancellationToken::new();
        let (writer, writer_task) =
            CatalogWriter::spawn(store_writer, config.mutation_queue, cancel.clone());
        let pool = WorkerPool::new(
            catalog.clone(),
            writer.clone(),
            PoolSettings {
                capacity: config.pool_capacity,
                thumbnail: config.thumbnail,
                capture_fallback: config.capture_fallback,
            },
            cancel.clone(),
        );
        info!("Opened catalog at {}", config.db_path.display());
        Ok(Self {
            config,
            catalog,
            writer,
            writer_task,
            pool,
            cancel,
            ingestion: None,
            rebuild_timer: None,
        })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Read access to the catalog indices.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Watch the root, scan it, and schedule periodic dedup rebuilds.
    /// Runs until [`Library::shutdown`].
    pub fn start(&mut self) -> Result<()> {
        if self.ingestion.is_some() {
            return Ok(());
        }
        let ingestion = Ingestion::start(
            &self.config.root,
            self.pool.clone(),
            self.config.watch_buffer,
            self.cancel.child_token(),
        )?;
        self.ingestion = Some(ingestion);
        self.rebuild_timer = Some(rebuild::spawn(
            self.writer.clone(),
            self.config.rebuild_interval(),
            self.cancel.child_token(),
        ));
        info!("Ingesting {}", self.config.root.display());
        Ok(())
    }

    /// Wait until the initial scan of a started library has submitted every
    /// file and what the pool produced for them is committed.
    ///
    /// Fails with [`Error::Halted`] if a catalog failure stopped ingestion.
    pub async fn wait_for_scan(&mut self) -> Result<ScanSummary> {
        let summary = match self.ingestion.as_mut() {
            Some(ingestion) => ingestion.wait_for_scan().await?,
            None => ScanSummary::default(),
        };
        self.settle().await?;
        Ok(summary)
    }

    /// One-shot scan of the root without watching; returns once every
    /// discovered file has been processed and committed.
    pub async fn scan(&self) -> Result<ScanSummary> {
        ingest::check_root(&self.config.root)?;
        let summary = ingest::scan(&self.config.root, &self.pool, &self.cancel).await?;
        self.settle().await?;
        Ok(summary)
    }

    async fn settle(&self) -> Result<()> {
        self.pool.drain().await?;
        let flushed = self.writer.flush().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Halted);
        }
        flushed
    }

    /// Cancelled when ingestion halts: after a store failure stops the
    /// writer, or on shutdown. The real cause comes from
    /// [`Library::shutdown`].
    pub fn halt_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Resolves once every mutation queued so far has been applied.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    pub async fn rebuild(&self) -> Result<RebuildOutcome> {
        self.writer.rebuild().await
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn asset_count(&self) -> Result<u64> {
        self.catalog.asset_count()
    }

    /// Lookup keys of `set`, most recently captured first.
    pub fn list_keys(&self, set: &str) -> Result<Vec<LookupKey>> {
        self.catalog.list_keys(&SetName::parse(set))
    }

    pub fn get_asset(&self, lookup: &str) -> Result<Asset> {
        self.catalog.get_asset(&LookupKey::parse(lookup)?)
    }

    pub fn get_thumbnail(&self, lookup: &str) -> Result<Vec<u8>> {
        self.catalog.get_thumbnail(&LookupKey::parse(lookup)?)
    }

    /// Location of the original file, for serving it.
    pub fn asset_path(&self, lookup: &str) -> Result<PathBuf> {
        self.catalog.asset_path(&LookupKey::parse(lookup)?)
    }

    /// Malformed keys are simply absent.
    pub fn contains(&self, lookup: &str) -> Result<bool> {
        match LookupKey::parse(lookup) {
            Ok(key) => self.catalog.contains(&key),
            Err(_) => Ok(false),
        }
    }

    /// Unknown assets are unselected.
    pub fn get_selection(&self, lookup: &str) -> Result<bool> {
        let key = LookupKey::parse(lookup)?;
        match self.catalog.primary_key(&key) {
            Ok(primary) => self.catalog.get_selection(&primary),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn set_selection(&self, lookup: &str, selected: bool) -> Result<()> {
        let primary = self.catalog.primary_key(&LookupKey::parse(lookup)?)?;
        self.writer.set_selection(primary, selected).await
    }

    pub async fn add_to_set(&self, set: &str, lookup: &str) -> Result<()> {
        self.writer.add_to_set(set, LookupKey::parse(lookup)?).await
    }

    pub async fn remove_from_set(&self, set: &str, lookup: &str) -> Result<bool> {
        self.writer
            .remove_from_set(set, LookupKey::parse(lookup)?)
            .await
    }

    /// Write the originals of `set` into a zip archive at `out`.
    pub fn export_set(
        &self,
        set: &str,
        out: &Path,
        progress_cb: Option<&mut dyn FnMut(ExportProgress)>,
    ) -> Result<ExportSummary> {
        let file = BufWriter::new(File::create(out)?);
        let summary = export::export_set(&self.catalog, &SetName::parse(set), file, progress_cb)?;
        info!(
            archived = summary.archived,
            missing = summary.missing,
            "Exported {set} to {}",
            out.display()
        );
        Ok(summary)
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop discovery, let running tasks finish, then close the mutation
    /// queue and wait for the writer to apply what is left. A store error
    /// that stopped the writer is returned here.
    pub async fn shutdown(self) -> Result<()> {
        let Library {
            writer,
            writer_task,
            pool,
            cancel,
            ingestion,
            rebuild_timer,
            ..
        } = self;

        cancel.cancel();
        let sources = match ingestion {
            Some(ingestion) => ingestion.stop().await,
            None => Ok(()),
        };
        let timer = match rebuild_timer {
            Some(timer) => timer.await.map_err(Error::from),
            None => Ok(()),
        };
        let drained = pool.drain().await;
        let stats = pool.stats();
        drop(pool);
        drop(writer);

        let written = writer_task.join().await;
        info!(
            stored = stats.stored,
            skipped = stats.skipped,
            failed = stats.failed,
            aborted = stats.aborted,
            "Library shut down"
        );
        written.and(sources).and(timer).and(drained)
    }
}
