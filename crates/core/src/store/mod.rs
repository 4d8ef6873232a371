//! Bucket-scoped key-value adapter over an embedded SQLite file.
//!
//! Every bucket is an ordered map from byte keys to byte values. Work happens
//! inside closures that run in a single transaction: the closure's `Ok`
//! commits, its `Err` rolls back. There is exactly one [`StoreWriter`] per
//! opened store; readers borrow connections from a small read-only pool and
//! are isolated from the in-flight write transaction by WAL snapshots.

pub mod schema;

use std::ops::{ControlFlow, Deref};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_READERS: usize = 4;

/// Shared, read-only side of the store. Cheap to share behind an `Arc`.
pub struct Store {
    path: PathBuf,
    readers: Mutex<Vec<Connection>>,
}

/// The only handle allowed to mutate the store.
pub struct StoreWriter {
    conn: Connection,
}

impl Store {
    /// Open or create the store file, returning the shared reader side and
    /// the single writer.
    pub fn open(path: &Path) -> Result<(Self, StoreWriter)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::initialize(&conn)?;
        schema::migrate(&conn)?;

        let store = Self {
            path: path.to_path_buf(),
            readers: Mutex::new(Vec::new()),
        };
        Ok((store, StoreWriter { conn }))
    }

    /// Run `f` inside a read transaction on a pooled read-only connection.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = match self.checkout() {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        let out = {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let txn = ReadTxn { tx };
            let value = f(&txn)?;
            txn.tx.commit()?;
            value
        };
        self.checkin(conn);
        Ok(out)
    }

    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn checkout(&self) -> Option<Connection> {
        self.readers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self
            .readers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }
}

impl StoreWriter {
    /// Run `f` inside an exclusive write transaction.
    pub fn write<T>(&mut self, f: impl FnOnce(&WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let txn = WriteTxn {
            inner: ReadTxn { tx },
        };
        // Dropping an uncommitted transaction rolls it back.
        let value = f(&txn)?;
        txn.inner.tx.commit()?;
        Ok(value)
    }

    /// Reads against the writer's own connection, seeing its committed state.
    pub fn read<T>(&mut self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let txn = ReadTxn { tx };
        let value = f(&txn)?;
        txn.tx.commit()?;
        Ok(value)
    }
}

/// Bucket reads valid inside any transaction.
pub struct ReadTxn<'c> {
    tx: Transaction<'c>,
}

impl ReadTxn<'_> {
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .tx
            .prepare_cached("SELECT value FROM entries WHERE bucket = ?1 AND key = ?2")?
            .query_row(params![bucket, key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn contains(&self, bucket: &str, key: &[u8]) -> Result<bool> {
        let found: Option<i64> = self
            .tx
            .prepare_cached("SELECT 1 FROM entries WHERE bucket = ?1 AND key = ?2")?
            .query_row(params![bucket, key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Visit every entry of `bucket` in ascending key order until `f` breaks.
    pub fn for_each<F>(&self, bucket: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT key, value FROM entries WHERE bucket = ?1 ORDER BY key")?;
        let mut rows = stmt.query(params![bucket])?;
        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            if f(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn count(&self, bucket: &str) -> Result<u64> {
        let n: i64 = self
            .tx
            .prepare_cached("SELECT COUNT(*) FROM entries WHERE bucket = ?1")?
            .query_row(params![bucket], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Bucket writes; also derefs to [`ReadTxn`] for reads within the same
/// transaction.
pub struct WriteTxn<'c> {
    inner: ReadTxn<'c>,
}

impl<'c> Deref for WriteTxn<'c> {
    type Target = ReadTxn<'c>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl WriteTxn<'_> {
    pub fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner
            .tx
            .prepare_cached(
                "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![bucket, key, value])?;
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn delete(&self, bucket: &str, key: &[u8]) -> Result<bool> {
        let removed = self
            .inner
            .tx
            .prepare_cached("DELETE FROM entries WHERE bucket = ?1 AND key = ?2")?
            .execute(params![bucket, key])?;
        Ok(removed > 0)
    }

    /// Drop every entry in `bucket`, returning how many were removed.
    pub fn clear(&self, bucket: &str) -> Result<u64> {
        let removed = self
            .inner
            .tx
            .prepare_cached("DELETE FROM entries WHERE bucket = ?1")?
            .execute(params![bucket])?;
        Ok(removed as u64)
    }
}
