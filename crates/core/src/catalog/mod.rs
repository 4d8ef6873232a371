//! The asset catalog: primary table plus derived indices.
//!
//! Buckets:
//!
//! | bucket       | key           | value                      |
//! |--------------|---------------|----------------------------|
//! | `assets`     | primary key   | bincode [`AssetRecord`]    |
//! | `lookup`     | lookup key    | primary key                |
//! | `paths`      | path bytes    | primary key (dedup index)  |
//! | `set:<name>` | lookup key    | primary key                |
//! | `selections` | primary key   | `1`                        |
//!
//! Reads go through [`Catalog`] on independent read transactions. All
//! mutations are funnelled through [`writer::CatalogHandle`] to the single
//! writer task.

pub mod writer;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{Asset, AssetRecord, SetName};
use crate::error::{Error, Result};
use crate::keys::{path_from_bytes, path_to_bytes, LookupKey, PrimaryKey};
use crate::store::{ReadTxn, Store};

pub use writer::{CatalogHandle, CatalogWriter};

pub(crate) const ASSETS: &str = "assets";
pub(crate) const LOOKUP: &str = "lookup";
pub(crate) const PATHS: &str = "paths";
pub(crate) const SELECTIONS: &str = "selections";
pub(crate) const SELECTED_FLAG: &[u8] = &[1];

pub(crate) fn set_bucket(name: &str) -> String {
    format!("set:{name}")
}

/// Read side of the catalog. Cheap to clone.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<Store>,
}

impl Catalog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // ── Dedup ────────────────────────────────────────────────────────

    /// Whether `path` has already been cataloged.
    pub fn dedup_check(&self, path: &Path) -> Result<bool> {
        let key = path_to_bytes(path);
        self.store.read(|txn| txn.contains(PATHS, &key))
    }

    /// Snapshot of the dedup index in key order.
    pub fn dedup_entries(&self) -> Result<Vec<(PathBuf, PrimaryKey)>> {
        self.store.read(|txn| {
            let mut entries = Vec::new();
            txn.for_each(PATHS, |path, primary| {
                let primary = PrimaryKey::from_bytes(primary.to_vec())?;
                entries.push((path_from_bytes(path), primary));
                Ok(ControlFlow::Continue(()))
            })?;
            Ok(entries)
        })
    }

    // ── Assets ───────────────────────────────────────────────────────

    pub fn get_asset(&self, lookup: &LookupKey) -> Result<Asset> {
        self.store.read(|txn| {
            let (primary, record) = resolve(txn, lookup)?;
            record.into_asset(primary)
        })
    }

    pub fn get_thumbnail(&self, lookup: &LookupKey) -> Result<Vec<u8>> {
        self.store
            .read(|txn| resolve(txn, lookup).map(|(_, record)| record.thumbnail))
    }

    /// Location of the original file.
    pub fn asset_path(&self, lookup: &LookupKey) -> Result<PathBuf> {
        self.store.read(|txn| resolve(txn, lookup).map(|(_, record)| record.path()))
    }

    pub fn primary_key(&self, lookup: &LookupKey) -> Result<PrimaryKey> {
        self.store.read(|txn| resolve_primary(txn, lookup))
    }

    pub fn contains(&self, lookup: &LookupKey) -> Result<bool> {
        self.store.read(|txn| txn.contains(LOOKUP, lookup.as_bytes()))
    }

    /// Number of cataloged assets.
    pub fn asset_count(&self) -> Result<u64> {
        self.store.read(|txn| txn.count(LOOKUP))
    }

    // ── Sets and selections ──────────────────────────────────────────

    /// Members of `set`, most recently captured first.
    pub fn list_keys(&self, set: &SetName) -> Result<Vec<LookupKey>> {
        let membership = match set {
            SetName::Selected => None,
            other => Some(set_bucket(other.as_str())),
        };
        self.store.read(|txn| {
            let mut keys = Vec::new();
            txn.for_each(ASSETS, |primary, _| {
                let lookup = PrimaryKey::from_bytes(primary.to_vec())?.lookup_key();
                let member = match &membership {
                    Some(bucket) => txn.contains(bucket, lookup.as_bytes())?,
                    None => txn.contains(SELECTIONS, primary)?,
                };
                if member {
                    keys.push(lookup);
                }
                Ok(ControlFlow::Continue(()))
            })?;
            keys.reverse();
            Ok(keys)
        })
    }

    /// Unknown keys are unselected.
    pub fn get_selection(&self, primary: &PrimaryKey) -> Result<bool> {
        self.store
            .read(|txn| txn.contains(SELECTIONS, primary.as_bytes()))
    }
}

pub(crate) fn resolve_primary(txn: &ReadTxn<'_>, lookup: &LookupKey) -> Result<PrimaryKey> {
    let primary = txn
        .get(LOOKUP, lookup.as_bytes())?
        .ok_or_else(|| Error::NotFound(lookup.to_string()))?;
    PrimaryKey::from_bytes(primary)
}

fn resolve(txn: &ReadTxn<'_>, lookup: &LookupKey) -> Result<(PrimaryKey, AssetRecord)> {
    let primary = resolve_primary(txn, lookup)?;
    let raw = txn
        .get(ASSETS, primary.as_bytes())?
        .ok_or_else(|| Error::CorruptRecord {
            bucket: LOOKUP.to_string(),
            message: format!("{lookup} points at a missing asset"),
        })?;
    Ok((primary, AssetRecord::decode(&raw)?))
}
