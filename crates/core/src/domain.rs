use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{path_from_bytes, path_to_bytes, LookupKey, PrimaryKey};

/// A cataloged photo, as returned to query callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub lookup_key: LookupKey,
    pub primary_key: PrimaryKey,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub thumbnail_size: usize,
}

/// Value stored in the primary table, keyed by [`PrimaryKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssetRecord {
    pub lookup_key: String,
    pub path: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub thumbnail: Vec<u8>,
}

impl AssetRecord {
    pub fn new(
        lookup_key: &LookupKey,
        path: &std::path::Path,
        captured_at: DateTime<Utc>,
        thumbnail: Vec<u8>,
    ) -> Self {
        Self {
            lookup_key: lookup_key.as_str().to_string(),
            path: path_to_bytes(path),
            captured_at,
            thumbnail,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn path(&self) -> PathBuf {
        path_from_bytes(&self.path)
    }

    pub fn into_asset(self, primary_key: PrimaryKey) -> Result<Asset> {
        let lookup_key = LookupKey::parse(&self.lookup_key).map_err(|_| Error::CorruptRecord {
            bucket: "assets".to_string(),
            message: format!("bad lookup key {:?}", self.lookup_key),
        })?;
        Ok(Asset {
            lookup_key,
            primary_key,
            path: path_from_bytes(&self.path),
            captured_at: self.captured_at,
            thumbnail_size: self.thumbnail.len(),
        })
    }
}

/// Name of a logical grouping of assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetName {
    /// Every cataloged asset.
    All,
    /// Assets whose selection flag is set.
    Selected,
    /// A user-maintained set.
    Named(String),
}

impl SetName {
    pub const ALL: &'static str = "all";
    pub const SELECTED: &'static str = "selected";

    pub fn parse(name: &str) -> Self {
        match name {
            "" | Self::ALL => SetName::All,
            Self::SELECTED | "selections" => SetName::Selected,
            other => SetName::Named(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SetName::All => Self::ALL,
            SetName::Selected => Self::SELECTED,
            SetName::Named(name) => name,
        }
    }
}

impl fmt::Display for SetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one discovered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Queued for persistence.
    Stored,
    /// Already in the dedup index.
    Deduped,
    /// Not an image the pipeline handles.
    Ignored,
    /// Another task is already processing the same path.
    InFlight,
    /// Read or decode failed; logged and dropped.
    Failed,
    /// The catalog can no longer accept writes; ingestion was halted.
    Aborted,
}

/// Result of a rebuild request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Skipped,
    Rebuilt { entries: u64 },
}
