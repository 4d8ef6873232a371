use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_ROOT: &str = "/srv/photos";

/// Runtime configuration of a [`crate::Library`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory that is scanned and watched.
    pub root: PathBuf,
    /// Store file.
    pub db_path: PathBuf,
    /// Log file written alongside stdout.
    pub log_path: PathBuf,
    /// Maximum number of files processed at once.
    pub pool_capacity: usize,
    /// Seconds between dedup-index rebuild requests.
    pub rebuild_interval_secs: u64,
    /// Capacity of the writer's mutation queue.
    pub mutation_queue: usize,
    /// Capacity of the filesystem event channel.
    pub watch_buffer: usize,
    pub capture_fallback: CaptureFallback,
    pub thumbnail: ThumbnailSettings,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            db_path: PathBuf::from("photoindex.db"),
            log_path: PathBuf::from("photoindex.log"),
            pool_capacity: 8,
            rebuild_interval_secs: 30,
            mutation_queue: 1024,
            watch_buffer: 1024,
            capture_fallback: CaptureFallback::default(),
            thumbnail: ThumbnailSettings::default(),
        }
    }
}

impl LibraryConfig {
    /// Read a TOML file; missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(Error::Config("pool_capacity must be at least 1".into()));
        }
        if self.mutation_queue == 0 || self.watch_buffer == 0 {
            return Err(Error::Config("queue sizes must be at least 1".into()));
        }
        if self.rebuild_interval_secs == 0 {
            return Err(Error::Config("rebuild_interval_secs must be at least 1".into()));
        }
        self.thumbnail.validate()
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_secs)
    }
}

/// Preview rendering parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThumbnailSettings {
    /// Bounding box edge; previews fit inside `max_dimension²`.
    pub max_dimension: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            max_dimension: 200,
            quality: 75,
        }
    }
}

impl ThumbnailSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(Error::Config("thumbnail.max_dimension must be at least 1".into()));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(Error::Config(format!(
                "thumbnail.quality must be within 1-100 (got {})",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Capture time used when a file carries no readable EXIF timestamp.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFallback {
    /// The Unix epoch; such assets sort to the end of newest-first listings.
    #[default]
    Epoch,
    /// The file's modification time, falling back to the epoch if unknown.
    Mtime,
}

impl CaptureFallback {
    pub fn resolve(self, modified: Option<std::time::SystemTime>) -> DateTime<Utc> {
        match (self, modified) {
            (CaptureFallback::Mtime, Some(mtime)) => DateTime::<Utc>::from(mtime),
            _ => DateTime::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = LibraryConfig::default();
        assert_eq!(cfg.pool_capacity, 8);
        assert_eq!(cfg.rebuild_interval(), Duration::from_secs(30));
        assert_eq!(cfg.thumbnail.max_dimension, 200);
        assert_eq!(cfg.thumbnail.quality, 75);
        assert_eq!(cfg.capture_fallback, CaptureFallback::Epoch);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("photoindex.toml");
        std::fs::write(
            &path,
            r#"
root = "/media/photos"
pool_capacity = 4
capture_fallback = "mtime"

[thumbnail]
quality = 90
"#,
        )
        .unwrap();

        let cfg = LibraryConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/media/photos"));
        assert_eq!(cfg.pool_capacity, 4);
        assert_eq!(cfg.capture_fallback, CaptureFallback::Mtime);
        assert_eq!(cfg.thumbnail.quality, 90);
        assert_eq!(cfg.thumbnail.max_dimension, 200);
        assert_eq!(cfg.rebuild_interval_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "pool_capacity = \"many\"").unwrap();
        assert!(matches!(
            LibraryConfig::from_toml_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity_and_bad_quality() {
        let mut cfg = LibraryConfig {
            pool_capacity: 0,
            ..LibraryConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.pool_capacity = 8;
        cfg.thumbnail.quality = 0;
        assert!(cfg.validate().is_err());

        cfg.thumbnail.quality = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_capture_fallback_resolution() {
        let mtime = std::time::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        assert_eq!(CaptureFallback::Epoch.resolve(Some(mtime)), DateTime::UNIX_EPOCH);
        assert_eq!(
            CaptureFallback::Mtime.resolve(Some(mtime)).timestamp(),
            1_600_000_000
        );
        assert_eq!(CaptureFallback::Mtime.resolve(None), DateTime::UNIX_EPOCH);
    }
}
