//! Zip archives of a set's original files.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::catalog::Catalog;
use crate::domain::SetName;
use crate::error::Result;
use crate::keys::LookupKey;

/// Progress callback events for a set export.
pub enum ExportProgress {
    /// Starting export with the number of keys in the set.
    Start { total: usize },
    /// An original was added to the archive.
    Archived { path: PathBuf, entry: String },
    /// The original could not be opened, or the key no longer resolves.
    Missing { lookup: LookupKey },
    /// Export completed.
    Complete { archived: usize, missing: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub archived: usize,
    pub missing: usize,
    /// Uncompressed bytes copied into the archive.
    pub bytes: u64,
}

/// Write every original in `set` into a deflated zip on `out`, newest first.
///
/// Entries are named after the file; a name already used in the archive is
/// prefixed with the asset's lookup key.
pub fn export_set<W: Write + Seek>(
    catalog: &Catalog,
    set: &SetName,
    out: W,
    mut progress_cb: Option<&mut dyn FnMut(ExportProgress)>,
) -> Result<ExportSummary> {
    let keys = catalog.list_keys(set)?;
    if let Some(ref mut cb) = progress_cb {
        cb(ExportProgress::Start { total: keys.len() });
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut archive = ZipWriter::new(out);
    let mut names = HashSet::new();
    let mut summary = ExportSummary::default();

    for lookup in keys {
        let opened = catalog
            .asset_path(&lookup)
            .and_then(|path| Ok((File::open(&path)?, path)));
        let (mut file, path) = match opened {
            Ok(found) => found,
            Err(e) => {
                warn!("Leaving {lookup} out of the {set} archive: {e}");
                summary.missing += 1;
                if let Some(ref mut cb) = progress_cb {
                    cb(ExportProgress::Missing { lookup });
                }
                continue;
            }
        };

        let entry = entry_name(&path, &lookup, &names);
        archive.start_file(entry.as_str(), options)?;
        summary.bytes += std::io::copy(&mut file, &mut archive)?;
        summary.archived += 1;
        debug!("Archived {} as {entry}", path.display());
        names.insert(entry.clone());
        if let Some(ref mut cb) = progress_cb {
            cb(ExportProgress::Archived { path, entry });
        }
    }

    archive.finish()?.flush()?;
    if let Some(ref mut cb) = progress_cb {
        cb(ExportProgress::Complete {
            archived: summary.archived,
            missing: summary.missing,
        });
    }
    Ok(summary)
}

fn entry_name(path: &Path, lookup: &LookupKey, taken: &HashSet<String>) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| lookup.to_string());
    if taken.contains(&base) {
        format!("{lookup}-{base}")
    } else {
        base
    }
}
