use std::path::Path;

use anyhow::{Context, Result};
use photoindex_core::LibraryConfig;

use super::format_size;

pub async fn run(config: LibraryConfig, key: &str, out: &Path) -> Result<()> {
    let library = super::open(config)?;
    let thumbnail = library.get_thumbnail(key);
    library.shutdown().await?;
    let bytes = thumbnail?;

    std::fs::write(out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    println!(
        "Wrote {} ({}) to {}",
        key,
        format_size(bytes.len() as u64),
        out.display()
    );
    Ok(())
}
