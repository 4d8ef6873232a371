use anyhow::Result;
use photoindex_core::{LibraryConfig, SetName};

use super::format_size;

pub async fn run(config: LibraryConfig) -> Result<()> {
    let db_path = config.db_path.clone();
    let root = config.root.clone();
    let library = super::open(config)?;
    let summary = collect(&library);
    library.shutdown().await?;
    let summary = summary?;

    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!();
    println!("  Photoindex Status");
    println!("  =================");
    println!();
    println!(
        "   Assets:      {:>8}        Catalog:  {}",
        summary.assets,
        db_path.display()
    );
    println!(
        "   Selected:    {:>8}        Size:     {}",
        summary.selected,
        format_size(db_size)
    );
    println!(
        "   Dedup index: {:>8}        Root:     {}",
        summary.dedup_entries,
        root.display()
    );
    println!();
    println!("  Run 'photoindex ls' to list assets.");
    println!();
    Ok(())
}

struct Summary {
    assets: u64,
    selected: usize,
    dedup_entries: usize,
}

fn collect(library: &photoindex_core::Library) -> photoindex_core::Result<Summary> {
    Ok(Summary {
        assets: library.asset_count()?,
        selected: library.catalog().list_keys(&SetName::Selected)?.len(),
        dedup_entries: library.catalog().dedup_entries()?.len(),
    })
}
