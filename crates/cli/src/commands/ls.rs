use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use photoindex_core::{Asset, Library, LibraryConfig, LookupKey};

use super::format_size;

pub async fn run(config: LibraryConfig, set: &str) -> Result<()> {
    let library = super::open(config)?;
    let rows = collect(&library, set);
    library.shutdown().await?;
    let rows = rows?;

    if rows.is_empty() {
        println!("No assets in set '{set}'. Run `photoindex scan` first.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Key"),
        Cell::new("Captured"),
        Cell::new("Preview"),
        Cell::new("Selected"),
        Cell::new("Path"),
    ]);

    for (asset, selected) in &rows {
        let selected_cell = if *selected {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(asset.lookup_key.as_str()),
            Cell::new(asset.captured_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(format_size(asset.thumbnail_size as u64)),
            selected_cell,
            Cell::new(asset.path.display()),
        ]);
    }

    println!();
    println!("  {set}");
    println!("  {}", "-".repeat(set.len()));
    println!("{table}");
    println!();
    println!("  {} assets", rows.len());
    println!();
    Ok(())
}

fn collect(library: &Library, set: &str) -> photoindex_core::Result<Vec<(Asset, bool)>> {
    let keys: Vec<LookupKey> = library.list_keys(set)?;
    keys.iter()
        .map(|key| {
            let asset = library.catalog().get_asset(key)?;
            let selected = library.catalog().get_selection(&asset.primary_key)?;
            Ok((asset, selected))
        })
        .collect()
}
