use std::path::Path;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use photoindex_core::export::ExportProgress;
use photoindex_core::LibraryConfig;

use super::format_size;

pub async fn run(config: LibraryConfig, set: &str, out: &Path) -> Result<()> {
    let library = super::open(config)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    let exported = library.export_set(
        set,
        out,
        Some(&mut |progress| match progress {
            ExportProgress::Start { total } => {
                pb.set_length(total as u64);
                pb.set_position(0);
                pb.set_message(format!("Archiving {set}..."));
            }
            ExportProgress::Archived { entry, .. } => {
                pb.inc(1);
                pb.set_message(entry);
            }
            ExportProgress::Missing { .. } => {
                pb.inc(1);
            }
            ExportProgress::Complete { archived, missing } => {
                pb.finish_with_message(format!("{archived} archived, {missing} missing"));
            }
        }),
    );
    library.shutdown().await?;
    let summary = exported?;

    println!(
        "Wrote {} originals ({}) to {}",
        summary.archived,
        format_size(summary.bytes),
        out.display()
    );
    Ok(())
}
