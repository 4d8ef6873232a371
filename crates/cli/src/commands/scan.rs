use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use photoindex_core::logging::init_logging;
use photoindex_core::pool::PoolStats;
use photoindex_core::{Library, LibraryConfig, RebuildOutcome};

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.green} {prefix:.dim} {msg}").unwrap()
}

fn done_style() -> ProgressStyle {
    ProgressStyle::with_template("  {prefix:.green} {msg:.dim}").unwrap()
}

fn progress_message(stats: &PoolStats) -> String {
    format!(
        "{} stored, {} skipped, {} failed ({} active)",
        stats.stored, stats.skipped, stats.failed, stats.active
    )
}

pub async fn run(config: LibraryConfig) -> Result<()> {
    init_logging(&config.log_path)?;
    let root = config.root.clone();
    let library = Library::open(config)?;

    println!();
    println!("  Scanning {}", root.display());
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_prefix("Indexing");
    pb.enable_steady_tick(Duration::from_millis(80));

    let summary = {
        let scan = library.scan();
        tokio::pin!(scan);
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                result = &mut scan => break result,
                _ = ticker.tick() => pb.set_message(progress_message(&library.pool_stats())),
            }
        }
    };
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            pb.finish_and_clear();
            library.shutdown().await?;
            return Err(e.into());
        }
    };

    let rebuilt = library.rebuild().await?;
    let stats = library.pool_stats();
    pb.set_style(done_style());
    pb.set_prefix("Done");
    pb.finish_with_message(progress_message(&stats));

    println!();
    println!("   Files found:   {:>8}", summary.discovered);
    println!("   Stored:        {:>8}", stats.stored);
    println!("   Skipped:       {:>8}", stats.skipped);
    println!("   Failed:        {:>8}", stats.failed);
    println!("   Peak workers:  {:>8}", stats.peak_active);
    match rebuilt {
        RebuildOutcome::Rebuilt { entries } => println!("   Dedup index:   {entries:>8} entries"),
        RebuildOutcome::Skipped => println!("   Dedup index:   unchanged"),
    }
    println!("   Catalog size:  {:>8}", library.asset_count()?);
    println!();

    library.shutdown().await?;
    Ok(())
}
