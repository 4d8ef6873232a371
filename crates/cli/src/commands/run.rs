use anyhow::{anyhow, Result};
use photoindex_core::logging::init_logging;
use photoindex_core::{Library, LibraryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl-C, or for ingestion to halt on a catalog failure.
async fn until_stopped(halted: &CancellationToken) -> Result<()> {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Could not listen for Ctrl-C: {e}");
            }
            Ok(())
        }
        _ = halted.cancelled() => Err(anyhow!("ingestion halted after a catalog failure")),
    }
}

pub async fn run(config: LibraryConfig) -> Result<()> {
    init_logging(&config.log_path)?;
    let mut library = Library::open(config)?;
    library.start()?;
    let halted = library.halt_token();

    info!("Press Ctrl-C to stop");
    let waited: Result<()> = tokio::select! {
        stopped = until_stopped(&halted) => stopped,
        scanned = library.wait_for_scan() => match scanned {
            Ok(summary) => {
                info!(
                    discovered = summary.discovered,
                    "Initial scan complete, watching for new files"
                );
                until_stopped(&halted).await
            }
            Err(e) => Err(e.into()),
        },
    };

    info!("Shutting down");
    // A store failure that halted ingestion is reported here first.
    library.shutdown().await?;
    waited
}
