mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use photoindex_core::config::{CaptureFallback, LibraryConfig};

/// photoindex: photo catalog with live ingestion
///
/// Without a subcommand, behaves like `run`.
#[derive(Parser)]
#[command(name = "photoindex", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long, global = true, env = "PHOTOINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the catalog database
    #[arg(long, global = true, env = "PHOTOINDEX_DB")]
    db: Option<PathBuf>,

    /// Path to the log file
    #[arg(long, global = true, env = "PHOTOINDEX_LOG")]
    log: Option<PathBuf>,

    #[command(flatten)]
    ingest: IngestArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the root, then keep watching it until Ctrl-C
    Run(IngestArgs),
    /// Scan the root once, rebuild the dedup index and exit
    Scan(IngestArgs),
    /// Show catalog summary
    Status,
    /// List assets, newest first
    Ls {
        /// Set to list: all, selected, or a custom set name
        #[arg(long, default_value = "all")]
        set: String,
    },
    /// Select an asset, or unselect it with --off
    Select {
        /// Lookup key of the asset
        key: String,
        #[arg(long)]
        off: bool,
    },
    /// Write an asset's preview JPEG to a file
    Thumbnail {
        /// Lookup key of the asset
        key: String,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Write the originals of a set into a zip archive
    Export {
        /// Set to export: all, selected, or a custom set name
        #[arg(long, default_value = "all")]
        set: String,
        /// Archive to create
        #[arg(long, short)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Directory to catalog [default: config value, else /srv/photos]
    root: Option<PathBuf>,

    /// Maximum files processed concurrently
    #[arg(long)]
    capacity: Option<usize>,

    /// Seconds between dedup index rebuilds
    #[arg(long)]
    rebuild_interval: Option<u64>,

    /// Capture time for files without EXIF
    #[arg(long, value_enum)]
    capture_fallback: Option<FallbackArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FallbackArg {
    Epoch,
    Mtime,
}

impl From<FallbackArg> for CaptureFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Epoch => CaptureFallback::Epoch,
            FallbackArg::Mtime => CaptureFallback::Mtime,
        }
    }
}

fn load_config(cli: &Cli) -> Result<LibraryConfig> {
    let mut config = match &cli.config {
        Some(path) => LibraryConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LibraryConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(log) = &cli.log {
        config.log_path = log.clone();
    }
    Ok(config)
}

fn apply_ingest_args(config: &mut LibraryConfig, args: IngestArgs) {
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(capacity) = args.capacity {
        config.pool_capacity = capacity;
    }
    if let Some(secs) = args.rebuild_interval {
        config.rebuild_interval_secs = secs;
    }
    if let Some(fallback) = args.capture_fallback {
        config.capture_fallback = fallback.into();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        None => {
            apply_ingest_args(&mut config, cli.ingest);
            commands::run::run(config).await?
        }
        Some(Commands::Run(args)) => {
            apply_ingest_args(&mut config, args);
            commands::run::run(config).await?
        }
        Some(Commands::Scan(args)) => {
            apply_ingest_args(&mut config, args);
            commands::scan::run(config).await?
        }
        Some(Commands::Status) => commands::status::run(config).await?,
        Some(Commands::Ls { set }) => commands::ls::run(config, &set).await?,
        Some(Commands::Select { key, off }) => commands::select::run(config, &key, !off).await?,
        Some(Commands::Thumbnail { key, out }) => {
            commands::thumbnail::run(config, &key, &out).await?
        }
        Some(Commands::Export { set, out }) => commands::export::run(config, &set, &out).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_root_runs_with_that_root() {
        let cli = Cli::try_parse_from(["photoindex", "/some/dir", "--capacity", "3"]).unwrap();
        assert!(cli.command.is_none());

        let mut config = LibraryConfig::default();
        apply_ingest_args(&mut config, cli.ingest);
        assert_eq!(config.root, PathBuf::from("/some/dir"));
        assert_eq!(config.pool_capacity, 3);
    }

    #[test]
    fn test_subcommands_take_precedence_over_root() {
        let cli = Cli::try_parse_from(["photoindex", "scan", "/other"]).unwrap();
        match cli.command {
            Some(Commands::Scan(args)) => assert_eq!(args.root, Some(PathBuf::from("/other"))),
            _ => panic!("expected scan"),
        }

        let args = ["photoindex", "export", "--set", "trip", "-o", "trip.zip"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Some(Commands::Export { set, out }) => {
                assert_eq!(set, "trip");
                assert_eq!(out, PathBuf::from("trip.zip"));
            }
            _ => panic!("expected export"),
        }
    }
}
