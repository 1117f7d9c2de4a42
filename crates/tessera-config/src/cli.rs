//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{Config, SourceKind};

/// Atlas backend selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// PNG files in a local directory.
    Directory,
    /// PNG files below an HTTP base URL.
    Http,
    /// Procedural terrain.
    Synthetic,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Directory => SourceKind::Directory,
            SourceArg::Http => SourceKind::Http,
            SourceArg::Synthetic => SourceKind::Synthetic,
        }
    }
}

/// Tessera command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Voxel terrain tile streamer")]
pub struct CliArgs {
    /// Atlas backend.
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// Directory path or base URL of the atlases.
    #[arg(long)]
    pub location: Option<String>,

    /// Maximum concurrent fetches.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Region cache capacity.
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Worker thread count (0 = automatic).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Record per-tile telemetry.
    #[arg(long)]
    pub telemetry: bool,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(source) = args.source {
            self.source.kind = source.into();
        }
        if let Some(ref location) = args.location {
            self.source.location = location.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.scheduler.concurrency = concurrency;
        }
        if let Some(capacity) = args.capacity {
            self.store.capacity = capacity;
        }
        if let Some(threads) = args.threads {
            self.workers.threads = threads;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if args.telemetry {
            self.debug.telemetry = true;
        }
    }
}
