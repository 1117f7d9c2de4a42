//! Configuration for the Tessera tile streamer.
//!
//! Settings persist to disk as RON files, accept CLI overrides via clap, and
//! tolerate missing or unknown fields so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, SourceArg};
pub use config::{
    Config, DebugConfig, RegionConfig, SceneConfig, SchedulerConfig, ScopeConfig, SlotConfig,
    SourceConfig, SourceKind, StoreConfig, WorkerConfig,
};
pub use error::ConfigError;
