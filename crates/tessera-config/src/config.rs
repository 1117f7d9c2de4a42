//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level streaming configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Task scheduler ceilings.
    pub scheduler: SchedulerConfig,
    /// Per-region fetch and retry policy.
    pub region: RegionConfig,
    /// Region cache sizing.
    pub store: StoreConfig,
    /// GPU slot pool settings.
    pub slots: SlotConfig,
    /// LOD tier radii and refresh cadence.
    pub scene: SceneConfig,
    /// The tile rectangle that holds data.
    pub scope: ScopeConfig,
    /// Where atlases are fetched from.
    pub source: SourceConfig,
    /// Background worker pool.
    pub workers: WorkerConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Scheduler concurrency ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once, across both buckets.
    pub concurrency: usize,
    /// Maximum number of low-priority tasks running at once.
    pub low_concurrency: usize,
}

/// Region fetch policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegionConfig {
    /// Failed attempts before a region is marked as a permanent error.
    pub max_retries: u32,
    /// Cool-down after a failed attempt before the next request, in milliseconds.
    pub retry_cooldown_ms: u64,
    /// Timeout for one worker round trip, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Edge length of a region's voxel cube. Must be a power of four, at least 4.
    pub side: usize,
}

/// Region cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Soft upper bound on the number of cached regions.
    pub capacity: usize,
}

/// GPU slot pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlotConfig {
    /// Number of GPU binding slots (also the visible-tile cap).
    pub count: usize,
    /// Time budget for one upload pass, in milliseconds.
    pub upload_budget_ms: u64,
}

/// LOD tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneConfig {
    /// Interval between LOD recomputations, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Half-width of the tile window tested against the frustum.
    pub view_radius: i32,
    /// Tiles within this Chebyshev radius are built at full detail ahead of visibility.
    pub prebuild_radius: i32,
    /// Tiles within this Chebyshev radius have their image prefetched.
    pub prefetch_radius: i32,
}

/// Inclusive tile rectangle that holds data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Smallest tile column.
    pub x0: i32,
    /// Largest tile column.
    pub x1: i32,
    /// Smallest tile row.
    pub y0: i32,
    /// Largest tile row.
    pub y1: i32,
}

/// Which backend serves the atlas images.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    /// PNG files in a local directory.
    Directory,
    /// PNG files below an HTTP base URL.
    Http,
    /// Procedural terrain encoded in memory.
    Synthetic,
}

/// Atlas source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Backend kind.
    pub kind: SourceKind,
    /// Directory path or base URL, depending on `kind`.
    pub location: String,
    /// Zoom prefix of the atlas file names (`{zoom}_{i}_{j}.png`).
    pub zoom: u32,
    /// Seed for the synthetic source.
    pub seed: u64,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads; 0 picks a count from the available cores.
    pub threads: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Record per-tile telemetry in the debug grid.
    pub telemetry: bool,
}

// --- Default implementations ---

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            low_concurrency: 1,
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_cooldown_ms: 1500,
            fetch_timeout_ms: 8000,
            side: 256,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            count: 16,
            upload_budget_ms: 6,
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 100,
            view_radius: 8,
            prebuild_radius: 2,
            prefetch_radius: 4,
        }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            x0: 116358,
            x1: 116467,
            y0: 51619,
            y1: 51626,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            location: String::new(),
            zoom: 17,
            seed: 42,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 0 }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            telemetry: false,
        }
    }
}

impl RegionConfig {
    /// Cool-down after a failed attempt.
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }

    /// Timeout for one worker round trip.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl SlotConfig {
    /// Time budget for one upload pass.
    pub fn upload_budget(&self) -> Duration {
        Duration::from_millis(self.upload_budget_ms)
    }
}

impl SceneConfig {
    /// Interval between LOD recomputations.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl ScopeConfig {
    /// Returns `true` if tile `(i, j)` lies inside the rectangle.
    pub fn contains(&self, i: i32, j: i32) -> bool {
        i >= self.x0 && i <= self.x1 && j >= self.y0 && j <= self.y1
    }

    /// Number of tile columns.
    pub fn width(&self) -> i32 {
        self.x1 - self.x0 + 1
    }

    /// Number of tile rows.
    pub fn height(&self) -> i32 {
        self.y1 - self.y0 + 1
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Rejects values the streamer cannot run with. A region side must be a
    /// power of four no smaller than 4 so its atlas is square.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let side = self.region.side;
        if side < 4 || !side.is_power_of_two() || side.trailing_zeros() % 2 != 0 {
            return Err(ConfigError::Invalid {
                field: "region.side",
                reason: format!("{side} is not a power of four >= 4"),
            });
        }
        if self.scope.x1 < self.scope.x0 || self.scope.y1 < self.scope.y0 {
            return Err(ConfigError::Invalid {
                field: "scope",
                reason: "upper bound below lower bound".into(),
            });
        }
        Ok(())
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Default config directory (`<platform config dir>/tessera`).
    pub fn default_dir() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tessera"))
    }
}
