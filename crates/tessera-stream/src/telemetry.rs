//! Optional lifecycle telemetry.
//!
//! Components hold a [`Telemetry`] handle; without an attached sink, events
//! are never constructed. Telemetry is observational only and never feeds
//! back into scheduling decisions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::bridge::Detail;
use crate::tile::TileCoord;

/// Which tier the scene last placed a tile in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierState {
    Visible,
    Prebuild,
    Prefetch,
    Idle,
}

/// What a region currently holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Empty,
    Loading,
    Cached,
    Purged,
    Error,
}

/// One telemetry record.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    TaskStarted {
        tile: TileCoord,
        mode: Detail,
        ticket: u64,
    },
    TaskDone {
        tile: TileCoord,
        mode: Detail,
        ticket: u64,
        elapsed: Duration,
    },
    TaskAborted {
        tile: TileCoord,
        ticket: u64,
    },
    Cache {
        tile: TileCoord,
        state: CacheState,
    },
    Tier {
        tile: TileCoord,
        state: TierState,
    },
    /// The tile the viewer stood on at the last refresh.
    Anchor {
        tile: TileCoord,
    },
}

/// Receives telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Cheap clonable handle to an optional sink.
#[derive(Clone, Default)]
pub struct Telemetry {
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl Telemetry {
    /// A handle that drops everything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Records the event built by `event`, which only runs when a sink is
    /// attached.
    pub fn emit(&self, event: impl FnOnce() -> TelemetryEvent) {
        if let Some(sink) = &self.sink {
            sink.record(event());
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Per-tile state kept by [`DebugGrid`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugCell {
    pub tile: TileCoord,
    pub tier: TierState,
    pub cache: CacheState,
    /// Duration of the last image round trip, in milliseconds.
    pub prefetch_ms: Option<f64>,
    /// Duration of the last full round trip, in milliseconds.
    pub prebuild_ms: Option<f64>,
}

impl DebugCell {
    fn new(tile: TileCoord) -> Self {
        Self {
            tile,
            tier: TierState::Idle,
            cache: CacheState::Empty,
            prefetch_ms: None,
            prebuild_ms: None,
        }
    }
}

/// Serializable view of the grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GridSnapshot {
    pub anchor: Option<TileCoord>,
    pub cells: Vec<DebugCell>,
    pub tasks_started: u64,
    pub tasks_aborted: u64,
}

#[derive(Default)]
struct GridState {
    cells: BTreeMap<TileCoord, DebugCell>,
    anchor: Option<TileCoord>,
    tasks_started: u64,
    tasks_aborted: u64,
}

/// Telemetry sink that tracks tier, cache state and timing per tile.
#[derive(Default)]
pub struct DebugGrid {
    state: Mutex<GridState>,
}

impl DebugGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state of one tile.
    pub fn cell(&self, tile: TileCoord) -> Option<DebugCell> {
        let state = self.state.lock().ok()?;
        state.cells.get(&tile).cloned()
    }

    /// Copies the grid, cells ordered by tile.
    pub fn snapshot(&self) -> GridSnapshot {
        let Ok(state) = self.state.lock() else {
            return GridSnapshot::default();
        };
        GridSnapshot {
            anchor: state.anchor,
            cells: state.cells.values().cloned().collect(),
            tasks_started: state.tasks_started,
            tasks_aborted: state.tasks_aborted,
        }
    }
}

impl TelemetrySink for DebugGrid {
    fn record(&self, event: TelemetryEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event {
            TelemetryEvent::TaskStarted { .. } => state.tasks_started += 1,
            TelemetryEvent::TaskAborted { .. } => state.tasks_aborted += 1,
            TelemetryEvent::TaskDone {
                tile, mode, elapsed, ..
            } => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                let cell = state
                    .cells
                    .entry(tile)
                    .or_insert_with(|| DebugCell::new(tile));
                match mode {
                    Detail::Full => cell.prebuild_ms = Some(ms),
                    _ => cell.prefetch_ms = Some(ms),
                }
            }
            TelemetryEvent::Cache { tile, state: cache } => {
                state
                    .cells
                    .entry(tile)
                    .or_insert_with(|| DebugCell::new(tile))
                    .cache = cache;
            }
            TelemetryEvent::Tier { tile, state: tier } => {
                state
                    .cells
                    .entry(tile)
                    .or_insert_with(|| DebugCell::new(tile))
                    .tier = tier;
            }
            TelemetryEvent::Anchor { tile } => state.anchor = Some(tile),
        }
    }
}
