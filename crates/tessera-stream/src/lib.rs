//! Tile streaming core: decides which regions need which level of detail,
//! fetches them off the owner thread in priority order, bounds concurrent
//! work and cache size, and feeds ready regions into a fixed pool of GPU
//! slots.

pub mod bridge;
pub mod error;
pub mod frustum;
pub mod region;
pub mod scene;
pub mod scheduler;
pub mod slots;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod tile;
pub mod worker;

#[cfg(test)]
mod testing;

pub use bridge::{Detail, FetchPayload, FetchRequest, FetchResult, WorkerBridge};
pub use error::FetchError;
pub use frustum::{Aabb, Frustum};
pub use region::{BuildState, FetchContext, Level, Region};
pub use scene::{FrameStats, Scene};
pub use scheduler::{CancelToken, Scheduler, Settled, TaskContext, TaskHandle, TaskId};
pub use slots::{GpuSink, Slot, SlotPool, TextureId};
pub use source::{DirectorySource, HttpSource, SyntheticSource, TileSource, source_from_config};
pub use store::Store;
pub use telemetry::{
    CacheState, DebugCell, DebugGrid, GridSnapshot, Telemetry, TelemetryEvent, TelemetrySink,
    TierState,
};
pub use tile::{TileCoord, TileGrid};
pub use worker::{TilePipeline, WorkerPool};
