//! Boundary between the owner thread and off-thread fetch work.

use serde::{Deserialize, Serialize};
use tessera_mesh::MeshBuffers;
use tessera_voxel::{AtlasImage, Occupancy};

use crate::error::FetchError;
use crate::scheduler::TaskContext;
use crate::tile::TileCoord;

/// Level of detail requested for a region.
///
/// `Image` is the atlas alone; `Full` adds the decoded occupancy and the
/// meshed boxes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Detail {
    None,
    Image,
    Full,
}

/// One round trip for one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub tile: TileCoord,
    pub mode: Detail,
}

/// Data produced by a successful round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPayload {
    pub bitmap: AtlasImage,
    pub occupancy: Option<Occupancy>,
    pub mesh: Option<MeshBuffers>,
    /// The detail this payload satisfies.
    pub mode: Detail,
}

pub type FetchResult = Result<FetchPayload, FetchError>;

/// Executes fetch, decode and (for `Full`) mesh work off the owner thread.
pub trait WorkerBridge: Send + Sync {
    /// Starts a round trip. The result must arrive through `ctx` exactly once
    /// unless the task is cancelled first.
    fn run(&self, request: FetchRequest, ctx: TaskContext<FetchResult>);

    /// Called by the owner thread every frame to deliver finished work,
    /// enforce timeouts and recover from crashed workers.
    fn poll(&self) {}
}
