//! Voxel data for streamed regions: the occupancy bitset, the Morton atlas
//! layout, and decoding of atlas images.

pub mod atlas;
pub mod morton;
pub mod occupancy;

pub use atlas::{AtlasError, AtlasImage, atlas_side};
pub use occupancy::Occupancy;

/// Edge length of a streamed region in voxels.
pub const REGION: usize = 256;

/// Edge length of the atlas holding one [`REGION`]-sided cube.
pub const ATLAS_SIDE: u32 = 4096;
