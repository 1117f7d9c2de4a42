//! Tile coordinates and the mapping between tiles and world space.
//!
//! Tile `(i, j)` occupies the world-space column starting at
//! `((i - x0) * side, 0, (j - y0) * side)` and extending `side` voxels along
//! every axis, where `(x0, y0)` is the corner of the scope rectangle.

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tessera_config::ScopeConfig;

use crate::frustum::Aabb;

/// Integer grid position of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column.
    pub i: i32,
    /// Row.
    pub j: i32,
}

impl TileCoord {
    /// Creates a coordinate.
    pub const fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }

    /// The coordinate shifted by `(di, dj)`.
    pub const fn offset(self, di: i32, dj: i32) -> Self {
        Self::new(self.i + di, self.j + dj)
    }

    /// Euclidean grid distance.
    pub fn distance(self, other: TileCoord) -> f64 {
        let di = f64::from(self.i - other.i);
        let dj = f64::from(self.j - other.j);
        di.hypot(dj)
    }

    /// Chebyshev (ring) distance.
    pub fn chebyshev(self, other: TileCoord) -> i32 {
        (self.i - other.i).abs().max((self.j - other.j).abs())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.i, self.j)
    }
}

/// The scope rectangle together with the region edge length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    scope: ScopeConfig,
    side: usize,
}

impl TileGrid {
    pub fn new(scope: ScopeConfig, side: usize) -> Self {
        Self { scope, side }
    }

    pub fn scope(&self) -> &ScopeConfig {
        &self.scope
    }

    /// Region edge length in voxels.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Returns `true` if the tile lies inside the scope rectangle.
    pub fn contains(&self, tile: TileCoord) -> bool {
        self.scope.contains(tile.i, tile.j)
    }

    /// World-space origin of the tile.
    pub fn offset(&self, tile: TileCoord) -> Vec3 {
        let side = self.side as f32;
        Vec3::new(
            (tile.i - self.scope.x0) as f32 * side,
            0.0,
            (tile.j - self.scope.y0) as f32 * side,
        )
    }

    /// World-space bounds of the tile's voxel cube.
    pub fn bounds(&self, tile: TileCoord) -> Aabb {
        let min = self.offset(tile);
        Aabb::new(min, min + Vec3::splat(self.side as f32))
    }

    /// The tile containing a world-space position. May lie outside the scope.
    pub fn tile_at(&self, world: Vec3) -> TileCoord {
        let side = self.side as f32;
        TileCoord::new(
            self.scope.x0 + (world.x / side).floor() as i32,
            self.scope.y0 + (world.z / side).floor() as i32,
        )
    }

    /// The tile containing a world-space position and the voxel coordinate
    /// inside it.
    pub fn locate(&self, world: Vec3) -> (TileCoord, [i64; 3]) {
        let tile = self.tile_at(world);
        let side = self.side as i64;
        let local = [
            world.x.floor() as i64 - i64::from(tile.i - self.scope.x0) * side,
            world.y.floor() as i64,
            world.z.floor() as i64 - i64::from(tile.j - self.scope.y0) * side,
        ];
        (tile, local)
    }
}
