//! Dense occupancy bitset for one region cube.
//!
//! One bit per voxel, packed into `u64` words. Voxel `(x, y, z)` lives at
//! linear index `x + (y + z * side) * side`.

/// A cube of `side³` solid/empty flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occupancy {
    /// Raw storage, 64 voxels per word.
    words: Vec<u64>,
    /// Edge length of the cube in voxels.
    side: usize,
}

impl Occupancy {
    /// Creates an all-empty cube with the given edge length.
    pub fn new(side: usize) -> Self {
        let len = side * side * side;
        Self {
            words: vec![0u64; len.div_ceil(64)],
            side,
        }
    }

    /// Edge length of the cube.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Total number of voxels (`side³`).
    pub fn volume(&self) -> usize {
        self.side * self.side * self.side
    }

    /// Linear index of `(x, y, z)`. Coordinates must be in `0..side`.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + (y + z * self.side) * self.side
    }

    /// Returns whether the voxel at `(x, y, z)` is solid.
    ///
    /// Each coordinate must be in `0..side`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> bool {
        debug_assert!(x < self.side && y < self.side && z < self.side);
        self.get_index(self.index(x, y, z))
    }

    /// Returns whether the voxel at a linear index is solid.
    #[inline]
    pub fn get_index(&self, index: usize) -> bool {
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Reads one voxel from signed coordinates: `1` if solid, `0` if empty or
    /// outside the cube.
    pub fn sample(&self, x: i64, y: i64, z: i64) -> u8 {
        let side = self.side as i64;
        if x < 0 || y < 0 || z < 0 || x >= side || y >= side || z >= side {
            return 0;
        }
        u8::from(self.get(x as usize, y as usize, z as usize))
    }

    /// Marks the voxel at `(x, y, z)` solid or empty.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, solid: bool) {
        debug_assert!(x < self.side && y < self.side && z < self.side);
        let index = self.index(x, y, z);
        self.set_index(index, solid);
    }

    /// Marks the voxel at a linear index solid or empty.
    #[inline]
    pub fn set_index(&mut self, index: usize, solid: bool) {
        let mask = 1u64 << (index % 64);
        if solid {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Number of solid voxels.
    pub fn count_solid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if no voxel is solid.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Approximate heap usage in bytes.
    pub fn byte_size(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }
}
