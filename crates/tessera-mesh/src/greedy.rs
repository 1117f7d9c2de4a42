//! Greedy box merging: covers every solid voxel of an occupancy cube with
//! axis-aligned boxes, growing each box along X, then Y, then Z.
//!
//! The renderer draws one instanced unit cube per box, so fewer boxes means
//! fewer instances. The cover is exact: boxes never overlap and never include
//! an empty voxel.

use tessera_voxel::Occupancy;

/// Box instances produced for one region, in region-local voxel units.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBuffers {
    /// Box centres, three floats per box.
    pub positions: Vec<f32>,
    /// Box extents along X/Y/Z, three floats per box.
    pub scales: Vec<f32>,
    /// Number of boxes.
    pub count: usize,
}

impl MeshBuffers {
    /// Appends one box given its minimum corner and size.
    pub fn push_box(&mut self, min: [usize; 3], size: [usize; 3]) {
        for axis in 0..3 {
            self.positions
                .push(size[axis] as f32 * 0.5 + min[axis] as f32);
        }
        self.scales
            .extend(size.iter().map(|&s| s as f32));
        self.count += 1;
    }

    /// Centre of box `i`.
    pub fn position(&self, i: usize) -> [f32; 3] {
        [
            self.positions[i * 3],
            self.positions[i * 3 + 1],
            self.positions[i * 3 + 2],
        ]
    }

    /// Extents of box `i`.
    pub fn scale(&self, i: usize) -> [f32; 3] {
        [self.scales[i * 3], self.scales[i * 3 + 1], self.scales[i * 3 + 2]]
    }

    /// Approximate heap usage in bytes.
    pub fn byte_size(&self) -> usize {
        (self.positions.len() + self.scales.len()) * std::mem::size_of::<f32>()
    }
}

/// Turns an occupancy cube into box instances.
///
/// Implementations must be pure: the same cube always yields the same boxes.
pub trait MeshKernel: Send + Sync {
    /// Builds the box cover of `occupancy`.
    fn mesh(&self, occupancy: &Occupancy) -> MeshBuffers;
}

/// The default [`MeshKernel`]: greedy X→Y→Z box growth.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyBoxMesher;

impl MeshKernel for GreedyBoxMesher {
    fn mesh(&self, occupancy: &Occupancy) -> MeshBuffers {
        greedy_boxes(occupancy)
    }
}

/// Performs greedy box merging on an occupancy cube.
///
/// Scans voxels in linear order; each unvisited solid voxel seeds a box that
/// is extended along X while solid, then along Y while the whole row is
/// solid, then along Z while the whole slab is solid. Covered voxels are
/// cleared from a scratch copy so no voxel is emitted twice.
pub fn greedy_boxes(occupancy: &Occupancy) -> MeshBuffers {
    let mut mesh = MeshBuffers::default();
    let mut remaining = occupancy.clone();
    let size = occupancy.side();

    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                if !remaining.get(x, y, z) {
                    continue;
                }

                // Extend width along X.
                let mut w = 1;
                while x + w < size && remaining.get(x + w, y, z) {
                    w += 1;
                }

                // Extend height along Y.
                let mut h = 1;
                while y + h < size && (0..w).all(|dx| remaining.get(x + dx, y + h, z)) {
                    h += 1;
                }

                // Extend depth along Z.
                let mut d = 1;
                while z + d < size
                    && (0..h).all(|dy| (0..w).all(|dx| remaining.get(x + dx, y + dy, z + d)))
                {
                    d += 1;
                }

                // Mark visited.
                for dz in 0..d {
                    for dy in 0..h {
                        for dx in 0..w {
                            remaining.set(x + dx, y + dy, z + dz, false);
                        }
                    }
                }

                mesh.push_box([x, y, z], [w, h, d]);
            }
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_volume(mesh: &MeshBuffers) -> f32 {
        (0..mesh.count)
            .map(|i| {
                let s = mesh.scale(i);
                s[0] * s[1] * s[2]
            })
            .sum()
    }

    #[test]
    fn test_empty_cube_has_no_boxes() {
        let mesh = greedy_boxes(&Occupancy::new(8));
        assert_eq!(mesh.count, 0);
        assert!(mesh.positions.is_empty());
    }

    #[test]
    fn test_full_cube_is_one_box() {
        let mut occ = Occupancy::new(4);
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    occ.set(x, y, z, true);
                }
            }
        }
        let mesh = greedy_boxes(&occ);
        assert_eq!(mesh.count, 1);
        assert_eq!(mesh.position(0), [2.0, 2.0, 2.0]);
        assert_eq!(mesh.scale(0), [4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_single_voxel_box_is_centred() {
        let mut occ = Occupancy::new(4);
        occ.set(1, 2, 3, true);
        let mesh = greedy_boxes(&occ);
        assert_eq!(mesh.count, 1);
        assert_eq!(mesh.position(0), [1.5, 2.5, 3.5]);
        assert_eq!(mesh.scale(0), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_l_shape_covers_exactly() {
        let mut occ = Occupancy::new(4);
        occ.set(0, 0, 0, true);
        occ.set(1, 0, 0, true);
        occ.set(0, 1, 0, true);
        let mesh = greedy_boxes(&occ);
        assert_eq!(mesh.count, 2);
        assert_eq!(covered_volume(&mesh), 3.0);
    }

    #[test]
    fn test_terrain_slab_cover_matches_solid_count() {
        let mut occ = Occupancy::new(16);
        for z in 0..16 {
            for x in 0..16 {
                let height = 2 + (x * 3 + z) % 7;
                for y in 0..height {
                    occ.set(x, y, z, true);
                }
            }
        }
        let mesh = greedy_boxes(&occ);
        assert_eq!(covered_volume(&mesh) as usize, occ.count_solid());
        assert!(mesh.count < occ.count_solid());
    }

    #[test]
    fn test_kernel_trait_matches_free_function() {
        let mut occ = Occupancy::new(4);
        occ.set(2, 2, 2, true);
        assert_eq!(GreedyBoxMesher.mesh(&occ), greedy_boxes(&occ));
    }
}
