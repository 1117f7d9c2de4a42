//! Double-buffered instance list shared by all slots.
//!
//! Regions merge their boxes into the staging buffer as their slots become
//! ready; [`MeshAccumulator::commit`] swaps staging into the committed buffer
//! that the GPU sink uploads. Until the next commit the previous frame's
//! instances stay on screen.

use glam::Vec3;

use crate::greedy::MeshBuffers;

/// One instanced box as laid out in the GPU instance buffer.
///
/// Layout (28 bytes total): world-space centre, extents, atlas slot index.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BoxInstance {
    /// Box centre in world space.
    pub position: [f32; 3],
    /// Box extents.
    pub scale: [f32; 3],
    /// Index of the slot whose atlas colours this box.
    pub atlas: u32,
}

static_assertions::assert_eq_size!(BoxInstance, [u8; 28]);

/// Staging and committed instance buffers.
#[derive(Debug, Default)]
pub struct MeshAccumulator {
    staging: Vec<BoxInstance>,
    committed: Vec<BoxInstance>,
    generation: u64,
}

impl MeshAccumulator {
    /// Creates empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a region's boxes, translated by the region's world offset and
    /// tagged with its slot index.
    pub fn merge(&mut self, mesh: &MeshBuffers, atlas: u32, offset: Vec3) {
        self.staging.reserve(mesh.count);
        for i in 0..mesh.count {
            let position = Vec3::from(mesh.position(i)) + offset;
            self.staging.push(BoxInstance {
                position: position.to_array(),
                scale: mesh.scale(i),
                atlas,
            });
        }
    }

    /// Drops everything merged since the last commit.
    pub fn reset(&mut self) {
        self.staging.clear();
    }

    /// Publishes the staging buffer.
    ///
    /// Returns `false` and keeps the previous buffer if nothing was merged.
    pub fn commit(&mut self) -> bool {
        if self.staging.is_empty() {
            return false;
        }
        std::mem::swap(&mut self.staging, &mut self.committed);
        self.staging.clear();
        self.generation += 1;
        true
    }

    /// Instances merged since the last commit.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// The committed instances.
    pub fn instances(&self) -> &[BoxInstance] {
        &self.committed
    }

    /// The committed instances as raw bytes for a GPU buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.committed)
    }

    /// Number of successful commits so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` once at least one commit has happened.
    pub fn is_ready(&self) -> bool {
        self.generation > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_box() -> MeshBuffers {
        let mut mesh = MeshBuffers::default();
        mesh.push_box([0, 0, 0], [2, 1, 1]);
        mesh
    }

    #[test]
    fn test_merge_applies_offset_and_slot() {
        let mut acc = MeshAccumulator::new();
        acc.merge(&one_box(), 5, Vec3::new(256.0, 0.0, 512.0));
        assert_eq!(acc.staged(), 1);
        assert!(acc.commit());
        let inst = acc.instances()[0];
        assert_eq!(inst.position, [257.0, 0.5, 512.5]);
        assert_eq!(inst.scale, [2.0, 1.0, 1.0]);
        assert_eq!(inst.atlas, 5);
    }

    #[test]
    fn test_empty_commit_keeps_previous_buffer() {
        let mut acc = MeshAccumulator::new();
        acc.merge(&one_box(), 0, Vec3::ZERO);
        acc.commit();
        assert!(!acc.commit());
        assert_eq!(acc.instances().len(), 1);
        assert_eq!(acc.generation(), 1);
    }

    #[test]
    fn test_reset_discards_staging_only() {
        let mut acc = MeshAccumulator::new();
        acc.merge(&one_box(), 0, Vec3::ZERO);
        acc.commit();
        acc.merge(&one_box(), 1, Vec3::ZERO);
        acc.reset();
        assert_eq!(acc.staged(), 0);
        assert_eq!(acc.instances().len(), 1);
    }

    #[test]
    fn test_bytes_match_instance_layout() {
        let mut acc = MeshAccumulator::new();
        acc.merge(&one_box(), 3, Vec3::ZERO);
        acc.merge(&one_box(), 4, Vec3::ZERO);
        acc.commit();
        assert_eq!(acc.as_bytes().len(), 2 * 28);
    }
}
