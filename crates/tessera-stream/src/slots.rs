//! Fixed pool of GPU-facing slots.
//!
//! Each slot binds at most one region and holds that region's atlas texture
//! and world offset. [`SlotPool::begin`] starts a pass for a new set of
//! regions; [`SlotPool::step`] then advances the pass under a time budget and
//! can be called again next frame until it reports completion.

use std::time::{Duration, Instant};

use glam::Vec3;
use tessera_mesh::{BoxInstance, MeshAccumulator};
use tessera_voxel::AtlasImage;

use crate::region::{BuildState, FetchContext, Region};
use crate::store::Store;
use crate::telemetry::{CacheState, Telemetry, TelemetryEvent};
use crate::tile::{TileCoord, TileGrid};

/// Opaque handle of an uploaded texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Receives GPU resource updates. Implemented by the renderer.
pub trait GpuSink {
    /// Uploads a slot's atlas texture.
    fn upload_atlas(&mut self, slot: usize, atlas: &AtlasImage) -> TextureId;
    /// Sets a slot's world offset uniform.
    fn set_offset(&mut self, slot: usize, offset: Vec3);
    /// Replaces the instance buffer.
    fn commit_instances(&mut self, instances: &[BoxInstance]);
}

/// One binding point.
#[derive(Clone, Debug, Default)]
pub struct Slot {
    index: usize,
    region: Option<TileCoord>,
    texture: Option<TextureId>,
    ready: bool,
}

impl Slot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn region(&self) -> Option<TileCoord> {
        self.region
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// The atlas and offset are uploaded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn unbind(&mut self) {
        self.region = None;
        self.texture = None;
        self.ready = false;
    }
}

pub struct SlotPool {
    slots: Vec<Slot>,
    pending: Vec<TileCoord>,
    budget: Duration,
    grid: TileGrid,
}

impl SlotPool {
    pub fn new(count: usize, budget: Duration, grid: TileGrid) -> Self {
        Self {
            slots: (0..count)
                .map(|index| Slot {
                    index,
                    ..Default::default()
                })
                .collect(),
            pending: Vec::new(),
            budget,
            grid,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Regions still waiting in the current pass.
    pub fn pending(&self) -> &[TileCoord] {
        &self.pending
    }

    /// The slot bound to `tile`, if any.
    pub fn slot_of(&self, tile: TileCoord) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.region == Some(tile))
    }

    /// Starts a pass for `next`. Slots bound to regions outside `next` are
    /// released; every region in `next` is queued and will be merged again.
    pub fn begin(&mut self, next: &[TileCoord], store: &mut Store, telemetry: &Telemetry) {
        for slot in &mut self.slots {
            let Some(tile) = slot.region else {
                continue;
            };
            if next.contains(&tile) {
                continue;
            }
            slot.unbind();
            if let Some(region) = store.get_mut(tile) {
                region.set_slot(None);
            }
            telemetry.emit(|| TelemetryEvent::Cache {
                tile,
                state: CacheState::Purged,
            });
        }

        self.pending = next.to_vec();
        for &tile in next {
            if let Some(region) = store.get_mut(tile) {
                region.reset_build();
            }
        }
    }

    /// Advances the pass until done or the budget runs out. Returns `true`
    /// once every queued region is uploaded and merged, or in terminal error.
    pub fn step(
        &mut self,
        store: &mut Store,
        ctx: &mut FetchContext,
        sink: &mut dyn GpuSink,
        acc: &mut MeshAccumulator,
    ) -> bool {
        let started = Instant::now();
        let queue = std::mem::take(&mut self.pending);
        let mut remaining = Vec::new();
        for tile in queue {
            if started.elapsed() >= self.budget {
                remaining.push(tile);
                continue;
            }
            let Some(region) = store.get_mut(tile) else {
                continue;
            };
            if !self.advance(region, started, ctx, sink, acc) {
                remaining.push(tile);
            }
        }
        self.pending = remaining;
        self.pending.is_empty()
    }

    fn advance(
        &mut self,
        region: &mut Region,
        started: Instant,
        ctx: &mut FetchContext,
        sink: &mut dyn GpuSink,
        acc: &mut MeshAccumulator,
    ) -> bool {
        if region.is_error() {
            return true;
        }
        let index = match region.slot() {
            Some(index) => index,
            None => {
                let Some(index) = self.slots.iter().position(|slot| slot.region.is_none()) else {
                    return false;
                };
                self.slots[index].region = Some(region.tile());
                region.set_slot(Some(index));
                index
            }
        };

        let offset = self.grid.offset(region.tile());
        if !self.slots[index].ready {
            let Some(atlas) = region.image(ctx) else {
                return false;
            };
            if started.elapsed() >= self.budget {
                return false;
            }
            let slot = &mut self.slots[index];
            slot.texture = Some(sink.upload_atlas(index, atlas));
            sink.set_offset(index, offset);
            slot.ready = true;
        }

        region.build(index as u32, offset, acc, ctx) != BuildState::Pending
    }
}
