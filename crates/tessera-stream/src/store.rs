//! Registry of regions keyed by tile, with distance-based eviction.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::region::{FetchContext, Region};
use crate::tile::{TileCoord, TileGrid};

/// All regions currently known, at most one per tile.
///
/// The size settles at `capacity` through [`Store::prune`]; it may exceed it
/// while more regions than that are active.
pub struct Store {
    regions: FxHashMap<TileCoord, Region>,
    capacity: usize,
    grid: TileGrid,
}

impl Store {
    pub fn new(grid: TileGrid, capacity: usize) -> Self {
        Self {
            regions: FxHashMap::default(),
            capacity,
            grid,
        }
    }

    /// The region for `tile`, created on first use. Tiles outside the scope
    /// rectangle are never stored.
    pub fn ensure(&mut self, tile: TileCoord) -> Option<&mut Region> {
        if !self.grid.contains(tile) {
            return None;
        }
        Some(
            self.regions
                .entry(tile)
                .or_insert_with(|| Region::new(tile)),
        )
    }

    pub fn get(&self, tile: TileCoord) -> Option<&Region> {
        self.regions.get(&tile)
    }

    pub fn get_mut(&mut self, tile: TileCoord) -> Option<&mut Region> {
        self.regions.get_mut(&tile)
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        self.regions.contains_key(&tile)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.regions.keys().copied()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Applies settled results to every region. Returns how many changed.
    pub fn poll(&mut self, ctx: &mut FetchContext) -> usize {
        self.regions
            .values_mut()
            .map(|region| region.poll(ctx))
            .filter(|&changed| changed)
            .count()
    }

    /// Removes and disposes one region.
    pub fn remove(&mut self, tile: TileCoord, ctx: &mut FetchContext) -> bool {
        match self.regions.remove(&tile) {
            Some(mut region) => {
                region.dispose(ctx);
                true
            }
            None => false,
        }
    }

    /// Evicts regions outside `active`, furthest from `origin` first, until
    /// the store is at or under capacity. Returns the number evicted.
    pub fn prune(
        &mut self,
        active: &FxHashSet<TileCoord>,
        origin: TileCoord,
        ctx: &mut FetchContext,
    ) -> usize {
        if self.regions.len() <= self.capacity {
            return 0;
        }
        let mut candidates: Vec<TileCoord> = self
            .regions
            .keys()
            .filter(|tile| !active.contains(tile))
            .copied()
            .collect();
        candidates.sort_by(|a, b| {
            b.distance(origin)
                .total_cmp(&a.distance(origin))
                .then_with(|| a.cmp(b))
        });

        let excess = self.regions.len() - self.capacity;
        let mut evicted = 0;
        for tile in candidates.into_iter().take(excess) {
            if self.remove(tile, ctx) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.regions.len(), "store pruned");
        }
        evicted
    }
}
