//! Per-frame coordination of regions, store and slots.
//!
//! Every refresh interval the scene sorts the tiles around the viewer into
//! tiers and tunes their regions:
//!
//! | tier     | selection                                   | detail | priority |
//! |----------|---------------------------------------------|--------|----------|
//! | visible  | in the frustum, nearest first, ≤ slot count | full   | 3        |
//! | prebuild | within `prebuild_radius` rings              | full   | 2        |
//! | prefetch | within `prefetch_radius` rings              | image  | 1        |
//! | dropped  | everything else in the store                | none   | -1       |
//!
//! A tile lands in the first tier that selects it. Visible tiles then go
//! through the slot pool, and once every one of them is merged the
//! accumulated instances are committed to the GPU sink.

use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashSet;
use tessera_config::{Config, SceneConfig};
use tessera_mesh::MeshAccumulator;

use crate::bridge::{Detail, WorkerBridge};
use crate::frustum::Frustum;
use crate::region::FetchContext;
use crate::slots::{GpuSink, SlotPool};
use crate::store::Store;
use crate::telemetry::{Telemetry, TelemetryEvent, TierState};
use crate::tile::{TileCoord, TileGrid};

const VISIBLE_PRIORITY: i32 = 3;
const PREBUILD_PRIORITY: i32 = 2;
const PREFETCH_PRIORITY: i32 = 1;
const DROPPED_PRIORITY: i32 = -1;

/// Counters from one [`Scene::frame`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Regions whose state changed from settled results.
    pub applied: usize,
    /// A refresh ran this frame.
    pub refreshed: bool,
    /// The instance buffer was committed this frame.
    pub committed: bool,
}

pub struct Scene {
    fetch: FetchContext,
    store: Store,
    slots: SlotPool,
    acc: MeshAccumulator,
    grid: TileGrid,
    config: SceneConfig,
    telemetry: Telemetry,
    last_refresh: Option<Instant>,
    visible: Vec<TileCoord>,
    active: FxHashSet<TileCoord>,
    pass_done: bool,
}

impl Scene {
    pub fn new(config: &Config, bridge: Arc<dyn WorkerBridge>, telemetry: Telemetry) -> Self {
        let grid = TileGrid::new(config.scope, config.region.side);
        Self {
            fetch: FetchContext::new(&config.scheduler, &config.region, bridge, telemetry.clone()),
            store: Store::new(grid, config.store.capacity),
            slots: SlotPool::new(config.slots.count, config.slots.upload_budget(), grid),
            acc: MeshAccumulator::new(),
            grid,
            config: config.scene.clone(),
            telemetry,
            last_refresh: None,
            visible: Vec::new(),
            active: FxHashSet::default(),
            pass_done: true,
        }
    }

    /// Recomputes tiers around the viewer and tunes every affected region.
    pub fn refresh(&mut self, eye: Vec3, view_proj: Mat4) {
        let center = self.grid.tile_at(eye);
        let frustum = Frustum::from_view_projection(&view_proj);
        self.telemetry
            .emit(|| TelemetryEvent::Anchor { tile: center });

        let r = self.config.view_radius;
        let mut visible: Vec<TileCoord> = window(center, r)
            .filter(|&tile| self.grid.contains(tile))
            .filter(|&tile| frustum.is_visible(&self.grid.bounds(tile)))
            .collect();
        visible.sort_by(|a, b| a.distance(center).total_cmp(&b.distance(center)));
        visible.truncate(self.slots.len());

        let mut tiers: Vec<(TileCoord, TierState)> = Vec::new();
        let mut active = FxHashSet::default();
        for &tile in &visible {
            active.insert(tile);
            tiers.push((tile, TierState::Visible));
        }
        for (radius, tier) in [
            (self.config.prebuild_radius, TierState::Prebuild),
            (self.config.prefetch_radius, TierState::Prefetch),
        ] {
            let mut ring: Vec<TileCoord> = window(center, radius)
                .filter(|&tile| self.grid.contains(tile) && !active.contains(&tile))
                .collect();
            ring.sort_by(|a, b| a.distance(center).total_cmp(&b.distance(center)));
            for tile in ring {
                active.insert(tile);
                tiers.push((tile, tier));
            }
        }

        for &(tile, tier) in &tiers {
            let (mode, priority) = match tier {
                TierState::Visible => (Detail::Full, VISIBLE_PRIORITY),
                TierState::Prebuild => (Detail::Full, PREBUILD_PRIORITY),
                _ => (Detail::Image, PREFETCH_PRIORITY),
            };
            if let Some(region) = self.store.ensure(tile) {
                region.tune(mode, priority, &mut self.fetch);
            }
            self.telemetry
                .emit(|| TelemetryEvent::Tier { tile, state: tier });
        }

        let dropped: Vec<TileCoord> = self
            .store
            .tiles()
            .filter(|tile| !active.contains(tile))
            .collect();
        for tile in dropped {
            let Some(region) = self.store.get_mut(tile) else {
                continue;
            };
            region.tune(Detail::None, DROPPED_PRIORITY, &mut self.fetch);
            let empty = region.is_empty();
            if self.active.contains(&tile) {
                self.telemetry.emit(|| TelemetryEvent::Tier {
                    tile,
                    state: TierState::Idle,
                });
            }
            if empty {
                self.store.remove(tile, &mut self.fetch);
            }
        }
        self.store.prune(&active, center, &mut self.fetch);

        tracing::debug!(
            %center,
            visible = visible.len(),
            active = active.len(),
            stored = self.store.len(),
            "scene refreshed"
        );
        self.visible = visible;
        self.active = active;
    }

    /// Runs one frame: applies finished work, refreshes tiers when the
    /// interval has passed and no slot pass is running, advances the slot
    /// pass, and commits the merged instances once the pass is complete.
    pub fn frame(
        &mut self,
        now: Instant,
        eye: Vec3,
        view_proj: Mat4,
        sink: &mut dyn GpuSink,
    ) -> FrameStats {
        let mut stats = FrameStats::default();
        self.fetch.pump();
        stats.applied = self.store.poll(&mut self.fetch);

        // A pass in progress keeps its visible set until it commits.
        let due = self.pass_done
            && self.last_refresh.is_none_or(|last| {
                now.saturating_duration_since(last) >= self.config.refresh_interval()
            });
        if due {
            self.refresh(eye, view_proj);
            self.acc.reset();
            self.slots
                .begin(&self.visible, &mut self.store, &self.telemetry);
            self.last_refresh = Some(now);
            self.pass_done = false;
            stats.refreshed = true;
        }

        if !self.pass_done {
            self.pass_done = self
                .slots
                .step(&mut self.store, &mut self.fetch, sink, &mut self.acc);
            if self.pass_done && self.acc.commit() {
                sink.commit_instances(self.acc.instances());
                stats.committed = true;
            }
        }
        stats
    }

    /// Occupancy at a world position; 0 outside the scope or while the
    /// region has no occupancy loaded.
    pub fn pick(&mut self, world: Vec3) -> u8 {
        let (tile, [x, y, z]) = self.grid.locate(world);
        if !self.grid.contains(tile) {
            return 0;
        }
        let side = self.grid.side();
        match self.store.get_mut(tile) {
            Some(region) => region.pick(x, y, z, side, &mut self.fetch),
            None => 0,
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    pub fn fetch(&self) -> &FetchContext {
        &self.fetch
    }

    pub fn accumulator(&self) -> &MeshAccumulator {
        &self.acc
    }

    /// Visible tiles from the last refresh, nearest first.
    pub fn visible(&self) -> &[TileCoord] {
        &self.visible
    }

    /// Every tile in some tier at the last refresh.
    pub fn active(&self) -> &FxHashSet<TileCoord> {
        &self.active
    }
}

/// Tiles within Chebyshev distance `radius` of `center`, row by row.
fn window(center: TileCoord, radius: i32) -> impl Iterator<Item = TileCoord> {
    (-radius..=radius).flat_map(move |dj| (-radius..=radius).map(move |di| center.offset(di, dj)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Level;
    use crate::telemetry::{DebugGrid, TelemetrySink};
    use crate::testing::{Reply, ScriptedBridge};
    use std::time::Duration;
    use tessera_config::ScopeConfig;
    use tessera_mesh::BoxInstance;
    use tessera_voxel::AtlasImage;

    use crate::slots::TextureId;

    const SIDE: usize = 16;

    #[derive(Default)]
    struct RecordingSink {
        uploads: usize,
        commits: Vec<usize>,
    }

    impl GpuSink for RecordingSink {
        fn upload_atlas(&mut self, _slot: usize, _atlas: &AtlasImage) -> TextureId {
            self.uploads += 1;
            TextureId(self.uploads as u64)
        }

        fn set_offset(&mut self, _slot: usize, _offset: Vec3) {}

        fn commit_instances(&mut self, instances: &[BoxInstance]) {
            self.commits.push(instances.len());
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.scope = ScopeConfig {
            x0: 100,
            x1: 119,
            y0: 200,
            y1: 219,
        };
        config.region.side = SIDE;
        config.region.retry_cooldown_ms = 0;
        config.slots.count = 4;
        config.slots.upload_budget_ms = 1000;
        config.store.capacity = 32;
        config.scene.view_radius = 4;
        config.scene.prebuild_radius = 1;
        config.scene.prefetch_radius = 2;
        config
    }

    /// Viewer hovering above the given tile, looking down the +Z axis.
    fn camera(scene: &Scene, tile: TileCoord) -> (Vec3, Mat4) {
        let eye = scene.grid().offset(tile) + Vec3::new(8.0, 24.0, 8.0);
        let view = Mat4::look_to_rh(eye, Vec3::new(0.0, -0.5, 1.0).normalize(), Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 200.0);
        (eye, proj * view)
    }

    fn scene(reply: Reply) -> (Scene, Arc<ScriptedBridge>) {
        let bridge = ScriptedBridge::new(SIDE, reply);
        let scene = Scene::new(&config(), bridge.clone(), Telemetry::none());
        (scene, bridge)
    }

    #[test]
    fn test_tiers_are_exclusive_and_prioritised() {
        let (mut scene, _bridge) = scene(Reply::Hold);
        let center = TileCoord::new(110, 210);
        let (eye, vp) = camera(&scene, center);
        scene.refresh(eye, vp);

        let visible = scene.visible().to_vec();
        assert!(!visible.is_empty());
        assert!(visible.len() <= 4);
        // Prefetch ring of radius 2 plus anything visible beyond it.
        assert!(scene.active().len() >= 25);
        let unique: FxHashSet<TileCoord> = visible.iter().copied().collect();
        assert_eq!(unique.len(), visible.len());

        for tile in &visible {
            let region = scene.store().get(*tile).unwrap();
            assert_eq!(region.in_flight(), Some(Detail::Full));
            let task = region.in_flight_task().unwrap();
            assert_eq!(scene.fetch().scheduler().priority(task), Some(3));
        }
        let far = center.offset(2, -2);
        if !visible.contains(&far) {
            let region = scene.store().get(far).unwrap();
            assert_eq!(region.in_flight(), Some(Detail::Image));
        }
    }

    #[test]
    fn test_visible_sorted_by_distance() {
        let (mut scene, _bridge) = scene(Reply::Hold);
        let center = TileCoord::new(110, 210);
        let (eye, vp) = camera(&scene, center);
        scene.refresh(eye, vp);
        let d: Vec<f64> = scene
            .visible()
            .iter()
            .map(|t| t.distance(center))
            .collect();
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_out_of_scope_tiles_never_stored() {
        let (mut scene, _bridge) = scene(Reply::Hold);
        let corner = TileCoord::new(100, 200);
        let (eye, vp) = camera(&scene, corner);
        scene.refresh(eye, vp);
        let scope = *scene.grid().scope();
        assert!(
            scene
                .store()
                .tiles()
                .all(|tile| scope.contains(tile.i, tile.j))
        );
        assert!(scene.store().len() < 25);
    }

    #[test]
    fn test_moving_away_drops_and_prunes() {
        let (mut scene, bridge) = scene(Reply::Hold);
        let start = TileCoord::new(103, 203);
        let (eye, vp) = camera(&scene, start);
        scene.refresh(eye, vp);
        assert!(scene.store().contains(start));

        let end = TileCoord::new(115, 215);
        let (eye, vp) = camera(&scene, end);
        scene.refresh(eye, vp);
        // Nothing landed, so the old regions were empty and disposed.
        assert!(!scene.store().contains(start));
        assert!(scene.store().len() <= 32);
        assert!(bridge.run_count() > 0);
    }

    #[test]
    fn test_cached_regions_survive_until_pruned() {
        let (mut scene, _bridge) = scene(Reply::Succeed);
        let mut sink = RecordingSink::default();
        let start = TileCoord::new(103, 203);
        let (eye, vp) = camera(&scene, start);
        let t0 = Instant::now();
        for k in 0..20 {
            scene.frame(t0 + Duration::from_millis(k), eye, vp, &mut sink);
        }
        assert_eq!(scene.store().get(start).unwrap().level(), Level::Full);

        let (eye, vp) = camera(&scene, start.offset(3, 0));
        scene.refresh(eye, vp);
        let region = scene.store().get(start).unwrap();
        assert!(region.in_flight().is_none());
        assert!(region.bitmap().is_some());
        assert!(scene.store().len() <= 32);
    }

    #[test]
    fn test_frames_commit_once_visible_tiles_merge() {
        let (mut scene, _bridge) = scene(Reply::Succeed);
        let mut sink = RecordingSink::default();
        let (eye, vp) = camera(&scene, TileCoord::new(110, 210));
        let t0 = Instant::now();

        let first = scene.frame(t0, eye, vp, &mut sink);
        assert!(first.refreshed);
        let mut committed = false;
        for k in 1..50 {
            let stats = scene.frame(t0 + Duration::from_millis(k), eye, vp, &mut sink);
            assert!(!stats.refreshed);
            if stats.committed {
                committed = true;
                break;
            }
        }
        assert!(committed);
        assert_eq!(sink.uploads, scene.visible().len());
        assert!(sink.commits[0] > 0);
        assert!(scene.accumulator().is_ready());

        let later = scene.frame(t0 + Duration::from_millis(150), eye, vp, &mut sink);
        assert!(later.refreshed);
    }

    #[test]
    fn test_moving_viewer_still_commits() {
        let (mut scene, bridge) = scene(Reply::Hold);
        let mut sink = RecordingSink::default();
        let start = TileCoord::new(103, 210);
        let t0 = Instant::now();
        let mut refreshes = 0;
        let mut commits = 0;
        for k in 0..12 {
            let (eye, vp) = camera(&scene, start.offset(k, 0));
            let stats = scene.frame(
                t0 + Duration::from_millis(100 * k as u64),
                eye,
                vp,
                &mut sink,
            );
            refreshes += stats.refreshed as usize;
            commits += stats.committed as usize;
            bridge.release_all();
        }
        assert!(commits > 0);
        assert!(!sink.commits.is_empty());
        // Refreshes wait for the running pass, so they never outnumber
        // commits by more than the pass still open.
        assert!(refreshes <= commits + 1);
    }

    #[test]
    fn test_refresh_waits_for_running_pass() {
        let (mut scene, bridge) = scene(Reply::Hold);
        let mut sink = RecordingSink::default();
        let (eye, vp) = camera(&scene, TileCoord::new(110, 210));
        let t0 = Instant::now();
        assert!(scene.frame(t0, eye, vp, &mut sink).refreshed);
        let visible = scene.visible().to_vec();

        let (eye, vp) = camera(&scene, TileCoord::new(112, 210));
        let stalled = scene.frame(t0 + Duration::from_millis(500), eye, vp, &mut sink);
        assert!(!stalled.refreshed);
        assert_eq!(scene.visible(), visible.as_slice());

        bridge.release_all();
        let mut committed = false;
        for k in 0..5 {
            let stats = scene.frame(t0 + Duration::from_millis(600 + k), eye, vp, &mut sink);
            if stats.committed {
                committed = true;
                break;
            }
            bridge.release_all();
        }
        assert!(committed);
        let next = scene.frame(t0 + Duration::from_millis(800), eye, vp, &mut sink);
        assert!(next.refreshed);
    }

    #[test]
    fn test_slot_bindings_match_visible_set() {
        let (mut scene, _bridge) = scene(Reply::Succeed);
        let mut sink = RecordingSink::default();
        let (eye, vp) = camera(&scene, TileCoord::new(110, 210));
        let t0 = Instant::now();
        for k in 0..30 {
            scene.frame(t0 + Duration::from_millis(k), eye, vp, &mut sink);
        }
        for slot in scene.slots().slots() {
            if let Some(tile) = slot.region() {
                assert!(scene.visible().contains(&tile));
                assert_eq!(scene.store().get(tile).unwrap().slot(), Some(slot.index()));
            }
        }
    }

    #[test]
    fn test_failing_tiles_become_gaps() {
        let (mut scene, bridge) = scene(Reply::Fail);
        let mut sink = RecordingSink::default();
        let (eye, vp) = camera(&scene, TileCoord::new(110, 210));
        let t0 = Instant::now();
        for k in 0..40 {
            scene.frame(t0 + Duration::from_millis(k * 100), eye, vp, &mut sink);
        }
        let runs = bridge.run_count();
        assert!(scene.store().regions().all(|r| r.is_error()));
        scene.frame(t0 + Duration::from_secs(10), eye, vp, &mut sink);
        assert_eq!(bridge.run_count(), runs);
        assert!(sink.commits.is_empty());
    }

    #[test]
    fn test_pick_world_position() {
        let (mut scene, _bridge) = scene(Reply::Succeed);
        let tile = TileCoord::new(110, 210);
        let origin = scene.grid().offset(tile);

        assert_eq!(scene.pick(origin + Vec3::new(1.5, 2.5, 3.5)), 0);
        assert_eq!(scene.pick(Vec3::new(-5.0, 0.0, 0.0)), 0);

        let mut sink = RecordingSink::default();
        let (eye, vp) = camera(&scene, tile);
        let t0 = Instant::now();
        for k in 0..20 {
            scene.frame(t0 + Duration::from_millis(k), eye, vp, &mut sink);
        }
        assert_eq!(scene.store().get(tile).unwrap().level(), Level::Full);
        assert_eq!(scene.pick(origin + Vec3::new(1.5, 2.5, 3.5)), 1);
        assert_eq!(scene.pick(origin + Vec3::new(1.5, 1.5, 3.5)), 0);
        assert_eq!(scene.pick(origin + Vec3::new(4.0, 0.2, 9.0)), 1);
        assert_eq!(scene.pick(origin + Vec3::new(4.0, -1.0, 9.0)), 0);
    }

    #[test]
    fn test_debug_grid_records_tiers() {
        let bridge = ScriptedBridge::new(SIDE, Reply::Hold);
        let grid = Arc::new(DebugGrid::new());
        let sink: Arc<dyn TelemetrySink> = grid.clone();
        let mut scene = Scene::new(&config(), bridge, Telemetry::new(sink));
        let center = TileCoord::new(110, 210);
        let (eye, vp) = camera(&scene, center);
        scene.refresh(eye, vp);

        let snapshot = grid.snapshot();
        assert_eq!(snapshot.anchor, Some(center));
        let prefetch = snapshot
            .cells
            .iter()
            .filter(|c| c.tier == TierState::Prefetch)
            .count();
        assert!(prefetch > 0);
        for tile in scene.visible() {
            assert_eq!(grid.cell(*tile).unwrap().tier, TierState::Visible);
        }
    }
}
