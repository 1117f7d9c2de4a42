//! Per-tile level-of-detail state machine.
//!
//! A region escalates `None -> Image -> Full` as payloads arrive, or drops
//! into the terminal `Error` state after too many failed round trips. It owns
//! at most one in-flight request at a time; every request gets a fresh ticket
//! and only the result carrying the current ticket is applied.

use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use tessera_config::{RegionConfig, SchedulerConfig};
use tessera_mesh::{MeshAccumulator, MeshBuffers};
use tessera_voxel::{AtlasImage, Occupancy};

use crate::bridge::{Detail, FetchPayload, FetchRequest, FetchResult, WorkerBridge};
use crate::error::FetchError;
use crate::scheduler::{Scheduler, Settled, TaskHandle, TaskId};
use crate::telemetry::{CacheState, Telemetry, TelemetryEvent};
use crate::tile::TileCoord;

/// What a region has reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    None,
    Image,
    Full,
    /// Terminal; no further requests are made.
    Error,
}

impl From<Detail> for Level {
    fn from(detail: Detail) -> Self {
        match detail {
            Detail::None => Level::None,
            Detail::Image => Level::Image,
            Detail::Full => Level::Full,
        }
    }
}

/// Outcome of [`Region::build`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// The mesh is in the accumulator.
    Merged,
    /// No mesh cached yet.
    Pending,
    /// The region is in terminal error; skip it.
    Failed,
}

/// Everything a region needs to issue requests: the scheduler, the bridge
/// that executes round trips, telemetry, and the retry policy.
pub struct FetchContext {
    scheduler: Scheduler<FetchResult>,
    bridge: Arc<dyn WorkerBridge>,
    telemetry: Telemetry,
    policy: RegionConfig,
}

impl FetchContext {
    pub fn new(
        scheduler: &SchedulerConfig,
        policy: &RegionConfig,
        bridge: Arc<dyn WorkerBridge>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(scheduler),
            bridge,
            telemetry,
            policy: policy.clone(),
        }
    }

    /// Lets the bridge deliver results, then settles and launches tasks.
    pub fn pump(&mut self) -> usize {
        self.bridge.poll();
        self.scheduler.pump()
    }

    pub fn scheduler(&self) -> &Scheduler<FetchResult> {
        &self.scheduler
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn policy(&self) -> &RegionConfig {
        &self.policy
    }

    fn request(&mut self, request: FetchRequest, priority: i32) -> TaskHandle<FetchResult> {
        let bridge = Arc::clone(&self.bridge);
        let tag = format!("{}:{:?}", request.tile, request.mode);
        self.scheduler
            .schedule(Box::new(move |ctx| bridge.run(request, ctx)), priority, tag)
    }
}

struct InFlight {
    ticket: u64,
    mode: Detail,
    handle: TaskHandle<FetchResult>,
    started: Instant,
}

/// One streamed tile.
pub struct Region {
    tile: TileCoord,
    level: Level,
    ticket: u64,
    in_flight: Option<InFlight>,
    bitmap: Option<AtlasImage>,
    mesh: Option<MeshBuffers>,
    occupancy: Option<Occupancy>,
    retries: u32,
    fail_until: Option<Instant>,
    slot: Option<usize>,
    merged: bool,
}

impl Region {
    pub fn new(tile: TileCoord) -> Self {
        Self {
            tile,
            level: Level::None,
            ticket: 0,
            in_flight: None,
            bitmap: None,
            mesh: None,
            occupancy: None,
            retries: 0,
            fail_until: None,
            slot: None,
            merged: false,
        }
    }

    pub fn tile(&self) -> TileCoord {
        self.tile
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }

    /// Ticket of the most recent request.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn in_flight(&self) -> Option<Detail> {
        self.in_flight.as_ref().map(|f| f.mode)
    }

    pub fn in_flight_task(&self) -> Option<TaskId> {
        self.in_flight.as_ref().map(|f| f.handle.id())
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub(crate) fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }

    pub fn bitmap(&self) -> Option<&AtlasImage> {
        self.bitmap.as_ref()
    }

    pub fn mesh(&self) -> Option<&MeshBuffers> {
        self.mesh.as_ref()
    }

    pub fn occupancy(&self) -> Option<&Occupancy> {
        self.occupancy.as_ref()
    }

    /// Holds nothing and requests nothing. Error regions are never empty so
    /// they are not recreated and retried.
    pub fn is_empty(&self) -> bool {
        self.level == Level::None && self.bitmap.is_none() && self.in_flight.is_none()
    }

    fn has(&self, detail: Detail) -> bool {
        match detail {
            Detail::None => true,
            Detail::Image => matches!(self.level, Level::Image | Level::Full),
            Detail::Full => self.level == Level::Full,
        }
    }

    /// Sets the wanted detail.
    ///
    /// `None` cancels the in-flight request and keeps cached data. `Image` is
    /// a no-op once an image is held. `Full` replaces an image-only request.
    /// A request already in flight for the wanted detail is re-prioritised.
    pub fn tune(&mut self, mode: Detail, priority: i32, ctx: &mut FetchContext) {
        if self.is_error() {
            return;
        }
        if mode == Detail::None {
            self.cancel(ctx);
            return;
        }
        if let Some(flight) = &self.in_flight {
            if flight.mode >= mode {
                ctx.scheduler.tune(flight.handle.id(), priority);
                return;
            }
            self.cancel(ctx);
        }
        if !self.has(mode) {
            self.fetch(mode, priority, ctx);
        }
    }

    /// Issues a request unless the failure cool-down is still running.
    fn fetch(&mut self, mode: Detail, priority: i32, ctx: &mut FetchContext) -> bool {
        if self.fail_until.is_some_and(|until| Instant::now() < until) {
            return false;
        }
        self.ticket += 1;
        let ticket = self.ticket;
        let tile = self.tile;
        let handle = ctx.request(FetchRequest { tile, mode }, priority);
        self.in_flight = Some(InFlight {
            ticket,
            mode,
            handle,
            started: Instant::now(),
        });
        ctx.telemetry
            .emit(|| TelemetryEvent::TaskStarted { tile, mode, ticket });
        ctx.telemetry.emit(|| TelemetryEvent::Cache {
            tile,
            state: CacheState::Loading,
        });
        true
    }

    fn cancel(&mut self, ctx: &mut FetchContext) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        ctx.scheduler.abort(flight.handle.id());
        let tile = self.tile;
        ctx.telemetry.emit(|| TelemetryEvent::TaskAborted {
            tile,
            ticket: flight.ticket,
        });
        let state = self.cache_state();
        ctx.telemetry.emit(|| TelemetryEvent::Cache { tile, state });
    }

    /// Applies the in-flight result if it has settled. Returns `true` when
    /// the region's state changed.
    pub fn poll(&mut self, ctx: &mut FetchContext) -> bool {
        let Some(settled) = self.in_flight.as_ref().and_then(|f| f.handle.try_settled()) else {
            return false;
        };
        let Some(flight) = self.in_flight.take() else {
            return false;
        };
        if flight.ticket != self.ticket {
            return false;
        }
        match settled {
            Settled::Unset => false,
            Settled::Done(Ok(payload)) => {
                self.apply(payload, &flight, ctx);
                true
            }
            Settled::Done(Err(error)) => {
                self.fail(&error, ctx);
                true
            }
        }
    }

    fn apply(&mut self, payload: FetchPayload, flight: &InFlight, ctx: &FetchContext) {
        let level = Level::from(payload.mode);
        if level == Level::Full || self.level == Level::None {
            self.level = level;
        }
        self.bitmap = Some(payload.bitmap);
        if let Some(occupancy) = payload.occupancy {
            self.occupancy = Some(occupancy);
        }
        if let Some(mesh) = payload.mesh {
            self.mesh = Some(mesh);
            self.merged = false;
        }
        self.retries = 0;
        self.fail_until = None;

        let tile = self.tile;
        let elapsed = flight.started.elapsed();
        tracing::debug!(%tile, mode = ?payload.mode, ?elapsed, "region loaded");
        ctx.telemetry.emit(|| TelemetryEvent::TaskDone {
            tile,
            mode: payload.mode,
            ticket: flight.ticket,
            elapsed,
        });
        ctx.telemetry.emit(|| TelemetryEvent::Cache {
            tile,
            state: CacheState::Cached,
        });
    }

    fn fail(&mut self, error: &FetchError, ctx: &FetchContext) {
        self.retries += 1;
        let tile = self.tile;
        if self.retries >= ctx.policy.max_retries {
            tracing::warn!(%tile, retries = self.retries, %error, "region failed permanently");
            self.level = Level::Error;
            self.fail_until = None;
        } else {
            tracing::warn!(%tile, retries = self.retries, %error, "region fetch failed, will retry");
            self.level = Level::None;
            self.fail_until = Some(Instant::now() + ctx.policy.retry_cooldown());
        }
        let state = self.cache_state();
        ctx.telemetry.emit(|| TelemetryEvent::Cache { tile, state });
    }

    fn cache_state(&self) -> CacheState {
        if self.is_error() {
            CacheState::Error
        } else if self.in_flight.is_some() {
            CacheState::Loading
        } else if self.bitmap.is_some() {
            CacheState::Cached
        } else {
            CacheState::Empty
        }
    }

    /// The cached atlas, requesting one in the background if none is held.
    pub fn image(&mut self, ctx: &mut FetchContext) -> Option<&AtlasImage> {
        if self.bitmap.is_none() && self.in_flight.is_none() && !self.is_error() {
            self.fetch(Detail::Image, 0, ctx);
        }
        self.bitmap.as_ref()
    }

    /// Merges the cached mesh into `acc` at the given slot, once per
    /// [`Region::reset_build`]. Requests full detail if no mesh is held.
    pub fn build(
        &mut self,
        slot: u32,
        offset: Vec3,
        acc: &mut MeshAccumulator,
        ctx: &mut FetchContext,
    ) -> BuildState {
        if self.is_error() {
            return BuildState::Failed;
        }
        if self.merged {
            return BuildState::Merged;
        }
        match &self.mesh {
            Some(mesh) => {
                acc.merge(mesh, slot, offset);
                self.merged = true;
                BuildState::Merged
            }
            None => {
                if self.in_flight.is_none() {
                    self.fetch(Detail::Full, 0, ctx);
                }
                BuildState::Pending
            }
        }
    }

    /// Forgets that the mesh was merged, so the next [`Region::build`]
    /// merges it again.
    pub fn reset_build(&mut self) {
        self.merged = false;
    }

    /// Reads one occupancy bit. Returns 0 outside `[0, side)` or while no
    /// occupancy is cached, requesting full detail in the latter case.
    pub fn pick(&mut self, x: i64, y: i64, z: i64, side: usize, ctx: &mut FetchContext) -> u8 {
        let side = side as i64;
        if [x, y, z].iter().any(|&c| c < 0 || c >= side) {
            return 0;
        }
        if let Some(occupancy) = &self.occupancy {
            return occupancy.sample(x, y, z);
        }
        if self.in_flight.is_none() && !self.is_error() {
            self.fetch(Detail::Full, 0, ctx);
        }
        0
    }

    /// Cancels work and drops every cached resource.
    pub fn dispose(&mut self, ctx: &mut FetchContext) {
        self.cancel(ctx);
        self.bitmap = None;
        self.mesh = None;
        self.occupancy = None;
        self.slot = None;
        self.merged = false;
        let tile = self.tile;
        ctx.telemetry.emit(|| TelemetryEvent::Cache {
            tile,
            state: CacheState::Purged,
        });
    }
}
