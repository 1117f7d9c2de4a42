//! Headless Tessera demo.
//!
//! Flies a camera across the configured scope at a fixed frame cadence,
//! streaming regions through a worker pool into a recording GPU sink, then
//! prints a summary. Configuration is loaded from `config.ron` and can be
//! overridden via CLI flags.
//!
//! Run with `cargo run -p tessera-demo -- --frames 600 --side 64`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{Mat4, Vec3};
use tessera_config::{CliArgs, Config};
use tessera_mesh::{BoxInstance, GreedyBoxMesher};
use tessera_stream::{
    DebugGrid, GpuSink, Scene, Telemetry, TelemetrySink, TextureId, TileCoord, TilePipeline,
    WorkerPool, source_from_config,
};
use tessera_voxel::AtlasImage;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tessera-demo", about = "Headless fly-through of the tile streamer")]
struct DemoArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 300)]
    frames: u32,

    /// Frame cadence in milliseconds.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Camera speed in tiles per second.
    #[arg(long, default_value_t = 2.0)]
    speed: f32,

    /// Region edge length override (power of four).
    #[arg(long)]
    side: Option<usize>,
}

/// GPU sink that only keeps statistics.
#[derive(Default)]
struct RecordingSink {
    uploads: u64,
    uploaded_bytes: u64,
    offsets: u64,
    commits: u64,
    instances: usize,
    instance_bytes: usize,
}

impl GpuSink for RecordingSink {
    fn upload_atlas(&mut self, _slot: usize, atlas: &AtlasImage) -> TextureId {
        self.uploads += 1;
        self.uploaded_bytes += atlas.byte_size() as u64;
        TextureId(self.uploads)
    }

    fn set_offset(&mut self, _slot: usize, _offset: Vec3) {
        self.offsets += 1;
    }

    fn commit_instances(&mut self, instances: &[BoxInstance]) {
        self.commits += 1;
        self.instances = instances.len();
        self.instance_bytes = bytemuck::cast_slice::<BoxInstance, u8>(instances).len();
    }
}

/// Camera position and view-projection after `t` seconds along the path.
///
/// The path runs along the middle row of the scope, looking ahead and down.
fn camera_at(config: &Config, t: f32, speed: f32) -> (Vec3, Mat4) {
    let side = config.region.side as f32;
    let width = config.scope.width() as f32 * side;
    let depth = config.scope.height() as f32 * side;
    let x = (t * speed * side).rem_euclid(width);
    let eye = Vec3::new(x, side * 1.5, depth * 0.5);

    let forward = Vec3::new(1.0, -0.35, 0.0).normalize();
    let view = Mat4::look_to_rh(eye, forward, Vec3::Y);
    let far = side * config.scene.view_radius as f32;
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.5, far);
    (eye, proj * view)
}

fn main() {
    let args = DemoArgs::parse();

    let config_dir = args
        .common
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("tessera")))
        .unwrap_or_else(|| std::path::PathBuf::from(".tessera"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);
    if let Some(side) = args.side {
        config.region.side = side;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(2);
    }

    let log_dir = config_dir.join("logs");
    tessera_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let source = source_from_config(
        &config.source,
        config.region.side,
        config.region.fetch_timeout(),
    );
    let pipeline = TilePipeline::new(source, Box::new(GreedyBoxMesher), config.region.side);
    let pool = match WorkerPool::new(pipeline, config.workers.threads, config.region.fetch_timeout())
    {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            eprintln!("Failed to start worker pool: {e}");
            std::process::exit(1);
        }
    };

    let grid = Arc::new(DebugGrid::new());
    let telemetry = if config.debug.telemetry {
        let sink: Arc<dyn TelemetrySink> = grid.clone();
        Telemetry::new(sink)
    } else {
        Telemetry::none()
    };

    info!(
        source = ?config.source.kind,
        side = config.region.side,
        frames = args.frames,
        "starting fly-through"
    );

    let mut scene = Scene::new(&config, pool.clone(), telemetry);
    let mut sink = RecordingSink::default();
    let cadence = Duration::from_millis(args.frame_ms);
    let start = Instant::now();
    let mut refreshes = 0u32;
    let mut last_tile: Option<TileCoord> = None;

    for frame in 0..args.frames {
        let frame_start = Instant::now();
        let t = frame as f32 * cadence.as_secs_f32();
        let (eye, view_proj) = camera_at(&config, t, args.speed);

        let stats = scene.frame(frame_start, eye, view_proj, &mut sink);
        if stats.refreshed {
            refreshes += 1;
        }
        let tile = scene.grid().tile_at(eye);
        if last_tile != Some(tile) {
            info!(%tile, stored = scene.store().len(), "entered tile");
            last_tile = Some(tile);
        }

        let elapsed = frame_start.elapsed();
        if elapsed < cadence {
            std::thread::sleep(cadence - elapsed);
        }
    }

    let errors = scene.store().regions().filter(|r| r.is_error()).count();
    info!(
        elapsed = ?start.elapsed(),
        refreshes,
        stored = scene.store().len(),
        errors,
        tasks = scene.fetch().scheduler().scheduled_total(),
        workers = pool.spawned(),
        "fly-through finished"
    );
    println!("frames:          {}", args.frames);
    println!("regions stored:  {}", scene.store().len());
    println!("regions failed:  {errors}");
    println!("atlas uploads:   {} ({} bytes)", sink.uploads, sink.uploaded_bytes);
    println!("offset updates:  {}", sink.offsets);
    println!(
        "commits:         {} (last: {} boxes, {} bytes)",
        sink.commits, sink.instances, sink.instance_bytes
    );

    if config.debug.telemetry {
        match serde_json::to_string_pretty(&grid.snapshot()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialize debug grid: {e}"),
        }
    }
}
