//! Where atlas bytes come from.
//!
//! Every source serves PNG-encoded atlases named `{zoom}_{i}_{j}.png`. The
//! synthetic source renders fBm terrain into an atlas instead of reading one.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use noise::{NoiseFn, Simplex};
use tessera_config::{SourceConfig, SourceKind};
use tessera_voxel::{AtlasImage, Occupancy};

use crate::error::FetchError;
use crate::tile::TileCoord;

/// Produces the encoded atlas for a tile. Called from worker threads.
pub trait TileSource: Send + Sync {
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>, FetchError>;
}

/// File name of a tile's atlas.
pub fn tile_file_name(zoom: u32, tile: TileCoord) -> String {
    format!("{zoom}_{}_{}.png", tile.i, tile.j)
}

/// Builds the source described by the configuration.
pub fn source_from_config(
    config: &SourceConfig,
    side: usize,
    timeout: Duration,
) -> Box<dyn TileSource> {
    match config.kind {
        SourceKind::Directory => Box::new(DirectorySource::new(&config.location, config.zoom)),
        SourceKind::Http => Box::new(HttpSource::new(&config.location, config.zoom, timeout)),
        SourceKind::Synthetic => Box::new(SyntheticSource::new(config.seed, side)),
    }
}

/// Atlases stored as files in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    zoom: u32,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, zoom: u32) -> Self {
        Self {
            root: root.into(),
            zoom,
        }
    }
}

impl TileSource for DirectorySource {
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(tile_file_name(self.zoom, tile));
        std::fs::read(&path).map_err(|e| FetchError::Network(format!("{}: {e}", path.display())))
    }
}

/// Atlases served below an HTTP base URL.
pub struct HttpSource {
    base: String,
    zoom: u32,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(base: &str, zoom: u32, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base: base.trim_end_matches('/').to_string(),
            zoom,
            agent,
        }
    }

    pub fn url(&self, tile: TileCoord) -> String {
        format!("{}/{}", self.base, tile_file_name(self.zoom, tile))
    }
}

impl TileSource for HttpSource {
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>, FetchError> {
        let url = self.url(tile);
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
        Ok(bytes)
    }
}

/// Procedural terrain: a multi-octave simplex heightmap filled up to the
/// surface, coloured by depth.
pub struct SyntheticSource {
    noise: Simplex,
    side: usize,
    octaves: u32,
    base_frequency: f64,
}

impl SyntheticSource {
    pub fn new(seed: u64, side: usize) -> Self {
        Self {
            noise: Simplex::new(seed as u32),
            side,
            octaves: 4,
            base_frequency: 1.0 / 512.0,
        }
    }

    /// Surface height at a world column, in `[0, side)`.
    pub fn height(&self, x: f64, z: f64) -> usize {
        let mut total = 0.0;
        let mut frequency = self.base_frequency;
        let mut amplitude = 1.0;
        let mut norm = 0.0;
        for _ in 0..self.octaves {
            total += self.noise.get([x * frequency, z * frequency]) * amplitude;
            norm += amplitude;
            frequency *= 2.0;
            amplitude *= 0.5;
        }
        let unit = (total / norm) * 0.5 + 0.5;
        let side = self.side as f64;
        let h = side * 0.25 + unit * side * 0.5;
        (h as usize).clamp(1, self.side - 1)
    }

    /// The tile's occupancy cube.
    pub fn occupancy(&self, tile: TileCoord) -> Occupancy {
        let side = self.side;
        let mut occ = Occupancy::new(side);
        let base_x = i64::from(tile.i) * side as i64;
        let base_z = i64::from(tile.j) * side as i64;
        for z in 0..side {
            for x in 0..side {
                let h = self.height((base_x + x as i64) as f64, (base_z + z as i64) as f64);
                for y in 0..h {
                    occ.set(x, y, z, true);
                }
            }
        }
        occ
    }
}

impl TileSource for SyntheticSource {
    fn fetch(&self, tile: TileCoord) -> Result<Vec<u8>, FetchError> {
        let occ = self.occupancy(tile);
        let side = self.side;
        let atlas = AtlasImage::from_occupancy(&occ, |_, y, _| {
            let t = (y * 255 / side) as u8;
            [96u8.saturating_add(t / 2), 80 + t / 3, 64]
        })?;
        Ok(atlas.encode_png()?)
    }
}
