//! Atlas images: a region's voxel cube flattened onto a square RGBA image.
//!
//! Voxel `(x, y, z)` is stored at the atlas pixel whose 2-D Morton code
//! equals the voxel's 3-D Morton code. A pixel with non-zero alpha marks a
//! solid voxel; its RGB is the voxel colour sampled by the renderer.

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

use crate::morton::{morton_to_uv, morton_to_xyz, uv_to_morton, xyz_to_morton};
use crate::occupancy::Occupancy;

/// Errors produced while decoding or converting atlases.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// The encoded bytes are not a readable image.
    #[error("failed to decode atlas image: {0}")]
    Image(#[from] image::ImageError),

    /// The image is not the square that holds a `side³` cube.
    #[error("atlas is {width}x{height}, expected {expected}x{expected}")]
    Dimensions {
        /// Actual width.
        width: u32,
        /// Actual height.
        height: u32,
        /// Required edge length.
        expected: u32,
    },

    /// The cube side has no square atlas layout.
    #[error("region side {0} has no square atlas layout")]
    UnsupportedSide(usize),
}

/// Edge length of the square atlas that holds a `side³` cube.
///
/// Only powers of four have one (`4`, `16`, `64`, `256`, ...).
pub fn atlas_side(side: usize) -> Option<u32> {
    if side == 0 || !side.is_power_of_two() || side.trailing_zeros() % 2 != 0 {
        return None;
    }
    let bits = side.trailing_zeros() * 3 / 2;
    Some(1u32 << bits)
}

/// A decoded RGBA8 atlas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtlasImage {
    width: u32,
    height: u32,
    /// Row-major RGBA8 pixels.
    pixels: Vec<u8>,
}

impl AtlasImage {
    /// Creates a fully transparent atlas.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * 4],
        }
    }

    /// Wraps raw RGBA8 pixels. Returns `None` if the length does not match.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decodes PNG (or JPEG) bytes into an atlas.
    pub fn decode(bytes: &[u8]) -> Result<Self, AtlasError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Encodes the atlas as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, AtlasError> {
        let mut out = Cursor::new(Vec::new());
        let image = RgbaImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or(
            AtlasError::Dimensions {
                width: self.width,
                height: self.height,
                expected: self.width,
            },
        )?;
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Atlas width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Atlas height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Approximate heap usage in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// RGBA of the pixel at `(u, v)`.
    pub fn pixel(&self, u: u32, v: u32) -> [u8; 4] {
        let i = (v as usize * self.width as usize + u as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    fn put(&mut self, u: u32, v: u32, rgba: [u8; 4]) {
        let i = (v as usize * self.width as usize + u as usize) * 4;
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// Expands the atlas into an occupancy cube of the given side.
    ///
    /// Every pixel with non-zero alpha becomes a solid voxel.
    pub fn to_occupancy(&self, side: usize) -> Result<Occupancy, AtlasError> {
        let expected = atlas_side(side).ok_or(AtlasError::UnsupportedSide(side))?;
        if self.width != expected || self.height != expected {
            return Err(AtlasError::Dimensions {
                width: self.width,
                height: self.height,
                expected,
            });
        }

        let mut occ = Occupancy::new(side);
        let width = self.width as usize;
        for (i, px) in self.pixels.chunks_exact(4).enumerate() {
            if px[3] == 0 {
                continue;
            }
            let u = (i % width) as u32;
            let v = (i / width) as u32;
            let (x, y, z) = morton_to_xyz(uv_to_morton(u, v));
            occ.set(x as usize, y as usize, z as usize, true);
        }
        Ok(occ)
    }

    /// Flattens an occupancy cube into an atlas, colouring each solid voxel
    /// with `color(x, y, z)`.
    pub fn from_occupancy(
        occ: &Occupancy,
        mut color: impl FnMut(usize, usize, usize) -> [u8; 3],
    ) -> Result<Self, AtlasError> {
        let side = occ.side();
        let edge = atlas_side(side).ok_or(AtlasError::UnsupportedSide(side))?;
        let mut atlas = Self::blank(edge, edge);
        for z in 0..side {
            for y in 0..side {
                for x in 0..side {
                    if !occ.get(x, y, z) {
                        continue;
                    }
                    let (u, v) = morton_to_uv(xyz_to_morton(x as u32, y as u32, z as u32));
                    let [r, g, b] = color(x, y, z);
                    atlas.put(u, v, [r, g, b, 255]);
                }
            }
        }
        Ok(atlas)
    }
}
