//! Morton (Z-order) codes used to lay a voxel cube out on a square atlas.
//!
//! A voxel `(x, y, z)` maps to a 3-D Morton code, and the same code read as a
//! 2-D Morton code gives the atlas pixel `(u, v)`. Neighbouring voxels stay
//! close on the atlas, which keeps PNG compression effective.

/// Interleaves three 10-bit coordinates into a 30-bit Morton code.
pub fn xyz_to_morton(x: u32, y: u32, z: u32) -> u32 {
    spread3(x) | (spread3(y) << 1) | (spread3(z) << 2)
}

/// Splits a 30-bit Morton code back into `(x, y, z)`.
pub fn morton_to_xyz(morton: u32) -> (u32, u32, u32) {
    (
        compact3(morton),
        compact3(morton >> 1),
        compact3(morton >> 2),
    )
}

/// Interleaves two 16-bit coordinates into a 32-bit Morton code.
pub fn uv_to_morton(u: u32, v: u32) -> u32 {
    spread2(u) | (spread2(v) << 1)
}

/// Splits a 32-bit Morton code back into `(u, v)`.
pub fn morton_to_uv(morton: u32) -> (u32, u32) {
    (compact2(morton), compact2(morton >> 1))
}

fn spread3(value: u32) -> u32 {
    let mut x = value & 0x0000_03ff;
    x = (x | (x << 16)) & 0xff00_00ff;
    x = (x | (x << 8)) & 0x0300_f00f;
    x = (x | (x << 4)) & 0x030c_30c3;
    (x | (x << 2)) & 0x0924_9249
}

fn compact3(value: u32) -> u32 {
    let mut x = value & 0x0924_9249;
    x = (x | (x >> 2)) & 0x030c_30c3;
    x = (x | (x >> 4)) & 0x0300_f00f;
    x = (x | (x >> 8)) & 0xff00_00ff;
    (x | (x >> 16)) & 0x0000_03ff
}

fn spread2(value: u32) -> u32 {
    let mut x = value & 0x0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333;
    (x | (x << 1)) & 0x5555_5555
}

fn compact2(value: u32) -> u32 {
    let mut x = value & 0x5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333;
    x = (x | (x >> 2)) & 0x0f0f_0f0f;
    x = (x | (x >> 4)) & 0x00ff_00ff;
    (x | (x >> 8)) & 0x0000_ffff
}
