#![cfg_attr(target_arch = "spirv", no_std)]

use glam::UVec3;
use spirv_std::{glam, spirv};

#[cfg(not(target_arch = "spirv"))]
pub mod cpu;

/// Invocations per workgroup along `x`. One invocation per buffer element.
pub const WIDTH: u32 = 16;
/// Invocations per workgroup along `y`.
pub const HEIGHT: u32 = 1;

pub const DESCRIPTOR_SET: u32 = 0;
/// Read-write `i32` storage buffer, overwritten in place with the sums.
pub const ACCUMULATOR_BINDING: u32 = 5;
/// Read-only `i32` storage buffer holding the per-element offsets.
pub const OFFSETS_BINDING: u32 = 6;

/// Name of the entry point in both the Rust and the WGSL kernel.
pub const ENTRY_POINT: &str = "main_cs";

/// The same kernel written in WGSL.
#[cfg(not(target_arch = "spirv"))]
pub const WGSL_SOURCE: &str = include_str!("../shaders/add.wgsl");

/// The same kernel written in GLSL 450. Its workgroup size comes from the
/// `WIDTH` and `HEIGHT` preprocessor defines.
#[cfg(not(target_arch = "spirv"))]
pub const GLSL_SOURCE: &str = include_str!("../shaders/add.comp");

/// Work done by the invocation with global index `index`: adds
/// `offsets[index]` onto `accumulator[index]`, wrapping on overflow like
/// GPU integer arithmetic does.
///
/// No other element is read or written, so invocations can run in any order.
///
/// # Examples
///
/// ```
/// # use add_shader::add_offset;
/// let mut accumulator = [72, 101];
/// add_offset(1, &mut accumulator, &[15, 10]);
/// assert_eq!(accumulator, [72, 111]);
/// ```
pub fn add_offset(index: usize, accumulator: &mut [i32], offsets: &[i32]) {
    accumulator[index] = accumulator[index].wrapping_add(offsets[index]);
}

// LocalSize/numthreads of (x = 16, y = 1, z = 1), keep in sync with `WIDTH`.
#[spirv(compute(threads(16)))]
pub fn main_cs(
    #[spirv(global_invocation_id)] id: UVec3,
    #[spirv(storage_buffer, descriptor_set = 0, binding = 5)] accumulator: &mut [i32],
    #[spirv(storage_buffer, descriptor_set = 0, binding = 6)] offsets: &[i32],
) {
    add_offset(id.x as usize, accumulator, offsets);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_covers_every_invocation() {
        let offsets: Vec<i32> = (1..=16).collect();
        let mut accumulator = vec![0; 16];
        for x in 0..WIDTH {
            main_cs(UVec3::new(x, 0, 0), &mut accumulator, &offsets);
        }
        assert_eq!(accumulator, offsets);
    }

    #[test]
    fn invocation_only_touches_its_own_lane() {
        let mut accumulator = [1, 2, 3];
        add_offset(1, &mut accumulator, &[100, 100, 100]);
        assert_eq!(accumulator, [1, 102, 3]);
    }

    #[test]
    fn invocation_order_does_not_matter() {
        let offsets = [3, -7, 11, 0, 5, 9, -2, 4];
        let start = [10, 20, 30, 40, 50, 60, 70, 80];

        let mut forward = start;
        for i in 0..offsets.len() {
            add_offset(i, &mut forward, &offsets);
        }

        let mut reverse = start;
        for i in (0..offsets.len()).rev() {
            add_offset(i, &mut reverse, &offsets);
        }

        let mut interleaved = start;
        for i in [5, 0, 7, 2, 4, 1, 6, 3] {
            add_offset(i, &mut interleaved, &offsets);
        }

        assert_eq!(forward, reverse);
        assert_eq!(forward, interleaved);
    }

    #[test]
    fn overflow_wraps() {
        let mut accumulator = [i32::MAX];
        add_offset(0, &mut accumulator, &[1]);
        assert_eq!(accumulator, [i32::MIN]);
    }
}
