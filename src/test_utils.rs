//! Test utilities for bgsegm
//!
//! Frame generators and mask helpers shared by the unit tests.
//! It is only compiled when running tests.

use image::{ImageBuffer, Pixel, Rgb};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{Image, Mask};

/// Creates a frame filled with `pixel`.
pub fn uniform_frame<P: Pixel>(width: u32, height: u32, pixel: P) -> Image<P> {
    ImageBuffer::from_pixel(width, height, pixel)
}

/// Creates an 8-bit RGB frame whose samples are drawn uniformly from `range`.
///
/// The same `seed` always yields the same frame.
pub fn random_rgb_frame(
    width: u32,
    height: u32,
    range: std::ops::RangeInclusive<u8>,
    seed: u64,
) -> Image<Rgb<u8>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ImageBuffer::from_fn(width, height, |_, _| {
        Rgb([
            rng.random_range(range.clone()),
            rng.random_range(range.clone()),
            rng.random_range(range.clone()),
        ])
    })
}

/// Counts the mask pixels equal to `value`.
pub fn count_value(mask: &Mask, value: u8) -> usize {
    mask.pixels().filter(|p| p.0[0] == value).count()
}
