//! Internal utility functions for bgsegm.
//!
//! This module contains common functionality used across the segmentation engines.

mod sample;
pub use sample::{Sample, SampleDepth};

use crate::bgsegm::frame::{FrameLayout, FrameViewMut};
use crate::error::{Error, Result};
use crate::Image;
use image::{ImageBuffer, Luma, Pixel, Primitive};

/// Largest number of colour channels a supported pixel type carries.
pub const MAX_COLOR_CHANNELS: usize = 3;

/// Number of colour channels of a pixel type, i.e. channels without alpha.
#[inline]
pub fn color_channels<P: Pixel>() -> usize {
    usize::from(P::CHANNEL_COUNT) - usize::from(P::HAS_ALPHA)
}

/// Reads the colour channels of pixel `x` from a frame row into `out`.
///
/// # Arguments
///
/// * `row` - One row of interleaved samples
/// * `x` - Column of the pixel
/// * `stride` - Samples per pixel in `row`, alpha included
/// * `out` - Destination, one entry per colour channel
#[inline]
pub fn load_color<S: Sample>(row: &[S], x: usize, stride: usize, out: &mut [f32]) {
    let start = x * stride;
    let len = out.len();
    for (dst, &src) in out.iter_mut().zip(&row[start..start + len]) {
        *dst = src.into();
    }
}

/// Validates that a frame has non-zero dimensions.
///
/// # Arguments
///
/// * `width` - The width of the frame
/// * `height` - The height of the frame
/// * `context` - A description of the context for error messages
///
/// # Returns
///
/// `Ok(())` if the dimensions are valid, otherwise `Error::InvalidParameter`
pub fn validate_non_empty_frame(width: u32, height: u32, context: &str) -> Result<()> {
    if width == 0 || height == 0 {
        Err(Error::InvalidParameter(format!(
            "{context}: frame dimensions must be non-zero"
        )))
    } else {
        Ok(())
    }
}

/// Validates that a frame matches the layout the model was sized for.
///
/// # Returns
///
/// `Ok(())` if the layouts are identical, otherwise `Error::DimensionMismatch`
pub fn validate_matching_layout(expected: FrameLayout, actual: FrameLayout) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

/// Validates that an output mask covers exactly the frame it is written for.
///
/// # Returns
///
/// `Ok(())` if the dimensions agree, otherwise `Error::DimensionMismatch`
pub fn validate_mask(frame: FrameLayout, mask: &FrameViewMut<'_, Luma<u8>>) -> Result<()> {
    let expected = FrameLayout::of::<Luma<u8>>(frame.width, frame.height);
    let actual = mask.layout();
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

/// Builds an image from per-pixel colour values.
///
/// `color(pixel, channel)` is queried for each colour channel in row-major
/// pixel order; alpha channels, when the pixel type has one, are set to the
/// subpixel's maximum value.
///
/// # Errors
///
/// * `Error::DimensionMismatch` - `P` does not have `layout.color_channels()` colour channels
/// * `Error::ImageBufferCreationFailed` - The buffer could not be assembled
pub fn compose_image<P, F>(layout: FrameLayout, color: F) -> Result<Image<P>>
where
    P: Pixel,
    P::Subpixel: Sample,
    F: Fn(usize, usize) -> f32,
{
    let cn = color_channels::<P>();
    if cn != layout.color_channels() {
        return Err(Error::DimensionMismatch {
            expected: layout,
            actual: FrameLayout::of::<P>(layout.width, layout.height),
        });
    }

    let channels = usize::from(P::CHANNEL_COUNT);
    let pixel_count = layout.pixel_count();
    let mut raw = Vec::with_capacity(pixel_count * channels);
    for pixel in 0..pixel_count {
        raw.extend((0..cn).map(|c| P::Subpixel::from_f32_rounded(color(pixel, c))));
        if P::HAS_ALPHA {
            raw.push(P::Subpixel::DEFAULT_MAX_VALUE);
        }
    }

    ImageBuffer::from_raw(layout.width, layout.height, raw).ok_or(Error::ImageBufferCreationFailed)
}
