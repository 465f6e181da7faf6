//! Sample types accepted by the segmentation engines.
//!
//! Frames carry 8-bit unsigned, 16-bit unsigned or 32-bit float samples. The
//! engines read every sample as a raw `f32` value and write reconstructed
//! images back through [`Sample::from_f32_rounded`].

use image::Primitive;
use imageproc::definitions::Clamp;

/// Storage depth of a frame's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleDepth {
    /// 8-bit unsigned integer samples
    U8,
    /// 16-bit unsigned integer samples
    U16,
    /// 32-bit floating point samples
    F32,
}

/// A subpixel type the engines can consume.
///
/// Implemented for `u8`, `u16` and `f32` only.
pub trait Sample: Primitive + Into<f32> + Clamp<f32> + Send + Sync + 'static {
    /// Depth tag recorded in a frame layout.
    const DEPTH: SampleDepth;

    /// Converts an engine-side value back into a sample, rounding to the
    /// nearest representable integer and saturating at the type's bounds.
    fn from_f32_rounded(value: f32) -> Self;
}

/// Implements `Sample` for an integer type, rounding before clamping.
macro_rules! impl_sample_integer {
    ($type:ty, $depth:expr) => {
        impl Sample for $type {
            const DEPTH: SampleDepth = $depth;

            #[inline]
            fn from_f32_rounded(value: f32) -> Self {
                <$type as Clamp<f32>>::clamp(value.round())
            }
        }
    };
}

/// Implements `Sample` for a float type, which stores values unchanged.
macro_rules! impl_sample_float {
    ($type:ty, $depth:expr) => {
        impl Sample for $type {
            const DEPTH: SampleDepth = $depth;

            #[inline]
            fn from_f32_rounded(value: f32) -> Self {
                value
            }
        }
    };
}

impl_sample_integer!(u8, SampleDepth::U8);
impl_sample_integer!(u16, SampleDepth::U16);
impl_sample_float!(f32, SampleDepth::F32);
