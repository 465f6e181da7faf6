//! ViBe: sample-based non-parametric background model.
//!
//! Each pixel stores `num_samples` past colours. A pixel is background when
//! at least `required_matches` of them lie within `radius` of the current
//! value. Background pixels occasionally refresh one of their own samples
//! and one sample of a random neighbour.

use image::{Luma, Pixel};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::bgsegm::execution::{map_rows, Execution};
use crate::bgsegm::frame::{create, FrameLayout, FrameView, FrameViewMut, RegionOfInterest};
use crate::bgsegm::subtractor::Algorithm;
use crate::bgsegm::{BACKGROUND, FOREGROUND};
use crate::error::{Error, Result};
use crate::utils::{
    load_color, validate_mask, validate_matching_layout, validate_non_empty_frame, Sample,
    MAX_COLOR_CHANNELS,
};
use crate::Mask;

/// Offsets of the 8-connected neighbourhood.
const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Configuration of the [`Vibe`] engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VibeConfig {
    /// History samples kept per pixel
    pub num_samples: usize,
    /// Matching samples needed to call a pixel background
    pub required_matches: usize,
    /// Largest mean absolute channel difference that still matches
    pub radius: f32,
    /// A background pixel refreshes its model with probability `1 / subsampling_factor`
    pub subsampling_factor: u32,
    /// Seed of the per-row random generators
    pub seed: u64,
    /// Row scheduling
    pub execution: Execution,
}

impl Default for VibeConfig {
    fn default() -> Self {
        Self {
            num_samples: 20,
            required_matches: 2,
            radius: 20.0,
            subsampling_factor: 16,
            seed: 0,
            execution: Execution::Sequential,
        }
    }
}

impl VibeConfig {
    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn with_required_matches(mut self, required_matches: usize) -> Self {
        self.required_matches = required_matches;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_subsampling_factor(mut self, factor: u32) -> Self {
        self.subsampling_factor = factor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Checks every parameter against its valid range.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - A parameter is out of range
    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(Error::InvalidParameter(
                "ViBe needs at least one history sample".to_string(),
            ));
        }
        if self.required_matches == 0 || self.required_matches > self.num_samples {
            return Err(Error::InvalidParameter(format!(
                "ViBe required_matches must be in 1..={}, got {}",
                self.num_samples, self.required_matches
            )));
        }
        if !(self.radius > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "ViBe radius must be positive, got {}",
                self.radius
            )));
        }
        if self.subsampling_factor == 0 {
            return Err(Error::InvalidParameter(
                "ViBe subsampling_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A deferred write into a neighbour's sample set.
#[derive(Debug, Clone, Copy)]
struct Propagation {
    pixel: usize,
    sample: usize,
    color: [f32; MAX_COLOR_CHANNELS],
}

/// Sample-based background subtractor.
///
/// Must be initialised with a first frame before [`Vibe::apply`].
#[derive(Debug, Clone)]
pub struct Vibe {
    config: VibeConfig,
    layout: Option<FrameLayout>,
    samples: Vec<f32>,
    frames: u64,
}

impl Vibe {
    /// Creates an uninitialised engine after validating `config`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: VibeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            layout: None,
            samples: Vec::new(),
            frames: 0,
        })
    }

    /// Creates an engine and seeds it from `first_frame`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid or the frame is empty
    pub fn with_first_frame<'f, P, F>(first_frame: F, config: VibeConfig) -> Result<Self>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let mut vibe = Self::new(config)?;
        vibe.initialize(first_frame)?;
        Ok(vibe)
    }

    pub fn config(&self) -> &VibeConfig {
        &self.config
    }

    /// Layout of the frames the model was sized for, if any.
    pub fn layout(&self) -> Option<FrameLayout> {
        self.layout
    }

    /// Number of frames processed since initialisation.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Drops the model; [`Vibe::initialize`] must be called again.
    pub fn reset(&mut self) {
        self.layout = None;
        self.samples.clear();
        self.frames = 0;
    }

    /// Fills every pixel's history from its 3x3 neighbourhood in `first_frame`.
    ///
    /// Neighbour coordinates are clamped to the frame, so border pixels only
    /// draw from valid positions.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The frame is empty
    pub fn initialize<'f, P, F>(&mut self, first_frame: F) -> Result<()>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = first_frame.into();
        let layout = frame.layout();
        validate_non_empty_frame(layout.width, layout.height, "ViBe")?;
        debug!(%layout, samples = self.config.num_samples, "initializing ViBe model");

        let (width, height) = (i64::from(layout.width), i64::from(layout.height));
        let channels = usize::from(layout.channels);
        let cn = layout.color_channels();
        let n = self.config.num_samples;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut samples = vec![0.0f32; layout.pixel_count() * n * cn];

        for (index, history) in samples.chunks_mut(n * cn).enumerate() {
            let x = index as i64 % width;
            let y = index as i64 / width;
            for sample in history.chunks_mut(cn) {
                let nx = (x + rng.random_range(-1..=1)).clamp(0, width - 1);
                let ny = (y + rng.random_range(-1..=1)).clamp(0, height - 1);
                let row = frame.row(ny as u32);
                load_color(row, nx as usize, channels, sample);
            }
        }

        self.samples = samples;
        self.layout = Some(layout);
        self.frames = 0;
        Ok(())
    }

    /// Classifies `frame` and refreshes the model from its background pixels.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Vibe::initialize`] has not been called
    /// * `Error::DimensionMismatch` - The frame layout differs from the first frame
    pub fn apply<'f, P, F>(&mut self, frame: F) -> Result<Mask>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let mut mask: Mask = create(frame.width(), frame.height());
        self.apply_into(frame, &mut mask.view_mut())?;
        Ok(mask)
    }

    /// Same as [`Vibe::apply`], writing the mask into `mask`.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Vibe::initialize`] has not been called
    /// * `Error::DimensionMismatch` - The frame layout differs from the first frame, or `mask` has other dimensions
    pub fn apply_into<'f, P, F>(
        &mut self,
        frame: F,
        mask: &mut FrameViewMut<'_, Luma<u8>>,
    ) -> Result<()>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let expected = self.layout.ok_or(Error::NotInitialized {
            algorithm: Algorithm::Vibe,
        })?;
        let layout = frame.layout();
        validate_matching_layout(expected, layout)?;
        validate_mask(layout, mask)?;

        self.frames += 1;
        let config = self.config;
        let frame_key = self.frames << 32;
        let width = layout.width as usize;
        let height = layout.height as usize;
        let channels = usize::from(layout.channels);
        let cn = layout.color_channels();
        let n = config.num_samples;
        let max_distance = config.radius * cn as f32;

        let rows: Vec<_> = frame
            .rows()
            .zip(mask.rows_mut())
            .zip(self.samples.chunks_mut(width * n * cn))
            .enumerate()
            .collect();

        let row_results = map_rows(config.execution, rows, |(y, ((src, dst), model))| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            rng.set_stream(frame_key | y as u64);
            let mut propagations = Vec::new();
            let mut foreground = 0usize;
            let mut color = [0.0f32; MAX_COLOR_CHANNELS];

            for (x, (label, history)) in dst.iter_mut().zip(model.chunks_mut(n * cn)).enumerate() {
                load_color(src, x, channels, &mut color[..cn]);

                let mut matches = 0;
                for sample in history.chunks(cn) {
                    let distance: f32 = sample
                        .iter()
                        .zip(&color[..cn])
                        .map(|(s, c)| (s - c).abs())
                        .sum();
                    if distance <= max_distance {
                        matches += 1;
                        if matches >= config.required_matches {
                            break;
                        }
                    }
                }

                if matches < config.required_matches {
                    *label = FOREGROUND;
                    foreground += 1;
                    continue;
                }
                *label = BACKGROUND;

                if rng.random_range(0..config.subsampling_factor) == 0 {
                    let k = rng.random_range(0..n);
                    history[k * cn..(k + 1) * cn].copy_from_slice(&color[..cn]);
                }
                if rng.random_range(0..config.subsampling_factor) == 0 {
                    let (dx, dy) = NEIGHBOURS[rng.random_range(0..NEIGHBOURS.len())];
                    let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as usize;
                    let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as usize;
                    propagations.push(Propagation {
                        pixel: ny * width + nx,
                        sample: rng.random_range(0..n),
                        color,
                    });
                }
            }
            (foreground, propagations)
        });

        let mut foreground = 0;
        for (count, propagations) in row_results {
            foreground += count;
            for propagation in propagations {
                let start = (propagation.pixel * n + propagation.sample) * cn;
                self.samples[start..start + cn].copy_from_slice(&propagation.color[..cn]);
            }
        }

        trace!(frame = self.frames, foreground, "ViBe frame processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{random_rgb_frame, uniform_frame};
    use crate::Image;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn apply_before_initialize_fails() {
        let mut vibe = Vibe::new(VibeConfig::default()).unwrap();
        let frame: Image<Luma<u8>> = ImageBuffer::new(4, 4);
        assert_eq!(
            vibe.apply(&frame).unwrap_err(),
            Error::NotInitialized {
                algorithm: Algorithm::Vibe
            }
        );
    }

    #[test]
    fn single_pixel_frame_initialises_from_itself() {
        let frame: Image<Luma<u8>> = ImageBuffer::from_pixel(1, 1, Luma([42]));
        let vibe = Vibe::with_first_frame(&frame, VibeConfig::default()).unwrap();
        assert_eq!(vibe.samples.len(), 20);
        assert!(vibe.samples.iter().all(|&s| s == 42.0));
    }

    #[test]
    fn initial_frame_is_background() {
        let frame: Image<Luma<u8>> = ImageBuffer::from_pixel(6, 4, Luma([90]));
        let mut vibe = Vibe::with_first_frame(&frame, VibeConfig::default()).unwrap();
        let mask = vibe.apply(&frame).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == BACKGROUND));
    }

    #[test]
    fn foreground_pixels_leave_model_untouched() {
        let frame: Image<Luma<u8>> = ImageBuffer::from_pixel(5, 5, Luma([20]));
        let mut vibe = Vibe::with_first_frame(&frame, VibeConfig::default()).unwrap();
        let before = vibe.samples.clone();
        let bright = uniform_frame(5, 5, Luma([200u8]));
        let mask = vibe.apply(&bright).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == FOREGROUND));
        assert_eq!(vibe.samples, before);
    }

    #[test]
    fn execution_paths_agree() {
        let first = random_rgb_frame(13, 9, 30..=70, 0);
        let config = VibeConfig::default().with_subsampling_factor(2).with_seed(7);
        let mut sequential = Vibe::with_first_frame(&first, config).unwrap();
        let mut parallel =
            Vibe::with_first_frame(&first, config.with_execution(Execution::Parallel)).unwrap();
        for seed in 1..8 {
            let frame = random_rgb_frame(13, 9, 30..=70, seed);
            assert_eq!(
                sequential.apply(&frame).unwrap(),
                parallel.apply(&frame).unwrap()
            );
        }
        assert_eq!(sequential.samples, parallel.samples);
    }

    #[test]
    fn layout_change_is_rejected() {
        let frame: Image<Luma<u8>> = ImageBuffer::new(4, 4);
        let mut vibe = Vibe::with_first_frame(&frame, VibeConfig::default()).unwrap();
        let other: Image<Rgb<u8>> = ImageBuffer::new(4, 4);
        assert!(matches!(
            vibe.apply(&other),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(Vibe::new(VibeConfig::default().with_num_samples(0)).is_err());
        assert!(Vibe::new(VibeConfig::default().with_required_matches(21)).is_err());
        assert!(Vibe::new(VibeConfig::default().with_radius(0.0)).is_err());
        assert!(Vibe::new(VibeConfig::default().with_subsampling_factor(0)).is_err());
    }
}
