//! GMG: per-pixel colour histograms with Bayesian classification.
//!
//! The model learns a histogram of quantised colours over an explicit
//! training window, during which it reports every pixel as background.
//! Afterwards each pixel's posterior probability of being background is
//! derived from the weight of its current colour and a fixed prior, and the
//! histogram keeps adapting with exponential forgetting.

use image::{Luma, Pixel};
use imageproc::filter::median_filter;
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

/// Configuration of the [`Gmg`] engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GmgConfig {
    /// Histogram entries kept per pixel
    pub max_features: usize,
    /// Forgetting rate of the histogram after training
    pub learning_rate: f32,
    /// Frames used to build the initial histogram
    pub num_init_frames: u32,
    /// Quantisation levels per channel
    pub quantization_levels: u32,
    /// Prior probability that a pixel is background
    pub background_prior: f32,
    /// Foreground probability above which a pixel is foreground
    pub decision_threshold: f32,
    /// Radius of the median filter applied to the mask; 0 disables it
    pub smoothing_radius: u32,
    /// Smallest sample value of the quantisation range
    pub min_value: f32,
    /// Largest sample value of the quantisation range
    pub max_value: f32,
    /// Keep adapting the histogram after training
    pub update_background_model: bool,
    /// Row scheduling
    pub execution: Execution,
}

impl Default for GmgConfig {
    fn default() -> Self {
        Self {
            max_features: 64,
            learning_rate: 0.025,
            num_init_frames: 20,
            quantization_levels: 16,
            background_prior: 0.8,
            decision_threshold: 0.8,
            smoothing_radius: 3,
            min_value: 0.0,
            max_value: 255.0,
            update_background_model: true,
            execution: Execution::Sequential,
        }
    }
}

impl GmgConfig {
    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_num_init_frames(mut self, frames: u32) -> Self {
        self.num_init_frames = frames;
        self
    }

    pub fn with_quantization_levels(mut self, levels: u32) -> Self {
        self.quantization_levels = levels;
        self
    }

    pub fn with_decision_threshold(mut self, threshold: f32) -> Self {
        self.decision_threshold = threshold;
        self
    }

    pub fn with_smoothing_radius(mut self, radius: u32) -> Self {
        self.smoothing_radius = radius;
        self
    }

    /// Sets the sample range mapped onto the quantisation levels.
    pub fn with_value_range(mut self, min_value: f32, max_value: f32) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_update_background_model(mut self, update: bool) -> Self {
        self.update_background_model = update;
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
        if self.max_features == 0 {
            return Err(Error::InvalidParameter(
                "GMG max_features must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(Error::InvalidParameter(format!(
                "GMG learning_rate must be in [0, 1], got {}",
                self.learning_rate
            )));
        }
        if self.num_init_frames == 0 {
            return Err(Error::InvalidParameter(
                "GMG needs at least one initialization frame".to_string(),
            ));
        }
        if !(1..=256).contains(&self.quantization_levels) {
            return Err(Error::InvalidParameter(format!(
                "GMG quantization_levels must be in 1..=256, got {}",
                self.quantization_levels
            )));
        }
        if !(0.0..=1.0).contains(&self.background_prior)
            || !(0.0..=1.0).contains(&self.decision_threshold)
        {
            return Err(Error::InvalidParameter(
                "GMG background_prior and decision_threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(self.max_value > self.min_value) {
            return Err(Error::InvalidParameter(format!(
                "GMG max_value ({}) must exceed min_value ({})",
                self.max_value, self.min_value
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Feature {
    color: u32,
    weight: f32,
}

/// One pixel's histogram.
struct Histogram<'a> {
    features: &'a mut [Feature],
    len: &'a mut u32,
}

impl Histogram<'_> {
    fn used(&self) -> usize {
        *self.len as usize
    }

    fn weight_of(&self, color: u32) -> f32 {
        self.features[..self.used()]
            .iter()
            .find(|feature| feature.color == color)
            .map_or(0.0, |feature| feature.weight)
    }

    fn decay(&mut self, factor: f32) {
        let used = self.used();
        for feature in &mut self.features[..used] {
            feature.weight *= factor;
        }
    }

    /// Adds `weight` to `color`; returns `true` when a new entry was appended.
    ///
    /// Known colours and replacements move to the front; a full histogram
    /// drops its last entry.
    fn insert(&mut self, color: u32, weight: f32) -> bool {
        let used = self.used();
        match self.features[..used].iter().position(|f| f.color == color) {
            Some(index) => {
                let weight = weight + self.features[index].weight;
                self.features[..=index].rotate_right(1);
                self.features[0] = Feature { color, weight };
                false
            }
            None if used == self.features.len() => {
                self.features.rotate_right(1);
                self.features[0] = Feature { color, weight };
                false
            }
            None => {
                self.features[used] = Feature { color, weight };
                *self.len += 1;
                true
            }
        }
    }

    fn normalize(&mut self) {
        let used = self.used();
        let total: f32 = self.features[..used].iter().map(|f| f.weight).sum();
        if total != 0.0 {
            for feature in &mut self.features[..used] {
                feature.weight /= total;
            }
        }
    }
}

/// Per-frame constants of the update rule.
#[derive(Debug, Clone, Copy)]
struct Rule {
    channels: usize,
    color_channels: usize,
    levels: u32,
    min_value: f32,
    range: f32,
    training: bool,
    finishes_training: bool,
    update: bool,
    learning_rate: f32,
    background_prior: f32,
    decision_threshold: f32,
}

impl Rule {
    fn quantize(&self, color: &[f32]) -> u32 {
        let max_level = (self.levels - 1) as f32;
        color
            .iter()
            .take(self.color_channels)
            .enumerate()
            .fold(0, |packed, (c, &value)| {
                let level = ((value - self.min_value) * self.levels as f32 / self.range)
                    .trunc()
                    .clamp(0.0, max_level) as u32;
                packed | (level << (8 * c))
            })
    }

    fn update(&self, mut histogram: Histogram<'_>, color: u32) -> u8 {
        if self.training {
            histogram.insert(color, 1.0);
            if self.finishes_training {
                histogram.normalize();
            }
            return BACKGROUND;
        }

        let likelihood = histogram.weight_of(color);
        let prior = self.background_prior;
        let evidence = likelihood * prior + (1.0 - likelihood) * (1.0 - prior);
        let posterior = if evidence > 0.0 {
            likelihood * prior / evidence
        } else {
            0.0
        };
        let foreground = 1.0 - posterior > self.decision_threshold;

        if self.update {
            histogram.decay(1.0 - self.learning_rate);
            if histogram.insert(color, self.learning_rate) {
                histogram.normalize();
            }
        }

        if foreground {
            FOREGROUND
        } else {
            BACKGROUND
        }
    }
}

/// Histogram-based Bayesian background subtractor.
///
/// Must be initialised with a first frame before [`Gmg::apply`]; the first
/// frame passed to `apply` is the first training frame.
#[derive(Debug, Clone)]
pub struct Gmg {
    config: GmgConfig,
    layout: Option<FrameLayout>,
    features: Vec<Feature>,
    feature_counts: Vec<u32>,
    frames: u64,
}

impl Gmg {
    /// Creates an uninitialised engine after validating `config`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: GmgConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            layout: None,
            features: Vec::new(),
            feature_counts: Vec::new(),
            frames: 0,
        })
    }

    /// Creates an engine sized for `first_frame`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid or the frame is empty
    pub fn with_first_frame<'f, P, F>(first_frame: F, config: GmgConfig) -> Result<Self>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let mut gmg = Self::new(config)?;
        gmg.initialize(first_frame)?;
        Ok(gmg)
    }

    pub fn config(&self) -> &GmgConfig {
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

    /// Whether the next frame still belongs to the training window.
    pub fn is_training(&self) -> bool {
        self.frames < u64::from(self.config.num_init_frames)
    }

    /// Drops the model; [`Gmg::initialize`] must be called again.
    pub fn reset(&mut self) {
        self.layout = None;
        self.features.clear();
        self.feature_counts.clear();
        self.frames = 0;
    }

    /// Sizes empty histograms for frames shaped like `first_frame` and
    /// restarts the training window.
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
        let layout = first_frame.into().layout();
        validate_non_empty_frame(layout.width, layout.height, "GMG")?;
        debug!(
            %layout,
            training_frames = self.config.num_init_frames,
            "initializing GMG model"
        );
        let pixels = layout.pixel_count();
        self.features = vec![Feature::default(); pixels * self.config.max_features];
        self.feature_counts = vec![0; pixels];
        self.layout = Some(layout);
        self.frames = 0;
        Ok(())
    }

    /// Updates the histograms with `frame` and returns its foreground mask.
    ///
    /// The mask is all background during the training window.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Gmg::initialize`] has not been called
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

    /// Same as [`Gmg::apply`], writing the mask into `mask`.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Gmg::initialize`] has not been called
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
            algorithm: Algorithm::Gmg,
        })?;
        let layout = frame.layout();
        validate_matching_layout(expected, layout)?;
        validate_mask(layout, mask)?;

        let config = self.config;
        let init_frames = u64::from(config.num_init_frames);
        let training = self.frames < init_frames;
        let rule = Rule {
            channels: usize::from(layout.channels),
            color_channels: layout.color_channels(),
            levels: config.quantization_levels,
            min_value: config.min_value,
            range: config.max_value - config.min_value,
            training,
            finishes_training: self.frames + 1 == init_frames,
            update: config.update_background_model,
            learning_rate: config.learning_rate,
            background_prior: config.background_prior,
            decision_threshold: config.decision_threshold,
        };

        let width = layout.width as usize;
        let max_features = config.max_features;
        let rows: Vec<_> = frame
            .rows()
            .zip(mask.rows_mut())
            .zip(self.features.chunks_mut(width * max_features))
            .zip(self.feature_counts.chunks_mut(width))
            .collect();

        let raw_foreground: usize = map_rows(config.execution, rows, |(((src, dst), features), counts)| {
            let mut color = [0.0f32; MAX_COLOR_CHANNELS];
            let mut count = 0;
            let pixels = dst
                .iter_mut()
                .zip(features.chunks_mut(max_features))
                .zip(counts.iter_mut());
            for (x, ((label, features), len)) in pixels.enumerate() {
                load_color(src, x, rule.channels, &mut color[..rule.color_channels]);
                let quantized = rule.quantize(&color);
                *label = rule.update(Histogram { features, len }, quantized);
                count += usize::from(*label == FOREGROUND);
            }
            count
        })
        .into_iter()
        .sum();

        if !training && config.smoothing_radius > 0 {
            let radius = config.smoothing_radius;
            let smoothed = median_filter(&mask.to_image(), radius, radius);
            mask.copy_from(&smoothed.view())?;
        }

        self.frames += 1;
        if self.frames == init_frames {
            debug!(frames = self.frames, "GMG training finished");
        }
        trace!(frame = self.frames, raw_foreground, training, "GMG frame processed");
        Ok(())
    }
}
