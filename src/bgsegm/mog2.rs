//! Adaptive Gaussian mixture background model with shadow detection.
//!
//! Zivkovic's improved mixture model: each pixel carries between zero and
//! `mixtures` components sharing one isotropic variance each. Components
//! are created on demand and pruned when their weight decays below the
//! complexity-reduction floor.

use image::{Luma, Pixel};
use tracing::{debug, trace};

use crate::bgsegm::execution::{map_rows, Execution};
use crate::bgsegm::frame::{create, FrameLayout, FrameView, FrameViewMut, RegionOfInterest};
use crate::bgsegm::subtractor::Algorithm;
use crate::bgsegm::{BACKGROUND, FOREGROUND, SHADOW};
use crate::error::{Error, Result};
use crate::utils::{
    compose_image, load_color, validate_mask, validate_matching_layout, validate_non_empty_frame,
    Sample, MAX_COLOR_CHANNELS,
};
use crate::{Image, Mask};

/// Configuration of the [`Mog2`] engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Mog2Config {
    /// Number of frames the automatic learning rate averages over
    pub history: usize,
    /// Maximum number of components per pixel
    pub mixtures: usize,
    /// Squared Mahalanobis distance deciding whether a sample is background
    pub var_threshold: f32,
    /// Cumulative weight of the components that model the background
    pub background_ratio: f32,
    /// Squared Mahalanobis distance deciding whether a sample fits a component
    pub var_threshold_gen: f32,
    /// Variance of a newly created component
    pub var_init: f32,
    /// Lower variance bound
    pub var_min: f32,
    /// Upper variance bound
    pub var_max: f32,
    /// Complexity reduction prior; weights decay towards `-alpha * ct`
    pub complexity_reduction_threshold: f32,
    /// Label shadows instead of reporting them as foreground
    pub detect_shadows: bool,
    /// Mask value written for shadow pixels
    pub shadow_value: u8,
    /// Darkest brightness ratio still accepted as a shadow
    pub shadow_threshold: f32,
    /// Row scheduling
    pub execution: Execution,
}

impl Default for Mog2Config {
    fn default() -> Self {
        Self {
            history: 500,
            mixtures: 5,
            var_threshold: 16.0,
            background_ratio: 0.9,
            var_threshold_gen: 9.0,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 5.0 * 15.0,
            complexity_reduction_threshold: 0.05,
            detect_shadows: true,
            shadow_value: SHADOW,
            shadow_threshold: 0.5,
            execution: Execution::Sequential,
        }
    }
}

impl Mog2Config {
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn with_mixtures(mut self, mixtures: usize) -> Self {
        self.mixtures = mixtures;
        self
    }

    pub fn with_var_threshold(mut self, threshold: f32) -> Self {
        self.var_threshold = threshold;
        self
    }

    pub fn with_background_ratio(mut self, ratio: f32) -> Self {
        self.background_ratio = ratio;
        self
    }

    pub fn with_detect_shadows(mut self, detect: bool) -> Self {
        self.detect_shadows = detect;
        self
    }

    pub fn with_shadow_value(mut self, value: u8) -> Self {
        self.shadow_value = value;
        self
    }

    pub fn with_shadow_threshold(mut self, threshold: f32) -> Self {
        self.shadow_threshold = threshold;
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
        if self.history == 0 {
            return Err(Error::InvalidParameter(
                "MOG2 history must be at least 1".to_string(),
            ));
        }
        if self.mixtures == 0 {
            return Err(Error::InvalidParameter(
                "MOG2 needs at least one mixture component".to_string(),
            ));
        }
        if !(self.background_ratio > 0.0 && self.background_ratio <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "MOG2 background_ratio must be in (0, 1], got {}",
                self.background_ratio
            )));
        }
        if !(self.var_threshold > 0.0 && self.var_threshold_gen > 0.0) {
            return Err(Error::InvalidParameter(
                "MOG2 variance thresholds must be positive".to_string(),
            ));
        }
        if !(self.var_min > 0.0 && self.var_min <= self.var_init && self.var_init <= self.var_max)
        {
            return Err(Error::InvalidParameter(format!(
                "MOG2 variances must satisfy 0 < var_min <= var_init <= var_max, got {} / {} / {}",
                self.var_min, self.var_init, self.var_max
            )));
        }
        if !(self.complexity_reduction_threshold >= 0.0) {
            return Err(Error::InvalidParameter(
                "MOG2 complexity_reduction_threshold must not be negative".to_string(),
            ));
        }
        if !(self.shadow_threshold > 0.0 && self.shadow_threshold <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "MOG2 shadow_threshold must be in (0, 1], got {}",
                self.shadow_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Component {
    weight: f32,
    variance: f32,
    mean: [f32; MAX_COLOR_CHANNELS],
}

/// Per-frame constants of the update rule.
#[derive(Debug, Clone, Copy)]
struct Rule {
    alpha: f32,
    channels: usize,
    color_channels: usize,
    background_ratio: f32,
    var_threshold: f32,
    var_threshold_gen: f32,
    var_init: f32,
    var_min: f32,
    var_max: f32,
    prune: f32,
    shadow: Option<(u8, f32)>,
}

impl Rule {
    fn squared_distance(&self, component: &Component, sample: &[f32]) -> f32 {
        (0..self.color_channels)
            .map(|c| {
                let diff = component.mean[c] - sample[c];
                diff * diff
            })
            .sum()
    }

    /// Updates the pixel's components with `sample` and labels it.
    fn update(&self, mixture: &mut [Component], used: &mut u8, sample: &[f32]) -> u8 {
        let alpha = self.alpha;
        let keep = 1.0 - alpha;
        let mut modes = usize::from(*used);
        let mut remaining = modes;
        let mut background = false;
        let mut fits = false;
        let mut total_weight = 0.0;

        for mode in 0..modes {
            let mut weight = keep * mixture[mode].weight + self.prune;
            let mut swaps = 0;
            if !fits {
                let variance = mixture[mode].variance;
                let d2 = self.squared_distance(&mixture[mode], sample);

                if total_weight < self.background_ratio && d2 < self.var_threshold * variance {
                    background = true;
                }

                if d2 < self.var_threshold_gen * variance {
                    fits = true;
                    weight += alpha;
                    let k = alpha / weight;
                    let component = &mut mixture[mode];
                    for c in 0..self.color_channels {
                        let diff = component.mean[c] - sample[c];
                        component.mean[c] -= k * diff;
                    }
                    component.variance = (variance + k * (d2 - variance))
                        .clamp(self.var_min, self.var_max);

                    let mut i = mode;
                    while i > 0 && weight >= mixture[i - 1].weight {
                        mixture.swap(i - 1, i);
                        swaps += 1;
                        i -= 1;
                    }
                }
            }

            if weight < -self.prune {
                weight = 0.0;
                remaining -= 1;
            }
            mixture[mode - swaps].weight = weight;
            total_weight += weight;
        }

        modes = remaining;
        if total_weight > 0.0 {
            let scale = total_weight.recip();
            for component in &mut mixture[..modes] {
                component.weight *= scale;
            }
        }

        if !fits && alpha > 0.0 {
            let mode = if modes == mixture.len() {
                modes - 1
            } else {
                modes += 1;
                modes - 1
            };

            if modes == 1 {
                mixture[mode].weight = 1.0;
            } else {
                mixture[mode].weight = alpha;
                for component in &mut mixture[..modes - 1] {
                    component.weight *= keep;
                }
            }
            mixture[mode].mean[..self.color_channels]
                .copy_from_slice(&sample[..self.color_channels]);
            mixture[mode].variance = self.var_init;

            let mut i = modes - 1;
            while i > 0 && alpha >= mixture[i - 1].weight {
                mixture.swap(i - 1, i);
                i -= 1;
            }
        }

        // `modes` never exceeds `mixtures`, which is stored as u8 by construction
        *used = u8::try_from(modes).unwrap_or(u8::MAX);

        if background {
            BACKGROUND
        } else if self.is_shadow(&mixture[..modes], sample) {
            self.shadow.map_or(FOREGROUND, |(value, _)| value)
        } else {
            FOREGROUND
        }
    }

    /// Brightness/colour-distortion test against the background components.
    fn is_shadow(&self, mixture: &[Component], sample: &[f32]) -> bool {
        let Some((_, tau)) = self.shadow else {
            return false;
        };
        let mut total_weight = 0.0;
        for component in mixture {
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for c in 0..self.color_channels {
                numerator += sample[c] * component.mean[c];
                denominator += component.mean[c] * component.mean[c];
            }
            if denominator == 0.0 {
                return false;
            }
            if numerator <= denominator && numerator >= tau * denominator {
                let a = numerator / denominator;
                let dist2a: f32 = (0..self.color_channels)
                    .map(|c| {
                        let d = a * component.mean[c] - sample[c];
                        d * d
                    })
                    .sum();
                if dist2a < self.var_threshold * component.variance * a * a {
                    return true;
                }
            }
            total_weight += component.weight;
            if total_weight > self.background_ratio {
                return false;
            }
        }
        false
    }
}

/// Adaptive Gaussian mixture background subtractor.
///
/// The model is sized lazily by the first frame.
#[derive(Debug, Clone)]
pub struct Mog2 {
    config: Mog2Config,
    layout: Option<FrameLayout>,
    components: Vec<Component>,
    modes_used: Vec<u8>,
    frames: u64,
}

impl Mog2 {
    /// Creates an engine after validating `config`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: Mog2Config) -> Result<Self> {
        config.validate()?;
        if config.mixtures > usize::from(u8::MAX) {
            return Err(Error::InvalidParameter(format!(
                "MOG2 supports at most {} mixture components",
                u8::MAX
            )));
        }
        Ok(Self {
            config,
            layout: None,
            components: Vec::new(),
            modes_used: Vec::new(),
            frames: 0,
        })
    }

    pub fn config(&self) -> &Mog2Config {
        &self.config
    }

    /// Layout of the frames the model was sized for, if any.
    pub fn layout(&self) -> Option<FrameLayout> {
        self.layout
    }

    /// Number of frames processed since the last (re)initialisation.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Drops the model; the next frame starts a new one.
    pub fn reset(&mut self) {
        self.layout = None;
        self.components.clear();
        self.modes_used.clear();
        self.frames = 0;
    }

    fn initialize(&mut self, layout: FrameLayout) {
        debug!(%layout, mixtures = self.config.mixtures, "initializing MOG2 model");
        let pixels = layout.pixel_count();
        self.components = vec![Component::default(); pixels * self.config.mixtures];
        self.modes_used = vec![0; pixels];
        self.layout = Some(layout);
        self.frames = 0;
    }

    /// Updates the model with `frame` and returns its mask.
    ///
    /// A negative `learning_rate` selects `1 / min(2 * frame_count, history)`;
    /// a rate of 1 or more restarts the model from `frame` without resizing it.
    /// Shadow pixels are labelled with the configured shadow value when shadow
    /// detection is on.
    ///
    /// # Errors
    ///
    /// * `Error::DimensionMismatch` - The frame layout changed since the model was sized
    /// * `Error::InvalidParameter` - The frame is empty
    pub fn apply<'f, P, F>(&mut self, frame: F, learning_rate: f64) -> Result<Mask>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let mut mask: Mask = create(frame.width(), frame.height());
        self.apply_into(frame, learning_rate, &mut mask.view_mut())?;
        Ok(mask)
    }

    /// Same as [`Mog2::apply`], writing the mask into `mask`.
    ///
    /// # Errors
    ///
    /// * `Error::DimensionMismatch` - The frame layout changed, or `mask` has other dimensions
    /// * `Error::InvalidParameter` - The frame is empty
    pub fn apply_into<'f, P, F>(
        &mut self,
        frame: F,
        learning_rate: f64,
        mask: &mut FrameViewMut<'_, Luma<u8>>,
    ) -> Result<()>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let layout = frame.layout();
        validate_non_empty_frame(layout.width, layout.height, "MOG2")?;
        validate_mask(layout, mask)?;
        match self.layout {
            Some(expected) => {
                validate_matching_layout(expected, layout)?;
                // a full learning rate reseeds the model from this frame
                if learning_rate >= 1.0 {
                    self.initialize(layout);
                }
            }
            None => self.initialize(layout),
        }

        self.frames += 1;
        let alpha = if learning_rate >= 0.0 && self.frames > 1 {
            learning_rate as f32
        } else {
            let frames = usize::try_from(self.frames.saturating_mul(2)).unwrap_or(usize::MAX);
            1.0 / frames.min(self.config.history) as f32
        };

        let config = &self.config;
        let rule = Rule {
            alpha,
            channels: usize::from(layout.channels),
            color_channels: layout.color_channels(),
            background_ratio: config.background_ratio,
            var_threshold: config.var_threshold,
            var_threshold_gen: config.var_threshold_gen,
            var_init: config.var_init,
            var_min: config.var_min,
            var_max: config.var_max,
            prune: -alpha * config.complexity_reduction_threshold,
            shadow: config
                .detect_shadows
                .then_some((config.shadow_value, config.shadow_threshold)),
        };

        let mixtures = config.mixtures;
        let width = frame.width() as usize;
        let rows: Vec<_> = frame
            .rows()
            .zip(mask.rows_mut())
            .zip(self.components.chunks_mut(width * mixtures))
            .zip(self.modes_used.chunks_mut(width))
            .collect();

        let foreground: usize = map_rows(config.execution, rows, |(((src, dst), model), used)| {
            let mut sample = [0.0f32; MAX_COLOR_CHANNELS];
            let mut count = 0;
            let pixels = dst
                .iter_mut()
                .zip(model.chunks_mut(mixtures))
                .zip(used.iter_mut());
            for (x, ((label, mixture), used)) in pixels.enumerate() {
                load_color(src, x, rule.channels, &mut sample[..rule.color_channels]);
                *label = rule.update(mixture, used, &sample);
                count += usize::from(*label == FOREGROUND);
            }
            count
        })
        .into_iter()
        .sum();

        trace!(frame = self.frames, alpha, foreground, "MOG2 frame processed");
        Ok(())
    }

    /// Reconstructs the background from the leading components of every pixel.
    ///
    /// Each pixel is the weight-normalised mean of its components, taken in
    /// order until their cumulative weight exceeds `background_ratio`.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - No frame has been processed yet
    /// * `Error::DimensionMismatch` - `P` has another colour channel count than the frames
    pub fn background_image<P>(&self) -> Result<Image<P>>
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        let layout = self.layout.ok_or(Error::NotInitialized {
            algorithm: Algorithm::Mog2,
        })?;
        let cn = layout.color_channels();
        let mixtures = self.config.mixtures;

        let means: Vec<[f32; MAX_COLOR_CHANNELS]> = self
            .components
            .chunks(mixtures)
            .zip(&self.modes_used)
            .map(|(mixture, &used)| {
                let mut mean = [0.0f32; MAX_COLOR_CHANNELS];
                let mut total_weight = 0.0f32;
                for component in &mixture[..usize::from(used)] {
                    for c in 0..cn {
                        mean[c] += component.weight * component.mean[c];
                    }
                    total_weight += component.weight;
                    if total_weight > self.config.background_ratio {
                        break;
                    }
                }
                if total_weight > 0.0 {
                    let scale = total_weight.recip();
                    mean.iter_mut().for_each(|m| *m *= scale);
                }
                mean
            })
            .collect();

        compose_image(layout, |pixel, channel| means[pixel][channel])
    }
}
