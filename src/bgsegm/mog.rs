//! Fixed-rate Gaussian mixture background model.
//!
//! Every pixel keeps `mixtures` weighted Gaussian components ranked by
//! `weight / sigma`. A sample that falls within `var_threshold` of a
//! component's variance reinforces it; otherwise the weakest slot is
//! replaced. The leading components whose cumulative weight first exceeds
//! `background_ratio` describe the background.

use image::{Luma, Pixel};
use tracing::{debug, trace};

use crate::bgsegm::execution::{map_rows, Execution};
use crate::bgsegm::frame::{create, FrameLayout, FrameView, FrameViewMut, RegionOfInterest};
use crate::bgsegm::{BACKGROUND, FOREGROUND};
use crate::error::{Error, Result};
use crate::utils::{
    load_color, validate_mask, validate_matching_layout, validate_non_empty_frame, Sample,
    MAX_COLOR_CHANNELS,
};
use crate::Mask;

/// Configuration of the [`Mog`] engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MogConfig {
    /// Number of frames the automatic learning rate averages over
    pub history: usize,
    /// Number of Gaussian components per pixel
    pub mixtures: usize,
    /// Cumulative weight of the components that model the background
    pub background_ratio: f32,
    /// Standard deviation assumed for sensor noise, in sample units
    pub noise_sigma: f32,
    /// Squared Mahalanobis distance below which a sample matches a component
    pub var_threshold: f32,
    /// Weight given to a freshly created component
    pub initial_weight: f32,
    /// Row scheduling
    pub execution: Execution,
}

impl Default for MogConfig {
    fn default() -> Self {
        Self {
            history: 200,
            mixtures: 5,
            background_ratio: 0.7,
            noise_sigma: 15.0,
            var_threshold: 2.5 * 2.5,
            initial_weight: 0.05,
            execution: Execution::Sequential,
        }
    }
}

impl MogConfig {
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn with_mixtures(mut self, mixtures: usize) -> Self {
        self.mixtures = mixtures;
        self
    }

    pub fn with_background_ratio(mut self, ratio: f32) -> Self {
        self.background_ratio = ratio;
        self
    }

    pub fn with_noise_sigma(mut self, sigma: f32) -> Self {
        self.noise_sigma = sigma;
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
                "MOG history must be at least 1".to_string(),
            ));
        }
        if self.mixtures == 0 {
            return Err(Error::InvalidParameter(
                "MOG needs at least one mixture component".to_string(),
            ));
        }
        if !(self.background_ratio > 0.0 && self.background_ratio <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "MOG background_ratio must be in (0, 1], got {}",
                self.background_ratio
            )));
        }
        if !(self.noise_sigma > 0.0) || !(self.var_threshold > 0.0) {
            return Err(Error::InvalidParameter(
                "MOG noise_sigma and var_threshold must be positive".to_string(),
            ));
        }
        if !(self.initial_weight > 0.0 && self.initial_weight <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "MOG initial_weight must be in (0, 1], got {}",
                self.initial_weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Component {
    weight: f32,
    sort_key: f32,
    mean: [f32; MAX_COLOR_CHANNELS],
    var: [f32; MAX_COLOR_CHANNELS],
}

/// Per-frame constants of the update rule.
#[derive(Debug, Clone, Copy)]
struct Rule {
    alpha: f32,
    channels: usize,
    color_channels: usize,
    var_threshold: f32,
    background_ratio: f32,
    initial_weight: f32,
    initial_var: f32,
    initial_sort_key: f32,
    min_var: f32,
}

impl Rule {
    fn squared_distance(&self, component: &Component, sample: &[f32]) -> (f32, f32) {
        let mut d2 = 0.0;
        let mut var_sum = 0.0;
        for c in 0..self.color_channels {
            let diff = sample[c] - component.mean[c];
            d2 += diff * diff;
            var_sum += component.var[c];
        }
        (d2, var_sum)
    }

    /// Index one past the last background component.
    fn background_count(&self, mixture: &[Component]) -> usize {
        let mut total = 0.0;
        let mut used = 0;
        for (k, component) in mixture.iter().enumerate() {
            if component.weight < f32::EPSILON {
                break;
            }
            total += component.weight;
            used = k + 1;
            if total > self.background_ratio {
                return used;
            }
        }
        used
    }

    fn find_match(&self, mixture: &[Component], sample: &[f32]) -> (Option<usize>, usize) {
        for (k, component) in mixture.iter().enumerate() {
            if component.weight < f32::EPSILON {
                return (None, k);
            }
            let (d2, var_sum) = self.squared_distance(component, sample);
            if d2 < self.var_threshold * var_sum {
                return (Some(k), k);
            }
        }
        (None, mixture.len())
    }

    /// Classifies `sample` without touching the model.
    fn classify(&self, mixture: &[Component], sample: &[f32]) -> u8 {
        match self.find_match(mixture, sample) {
            (Some(hit), _) if hit < self.background_count(mixture) => BACKGROUND,
            _ => FOREGROUND,
        }
    }

    /// Updates the mixture with `sample` and classifies it.
    fn update(&self, mixture: &mut [Component], sample: &[f32]) -> u8 {
        let alpha = self.alpha;
        let hit = match self.find_match(mixture, sample) {
            (Some(k), _) => {
                let weight = mixture[k].weight + alpha * (1.0 - mixture[k].weight);
                let rho = (alpha / weight).min(1.0);
                let component = &mut mixture[k];
                component.weight = weight;
                let mut var_sum = 0.0;
                for c in 0..self.color_channels {
                    let diff = sample[c] - component.mean[c];
                    component.mean[c] += rho * diff;
                    component.var[c] =
                        (component.var[c] + rho * (diff * diff - component.var[c])).max(self.min_var);
                    var_sum += component.var[c];
                }
                component.sort_key = weight / var_sum.sqrt();

                for (j, other) in mixture.iter_mut().enumerate() {
                    if j != k {
                        other.weight *= 1.0 - alpha;
                        other.sort_key *= 1.0 - alpha;
                    }
                }
                k
            }
            (None, first_free) => {
                let k = first_free.min(mixture.len() - 1);
                let component = &mut mixture[k];
                component.weight = self.initial_weight;
                component.sort_key = self.initial_sort_key;
                component.mean[..self.color_channels].copy_from_slice(&sample[..self.color_channels]);
                component.var = [self.initial_var; MAX_COLOR_CHANNELS];
                k
            }
        };

        let mut hit = hit;
        while hit > 0 && mixture[hit - 1].sort_key < mixture[hit].sort_key {
            mixture.swap(hit - 1, hit);
            hit -= 1;
        }

        let total: f32 = mixture.iter().map(|component| component.weight).sum();
        if total > 0.0 {
            let scale = total.recip();
            for component in mixture.iter_mut() {
                component.weight *= scale;
                component.sort_key *= scale;
            }
        }

        if hit < self.background_count(mixture) {
            BACKGROUND
        } else {
            FOREGROUND
        }
    }
}

/// Fixed-rate Gaussian mixture background subtractor.
///
/// The model is sized lazily by the first frame.
#[derive(Debug, Clone)]
pub struct Mog {
    config: MogConfig,
    layout: Option<FrameLayout>,
    components: Vec<Component>,
    frames: u64,
}

impl Mog {
    /// Creates an engine after validating `config`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: MogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            layout: None,
            components: Vec::new(),
            frames: 0,
        })
    }

    pub fn config(&self) -> &MogConfig {
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
        self.frames = 0;
    }

    fn initialize(&mut self, layout: FrameLayout) {
        debug!(%layout, mixtures = self.config.mixtures, "initializing MOG model");
        self.components = vec![Component::default(); layout.pixel_count() * self.config.mixtures];
        self.layout = Some(layout);
        self.frames = 0;
    }

    /// Updates the model with `frame` and returns its foreground mask.
    ///
    /// A negative `learning_rate` selects `1 / min(frame_count, history)`;
    /// the first frame always seeds the model with rate 1. A rate of 0
    /// classifies without adapting the model and a rate of 1 or more
    /// restarts it from `frame`, which must still match the model's layout.
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

    /// Same as [`Mog::apply`], writing the mask into `mask`.
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
        validate_non_empty_frame(layout.width, layout.height, "MOG")?;
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
            let frames = usize::try_from(self.frames).unwrap_or(usize::MAX);
            1.0 / frames.min(self.config.history) as f32
        };

        let color_channels = layout.color_channels();
        let initial_var = 4.0 * self.config.noise_sigma * self.config.noise_sigma;
        let rule = Rule {
            alpha,
            channels: usize::from(layout.channels),
            color_channels,
            var_threshold: self.config.var_threshold,
            background_ratio: self.config.background_ratio,
            initial_weight: self.config.initial_weight,
            initial_var,
            initial_sort_key: self.config.initial_weight
                / (initial_var * color_channels as f32).sqrt(),
            min_var: self.config.noise_sigma * self.config.noise_sigma,
        };
        let frozen = alpha <= 0.0;

        let mixtures = self.config.mixtures;
        let row_models = frame.width() as usize * mixtures;
        let rows: Vec<_> = frame
            .rows()
            .zip(mask.rows_mut())
            .zip(self.components.chunks_mut(row_models))
            .collect();

        let foreground: usize = map_rows(self.config.execution, rows, |((src, dst), model)| {
            let mut sample = [0.0f32; MAX_COLOR_CHANNELS];
            let mut count = 0;
            for (x, (label, mixture)) in dst.iter_mut().zip(model.chunks_mut(mixtures)).enumerate() {
                load_color(src, x, rule.channels, &mut sample[..rule.color_channels]);
                *label = if frozen {
                    rule.classify(mixture, &sample)
                } else {
                    rule.update(mixture, &sample)
                };
                count += usize::from(*label == FOREGROUND);
            }
            count
        })
        .into_iter()
        .sum();

        trace!(frame = self.frames, alpha, foreground, "MOG frame processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Image;
    use image::{ImageBuffer, Rgb};

    fn solid<P: Pixel>(width: u32, height: u32, pixel: P) -> Image<P> {
        ImageBuffer::from_pixel(width, height, pixel)
    }

    #[test]
    fn first_frame_is_background() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        let mask = mog.apply(&solid(4, 3, Luma([80u8])), -1.0).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == BACKGROUND));
        assert_eq!(mog.frame_count(), 1);
    }

    #[test]
    fn weights_stay_normalised() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        for value in [10u8, 12, 200, 11, 90, 13] {
            mog.apply(&solid(3, 2, Rgb([value, value, value])), -1.0)
                .unwrap();
        }
        for mixture in mog.components.chunks(mog.config.mixtures) {
            let total: f32 = mixture.iter().map(|c| c.weight).sum();
            approx::assert_relative_eq!(total, 1.0, epsilon = 1e-4);
            for pair in mixture.windows(2) {
                if pair[1].weight > 0.0 {
                    assert!(pair[0].sort_key >= pair[1].sort_key);
                }
            }
        }
    }

    #[test]
    fn distant_sample_is_foreground() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        for _ in 0..10 {
            mog.apply(&solid(5, 5, Luma([50u8])), -1.0).unwrap();
        }
        let mask = mog.apply(&solid(5, 5, Luma([220u8])), -1.0).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == FOREGROUND));
    }

    #[test]
    fn zero_learning_rate_freezes_model() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        for _ in 0..5 {
            mog.apply(&solid(2, 2, Luma([40u8])), -1.0).unwrap();
        }
        let before = mog.components.clone();
        let mask = mog.apply(&solid(2, 2, Luma([240u8])), 0.0).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == FOREGROUND));
        assert_eq!(mog.components, before);
    }

    #[test]
    fn layout_change_is_rejected() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        mog.apply(&solid(4, 4, Luma([1u8])), -1.0).unwrap();
        let err = mog.apply(&solid(4, 5, Luma([1u8])), -1.0).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        let err = mog.apply(&solid(4, 4, Luma([1u16])), -1.0).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn learning_rate_one_restarts_model_of_the_same_layout() {
        let mut mog = Mog::new(MogConfig::default()).unwrap();
        mog.apply(&solid(4, 4, Luma([1u8])), -1.0).unwrap();
        mog.apply(&solid(4, 4, Luma([1u8])), -1.0).unwrap();
        let err = mog.apply(&solid(2, 3, Rgb([1u8, 2, 3])), 1.0).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(mog.frame_count(), 2);
        assert_eq!(mog.layout().map(|l| l.width), Some(4));

        mog.apply(&solid(4, 4, Luma([1u8])), 1.0).unwrap();
        assert_eq!(mog.frame_count(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(Mog::new(MogConfig::default().with_mixtures(0)).is_err());
        assert!(Mog::new(MogConfig::default().with_history(0)).is_err());
        assert!(Mog::new(MogConfig::default().with_background_ratio(1.5)).is_err());
        assert!(Mog::new(MogConfig::default().with_noise_sigma(f32::NAN)).is_err());
    }
}
