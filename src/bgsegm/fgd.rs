//! FGD: foreground object detection from colour feature statistics.
//!
//! Li, Huang, Gu and Tian's statistical model. Change detection with an
//! adaptive threshold selects candidate pixels, which are then classified
//! against two per-pixel feature tables: colours seen at the pixel while it
//! was stationary, and (previous, current) colour pairs seen while it was
//! moving. A reference background image is maintained alongside.

use image::{Luma, Pixel};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use itertools::{izip, Itertools};
use tracing::{debug, trace};

use crate::bgsegm::execution::{for_each_row, map_rows, Execution};
use crate::bgsegm::frame::{create, FrameLayout, FrameView, FrameViewMut, RegionOfInterest};
use crate::bgsegm::subtractor::Algorithm;
use crate::bgsegm::{BACKGROUND, FOREGROUND};
use crate::error::{Error, Result};
use crate::utils::{
    compose_image, validate_mask, validate_matching_layout, validate_non_empty_frame, Sample,
    MAX_COLOR_CHANNELS,
};
use crate::{Image, Mask};

/// Probabilities below this are treated as zero.
const MIN_PV: f32 = 1e-10;

/// Fraction of raw foreground pixels above which every pixel counts as trained.
const BG_UPDATE_THRESHOLD: f32 = 0.5;

/// Smallest per-channel change threshold.
const MIN_CHANGE_THRESHOLD: u8 = 10;

/// Configuration of the [`Fgd`] engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FgdConfig {
    /// Quantisation levels of the stationary colour features
    pub lc: u32,
    /// Stationary features used for classification
    pub n1c: usize,
    /// Stationary features stored per pixel
    pub n2c: usize,
    /// Quantisation levels of the co-occurrence features
    pub lcc: u32,
    /// Co-occurrence features used for classification
    pub n1cc: usize,
    /// Co-occurrence features stored per pixel
    pub n2cc: usize,
    /// Fill holes inside foreground regions
    pub fill_holes: bool,
    /// Opening/closing iterations applied to the raw mask; 0 disables them
    pub morphing_iterations: u8,
    /// Learning rate of the reference background
    pub alpha1: f32,
    /// Learning rate of trained feature tables
    pub alpha2: f32,
    /// Learning rate of untrained feature tables
    pub alpha3: f32,
    /// Feature matching tolerance, in quantisation levels
    pub delta: f32,
    /// Cumulative probability that marks a feature table as trained
    pub t: f32,
    /// Foreground regions with a smaller bounding box area are discarded,
    /// unless they span the whole frame
    pub min_area: u32,
    /// Row scheduling
    pub execution: Execution,
}

impl Default for FgdConfig {
    fn default() -> Self {
        Self {
            lc: 128,
            n1c: 15,
            n2c: 25,
            lcc: 64,
            n1cc: 25,
            n2cc: 40,
            fill_holes: true,
            morphing_iterations: 1,
            alpha1: 0.1,
            alpha2: 0.005,
            alpha3: 0.1,
            delta: 2.0,
            t: 0.9,
            min_area: 15,
            execution: Execution::Sequential,
        }
    }
}

impl FgdConfig {
    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_fill_holes(mut self, fill_holes: bool) -> Self {
        self.fill_holes = fill_holes;
        self
    }

    pub fn with_morphing_iterations(mut self, iterations: u8) -> Self {
        self.morphing_iterations = iterations;
        self
    }

    /// Sets the background, trained and untrained learning rates.
    pub fn with_learning_rates(mut self, alpha1: f32, alpha2: f32, alpha3: f32) -> Self {
        self.alpha1 = alpha1;
        self.alpha2 = alpha2;
        self.alpha3 = alpha3;
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
        if self.lc == 0 || self.lcc == 0 {
            return Err(Error::InvalidParameter(
                "FGD quantisation levels must be positive".to_string(),
            ));
        }
        if self.n1c == 0 || self.n1c > self.n2c || self.n1cc == 0 || self.n1cc > self.n2cc {
            return Err(Error::InvalidParameter(format!(
                "FGD table sizes must satisfy 0 < n1 <= n2, got n1c={} n2c={} n1cc={} n2cc={}",
                self.n1c, self.n2c, self.n1cc, self.n2cc
            )));
        }
        for (name, alpha) in [
            ("alpha1", self.alpha1),
            ("alpha2", self.alpha2),
            ("alpha3", self.alpha3),
        ] {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(Error::InvalidParameter(format!(
                    "FGD {name} must be in (0, 1), got {alpha}"
                )));
            }
        }
        if !(self.delta >= 0.0) || !(self.t > 0.0) {
            return Err(Error::InvalidParameter(
                "FGD delta must not be negative and t must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of one [`Fgd::apply`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FgdUpdate {
    /// Post-processed foreground mask
    pub mask: Mask,
    /// Pixels flagged by either change detector
    pub changed_pixels: usize,
    /// Pixels classified foreground before post-processing
    pub foreground_pixels: usize,
    /// Foreground regions kept by post-processing
    pub regions: usize,
}

/// Counters of one [`Fgd::apply_into`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FgdSummary {
    /// Pixels flagged by either change detector
    pub changed_pixels: usize,
    /// Pixels classified foreground before post-processing
    pub foreground_pixels: usize,
    /// Foreground regions kept by post-processing
    pub regions: usize,
}

/// Entry of the stationary colour table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ColorFeature {
    pv: f32,
    pvb: f32,
    color: [u8; MAX_COLOR_CHANNELS],
}

/// Entry of the (previous, current) colour co-occurrence table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CooccurrenceFeature {
    pv: f32,
    pvb: f32,
    previous: [u8; MAX_COLOR_CHANNELS],
    current: [u8; MAX_COLOR_CHANNELS],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PixelStat {
    pbc: f32,
    pbcc: f32,
    trained_static: bool,
    trained_dynamic: bool,
}

trait Feature {
    fn pv(&self) -> f32;
    fn pvb(&self) -> f32;
    fn probabilities_mut(&mut self) -> (&mut f32, &mut f32);
}

macro_rules! impl_feature {
    ($($t:ty),*) => {
        $(
            impl Feature for $t {
                fn pv(&self) -> f32 {
                    self.pv
                }

                fn pvb(&self) -> f32 {
                    self.pvb
                }

                fn probabilities_mut(&mut self) -> (&mut f32, &mut f32) {
                    (&mut self.pv, &mut self.pvb)
                }
            }
        )*
    };
}

impl_feature!(ColorFeature, CooccurrenceFeature);

/// Moves the entry at `index` in front of the first entry it outranks.
fn resort<T: Feature>(table: &mut [T], index: usize) {
    let pv = table[index].pv();
    if let Some(k) = (0..index).find(|&k| table[k].pv() <= pv) {
        table[k..=index].rotate_right(1);
    }
}

/// Sums the leading non-empty probabilities; returns `(Σpv, Σpvb)`.
fn leading_sums<T: Feature>(table: &[T], limit: usize) -> (f32, f32) {
    table
        .iter()
        .take(limit)
        .take_while(|feature| feature.pv() != 0.0)
        .fold((0.0, 0.0), |(pv, pvb), feature| {
            (pv + feature.pv(), pvb + feature.pvb())
        })
}

/// Re-estimates `pvb` after a once-off background change.
fn absorb_once_off_change<T: Feature>(table: &mut [T], limit: usize, pb: f32) {
    if (1.0 - pb).abs() <= f32::EPSILON {
        return;
    }
    for feature in table
        .iter_mut()
        .take(limit)
        .take_while(|feature| feature.pv() != 0.0)
    {
        let (pv, pvb) = feature.probabilities_mut();
        *pvb = (*pv - pb * *pvb) / (1.0 - pb);
    }
}

/// Per-frame constants of the model.
#[derive(Debug, Clone, Copy)]
struct Rule {
    cn: usize,
    delta_c: i32,
    delta_cc: i32,
    n1c: usize,
    n1cc: usize,
    alpha1: f32,
    alpha2: f32,
    alpha3: f32,
    t: f32,
}

impl Rule {
    fn matches_color(&self, feature: &ColorFeature, current: &[u8]) -> Option<i32> {
        let mut distance = 0;
        for c in 0..self.cn {
            let d = (i32::from(feature.color[c]) - i32::from(current[c])).abs();
            if d > self.delta_c {
                return None;
            }
            distance += d;
        }
        Some(distance)
    }

    fn matches_cooccurrence(
        &self,
        feature: &CooccurrenceFeature,
        previous: &[u8],
        current: &[u8],
    ) -> Option<i32> {
        let mut distance = 0;
        for c in 0..self.cn {
            let dp = (i32::from(feature.previous[c]) - i32::from(previous[c])).abs();
            if dp > self.delta_cc {
                return None;
            }
            let dc = (i32::from(feature.current[c]) - i32::from(current[c])).abs();
            if dc > self.delta_cc {
                return None;
            }
            distance += dp + dc;
        }
        Some(distance)
    }

    /// Bayes decision for a pixel flagged by change detection.
    fn classify(
        &self,
        stat: &PixelStat,
        colors: &[ColorFeature],
        cooccurrences: &[CooccurrenceFeature],
        previous: &[u8],
        current: &[u8],
        motion: bool,
    ) -> bool {
        let (pv, pvb, pb) = if motion {
            if !stat.trained_dynamic {
                return true;
            }
            let (pv, pvb) = cooccurrences
                .iter()
                .take(self.n1cc)
                .take_while(|f| f.pv > self.alpha2)
                .filter(|f| self.matches_cooccurrence(f, previous, current).is_some())
                .fold((0.0, 0.0), |(pv, pvb), f| (pv + f.pv, pvb + f.pvb));
            (pv, pvb, stat.pbcc)
        } else if stat.trained_static {
            let (pv, pvb) = colors
                .iter()
                .take(self.n1c)
                .take_while(|f| f.pv > self.alpha2)
                .filter(|f| self.matches_color(f, current).is_some())
                .fold((0.0, 0.0), |(pv, pvb), f| (pv + f.pv, pvb + f.pvb));
            (pv, pvb, stat.pbc)
        } else {
            return false;
        };
        2.0 * pvb * pb <= pv
    }

    fn update_dynamic(
        &self,
        stat: &mut PixelStat,
        table: &mut [CooccurrenceFeature],
        previous: &[u8],
        current: &[u8],
        foreground: bool,
    ) {
        let alpha = if stat.trained_dynamic {
            self.alpha2
        } else {
            self.alpha3
        };
        stat.pbcc *= 1.0 - alpha;
        if !foreground {
            stat.pbcc += alpha;
        }

        let mut best: Option<(usize, i32)> = None;
        for (k, feature) in table.iter_mut().enumerate() {
            if feature.pv == 0.0 {
                break;
            }
            feature.pv *= 1.0 - alpha;
            feature.pvb *= 1.0 - alpha;
            if feature.pv < MIN_PV {
                feature.pv = 0.0;
                feature.pvb = 0.0;
                continue;
            }
            if let Some(distance) = self.matches_cooccurrence(feature, previous, current) {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((k, distance));
                }
            }
        }

        let index = match best {
            Some((k, _)) => {
                table[k].pv += alpha;
                if !foreground {
                    table[k].pvb += alpha;
                }
                k
            }
            None => {
                let k = table.len() - 1;
                let feature = &mut table[k];
                feature.pv = alpha;
                feature.pvb = if foreground { 0.0 } else { alpha };
                feature.previous[..self.cn].copy_from_slice(&previous[..self.cn]);
                feature.current[..self.cn].copy_from_slice(&current[..self.cn]);
                k
            }
        };
        resort(table, index);

        let (sum_pv, sum_pvb) = leading_sums(table, self.n1cc);
        if sum_pv > self.t {
            stat.trained_dynamic = true;
        }
        if sum_pv - stat.pbcc * sum_pvb > self.t {
            absorb_once_off_change(table, self.n1cc, stat.pbcc);
        }
    }

    fn update_static(
        &self,
        stat: &mut PixelStat,
        table: &mut [ColorFeature],
        current: &[u8],
        foreground: bool,
    ) {
        let alpha = if stat.trained_static {
            self.alpha2
        } else {
            self.alpha3
        };
        stat.pbc *= 1.0 - alpha;
        if !foreground {
            stat.pbc += alpha;
        }

        let mut best: Option<(usize, i32)> = None;
        for (k, feature) in table.iter_mut().enumerate() {
            feature.pv *= 1.0 - alpha;
            feature.pvb *= 1.0 - alpha;
            if feature.pv < MIN_PV {
                feature.pv = 0.0;
                feature.pvb = 0.0;
                continue;
            }
            if let Some(distance) = self.matches_color(feature, current) {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((k, distance));
                }
            }
        }

        let index = match best {
            Some((k, _)) => {
                table[k].pv += alpha;
                if !foreground {
                    table[k].pvb += alpha;
                }
                k
            }
            None => {
                let k = table.len() - 1;
                let feature = &mut table[k];
                feature.pv = alpha;
                feature.pvb = if foreground { 0.0 } else { alpha };
                feature.color[..self.cn].copy_from_slice(&current[..self.cn]);
                k
            }
        };
        resort(table, index);

        let (sum_pv, sum_pvb) = leading_sums(table, self.n1c);
        if sum_pv > self.t {
            stat.trained_static = true;
        }
        if sum_pv - stat.pbc * sum_pvb > self.t {
            absorb_once_off_change(table, self.n1c, stat.pbc);
            stat.pbc = 1.0 - stat.pbc;
        }
    }

    /// Refreshes the reference background of a background pixel.
    fn update_background(
        &self,
        background: &mut [u8],
        top: &ColorFeature,
        current: &[u8],
        changed: bool,
    ) {
        if !changed {
            for (b, &c) in background.iter_mut().zip(current) {
                let blended = f32::from(*b) * (1.0 - self.alpha1) + self.alpha1 * f32::from(c);
                *b = u8::from_f32_rounded(blended);
            }
        } else if top.pv > 0.0 {
            background.copy_from_slice(&top.color[..self.cn]);
        }
    }
}

/// Adaptive change-detection threshold of one channel's difference histogram.
///
/// For every candidate threshold the standard deviation of the differences
/// at or above it is computed; the largest deviation is the threshold.
fn channel_threshold(histogram: &[u64; 256]) -> u8 {
    let mut count = histogram[255];
    let mut sum = 255 * histogram[255];
    let mut sq_sum = 255 * 255 * histogram[255];
    let mut best = 0.0f64;
    for t in (0..255u64).rev() {
        let n = histogram[t as usize];
        count += n;
        sum += t * n;
        sq_sum += t * t * n;
        let total = count.max(1) as f64;
        let mean = sum as f64 / total;
        let sigma = (sq_sum as f64 / total - mean * mean).max(0.0).sqrt();
        best = best.max(sigma);
    }
    (best as u8).max(MIN_CHANGE_THRESHOLD)
}

/// Flags pixels whose difference between `reference` and `current` exceeds
/// the adaptive threshold on any channel.
fn detect_changes(
    reference: &[u8],
    current: &[u8],
    flags: &mut [bool],
    width: usize,
    cn: usize,
    execution: Execution,
) {
    let rows: Vec<_> = reference
        .chunks(width * cn)
        .zip_eq(current.chunks(width * cn))
        .collect();
    let histograms = map_rows(execution, rows, |(reference, current)| {
        let mut histogram = [[0u64; 256]; MAX_COLOR_CHANNELS];
        for (r, c) in reference.chunks_exact(cn).zip(current.chunks_exact(cn)) {
            for channel in 0..cn {
                histogram[channel][usize::from(r[channel].abs_diff(c[channel]))] += 1;
            }
        }
        histogram
    });

    let mut thresholds = [0u8; MAX_COLOR_CHANNELS];
    for (channel, threshold) in thresholds.iter_mut().enumerate().take(cn) {
        let mut histogram = [0u64; 256];
        for row in &histograms {
            for (total, &n) in histogram.iter_mut().zip(&row[channel]) {
                *total += n;
            }
        }
        *threshold = channel_threshold(&histogram);
    }

    let rows: Vec<_> = izip!(
        flags.chunks_mut(width),
        reference.chunks(width * cn),
        current.chunks(width * cn)
    )
    .collect();
    for_each_row(execution, rows, |(flags, reference, current)| {
        for (flag, r, c) in izip!(
            flags.iter_mut(),
            reference.chunks_exact(cn),
            current.chunks_exact(cn)
        ) {
            *flag = (0..cn).any(|channel| r[channel].abs_diff(c[channel]) > thresholds[channel]);
        }
    });
}

/// Drops small regions and optionally fills holes; returns the kept region count.
fn postprocess(mask: &mut Mask, min_area: u32, fill_holes: bool) -> usize {
    let (width, height) = mask.dimensions();
    // a region spanning the whole frame is never too small
    let min_area = u64::from(min_area).min(u64::from(width) * u64::from(height));
    if (width, height) == (1, 1) {
        // connected_components cannot label a single pixel
        return usize::from(mask.get_pixel(0, 0).0[0] != BACKGROUND);
    }

    let labels = connected_components(&*mask, Connectivity::Eight, Luma([BACKGROUND]));
    let regions = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;

    // (min_x, min_y, max_x, max_y) per label
    let mut bounds = vec![(u32::MAX, u32::MAX, 0u32, 0u32); regions + 1];
    for (x, y, label) in labels.enumerate_pixels() {
        let bound = &mut bounds[label.0[0] as usize];
        bound.0 = bound.0.min(x);
        bound.1 = bound.1.min(y);
        bound.2 = bound.2.max(x);
        bound.3 = bound.3.max(y);
    }
    let keep: Vec<bool> = bounds
        .iter()
        .map(|&(x0, y0, x1, y1)| {
            x1 >= x0 && u64::from(x1 - x0 + 1) * u64::from(y1 - y0 + 1) >= min_area
        })
        .collect();
    let kept = keep.iter().skip(1).filter(|&&k| k).count();

    for (label, pixel) in labels.pixels().zip(mask.pixels_mut()) {
        let label = label.0[0] as usize;
        if label != 0 && !keep[label] {
            pixel.0[0] = BACKGROUND;
        }
    }

    if fill_holes {
        let holes = connected_components(&*mask, Connectivity::Four, Luma([FOREGROUND]));
        let mut touches_border = vec![false; holes.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize + 1];
        for (x, y, label) in holes.enumerate_pixels() {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                touches_border[label.0[0] as usize] = true;
            }
        }
        for (label, pixel) in holes.pixels().zip(mask.pixels_mut()) {
            let label = label.0[0] as usize;
            if label != 0 && !touches_border[label] {
                pixel.0[0] = FOREGROUND;
            }
        }
    }

    kept
}

/// FGD background subtractor.
///
/// Samples are saturated to 8 bits; alpha channels are ignored.
#[derive(Debug, Clone)]
pub struct Fgd {
    config: FgdConfig,
    layout: Option<FrameLayout>,
    stats: Vec<PixelStat>,
    colors: Vec<ColorFeature>,
    cooccurrences: Vec<CooccurrenceFeature>,
    background: Vec<u8>,
    previous: Vec<u8>,
    foreground: Vec<bool>,
    frames: u64,
}

impl Fgd {
    /// Creates an uninitialised engine after validating `config`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: FgdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            layout: None,
            stats: Vec::new(),
            colors: Vec::new(),
            cooccurrences: Vec::new(),
            background: Vec::new(),
            previous: Vec::new(),
            foreground: Vec::new(),
            frames: 0,
        })
    }

    /// Creates an engine seeded from `first_frame`.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid or the frame is empty
    pub fn with_first_frame<'f, P, F>(first_frame: F, config: FgdConfig) -> Result<Self>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let mut fgd = Self::new(config)?;
        fgd.initialize(first_frame)?;
        Ok(fgd)
    }

    pub fn config(&self) -> &FgdConfig {
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

    /// Drops the model; [`Fgd::initialize`] must be called again.
    pub fn reset(&mut self) {
        self.layout = None;
        self.stats.clear();
        self.colors.clear();
        self.cooccurrences.clear();
        self.background.clear();
        self.previous.clear();
        self.foreground.clear();
        self.frames = 0;
    }

    fn to_u8_colors<P>(frame: &FrameView<'_, P>, cn: usize) -> Vec<u8>
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        let channels = frame.channels();
        let mut colors = Vec::with_capacity(frame.width() as usize * frame.height() as usize * cn);
        for row in frame.rows() {
            for pixel in row.chunks_exact(channels) {
                colors.extend(pixel[..cn].iter().map(|&s| u8::from_f32_rounded(s.into())));
            }
        }
        colors
    }

    /// Seeds the reference background and the previous frame from
    /// `first_frame`; feature tables start empty and untrained.
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
        validate_non_empty_frame(layout.width, layout.height, "FGD")?;
        debug!(%layout, "initializing FGD model");

        let pixels = layout.pixel_count();
        let colors = Self::to_u8_colors(&frame, layout.color_channels());
        self.stats = vec![PixelStat::default(); pixels];
        self.colors = vec![ColorFeature::default(); pixels * self.config.n2c];
        self.cooccurrences = vec![CooccurrenceFeature::default(); pixels * self.config.n2cc];
        self.background = colors.clone();
        self.previous = colors;
        self.foreground = vec![false; pixels];
        self.layout = Some(layout);
        self.frames = 0;
        Ok(())
    }

    /// Classifies `frame`, updates the model and returns the mask with its counters.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Fgd::initialize`] has not been called
    /// * `Error::DimensionMismatch` - The frame layout differs from the first frame
    pub fn apply<'f, P, F>(&mut self, frame: F) -> Result<FgdUpdate>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let mut mask: Mask = create(frame.width(), frame.height());
        let summary = self.apply_into(frame, &mut mask.view_mut())?;
        Ok(FgdUpdate {
            mask,
            changed_pixels: summary.changed_pixels,
            foreground_pixels: summary.foreground_pixels,
            regions: summary.regions,
        })
    }

    /// Same as [`Fgd::apply`], writing the mask into `mask`.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Fgd::initialize`] has not been called
    /// * `Error::DimensionMismatch` - The frame layout differs from the first frame, or `mask` has other dimensions
    pub fn apply_into<'f, P, F>(
        &mut self,
        frame: F,
        mask: &mut FrameViewMut<'_, Luma<u8>>,
    ) -> Result<FgdSummary>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        let frame = frame.into();
        let expected = self.layout.ok_or(Error::NotInitialized {
            algorithm: Algorithm::Fgd,
        })?;
        let layout = frame.layout();
        validate_matching_layout(expected, layout)?;
        validate_mask(layout, mask)?;

        let config = self.config;
        let cn = layout.color_channels();
        let width = layout.width as usize;
        let pixels = layout.pixel_count();
        let rule = Rule {
            cn,
            delta_c: (config.delta * 256.0 / config.lc as f32).round() as i32,
            delta_cc: (config.delta * 256.0 / config.lcc as f32).round() as i32,
            n1c: config.n1c,
            n1cc: config.n1cc,
            alpha1: config.alpha1,
            alpha2: config.alpha2,
            alpha3: config.alpha3,
            t: config.t,
        };
        let current = Self::to_u8_colors(&frame, cn);

        let mut motion = vec![false; pixels];
        let mut background_change = vec![false; pixels];
        detect_changes(&self.previous, &current, &mut motion, width, cn, config.execution);
        detect_changes(
            &self.background,
            &current,
            &mut background_change,
            width,
            cn,
            config.execution,
        );
        let changed_pixels = motion
            .iter()
            .zip(&background_change)
            .filter(|&(&m, &b)| m || b)
            .count();

        let mut raw: Mask = create(layout.width, layout.height);
        let (n2c, n2cc) = (config.n2c, config.n2cc);
        let rows: Vec<_> = izip!(
            raw.chunks_mut(width),
            motion.chunks(width),
            background_change.chunks(width),
            self.stats.chunks(width),
            self.colors.chunks(width * n2c),
            self.cooccurrences.chunks(width * n2cc),
            self.previous.chunks(width * cn),
            current.chunks(width * cn)
        )
        .collect();
        let foreground_pixels: usize = map_rows(
            config.execution,
            rows,
            |(labels, motion, changed, stats, colors, cooccurrences, previous, current)| {
                let mut count = 0;
                for (x, label) in labels.iter_mut().enumerate() {
                    if !(motion[x] || changed[x]) {
                        continue;
                    }
                    let foreground = rule.classify(
                        &stats[x],
                        &colors[x * n2c..(x + 1) * n2c],
                        &cooccurrences[x * n2cc..(x + 1) * n2cc],
                        &previous[x * cn..(x + 1) * cn],
                        &current[x * cn..(x + 1) * cn],
                        motion[x],
                    );
                    if foreground {
                        *label = FOREGROUND;
                        count += 1;
                    }
                }
                count
            },
        )
        .into_iter()
        .sum();

        let mut refined = raw;
        if config.morphing_iterations > 0 {
            let k = config.morphing_iterations;
            refined = close(&open(&refined, Norm::LInf, k), Norm::LInf, k);
        }
        let regions = if config.min_area > 0 || config.fill_holes {
            postprocess(&mut refined, config.min_area, config.fill_holes)
        } else {
            0
        };

        if foreground_pixels as f32 / pixels as f32 > BG_UPDATE_THRESHOLD {
            for stat in &mut self.stats {
                stat.trained_static = true;
                stat.trained_dynamic = true;
            }
        }

        let rows: Vec<_> = izip!(
            refined.chunks(width),
            motion.chunks(width),
            background_change.chunks(width),
            self.stats.chunks_mut(width),
            self.colors.chunks_mut(width * n2c),
            self.cooccurrences.chunks_mut(width * n2cc),
            self.background.chunks_mut(width * cn),
            self.previous.chunks(width * cn),
            current.chunks(width * cn)
        )
        .collect();
        for_each_row(
            config.execution,
            rows,
            |(labels, motion, changed, stats, colors, cooccurrences, background, previous, current)| {
                for (x, stat) in stats.iter_mut().enumerate() {
                    let foreground = labels[x] != BACKGROUND;
                    let previous = &previous[x * cn..(x + 1) * cn];
                    let current = &current[x * cn..(x + 1) * cn];
                    let colors = &mut colors[x * n2c..(x + 1) * n2c];

                    if motion[x] || !stat.trained_dynamic {
                        let table = &mut cooccurrences[x * n2cc..(x + 1) * n2cc];
                        rule.update_dynamic(stat, table, previous, current, foreground);
                    }
                    if !motion[x] {
                        rule.update_static(stat, colors, current, foreground);
                    }
                    if !foreground {
                        rule.update_background(
                            &mut background[x * cn..(x + 1) * cn],
                            &colors[0],
                            current,
                            motion[x] || changed[x],
                        );
                    }
                }
            },
        );

        self.foreground = refined.pixels().map(|p| p.0[0] != BACKGROUND).collect();
        self.previous = current;
        self.frames += 1;
        mask.copy_from(&refined.view())?;

        trace!(
            frame = self.frames,
            changed_pixels,
            foreground_pixels,
            regions,
            "FGD frame processed"
        );
        Ok(FgdSummary {
            changed_pixels,
            foreground_pixels,
            regions,
        })
    }

    /// Returns the reference background image.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Fgd::initialize`] has not been called
    /// * `Error::DimensionMismatch` - `P` has another colour channel count than the frames
    pub fn background_image<P>(&self) -> Result<Image<P>>
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        let layout = self.layout.ok_or(Error::NotInitialized {
            algorithm: Algorithm::Fgd,
        })?;
        let cn = layout.color_channels();
        compose_image(layout, |pixel, channel| {
            f32::from(self.background[pixel * cn + channel])
        })
    }

    /// Returns the latest frame's colours where it was foreground and zero elsewhere.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - [`Fgd::initialize`] has not been called
    /// * `Error::DimensionMismatch` - `P` has another colour channel count than the frames
    pub fn foreground_image<P>(&self) -> Result<Image<P>>
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        let layout = self.layout.ok_or(Error::NotInitialized {
            algorithm: Algorithm::Fgd,
        })?;
        let cn = layout.color_channels();
        compose_image(layout, |pixel, channel| {
            if self.foreground[pixel] {
                f32::from(self.previous[pixel * cn + channel])
            } else {
                0.0
            }
        })
    }
}
