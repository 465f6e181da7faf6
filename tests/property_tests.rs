//! Property-based tests for bgsegm
//!
//! These tests use proptest to check invariants that hold for any frame
//! size, region of interest and frame content.

use bgsegm::{
    Algorithm, BackgroundSubtractor, Execution, FgdConfig, Gmg, GmgConfig, Image, Mask,
    Mog2Config, MogConfig, Rect, RegionOfInterest, Sample, SubtractorConfig, VibeConfig,
    BACKGROUND,
};
use image::{ImageBuffer, Luma, Pixel, Primitive, Rgb, Rgba};
use imageproc::filter::median_filter;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const ALGORITHMS: [Algorithm; 5] = [
    Algorithm::Fgd,
    Algorithm::Mog,
    Algorithm::Mog2,
    Algorithm::Vibe,
    Algorithm::Gmg,
];

/// Strategy for generating a parent frame size with a region inside it
fn frame_and_region() -> impl Strategy<Value = ((u32, u32), Rect)> {
    (8u32..=20, 6u32..=16)
        .prop_flat_map(|(width, height)| (Just((width, height)), 0..width, 0..height))
        .prop_flat_map(|((width, height), x, y)| {
            (
                Just((width, height)),
                Just(x),
                Just(y),
                1..=width - x,
                1..=height - y,
            )
        })
        .prop_map(|(dims, x, y, w, h)| (dims, Rect::new(x, y, w, h)))
}

/// Strategy for generating small frame dimensions
fn frame_dimensions() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=24, 1u32..=18)
}

fn algorithm() -> impl Strategy<Value = Algorithm> {
    prop::sample::select(ALGORITHMS.to_vec())
}

/// Frame `t` of a jittering scene with occasional bright intruders.
///
/// The static part depends only on `seed`; the jitter and intruders on
/// `seed` and `t`.
fn scene_frame<P>(width: u32, height: u32, seed: u64, t: u64) -> Image<P>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let mut base = ChaCha8Rng::seed_from_u64(seed);
    let mut noise = ChaCha8Rng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(t));
    let channels = usize::from(P::CHANNEL_COUNT);
    let mut raw = Vec::with_capacity(width as usize * height as usize * channels);
    for _ in 0..width * height {
        let intruder = t > 0 && noise.random_bool(0.1);
        for c in 0..channels {
            let value: f32 = base.random_range(40.0..80.0);
            if P::HAS_ALPHA && c == channels - 1 {
                raw.push(P::Subpixel::DEFAULT_MAX_VALUE);
            } else if intruder {
                raw.push(P::Subpixel::from_f32_rounded(noise.random_range(200.0..250.0)));
            } else {
                let jitter: f32 = noise.random_range(-4.0..4.0);
                raw.push(P::Subpixel::from_f32_rounded(value + jitter));
            }
        }
    }
    ImageBuffer::from_raw(width, height, raw).unwrap()
}

fn config_for(algorithm: Algorithm, execution: Execution) -> SubtractorConfig {
    match algorithm {
        Algorithm::Fgd => SubtractorConfig::Fgd(FgdConfig::default().with_execution(execution)),
        Algorithm::Mog => SubtractorConfig::Mog(MogConfig::default().with_execution(execution)),
        Algorithm::Mog2 => {
            SubtractorConfig::Mog2(Mog2Config::default().with_execution(execution))
        }
        Algorithm::Vibe => SubtractorConfig::Vibe(
            VibeConfig::default()
                .with_subsampling_factor(2)
                .with_execution(execution),
        ),
        Algorithm::Gmg => SubtractorConfig::Gmg(
            GmgConfig::default()
                .with_num_init_frames(3)
                .with_execution(execution),
        ),
    }
}

/// Runs `frames` through a fresh engine and collects every mask
fn run<P>(config: SubtractorConfig, frames: &[Image<P>]) -> Vec<Mask>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let mut subtractor = BackgroundSubtractor::new(config).unwrap();
    subtractor.initialize(&frames[0]).unwrap();
    frames
        .iter()
        .map(|frame| subtractor.apply(frame, -1.0).unwrap())
        .collect()
}

fn region_matches_cropped_frames<P>(
    algorithm: Algorithm,
    (width, height): (u32, u32),
    rect: Rect,
    seed: u64,
) -> Result<(), TestCaseError>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let parents: Vec<Image<P>> = (0..8)
        .map(|t| scene_frame(width, height, seed, t))
        .collect();
    let cropped: Vec<Image<P>> = parents
        .iter()
        .map(|parent| parent.roi(rect).unwrap().to_image())
        .collect();

    let config = config_for(algorithm, Execution::Sequential);
    let mut on_region = BackgroundSubtractor::new(config).unwrap();
    on_region.initialize(parents[0].roi(rect).unwrap()).unwrap();
    let expected = run(config, &cropped);

    for (parent, expected) in parents.iter().zip(&expected) {
        let mask = on_region.apply(parent.roi(rect).unwrap(), -1.0).unwrap();
        prop_assert_eq!(&mask, expected, "{} region {:?}", algorithm, rect);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: a region view behaves exactly like a cropped copy
    #[test]
    fn region_of_interest_is_transparent_for_rgb(
        algorithm in algorithm(),
        (dims, rect) in frame_and_region(),
        seed in any::<u64>()
    ) {
        region_matches_cropped_frames::<Rgb<u8>>(algorithm, dims, rect, seed)?;
    }

    /// Property: region views work for deep and floating-point samples
    #[test]
    fn region_of_interest_is_transparent_for_other_pixel_types(
        algorithm in algorithm(),
        (dims, rect) in frame_and_region(),
        seed in any::<u64>()
    ) {
        region_matches_cropped_frames::<Luma<u16>>(algorithm, dims, rect, seed)?;
        region_matches_cropped_frames::<Rgba<f32>>(algorithm, dims, rect, seed)?;
    }

    /// Property: sequential and parallel execution agree pixel for pixel
    #[test]
    fn execution_paths_agree(
        algorithm in algorithm(),
        (width, height) in frame_dimensions(),
        seed in any::<u64>()
    ) {
        let frames: Vec<Image<Rgb<u8>>> = (0..8)
            .map(|t| scene_frame(width, height, seed, t))
            .collect();
        let sequential = run(config_for(algorithm, Execution::Sequential), &frames);
        let parallel = run(config_for(algorithm, Execution::Parallel), &frames);
        prop_assert_eq!(sequential, parallel);
    }

    /// Property: GMG reports no foreground while it is training
    #[test]
    fn gmg_training_masks_are_empty(
        (width, height) in frame_dimensions(),
        init_frames in 1u32..8,
        seed in any::<u64>()
    ) {
        let first: Image<Rgb<u8>> = scene_frame(width, height, seed, 0);
        let mut gmg = Gmg::with_first_frame(
            &first,
            GmgConfig::default().with_num_init_frames(init_frames),
        )
        .unwrap();
        for t in 0..u64::from(init_frames) {
            prop_assert!(gmg.is_training());
            let mask = gmg.apply(&scene_frame::<Rgb<u8>>(width, height, seed, t)).unwrap();
            prop_assert!(mask.pixels().all(|p| p.0[0] == BACKGROUND));
        }
        prop_assert!(!gmg.is_training());
    }

    /// Property: GMG smoothing is a median filter over the raw decision
    #[test]
    fn gmg_smoothing_is_median_of_raw_mask(
        (width, height) in frame_dimensions(),
        radius in 1u32..=3,
        seed in any::<u64>()
    ) {
        let frames: Vec<Image<Rgb<u8>>> = (0..10)
            .map(|t| scene_frame(width, height, seed, t))
            .collect();
        let config = GmgConfig::default().with_num_init_frames(3);
        let mut raw = Gmg::with_first_frame(&frames[0], config.with_smoothing_radius(0)).unwrap();
        let mut smoothed =
            Gmg::with_first_frame(&frames[0], config.with_smoothing_radius(radius)).unwrap();

        for frame in &frames {
            let training = raw.is_training();
            let raw_mask = raw.apply(frame).unwrap();
            let smoothed_mask = smoothed.apply(frame).unwrap();
            if training {
                prop_assert_eq!(&smoothed_mask, &raw_mask);
            } else {
                prop_assert_eq!(smoothed_mask, median_filter(&raw_mask, radius, radius));
            }
        }
    }
}
