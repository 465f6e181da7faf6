//! Edge case and error condition tests
//!
//! This test suite focuses on invalid configurations, mismatched frames,
//! out-of-bounds regions and degenerate frame sizes.

use bgsegm::{
    create, Algorithm, BackgroundSubtractor, Error, Fgd, FgdConfig, FrameLayout, Gmg, GmgConfig,
    Image, Mask, Mog, Mog2, Mog2Config, MogConfig, Rect, RegionOfInterest, SampleDepth,
    SubtractorConfig, Vibe, VibeConfig, BACKGROUND, FOREGROUND,
};
use image::{ImageBuffer, Luma, Rgb, Rgba};

const ALGORITHMS: [Algorithm; 5] = [
    Algorithm::Fgd,
    Algorithm::Mog,
    Algorithm::Mog2,
    Algorithm::Vibe,
    Algorithm::Gmg,
];

/// Helper to create an initialised subtractor for `frame`
fn ready_subtractor(algorithm: Algorithm, frame: &Image<Rgb<u8>>) -> BackgroundSubtractor {
    let mut subtractor = BackgroundSubtractor::new(SubtractorConfig::default_for(algorithm)).unwrap();
    subtractor.initialize(frame).unwrap();
    subtractor.apply(frame, -1.0).unwrap();
    subtractor
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let invalid = [
        SubtractorConfig::Mog(MogConfig::default().with_history(0)),
        SubtractorConfig::Mog(MogConfig::default().with_mixtures(0)),
        SubtractorConfig::Mog(MogConfig::default().with_background_ratio(1.5)),
        SubtractorConfig::Mog(MogConfig::default().with_noise_sigma(-1.0)),
        SubtractorConfig::Mog2(Mog2Config::default().with_history(0)),
        SubtractorConfig::Mog2(Mog2Config::default().with_mixtures(0)),
        SubtractorConfig::Mog2(Mog2Config::default().with_mixtures(300)),
        SubtractorConfig::Mog2(Mog2Config::default().with_shadow_threshold(0.0)),
        SubtractorConfig::Vibe(VibeConfig::default().with_num_samples(0)),
        SubtractorConfig::Vibe(VibeConfig::default().with_required_matches(0)),
        SubtractorConfig::Gmg(GmgConfig::default().with_max_features(0)),
        SubtractorConfig::Gmg(GmgConfig::default().with_quantization_levels(0)),
        SubtractorConfig::Gmg(GmgConfig::default().with_value_range(10.0, 10.0)),
        SubtractorConfig::Gmg(GmgConfig::default().with_decision_threshold(1.5)),
        SubtractorConfig::Fgd(FgdConfig::default().with_learning_rates(0.1, 1.0, 0.1)),
    ];
    for config in invalid {
        let result = BackgroundSubtractor::new(config);
        assert!(
            matches!(result, Err(Error::InvalidParameter(_))),
            "{config:?} was accepted"
        );
    }
}

#[test]
fn test_default_configurations_are_valid() {
    assert!(FgdConfig::default().validate().is_ok());
    assert!(MogConfig::default().validate().is_ok());
    assert!(Mog2Config::default().validate().is_ok());
    assert!(VibeConfig::default().validate().is_ok());
    assert!(GmgConfig::default().validate().is_ok());
}

#[test]
fn test_apply_before_initialize() {
    let frame: Image<Luma<u8>> = ImageBuffer::new(4, 4);

    let mut fgd = Fgd::new(FgdConfig::default()).unwrap();
    assert_eq!(
        fgd.apply(&frame).unwrap_err(),
        Error::NotInitialized {
            algorithm: Algorithm::Fgd
        }
    );
    let mut vibe = Vibe::new(VibeConfig::default()).unwrap();
    assert_eq!(
        vibe.apply(&frame).unwrap_err(),
        Error::NotInitialized {
            algorithm: Algorithm::Vibe
        }
    );
    let mut gmg = Gmg::new(GmgConfig::default()).unwrap();
    assert_eq!(
        gmg.apply(&frame).unwrap_err(),
        Error::NotInitialized {
            algorithm: Algorithm::Gmg
        }
    );

    // MOG and MOG2 size their model on the first frame
    assert!(Mog::new(MogConfig::default()).unwrap().apply(&frame, -1.0).is_ok());
    assert!(Mog2::new(Mog2Config::default()).unwrap().apply(&frame, -1.0).is_ok());
}

#[test]
fn test_frame_size_change_is_rejected() {
    let frame: Image<Rgb<u8>> = ImageBuffer::from_pixel(6, 5, Rgb([10, 20, 30]));
    let wider: Image<Rgb<u8>> = ImageBuffer::from_pixel(7, 5, Rgb([10, 20, 30]));
    for algorithm in ALGORITHMS {
        let mut subtractor = ready_subtractor(algorithm, &frame);
        let error = subtractor.apply(&wider, -1.0).unwrap_err();
        assert_eq!(
            error,
            Error::DimensionMismatch {
                expected: FrameLayout::of::<Rgb<u8>>(6, 5),
                actual: FrameLayout::of::<Rgb<u8>>(7, 5),
            },
            "{algorithm}"
        );
    }
}

#[test]
fn test_pixel_type_change_is_rejected() {
    let frame: Image<Rgb<u8>> = ImageBuffer::from_pixel(6, 5, Rgb([10, 20, 30]));
    let gray: Image<Luma<u8>> = ImageBuffer::from_pixel(6, 5, Luma([10]));
    let deep: Image<Rgb<u16>> = ImageBuffer::from_pixel(6, 5, Rgb([10, 20, 30]));
    for algorithm in ALGORITHMS {
        let mut subtractor = ready_subtractor(algorithm, &frame);
        assert!(matches!(
            subtractor.apply(&gray, -1.0),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            subtractor.apply(&deep, -1.0),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}

#[test]
fn test_full_learning_rate_never_resizes_the_model() {
    let frame: Image<Luma<u8>> = ImageBuffer::from_pixel(4, 4, Luma([50]));
    let colour: Image<Rgb<u8>> = ImageBuffer::from_pixel(2, 3, Rgb([50, 60, 70]));
    let deep: Image<Luma<u16>> = ImageBuffer::from_pixel(2, 3, Luma([50]));
    let expected = FrameLayout::of::<Luma<u8>>(4, 4);

    let mut mog = Mog::new(MogConfig::default()).unwrap();
    mog.apply(&frame, -1.0).unwrap();
    mog.apply(&frame, -1.0).unwrap();
    assert_eq!(
        mog.apply(&colour, 1.0).unwrap_err(),
        Error::DimensionMismatch {
            expected,
            actual: FrameLayout::of::<Rgb<u8>>(2, 3),
        }
    );
    assert!(matches!(
        mog.apply(&deep, 1.5),
        Err(Error::DimensionMismatch { .. })
    ));
    assert_eq!(mog.layout(), Some(expected));
    assert_eq!(mog.frame_count(), 2);

    let mut mog2 = Mog2::new(Mog2Config::default()).unwrap();
    mog2.apply(&frame, -1.0).unwrap();
    assert_eq!(
        mog2.apply(&deep, 1.5).unwrap_err(),
        Error::DimensionMismatch {
            expected,
            actual: FrameLayout::of::<Luma<u16>>(2, 3),
        }
    );
    assert!(matches!(
        mog2.apply(&colour, 1.0),
        Err(Error::DimensionMismatch { .. })
    ));
    assert_eq!(mog2.layout(), Some(expected));

    // a new layout needs an explicit reset
    mog2.reset();
    assert!(mog2.apply(&colour, 1.0).is_ok());
    assert_eq!(mog2.layout(), Some(FrameLayout::of::<Rgb<u8>>(2, 3)));
}

#[test]
fn test_full_learning_rate_reseeds_a_same_sized_model() {
    let frame: Image<Luma<u8>> = ImageBuffer::from_pixel(4, 4, Luma([50]));
    let mut mog = Mog::new(MogConfig::default()).unwrap();
    let mut mog2 = Mog2::new(Mog2Config::default()).unwrap();
    for _ in 0..3 {
        mog.apply(&frame, -1.0).unwrap();
        mog2.apply(&frame, -1.0).unwrap();
    }
    mog.apply(&frame, 1.0).unwrap();
    mog2.apply(&frame, 1.0).unwrap();
    assert_eq!(mog.frame_count(), 1);
    assert_eq!(mog2.frame_count(), 1);
}

#[test]
fn test_mask_of_wrong_size_is_rejected() {
    let frame: Image<Rgb<u8>> = ImageBuffer::from_pixel(6, 5, Rgb([10, 20, 30]));
    for algorithm in ALGORITHMS {
        let mut subtractor = ready_subtractor(algorithm, &frame);
        let mut mask: Mask = create(5, 6);
        let result = subtractor.apply_into(&frame, -1.0, &mut mask.view_mut());
        assert!(
            matches!(result, Err(Error::DimensionMismatch { .. })),
            "{algorithm}"
        );
    }
}

#[test]
fn test_empty_frames_are_rejected() {
    let empty: Image<Luma<u8>> = ImageBuffer::new(0, 0);
    assert!(matches!(
        Mog::new(MogConfig::default()).unwrap().apply(&empty, -1.0),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        Mog2::new(Mog2Config::default()).unwrap().apply(&empty, -1.0),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        Fgd::with_first_frame(&empty, FgdConfig::default()),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        Vibe::with_first_frame(&empty, VibeConfig::default()),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        Gmg::with_first_frame(&empty, GmgConfig::default()),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_single_pixel_frames() {
    let dark: Image<Rgba<u8>> = ImageBuffer::from_pixel(1, 1, Rgba([20, 20, 20, 255]));
    let bright: Image<Rgba<u8>> = ImageBuffer::from_pixel(1, 1, Rgba([220, 220, 220, 0]));
    for algorithm in ALGORITHMS {
        let mut subtractor =
            BackgroundSubtractor::new(SubtractorConfig::default_for(algorithm)).unwrap();
        subtractor.initialize(&dark).unwrap();
        for _ in 0..25 {
            let mask = subtractor.apply(&dark, -1.0).unwrap();
            assert_eq!(mask.dimensions(), (1, 1));
        }
        let mask = subtractor.apply(&bright, -1.0).unwrap();
        assert_eq!(mask.dimensions(), (1, 1));
    }
}

#[test]
fn test_fgd_single_pixel_change_is_removed_as_too_small() {
    let dark: Image<Luma<u8>> = ImageBuffer::from_pixel(6, 6, Luma([20]));
    let mut speck = dark.clone();
    speck.put_pixel(3, 2, Luma([220]));

    let mut fgd = Fgd::with_first_frame(&dark, FgdConfig::default()).unwrap();
    let update = fgd.apply(&speck).unwrap();
    assert_eq!(update.foreground_pixels, 1);
    assert_eq!(update.regions, 0);
    assert!(update.mask.pixels().all(|p| p.0[0] == BACKGROUND));

    let mut fgd = Fgd::with_first_frame(
        &dark,
        FgdConfig::default()
            .with_min_area(0)
            .with_fill_holes(false)
            .with_morphing_iterations(0),
    )
    .unwrap();
    let update = fgd.apply(&speck).unwrap();
    assert_eq!(update.mask.get_pixel(3, 2).0[0], FOREGROUND);
}

#[test]
fn test_fgd_change_of_a_whole_tiny_frame_is_kept() {
    let dark: Image<Luma<u8>> = ImageBuffer::from_pixel(1, 1, Luma([20]));
    let bright: Image<Luma<u8>> = ImageBuffer::from_pixel(1, 1, Luma([220]));
    let mut fgd = Fgd::with_first_frame(&dark, FgdConfig::default()).unwrap();
    let update = fgd.apply(&dark).unwrap();
    assert_eq!(update.mask.get_pixel(0, 0).0[0], BACKGROUND);
    assert_eq!(update.regions, 0);

    let update = fgd.apply(&bright).unwrap();
    assert_eq!(update.foreground_pixels, 1);
    assert_eq!(update.regions, 1);
    assert_eq!(update.mask.get_pixel(0, 0).0[0], FOREGROUND);
}

#[test]
fn test_alpha_channel_is_ignored() {
    let opaque: Image<Rgba<u8>> = ImageBuffer::from_pixel(4, 4, Rgba([90, 80, 70, 255]));
    let transparent: Image<Rgba<u8>> = ImageBuffer::from_pixel(4, 4, Rgba([90, 80, 70, 0]));
    for algorithm in ALGORITHMS {
        let mut subtractor =
            BackgroundSubtractor::new(SubtractorConfig::default_for(algorithm)).unwrap();
        subtractor.initialize(&opaque).unwrap();
        let mut expected = subtractor.clone();
        for _ in 0..6 {
            assert_eq!(
                subtractor.apply(&transparent, -1.0).unwrap(),
                expected.apply(&opaque, -1.0).unwrap(),
                "{algorithm}"
            );
        }
    }
}

#[test]
fn test_background_image_errors() {
    let mog2 = Mog2::new(Mog2Config::default()).unwrap();
    assert_eq!(
        mog2.background_image::<Rgb<u8>>().unwrap_err(),
        Error::NotInitialized {
            algorithm: Algorithm::Mog2
        }
    );

    let frame: Image<Rgb<u8>> = ImageBuffer::from_pixel(3, 3, Rgb([1, 2, 3]));
    let fgd = Fgd::with_first_frame(&frame, FgdConfig::default()).unwrap();
    assert!(matches!(
        fgd.background_image::<Luma<u8>>(),
        Err(Error::DimensionMismatch { .. })
    ));
    // alpha is filled in, colour channels must match
    let with_alpha: Image<Rgba<u8>> = fgd.background_image().unwrap();
    assert_eq!(with_alpha.get_pixel(1, 1), &Rgba([1, 2, 3, 255]));

    let subtractor = ready_subtractor(Algorithm::Vibe, &frame);
    let error = subtractor.background_image::<Rgb<u8>>().unwrap_err();
    assert_eq!(
        error,
        Error::NotSupported {
            algorithm: Algorithm::Vibe,
            operation: "background_image"
        }
    );
    assert_eq!(error.to_string(), "ViBe does not support background_image");
}

#[test]
fn test_region_outside_parent_is_rejected() {
    let mut image: Image<Rgb<u8>> = ImageBuffer::new(10, 8);
    let cases = [
        Rect::new(0, 0, 11, 8),
        Rect::new(5, 0, 6, 8),
        Rect::new(0, 7, 10, 2),
        Rect::new(10, 0, 1, 1),
        Rect::new(2, 2, 0, 3),
        Rect::new(2, 2, 3, 0),
        Rect::new(u32::MAX, u32::MAX, 2, 2),
    ];
    for rect in cases {
        assert_eq!(
            image.roi(rect).unwrap_err(),
            Error::InvalidRegion {
                rect,
                parent: (10, 8)
            }
        );
        assert!(image.roi_mut(rect).is_err());
    }

    let view = image.roi(Rect::new(2, 2, 6, 4)).unwrap();
    assert!(view.roi(Rect::new(0, 0, 6, 4)).is_ok());
    assert!(matches!(
        view.roi(Rect::new(1, 0, 6, 4)),
        Err(Error::InvalidRegion { parent: (6, 4), .. })
    ));
}

#[test]
fn test_roi_writes_stay_inside_the_region() {
    let mut image: Image<Luma<u16>> = ImageBuffer::from_pixel(6, 6, Luma([1]));
    {
        let mut roi = image.roi_mut(Rect::new(1, 2, 3, 2)).unwrap();
        roi.fill(Luma([9]));
        roi.put_pixel(0, 0, Luma([5]));
    }
    for (x, y, pixel) in image.enumerate_pixels() {
        let expected = match (x, y) {
            (1, 2) => 5,
            (1..=3, 2..=3) => 9,
            _ => 1,
        };
        assert_eq!(pixel.0[0], expected, "({x}, {y})");
    }
}

#[test]
fn test_layout_reports_depth_and_channels() {
    let layout = FrameLayout::of::<Rgba<f32>>(4, 3);
    assert_eq!(layout.channels, 4);
    assert_eq!(layout.depth, SampleDepth::F32);
    assert_eq!(layout.color_channels(), 3);
    assert_eq!(layout.pixel_count(), 12);
    assert_eq!(FrameLayout::of::<Luma<u16>>(1, 1).depth, SampleDepth::U16);
}
