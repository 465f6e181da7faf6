//! Tagged variant over the five engines.

use std::fmt;

use image::{Luma, Pixel};

use crate::bgsegm::fgd::{Fgd, FgdConfig};
use crate::bgsegm::frame::{FrameLayout, FrameView, FrameViewMut};
use crate::bgsegm::gmg::{Gmg, GmgConfig};
use crate::bgsegm::mog::{Mog, MogConfig};
use crate::bgsegm::mog2::{Mog2, Mog2Config};
use crate::bgsegm::vibe::{Vibe, VibeConfig};
use crate::error::{Error, Result};
use crate::utils::Sample;
use crate::{Image, Mask};

/// Background segmentation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Algorithm {
    Fgd,
    Mog,
    Mog2,
    Vibe,
    Gmg,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fgd => "FGD",
            Self::Mog => "MOG",
            Self::Mog2 => "MOG2",
            Self::Vibe => "ViBe",
            Self::Gmg => "GMG",
        };
        f.write_str(name)
    }
}

/// Configuration of any engine; selects the algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubtractorConfig {
    Fgd(FgdConfig),
    Mog(MogConfig),
    Mog2(Mog2Config),
    Vibe(VibeConfig),
    Gmg(GmgConfig),
}

impl SubtractorConfig {
    /// Default configuration of `algorithm`.
    pub fn default_for(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Fgd => Self::Fgd(FgdConfig::default()),
            Algorithm::Mog => Self::Mog(MogConfig::default()),
            Algorithm::Mog2 => Self::Mog2(Mog2Config::default()),
            Algorithm::Vibe => Self::Vibe(VibeConfig::default()),
            Algorithm::Gmg => Self::Gmg(GmgConfig::default()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Fgd(_) => Algorithm::Fgd,
            Self::Mog(_) => Algorithm::Mog,
            Self::Mog2(_) => Algorithm::Mog2,
            Self::Vibe(_) => Algorithm::Vibe,
            Self::Gmg(_) => Algorithm::Gmg,
        }
    }
}

/// Any of the five engines behind one interface.
///
/// Engines that need a first frame (FGD, ViBe, GMG) report
/// `Error::NotInitialized` until [`BackgroundSubtractor::initialize`] is
/// called; MOG and MOG2 initialise on their first frame. The learning rate
/// passed to [`BackgroundSubtractor::apply`] is only used by MOG and MOG2.
#[derive(Debug, Clone)]
pub enum BackgroundSubtractor {
    Fgd(Fgd),
    Mog(Mog),
    Mog2(Mog2),
    Vibe(Vibe),
    Gmg(Gmg),
}

impl BackgroundSubtractor {
    /// Creates an uninitialised engine.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidParameter` - The configuration is invalid
    pub fn new(config: SubtractorConfig) -> Result<Self> {
        Ok(match config {
            SubtractorConfig::Fgd(config) => Self::Fgd(Fgd::new(config)?),
            SubtractorConfig::Mog(config) => Self::Mog(Mog::new(config)?),
            SubtractorConfig::Mog2(config) => Self::Mog2(Mog2::new(config)?),
            SubtractorConfig::Vibe(config) => Self::Vibe(Vibe::new(config)?),
            SubtractorConfig::Gmg(config) => Self::Gmg(Gmg::new(config)?),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Fgd(_) => Algorithm::Fgd,
            Self::Mog(_) => Algorithm::Mog,
            Self::Mog2(_) => Algorithm::Mog2,
            Self::Vibe(_) => Algorithm::Vibe,
            Self::Gmg(_) => Algorithm::Gmg,
        }
    }

    /// Layout of the frames the model was sized for, if any.
    pub fn layout(&self) -> Option<FrameLayout> {
        match self {
            Self::Fgd(engine) => engine.layout(),
            Self::Mog(engine) => engine.layout(),
            Self::Mog2(engine) => engine.layout(),
            Self::Vibe(engine) => engine.layout(),
            Self::Gmg(engine) => engine.layout(),
        }
    }

    /// Number of frames processed since initialisation.
    pub fn frame_count(&self) -> u64 {
        match self {
            Self::Fgd(engine) => engine.frame_count(),
            Self::Mog(engine) => engine.frame_count(),
            Self::Mog2(engine) => engine.frame_count(),
            Self::Vibe(engine) => engine.frame_count(),
            Self::Gmg(engine) => engine.frame_count(),
        }
    }

    /// Seeds the model from `first_frame`.
    ///
    /// MOG and MOG2 drop their model; it is rebuilt from the next frame.
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
        match self {
            Self::Fgd(engine) => engine.initialize(first_frame),
            Self::Vibe(engine) => engine.initialize(first_frame),
            Self::Gmg(engine) => engine.initialize(first_frame),
            Self::Mog(engine) => {
                engine.reset();
                Ok(())
            }
            Self::Mog2(engine) => {
                engine.reset();
                Ok(())
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Fgd(engine) => engine.reset(),
            Self::Mog(engine) => engine.reset(),
            Self::Mog2(engine) => engine.reset(),
            Self::Vibe(engine) => engine.reset(),
            Self::Gmg(engine) => engine.reset(),
        }
    }

    /// Classifies `frame`, updates the model and returns the mask.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - FGD, ViBe or GMG has not been initialised
    /// * `Error::DimensionMismatch` - The frame layout differs from the model's
    pub fn apply<'f, P, F>(&mut self, frame: F, learning_rate: f64) -> Result<Mask>
    where
        P: Pixel + 'f,
        P::Subpixel: Sample,
        F: Into<FrameView<'f, P>>,
    {
        match self {
            Self::Fgd(engine) => engine.apply(frame).map(|update| update.mask),
            Self::Mog(engine) => engine.apply(frame, learning_rate),
            Self::Mog2(engine) => engine.apply(frame, learning_rate),
            Self::Vibe(engine) => engine.apply(frame),
            Self::Gmg(engine) => engine.apply(frame),
        }
    }

    /// Same as [`BackgroundSubtractor::apply`], writing the mask into `mask`.
    ///
    /// # Errors
    ///
    /// * `Error::NotInitialized` - FGD, ViBe or GMG has not been initialised
    /// * `Error::DimensionMismatch` - The frame layout differs from the model's, or `mask` has other dimensions
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
        match self {
            Self::Fgd(engine) => engine.apply_into(frame, mask).map(|_| ()),
            Self::Mog(engine) => engine.apply_into(frame, learning_rate, mask),
            Self::Mog2(engine) => engine.apply_into(frame, learning_rate, mask),
            Self::Vibe(engine) => engine.apply_into(frame, mask),
            Self::Gmg(engine) => engine.apply_into(frame, mask),
        }
    }

    /// Reconstructs the background image.
    ///
    /// # Errors
    ///
    /// * `Error::NotSupported` - The engine is MOG, ViBe or GMG
    /// * `Error::NotInitialized` - No model has been built yet
    /// * `Error::DimensionMismatch` - `P` has another colour channel count than the frames
    pub fn background_image<P>(&self) -> Result<Image<P>>
    where
        P: Pixel,
        P::Subpixel: Sample,
    {
        match self {
            Self::Fgd(engine) => engine.background_image(),
            Self::Mog2(engine) => engine.background_image(),
            Self::Mog(_) | Self::Vibe(_) | Self::Gmg(_) => Err(Error::NotSupported {
                algorithm: self.algorithm(),
                operation: "background_image",
            }),
        }
    }
}

macro_rules! impl_from_engine {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for BackgroundSubtractor {
                fn from(engine: $variant) -> Self {
                    Self::$variant(engine)
                }
            }
        )*
    };
}

impl_from_engine!(Fgd, Mog, Mog2, Vibe, Gmg);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::uniform_frame;
    use image::Rgb;

    const ALL: [Algorithm; 5] = [
        Algorithm::Fgd,
        Algorithm::Mog,
        Algorithm::Mog2,
        Algorithm::Vibe,
        Algorithm::Gmg,
    ];

    #[test]
    fn algorithm_is_preserved() {
        for algorithm in ALL {
            let config = SubtractorConfig::default_for(algorithm);
            assert_eq!(config.algorithm(), algorithm);
            let subtractor = BackgroundSubtractor::new(config).unwrap();
            assert_eq!(subtractor.algorithm(), algorithm);
            assert_eq!(subtractor.layout(), None);
        }
    }

    #[test]
    fn display_names() {
        let names: Vec<String> = ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["FGD", "MOG", "MOG2", "ViBe", "GMG"]);
    }

    #[test]
    fn explicit_initialisation_is_required_where_needed() {
        let frame = uniform_frame(4, 4, Rgb([1u8, 2, 3]));
        for algorithm in ALL {
            let mut subtractor =
                BackgroundSubtractor::new(SubtractorConfig::default_for(algorithm)).unwrap();
            let result = subtractor.apply(&frame, -1.0);
            match algorithm {
                Algorithm::Mog | Algorithm::Mog2 => assert!(result.is_ok()),
                _ => assert_eq!(result.unwrap_err(), Error::NotInitialized { algorithm }),
            }
            subtractor.initialize(&frame).unwrap();
            assert!(subtractor.apply(&frame, -1.0).is_ok());
        }
    }

    #[test]
    fn background_image_support() {
        let frame = uniform_frame(4, 4, Rgb([10u8, 20, 30]));
        for algorithm in ALL {
            let mut subtractor =
                BackgroundSubtractor::new(SubtractorConfig::default_for(algorithm)).unwrap();
            subtractor.initialize(&frame).unwrap();
            subtractor.apply(&frame, -1.0).unwrap();
            let background = subtractor.background_image::<Rgb<u8>>();
            match algorithm {
                Algorithm::Fgd | Algorithm::Mog2 => assert_eq!(background.unwrap(), frame),
                _ => assert_eq!(
                    background.unwrap_err(),
                    Error::NotSupported {
                        algorithm,
                        operation: "background_image"
                    }
                ),
            }
        }
    }

    #[test]
    fn engines_convert_into_subtractor() {
        let subtractor: BackgroundSubtractor = Mog2::new(Mog2Config::default()).unwrap().into();
        assert_eq!(subtractor.algorithm(), Algorithm::Mog2);
    }
}
