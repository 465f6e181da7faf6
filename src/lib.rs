mod bgsegm;
mod error;
mod utils;

#[cfg(test)]
mod test_utils;

use image::{ImageBuffer, Luma, Pixel};

pub use bgsegm::execution::Execution;
pub use bgsegm::fgd::{Fgd, FgdConfig, FgdSummary, FgdUpdate};
pub use bgsegm::frame::{create, FrameLayout, FrameView, FrameViewMut, Rect, RegionOfInterest};
pub use bgsegm::gmg::{Gmg, GmgConfig};
pub use bgsegm::mog::{Mog, MogConfig};
pub use bgsegm::mog2::{Mog2, Mog2Config};
pub use bgsegm::subtractor::{Algorithm, BackgroundSubtractor, SubtractorConfig};
pub use bgsegm::vibe::{Vibe, VibeConfig};
pub use bgsegm::{BACKGROUND, FOREGROUND, SHADOW};
pub use error::{Error, Result};
pub use utils::{Sample, SampleDepth};

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Foreground mask: 0 background, 255 foreground, 127 shadow.
pub type Mask = Image<Luma<u8>>;
