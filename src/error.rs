use thiserror::Error;

use crate::bgsegm::frame::{FrameLayout, Rect};
use crate::bgsegm::subtractor::Algorithm;

/// Error type for background subtraction operations
///
/// Every failure is a usage error reported to the caller immediately; no
/// operation retries or silently adapts to unexpected input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Frame layout does not match the one the model was sized for
    ///
    /// This error occurs when the size, channel count or sample depth of a
    /// frame changes mid-stream without reinitialisation, or when an output
    /// buffer does not match the frame it is written for.
    #[error("Frame layout mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch {
        /// Layout the model or output expects
        expected: FrameLayout,
        /// Layout that was supplied
        actual: FrameLayout,
    },

    /// Region of interest lies outside its parent frame or is empty
    #[error("Region {rect:?} does not fit inside a {}x{} frame", parent.0, parent.1)]
    InvalidRegion {
        /// Requested rectangle
        rect: Rect,
        /// Parent dimensions (width, height)
        parent: (u32, u32),
    },

    /// Operation requires a model that has not been initialised yet
    ///
    /// Returned by `apply` on engines that need an explicit `initialize`,
    /// and by background reconstruction before the first frame.
    #[error("{algorithm} model is not initialized")]
    NotInitialized {
        /// Engine that was called
        algorithm: Algorithm,
    },

    /// Operation is not implemented by this engine
    #[error("{algorithm} does not support {operation}")]
    NotSupported {
        /// Engine that was called
        algorithm: Algorithm,
        /// Name of the unsupported operation
        operation: &'static str,
    },

    /// Failed to create ImageBuffer from processed pixels
    ///
    /// This error indicates that the creation of a new image buffer
    /// failed after processing the pixel data.
    #[error("Failed to create ImageBuffer from processed pixels")]
    ImageBufferCreationFailed,

    /// Invalid parameter provided to the operation
    ///
    /// This error is returned when a configuration value is invalid
    /// or outside the acceptable range for the engine.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
