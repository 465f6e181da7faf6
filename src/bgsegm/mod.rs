pub mod execution;
pub mod fgd;
pub mod frame;
pub mod gmg;
pub mod mog;
pub mod mog2;
pub mod subtractor;
pub mod vibe;

/// Mask value of a background pixel.
pub const BACKGROUND: u8 = 0;
/// Mask value of a foreground pixel.
pub const FOREGROUND: u8 = 255;
/// Default mask value of a MOG2 shadow pixel.
pub const SHADOW: u8 = 127;
