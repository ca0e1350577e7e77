//! Error types for tessellation configuration.

use std::fmt;

/// Errors that can occur when configuring tessellation inputs.
///
/// All of these are construction-time configuration errors; the build paths
/// themselves have no recoverable failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TessError {
    /// A tessellation level was not a power of two.
    LevelNotPowerOfTwo { level: u32 },
    /// A tessellation level was outside the supported `1..=16` range.
    LevelOutOfRange { level: u32 },
    /// Section dimensions would exceed the byte-sized local vertex
    /// coordinate range (and with it, the 16-bit index budget).
    SectionTooLarge { size: u32, max_level: u32 },
}

impl fmt::Display for TessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevelNotPowerOfTwo { level } => {
                write!(f, "tessellation level {level} is not a power of two")
            }
            Self::LevelOutOfRange { level } => {
                write!(f, "tessellation level {level} is outside 1..=16")
            }
            Self::SectionTooLarge { size, max_level } => {
                write!(
                    f,
                    "section size {size} at tessellation level {max_level} exceeds 255 steps per axis"
                )
            }
        }
    }
}

impl std::error::Error for TessError {}

/// Result type for tessellation configuration.
pub type TessResult<T> = Result<T, TessError>;
