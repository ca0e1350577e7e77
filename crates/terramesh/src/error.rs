//! Error types for the terramesh crate.

use std::fmt;

use terramesh_tess::TessError;

/// Result type for terramesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in terramesh operations.
///
/// Everything here is a construction-time configuration error; the per-frame
/// build paths are infallible once a terrain validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Tessellation configuration was rejected.
    Tess(TessError),
    /// A terrain configuration value was invalid.
    InvalidConfig {
        /// The configuration field at fault.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// An alpha map's length did not match the height-field dimensions.
    AlphaMapSize {
        /// The length the height field requires.
        expected: usize,
        /// The length that was supplied.
        actual: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Tess(e) => write!(f, "tessellation error: {e}"),
            Error::InvalidConfig { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::AlphaMapSize { expected, actual } => {
                write!(
                    f,
                    "alpha map has {actual} samples, height field requires {expected}"
                )
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Tess(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TessError> for Error {
    fn from(e: TessError) -> Self {
        Error::Tess(e)
    }
}
