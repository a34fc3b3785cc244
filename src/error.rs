//! Error types for reslicing operations.

use thiserror::Error;

use crate::scalar::ScalarType;

/// Errors reported while configuring or running a reslice.
///
/// Geometric misses (an output region that never touches the input) are not
/// errors: they are resolved by filling with the background colour.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResliceError {
    /// A voxel buffer does not match its extent and component count.
    #[error("size mismatch: expected {expected} scalars, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Typed access was requested on a buffer of another storage kind.
    #[error("scalar type mismatch: expected {expected:?}, got {actual:?}")]
    ScalarTypeMismatch {
        expected: ScalarType,
        actual: ScalarType,
    },

    /// Volumes need at least one component per voxel.
    #[error("invalid component count: {0}")]
    InvalidComponents(usize),

    /// A configuration value is out of its valid domain.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Voxel storage must be in standard (C-contiguous) layout.
    #[error("voxel storage is not contiguous")]
    NonContiguous,
}

impl ResliceError {
    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

/// Result type for reslicing operations.
pub type Result<T> = std::result::Result<T, ResliceError>;
