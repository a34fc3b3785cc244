//! Resampling of 3D volumes through arbitrary transforms
//!
//! This crate reslices a regular sampled volume (or 2D image) into a new
//! lattice. Every output voxel index is mapped to a continuous input index,
//! the input is sampled there by a pluggable interpolator, and the result is
//! converted (and clamped where needed) into the output storage type.
//!
//! # Features
//!
//! - **Index matrix**: output geometry, reslice axes, homogeneous transforms
//!   and input geometry folded into one 4x4 matrix; non-linear transforms
//!   are applied per sample
//! - **Two executors**: a general per-voxel path (perspective, residual
//!   transforms, slabs) and a permuted path with precomputed row weights
//! - **Slab compositing**: min, max, mean and sum, with trapezoid weighting
//! - **Stencils**: masked input and recorded output spans
//! - **Parallel execution**: rayon over disjoint output chunks
//! - **AVX2 row conversion** with scalar fallback
//!
//! # Example
//!
//! ```rust
//! use volreslice::{Extent, InterpolationMode, Reslice, Volume};
//!
//! // 8x8x4 ramp volume
//! let input = Volume::from_fn(Extent::new(0, 7, 0, 7, 0, 3), 1, |x, y, z, _| (x + y + z) as f32).unwrap();
//!
//! // Half-resolution output along x and y
//! let output = Reslice::new()
//!     .with_output_spacing([2.0, 2.0, 1.0])
//!     .with_interpolation_mode(InterpolationMode::Linear)
//!     .execute(&input)
//!     .unwrap();
//! assert_eq!(output.volume.extent().dims(), [5, 5, 4]);
//! ```

pub mod background;
pub mod composite;
pub mod convert;
pub mod error;
pub mod execute;
pub mod extent;
pub mod interpolate;
pub mod matrix;
pub mod reslice;
pub mod scalar;
pub mod simd;
pub mod stencil;
pub mod transform;
pub mod volume;

#[cfg(feature = "python")]
mod python;

pub use half::f16;

pub use composite::{SlabMode, SlabSettings};
pub use error::{ResliceError, Result};
pub use extent::{infer_input_extent, InputRequest};
pub use interpolate::{BorderMode, ImageInterpolator, InterpolationMode, Interpolator, Sampler, SamplerSettings};
pub use matrix::{axes_matrix, build_index_matrix, IndexMatrix};
pub use reslice::{OutputInformation, Reslice, ResliceOutput};
pub use scalar::{Scalar, ScalarData, ScalarType};
pub use stencil::{ImageStencil, RowRuns, StencilSpan};
pub use transform::{FnTransform, HomogeneousTransform, ResliceTransform};
pub use volume::{Extent, Geometry, Volume, VolumeInfo};
