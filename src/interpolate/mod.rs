//! Interpolation capability used by the executors.
//!
//! The executors never look at kernel mathematics. They bind an
//! [`Interpolator`] to the input volume, which yields a [`Sampler`] that
//! answers bounds tests, point interpolation and, for separable kernels,
//! precomputed per-row weights. [`ImageInterpolator`] is the stock kernel
//! (nearest, trilinear and Catmull-Rom cubic).

mod image;

pub use image::{ImageInterpolator, ImageSampler};

use std::fmt::Debug;

use nalgebra::Matrix4;

use crate::error::Result;
use crate::extent::floor_frac;
use crate::volume::{Extent, Volume};

/// Smallest bounds tolerance a sampler is given, so that points that land
/// on the last voxel after rounding noise are still accepted.
pub const FLOOR_TOLERANCE: f64 = 7.62939453125e-06;

/// Kernel shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpolationMode {
    Nearest,
    #[default]
    Linear,
    Cubic,
}

impl InterpolationMode {
    /// Kernel width per axis.
    pub fn kernel_size(self) -> usize {
        match self {
            InterpolationMode::Nearest => 1,
            InterpolationMode::Linear => 2,
            InterpolationMode::Cubic => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InterpolationMode::Nearest => "nearest",
            InterpolationMode::Linear => "linear",
            InterpolationMode::Cubic => "cubic",
        }
    }
}

/// How indices outside the input extent are folded back into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderMode {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

/// Fold index `i` into `[lo, hi]`.
#[inline]
pub fn map_border(i: i32, lo: i32, hi: i32, mode: BorderMode) -> i32 {
    match mode {
        BorderMode::Clamp => i.clamp(lo, hi),
        BorderMode::Repeat => lo + (i - lo).rem_euclid(hi - lo + 1),
        BorderMode::Mirror => {
            let range = hi - lo;
            if range == 0 {
                return lo;
            }
            let r = (i - lo).rem_euclid(2 * range);
            lo + if r > range { 2 * range - r } else { r }
        }
    }
}

/// Shift continuous index `x` by whole border periods so that its kernel
/// taps stay near `[lo, hi]`. The folded position samples the same voxels
/// with the same weights; positions already near the extent are returned
/// unchanged.
#[inline]
pub fn fold_position(x: f64, lo: i32, hi: i32, mode: BorderMode) -> f64 {
    let (lo, hi) = (lo as f64, hi as f64);
    match mode {
        BorderMode::Clamp => x.clamp(lo - 1.0, hi + 1.0),
        BorderMode::Repeat => {
            let period = hi - lo + 1.0;
            if x < lo || x >= lo + period {
                lo + (x - lo).rem_euclid(period)
            } else {
                x
            }
        }
        BorderMode::Mirror => {
            let period = 2.0 * (hi - lo);
            if period == 0.0 {
                lo
            } else if x < lo || x >= lo + period {
                lo + (x - lo).rem_euclid(period)
            } else {
                x
            }
        }
    }
}

/// Per-bind sampler options chosen by the reslice configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Replaces the interpolator's own mode when set.
    pub mode: Option<InterpolationMode>,
    pub border: BorderMode,
    /// Distance beyond the extent that still counts as inside.
    pub tolerance: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            mode: None,
            border: BorderMode::Clamp,
            tolerance: 0.5,
        }
    }
}

/// Kernel support size per input axis.
///
/// Axes whose matrix row maps integer indices to integer indices only need
/// one sample. Perspective matrices get the full kernel everywhere.
pub fn support_size(mode: InterpolationMode, matrix: Option<&Matrix4<f64>>) -> [usize; 3] {
    let size = mode.kernel_size();
    let mut support = [size; 3];
    let Some(m) = matrix else {
        return support;
    };
    if m[(3, 0)] != 0.0 || m[(3, 1)] != 0.0 || m[(3, 2)] != 0.0 || m[(3, 3)] != 1.0 {
        return support;
    }
    for (i, s) in support.iter_mut().enumerate() {
        if (0..4).all(|j| floor_frac(m[(i, j)]).1 == 0.0) {
            *s = 1;
        }
    }
    support
}

/// Precomputed separable weights for a permutation matrix.
///
/// Indexed by output axis: output index `i` along axis `j` reads
/// `kernel_size[j]` taps starting at `(i - extent.min(j)) * kernel_size[j]`.
/// Positions are element offsets into the input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationWeights {
    pub extent: Extent,
    pub kernel_size: [usize; 3],
    pub positions: [Vec<isize>; 3],
    pub weights: [Vec<f64>; 3],
}

impl InterpolationWeights {
    #[inline]
    pub fn taps(&self, axis: usize, index: i32) -> (&[isize], &[f64]) {
        let k = self.kernel_size[axis];
        let start = (index - self.extent.min(axis)) as usize * k;
        (
            &self.positions[axis][start..start + k],
            &self.weights[axis][start..start + k],
        )
    }
}

/// A kernel that can be bound to a volume.
pub trait Interpolator: Send + Sync + Debug {
    /// Configured kernel shape.
    fn interpolation_mode(&self) -> InterpolationMode;

    /// Whether the kernel is a product of 1-D kernels.
    fn is_separable(&self) -> bool;

    /// Components produced per voxel for an input with `input_components`.
    fn number_of_components(&self, input_components: usize) -> usize {
        input_components
    }

    /// Support size per input axis for the given index matrix.
    fn support_size(&self, mode: InterpolationMode, matrix: Option<&Matrix4<f64>>) -> [usize; 3] {
        support_size(mode, matrix)
    }

    /// Prepare a sampler over `volume`.
    fn bind<'a>(&self, volume: &'a Volume, settings: &SamplerSettings) -> Result<Box<dyn Sampler + 'a>>;
}

/// A kernel bound to one input volume.
pub trait Sampler: Send + Sync {
    fn components(&self) -> usize;

    fn extent(&self) -> Extent;

    fn border_mode(&self) -> BorderMode;

    /// Effective kernel shape for this bind.
    fn interpolation_mode(&self) -> InterpolationMode;

    /// True when `point` (continuous input index) is close enough to the
    /// extent to be sampled.
    fn check_bounds_ijk(&self, point: &[f64; 3]) -> bool;

    /// Sample all components at `point` into `out`.
    fn interpolate_ijk(&self, point: &[f64; 3], out: &mut [f64]);

    /// Weights for every output index of `out_ext` under a permutation
    /// matrix, plus the sub-extent whose samples fall inside the bounds.
    fn precompute_weights(&self, matrix: &Matrix4<f64>, out_ext: &Extent) -> (InterpolationWeights, Extent);

    /// Interpolate `n` consecutive output pixels starting at `index` into
    /// `out`, using weights from [`Sampler::precompute_weights`].
    fn interpolate_row(&self, weights: &InterpolationWeights, index: [i32; 3], out: &mut [f64], n: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_border_modes() {
        assert_eq!(map_border(-3, 0, 4, BorderMode::Clamp), 0);
        assert_eq!(map_border(7, 0, 4, BorderMode::Clamp), 4);
        assert_eq!(map_border(-1, 0, 4, BorderMode::Repeat), 4);
        assert_eq!(map_border(5, 0, 4, BorderMode::Repeat), 0);
        assert_eq!(map_border(12, 10, 14, BorderMode::Repeat), 12);

        let mirrored: Vec<i32> = (-4..=8).map(|i| map_border(i, 0, 4, BorderMode::Mirror)).collect();
        assert_eq!(mirrored, vec![4, 3, 2, 1, 0, 1, 2, 3, 4, 3, 2, 1, 0]);
        assert_eq!(map_border(9, 3, 3, BorderMode::Mirror), 3);
    }

    #[test]
    fn test_fold_position_keeps_taps_near_extent() {
        assert_eq!(fold_position(2.5, 0, 3, BorderMode::Repeat), 2.5);
        assert_eq!(fold_position(3e9 + 0.5, 0, 3, BorderMode::Repeat), 0.5);
        assert_eq!(fold_position(-1.25, 0, 3, BorderMode::Repeat), 2.75);
        assert_eq!(fold_position(-3e9 - 1.0, 0, 3, BorderMode::Mirror), 5.0);
        assert_eq!(fold_position(7.5, 2, 2, BorderMode::Mirror), 2.0);
        assert_eq!(fold_position(1e12, 0, 3, BorderMode::Clamp), 4.0);
        assert_eq!(fold_position(-0.4, 0, 3, BorderMode::Clamp), -0.4);

        // a whole number of periods away samples the same voxels
        for mode in [BorderMode::Repeat, BorderMode::Mirror] {
            let near = fold_position(1.0, 0, 4, mode) as i32;
            let far = fold_position(1.0 + 8.0 * 1e8, 0, 4, mode) as i32;
            assert_eq!(map_border(near, 0, 4, mode), map_border(far, 0, 4, mode));
        }
    }

    #[test]
    fn test_support_size_integer_rows() {
        let mut m = Matrix4::identity();
        assert_eq!(support_size(InterpolationMode::Cubic, Some(&m)), [1, 1, 1]);
        m[(0, 3)] = 0.5;
        m[(1, 1)] = 0.25;
        assert_eq!(support_size(InterpolationMode::Linear, Some(&m)), [2, 2, 1]);
        assert_eq!(support_size(InterpolationMode::Cubic, None), [4, 4, 4]);
        m[(3, 2)] = 1.0;
        assert_eq!(support_size(InterpolationMode::Linear, Some(&m)), [2, 2, 2]);
    }
}
