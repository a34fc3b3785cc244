//! Resampling executors.
//!
//! Output is produced in disjoint chunks (z slabs or y row bands). Every
//! chunk runs one strategy over shared read-only state: the general
//! per-voxel executor, the permuted executor with precomputed separable
//! weights, or a plain background fill when the output misses the input.

pub mod general;
pub mod permute;

use crate::background::{background_pixel, clear_execute};
use crate::composite::{SlabMode, SlabSettings};
use crate::interpolate::{InterpolationMode, Sampler};
use crate::matrix::IndexMatrix;
use crate::scalar::Scalar;
use crate::stencil::{ImageStencil, RowRuns, StencilSpan};
use crate::volume::{Extent, Volume};

pub use permute::PermutePlan;

/// State shared by every worker of one execute call.
pub struct ExecuteContext<'a> {
    pub input: &'a Volume,
    pub sampler: &'a dyn Sampler,
    pub index_matrix: &'a IndexMatrix,
    /// Output voxels outside this stencil get the background colour.
    pub stencil: Option<&'a ImageStencil>,
    pub slab: SlabSettings,
    pub scalar_shift: f64,
    pub scalar_scale: f64,
    pub background: [f64; 4],
    /// Border flag of the configuration (tolerance beyond the extent).
    pub border: bool,
    pub generate_stencil: bool,
}

impl ExecuteContext<'_> {
    pub fn slab_count(&self) -> usize {
        self.slab.count.max(1)
    }

    pub fn rescales(&self) -> bool {
        self.scalar_shift != 0.0 || self.scalar_scale != 1.0
    }

    /// Cubic kernels overshoot and slab sums grow, so both always clamp.
    pub fn force_clamping(&self) -> bool {
        self.sampler.interpolation_mode() == InterpolationMode::Cubic
            || (self.slab_count() > 1 && self.slab.mode == SlabMode::Sum)
    }

    /// Stencil runs for row `(y, z)` over `[x0, x1]`.
    pub(crate) fn row_runs(&self, x0: i32, x1: i32, y: i32, z: i32) -> RowRuns<'_> {
        match self.stencil {
            Some(stencil) => stencil.row_runs(x0, x1, y, z),
            None => RowRuns::inside(x0, x1),
        }
    }
}

/// Execution strategy chosen once per call.
#[derive(Debug)]
pub enum Strategy {
    /// Output misses the input: background only.
    Clear,
    Permute(PermutePlan),
    General,
}

/// A worker-owned piece of the output buffer.
pub struct OutputChunk<'a, U> {
    pub extent: Extent,
    pub components: usize,
    pub data: &'a mut [U],
}

impl<U: Scalar> OutputChunk<'_, U> {
    /// Element offset of voxel `(x, y, z)`.
    #[inline]
    pub fn offset(&self, x: i32, y: i32, z: i32) -> usize {
        let e = &self.extent;
        let (nx, ny) = (e.len(0), e.len(1));
        (((z - e.min(2)) as usize * ny + (y - e.min(1)) as usize) * nx + (x - e.min(0)) as usize)
            * self.components
    }

    /// Voxels `x0..=x1` of row `(y, z)`.
    #[inline]
    pub fn span_mut(&mut self, x0: i32, x1: i32, y: i32, z: i32) -> &mut [U] {
        let start = self.offset(x0, y, z);
        let len = (x1 - x0 + 1).max(0) as usize * self.components;
        &mut self.data[start..start + len]
    }
}

/// Run `strategy` over one chunk, appending any output stencil spans.
pub fn execute_chunk<U: Scalar>(
    ctx: &ExecuteContext<'_>,
    strategy: &Strategy,
    chunk: &mut OutputChunk<'_, U>,
    spans: &mut Vec<StencilSpan>,
) {
    match strategy {
        Strategy::Clear => {
            let pixel = background_pixel::<U>(ctx.background, chunk.components);
            clear_execute(chunk.data, &pixel);
        }
        Strategy::Permute(plan) => permute::execute(ctx, plan, chunk, spans),
        Strategy::General => general::execute(ctx, chunk, spans),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_offsets() {
        let mut data = vec![0u8; 3 * 2 * 2 * 2];
        let mut chunk = OutputChunk {
            extent: Extent::new(5, 7, 1, 2, 4, 5),
            components: 2,
            data: &mut data,
        };
        assert_eq!(chunk.offset(5, 1, 4), 0);
        assert_eq!(chunk.offset(6, 1, 4), 2);
        assert_eq!(chunk.offset(5, 2, 4), 6);
        assert_eq!(chunk.offset(7, 2, 5), 22);
        chunk.span_mut(6, 7, 2, 5).fill(9);
        assert_eq!(&data[18..], &[0, 0, 9, 9, 9, 9]);
    }
}
