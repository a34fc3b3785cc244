//! Permuted executor.
//!
//! For index matrices that only permute, scale and translate axes, the
//! input position along each axis depends on a single output index. The
//! sampler precomputes tap positions and weights per output axis once per
//! call and every row is then a separable weighted sum (or a plain indexed
//! copy for nearest neighbour).

use nalgebra::Matrix4;

use super::{ExecuteContext, OutputChunk};
use crate::background::background_pixel;
use crate::composite::{row_composite_func, SlabSettings};
use crate::convert::{conversion_func, rescale_scalars, set_pixels_func};
use crate::interpolate::{InterpolationMode, InterpolationWeights, Sampler};
use crate::scalar::{Scalar, ScalarType};
use crate::stencil::StencilSpan;
use crate::volume::Extent;

/// Weight tables and iteration bounds shared by all chunks of one call.
#[derive(Debug)]
pub struct PermutePlan {
    weights: InterpolationWeights,
    /// Table indices whose samples fall inside the input bounds.
    clip: Extent,
    /// Output voxels that receive at least one sample.
    iter_ext: Extent,
    empty: bool,
    nsamples: usize,
    /// Copy voxels verbatim instead of converting through f64.
    direct_copy: bool,
}

impl PermutePlan {
    /// Precompute tables for the whole requested output extent.
    pub fn new(
        sampler: &dyn Sampler,
        matrix: &Matrix4<f64>,
        out_ext: &Extent,
        slab: &SlabSettings,
        rescale: bool,
        input_type: ScalarType,
        output_type: ScalarType,
    ) -> Self {
        let nsamples = slab.count.max(1);
        let mut table_matrix = *matrix;
        let mut table_ext = *out_ext;
        if nsamples > 1 {
            // table z index t samples output slice t - k for layer k
            let half = 0.5 * (nsamples - 1) as f64;
            for i in 0..3 {
                table_matrix[(i, 3)] -= half * matrix[(i, 2)];
            }
            table_ext.0[5] += nsamples as i32 - 1;
        }

        let (weights, clip) = sampler.precompute_weights(&table_matrix, &table_ext);

        let empty = (0..3).any(|a| clip.min(a) > clip.max(a));
        let mut iter_ext = clip;
        if empty {
            for a in 0..3 {
                iter_ext.0[2 * a] = out_ext.min(a);
                iter_ext.0[2 * a + 1] = out_ext.min(a) - 1;
            }
        } else {
            iter_ext.0[4] = (clip.min(2) - (nsamples as i32 - 1)).max(out_ext.min(2));
            iter_ext.0[5] = clip.max(2).min(out_ext.max(2));
        }

        let direct_copy = sampler.interpolation_mode() == InterpolationMode::Nearest
            && input_type == output_type
            && !rescale
            && nsamples == 1;

        tracing::debug!(?iter_ext, empty, direct_copy, "permuted executor tables ready");

        Self {
            weights,
            clip,
            iter_ext,
            empty,
            nsamples,
            direct_copy,
        }
    }

    pub fn iter_extent(&self) -> Extent {
        self.iter_ext
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_direct_copy(&self) -> bool {
        self.direct_copy
    }
}

/// Scratch rows reused across the rows of one chunk.
struct RowBuffers {
    values: Vec<f64>,
    layer: Vec<f64>,
}

pub fn execute<U: Scalar>(
    ctx: &ExecuteContext<'_>,
    plan: &PermutePlan,
    chunk: &mut OutputChunk<'_, U>,
    spans: &mut Vec<StencilSpan>,
) {
    let nc = chunk.components;
    let in_nc = ctx.sampler.components();
    let ext = chunk.extent;
    let iter = &plan.iter_ext;

    let background = background_pixel::<U>(ctx.background, nc);
    let set_pixels = set_pixels_func::<U>(nc);
    let convert = conversion_func::<U>(
        ctx.input.scalar_type(),
        ctx.scalar_shift,
        ctx.scalar_scale,
        ctx.force_clamping(),
    );
    let composite = row_composite_func(ctx.slab.mode, ctx.slab.trapezoid);
    let rescale = ctx.rescales();
    let direct = if plan.direct_copy { ctx.input.as_slice::<U>().ok() } else { None };

    let width = ext.len(0);
    let mut buffers = RowBuffers {
        values: vec![0.0; width * in_nc],
        layer: vec![0.0; width * in_nc],
    };

    let x_lo = iter.min(0).max(ext.min(0));
    let x_hi = iter.max(0).min(ext.max(0));

    for id_z in ext.min(2)..=ext.max(2) {
        for id_y in ext.min(1)..=ext.max(1) {
            let row_inside =
                !plan.empty && (iter.min(2)..=iter.max(2)).contains(&id_z) && (iter.min(1)..=iter.max(1)).contains(&id_y);
            if !row_inside || x_lo > x_hi {
                set_pixels(chunk.span_mut(ext.min(0), ext.max(0), id_y, id_z), &background);
                continue;
            }

            // leading and trailing pixels outside the table
            if x_lo > ext.min(0) {
                set_pixels(chunk.span_mut(ext.min(0), x_lo - 1, id_y, id_z), &background);
            }
            if x_hi < ext.max(0) {
                set_pixels(chunk.span_mut(x_hi + 1, ext.max(0), id_y, id_z), &background);
            }

            for (x_min, x_max, inside) in ctx.row_runs(x_lo, x_hi, id_y, id_z) {
                let out = chunk.span_mut(x_min, x_max, id_y, id_z);
                if !inside {
                    set_pixels(out, &background);
                    continue;
                }

                let span = (x_max - x_min + 1) as usize;
                match direct {
                    Some(input) => copy_row(&plan.weights, input, [x_min, id_y, id_z], out, nc, span),
                    None => {
                        let sampled = sample_row(ctx, plan, composite, &mut buffers, [x_min, id_y, id_z], span);
                        if !sampled {
                            set_pixels(out, &background);
                            continue;
                        }
                        let values = &mut buffers.values[..span * in_nc];
                        if rescale {
                            rescale_scalars(values, ctx.scalar_shift, ctx.scalar_scale);
                        }
                        convert(values, out);
                    }
                }

                if ctx.generate_stencil {
                    spans.push(StencilSpan {
                        z: id_z,
                        y: id_y,
                        x_start: x_min,
                        x_end: x_max,
                    });
                }
            }
        }
    }
}

/// Interpolate and composite the slab layers of one span into
/// `buffers.values`. Returns false when no layer lies inside the clip.
fn sample_row(
    ctx: &ExecuteContext<'_>,
    plan: &PermutePlan,
    composite: crate::composite::RowCompositeFn,
    buffers: &mut RowBuffers,
    [id_x, id_y, id_z]: [i32; 3],
    span: usize,
) -> bool {
    let in_nc = ctx.sampler.components();
    let n = plan.nsamples as i32;

    // incomplete slabs at the clip boundary use fewer layers
    let lower_skip = (plan.clip.min(2) - id_z).max(0);
    let upper_skip = (id_z + (n - 1) - plan.clip.max(2)).max(0);
    let nsamples1 = n - lower_skip - upper_skip;
    if nsamples1 <= 0 {
        return false;
    }
    let nsamples1 = nsamples1 as usize;

    let values = &mut buffers.values[..span * in_nc];
    let layer = &mut buffers.layer[..span * in_nc];
    let mut z = id_z + lower_skip;
    for i in 0..nsamples1 {
        if nsamples1 > 1 {
            ctx.sampler.interpolate_row(&plan.weights, [id_x, id_y, z], layer, span);
            composite(values, layer, i, nsamples1);
        } else {
            ctx.sampler.interpolate_row(&plan.weights, [id_x, id_y, z], values, span);
        }
        z += 1;
    }
    true
}

/// Nearest-neighbour copy straight from the precomputed positions.
fn copy_row<U: Scalar>(
    weights: &InterpolationWeights,
    input: &[U],
    [id_x, id_y, id_z]: [i32; 3],
    out: &mut [U],
    nc: usize,
    span: usize,
) {
    let (pz, _) = weights.taps(2, id_z);
    let (py, _) = weights.taps(1, id_y);
    let base = pz[0] + py[0];
    for (i, pixel) in out.chunks_exact_mut(nc).take(span).enumerate() {
        let (px, _) = weights.taps(0, id_x + i as i32);
        let src = (base + px[0]) as usize;
        pixel.copy_from_slice(&input[src..src + nc]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::SlabMode;
    use crate::execute::general;
    use crate::interpolate::{ImageInterpolator, Interpolator, SamplerSettings};
    use crate::matrix::IndexMatrix;
    use crate::volume::Volume;

    fn context<'a>(
        input: &'a Volume,
        sampler: &'a dyn Sampler,
        index_matrix: &'a IndexMatrix,
        slab: SlabSettings,
    ) -> ExecuteContext<'a> {
        ExecuteContext {
            input,
            sampler,
            index_matrix,
            stencil: None,
            slab,
            scalar_shift: 0.0,
            scalar_scale: 1.0,
            background: [-1.0, 0.0, 0.0, 0.0],
            border: true,
            generate_stencil: true,
        }
    }

    fn run_both(ctx: &ExecuteContext<'_>, extent: Extent) -> (Vec<f32>, Vec<f32>, Vec<StencilSpan>, Vec<StencilSpan>) {
        let plan = PermutePlan::new(
            ctx.sampler,
            ctx.index_matrix.matrix(),
            &extent,
            &ctx.slab,
            ctx.rescales(),
            ctx.input.scalar_type(),
            ScalarType::F32,
        );

        let mut permuted = vec![0f32; extent.num_voxels()];
        let mut permuted_spans = Vec::new();
        execute(
            ctx,
            &plan,
            &mut OutputChunk {
                extent,
                components: 1,
                data: &mut permuted,
            },
            &mut permuted_spans,
        );

        let mut generic = vec![0f32; extent.num_voxels()];
        let mut generic_spans = Vec::new();
        general::execute(
            ctx,
            &mut OutputChunk {
                extent,
                components: 1,
                data: &mut generic,
            },
            &mut generic_spans,
        );
        (permuted, generic, permuted_spans, generic_spans)
    }

    fn swap_xy_matrix() -> Matrix4<f64> {
        // output x reads input y, output y reads input x shifted by 1
        let mut m = Matrix4::zeros();
        m[(1, 0)] = 1.0;
        m[(0, 1)] = 1.0;
        m[(0, 3)] = 1.0;
        m[(2, 2)] = 1.0;
        m[(3, 3)] = 1.0;
        m
    }

    #[test]
    fn test_nearest_matches_general() {
        let input = Volume::from_fn(Extent::new(0, 4, 0, 3, 0, 2), 1, |x, y, z, _| (x + 10 * y + 100 * z) as f32).unwrap();
        let index_matrix = IndexMatrix::Linear(swap_xy_matrix());
        let sampler = ImageInterpolator::nearest().bind(&input, &SamplerSettings::default()).unwrap();
        let ctx = context(&input, sampler.as_ref(), &index_matrix, SlabSettings::default());
        let extent = Extent::new(-1, 4, -1, 5, 0, 3);
        let (permuted, generic, ps, gs) = run_both(&ctx, extent);
        assert_eq!(permuted, generic);
        assert_eq!(ps, gs);
        assert!(permuted.contains(&-1.0));
    }

    #[test]
    fn test_slab_matches_general() {
        let input = Volume::from_fn(Extent::new(0, 3, 0, 3, 0, 4), 1, |x, y, z, _| (x * y + 7 * z) as f32).unwrap();
        let index_matrix = IndexMatrix::Linear(swap_xy_matrix());
        let settings = SamplerSettings {
            tolerance: 0.0,
            ..SamplerSettings::default()
        };
        let sampler = ImageInterpolator::nearest().bind(&input, &settings).unwrap();
        for mode in [SlabMode::Mean, SlabMode::Max, SlabMode::Sum] {
            let slab = SlabSettings {
                count: 3,
                mode,
                ..SlabSettings::default()
            };
            let ctx = context(&input, sampler.as_ref(), &index_matrix, slab);
            let (permuted, generic, ..) = run_both(&ctx, Extent::new(0, 3, 0, 3, -1, 5));
            assert_eq!(permuted, generic, "{mode:?}");
        }
    }

    #[test]
    fn test_direct_copy_plan() {
        let input = Volume::from_fn(Extent::new(0, 2, 0, 2, 0, 0), 1, |x, y, _, _| (x + 3 * y) as u8).unwrap();
        let index_matrix = IndexMatrix::Linear(swap_xy_matrix());
        let sampler = ImageInterpolator::nearest().bind(&input, &SamplerSettings::default()).unwrap();
        let ctx = context(&input, sampler.as_ref(), &index_matrix, SlabSettings::default());
        let extent = Extent::new(0, 2, 0, 2, 0, 0);
        let plan = PermutePlan::new(
            ctx.sampler,
            index_matrix.matrix(),
            &extent,
            &ctx.slab,
            false,
            ScalarType::U8,
            ScalarType::U8,
        );
        assert!(plan.is_direct_copy());
        assert_eq!(plan.iter_extent(), Extent::new(0, 2, 0, 1, 0, 0));

        let mut out = vec![0u8; 9];
        let mut spans = Vec::new();
        execute(
            &ctx,
            &plan,
            &mut OutputChunk {
                extent,
                components: 1,
                data: &mut out,
            },
            &mut spans,
        );
        // out(x, y) = in(y + 1, x); the last output row is past the input
        assert_eq!(out, vec![1, 4, 7, 2, 5, 8, 0, 0, 0]);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_missing_input_is_empty() {
        let input = Volume::from_fn(Extent::new(0, 2, 0, 2, 0, 0), 1, |_, _, _, _| 1.0f32).unwrap();
        let mut m = Matrix4::identity();
        m[(0, 3)] = 50.0;
        let index_matrix = IndexMatrix::Linear(m);
        let sampler = ImageInterpolator::linear().bind(&input, &SamplerSettings::default()).unwrap();
        let ctx = context(&input, sampler.as_ref(), &index_matrix, SlabSettings::default());
        let (permuted, generic, ps, _) = run_both(&ctx, Extent::new(0, 2, 0, 2, 0, 0));
        assert!(permuted.iter().all(|&v| v == -1.0));
        assert_eq!(permuted, generic);
        assert!(ps.is_empty());
    }
}
