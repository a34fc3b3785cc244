//! General per-voxel executor.
//!
//! Handles any index matrix: perspective, residual transforms and slab
//! sampling along the output z axis. Positions are accumulated
//! incrementally (z, then y, then x) in the same order as extent inference.

use super::{ExecuteContext, OutputChunk};
use crate::background::background_pixel;
use crate::composite::composite_func;
use crate::convert::{conversion_func, rescale_scalars, set_pixels_func};
use crate::extent::round_index;
use crate::interpolate::{BorderMode, InterpolationMode};
use crate::scalar::Scalar;
use crate::stencil::StencilSpan;

/// Whether raw voxels can be copied instead of interpolated.
fn can_optimize_nearest<U: Scalar>(ctx: &ExecuteContext<'_>) -> bool {
    ctx.sampler.interpolation_mode() == InterpolationMode::Nearest
        && ctx.sampler.border_mode() == BorderMode::Clamp
        && ctx.index_matrix.is_linear()
        && !ctx.index_matrix.has_perspective()
        && !ctx.rescales()
        && ctx.input.scalar_type() == U::TYPE
        && ctx.border
        && ctx.slab_count() <= 1
}

pub fn execute<U: Scalar>(ctx: &ExecuteContext<'_>, chunk: &mut OutputChunk<'_, U>, spans: &mut Vec<StencilSpan>) {
    let nc = chunk.components;
    let in_nc = ctx.sampler.components();
    let nsamples = ctx.slab_count();
    let slab_fraction = ctx.slab.spacing_fraction;
    let perspective = ctx.index_matrix.has_perspective();
    let residual = ctx.index_matrix.residual();
    let rescale = ctx.rescales();
    let optimize_nearest = can_optimize_nearest::<U>(ctx);
    let input_slice = if optimize_nearest { ctx.input.as_slice::<U>().ok() } else { None };

    let background = background_pixel::<U>(ctx.background, nc);
    let convert = conversion_func::<U>(
        ctx.input.scalar_type(),
        ctx.scalar_shift,
        ctx.scalar_scale,
        ctx.force_clamping(),
    );
    let set_pixels = set_pixels_func::<U>(nc);
    let composite = composite_func(ctx.slab.mode, ctx.slab.trapezoid);

    let m = ctx.index_matrix.matrix();
    let mut x_axis = [0.0; 4];
    let mut y_axis = [0.0; 4];
    let mut z_axis = [0.0; 4];
    let mut origin = [0.0; 4];
    for i in 0..4 {
        x_axis[i] = m[(i, 0)];
        y_axis[i] = m[(i, 1)];
        z_axis[i] = m[(i, 2)];
        origin[i] = m[(i, 3)];
    }

    let ext = chunk.extent;
    let width = ext.len(0);
    let mut row = vec![0.0f64; width * in_nc];
    let mut in_bounds = vec![false; width];
    let mut samples = vec![0.0f64; nsamples * in_nc];

    for id_z in ext.min(2)..=ext.max(2) {
        let mut in_point0 = [0.0; 4];
        for i in 0..4 {
            in_point0[i] = origin[i] + id_z as f64 * z_axis[i];
        }

        for id_y in ext.min(1)..=ext.max(1) {
            let mut in_point1 = [0.0; 4];
            for i in 0..4 {
                in_point1[i] = in_point0[i] + id_y as f64 * y_axis[i];
            }

            for (x_min, x_max, inside) in ctx.row_runs(ext.min(0), ext.max(0), id_y, id_z) {
                if !inside {
                    set_pixels(chunk.span_mut(x_min, x_max, id_y, id_z), &background);
                    continue;
                }

                if let Some(input) = input_slice {
                    copy_nearest_run(ctx, input, chunk, &in_point1, &x_axis, [x_min, x_max, id_y, id_z], &background, spans);
                    continue;
                }

                // sample the run into the row buffer, flagging in-bounds pixels
                for id_x in x_min..=x_max {
                    let col = (id_x - x_min) as usize;
                    let mut in_point2 = [0.0; 4];
                    for i in 0..4 {
                        in_point2[i] = in_point1[i] + id_x as f64 * x_axis[i];
                    }

                    let mut sample_count = 0;
                    for sample in 0..nsamples {
                        let mut p = in_point2;
                        if nsamples > 1 {
                            let s = (sample as f64 - 0.5 * (nsamples - 1) as f64) * slab_fraction;
                            for i in 0..4 {
                                p[i] = in_point2[i] + s * z_axis[i];
                            }
                        }
                        if perspective {
                            let f = 1.0 / p[3];
                            p[0] *= f;
                            p[1] *= f;
                            p[2] *= f;
                        }
                        let mut point = [p[0], p[1], p[2]];
                        if let Some((transform, to_index)) = residual {
                            point = transform.transform_point(point);
                            to_index.apply(&mut point);
                        }
                        if ctx.sampler.check_bounds_ijk(&point) {
                            let at = sample_count * in_nc;
                            ctx.sampler.interpolate_ijk(&point, &mut samples[at..at + in_nc]);
                            sample_count += 1;
                        }
                    }

                    if sample_count > 1 {
                        composite(&mut samples[..sample_count * in_nc], in_nc, sample_count);
                    }
                    in_bounds[col] = sample_count > 0;
                    if sample_count > 0 {
                        row[col * in_nc..(col + 1) * in_nc].copy_from_slice(&samples[..in_nc]);
                    }
                }

                // write runs of equal boundedness in one call each
                let n = (x_max - x_min + 1) as usize;
                let mut start = 0;
                while start < n {
                    let was_in = in_bounds[start];
                    let mut end = start;
                    while end + 1 < n && in_bounds[end + 1] == was_in {
                        end += 1;
                    }
                    let (sx, ex) = (x_min + start as i32, x_min + end as i32);
                    let out = chunk.span_mut(sx, ex, id_y, id_z);
                    if was_in {
                        if ctx.generate_stencil {
                            spans.push(StencilSpan {
                                z: id_z,
                                y: id_y,
                                x_start: sx,
                                x_end: ex,
                            });
                        }
                        let values = &mut row[start * in_nc..(end + 1) * in_nc];
                        if rescale {
                            rescale_scalars(values, ctx.scalar_shift, ctx.scalar_scale);
                        }
                        convert(values, out);
                    } else {
                        set_pixels(out, &background);
                    }
                    start = end + 1;
                }
            }
        }
    }
}

/// Nearest-neighbour run by direct voxel copies: leading background, one
/// in-bounds stretch, trailing background.
#[allow(clippy::too_many_arguments)]
fn copy_nearest_run<U: Scalar>(
    ctx: &ExecuteContext<'_>,
    input: &[U],
    chunk: &mut OutputChunk<'_, U>,
    in_point1: &[f64; 4],
    x_axis: &[f64; 4],
    [x_min, x_max, id_y, id_z]: [i32; 4],
    background: &[U],
    spans: &mut Vec<StencilSpan>,
) {
    let nc = chunk.components;
    let in_ext = ctx.input.extent();
    let [in_nx, in_ny, in_nz] = in_ext.dims();
    let inc = [nc, nc * in_nx, nc * in_nx * in_ny];

    let mut start = x_min;
    let mut end = x_min - 1;
    let mut in_bounds = false;

    for id_x in x_min..=x_max {
        let px = in_point1[0] + id_x as f64 * x_axis[0];
        let py = in_point1[1] + id_x as f64 * x_axis[1];
        let pz = in_point1[2] + id_x as f64 * x_axis[2];
        let ix = round_index(px).saturating_sub(in_ext.min(0));
        let iy = round_index(py).saturating_sub(in_ext.min(1));
        let iz = round_index(pz).saturating_sub(in_ext.min(2));

        if ix >= 0
            && (ix as usize) < in_nx
            && iy >= 0
            && (iy as usize) < in_ny
            && iz >= 0
            && (iz as usize) < in_nz
        {
            if !in_bounds {
                start = id_x;
                in_bounds = true;
                if start > x_min {
                    let set_pixels = set_pixels_func::<U>(nc);
                    set_pixels(chunk.span_mut(x_min, start - 1, id_y, id_z), background);
                }
            }
            end = id_x;
            let src = ix as usize * inc[0] + iy as usize * inc[1] + iz as usize * inc[2];
            let dst = chunk.offset(id_x, id_y, id_z);
            chunk.data[dst..dst + nc].copy_from_slice(&input[src..src + nc]);
        } else if in_bounds {
            break;
        }
    }

    if end < x_max {
        let set_pixels = set_pixels_func::<U>(nc);
        set_pixels(chunk.span_mut(end + 1, x_max, id_y, id_z), background);
    }
    if ctx.generate_stencil && end >= start {
        spans.push(StencilSpan {
            z: id_z,
            y: id_y,
            x_start: start,
            x_end: end,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::{SlabMode, SlabSettings};
    use crate::interpolate::{ImageInterpolator, Interpolator, SamplerSettings};
    use crate::matrix::IndexMatrix;
    use crate::volume::{Extent, Volume};
    use nalgebra::Matrix4;

    fn context<'a>(
        input: &'a Volume,
        sampler: &'a dyn crate::interpolate::Sampler,
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
            background: [7.0, 0.0, 0.0, 0.0],
            border: true,
            generate_stencil: true,
        }
    }

    fn run(ctx: &ExecuteContext<'_>, extent: Extent) -> (Vec<u8>, Vec<StencilSpan>) {
        let mut data = vec![0u8; extent.num_voxels()];
        let mut spans = Vec::new();
        let mut chunk = OutputChunk {
            extent,
            components: 1,
            data: &mut data,
        };
        execute(ctx, &mut chunk, &mut spans);
        (data, spans)
    }

    #[test]
    fn test_shifted_nearest_copies_and_pads() {
        let input = Volume::from_fn(Extent::new(0, 3, 0, 0, 0, 0), 1, |x, _, _, _| (x * 10) as u8).unwrap();
        let mut m = Matrix4::identity();
        m[(0, 3)] = 2.0;
        let index_matrix = IndexMatrix::Linear(m);
        let settings = SamplerSettings::default();
        let sampler = ImageInterpolator::nearest().bind(&input, &settings).unwrap();
        let ctx = context(&input, sampler.as_ref(), &index_matrix, SlabSettings::default());
        let (data, spans) = run(&ctx, Extent::new(-3, 3, 0, 0, 0, 0));
        assert_eq!(data, vec![7, 0, 10, 20, 30, 7, 7]);
        assert_eq!(
            spans,
            vec![StencilSpan {
                z: 0,
                y: 0,
                x_start: -2,
                x_end: 1
            }]
        );
    }

    #[test]
    fn test_linear_path_marks_out_of_bounds() {
        let input = Volume::from_fn(Extent::new(0, 3, 0, 0, 0, 0), 1, |x, _, _, _| (x * 10) as u8).unwrap();
        let mut m = Matrix4::identity();
        m[(0, 3)] = 0.5;
        let index_matrix = IndexMatrix::Linear(m);
        let settings = SamplerSettings::default();
        let sampler = ImageInterpolator::linear().bind(&input, &settings).unwrap();
        let ctx = context(&input, sampler.as_ref(), &index_matrix, SlabSettings::default());
        let (data, _) = run(&ctx, Extent::new(-2, 4, 0, 0, 0, 0));
        // -1.5 and 4.5 lie beyond the half-voxel border
        assert_eq!(data, vec![7, 0, 5, 15, 25, 30, 7]);
    }

    #[test]
    fn test_slab_mean_over_in_bounds_samples() {
        let input = Volume::from_fn(Extent::new(0, 0, 0, 0, 0, 2), 1, |_, _, z, _| (z * 30) as u8).unwrap();
        let index_matrix = IndexMatrix::Linear(Matrix4::identity());
        let settings = SamplerSettings {
            tolerance: 0.0,
            ..SamplerSettings::default()
        };
        let sampler = ImageInterpolator::nearest().bind(&input, &settings).unwrap();
        let slab = SlabSettings {
            count: 3,
            mode: SlabMode::Mean,
            ..SlabSettings::default()
        };
        let ctx = context(&input, sampler.as_ref(), &index_matrix, slab);
        let (data, _) = run(&ctx, Extent::new(0, 0, 0, 0, 0, 2));
        // z = 0 only sees samples at 0 and 1; z = 2 only 1 and 2
        assert_eq!(data, vec![15, 30, 45]);
    }
}
