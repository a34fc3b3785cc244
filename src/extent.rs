//! Input extent inference.
//!
//! Given an output extent, find the smallest input extent whose voxels can
//! contribute to it. The eight corners of the output extent are pushed
//! through the index matrix with the same incremental accumulation the
//! general executor uses, then widened by the kernel footprint.

use crate::composite::SlabSettings;
use crate::matrix::IndexMatrix;
use crate::volume::Extent;

/// Floor that also returns the fractional remainder. The integer part
/// saturates at the `i32` range.
#[inline]
pub fn floor_frac(x: f64) -> (i32, f64) {
    let f = x.floor();
    (f as i32, x - f)
}

/// Round half up to an integer index.
#[inline]
pub fn round_index(x: f64) -> i32 {
    (x + 0.5).floor() as i32
}

/// Result of an input extent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRequest {
    pub extent: Extent,
    /// False when the output region misses the input entirely.
    pub hit_input_extent: bool,
}

/// Output index to input index for one output voxel, accumulated z, then y,
/// then x, followed by the homogeneous divide. Residual transforms are not
/// applied here.
#[inline]
pub(crate) fn accumulate_point(m: &nalgebra::Matrix4<f64>, x: i32, y: i32, z: f64) -> [f64; 4] {
    let (xf, yf) = (x as f64, y as f64);
    let mut p0 = [0.0; 4];
    let mut p1 = [0.0; 4];
    let mut p = [0.0; 4];
    for i in 0..4 {
        p0[i] = m[(i, 3)] + z * m[(i, 2)];
        p1[i] = p0[i] + yf * m[(i, 1)];
        p[i] = p1[i] + xf * m[(i, 0)];
    }
    p
}

/// Compute the input extent needed to fill `out_ext`.
///
/// `support` is the kernel support size per input axis and `slab` the slab
/// sampling along the output z axis. With `wrap` (repeat or mirror
/// borders) an axis that runs off the whole extent requests all of it.
pub fn infer_input_extent(
    out_ext: &Extent,
    index_matrix: &IndexMatrix,
    support: [usize; 3],
    slab: &SlabSettings,
    whole: &Extent,
    wrap: bool,
) -> InputRequest {
    if !index_matrix.is_linear() {
        return InputRequest {
            extent: *whole,
            hit_input_extent: true,
        };
    }

    let mut out = *out_ext;
    if slab.count > 1 {
        // slab samples sit up to 0.5 * (n - 1) * fraction slices away
        let reach = (0.5 * (slab.count - 1) as f64 * slab.spacing_fraction).ceil() as i32;
        let half = (((slab.count + 1) / 2) as i32).max(reach);
        out.0[4] -= half;
        out.0[5] += half;
    }

    let m = index_matrix.matrix();
    let mut in_ext = [i32::MAX, i32::MIN, i32::MAX, i32::MIN, i32::MAX, i32::MIN];

    for corner in 0..8 {
        let id_x = out.0[corner % 2];
        let id_y = out.0[2 + (corner / 2) % 2];
        let id_z = out.0[4 + (corner / 4) % 2];

        let mut point = accumulate_point(m, id_x, id_y, id_z as f64);
        if point[3] != 1.0 {
            let f = 1.0 / point[3];
            point[0] *= f;
            point[1] *= f;
            point[2] *= f;
        }

        for j in 0..3 {
            let kernel_size = support[j] as i32;
            let extra = (kernel_size + 1) / 2 - 1;
            if kernel_size % 2 == 0 {
                let (k, f) = floor_frac(point[j]);
                in_ext[2 * j] = in_ext[2 * j].min(k.saturating_sub(extra));
                let k = k.saturating_add((f != 0.0) as i32);
                in_ext[2 * j + 1] = in_ext[2 * j + 1].max(k.saturating_add(extra));
            } else {
                let k = round_index(point[j]);
                in_ext[2 * j] = in_ext[2 * j].min(k.saturating_sub(extra));
                in_ext[2 * j + 1] = in_ext[2 * j + 1].max(k.saturating_add(extra));
            }
        }
    }

    let mut hit = true;
    for k in 0..3 {
        let (lo, hi) = (whole.0[2 * k], whole.0[2 * k + 1]);
        if in_ext[2 * k] < lo {
            in_ext[2 * k] = lo;
            if wrap {
                in_ext[2 * k + 1] = hi;
            } else if in_ext[2 * k + 1] < lo {
                in_ext[2 * k + 1] = lo;
                hit = false;
            }
        }
        if in_ext[2 * k + 1] > hi {
            in_ext[2 * k + 1] = hi;
            if wrap {
                in_ext[2 * k] = lo;
            } else if in_ext[2 * k] > hi {
                in_ext[2 * k] = hi.max(lo);
                hit = false;
            }
        }
    }

    InputRequest {
        extent: Extent(in_ext),
        hit_input_extent: hit,
    }
}
