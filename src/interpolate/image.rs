//! Stock image interpolator: nearest, trilinear and Catmull-Rom cubic.

use nalgebra::Matrix4;

use super::{
    fold_position, map_border, support_size, BorderMode, InterpolationMode, InterpolationWeights, Interpolator, Sampler,
    SamplerSettings,
};
use crate::error::Result;
use crate::extent::{floor_frac, round_index};
use crate::scalar::Scalar;
use crate::volume::{Extent, Volume};

/// Separable kernel over the voxel lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageInterpolator {
    mode: InterpolationMode,
}

impl ImageInterpolator {
    pub fn new(mode: InterpolationMode) -> Self {
        Self { mode }
    }

    pub fn nearest() -> Self {
        Self::new(InterpolationMode::Nearest)
    }

    pub fn linear() -> Self {
        Self::new(InterpolationMode::Linear)
    }

    pub fn cubic() -> Self {
        Self::new(InterpolationMode::Cubic)
    }
}

impl Interpolator for ImageInterpolator {
    fn interpolation_mode(&self) -> InterpolationMode {
        self.mode
    }

    fn is_separable(&self) -> bool {
        true
    }

    fn bind<'a>(&self, volume: &'a Volume, settings: &SamplerSettings) -> Result<Box<dyn Sampler + 'a>> {
        let mode = settings.mode.unwrap_or(self.mode);
        crate::with_scalar_type!(volume.scalar_type(), T => {
            let sampler = ImageSampler::<T>::new(volume, mode, settings)?;
            Ok(Box::new(sampler) as Box<dyn Sampler + 'a>)
        })
    }
}

/// Up to four taps along one axis.
#[derive(Debug, Clone, Copy)]
struct Taps {
    count: usize,
    offsets: [isize; 4],
    weights: [f64; 4],
}

/// Catmull-Rom weights (a = -0.5) for taps at `-1, 0, 1, 2`.
#[inline]
fn cubic_weights(f: f64) -> [f64; 4] {
    let f2 = f * f;
    let f3 = f2 * f;
    [
        -0.5 * f3 + f2 - 0.5 * f,
        1.5 * f3 - 2.5 * f2 + 1.0,
        -1.5 * f3 + 2.0 * f2 + 0.5 * f,
        0.5 * f3 - 0.5 * f2,
    ]
}

/// [`ImageInterpolator`] bound to a typed voxel buffer.
#[derive(Debug)]
pub struct ImageSampler<'a, T: Scalar> {
    data: &'a [T],
    extent: Extent,
    components: usize,
    /// Element strides of the x, y and z axes.
    increments: [isize; 3],
    mode: InterpolationMode,
    border: BorderMode,
    bounds: [f64; 6],
}

impl<'a, T: Scalar> ImageSampler<'a, T> {
    pub fn new(volume: &'a Volume, mode: InterpolationMode, settings: &SamplerSettings) -> Result<Self> {
        let data = volume.as_slice::<T>()?;
        let extent = volume.extent();
        let components = volume.components();
        let [nx, ny, _] = extent.dims();
        let increments = [
            components as isize,
            (components * nx) as isize,
            (components * nx * ny) as isize,
        ];
        let tol = settings.tolerance;
        let mut bounds = [0.0; 6];
        for a in 0..3 {
            bounds[2 * a] = extent.min(a) as f64 - tol;
            bounds[2 * a + 1] = extent.max(a) as f64 + tol;
        }
        Ok(Self {
            data,
            extent,
            components,
            increments,
            mode,
            border: settings.border,
            bounds,
        })
    }

    #[inline]
    fn offset(&self, axis: usize, i: i32) -> isize {
        let lo = self.extent.min(axis);
        let hi = self.extent.max(axis);
        (map_border(i, lo, hi, self.border) - lo) as isize * self.increments[axis]
    }

    #[inline]
    fn fold(&self, axis: usize, x: f64) -> f64 {
        fold_position(x, self.extent.min(axis), self.extent.max(axis), self.border)
    }

    #[inline]
    fn taps(&self, axis: usize, x: f64, kernel: usize) -> Taps {
        let x = self.fold(axis, x);
        let mut taps = Taps {
            count: 1,
            offsets: [0; 4],
            weights: [1.0, 0.0, 0.0, 0.0],
        };
        match kernel {
            1 => {
                taps.offsets[0] = self.offset(axis, round_index(x));
            }
            2 => {
                let (i, f) = floor_frac(x);
                taps.count = 2;
                taps.offsets[0] = self.offset(axis, i);
                taps.offsets[1] = self.offset(axis, i + 1);
                taps.weights[0] = 1.0 - f;
                taps.weights[1] = f;
            }
            _ => {
                let (i, f) = floor_frac(x);
                taps.count = 4;
                for (k, o) in taps.offsets.iter_mut().enumerate() {
                    *o = self.offset(axis, i - 1 + k as i32);
                }
                taps.weights = cubic_weights(f);
            }
        }
        taps
    }

    #[inline]
    fn value(&self, offset: isize) -> f64 {
        self.data[offset as usize].to_f64()
    }

    /// Trilinear sample of one component.
    fn trilinear(&self, point: &[f64; 3], c: usize) -> f64 {
        let (x0, fx) = floor_frac(self.fold(0, point[0]));
        let (y0, fy) = floor_frac(self.fold(1, point[1]));
        let (z0, fz) = floor_frac(self.fold(2, point[2]));

        let ox0 = self.offset(0, x0);
        let ox1 = self.offset(0, x0 + 1);
        let oy0 = self.offset(1, y0);
        let oy1 = self.offset(1, y0 + 1);
        let oz0 = self.offset(2, z0);
        let oz1 = self.offset(2, z0 + 1);
        let c = c as isize;

        let v000 = self.value(oz0 + oy0 + ox0 + c);
        let v001 = self.value(oz0 + oy0 + ox1 + c);
        let v010 = self.value(oz0 + oy1 + ox0 + c);
        let v011 = self.value(oz0 + oy1 + ox1 + c);
        let v100 = self.value(oz1 + oy0 + ox0 + c);
        let v101 = self.value(oz1 + oy0 + ox1 + c);
        let v110 = self.value(oz1 + oy1 + ox0 + c);
        let v111 = self.value(oz1 + oy1 + ox1 + c);

        let one_fx = 1.0 - fx;
        let one_fy = 1.0 - fy;
        let one_fz = 1.0 - fz;

        v000 * one_fx * one_fy * one_fz
            + v001 * fx * one_fy * one_fz
            + v010 * one_fx * fy * one_fz
            + v011 * fx * fy * one_fz
            + v100 * one_fx * one_fy * fz
            + v101 * fx * one_fy * fz
            + v110 * one_fx * fy * fz
            + v111 * fx * fy * fz
    }

    /// Separable weighted sum, z outermost.
    #[inline]
    fn separable(&self, tx: &Taps, ty: &Taps, tz: &Taps, c: usize) -> f64 {
        let c = c as isize;
        let mut val = 0.0;
        for k in 0..tz.count {
            let mut vy = 0.0;
            for j in 0..ty.count {
                let base = tz.offsets[k] + ty.offsets[j] + c;
                let mut vx = 0.0;
                for i in 0..tx.count {
                    vx += tx.weights[i] * self.value(base + tx.offsets[i]);
                }
                vy += ty.weights[j] * vx;
            }
            val += tz.weights[k] * vy;
        }
        val
    }
}

impl<T: Scalar> Sampler for ImageSampler<'_, T> {
    fn components(&self) -> usize {
        self.components
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn border_mode(&self) -> BorderMode {
        self.border
    }

    fn interpolation_mode(&self) -> InterpolationMode {
        self.mode
    }

    #[inline]
    fn check_bounds_ijk(&self, point: &[f64; 3]) -> bool {
        point[0] >= self.bounds[0]
            && point[0] <= self.bounds[1]
            && point[1] >= self.bounds[2]
            && point[1] <= self.bounds[3]
            && point[2] >= self.bounds[4]
            && point[2] <= self.bounds[5]
    }

    fn interpolate_ijk(&self, point: &[f64; 3], out: &mut [f64]) {
        match self.mode {
            InterpolationMode::Nearest => {
                let base = self.offset(0, round_index(self.fold(0, point[0])))
                    + self.offset(1, round_index(self.fold(1, point[1])))
                    + self.offset(2, round_index(self.fold(2, point[2])));
                for (c, o) in out.iter_mut().take(self.components).enumerate() {
                    *o = self.value(base + c as isize);
                }
            }
            InterpolationMode::Linear => {
                for (c, o) in out.iter_mut().take(self.components).enumerate() {
                    *o = self.trilinear(point, c);
                }
            }
            InterpolationMode::Cubic => {
                let tx = self.taps(0, point[0], 4);
                let ty = self.taps(1, point[1], 4);
                let tz = self.taps(2, point[2], 4);
                for (c, o) in out.iter_mut().take(self.components).enumerate() {
                    *o = self.separable(&tx, &ty, &tz, c);
                }
            }
        }
    }

    fn precompute_weights(&self, matrix: &Matrix4<f64>, out_ext: &Extent) -> (InterpolationWeights, Extent) {
        let support = support_size(self.mode, Some(matrix));
        let mut kernel_size = [1; 3];
        let mut positions: [Vec<isize>; 3] = Default::default();
        let mut weights: [Vec<f64>; 3] = Default::default();
        let mut clip = *out_ext;

        for j in 0..3 {
            let k = (0..3).find(|&k| matrix[(k, j)] != 0.0).unwrap_or(j);
            let kernel = support[k];
            kernel_size[j] = kernel;
            let (lo, hi) = (self.bounds[2 * k], self.bounds[2 * k + 1]);

            let mut first = None;
            let mut last = None;
            for i in out_ext.min(j)..=out_ext.max(j) {
                let point = matrix[(k, j)] * i as f64 + matrix[(k, 3)];
                if point >= lo && point <= hi {
                    first.get_or_insert(i);
                    last = Some(i);
                }
                let taps = self.taps(k, point, kernel);
                for t in 0..kernel {
                    positions[j].push(taps.offsets[t]);
                    weights[j].push(taps.weights[t]);
                }
            }
            match (first, last) {
                (Some(f), Some(l)) => {
                    clip.0[2 * j] = f;
                    clip.0[2 * j + 1] = l;
                }
                _ => {
                    clip.0[2 * j] = out_ext.min(j);
                    clip.0[2 * j + 1] = out_ext.min(j) - 1;
                }
            }
        }

        (
            InterpolationWeights {
                extent: *out_ext,
                kernel_size,
                positions,
                weights,
            },
            clip,
        )
    }

    fn interpolate_row(&self, weights: &InterpolationWeights, index: [i32; 3], out: &mut [f64], n: usize) {
        let nc = self.components;
        let (pz, wz) = weights.taps(2, index[2]);
        let (py, wy) = weights.taps(1, index[1]);
        for i in 0..n {
            let (px, wx) = weights.taps(0, index[0] + i as i32);
            for c in 0..nc {
                let mut val = 0.0;
                for (oz, fz) in pz.iter().zip(wz) {
                    let mut vy = 0.0;
                    for (oy, fy) in py.iter().zip(wy) {
                        let base = oz + oy + c as isize;
                        let mut vx = 0.0;
                        for (ox, fx) in px.iter().zip(wx) {
                            vx += fx * self.value(base + ox);
                        }
                        vy += fy * vx;
                    }
                    val += fz * vy;
                }
                out[i * nc + c] = val;
            }
        }
    }
}
