//! Conversion of interpolated f64 rows into the output storage type.
//!
//! The conversion routine and the pixel setter are chosen once per execute
//! call and handed to the row loops as plain function pointers.

use crate::scalar::{Scalar, ScalarType};

/// Writes `src` (used as scratch) into `dst`.
pub type ConvertFn<U> = fn(&mut [f64], &mut [U]);

/// Fills `dst` with copies of the `pixel` tuple.
pub type SetPixelsFn<U> = fn(&mut [U], &[U]);

/// Whether converted values must be clamped to the output range.
///
/// Floating outputs are never clamped. Otherwise clamping is needed when
/// forced or when the rescaled input range does not fit the output range.
pub fn needs_clamping(input: ScalarType, output: ScalarType, shift: f64, scale: f64, force: bool) -> bool {
    if output.is_float() {
        return false;
    }
    if force {
        return true;
    }
    let mut check_min = (input.min_value() + shift) * scale;
    let mut check_max = (input.max_value() + shift) * scale;
    if check_min > check_max {
        std::mem::swap(&mut check_min, &mut check_max);
    }
    check_min < output.min_value() || check_max > output.max_value()
}

/// Pick the row conversion for output type `U`.
pub fn conversion_func<U: Scalar>(input: ScalarType, shift: f64, scale: f64, force_clamping: bool) -> ConvertFn<U> {
    if needs_clamping(input, U::TYPE, shift, scale, force_clamping) {
        U::clamp_row
    } else {
        U::convert_row
    }
}

/// Apply `(v + shift) * scale` in place.
pub fn rescale_scalars(values: &mut [f64], shift: f64, scale: f64) {
    for v in values.iter_mut() {
        *v = (*v + shift) * scale;
    }
}

fn set_pixels_1<U: Scalar>(dst: &mut [U], pixel: &[U]) {
    dst.fill(pixel[0]);
}

fn set_pixels_n<U: Scalar, const N: usize>(dst: &mut [U], pixel: &[U]) {
    let mut tuple = [U::default(); N];
    tuple.copy_from_slice(&pixel[..N]);
    for chunk in dst.chunks_exact_mut(N) {
        chunk.copy_from_slice(&tuple);
    }
}

fn set_pixels_any<U: Scalar>(dst: &mut [U], pixel: &[U]) {
    for chunk in dst.chunks_exact_mut(pixel.len()) {
        chunk.copy_from_slice(pixel);
    }
}

/// Pick the span fill routine for `components` components per pixel.
pub fn set_pixels_func<U: Scalar>(components: usize) -> SetPixelsFn<U> {
    match components {
        1 => set_pixels_1::<U>,
        2 => set_pixels_n::<U, 2>,
        3 => set_pixels_n::<U, 3>,
        4 => set_pixels_n::<U, 4>,
        _ => set_pixels_any::<U>,
    }
}
