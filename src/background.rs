//! Background pixels for output regions that receive no sample.

use crate::convert::set_pixels_func;
use crate::scalar::Scalar;

/// Background tuple of `components` values in the output type.
///
/// The first four components come from `color` (clamped to the output
/// range); any further components are zero.
pub fn background_pixel<U: Scalar>(color: [f64; 4], components: usize) -> Vec<U> {
    let mut pixel = vec![U::default(); components];
    for (p, c) in pixel.iter_mut().zip(color.iter()) {
        *p = U::clamp_from(*c);
    }
    pixel
}

/// Fill a whole output chunk with the background tuple.
pub fn clear_execute<U: Scalar>(out: &mut [U], pixel: &[U]) {
    let set_pixels = set_pixels_func::<U>(pixel.len());
    set_pixels(out, pixel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_pixel_clamps_and_pads() {
        let pixel: Vec<u8> = background_pixel([300.0, -5.0, 12.5, 1.0], 6);
        assert_eq!(pixel, vec![255, 0, 13, 1, 0, 0]);
        let pixel: Vec<f32> = background_pixel([1e10, 0.5, 0.0, 0.0], 2);
        assert_eq!(pixel, vec![1e10, 0.5]);
    }

    #[test]
    fn test_clear_execute_fills_every_tuple() {
        let pixel: Vec<i16> = background_pixel([-7.0, 3.0, 0.0, 0.0], 2);
        let mut out = vec![0i16; 10];
        clear_execute(&mut out, &pixel);
        assert!(out.chunks(2).all(|p| p == [-7, 3]));
    }
}
