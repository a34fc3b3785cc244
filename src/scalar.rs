//! Closed set of voxel storage types and the tagged dispatch over them.
//!
//! Every storage kind implements [`Scalar`], which carries the per-type
//! rounding and clamping rules. Runtime type tags ([`ScalarType`]) are mapped
//! back onto the generic code with [`with_scalar_type!`](crate::with_scalar_type),
//! which instantiates the body once per kind.
//!
//! Floating kinds (`f16`, `f32`, `f64`) are never clamped. Integer kinds are
//! rounded half up (`floor(x + 0.5)`) and saturated to their range on the
//! clamping path.

use std::fmt;

use half::f16;
use ndarray::Array4;

use crate::simd;

/// Runtime tag for a voxel storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
}

impl ScalarType {
    /// Every supported storage kind.
    pub const ALL: [ScalarType; 11] = [
        ScalarType::I8,
        ScalarType::U8,
        ScalarType::I16,
        ScalarType::U16,
        ScalarType::I32,
        ScalarType::U32,
        ScalarType::I64,
        ScalarType::U64,
        ScalarType::F16,
        ScalarType::F32,
        ScalarType::F64,
    ];

    /// Size of one scalar in bytes.
    pub fn size(self) -> usize {
        crate::with_scalar_type!(self, T => std::mem::size_of::<T>())
    }

    /// Smallest representable value, as f64.
    pub fn min_value(self) -> f64 {
        crate::with_scalar_type!(self, T => <T as Scalar>::MIN)
    }

    /// Largest representable value, as f64.
    pub fn max_value(self) -> f64 {
        crate::with_scalar_type!(self, T => <T as Scalar>::MAX)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F16 | ScalarType::F32 | ScalarType::F64)
    }

    /// numpy-style name of the type.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I8 => "int8",
            ScalarType::U8 => "uint8",
            ScalarType::I16 => "int16",
            ScalarType::U16 => "uint16",
            ScalarType::I32 => "int32",
            ScalarType::U32 => "uint32",
            ScalarType::I64 => "int64",
            ScalarType::U64 => "uint64",
            ScalarType::F16 => "float16",
            ScalarType::F32 => "float32",
            ScalarType::F64 => "float64",
        }
    }

    /// Parse a numpy-style type name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Instantiate `$body` with `$T` bound to the Rust type behind a [`ScalarType`].
///
/// ```
/// use volreslice::{with_scalar_type, ScalarType};
///
/// let bytes = with_scalar_type!(ScalarType::U16, T => std::mem::size_of::<T>());
/// assert_eq!(bytes, 2);
/// ```
#[macro_export]
macro_rules! with_scalar_type {
    ($kind:expr, $T:ident => $body:expr) => {{
        match $kind {
            $crate::scalar::ScalarType::I8 => {
                type $T = i8;
                $body
            }
            $crate::scalar::ScalarType::U8 => {
                type $T = u8;
                $body
            }
            $crate::scalar::ScalarType::I16 => {
                type $T = i16;
                $body
            }
            $crate::scalar::ScalarType::U16 => {
                type $T = u16;
                $body
            }
            $crate::scalar::ScalarType::I32 => {
                type $T = i32;
                $body
            }
            $crate::scalar::ScalarType::U32 => {
                type $T = u32;
                $body
            }
            $crate::scalar::ScalarType::I64 => {
                type $T = i64;
                $body
            }
            $crate::scalar::ScalarType::U64 => {
                type $T = u64;
                $body
            }
            $crate::scalar::ScalarType::F16 => {
                type $T = $crate::f16;
                $body
            }
            $crate::scalar::ScalarType::F32 => {
                type $T = f32;
                $body
            }
            $crate::scalar::ScalarType::F64 => {
                type $T = f64;
                $body
            }
        }
    }};
}

/// Voxel storage, tagged by kind. Arrays are indexed `(z, y, x, component)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarData {
    I8(Array4<i8>),
    U8(Array4<u8>),
    I16(Array4<i16>),
    U16(Array4<u16>),
    I32(Array4<i32>),
    U32(Array4<u32>),
    I64(Array4<i64>),
    U64(Array4<u64>),
    F16(Array4<f16>),
    F32(Array4<f32>),
    F64(Array4<f64>),
}

macro_rules! for_each_data {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ScalarData::I8($a) => $body,
            ScalarData::U8($a) => $body,
            ScalarData::I16($a) => $body,
            ScalarData::U16($a) => $body,
            ScalarData::I32($a) => $body,
            ScalarData::U32($a) => $body,
            ScalarData::I64($a) => $body,
            ScalarData::U64($a) => $body,
            ScalarData::F16($a) => $body,
            ScalarData::F32($a) => $body,
            ScalarData::F64($a) => $body,
        }
    };
}

impl ScalarData {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarData::I8(_) => ScalarType::I8,
            ScalarData::U8(_) => ScalarType::U8,
            ScalarData::I16(_) => ScalarType::I16,
            ScalarData::U16(_) => ScalarType::U16,
            ScalarData::I32(_) => ScalarType::I32,
            ScalarData::U32(_) => ScalarType::U32,
            ScalarData::I64(_) => ScalarType::I64,
            ScalarData::U64(_) => ScalarType::U64,
            ScalarData::F16(_) => ScalarType::F16,
            ScalarData::F32(_) => ScalarType::F32,
            ScalarData::F64(_) => ScalarType::F64,
        }
    }

    /// Array shape as `(z, y, x, component)`.
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        for_each_data!(self, a => a.dim())
    }

    /// Total number of scalars.
    pub fn len(&self) -> usize {
        for_each_data!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_standard_layout(&self) -> bool {
        for_each_data!(self, a => a.is_standard_layout())
    }

    /// Read one scalar widened to f64.
    pub fn get_f64(&self, index: [usize; 4]) -> Option<f64> {
        for_each_data!(self, a => a.get(index).map(|v| v.to_f64()))
    }
}

/// Trait implemented by every voxel storage type.
pub trait Scalar: Copy + Send + Sync + Default + PartialEq + fmt::Debug + 'static {
    const TYPE: ScalarType;
    /// Smallest representable value.
    const MIN: f64;
    /// Largest representable value.
    const MAX: f64;
    const IS_FLOAT: bool;

    fn to_f64(self) -> f64;

    /// Round (integers) or cast (floats) without range checks.
    fn round_from(v: f64) -> Self;

    /// Clamp to the representable range and round (integers), or cast (floats).
    fn clamp_from(v: f64) -> Self;

    /// Row form of [`Scalar::round_from`]. `src` is used as scratch.
    fn convert_row(src: &mut [f64], dst: &mut [Self]);

    /// Row form of [`Scalar::clamp_from`]. `src` is used as scratch.
    fn clamp_row(src: &mut [f64], dst: &mut [Self]);

    fn array(data: &ScalarData) -> Option<&Array4<Self>>;

    fn array_mut(data: &mut ScalarData) -> Option<&mut Array4<Self>>;

    fn into_data(array: Array4<Self>) -> ScalarData;

    /// Contiguous view of a buffer of this kind.
    fn slice(data: &ScalarData) -> Option<&[Self]> {
        Self::array(data).and_then(|a| a.as_slice())
    }
}

/// Round half up: `floor(x + 0.5)`.
#[inline]
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Clamp that resolves NaN to `lo`, matching the SIMD min/max kernels.
#[inline]
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    let x = if x > lo { x } else { lo };
    if x < hi {
        x
    } else {
        hi
    }
}

macro_rules! impl_integer_scalar {
    ($t:ty, $variant:ident) => {
        impl Scalar for $t {
            const TYPE: ScalarType = ScalarType::$variant;
            const MIN: f64 = <$t>::MIN as f64;
            const MAX: f64 = <$t>::MAX as f64;
            const IS_FLOAT: bool = false;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn round_from(v: f64) -> Self {
                round_half_up(v) as $t
            }

            #[inline]
            fn clamp_from(v: f64) -> Self {
                round_half_up(clamp(v, <Self as Scalar>::MIN, <Self as Scalar>::MAX)) as $t
            }

            fn convert_row(src: &mut [f64], dst: &mut [Self]) {
                simd::round_half_up_row(src);
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d = *s as $t;
                }
            }

            fn clamp_row(src: &mut [f64], dst: &mut [Self]) {
                simd::clamp_round_row(src, <Self as Scalar>::MIN, <Self as Scalar>::MAX);
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d = *s as $t;
                }
            }

            fn array(data: &ScalarData) -> Option<&Array4<Self>> {
                match data {
                    ScalarData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn array_mut(data: &mut ScalarData) -> Option<&mut Array4<Self>> {
                match data {
                    ScalarData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn into_data(array: Array4<Self>) -> ScalarData {
                ScalarData::$variant(array)
            }
        }
    };
}

impl_integer_scalar!(i8, I8);
impl_integer_scalar!(u8, U8);
impl_integer_scalar!(i16, I16);
impl_integer_scalar!(u16, U16);
impl_integer_scalar!(i32, I32);
impl_integer_scalar!(u32, U32);
impl_integer_scalar!(i64, I64);
impl_integer_scalar!(u64, U64);

impl Scalar for f32 {
    const TYPE: ScalarType = ScalarType::F32;
    const MIN: f64 = f32::MIN as f64;
    const MAX: f64 = f32::MAX as f64;
    const IS_FLOAT: bool = true;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn round_from(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn clamp_from(v: f64) -> Self {
        v as f32
    }

    fn convert_row(src: &mut [f64], dst: &mut [Self]) {
        simd::narrow_row_f32(src, dst);
    }

    fn clamp_row(src: &mut [f64], dst: &mut [Self]) {
        simd::narrow_row_f32(src, dst);
    }

    fn array(data: &ScalarData) -> Option<&Array4<Self>> {
        match data {
            ScalarData::F32(a) => Some(a),
            _ => None,
        }
    }

    fn array_mut(data: &mut ScalarData) -> Option<&mut Array4<Self>> {
        match data {
            ScalarData::F32(a) => Some(a),
            _ => None,
        }
    }

    fn into_data(array: Array4<Self>) -> ScalarData {
        ScalarData::F32(array)
    }
}

impl Scalar for f64 {
    const TYPE: ScalarType = ScalarType::F64;
    const MIN: f64 = f64::MIN;
    const MAX: f64 = f64::MAX;
    const IS_FLOAT: bool = true;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn round_from(v: f64) -> Self {
        v
    }

    #[inline]
    fn clamp_from(v: f64) -> Self {
        v
    }

    fn convert_row(src: &mut [f64], dst: &mut [Self]) {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }

    fn clamp_row(src: &mut [f64], dst: &mut [Self]) {
        Self::convert_row(src, dst);
    }

    fn array(data: &ScalarData) -> Option<&Array4<Self>> {
        match data {
            ScalarData::F64(a) => Some(a),
            _ => None,
        }
    }

    fn array_mut(data: &mut ScalarData) -> Option<&mut Array4<Self>> {
        match data {
            ScalarData::F64(a) => Some(a),
            _ => None,
        }
    }

    fn into_data(array: Array4<Self>) -> ScalarData {
        ScalarData::F64(array)
    }
}

impl Scalar for f16 {
    const TYPE: ScalarType = ScalarType::F16;
    const MIN: f64 = -65504.0;
    const MAX: f64 = 65504.0;
    const IS_FLOAT: bool = true;

    #[inline]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline]
    fn round_from(v: f64) -> Self {
        f16::from_f64(v)
    }

    #[inline]
    fn clamp_from(v: f64) -> Self {
        f16::from_f64(v)
    }

    fn convert_row(src: &mut [f64], dst: &mut [Self]) {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = f16::from_f64(*s);
        }
    }

    fn clamp_row(src: &mut [f64], dst: &mut [Self]) {
        Self::convert_row(src, dst);
    }

    fn array(data: &ScalarData) -> Option<&Array4<Self>> {
        match data {
            ScalarData::F16(a) => Some(a),
            _ => None,
        }
    }

    fn array_mut(data: &mut ScalarData) -> Option<&mut Array4<Self>> {
        match data {
            ScalarData::F16(a) => Some(a),
            _ => None,
        }
    }

    fn into_data(array: Array4<Self>) -> ScalarData {
        ScalarData::F16(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_rounding_is_half_up() {
        assert_eq!(u8::round_from(2.5), 3);
        assert_eq!(u8::round_from(2.49), 2);
        assert_eq!(i16::round_from(-2.5), -2);
        assert_eq!(i16::round_from(-2.51), -3);
    }

    #[test]
    fn test_clamp_saturates_and_handles_nan() {
        assert_eq!(u8::clamp_from(300.0), 255);
        assert_eq!(u8::clamp_from(-4.0), 0);
        assert_eq!(i8::clamp_from(f64::NAN), i8::MIN);
        assert_eq!(u16::clamp_from(65534.6), 65535);
        assert_eq!(u64::clamp_from(1e30), u64::MAX);
    }

    #[test]
    fn test_clamp_uses_storage_range_for_every_integer_kind() {
        fn check<T: Scalar>() {
            let mut src = vec![-1e20, T::MIN - 0.4, T::MAX + 0.4, 1e20];
            let mut dst = vec![T::default(); 4];
            T::clamp_row(&mut src, &mut dst);
            assert_eq!(dst[0].to_f64(), T::MIN, "{:?}", T::TYPE);
            assert_eq!(dst[3].to_f64(), T::MAX, "{:?}", T::TYPE);
            assert_eq!(T::clamp_from(-1e20).to_f64(), T::MIN);
            assert_eq!(T::clamp_from(1e20).to_f64(), T::MAX);
        }
        check::<i8>();
        check::<u8>();
        check::<i16>();
        check::<u16>();
        check::<i32>();
        check::<u32>();
        check::<i64>();
        check::<u64>();
    }

    #[test]
    fn test_floats_are_never_clamped() {
        assert_eq!(f32::clamp_from(1e10), 1e10f32);
        assert_eq!(f64::clamp_from(-1e300), -1e300);
        assert_eq!(f16::clamp_from(1.5), f16::from_f32(1.5));
    }

    #[test]
    fn test_row_conversion_matches_scalar_rule() {
        let values = [-3.5, -0.5, 0.49, 0.5, 1.5, 254.5, 255.4, 1000.0, 7.0];
        let mut src = values.to_vec();
        let mut clamped = [0u8; 9];
        u8::clamp_row(&mut src, &mut clamped);
        for (v, c) in values.iter().zip(clamped.iter()) {
            assert_eq!(*c, u8::clamp_from(*v), "value {v}");
        }

        let mut src = values.to_vec();
        let mut rounded = [0i32; 9];
        i32::convert_row(&mut src, &mut rounded);
        for (v, r) in values.iter().zip(rounded.iter()) {
            assert_eq!(*r, i32::round_from(*v), "value {v}");
        }
    }

    #[test]
    fn test_dispatch_macro_covers_every_kind() {
        for kind in ScalarType::ALL {
            let tag = with_scalar_type!(kind, T => <T as Scalar>::TYPE);
            assert_eq!(tag, kind);
            assert_eq!(ScalarType::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ScalarType::F16.size(), 2);
        assert_eq!(ScalarType::U8.max_value(), 255.0);
        assert_eq!(ScalarType::I16.min_value(), -32768.0);
    }
}
