//! Regular sampled volumes and their geometry.
//!
//! A [`Volume`] is a lattice of voxels over an inclusive integer [`Extent`],
//! placed in physical space by per-axis spacing, an origin (physical position
//! of index `(0, 0, 0)`) and a 3x3 direction-cosine matrix whose columns are
//! the index axes:
//!
//! ```text
//! physical = origin + direction * (spacing ∘ index)
//! ```
//!
//! Voxels are stored as an ndarray `Array4` indexed `(z, y, x, component)`,
//! so x is the fastest-varying axis.

use nalgebra::Matrix3;
use ndarray::{Array3, Array4, ArrayView4, Axis};

use crate::error::{ResliceError, Result};
use crate::scalar::{Scalar, ScalarData, ScalarType};

/// Inclusive index range `[x0, x1, y0, y1, z0, z1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent(pub [i32; 6]);

impl Extent {
    #[inline]
    pub fn new(x0: i32, x1: i32, y0: i32, y1: i32, z0: i32, z1: i32) -> Self {
        Self([x0, x1, y0, y1, z0, z1])
    }

    /// Extent starting at the origin with the given number of samples per axis.
    pub fn from_dims(nx: usize, ny: usize, nz: usize) -> Self {
        Self([0, nx as i32 - 1, 0, ny as i32 - 1, 0, nz as i32 - 1])
    }

    #[inline]
    pub fn min(&self, axis: usize) -> i32 {
        self.0[2 * axis]
    }

    #[inline]
    pub fn max(&self, axis: usize) -> i32 {
        self.0[2 * axis + 1]
    }

    /// Number of samples along an axis (0 when inverted).
    #[inline]
    pub fn len(&self, axis: usize) -> usize {
        (self.max(axis) - self.min(axis) + 1).max(0) as usize
    }

    /// Samples per axis as `[nx, ny, nz]`.
    pub fn dims(&self) -> [usize; 3] {
        [self.len(0), self.len(1), self.len(2)]
    }

    pub fn num_voxels(&self) -> usize {
        self.len(0) * self.len(1) * self.len(2)
    }

    /// True when any axis range is inverted.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| self.max(a) < self.min(a))
    }

    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= self.0[0]
            && x <= self.0[1]
            && y >= self.0[2]
            && y <= self.0[3]
            && z >= self.0[4]
            && z <= self.0[5]
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains_extent(&self, other: &Extent) -> bool {
        (0..3).all(|a| other.min(a) >= self.min(a) && other.max(a) <= self.max(a))
    }
}

/// Spacing, origin and direction of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub direction: Matrix3<f64>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: Matrix3::identity(),
        }
    }
}

impl Geometry {
    /// Physical position of a continuous index.
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let mut p = [0.0; 3];
        for (i, pi) in p.iter_mut().enumerate() {
            *pi = self.origin[i]
                + (0..3)
                    .map(|j| self.direction[(i, j)] * self.spacing[j] * index[j])
                    .sum::<f64>();
        }
        p
    }
}

/// Metadata of a volume without its voxels, for extent requests made before
/// the data exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeInfo {
    pub extent: Extent,
    pub geometry: Geometry,
    pub scalar_type: ScalarType,
    pub components: usize,
}

/// A sampled volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    extent: Extent,
    geometry: Geometry,
    components: usize,
    data: ScalarData,
}

impl Volume {
    /// Wrap a flat buffer laid out x-fastest, components interleaved.
    pub fn new<T: Scalar>(extent: Extent, components: usize, data: Vec<T>) -> Result<Self> {
        if components == 0 {
            return Err(ResliceError::InvalidComponents(components));
        }
        let [nx, ny, nz] = extent.dims();
        let expected = nx * ny * nz * components;
        if data.len() != expected {
            return Err(ResliceError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let array = Array4::from_shape_vec((nz, ny, nx, components), data).map_err(|_| {
            ResliceError::SizeMismatch {
                expected,
                actual: 0,
            }
        })?;
        Ok(Self {
            extent,
            geometry: Geometry::default(),
            components,
            data: T::into_data(array),
        })
    }

    /// Wrap an `(z, y, x, component)` array; the extent starts at the origin.
    pub fn from_array4<T: Scalar>(array: Array4<T>) -> Result<Self> {
        let (nz, ny, nx, nc) = array.dim();
        if nc == 0 {
            return Err(ResliceError::InvalidComponents(nc));
        }
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        Ok(Self {
            extent: Extent::from_dims(nx, ny, nz),
            geometry: Geometry::default(),
            components: nc,
            data: T::into_data(array),
        })
    }

    /// Single-component volume from a `(z, y, x)` array.
    pub fn from_array3<T: Scalar>(array: Array3<T>) -> Self {
        let (nz, ny, nx) = array.dim();
        let array = array
            .insert_axis(Axis(3))
            .as_standard_layout()
            .into_owned();
        Self {
            extent: Extent::from_dims(nx, ny, nz),
            geometry: Geometry::default(),
            components: 1,
            data: T::into_data(array),
        }
    }

    /// Volume filled by a function of `(x, y, z, component)` indices.
    pub fn from_fn<T: Scalar, F>(extent: Extent, components: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(i32, i32, i32, usize) -> T,
    {
        let mut data = Vec::with_capacity(extent.num_voxels() * components);
        for z in extent.min(2)..=extent.max(2) {
            for y in extent.min(1)..=extent.max(1) {
                for x in extent.min(0)..=extent.max(0) {
                    for c in 0..components {
                        data.push(f(x, y, z, c));
                    }
                }
            }
        }
        Self::new(extent, components, data)
    }

    /// Zero-filled volume of the given kind.
    pub fn zeros(scalar_type: ScalarType, extent: Extent, components: usize) -> Result<Self> {
        crate::with_scalar_type!(scalar_type, T => {
            Self::new::<T>(extent, components, vec![T::default(); extent.num_voxels() * components])
        })
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.geometry.spacing = spacing;
        self
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.geometry.origin = origin;
        self
    }

    pub fn with_direction(mut self, direction: Matrix3<f64>) -> Self {
        self.geometry.direction = direction;
        self
    }

    /// Move the extent so that it starts at `start` (sizes unchanged).
    pub fn with_extent_start(mut self, start: [i32; 3]) -> Self {
        for (a, s) in start.iter().enumerate() {
            let len = self.extent.len(a) as i32;
            self.extent.0[2 * a] = *s;
            self.extent.0[2 * a + 1] = *s + len - 1;
        }
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.geometry.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.geometry.origin
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.geometry.direction
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.data.scalar_type()
    }

    pub fn data(&self) -> &ScalarData {
        &self.data
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            extent: self.extent,
            geometry: self.geometry,
            scalar_type: self.scalar_type(),
            components: self.components,
        }
    }

    /// Typed `(z, y, x, component)` view.
    pub fn array<T: Scalar>(&self) -> Result<ArrayView4<'_, T>> {
        T::array(&self.data)
            .map(|a| a.view())
            .ok_or(ResliceError::ScalarTypeMismatch {
                expected: T::TYPE,
                actual: self.scalar_type(),
            })
    }

    /// Typed flat view, x-fastest with interleaved components.
    pub fn as_slice<T: Scalar>(&self) -> Result<&[T]> {
        let array = T::array(&self.data).ok_or(ResliceError::ScalarTypeMismatch {
            expected: T::TYPE,
            actual: self.scalar_type(),
        })?;
        array.as_slice().ok_or(ResliceError::NonContiguous)
    }

    /// Offset of the first component of voxel `(x, y, z)` in the flat buffer.
    #[inline]
    pub fn offset(&self, x: i32, y: i32, z: i32) -> usize {
        let [nx, ny, _] = self.extent.dims();
        let ix = (x - self.extent.min(0)) as usize;
        let iy = (y - self.extent.min(1)) as usize;
        let iz = (z - self.extent.min(2)) as usize;
        ((iz * ny + iy) * nx + ix) * self.components
    }

    /// Typed read of one scalar; `None` outside the extent or on a kind mismatch.
    pub fn get<T: Scalar>(&self, x: i32, y: i32, z: i32, c: usize) -> Option<T> {
        if !self.extent.contains(x, y, z) || c >= self.components {
            return None;
        }
        self.as_slice::<T>().ok().map(|s| s[self.offset(x, y, z) + c])
    }

    /// Read one scalar widened to f64.
    pub fn get_f64(&self, x: i32, y: i32, z: i32, c: usize) -> Option<f64> {
        if !self.extent.contains(x, y, z) {
            return None;
        }
        let index = [
            (z - self.extent.min(2)) as usize,
            (y - self.extent.min(1)) as usize,
            (x - self.extent.min(0)) as usize,
            c,
        ];
        self.data.get_f64(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_queries() {
        let e = Extent::new(-2, 5, 0, 0, 3, 4);
        assert_eq!(e.dims(), [8, 1, 2]);
        assert_eq!(e.num_voxels(), 16);
        assert!(!e.is_empty());
        assert!(e.contains(-2, 0, 4));
        assert!(!e.contains(6, 0, 4));
        assert!(Extent::new(0, -1, 0, 0, 0, 0).is_empty());
        assert_eq!(Extent::new(0, -1, 0, 0, 0, 0).len(0), 0);
    }

    #[test]
    fn test_volume_rejects_wrong_length() {
        let err = Volume::new::<u8>(Extent::from_dims(2, 2, 1), 1, vec![0; 3]).unwrap_err();
        assert_eq!(
            err,
            ResliceError::SizeMismatch {
                expected: 4,
                actual: 3
            }
        );
        let err = Volume::new::<u8>(Extent::from_dims(2, 2, 1), 0, vec![]).unwrap_err();
        assert_eq!(err, ResliceError::InvalidComponents(0));
    }

    #[test]
    fn test_volume_indexing_with_offset_extent() {
        let extent = Extent::new(10, 12, 5, 6, -1, -1);
        let vol = Volume::from_fn(extent, 2, |x, y, _z, c| (x * 10 + y) as i16 * if c == 0 { 1 } else { -1 })
            .unwrap();
        assert_eq!(vol.get::<i16>(11, 6, -1, 0), Some(116));
        assert_eq!(vol.get::<i16>(11, 6, -1, 1), Some(-116));
        assert_eq!(vol.get::<i16>(13, 6, -1, 0), None);
        assert_eq!(vol.get::<u8>(11, 6, -1, 0), None);
        assert_eq!(vol.get_f64(12, 5, -1, 0), Some(125.0));
        assert_eq!(vol.array::<i16>().unwrap().dim(), (1, 2, 3, 2));
    }

    #[test]
    fn test_from_array3_layout() {
        let array = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as u16);
        let vol = Volume::from_array3(array);
        assert_eq!(vol.extent(), Extent::new(0, 3, 0, 2, 0, 1));
        assert_eq!(vol.get::<u16>(3, 2, 1, 0), Some(123));
    }

    #[test]
    fn test_geometry_index_to_physical() {
        let g = Geometry {
            spacing: [2.0, 3.0, 1.0],
            origin: [1.0, 0.0, -1.0],
            direction: Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
        };
        let p = g.index_to_physical([1.0, 1.0, 1.0]);
        assert_eq!(p, [1.0 - 3.0, 2.0, 0.0]);
    }
}
