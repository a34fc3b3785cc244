//! Index matrix construction.
//!
//! The index matrix maps output voxel indices straight to continuous input
//! indices so that the executors never touch physical coordinates:
//!
//! ```text
//! index matrix = In · T · A · Out
//! ```
//!
//! where `Out` takes output indices to output physical coordinates, `A` is
//! the reslice-axes matrix, `T` the homogeneous reslice transform and `In`
//! takes input physical coordinates to input indices. When the reslice
//! transform has no matrix form it cannot be folded; the matrix then stops at
//! `A · Out` and the transform plus the `In` step are applied per sample.

use std::sync::{Arc, Mutex};

use nalgebra::{Matrix3, Matrix4, Vector3};
use tracing::{debug, warn};

use crate::extent::floor_frac;
use crate::transform::ResliceTransform;
use crate::volume::{Extent, Geometry};

/// Analytic physical-to-index step of the input volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalToIndex {
    pub origin: [f64; 3],
    /// Inverse direction with row `i` divided by `spacing[i]`.
    pub inverse: Matrix3<f64>,
}

impl PhysicalToIndex {
    pub fn new(geometry: &Geometry) -> Self {
        let mut inverse = invert_direction(&geometry.direction);
        for i in 0..3 {
            for j in 0..3 {
                inverse[(i, j)] /= geometry.spacing[i];
            }
        }
        Self {
            origin: geometry.origin,
            inverse,
        }
    }

    #[inline]
    pub fn apply(&self, point: &mut [f64; 3]) {
        let x = point[0] - self.origin[0];
        let y = point[1] - self.origin[1];
        let z = point[2] - self.origin[2];
        let m = &self.inverse;
        point[0] = m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)] * z;
        point[1] = m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)] * z;
        point[2] = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)] * z;
    }
}

/// Output-index to input-index map.
#[derive(Debug, Clone)]
pub enum IndexMatrix {
    /// Everything folded into one homogeneous matrix.
    Linear(Matrix4<f64>),
    /// Matrix up to the reslice axes, followed by a residual transform and
    /// the input's physical-to-index step.
    Residual {
        matrix: Matrix4<f64>,
        transform: Arc<dyn ResliceTransform>,
        to_index: PhysicalToIndex,
    },
}

impl IndexMatrix {
    pub fn matrix(&self) -> &Matrix4<f64> {
        match self {
            IndexMatrix::Linear(m) => m,
            IndexMatrix::Residual { matrix, .. } => matrix,
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, IndexMatrix::Linear(_))
    }

    /// Residual transform and input indexing, when not folded.
    pub fn residual(&self) -> Option<(&Arc<dyn ResliceTransform>, &PhysicalToIndex)> {
        match self {
            IndexMatrix::Linear(_) => None,
            IndexMatrix::Residual {
                transform,
                to_index,
                ..
            } => Some((transform, to_index)),
        }
    }

    /// True when the last row is not `(0, 0, 0, 1)`.
    pub fn has_perspective(&self) -> bool {
        let m = self.matrix();
        m[(3, 0)] != 0.0 || m[(3, 1)] != 0.0 || m[(3, 2)] != 0.0 || m[(3, 3)] != 1.0
    }

    pub fn is_identity(&self) -> bool {
        self.is_linear() && is_identity(self.matrix())
    }

    /// Map one output index through the matrix, with the homogeneous divide
    /// and any residual transform.
    pub fn map_index(&self, index: [f64; 3]) -> [f64; 3] {
        let m = self.matrix();
        let mut p = [0.0; 4];
        for (i, pi) in p.iter_mut().enumerate() {
            *pi = m[(i, 3)] + m[(i, 0)] * index[0] + m[(i, 1)] * index[1] + m[(i, 2)] * index[2];
        }
        if p[3] != 1.0 {
            let f = 1.0 / p[3];
            p[0] *= f;
            p[1] *= f;
            p[2] *= f;
        }
        let mut point = [p[0], p[1], p[2]];
        if let Some((transform, to_index)) = self.residual() {
            point = transform.transform_point(point);
            to_index.apply(&mut point);
        }
        point
    }
}

/// Invert a direction matrix, falling back to its transpose when singular.
pub fn invert_direction(direction: &Matrix3<f64>) -> Matrix3<f64> {
    match direction.try_inverse() {
        Some(inv) => inv,
        None => {
            warn!("singular direction matrix, using its transpose as inverse");
            direction.transpose()
        }
    }
}

pub fn is_identity(m: &Matrix4<f64>) -> bool {
    *m == Matrix4::identity()
}

pub fn is_identity3(m: &Matrix3<f64>) -> bool {
    *m == Matrix3::identity()
}

/// True for permutation + scale + translation matrices: affine last row and
/// exactly one non-zero coefficient in each of the first three columns.
pub fn is_permutation_matrix(m: &Matrix4<f64>) -> bool {
    if m[(3, 0)] != 0.0 || m[(3, 1)] != 0.0 || m[(3, 2)] != 0.0 || m[(3, 3)] != 1.0 {
        return false;
    }
    (0..3).all(|j| (0..3).filter(|&i| m[(i, j)] != 0.0).count() == 1)
}

/// True when a permutation matrix maps integer output indices over `out_ext`
/// onto integer input indices, so nearest neighbour gives the exact result.
///
/// A single-slice output axis contributes only through the translation, so
/// its coefficient is folded in before testing.
pub fn can_use_nearest_neighbor(m: &Matrix4<f64>, out_ext: &Extent) -> bool {
    for i in 0..3 {
        let Some(j) = (0..3).find(|&j| m[(i, j)] != 0.0) else {
            return false;
        };
        let mut x = m[(i, j)];
        let mut y = m[(i, 3)];
        if out_ext.min(j) == out_ext.max(j) {
            y += x * out_ext.min(j) as f64;
            x = 0.0;
        }
        if floor_frac(x).1 != 0.0 || floor_frac(y).1 != 0.0 {
            return false;
        }
    }
    true
}

/// Output index to output physical coordinates.
fn output_matrix(geometry: &Geometry) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    for i in 0..3 {
        for j in 0..3 {
            m[(i, j)] = geometry.direction[(i, j)] * geometry.spacing[j];
        }
        m[(i, 3)] = geometry.origin[i];
    }
    m
}

/// Input physical coordinates to input index.
fn input_matrix(geometry: &Geometry) -> Matrix4<f64> {
    let inv = invert_direction(&geometry.direction);
    let mut m = Matrix4::identity();
    for i in 0..3 {
        m[(i, 3)] = 0.0;
        for j in 0..3 {
            m[(i, j)] = inv[(i, j)] / geometry.spacing[i];
            m[(i, 3)] -= inv[(i, j)] * geometry.origin[j] / geometry.spacing[i];
        }
    }
    m
}

/// Build the index matrix from the input and output geometry, the reslice
/// axes and the reslice transform.
pub fn build_index_matrix(
    input: &Geometry,
    output: &Geometry,
    axes: Option<&Matrix4<f64>>,
    transform: Option<&Arc<dyn ResliceTransform>>,
) -> IndexMatrix {
    let mut concatenated = axes.copied().unwrap_or_else(Matrix4::identity);
    let mut residual = None;
    if let Some(t) = transform {
        match t.homogeneous_matrix() {
            Some(h) => concatenated = h * concatenated,
            None => residual = Some(t.clone()),
        }
    }

    let mut identity = is_identity(&concatenated);
    if residual.is_none() {
        identity = identity
            && input.direction == output.direction
            && input.spacing == output.spacing
            && input.origin == output.origin;
    } else {
        identity = identity
            && is_identity3(&output.direction)
            && output.spacing == [1.0; 3]
            && output.origin == [0.0; 3];
    }

    let matrix = if identity {
        debug!("index matrix is the identity");
        concatenated
    } else if residual.is_some() {
        concatenated * output_matrix(output)
    } else {
        input_matrix(input) * concatenated * output_matrix(output)
    };

    match residual {
        None => IndexMatrix::Linear(matrix),
        Some(transform) => IndexMatrix::Residual {
            matrix,
            transform,
            to_index: PhysicalToIndex::new(input),
        },
    }
}

/// Transforms are keyed by value when homogeneous. Residual transforms keep
/// their `Arc` alive in the key so identity comparison stays sound.
#[derive(Debug, Clone)]
enum TransformKey {
    Homogeneous(Matrix4<f64>),
    Residual(Arc<dyn ResliceTransform>),
}

impl TransformKey {
    fn new(transform: &Arc<dyn ResliceTransform>) -> Self {
        match transform.homogeneous_matrix() {
            Some(m) => TransformKey::Homogeneous(m),
            None => TransformKey::Residual(transform.clone()),
        }
    }
}

impl PartialEq for TransformKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TransformKey::Homogeneous(a), TransformKey::Homogeneous(b)) => a == b,
            (TransformKey::Residual(a), TransformKey::Residual(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    input: Geometry,
    output: Geometry,
    axes: Option<Matrix4<f64>>,
    transform: Option<TransformKey>,
}

/// Index matrix memo, rebuilt whenever a contributing parameter changes.
#[derive(Debug, Default)]
pub struct IndexMatrixCache {
    slot: Mutex<Option<(CacheKey, IndexMatrix)>>,
}

impl IndexMatrixCache {
    pub fn get_or_build(
        &self,
        input: &Geometry,
        output: &Geometry,
        axes: Option<&Matrix4<f64>>,
        transform: Option<&Arc<dyn ResliceTransform>>,
    ) -> IndexMatrix {
        let key = CacheKey {
            input: *input,
            output: *output,
            axes: axes.copied(),
            transform: transform.map(TransformKey::new),
        };
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((cached_key, matrix)) = slot.as_ref() {
            if *cached_key == key {
                return matrix.clone();
            }
        }
        let matrix = build_index_matrix(input, output, axes, transform);
        *slot = Some((key, matrix.clone()));
        matrix
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl Clone for IndexMatrixCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// Reslice-axes matrix from three axis direction vectors (the columns) and
/// an origin.
pub fn axes_matrix(x: [f64; 3], y: [f64; 3], z: [f64; 3], origin: [f64; 3]) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    for (j, axis) in [x, y, z, origin].iter().enumerate() {
        m.fixed_view_mut::<3, 1>(0, j).copy_from(&Vector3::from(*axis));
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{FnTransform, HomogeneousTransform};
    use approx::assert_relative_eq;

    fn geometry(spacing: [f64; 3], origin: [f64; 3]) -> Geometry {
        Geometry {
            spacing,
            origin,
            direction: Matrix3::identity(),
        }
    }

    #[test]
    fn test_identity_detected() {
        let g = geometry([0.5, 0.5, 2.0], [1.0, 2.0, 3.0]);
        let m = build_index_matrix(&g, &g, None, None);
        assert!(m.is_identity());
        assert!(!m.has_perspective());
    }

    #[test]
    fn test_spacing_and_origin_fold_into_matrix() {
        let input = geometry([2.0, 2.0, 2.0], [10.0, 0.0, 0.0]);
        let output = geometry([1.0, 1.0, 1.0], [0.0, 0.0, 0.0]);
        let m = build_index_matrix(&input, &output, None, None);
        assert!(!m.is_identity());
        // output index 14 -> physical 14 -> input index (14 - 10) / 2
        let p = m.map_index([14.0, 4.0, 0.0]);
        assert_relative_eq!(p[0], 2.0);
        assert_relative_eq!(p[1], 2.0);
        assert_relative_eq!(p[2], 0.0);
        assert!(is_permutation_matrix(m.matrix()));
    }

    #[test]
    fn test_axes_rotation_is_permutation() {
        let g = Geometry::default();
        let axes = axes_matrix([0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0; 3]);
        let m = build_index_matrix(&g, &g, Some(&axes), None);
        assert!(is_permutation_matrix(m.matrix()));
        assert_eq!(m.map_index([2.0, 1.0, 0.0]), [-1.0, 2.0, 0.0]);
        assert!(can_use_nearest_neighbor(m.matrix(), &Extent::new(0, 3, 0, 3, 0, 0)));
    }

    #[test]
    fn test_homogeneous_transform_is_folded() {
        let g = Geometry::default();
        let t: Arc<dyn ResliceTransform> = Arc::new(HomogeneousTransform::translation([0.5, 0.0, 0.0]));
        let m = build_index_matrix(&g, &g, None, Some(&t));
        assert!(m.is_linear());
        assert_eq!(m.map_index([1.0, 0.0, 0.0]), [1.5, 0.0, 0.0]);
        assert!(!can_use_nearest_neighbor(m.matrix(), &Extent::new(0, 3, 0, 3, 0, 3)));
    }

    #[test]
    fn test_residual_transform_kept_apart() {
        let input = geometry([2.0, 1.0, 1.0], [0.0; 3]);
        let output = Geometry::default();
        let t: Arc<dyn ResliceTransform> = Arc::new(FnTransform::new(|p| [p[0] + 4.0, p[1], p[2]]));
        let m = build_index_matrix(&input, &output, None, Some(&t));
        assert!(!m.is_linear());
        // output geometry is canonical, so the matrix stays the identity
        assert!(is_identity(m.matrix()));
        assert_eq!(m.map_index([2.0, 3.0, 0.0]), [3.0, 3.0, 0.0]);
    }

    #[test]
    fn test_permutation_rejects_shear_and_perspective() {
        let mut m = Matrix4::identity();
        m[(0, 1)] = 0.5;
        assert!(!is_permutation_matrix(&m));
        let mut m = Matrix4::identity();
        m[(3, 2)] = 0.1;
        assert!(!is_permutation_matrix(&m));
    }

    #[test]
    fn test_single_slice_axis_folds_into_translation() {
        let mut m = Matrix4::identity();
        m[(2, 2)] = 0.5;
        m[(2, 3)] = 1.0;
        assert!(can_use_nearest_neighbor(&m, &Extent::new(0, 3, 0, 3, 4, 4)));
        assert!(!can_use_nearest_neighbor(&m, &Extent::new(0, 3, 0, 3, 3, 3)));
        assert!(!can_use_nearest_neighbor(&m, &Extent::new(0, 3, 0, 3, 0, 3)));
    }

    #[test]
    fn test_cache_rebuilds_on_change() {
        let cache = IndexMatrixCache::default();
        let a = Geometry::default();
        let b = geometry([2.0, 1.0, 1.0], [0.0; 3]);
        assert!(cache.get_or_build(&a, &a, None, None).is_identity());
        assert!(!cache.get_or_build(&b, &a, None, None).is_identity());
        assert!(cache.get_or_build(&a, &a, None, None).is_identity());
    }

    #[test]
    fn test_cache_keys_transforms_by_value_and_identity() {
        let cache = IndexMatrixCache::default();
        let g = Geometry::default();

        for shift in [1.0, 3.0, 1.0] {
            // each transform is dropped before the next is built
            let t: Arc<dyn ResliceTransform> = Arc::new(HomogeneousTransform::translation([shift, 0.0, 0.0]));
            let m = cache.get_or_build(&g, &g, None, Some(&t));
            assert_eq!(m.map_index([0.0, 0.0, 0.0]), [shift, 0.0, 0.0]);
        }

        for shift in [2.0, 5.0] {
            let t: Arc<dyn ResliceTransform> = Arc::new(FnTransform::new(move |p| [p[0] + shift, p[1], p[2]]));
            let m = cache.get_or_build(&g, &g, None, Some(&t));
            assert_eq!(m.map_index([0.0, 0.0, 0.0]), [shift, 0.0, 0.0]);
            let again = cache.get_or_build(&g, &g, None, Some(&t.clone()));
            assert_eq!(again.map_index([1.0, 0.0, 0.0]), [1.0 + shift, 0.0, 0.0]);
        }
    }
}
