//! Reslice transforms.
//!
//! A reslice transform maps reslice-axes coordinates to input physical
//! coordinates. Transforms that expose a homogeneous 4x4 matrix are folded
//! into the index matrix; anything else stays a residual that is applied to
//! every sample position.

use std::fmt::Debug;
use std::sync::Arc;

use nalgebra::{Matrix4, Vector4};

/// A point transform applied between the reslice axes and the input volume.
pub trait ResliceTransform: Send + Sync + Debug {
    /// Map one point.
    fn transform_point(&self, point: [f64; 3]) -> [f64; 3];

    /// Homogeneous matrix form, when the transform has one.
    fn homogeneous_matrix(&self) -> Option<Matrix4<f64>> {
        None
    }

    /// The inverse transform, used for auto-cropping the output bounds.
    fn inverse(&self) -> Option<Arc<dyn ResliceTransform>> {
        None
    }
}

/// Linear or projective transform given by a 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomogeneousTransform {
    pub matrix: Matrix4<f64>,
}

impl HomogeneousTransform {
    pub fn new(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }

    pub fn translation(t: [f64; 3]) -> Self {
        Self::new(Matrix4::new_translation(&t.into()))
    }

    pub fn scaling(s: [f64; 3]) -> Self {
        Self::new(Matrix4::new_nonuniform_scaling(&s.into()))
    }
}

impl ResliceTransform for HomogeneousTransform {
    fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let p = self.matrix * Vector4::new(point[0], point[1], point[2], 1.0);
        if p[3] != 1.0 {
            let f = 1.0 / p[3];
            [p[0] * f, p[1] * f, p[2] * f]
        } else {
            [p[0], p[1], p[2]]
        }
    }

    fn homogeneous_matrix(&self) -> Option<Matrix4<f64>> {
        Some(self.matrix)
    }

    fn inverse(&self) -> Option<Arc<dyn ResliceTransform>> {
        self.matrix
            .try_inverse()
            .map(|m| Arc::new(HomogeneousTransform::new(m)) as Arc<dyn ResliceTransform>)
    }
}

/// Non-linear transform given by a closure, with an optional inverse.
pub struct FnTransform {
    forward: Box<dyn Fn([f64; 3]) -> [f64; 3] + Send + Sync>,
    inverse: Option<Arc<dyn ResliceTransform>>,
}

impl FnTransform {
    pub fn new<F>(forward: F) -> Self
    where
        F: Fn([f64; 3]) -> [f64; 3] + Send + Sync + 'static,
    {
        Self {
            forward: Box::new(forward),
            inverse: None,
        }
    }

    pub fn with_inverse<F>(mut self, inverse: F) -> Self
    where
        F: Fn([f64; 3]) -> [f64; 3] + Send + Sync + 'static,
    {
        self.inverse = Some(Arc::new(FnTransform::new(inverse)));
        self
    }
}

impl Debug for FnTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("has_inverse", &self.inverse.is_some())
            .finish()
    }
}

impl ResliceTransform for FnTransform {
    fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        (self.forward)(point)
    }

    fn inverse(&self) -> Option<Arc<dyn ResliceTransform>> {
        self.inverse.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_homogeneous_translation_and_inverse() {
        let t = HomogeneousTransform::translation([1.0, -2.0, 3.0]);
        assert_eq!(t.transform_point([0.0, 0.0, 0.0]), [1.0, -2.0, 3.0]);
        let inv = t.inverse().unwrap();
        let p = inv.transform_point([1.0, -2.0, 3.0]);
        assert_relative_eq!(p[0], 0.0);
        assert_relative_eq!(p[1], 0.0);
        assert_relative_eq!(p[2], 0.0);
    }

    #[test]
    fn test_homogeneous_perspective_divide() {
        let mut m = Matrix4::identity();
        m[(3, 3)] = 2.0;
        let p = HomogeneousTransform::new(m).transform_point([2.0, 4.0, 6.0]);
        assert_eq!(p, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_fn_transform_has_no_matrix() {
        let t = FnTransform::new(|p| [p[0] * p[0], p[1], p[2]]).with_inverse(|p| [p[0].sqrt(), p[1], p[2]]);
        assert!(t.homogeneous_matrix().is_none());
        assert_eq!(t.transform_point([3.0, 1.0, 0.0]), [9.0, 1.0, 0.0]);
        assert_eq!(t.inverse().unwrap().transform_point([9.0, 1.0, 0.0]), [3.0, 1.0, 0.0]);
    }
}
