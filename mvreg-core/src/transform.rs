//! Rigid 3D transformations
//!
//! Matrices use the column-vector convention: a point `p` maps to `M * p` and
//! the translation lives in the last column.

use nalgebra::{Isometry3, Matrix3, Matrix4, Point3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid transformation (rotation + translation) stored as a 4x4 matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f64>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3<f64>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Rotation by `angle` radians about the line through `pivot` along `axis`
    ///
    /// Equivalent to translating the pivot to the origin, rotating about
    /// `axis`, then translating back.
    pub fn rotation_about_axis(pivot: &Point3<f64>, axis: &Vector3<f64>, angle: f64) -> Self {
        let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(*axis), angle);
        let matrix = Matrix4::new_translation(&pivot.coords)
            * rotation.to_homogeneous()
            * Matrix4::new_translation(&(-pivot.coords));
        Self { matrix }
    }

    /// Build from a row-major array, `rows[i][j]` being row `i`, column `j`
    pub fn from_rows(rows: &[[f64; 4]; 4]) -> Self {
        Self {
            matrix: Matrix4::from_fn(|i, j| rows[i][j]),
        }
    }

    /// Row-major copy of the matrix
    pub fn rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = self.matrix[(i, j)];
            }
        }
        rows
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation() * point.coords + self.translation_vector())
    }

    /// Apply only the rotation part, for directions such as normals
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * vector
    }

    /// Upper-left 3x3 block
    pub fn rotation(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Translation column
    pub fn translation_vector(&self) -> Vector3<f64> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// `self * other`: applies `other` first, then `self`
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Applies `self` first, then `next`
    pub fn then(self, next: Self) -> Self {
        next.compose(self)
    }

    /// Inverse of a rigid transformation
    pub fn inverse(self) -> Self {
        let rotation_t = self.rotation().transpose();
        let translation = -(rotation_t * self.translation_vector());
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation_t);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self { matrix }
    }

    /// Exact comparison against the identity matrix
    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix4::identity()
    }

    /// Rotation angle in radians, recovered from the trace
    pub fn rotation_angle(&self) -> f64 {
        let cos = (self.rotation().trace() - 1.0) * 0.5;
        cos.clamp(-1.0, 1.0).acos()
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Matrix4<f64>> for Transform3D {
    fn from(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }
}

impl From<Isometry3<f64>> for Transform3D {
    fn from(isometry: Isometry3<f64>) -> Self {
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_rotation_about_axis_keeps_pivot_fixed() {
        let pivot = Point3::new(1.0, 2.0, 3.0);
        let transform = Transform3D::rotation_about_axis(&pivot, &Vector3::y(), 0.7);

        assert_relative_eq!(transform.transform_point(&pivot), pivot, epsilon = 1e-12);
        let on_axis = pivot + Vector3::new(0.0, 5.0, 0.0);
        assert_relative_eq!(transform.transform_point(&on_axis), on_axis, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_about_offset_axis() {
        let pivot = Point3::new(1.0, 0.0, 0.0);
        let transform = Transform3D::rotation_about_axis(&pivot, &Vector3::z(), FRAC_PI_2);

        let moved = transform.transform_point(&Point3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(moved, Point3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(transform.rotation_angle(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_then_applies_in_order() {
        let shift = Transform3D::translation(Vector3::new(1.0, 0.0, 0.0));
        let turn = Transform3D::rotation_about_axis(&Point3::origin(), &Vector3::z(), FRAC_PI_2);

        let combined = shift.then(turn);
        let moved = combined.transform_point(&Point3::origin());
        assert_relative_eq!(moved, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        assert_eq!(combined, turn * shift);
    }

    #[test]
    fn test_rigid_inverse() {
        let transform = Transform3D::rotation_about_axis(&Point3::new(0.5, -1.0, 2.0), &Vector3::new(1.0, 1.0, 0.0), 1.1);
        let round_trip = transform.then(transform.inverse());
        assert_relative_eq!(round_trip.matrix, Matrix4::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_rows_round_trip() {
        let transform = Transform3D::rotation_about_axis(&Point3::new(3.0, 1.0, 0.0), &Vector3::x(), 0.3);
        assert_eq!(Transform3D::from_rows(&transform.rows()), transform);
        assert_eq!(transform.rows()[0][3], transform.matrix[(0, 3)]);
    }

    #[test]
    fn test_identity_is_exact() {
        assert!(Transform3D::identity().is_identity());
        let nearly = Transform3D::translation(Vector3::new(1e-15, 0.0, 0.0));
        assert!(!nearly.is_identity());
    }
}
