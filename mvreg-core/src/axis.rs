//! Turntable reference axis
//!
//! The axis is stored as two points: the pivot and a "normal point" offset
//! from it along the axis direction. Edits move one of the two points so the
//! offset length survives interactive changes.

use crate::{Error, Point3d, Result, Transform3D, Vector3d};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Rotation axis of the turntable: a line through `pivot` along the normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAxis {
    pivot: Point3d,
    normal_point: Point3d,
}

impl ReferenceAxis {
    /// Axis through `pivot` along `normal`
    pub fn new(pivot: Point3d, normal: Vector3d) -> Result<Self> {
        let norm = normal.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "axis normal must be a finite non-zero vector, got {:?}",
                normal
            )));
        }
        Ok(Self {
            pivot,
            normal_point: pivot + normal / norm,
        })
    }

    /// Axis through the center of a bounding sphere, pointing down
    pub fn from_bounding_sphere(center: Point3d, radius: f64) -> Self {
        let length = if radius > 0.0 && radius.is_finite() { radius } else { 1.0 };
        Self {
            pivot: center,
            normal_point: center + Vector3::new(0.0, -length, 0.0),
        }
    }

    pub fn pivot_point(&self) -> Point3d {
        self.pivot
    }

    pub fn normal_point(&self) -> Point3d {
        self.normal_point
    }

    /// Unit direction of the axis
    pub fn axis_normal(&self) -> Vector3d {
        (self.normal_point - self.pivot).normalize()
    }

    /// Move the pivot, carrying the normal point along
    pub fn set_pivot_point(&mut self, pivot: Point3d) {
        let offset = self.normal_point - self.pivot;
        self.pivot = pivot;
        self.normal_point = pivot + offset;
    }

    /// Re-aim the axis while keeping the offset length.
    ///
    /// A normal pointing against the current one is treated as the same line:
    /// the stored direction keeps its previous sign.
    pub fn set_axis_normal(&mut self, normal: Vector3d) -> Result<()> {
        let norm = normal.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "axis normal must be a finite non-zero vector, got {:?}",
                normal
            )));
        }

        let old_offset = self.normal_point - self.pivot;
        let mut length = old_offset.norm();
        if length == 0.0 {
            length = 1.0;
        }
        if old_offset.dot(&normal) < 0.0 {
            length = -length;
        }

        self.normal_point = self.pivot + normal / norm * length;
        Ok(())
    }

    /// Rotation by `angle` radians about the axis line
    pub fn rotation_matrix(&self, angle: f64) -> Transform3D {
        Transform3D::rotation_about_axis(&self.pivot, &self.axis_normal(), angle)
    }

    /// Nominal turntable angle of `view` out of `view_count` views
    pub fn expected_angle(view: u32, view_count: u32) -> f64 {
        if view_count == 0 {
            return 0.0;
        }
        -2.0 * PI * f64::from(view) / f64::from(view_count)
    }

    /// Initial pose that brings `view` back into the reference view's frame
    pub fn expected_rotation(&self, view: u32, view_count: u32) -> Transform3D {
        if view == 0 || view_count == 0 {
            return Transform3D::identity();
        }
        self.rotation_matrix(Self::expected_angle(view, view_count))
    }

    /// Signed distance of `point` to the plane through the pivot orthogonal
    /// to the axis
    pub fn signed_distance(&self, point: &Point3d) -> f64 {
        self.axis_normal().dot(&(point - self.pivot))
    }

    /// Frame with the pivot at the origin and the axis along +z
    pub fn to_axis_frame(&self) -> Transform3D {
        let normal = self.axis_normal();
        let rotation = Rotation3::rotation_between(&normal, &Vector3::z())
            .unwrap_or_else(|| Rotation3::from_axis_angle(&Vector3::x_axis(), PI));
        Transform3D::translation(-self.pivot.coords).then(Transform3D::from(rotation.to_homogeneous()))
    }
}

impl Default for ReferenceAxis {
    fn default() -> Self {
        Self {
            pivot: Point3d::origin(),
            normal_point: Point3d::new(0.0, -1.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_default_axis_points_down() {
        let axis = ReferenceAxis::default();
        assert_eq!(axis.pivot_point(), Point3d::origin());
        assert_relative_eq!(axis.axis_normal(), Vector3d::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_set_pivot_keeps_normal_offset() {
        let mut axis = ReferenceAxis::from_bounding_sphere(Point3d::new(1.0, 1.0, 1.0), 3.0);
        axis.set_pivot_point(Point3d::new(5.0, 0.0, -2.0));

        assert_relative_eq!(axis.normal_point(), Point3d::new(5.0, -3.0, -2.0));
        assert_relative_eq!(axis.axis_normal(), Vector3d::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_set_axis_normal_keeps_length() {
        let mut axis = ReferenceAxis::from_bounding_sphere(Point3d::origin(), 2.0);
        axis.set_axis_normal(Vector3d::new(0.0, -1.0, 1.0)).unwrap();

        assert_relative_eq!((axis.normal_point() - axis.pivot_point()).norm(), 2.0, epsilon = 1e-12);
        let expected = Vector3d::new(0.0, -1.0, 1.0).normalize();
        assert_relative_eq!(axis.axis_normal(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_set_axis_normal_never_flips_within_ninety_degrees() {
        let mut axis = ReferenceAxis::default();
        let candidates = [
            Vector3d::new(0.0, -1.0, 0.0),
            Vector3d::new(0.3, -1.0, 0.2),
            Vector3d::new(0.5, -0.8, 0.6),
            Vector3d::new(0.2, -0.1, 1.0),
        ];

        for candidate in candidates {
            let previous = axis.axis_normal();
            assert!(previous.dot(&candidate) > 0.0);
            axis.set_axis_normal(candidate).unwrap();
            assert!(axis.axis_normal().dot(&previous) > 0.0);
            assert_relative_eq!(axis.axis_normal(), candidate.normalize(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_opposite_normal_keeps_previous_sign() {
        let mut axis = ReferenceAxis::default();
        axis.set_axis_normal(Vector3d::new(0.0, 1.0, 0.0)).unwrap();
        assert_relative_eq!(axis.axis_normal(), Vector3d::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_zero_normal_is_rejected() {
        let mut axis = ReferenceAxis::default();
        assert!(axis.set_axis_normal(Vector3d::zeros()).is_err());
        assert!(ReferenceAxis::new(Point3d::origin(), Vector3d::zeros()).is_err());
    }

    #[test]
    fn test_expected_rotation() {
        assert_relative_eq!(ReferenceAxis::expected_angle(1, 4), -FRAC_PI_2);
        let axis = ReferenceAxis::new(Point3d::new(1.0, 0.0, 0.0), Vector3d::y()).unwrap();

        assert!(axis.expected_rotation(0, 4).is_identity());
        let rotation = axis.expected_rotation(1, 4);
        let moved = rotation.transform_point(&Point3d::new(2.0, 0.0, 0.0));
        assert_relative_eq!(moved, Point3d::new(1.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_axis_frame_maps_normal_to_z() {
        let axis = ReferenceAxis::new(Point3d::new(1.0, 2.0, 3.0), Vector3d::new(1.0, 0.0, 0.0)).unwrap();
        let frame = axis.to_axis_frame();

        assert_relative_eq!(frame.transform_point(&axis.pivot_point()), Point3d::origin(), epsilon = 1e-12);
        assert_relative_eq!(frame.transform_vector(&axis.axis_normal()), Vector3d::z(), epsilon = 1e-12);
        assert_relative_eq!(axis.signed_distance(&Point3d::new(3.0, 0.0, 0.0)), 2.0, epsilon = 1e-12);
    }
}
