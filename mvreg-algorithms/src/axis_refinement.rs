//! Turntable axis estimation from registered view poses
//!
//! A view rotated by `R` about an axis with direction `n` through `p` satisfies
//! `(R - I) n = 0` and `(R - I) p = -t`. Stacking these rows for all views and
//! pinning the free component with one regularisation row gives two small
//! least-squares problems.

use log::debug;
use mvreg_core::{Error, Point3d, ReferenceAxis, Result, Transform3D, Vector3d};
use nalgebra::{DMatrix, DVector, Matrix3};

const SVD_EPSILON: f64 = 1e-12;

fn solve_least_squares(a: DMatrix<f64>, b: DVector<f64>) -> Result<Vector3d> {
    let solution = a
        .svd(true, true)
        .solve(&b, SVD_EPSILON)
        .map_err(|e| Error::Algorithm(format!("axis least squares failed: {}", e)))?;
    Ok(Vector3d::new(solution[0], solution[1], solution[2]))
}

fn stacked_rows(poses: &[Transform3D]) -> DMatrix<f64> {
    let mut a = DMatrix::<f64>::zeros(3 * poses.len() + 1, 3);
    for (i, pose) in poses.iter().enumerate() {
        let block = pose.rotation() - Matrix3::identity();
        a.view_mut((3 * i, 0), (3, 3)).copy_from(&block);
    }
    a
}

/// Direction shared by the rotations of `poses`, unit length
///
/// The regularisation row asks the components to sum to one, which fixes
/// the scale of the null-space solution.
pub fn estimate_axis_normal(poses: &[Transform3D]) -> Result<Vector3d> {
    if poses.is_empty() {
        return Err(Error::InvalidParameter("no poses to estimate an axis from".to_string()));
    }

    let mut a = stacked_rows(poses);
    let last = 3 * poses.len();
    a.row_mut(last).fill(1.0);
    let mut b = DVector::<f64>::zeros(last + 1);
    b[last] = 1.0;

    let normal = solve_least_squares(a, b)?;
    let norm = normal.norm();
    if norm == 0.0 || !norm.is_finite() {
        return Err(Error::Algorithm("estimated axis normal is degenerate".to_string()));
    }
    Ok(normal / norm)
}

/// A point on the rotation axis of `poses`, with its y coordinate pinned
/// to `pivot_y`
pub fn estimate_pivot(poses: &[Transform3D], pivot_y: f64) -> Result<Point3d> {
    if poses.is_empty() {
        return Err(Error::InvalidParameter("no poses to estimate a pivot from".to_string()));
    }

    let mut a = stacked_rows(poses);
    let last = 3 * poses.len();
    a[(last, 1)] = 1.0;
    let mut b = DVector::<f64>::zeros(last + 1);
    for (i, pose) in poses.iter().enumerate() {
        let t = pose.translation_vector();
        b.rows_mut(3 * i, 3).copy_from(&(-t));
    }
    b[last] = pivot_y;

    Ok(Point3d::from(solve_least_squares(a, b)?))
}

/// Refit `axis` to the registered view poses. The normal keeps its previous
/// orientation sign.
pub fn refine_axis(axis: &ReferenceAxis, poses: &[Transform3D]) -> Result<ReferenceAxis> {
    let normal = estimate_axis_normal(poses)?;
    let mut refined = *axis;
    refined.set_axis_normal(normal)?;

    let pivot = estimate_pivot(poses, axis.pivot_point().y)?;
    refined.set_pivot_point(pivot);

    debug!(
        "axis refined from {} views: pivot ({:.4}, {:.4}, {:.4}), normal ({:.4}, {:.4}, {:.4})",
        poses.len(),
        pivot.x,
        pivot.y,
        pivot.z,
        normal.x,
        normal.y,
        normal.z
    );
    for (i, pose) in poses.iter().enumerate() {
        debug!("view pose {}: rotation {:.3} deg", i + 1, pose.rotation_angle().to_degrees());
    }
    Ok(refined)
}
