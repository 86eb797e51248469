//! Point-to-point ICP registration

use crate::correspondence::{mean_squared_distance, Correspondence, CorrespondenceEstimator};
use log::{debug, warn};
use mvreg_core::{Error, Matrix3, Matrix4, Point3d, Result, Transform3D, Vector3d};

/// Fewest correspondences an iteration can estimate a transform from
const MIN_CORRESPONDENCES: usize = 3;
/// Cosine of the rotation angle above which an increment counts as no rotation
const ROTATION_THRESHOLD: f64 = 0.99999;
/// Relative change of the correspondence MSE treated as converged
const RELATIVE_MSE_THRESHOLD: f64 = 1e-5;

/// Stopping parameters of [`icp`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpParams {
    pub max_iterations: usize,
    /// Pairs further apart than this are not used
    pub max_correspondence_distance: f64,
    /// Squared translation of an increment below which it counts as no motion
    pub transformation_epsilon: f64,
    /// Absolute change of the correspondence MSE treated as converged
    pub euclidean_fitness_epsilon: f64,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_correspondence_distance: 4.0,
            transformation_epsilon: 1e-6,
            euclidean_fitness_epsilon: 64.0,
        }
    }
}

impl IcpParams {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_correspondence_distance(mut self, distance: f64) -> Self {
        self.max_correspondence_distance = distance;
        self
    }

    pub fn with_transformation_epsilon(mut self, epsilon: f64) -> Self {
        self.transformation_epsilon = epsilon;
        self
    }

    pub fn with_euclidean_fitness_epsilon(mut self, epsilon: f64) -> Self {
        self.euclidean_fitness_epsilon = epsilon;
        self
    }
}

/// Result of ICP registration
#[derive(Debug, Clone)]
pub struct ICPResult {
    /// Transform taking the source onto the target, initial guess included
    pub transformation: Transform3D,
    /// Mean squared correspondence distance of the last iteration
    pub mse: f64,
    /// Number of increments applied
    pub iterations: usize,
    /// Whether a convergence criterion stopped the loop
    pub converged: bool,
    /// Correspondences found in the last iteration
    pub correspondences: Vec<Correspondence>,
}

/// Compute the optimal transformation using SVD
fn compute_transformation(source_points: &[Point3d], target_points: &[Point3d]) -> Result<Transform3D> {
    if source_points.len() != target_points.len() || source_points.is_empty() {
        return Err(Error::InvalidData("Point correspondence mismatch".to_string()));
    }

    let n = source_points.len() as f64;

    let source_centroid = source_points.iter().fold(Vector3d::zeros(), |acc, p| acc + p.coords) / n;
    let target_centroid = target_points.iter().fold(Vector3d::zeros(), |acc, p| acc + p.coords) / n;

    // Cross-covariance H
    let mut h = Matrix3::zeros();
    for (src, tgt) in source_points.iter().zip(target_points.iter()) {
        let p = src.coords - source_centroid;
        let q = tgt.coords - target_centroid;
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| Error::Algorithm("SVD U matrix not available".to_string()))?;
    let v_t = svd.v_t.ok_or_else(|| Error::Algorithm("SVD V^T matrix not available".to_string()))?;

    let mut r = v_t.transpose() * u.transpose();

    // Ensure proper rotation (det(R) = 1)
    if r.determinant() < 0.0 {
        let mut v_t_corrected = v_t;
        v_t_corrected.set_row(2, &(-v_t.row(2)));
        r = v_t_corrected.transpose() * u.transpose();
    }

    let translation = target_centroid - r * source_centroid;

    let mut matrix = Matrix4::identity();
    matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    Ok(Transform3D::from(matrix))
}

/// Why the ICP loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convergence {
    Iterations,
    Transform,
    AbsoluteMse,
    RelativeMse,
}

struct ConvergenceCriteria {
    params: IcpParams,
    previous_mse: f64,
}

impl ConvergenceCriteria {
    fn new(params: IcpParams) -> Self {
        Self {
            params,
            previous_mse: f64::MAX,
        }
    }

    fn check(&mut self, iterations: usize, increment: &Transform3D, mse: f64) -> Option<Convergence> {
        if iterations >= self.params.max_iterations {
            return Some(Convergence::Iterations);
        }

        let cos_angle = 0.5 * (increment.rotation().trace() - 1.0);
        let translation_sqr = increment.translation_vector().norm_squared();
        if cos_angle >= ROTATION_THRESHOLD && translation_sqr <= self.params.transformation_epsilon {
            return Some(Convergence::Transform);
        }

        let change = (mse - self.previous_mse).abs();
        if change < self.params.euclidean_fitness_epsilon {
            return Some(Convergence::AbsoluteMse);
        }
        if change / self.previous_mse < RELATIVE_MSE_THRESHOLD {
            return Some(Convergence::RelativeMse);
        }

        self.previous_mse = mse;
        None
    }
}

/// Align `source` onto `target` with point-to-point ICP
///
/// Each iteration pairs reciprocal nearest neighbours within
/// `max_correspondence_distance`, solves for the rigid increment in closed
/// form and composes it onto the running estimate.
///
/// # Arguments
/// * `source` - Points to be aligned
/// * `target` - Points to align to
/// * `init` - Initial transformation estimate
/// * `params` - Stopping parameters
///
/// # Returns
/// * `Result<ICPResult>` - Fails only on empty input or a zero iteration cap.
///   Running out of correspondences ends the loop with `converged == false`.
pub fn icp(source: &[Point3d], target: &[Point3d], init: Transform3D, params: &IcpParams) -> Result<ICPResult> {
    if source.is_empty() || target.is_empty() {
        return Err(Error::InvalidData("Source or target point cloud is empty".to_string()));
    }
    if params.max_iterations == 0 {
        return Err(Error::InvalidParameter("Max iterations must be positive".to_string()));
    }

    let estimator = CorrespondenceEstimator::new(target);
    let mut criteria = ConvergenceCriteria::new(*params);
    let mut current = init;
    let mut result = ICPResult {
        transformation: init,
        mse: 0.0,
        iterations: 0,
        converged: false,
        correspondences: Vec::new(),
    };

    loop {
        let transformed: Vec<Point3d> = source.iter().map(|p| current.transform_point(p)).collect();
        let correspondences = estimator.reciprocal(&transformed, params.max_correspondence_distance);
        if correspondences.len() < MIN_CORRESPONDENCES {
            warn!(
                "ICP stopped after {} iterations: only {} correspondences within {}",
                result.iterations,
                correspondences.len(),
                params.max_correspondence_distance
            );
            result.converged = false;
            break;
        }

        let (matched_source, matched_target): (Vec<Point3d>, Vec<Point3d>) = correspondences
            .iter()
            .map(|c| (transformed[c.source], target[c.target]))
            .unzip();
        let increment = compute_transformation(&matched_source, &matched_target)?;

        current = increment * current;
        result.iterations += 1;
        result.mse = mean_squared_distance(&correspondences);
        result.transformation = current;
        result.correspondences = correspondences;

        if let Some(reason) = criteria.check(result.iterations, &increment, result.mse) {
            debug!(
                "ICP converged ({:?}) after {} iterations, mse {:.6}",
                reason, result.iterations, result.mse
            );
            result.converged = true;
            break;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector3};

    fn grid() -> Vec<Point3d> {
        let mut points = Vec::new();
        for x in -3..=3 {
            for y in -3..=3 {
                for z in -2..=2 {
                    points.push(Point3d::new(x as f64, 1.3 * y as f64, 0.8 * z as f64));
                }
            }
        }
        points
    }

    fn known_transform() -> Transform3D {
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.02).to_homogeneous();
        Transform3D::translation(Vector3::new(0.1, -0.05, 0.03)).compose(Transform3D::from(rotation))
    }

    fn strict() -> IcpParams {
        IcpParams::default()
            .with_euclidean_fitness_epsilon(1e-12)
            .with_transformation_epsilon(1e-12)
    }

    #[test]
    fn test_compute_transformation_exact() {
        let source = grid();
        let expected = known_transform();
        let target: Vec<Point3d> = source.iter().map(|p| expected.transform_point(p)).collect();

        let estimated = compute_transformation(&source, &target).unwrap();
        assert_relative_eq!(estimated.matrix, expected.matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_icp_identity_transformation() {
        let points = grid();
        let result = icp(&points, &points, Transform3D::identity(), &strict()).unwrap();

        assert!(result.converged);
        assert!(result.mse < 1e-12);
        assert!(result.iterations <= 2);
        assert_relative_eq!(result.transformation.matrix, Matrix4::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_icp_recovers_known_transform() {
        let source = grid();
        let expected = known_transform();
        let target: Vec<Point3d> = source.iter().map(|p| expected.transform_point(p)).collect();

        let result = icp(&source, &target, Transform3D::identity(), &strict()).unwrap();

        assert!(result.converged);
        assert_eq!(result.correspondences.len(), source.len());
        assert_relative_eq!(result.transformation.matrix, expected.matrix, epsilon = 1e-6);
    }

    #[test]
    fn test_icp_uses_initial_guess() {
        let source = grid();
        let expected = known_transform();
        let target: Vec<Point3d> = source.iter().map(|p| expected.transform_point(p)).collect();

        let result = icp(&source, &target, expected, &strict()).unwrap();
        assert!(result.converged);
        assert!(result.iterations <= 2);
        assert_relative_eq!(result.transformation.matrix, expected.matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_icp_iteration_cap() {
        let source = grid();
        let target: Vec<Point3d> = source.iter().map(|p| known_transform().transform_point(p)).collect();

        let result = icp(&source, &target, Transform3D::identity(), &strict().with_max_iterations(1)).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_icp_too_few_correspondences() {
        let source = vec![Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)];
        let target = vec![Point3d::new(100.0, 0.0, 0.0), Point3d::new(101.0, 0.0, 0.0)];

        let result = icp(&source, &target, Transform3D::identity(), &IcpParams::default()).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 0);
        assert!(result.transformation.is_identity());
    }

    #[test]
    fn test_icp_validation() {
        let target = vec![Point3d::new(0.0, 0.0, 0.0)];
        assert!(icp(&[], &target, Transform3D::identity(), &IcpParams::default()).is_err());
        assert!(icp(&target, &target, Transform3D::identity(), &IcpParams::default().with_max_iterations(0)).is_err());
    }
}
