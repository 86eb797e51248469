//! Lu–Milios global relaxation of a pose graph
//!
//! Every vertex is a scan with a 6-DoF pose `(x, y, z, roll, pitch, yaw)`;
//! every edge carries point correspondences between two scans. Each iteration
//! linearises all edges around the current poses and solves one sparse-free
//! normal system for the pose corrections. Vertex 0 is held fixed.

use crate::correspondence::Correspondence;
use log::{debug, warn};
use mvreg_core::{Error, Point3d, Result, Transform3D, Vector3d};
use nalgebra::{DMatrix, DVector, Matrix3x6, Matrix6, Rotation3, Translation3, Vector6};
use std::collections::BTreeMap;

/// Default iteration cap of [`Lum::compute`]
pub const DEFAULT_LUM_ITERATIONS: usize = 16;
/// Residuals below this make an edge carry no information
const MIN_RESIDUAL: f64 = 1e-13;
const MIN_EDGE_CORRESPONDENCES: usize = 3;

pub type Pose = Vector6<f64>;

/// Rigid transform of a pose: translation, then yaw about z, pitch about y
/// and roll about x applied in that order to the point
pub fn pose_transform(pose: &Pose) -> Transform3D {
    let rotation = Rotation3::from_euler_angles(pose[3], pose[4], pose[5]);
    let translation = Translation3::new(pose[0], pose[1], pose[2]);
    Transform3D::from(translation.to_homogeneous() * rotation.to_homogeneous())
}

#[derive(Debug, Clone)]
struct Edge {
    pairs: Vec<(usize, usize)>,
    cinv: Matrix6<f64>,
    cinvd: Vector6<f64>,
}

/// Pose graph solved with the Lu–Milios linearisation
#[derive(Debug, Clone)]
pub struct Lum {
    clouds: Vec<Vec<Point3d>>,
    poses: Vec<Pose>,
    edges: BTreeMap<(usize, usize), Edge>,
    max_iterations: usize,
    convergence_threshold: f64,
}

impl Default for Lum {
    fn default() -> Self {
        Self::new()
    }
}

impl Lum {
    pub fn new() -> Self {
        Self {
            clouds: Vec::new(),
            poses: Vec::new(),
            edges: BTreeMap::new(),
            max_iterations: DEFAULT_LUM_ITERATIONS,
            convergence_threshold: 0.0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stop once the summed pose correction per free vertex drops to this
    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    /// Add a scan at the zero pose and return its vertex id
    pub fn add_point_cloud(&mut self, points: Vec<Point3d>) -> usize {
        self.clouds.push(points);
        self.poses.push(Pose::zeros());
        self.clouds.len() - 1
    }

    pub fn vertex_count(&self) -> usize {
        self.clouds.len()
    }

    pub fn pose(&self, vertex: usize) -> Option<Pose> {
        self.poses.get(vertex).copied()
    }

    pub fn set_pose(&mut self, vertex: usize, pose: Pose) -> Result<()> {
        let slot = self
            .poses
            .get_mut(vertex)
            .ok_or_else(|| Error::InvalidParameter(format!("no LUM vertex {}", vertex)))?;
        *slot = pose;
        Ok(())
    }

    /// Transform of the vertex's current pose
    pub fn transformation(&self, vertex: usize) -> Option<Transform3D> {
        self.poses.get(vertex).map(pose_transform)
    }

    /// Attach correspondences from `source` to `target`; `Correspondence::source`
    /// indexes the source scan. Replaces any earlier edge between the two.
    pub fn set_correspondences(&mut self, source: usize, target: usize, correspondences: &[Correspondence]) -> Result<()> {
        let count = self.clouds.len();
        if source >= count || target >= count || source == target {
            return Err(Error::InvalidParameter(format!(
                "invalid LUM edge {} -> {} with {} vertices",
                source, target, count
            )));
        }
        let pairs = correspondences
            .iter()
            .filter(|c| c.source < self.clouds[source].len() && c.target < self.clouds[target].len())
            .map(|c| (c.source, c.target))
            .collect();
        self.edges.insert(
            (source, target),
            Edge {
                pairs,
                cinv: Matrix6::zeros(),
                cinvd: Vector6::zeros(),
            },
        );
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Run the relaxation. Poses of vertices 1.. are updated in place.
    pub fn compute(&mut self) -> Result<()> {
        let n = self.clouds.len();
        if n < 2 {
            return Ok(());
        }

        for iteration in 0..self.max_iterations {
            let keys: Vec<(usize, usize)> = self.edges.keys().copied().collect();
            for key in keys {
                self.compute_edge(key);
            }

            let size = 6 * (n - 1);
            let mut g = DMatrix::<f64>::zeros(size, size);
            let mut b = DVector::<f64>::zeros(size);
            for vi in 1..n {
                for vj in 0..n {
                    let (edge, forward) = match (self.edges.get(&(vi, vj)), self.edges.get(&(vj, vi))) {
                        (Some(edge), _) => (edge, true),
                        (None, Some(edge)) => (edge, false),
                        (None, None) => continue,
                    };
                    let row = 6 * (vi - 1);
                    if vj > 0 {
                        g.view_mut((row, 6 * (vj - 1)), (6, 6)).copy_from(&(-edge.cinv));
                    }
                    let mut diagonal = g.view_mut((row, row), (6, 6));
                    diagonal += edge.cinv;
                    let sign = if forward { 1.0 } else { -1.0 };
                    let mut segment = b.rows_mut(row, 6);
                    segment += edge.cinvd * sign;
                }
            }

            let Some(x) = g.col_piv_qr().solve(&b) else {
                debug!("LUM iteration {}: singular system, stopping", iteration);
                break;
            };

            let mut correction_sum = 0.0;
            for vi in 1..n {
                let pose = self.poses[vi];
                let Some(inverse) = incidence_correction(&pose).try_inverse() else {
                    warn!("LUM vertex {}: degenerate incidence correction", vi);
                    continue;
                };
                let slice: Vector6<f64> = x.fixed_rows::<6>(6 * (vi - 1)).into_owned();
                let difference = -(inverse * slice);
                correction_sum += difference.norm();
                self.poses[vi] = pose + difference;
            }

            debug!("LUM iteration {}: total correction {:.3e}", iteration, correction_sum);
            if correction_sum <= self.convergence_threshold * (n - 1) as f64 {
                break;
            }
        }

        Ok(())
    }

    fn compute_edge(&mut self, (source, target): (usize, usize)) {
        let source_transform = pose_transform(&self.poses[source]);
        let target_transform = pose_transform(&self.poses[target]);
        let Some(edge) = self.edges.get_mut(&(source, target)) else {
            return;
        };

        let mut averages = Vec::with_capacity(edge.pairs.len());
        let mut differences = Vec::with_capacity(edge.pairs.len());
        for &(s, t) in &edge.pairs {
            let s = source_transform.transform_point(&self.clouds[source][s]);
            let t = target_transform.transform_point(&self.clouds[target][t]);
            if s.iter().chain(t.iter()).all(|c| c.is_finite()) {
                averages.push((s.coords + t.coords) * 0.5);
                differences.push(s - t);
            }
        }

        edge.cinv = Matrix6::zeros();
        edge.cinvd = Vector6::zeros();
        if averages.len() < MIN_EDGE_CORRESPONDENCES {
            return;
        }

        let mut mm = Matrix6::<f64>::zeros();
        let mut mz = Vector6::<f64>::zeros();
        let jacobians: Vec<Matrix3x6<f64>> = averages.iter().map(pair_jacobian).collect();
        for (m, diff) in jacobians.iter().zip(&differences) {
            mm += m.transpose() * m;
            mz += m.transpose() * diff;
        }

        let Some(mm_inverse) = mm.try_inverse() else {
            return;
        };
        let d = mm_inverse * mz;
        let ss: f64 = jacobians
            .iter()
            .zip(&differences)
            .map(|(m, diff)| (diff - m * d).norm_squared())
            .sum();

        if ss < MIN_RESIDUAL || !ss.is_finite() {
            return;
        }
        edge.cinv = mm / ss;
        edge.cinvd = mz / ss;
    }
}

/// Linearised effect of a small pose change on a point pair centred at `a`
fn pair_jacobian(a: &Vector3d) -> Matrix3x6<f64> {
    #[rustfmt::skip]
    let m = Matrix3x6::new(
        1.0, 0.0, 0.0, 0.0, -a.y, a.z,
        0.0, 1.0, 0.0, -a.z, a.x, 0.0,
        0.0, 0.0, 1.0, a.y, 0.0, -a.x,
    );
    m
}

/// Maps a correction in the linearised frame back to pose coordinates
fn incidence_correction(pose: &Pose) -> Matrix6<f64> {
    let (x, y, z) = (pose[0], pose[1], pose[2]);
    let (sx, cx) = pose[3].sin_cos();
    let (sy, cy) = pose[4].sin_cos();

    let mut out = Matrix6::identity();
    out[(0, 4)] = y * sx - z * cx;
    out[(0, 5)] = y * cx * cy + z * sx * cy;
    out[(1, 3)] = z;
    out[(1, 4)] = -x * sx;
    out[(1, 5)] = -x * cx * cy + z * sy;
    out[(2, 3)] = -y;
    out[(2, 4)] = x * cx;
    out[(2, 5)] = -x * sx * cy - y * sy;
    out[(3, 5)] = sy;
    out[(4, 4)] = sx;
    out[(4, 5)] = cx * cy;
    out[(5, 4)] = cx;
    out[(5, 5)] = -sx * cy;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn identity_pairs(count: usize) -> Vec<Correspondence> {
        (0..count)
            .map(|i| Correspondence {
                source: i,
                target: i,
                distance: 0.0,
            })
            .collect()
    }

    #[test]
    fn test_pose_transform_order() {
        let pose = Pose::new(1.0, 2.0, 3.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let p = pose_transform(&pose).transform_point(&Point3d::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3d::new(1.0, 3.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_incidence_correction_at_zero_is_invertible() {
        let correction = incidence_correction(&Pose::zeros());
        assert!(correction.try_inverse().is_some());
    }

    #[test]
    fn test_lum_recovers_translation() {
        let mut rng = StdRng::seed_from_u64(11);
        let reference: Vec<Point3d> = (0..80)
            .map(|_| Point3d::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)))
            .collect();
        let shifted: Vec<Point3d> = reference
            .iter()
            .map(|p| {
                let noise = Vector3d::new(
                    rng.gen_range(-0.005..0.005),
                    rng.gen_range(-0.005..0.005),
                    rng.gen_range(-0.005..0.005),
                );
                p + Vector3d::new(0.1, -0.05, 0.02) + noise
            })
            .collect();

        let mut lum = Lum::new();
        let a = lum.add_point_cloud(reference.clone());
        let b = lum.add_point_cloud(shifted);
        lum.set_correspondences(b, a, &identity_pairs(reference.len())).unwrap();
        lum.compute().unwrap();

        let transform = lum.transformation(b).unwrap();
        assert_relative_eq!(transform.translation_vector(), Vector3d::new(-0.1, 0.05, -0.02), epsilon = 0.01);
        assert!(transform.rotation_angle() < 0.01);
        assert!(lum.transformation(a).unwrap().is_identity());
    }

    #[test]
    fn test_exact_alignment_stays_put() {
        let points: Vec<Point3d> = (0..10)
            .map(|i| Point3d::new(i as f64, (i * i) as f64 * 0.1, (i % 3) as f64))
            .collect();
        let mut lum = Lum::new();
        let a = lum.add_point_cloud(points.clone());
        let b = lum.add_point_cloud(points.clone());
        lum.set_correspondences(a, b, &identity_pairs(points.len())).unwrap();
        lum.compute().unwrap();

        assert_eq!(lum.pose(b).unwrap(), Pose::zeros());
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let mut lum = Lum::new();
        let a = lum.add_point_cloud(vec![Point3d::origin()]);
        assert!(lum.set_correspondences(a, a, &[]).is_err());
        assert!(lum.set_correspondences(a, 5, &[]).is_err());
        assert!(lum.set_pose(3, Pose::zeros()).is_err());
    }
}
