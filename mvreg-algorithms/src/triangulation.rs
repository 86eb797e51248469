//! Incremental 3D Delaunay triangulation
//!
//! Bowyer–Watson insertion into an enclosing super tetrahedron. Coordinates
//! are normalised to a unit box and perturbed by a deterministic jitter far
//! below the median nearest-neighbour spacing, which keeps grid-like inputs in
//! general position however far a stray point stretches the box. Callers
//! measure edge lengths on their own, unperturbed coordinates.

use crate::nearest_neighbor::SpatialIndex;
use itertools::Itertools;
use log::debug;
use mvreg_core::{Bounded, NearestNeighborSearch, Point3d, Vector3d};
use nalgebra::Matrix4;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Half-size of the super tetrahedron in normalised units
const SUPER_SCALE: f64 = 20.0;
/// Perturbation amplitude as a fraction of the median point spacing
const JITTER: f64 = 1e-5;
/// Smallest perturbation in normalised units, about a hundred ulps of 1.0
const JITTER_FLOOR: f64 = 1e-14;
const JITTER_SEED: u64 = 0x6d76_7265_6764_7433;

#[derive(Debug, Clone, Copy)]
struct Tetrahedron {
    vertices: [usize; 4],
    /// `neighbors[i]` shares the face opposite `vertices[i]`
    neighbors: [Option<usize>; 4],
    alive: bool,
}

/// Delaunay tetrahedralisation of a point set.
///
/// Vertex ids are indices into the input slice. Non-finite input points are
/// left out and have no incident edges.
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    vertex_count: usize,
    tetrahedra: Vec<[usize; 4]>,
    edges: Vec<(usize, usize)>,
}

impl Triangulation {
    /// Triangulate `points`
    pub fn new(points: &[Point3d]) -> Self {
        let finite: Vec<usize> = (0..points.len())
            .filter(|&i| points[i].iter().all(|c| c.is_finite()))
            .collect();
        if finite.len() < 2 {
            return Self {
                vertex_count: points.len(),
                ..Self::default()
            };
        }

        let mut builder = Builder::new(points, &finite);
        builder.insert_all(finite);
        let triangulation = builder.finish();
        debug!(
            "triangulated {} points into {} tetrahedra, {} edges",
            points.len(),
            triangulation.tetrahedra.len(),
            triangulation.edges.len()
        );
        triangulation
    }

    /// Number of input points, including any that were skipped
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Tetrahedra whose four corners are all input points
    pub fn tetrahedra(&self) -> &[[usize; 4]] {
        &self.tetrahedra
    }

    /// Unique edges between input points as `(low, high)`, sorted
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

struct Builder {
    /// Normalised input points followed by the four super vertices
    coords: Vec<Point3d>,
    super_base: usize,
    tets: Vec<Tetrahedron>,
    last: usize,
    rng: StdRng,
}

impl Builder {
    fn new(points: &[Point3d], finite: &[usize]) -> Self {
        let finite_points: Vec<Point3d> = finite.iter().map(|&i| points[i]).collect();
        let (min, max) = finite_points
            .as_slice()
            .bounding_box()
            .unwrap_or((Point3d::origin(), Point3d::origin()));
        let center = nalgebra::center(&min, &max);
        let extent = (max - min).max();
        let scale = if extent > 0.0 { extent } else { 1.0 };
        let spacing = median_spacing(&finite_points).unwrap_or(scale);
        let amplitude = (JITTER * spacing / scale).max(JITTER_FLOOR);

        let mut rng = StdRng::seed_from_u64(JITTER_SEED);
        let mut coords: Vec<Point3d> = points
            .iter()
            .map(|p| {
                let jitter = Vector3d::new(
                    rng.gen_range(-amplitude..=amplitude),
                    rng.gen_range(-amplitude..=amplitude),
                    rng.gen_range(-amplitude..=amplitude),
                );
                Point3d::from((p - center) / scale + jitter)
            })
            .collect();

        let super_base = coords.len();
        let k = SUPER_SCALE;
        coords.extend([
            Point3d::new(k, k, k),
            Point3d::new(k, -k, -k),
            Point3d::new(-k, k, -k),
            Point3d::new(-k, -k, k),
        ]);

        let mut vertices = [super_base, super_base + 1, super_base + 2, super_base + 3];
        let [a, b, c, d] = vertices.map(|v| coords[v]);
        if orient(&a, &b, &c, &d) < 0.0 {
            vertices.swap(0, 1);
        }

        Self {
            coords,
            super_base,
            tets: vec![Tetrahedron {
                vertices,
                neighbors: [None; 4],
                alive: true,
            }],
            last: 0,
            rng,
        }
    }

    fn insert_all(&mut self, mut order: Vec<usize>) {
        order.shuffle(&mut self.rng);
        for index in order {
            self.insert(index);
        }
    }

    /// Whether `p` lies strictly inside the circumsphere of `tet`
    fn conflicts(&self, tet: usize, p: &Point3d) -> bool {
        let [a, b, c, d] = self.tets[tet].vertices.map(|v| self.coords[v]);
        in_sphere(&a, &b, &c, &d, p) * orient(&a, &b, &c, &d) < 0.0
    }

    /// Find a live tetrahedron containing `p` by a stochastic visibility walk,
    /// falling back to a scan for any conflicting tetrahedron.
    fn locate(&mut self, p: &Point3d) -> Option<usize> {
        let mut current = if self.tets[self.last].alive {
            self.last
        } else {
            self.tets.iter().rposition(|t| t.alive)?
        };

        'walk: for _ in 0..self.tets.len() {
            let tet = self.tets[current];
            let offset = self.rng.gen_range(0..4);
            for step in 0..4 {
                let i = (offset + step) % 4;
                let mut corners = tet.vertices.map(|v| self.coords[v]);
                corners[i] = *p;
                if orient(&corners[0], &corners[1], &corners[2], &corners[3]) < 0.0 {
                    match tet.neighbors[i] {
                        Some(next) => {
                            current = next;
                            continue 'walk;
                        }
                        None => break 'walk,
                    }
                }
            }
            return Some(current);
        }

        (0..self.tets.len())
            .rev()
            .find(|&t| self.tets[t].alive && self.conflicts(t, p))
    }

    fn insert(&mut self, index: usize) {
        let p = self.coords[index];
        let Some(start) = self.locate(&p) else {
            debug!("triangulation: no enclosing tetrahedron for point {}", index);
            return;
        };

        // Cavity: connected set of tetrahedra whose circumsphere holds p
        let mut in_cavity = HashSet::from([start]);
        let mut cavity = vec![start];
        let mut stack = vec![start];
        while let Some(t) = stack.pop() {
            for neighbor in self.tets[t].neighbors.into_iter().flatten() {
                if !in_cavity.contains(&neighbor) && self.conflicts(neighbor, &p) {
                    in_cavity.insert(neighbor);
                    cavity.push(neighbor);
                    stack.push(neighbor);
                }
            }
        }

        // Star the cavity boundary from p
        let mut created = Vec::new();
        for &t in &cavity {
            let tet = self.tets[t];
            for i in 0..4 {
                let outside = match tet.neighbors[i] {
                    Some(n) if in_cavity.contains(&n) => continue,
                    other => other,
                };

                let mut vertices = tet.vertices;
                vertices[i] = index;
                let mut neighbors = [None; 4];
                neighbors[i] = outside;

                let id = self.tets.len();
                self.tets.push(Tetrahedron {
                    vertices,
                    neighbors,
                    alive: true,
                });
                if let Some(outer) = outside {
                    if let Some(slot) = self.tets[outer].neighbors.iter().position(|&n| n == Some(t)) {
                        self.tets[outer].neighbors[slot] = Some(id);
                    }
                }
                created.push(id);
            }
        }

        for &t in &cavity {
            self.tets[t].alive = false;
        }

        // Glue the new tetrahedra along the faces that contain p
        let mut open: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        for &id in &created {
            let vertices = self.tets[id].vertices;
            for j in 0..4 {
                if vertices[j] == index {
                    continue;
                }
                let mut rest = (0..4)
                    .filter(|&k| k != j && vertices[k] != index)
                    .map(|k| vertices[k]);
                let (Some(a), Some(b)) = (rest.next(), rest.next()) else {
                    continue;
                };
                let key = (a.min(b), a.max(b));
                match open.remove(&key) {
                    Some((other, slot)) => {
                        self.tets[id].neighbors[j] = Some(other);
                        self.tets[other].neighbors[slot] = Some(id);
                    }
                    None => {
                        open.insert(key, (id, j));
                    }
                }
            }
        }

        if let Some(&last) = created.last() {
            self.last = last;
        }
    }

    fn finish(self) -> Triangulation {
        let n = self.super_base;
        let mut edges = HashSet::new();
        let mut tetrahedra = Vec::new();

        for tet in self.tets.iter().filter(|t| t.alive) {
            for (&a, &b) in tet.vertices.iter().tuple_combinations() {
                if a < n && b < n {
                    edges.insert((a.min(b), a.max(b)));
                }
            }
            if tet.vertices.iter().all(|&v| v < n) {
                tetrahedra.push(tet.vertices);
            }
        }

        let mut edges: Vec<(usize, usize)> = edges.into_iter().collect();
        edges.sort_unstable();

        Triangulation {
            vertex_count: n,
            tetrahedra,
            edges,
        }
    }
}

/// Median distance from each point to its nearest distinct neighbour.
/// Duplicates are ignored; `None` when every point coincides.
fn median_spacing(points: &[Point3d]) -> Option<f64> {
    let index = SpatialIndex::new(points);
    let mut distances: Vec<f64> = points
        .par_iter()
        .filter_map(|p| {
            index
                .find_k_nearest(p, 2)
                .into_iter()
                .map(|(_, distance)| distance)
                .find(|&distance| distance > 0.0)
        })
        .collect();
    if distances.is_empty() {
        return None;
    }
    let middle = distances.len() / 2;
    let (_, median, _) = distances.select_nth_unstable_by(middle, f64::total_cmp);
    Some(*median)
}

/// Six times the signed volume of `abcd`; positive when `d` is on the side
/// of `abc` that the right-hand rule points to
fn orient(a: &Point3d, b: &Point3d, c: &Point3d, d: &Point3d) -> f64 {
    (b - a).dot(&(c - a).cross(&(d - a)))
}

/// Lifted determinant; `e` is inside the circumsphere of `abcd` exactly when
/// this and `orient(a, b, c, d)` have opposite signs
fn in_sphere(a: &Point3d, b: &Point3d, c: &Point3d, d: &Point3d, e: &Point3d) -> f64 {
    let rows = [a - e, b - e, c - e, d - e];
    Matrix4::from_fn(|i, j| if j < 3 { rows[i][j] } else { rows[i].norm_squared() }).determinant()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn random_points(n: usize, seed: u64) -> Vec<Point3d> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| Point3d::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
            .collect()
    }

    fn circumsphere(corners: [Point3d; 4]) -> Option<(Point3d, f64)> {
        let [a, b, c, d] = corners;
        let m = Matrix3::from_rows(&[
            (b - a).transpose() * 2.0,
            (c - a).transpose() * 2.0,
            (d - a).transpose() * 2.0,
        ]);
        let rhs = Vector3d::new(
            b.coords.norm_squared() - a.coords.norm_squared(),
            c.coords.norm_squared() - a.coords.norm_squared(),
            d.coords.norm_squared() - a.coords.norm_squared(),
        );
        let center = m.lu().solve(&rhs)?;
        Some((Point3d::from(center), (a.coords - center).norm_squared()))
    }

    #[test]
    fn test_in_sphere_sign_convention() {
        let a = Point3d::new(0.0, 0.0, 0.0);
        let b = Point3d::new(1.0, 0.0, 0.0);
        let c = Point3d::new(0.0, 1.0, 0.0);
        let d = Point3d::new(0.0, 0.0, 1.0);
        let o = orient(&a, &b, &c, &d);
        assert!(o > 0.0);
        assert!(in_sphere(&a, &b, &c, &d, &Point3d::new(0.5, 0.5, 0.5)) * o < 0.0);
        assert!(in_sphere(&a, &b, &c, &d, &Point3d::new(0.0, 0.0, -1.0)) * o > 0.0);
    }

    #[test]
    fn test_median_spacing_ignores_outliers_and_duplicates() {
        let mut points: Vec<Point3d> = (0..10).map(|i| Point3d::new(i as f64 * 0.5, 0.0, 0.0)).collect();
        points.push(points[3]);
        points.push(Point3d::new(1e9, 0.0, 0.0));
        assert_eq!(median_spacing(&points), Some(0.5));

        assert_eq!(median_spacing(&[Point3d::new(1.0, 1.0, 1.0); 3]), None);
    }

    #[test]
    fn test_single_tetrahedron() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        let triangulation = Triangulation::new(&points);

        assert_eq!(triangulation.tetrahedra().len(), 1);
        assert_eq!(triangulation.edges().len(), 6);
    }

    #[test]
    fn test_tiny_inputs() {
        assert!(Triangulation::new(&[]).is_empty());
        assert!(Triangulation::new(&[Point3d::new(1.0, 1.0, 1.0)]).is_empty());

        let pair = Triangulation::new(&[Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 2.0, 3.0)]);
        assert_eq!(pair.edges(), &[(0, 1)]);
    }

    #[test]
    fn test_non_finite_points_are_skipped() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(f64::NAN, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
        ];
        let triangulation = Triangulation::new(&points);
        assert_eq!(triangulation.vertex_count(), 3);
        assert!(triangulation.edges().iter().all(|&(a, b)| a != 1 && b != 1));
        assert!(triangulation.edges().contains(&(0, 2)));
    }

    #[test]
    fn test_cube_keeps_all_cube_edges() {
        let mut points = Vec::new();
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    points.push(Point3d::new(x as f64, y as f64, z as f64));
                }
            }
        }
        let triangulation = Triangulation::new(&points);
        let edges = triangulation.edges();

        for (a, b) in (0..8).tuple_combinations() {
            if (points[a] - points[b]).norm() == 1.0 {
                assert!(edges.contains(&(a, b)), "missing cube edge {}-{}", a, b);
            }
        }
        assert!(triangulation.tetrahedra().len() >= 5);
    }

    #[test]
    fn test_random_points_satisfy_empty_sphere() {
        let points = random_points(60, 7);
        let triangulation = Triangulation::new(&points);
        assert!(!triangulation.tetrahedra().is_empty());

        for tet in triangulation.tetrahedra() {
            let corners = tet.map(|v| points[v]);
            let Some((center, radius_2)) = circumsphere(corners) else {
                continue;
            };
            for (idx, p) in points.iter().enumerate() {
                if tet.contains(&idx) {
                    continue;
                }
                let distance_2 = (p - center).norm_squared();
                assert!(
                    distance_2 >= radius_2 * (1.0 - 1e-6),
                    "point {} inside circumsphere of {:?}",
                    idx,
                    tet
                );
            }
        }
    }

    #[test]
    fn test_nearest_neighbor_edges_are_present() {
        let points = random_points(200, 11);
        let triangulation = Triangulation::new(&points);
        let edges: HashSet<(usize, usize)> = triangulation.edges().iter().copied().collect();

        for (i, p) in points.iter().enumerate() {
            let nearest = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .min_by(|a, b| (a.1 - p).norm().total_cmp(&(b.1 - p).norm()))
                .map(|(j, _)| j)
                .unwrap();
            assert!(edges.contains(&(i.min(nearest), i.max(nearest))));
        }
    }
}
