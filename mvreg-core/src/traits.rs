//! Core traits for mvreg

use crate::{point::*, point_cloud::*, transform::Transform3D};

/// Trait for nearest neighbor search functionality
pub trait NearestNeighborSearch {
    /// The `k` nearest indexed points as `(index, distance)`, closest first.
    ///
    /// A query that coincides with an indexed point returns that point first.
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)>;

    /// All indexed points within `radius` as `(index, distance)`
    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)>;

    /// Closest indexed point as `(index, distance)`
    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)> {
        self.find_k_nearest(query, 1).into_iter().next()
    }
}

/// Objects with a spatial extent
pub trait Bounded {
    /// Axis aligned bounds as `(min, max)`, `None` when there is nothing to bound
    fn bounding_box(&self) -> Option<(Point3d, Point3d)>;

    /// Sphere around the bounding box as `(center, radius)`
    fn bounding_sphere(&self) -> Option<(Point3d, f64)> {
        self.bounding_box().map(|(min, max)| {
            let center = nalgebra::center(&min, &max);
            (center, (max - center).norm())
        })
    }
}

/// Trait for objects that can be transformed
pub trait Transformable {
    /// Apply a transformation to the object
    fn transform(&mut self, transform: &Transform3D);
}

impl Bounded for [Point3d] {
    fn bounding_box(&self) -> Option<(Point3d, Point3d)> {
        let first = *self.first()?;
        Some(self.iter().fold((first, first), |(min, max), p| {
            (min.inf(p), max.sup(p))
        }))
    }
}

impl Bounded for PointCloud<PointRecord> {
    /// Bounds of the non-noise records
    fn bounding_box(&self) -> Option<(Point3d, Point3d)> {
        self.valid_positions().as_slice().bounding_box()
    }
}

impl Transformable for PointCloud<PointRecord> {
    /// Moves positions and rotates normals. Noise records stay on the sentinel.
    fn transform(&mut self, transform: &Transform3D) {
        for point in self.points.iter_mut().filter(|p| !p.is_noise()) {
            point.position = transform.transform_point(&point.position);
            point.normal = transform.transform_vector(&point.normal);
        }
    }
}
