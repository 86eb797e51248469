//! Point cloud data structures and functionality

use crate::point::*;
use crate::transform::Transform3D;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// A generic point cloud container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud<T> {
    pub points: Vec<T>,
}

impl<T> PointCloud<T> {
    /// Create a new empty point cloud
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a new point cloud with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a vector of points
    pub fn from_points(points: Vec<T>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: T) {
        self.points.push(point);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.points.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.points.iter_mut()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl<T> Default for PointCloud<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for PointCloud<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<T> IndexMut<usize> for PointCloud<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.points[index]
    }
}

impl<'a, T> IntoIterator for &'a PointCloud<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl<T> Extend<T> for PointCloud<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

impl<T> FromIterator<T> for PointCloud<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            points: Vec::from_iter(iter),
        }
    }
}

impl PointCloud<PointRecord> {
    /// Positions of every record, noise included, in buffer order
    pub fn positions(&self) -> Vec<Point3d> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Positions of the records that are not marked as noise
    pub fn valid_positions(&self) -> Vec<Point3d> {
        self.points
            .iter()
            .filter(|p| !p.is_noise())
            .map(|p| p.position)
            .collect()
    }

    pub fn is_noise(&self, index: usize) -> bool {
        self.points[index].is_noise()
    }

    pub fn mark_noise(&mut self, index: usize) {
        self.points[index].mark_noise();
    }

    pub fn noise_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_noise()).count()
    }

    /// Physically drop noise records. Returns how many were removed.
    ///
    /// Indices held from before the call are invalidated.
    pub fn remove_noise(&mut self) -> usize {
        let before = self.points.len();
        self.points.retain(|p| !p.is_noise());
        before - self.points.len()
    }

    /// Non-noise records mapped through `transform`; normals are rotated only
    pub fn transformed_records(&self, transform: &Transform3D) -> Vec<PointRecord> {
        self.points
            .iter()
            .filter(|p| !p.is_noise())
            .map(|p| PointRecord {
                position: transform.transform_point(&p.position),
                normal: transform.transform_vector(&p.normal),
                color: p.color,
            })
            .collect()
    }

    /// Every `sample_ratio`-th non-noise record
    pub fn downsampled(&self, sample_ratio: usize) -> Result<Self> {
        if sample_ratio == 0 {
            return Err(Error::InvalidParameter("sample ratio must be at least 1".to_string()));
        }
        Ok(self
            .points
            .iter()
            .filter(|p| !p.is_noise())
            .step_by(sample_ratio)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn line_cloud(n: usize) -> PointCloud<PointRecord> {
        (1..=n)
            .map(|i| PointRecord::at(Point3d::new(i as f64, 0.0, 0.0)))
            .collect()
    }

    #[test]
    fn test_noise_keeps_indices_until_compaction() {
        let mut cloud = line_cloud(5);
        cloud.mark_noise(1);
        cloud.mark_noise(3);

        assert_eq!(cloud.len(), 5);
        assert_eq!(cloud.noise_count(), 2);
        assert!(cloud.is_noise(3));
        assert_eq!(cloud.valid_positions().len(), 3);

        assert_eq!(cloud.remove_noise(), 2);
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud[1].position, Point3d::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_transformed_records_skip_noise_and_rotate_normals() {
        let mut cloud = line_cloud(3);
        cloud.mark_noise(0);
        let transform = Transform3D::translation(Vector3::new(0.0, 0.0, 5.0));

        let records = cloud.transformed_records(&transform);
        assert_eq!(records.len(), 2);
        assert_relative_eq!(records[0].position, Point3d::new(2.0, 0.0, 5.0));
        assert_relative_eq!(records[0].normal, Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_downsampled() {
        let cloud = line_cloud(10);
        let sampled = cloud.downsampled(3).unwrap();
        assert_eq!(sampled.len(), 4);
        assert_eq!(sampled[1].position.x, 4.0);
        assert!(cloud.downsampled(0).is_err());
    }
}
