//! Reciprocal nearest-neighbour correspondences

use crate::nearest_neighbor::SpatialIndex;
use mvreg_core::{NearestNeighborSearch, Point3d};
use rayon::prelude::*;

/// Pair of mutually nearest points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index into the source points
    pub source: usize,
    /// Index into the target points
    pub target: usize,
    /// Euclidean distance between the two points
    pub distance: f64,
}

/// Target point set with its spatial index, reused across queries
pub struct CorrespondenceEstimator<'a> {
    target: &'a [Point3d],
    index: SpatialIndex,
}

impl<'a> CorrespondenceEstimator<'a> {
    pub fn new(target: &'a [Point3d]) -> Self {
        Self {
            target,
            index: SpatialIndex::new(target),
        }
    }

    pub fn target(&self) -> &[Point3d] {
        self.target
    }

    /// Pairs `(i, j)` where target `j` is the closest to source `i`, source
    /// `i` is the closest to target `j`, and they are at most `max_distance`
    /// apart. Ordered by source index.
    pub fn reciprocal(&self, source: &[Point3d], max_distance: f64) -> Vec<Correspondence> {
        if source.is_empty() || self.index.is_empty() {
            return Vec::new();
        }

        let source_index = SpatialIndex::new(source);
        source
            .par_iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let (j, distance) = self.index.find_nearest(p)?;
                if distance > max_distance {
                    return None;
                }
                let (back, _) = source_index.find_nearest(&self.target[j])?;
                (back == i).then_some(Correspondence {
                    source: i,
                    target: j,
                    distance,
                })
            })
            .collect()
    }
}

/// One-shot form of [`CorrespondenceEstimator::reciprocal`]
pub fn reciprocal_correspondences(
    source: &[Point3d],
    target: &[Point3d],
    max_distance: f64,
) -> Vec<Correspondence> {
    CorrespondenceEstimator::new(target).reciprocal(source, max_distance)
}

/// Mean squared distance over `correspondences`, 0 when there are none
pub fn mean_squared_distance(correspondences: &[Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    correspondences.iter().map(|c| c.distance * c.distance).sum::<f64>() / correspondences.len() as f64
}
