//! Noise filters for scanned views
//!
//! Filters never remove records. They move them onto the noise sentinel and
//! report how many were marked, so indices stay stable until the caller
//! compacts the cloud with `remove_noise`.

use crate::nearest_neighbor::SpatialIndex;
use crate::point_graph::{build_graph, WeightedGraph};
use log::debug;
use mvreg_core::{NearestNeighborSearch, Point3d, RecordCloud, ReferenceAxis};
use rayon::prelude::*;

/// Multiplier on the local spread used by the density filter
pub const DEFAULT_DENSITY_WEIGHT: f64 = 1.25;

/// Vertices of every component with fewer than `segment_threshold` members
pub fn component_noise(graph: &WeightedGraph, segment_threshold: usize) -> Vec<usize> {
    let mut noise: Vec<usize> = graph
        .connected_components()
        .members()
        .into_iter()
        .filter(|members| members.len() < segment_threshold)
        .flatten()
        .collect();
    noise.sort_unstable();
    noise
}

/// Indices of the records that are not already noise
pub fn valid_indices(cloud: &RecordCloud) -> Vec<usize> {
    cloud
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_noise())
        .map(|(i, _)| i)
        .collect()
}

/// Mark small isolated clusters as noise
///
/// Points are linked when a Delaunay edge between them is no longer than
/// `triangle_length`; every connected cluster smaller than
/// `segment_threshold` points is dropped.
///
/// # Arguments
/// * `cloud` - Cloud to filter in place
/// * `triangle_length` - Longest edge that still links two points
/// * `segment_threshold` - Smallest cluster that survives
///
/// # Returns
/// * `usize` - Number of records newly marked as noise
pub fn denoise_by_components(
    cloud: &mut RecordCloud,
    triangle_length: f64,
    segment_threshold: usize,
) -> usize {
    let indices = valid_indices(cloud);
    if indices.is_empty() {
        return 0;
    }

    let positions: Vec<Point3d> = indices.iter().map(|&i| cloud[i].position).collect();
    let graph = build_graph(&positions, triangle_length);
    let noise = component_noise(&graph, segment_threshold);
    for &vertex in &noise {
        cloud.mark_noise(indices[vertex]);
    }

    debug!(
        "component denoise: {} of {} points in clusters below {} (edge <= {})",
        noise.len(),
        indices.len(),
        segment_threshold,
        triangle_length
    );
    noise.len()
}

/// Positions whose local density deviates from their neighbourhood
///
/// For every point the `neighbors` nearest points (the point itself first)
/// give a mean distance `d`. With `D` the mean of `d` over those neighbours,
/// the point is an outlier when `|1 - d/D|` exceeds `weight` times the
/// relative spread of the neighbours' `d` around `D`.
pub fn density_noise(points: &[Point3d], neighbors: usize, weight: f64) -> Vec<usize> {
    if points.len() < 2 || neighbors < 2 {
        return Vec::new();
    }

    let index = SpatialIndex::new(points);
    let knn: Vec<Vec<(usize, f64)>> = points
        .par_iter()
        .map(|p| index.find_k_nearest(p, neighbors))
        .collect();

    let mean_distance: Vec<f64> = knn
        .iter()
        .map(|hits| hits.iter().map(|&(_, d)| d).sum::<f64>() / hits.len() as f64)
        .collect();

    knn.par_iter()
        .enumerate()
        .filter_map(|(i, hits)| {
            let k = hits.len() as f64;
            let local = hits.iter().map(|&(j, _)| mean_distance[j]).sum::<f64>() / k;
            let ddf = (1.0 - mean_distance[i] / local).abs();
            let spread = hits
                .iter()
                .map(|&(j, _)| (mean_distance[j] - local).powi(2))
                .sum::<f64>()
                / k;
            let theta = spread.sqrt() / local;
            (ddf > theta * weight).then_some(i)
        })
        .collect()
}

/// Mark density outliers as noise
///
/// # Example
/// ```rust
/// use mvreg_algorithms::denoise_by_density;
/// use mvreg_core::{Point3d, PointRecord, RecordCloud};
///
/// let mut cloud: RecordCloud = (0..200)
///     .map(|i| Point3d::new((i % 10) as f64, ((i / 10) % 10) as f64, (i / 100) as f64 + 1.0))
///     .map(PointRecord::at)
///     .collect();
/// let marked = denoise_by_density(&mut cloud, 10, 1.25);
/// assert_eq!(cloud.noise_count(), marked);
/// ```
pub fn denoise_by_density(cloud: &mut RecordCloud, neighbors: usize, weight: f64) -> usize {
    let indices = valid_indices(cloud);
    let positions: Vec<Point3d> = indices.iter().map(|&i| cloud[i].position).collect();
    let noise = density_noise(&positions, neighbors, weight);
    for &i in &noise {
        cloud.mark_noise(indices[i]);
    }

    debug!(
        "density denoise: {} of {} points flagged (k = {}, w = {})",
        noise.len(),
        indices.len(),
        neighbors,
        weight
    );
    noise.len()
}

/// Mark every point on or behind the plane through the pivot orthogonal to
/// the axis. Returns the number of records newly marked.
pub fn extract_by_plane(cloud: &mut RecordCloud, axis: &ReferenceAxis) -> usize {
    let mut marked = 0;
    for point in cloud.iter_mut().filter(|p| !p.is_noise()) {
        if axis.signed_distance(&point.position) <= 0.0 {
            point.mark_noise();
            marked += 1;
        }
    }
    marked
}
