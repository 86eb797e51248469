//! Nearest neighbor search backed by an R*-tree

use mvreg_core::{NearestNeighborSearch, Point3d};
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// Spatial index over a fixed point set; results refer to input indices
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    pub fn new(points: &[Point3d]) -> Self {
        let items = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedPoint::new([p.x, p.y, p.z], idx))
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl NearestNeighborSearch for SpatialIndex {
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&[query.x, query.y, query.z])
            .take(k)
            .map(|(item, distance_2)| (item.data, distance_2.sqrt()))
            .collect()
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        let center = [query.x, query.y, query.z];
        self.tree
            .locate_within_distance(center, radius * radius)
            .map(|item| {
                let [x, y, z] = *item.geom();
                let distance = ((x - query.x).powi(2) + (y - query.y).powi(2) + (z - query.z).powi(2)).sqrt();
                (item.data, distance)
            })
            .collect()
    }

    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)> {
        let center = [query.x, query.y, query.z];
        self.tree.nearest_neighbor(&center).map(|item| {
            let [x, y, z] = *item.geom();
            let distance = ((x - query.x).powi(2) + (y - query.y).powi(2) + (z - query.z).powi(2)).sqrt();
            (item.data, distance)
        })
    }
}
