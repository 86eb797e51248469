//! Proximity graph over a point set
//!
//! Edges come from the Delaunay triangulation and are kept only when they are
//! no longer than a distance threshold. Since the Euclidean minimum spanning
//! tree is a subgraph of the Delaunay graph, two points share a component
//! exactly when a chain of point-to-point hops no longer than the threshold
//! connects them.

use crate::triangulation::Triangulation;
use mvreg_core::Point3d;

/// Undirected edge between two point indices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Undirected weighted graph over point indices
#[derive(Debug, Clone, Default)]
pub struct WeightedGraph {
    vertex_count: usize,
    edges: Vec<GraphEdge>,
}

impl WeightedGraph {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            vertex_count,
            edges: Vec::new(),
        }
    }

    pub fn add_edge(&mut self, source: usize, target: usize, weight: f64) {
        self.edges.push(GraphEdge {
            source,
            target,
            weight,
        });
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn clear(&mut self) {
        self.vertex_count = 0;
        self.edges.clear();
    }

    /// Partition the vertices into connected components
    pub fn connected_components(&self) -> Components {
        let mut sets = UnionFind::new(self.vertex_count);
        for edge in &self.edges {
            sets.union(edge.source, edge.target);
        }

        let mut labels = vec![usize::MAX; self.vertex_count];
        let mut root_labels = vec![usize::MAX; self.vertex_count];
        let mut count = 0;
        for (vertex, label) in labels.iter_mut().enumerate() {
            let root = sets.find(vertex);
            if root_labels[root] == usize::MAX {
                root_labels[root] = count;
                count += 1;
            }
            *label = root_labels[root];
        }

        Components { labels, count }
    }
}

/// Component label per vertex
#[derive(Debug, Clone)]
pub struct Components {
    labels: Vec<usize>,
    count: usize,
}

impl Components {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Label of each vertex, in `0..count()`
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Vertex lists grouped by component
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.count];
        for (vertex, &label) in self.labels.iter().enumerate() {
            members[label].push(vertex);
        }
        members
    }
}

/// Disjoint-set forest with path compression and union by rank
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Returns `true` if `a` and `b` were in different sets
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }
}

/// Keep the triangulation edges of length `<= distance_threshold`
pub fn graph_from_triangulation(
    points: &[Point3d],
    triangulation: &Triangulation,
    distance_threshold: f64,
) -> WeightedGraph {
    let mut graph = WeightedGraph::new(points.len());
    for &(a, b) in triangulation.edges() {
        let distance = (points[a] - points[b]).norm();
        if distance <= distance_threshold {
            graph.add_edge(a, b, distance);
        }
    }
    graph
}

/// Triangulate `points` and build the proximity graph in one go
///
/// # Arguments
/// * `points` - Point positions; vertex ids are indices into this slice
/// * `distance_threshold` - Longest edge kept in the graph
///
/// # Returns
/// * `WeightedGraph` - Edges weighted by Euclidean length
pub fn build_graph(points: &[Point3d], distance_threshold: f64) -> WeightedGraph {
    let triangulation = Triangulation::new(points);
    graph_from_triangulation(points, &triangulation, distance_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force_labels(points: &[Point3d], threshold: f64) -> Vec<usize> {
        let mut sets = UnionFind::new(points.len());
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                if (points[i] - points[j]).norm() <= threshold {
                    sets.union(i, j);
                }
            }
        }
        (0..points.len()).map(|i| sets.find(i)).collect()
    }

    #[test]
    fn test_union_find() {
        let mut sets = UnionFind::new(5);
        assert!(sets.union(0, 1));
        assert!(sets.union(3, 4));
        assert!(!sets.union(1, 0));
        assert_eq!(sets.find(0), sets.find(1));
        assert_ne!(sets.find(1), sets.find(3));
    }

    #[test]
    fn test_edges_respect_threshold() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 3.0),
        ];
        let graph = build_graph(&points, 1.5);

        assert!(graph.edge_count() > 0);
        for edge in graph.edges() {
            assert!(edge.weight <= 1.5);
            let expected = (points[edge.source] - points[edge.target]).norm();
            assert_eq!(edge.weight, expected);
        }

        let components = graph.connected_components();
        assert_eq!(components.count(), 2);
        assert_eq!(components.labels()[0], components.labels()[1]);
        assert_ne!(components.labels()[0], components.labels()[3]);
    }

    #[test]
    fn test_components_match_threshold_paths() {
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..5 {
            let points: Vec<Point3d> = (0..120)
                .map(|_| Point3d::new(rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0), rng.gen_range(0.0..4.0)))
                .collect();
            let threshold = 0.8 + 0.3 * trial as f64;

            let components = build_graph(&points, threshold).connected_components();
            let expected = brute_force_labels(&points, threshold);

            for i in 0..points.len() {
                for j in (i + 1)..points.len() {
                    assert_eq!(
                        components.labels()[i] == components.labels()[j],
                        expected[i] == expected[j],
                        "points {} and {} disagree at threshold {}",
                        i,
                        j,
                        threshold
                    );
                }
            }
        }
    }

    #[test]
    fn test_far_outlier_keeps_grid_connected() {
        for far in [1e4, 1e7] {
            let mut points: Vec<Point3d> = (0..30)
                .flat_map(|x| (0..30).map(move |y| Point3d::new(x as f64, y as f64, 0.0)))
                .collect();
            points.push(Point3d::new(far, far, far));

            let components = build_graph(&points, 1.05).connected_components();
            let expected = brute_force_labels(&points, 1.05);
            assert_eq!(components.count(), 2, "outlier at {}", far);

            let outlier = points.len() - 1;
            for i in 1..outlier {
                assert_eq!(components.labels()[i], components.labels()[0], "grid split with outlier at {}", far);
                assert_eq!(expected[i], expected[0]);
            }
            assert_ne!(components.labels()[outlier], components.labels()[0]);
        }
    }

    #[test]
    fn test_members_partition_vertices() {
        let points: Vec<Point3d> = (0..10).map(|i| Point3d::new(i as f64 * 2.0, 0.0, 0.0)).collect();
        let components = build_graph(&points, 2.5).connected_components();
        assert_eq!(components.count(), 1);

        let components = build_graph(&points, 1.0).connected_components();
        assert_eq!(components.count(), 10);
        let total: usize = components.members().iter().map(Vec::len).sum();
        assert_eq!(total, 10);
    }
}
