//! One scanned view (or merged frame) as loaded from disk

use log::{debug, warn};
use mvreg_algorithms::{
    component_noise, denoise_by_density, extract_by_plane, graph_from_triangulation, valid_indices, Triangulation,
    WeightedGraph,
};
use mvreg_core::{CloudKey, Point3d, PointRecord, RecordCloud, ReferenceAxis, Result, Transform3D};
use mvreg_io::{read_transform, write_transform, PcdReader, PcdWriter, PlyWriter, TRANSFORM_FILE_NAME};
use std::path::{Path, PathBuf};

/// Proximity graph over the non-noise records of a cloud
#[derive(Debug, Clone)]
struct GraphCache {
    /// Record index of every graph vertex
    vertices: Vec<usize>,
    triangulation: Triangulation,
    threshold: f64,
    graph: WeightedGraph,
}

/// Point records of one `(frame, view)` with their registration state.
///
/// Records keep their buffer position until `remove_noise`; the transform is
/// applied on read through the `transformed_*` accessors and never baked into
/// the records.
#[derive(Debug, Clone)]
pub struct ViewCloud {
    key: CloudKey,
    path: PathBuf,
    records: RecordCloud,
    transform: Transform3D,
    registered: bool,
    graph: Option<GraphCache>,
}

impl ViewCloud {
    /// Read `path` and the `transformation.txt` next to it
    pub fn open<P: AsRef<Path>>(key: CloudKey, path: P) -> Result<Self> {
        let mut cloud = Self::from_records(key, path, RecordCloud::new());
        cloud.load()?;
        Ok(cloud)
    }

    /// Cloud backed by `path` without touching the disk
    pub fn from_records<P: AsRef<Path>>(key: CloudKey, path: P, records: RecordCloud) -> Self {
        Self {
            key,
            path: path.as_ref().to_path_buf(),
            records,
            transform: Transform3D::identity(),
            registered: key.is_reference(),
            graph: None,
        }
    }

    fn load(&mut self) -> Result<()> {
        self.records = PcdReader::read_point_cloud(&self.path)?;
        self.transform = read_transform(self.transform_path())?.unwrap_or_else(Transform3D::identity);
        self.registered = self.key.is_reference() || !self.transform.is_identity();
        self.graph = None;
        debug!("loaded {} ({} points) from {}", self.key, self.records.len(), self.path.display());
        Ok(())
    }

    /// Drop in-memory state and read the files again
    pub fn reload(&mut self) -> Result<()> {
        self.load()
    }

    pub fn key(&self) -> CloudKey {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &RecordCloud {
        &self.records
    }

    /// Mutable records; the cached graph is dropped since the point set may change
    pub fn records_mut(&mut self) -> &mut RecordCloud {
        self.graph = None;
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn transform(&self) -> Transform3D {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Transform3D) {
        self.transform = transform;
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Mark the registration state; registered non-reference views persist
    /// their transform next to the point file
    pub fn set_registered(&mut self, registered: bool) -> Result<()> {
        self.registered = registered;
        if registered && !self.key.is_reference() {
            write_transform(self.transform_path(), &self.transform)?;
        }
        Ok(())
    }

    pub fn transform_path(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from(TRANSFORM_FILE_NAME), |dir| dir.join(TRANSFORM_FILE_NAME))
    }

    /// Give an untouched view its nominal turntable pose.
    ///
    /// Views that already carry a transform and the reference view are left
    /// alone.
    pub fn init_rotation(&mut self, axis: &ReferenceAxis, view_count: u32) {
        if !self.transform.is_identity() {
            return;
        }
        match self.key.view {
            Some(view) if view != 0 => self.transform = axis.expected_rotation(view, view_count),
            _ => {}
        }
    }

    /// Non-noise positions mapped through the current transform
    pub fn transformed_positions(&self) -> Vec<Point3d> {
        self.records
            .iter()
            .filter(|p| !p.is_noise())
            .map(|p| self.transform.transform_point(&p.position))
            .collect()
    }

    /// Non-noise records mapped through the current transform
    pub fn transformed_records(&self) -> Vec<PointRecord> {
        self.records.transformed_records(&self.transform)
    }

    /// Proximity graph over the non-noise points at `threshold`.
    ///
    /// The triangulation is built once and kept until the records change; the
    /// graph is only re-filtered when the threshold moves or it came out empty.
    pub fn point_graph(&mut self, threshold: f64) -> &WeightedGraph {
        let cache = match self.graph.take() {
            Some(mut cache) => {
                if cache.threshold != threshold || cache.graph.edge_count() == 0 {
                    let positions = self.positions_of(&cache.vertices);
                    cache.graph = graph_from_triangulation(&positions, &cache.triangulation, threshold);
                    cache.threshold = threshold;
                }
                cache
            }
            None => {
                let vertices = valid_indices(&self.records);
                let positions = self.positions_of(&vertices);
                let triangulation = Triangulation::new(&positions);
                let graph = graph_from_triangulation(&positions, &triangulation, threshold);
                GraphCache {
                    vertices,
                    triangulation,
                    threshold,
                    graph,
                }
            }
        };
        &self.graph.insert(cache).graph
    }

    fn positions_of(&self, indices: &[usize]) -> Vec<Point3d> {
        indices.iter().map(|&i| self.records[i].position).collect()
    }

    /// Drop the cached triangulation and graph
    pub fn invalidate_graph(&mut self) {
        self.graph = None;
    }

    /// Mark clusters smaller than `segment_threshold` points as noise, with
    /// points linked by triangulation edges up to `triangle_length`.
    /// Returns the number of records marked.
    pub fn denoise(&mut self, segment_threshold: usize, triangle_length: f64) -> usize {
        self.point_graph(triangle_length);
        let Some(cache) = self.graph.take() else {
            return 0;
        };

        let noise = component_noise(&cache.graph, segment_threshold);
        for &vertex in &noise {
            self.records.mark_noise(cache.vertices[vertex]);
        }
        debug!("{}: {} points in clusters below {}", self.key, noise.len(), segment_threshold);
        noise.len()
    }

    /// Density based outlier marking, see `mvreg_algorithms::density_noise`
    pub fn denoise_by_density(&mut self, neighbors: usize, weight: f64) -> usize {
        self.graph = None;
        denoise_by_density(&mut self.records, neighbors, weight)
    }

    /// Mark points on or behind the turntable plane as noise
    pub fn extract_by_plane(&mut self, axis: &ReferenceAxis) -> usize {
        let marked = extract_by_plane(&mut self.records, axis);
        if marked > 0 {
            self.graph = None;
        }
        marked
    }

    /// Compact the buffer, dropping noise records
    pub fn remove_noise(&mut self) -> usize {
        let removed = self.records.remove_noise();
        if removed > 0 {
            self.graph = None;
        }
        removed
    }

    /// Write the records back to the backing file
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)
    }

    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        PcdWriter::write_point_cloud(&self.records, path)
    }

    /// Export the registered, non-noise points as PLY, optionally in the axis frame
    pub fn export_ply<P: AsRef<Path>>(&self, path: P, axis: Option<&ReferenceAxis>) -> Result<()> {
        let registered: RecordCloud = self.transformed_records().into_iter().collect();
        let frame = axis.map(|a| a.to_axis_frame());
        if registered.is_empty() {
            warn!("{}: exporting an empty cloud", self.key);
        }
        PlyWriter::write_point_cloud(&registered, path, frame.as_ref())
    }
}
