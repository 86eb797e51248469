//! Scan project fixtures shared by the engine integration tests

#![allow(dead_code)]

use mvreg_core::{Point3d, PointRecord, RecordCloud, ReferenceAxis, Transform3D, Vector3d};
use mvreg_engine::{frame_dir_name, CloudStore, EngineConfig, JobContext, Registrator};
use mvreg_io::{write_axis, PcdWriter, AXIS_FILE_NAME, POINTS_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Three orthogonal 2x2 faces meeting at (1, 1, 1), sampled every 0.1
pub fn cube_corner() -> Vec<Point3d> {
    let steps = 21;
    let mut points = Vec::new();
    for i in 0..steps {
        for j in 0..steps {
            let a = 1.0 + 0.1 * i as f64;
            let b = 1.0 + 0.1 * j as f64;
            points.push(Point3d::new(1.0, a, b));
            if i > 0 {
                points.push(Point3d::new(a, 1.0, b));
            }
            if i > 0 && j > 0 {
                points.push(Point3d::new(a, b, 1.0));
            }
        }
    }
    points
}

/// Vertical axis through the origin; the object sits above the cut plane
pub fn turntable_axis() -> ReferenceAxis {
    ReferenceAxis::new(Point3d::origin(), Vector3d::y()).unwrap()
}

pub fn records(points: &[Point3d]) -> RecordCloud {
    points
        .iter()
        .map(|p| PointRecord::new(*p, Vector3d::z(), [200, 180, 160]))
        .collect()
}

pub fn frame_folder(root: &Path, frame: u32) -> PathBuf {
    root.join("points").join(frame_dir_name(frame))
}

pub fn view_path(root: &Path, frame: u32, view: u32) -> PathBuf {
    frame_folder(root, frame)
        .join(format!("view_{:02}", view))
        .join(POINTS_FILE_NAME)
}

pub fn write_view(root: &Path, frame: u32, view: u32, points: &[Point3d]) {
    let path = view_path(root, frame, view);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    PcdWriter::write_point_cloud(&records(points), &path).unwrap();
}

pub fn write_frame_axis(root: &Path, frame: u32, axis: &ReferenceAxis) {
    let folder = frame_folder(root, frame);
    fs::create_dir_all(&folder).unwrap();
    write_axis(folder.join(AXIS_FILE_NAME), axis).unwrap();
}

/// Write `view_count` views of `object` as the scanner would see them: view
/// `v` is turned by `2πv/n` about `axis` after applying `perturbation(v)`.
pub fn write_turntable_frame(
    root: &Path,
    frame: u32,
    view_count: u32,
    object: &[Point3d],
    axis: &ReferenceAxis,
    perturbation: impl Fn(u32) -> Transform3D,
) {
    write_frame_axis(root, frame, axis);
    for view in 0..view_count {
        let scan = axis
            .rotation_matrix(-ReferenceAxis::expected_angle(view, view_count))
            .compose(perturbation(view));
        let points: Vec<Point3d> = object.iter().map(|p| scan.transform_point(p)).collect();
        write_view(root, frame, view, &points);
    }
}

pub struct Engine {
    pub store: Arc<CloudStore>,
    pub registrator: Arc<Registrator>,
    pub context: JobContext,
}

pub fn engine(root: &Path, config: EngineConfig) -> Engine {
    let store = Arc::new(CloudStore::open(root, config.dispatcher.cache_threshold).unwrap());
    let registrator = Arc::new(Registrator::new(Arc::clone(&store), &config));
    let context = JobContext::new(Arc::clone(&store), Arc::clone(&registrator), config);
    Engine {
        store,
        registrator,
        context,
    }
}
