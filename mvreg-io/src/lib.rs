//! I/O operations for mvreg
//!
//! This crate reads and writes the files a scan project is made of: point
//! record clouds (PCD, with PLY export), per-view `transformation.txt`, the
//! per-frame `axis.txt` and raw `points.bxyzuv` scanner output.

pub mod axis_file;
pub mod bxyzuv;
pub mod error;
pub mod pcd;
pub mod ply;
pub mod transform_file;

pub use axis_file::{read_axis, write_axis, AXIS_FILE_NAME};
pub use bxyzuv::{parse_bxyzuv, read_bxyzuv, write_bxyzuv, ScanSample, BXYZUV_FILE_NAME};
pub use error::*;
pub use pcd::{PcdDataFormat, PcdReader, PcdWriteOptions, PcdWriter};
pub use ply::{PlyReader, PlyWriter};
pub use transform_file::{read_transform, write_transform, TRANSFORM_FILE_NAME};

use mvreg_core::{RecordCloud, Result};
use std::path::Path;

/// File name of a view's or frame's point cloud
pub const POINTS_FILE_NAME: &str = "points.pcd";

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Auto-detect format and read a point cloud
pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<RecordCloud> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("pcd") => PcdReader::read_point_cloud(path),
        Some("ply") => PlyReader::read_point_cloud(path),
        _ => Err(mvreg_core::Error::UnsupportedFormat(format!(
            "Unsupported point cloud format: {:?}",
            path.extension()
        ))),
    }
}

/// Auto-detect format and write a point cloud. PLY output skips noise records.
pub fn write_point_cloud<P: AsRef<Path>>(cloud: &RecordCloud, path: P) -> Result<()> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("pcd") => PcdWriter::write_point_cloud(cloud, path),
        Some("ply") => PlyWriter::write_point_cloud(cloud, path, None),
        _ => Err(mvreg_core::Error::UnsupportedFormat(format!(
            "Unsupported point cloud format: {:?}",
            path.extension()
        ))),
    }
}
