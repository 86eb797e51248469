//! File-level round trips through the public mvreg-io API

use approx::assert_relative_eq;
use mvreg_core::{Point3d, PointRecord, RecordCloud};
use mvreg_io::{
    read_point_cloud, write_point_cloud, PcdDataFormat, PcdReader, PcdWriteOptions, PcdWriter, POINTS_FILE_NAME,
};

fn ring(count: usize) -> RecordCloud {
    (0..count)
        .map(|i| {
            let angle = i as f64 / count as f64 * std::f64::consts::TAU;
            let position = Point3d::new(10.0 * angle.cos(), 0.5 * i as f64, 10.0 * angle.sin());
            PointRecord::new(position, -position.coords.normalize(), [i as u8, 255 - i as u8, 7])
        })
        .collect()
}

#[test]
fn test_pcd_file_roundtrip_binary_and_ascii() {
    let dir = tempfile::tempdir().unwrap();
    let cloud = ring(64);

    let binary = dir.path().join(POINTS_FILE_NAME);
    write_point_cloud(&cloud, &binary).unwrap();
    assert_eq!(read_point_cloud(&binary).unwrap(), cloud);

    let ascii = dir.path().join("ascii.pcd");
    let options = PcdWriteOptions {
        data_format: PcdDataFormat::Ascii,
        ..PcdWriteOptions::default()
    };
    PcdWriter::write_point_cloud_with_options(&cloud, &ascii, &options).unwrap();
    assert_eq!(PcdReader::read_point_cloud(&ascii).unwrap(), cloud);
}

#[test]
fn test_pcd_keeps_noise_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(POINTS_FILE_NAME);
    let mut cloud = ring(8);
    cloud.mark_noise(3);

    write_point_cloud(&cloud, &path).unwrap();
    let read = read_point_cloud(&path).unwrap();

    assert_eq!(read.len(), 8);
    assert!(read.is_noise(3));
}

#[test]
fn test_ply_export_drops_noise() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.ply");
    let mut cloud = ring(10);
    cloud.mark_noise(0);

    write_point_cloud(&cloud, &path).unwrap();
    let read = read_point_cloud(&path).unwrap();

    assert_eq!(read.len(), 9);
    assert_relative_eq!(read[0].normal, cloud[1].normal, epsilon = 1e-6);
    assert_eq!(read[0].color, cloud[1].color);
}

#[test]
fn test_unknown_extension_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(write_point_cloud(&ring(3), dir.path().join("cloud.xyz")).is_err());
    assert!(read_point_cloud(dir.path().join("cloud.obj")).is_err());
}
