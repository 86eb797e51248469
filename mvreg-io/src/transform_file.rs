//! `transformation.txt`: a view's rigid transform next to its point file
//!
//! Four lines of four numbers; line `i` holds row `i` of the column-vector
//! matrix. Values are written in shortest round-trip form so a save/load
//! cycle reproduces the matrix bit for bit.

use crate::error::IoError;
use mvreg_core::{Result, Transform3D};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const TRANSFORM_FILE_NAME: &str = "transformation.txt";

/// Render `transform` in file form
pub fn format_transform(transform: &Transform3D) -> String {
    let mut text = String::new();
    for row in transform.rows() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        text.push_str(&line.join(" "));
        text.push('\n');
    }
    text
}

/// Parse the file form; expects exactly 16 numbers
pub fn parse_transform(text: &str) -> Result<Transform3D> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| IoError::parse(format!("invalid transform value: {}", token)))
        })
        .collect::<std::result::Result<Vec<f64>, IoError>>()?;

    if values.len() != 16 {
        return Err(IoError::parse(format!("transform needs 16 values, found {}", values.len())).into());
    }

    let mut rows = [[0.0; 4]; 4];
    for (i, value) in values.into_iter().enumerate() {
        rows[i / 4][i % 4] = value;
    }
    Ok(Transform3D::from_rows(&rows))
}

pub fn write_transform<P: AsRef<Path>>(path: P, transform: &Transform3D) -> Result<()> {
    fs::write(path, format_transform(transform))?;
    Ok(())
}

/// Read a transform file; a missing file is `None`
pub fn read_transform<P: AsRef<Path>>(path: P) -> Result<Option<Transform3D>> {
    match fs::read_to_string(path) {
        Ok(text) => parse_transform(&text).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvreg_core::{Point3d, Vector3d};

    #[test]
    fn test_save_load_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSFORM_FILE_NAME);
        let transform = Transform3D::rotation_about_axis(
            &Point3d::new(0.1, -3.7, 12.25),
            &Vector3d::new(0.3, -1.0, 0.07),
            -1.2345678901234567,
        );

        write_transform(&path, &transform).unwrap();
        let loaded = read_transform(&path).unwrap().unwrap();

        assert_eq!(loaded, transform);
    }

    #[test]
    fn test_rows_are_matrix_rows() {
        let transform = Transform3D::translation(Vector3d::new(1.0, 2.0, 3.0));
        let text = format_transform(&transform);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1 0 0 1");
        assert_eq!(lines[2], "0 0 1 3");
        assert_eq!(lines[3], "0 0 0 1");
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_transform(dir.path().join("absent.txt")).unwrap().is_none());
    }

    #[test]
    fn test_short_file_rejected() {
        assert!(parse_transform("1 0 0 0\n0 1 0 0\n").is_err());
        assert!(parse_transform("1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 x").is_err());
    }
}
