//! `axis.txt`: the turntable axis of a frame
//!
//! Two lines of three numbers: the pivot point, then the unit axis normal.

use crate::error::IoError;
use mvreg_core::{Point3d, ReferenceAxis, Result, Vector3d};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const AXIS_FILE_NAME: &str = "axis.txt";

pub fn format_axis(axis: &ReferenceAxis) -> String {
    let p = axis.pivot_point();
    let n = axis.axis_normal();
    format!("{} {} {}\n{} {} {}\n", p.x, p.y, p.z, n.x, n.y, n.z)
}

fn parse_triple(line: Option<&str>, what: &str) -> Result<[f64; 3]> {
    let line = line.ok_or_else(|| IoError::parse(format!("axis file is missing the {} line", what)))?;
    let values: Vec<f64> = line
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| IoError::parse(format!("invalid {} value: {}", what, token)))
        })
        .collect::<std::result::Result<_, _>>()?;
    match values.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(IoError::parse(format!("{} line needs 3 values, found {}", what, values.len())).into()),
    }
}

pub fn parse_axis(text: &str) -> Result<ReferenceAxis> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let [px, py, pz] = parse_triple(lines.next(), "pivot")?;
    let [nx, ny, nz] = parse_triple(lines.next(), "normal")?;
    ReferenceAxis::new(Point3d::new(px, py, pz), Vector3d::new(nx, ny, nz))
}

pub fn write_axis<P: AsRef<Path>>(path: P, axis: &ReferenceAxis) -> Result<()> {
    fs::write(path, format_axis(axis))?;
    Ok(())
}

/// Read an axis file; a missing file is `None`
pub fn read_axis<P: AsRef<Path>>(path: P) -> Result<Option<ReferenceAxis>> {
    match fs::read_to_string(path) {
        Ok(text) => parse_axis(&text).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
