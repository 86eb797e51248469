//! Point types and related functionality

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A scanned point with normal and color.
///
/// A position of exactly `(0, 0, 0)` marks the record as noise. Noise records
/// keep their slot in the buffer so indices stay stable until the cloud is
/// compacted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub position: Point3d,
    pub normal: Vector3d,
    pub color: [u8; 3],
}

impl PointRecord {
    pub fn new(position: Point3d, normal: Vector3d, color: [u8; 3]) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }

    /// Record at `position` with the default normal and color
    pub fn at(position: Point3d) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Whether the record carries the noise sentinel
    pub fn is_noise(&self) -> bool {
        self.position.x == 0.0 && self.position.y == 0.0 && self.position.z == 0.0
    }

    /// Overwrite the position with the noise sentinel
    pub fn mark_noise(&mut self) {
        self.position = Point3d::origin();
    }

    /// Color packed as `0x00RRGGBB`, the layout of the PCD `rgb` field
    pub fn packed_rgb(&self) -> u32 {
        let [r, g, b] = self.color;
        (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
    }

    /// Unpack a `0x00RRGGBB` color
    pub fn unpack_rgb(packed: u32) -> [u8; 3] {
        [
            ((packed >> 16) & 0xff) as u8,
            ((packed >> 8) & 0xff) as u8,
            (packed & 0xff) as u8,
        ]
    }
}

impl Default for PointRecord {
    fn default() -> Self {
        Self {
            position: Point3d::origin(),
            normal: Vector3d::new(0.0, 0.0, 1.0),
            color: [255, 255, 255],
        }
    }
}

impl From<PointRecord> for Point3d {
    fn from(record: PointRecord) -> Self {
        record.position
    }
}
