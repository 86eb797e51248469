//! Core data structures and traits for mvreg
//!
//! This crate provides the fundamental types shared by the registration
//! pipeline: point records with the noise sentinel, point cloud containers,
//! rigid transforms, the turntable reference axis and the (frame, view) key.

pub mod axis;
pub mod error;
pub mod key;
pub mod point;
pub mod point_cloud;
pub mod traits;
pub mod transform;

pub use axis::*;
pub use error::*;
pub use key::*;
pub use point::*;
pub use point_cloud::*;
pub use traits::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Isometry3, Matrix3, Matrix4, Point3, Vector3};

/// Point cloud of full point records, the unit every view is stored as
pub type RecordCloud = PointCloud<PointRecord>;
