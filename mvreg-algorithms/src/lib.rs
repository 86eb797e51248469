//! # mvreg Algorithms
//!
//! Geometry and registration algorithms behind the multi-view pipeline.
//!
//! This crate provides the spatial index, an incremental 3D Delaunay
//! triangulation and the proximity graph built from it, the component and
//! density denoisers, reciprocal correspondences, point-to-point ICP, Lu–Milios
//! global relaxation and the turntable axis solver.

pub mod axis_refinement;
pub mod color_map;
pub mod correspondence;
pub mod denoise;
pub mod lum;
pub mod nearest_neighbor;
pub mod point_graph;
pub mod registration;
pub mod triangulation;

// Re-export commonly used items
pub use axis_refinement::*;
pub use color_map::*;
pub use correspondence::*;
pub use denoise::*;
pub use lum::*;
pub use nearest_neighbor::*;
pub use point_graph::*;
pub use registration::*;
pub use triangulation::*;
