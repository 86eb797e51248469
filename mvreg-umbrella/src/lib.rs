//! # mvreg
//!
//! Registration of turntable point cloud scans.
//!
//! This is the umbrella crate that provides convenient access to all mvreg
//! functionality. Use the individual crates for more granular control over
//! dependencies.
//!
//! ## Features
//!
//! - **Core**: keys, point records, transforms and the turntable axis
//! - **Algorithms**: proximity graphs, denoising, ICP, LUM and axis refinement
//! - **I/O**: PCD and PLY clouds, transform and axis files, raw scanner output
//! - **Engine**: project layout, cloud cache, registration driver and job batches
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mvreg::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> mvreg::Result<()> {
//! let config = EngineConfig::default();
//! let store = Arc::new(CloudStore::open("scan", config.dispatcher.cache_threshold)?);
//! let registrator = Registrator::new(Arc::clone(&store), &config);
//! registrator.registration_lum(0, 10, 100, 4.0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: algorithms, io and engine
//! - `algorithms`: point cloud processing algorithms
//! - `io`: file format support
//! - `engine`: scan project engine (pulls in algorithms and io)
//! - `all`: everything

// Re-export core functionality
pub use mvreg_core::*;

#[cfg(feature = "algorithms")]
pub use mvreg_algorithms as algorithms;

#[cfg(feature = "io")]
pub use mvreg_io as io;

#[cfg(feature = "engine")]
pub use mvreg_engine as engine;

/// Convenient imports for common use cases
pub mod prelude {
    pub use mvreg_core::*;

    #[cfg(feature = "algorithms")]
    pub use mvreg_algorithms::*;

    #[cfg(feature = "io")]
    pub use mvreg_io::*;

    #[cfg(feature = "engine")]
    pub use mvreg_engine::*;
}
