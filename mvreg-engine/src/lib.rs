//! Scan project engine for mvreg
//!
//! Ties the algorithms and file formats together around a project on disk:
//! [`DirectoryLayout`] maps frames and views to folders, [`CloudStore`]
//! caches the clouds and tracks which are shown, [`Registrator`] drives ICP,
//! LUM and axis refinement for a frame, and [`TaskDispatcher`] runs batches
//! of [`Job`]s on a worker pool.

pub mod config;
pub mod dispatcher;
pub mod display_queue;
pub mod error;
pub mod jobs;
pub mod layout;
pub mod notify;
pub mod pool;
pub mod registrator;
pub mod store;
pub mod view_cloud;

pub use config::{
    DenoiseConfig, DispatcherConfig, EngineConfig, ExtractionConfig, FrameRangeConfig, GenerationConfig,
    RegistrationConfig,
};
pub use dispatcher::{BatchEvent, BatchHandle, BatchSummary, TaskDispatcher};
pub use display_queue::DisplayQueue;
pub use error::DispatchError;
pub use jobs::{
    colorize_points, run_job, Colorizer, ExternalConverter, Job, JobCategory, JobContext, PointsGenerator, Snapshot,
};
pub use layout::{frame_dir_name, DirectoryLayout, RootKind};
pub use notify::{ChannelSink, LogSink, Notification, NotificationSink};
pub use pool::WorkerPool;
pub use registrator::{ErrorOverlay, Registrator};
pub use store::{CloudHandle, CloudStore, NavigationType};
pub use view_cloud::ViewCloud;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the data if a panicking job poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
