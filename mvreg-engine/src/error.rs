//! Error types for task dispatch

use crate::jobs::JobCategory;
use thiserror::Error;

/// Errors raised when a batch cannot be started
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("a {0} batch is already running")]
    CategoryBusy(JobCategory),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Core(#[from] mvreg_core::Error),
}

impl From<DispatchError> for mvreg_core::Error {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Core(e) => e,
            other => mvreg_core::Error::Algorithm(other.to_string()),
        }
    }
}
