#![forbid(unsafe_code)]

//! Error type shared by the collection types.

use fbind_core::{CxError, WorkerStopped};

/// Boxed error produced by host page loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Collection errors.
///
/// The first four variants are programmer errors: they are logged at `warn`
/// when they occur and the collection is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("index {index} out of bounds for collection of size {size}")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("item not found in collection")]
    ItemNotFound,

    #[error("list is managed by its owner and rejects external mutation")]
    ManagedList,

    #[error("collection mutated from inside one of its own subscribers")]
    ReentrantMutation,

    #[error("page load failed: {0}")]
    Load(#[source] BoxError),

    #[error("page request went stale {attempts} times in a row")]
    StaleRequest { attempts: usize },

    #[error("load cancelled")]
    Cancelled,

    #[error("collection worker has stopped")]
    WorkerStopped,

    #[error("failed to start collection worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl Error {
    /// Whether this error signals misuse of the API rather than a runtime failure.
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfBounds { .. }
                | Self::ItemNotFound
                | Self::ManagedList
                | Self::ReentrantMutation
        )
    }
}

impl From<CxError> for Error {
    fn from(_: CxError) -> Self {
        Self::Cancelled
    }
}

impl From<WorkerStopped> for Error {
    fn from(_: WorkerStopped) -> Self {
        Self::WorkerStopped
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Error>;
