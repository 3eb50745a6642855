//! Error types for job execution
//!
//! # Error Hierarchy
//!
//! ```text
//! OlapError
//! ├── StorageStall     - a stream produced nothing within the timeout (fatal)
//! ├── ShutdownTimeout  - workers or pullers did not stop in time (fatal)
//! ├── Decode           - the existence probe entry could not be parsed (fatal)
//! ├── StreamRead       - a stream's storage read failed, `fail` policy (fatal)
//! ├── Storage          - opening iterators / releasing the read context
//! ├── Config           - invalid executor configuration
//! ├── InvalidJob       - incomplete job definition
//! └── Join             - a pipeline task panicked or was cancelled
//! ```
//!
//! Failures of the vertex program itself are **not** represented here. They
//! are contained by the worker pool: the vertex's state is invalidated, the
//! failure is counted in [`RunStats`](crate::RunStats), and the job carries on.
//!
//! # Example
//!
//! ```rust
//! use olap_engine::OlapError;
//! use std::time::Duration;
//!
//! fn describe(err: &OlapError) -> &'static str {
//!     match err {
//!         OlapError::StorageStall { .. } => "storage stalled",
//!         OlapError::ShutdownTimeout { .. } => "teardown hung",
//!         _ => "other",
//!     }
//! }
//!
//! let err = OlapError::StorageStall { stream: 2, waited: Duration::from_secs(60) };
//! assert_eq!(describe(&err), "storage stalled");
//! assert!(err.is_fatal_timeout());
//! ```

use crate::config::ConfigError;
use olap_storage::{StorageError, VertexId};
use std::time::Duration;
use thiserror::Error;

/// Convenience result type using [`OlapError`]
pub type Result<T> = std::result::Result<T, OlapError>;

/// Errors that abort a whole job execution
#[derive(Error, Debug)]
pub enum OlapError {
    /// A stream delivered no data within the bounded wait and has not finished
    #[error("Timed out after {waited:?} waiting for data on stream {stream} - storage error likely")]
    StorageStall {
        /// Index of the stalled stream (0 is the existence probe)
        stream: usize,
        /// How long the executor waited
        waited: Duration,
    },

    /// A pipeline component did not stop within the bounded wait
    #[error("Timed out after {waited:?} waiting for {component} to stop")]
    ShutdownTimeout {
        /// The component that failed to stop
        component: &'static str,
        /// How long the executor waited
        waited: Duration,
    },

    /// The existence probe entry of a vertex could not be decoded
    #[error("Could not decode existence entry of vertex {vertex}: {source}")]
    Decode {
        /// The vertex whose probe entry failed to parse
        vertex: VertexId,
        /// Underlying decode failure
        #[source]
        source: StorageError,
    },

    /// A stream stopped because its storage read failed
    #[error("Stream {stream} failed while reading from storage: {source}")]
    StreamRead {
        /// Index of the failed stream
        stream: usize,
        /// Underlying read failure
        #[source]
        source: StorageError,
    },

    /// Storage error outside of stream reads
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid executor configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The job definition is incomplete
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A spawned pipeline task panicked or was cancelled
    #[error("Pipeline task failed: {0}")]
    Join(String),
}

impl OlapError {
    /// Whether this error came from one of the bounded waits
    pub fn is_fatal_timeout(&self) -> bool {
        matches!(
            self,
            OlapError::StorageStall { .. } | OlapError::ShutdownTimeout { .. }
        )
    }
}

impl From<tokio::task::JoinError> for OlapError {
    fn from(err: tokio::task::JoinError) -> Self {
        OlapError::Join(err.to_string())
    }
}
