//! # olap-engine - Single-node vertex-centric OLAP executor
//!
//! Runs a user-supplied [`VertexProgram`] once for every live vertex of a
//! graph stored in a partitioned key-column-value edge store, and collects a
//! per-vertex accumulator state.
//!
//! ## Pipeline
//!
//! ```text
//!   storage ──▶ puller 0 (existence probe) ──▶ mpsc ─┐
//!   storage ──▶ puller 1 (query 1)         ──▶ mpsc ─┼─▶ Synchronizer ──▶ WorkerPool ──▶ VertexProgram
//!   storage ──▶ puller N (query N)         ──▶ mpsc ─┘   (sorted merge-join)              │
//!                                                                                         ▼
//!                                                                                    ResultStore
//! ```
//!
//! - One puller per query reads a sorted key iterator on a blocking thread.
//! - The synchronizer joins the streams on vertex id, skips deleted vertices,
//!   and builds one [`VertexView`] per live vertex.
//! - The worker pool runs the program with bounded parallelism; a vertex
//!   whose program fails has its state invalidated and the job continues.
//! - Once everything stopped, states of partitioned vertices are merged.
//!
//! Every blocking wait is bounded by [`ExecutorConfig::timeout`]; exceeding
//! it fails the whole job with [`OlapError::StorageStall`] or
//! [`OlapError::ShutdownTimeout`].
//!
//! ## Quick start
//!
//! See [`OlapJobBuilder`] for a complete example.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
mod pool;
mod puller;
pub mod result;
pub mod state;
mod synchronizer;
pub mod vertex;

pub use config::{ConfigError, ExecutorConfig, StreamFailurePolicy};
pub use error::{OlapError, Result};
pub use executor::{OlapJobBuilder, OlapJobHandle};
pub use job::{program_fn, FnProgram, VertexProgram};
pub use result::{OlapResult, ResultStore, RunStats};
pub use state::{StateInitializer, VertexState};
pub use vertex::{NeighborView, VertexView};
