//! # olap-storage - Storage contracts for vertex-centric OLAP jobs
//!
//! The executor in `olap-engine` reads a graph out of a partitioned
//! key-column-value edge store. This crate defines the narrow contract it
//! needs from that store and ships reference implementations for tests,
//! benchmarks and the CLI.
//!
//! ## Contracts
//!
//! - [`StoreTransaction`] - read context handing out ordered [`KeyIterator`]s per [`SliceQuery`]
//! - [`IdManager`] - key → [`VertexId`] decoding and [`VertexKind`] classification
//! - [`RelationReader`] - decoding an [`Entry`] into a [`RelationRecord`]
//!
//! ## Reference implementations
//!
//! - [`InMemoryEdgeStore`] / [`InMemoryTransaction`] - snapshot-isolated sorted table with fault injection
//! - [`StandardIdManager`] - kind/partition/count bit layout
//! - [`StandardRelationReader`] - property and edge column codec
//!
//! ## Data layout
//!
//! ```text
//! key (vertex id, BE)      columns (sorted)
//! ────────────────────     ─────────────────────────────────────────────
//! 0000_0000_0000_0280  →   [type 1]            exists marker
//!                          [type 64|out|0x2c0] edge to vertex 11
//!                          [type 70]           property value
//! ```
//!
//! Because system types sort first, a one-entry slice over the low type range
//! (see [`SliceQuery::existence_probe`]) returns the existence marker of every
//! live vertex; a vertex whose first entry is anything else has been deleted.

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod ids;
pub mod memory;
pub mod traits;
pub mod types;

pub use codec::{edge_column, property_column, vertex_exists_entry, StandardRelationReader};
pub use error::{Result, StorageError};
pub use ids::{StandardIdManager, DEFAULT_PARTITION_BITS, MAX_PARTITION_BITS};
pub use memory::{InMemoryEdgeStore, InMemoryTransaction};
pub use traits::{IdManager, KeyIterator, RelationReader, StoreTransaction};
pub use types::{
    Direction, Entry, EntryList, KeyRecord, RelationKind, RelationRecord, SliceQuery, VertexId,
    VertexKind, FIRST_USER_TYPE, VERTEX_EXISTS_TYPE,
};
