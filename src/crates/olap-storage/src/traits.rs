//! Collaborator contracts consumed by the executor.
//!
//! The executor never reads storage directly. It needs four things from the
//! backend, each expressed as a trait here:
//!
//! ```text
//! StoreTransaction ──edge_store_keys(slice)──▶ KeyIterator   (ordered keys + entries)
//! IdManager        ──key_id / kind / canonical_id            (vertex id classification)
//! RelationReader   ──parse_relation(entry)──▶ RelationRecord (existence check, adjacency)
//! ```
//!
//! All methods are blocking. Iterators are driven from dedicated blocking
//! threads, so implementations are free to perform synchronous I/O.

use crate::error::Result;
use crate::types::{Entry, KeyRecord, RelationRecord, SliceQuery, VertexId, VertexKind};

/// Ordered iteration over the keys of the edge store.
///
/// Keys are produced in ascending order; each key carries the entries that
/// match the slice the iterator was opened with.
pub trait KeyIterator: Send {
    /// Advance to the next key, `Ok(None)` once the iterator is drained.
    fn next_key(&mut self) -> Result<Option<KeyRecord>>;

    /// Release the iterator. Safe to call once on every exit path.
    fn close(&mut self) -> Result<()>;
}

/// Read context that hands out key iterators.
pub trait StoreTransaction: Send + Sync {
    /// Open an iterator over all keys having at least one entry in `query`.
    fn edge_store_keys(&self, query: &SliceQuery) -> Result<Box<dyn KeyIterator>>;

    /// Release the read context.
    fn rollback(&self) -> Result<()>;
}

/// Maps storage keys to vertex ids and classifies them.
pub trait IdManager: Send + Sync {
    /// Decode the vertex id stored in `key`.
    fn key_id(&self, key: &[u8]) -> Result<VertexId>;

    /// Classify a vertex id.
    fn kind(&self, id: VertexId) -> VertexKind;

    /// The representative id shared by all partition siblings of `id`.
    ///
    /// Returns `id` unchanged for non-partitioned vertices.
    fn canonical_id(&self, id: VertexId) -> VertexId;

    /// Whether `id` is hidden from vertex programs
    fn is_hidden(&self, id: VertexId) -> bool {
        self.kind(id) == VertexKind::Hidden
    }

    /// Whether `id` is one piece of a partitioned vertex
    fn is_partitioned(&self, id: VertexId) -> bool {
        self.kind(id) == VertexKind::Partitioned
    }
}

/// Decodes stored entries into typed relations.
pub trait RelationReader: Send + Sync {
    /// Parse one entry stored under `vertex`.
    fn parse_relation(&self, vertex: VertexId, entry: &Entry) -> Result<RelationRecord>;
}
