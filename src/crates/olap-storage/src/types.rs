//! Value types shared between the storage backend and the executor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical vertex identifier.
///
/// The bit layout (kind, partition) is owned by an [`IdManager`](crate::IdManager);
/// the executor only relies on ordering and equality.
pub type VertexId = i64;

/// Type id of the system property whose presence marks a vertex as live.
pub const VERTEX_EXISTS_TYPE: u64 = 1;

/// First type id available to user-defined edge labels and property keys.
pub const FIRST_USER_TYPE: u64 = 64;

/// A single column/value pair stored under a vertex key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Column bytes; entries under one key are ordered by column.
    pub column: Vec<u8>,
    /// Value bytes
    pub value: Vec<u8>,
}

impl Entry {
    /// Create a new entry
    pub fn new(column: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Ordered entries of one vertex key that fall inside a [`SliceQuery`].
pub type EntryList = Vec<Entry>;

/// One key produced by a [`KeyIterator`](crate::KeyIterator) together with its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Raw storage key
    pub key: Vec<u8>,
    /// Entries of this key matching the iterator's slice
    pub entries: EntryList,
}

/// A column range `[start, end)` with an optional result limit.
///
/// Used as the query descriptor: pre-fetched entry lists are keyed by the
/// slice that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceQuery {
    start: Vec<u8>,
    end: Vec<u8>,
    limit: Option<usize>,
}

impl SliceQuery {
    /// Create a slice over `[start, end)` without a limit
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            limit: None,
        }
    }

    /// Restrict the number of entries returned per key
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The reserved one-entry probe used to detect whether a vertex is live.
    ///
    /// System types sort first, so the single returned entry is the
    /// existence marker for every live vertex.
    pub fn existence_probe() -> Self {
        Self::new(vec![0u8; 4], vec![0xFFu8; 4]).with_limit(1)
    }

    /// All columns belonging to one relation type.
    pub fn relation_type(type_id: u64) -> Self {
        let end = match type_id.checked_add(1) {
            Some(next) => next.to_be_bytes().to_vec(),
            None => vec![0xFFu8; 9],
        };
        Self::new(type_id.to_be_bytes().to_vec(), end)
    }

    /// Inclusive lower bound
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> &[u8] {
        &self.end
    }

    /// Maximum entries per key, if any
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Whether `column` falls inside this slice
    pub fn contains(&self, column: &[u8]) -> bool {
        column >= self.start.as_slice() && column < self.end.as_slice()
    }
}

impl fmt::Display for SliceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02x?}, {:02x?})", self.start, self.end)?;
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        Ok(())
    }
}

/// Classification of a physical vertex id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexKind {
    /// Regular vertex stored under a single key
    Normal,
    /// One physical piece of a vertex split across partitions
    Partitioned,
    /// Internal vertex never exposed to vertex programs
    Hidden,
}

/// Direction of an edge relative to the vertex that stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edge points away from the owning vertex
    Out,
    /// Edge points at the owning vertex
    In,
}

/// Payload of a decoded relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Property stored on the vertex itself
    Property {
        /// Raw property value
        value: Vec<u8>,
    },
    /// Edge to another vertex
    Edge {
        /// Direction relative to the owning vertex
        direction: Direction,
        /// The vertex at the other end
        other: VertexId,
        /// Raw edge payload
        value: Vec<u8>,
    },
}

/// A typed relation decoded from a stored [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRecord {
    /// Relation type id (edge label or property key)
    pub type_id: u64,
    /// Decoded payload
    pub kind: RelationKind,
}

impl RelationRecord {
    /// Whether this is the reserved vertex-exists marker
    pub fn is_vertex_exists(&self) -> bool {
        self.type_id == VERTEX_EXISTS_TYPE
    }

    /// The other endpoint when this relation is an edge
    pub fn other_vertex(&self) -> Option<VertexId> {
        match &self.kind {
            RelationKind::Edge { other, .. } => Some(*other),
            RelationKind::Property { .. } => None,
        }
    }

    /// Raw value bytes of either a property or an edge
    pub fn value(&self) -> &[u8] {
        match &self.kind {
            RelationKind::Property { value } => value,
            RelationKind::Edge { value, .. } => value,
        }
    }
}
