//! Reference vertex id layout.
//!
//! ```text
//!  63            2+P        2     0
//!  ┌──────────────┬─────────┬─────┐
//!  │ 0 │  count   │partition│kind │
//!  └──────────────┴─────────┴─────┘
//! ```
//!
//! Ids are always non-negative, and keys are their big-endian bytes, so key
//! order and id order agree. Partition siblings share `count` and differ in
//! `partition`; the sibling in partition 0 is canonical.

use crate::error::{Result, StorageError};
use crate::traits::IdManager;
use crate::types::{VertexId, VertexKind};

const KIND_BITS: u32 = 2;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;

const TAG_NORMAL: u64 = 0;
const TAG_PARTITIONED: u64 = 1;
const TAG_HIDDEN: u64 = 2;

/// Default number of partition bits (16 partitions)
pub const DEFAULT_PARTITION_BITS: u32 = 4;

/// Largest supported partition bit width
pub const MAX_PARTITION_BITS: u32 = 16;

/// [`IdManager`] for the bit layout described in the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardIdManager {
    partition_bits: u32,
}

impl StandardIdManager {
    /// Create a manager with `partition_bits` bits of partition space.
    ///
    /// Widths above [`MAX_PARTITION_BITS`] are clamped.
    pub fn new(partition_bits: u32) -> Self {
        Self {
            partition_bits: partition_bits.min(MAX_PARTITION_BITS),
        }
    }

    /// Number of partitions addressable by this layout
    pub fn partition_count(&self) -> u32 {
        1 << self.partition_bits
    }

    /// Compose an id from its parts.
    ///
    /// `partition` is reduced modulo the partition count and `count` is
    /// truncated to the bits left over by the layout.
    pub fn vertex_id(&self, count: u64, partition: u32, kind: VertexKind) -> VertexId {
        let tag = match kind {
            VertexKind::Normal => TAG_NORMAL,
            VertexKind::Partitioned => TAG_PARTITIONED,
            VertexKind::Hidden => TAG_HIDDEN,
        };
        let count_bits = 63 - KIND_BITS - self.partition_bits;
        let count = count & ((1u64 << count_bits) - 1);
        let partition = u64::from(partition) & (u64::from(self.partition_count()) - 1);
        let raw = (count << (KIND_BITS + self.partition_bits)) | (partition << KIND_BITS) | tag;
        raw as VertexId
    }

    /// Id of an ordinary vertex
    pub fn normal(&self, count: u64) -> VertexId {
        self.vertex_id(count, 0, VertexKind::Normal)
    }

    /// Id of the piece of partitioned vertex `count` living in `partition`
    pub fn partitioned(&self, count: u64, partition: u32) -> VertexId {
        self.vertex_id(count, partition, VertexKind::Partitioned)
    }

    /// Id of a hidden vertex
    pub fn hidden(&self, count: u64) -> VertexId {
        self.vertex_id(count, 0, VertexKind::Hidden)
    }

    /// The logical counter of `id`
    pub fn count(&self, id: VertexId) -> u64 {
        (id as u64) >> (KIND_BITS + self.partition_bits)
    }

    /// The partition of `id`
    pub fn partition(&self, id: VertexId) -> u32 {
        (((id as u64) >> KIND_BITS) & (u64::from(self.partition_count()) - 1)) as u32
    }

    /// Storage key for `id`
    pub fn key_for(&self, id: VertexId) -> Vec<u8> {
        (id as u64).to_be_bytes().to_vec()
    }
}

impl Default for StandardIdManager {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_BITS)
    }
}

impl IdManager for StandardIdManager {
    fn key_id(&self, key: &[u8]) -> Result<VertexId> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| StorageError::decode(format!("vertex key must be 8 bytes, got {}", key.len())))?;
        let raw = u64::from_be_bytes(bytes);
        if raw > i64::MAX as u64 {
            return Err(StorageError::decode(format!("vertex key {:#x} has the sign bit set", raw)));
        }
        Ok(raw as VertexId)
    }

    fn kind(&self, id: VertexId) -> VertexKind {
        match (id as u64) & KIND_MASK {
            TAG_PARTITIONED => VertexKind::Partitioned,
            TAG_HIDDEN => VertexKind::Hidden,
            _ => VertexKind::Normal,
        }
    }

    fn canonical_id(&self, id: VertexId) -> VertexId {
        match self.kind(id) {
            VertexKind::Partitioned => self.partitioned(self.count(id), 0),
            _ => id,
        }
    }
}
