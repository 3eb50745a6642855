//! Column encoding used by the in-memory backend.
//!
//! - property column: `type_id: u64 BE` (8 bytes)
//! - edge column: `type_id: u64 BE | direction: u8 | other: i64 BE` (17 bytes)
//!
//! Values are stored verbatim.

use crate::error::{Result, StorageError};
use crate::traits::RelationReader;
use crate::types::{Direction, Entry, RelationKind, RelationRecord, VertexId, VERTEX_EXISTS_TYPE};

const TYPE_LEN: usize = 8;
const EDGE_COLUMN_LEN: usize = TYPE_LEN + 1 + 8;

const DIR_OUT: u8 = 0;
const DIR_IN: u8 = 1;

/// Column of a property with type `type_id`
pub fn property_column(type_id: u64) -> Vec<u8> {
    type_id.to_be_bytes().to_vec()
}

/// Column of an edge with label `type_id` pointing in `direction` at `other`
pub fn edge_column(type_id: u64, direction: Direction, other: VertexId) -> Vec<u8> {
    let mut column = Vec::with_capacity(EDGE_COLUMN_LEN);
    column.extend_from_slice(&type_id.to_be_bytes());
    column.push(match direction {
        Direction::Out => DIR_OUT,
        Direction::In => DIR_IN,
    });
    column.extend_from_slice(&other.to_be_bytes());
    column
}

/// The entry marking a vertex as live
pub fn vertex_exists_entry() -> Entry {
    Entry::new(property_column(VERTEX_EXISTS_TYPE), vec![1u8])
}

/// [`RelationReader`] for the column layout described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRelationReader;

impl StandardRelationReader {
    /// Create a reader
    pub fn new() -> Self {
        Self
    }
}

impl RelationReader for StandardRelationReader {
    fn parse_relation(&self, vertex: VertexId, entry: &Entry) -> Result<RelationRecord> {
        let column = entry.column.as_slice();
        if column.len() < TYPE_LEN {
            return Err(StorageError::decode(format!(
                "column of vertex {} is {} bytes, shorter than a type id",
                vertex,
                column.len()
            )));
        }
        let type_id = u64::from_be_bytes(read_array(&column[..TYPE_LEN]));

        let kind = match column.len() {
            TYPE_LEN => RelationKind::Property {
                value: entry.value.clone(),
            },
            EDGE_COLUMN_LEN => {
                let direction = match column[TYPE_LEN] {
                    DIR_OUT => Direction::Out,
                    DIR_IN => Direction::In,
                    other => {
                        return Err(StorageError::decode(format!(
                            "unknown edge direction {} on vertex {}",
                            other, vertex
                        )))
                    }
                };
                RelationKind::Edge {
                    direction,
                    other: i64::from_be_bytes(read_array(&column[TYPE_LEN + 1..])),
                    value: entry.value.clone(),
                }
            }
            len => {
                return Err(StorageError::decode(format!(
                    "unexpected column length {} on vertex {}",
                    len, vertex
                )))
            }
        };

        Ok(RelationRecord { type_id, kind })
    }
}

fn read_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FIRST_USER_TYPE;

    #[test]
    fn test_parse_exists_marker() {
        let reader = StandardRelationReader::new();
        let record = reader.parse_relation(1, &vertex_exists_entry()).unwrap();
        assert!(record.is_vertex_exists());
    }

    #[test]
    fn test_parse_edge() {
        let reader = StandardRelationReader::new();
        let entry = Entry::new(edge_column(FIRST_USER_TYPE, Direction::In, 4096), b"w".to_vec());
        let record = reader.parse_relation(1, &entry).unwrap();

        assert_eq!(record.type_id, FIRST_USER_TYPE);
        assert_eq!(record.other_vertex(), Some(4096));
        assert_eq!(record.value(), b"w");
        match record.kind {
            RelationKind::Edge { direction, .. } => assert_eq!(direction, Direction::In),
            other => panic!("expected edge, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let reader = StandardRelationReader::new();
        assert!(reader.parse_relation(1, &Entry::new(vec![0u8; 3], vec![])).is_err());
        assert!(reader.parse_relation(1, &Entry::new(vec![0u8; 12], vec![])).is_err());

        let mut bad_direction = edge_column(FIRST_USER_TYPE, Direction::Out, 1);
        bad_direction[8] = 9;
        assert!(reader.parse_relation(1, &Entry::new(bad_direction, vec![])).is_err());
    }

    #[test]
    fn test_edge_columns_sort_by_type_first() {
        let low = edge_column(FIRST_USER_TYPE, Direction::In, i64::MAX);
        let high = edge_column(FIRST_USER_TYPE + 1, Direction::Out, 0);
        assert!(low < high);
        assert!(property_column(VERTEX_EXISTS_TYPE) < low);
    }
}
