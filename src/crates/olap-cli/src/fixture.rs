//! JSON graph fixtures
//!
//! ```json
//! {
//!   "partition_bits": 4,
//!   "vertices": [
//!     { "id": 1 },
//!     { "id": 2, "deleted": true },
//!     { "id": 3, "hidden": true },
//!     { "id": 50, "partitions": 2 }
//!   ],
//!   "edges": [ { "from": 1, "to": 50, "label": 0 } ]
//! }
//! ```
//!
//! Vertex ids are logical counters. A partitioned vertex stores each edge on
//! the sibling `other % partitions`. Labels are offsets from
//! [`FIRST_USER_TYPE`].

use olap_storage::{
    InMemoryEdgeStore, StandardIdManager, VertexId, DEFAULT_PARTITION_BITS, FIRST_USER_TYPE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or building a fixture
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The fixture file could not be read
    #[error("Failed to read fixture: {0}")]
    Read(#[from] std::io::Error),
    /// The fixture is not valid JSON for this format
    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] serde_json::Error),
    /// An edge names a vertex that is not declared
    #[error("Edge references unknown vertex {0}")]
    UnknownVertex(u64),
    /// The fixture is inconsistent
    #[error("Invalid fixture: {0}")]
    Invalid(String),
}

fn one() -> u32 {
    1
}

fn default_partition_bits() -> u32 {
    DEFAULT_PARTITION_BITS
}

/// A declared vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexSpec {
    /// Logical vertex id
    pub id: u64,
    /// Drop the existence marker after loading edges
    #[serde(default)]
    pub deleted: bool,
    /// Store under a hidden id
    #[serde(default)]
    pub hidden: bool,
    /// Number of partitions the vertex is split over
    #[serde(default = "one")]
    pub partitions: u32,
}

/// A declared edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Logical id of the source vertex
    pub from: u64,
    /// Logical id of the target vertex
    pub to: u64,
    /// Label offset from the first user type
    #[serde(default)]
    pub label: u64,
}

/// A whole graph fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFixture {
    /// Partition bits of the id layout
    #[serde(default = "default_partition_bits")]
    pub partition_bits: u32,
    /// Declared vertices
    #[serde(default)]
    pub vertices: Vec<VertexSpec>,
    /// Declared edges
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl GraphFixture {
    /// Parse a fixture from JSON
    pub fn from_json_str(content: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a fixture file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String, FixtureError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Random graph with `vertices` plain vertices and `degree` outgoing edges each.
    ///
    /// The same seed always yields the same fixture.
    pub fn generate(vertices: u64, degree: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let specs = (1..=vertices)
            .map(|id| VertexSpec {
                id,
                deleted: false,
                hidden: false,
                partitions: 1,
            })
            .collect();

        let mut edges = Vec::new();
        if vertices > 1 {
            for from in 1..=vertices {
                for _ in 0..degree {
                    let mut to = rng.gen_range(1..=vertices);
                    if to == from {
                        to = to % vertices + 1;
                    }
                    edges.push(EdgeSpec { from, to, label: 0 });
                }
            }
        }

        Self {
            partition_bits: DEFAULT_PARTITION_BITS,
            vertices: specs,
            edges,
        }
    }

    /// Load the fixture into a fresh in-memory store
    pub fn build(&self) -> Result<LoadedGraph, FixtureError> {
        let ids = StandardIdManager::new(self.partition_bits);
        let store = InMemoryEdgeStore::new(ids);
        let mut physical: HashMap<u64, Vec<VertexId>> = HashMap::new();

        for spec in &self.vertices {
            if physical.contains_key(&spec.id) {
                return Err(FixtureError::Invalid(format!("vertex {} declared twice", spec.id)));
            }
            if spec.partitions == 0 || spec.partitions > ids.partition_count() {
                return Err(FixtureError::Invalid(format!(
                    "vertex {} has {} partitions, layout allows 1..={}",
                    spec.id,
                    spec.partitions,
                    ids.partition_count()
                )));
            }
            let siblings = if spec.hidden {
                if spec.partitions > 1 {
                    return Err(FixtureError::Invalid(format!(
                        "hidden vertex {} cannot be partitioned",
                        spec.id
                    )));
                }
                let id = ids.hidden(spec.id);
                store.add_vertex(id);
                vec![id]
            } else if spec.partitions > 1 {
                store.add_partitioned_vertex(spec.id, spec.partitions)
            } else {
                let id = ids.normal(spec.id);
                store.add_vertex(id);
                vec![id]
            };
            physical.insert(spec.id, siblings);
        }

        for edge in &self.edges {
            let out = pick(&physical, edge.from, edge.to)?;
            let inbound = pick(&physical, edge.to, edge.from)?;
            store.add_edge(FIRST_USER_TYPE + edge.label, out, inbound);
        }

        for spec in self.vertices.iter().filter(|spec| spec.deleted) {
            for id in physical.get(&spec.id).into_iter().flatten() {
                store.mark_deleted(*id);
            }
        }

        Ok(LoadedGraph {
            store,
            ids,
            physical,
        })
    }
}

/// Sibling of `vertex` holding its edges to `other`
fn pick(physical: &HashMap<u64, Vec<VertexId>>, vertex: u64, other: u64) -> Result<VertexId, FixtureError> {
    let siblings = physical
        .get(&vertex)
        .filter(|siblings| !siblings.is_empty())
        .ok_or(FixtureError::UnknownVertex(vertex))?;
    Ok(siblings[(other % siblings.len() as u64) as usize])
}

/// A fixture loaded into an [`InMemoryEdgeStore`]
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    store: InMemoryEdgeStore,
    ids: StandardIdManager,
    physical: HashMap<u64, Vec<VertexId>>,
}

impl LoadedGraph {
    /// The populated store
    pub fn store(&self) -> &InMemoryEdgeStore {
        &self.store
    }

    /// The id layout of the store
    pub fn id_manager(&self) -> StandardIdManager {
        self.ids
    }

    /// Physical ids of logical vertex `id`
    pub fn physical_ids(&self, id: u64) -> &[VertexId] {
        self.physical.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Logical id of a physical vertex id
    pub fn logical_id(&self, id: VertexId) -> u64 {
        self.ids.count(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_storage::IdManager;

    #[test]
    fn test_parse_with_defaults() {
        let fixture = GraphFixture::from_json_str(
            r#"{ "vertices": [{ "id": 1 }, { "id": 2, "partitions": 2 }], "edges": [{ "from": 1, "to": 2 }] }"#,
        )
        .unwrap();

        assert_eq!(fixture.partition_bits, DEFAULT_PARTITION_BITS);
        assert_eq!(fixture.vertices[0].partitions, 1);
        assert!(!fixture.vertices[0].deleted);
        assert_eq!(fixture.edges[0].label, 0);
    }

    #[test]
    fn test_build_places_partitioned_edges() {
        let fixture = GraphFixture::from_json_str(
            r#"{ "vertices": [{ "id": 1 }, { "id": 2 }, { "id": 9, "partitions": 2 }],
                 "edges": [{ "from": 1, "to": 9 }, { "from": 2, "to": 9 }] }"#,
        )
        .unwrap();
        let graph = fixture.build().unwrap();
        let ids = graph.id_manager();

        let siblings = graph.physical_ids(9);
        assert_eq!(siblings.len(), 2);
        assert!(siblings.iter().all(|id| ids.is_partitioned(*id)));
        assert_eq!(graph.logical_id(siblings[1]), 9);
        // one key per vertex piece
        assert_eq!(graph.store().key_count(), 4);
    }

    #[test]
    fn test_build_rejects_bad_fixtures() {
        let unknown = GraphFixture::from_json_str(
            r#"{ "vertices": [{ "id": 1 }], "edges": [{ "from": 1, "to": 7 }] }"#,
        )
        .unwrap();
        assert!(matches!(unknown.build(), Err(FixtureError::UnknownVertex(7))));

        let twice = GraphFixture::from_json_str(r#"{ "vertices": [{ "id": 1 }, { "id": 1 }] }"#).unwrap();
        assert!(matches!(twice.build(), Err(FixtureError::Invalid(_))));

        let hidden = GraphFixture::from_json_str(
            r#"{ "vertices": [{ "id": 1, "hidden": true, "partitions": 2 }] }"#,
        )
        .unwrap();
        assert!(matches!(hidden.build(), Err(FixtureError::Invalid(_))));

        assert!(matches!(
            GraphFixture::from_json_str("{ \"vertices\": 3 }"),
            Err(FixtureError::Parse(_))
        ));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = GraphFixture::generate(20, 3, 7);
        let b = GraphFixture::generate(20, 3, 7);

        assert_eq!(a, b);
        assert_eq!(a.vertices.len(), 20);
        assert_eq!(a.edges.len(), 60);
        assert!(a.edges.iter().all(|e| e.from != e.to));
        assert_eq!(GraphFixture::from_json_str(&a.to_json().unwrap()).unwrap(), a);
    }
}
