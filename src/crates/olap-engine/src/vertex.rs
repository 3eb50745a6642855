//! Job-facing vertex handles
//!
//! A [`VertexView`] is built by the synchronizer for every live vertex and
//! handed to exactly one vertex program invocation. It carries the entry
//! lists pre-fetched by the registered queries and scopes state access to
//! its own vertex id.
//!
//! Data outside the registered queries is never read from storage while a
//! job runs: asking for a query that was not pre-fetched yields an empty
//! result.

use crate::result::ResultStore;
use crate::state::{StateInitializer, VertexState};
use olap_storage::{
    Entry, EntryList, RelationKind, RelationReader, RelationRecord, SliceQuery, StorageError,
    VertexId, VertexKind,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-job collaborators shared by every view
pub(crate) struct ViewContext<S> {
    pub(crate) states: Arc<ResultStore<S>>,
    pub(crate) initializer: Arc<dyn StateInitializer<S>>,
    pub(crate) relations: Arc<dyn RelationReader>,
}

/// Handle over one dispatched vertex
pub struct VertexView<S> {
    id: VertexId,
    kind: VertexKind,
    cache: HashMap<SliceQuery, EntryList>,
    ctx: Arc<ViewContext<S>>,
}

impl<S: VertexState> VertexView<S> {
    pub(crate) fn new(id: VertexId, kind: VertexKind, ctx: Arc<ViewContext<S>>) -> Self {
        Self {
            id,
            kind,
            cache: HashMap::new(),
            ctx,
        }
    }

    pub(crate) fn add_to_query_cache(&mut self, query: SliceQuery, entries: EntryList) {
        self.cache.insert(query, entries);
    }

    /// Physical id of this vertex
    pub fn id(&self) -> VertexId {
        self.id
    }

    /// Kind of this vertex
    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    /// Whether this is one piece of a partitioned vertex
    pub fn is_partitioned(&self) -> bool {
        self.kind == VertexKind::Partitioned
    }

    /// Whether `query` delivered entries for this vertex
    pub fn has_query(&self, query: &SliceQuery) -> bool {
        self.cache.contains_key(query)
    }

    /// The queries that delivered entries for this vertex
    pub fn queries(&self) -> impl Iterator<Item = &SliceQuery> {
        self.cache.keys()
    }

    /// Pre-fetched entries for `query`; empty if it was not pre-fetched
    pub fn entries(&self, query: &SliceQuery) -> &[Entry] {
        self.cache.get(query).map(Vec::as_slice).unwrap_or_default()
    }

    /// Decode the pre-fetched entries of `query`
    pub fn relations(&self, query: &SliceQuery) -> Result<Vec<RelationRecord>, StorageError> {
        self.entries(query)
            .iter()
            .map(|entry| self.ctx.relations.parse_relation(self.id, entry))
            .collect()
    }

    /// Endpoints of the edges pre-fetched by `query`
    pub fn neighbors(&self, query: &SliceQuery) -> Result<Vec<NeighborView>, StorageError> {
        Ok(self
            .relations(query)?
            .iter()
            .filter_map(RelationRecord::other_vertex)
            .map(NeighborView::new)
            .collect())
    }

    /// Value of property `type_id` from any pre-fetched list
    pub fn property(&self, type_id: u64) -> Result<Option<Vec<u8>>, StorageError> {
        for entry in self.cache.values().flatten() {
            let record = self.ctx.relations.parse_relation(self.id, entry)?;
            if record.type_id == type_id {
                if let RelationKind::Property { value } = record.kind {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Current state, initialized on first access
    pub fn state(&self) -> S {
        self.ctx
            .states
            .get_or_init(self.id, self.ctx.initializer.as_ref())
    }

    /// Overwrite the state of this vertex
    pub fn set_state(&self, state: S) {
        self.ctx.states.set(self.id, state);
    }

    /// Mutate the state of this vertex in place
    pub fn update_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.ctx
            .states
            .update(self.id, self.ctx.initializer.as_ref(), f)
    }
}

impl<S> fmt::Debug for VertexView<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexView")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("queries", &self.cache.len())
            .finish()
    }
}

/// Identity-only handle on a vertex referenced by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NeighborView {
    id: VertexId,
}

impl NeighborView {
    pub(crate) fn new(id: VertexId) -> Self {
        Self { id }
    }

    /// Id of the neighbor
    pub fn id(&self) -> VertexId {
        self.id
    }
}
