//! Concurrent vertex → state mapping and the final job result
//!
//! [`ResultStore`] is the only state shared between worker tasks. It is a
//! sharded concurrent map (`dashmap`), so operations on unrelated vertices
//! never contend on a single lock, and get-or-initialize is atomic per key.
//!
//! # Lifecycle of an entry
//!
//! ```text
//!  (absent) ──get_or_init──▶ Some(initial) ──set / update──▶ Some(state)
//!                                   │                              │
//!                                   └──────── invalidate ──────────┴──▶ None (invalidated)
//!
//!  after all workers stopped:  merge_partitioned()
//!     sibling ids ──fold into──▶ canonical id, siblings removed
//! ```
//!
//! An invalidated entry is kept (as `None`) so callers can tell "the vertex
//! program failed here" apart from "never dispatched".

use crate::state::{StateInitializer, VertexState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use olap_storage::{IdManager, VertexId};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Concurrent mapping from vertex id to accumulator state.
pub struct ResultStore<S> {
    states: DashMap<VertexId, Option<S>>,
    ids: Arc<dyn IdManager>,
    merged: AtomicBool,
}

impl<S: VertexState> ResultStore<S> {
    /// Create an empty store classifying ids with `ids`
    pub fn new(ids: Arc<dyn IdManager>) -> Self {
        Self {
            states: DashMap::new(),
            ids,
            merged: AtomicBool::new(false),
        }
    }

    fn resolve(&self, id: VertexId) -> VertexId {
        if self.merged.load(Ordering::Acquire) && self.ids.is_partitioned(id) {
            self.ids.canonical_id(id)
        } else {
            id
        }
    }

    /// Current state of `id`, `None` if absent or invalidated.
    ///
    /// After the partition merge pass, any sibling id of a partitioned
    /// vertex resolves to the combined state.
    pub fn get(&self, id: VertexId) -> Option<S> {
        let key = self.resolve(id);
        self.states.get(&key).and_then(|entry| entry.value().clone())
    }

    /// State of `id`, creating it from `init` when absent or invalidated.
    ///
    /// `init` runs while the key's shard is locked and must not access the store.
    pub fn get_or_init(&self, id: VertexId, init: &dyn StateInitializer<S>) -> S {
        self.update(id, init, |state| state.clone())
    }

    /// Mutate the state of `id` in place, initializing it first if needed.
    ///
    /// `f` runs while the key's shard is locked and must not access the store.
    pub fn update<R>(
        &self,
        id: VertexId,
        init: &dyn StateInitializer<S>,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        let mut entry = self.states.entry(id).or_insert(None);
        let state = entry.value_mut().get_or_insert_with(|| init.initial_state());
        f(state)
    }

    /// Overwrite the state of `id`
    pub fn set(&self, id: VertexId, state: S) {
        self.states.insert(id, Some(state));
    }

    /// Mark the state of `id` as invalid
    pub fn invalidate(&self, id: VertexId) {
        self.states.insert(id, None);
    }

    /// Whether `id` has an entry that was invalidated
    pub fn is_invalidated(&self, id: VertexId) -> bool {
        let key = self.resolve(id);
        matches!(self.states.get(&key).as_deref(), Some(None))
    }

    /// Whether `id` has an entry (valid or invalidated)
    pub fn contains(&self, id: VertexId) -> bool {
        self.states.contains_key(&self.resolve(id))
    }

    /// Number of entries, including invalidated ones
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the store has no entries
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Copy of every entry; `None` marks an invalidated vertex
    pub fn snapshot(&self) -> HashMap<VertexId, Option<S>> {
        self.states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Fold the states of partition siblings into their canonical entry.
    ///
    /// Must only run once no worker is touching the store. If any sibling
    /// was invalidated, the combined state is invalidated too. Returns the
    /// number of sibling entries folded away.
    pub fn merge_partitioned(&self) -> usize {
        let siblings: Vec<VertexId> = self
            .states
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| self.ids.is_partitioned(*id) && self.ids.canonical_id(*id) != *id)
            .collect();

        let mut folded = 0;
        for id in siblings {
            let Some((_, state)) = self.states.remove(&id) else {
                continue;
            };
            folded += 1;
            match self.states.entry(self.ids.canonical_id(id)) {
                Entry::Vacant(vacant) => {
                    vacant.insert(state);
                }
                Entry::Occupied(mut occupied) => {
                    let slot = occupied.get_mut();
                    match state {
                        Some(other) => {
                            if let Some(current) = slot {
                                current.merge(other);
                            }
                        }
                        None => *slot = None,
                    }
                }
            }
        }

        self.merged.store(true, Ordering::Release);
        folded
    }

    pub(crate) fn reset_merged(&self) {
        self.merged.store(false, Ordering::Release);
    }
}

impl<S> fmt::Debug for ResultStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStore")
            .field("entries", &self.states.len())
            .field("merged", &self.merged.load(Ordering::Relaxed))
            .finish()
    }
}

/// Counters collected over one job execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Live vertices handed to the worker pool
    pub vertices_dispatched: u64,
    /// Vertices whose existence probe was not the exists marker
    pub deleted_skipped: u64,
    /// Vertices whose program failed and whose state was invalidated
    pub failed_vertices: u64,
    /// Secondary-stream items dropped during the merge because they sort
    /// below the current vertex, or left in a merge slot at drain. Items
    /// still queued in a cancelled puller's channel are not counted.
    pub orphans_dropped: u64,
    /// Primary items repeating or going below an already dispatched id
    pub out_of_order_skipped: u64,
    /// Dispatches executed by the submitting task because the pool queue was full
    pub inline_dispatches: u64,
    /// Whether any partitioned vertex was dispatched
    pub partitioned_seen: bool,
}

/// Outcome of a successful job execution
#[derive(Debug)]
pub struct OlapResult<S> {
    states: Arc<ResultStore<S>>,
    stats: RunStats,
}

impl<S: VertexState> OlapResult<S> {
    pub(crate) fn new(states: Arc<ResultStore<S>>, stats: RunStats) -> Self {
        Self { states, stats }
    }

    /// Final state of `id`
    pub fn get(&self, id: VertexId) -> Option<S> {
        self.states.get(id)
    }

    /// The final vertex → state mapping
    pub fn states(&self) -> &ResultStore<S> {
        &self.states
    }

    /// Run statistics
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Whether at least one vertex program failed
    pub fn had_failures(&self) -> bool {
        self.stats.failed_vertices > 0
    }

    /// Take the store, e.g. to seed a follow-up job
    pub fn into_states(self) -> Arc<ResultStore<S>> {
        self.states
    }
}
