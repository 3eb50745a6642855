//! In-memory edge store for development and testing
//!
//! [`InMemoryEdgeStore`] keeps a sorted key → (column → value) table behind a
//! `parking_lot::RwLock`. [`InMemoryEdgeStore::begin`] takes a snapshot and
//! returns an [`InMemoryTransaction`] implementing [`StoreTransaction`], so a
//! running job never observes concurrent writes.
//!
//! # Fault injection
//!
//! Tests can make iterators for a given slice fail after a number of keys
//! ([`InMemoryEdgeStore::inject_read_failure`]) or block on a read
//! ([`InMemoryEdgeStore::inject_stall`], [`InMemoryEdgeStore::inject_stall_after`])
//! to exercise the executor's failure paths. Faults are captured when the transaction begins.
//!
//! # Example
//!
//! ```rust
//! use olap_storage::{InMemoryEdgeStore, KeyIterator, SliceQuery, StoreTransaction, FIRST_USER_TYPE};
//!
//! let store = InMemoryEdgeStore::default();
//! let ids = store.id_manager();
//! let (a, b) = (ids.normal(1), ids.normal(2));
//! store.add_vertex(a);
//! store.add_vertex(b);
//! store.add_edge(FIRST_USER_TYPE, a, b);
//!
//! let tx = store.begin();
//! let mut keys = tx.edge_store_keys(&SliceQuery::relation_type(FIRST_USER_TYPE)).unwrap();
//! let mut seen = 0;
//! while let Some(record) = keys.next_key().unwrap() {
//!     assert_eq!(record.entries.len(), 1);
//!     seen += 1;
//! }
//! keys.close().unwrap();
//! assert_eq!(seen, 2);
//! ```

use crate::codec::{edge_column, property_column, vertex_exists_entry};
use crate::error::{Result, StorageError};
use crate::ids::StandardIdManager;
use crate::traits::{KeyIterator, StoreTransaction};
use crate::types::{Direction, Entry, KeyRecord, SliceQuery, VertexId, VERTEX_EXISTS_TYPE};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Row = BTreeMap<Vec<u8>, Vec<u8>>;
type Table = BTreeMap<Vec<u8>, Row>;

#[derive(Debug, Clone, Default)]
struct FaultPlan {
    read_failures: HashMap<SliceQuery, usize>,
    stalls: HashMap<SliceQuery, (usize, Duration)>,
}

/// Thread-safe in-memory edge store.
#[derive(Debug, Clone)]
pub struct InMemoryEdgeStore {
    data: Arc<RwLock<Table>>,
    faults: Arc<Mutex<FaultPlan>>,
    ids: StandardIdManager,
}

impl InMemoryEdgeStore {
    /// Create an empty store using `ids` for key encoding
    pub fn new(ids: StandardIdManager) -> Self {
        Self {
            data: Arc::new(RwLock::new(Table::new())),
            faults: Arc::new(Mutex::new(FaultPlan::default())),
            ids,
        }
    }

    /// The id layout used for keys
    pub fn id_manager(&self) -> StandardIdManager {
        self.ids
    }

    /// Write a raw entry under `vertex`
    pub fn insert(&self, vertex: VertexId, entry: Entry) {
        let key = self.ids.key_for(vertex);
        self.data
            .write()
            .entry(key)
            .or_default()
            .insert(entry.column, entry.value);
    }

    /// Create a live vertex
    pub fn add_vertex(&self, vertex: VertexId) {
        self.insert(vertex, vertex_exists_entry());
    }

    /// Create a vertex split over `partitions` partitions, returning the sibling ids.
    pub fn add_partitioned_vertex(&self, count: u64, partitions: u32) -> Vec<VertexId> {
        let partitions = partitions.clamp(1, self.ids.partition_count());
        (0..partitions)
            .map(|partition| {
                let id = self.ids.partitioned(count, partition);
                self.add_vertex(id);
                id
            })
            .collect()
    }

    /// Drop the existence marker of `vertex`, leaving the rest of its data.
    ///
    /// Mirrors a deletion whose relations have not been cleaned up yet.
    /// Returns whether a marker was removed.
    pub fn mark_deleted(&self, vertex: VertexId) -> bool {
        let key = self.ids.key_for(vertex);
        let mut data = self.data.write();
        match data.get_mut(&key) {
            Some(row) => row.remove(&property_column(VERTEX_EXISTS_TYPE)).is_some(),
            None => false,
        }
    }

    /// Add an edge labelled `label`, stored on both endpoints
    pub fn add_edge(&self, label: u64, out: VertexId, inbound: VertexId) {
        self.insert(out, Entry::new(edge_column(label, Direction::Out, inbound), Vec::new()));
        self.insert(inbound, Entry::new(edge_column(label, Direction::In, out), Vec::new()));
    }

    /// Set a property value on `vertex`
    pub fn set_property(&self, vertex: VertexId, type_id: u64, value: impl Into<Vec<u8>>) {
        self.insert(vertex, Entry::new(property_column(type_id), value));
    }

    /// Number of stored keys
    pub fn key_count(&self) -> usize {
        self.data.read().len()
    }

    /// Make iterators over `query` fail after yielding `after_keys` keys
    pub fn inject_read_failure(&self, query: SliceQuery, after_keys: usize) {
        self.faults.lock().read_failures.insert(query, after_keys);
    }

    /// Make iterators over `query` block for `delay` on their first read
    pub fn inject_stall(&self, query: SliceQuery, delay: Duration) {
        self.inject_stall_after(query, 0, delay);
    }

    /// Make iterators over `query` block for `delay` once they yielded `after_keys` keys
    pub fn inject_stall_after(&self, query: SliceQuery, after_keys: usize, delay: Duration) {
        self.faults.lock().stalls.insert(query, (after_keys, delay));
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.faults.lock() = FaultPlan::default();
    }

    /// Open a read transaction over a snapshot of the current contents
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            snapshot: Arc::new(self.data.read().clone()),
            faults: self.faults.lock().clone(),
            open_iterators: Arc::new(AtomicUsize::new(0)),
            opened_iterators: AtomicUsize::new(0),
            rolled_back: AtomicBool::new(false),
        }
    }
}

impl Default for InMemoryEdgeStore {
    fn default() -> Self {
        Self::new(StandardIdManager::default())
    }
}

/// Snapshot read transaction over an [`InMemoryEdgeStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    snapshot: Arc<Table>,
    faults: FaultPlan,
    open_iterators: Arc<AtomicUsize>,
    opened_iterators: AtomicUsize,
    rolled_back: AtomicBool,
}

impl InMemoryTransaction {
    /// Iterators opened and not yet closed
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::SeqCst)
    }

    /// Iterators opened over the lifetime of the transaction
    pub fn opened_iterators(&self) -> usize {
        self.opened_iterators.load(Ordering::SeqCst)
    }

    /// Whether [`StoreTransaction::rollback`] was called
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn edge_store_keys(&self, query: &SliceQuery) -> Result<Box<dyn KeyIterator>> {
        if self.is_rolled_back() {
            return Err(StorageError::Closed("transaction"));
        }
        self.open_iterators.fetch_add(1, Ordering::SeqCst);
        self.opened_iterators.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryKeyIterator {
            snapshot: self.snapshot.clone(),
            query: query.clone(),
            position: Bound::Unbounded,
            yielded: 0,
            fail_after: self.faults.read_failures.get(query).copied(),
            stall: self.faults.stalls.get(query).copied(),
            open: self.open_iterators.clone(),
            closed: false,
        }))
    }

    fn rollback(&self) -> Result<()> {
        if self.rolled_back.swap(true, Ordering::SeqCst) {
            tracing::debug!("transaction rolled back more than once");
        }
        Ok(())
    }
}

struct InMemoryKeyIterator {
    snapshot: Arc<Table>,
    query: SliceQuery,
    position: Bound<Vec<u8>>,
    yielded: usize,
    fail_after: Option<usize>,
    stall: Option<(usize, Duration)>,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl InMemoryKeyIterator {
    fn slice_of(&self, row: &Row) -> Vec<Entry> {
        let start = self.query.start();
        let end = self.query.end();
        let matching = row
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(column, _)| column.as_slice() < end)
            .map(|(column, value)| Entry::new(column.clone(), value.clone()));
        match self.query.limit() {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

impl KeyIterator for InMemoryKeyIterator {
    fn next_key(&mut self) -> Result<Option<KeyRecord>> {
        if self.closed {
            return Err(StorageError::Closed("key iterator"));
        }
        if let Some((after, delay)) = self.stall {
            if self.yielded == after {
                self.stall = None;
                std::thread::sleep(delay);
            }
        }
        if self.fail_after == Some(self.yielded) {
            return Err(StorageError::read(format!(
                "injected failure after {} keys",
                self.yielded
            )));
        }

        let snapshot = self.snapshot.clone();
        for (key, row) in snapshot.range((self.position.clone(), Bound::Unbounded)) {
            self.position = Bound::Excluded(key.clone());
            let entries = self.slice_of(row);
            if !entries.is_empty() {
                self.yielded += 1;
                return Ok(Some(KeyRecord {
                    key: key.clone(),
                    entries,
                }));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for InMemoryKeyIterator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
