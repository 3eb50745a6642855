//! Job assembly and the asynchronous job handle
//!
//! [`OlapJobBuilder`] collects the read context, collaborators, queries and
//! configuration; [`OlapJobBuilder::execute`] opens one iterator per query,
//! starts the pipeline and returns an [`OlapJobHandle`] that resolves to the
//! final [`OlapResult`].
//!
//! # Example
//!
//! ```rust
//! use olap_engine::{program_fn, ExecutorConfig, OlapJobBuilder, VertexView};
//! use olap_storage::{InMemoryEdgeStore, SliceQuery, StandardRelationReader, FIRST_USER_TYPE};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryEdgeStore::default();
//! let ids = store.id_manager();
//! let (a, b) = (ids.normal(1), ids.normal(2));
//! store.add_vertex(a);
//! store.add_vertex(b);
//! store.add_edge(FIRST_USER_TYPE, a, b);
//!
//! let edges = SliceQuery::relation_type(FIRST_USER_TYPE);
//! let program = {
//!     let edges = edges.clone();
//!     program_fn(move |v: &VertexView<u64>| {
//!         let degree = v.entries(&edges).len() as u64;
//!         v.set_state(degree);
//!         Ok(())
//!     })
//! };
//!
//! let result = OlapJobBuilder::new(
//!     Arc::new(store.begin()),
//!     Arc::new(ids),
//!     Arc::new(StandardRelationReader::new()),
//! )
//! .add_query(edges)
//! .config(ExecutorConfig::default().with_parallelism(2))
//! .initializer(|| 0u64)
//! .execute(program)?
//! .join()
//! .await?;
//!
//! assert_eq!(result.get(a), Some(1));
//! assert_eq!(result.get(b), Some(1));
//! # Ok(())
//! # }
//! ```

use crate::config::ExecutorConfig;
use crate::error::{OlapError, Result};
use crate::job::VertexProgram;
use crate::pool::WorkerPool;
use crate::puller::PullerHandle;
use crate::result::{OlapResult, ResultStore};
use crate::state::{StateInitializer, VertexState};
use crate::synchronizer::Synchronizer;
use crate::vertex::ViewContext;
use olap_storage::{IdManager, KeyIterator, RelationReader, SliceQuery, StoreTransaction};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Builder for one OLAP job execution
pub struct OlapJobBuilder<S: VertexState> {
    tx: Arc<dyn StoreTransaction>,
    ids: Arc<dyn IdManager>,
    relations: Arc<dyn RelationReader>,
    queries: Vec<SliceQuery>,
    config: ExecutorConfig,
    initializer: Option<Arc<dyn StateInitializer<S>>>,
    initial_state: Option<Arc<ResultStore<S>>>,
}

impl<S: VertexState> OlapJobBuilder<S> {
    /// Start a job over the read context `tx`.
    ///
    /// The job takes over releasing `tx`: it is rolled back once the
    /// pipeline has stopped, on success and on failure.
    pub fn new(
        tx: Arc<dyn StoreTransaction>,
        ids: Arc<dyn IdManager>,
        relations: Arc<dyn RelationReader>,
    ) -> Self {
        Self {
            tx,
            ids,
            relations,
            queries: Vec::new(),
            config: ExecutorConfig::default(),
            initializer: None,
            initial_state: None,
        }
    }

    /// Pre-fetch `query` for every vertex. Duplicates are ignored.
    pub fn add_query(mut self, query: SliceQuery) -> Self {
        if query == SliceQuery::existence_probe() || self.queries.contains(&query) {
            debug!(%query, "Ignoring duplicate query");
        } else {
            self.queries.push(query);
        }
        self
    }

    /// Pre-fetch every query in `queries`
    pub fn queries(self, queries: impl IntoIterator<Item = SliceQuery>) -> Self {
        queries.into_iter().fold(self, Self::add_query)
    }

    /// Number of worker slots
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    /// Replace the whole executor configuration
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Factory for the state of first-seen vertices (required)
    pub fn initializer(mut self, initializer: impl StateInitializer<S> + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Start from existing states instead of an empty store
    pub fn initial_state(mut self, states: impl Into<Arc<ResultStore<S>>>) -> Self {
        self.initial_state = Some(states.into());
        self
    }

    /// Start the pipeline. Must be called from within a tokio runtime.
    pub fn execute(self, program: impl VertexProgram<S> + 'static) -> Result<OlapJobHandle<S>> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            OlapError::InvalidJob("jobs must be started from within a tokio runtime".into())
        })?;
        let initializer = self
            .initializer
            .ok_or_else(|| OlapError::InvalidJob("no state initializer configured".into()))?;

        let states = self
            .initial_state
            .unwrap_or_else(|| Arc::new(ResultStore::new(self.ids.clone())));
        states.reset_merged();

        let mut queries = Vec::with_capacity(self.queries.len() + 1);
        queries.push(SliceQuery::existence_probe());
        queries.extend(self.queries);

        let iterators = open_iterators(self.tx.as_ref(), &queries)?;

        let id = Uuid::new_v4();
        let span = info_span!("olap_job", job_id = %id);
        let _entered = span.enter();

        let pullers = iterators
            .into_iter()
            .enumerate()
            .map(|(stream, iter)| {
                PullerHandle::spawn(stream, iter, self.ids.clone(), self.config.queue_capacity)
            })
            .collect();
        let pool = WorkerPool::new(
            self.config.parallelism,
            self.config.queue_capacity,
            Arc::new(program),
            states.clone(),
        );
        let ctx = Arc::new(ViewContext {
            states,
            initializer,
            relations: self.relations,
        });
        let synchronizer =
            Synchronizer::new(pullers, queries, pool, ctx, self.ids, self.tx, self.config);
        let task = runtime.spawn(synchronizer.run().instrument(span.clone()));

        Ok(OlapJobHandle { id, task })
    }
}

/// Open one iterator per query, closing the opened ones and releasing `tx` if any fails
fn open_iterators(
    tx: &dyn StoreTransaction,
    queries: &[SliceQuery],
) -> Result<Vec<Box<dyn KeyIterator>>> {
    let mut iterators: Vec<Box<dyn KeyIterator>> = Vec::with_capacity(queries.len());
    for query in queries {
        match tx.edge_store_keys(query) {
            Ok(iter) => iterators.push(iter),
            Err(e) => {
                for mut iter in iterators {
                    if let Err(close) = iter.close() {
                        warn!(error = %close, "Failed to close key iterator");
                    }
                }
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "Failed to release read context");
                }
                return Err(e.into());
            }
        }
    }
    Ok(iterators)
}

/// Handle on a running job
#[derive(Debug)]
pub struct OlapJobHandle<S: VertexState> {
    id: Uuid,
    task: JoinHandle<Result<OlapResult<S>>>,
}

impl<S: VertexState> OlapJobHandle<S> {
    /// Unique id of this execution, also recorded on its tracing span
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the job to finish
    pub async fn join(self) -> Result<OlapResult<S>> {
        self.task.await?
    }

    /// Whether the job has finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the job. Workers and pullers stop; the read context is not
    /// released.
    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::program_fn;
    use crate::vertex::VertexView;
    use olap_storage::{InMemoryEdgeStore, StandardRelationReader, StorageError};

    fn builder(store: &InMemoryEdgeStore) -> OlapJobBuilder<u64> {
        OlapJobBuilder::new(
            Arc::new(store.begin()),
            Arc::new(store.id_manager()),
            Arc::new(StandardRelationReader::new()),
        )
    }

    fn noop() -> impl VertexProgram<u64> {
        program_fn(|_: &VertexView<u64>| Ok(()))
    }

    #[test]
    fn test_duplicate_queries_are_ignored() {
        let store = InMemoryEdgeStore::default();
        let builder = builder(&store).queries([
            SliceQuery::relation_type(70),
            SliceQuery::relation_type(70),
            SliceQuery::existence_probe(),
            SliceQuery::relation_type(71),
        ]);
        assert_eq!(builder.queries.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_initializer_is_rejected() {
        let store = InMemoryEdgeStore::default();
        let err = builder(&store).execute(noop()).unwrap_err();
        assert!(matches!(err, OlapError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let store = InMemoryEdgeStore::default();
        let err = builder(&store)
            .initializer(|| 0u64)
            .parallelism(0)
            .execute(noop())
            .unwrap_err();
        assert!(matches!(err, OlapError::Config(_)));
    }

    #[test]
    fn test_execute_outside_runtime() {
        let store = InMemoryEdgeStore::default();
        let err = builder(&store)
            .initializer(|| 0u64)
            .execute(noop())
            .unwrap_err();
        assert!(matches!(err, OlapError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_open_failure_releases_iterators() {
        let store = InMemoryEdgeStore::default();
        let tx = Arc::new(store.begin());
        tx.rollback().unwrap();

        let err = OlapJobBuilder::<u64>::new(
            tx.clone(),
            Arc::new(store.id_manager()),
            Arc::new(StandardRelationReader::new()),
        )
        .initializer(|| 0u64)
        .execute(noop())
        .unwrap_err();

        assert!(matches!(err, OlapError::Storage(StorageError::Closed(_))));
        assert_eq!(tx.open_iterators(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_graph_completes() {
        let store = InMemoryEdgeStore::default();
        let tx = Arc::new(store.begin());
        let handle = OlapJobBuilder::<u64>::new(
            tx.clone(),
            Arc::new(store.id_manager()),
            Arc::new(StandardRelationReader::new()),
        )
        .initializer(|| 0u64)
        .execute(noop())
        .unwrap();

        let result = handle.join().await.unwrap();
        assert!(result.states().is_empty());
        assert_eq!(result.stats().vertices_dispatched, 0);
        assert!(tx.is_rolled_back());
    }
}
