//! Merge engine driving one job execution
//!
//! The synchronizer advances all query streams in lock-step on vertex id.
//! Stream 0 is the existence probe: it decides which vertex is current,
//! whether that vertex is live, and when the job is out of data.
//!
//! ```text
//!            ┌──────────────────────── Running ────────────────────────┐
//!            │ fill slot 0 ── empty ──────────────────────────▶ Draining
//!            │   │
//!            │   ▼ probe entry == exists marker ?
//!            │   ├─ no  ─▶ discard matching secondary items, next
//!            │   └─ yes ─▶ attach matching secondary items ─▶ submit
//!            └─────────────────────────────────────────────────────────┘
//!   Draining: pool shutdown ─▶ stop pullers ─▶ rollback ─▶ merge ─▶ Terminated
//!   any error: abort pool, stop pullers, rollback if they stopped ─▶ Failed
//! ```
//!
//! Each secondary stream keeps one buffered item. Streams are sorted, so an
//! item below the current key can never match again and is dropped as an
//! orphan; an item above it stays buffered for a later vertex.

use crate::config::{ExecutorConfig, StreamFailurePolicy};
use crate::error::{OlapError, Result};
use crate::pool::WorkerPool;
use crate::puller::{PullerHandle, PullerStatus, Pulled, StreamItem};
use crate::result::{OlapResult, RunStats};
use crate::state::VertexState;
use crate::vertex::{VertexView, ViewContext};
use futures::future::try_join_all;
use olap_storage::{EntryList, IdManager, SliceQuery, StorageError, StoreTransaction, VertexId};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Lifecycle of a synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncState {
    /// Merging streams and dispatching vertices
    Running,
    /// Primary stream exhausted, flushing in-flight work
    Draining,
    /// Completed successfully
    Terminated,
    /// Aborted by a fatal error
    Failed,
}

pub(crate) struct Synchronizer<S: VertexState> {
    pullers: Vec<PullerHandle>,
    queries: Vec<SliceQuery>,
    slots: Vec<Option<StreamItem>>,
    finished: Vec<bool>,
    pool: WorkerPool<S>,
    ctx: Arc<ViewContext<S>>,
    ids: Arc<dyn IdManager>,
    tx: Arc<dyn StoreTransaction>,
    config: ExecutorConfig,
    state: SyncState,
    last_primary: Option<VertexId>,
    stats: RunStats,
}

impl<S: VertexState> Synchronizer<S> {
    /// `pullers[i]` must stream `queries[i]`; index 0 is the existence probe.
    pub(crate) fn new(
        pullers: Vec<PullerHandle>,
        queries: Vec<SliceQuery>,
        pool: WorkerPool<S>,
        ctx: Arc<ViewContext<S>>,
        ids: Arc<dyn IdManager>,
        tx: Arc<dyn StoreTransaction>,
        config: ExecutorConfig,
    ) -> Self {
        let streams = pullers.len();
        Self {
            pullers,
            queries,
            slots: (0..streams).map(|_| None).collect(),
            finished: vec![false; streams],
            pool,
            ctx,
            ids,
            tx,
            config,
            state: SyncState::Running,
            last_primary: None,
            stats: RunStats::default(),
        }
    }

    /// Drive the job to completion
    pub(crate) async fn run(mut self) -> Result<OlapResult<S>> {
        info!(streams = self.pullers.len(), "OLAP job started");

        let mut outcome = Ok(());
        while self.state == SyncState::Running {
            if let Err(e) = self.step().await {
                outcome = Err(e);
                break;
            }
        }
        let outcome = match outcome {
            Ok(()) => self.drain().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                self.state = SyncState::Failed;
                error!(error = %e, "OLAP job failed");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn step(&mut self) -> Result<()> {
        self.fill(0).await?;
        let Some((current, entries)) = self.slots[0].take() else {
            debug!("Existence stream exhausted, draining");
            self.state = SyncState::Draining;
            return Ok(());
        };

        if let Some(last) = self.last_primary {
            if current <= last {
                warn!(vertex = current, last, "Existence stream went backwards, skipping vertex");
                self.stats.out_of_order_skipped += 1;
                return Ok(());
            }
        }
        self.last_primary = Some(current);

        let probe = entries.first().ok_or_else(|| OlapError::Decode {
            vertex: current,
            source: StorageError::decode("existence probe returned no entries"),
        })?;
        let record = self
            .ctx
            .relations
            .parse_relation(current, probe)
            .map_err(|source| OlapError::Decode {
                vertex: current,
                source,
            })?;

        if !record.is_vertex_exists() {
            warn!(vertex = current, "Skipping deleted vertex");
            self.stats.deleted_skipped += 1;
            for stream in 1..self.pullers.len() {
                self.take_matching(stream, current).await?;
            }
            return Ok(());
        }

        let mut view = VertexView::new(current, self.ids.kind(current), self.ctx.clone());
        for stream in 1..self.pullers.len() {
            if let Some(entries) = self.take_matching(stream, current).await? {
                view.add_to_query_cache(self.queries[stream].clone(), entries);
            }
        }
        if view.is_partitioned() {
            self.stats.partitioned_seen = true;
        }
        self.stats.vertices_dispatched += 1;
        self.pool.submit(view).await
    }

    /// Buffer the next item of `stream` unless one is pending or the stream ended
    async fn fill(&mut self, stream: usize) -> Result<()> {
        if self.slots[stream].is_some() || self.finished[stream] {
            return Ok(());
        }
        let wait = self.config.timeout();
        match self.pullers[stream]
            .next(self.config.poll_interval(), wait)
            .await
        {
            Pulled::Item(item) => self.slots[stream] = Some(item),
            Pulled::Finished => {
                self.finished[stream] = true;
                self.check_stream(stream)?;
            }
            Pulled::Stalled => {
                return Err(OlapError::StorageStall {
                    stream,
                    waited: wait,
                })
            }
        }
        Ok(())
    }

    /// Entries of `stream` for `current`, dropping orphans below it
    async fn take_matching(&mut self, stream: usize, current: VertexId) -> Result<Option<EntryList>> {
        loop {
            self.fill(stream).await?;
            let pending = self.slots[stream].as_ref().map(|(id, _)| *id);
            match pending {
                None => return Ok(None),
                Some(id) if id < current => {
                    debug!(stream, vertex = id, "Dropping orphan stream item");
                    self.slots[stream] = None;
                    self.stats.orphans_dropped += 1;
                }
                Some(id) if id == current => {
                    return Ok(self.slots[stream].take().map(|(_, entries)| entries));
                }
                Some(_) => return Ok(None),
            }
        }
    }

    /// Interpret the terminal status of a stream whose channel closed
    fn check_stream(&self, stream: usize) -> Result<()> {
        let puller = &self.pullers[stream];
        match puller.status() {
            PullerStatus::Failed => {
                let source = puller
                    .take_error()
                    .unwrap_or_else(|| StorageError::read("stream failed"));
                match self.config.stream_failure {
                    StreamFailurePolicy::Fail => Err(OlapError::StreamRead { stream, source }),
                    StreamFailurePolicy::Truncate => {
                        warn!(stream, error = %source, "Stream read failed, treating it as exhausted");
                        Ok(())
                    }
                }
            }
            status => {
                debug!(stream, ?status, "Stream finished");
                Ok(())
            }
        }
    }

    /// Report a failure of a stream cancelled at drain.
    ///
    /// Every dispatched vertex already took its items from this stream or saw
    /// a buffered item above it, so the failure only hit keys no live vertex
    /// reads. It never fails the job.
    fn check_cancelled_stream(&self, stream: usize) {
        if self.pullers[stream].status() == PullerStatus::Failed {
            let error = self.pullers[stream]
                .take_error()
                .map(|e| e.to_string())
                .unwrap_or_default();
            warn!(stream, %error, "Stream failed past the last dispatched vertex, ignoring");
        }
    }

    async fn drain(&mut self) -> Result<OlapResult<S>> {
        let wait = self.config.timeout();
        self.pool.shutdown(wait).await?;
        self.stop_pullers().await?;

        for stream in 0..self.pullers.len() {
            if !self.finished[stream] {
                self.finished[stream] = true;
                self.check_cancelled_stream(stream);
            }
        }
        let leftover = self.slots.iter_mut().filter_map(Option::take).count() as u64;
        self.stats.orphans_dropped += leftover;

        self.tx.rollback()?;

        if self.stats.partitioned_seen {
            let folded = self.ctx.states.merge_partitioned();
            debug!(folded, "Merged partitioned vertex states");
        }

        self.stats.failed_vertices = self.pool.failed();
        self.stats.inline_dispatches = self.pool.inline_dispatches();
        self.state = SyncState::Terminated;
        info!(
            dispatched = self.stats.vertices_dispatched,
            deleted = self.stats.deleted_skipped,
            failed = self.stats.failed_vertices,
            orphans = self.stats.orphans_dropped,
            inline = self.stats.inline_dispatches,
            "OLAP job completed"
        );
        Ok(OlapResult::new(
            self.ctx.states.clone(),
            std::mem::take(&mut self.stats),
        ))
    }

    async fn stop_pullers(&mut self) -> Result<()> {
        for puller in &mut self.pullers {
            puller.cancel();
        }
        let wait = self.config.timeout();
        let joins = try_join_all(self.pullers.iter_mut().map(|puller| puller.join()));
        match timeout(wait, joins).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(OlapError::ShutdownTimeout {
                component: "stream pullers",
                waited: wait,
            }),
        }
    }

    /// Best-effort teardown after a fatal error
    async fn abort(&mut self) {
        self.pool.abort();
        match self.stop_pullers().await {
            Ok(()) => {
                if let Err(e) = self.tx.rollback() {
                    warn!(error = %e, "Failed to release read context");
                }
            }
            Err(e) => warn!(error = %e, "Stream pullers did not stop, read context left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::program_fn;
    use crate::result::ResultStore;
    use olap_storage::{
        vertex_exists_entry, KeyIterator, KeyRecord, StandardIdManager, StandardRelationReader,
        FIRST_USER_TYPE,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Transaction replaying fixed key sequences per query, in the given order
    struct Scripted {
        streams: Mutex<HashMap<SliceQuery, Vec<KeyRecord>>>,
    }

    struct ScriptedIter(std::vec::IntoIter<KeyRecord>);

    impl KeyIterator for ScriptedIter {
        fn next_key(&mut self) -> olap_storage::Result<Option<KeyRecord>> {
            Ok(self.0.next())
        }

        fn close(&mut self) -> olap_storage::Result<()> {
            Ok(())
        }
    }

    impl StoreTransaction for Scripted {
        fn edge_store_keys(&self, query: &SliceQuery) -> olap_storage::Result<Box<dyn KeyIterator>> {
            let records = self.streams.lock().remove(query).unwrap_or_default();
            Ok(Box::new(ScriptedIter(records.into_iter())))
        }

        fn rollback(&self) -> olap_storage::Result<()> {
            Ok(())
        }
    }

    fn record(ids: &StandardIdManager, id: VertexId) -> KeyRecord {
        KeyRecord {
            key: ids.key_for(id),
            entries: vec![vertex_exists_entry()],
        }
    }

    async fn run_scripted(
        streams: Vec<(SliceQuery, Vec<KeyRecord>)>,
    ) -> (OlapResult<u64>, Arc<Mutex<Vec<(VertexId, usize)>>>) {
        let ids = StandardIdManager::default();
        let queries: Vec<SliceQuery> = streams.iter().map(|(q, _)| q.clone()).collect();
        let tx: Arc<dyn StoreTransaction> = Arc::new(Scripted {
            streams: Mutex::new(streams.into_iter().collect()),
        });
        let id_manager: Arc<dyn IdManager> = Arc::new(ids);
        let states = Arc::new(ResultStore::new(id_manager.clone()));
        let ctx = Arc::new(ViewContext {
            states: states.clone(),
            initializer: Arc::new(|| 0u64),
            relations: Arc::new(StandardRelationReader::new()),
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let secondary = queries.get(1).cloned();
        let program = program_fn(move |v: &VertexView<u64>| {
            let extra = secondary.as_ref().map_or(0, |q| v.entries(q).len());
            log.lock().push((v.id(), extra));
            v.update_state(|s| *s += 1);
            Ok(())
        });
        let pool = WorkerPool::new(2, 4, Arc::new(program), states);

        let pullers = queries
            .iter()
            .enumerate()
            .map(|(i, q)| PullerHandle::spawn(i, tx.edge_store_keys(q).unwrap(), id_manager.clone(), 4))
            .collect();
        let config = ExecutorConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5));

        let result = Synchronizer::new(pullers, queries, pool, ctx, id_manager, tx, config)
            .run()
            .await
            .unwrap();
        (result, seen)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_out_of_order_primary_is_dispatched_once() {
        let ids = StandardIdManager::default();
        let primary = vec![
            record(&ids, ids.normal(1)),
            record(&ids, ids.normal(3)),
            record(&ids, ids.normal(3)),
            record(&ids, ids.normal(2)),
        ];

        let (result, seen) = run_scripted(vec![(SliceQuery::existence_probe(), primary)]).await;

        assert_eq!(result.stats().vertices_dispatched, 2);
        assert_eq!(result.stats().out_of_order_skipped, 2);
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(result.get(ids.normal(3)), Some(1));
        assert_eq!(result.get(ids.normal(2)), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_orphans_are_dropped_and_later_items_retained() {
        let ids = StandardIdManager::default();
        let extra = SliceQuery::relation_type(FIRST_USER_TYPE);
        let primary = vec![record(&ids, ids.normal(10)), record(&ids, ids.normal(30))];
        // 5 and 20 have no live counterpart; 30 must survive the skip over 20
        let secondary = vec![
            record(&ids, ids.normal(5)),
            record(&ids, ids.normal(20)),
            record(&ids, ids.normal(30)),
            record(&ids, ids.normal(40)),
        ];

        let (result, seen) = run_scripted(vec![
            (SliceQuery::existence_probe(), primary),
            (extra, secondary),
        ])
        .await;

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![(ids.normal(10), 0), (ids.normal(30), 1)]);
        // 40 is still queued when the pullers stop, it never reaches a slot
        assert_eq!(result.stats().orphans_dropped, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_probe_entries_fail_decode() {
        let ids = StandardIdManager::default();
        let primary = vec![KeyRecord {
            key: ids.key_for(ids.normal(1)),
            entries: vec![],
        }];

        let tx: Arc<dyn StoreTransaction> = Arc::new(Scripted {
            streams: Mutex::new([(SliceQuery::existence_probe(), primary)].into_iter().collect()),
        });
        let id_manager: Arc<dyn IdManager> = Arc::new(ids);
        let states = Arc::new(ResultStore::new(id_manager.clone()));
        let ctx = Arc::new(ViewContext {
            states: states.clone(),
            initializer: Arc::new(|| 0u64),
            relations: Arc::new(StandardRelationReader::new()),
        });
        let pool = WorkerPool::new(1, 1, Arc::new(program_fn(|_: &VertexView<u64>| Ok(()))), states);
        let puller = PullerHandle::spawn(
            0,
            tx.edge_store_keys(&SliceQuery::existence_probe()).unwrap(),
            id_manager.clone(),
            1,
        );

        let err = Synchronizer::new(
            vec![puller],
            vec![SliceQuery::existence_probe()],
            pool,
            ctx,
            id_manager,
            tx,
            ExecutorConfig::default().with_timeout(Duration::from_secs(5)),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, OlapError::Decode { vertex, .. } if vertex == ids.normal(1)));
    }
}
