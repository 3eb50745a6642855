//! Bounded worker pool running the vertex program
//!
//! ```text
//!                 try_send                ┌─ worker 0 ─┐
//!  synchronizer ───────────▶ mpsc(cap) ──▶├─ worker 1 ─┤──▶ VertexProgram::process
//!       │                                 └─ worker N ─┘
//!       └── queue full: run the view inline on the submitting task
//! ```
//!
//! Running on the caller when saturated keeps memory bounded by the queue
//! capacity while the pipeline keeps making progress.
//!
//! Failures stay per vertex: an `Err` or a panic from the program is logged,
//! counted, and the vertex's state is invalidated.

use crate::error::{OlapError, Result};
use crate::job::VertexProgram;
use crate::result::ResultStore;
use crate::state::VertexState;
use crate::vertex::VertexView;
use futures::future::try_join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, Instrument, Span};

struct Runner<S> {
    program: Arc<dyn VertexProgram<S>>,
    states: Arc<ResultStore<S>>,
    failed: AtomicU64,
    inline: AtomicU64,
}

impl<S: VertexState> Runner<S> {
    async fn process(&self, view: VertexView<S>) {
        let vertex = view.id();
        let outcome = AssertUnwindSafe(self.program.process(&view))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };
        error!(vertex, error = %reason, "Vertex program failed, invalidating state");
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.states.invalidate(vertex);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

/// Fixed set of worker tasks sharing one bounded queue
pub(crate) struct WorkerPool<S: VertexState> {
    tx: Option<mpsc::Sender<VertexView<S>>>,
    workers: Vec<JoinHandle<()>>,
    runner: Arc<Runner<S>>,
}

impl<S: VertexState> WorkerPool<S> {
    /// Spawn `parallelism` workers. Must be called from within a tokio runtime.
    pub(crate) fn new(
        parallelism: usize,
        capacity: usize,
        program: Arc<dyn VertexProgram<S>>,
        states: Arc<ResultStore<S>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<VertexView<S>>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let runner = Arc::new(Runner {
            program,
            states,
            failed: AtomicU64::new(0),
            inline: AtomicU64::new(0),
        });

        let workers = (0..parallelism)
            .map(|worker| {
                let rx = rx.clone();
                let runner = runner.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(view) = next else { break };
                        runner.process(view).await;
                    }
                    debug!(worker, "Worker stopped");
                }
                .instrument(Span::current()))
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            runner,
        }
    }

    /// Queue `view`, or process it on the calling task if the queue is full
    pub(crate) async fn submit(&self, view: VertexView<S>) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(OlapError::Join("worker pool is shut down".into()));
        };
        match tx.try_send(view) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(view)) => {
                self.runner.inline.fetch_add(1, Ordering::Relaxed);
                self.runner.process(view).await;
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(OlapError::Join("worker pool queue closed".into()))
            }
        }
    }

    /// Stop accepting work and wait up to `wait` for queued and running views
    pub(crate) async fn shutdown(&mut self, wait: Duration) -> Result<()> {
        self.tx = None;
        match timeout(wait, try_join_all(self.workers.iter_mut())).await {
            Ok(Ok(_)) => {
                self.workers.clear();
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(OlapError::ShutdownTimeout {
                component: "worker pool",
                waited: wait,
            }),
        }
    }

    /// Stop all workers without waiting; queued views are dropped
    pub(crate) fn abort(&mut self) {
        self.tx = None;
        for worker in &self.workers {
            worker.abort();
        }
    }

    /// Vertices whose program failed so far
    pub(crate) fn failed(&self) -> u64 {
        self.runner.failed.load(Ordering::Relaxed)
    }

    /// Views processed on the submitting task
    pub(crate) fn inline_dispatches(&self) -> u64 {
        self.runner.inline.load(Ordering::Relaxed)
    }
}

impl<S: VertexState> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::program_fn;
    use crate::vertex::ViewContext;
    use async_trait::async_trait;
    use olap_storage::{IdManager, StandardIdManager, StandardRelationReader, VertexId};

    fn context(ids: StandardIdManager) -> Arc<ViewContext<u64>> {
        Arc::new(ViewContext {
            states: Arc::new(ResultStore::new(Arc::new(ids))),
            initializer: Arc::new(|| 0u64),
            relations: Arc::new(StandardRelationReader::new()),
        })
    }

    fn view(ctx: &Arc<ViewContext<u64>>, id: VertexId) -> VertexView<u64> {
        VertexView::new(id, StandardIdManager::default().kind(id), ctx.clone())
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl VertexProgram<u64> for Sleepy {
        async fn process(&self, vertex: &VertexView<u64>) -> anyhow::Result<()> {
            tokio::time::sleep(self.0).await;
            vertex.update_state(|s| *s += 1);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_processes_all_views() {
        let ids = StandardIdManager::default();
        let ctx = context(ids);
        let program = program_fn(|v: &VertexView<u64>| {
            v.update_state(|s| *s += 1);
            Ok(())
        });
        let mut pool = WorkerPool::new(4, 8, Arc::new(program), ctx.states.clone());

        for count in 0..100 {
            pool.submit(view(&ctx, ids.normal(count))).await.unwrap();
        }
        pool.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(ctx.states.len(), 100);
        assert!(ctx.states.snapshot().values().all(|s| *s == Some(1)));
        assert_eq!(pool.failed(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_invalidate_only_that_vertex() {
        let ids = StandardIdManager::default();
        let ctx = context(ids);
        let (bad, worse) = (ids.normal(2), ids.normal(3));
        let program = program_fn(move |v: &VertexView<u64>| {
            v.set_state(5);
            if v.id() == bad {
                anyhow::bail!("bad vertex");
            }
            if v.id() == worse {
                panic!("worse vertex");
            }
            Ok(())
        });
        let mut pool = WorkerPool::new(2, 4, Arc::new(program), ctx.states.clone());

        for count in 1..=4 {
            pool.submit(view(&ctx, ids.normal(count))).await.unwrap();
        }
        pool.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(pool.failed(), 2);
        assert!(ctx.states.is_invalidated(bad));
        assert!(ctx.states.is_invalidated(worse));
        assert_eq!(ctx.states.get(ids.normal(1)), Some(5));
        assert_eq!(ctx.states.get(ids.normal(4)), Some(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_queue_runs_inline() {
        let ids = StandardIdManager::default();
        let ctx = context(ids);
        let program = Sleepy(Duration::from_millis(20));
        let mut pool = WorkerPool::new(1, 1, Arc::new(program), ctx.states.clone());

        for count in 0..6 {
            pool.submit(view(&ctx, ids.normal(count))).await.unwrap();
        }
        pool.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(pool.inline_dispatches() > 0);
        assert_eq!(ctx.states.len(), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_timeout() {
        let ids = StandardIdManager::default();
        let ctx = context(ids);
        let program = Sleepy(Duration::from_secs(30));
        let mut pool = WorkerPool::new(1, 4, Arc::new(program), ctx.states.clone());

        pool.submit(view(&ctx, ids.normal(1))).await.unwrap();
        let err = pool.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(
            err,
            OlapError::ShutdownTimeout {
                component: "worker pool",
                ..
            }
        ));

        pool.abort();
        assert!(pool.submit(view(&ctx, ids.normal(2))).await.is_err());
    }
}
