//! Stream pullers
//!
//! One puller per registered query drains a blocking [`KeyIterator`] on a
//! dedicated blocking thread and feeds a bounded channel:
//!
//! ```text
//!   KeyIterator ──next_key──▶ [hidden? skip] ──blocking_send──▶ mpsc(capacity) ──▶ synchronizer
//!        ▲                                            │
//!        └──── close() on every exit path             └── blocks while full (backpressure)
//! ```
//!
//! The terminal [`PullerStatus`] is published *before* the sender is
//! dropped, so once the synchronizer observes a closed channel the status
//! tells it whether the stream was drained, failed or cancelled.

use olap_storage::{EntryList, IdManager, KeyIterator, StorageError, VertexId};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, warn, Span};

/// One key of one stream: the vertex and its entries for that stream's query
pub(crate) type StreamItem = (VertexId, EntryList);

/// Terminal condition of a stream puller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullerStatus {
    /// Still reading
    Running,
    /// The iterator reported no more keys
    Exhausted,
    /// A storage read failed
    Failed,
    /// Stopped on request or because the consumer went away
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    status: Mutex<(PullerStatus, Option<StorageError>)>,
    cancel: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new((PullerStatus::Running, None)),
            cancel: AtomicBool::new(false),
        }
    }

    fn finish(&self, status: PullerStatus, error: Option<StorageError>) {
        *self.status.lock() = (status, error);
    }
}

/// Result of waiting on one stream
#[derive(Debug)]
pub(crate) enum Pulled {
    Item(StreamItem),
    /// Channel closed; no more data will ever arrive
    Finished,
    /// Neither data nor completion within the bounded wait
    Stalled,
}

/// Consumer side of a running stream puller
pub(crate) struct PullerHandle {
    rx: mpsc::Receiver<StreamItem>,
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl PullerHandle {
    /// Start pulling `iter` on a blocking thread.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        stream: usize,
        mut iter: Box<dyn KeyIterator>,
        ids: Arc<dyn IdManager>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared::new());
        let worker = shared.clone();
        let span = Span::current();

        let join = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            debug!(stream, "Stream puller started");
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                pull(stream, iter.as_mut(), ids.as_ref(), &tx, &worker.cancel)
            }));

            if let Err(e) = iter.close() {
                warn!(stream, error = %e, "Failed to close key iterator");
            }

            let (status, error) = match outcome {
                Ok(Ok(status)) => (status, None),
                Ok(Err(e)) => {
                    warn!(stream, error = %e, "Stream read failed");
                    (PullerStatus::Failed, Some(e))
                }
                Err(_) => {
                    warn!(stream, "Stream puller panicked");
                    (
                        PullerStatus::Failed,
                        Some(StorageError::Custom("stream puller panicked".into())),
                    )
                }
            };
            debug!(stream, ?status, "Stream puller stopped");
            worker.finish(status, error);
            drop(tx);
        });

        Self {
            rx,
            shared,
            join: Some(join),
        }
    }

    pub(crate) fn status(&self) -> PullerStatus {
        self.shared.status.lock().0
    }

    /// Take the read error of a failed puller
    pub(crate) fn take_error(&self) -> Option<StorageError> {
        self.shared.status.lock().1.take()
    }

    /// Next item using the two-phase liveness check: a short poll, then one
    /// bounded wait.
    pub(crate) async fn next(&mut self, poll: Duration, wait: Duration) -> Pulled {
        match timeout(poll, self.rx.recv()).await {
            Ok(Some(item)) => return Pulled::Item(item),
            Ok(None) => return Pulled::Finished,
            Err(_) => {}
        }
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => Pulled::Item(item),
            Ok(None) => Pulled::Finished,
            Err(_) => Pulled::Stalled,
        }
    }

    /// Ask the puller to stop. A puller blocked on a full queue is released
    /// immediately; one blocked inside the iterator stops after that read.
    pub(crate) fn cancel(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.rx.close();
    }

    /// Wait for the puller thread to exit
    pub(crate) async fn join(&mut self) -> Result<(), JoinError> {
        let Some(handle) = self.join.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.join = None;
        joined
    }
}

impl Drop for PullerHandle {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
    }
}

fn pull(
    stream: usize,
    iter: &mut dyn KeyIterator,
    ids: &dyn IdManager,
    tx: &mpsc::Sender<StreamItem>,
    cancel: &AtomicBool,
) -> Result<PullerStatus, StorageError> {
    loop {
        if cancel.load(Ordering::Acquire) {
            return Ok(PullerStatus::Cancelled);
        }
        let Some(record) = iter.next_key()? else {
            debug!(stream, "Stream exhausted");
            return Ok(PullerStatus::Exhausted);
        };
        let id = ids.key_id(&record.key)?;
        if ids.is_hidden(id) {
            continue;
        }
        if tx.blocking_send((id, record.entries)).is_err() {
            return Ok(PullerStatus::Cancelled);
        }
    }
}
