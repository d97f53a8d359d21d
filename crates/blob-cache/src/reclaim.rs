//! Background reclamation of blob files the index no longer references
//!
//! Cleanup after a superseding `set`, a `del`, or a `prune` is best-effort:
//! the index has already disowned the blob, so a failed delete only leaks
//! disk space. Requests go over a channel to a single worker task that logs
//! and counts failures instead of returning them to the caller.

use crate::blobs::BlobStore;
use crate::namespace::Namespace;
use crate::types::ReclaimStats;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Why a blob is being reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    Superseded,
    Deleted,
    Expired,
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReclaimReason::Superseded => "superseded",
            ReclaimReason::Deleted => "deleted",
            ReclaimReason::Expired => "expired",
        };
        f.write_str(s)
    }
}

enum Request {
    Blob {
        namespace: Namespace,
        blob_id: String,
        reason: ReclaimReason,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    requested: AtomicU64,
    reclaimed: AtomicU64,
    failed: AtomicU64,
}

pub struct Reclaimer {
    tx: mpsc::UnboundedSender<Request>,
    counters: Arc<Counters>,
}

impl Reclaimer {
    /// Start the worker task. Must be called from within a tokio runtime.
    /// The worker exits once the `Reclaimer` is dropped.
    pub fn spawn(blobs: BlobStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(run_worker(blobs, rx, counters.clone()));
        Self { tx, counters }
    }

    /// Queue a blob for deletion. Never fails; problems are logged.
    pub fn reclaim(&self, namespace: Namespace, blob_id: String, reason: ReclaimReason) {
        self.counters.requested.fetch_add(1, Ordering::Relaxed);
        let request = Request::Blob {
            namespace,
            blob_id,
            reason,
        };
        if let Err(mpsc::error::SendError(request)) = self.tx.send(request) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            if let Request::Blob {
                namespace, blob_id, ..
            } = request
            {
                warn!(namespace = %namespace, blob_id = %blob_id, "Reclaim worker stopped, blob leaked");
            }
        }
    }

    /// Wait until every request queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Request::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            requested: self.counters.requested.load(Ordering::Relaxed),
            reclaimed: self.counters.reclaimed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    blobs: BlobStore,
    mut rx: mpsc::UnboundedReceiver<Request>,
    counters: Arc<Counters>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            Request::Blob {
                namespace,
                blob_id,
                reason,
            } => match blobs.delete(&namespace, &blob_id).await {
                Ok(()) => {
                    counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                    debug!(namespace = %namespace, blob_id = %blob_id, reason = %reason, "Reclaimed blob");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        namespace = %namespace,
                        blob_id = %blob_id,
                        reason = %reason,
                        error = %e,
                        "Failed to reclaim blob"
                    );
                }
            },
            Request::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Reclaim worker stopped");
}
