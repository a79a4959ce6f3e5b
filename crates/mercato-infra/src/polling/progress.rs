//! Background persistence of processor progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use mercato_core::JobId;
use mercato_core::ports::{JobStore, ProgressSink};

struct ProgressChannel {
    tx: watch::Sender<Option<u8>>,
    open: AtomicBool,
}

impl ProgressSink for ProgressChannel {
    fn report(&self, progress: u8) {
        if self.open.load(Ordering::Acquire) {
            self.tx.send_replace(Some(progress));
        }
    }
}

/// Writes the latest reported progress of one running job.
///
/// Reports are coalesced: only the newest value is written, and a slow
/// store never blocks the processor.
pub(crate) struct ProgressWriter {
    channel: Arc<ProgressChannel>,
    done: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProgressWriter {
    pub(crate) fn spawn(store: Arc<dyn JobStore>, id: JobId) -> Self {
        let (tx, mut rx) = watch::channel(None);
        let (done_tx, mut done_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let latest = *rx.borrow_and_update();
                        write(&store, id, latest).await;
                    }
                    _ = &mut done_rx => {
                        if rx.has_changed().unwrap_or(false) {
                            let latest = *rx.borrow_and_update();
                            write(&store, id, latest).await;
                        }
                        break;
                    }
                }
            }
        });

        Self {
            channel: Arc::new(ProgressChannel {
                tx,
                open: AtomicBool::new(true),
            }),
            done: Some(done_tx),
            task,
        }
    }

    pub(crate) fn sink(&self) -> Arc<dyn ProgressSink> {
        self.channel.clone()
    }

    /// Stop accepting reports, wait for pending writes, and return the last
    /// reported value.
    pub(crate) async fn finish(mut self) -> Option<u8> {
        self.channel.open.store(false, Ordering::Release);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Progress writer task ended abnormally");
        }
        *self.channel.tx.borrow()
    }
}

async fn write(store: &Arc<dyn JobStore>, id: JobId, progress: Option<u8>) {
    let Some(progress) = progress else {
        return;
    };
    if let Err(e) = store.update_progress(id, progress).await {
        tracing::debug!(job_id = %id, error = %e, "Failed to persist job progress");
    }
}
