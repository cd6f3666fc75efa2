use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Deferred job queue drained by a single task.
///
/// `schedule` only enqueues; jobs run later, one at a time, in the order they
/// were scheduled. A job that panics is logged and the drain continues with
/// the next one.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Job>,
}

impl Scheduler {
    /// Spawn the drain task. Must be called inside a Tokio runtime.
    ///
    /// The task ends once every `Scheduler` clone has been dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    warn!(panic = panic_message(&*panic), "scheduled job panicked");
                }
            }
            debug!("scheduler drained");
        });
        Self { tx }
    }

    /// Enqueue a job. Returns false when the drain task is gone.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Wait until every job scheduled before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.schedule(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic>"
    }
}
