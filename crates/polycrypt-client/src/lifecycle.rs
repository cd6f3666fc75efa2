use std::fmt;
use std::sync::{Mutex, PoisonError};

use polycrypt_wire::is_ready_sentinel;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::scheduler::Scheduler;

type AliveCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Alive,
    Closed,
}

/// One-shot latch for the backend readiness sentinel.
///
/// The first sentinel flips the latch and runs the registered callback once,
/// through the scheduler. The callback is dropped afterwards, so a callback
/// registered after readiness never runs; use [`ReadinessLatch::is_alive`]
/// or [`ReadinessLatch::wait_alive`] instead.
pub struct ReadinessLatch {
    state: watch::Sender<Readiness>,
    callback: Mutex<Option<AliveCallback>>,
    scheduler: Scheduler,
}

impl ReadinessLatch {
    pub fn new(scheduler: Scheduler) -> Self {
        let (state, _) = watch::channel(Readiness::Waiting);
        Self {
            state,
            callback: Mutex::new(None),
            scheduler,
        }
    }

    /// Set the alive callback, replacing any earlier one.
    pub fn on_alive(&self, callback: impl FnOnce() + Send + 'static) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Returns true only for the first readiness sentinel seen.
    pub fn observe(&self, raw: &Value) -> bool {
        if !is_ready_sentinel(raw) {
            return false;
        }

        let first = self.state.send_if_modified(|state| {
            if *state == Readiness::Waiting {
                *state = Readiness::Alive;
                true
            } else {
                false
            }
        });
        if !first {
            trace!("ignoring repeated readiness sentinel");
            return false;
        }

        info!("backend is alive");
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            self.scheduler.schedule(callback);
        }
        true
    }

    pub fn is_alive(&self) -> bool {
        *self.state.borrow() == Readiness::Alive
    }

    /// Wait for readiness. Returns false if the channel closed first.
    pub async fn wait_alive(&self) -> bool {
        let mut rx = self.state.subscribe();
        let alive = match rx.wait_for(|state| *state != Readiness::Waiting).await {
            Ok(state) => *state == Readiness::Alive,
            Err(_) => false,
        };
        alive
    }

    pub(crate) fn close(&self) {
        let closed = self.state.send_if_modified(|state| {
            if *state == Readiness::Waiting {
                *state = Readiness::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            debug!("channel closed before backend became alive");
        }
    }
}

impl fmt::Debug for ReadinessLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessLatch")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use polycrypt_wire::READY_SENTINEL;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn fires_once_on_first_sentinel() {
        let scheduler = Scheduler::spawn();
        let latch = ReadinessLatch::new(scheduler.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        latch.on_alive(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!latch.observe(&json!("hello")));
        assert!(latch.observe(&json!(READY_SENTINEL)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!latch.observe(&json!(READY_SENTINEL)));
        scheduler.flush().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(latch.is_alive());
        assert!(latch.wait_alive().await);
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let scheduler = Scheduler::spawn();
        let latch = ReadinessLatch::new(scheduler.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in ["old", "new"] {
            let calls = calls.clone();
            latch.on_alive(move || calls.lock().unwrap().push(tag));
        }

        latch.observe(&json!(READY_SENTINEL));
        scheduler.flush().await;

        assert_eq!(*calls.lock().unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn wait_alive_reports_close() {
        let latch = ReadinessLatch::new(Scheduler::spawn());
        latch.close();
        assert!(!latch.wait_alive().await);
        assert!(!latch.is_alive());
    }
}
