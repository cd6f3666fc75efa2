use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ChannelError, Result};
use crate::traits::{check_target, HostChannel, Inbound};

/// One side of an in-process channel pair.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    peer_origin: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl MemoryChannel {
    /// Create a connected pair.
    ///
    /// Returns `(caller side, backend side)`; each side posts to the other and
    /// receives on its own [`Inbound`].
    pub fn pair(
        caller_origin: impl Into<String>,
        backend_origin: impl Into<String>,
    ) -> ((MemoryChannel, Inbound), (MemoryChannel, Inbound)) {
        let (to_backend, backend_rx) = mpsc::unbounded_channel();
        let (to_caller, caller_rx) = mpsc::unbounded_channel();

        let caller = MemoryChannel {
            peer_origin: backend_origin.into(),
            tx: to_backend,
        };
        let backend = MemoryChannel {
            peer_origin: caller_origin.into(),
            tx: to_caller,
        };

        (
            (caller, Inbound::from_receiver(caller_rx)),
            (backend, Inbound::from_receiver(backend_rx)),
        )
    }
}

impl HostChannel for MemoryChannel {
    fn post(&self, message: Value, target: &str) -> Result<()> {
        check_target(target, &self.peer_origin)?;
        self.tx.send(message).map_err(|_| ChannelError::Closed)
    }

    fn peer_origin(&self) -> &str {
        &self.peer_origin
    }
}
