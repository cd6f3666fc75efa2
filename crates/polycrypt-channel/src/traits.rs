use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ChannelError, Result};

/// Target identifier that matches any peer origin.
pub const ANY_TARGET: &str = "*";

/// Outbound half of a host message channel.
///
/// `post` hands the message to the transport and returns immediately; it
/// never waits for delivery or acknowledgement. Messages posted through one
/// channel instance are delivered in post order.
pub trait HostChannel: Send + Sync {
    /// Post `message` to the context identified by `target`.
    ///
    /// `target` must be [`ANY_TARGET`] or equal to [`HostChannel::peer_origin`].
    fn post(&self, message: Value, target: &str) -> Result<()>;

    /// Origin identifier of the context on the other side.
    fn peer_origin(&self) -> &str;
}

/// Inbound half of a host message channel.
///
/// Yields every payload delivered by the host, including unrelated traffic.
/// Consumers are expected to validate before acting.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Inbound {
    /// Wrap a receiver fed by a custom transport.
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    /// Wait for the next payload. Returns `None` once the transport is closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Take the next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

pub(crate) fn check_target(target: &str, origin: &str) -> Result<()> {
    if target == ANY_TARGET || target == origin {
        Ok(())
    } else {
        Err(ChannelError::TargetMismatch {
            target: target.to_string(),
            origin: origin.to_string(),
        })
    }
}
