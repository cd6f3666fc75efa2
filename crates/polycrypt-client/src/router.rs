use std::sync::Arc;

use polycrypt_channel::Inbound;
#[cfg(feature = "schema")]
use polycrypt_schema::SchemaRegistry;
use polycrypt_wire::{is_ready_sentinel, Direction, Envelope};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::lifecycle::ReadinessLatch;
use crate::messenger::{Disposition, DropReason};
use crate::registry::OperationRegistry;

/// The client's single inbound listener.
///
/// Every payload the host delivers goes through [`Router::route`]: the
/// readiness sentinel is handed to the latch, protocol envelopes are routed
/// to their operation by id, and everything else is dropped.
#[derive(Debug)]
pub struct Router {
    registry: Arc<OperationRegistry>,
    latch: Arc<ReadinessLatch>,
    #[cfg(feature = "schema")]
    schema: Option<Arc<SchemaRegistry>>,
}

impl Router {
    pub fn new(registry: Arc<OperationRegistry>, latch: Arc<ReadinessLatch>) -> Self {
        Self {
            registry,
            latch,
            #[cfg(feature = "schema")]
            schema: None,
        }
    }

    /// Drop notifications whose envelope fails the schema of its event kind.
    #[cfg(feature = "schema")]
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn route(&self, raw: &Value) -> Disposition {
        if is_ready_sentinel(raw) {
            self.latch.observe(raw);
            return Disposition::Ready;
        }

        let Some(envelope) = Envelope::parse(raw) else {
            trace!("dropping inbound payload that is not a protocol envelope");
            return Disposition::Dropped(DropReason::Invalid);
        };
        if envelope.direction != Direction::ToCaller {
            trace!("dropping envelope addressed to the backend");
            return Disposition::Dropped(DropReason::WrongDirection);
        }
        let Some(id) = envelope.operation_id else {
            trace!("dropping envelope without operation id");
            return Disposition::Dropped(DropReason::MissingOperationId);
        };
        let Some(messenger) = self.registry.get(id) else {
            debug!(operation = %id, "no live operation for inbound envelope");
            return Disposition::Dropped(DropReason::UnknownOperation);
        };

        #[cfg(feature = "schema")]
        if self.schema_rejects(&envelope, raw) {
            return Disposition::Dropped(DropReason::SchemaRejected);
        }

        messenger.on_envelope(envelope)
    }

    /// Consume the inbound stream on a background task.
    ///
    /// When the stream ends the readiness latch is closed, so anyone still
    /// waiting for the backend is released.
    pub fn spawn(self, mut inbound: Inbound) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                let disposition = self.route(&raw);
                trace!(?disposition, "inbound payload routed");
            }
            debug!("inbound channel closed");
            self.latch.close();
        })
    }

    #[cfg(feature = "schema")]
    fn schema_rejects(&self, envelope: &Envelope, raw: &Value) -> bool {
        let (Some(schema), Some(event)) = (&self.schema, &envelope.event) else {
            return false;
        };
        match schema.validate(event.kind.as_str(), raw) {
            Ok(()) => false,
            Err(err) => {
                debug!(error = %err, "inbound envelope failed schema validation");
                true
            }
        }
    }
}
