use std::sync::Arc;

use polycrypt_wire::{
    CreateArgs, EventKind, InitArgs, KeyArgs, Method, OperationId, OperationType, ProcessArgs,
};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::messenger::{
    Link, ListenerId, Messenger, OperationEvent, OperationHandle, OperationStatus,
};
use crate::registry::OperationRegistry;

/// Handle of a streaming encrypt/decrypt/sign/verify/digest operation.
///
/// Feed data with [`process`](Self::process), end it with
/// [`finish`](Self::finish). The outcome arrives as a `complete` event and a
/// cached [`result`](Self::result).
#[derive(Debug)]
pub struct CryptoOperation {
    op_type: OperationType,
    algorithm: Value,
    key: Option<Value>,
    messenger: Arc<Messenger>,
}

impl CryptoOperation {
    pub(crate) fn begin(
        registry: &Arc<OperationRegistry>,
        link: &Link,
        op_type: OperationType,
        algorithm: Value,
        key: Option<Value>,
        signature: Option<Vec<u8>>,
        buffer: Option<Vec<u8>>,
    ) -> Result<Self> {
        if op_type.is_key_operation() {
            return Err(ClientError::InvalidOperation(format!(
                "'{op_type}' is a key operation, not a streaming one"
            )));
        }
        if signature.is_some() && op_type != OperationType::Verify {
            return Err(ClientError::InvalidOperation(format!(
                "only verify takes a signature, not '{op_type}'"
            )));
        }
        Ok(Self::start(registry, link, op_type, algorithm, key, signature, buffer))
    }

    pub(crate) fn start(
        registry: &Arc<OperationRegistry>,
        link: &Link,
        op_type: OperationType,
        algorithm: Value,
        key: Option<Value>,
        signature: Option<Vec<u8>>,
        buffer: Option<Vec<u8>>,
    ) -> Self {
        let messenger = registry.open(link);
        debug!(operation = %messenger.id(), %op_type, "starting crypto operation");

        messenger.send(Method::Init(InitArgs { op_type }));
        messenger.send(Method::Create(CreateArgs {
            algorithm: algorithm.clone(),
            key: key.clone(),
            signature,
            buffer: buffer.unwrap_or_default(),
        }));

        Self {
            op_type,
            algorithm,
            key,
            messenger,
        }
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    /// Algorithm given at creation.
    pub fn algorithm(&self) -> &Value {
        &self.algorithm
    }

    /// Key given at creation.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    pub fn id(&self) -> OperationId {
        self.messenger.id()
    }

    pub fn status(&self) -> OperationStatus {
        self.messenger.status()
    }

    /// Latest result sent by the backend, if any.
    pub fn result(&self) -> Option<Value> {
        self.messenger.result()
    }

    pub fn handle(&self) -> OperationHandle {
        self.messenger.handle()
    }

    /// Append a chunk of input.
    pub fn process(&self, chunk: impl Into<Vec<u8>>) {
        self.messenger.send(Method::Process(ProcessArgs {
            buffer: chunk.into(),
        }));
    }

    /// Signal end of input.
    pub fn finish(&self) {
        self.messenger.send(Method::Finish);
    }

    /// Ask the backend to abandon the operation. Advisory only.
    pub fn abort(&self) {
        self.messenger.send(Method::Abort);
    }

    pub fn add_event_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.messenger.add_event_listener(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.messenger.remove_event_listener(kind, id)
    }

    pub fn on_abort(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Abort, listener)
    }

    pub fn on_error(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Error, listener)
    }

    pub fn on_progress(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Progress, listener)
    }

    pub fn on_complete(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Complete, listener)
    }

    /// Resolves once the operation has completed, aborted or errored.
    pub async fn completion(&self) -> OperationStatus {
        self.messenger.completion().await
    }
}

/// Parameters of a one-shot key operation.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyParams {
    Generate {
        algorithm: Value,
        extractable: bool,
        key_usages: Vec<String>,
    },
    Derive {
        algorithm: Value,
        base_key: Value,
        derived_key_type: Value,
        extractable: bool,
        key_usages: Vec<String>,
    },
    Import {
        format: String,
        key_data: Value,
        algorithm: Value,
        extractable: bool,
        key_usages: Vec<String>,
    },
    Export {
        format: String,
        key: Value,
    },
}

impl KeyParams {
    pub fn op_type(&self) -> OperationType {
        match self {
            KeyParams::Generate { .. } => OperationType::Generate,
            KeyParams::Derive { .. } => OperationType::Derive,
            KeyParams::Import { .. } => OperationType::Import,
            KeyParams::Export { .. } => OperationType::Export,
        }
    }

    /// The type-specific request, with every unused argument left `null`.
    pub fn into_request(self) -> Method {
        match self {
            KeyParams::Generate {
                algorithm,
                extractable,
                key_usages,
            } => Method::Generate(KeyArgs {
                algorithm: Some(algorithm),
                extractable: Some(extractable),
                key_usages: Some(key_usages),
                ..KeyArgs::default()
            }),
            KeyParams::Derive {
                algorithm,
                base_key,
                derived_key_type,
                extractable,
                key_usages,
            } => Method::Derive(KeyArgs {
                algorithm: Some(algorithm),
                base_key: Some(base_key),
                derived_key_type: Some(derived_key_type),
                extractable: Some(extractable),
                key_usages: Some(key_usages),
                ..KeyArgs::default()
            }),
            KeyParams::Import {
                format,
                key_data,
                algorithm,
                extractable,
                key_usages,
            } => Method::Import(KeyArgs {
                format: Some(format),
                key_data: Some(key_data),
                algorithm: Some(algorithm),
                extractable: Some(extractable),
                key_usages: Some(key_usages),
                ..KeyArgs::default()
            }),
            KeyParams::Export { format, key } => Method::Export(KeyArgs {
                format: Some(format),
                key: Some(key),
                ..KeyArgs::default()
            }),
        }
    }
}

/// Handle of a one-shot generate/derive/import/export operation.
#[derive(Debug)]
pub struct KeyOperation {
    op_type: OperationType,
    messenger: Arc<Messenger>,
}

impl KeyOperation {
    pub(crate) fn start(
        registry: &Arc<OperationRegistry>,
        link: &Link,
        params: KeyParams,
    ) -> Self {
        let op_type = params.op_type();
        let messenger = registry.open(link);
        debug!(operation = %messenger.id(), %op_type, "starting key operation");

        messenger.send(Method::Init(InitArgs { op_type }));
        messenger.send(params.into_request());

        Self { op_type, messenger }
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn id(&self) -> OperationId {
        self.messenger.id()
    }

    pub fn status(&self) -> OperationStatus {
        self.messenger.status()
    }

    pub fn result(&self) -> Option<Value> {
        self.messenger.result()
    }

    pub fn handle(&self) -> OperationHandle {
        self.messenger.handle()
    }

    pub fn add_event_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.messenger.add_event_listener(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.messenger.remove_event_listener(kind, id)
    }

    pub fn on_complete(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Complete, listener)
    }

    pub fn on_error(
        &self,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_event_listener(EventKind::Error, listener)
    }

    pub async fn completion(&self) -> OperationStatus {
        self.messenger.completion().await
    }
}
