//! Protocol-conformant reference backend.
//!
//! It performs no cryptography: streaming operations echo the accumulated
//! input as their result, and key operations hand out opaque handles that
//! map to stored key material. Useful for demos and for exercising a client
//! end to end.

use std::collections::HashMap;
#[cfg(feature = "schema")]
use std::sync::Arc;

use polycrypt_channel::{HostChannel, Inbound, ANY_TARGET};
use polycrypt_client::Result;
#[cfg(feature = "schema")]
use polycrypt_schema::SchemaRegistry;
use polycrypt_wire::{
    Direction, Envelope, Event, EventKind, KeyArgs, Method, OperationId, OperationType,
    READY_SENTINEL,
};
use serde_json::{json, Value};
use tracing::{debug, trace};

const GENERATED_KEY_LEN: usize = 32;

#[derive(Debug)]
struct PendingOperation {
    op_type: OperationType,
    buffer: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredKey {
    material: Value,
    extractable: bool,
}

/// What a request produces: nothing yet, or one notification.
type Reply = Option<(Event, Option<Value>)>;

/// Reference backend serving one caller connection.
pub struct LoopbackBackend<C> {
    channel: C,
    operations: HashMap<OperationId, PendingOperation>,
    keys: HashMap<String, StoredKey>,
    next_key: u64,
    #[cfg(feature = "schema")]
    schema: Option<Arc<SchemaRegistry>>,
}

impl<C: HostChannel> LoopbackBackend<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            operations: HashMap::new(),
            keys: HashMap::new(),
            next_key: 0,
            #[cfg(feature = "schema")]
            schema: None,
        }
    }

    /// Reject requests whose envelope fails the schema of their method.
    #[cfg(feature = "schema")]
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Post the readiness sentinel.
    pub fn announce(&self) -> Result<()> {
        self.channel.post(Value::from(READY_SENTINEL), ANY_TARGET)?;
        Ok(())
    }

    /// Announce readiness, then handle requests until the caller goes away.
    pub async fn serve(mut self, mut inbound: Inbound) -> Result<()> {
        self.announce()?;
        while let Some(raw) = inbound.recv().await {
            self.handle(&raw)?;
        }
        debug!(pending = self.operations.len(), "caller disconnected");
        Ok(())
    }

    /// Handle one inbound payload. Only fails when a reply cannot be posted.
    pub fn handle(&mut self, raw: &Value) -> Result<()> {
        let Some(envelope) = Envelope::parse(raw) else {
            trace!("ignoring payload that is not a protocol envelope");
            return Ok(());
        };
        let (Direction::ToBackend, Some(id), Some(method)) =
            (envelope.direction, envelope.operation_id, envelope.method)
        else {
            trace!("ignoring envelope that is not a request");
            return Ok(());
        };

        #[cfg(feature = "schema")]
        if let Some(schema) = &self.schema {
            if let Err(err) = schema.validate(method.name(), raw) {
                return self.notify(id, Some((Event::error(err.to_string()), None)));
            }
        }

        debug!(operation = %id, method = method.name(), "request received");
        let reply = self.respond(id, method);
        self.notify(id, reply)
    }

    /// Operations initialized but not yet settled.
    pub fn live_operations(&self) -> usize {
        self.operations.len()
    }

    fn respond(&mut self, id: OperationId, method: Method) -> Reply {
        let method = match method {
            Method::Init(args) => {
                self.operations.insert(
                    id,
                    PendingOperation {
                        op_type: args.op_type,
                        buffer: Vec::new(),
                    },
                );
                return None;
            }
            Method::Abort => {
                self.operations.remove(&id);
                return Some((Event::new(EventKind::Abort), None));
            }
            other => other,
        };

        let Some(mut op) = self.operations.remove(&id) else {
            return failure(format!("unknown operation {id}"));
        };
        if !accepts(op.op_type, &method) {
            return failure(format!(
                "'{}' is not valid for a {} operation",
                method.name(),
                op.op_type
            ));
        }

        match method {
            Method::Create(args) => {
                op.buffer = args.buffer;
                self.operations.insert(id, op);
                None
            }
            Method::Process(args) => {
                op.buffer.extend_from_slice(&args.buffer);
                let loaded = op.buffer.len();
                self.operations.insert(id, op);
                Some((
                    Event::new(EventKind::Progress).with_detail("loaded", loaded),
                    None,
                ))
            }
            Method::Finish => Some((Event::new(EventKind::Complete), Some(json!(op.buffer)))),
            Method::Generate(args) => {
                let material = json!(vec![(id.get() % 256) as u8; GENERATED_KEY_LEN]);
                Some(self.complete_with_key(material, &args))
            }
            Method::Import(args) => match args.key_data.clone() {
                Some(material) => Some(self.complete_with_key(material, &args)),
                None => failure("import requires keyData"),
            },
            Method::Derive(args) => match self.lookup(args.base_key.as_ref()) {
                Some(base) => Some(self.complete_with_key(base.material, &args)),
                None => failure("unknown base key"),
            },
            Method::Export(args) => match self.lookup(args.key.as_ref()) {
                Some(key) if key.extractable => {
                    Some((Event::new(EventKind::Complete), Some(key.material)))
                }
                Some(_) => failure("key is not extractable"),
                None => failure("unknown key"),
            },
            Method::Init(_) | Method::Abort => None,
        }
    }

    fn complete_with_key(&mut self, material: Value, args: &KeyArgs) -> (Event, Option<Value>) {
        let handle = format!("loopback-key-{}", self.next_key);
        self.next_key += 1;
        let extractable = args.extractable.unwrap_or(false);
        self.keys.insert(
            handle.clone(),
            StoredKey {
                material,
                extractable,
            },
        );

        let algorithm = args
            .derived_key_type
            .clone()
            .or_else(|| args.algorithm.clone())
            .unwrap_or(Value::Null);
        let key = json!({
            "handle": handle,
            "algorithm": algorithm,
            "extractable": extractable,
            "usages": args.key_usages.clone().unwrap_or_default(),
        });
        (Event::new(EventKind::Complete), Some(key))
    }

    fn lookup(&self, key: Option<&Value>) -> Option<StoredKey> {
        let handle = key?.get("handle")?.as_str()?;
        self.keys.get(handle).cloned()
    }

    fn notify(&self, id: OperationId, reply: Reply) -> Result<()> {
        let Some((event, result)) = reply else {
            return Ok(());
        };
        let kind = event.kind;
        let message = Envelope::notification(id, event, result).to_value()?;
        self.channel.post(message, ANY_TARGET)?;
        debug!(operation = %id, %kind, "notification posted");
        Ok(())
    }
}

fn accepts(op_type: OperationType, method: &Method) -> bool {
    match method {
        Method::Create(_) | Method::Process(_) | Method::Finish => !op_type.is_key_operation(),
        Method::Generate(_) => op_type == OperationType::Generate,
        Method::Derive(_) => op_type == OperationType::Derive,
        Method::Import(_) => op_type == OperationType::Import,
        Method::Export(_) => op_type == OperationType::Export,
        Method::Init(_) | Method::Abort => true,
    }
}

fn failure(message: impl Into<String>) -> Reply {
    Some((Event::error(message), None))
}
