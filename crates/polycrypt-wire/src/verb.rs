//! Closed verb sets: request methods sent to the backend and the events it
//! raises back.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation type tag carried by the `init` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Digest,
    Generate,
    Derive,
    Import,
    Export,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Encrypt => "encrypt",
            OperationType::Decrypt => "decrypt",
            OperationType::Sign => "sign",
            OperationType::Verify => "verify",
            OperationType::Digest => "digest",
            OperationType::Generate => "generate",
            OperationType::Derive => "derive",
            OperationType::Import => "import",
            OperationType::Export => "export",
        }
    }

    /// Returns true for the one-shot key-management types.
    pub fn is_key_operation(self) -> bool {
        matches!(
            self,
            OperationType::Generate
                | OperationType::Derive
                | OperationType::Import
                | OperationType::Export
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of the `init` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitArgs {
    #[serde(rename = "type")]
    pub op_type: OperationType,
}

/// Arguments of the `create` request that starts a streaming operation.
///
/// Every field is always present on the wire; absent values are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateArgs {
    pub algorithm: Value,
    pub key: Option<Value>,
    pub signature: Option<Vec<u8>>,
    pub buffer: Vec<u8>,
}

/// Arguments of the `process` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessArgs {
    pub buffer: Vec<u8>,
}

/// Arguments shared by every key-management request.
///
/// The shape is fixed across `generate`, `derive`, `import` and `export`;
/// fields a sub-type does not use are sent as `null`, never omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyArgs {
    pub format: Option<String>,
    pub key_data: Option<Value>,
    pub algorithm: Option<Value>,
    pub extractable: Option<bool>,
    pub key_usages: Option<Vec<String>>,
    pub base_key: Option<Value>,
    pub derived_key_type: Option<Value>,
    pub key: Option<Value>,
}

/// A request sent from the caller to the backend.
///
/// Serializes to `{"method": <name>, "args": <args>}`; `finish` and `abort`
/// carry no arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "lowercase")]
pub enum Method {
    Init(InitArgs),
    Create(CreateArgs),
    Process(ProcessArgs),
    Finish,
    Abort,
    Generate(KeyArgs),
    Derive(KeyArgs),
    Import(KeyArgs),
    Export(KeyArgs),
}

impl Method {
    /// Every request name, in protocol order.
    pub const NAMES: [&'static str; 9] = [
        "init", "create", "process", "finish", "abort", "generate", "derive", "import", "export",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Init(_) => "init",
            Method::Create(_) => "create",
            Method::Process(_) => "process",
            Method::Finish => "finish",
            Method::Abort => "abort",
            Method::Generate(_) => "generate",
            Method::Derive(_) => "derive",
            Method::Import(_) => "import",
            Method::Export(_) => "export",
        }
    }
}

/// Notification kinds a backend may raise for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Abort,
    Error,
    Progress,
    Complete,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Abort,
        EventKind::Error,
        EventKind::Progress,
        EventKind::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Abort => "abort",
            EventKind::Error => "error",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
        }
    }

    /// `complete`, `abort` and `error` end an operation in practice.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventKind::Progress)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event record: the kind plus whatever detail fields the backend attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            detail: Map::new(),
        }
    }

    /// Attach a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    /// Build an `error` event carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error).with_detail("message", message.into())
    }
}
