use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::verb::{Event, Method};

/// Marker stamped on every protocol envelope.
///
/// Improbable to collide with unrelated traffic on a shared channel. It is a
/// correctness filter, not a credential.
pub const MARKER: &str = "PolyCrypt-21A30E0E-1048-4ED0-BF7A-B1E01CA328E9";

/// Bare payload the backend posts once it has finished bootstrapping.
pub const READY_SENTINEL: &str = "polycrypt backend is alive";

const KEY_MARKER: &str = "cookie";
const KEY_OPERATION_ID: &str = "opid";
const KEY_TO_BACKEND: &str = "toBack";
const KEY_TO_CALLER: &str = "toFront";
const KEY_METHOD: &str = "method";
const KEY_ARGS: &str = "args";
const KEY_EVENT: &str = "event";
const KEY_RESULT: &str = "result";

/// Identifier of one asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the boundary should act on an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToBackend,
    ToCaller,
}

impl Direction {
    fn wire_key(self) -> &'static str {
        match self {
            Direction::ToBackend => KEY_TO_BACKEND,
            Direction::ToCaller => KEY_TO_CALLER,
        }
    }
}

/// What an envelope carries: a request or a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Method(Method),
    Event(Event),
}

/// A decoded protocol message.
///
/// Wire shape:
/// ```text
/// { "cookie": MARKER, "opid": 7, "toBack": true, "method": "process", "args": {...} }
/// { "cookie": MARKER, "opid": 7, "toFront": true, "event": {"type": "complete"}, "result": ... }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub direction: Direction,
    pub operation_id: Option<OperationId>,
    pub method: Option<Method>,
    pub event: Option<Event>,
    pub result: Option<Value>,
}

impl Envelope {
    /// Build an envelope. `operation_id` is `None` only for global signals.
    pub fn build(
        direction: Direction,
        operation_id: Option<OperationId>,
        body: Body,
        result: Option<Value>,
    ) -> Self {
        let (method, event) = match body {
            Body::Method(method) => (Some(method), None),
            Body::Event(event) => (None, Some(event)),
        };
        Self {
            direction,
            operation_id,
            method,
            event,
            result,
        }
    }

    /// Caller-to-backend request for an operation.
    pub fn request(operation_id: OperationId, method: Method) -> Self {
        Self::build(
            Direction::ToBackend,
            Some(operation_id),
            Body::Method(method),
            None,
        )
    }

    /// Backend-to-caller notification for an operation.
    pub fn notification(operation_id: OperationId, event: Event, result: Option<Value>) -> Self {
        Self::build(
            Direction::ToCaller,
            Some(operation_id),
            Body::Event(event),
            result,
        )
    }

    /// Serialize into the wire object, stamping the marker.
    pub fn to_value(&self) -> Result<Value> {
        let mut map = Map::new();
        map.insert(KEY_MARKER.to_string(), Value::from(MARKER));
        if let Some(id) = self.operation_id {
            map.insert(KEY_OPERATION_ID.to_string(), Value::from(id.get()));
        }
        map.insert(self.direction.wire_key().to_string(), Value::Bool(true));

        if let Some(method) = &self.method {
            if let Value::Object(verb) = serde_json::to_value(method)? {
                map.extend(verb);
            }
        }
        if let Some(event) = &self.event {
            map.insert(KEY_EVENT.to_string(), serde_json::to_value(event)?);
        }
        if let Some(result) = &self.result {
            map.insert(KEY_RESULT.to_string(), result.clone());
        }

        Ok(Value::Object(map))
    }

    /// Decode an untrusted payload.
    ///
    /// Returns `None` when the payload is not a valid envelope, carries no
    /// direction flag, has a non-integer operation id, or names a verb outside
    /// the closed [`Method`]/[`crate::EventKind`] sets.
    ///
    /// Rejection is whole-envelope: a `result` riding on an envelope whose
    /// `event.type` is unknown is discarded with it and never reaches the
    /// operation's cached result.
    pub fn parse(raw: &Value) -> Option<Self> {
        if !validate(raw) {
            return None;
        }
        let map = raw.as_object()?;

        let direction = if is_flag_set(map, KEY_TO_CALLER) {
            Direction::ToCaller
        } else if is_flag_set(map, KEY_TO_BACKEND) {
            Direction::ToBackend
        } else {
            return None;
        };

        let operation_id = match map.get(KEY_OPERATION_ID) {
            None => None,
            Some(raw_id) => Some(OperationId::new(raw_id.as_u64()?)),
        };

        let method = match map.get(KEY_METHOD) {
            None | Some(Value::Null) => None,
            Some(name) => {
                let mut verb = Map::new();
                verb.insert(KEY_METHOD.to_string(), name.clone());
                if let Some(args) = map.get(KEY_ARGS).filter(|args| !args.is_null()) {
                    verb.insert(KEY_ARGS.to_string(), args.clone());
                }
                Some(serde_json::from_value(Value::Object(verb)).ok()?)
            }
        };

        let event = match map.get(KEY_EVENT) {
            None | Some(Value::Null) => None,
            Some(event) => Some(serde_json::from_value(event.clone()).ok()?),
        };

        Some(Self {
            direction,
            operation_id,
            method,
            event,
            result: map.get(KEY_RESULT).cloned(),
        })
    }
}

/// Returns true iff `raw` is an object carrying the exact marker and at least
/// one of `method` or `event`.
pub fn validate(raw: &Value) -> bool {
    let Some(map) = raw.as_object() else {
        return false;
    };
    map.get(KEY_MARKER).and_then(Value::as_str) == Some(MARKER)
        && (map.contains_key(KEY_METHOD) || map.contains_key(KEY_EVENT))
}

/// Returns true iff `raw` is the bare readiness sentinel.
pub fn is_ready_sentinel(raw: &Value) -> bool {
    raw.as_str() == Some(READY_SENTINEL)
}

fn is_flag_set(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}
