//! Optional JSON Schema validation of envelope payloads.
//!
//! Schemas are keyed by verb: a request name (`create`, `process`, ...) or an
//! event kind (`complete`, `error`, ...). Each schema describes the whole
//! envelope object carrying that verb, so it can constrain `args`, `event`
//! and `result` alike.
//!
//! Use it when the backend is not fully trusted to honor the payload
//! contract; the envelope validator alone only checks the outer shape.

pub mod config;
pub mod error;
pub mod registry;
pub mod validator;

pub use config::SchemaConfig;
pub use error::{Result, SchemaError};
pub use registry::{is_known_verb, SchemaRegistry};
