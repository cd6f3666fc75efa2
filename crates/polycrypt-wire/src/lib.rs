//! Wire format of the PolyCrypt backend protocol.
//!
//! Every message that crosses the trust boundary between the caller and the
//! backend is an [`Envelope`]: a JSON object stamped with a fixed marker,
//! a direction flag, an optional operation id, and either a [`Method`]
//! (caller to backend) or an [`Event`] (backend to caller).
//!
//! Construction is strict, parsing is lenient: [`validate`] and
//! [`Envelope::parse`] never fail loudly, they return `false`/`None` and the
//! caller drops the message.
//!
//! For byte-stream transports each envelope is framed with:
//! - A 2-byte magic number ("PC") for stream synchronization
//! - A 4-byte little-endian payload length

pub mod codec;
pub mod envelope;
pub mod error;
pub mod verb;

pub use codec::{
    decode_frame, encode_frame, CodecConfig, EnvelopeCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use envelope::{
    is_ready_sentinel, validate, Body, Direction, Envelope, OperationId, MARKER, READY_SENTINEL,
};
pub use error::{Result, WireError};
pub use verb::{
    CreateArgs, Event, EventKind, InitArgs, KeyArgs, Method, OperationType, ProcessArgs,
};
