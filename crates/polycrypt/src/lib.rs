//! Asynchronous crypto API polyfill backed by an isolated backend.
//!
//! The calling application gets WebCrypto-shaped operation handles; the
//! cryptographic work happens in a separate backend context reachable only
//! through an untrusted message channel.
//!
//! # Crate Structure
//!
//! - [`wire`]: envelope format, closed verb sets, stream framing
//! - [`channel`]: host message channels (in-memory, Unix socket)
//! - [`client`]: operation registry, messenger, operation handles
//! - [`schema`]: optional JSON Schema validation (behind `schema` feature)
//! - [`loopback`]: non-cryptographic reference backend (behind `loopback` feature)

/// Re-export wire types.
pub mod wire {
    pub use polycrypt_wire::*;
}

/// Re-export channel types.
pub mod channel {
    pub use polycrypt_channel::*;
}

/// Re-export client types.
pub mod client {
    pub use polycrypt_client::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use polycrypt_schema::*;
}

#[cfg(feature = "loopback")]
pub mod loopback;

pub use polycrypt_client::{ClientConfig, ClientError, CryptoOperation, KeyOperation, Polycrypt};
