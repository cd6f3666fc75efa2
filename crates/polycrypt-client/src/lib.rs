//! Caller side of the PolyCrypt backend protocol.
//!
//! A [`Polycrypt`] client sits on top of an injected host channel and turns
//! message passing into operation handles that behave like a native
//! asynchronous crypto API:
//!
//! - [`CryptoOperation`]: streaming encrypt/decrypt/sign/verify/digest
//! - [`KeyOperation`]: one-shot generate/derive/import/export
//!
//! Every caller-facing method only enqueues a message. Results and events
//! arrive later on the router task, and listeners run on a separate
//! scheduler task, never inside the call that triggered them.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod messenger;
pub mod operation;
pub mod preflight;
pub mod registry;
pub mod router;
pub mod scheduler;

pub use client::{Implementation, Polycrypt};
pub use config::{ClientConfig, RegistryConfig};
pub use error::{ClientError, Result};
pub use lifecycle::ReadinessLatch;
pub use messenger::{
    Disposition, DropReason, Link, Listener, ListenerId, Messenger, OperationEvent,
    OperationHandle, OperationStatus,
};
pub use operation::{CryptoOperation, KeyOperation, KeyParams};
pub use registry::OperationRegistry;
pub use router::Router;
pub use scheduler::Scheduler;
