//! Host message channels.
//!
//! A channel is the only transport between the caller and the backend
//! context. It is split in two halves:
//! - [`HostChannel`]: posts a JSON message to a target context, never blocks
//! - [`Inbound`]: every payload the host delivers, unfiltered and untrusted
//!
//! Implementations:
//! - [`MemoryChannel`]: in-process pair, used for embedding and tests
//! - [`UnixChannel`]: framed envelopes over a Unix domain socket (Unix only)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{ChannelError, Result};
pub use memory::MemoryChannel;
pub use traits::{HostChannel, Inbound, ANY_TARGET};

#[cfg(unix)]
pub use uds::{UnixBackendListener, UnixChannel};
