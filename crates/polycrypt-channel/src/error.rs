use std::path::PathBuf;

/// Errors that can occur on a host message channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to bind to the specified socket path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified socket path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The message was addressed to a context other than the channel's peer.
    #[error("target '{target}' does not match peer origin '{origin}'")]
    TargetMismatch { target: String, origin: String },

    /// The other side of the channel has gone away.
    #[error("channel closed")]
    Closed,

    /// Envelope framing failed.
    #[error("wire error: {0}")]
    Wire(#[from] polycrypt_wire::WireError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
