/// Errors surfaced by the client before or outside of an operation.
///
/// Failures inside an operation never come back through these; they arrive
/// as `error` events on the operation handle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The environment cannot host a client.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The request does not fit the chosen operation kind.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Host channel error.
    #[error("channel error: {0}")]
    Channel(#[from] polycrypt_channel::ChannelError),

    /// Envelope encoding or framing error.
    #[error("wire error: {0}")]
    Wire(#[from] polycrypt_wire::WireError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema validation error.
    #[cfg(feature = "schema")]
    #[error("schema validation error: {0}")]
    Schema(#[from] polycrypt_schema::SchemaError),

    /// The inbound side of the channel closed.
    #[error("backend channel closed")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ClientError>;
