use std::path::PathBuf;
#[cfg(feature = "schema")]
use std::sync::Arc;

#[cfg(feature = "schema")]
use polycrypt_schema::SchemaRegistry;

/// Controls operation registry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Drop an operation from the dispatch table once it reaches a terminal
    /// status. Later messages for that id are discarded as unknown.
    pub reclaim_terminal: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reclaim_terminal: true,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target origin for outbound posts. Defaults to the channel's peer origin.
    pub backend_origin: Option<String>,
    /// Directory the client must be able to write to.
    pub state_dir: PathBuf,
    pub registry: RegistryConfig,
    /// Inbound envelopes failing the schema for their event kind are dropped.
    #[cfg(feature = "schema")]
    pub schema: Option<Arc<SchemaRegistry>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_origin: None,
            state_dir: std::env::temp_dir(),
            registry: RegistryConfig::default(),
            #[cfg(feature = "schema")]
            schema: None,
        }
    }
}

impl ClientConfig {
    pub fn with_backend_origin(mut self, origin: impl Into<String>) -> Self {
        self.backend_origin = Some(origin.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    #[cfg(feature = "schema")]
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }
}
