use std::sync::Arc;

use polycrypt_channel::{HostChannel, Inbound};
use polycrypt_wire::OperationType;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::lifecycle::ReadinessLatch;
use crate::messenger::Link;
use crate::operation::{CryptoOperation, KeyOperation, KeyParams};
use crate::preflight;
use crate::registry::OperationRegistry;
use crate::router::Router;
use crate::scheduler::Scheduler;

/// Which implementation backs the crypto API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implementation {
    /// Reserved for hosts that expose a native crypto provider. This crate
    /// only implements the polyfill, so [`Polycrypt::implementation`] never
    /// returns it.
    Native,
    /// Work is forwarded to an isolated backend over a message channel.
    Polyfill,
}

/// Caller-facing crypto API backed by a remote backend.
///
/// ```no_run
/// # async fn demo() -> polycrypt_client::Result<()> {
/// use polycrypt_channel::UnixChannel;
/// use polycrypt_client::{ClientConfig, Polycrypt};
///
/// let (channel, inbound) = UnixChannel::connect("/tmp/polycrypt.sock").await?;
/// let client = Polycrypt::connect(channel, inbound, ClientConfig::default())?;
/// client.wait_until_alive().await?;
///
/// let op = client.digest("SHA-256", Some(b"hello".to_vec()));
/// op.finish();
/// op.completion().await;
/// println!("{:?}", op.result());
/// # Ok(())
/// # }
/// ```
pub struct Polycrypt {
    link: Link,
    registry: Arc<OperationRegistry>,
    latch: Arc<ReadinessLatch>,
    router: JoinHandle<()>,
}

impl Polycrypt {
    /// Run preflight checks and start the router and scheduler tasks.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect<C>(channel: C, inbound: Inbound, config: ClientConfig) -> Result<Self>
    where
        C: HostChannel + 'static,
    {
        let target = config
            .backend_origin
            .clone()
            .unwrap_or_else(|| channel.peer_origin().to_string());
        preflight::check(&config.state_dir, &target)?;

        let scheduler = Scheduler::spawn();
        let link = Link::new(Arc::new(channel), target, scheduler.clone());
        let registry = Arc::new(OperationRegistry::new(config.registry));
        let latch = Arc::new(ReadinessLatch::new(scheduler));

        let router = Router::new(registry.clone(), latch.clone());
        #[cfg(feature = "schema")]
        let router = match config.schema {
            Some(schema) => router.with_schema(schema),
            None => router,
        };
        let router = router.spawn(inbound);

        debug!(backend = link.target(), "client connected");
        Ok(Self {
            link,
            registry,
            latch,
            router,
        })
    }

    /// Start a streaming operation.
    ///
    /// `signature` is only accepted for verify. An absent `buffer` is sent as
    /// an empty byte sequence.
    pub fn begin_crypto_operation(
        &self,
        op_type: OperationType,
        algorithm: impl Into<Value>,
        key: Option<Value>,
        signature: Option<Vec<u8>>,
        buffer: Option<Vec<u8>>,
    ) -> Result<CryptoOperation> {
        CryptoOperation::begin(
            &self.registry,
            &self.link,
            op_type,
            algorithm.into(),
            key,
            signature,
            buffer,
        )
    }

    /// Start a one-shot key operation.
    pub fn begin_key_operation(&self, params: KeyParams) -> KeyOperation {
        KeyOperation::start(&self.registry, &self.link, params)
    }

    pub fn encrypt(
        &self,
        algorithm: impl Into<Value>,
        key: Value,
        data: Option<Vec<u8>>,
    ) -> CryptoOperation {
        self.stream(OperationType::Encrypt, algorithm.into(), Some(key), None, data)
    }

    pub fn decrypt(
        &self,
        algorithm: impl Into<Value>,
        key: Value,
        data: Option<Vec<u8>>,
    ) -> CryptoOperation {
        self.stream(OperationType::Decrypt, algorithm.into(), Some(key), None, data)
    }

    pub fn sign(
        &self,
        algorithm: impl Into<Value>,
        key: Value,
        data: Option<Vec<u8>>,
    ) -> CryptoOperation {
        self.stream(OperationType::Sign, algorithm.into(), Some(key), None, data)
    }

    pub fn verify(
        &self,
        algorithm: impl Into<Value>,
        key: Value,
        signature: Vec<u8>,
        data: Option<Vec<u8>>,
    ) -> CryptoOperation {
        self.stream(
            OperationType::Verify,
            algorithm.into(),
            Some(key),
            Some(signature),
            data,
        )
    }

    pub fn digest(&self, algorithm: impl Into<Value>, data: Option<Vec<u8>>) -> CryptoOperation {
        self.stream(OperationType::Digest, algorithm.into(), None, None, data)
    }

    pub fn generate_key(
        &self,
        algorithm: impl Into<Value>,
        extractable: bool,
        key_usages: Vec<String>,
    ) -> KeyOperation {
        self.begin_key_operation(KeyParams::Generate {
            algorithm: algorithm.into(),
            extractable,
            key_usages,
        })
    }

    pub fn derive_key(
        &self,
        algorithm: impl Into<Value>,
        base_key: Value,
        derived_key_type: impl Into<Value>,
        extractable: bool,
        key_usages: Vec<String>,
    ) -> KeyOperation {
        self.begin_key_operation(KeyParams::Derive {
            algorithm: algorithm.into(),
            base_key,
            derived_key_type: derived_key_type.into(),
            extractable,
            key_usages,
        })
    }

    pub fn import_key(
        &self,
        format: impl Into<String>,
        key_data: Value,
        algorithm: impl Into<Value>,
        extractable: bool,
        key_usages: Vec<String>,
    ) -> KeyOperation {
        self.begin_key_operation(KeyParams::Import {
            format: format.into(),
            key_data,
            algorithm: algorithm.into(),
            extractable,
            key_usages,
        })
    }

    pub fn export_key(&self, format: impl Into<String>, key: Value) -> KeyOperation {
        self.begin_key_operation(KeyParams::Export {
            format: format.into(),
            key,
        })
    }

    /// Set the readiness callback, replacing any earlier one. It runs once,
    /// when the backend first announces itself.
    pub fn on_backend_alive(&self, callback: impl FnOnce() + Send + 'static) {
        self.latch.on_alive(callback);
    }

    pub fn is_backend_alive(&self) -> bool {
        self.latch.is_alive()
    }

    /// Wait for the readiness sentinel.
    pub async fn wait_until_alive(&self) -> Result<()> {
        if self.latch.wait_alive().await {
            Ok(())
        } else {
            Err(ClientError::Shutdown)
        }
    }

    pub fn implementation(&self) -> Implementation {
        Implementation::Polyfill
    }

    pub fn is_polyfill(&self) -> bool {
        self.implementation() == Implementation::Polyfill
    }

    /// Operations still routable.
    pub fn live_operations(&self) -> usize {
        self.registry.len()
    }

    /// Wait until every listener invocation scheduled so far has run.
    pub async fn flush(&self) {
        self.link.scheduler().flush().await;
    }

    fn stream(
        &self,
        op_type: OperationType,
        algorithm: Value,
        key: Option<Value>,
        signature: Option<Vec<u8>>,
        data: Option<Vec<u8>>,
    ) -> CryptoOperation {
        CryptoOperation::start(
            &self.registry,
            &self.link,
            op_type,
            algorithm,
            key,
            signature,
            data,
        )
    }
}

impl std::fmt::Debug for Polycrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Polycrypt")
            .field("link", &self.link)
            .field("live_operations", &self.registry.len())
            .field("alive", &self.latch.is_alive())
            .finish()
    }
}

impl Drop for Polycrypt {
    fn drop(&mut self) {
        self.router.abort();
    }
}
