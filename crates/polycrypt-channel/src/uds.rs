use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use futures_util::{SinkExt, StreamExt};
use polycrypt_wire::{CodecConfig, EnvelopeCodec};
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Result};
use crate::traits::{check_target, HostChannel, Inbound};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// Origin identifier for a socket path: `unix://<path>`.
pub fn socket_origin(path: &Path) -> String {
    format!("unix://{}", path.display())
}

/// Host channel over a Unix domain socket.
///
/// Envelopes travel as [`EnvelopeCodec`] frames. A writer task drains the
/// outbound queue in post order; a reader task feeds every decoded payload to
/// the [`Inbound`] half.
#[derive(Debug, Clone)]
pub struct UnixChannel {
    peer_origin: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl UnixChannel {
    /// Connect to a backend listening on `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<(Self, Inbound)> {
        Self::connect_with_config(path, CodecConfig::default()).await
    }

    /// Connect with explicit codec configuration.
    pub async fn connect_with_config(
        path: impl AsRef<Path>,
        config: CodecConfig,
    ) -> Result<(Self, Inbound)> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ChannelError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "connected to backend socket");
        Ok(Self::from_stream(stream, socket_origin(path), config))
    }

    /// Wrap an already-connected stream. Must be called inside a Tokio runtime.
    pub fn from_stream(
        stream: UnixStream,
        peer_origin: String,
        config: CodecConfig,
    ) -> (Self, Inbound) {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

        let mut sink = FramedWrite::new(write_half, EnvelopeCodec::with_config(config.clone()));
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(err) = sink.send(message).await {
                    warn!(error = %err, "socket write failed; closing outbound half");
                    break;
                }
            }
        });

        let mut frames = FramedRead::new(read_half, EnvelopeCodec::with_config(config));
        tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                match item {
                    Ok(value) => {
                        if in_tx.send(value).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "socket read failed; closing inbound half");
                        break;
                    }
                }
            }
            debug!("socket reader finished");
        });

        (
            Self {
                peer_origin,
                tx: out_tx,
            },
            Inbound::from_receiver(in_rx),
        )
    }
}

impl HostChannel for UnixChannel {
    fn post(&self, message: Value, target: &str) -> Result<()> {
        check_target(target, &self.peer_origin)?;
        self.tx.send(message).map_err(|_| ChannelError::Closed)
    }

    fn peer_origin(&self) -> &str {
        &self.peer_origin
    }
}

/// Backend-side socket listener.
///
/// Accepted connections are exposed as [`UnixChannel`]s whose peer origin is
/// the caller (`unix-peer://<path>`). The socket file is removed on drop when
/// it is still the one this listener created.
pub struct UnixBackendListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    config: CodecConfig,
}

impl UnixBackendListener {
    /// Bind on a filesystem path with [`DEFAULT_SOCKET_MODE`].
    ///
    /// A stale socket at `path` is removed first; any other existing file is
    /// an error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(ChannelError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| ChannelError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "backend listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: (created.dev(), created.ino()),
            path,
            config: CodecConfig::default(),
        })
    }

    /// Override codec configuration for accepted connections.
    pub fn with_codec_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next caller connection.
    pub async fn accept(&self) -> Result<(UnixChannel, Inbound)> {
        let (stream, _addr) = self.listener.accept().await.map_err(ChannelError::Accept)?;
        debug!(path = ?self.path, "accepted caller connection");
        Ok(UnixChannel::from_stream(
            stream,
            format!("unix-peer://{}", self.path.display()),
            self.config.clone(),
        ))
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Origin a caller uses to address this backend.
    pub fn origin(&self) -> String {
        socket_origin(&self.path)
    }
}

impl Drop for UnixBackendListener {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}
