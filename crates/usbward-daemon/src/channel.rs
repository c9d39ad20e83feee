//! Datagram channel to the kernel-side enforcement point.
//!
//! The abstract point-to-point transport is realized as a pair of Unix
//! datagram sockets: the daemon binds its own address first, the kernel
//! counterpart binds the peer address, and each receive yields exactly one
//! fixed-size record (the transport never batches). Process identity is the
//! socket path; the `Init` exchange on top of this channel carries the
//! greeting, not the addressing.
//!
//! # Security Considerations
//!
//! - The socket directory is created with mode 0700 and refused if it is a
//!   symlink; existing directories keep their permissions.
//! - The socket file itself is restricted to mode 0600 after binding.
//! - Stale socket files are removed before binding, but only if they
//!   actually are sockets.
//! - An oversized datagram is truncated by the kernel into a length
//!   mismatch, which the codec rejects; it cannot over-read the buffer.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::net::UnixDatagram;
use tracing::{debug, warn};
use usbward_core::wire::codec::{self, RECORD_LEN, WireError};
use usbward_core::wire::Message;

/// Socket file permissions (owner read/write only).
const SOCKET_MODE: u32 = 0o600;

/// Directory permissions for directories this module creates.
const DIRECTORY_MODE: u32 = 0o700;

/// Default subdirectory under the runtime directory.
const DEFAULT_SUBDIR: &str = "usbward";

/// Default daemon socket filename.
const DEFAULT_SOCKET_NAME: &str = "usbward.sock";

/// Default peer (kernel enforcement point) socket filename.
const DEFAULT_PEER_SOCKET_NAME: &str = "kernel.sock";

/// Channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The local socket could not be bound. Fatal at startup.
    #[error("failed to bind channel socket at {path}: {source}")]
    Bind {
        /// Attempted socket path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A receive failed at the transport layer.
    #[error("channel receive failed: {0}")]
    Recv(#[source] io::Error),

    /// A send failed at the transport layer.
    #[error("channel send failed: {0}")]
    Send(#[source] io::Error),

    /// A received record failed to decode. Recoverable: drop and continue.
    #[error("malformed record: {0}")]
    Malformed(#[from] WireError),
}

impl ChannelError {
    /// Whether this error is a malformed inbound record (drop and keep the
    /// session) rather than a transport failure (tear the session down).
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Returns the default daemon socket path.
///
/// `$XDG_RUNTIME_DIR/usbward/usbward.sock` when the runtime directory is
/// set, `/tmp/usbward/usbward.sock` otherwise.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join(DEFAULT_SOCKET_NAME)
}

/// Returns the default peer socket path, alongside the daemon socket.
#[must_use]
pub fn default_peer_socket_path() -> PathBuf {
    runtime_dir().join(DEFAULT_PEER_SOCKET_NAME)
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| PathBuf::from("/tmp").join(DEFAULT_SUBDIR),
        |dir| PathBuf::from(dir).join(DEFAULT_SUBDIR),
    )
}

/// Channel configuration: where the daemon listens and where the peer does.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// The daemon's own socket path (bound by this process).
    pub local_path: PathBuf,
    /// The peer's socket path (bound by the enforcement point).
    pub peer_path: PathBuf,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            local_path: default_socket_path(),
            peer_path: default_peer_socket_path(),
        }
    }
}

impl ChannelConfig {
    /// Creates a config with explicit socket paths.
    #[must_use]
    pub fn new(local_path: impl Into<PathBuf>, peer_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            peer_path: peer_path.into(),
        }
    }
}

/// One bound session channel.
///
/// Owned by the session loop; dropping it removes the socket file.
pub struct Channel {
    socket: UnixDatagram,
    config: ChannelConfig,
}

impl Channel {
    /// Binds the daemon's socket.
    ///
    /// Creates the parent directory (mode 0700) if needed and removes a
    /// stale socket file left by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Bind`] if the directory cannot be prepared
    /// or the socket cannot be bound. The caller treats this as fatal.
    pub fn bind(config: ChannelConfig) -> Result<Self, ChannelError> {
        let bind_err = |source: io::Error| ChannelError::Bind {
            path: config.local_path.clone(),
            source,
        };

        if let Some(parent) = config.local_path.parent() {
            ensure_directory(parent).map_err(bind_err)?;
        }
        cleanup_socket(&config.local_path).map_err(bind_err)?;

        let socket = UnixDatagram::bind(&config.local_path).map_err(bind_err)?;
        set_socket_permissions(&config.local_path).map_err(bind_err)?;

        debug!(
            local = %config.local_path.display(),
            peer = %config.peer_path.display(),
            "channel bound"
        );
        Ok(Self { socket, config })
    }

    /// Sends one record to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Send`] on transport failure; the caller logs
    /// and continues (the device simply receives no reply).
    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let record = codec::encode(message);
        self.socket
            .send_to(&record, &self.config.peer_path)
            .await
            .map_err(ChannelError::Send)?;
        Ok(())
    }

    /// Receives and decodes exactly one record.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Malformed`] for undecodable records (drop
    /// and continue) and [`ChannelError::Recv`] for transport failures.
    pub async fn recv(&self) -> Result<Message, ChannelError> {
        // One extra byte so a record that was truncated by the kernel (or
        // padded by a confused peer) shows up as a length mismatch.
        let mut buf = [0u8; RECORD_LEN + 1];
        let (len, _addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(ChannelError::Recv)?;
        Ok(codec::decode(&buf[..len])?)
    }

    /// The daemon's bound socket path.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.config.local_path
    }

    /// The peer's socket path.
    #[must_use]
    pub fn peer_path(&self) -> &Path {
        &self.config.peer_path
    }

    /// Removes the daemon's socket file.
    fn cleanup(&self) {
        if self.config.local_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.local_path) {
                warn!(
                    path = %self.config.local_path.display(),
                    "failed to remove socket file: {e}"
                );
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Ensures a directory exists. Newly created directories get mode 0700;
/// existing directories are left untouched. Symlinks are refused.
fn ensure_directory(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} is a symlink, refusing to use as socket directory",
                        path.display()
                    ),
                ));
            }
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", path.display()),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIRECTORY_MODE))?;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Removes a stale socket file, refusing to delete anything that is not a
/// socket.
fn cleanup_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileTypeExt;
                if !metadata.file_type().is_socket() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("path {} exists but is not a socket", path.display()),
                    ));
                }
            }
            #[cfg(not(unix))]
            let _ = metadata;
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
