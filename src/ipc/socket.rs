//! Socket paths, connection errors and connect-with-backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixStream;

/// Socket file name used under the runtime or cache directory.
pub const SOCKET_FILE_NAME: &str = "canvas-bridge.sock";

#[derive(Debug, Error)]
pub enum IpcError {
    /// Could not reach the host socket.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                IpcError::ConnectionFailed(err)
            }
            _ => IpcError::Io(err),
        }
    }
}

/// Resolve the default host socket path.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/canvas-bridge.sock`
/// 2. the user cache directory (`~/Library/Caches` on macOS)
/// 3. `/tmp/canvas-bridge.sock`
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join(SOCKET_FILE_NAME);
        }
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_FILE_NAME);
    }

    PathBuf::from("/tmp").join(SOCKET_FILE_NAME)
}

/// Connect to the host socket, retrying with exponential backoff.
///
/// Waits 100ms, 200ms, 400ms, ... between attempts.
///
/// # Errors
///
/// Returns the last connection error once `max_attempts` are used up.
pub async fn connect_with_retry(socket_path: &Path, max_attempts: u32) -> Result<UnixStream, IpcError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < max_attempts => {
                let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                tracing::debug!(attempt, error = %e, "Host not reachable, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(IpcError::ConnectionFailed(e)),
        }
    }
}
