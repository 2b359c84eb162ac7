//! Backend transport
//!
//! The packet-forwarding backend is opaque: it accepts a UAPI `set` payload
//! and answers a UAPI `get` query. [`UapiSocketBackend`] talks to a backend
//! that exposes the standard UAPI Unix socket.

use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// Error code reported when the backend answered without an `errno=` line.
pub const ERRNO_MISSING: i32 = -1;

/// Opaque handle to a running backend instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub i32);

/// A tunnel backend driven through UAPI text.
///
/// Errors are the backend's numeric error codes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Bring up a backend instance on `tunnel_fd` configured with `settings`.
    async fn turn_on(&self, settings: &str, tunnel_fd: i32) -> Result<BackendHandle, i32>;

    /// Apply a UAPI `set` payload to a running instance.
    async fn set_config(&self, handle: BackendHandle, settings: &str) -> Result<(), i32>;

    /// Query the instance; `None` when the handle is unknown or the query fails.
    async fn get_config(&self, handle: BackendHandle) -> Option<String>;

    /// Tear down the instance.
    async fn turn_off(&self, handle: BackendHandle);
}

/// Backend reached over its UAPI Unix socket
#[derive(Debug)]
pub struct UapiSocketBackend {
    socket_path: PathBuf,
    next_handle: AtomicI32,
    live: Mutex<HashSet<BackendHandle>>,
}

impl UapiSocketBackend {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            next_handle: AtomicI32::new(1),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Conventional socket path for a named interface.
    pub fn for_interface(interface_name: &str) -> Self {
        Self::new(Path::new("/var/run/wireguard").join(format!("{interface_name}.sock")))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn is_live(&self, handle: BackendHandle) -> bool {
        self.live
            .lock()
            .map(|live| live.contains(&handle))
            .unwrap_or(false)
    }

    /// Send a UAPI `set` command. `body` is the payload without the leading
    /// `set=1` line.
    pub async fn uapi_set(&self, body: &str) -> io::Result<i32> {
        let msg = format!("set=1\n{body}\n");
        let response = self.exchange(msg.as_bytes()).await?;
        Ok(parse_errno(&response).unwrap_or(ERRNO_MISSING))
    }

    /// Send a UAPI `get` command and return the raw response.
    pub async fn uapi_get(&self) -> io::Result<String> {
        self.exchange(b"get=1\n\n").await
    }

    async fn exchange(&self, request: &[u8]) -> io::Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(request).await?;
        stream.shutdown().await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    async fn apply(&self, settings: &str) -> Result<(), i32> {
        match self.uapi_set(settings).await {
            Ok(0) => Ok(()),
            Ok(errno) => {
                warn!(socket = %self.socket_path.display(), errno, "UAPI set rejected");
                Err(errno)
            }
            Err(e) => {
                warn!(socket = %self.socket_path.display(), error = %e, "UAPI socket unreachable");
                Err(e.raw_os_error().unwrap_or(ERRNO_MISSING))
            }
        }
    }
}

#[async_trait]
impl Backend for UapiSocketBackend {
    async fn turn_on(&self, settings: &str, tunnel_fd: i32) -> Result<BackendHandle, i32> {
        // The socket owner already holds the tunnel device; the fd is only logged.
        debug!(socket = %self.socket_path.display(), tunnel_fd, "Turning on backend");
        self.apply(settings).await?;
        let handle = BackendHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut live) = self.live.lock() {
            live.insert(handle);
        }
        Ok(handle)
    }

    async fn set_config(&self, handle: BackendHandle, settings: &str) -> Result<(), i32> {
        if !self.is_live(handle) {
            return Err(ERRNO_MISSING);
        }
        self.apply(settings).await
    }

    async fn get_config(&self, handle: BackendHandle) -> Option<String> {
        if !self.is_live(handle) {
            return None;
        }
        match self.uapi_get().await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(socket = %self.socket_path.display(), error = %e, "UAPI get failed");
                None
            }
        }
    }

    async fn turn_off(&self, handle: BackendHandle) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&handle);
        }
        debug!(socket = %self.socket_path.display(), handle = handle.0, "Backend turned off");
    }
}

/// Extract the value of the `errno=` line from a UAPI response.
pub fn parse_errno(response: &str) -> Option<i32> {
    response
        .lines()
        .find_map(|line| line.trim().strip_prefix("errno="))
        .and_then(|v| v.parse().ok())
}
