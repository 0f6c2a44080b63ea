//! Connection settings

use std::path::PathBuf;
use std::time::Duration;

/// Default number of polls for the socket file after a restart
pub const DEFAULT_SOCKET_WAIT_ATTEMPTS: u32 = 500;

pub const DEFAULT_SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of reconnect attempts of the async connection
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 500;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1);

/// How to find and keep a connection to the window manager
///
/// # Example
///
/// ```ignore
/// let options = ConnectionOptions::new()
///     .socket_path("/run/user/1000/sway-ipc.sock")
///     .auto_reconnect(true);
/// let conn = Connection::connect(options)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Explicit socket path; discovered when `None`
    pub socket_path: Option<PathBuf>,

    /// Survive a window manager restart
    ///
    /// When set, transport failures wait for the socket to reappear and
    /// reconnect instead of surfacing to the caller.
    pub auto_reconnect: bool,

    /// How many times to look for the socket file before giving up
    pub socket_wait_attempts: u32,

    pub socket_wait_interval: Duration,

    /// How many times the async connection retries `connect()`
    pub reconnect_attempts: u32,

    pub reconnect_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            socket_path: None,
            auto_reconnect: false,
            socket_wait_attempts: DEFAULT_SOCKET_WAIT_ATTEMPTS,
            socket_wait_interval: DEFAULT_SOCKET_WAIT_INTERVAL,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn socket_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.socket_wait_attempts = attempts;
        self.socket_wait_interval = interval;
        self
    }

    pub fn reconnect(mut self, attempts: u32, interval: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_interval = interval;
        self
    }
}
