//! Configuration data structures

use std::path::PathBuf;
use std::time::Duration;

use tilewire::options::{
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL, DEFAULT_SOCKET_WAIT_ATTEMPTS,
    DEFAULT_SOCKET_WAIT_INTERVAL,
};
use tilewire::ConnectionOptions;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub log_level: LogLevel,
}

impl ClientConfig {
    /// Options for [`tilewire::Connection::connect`] and
    /// [`tilewire::AsyncConnection::connect`]
    pub fn connection_options(&self) -> ConnectionOptions {
        let c = &self.connection;
        let mut options = ConnectionOptions::new()
            .auto_reconnect(c.auto_reconnect)
            .socket_wait(c.socket_wait_attempts, c.socket_wait_interval)
            .reconnect(c.reconnect_attempts, c.reconnect_interval);
        if let Some(path) = &c.socket_path {
            options = options.socket_path(path);
        }
        options
    }
}

/// The `connection { ... }` block
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Socket to use instead of discovering one, tilde expanded
    pub socket_path: Option<PathBuf>,
    pub auto_reconnect: bool,
    pub socket_wait_attempts: u32,
    pub socket_wait_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
}

impl Default for ConnectionConfig {
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}
