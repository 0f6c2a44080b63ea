//! Error types for window manager IPC operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when communicating with the window manager
#[derive(Debug, Error)]
pub enum IpcError {
    /// No socket path was given and none could be discovered
    #[error("Failed to retrieve the i3 or sway IPC socket path - is the window manager running?")]
    SocketNotFound,

    /// Failed to connect to the IPC socket
    #[error("Failed to connect to IPC socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a frame to the socket
    #[error("Failed to send message: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Failed to read a frame from the socket
    #[error("Failed to receive message: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The socket reached EOF
    #[error("Connection to the window manager closed")]
    ConnectionClosed,

    /// The frame header did not start with the protocol magic
    #[error("Invalid IPC magic: {0:?}")]
    InvalidMagic([u8; 6]),

    /// The stream ended in the middle of a frame
    #[error("Truncated frame: expected {expected} bytes, got {read}")]
    Truncated { expected: usize, read: usize },

    /// A reply arrived for a different message type than the one requested
    #[error("Unexpected reply type {got} (expected {expected})")]
    UnexpectedReply { expected: u32, got: u32 },

    /// The payload was not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidPayload(#[source] std::string::FromUtf8Error),

    /// Failed to serialize an outgoing payload
    #[error("Failed to serialize payload: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize a reply or event payload
    #[error("Failed to deserialize payload: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// The event name is not part of the protocol
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Only coarse event kinds can be sent in a SUBSCRIBE message
    #[error("Only non-detailed events are subscribable: {0}")]
    DetailedSubscription(String),

    /// Reconnection gave up
    #[error("Failed to reconnect to the window manager after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// `main()` was entered while another `main()` was still running
    #[error("The main loop is already running")]
    AlreadyRunning,

    /// An event handler returned an error
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl IpcError {
    /// Whether this error comes from the transport rather than the stream
    /// contents.
    ///
    /// Transport errors are the only ones auto-reconnect recovers from.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
                | Self::ConnectionClosed
        )
    }
}
