//! Wire codec for the i3/sway IPC protocol
//!
//! Every message, in both directions, is framed the same way:
//!
//! ```text
//! +----------+----------------+-------------+-------------------+
//! | "i3-ipc" | payload length | type code   | payload (UTF-8)   |
//! | 6 bytes  | u32 native     | u32 native  | `length` bytes    |
//! +----------+----------------+-------------+-------------------+
//! ```
//!
//! The high bit of the type code is set on events and clear on replies.
//! The payload length bounds the message exactly, so a reader that has
//! consumed `length` bytes after the header has consumed one message.

use std::io::{ErrorKind, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::IpcError;

/// Protocol magic at the start of every frame
pub const MAGIC: &[u8; 6] = b"i3-ipc";

/// Size of the fixed frame header (magic + length + type)
pub const HEADER_LEN: usize = 14;

/// Bit set on the type code of every event frame
pub const EVENT_BIT: u32 = 1 << 31;

/// Request kinds a client can send
///
/// The reply to each request carries the same type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Run one or more `;`-separated commands
    RunCommand = 0,
    GetWorkspaces = 1,
    /// Subscribe the socket to event kinds
    Subscribe = 2,
    GetOutputs = 3,
    GetTree = 4,
    GetMarks = 5,
    GetBarConfig = 6,
    GetVersion = 7,
    GetBindingModes = 8,
    GetConfig = 9,
    SendTick = 10,
    GetBindingState = 12,
    /// sway only
    GetInputs = 100,
    /// sway only
    GetSeats = 101,
}

impl MessageType {
    /// The numeric code sent on the wire
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::RunCommand),
            1 => Some(Self::GetWorkspaces),
            2 => Some(Self::Subscribe),
            3 => Some(Self::GetOutputs),
            4 => Some(Self::GetTree),
            5 => Some(Self::GetMarks),
            6 => Some(Self::GetBarConfig),
            7 => Some(Self::GetVersion),
            8 => Some(Self::GetBindingModes),
            9 => Some(Self::GetConfig),
            10 => Some(Self::SendTick),
            12 => Some(Self::GetBindingState),
            100 => Some(Self::GetInputs),
            101 => Some(Self::GetSeats),
            _ => None,
        }
    }
}

/// A decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 6],
    pub length: u32,
    pub type_code: u32,
}

/// One complete message read off a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub type_code: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Whether this frame is an unsolicited event rather than a reply
    pub fn is_event(&self) -> bool {
        self.type_code & EVENT_BIT != 0
    }

    /// Decode the payload as UTF-8
    pub fn into_payload(self) -> Result<String, IpcError> {
        String::from_utf8(self.payload).map_err(IpcError::InvalidPayload)
    }
}

/// Serialize a message into a frame
///
/// No length limit is enforced; the transport is a trusted local socket.
pub fn encode(type_code: u32, payload: &str) -> Vec<u8> {
    let payload = payload.as_bytes();
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());

    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    bytes.extend_from_slice(&type_code.to_ne_bytes());
    bytes.extend_from_slice(payload);

    bytes
}

/// Parse a fixed-size frame header
///
/// The caller is responsible for reading exactly `length` payload bytes
/// afterwards.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<Header, IpcError> {
    let mut magic = [0u8; 6];
    magic.copy_from_slice(&bytes[..6]);

    if &magic != MAGIC {
        return Err(IpcError::InvalidMagic(magic));
    }

    let length = u32::from_ne_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let type_code = u32::from_ne_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);

    Ok(Header {
        magic,
        length,
        type_code,
    })
}

/// Read one frame from a blocking reader
///
/// EOF before the first header byte is `ConnectionClosed`; EOF anywhere
/// later is a truncated frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, IpcError> {
    let mut header = [0u8; HEADER_LEN];
    let read = fill(reader, &mut header)?;
    if read == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    if read < HEADER_LEN {
        return Err(IpcError::Truncated {
            expected: HEADER_LEN,
            read,
        });
    }

    let header = decode_header(&header)?;
    let mut payload = vec![0u8; header.length as usize];
    let read = fill(reader, &mut payload)?;
    if read < payload.len() {
        return Err(IpcError::Truncated {
            expected: payload.len(),
            read,
        });
    }

    tracing::debug!(
        type_code = header.type_code,
        length = header.length,
        "Read IPC frame"
    );

    Ok(Frame {
        type_code: header.type_code,
        payload,
    })
}

/// Write one frame to a blocking writer
pub fn write_frame<W: Write>(writer: &mut W, type_code: u32, payload: &str) -> Result<(), IpcError> {
    tracing::debug!(type_code, payload, "Sending IPC frame");

    writer
        .write_all(&encode(type_code, payload))
        .map_err(IpcError::SendFailed)?;
    writer.flush().map_err(IpcError::SendFailed)
}

/// Read one frame from an async reader
///
/// Same EOF rules as [`read_frame`].
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, IpcError> {
    let mut header = [0u8; HEADER_LEN];
    let read = fill_async(reader, &mut header).await?;
    if read == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    if read < HEADER_LEN {
        return Err(IpcError::Truncated {
            expected: HEADER_LEN,
            read,
        });
    }

    let header = decode_header(&header)?;
    let mut payload = vec![0u8; header.length as usize];
    let read = fill_async(reader, &mut payload).await?;
    if read < payload.len() {
        return Err(IpcError::Truncated {
            expected: payload.len(),
            read,
        });
    }

    tracing::debug!(
        type_code = header.type_code,
        length = header.length,
        "Read IPC frame"
    );

    Ok(Frame {
        type_code: header.type_code,
        payload,
    })
}

/// Write one frame to an async writer
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    type_code: u32,
    payload: &str,
) -> Result<(), IpcError> {
    tracing::debug!(type_code, payload, "Sending IPC frame");

    writer
        .write_all(&encode(type_code, payload))
        .await
        .map_err(IpcError::SendFailed)?;
    writer.flush().await.map_err(IpcError::SendFailed)
}

/// Read until `buf` is full or EOF, returning the number of bytes read
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, IpcError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::ReceiveFailed(e)),
        }
    }
    Ok(filled)
}

async fn fill_async<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, IpcError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::ReceiveFailed(e)),
        }
    }
    Ok(filled)
}
