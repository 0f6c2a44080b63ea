//! Client library for the i3/sway IPC protocol
//!
//! Two flavours share the same wire codec, reply types, tree model and
//! event dispatch:
//!
//! - [`Connection`]: blocking requests and a thread-based event loop
//! - [`aio::AsyncConnection`]: tokio requests and spawned event handlers
//!
//! ```ignore
//! use tilewire::{Connection, ConnectionOptions, Event, Handler};
//!
//! let conn = Connection::connect(ConnectionOptions::new())?;
//! let tree = conn.get_tree()?;
//! if let Some(focused) = tree.find_focused() {
//!     println!("{:?}", focused.name);
//! }
//!
//! conn.on("workspace::focus", Handler::new(|_conn, event| {
//!     if let Event::Workspace(ws) = event {
//!         println!("now on {:?}", ws.current.as_ref().and_then(|c| c.name.clone()));
//!     }
//!     Ok(())
//! }))?;
//! conn.main(None)?;
//! ```

pub mod aio;
pub mod codec;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod options;
pub mod pubsub;
pub mod replies;
pub mod tree;

pub use aio::{AsyncConnection, AsyncHandler, Debouncer};
pub use codec::MessageType;
pub use connection::{Connection, Handler};
pub use discovery::find_socket_path;
pub use error::IpcError;
pub use events::{
    BindingEvent, BindingInfo, Event, EventKey, EventType, InputEvent, ModeEvent, OutputEvent,
    ShutdownEvent, TickEvent, WindowEvent, WorkspaceEvent,
};
pub use options::ConnectionOptions;
pub use replies::{
    BarConfigGaps, BarConfigReply, BindingStateReply, CommandReply, ConfigReply, Gaps, InputReply,
    OutputMode, OutputReply, Rect, SeatReply, TickReply, VersionReply, WorkspaceReply,
};
pub use tree::{Con, FloatingState, Node, NodeType};
