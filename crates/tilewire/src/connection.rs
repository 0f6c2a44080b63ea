//! Blocking connection
//!
//! A [`Connection`] owns two Unix sockets to the window manager:
//!
//! - the command socket, opened by [`Connection::connect`] and used for
//!   request/reply traffic. The protocol has no request ids, so requests
//!   are serialized by a mutex; each one writes a frame and blocks for
//!   exactly one reply.
//! - the event socket, opened by [`Connection::main`], subscribed to every
//!   kind a handler is registered for and read until the loop ends.
//!
//! ## Reconnection
//!
//! With `auto_reconnect` set, a transport failure on the command socket
//! waits for the socket file to reappear, reconnects and retries the
//! request once. The event loop treats a `shutdown::restart` event, or the
//! socket closing without any SHUTDOWN event, as a restart: it waits for the
//! socket, reconnects and re-subscribes. `main_quit()` suppresses all of it.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::codec::{self, MessageType};
use crate::discovery::find_socket_path;
use crate::events::{self, Event, EventKey};
use crate::pubsub::{HandlerIdentity, PubSub};
use crate::replies::{
    self, BarConfigReply, BindingStateReply, CommandReply, ConfigReply, InputReply, OutputReply,
    SeatReply, TickReply, VersionReply, WorkspaceReply,
};
use crate::tree::Con;
use crate::{ConnectionOptions, IpcError};

type HandlerFn = dyn Fn(&Connection, &Event) -> anyhow::Result<()> + Send + Sync;

/// An event callback for [`Connection::on`]
///
/// Cloning shares the callback; [`Connection::off`] removes registrations
/// of the same (cloned) handler.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Connection, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, conn: &Connection, event: &Event) -> anyhow::Result<()> {
        (self.0)(conn, event)
    }
}

impl HandlerIdentity for Handler {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").finish()
    }
}

/// Why the event socket stopped being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// `main_quit()` was called
    Quit,
    /// The window manager announced `shutdown::exit`
    Exit,
    /// The window manager announced `shutdown::restart`
    Restart,
    /// The socket closed without a SHUTDOWN event
    Closed,
}

/// A blocking connection to the window manager
#[derive(Debug)]
pub struct Connection {
    socket_path: PathBuf,
    options: ConnectionOptions,
    cmd: Mutex<UnixStream>,
    /// Handle on the event socket used to subscribe and to tear it down
    sub: Mutex<Option<UnixStream>>,
    pubsub: Mutex<PubSub<Handler>>,
    /// Mask of every kind requested so far
    subscriptions: AtomicU32,
    quitting: AtomicBool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open(path: &Path) -> Result<UnixStream, IpcError> {
    UnixStream::connect(path).map_err(|source| IpcError::ConnectionFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Send one request and read its reply
fn exchange(stream: &mut UnixStream, kind: MessageType, payload: &str) -> Result<String, IpcError> {
    codec::write_frame(stream, kind.code(), payload)?;
    let frame = codec::read_frame(stream)?;
    if frame.type_code != kind.code() {
        return Err(IpcError::UnexpectedReply {
            expected: kind.code(),
            got: frame.type_code,
        });
    }
    frame.into_payload()
}

impl Connection {
    /// Connect the command socket
    ///
    /// The socket path comes from `options` or from discovery; the event
    /// socket is opened later by [`Connection::main`].
    pub fn connect(options: ConnectionOptions) -> Result<Self, IpcError> {
        let socket_path = find_socket_path(options.socket_path.as_deref())?;
        let cmd = open(&socket_path)?;

        tracing::info!(path = %socket_path.display(), "Connected to window manager");

        Ok(Self {
            socket_path,
            options,
            cmd: Mutex::new(cmd),
            sub: Mutex::new(None),
            pubsub: Mutex::new(PubSub::new()),
            subscriptions: AtomicU32::new(0),
            quitting: AtomicBool::new(false),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn auto_reconnect(&self) -> bool {
        self.options.auto_reconnect
    }

    /// Poll for the socket file, returning whether it exists
    fn wait_for_socket(&self) -> bool {
        for _ in 0..self.options.socket_wait_attempts {
            if self.socket_path.exists() {
                return true;
            }
            thread::sleep(self.options.socket_wait_interval);
        }
        self.socket_path.exists()
    }

    /// Send a raw request on the command socket and return the reply
    /// payload
    pub fn message(&self, kind: MessageType, payload: &str) -> Result<String, IpcError> {
        let mut cmd = lock(&self.cmd);

        match exchange(&mut cmd, kind, payload) {
            Err(e) if e.is_transport() && self.options.auto_reconnect => {
                tracing::warn!(error = %e, "Command socket failed, reconnecting");
                if !self.wait_for_socket() {
                    tracing::warn!(path = %self.socket_path.display(), "Socket did not reappear");
                    return Err(e);
                }
                *cmd = open(&self.socket_path)?;
                tracing::info!("Reconnected command socket");
                exchange(&mut cmd, kind, payload)
            }
            result => result,
        }
    }

    /// Run a command, returning one result per `;`-separated statement
    pub fn command(&self, command: &str) -> Result<Vec<CommandReply>, IpcError> {
        replies::parse_command(&self.message(MessageType::RunCommand, command)?)
    }

    pub fn get_version(&self) -> Result<VersionReply, IpcError> {
        replies::parse(&self.message(MessageType::GetVersion, "")?)
    }

    pub fn get_workspaces(&self) -> Result<Vec<WorkspaceReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetWorkspaces, "")?)
    }

    pub fn get_outputs(&self) -> Result<Vec<OutputReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetOutputs, "")?)
    }

    /// Fetch a snapshot of the layout tree
    pub fn get_tree(&self) -> Result<Con, IpcError> {
        Con::from_json(&self.message(MessageType::GetTree, "")?)
    }

    pub fn get_marks(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetMarks, "")?)
    }

    pub fn get_binding_modes(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetBindingModes, "")?)
    }

    pub fn get_binding_state(&self) -> Result<BindingStateReply, IpcError> {
        replies::parse(&self.message(MessageType::GetBindingState, "")?)
    }

    pub fn get_config(&self) -> Result<ConfigReply, IpcError> {
        replies::parse(&self.message(MessageType::GetConfig, "")?)
    }

    pub fn send_tick(&self, payload: &str) -> Result<TickReply, IpcError> {
        replies::parse(&self.message(MessageType::SendTick, payload)?)
    }

    /// Ids of every configured bar
    pub fn get_bar_config_list(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetBarConfig, "")?)
    }

    /// Configuration of one bar, the first one when `bar_id` is `None`
    ///
    /// Returns `None` when no bar is configured.
    pub fn get_bar_config(&self, bar_id: Option<&str>) -> Result<Option<BarConfigReply>, IpcError> {
        let bar_id = match bar_id {
            Some(id) => id.to_string(),
            None => match self.get_bar_config_list()?.into_iter().next() {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        replies::parse(&self.message(MessageType::GetBarConfig, &bar_id)?).map(Some)
    }

    pub fn get_inputs(&self) -> Result<Vec<InputReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetInputs, "")?)
    }

    pub fn get_seats(&self) -> Result<Vec<SeatReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetSeats, "")?)
    }

    /// Register a handler for `event`, e.g. `"window"` or `"window::new"`
    pub fn on(&self, event: &str, handler: Handler) -> Result<(), IpcError> {
        self.on_key(event.parse()?, handler)
    }

    /// Register a handler for a parsed key
    ///
    /// If the main loop is running, a kind not subscribed yet is subscribed
    /// right away.
    pub fn on_key(&self, key: EventKey, handler: Handler) -> Result<(), IpcError> {
        let bit = key.event_type.mask();
        lock(&self.pubsub).subscribe(key, handler);

        let mut sub = lock(&self.sub);
        let previous = self.subscriptions.fetch_or(bit, Ordering::SeqCst);
        if bit == 0 || previous & bit != 0 {
            return Ok(());
        }

        if let Some(sub) = sub.as_mut() {
            let payload = events::subscribe_payload(events::kinds_in_mask(bit))?;
            // the reply is read and dropped by the event loop
            codec::write_frame(sub, MessageType::Subscribe.code(), &payload)?;
        }
        Ok(())
    }

    /// Remove every registration of `handler`
    pub fn off(&self, handler: &Handler) {
        lock(&self.pubsub).unsubscribe(handler);
    }

    /// Dispatch an event to the matching handlers
    ///
    /// Handlers run on the calling thread against a snapshot of the
    /// registry; the first failure stops dispatch and is returned.
    pub fn emit(&self, event: &Event) -> Result<(), IpcError> {
        let handlers = lock(&self.pubsub).matching(event.event_type(), event.change());
        for handler in handlers {
            handler.call(self, event).map_err(IpcError::Handler)?;
        }
        Ok(())
    }

    /// Run the event loop on the calling thread
    ///
    /// Returns when [`Connection::main_quit`] is called, when `timeout`
    /// elapses (wall clock from the start of the call), when the window
    /// manager exits, or with the first error. Handler failures end the
    /// loop with [`IpcError::Handler`].
    pub fn main(&self, timeout: Option<Duration>) -> Result<(), IpcError> {
        self.quitting.store(false, Ordering::SeqCst);
        tracing::info!(?timeout, "Starting the main loop");

        let (cancel, cancelled) = mpsc::channel::<()>();
        let result = thread::scope(|scope| {
            if let Some(timeout) = timeout {
                scope.spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                        tracing::info!("Main loop timeout reached");
                        self.main_quit();
                    }
                });
            }

            let result = self.run();
            drop(cancel);
            result
        });

        tracing::info!(ok = result.is_ok(), "Main loop stopped");
        result
    }

    /// Stop the event loop
    ///
    /// Safe to call from any thread, from a handler, or more than once.
    pub fn main_quit(&self) {
        tracing::info!("Shutting down the main loop");
        self.quitting.store(true, Ordering::SeqCst);
        self.teardown_event_socket();
    }

    fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    fn run(&self) -> Result<(), IpcError> {
        let mut stream = self.setup_event_socket()?;

        loop {
            let exit = self.poll_events(&mut stream);
            self.teardown_event_socket();

            match exit? {
                LoopExit::Quit | LoopExit::Exit => return Ok(()),
                LoopExit::Restart if !self.options.auto_reconnect => return Ok(()),
                LoopExit::Closed if !self.options.auto_reconnect => {
                    return Err(IpcError::ConnectionClosed)
                }
                LoopExit::Restart | LoopExit::Closed => {}
            }

            match self.reconnect_event_socket()? {
                Some(reconnected) => stream = reconnected,
                None => return Ok(()),
            }
        }
    }

    /// Open the event socket and subscribe to every requested kind
    fn setup_event_socket(&self) -> Result<UnixStream, IpcError> {
        let mut stream = open(&self.socket_path)?;

        // held until the handle is stored so on_key() cannot slip a kind
        // in between
        let mut sub = lock(&self.sub);
        let mask = self.subscriptions.load(Ordering::SeqCst) | lock(&self.pubsub).mask();
        let payload = events::subscribe_payload(events::kinds_in_mask(mask))?;
        let reply: CommandReply =
            replies::parse(&exchange(&mut stream, MessageType::Subscribe, &payload)?)?;
        if !reply.is_success() {
            tracing::warn!(payload = %payload, error = ?reply.error, "Subscription was rejected");
        }
        tracing::info!(payload = %payload, "Subscribed to events");

        *sub = Some(stream.try_clone().map_err(IpcError::ReceiveFailed)?);
        drop(sub);

        // main_quit() may have run before the handle was stored
        if self.is_quitting() {
            self.teardown_event_socket();
        }
        Ok(stream)
    }

    fn teardown_event_socket(&self) {
        if let Some(sub) = lock(&self.sub).take() {
            if let Err(e) = sub.shutdown(std::net::Shutdown::Both) {
                tracing::debug!(error = %e, "Event socket already closed");
            }
        }
    }

    /// Wait for the window manager to come back and resubscribe
    ///
    /// Returns `None` if `main_quit()` is called meanwhile.
    fn reconnect_event_socket(&self) -> Result<Option<UnixStream>, IpcError> {
        let attempts = self.options.socket_wait_attempts;

        for attempt in 1..=attempts {
            if self.is_quitting() {
                return Ok(None);
            }
            if self.socket_path.exists() {
                match self.setup_event_socket() {
                    Ok(stream) => {
                        tracing::info!(attempt, "Reconnected event socket");
                        return Ok(Some(stream));
                    }
                    Err(e) if e.is_transport() => {
                        tracing::debug!(attempt, error = %e, "Event socket reconnect failed");
                    }
                    Err(e) => return Err(e),
                }
            }
            thread::sleep(self.options.socket_wait_interval);
        }

        if self.is_quitting() {
            return Ok(None);
        }

        tracing::warn!(attempts, "Giving up reconnecting the event socket");
        Err(IpcError::MaxRetriesExceeded { attempts })
    }

    /// Read and dispatch events until the socket closes
    fn poll_events(&self, stream: &mut UnixStream) -> Result<LoopExit, IpcError> {
        let mut shutdown: Option<LoopExit> = None;

        loop {
            let frame = match codec::read_frame(stream) {
                Ok(frame) => frame,
                Err(e) if e.is_transport() => {
                    tracing::info!(error = %e, "Event socket closed");
                    if self.is_quitting() {
                        return Ok(LoopExit::Quit);
                    }
                    if let Some(exit) = shutdown {
                        return Ok(exit);
                    }
                    self.emit(&Event::IpcShutdown)?;
                    return Ok(LoopExit::Closed);
                }
                Err(e) => return Err(e),
            };

            if !frame.is_event() {
                tracing::debug!(type_code = frame.type_code, "Ignoring reply on event socket");
                continue;
            }

            let Some(event) = events::decode_frame(frame)? else {
                continue;
            };

            if let Event::Shutdown(ref e) = event {
                tracing::info!(change = %e.change, "Window manager is shutting down");
                shutdown = match e.change.as_str() {
                    "restart" => Some(LoopExit::Restart),
                    "exit" => Some(LoopExit::Exit),
                    _ => shutdown,
                };
            }

            self.emit(&event)?;
        }
    }
}
