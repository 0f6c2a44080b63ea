//! Async connection
//!
//! Requests suspend the calling task on the command socket, one at a time.
//! A reader task owns the read half of the event socket: replies to
//! SUBSCRIBE wake the task waiting for them, events are decoded and every
//! matching handler is spawned as its own task. The loop never awaits a
//! handler; a handler that fails ends [`AsyncConnection::main`] with its
//! error.
//!
//! Reconnection is single-flight. Every socket pair belongs to a
//! generation; the first failure seen on a generation reopens both sockets,
//! restarts the reader and re-sends SUBSCRIBE for every kind requested so
//! far. Failures reported later for the same generation find the work
//! already done.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::{BoxFuture, FutureExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::codec::{self, Frame, MessageType};
use crate::connection::lock;
use crate::discovery::find_socket_path;
use crate::events::{self, Event, EventKey, EventType};
use crate::pubsub::{HandlerIdentity, PubSub};
use crate::replies::{
    self, BarConfigReply, BindingStateReply, CommandReply, ConfigReply, InputReply, OutputReply,
    SeatReply, TickReply, VersionReply, WorkspaceReply,
};
use crate::tree::Con;
use crate::{ConnectionOptions, IpcError};

type AsyncHandlerFn =
    dyn Fn(AsyncConnection, Arc<Event>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// An event callback for [`AsyncConnection::on`]
///
/// ```ignore
/// let handler = AsyncHandler::new(|conn, event| async move {
///     if let Event::Window(window) = &*event {
///         window.container.command_async(&conn, "border pixel 2").await?;
///     }
///     Ok(())
/// });
/// conn.on("window::new", handler).await?;
/// ```
#[derive(Clone)]
pub struct AsyncHandler(Arc<AsyncHandlerFn>);

impl AsyncHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(AsyncConnection, Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |conn, event| f(conn, event).boxed()))
    }

    fn call(&self, conn: AsyncConnection, event: Arc<Event>) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.0)(conn, event)
    }
}

impl HandlerIdentity for AsyncHandler {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for AsyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AsyncHandler").finish()
    }
}

type ReplySender = oneshot::Sender<Result<String, IpcError>>;

#[derive(Default)]
struct MainState {
    waiter: Option<oneshot::Sender<Result<(), IpcError>>>,
    /// Failure raised while no `main()` was running
    pending_error: Option<IpcError>,
}

struct Inner {
    socket_path: PathBuf,
    options: ConnectionOptions,
    cmd: AsyncMutex<UnixStream>,
    sub: AsyncMutex<OwnedWriteHalf>,
    /// Waiters for SUBSCRIBE replies, in send order
    pending: Mutex<VecDeque<ReplySender>>,
    pubsub: Mutex<PubSub<AsyncHandler>>,
    subscriptions: Mutex<BTreeSet<EventType>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    main: Mutex<MainState>,
    generation: AtomicU64,
    reconnecting: AsyncMutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

/// A cooperative connection to the window manager
///
/// Cheap to clone; clones share the sockets and the handler registry.
#[derive(Clone)]
pub struct AsyncConnection {
    inner: Arc<Inner>,
}

async fn open(path: &Path) -> Result<UnixStream, IpcError> {
    UnixStream::connect(path)
        .await
        .map_err(|source| IpcError::ConnectionFailed {
            path: path.to_path_buf(),
            source,
        })
}

async fn exchange(stream: &mut UnixStream, kind: MessageType, payload: &str) -> Result<String, IpcError> {
    codec::write_frame_async(stream, kind.code(), payload).await?;
    let frame = codec::read_frame_async(stream).await?;
    if frame.type_code != kind.code() {
        return Err(IpcError::UnexpectedReply {
            expected: kind.code(),
            got: frame.type_code,
        });
    }
    frame.into_payload()
}

impl AsyncConnection {
    /// Open both sockets and start reading events
    pub async fn connect(options: ConnectionOptions) -> Result<Self, IpcError> {
        let socket_path = find_socket_path(options.socket_path.as_deref())?;
        let cmd = open(&socket_path).await?;
        let (sub_read, sub_write) = open(&socket_path).await?.into_split();

        let conn = Self {
            inner: Arc::new(Inner {
                socket_path,
                options,
                cmd: AsyncMutex::new(cmd),
                sub: AsyncMutex::new(sub_write),
                pending: Mutex::new(VecDeque::new()),
                pubsub: Mutex::new(PubSub::new()),
                subscriptions: Mutex::new(BTreeSet::new()),
                reader: Mutex::new(None),
                main: Mutex::new(MainState::default()),
                generation: AtomicU64::new(0),
                reconnecting: AsyncMutex::new(()),
            }),
        };
        conn.spawn_reader(sub_read, 0);

        tracing::info!(path = %conn.inner.socket_path.display(), "Connected to window manager");
        Ok(conn)
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.options.auto_reconnect
    }

    fn spawn_reader(&self, reader: OwnedReadHalf, generation: u64) {
        let task = tokio::spawn(read_events(Arc::downgrade(&self.inner), reader, generation));
        if let Some(previous) = lock(&self.inner.reader).replace(task) {
            previous.abort();
        }
    }

    /// Send a raw request on the command socket and return the reply
    /// payload
    pub async fn message(&self, kind: MessageType, payload: &str) -> Result<String, IpcError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let result = {
            let mut cmd = self.inner.cmd.lock().await;
            exchange(&mut cmd, kind, payload).await
        };

        match result {
            Err(e) if e.is_transport() && self.auto_reconnect() => {
                tracing::warn!(error = %e, "Command socket failed, reconnecting");
                self.reconnect(generation, e).await?;
                let mut cmd = self.inner.cmd.lock().await;
                exchange(&mut cmd, kind, payload).await
            }
            result => result,
        }
    }

    /// Run a command, returning one result per `;`-separated statement
    pub async fn command(&self, command: &str) -> Result<Vec<CommandReply>, IpcError> {
        replies::parse_command(&self.message(MessageType::RunCommand, command).await?)
    }

    pub async fn get_version(&self) -> Result<VersionReply, IpcError> {
        replies::parse(&self.message(MessageType::GetVersion, "").await?)
    }

    pub async fn get_workspaces(&self) -> Result<Vec<WorkspaceReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetWorkspaces, "").await?)
    }

    pub async fn get_outputs(&self) -> Result<Vec<OutputReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetOutputs, "").await?)
    }

    pub async fn get_tree(&self) -> Result<Con, IpcError> {
        Con::from_json(&self.message(MessageType::GetTree, "").await?)
    }

    pub async fn get_marks(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetMarks, "").await?)
    }

    pub async fn get_binding_modes(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetBindingModes, "").await?)
    }

    pub async fn get_binding_state(&self) -> Result<BindingStateReply, IpcError> {
        replies::parse(&self.message(MessageType::GetBindingState, "").await?)
    }

    pub async fn get_config(&self) -> Result<ConfigReply, IpcError> {
        replies::parse(&self.message(MessageType::GetConfig, "").await?)
    }

    pub async fn send_tick(&self, payload: &str) -> Result<TickReply, IpcError> {
        replies::parse(&self.message(MessageType::SendTick, payload).await?)
    }

    pub async fn get_bar_config_list(&self) -> Result<Vec<String>, IpcError> {
        replies::parse(&self.message(MessageType::GetBarConfig, "").await?)
    }

    /// Configuration of one bar, the first one when `bar_id` is `None`
    pub async fn get_bar_config(
        &self,
        bar_id: Option<&str>,
    ) -> Result<Option<BarConfigReply>, IpcError> {
        let bar_id = match bar_id {
            Some(id) => id.to_string(),
            None => match self.get_bar_config_list().await?.into_iter().next() {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        replies::parse(&self.message(MessageType::GetBarConfig, &bar_id).await?).map(Some)
    }

    pub async fn get_inputs(&self) -> Result<Vec<InputReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetInputs, "").await?)
    }

    pub async fn get_seats(&self) -> Result<Vec<SeatReply>, IpcError> {
        replies::parse(&self.message(MessageType::GetSeats, "").await?)
    }

    /// Subscribe the event socket to coarse event kinds
    ///
    /// Handlers registered with [`AsyncConnection::on`] subscribe on their
    /// own; call this to know when events start flowing. Kinds already
    /// subscribed are skipped unless `force` is set. Returns `None` when
    /// nothing had to be sent.
    pub async fn subscribe(
        &self,
        events: &[&str],
        force: bool,
    ) -> Result<Option<CommandReply>, IpcError> {
        let mut requested = BTreeSet::new();
        for name in events {
            let key: EventKey = name.parse()?;
            if key.detail.is_some() {
                return Err(IpcError::DetailedSubscription(name.to_string()));
            }
            if key.event_type.is_subscribable() {
                requested.insert(key.event_type);
            }
        }
        self.subscribe_kinds(requested, force).await
    }

    async fn subscribe_kinds(
        &self,
        mut kinds: BTreeSet<EventType>,
        force: bool,
    ) -> Result<Option<CommandReply>, IpcError> {
        {
            let mut subscriptions = lock(&self.inner.subscriptions);
            if !force {
                kinds.retain(|kind| !subscriptions.contains(kind));
            }
            subscriptions.extend(kinds.iter().copied());
        }

        if kinds.is_empty() {
            tracing::debug!("No new subscriptions");
            return Ok(None);
        }

        let reply = self.send_subscribe(kinds).await?;
        if !reply.is_success() {
            tracing::warn!(error = ?reply.error, "Subscription was rejected");
        }
        Ok(Some(reply))
    }

    async fn send_subscribe(&self, kinds: BTreeSet<EventType>) -> Result<CommandReply, IpcError> {
        let payload = events::subscribe_payload(kinds)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut sub = self.inner.sub.lock().await;
            lock(&self.inner.pending).push_back(tx);
            if let Err(e) =
                codec::write_frame_async(&mut *sub, MessageType::Subscribe.code(), &payload).await
            {
                lock(&self.inner.pending).pop_back();
                return Err(e);
            }
        }
        tracing::info!(payload = %payload, "Subscribed to events");

        let reply = rx.await.map_err(|_| IpcError::ConnectionClosed)??;
        replies::parse(&reply)
    }

    /// Register a handler for `event`, e.g. `"window"` or `"window::new"`,
    /// and subscribe to its kind
    pub async fn on(&self, event: &str, handler: AsyncHandler) -> Result<(), IpcError> {
        self.on_key(event.parse()?, handler).await
    }

    pub async fn on_key(&self, key: EventKey, handler: AsyncHandler) -> Result<(), IpcError> {
        let event_type = key.event_type;
        lock(&self.inner.pubsub).subscribe(key, handler);

        if event_type.is_subscribable() {
            self.subscribe_kinds(BTreeSet::from([event_type]), false)
                .await?;
        }
        Ok(())
    }

    /// Remove every registration of `handler`
    pub fn off(&self, handler: &AsyncHandler) {
        lock(&self.inner.pubsub).unsubscribe(handler);
    }

    /// Spawn every handler matching `event`
    fn emit(&self, event: Arc<Event>) {
        let handlers = lock(&self.inner.pubsub).matching(event.event_type(), event.change());
        for handler in handlers {
            let conn = self.clone();
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                if let Err(e) = handler.call(conn.clone(), event).await {
                    tracing::warn!(error = %e, "Event handler failed");
                    conn.quit_with(Some(IpcError::Handler(e)));
                }
            });
        }
    }

    /// Wait until the main loop is quit
    ///
    /// Events are handled in the background as soon as the connection
    /// exists; this only waits for [`AsyncConnection::main_quit`] or for a
    /// failure. A failure that happened while no `main()` was waiting is
    /// returned right away.
    pub async fn main(&self) -> Result<(), IpcError> {
        let done = {
            let mut state = lock(&self.inner.main);
            if let Some(error) = state.pending_error.take() {
                return Err(error);
            }
            if state.waiter.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(IpcError::AlreadyRunning);
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        tracing::info!("Starting the main loop");
        let result = done.await.unwrap_or(Ok(()));
        tracing::info!(ok = result.is_ok(), "Main loop stopped");
        result
    }

    /// Make the running `main()` return
    pub fn main_quit(&self) {
        self.quit_with(None);
    }

    fn quit_with(&self, error: Option<IpcError>) {
        let mut state = lock(&self.inner.main);
        match state.waiter.take() {
            Some(waiter) if !waiter.is_closed() => {
                tracing::info!(error = ?error, "Shutting down the main loop");
                // the receiver may drop between the check and the send
                let _ = waiter.send(error.map_or(Ok(()), Err));
            }
            _ => {
                if let Some(error) = error {
                    tracing::warn!(error = %error, "Keeping failure for the next main loop");
                    state.pending_error = Some(error);
                }
            }
        }
    }

    /// Reopen both sockets after a failure on `generation`
    ///
    /// Returns `cause` if every attempt fails.
    async fn reconnect(&self, generation: u64, cause: IpcError) -> Result<(), IpcError> {
        let _guard = self.inner.reconnecting.lock().await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return Ok(());
        }

        let attempts = self.inner.options.reconnect_attempts;
        for attempt in 1..=attempts {
            match self.reopen(generation + 1).await {
                Ok(()) => {
                    tracing::info!(attempt, "Reconnected to window manager");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Reconnect attempt failed");
                    tokio::time::sleep(self.inner.options.reconnect_interval).await;
                }
            }
        }

        tracing::warn!(attempts, error = %cause, "Giving up reconnecting");
        Err(cause)
    }

    async fn reopen(&self, generation: u64) -> Result<(), IpcError> {
        let cmd = open(&self.inner.socket_path).await?;
        let (sub_read, sub_write) = open(&self.inner.socket_path).await?.into_split();

        *self.inner.cmd.lock().await = cmd;
        *self.inner.sub.lock().await = sub_write;
        lock(&self.inner.pending).clear();
        self.inner.generation.store(generation, Ordering::SeqCst);
        self.spawn_reader(sub_read, generation);

        let kinds = lock(&self.inner.subscriptions).clone();
        if !kinds.is_empty() {
            self.send_subscribe(kinds).await?;
        }
        Ok(())
    }

    fn resolve_reply(&self, frame: Frame) {
        let waiter = lock(&self.inner.pending).pop_front();
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(frame.into_payload());
            }
            None => tracing::debug!(type_code = frame.type_code, "Ignoring unexpected reply"),
        }
    }

    fn event_socket_closed(&self, error: IpcError, announced: Option<&str>, generation: u64) {
        tracing::info!(error = %error, announced, "Event socket closed");
        lock(&self.inner.pending).clear();

        if announced.is_none() {
            self.emit(Arc::new(Event::IpcShutdown));
        }

        match announced {
            Some("exit") => self.quit_with(None),
            Some(_) if !self.auto_reconnect() => self.quit_with(None),
            None if !self.auto_reconnect() => self.quit_with(Some(error)),
            _ => {
                let conn = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = conn.reconnect(generation, error).await {
                        conn.quit_with(Some(e));
                    }
                });
            }
        }
    }
}

async fn read_events(inner: Weak<Inner>, mut reader: OwnedReadHalf, generation: u64) {
    let mut announced: Option<String> = None;

    loop {
        let result = codec::read_frame_async(&mut reader).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let conn = AsyncConnection { inner };

        let frame = match result {
            Ok(frame) => frame,
            Err(e) if e.is_transport() => {
                conn.event_socket_closed(e, announced.as_deref(), generation);
                return;
            }
            Err(e) => {
                conn.quit_with(Some(e));
                return;
            }
        };

        if !frame.is_event() {
            conn.resolve_reply(frame);
            continue;
        }

        match events::decode_frame(frame) {
            Ok(Some(event)) => {
                if let Event::Shutdown(shutdown) = &event {
                    tracing::info!(change = %shutdown.change, "Window manager is shutting down");
                    announced = Some(shutdown.change.clone());
                }
                conn.emit(Arc::new(event));
            }
            Ok(None) => {}
            Err(e) => {
                conn.quit_with(Some(e));
                return;
            }
        }
    }
}
