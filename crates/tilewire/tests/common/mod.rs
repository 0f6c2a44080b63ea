//! In-process window manager speaking the IPC protocol over a Unix socket
//! in a temporary directory.

#![allow(dead_code)]

use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use tilewire::codec::{self, EVENT_BIT};
use tilewire::{ConnectionOptions, MessageType};

pub const WORKSPACE: u32 = 0;
pub const WINDOW: u32 = 3;
pub const SHUTDOWN: u32 = 6;
pub const TICK: u32 = 7;

type Responder = dyn Fn(MessageType, &str) -> String + Send + Sync;
type Writer = Arc<Mutex<UnixStream>>;

struct Client {
    id: usize,
    writer: Writer,
}

struct State {
    responder: Box<Responder>,
    requests: Mutex<Vec<(u32, String)>>,
    clients: Mutex<Vec<Client>>,
    subscribers: Mutex<Vec<Client>>,
    next_id: AtomicUsize,
}

/// The thread accepting on one bound listener
struct Acceptor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct MockServer {
    _dir: TempDir,
    path: PathBuf,
    state: Arc<State>,
    acceptor: Mutex<Option<Acceptor>>,
}

/// Replies a small sway-like server would give
pub fn default_reply(kind: MessageType, payload: &str) -> String {
    match kind {
        MessageType::RunCommand => {
            let statements = payload.split(';').filter(|s| !s.trim().is_empty()).count();
            serde_json::to_string(&vec![json!({"success": true}); statements]).unwrap()
        }
        MessageType::GetVersion => json!({
            "major": 4,
            "minor": 20,
            "patch": 0,
            "human_readable": "4.20",
            "loaded_config_file_name": "/etc/conf"
        })
        .to_string(),
        MessageType::GetWorkspaces => json!([
            {"num": 1, "name": "1", "visible": true, "focused": true, "urgent": false,
             "output": "eDP-1", "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080}},
            {"num": 2, "name": "2", "visible": false, "focused": false, "urgent": false,
             "output": "eDP-1", "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080}}
        ])
        .to_string(),
        MessageType::GetTree => sample_tree().to_string(),
        MessageType::GetMarks => json!(["mark-a"]).to_string(),
        MessageType::GetBindingModes => json!(["default", "resize"]).to_string(),
        MessageType::GetBindingState => json!({"name": "default"}).to_string(),
        MessageType::GetConfig => json!({"config": "set $mod Mod4\n"}).to_string(),
        MessageType::SendTick => json!({"success": true}).to_string(),
        MessageType::GetBarConfig if payload.is_empty() => json!(["bar-0"]).to_string(),
        MessageType::GetBarConfig => json!({"id": payload, "mode": "dock", "position": "top"}).to_string(),
        _ => "[]".to_string(),
    }
}

/// root → workspace "1" → con 5, workspace "2" → floating con 6
pub fn sample_tree() -> serde_json::Value {
    json!({
        "id": 1, "type": "root", "name": "root", "nodes": [
            {"id": 2, "type": "workspace", "name": "1", "num": 1, "nodes": [
                {"id": 5, "type": "con", "name": "editor", "focused": true,
                 "nodes": [], "floating_nodes": []}
            ], "floating_nodes": []},
            {"id": 3, "type": "workspace", "name": "2", "num": 2, "nodes": [], "floating_nodes": [
                {"id": 4, "type": "floating_con", "floating": "user_on", "nodes": [
                    {"id": 6, "type": "con", "name": "dialog", "floating": "user_on",
                     "nodes": [], "floating_nodes": []}
                ], "floating_nodes": []}
            ]}
        ],
        "floating_nodes": []
    })
}

impl MockServer {
    pub fn start() -> Self {
        Self::with_responder(default_reply)
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(MessageType, &str) -> String + Send + Sync + 'static,
    {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc.sock");

        let state = Arc::new(State {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        });

        let server = Self {
            _dir: dir,
            path,
            state,
            acceptor: Mutex::new(None),
        };
        server.reappear();
        server
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions::new().socket_path(&self.path)
    }

    /// Every request received so far, as (type code, payload)
    pub fn requests(&self) -> Vec<(u32, String)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, kind: MessageType) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|(code, _)| *code == kind.code())
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().unwrap().len()
    }

    /// Block until `n` connections have subscribed
    pub fn wait_for_subscribers(&self, n: usize) {
        wait_until(|| self.subscriber_count() >= n);
    }

    /// Block until `n` SUBSCRIBE requests were received in total
    pub fn wait_for_subscribe_requests(&self, n: usize) {
        wait_until(|| self.requests_of(MessageType::Subscribe).len() >= n);
    }

    /// Send an event to every subscribed connection
    pub fn emit(&self, event_bit: u32, payload: serde_json::Value) {
        broadcast(&self.state, event_bit, &payload.to_string());
    }

    /// Announce a restart and drop every connection
    pub fn restart(&self) {
        self.emit(SHUTDOWN, json!({"change": "restart"}));
        self.disconnect_all();
    }

    /// Announce an exit and drop every connection
    pub fn exit(&self) {
        self.emit(SHUTDOWN, json!({"change": "exit"}));
        self.disconnect_all();
    }

    /// Stop accepting, remove the socket file and drop every connection,
    /// without announcing anything
    pub fn vanish(&self) {
        self.stop_accepting();
        let _ = std::fs::remove_file(&self.path);
        self.disconnect_all();
    }

    /// Bind the socket path again and accept new connections
    ///
    /// Recorded requests are kept.
    pub fn reappear(&self) {
        let listener = UnixListener::bind(&self.path).unwrap();
        listener.set_nonblocking(true).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let state = Arc::clone(&self.state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || accept_loop(listener, state, stop))
        };
        *self.acceptor.lock().unwrap() = Some(Acceptor { stop, handle });
    }

    fn stop_accepting(&self) {
        if let Some(acceptor) = self.acceptor.lock().unwrap().take() {
            acceptor.stop.store(true, Ordering::SeqCst);
            let _ = acceptor.handle.join();
        }
    }

    /// Drop every connection without announcing anything
    pub fn disconnect_all(&self) {
        self.state.subscribers.lock().unwrap().clear();
        for client in self.state.clients.lock().unwrap().drain(..) {
            let writer = client.writer.lock().unwrap();
            let _ = writer.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop_accepting();
        self.disconnect_all();
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

fn accept_loop(listener: UnixListener, state: Arc<State>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).unwrap();
                let id = state.next_id.fetch_add(1, Ordering::SeqCst);
                let writer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
                state.clients.lock().unwrap().push(Client {
                    id,
                    writer: Arc::clone(&writer),
                });

                let state = Arc::clone(&state);
                thread::spawn(move || serve(stream, Client { id, writer }, state));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(_) => return,
        }
    }
}

fn serve(mut stream: UnixStream, client: Client, state: Arc<State>) {
    while let Ok(frame) = codec::read_frame(&mut stream) {
        let payload = String::from_utf8_lossy(&frame.payload).into_owned();
        state
            .requests
            .lock()
            .unwrap()
            .push((frame.type_code, payload.clone()));

        let Some(kind) = MessageType::from_code(frame.type_code) else {
            continue;
        };

        let reply = match kind {
            MessageType::Subscribe => json!({"success": true}).to_string(),
            kind => (state.responder)(kind, &payload),
        };

        {
            let mut writer = client.writer.lock().unwrap();
            if codec::write_frame(&mut *writer, kind.code(), &reply).is_err() {
                return;
            }
        }

        match kind {
            MessageType::Subscribe => {
                let mut subscribers = state.subscribers.lock().unwrap();
                if !subscribers.iter().any(|s| s.id == client.id) {
                    subscribers.push(Client {
                        id: client.id,
                        writer: Arc::clone(&client.writer),
                    });
                }
            }
            MessageType::SendTick => {
                let event = json!({"first": false, "payload": payload});
                broadcast(&state, TICK, &event.to_string());
            }
            _ => {}
        }
    }
}

fn broadcast(state: &State, event_bit: u32, payload: &str) {
    let subscribers = state.subscribers.lock().unwrap();
    for subscriber in subscribers.iter() {
        let mut writer = subscriber.writer.lock().unwrap();
        let _ = codec::write_frame(&mut *writer, EVENT_BIT | event_bit, payload);
    }
}
