//! Events pushed by the window manager
//!
//! Event frames carry the event bit in their type code; the low seven bits
//! give the bit index of the event kind in the subscription mask. Each kind
//! decodes into its own struct, collected under the [`Event`] enum.
//!
//! Handlers subscribe by name, optionally narrowed by a detail that is
//! matched against the event's `change` field:
//!
//! ```text
//! window            every window event
//! window::new       window events with change == "new"
//! ipc_shutdown      the event socket closed (never sent on the wire)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::codec::Frame;
use crate::replies::{self, BarConfigReply, InputReply};
use crate::tree::Con;
use crate::IpcError;

/// Separator between an event name and its detail
pub const DETAIL_SEPARATOR: &str = "::";

/// Subscribable event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Workspace,
    Output,
    Mode,
    Window,
    BarconfigUpdate,
    Binding,
    Shutdown,
    Tick,
    /// sway only
    Input,
    /// Emitted locally when the event socket closes without a SHUTDOWN
    /// event
    IpcShutdown,
}

impl EventType {
    /// Every kind that can be sent in a SUBSCRIBE request
    pub const SUBSCRIBABLE: [EventType; 9] = [
        Self::Workspace,
        Self::Output,
        Self::Mode,
        Self::Window,
        Self::BarconfigUpdate,
        Self::Binding,
        Self::Shutdown,
        Self::Tick,
        Self::Input,
    ];

    /// Bit index on the wire, `None` for local pseudo-events
    pub fn bit(self) -> Option<u32> {
        match self {
            Self::Workspace => Some(0),
            Self::Output => Some(1),
            Self::Mode => Some(2),
            Self::Window => Some(3),
            Self::BarconfigUpdate => Some(4),
            Self::Binding => Some(5),
            Self::Shutdown => Some(6),
            Self::Tick => Some(7),
            Self::Input => Some(21),
            Self::IpcShutdown => None,
        }
    }

    /// Subscription mask bit (`1 << bit`), 0 for local pseudo-events
    pub fn mask(self) -> u32 {
        self.bit().map_or(0, |bit| 1 << bit)
    }

    pub fn is_subscribable(self) -> bool {
        self.bit().is_some()
    }

    /// Resolve the kind of an event frame from its type code
    pub fn from_type_code(type_code: u32) -> Option<Self> {
        let bit = type_code & 0x7f;
        Self::SUBSCRIBABLE
            .into_iter()
            .find(|kind| kind.bit() == Some(bit))
    }

    /// Name used in SUBSCRIBE payloads and handler keys
    pub fn name(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Output => "output",
            Self::Mode => "mode",
            Self::Window => "window",
            Self::BarconfigUpdate => "barconfig_update",
            Self::Binding => "binding",
            Self::Shutdown => "shutdown",
            Self::Tick => "tick",
            Self::Input => "input",
            Self::IpcShutdown => "ipc_shutdown",
        }
    }

    /// Parse an event name; `-` and `_` are interchangeable
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.replace('-', "_");
        match name.as_str() {
            "workspace" => Some(Self::Workspace),
            "output" => Some(Self::Output),
            "mode" => Some(Self::Mode),
            "window" => Some(Self::Window),
            "barconfig_update" => Some(Self::BarconfigUpdate),
            "binding" => Some(Self::Binding),
            "shutdown" => Some(Self::Shutdown),
            "tick" => Some(Self::Tick),
            "input" => Some(Self::Input),
            "ipc_shutdown" => Some(Self::IpcShutdown),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventType {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| IpcError::UnknownEvent(s.to_string()))
    }
}

/// An event name with an optional detail, e.g. `window::new`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub event_type: EventType,
    /// Required value of the event's `change` field
    pub detail: Option<String>,
}

impl EventKey {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            detail: None,
        }
    }

    pub fn with_detail(event_type: EventType, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            detail: Some(detail.into()),
        }
    }

    /// Whether an event of this kind with this change matches the key
    pub fn matches(&self, event_type: EventType, change: Option<&str>) -> bool {
        if self.event_type != event_type {
            return false;
        }
        match &self.detail {
            None => true,
            Some(detail) => change == Some(detail.as_str()),
        }
    }
}

impl From<EventType> for EventKey {
    fn from(event_type: EventType) -> Self {
        Self::new(event_type)
    }
}

impl FromStr for EventKey {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, detail) = match s.split_once(DETAIL_SEPARATOR) {
            Some((name, detail)) => (name, Some(detail.replace('-', "_"))),
            None => (s, None),
        };

        let event_type = name.parse()?;
        Ok(Self { event_type, detail })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}{}{}", self.event_type, DETAIL_SEPARATOR, detail),
            None => write!(f, "{}", self.event_type),
        }
    }
}

/// Workspace focus, init, empty, urgent, rename, reload, restored or move
#[derive(Debug, Clone)]
pub struct WorkspaceEvent {
    pub change: String,
    /// The affected workspace
    pub current: Option<Con>,
    /// Previously focused workspace, on `focus` only
    pub old: Option<Con>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputEvent {
    /// Currently always `unspecified`
    pub change: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The binding mode changed
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModeEvent {
    /// Name of the new mode
    pub change: String,
    pub pango_markup: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct WindowEvent {
    pub change: String,
    /// The container holding the window, detached from any tree
    pub container: Con,
}

/// The binding behind a [`BindingEvent`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindingInfo {
    /// Command configured for the binding
    pub command: Option<String>,
    /// Modifiers and groups the binding was configured with
    #[serde(deserialize_with = "replies::null_as_empty")]
    pub event_state_mask: Vec<String>,
    /// Key code for `bindcode` bindings
    pub input_code: Option<i64>,
    /// Key symbol for `bindsym` bindings
    pub symbol: Option<String>,
    /// `keyboard` or `mouse`
    pub input_type: Option<String>,
    /// sway only
    #[serde(deserialize_with = "replies::null_as_empty")]
    pub symbols: Vec<String>,
    /// i3 only
    #[serde(deserialize_with = "replies::null_as_empty")]
    pub mods: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindingEvent {
    /// Currently always `run`
    pub change: String,
    pub binding: BindingInfo,
}

/// The IPC is going away
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShutdownEvent {
    /// `restart` or `exit`
    pub change: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TickEvent {
    /// `true` for the tick sent on subscription; absent before i3 4.16
    pub first: Option<bool>,
    pub payload: Option<String>,
}

/// An input device was added or removed (sway only)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputEvent {
    pub change: String,
    pub input: InputReply,
}

/// A decoded event
#[derive(Debug, Clone)]
pub enum Event {
    Workspace(WorkspaceEvent),
    Output(OutputEvent),
    Mode(ModeEvent),
    Window(WindowEvent),
    BarconfigUpdate(BarConfigReply),
    Binding(BindingEvent),
    Shutdown(ShutdownEvent),
    Tick(TickEvent),
    Input(InputEvent),
    /// The event socket closed without a SHUTDOWN event
    IpcShutdown,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawContainerEvent {
    change: String,
    current: Option<Value>,
    old: Option<Value>,
    container: Option<Value>,
}

impl Event {
    /// Decode an event frame
    pub fn from_frame(type_code: u32, payload: &str) -> Result<Self, IpcError> {
        let event_type = EventType::from_type_code(type_code)
            .ok_or_else(|| IpcError::UnknownEvent(format!("{type_code:#x}")))?;
        Self::decode(event_type, payload)
    }

    /// Decode the payload of an event of a known kind
    pub fn decode(event_type: EventType, payload: &str) -> Result<Self, IpcError> {
        let event = match event_type {
            EventType::Workspace => {
                let raw: RawContainerEvent = replies::parse(payload)?;
                Event::Workspace(WorkspaceEvent {
                    change: raw.change,
                    current: raw.current.map(Con::from_value).transpose()?,
                    old: raw.old.map(Con::from_value).transpose()?,
                })
            }
            EventType::Window => {
                let raw: RawContainerEvent = replies::parse(payload)?;
                let container = raw
                    .container
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Event::Window(WindowEvent {
                    change: raw.change,
                    container: Con::from_value(container)?,
                })
            }
            EventType::Output => Event::Output(replies::parse(payload)?),
            EventType::Mode => Event::Mode(replies::parse(payload)?),
            EventType::BarconfigUpdate => Event::BarconfigUpdate(replies::parse(payload)?),
            EventType::Binding => Event::Binding(replies::parse(payload)?),
            EventType::Shutdown => Event::Shutdown(replies::parse(payload)?),
            EventType::Tick => Event::Tick(replies::parse(payload)?),
            EventType::Input => Event::Input(replies::parse(payload)?),
            EventType::IpcShutdown => Event::IpcShutdown,
        };
        Ok(event)
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Workspace(_) => EventType::Workspace,
            Self::Output(_) => EventType::Output,
            Self::Mode(_) => EventType::Mode,
            Self::Window(_) => EventType::Window,
            Self::BarconfigUpdate(_) => EventType::BarconfigUpdate,
            Self::Binding(_) => EventType::Binding,
            Self::Shutdown(_) => EventType::Shutdown,
            Self::Tick(_) => EventType::Tick,
            Self::Input(_) => EventType::Input,
            Self::IpcShutdown => EventType::IpcShutdown,
        }
    }

    /// The `change` field used for detail matching
    ///
    /// Tick, bar config and ipc_shutdown events have none and only match
    /// handlers registered without a detail.
    pub fn change(&self) -> Option<&str> {
        match self {
            Self::Workspace(e) => Some(&e.change),
            Self::Output(e) => Some(&e.change),
            Self::Mode(e) => Some(&e.change),
            Self::Window(e) => Some(&e.change),
            Self::Binding(e) => Some(&e.change),
            Self::Shutdown(e) => Some(&e.change),
            Self::Input(e) => Some(&e.change),
            Self::BarconfigUpdate(_) | Self::Tick(_) | Self::IpcShutdown => None,
        }
    }
}

/// Decode an event frame read off an event socket
///
/// Kinds this crate does not know are logged and skipped.
pub(crate) fn decode_frame(frame: Frame) -> Result<Option<Event>, IpcError> {
    let type_code = frame.type_code;
    let Some(event_type) = EventType::from_type_code(type_code) else {
        tracing::warn!(type_code, "Dropping unknown event");
        return Ok(None);
    };

    let payload = frame.into_payload()?;
    tracing::debug!(event = %event_type, payload = %payload, "Received event");
    Event::decode(event_type, &payload).map(Some)
}

/// Build the SUBSCRIBE payload for a set of kinds
///
/// Local pseudo-events are left out.
pub(crate) fn subscribe_payload<I>(kinds: I) -> Result<String, IpcError>
where
    I: IntoIterator<Item = EventType>,
{
    let names: Vec<&str> = kinds
        .into_iter()
        .filter(|kind| kind.is_subscribable())
        .map(EventType::name)
        .collect();
    serde_json::to_string(&names).map_err(IpcError::SerializeFailed)
}

/// Kinds whose bits are set in `mask`
pub(crate) fn kinds_in_mask(mask: u32) -> impl Iterator<Item = EventType> {
    EventType::SUBSCRIBABLE
        .into_iter()
        .filter(move |kind| mask & kind.mask() != 0)
}
