//! The layout tree
//!
//! A GET_TREE reply (and the containers embedded in `window` and
//! `workspace` events) decode into an immutable snapshot. All nodes of a
//! snapshot live in one shared arena, built top-down in a single pass with
//! parent and child links stored as arena indices. A [`Con`] is a handle to
//! one node: the arena plus an index. It dereferences to the node's [`Node`]
//! data, is cheap to clone and can be handed to other threads or tasks.
//!
//! Every handle keeps the whole snapshot alive, so a node found by a query
//! can still reach its parent, workspace and root after the handle it was
//! found through is gone.
//!
//! ## Queries
//!
//! Every finder is a filter over one primitive: the breadth-first walk of
//! [`Con::iter`], which visits tiled and floating children alike. Results
//! come back in walk order.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::aio::AsyncConnection;
use crate::replies::{self, CommandReply, Gaps, Rect};
use crate::{Connection, IpcError};

/// Name of the hidden output holding the scratchpad
const INTERNAL_OUTPUT: &str = "__i3";
const CONTENT: &str = "content";
const SCRATCHPAD_WORKSPACE: &str = "__i3_scratch";

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Output,
    Con,
    FloatingCon,
    Workspace,
    Dockarea,
    /// A type this crate does not know about
    Unknown,
}

impl NodeType {
    /// Map a legacy integer code (servers before i3 4.9)
    fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Root,
            1 => Self::Output,
            2 | 3 => Self::Con,
            4 => Self::Workspace,
            5 => Self::Dockarea,
            _ => Self::Unknown,
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "root" => Self::Root,
            "output" => Self::Output,
            "con" => Self::Con,
            "floating_con" => Self::FloatingCon,
            "workspace" => Self::Workspace,
            "dockarea" => Self::Dockarea,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Output => "output",
            Self::Con => "con",
            Self::FloatingCon => "floating_con",
            Self::Workspace => "workspace",
            Self::Dockarea => "dockarea",
            Self::Unknown => "unknown",
        }
    }
}

/// Floating state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatingState {
    AutoOff,
    AutoOn,
    UserOff,
    UserOn,
}

impl FloatingState {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto_off" => Some(Self::AutoOff),
            "auto_on" => Some(Self::AutoOn),
            "user_off" => Some(Self::UserOff),
            "user_on" => Some(Self::UserOn),
            _ => None,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, Self::AutoOn | Self::UserOn)
    }
}

/// Data of one node of the layout tree
///
/// Reached through a [`Con`] handle.
#[derive(Debug, Clone)]
pub struct Node {
    /// Container id, stable while the window manager process lives
    pub id: u64,
    pub node_type: NodeType,
    pub name: Option<String>,
    /// Workspace number (workspaces only)
    pub num: Option<i64>,
    pub layout: Option<String>,
    pub orientation: Option<String>,
    pub border: Option<String>,
    pub current_border_width: Option<i64>,
    pub percent: Option<f64>,
    pub rect: Rect,
    pub window_rect: Option<Rect>,
    pub deco_rect: Option<Rect>,
    /// Geometry the window asked for before being managed
    pub geometry: Option<Rect>,
    pub gaps: Option<Gaps>,
    pub focused: bool,
    /// Child ids, most recently focused first
    pub focus: Vec<u64>,
    pub urgent: bool,
    pub marks: Vec<String>,
    /// 0 none, 1 output, 2 global
    pub fullscreen_mode: i64,
    pub floating: Option<FloatingState>,
    pub scratchpad_state: Option<String>,
    pub sticky: bool,
    /// X11 window id
    pub window: Option<u64>,
    pub pid: Option<u32>,
    pub app_id: Option<String>,
    pub shell: Option<String>,
    pub visible: Option<bool>,
    pub representation: Option<String>,
    pub window_class: Option<String>,
    pub window_instance: Option<String>,
    pub window_role: Option<String>,
    pub window_title: Option<String>,
    /// Fields not covered above
    pub extra: Map<String, Value>,
    parent: Option<usize>,
    children: Vec<usize>,
    floating_children: Vec<usize>,
}

impl Node {
    /// Node data without its links; children are attached by the caller
    fn from_raw(raw: RawNode, parent: Option<usize>) -> Self {
        let node_type = match raw.node_type {
            Some(RawNodeType::Code(code)) => NodeType::from_code(code),
            Some(RawNodeType::Name(name)) => NodeType::from_name(&name),
            None => NodeType::Unknown,
        };

        // i3 before 4.12 sent a single "mark" string
        let marks = match raw.marks {
            Some(marks) => marks,
            None => raw.mark.into_iter().filter(|m| !m.is_empty()).collect(),
        };

        let properties = raw.window_properties.unwrap_or_default();

        Node {
            id: raw.id,
            node_type,
            name: raw.name,
            num: raw.num,
            layout: raw.layout,
            orientation: raw.orientation,
            border: raw.border,
            current_border_width: raw.current_border_width,
            percent: raw.percent,
            rect: raw.rect.unwrap_or_default(),
            window_rect: raw.window_rect,
            deco_rect: raw.deco_rect,
            geometry: raw.geometry,
            gaps: raw.gaps,
            focused: raw.focused.unwrap_or(false),
            focus: raw.focus.unwrap_or_default(),
            urgent: raw.urgent.unwrap_or(false),
            marks,
            fullscreen_mode: raw.fullscreen_mode.unwrap_or(0),
            floating: raw.floating.as_deref().and_then(FloatingState::from_name),
            scratchpad_state: raw.scratchpad_state,
            sticky: raw.sticky.unwrap_or(false),
            window: raw.window,
            pid: raw.pid,
            app_id: raw.app_id,
            shell: raw.shell,
            visible: raw.visible,
            representation: raw.representation,
            window_class: properties.class,
            window_instance: properties.instance,
            window_role: properties.window_role,
            window_title: properties.title,
            extra: raw.extra,
            parent,
            children: Vec::new(),
            floating_children: Vec::new(),
        }
    }
}

/// Every node of one snapshot, root at index 0
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    /// Push `raw` and its subtree, returning the index of `raw`
    fn push(&mut self, mut raw: RawNode, parent: Option<usize>) -> usize {
        let tiled = raw.nodes.take().unwrap_or_default();
        let floating = raw.floating_nodes.take().unwrap_or_default();

        let index = self.nodes.len();
        self.nodes.push(Node::from_raw(raw, parent));

        let children: Vec<usize> = tiled
            .into_iter()
            .map(|child| self.push(child, Some(index)))
            .collect();
        let floating_children: Vec<usize> = floating
            .into_iter()
            .map(|child| self.push(child, Some(index)))
            .collect();

        let node = &mut self.nodes[index];
        node.children = children;
        node.floating_children = floating_children;
        index
    }
}

/// Handle to one node of a layout tree snapshot
///
/// Two handles are equal when they point at the same node of the same
/// snapshot.
#[derive(Clone)]
pub struct Con {
    arena: Arc<Arena>,
    index: usize,
}

impl Deref for Con {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.arena.nodes[self.index]
    }
}

impl fmt::Debug for Con {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl PartialEq for Con {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena) && self.index == other.index
    }
}

impl Eq for Con {}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNodeType {
    Code(i64),
    Name(String),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawWindowProperties {
    class: Option<String>,
    instance: Option<String>,
    window_role: Option<String>,
    title: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawNode {
    id: u64,
    #[serde(rename = "type")]
    node_type: Option<RawNodeType>,
    name: Option<String>,
    num: Option<i64>,
    layout: Option<String>,
    orientation: Option<String>,
    border: Option<String>,
    current_border_width: Option<i64>,
    percent: Option<f64>,
    rect: Option<Rect>,
    window_rect: Option<Rect>,
    deco_rect: Option<Rect>,
    geometry: Option<Rect>,
    gaps: Option<Gaps>,
    focused: Option<bool>,
    focus: Option<Vec<u64>>,
    urgent: Option<bool>,
    marks: Option<Vec<String>>,
    mark: Option<String>,
    fullscreen_mode: Option<i64>,
    floating: Option<String>,
    scratchpad_state: Option<String>,
    sticky: Option<bool>,
    window: Option<u64>,
    pid: Option<u32>,
    app_id: Option<String>,
    shell: Option<String>,
    visible: Option<bool>,
    representation: Option<String>,
    window_properties: Option<RawWindowProperties>,
    nodes: Option<Vec<RawNode>>,
    floating_nodes: Option<Vec<RawNode>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Con {
    /// Decode a tree from a JSON payload
    pub fn from_json(payload: &str) -> Result<Con, IpcError> {
        let raw: RawNode = replies::parse(payload)?;
        Ok(Self::from_raw(raw))
    }

    /// Decode a tree from an already parsed JSON value
    pub(crate) fn from_value(value: Value) -> Result<Con, IpcError> {
        let raw: RawNode = serde_json::from_value(value).map_err(IpcError::DeserializeFailed)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawNode) -> Con {
        let mut arena = Arena { nodes: Vec::new() };
        let root = arena.push(raw, None);
        Con {
            arena: Arc::new(arena),
            index: root,
        }
    }

    fn handle(&self, index: usize) -> Con {
        Con {
            arena: Arc::clone(&self.arena),
            index,
        }
    }

    fn handles(&self, indices: &[usize]) -> Vec<Con> {
        indices.iter().map(|&index| self.handle(index)).collect()
    }

    /// Tiled children
    pub fn nodes(&self) -> Vec<Con> {
        self.handles(&self.children)
    }

    pub fn floating_nodes(&self) -> Vec<Con> {
        self.handles(&self.floating_children)
    }

    /// Breadth-first walk over every descendant, tiled and floating
    pub fn iter(&self) -> Descendants {
        let mut queue = VecDeque::with_capacity(self.children.len() + self.floating_children.len());
        queue.extend(&self.children);
        queue.extend(&self.floating_children);
        Descendants {
            arena: Arc::clone(&self.arena),
            queue,
        }
    }

    pub fn descendants(&self) -> Vec<Con> {
        self.iter().collect()
    }

    pub fn parent(&self) -> Option<Con> {
        self.parent.map(|index| self.handle(index))
    }

    /// Root of the snapshot this node belongs to
    ///
    /// For a container decoded from an event that is the container itself.
    pub fn root(&self) -> Con {
        self.handle(0)
    }

    /// Nodes with no children holding a window
    ///
    /// Children of a dock area are bars, not user windows, and are skipped.
    pub fn leaves(&self) -> Vec<Con> {
        self.iter()
            .filter(|con| {
                con.children.is_empty()
                    && con.floating_children.is_empty()
                    && con.node_type == NodeType::Con
                    && con
                        .parent()
                        .map_or(true, |parent| parent.node_type != NodeType::Dockarea)
            })
            .collect()
    }

    /// All user workspaces of the tree this node belongs to, in document
    /// order
    ///
    /// Internal workspaces (names starting with `__`) are skipped.
    pub fn workspaces(&self) -> Vec<Con> {
        fn collect(con: &Con, out: &mut Vec<Con>) {
            if con.node_type == NodeType::Workspace {
                let internal = con.name.as_deref().map_or(false, |n| n.starts_with("__"));
                if !internal {
                    out.push(con.clone());
                }
                return;
            }
            for child in con.nodes() {
                collect(&child, out);
            }
        }

        let mut workspaces = Vec::new();
        collect(&self.root(), &mut workspaces);
        workspaces
    }

    /// The workspace containing this node, or the node itself if it is one
    pub fn workspace(&self) -> Option<Con> {
        let mut current = Some(self.clone());
        while let Some(con) = current {
            if con.node_type == NodeType::Workspace {
                return Some(con);
            }
            current = con.parent();
        }
        None
    }

    /// The scratchpad workspace
    ///
    /// Follows the fixed path root → `__i3` output → `content` →
    /// `__i3_scratch`. Returns `None` if any step is missing.
    pub fn scratchpad(&self) -> Option<Con> {
        let output = self.root().child_named(NodeType::Output, INTERNAL_OUTPUT)?;
        let content = output.child_named(NodeType::Con, CONTENT)?;
        content.child_named(NodeType::Workspace, SCRATCHPAD_WORKSPACE)
    }

    fn child_named(&self, node_type: NodeType, name: &str) -> Option<Con> {
        self.nodes()
            .into_iter()
            .find(|child| child.node_type == node_type && child.name.as_deref() == Some(name))
    }

    pub fn is_floating(&self) -> bool {
        self.node_type == NodeType::FloatingCon || self.floating.map_or(false, FloatingState::is_on)
    }

    pub fn find_focused(&self) -> Option<Con> {
        self.iter().find(|con| con.focused)
    }

    pub fn find_by_id(&self, id: u64) -> Option<Con> {
        self.iter().find(|con| con.id == id)
    }

    /// Find the node holding the given X11 window
    pub fn find_by_window(&self, window: u64) -> Option<Con> {
        self.iter().find(|con| con.window == Some(window))
    }

    pub fn find_by_pid(&self, pid: u32) -> Vec<Con> {
        self.iter().filter(|con| con.pid == Some(pid)).collect()
    }

    pub fn find_named(&self, pattern: &Regex) -> Vec<Con> {
        self.find_matching(pattern, |con| con.name.as_deref())
    }

    pub fn find_titled(&self, pattern: &Regex) -> Vec<Con> {
        self.find_matching(pattern, |con| con.window_title.as_deref())
    }

    /// Nodes whose X11 class or Wayland app id matches
    ///
    /// One list in walk order, X11 and Wayland clients mixed. A node
    /// matching on both appears once.
    pub fn find_classed(&self, pattern: &Regex) -> Vec<Con> {
        self.iter()
            .filter(|con| {
                con.window_class.as_deref().map_or(false, |c| pattern.is_match(c))
                    || con.app_id.as_deref().map_or(false, |a| pattern.is_match(a))
            })
            .collect()
    }

    pub fn find_instanced(&self, pattern: &Regex) -> Vec<Con> {
        self.find_matching(pattern, |con| con.window_instance.as_deref())
    }

    pub fn find_by_role(&self, pattern: &Regex) -> Vec<Con> {
        self.find_matching(pattern, |con| con.window_role.as_deref())
    }

    /// Nodes with a mark matching `pattern`, or with any mark when `None`
    pub fn find_marked(&self, pattern: Option<&Regex>) -> Vec<Con> {
        self.iter()
            .filter(|con| match pattern {
                Some(pattern) => con.marks.iter().any(|mark| pattern.is_match(mark)),
                None => !con.marks.is_empty(),
            })
            .collect()
    }

    pub fn find_fullscreen(&self) -> Vec<Con> {
        self.iter()
            .filter(|con| con.node_type == NodeType::Con && con.fullscreen_mode != 0)
            .collect()
    }

    fn find_matching<F>(&self, pattern: &Regex, field: F) -> Vec<Con>
    where
        F: Fn(&Node) -> Option<&str>,
    {
        self.iter()
            .filter(|con| field(&**con).map_or(false, |value| pattern.is_match(value)))
            .collect()
    }

    /// `command` scoped to this node
    pub fn scoped_command(&self, command: &str) -> String {
        format!("[con_id=\"{}\"] {}", self.id, command)
    }

    /// `command` scoped to each tiled child, or `None` without children
    pub fn scoped_children_command(&self, command: &str) -> Option<String> {
        if self.children.is_empty() {
            return None;
        }

        let clauses: Vec<String> = self
            .nodes()
            .iter()
            .map(|child| format!("[con_id=\"{}\"] {};", child.id, command))
            .collect();
        Some(clauses.join(" "))
    }

    /// Run a command on this node
    pub fn command(&self, conn: &Connection, command: &str) -> Result<Vec<CommandReply>, IpcError> {
        conn.command(&self.scoped_command(command))
    }

    /// Run a command on each tiled child of this node
    pub fn command_children(
        &self,
        conn: &Connection,
        command: &str,
    ) -> Result<Vec<CommandReply>, IpcError> {
        match self.scoped_children_command(command) {
            Some(command) => conn.command(&command),
            None => Ok(Vec::new()),
        }
    }

    pub async fn command_async(
        &self,
        conn: &AsyncConnection,
        command: &str,
    ) -> Result<Vec<CommandReply>, IpcError> {
        conn.command(&self.scoped_command(command)).await
    }

    pub async fn command_children_async(
        &self,
        conn: &AsyncConnection,
        command: &str,
    ) -> Result<Vec<CommandReply>, IpcError> {
        match self.scoped_children_command(command) {
            Some(command) => conn.command(&command).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Breadth-first iterator returned by [`Con::iter`]
pub struct Descendants {
    arena: Arc<Arena>,
    queue: VecDeque<usize>,
}

impl Iterator for Descendants {
    type Item = Con;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.queue.pop_front()?;
        let node = &self.arena.nodes[index];
        self.queue.extend(&node.children);
        self.queue.extend(&node.floating_children);
        Some(Con {
            arena: Arc::clone(&self.arena),
            index,
        })
    }
}
