//! Typed replies to IPC requests
//!
//! Every reply struct tolerates missing fields: anything the server leaves
//! out decodes to `None` (or an empty list), never to an error. Fields this
//! crate does not know about are kept verbatim in `extra`, so replies from a
//! newer server lose nothing.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::IpcError;

/// A rectangle in output coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Gap sizes, reported by i3-gaps and sway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Gaps {
    pub inner: i64,
    pub outer: i64,
}

/// Result of one `;`-separated statement of a RUN_COMMAND request
///
/// A rejected command is not an error on the client side; check
/// [`CommandReply::success`] and [`CommandReply::error`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandReply {
    pub success: Option<bool>,
    /// Human-readable reason for a failed statement
    pub error: Option<String>,
    pub parse_error: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandReply {
    /// Whether the statement succeeded (absent counts as failure)
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(false)
    }
}

/// One entry of the GET_WORKSPACES reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceReply {
    /// Logical number, -1 for named workspaces
    pub num: Option<i64>,
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub focused: Option<bool>,
    pub urgent: Option<bool>,
    pub rect: Option<Rect>,
    pub output: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A video mode supported by an output (sway only)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputMode {
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Refresh rate in mHz
    pub refresh: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the GET_OUTPUTS reply
///
/// Everything after `rect` is only reported by sway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputReply {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub primary: Option<bool>,
    /// `None` when the output is not active
    pub current_workspace: Option<String>,
    pub rect: Option<Rect>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub scale: Option<f64>,
    pub transform: Option<String>,
    pub max_render_time: Option<i64>,
    pub focused: Option<bool>,
    pub dpms: Option<bool>,
    pub subpixel_hinting: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub modes: Vec<OutputMode>,
    pub current_mode: Option<OutputMode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Gaps around a bar (sway only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfigGaps {
    pub left: i64,
    pub right: i64,
    pub top: i64,
    pub bottom: i64,
}

/// The GET_BAR_CONFIG reply for one bar id
///
/// Also the payload of the `barconfig_update` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfigReply {
    pub id: Option<String>,
    pub tray_padding: Option<i64>,
    pub hidden_state: Option<String>,
    /// `dock`, `hide` or `invisible`
    pub mode: Option<String>,
    pub modifier: Option<i64>,
    pub position: Option<String>,
    pub status_command: Option<String>,
    pub font: Option<String>,
    pub workspace_buttons: Option<bool>,
    pub workspace_min_width: Option<i64>,
    pub strip_workspace_numbers: Option<bool>,
    pub strip_workspace_name: Option<bool>,
    pub binding_mode_indicator: Option<bool>,
    pub separator_symbol: Option<String>,
    pub verbose: Option<bool>,
    /// Color name to `#rrggbb` value
    pub colors: Option<HashMap<String, String>>,
    pub gaps: Option<BarConfigGaps>,
    pub bar_height: Option<i64>,
    pub status_padding: Option<i64>,
    pub status_edge_padding: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The GET_VERSION reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionReply {
    pub major: Option<i64>,
    pub minor: Option<i64>,
    pub patch: Option<i64>,
    pub human_readable: Option<String>,
    /// Path of the config file the server last loaded
    pub loaded_config_file_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The GET_CONFIG reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigReply {
    /// Raw text of the config file as last loaded
    pub config: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickReply {
    pub success: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The GET_BINDING_STATE reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingStateReply {
    /// Name of the active binding mode
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One input device (sway only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputReply {
    pub identifier: Option<String>,
    pub name: Option<String>,
    pub vendor: Option<i64>,
    pub product: Option<i64>,
    /// `keyboard`, `pointer`, `touch`, `tablet_tool`, `tablet_pad` or `switch`
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub xkb_active_layout_name: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub xkb_layout_names: Vec<String>,
    pub xkb_active_layout_index: Option<i64>,
    pub libinput: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One seat (sway only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeatReply {
    pub name: Option<String>,
    pub capabilities: Option<i64>,
    /// Id of the node focused by this seat, 0 when none
    pub focus: Option<u64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub devices: Vec<InputReply>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decode a list the server may send as `null`, which reads as empty
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize a reply payload into `T`
pub(crate) fn parse<T: DeserializeOwned>(payload: &str) -> Result<T, IpcError> {
    serde_json::from_str(payload).map_err(IpcError::DeserializeFailed)
}

/// Deserialize a RUN_COMMAND reply
///
/// The server answers an empty command with an empty payload, which is an
/// empty result list rather than a parse failure.
pub(crate) fn parse_command(payload: &str) -> Result<Vec<CommandReply>, IpcError> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_reply_all_fields() {
        let reply: VersionReply = parse(
            r#"{"major":4,"minor":20,"patch":0,"human_readable":"4.20","loaded_config_file_name":"/etc/conf"}"#,
        )
        .unwrap();

        assert_eq!(reply.major, Some(4));
        assert_eq!(reply.minor, Some(20));
        assert_eq!(reply.human_readable.as_deref(), Some("4.20"));
        assert_eq!(reply.loaded_config_file_name.as_deref(), Some("/etc/conf"));
        assert!(reply.extra.is_empty());
    }

    #[test]
    fn test_missing_fields_are_absent() {
        let reply: VersionReply = parse(r#"{"major":1}"#).unwrap();
        assert_eq!(reply.major, Some(1));
        assert_eq!(reply.patch, None);
        assert_eq!(reply.loaded_config_file_name, None);

        let output: OutputReply = parse("{}").unwrap();
        assert_eq!(output.name, None);
        assert!(output.modes.is_empty());
        assert_eq!(output.current_mode, None);
    }

    #[test]
    fn test_null_fields_are_absent() {
        let output: OutputReply =
            parse(r#"{"name":"HDMI-A-1","current_workspace":null,"active":false}"#).unwrap();
        assert_eq!(output.name.as_deref(), Some("HDMI-A-1"));
        assert_eq!(output.current_workspace, None);
        assert_eq!(output.active, Some(false));
    }

    #[test]
    fn test_unknown_fields_kept_in_extra() {
        let reply: WorkspaceReply =
            parse(r#"{"num":2,"name":"2","id":94,"representation":"H[foot]"}"#).unwrap();
        assert_eq!(reply.num, Some(2));
        assert_eq!(reply.extra.get("id"), Some(&Value::from(94)));
        assert_eq!(
            reply.extra.get("representation").and_then(Value::as_str),
            Some("H[foot]")
        );
    }

    #[test]
    fn test_workspace_list_preserves_order() {
        let workspaces: Vec<WorkspaceReply> = parse(
            r#"[
                {"num":3,"name":"3","focused":false,"rect":{"x":0,"y":0,"width":1920,"height":1080}},
                {"num":1,"name":"1","focused":true},
                {"num":-1,"name":"mail"}
            ]"#,
        )
        .unwrap();

        let names: Vec<_> = workspaces.iter().filter_map(|w| w.name.as_deref()).collect();
        assert_eq!(names, ["3", "1", "mail"]);
        assert_eq!(
            workspaces[0].rect,
            Some(Rect {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            })
        );
        assert_eq!(workspaces[2].num, Some(-1));
    }

    #[test]
    fn test_sway_output_nested_records() {
        let output: OutputReply = parse(
            r#"{
                "name":"eDP-1","make":"Unknown","scale":1.5,"dpms":true,
                "modes":[{"width":1920,"height":1080,"refresh":60000},{"width":1280,"height":720}],
                "current_mode":{"width":1920,"height":1080,"refresh":60000}
            }"#,
        )
        .unwrap();

        assert_eq!(output.scale, Some(1.5));
        assert_eq!(output.modes.len(), 2);
        assert_eq!(output.modes[1].refresh, None);
        assert_eq!(output.current_mode.and_then(|m| m.refresh), Some(60000));
    }

    #[test]
    fn test_command_reply_per_statement() {
        let replies = parse_command(
            r#"[{"success":true},{"success":false,"parse_error":true,"error":"Expected one of these tokens"}]"#,
        )
        .unwrap();

        assert_eq!(replies.len(), 2);
        assert!(replies[0].is_success());
        assert!(!replies[1].is_success());
        assert_eq!(replies[1].parse_error, Some(true));
        assert!(replies[1].error.as_deref().unwrap().starts_with("Expected"));
    }

    #[test]
    fn test_empty_command_payload_is_empty_list() {
        assert!(parse_command("").unwrap().is_empty());
        assert!(parse_command("[]").unwrap().is_empty());
    }

    #[test]
    fn test_seat_devices_and_input_type() {
        let seat: SeatReply = parse(
            r#"{"name":"seat0","capabilities":3,"focus":0,
                "devices":[{"identifier":"1:1:AT_Translated_Set_2_keyboard","type":"keyboard",
                            "xkb_layout_names":["English (US)"],"xkb_active_layout_index":0}]}"#,
        )
        .unwrap();

        assert_eq!(seat.focus, Some(0));
        assert_eq!(seat.devices.len(), 1);
        assert_eq!(seat.devices[0].input_type.as_deref(), Some("keyboard"));
        assert_eq!(seat.devices[0].xkb_layout_names, ["English (US)"]);
    }

    #[test]
    fn test_bar_config_gaps_and_colors() {
        let bar: BarConfigReply = parse(
            r##"{"id":"bar-0","mode":"dock","colors":{"background":"#000000"},
                 "gaps":{"top":1,"right":2,"bottom":3,"left":4}}"##,
        )
        .unwrap();

        assert_eq!(bar.id.as_deref(), Some("bar-0"));
        assert_eq!(bar.gaps.map(|g| g.left), Some(4));
        assert_eq!(
            bar.colors.unwrap().get("background").map(String::as_str),
            Some("#000000")
        );
        assert_eq!(bar.bar_height, None);
    }

    #[test]
    fn test_malformed_payload_is_deserialize_error() {
        let result: Result<VersionReply, _> = parse("{not json");
        assert!(matches!(result, Err(IpcError::DeserializeFailed(_))));
    }

    #[test]
    fn test_null_lists_read_as_empty() {
        let outputs: Vec<OutputReply> = parse(r#"[{"name":"HEADLESS-1","modes":null}]"#).unwrap();
        assert_eq!(outputs[0].name.as_deref(), Some("HEADLESS-1"));
        assert!(outputs[0].modes.is_empty());

        let input: InputReply =
            parse(r#"{"identifier":"0:0:virtual","xkb_layout_names":null}"#).unwrap();
        assert!(input.xkb_layout_names.is_empty());

        let seat: SeatReply = parse(r#"{"name":"seat0","devices":null}"#).unwrap();
        assert!(seat.devices.is_empty());

        // absent stays empty too
        let seat: SeatReply = parse(r#"{"name":"seat0"}"#).unwrap();
        assert!(seat.devices.is_empty());
    }
}
