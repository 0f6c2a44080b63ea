//! KDL configuration parser

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::*;

/// Where clients look for their configuration
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/tilewire/config.kdl";

/// Load the configuration at `path`, or at [`DEFAULT_CONFIG_PATH`]
///
/// A missing file is not an error: the defaults are returned.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => shellexpand::tilde(DEFAULT_CONFIG_PATH).into_owned().into(),
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(ClientConfig::default());
    }
    parse_config(&path)
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl reports spans with its own miette version
        let span = miette::SourceSpan::from((e.span.offset(), e.span.len()));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = ClientConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "connection" => {
                config.connection = parse_connection(node)?;
            }
            "log-level" => {
                config.log_level = string_value(node)?
                    .parse()
                    .map_err(|message| ConfigError::Invalid { message })?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_connection(node: &kdl::KdlNode) -> Result<ConnectionConfig, ConfigError> {
    let mut connection = ConnectionConfig::default();

    let Some(children) = node.children() else {
        return Ok(connection);
    };

    for child in children.nodes() {
        match child.name().value() {
            "socket-path" => {
                let path = string_value(child)?;
                connection.socket_path = Some(shellexpand::tilde(path).into_owned().into());
            }
            "auto-reconnect" => {
                connection.auto_reconnect = bool_value(child)?;
            }
            "socket-wait-attempts" => {
                connection.socket_wait_attempts = count_value(child)?;
            }
            "socket-wait-interval-ms" => {
                connection.socket_wait_interval = Duration::from_millis(count_value(child)?.into());
            }
            "reconnect-attempts" => {
                connection.reconnect_attempts = count_value(child)?;
            }
            "reconnect-interval-ms" => {
                connection.reconnect_interval = Duration::from_millis(count_value(child)?.into());
            }
            key => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }
    }

    Ok(connection)
}

fn first_value<'a>(node: &'a kdl::KdlNode) -> Result<&'a kdl::KdlValue, ConfigError> {
    node.entries()
        .first()
        .map(|entry| entry.value())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` needs a value", node.name().value()),
        })
}

fn string_value(node: &kdl::KdlNode) -> Result<&str, ConfigError> {
    first_value(node)?
        .as_string()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects a string", node.name().value()),
        })
}

fn bool_value(node: &kdl::KdlNode) -> Result<bool, ConfigError> {
    first_value(node)?
        .as_bool()
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects true or false", node.name().value()),
        })
}

fn count_value(node: &kdl::KdlNode) -> Result<u32, ConfigError> {
    first_value(node)?
        .as_i64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects a non-negative integer", node.name().value()),
        })
}
