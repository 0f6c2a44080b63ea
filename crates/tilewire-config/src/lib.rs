//! Configuration parsing for tilewire clients
//!
//! Reads the KDL file describing how a client reaches the window manager
//! and how verbose it logs, and turns it into
//! [`tilewire::ConnectionOptions`].

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str, DEFAULT_CONFIG_PATH};
