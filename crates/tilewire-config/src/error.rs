use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(tilewire::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(tilewire::config::invalid))]
    Invalid { message: String },

    #[error("Unknown key: {key}")]
    #[diagnostic(
        code(tilewire::config::unknown_key),
        help("valid keys are socket-path, auto-reconnect, socket-wait-attempts, socket-wait-interval-ms, reconnect-attempts and reconnect-interval-ms")
    )]
    UnknownKey { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
