//! Error types for paperwatch.
//!
//! Uses `thiserror` for structured error variants covering configuration,
//! upstream sources, message formatting and channel delivery.

use std::path::PathBuf;

/// Errors that abort building or connecting a run's collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PaperwatchError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors from the configuration system. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Incompatible options: {message}")]
    IncompatibleOptions { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from an upstream paper source (query API or syndication feed).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Request to {source_name} failed: {message}")]
    Request { source_name: String, message: String },

    #[error("{source_name} returned HTTP status {status}")]
    HttpStatus { source_name: String, status: u16 },

    #[error("Failed to parse {source_name} response: {message}")]
    Parse { source_name: String, message: String },

    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },
}

/// Formatting failure: the message cannot be made to fit the channel limit.
///
/// Distinct from an empty message so callers can log and skip the paper
/// without counting it as a delivery error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Message is {length} chars even in its shortest form (limit {limit})")]
    TooLong { length: usize, limit: usize },
}

/// Errors from the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed for channel '{name}'")]
    AuthFailed { name: String },

    #[error("Failed to connect channel '{name}': {message}")]
    ConnectionFailed { name: String, message: String },

    #[error("Channel '{name}' could not resolve target {target}: {message}")]
    NotFound {
        name: String,
        target: String,
        message: String,
    },

    #[error("Send on channel '{name}' rejected (status {status}, code {code}): {message}")]
    SendRejected {
        name: String,
        status: u16,
        code: i64,
        message: String,
    },

    #[error("Send on channel '{name}' failed: {message}")]
    SendFailed { name: String, message: String },

    #[error("Send on channel '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Channel '{name}' is not connected")]
    NotConnected { name: String },
}

/// Convenience type alias for paperwatch results.
pub type Result<T> = std::result::Result<T, PaperwatchError>;
