//! Core error types for hopshare

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the hopshare ecosystem
#[derive(Error, Debug)]
pub enum HsError {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Authentication failed
    #[error("Authentication failed for {0}")]
    AuthenticationFailed(String),

    /// Connection refused
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Host key verification failed
    #[error("Host key verification failed: {0}")]
    HostKeyRejected(String),

    /// Transport used before it was connected
    #[error("Transport is not connected")]
    NotConnected,

    /// Port forward could not be installed or removed
    #[error("Port forward error: {0}")]
    Forward(String),

    /// File transfer failed
    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    /// Operation cancelled through the monitor
    #[error("Operation cancelled")]
    Cancelled,

    /// SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the session sharing layer
#[derive(Error, Debug)]
pub enum SessionError {
    /// Disconnect called for a consumer that holds no usage on the session
    #[error("Session to {destination} is not acquired for {consumer}")]
    NotAcquired {
        consumer: String,
        destination: String,
    },

    /// Port forward removal without a matching active entry
    #[error("Port forward is not set up: {0}")]
    NotSetUp(String),

    /// No identity provider could be initialized
    #[error("Identity source unavailable: {0}")]
    IdentitySourceUnavailable(String),

    /// Graceful transport teardown exceeded its timeout
    #[error("Disconnect timed out after {0:?}")]
    DisconnectTimeout(Duration),

    /// Jump hop used before its tunnel was established
    #[error("Session is not connected")]
    NotConnected,

    /// Chain opened without any hop
    #[error("Chain has no hops")]
    EmptyChain,

    /// One hop of a chain failed to connect
    #[error("Failed to connect to {destination}")]
    Hop {
        destination: String,
        #[source]
        source: Box<SessionError>,
    },

    /// Transport error, passed through unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
