//! Error types for the tunnel module.

use std::io;
use thiserror::Error;

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Error types that can occur in tunnel operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background thread was already started
    #[error("Tunnel thread already started")]
    AlreadyStarted,

    /// The background thread could not be spawned
    #[error("Failed to spawn tunnel thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// A native context is already bound to this tunnel
    #[error("Native context already bound")]
    SessionAlreadyBound,

    /// The native engine refused to create a context
    #[error("Native initialization failed: {0}")]
    NativeInitFailed(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Tunnel closed
    #[error("Tunnel closed")]
    Closed,

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}
