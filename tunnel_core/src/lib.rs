//! Tunnel endpoint lifecycle for native tunneling engines.
//!
//! This crate owns the background thread of a tunnel instance, the opaque
//! handle into the native engine that does the packet work, and a per-tunnel
//! diagnostic log file that stays safe to use from native callback threads.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod config;
pub mod ffi;
pub mod logging;
pub mod pcap;
pub mod storage;
pub mod tunnel;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigManager};
pub use logging::{DiagnosticLogger, DiagnosticOptions, LogLevel};
pub use tunnel::{
    NativeBridge, Tunnel, TunnelConfig, TunnelContext, TunnelEnvironment, TunnelError,
    TunnelHandle, TunnelKind, TunnelResult, TunnelState,
};
