//! Delegation contract into the native tunneling engine.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::logging::DiagnosticLogger;
use crate::pcap::PacketSink;
use crate::tunnel::error::{TunnelError, TunnelResult};

/// Opaque token identifying native engine state. Zero means "nothing bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelHandle(u64);

impl TunnelHandle {
    pub const NULL: TunnelHandle = TunnelHandle(0);

    /// Wrap a raw value produced by the native engine.
    pub const fn from_raw(raw: u64) -> Self {
        TunnelHandle(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Calls from the lifecycle layer into the native engine.
///
/// Callers guarantee `handle` is valid and arguments are already validated.
/// Every call is one-way; engine failures come back as messages through the
/// logger passed to [`NativeBridge::create_context`], possibly from an engine
/// thread.
pub trait NativeBridge: Send + Sync {
    /// Allocate native tunnel state for a tunnel of `kind`. `None` or a zero
    /// handle means the engine could not initialize.
    fn create_context(&self, kind: &str, logger: Arc<DiagnosticLogger>) -> Option<TunnelHandle>;

    /// Free the state behind `handle`. Called exactly once per created context.
    fn destroy_context(&self, handle: TunnelHandle);

    fn set_masquerade_ip4_mode(&self, handle: TunnelHandle, on: bool);

    fn set_masquerade_ip4(&self, handle: TunnelHandle, address: u32);

    fn set_masquerade_ip6_mode(&self, handle: TunnelHandle, on: bool);

    fn set_masquerade_ip6(&self, handle: TunnelHandle, address: &[u8; 16]);

    /// Start (or restart) forwarding captured packets to `sink`.
    fn debug_restart_pcap(&self, handle: TunnelHandle, sink: Arc<dyn PacketSink>);

    fn debug_stop_pcap(&self, handle: TunnelHandle);
}

/// A live native context. Dropping it releases the context in the engine.
pub struct NativeSession {
    handle: TunnelHandle,
    bridge: Arc<dyn NativeBridge>,
}

impl NativeSession {
    /// Ask the engine for a new context.
    pub fn open(
        bridge: Arc<dyn NativeBridge>,
        kind: &str,
        logger: Arc<DiagnosticLogger>,
    ) -> TunnelResult<Self> {
        match bridge.create_context(kind, logger) {
            Some(handle) if handle.is_valid() => {
                debug!(kind, handle = %handle, "Native context created");
                Ok(NativeSession { handle, bridge })
            }
            _ => Err(TunnelError::NativeInitFailed(format!(
                "engine returned no context for {kind}"
            ))),
        }
    }

    pub fn handle(&self) -> TunnelHandle {
        self.handle
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        debug!(handle = %self.handle, "Releasing native context");
        self.bridge.destroy_context(self.handle);
    }
}

impl fmt::Debug for NativeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSession")
            .field("handle", &self.handle)
            .finish()
    }
}
