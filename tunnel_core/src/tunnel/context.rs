//! State shared between a tunnel's owner, its thread, and its kind.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::logging::{DiagnosticLogger, DiagnosticOptions, LogLevel};
use crate::pcap::PacketSink;
use crate::storage::ExternalStorage;
use crate::tunnel::bridge::{NativeBridge, NativeSession, TunnelHandle};
use crate::tunnel::config::TunnelConfig;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::types::TunnelState;

/// Collaborators a tunnel is constructed with.
#[derive(Clone)]
pub struct TunnelEnvironment {
    pub storage: Arc<dyn ExternalStorage>,
    pub bridge: Arc<dyn NativeBridge>,
    pub clock: Arc<dyn Clock>,
    pub diagnostics: DiagnosticOptions,
}

impl TunnelEnvironment {
    pub fn new(storage: Arc<dyn ExternalStorage>, bridge: Arc<dyn NativeBridge>) -> Self {
        TunnelEnvironment {
            storage,
            bridge,
            clock: Arc::new(SystemClock),
            diagnostics: DiagnosticOptions::default(),
        }
    }

    /// Build an environment from the `[logging]` section of a configuration.
    pub fn from_config(config: &Config, bridge: Arc<dyn NativeBridge>) -> TunnelResult<Self> {
        let storage = config.logging.storage().ok_or_else(|| {
            TunnelError::Config("no external files directory available".to_string())
        })?;
        Ok(Self::new(Arc::new(storage), bridge)
            .with_diagnostics(config.logging.diagnostic_options()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticOptions) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Per-instance state of a tunnel.
///
/// Owns the native session slot, so the handle never leaves this struct
/// except by value for the duration of a bridge call.
pub struct TunnelContext {
    config: Option<TunnelConfig>,
    tag: String,
    logger: Arc<DiagnosticLogger>,
    bridge: Arc<dyn NativeBridge>,
    session: Mutex<Option<NativeSession>>,
    state: Mutex<TunnelState>,
}

impl TunnelContext {
    pub(crate) fn new(
        config: Option<TunnelConfig>,
        tag: String,
        logger: Arc<DiagnosticLogger>,
        bridge: Arc<dyn NativeBridge>,
    ) -> Self {
        TunnelContext {
            config,
            tag,
            logger,
            bridge,
            session: Mutex::new(None),
            state: Mutex::new(TunnelState::Created),
        }
    }

    /// Configuration identifier, if a configuration was supplied.
    pub fn tunnel_id(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.config_id.as_str())
    }

    pub fn config(&self) -> Option<&TunnelConfig> {
        self.config.as_ref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn logger(&self) -> &Arc<DiagnosticLogger> {
        &self.logger
    }

    /// Shortcut for `self.logger().log(level, message)`.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, message);
    }

    pub fn state(&self) -> TunnelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is allowed. Returns whether it happened.
    pub fn set_state(&self, next: TunnelState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            trace!(tag = %self.tag, from = %*state, to = %next, "Ignoring state transition");
            return false;
        }
        if *state != next {
            info!(
                tag = %self.tag,
                tunnel_id = ?self.tunnel_id(),
                from = %*state,
                to = %next,
                "Tunnel state changed"
            );
            *state = next;
        }
        true
    }

    /// Create a native context for `kind` and bind it to this tunnel.
    pub fn open_session(&self, kind: &str) -> TunnelResult<TunnelHandle> {
        let mut slot = self.lock_session();
        if slot.is_some() {
            return Err(TunnelError::SessionAlreadyBound);
        }
        let session =
            NativeSession::open(Arc::clone(&self.bridge), kind, Arc::clone(&self.logger))?;
        let handle = session.handle();
        *slot = Some(session);
        Ok(handle)
    }

    /// Bind a session created elsewhere. At most one session is bound at a time.
    pub fn bind_session(&self, session: NativeSession) -> TunnelResult<()> {
        let mut slot = self.lock_session();
        if slot.is_some() {
            warn!(tag = %self.tag, "Refusing to bind a second native context");
            return Err(TunnelError::SessionAlreadyBound);
        }
        *slot = Some(session);
        Ok(())
    }

    /// Release the bound native context, if any. Returns whether one was bound.
    pub fn release_session(&self) -> bool {
        let session = self.lock_session().take();
        // dropped outside the lock; destroy may call back into the logger
        session.is_some()
    }

    /// Handle of the bound context, or [`TunnelHandle::NULL`].
    pub fn handle(&self) -> TunnelHandle {
        self.lock_session()
            .as_ref()
            .map_or(TunnelHandle::NULL, NativeSession::handle)
    }

    pub fn set_masquerade_ip4_mode(&self, on: bool) {
        self.with_handle("set_masquerade_ip4_mode", |bridge, handle| {
            bridge.set_masquerade_ip4_mode(handle, on)
        });
    }

    pub fn set_masquerade_ip4(&self, address: Ipv4Addr) {
        self.with_handle("set_masquerade_ip4", |bridge, handle| {
            bridge.set_masquerade_ip4(handle, u32::from(address))
        });
    }

    pub fn set_masquerade_ip6_mode(&self, on: bool) {
        self.with_handle("set_masquerade_ip6_mode", |bridge, handle| {
            bridge.set_masquerade_ip6_mode(handle, on)
        });
    }

    /// Forwarded only when `address` is exactly 16 bytes.
    pub fn set_masquerade_ip6(&self, address: &[u8]) {
        let Ok(address) = <&[u8; 16]>::try_from(address) else {
            debug!(
                tag = %self.tag,
                len = address.len(),
                "Dropping IPv6 masquerade address of wrong length"
            );
            return;
        };
        self.with_handle("set_masquerade_ip6", |bridge, handle| {
            bridge.set_masquerade_ip6(handle, address)
        });
    }

    pub fn debug_restart_pcap(&self, sink: Arc<dyn PacketSink>) {
        self.with_handle("debug_restart_pcap", |bridge, handle| {
            bridge.debug_restart_pcap(handle, sink)
        });
    }

    pub fn debug_stop_pcap(&self) {
        self.with_handle("debug_stop_pcap", |bridge, handle| {
            bridge.debug_stop_pcap(handle)
        });
    }

    fn with_handle(&self, op: &str, call: impl FnOnce(&dyn NativeBridge, TunnelHandle)) {
        let slot = self.lock_session();
        match slot.as_ref().map(NativeSession::handle) {
            Some(handle) if handle.is_valid() => call(self.bridge.as_ref(), handle),
            _ => trace!(tag = %self.tag, op, "No native context bound, dropping call"),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<NativeSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
