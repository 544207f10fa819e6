//! Tunnel lifecycle management.
//!
//! A [`Tunnel`] ties a [`TunnelKind`] to its background thread, its
//! native session slot and its diagnostic logger.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::logging::DiagnosticLogger;
use crate::pcap::PacketSink;
use crate::tunnel::bridge::TunnelHandle;
use crate::tunnel::config::TunnelConfig;
use crate::tunnel::context::{TunnelContext, TunnelEnvironment};
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::kind::TunnelKind;
use crate::tunnel::types::{ConnectionOptions, TunnelState};

/// Instance numbers for log tags, unique within the process.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// One tunnel endpoint running on its own thread.
pub struct Tunnel<K: TunnelKind> {
    kind: Arc<K>,
    context: Arc<TunnelContext>,
    started: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<K: TunnelKind> Tunnel<K> {
    /// Create a tunnel. Neither the thread nor a native session is started.
    pub fn new(env: &TunnelEnvironment, config: Option<TunnelConfig>, kind: K) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let tag = format!("{} (id={})", kind.kind_name(), instance);
        let tunnel_id = config.as_ref().map(|c| c.config_id.clone());

        let logger = Arc::new(DiagnosticLogger::new(
            tag.clone(),
            tunnel_id.clone(),
            Arc::clone(&env.storage),
            Arc::clone(&env.clock),
            env.diagnostics.clone(),
        ));
        debug!(tag = %tag, tunnel_id = ?tunnel_id, "Tunnel created");

        Tunnel {
            kind: Arc::new(kind),
            context: Arc::new(TunnelContext::new(
                config,
                tag,
                logger,
                Arc::clone(&env.bridge),
            )),
            started: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Start the background thread. Only the first call has any effect;
    /// later calls return [`TunnelError::AlreadyStarted`].
    pub fn start_loop(&self) -> TunnelResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(tag = %self.context.tag(), "Tunnel thread already started");
            return Err(TunnelError::AlreadyStarted);
        }

        let name = self.kind.thread_name();
        self.context.set_state(TunnelState::ThreadStarted);

        let kind = Arc::clone(&self.kind);
        let ctx = Arc::clone(&self.context);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(tag = %ctx.tag(), "Tunnel thread running");
            kind.run(&ctx);
            debug!(tag = %ctx.tag(), "Tunnel thread finished");
        });

        match spawned {
            Ok(handle) => {
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(tag = %self.context.tag(), thread = %name, "Tunnel thread started");
                Ok(())
            }
            Err(e) => {
                self.context.set_state(TunnelState::Failed);
                Err(TunnelError::ThreadSpawn(e))
            }
        }
    }

    pub fn establish_connection(&self, options: ConnectionOptions) -> TunnelResult<()> {
        self.kind.establish_connection(&self.context, options)
    }

    pub fn terminate_connection(&self) {
        self.kind.terminate_connection(&self.context);
    }

    /// Called by the process supervisor when the backing process exits.
    pub fn process_died(&self) {
        warn!(tag = %self.context.tag(), "Backing process died");
        self.kind.process_died(&self.context);
    }

    /// Wait for the background thread to finish. Returns immediately if it
    /// was never started or has already been joined.
    pub fn join(&self) -> TunnelResult<()> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| TunnelError::Other("tunnel thread panicked".to_string())),
            None => Ok(()),
        }
    }

    pub fn tunnel_id(&self) -> Option<&str> {
        self.context.tunnel_id()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TunnelState {
        self.context.state()
    }

    pub fn handle(&self) -> TunnelHandle {
        self.context.handle()
    }

    pub fn context(&self) -> &Arc<TunnelContext> {
        &self.context
    }

    pub fn logger(&self) -> &Arc<DiagnosticLogger> {
        self.context.logger()
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn set_masquerade_ip4_mode(&self, on: bool) {
        self.context.set_masquerade_ip4_mode(on);
    }

    pub fn set_masquerade_ip4(&self, address: Ipv4Addr) {
        self.context.set_masquerade_ip4(address);
    }

    pub fn set_masquerade_ip6_mode(&self, on: bool) {
        self.context.set_masquerade_ip6_mode(on);
    }

    pub fn set_masquerade_ip6(&self, address: &[u8]) {
        self.context.set_masquerade_ip6(address);
    }

    pub fn debug_restart_pcap(&self, sink: Arc<dyn PacketSink>) {
        self.context.debug_restart_pcap(sink);
    }

    pub fn debug_stop_pcap(&self) {
        self.context.debug_stop_pcap();
    }
}

impl<K: TunnelKind> Drop for Tunnel<K> {
    /// Terminates the connection and waits for the background thread, so the
    /// native context is released before the tunnel is gone.
    fn drop(&mut self) {
        self.kind.terminate_connection(&self.context);

        let handle = self
            .thread
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        // dropped from inside its own loop; the thread ends on its own
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(tag = %self.context.tag(), "Tunnel thread panicked");
        }
    }
}
