//! IPsec tunnel kind.
//!
//! The packet context comes from the regular [`NativeBridge`] under the
//! `ipsec` kind. On top of it the engine runs an IKE daemon, reached through
//! the [`IpSecBridge`] extension this kind is built with.
//!
//! [`NativeBridge`]: crate::tunnel::NativeBridge

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::logging::{DiagnosticLogger, LogLevel};
use crate::tunnel::bridge::TunnelHandle;
use crate::tunnel::command::CommandQueue;
use crate::tunnel::config::parse_option;
use crate::tunnel::context::TunnelContext;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::kind::TunnelKind;
use crate::tunnel::manager::Tunnel;
use crate::tunnel::types::{ConnectionOptions, TunnelState};

/// Configuration name of this kind.
pub const KIND: &str = "ipsec";

/// Option: connection type understood by the IKE daemon.
pub const OPT_TYPE: &str = "type";
/// Option: gateway host name or address. Required.
pub const OPT_GATEWAY: &str = "gateway";
/// Option: EAP/XAuth user name.
pub const OPT_USERNAME: &str = "username";
/// Option: EAP/XAuth password.
pub const OPT_PASSWORD: &str = "password";
/// Option: bring-your-own-device mode (`true`/`false`).
pub const OPT_BYOD: &str = "byod";

/// Connection type used when none is configured.
pub const DEFAULT_CONNECTION_TYPE: &str = "ikev2-eap";

/// What the IKE daemon is asked to connect to.
#[derive(Clone, PartialEq, Eq)]
pub struct IpSecInitiate {
    pub connection_type: String,
    pub gateway: String,
    pub username: String,
    pub password: String,
}

impl IpSecInitiate {
    fn from_options(options: &ConnectionOptions) -> TunnelResult<Self> {
        let value = |key: &str| options.get(key).map(|v| v.trim().to_string());
        let gateway = value(OPT_GATEWAY)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| TunnelError::Config(format!("missing option {OPT_GATEWAY}")))?;

        Ok(IpSecInitiate {
            connection_type: value(OPT_TYPE)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_CONNECTION_TYPE.to_string()),
            gateway,
            username: value(OPT_USERNAME).unwrap_or_default(),
            password: options.get(OPT_PASSWORD).cloned().unwrap_or_default(),
        })
    }
}

impl fmt::Debug for IpSecInitiate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpSecInitiate")
            .field("connection_type", &self.connection_type)
            .field("gateway", &self.gateway)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// IKE daemon entry points of the native engine.
///
/// Calls are one-way like the rest of the bridge; failures come back through
/// the logger given to [`IpSecBridge::initialize_daemon`].
pub trait IpSecBridge: Send + Sync {
    /// Start the daemon on top of the packet context `tun`. Returns `false`
    /// if the daemon could not be initialized.
    fn initialize_daemon(
        &self,
        tun: TunnelHandle,
        byod: bool,
        logger: Arc<DiagnosticLogger>,
    ) -> bool;

    /// Stop the daemon. Called once per successful initialization.
    fn deinitialize_daemon(&self);

    /// Start negotiating the connection described by `request`.
    fn initiate(&self, request: &IpSecInitiate);

    /// Report a change of the underlying network.
    fn network_changed(&self, disconnected: bool);
}

enum Command {
    Establish(ConnectionOptions),
    NetworkChanged(bool),
    Terminate,
    ProcessDied,
}

/// Tunnel backed by an IKE daemon inside the native engine.
pub struct IpSecTunnel {
    bridge: Arc<dyn IpSecBridge>,
    commands: CommandQueue<Command>,
    daemon_running: AtomicBool,
}

impl IpSecTunnel {
    pub fn new(bridge: Arc<dyn IpSecBridge>) -> Self {
        IpSecTunnel {
            bridge,
            commands: CommandQueue::new(),
            daemon_running: AtomicBool::new(false),
        }
    }

    /// Queue a network change for the tunnel thread.
    pub fn notify_network_changed(&self, disconnected: bool) -> TunnelResult<()> {
        self.commands.send(Command::NetworkChanged(disconnected))
    }

    pub fn is_daemon_running(&self) -> bool {
        self.daemon_running.load(Ordering::Acquire)
    }

    fn establish(&self, ctx: &TunnelContext, options: ConnectionOptions) {
        if ctx.state() == TunnelState::Established {
            ctx.log(LogLevel::Warn, "Connection already established, ignoring request");
            return;
        }
        if !ctx.set_state(TunnelState::Establishing) {
            ctx.log(LogLevel::Warn, "Tunnel is terminated, ignoring establish request");
            return;
        }
        ctx.log(LogLevel::Info, "Establishing connection");

        match self.bring_up(ctx, options) {
            Ok(()) => {
                ctx.set_state(TunnelState::Established);
                ctx.log(LogLevel::Info, "Connection initiated");
            }
            Err(e) => {
                ctx.log(LogLevel::Error, &format!("Can't establish connection: {e}"));
                self.tear_down(ctx);
                ctx.set_state(TunnelState::Failed);
            }
        }
    }

    fn bring_up(&self, ctx: &TunnelContext, options: ConnectionOptions) -> TunnelResult<()> {
        let mut merged = ctx.config().map(|c| c.options.clone()).unwrap_or_default();
        merged.extend(options);

        let request = IpSecInitiate::from_options(&merged)?;
        let byod = merged
            .get(OPT_BYOD)
            .map(|v| parse_option::<bool>(OPT_BYOD, v))
            .transpose()?
            .unwrap_or(false);

        let handle = ctx.open_session(KIND)?;
        ctx.log(LogLevel::Debug, &format!("Native context {handle} bound"));

        if !self
            .bridge
            .initialize_daemon(handle, byod, Arc::clone(ctx.logger()))
        {
            return Err(TunnelError::NativeInitFailed(
                "IKE daemon did not start".to_string(),
            ));
        }
        self.daemon_running.store(true, Ordering::Release);

        debug!(tag = %ctx.tag(), ?request, "Initiating IPsec connection");
        self.bridge.initiate(&request);
        Ok(())
    }

    fn network_changed(&self, ctx: &TunnelContext, disconnected: bool) {
        if !self.is_daemon_running() {
            debug!(tag = %ctx.tag(), disconnected, "No IKE daemon, dropping network change");
            return;
        }
        let message = if disconnected {
            "Network lost"
        } else {
            "Network available"
        };
        ctx.log(LogLevel::Info, message);
        self.bridge.network_changed(disconnected);
    }

    /// Stop the daemon before releasing the context it runs on.
    fn tear_down(&self, ctx: &TunnelContext) {
        if self.daemon_running.swap(false, Ordering::AcqRel) {
            self.bridge.deinitialize_daemon();
            ctx.log(LogLevel::Debug, "IKE daemon stopped");
        }
        if ctx.release_session() {
            ctx.log(LogLevel::Debug, "Native context released");
        }
    }

    fn terminate(&self, ctx: &TunnelContext) {
        if ctx.state() == TunnelState::Terminated {
            return;
        }
        self.tear_down(ctx);
        ctx.set_state(TunnelState::Terminated);
        ctx.log(LogLevel::Info, "Connection terminated");
    }

    fn handle_process_death(&self, ctx: &TunnelContext) {
        ctx.log(LogLevel::Error, "IPsec process died unexpectedly");
        self.tear_down(ctx);
        ctx.set_state(TunnelState::Failed);
    }
}

impl TunnelKind for IpSecTunnel {
    fn kind_name(&self) -> &str {
        "IpSecTunnel"
    }

    fn thread_name(&self) -> String {
        "IpSecTunnel".to_string()
    }

    fn run(&self, ctx: &TunnelContext) {
        let Some(receiver) = self.commands.take_receiver() else {
            warn!(tag = %ctx.tag(), "Command loop already ran");
            return;
        };

        ctx.log(LogLevel::Debug, "Command loop started");
        while let Ok(command) = receiver.recv() {
            match command {
                Command::Establish(options) => self.establish(ctx, options),
                Command::NetworkChanged(disconnected) => self.network_changed(ctx, disconnected),
                Command::ProcessDied => self.handle_process_death(ctx),
                Command::Terminate => {
                    self.terminate(ctx);
                    break;
                }
            }
        }

        self.tear_down(ctx);
        ctx.log(LogLevel::Debug, "Command loop finished");
        ctx.logger().flush();
    }

    fn establish_connection(
        &self,
        ctx: &TunnelContext,
        options: ConnectionOptions,
    ) -> TunnelResult<()> {
        if ctx.state() == TunnelState::Terminated {
            return Err(TunnelError::InvalidState(
                "tunnel already terminated".to_string(),
            ));
        }
        self.commands.send(Command::Establish(options))
    }

    fn terminate_connection(&self, ctx: &TunnelContext) {
        if self.commands.send(Command::Terminate).is_err() {
            self.tear_down(ctx);
        }
    }

    fn process_died(&self, ctx: &TunnelContext) {
        if self.commands.send(Command::ProcessDied).is_err() {
            self.tear_down(ctx);
        }
    }
}

impl Tunnel<IpSecTunnel> {
    /// Tell the IKE daemon the device lost or regained connectivity.
    pub fn network_changed(&self, disconnected: bool) -> TunnelResult<()> {
        self.kind().notify_network_changed(disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> ConnectionOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_initiate_from_options() {
        let request = IpSecInitiate::from_options(&options(&[
            (OPT_GATEWAY, " vpn.example.com "),
            (OPT_USERNAME, "alice"),
            (OPT_PASSWORD, " secret "),
        ]))
        .unwrap();

        assert_eq!(request.connection_type, DEFAULT_CONNECTION_TYPE);
        assert_eq!(request.gateway, "vpn.example.com");
        assert_eq!(request.username, "alice");
        // passwords are passed through untouched
        assert_eq!(request.password, " secret ");
    }

    #[test]
    fn test_gateway_is_required() {
        let err = IpSecInitiate::from_options(&options(&[(OPT_USERNAME, "alice")])).unwrap_err();
        assert!(err.to_string().contains(OPT_GATEWAY));
    }

    #[test]
    fn test_debug_hides_password() {
        let request = IpSecInitiate::from_options(&options(&[
            (OPT_GATEWAY, "gw"),
            (OPT_PASSWORD, "hunter2"),
        ]))
        .unwrap();
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
