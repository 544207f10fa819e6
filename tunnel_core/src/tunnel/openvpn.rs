//! OpenVPN tunnel kind.
//!
//! The tunnel thread runs a command loop. Requests from the owner are queued
//! on a channel, so they may be issued before the thread is started and from
//! any thread.

use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;

use crate::logging::LogLevel;
use crate::tunnel::command::CommandQueue;
use crate::tunnel::config::parse_option;
use crate::tunnel::context::TunnelContext;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::kind::TunnelKind;
use crate::tunnel::types::{ConnectionOptions, TunnelState};

/// Configuration name of this kind.
pub const KIND: &str = "openvpn";

/// Option: IPv4 address to masquerade outgoing traffic as.
pub const OPT_MASQUERADE_IP4: &str = "masquerade_ip4";
/// Option: IPv6 address to masquerade outgoing traffic as.
pub const OPT_MASQUERADE_IP6: &str = "masquerade_ip6";

enum Command {
    Establish(ConnectionOptions),
    Terminate,
    ProcessDied,
}

/// Tunnel backed by an OpenVPN session inside the native engine.
pub struct OpenVpnTunnel {
    commands: CommandQueue<Command>,
}

impl OpenVpnTunnel {
    pub fn new() -> Self {
        OpenVpnTunnel {
            commands: CommandQueue::new(),
        }
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

        match Self::bring_up(ctx, options) {
            Ok(()) => {
                ctx.set_state(TunnelState::Established);
                ctx.log(LogLevel::Info, "Connection established");
            }
            Err(e) => {
                ctx.log(LogLevel::Error, &format!("Can't establish connection: {e}"));
                ctx.release_session();
                ctx.set_state(TunnelState::Failed);
            }
        }
    }

    fn bring_up(ctx: &TunnelContext, options: ConnectionOptions) -> TunnelResult<()> {
        // explicit options override the configured ones
        let mut merged = ctx.config().map(|c| c.options.clone()).unwrap_or_default();
        merged.extend(options);

        let masquerade4 = merged
            .get(OPT_MASQUERADE_IP4)
            .map(|v| parse_option::<Ipv4Addr>(OPT_MASQUERADE_IP4, v))
            .transpose()?;
        let masquerade6 = merged
            .get(OPT_MASQUERADE_IP6)
            .map(|v| parse_option::<Ipv6Addr>(OPT_MASQUERADE_IP6, v))
            .transpose()?;

        let handle = ctx.open_session(KIND)?;
        ctx.log(LogLevel::Debug, &format!("Native context {handle} bound"));

        if let Some(address) = masquerade4 {
            ctx.set_masquerade_ip4(address);
            ctx.set_masquerade_ip4_mode(true);
        }
        if let Some(address) = masquerade6 {
            ctx.set_masquerade_ip6(&address.octets());
            ctx.set_masquerade_ip6_mode(true);
        }
        Ok(())
    }

    fn terminate(&self, ctx: &TunnelContext) {
        if ctx.state() == TunnelState::Terminated {
            return;
        }
        if ctx.release_session() {
            ctx.log(LogLevel::Debug, "Native context released");
        }
        ctx.set_state(TunnelState::Terminated);
        ctx.log(LogLevel::Info, "Connection terminated");
    }

    fn handle_process_death(&self, ctx: &TunnelContext) {
        ctx.log(LogLevel::Error, "OpenVPN process died unexpectedly");
        ctx.release_session();
        ctx.set_state(TunnelState::Failed);
    }
}

impl Default for OpenVpnTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelKind for OpenVpnTunnel {
    fn kind_name(&self) -> &str {
        "OpenVpnTunnel"
    }

    fn thread_name(&self) -> String {
        "OpenVpnTunnel".to_string()
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
                Command::ProcessDied => self.handle_process_death(ctx),
                Command::Terminate => {
                    self.terminate(ctx);
                    break;
                }
            }
        }

        // nothing stays bound once the loop is gone
        ctx.release_session();
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
            // loop already gone; nothing left to tear down
            ctx.release_session();
        }
    }

    fn process_died(&self, ctx: &TunnelContext) {
        if self.commands.send(Command::ProcessDied).is_err() {
            ctx.release_session();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        let addr: Ipv4Addr = parse_option(OPT_MASQUERADE_IP4, " 10.8.0.2 ").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 8, 0, 2));

        let err = parse_option::<Ipv6Addr>(OPT_MASQUERADE_IP6, "not-an-address").unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
    }
}
