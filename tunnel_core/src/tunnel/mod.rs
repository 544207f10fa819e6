//! Tunnel lifecycle and native engine delegation.
//!
//! A [`Tunnel`] runs a [`TunnelKind`] on a dedicated thread. The kind talks
//! to the native engine through a [`NativeBridge`], and the opaque
//! [`TunnelHandle`] it gets back is owned by the tunnel's [`TunnelContext`].

mod bridge;
mod command;
mod config;
mod context;
mod error;
mod kind;
mod manager;
pub mod ipsec;
pub mod openvpn;
pub mod types;

pub use bridge::{NativeBridge, NativeSession, TunnelHandle};
pub use config::TunnelConfig;
pub use context::{TunnelContext, TunnelEnvironment};
pub use error::{TunnelError, TunnelResult};
pub use kind::TunnelKind;
pub use ipsec::{IpSecBridge, IpSecInitiate, IpSecTunnel};
pub use manager::Tunnel;
pub use openvpn::OpenVpnTunnel;
pub use types::{ConnectionOptions, TunnelState};

/// Whether `kind` names a tunnel kind this crate can build.
pub fn is_known_kind(kind: &str) -> bool {
    kind == openvpn::KIND || kind == ipsec::KIND
}
