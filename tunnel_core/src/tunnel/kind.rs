//! Capabilities every concrete tunnel kind provides.

use crate::tunnel::context::TunnelContext;
use crate::tunnel::error::TunnelResult;
use crate::tunnel::types::ConnectionOptions;

/// A concrete kind of tunnel, selected when the [`crate::Tunnel`] is built.
///
/// All methods may be called from any thread. `run` is the body of the
/// tunnel's background thread; the others are invoked by the owner.
pub trait TunnelKind: Send + Sync + 'static {
    /// Type name used in the instance log tag.
    fn kind_name(&self) -> &str;

    /// Name given to the background thread.
    fn thread_name(&self) -> String;

    /// Body of the background thread.
    fn run(&self, ctx: &TunnelContext);

    /// Start bringing the connection up.
    ///
    /// On failure the kind reports through the context's logger and must
    /// leave the tunnel in a state where
    /// [`terminate_connection`](Self::terminate_connection) is still safe.
    fn establish_connection(
        &self,
        ctx: &TunnelContext,
        options: ConnectionOptions,
    ) -> TunnelResult<()>;

    /// Tear the connection down. Must be safe from any state and when
    /// called repeatedly. Once it has been called, `run` must return: a
    /// dropped [`crate::Tunnel`] calls it and then waits for the thread.
    fn terminate_connection(&self, ctx: &TunnelContext);

    /// The process backing the tunnel exited unexpectedly.
    fn process_died(&self, _ctx: &TunnelContext) {}
}
