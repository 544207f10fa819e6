//! Type definitions for the tunnel module.

use std::collections::BTreeMap;
use std::fmt;

/// Free-form connection parameters passed to
/// [`TunnelKind::establish_connection`](crate::tunnel::TunnelKind::establish_connection).
pub type ConnectionOptions = BTreeMap<String, String>;

/// Lifecycle state of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Constructed, no thread yet
    Created,
    /// Background thread started
    ThreadStarted,
    /// Connection is being established
    Establishing,
    /// Connection is up
    Established,
    /// Connection torn down; terminal
    Terminated,
    /// Unrecoverable failure
    Failed,
}

impl TunnelState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `Terminated` accepts nothing. `Failed` only accepts a retry
    /// (`Establishing`) or termination.
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        match self {
            TunnelState::Terminated => false,
            TunnelState::Failed => {
                matches!(next, TunnelState::Establishing | TunnelState::Terminated)
            }
            _ => true,
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Created => "created",
            TunnelState::ThreadStarted => "thread-started",
            TunnelState::Establishing => "establishing",
            TunnelState::Established => "established",
            TunnelState::Terminated => "terminated",
            TunnelState::Failed => "failed",
        };
        f.write_str(name)
    }
}
