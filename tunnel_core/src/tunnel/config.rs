//! Immutable configuration record of a single tunnel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::openvpn;

/// Configuration of one tunnel, supplied at construction and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Stable identifier of the configuration record
    pub config_id: String,

    /// Tunnel kind (default: "openvpn")
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Connection options; their meaning belongs to the tunnel kind
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_kind() -> String {
    openvpn::KIND.to_string()
}

impl TunnelConfig {
    /// Create a configuration of the default kind with no options.
    pub fn new(config_id: impl Into<String>) -> Self {
        TunnelConfig {
            config_id: config_id.into(),
            kind: default_kind(),
            options: BTreeMap::new(),
        }
    }

    /// Set the tunnel kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Add a connection option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Get a connection option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Parse a connection option value, naming `key` in the error.
pub(crate) fn parse_option<T: FromStr>(key: &str, value: &str) -> TunnelResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TunnelError::Config(format!("invalid value for {key}: {value}")))
}
